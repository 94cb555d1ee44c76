//! The four physical layout variants and the single point that selects one.
//!
//! Every native-layout type exists in four shapes, one per combination of
//! pointer width and packing. Native structs are written generically over a
//! [`NativeLayout`] marker, so `T<Layout40>` through `T<Layout81>` are four
//! distinct concrete types sharing one definition. [`dispatch`] is the only
//! place where a runtime [`Variant`] is turned into one of those types.

use std::any::Any;
use std::fmt;

use crate::error::{PlatformError, Result};
use crate::platform::{Packing, PlatformDescriptor, PointerWidth};

/// One of the four native ABI variants.
///
/// The first digit is the unmanaged long/pointer width in bytes, the second
/// is `0` for natural alignment and `1` for 1-byte packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    V40,
    V41,
    V80,
    V81,
}

impl Variant {
    /// All variants, in dispatch order.
    pub const ALL: [Variant; 4] = [Variant::V40, Variant::V41, Variant::V80, Variant::V81];

    /// Select the variant matching a descriptor.
    pub fn select(descriptor: &PlatformDescriptor) -> Self {
        match (descriptor.pointer_width, descriptor.packing) {
            (PointerWidth::Four, Packing::Natural) => Self::V40,
            (PointerWidth::Four, Packing::Packed) => Self::V41,
            (PointerWidth::Eight, Packing::Natural) => Self::V80,
            (PointerWidth::Eight, Packing::Packed) => Self::V81,
        }
    }

    /// Select the variant of the process-wide descriptor.
    pub fn current() -> Result<Self> {
        Ok(Self::select(&crate::platform::resolve()?))
    }

    pub fn pointer_width(self) -> PointerWidth {
        match self {
            Self::V40 | Self::V41 => PointerWidth::Four,
            Self::V80 | Self::V81 => PointerWidth::Eight,
        }
    }

    pub fn packing(self) -> Packing {
        match self {
            Self::V40 | Self::V80 => Packing::Natural,
            Self::V41 | Self::V81 => Packing::Packed,
        }
    }

    /// The descriptor this variant corresponds to.
    pub fn descriptor(self) -> PlatformDescriptor {
        PlatformDescriptor::new(self.pointer_width(), self.packing())
    }

    /// Size of `CK_ULONG`-like fields and pointers in bytes.
    pub fn ulong_size(self) -> usize {
        self.pointer_width().bytes()
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V40 => write!(f, "40"),
            Self::V41 => write!(f, "41"),
            Self::V80 => write!(f, "80"),
            Self::V81 => write!(f, "81"),
        }
    }
}

/// Compile-time marker for one layout variant.
pub trait NativeLayout: fmt::Debug + Copy + Default + Send + Sync + 'static {
    /// The runtime variant this marker stands for.
    const VARIANT: Variant;

    /// Rust type of a `CK_ULONG` field in this variant.
    type ULong: Copy + fmt::Debug + Eq + Into<u64> + TryFrom<u64> + Send + Sync + 'static;

    /// Convert a logical value to this variant's `CK_ULONG`, rejecting values
    /// that do not fit.
    fn ulong(field: &str, value: u64) -> Result<Self::ULong> {
        Self::ULong::try_from(value).map_err(|_| PlatformError::Overflow {
            field: field.to_string(),
            value,
            width_bytes: Self::VARIANT.ulong_size(),
        })
    }
}

/// 4-byte pointers, natural alignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Layout40;

/// 4-byte pointers, 1-byte packing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Layout41;

/// 8-byte pointers, natural alignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Layout80;

/// 8-byte pointers, 1-byte packing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Layout81;

impl NativeLayout for Layout40 {
    const VARIANT: Variant = Variant::V40;
    type ULong = u32;
}

impl NativeLayout for Layout41 {
    const VARIANT: Variant = Variant::V41;
    type ULong = u32;
}

impl NativeLayout for Layout80 {
    const VARIANT: Variant = Variant::V80;
    type ULong = u64;
}

impl NativeLayout for Layout81 {
    const VARIANT: Variant = Variant::V81;
    type ULong = u64;
}

/// Exactly one instance of a four-way family of variant types.
#[derive(Debug)]
pub enum PerVariant<A, B, C, D> {
    V40(A),
    V41(B),
    V80(C),
    V81(D),
}

impl<A, B, C, D> PerVariant<A, B, C, D> {
    /// Which variant is held.
    pub fn variant(&self) -> Variant {
        match self {
            Self::V40(_) => Variant::V40,
            Self::V41(_) => Variant::V41,
            Self::V80(_) => Variant::V80,
            Self::V81(_) => Variant::V81,
        }
    }
}

impl<A: 'static, B: 'static, C: 'static, D: 'static> PerVariant<A, B, C, D> {
    /// Borrow the held instance as `T`, if `T` is the type of the held variant.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        match self {
            Self::V40(a) => (a as &dyn Any).downcast_ref(),
            Self::V41(b) => (b as &dyn Any).downcast_ref(),
            Self::V80(c) => (c as &dyn Any).downcast_ref(),
            Self::V81(d) => (d as &dyn Any).downcast_ref(),
        }
    }

    /// Take the held instance as `T`; hands `self` back if the types differ.
    pub fn downcast<T: 'static>(self) -> std::result::Result<T, Self> {
        if self.downcast_ref::<T>().is_none() {
            return Err(self);
        }
        let boxed: Box<dyn Any> = match self {
            Self::V40(a) => Box::new(a),
            Self::V41(b) => Box::new(b),
            Self::V80(c) => Box::new(c),
            Self::V81(d) => Box::new(d),
        };
        match boxed.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(_) => unreachable!("type checked by downcast_ref"),
        }
    }
}

/// Evaluate `$body` with `$native` bound to whichever instance a
/// [`PerVariant`] holds. Each arm is type-checked separately, so generic
/// methods of the four concrete types resolve per variant.
#[macro_export]
macro_rules! per_variant {
    ($selected:expr, $native:ident => $body:expr) => {
        match $selected {
            $crate::PerVariant::V40($native) => $body,
            $crate::PerVariant::V41($native) => $body,
            $crate::PerVariant::V80($native) => $body,
            $crate::PerVariant::V81($native) => $body,
        }
    };
}

/// Constructs the variant instance of one native type for a chosen layout.
pub trait VariantBuilder {
    /// The native type, generic over its layout.
    type Output<L: NativeLayout>;
    /// Error raised while building (e.g. width overflow).
    type Error;

    fn build<L: NativeLayout>(self) -> std::result::Result<Self::Output<L>, Self::Error>;
}

/// The four-way family produced by a builder.
pub type Selected<B> = PerVariant<
    <B as VariantBuilder>::Output<Layout40>,
    <B as VariantBuilder>::Output<Layout41>,
    <B as VariantBuilder>::Output<Layout80>,
    <B as VariantBuilder>::Output<Layout81>,
>;

/// Build exactly one variant instance for `variant`.
pub fn dispatch<B: VariantBuilder>(
    variant: Variant,
    builder: B,
) -> std::result::Result<Selected<B>, B::Error> {
    Ok(match variant {
        Variant::V40 => PerVariant::V40(builder.build::<Layout40>()?),
        Variant::V41 => PerVariant::V41(builder.build::<Layout41>()?),
        Variant::V80 => PerVariant::V80(builder.build::<Layout80>()?),
        Variant::V81 => PerVariant::V81(builder.build::<Layout81>()?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Tagged<L: NativeLayout> {
        width: usize,
        _layout: L,
    }

    struct TagBuilder;

    impl VariantBuilder for TagBuilder {
        type Output<L: NativeLayout> = Tagged<L>;
        type Error = ();

        fn build<L: NativeLayout>(self) -> std::result::Result<Tagged<L>, ()> {
            Ok(Tagged {
                width: L::VARIANT.ulong_size(),
                _layout: L::default(),
            })
        }
    }

    #[test]
    fn select_covers_all_axes() {
        for v in Variant::ALL {
            assert_eq!(Variant::select(&v.descriptor()), v);
        }
        let d = PlatformDescriptor::new(PointerWidth::Four, Packing::Packed);
        assert_eq!(d.variant(), Variant::V41);
        assert_eq!(Variant::V80.ulong_size(), 8);
        assert_eq!(Variant::V41.packing(), Packing::Packed);
    }

    #[test]
    fn dispatch_builds_only_selected_variant() {
        for v in Variant::ALL {
            let selected = dispatch(v, TagBuilder).unwrap();
            assert_eq!(selected.variant(), v);
        }
        let selected = dispatch(Variant::V41, TagBuilder).unwrap();
        let tagged = selected.downcast_ref::<Tagged<Layout41>>().unwrap();
        assert_eq!(tagged.width, 4);
        assert!(selected.downcast_ref::<Tagged<Layout81>>().is_none());
    }

    #[test]
    fn downcast_by_value() {
        let selected = dispatch(Variant::V80, TagBuilder).unwrap();
        let selected = selected.downcast::<Tagged<Layout40>>().unwrap_err();
        let tagged: Tagged<Layout80> = selected.downcast().unwrap();
        assert_eq!(tagged.width, 8);
    }

    #[test]
    fn ulong_width_per_variant() {
        assert_eq!(Layout40::ulong("bit", 7).unwrap(), 7u32);
        assert_eq!(Layout80::ulong("bit", 0x1_0000_0000).unwrap(), 0x1_0000_0000u64);
        let err = Layout41::ulong("bit", 0x1_0000_0000).unwrap_err();
        assert!(matches!(
            err,
            PlatformError::Overflow {
                width_bytes: 4,
                ..
            }
        ));
    }

    #[test]
    fn per_variant_macro_reaches_each_arm() {
        for v in Variant::ALL {
            let selected = dispatch(v, TagBuilder).unwrap();
            let width = per_variant!(&selected, tagged => tagged.width);
            assert_eq!(width, v.ulong_size());
        }
    }

    #[test]
    fn variant_display() {
        assert_eq!(Variant::V40.to_string(), "40");
        assert_eq!(Variant::V81.to_string(), "81");
    }
}
