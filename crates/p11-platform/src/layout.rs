//! Native struct layout: field offsets, padding, and byte emission.
//!
//! Follows C layout rules for the selected variant. Under natural packing each
//! field is aligned to its own size and the struct is padded to its largest
//! alignment; under 1-byte packing fields are byte-contiguous. Address and
//! `CK_ULONG`-like fields take the variant's pointer width.

use serde::Serialize;

use crate::error::{PlatformError, Result};
use crate::platform::Packing;
use crate::variant::Variant;

/// Kind of a native field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldKind {
    /// `CK_BYTE`.
    Byte,
    /// Fixed 32-bit unsigned (the mechanism type of `CK_MECHANISM`).
    U32,
    /// `CK_ULONG`: pointer width.
    ULong,
    /// Any `*_PTR`: pointer width.
    Pointer,
    /// A struct embedded by value.
    Struct { type_name: String },
}

/// Declaration of one field, before offsets are known.
#[derive(Debug, Clone)]
pub struct FieldSpec<'a> {
    name: &'static str,
    kind: FieldKind,
    nested: Option<&'a StructLayout>,
}

impl<'a> FieldSpec<'a> {
    pub fn byte(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Byte,
            nested: None,
        }
    }

    pub fn u32(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::U32,
            nested: None,
        }
    }

    pub fn ulong(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::ULong,
            nested: None,
        }
    }

    pub fn pointer(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Pointer,
            nested: None,
        }
    }

    /// A struct embedded by value; it must have been laid out for the same variant.
    pub fn embedded(name: &'static str, layout: &'a StructLayout) -> Self {
        Self {
            name,
            kind: FieldKind::Struct {
                type_name: layout.name.clone(),
            },
            nested: Some(layout),
        }
    }
}

/// Placement of one field inside a struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FieldLayout {
    pub name: String,
    pub kind: FieldKind,
    /// Byte offset from the start of the struct.
    pub offset: usize,
    pub size: usize,
    pub alignment: usize,
}

/// Computed layout of a native struct for one variant. Serializable for
/// diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct StructLayout {
    /// Native type name (e.g. `CK_MECHANISM`).
    pub name: String,
    #[serde(skip)]
    pub variant: Variant,
    pub fields: Vec<FieldLayout>,
    /// Total size including trailing padding.
    pub size: usize,
    pub alignment: usize,
}

/// Round `offset` up to the next multiple of `align`.
pub fn align_up(offset: usize, align: usize) -> usize {
    if align <= 1 {
        return offset;
    }
    offset.div_ceil(align) * align
}

impl StructLayout {
    /// Lay out `fields` in declaration order for `variant`.
    pub fn new(name: &str, variant: Variant, fields: &[FieldSpec<'_>]) -> Result<Self> {
        let packed = variant.packing() == Packing::Packed;
        let word = variant.ulong_size();

        let mut placed = Vec::with_capacity(fields.len());
        let mut offset = 0usize;
        let mut max_align = 1usize;

        for spec in fields {
            let (size, natural_align) = match (&spec.kind, spec.nested) {
                (FieldKind::Byte, _) => (1, 1),
                (FieldKind::U32, _) => (4, 4),
                (FieldKind::ULong, _) | (FieldKind::Pointer, _) => (word, word),
                (FieldKind::Struct { .. }, Some(nested)) => {
                    if nested.variant != variant {
                        return Err(PlatformError::LayoutMismatch {
                            struct_name: name.to_string(),
                            detail: format!(
                                "field '{}' embeds {} laid out for variant {}, expected {}",
                                spec.name, nested.name, nested.variant, variant
                            ),
                        });
                    }
                    (nested.size, nested.alignment)
                }
                (FieldKind::Struct { .. }, None) => {
                    return Err(PlatformError::LayoutMismatch {
                        struct_name: name.to_string(),
                        detail: format!("embedded field '{}' has no layout", spec.name),
                    });
                }
            };
            let alignment = if packed { 1 } else { natural_align };

            offset = align_up(offset, alignment);
            placed.push(FieldLayout {
                name: spec.name.to_string(),
                kind: spec.kind.clone(),
                offset,
                size,
                alignment,
            });
            offset += size;
            max_align = max_align.max(alignment);
        }

        Ok(Self {
            name: name.to_string(),
            variant,
            fields: placed,
            size: align_up(offset, max_align),
            alignment: max_align,
        })
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Offset of a field, if present.
    pub fn offset_of(&self, name: &str) -> Option<usize> {
        self.field(name).map(|f| f.offset)
    }
}

/// Emits the bytes of one struct, field by field, in declaration order.
///
/// Padding bytes are zero. Values are written in host byte order.
#[derive(Debug)]
pub struct NativeWriter<'a> {
    layout: &'a StructLayout,
    bytes: Vec<u8>,
    next: usize,
}

impl<'a> NativeWriter<'a> {
    pub fn new(layout: &'a StructLayout) -> Self {
        Self {
            layout,
            bytes: vec![0; layout.size],
            next: 0,
        }
    }

    fn advance(&mut self, name: &str, expected: &FieldKind) -> Result<FieldLayout> {
        let field = self.layout.fields.get(self.next).ok_or_else(|| {
            PlatformError::LayoutMismatch {
                struct_name: self.layout.name.clone(),
                detail: format!("no field left for '{name}'"),
            }
        })?;
        let same_kind = std::mem::discriminant(&field.kind) == std::mem::discriminant(expected);
        if field.name != name || !same_kind {
            return Err(PlatformError::LayoutMismatch {
                struct_name: self.layout.name.clone(),
                detail: format!(
                    "expected field '{}' ({:?}), got '{name}' ({expected:?})",
                    field.name, field.kind
                ),
            });
        }
        self.next += 1;
        Ok(field.clone())
    }

    fn put(&mut self, offset: usize, data: &[u8]) {
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    fn put_word(&mut self, field: &FieldLayout, value: u64) -> Result<()> {
        match field.size {
            4 => {
                let narrow = u32::try_from(value).map_err(|_| PlatformError::Overflow {
                    field: field.name.clone(),
                    value,
                    width_bytes: 4,
                })?;
                self.put(field.offset, &narrow.to_ne_bytes());
            }
            _ => self.put(field.offset, &value.to_ne_bytes()),
        }
        Ok(())
    }

    pub fn byte(&mut self, name: &str, value: u8) -> Result<&mut Self> {
        let field = self.advance(name, &FieldKind::Byte)?;
        self.put(field.offset, &[value]);
        Ok(self)
    }

    pub fn u32(&mut self, name: &str, value: u32) -> Result<&mut Self> {
        let field = self.advance(name, &FieldKind::U32)?;
        self.put(field.offset, &value.to_ne_bytes());
        Ok(self)
    }

    /// Write a `CK_ULONG`; fails with `Overflow` if it does not fit the variant width.
    pub fn ulong(&mut self, name: &str, value: u64) -> Result<&mut Self> {
        let field = self.advance(name, &FieldKind::ULong)?;
        self.put_word(&field, value)?;
        Ok(self)
    }

    /// Write an address; `0` is the null pointer.
    pub fn pointer(&mut self, name: &str, address: usize) -> Result<&mut Self> {
        let field = self.advance(name, &FieldKind::Pointer)?;
        self.put_word(&field, address as u64)?;
        Ok(self)
    }

    /// Copy the bytes of an embedded struct.
    pub fn embedded(&mut self, name: &str, data: &[u8]) -> Result<&mut Self> {
        let field = self.advance(
            name,
            &FieldKind::Struct {
                type_name: String::new(),
            },
        )?;
        if data.len() != field.size {
            return Err(PlatformError::LayoutMismatch {
                struct_name: self.layout.name.clone(),
                detail: format!(
                    "embedded field '{name}' is {} bytes, got {}",
                    field.size,
                    data.len()
                ),
            });
        }
        self.put(field.offset, data);
        Ok(self)
    }

    /// Return the struct bytes; every declared field must have been written.
    pub fn finish(self) -> Result<Vec<u8>> {
        if self.next != self.layout.fields.len() {
            return Err(PlatformError::LayoutMismatch {
                struct_name: self.layout.name.clone(),
                detail: format!(
                    "{} of {} fields written",
                    self.next,
                    self.layout.fields.len()
                ),
            });
        }
        Ok(self.bytes)
    }
}
