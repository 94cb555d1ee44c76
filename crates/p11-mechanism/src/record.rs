//! The native `CK_MECHANISM` record and its factory.
//!
//! | Field | 40 | 41 | 80 | 81 |
//! |---|---|---|---|---|
//! | `mechanism` | 4 @0 | 4 @0 | 4 @0 (+4 pad) | 4 @0 |
//! | `pParameter` | 4 @4 | 4 @4 | 8 @8 | 8 @4 |
//! | `ulParameterLen` | 4 @8 | 4 @8 | 8 @16 | 8 @12 |
//!
//! The factory never interprets parameter bytes; it trusts whatever layout
//! the parameter value produced for the same variant.

use p11_platform::{FieldSpec, NativeWriter, StructLayout, Variant};

use crate::error::{MarshalError, Result};
use crate::memory::{self, UnmanagedBuffer};

/// A `CK_MECHANISM` for one variant, owning its parameter buffer.
#[derive(Debug)]
pub struct NativeMechanismRecord {
    variant: Variant,
    mechanism: u32,
    parameter: Option<UnmanagedBuffer>,
    parameter_len: u64,
}

impl NativeMechanismRecord {
    /// Layout of `CK_MECHANISM` for `variant`.
    pub fn layout(variant: Variant) -> Result<StructLayout> {
        Ok(StructLayout::new(
            "CK_MECHANISM",
            variant,
            &[
                FieldSpec::u32("mechanism"),
                FieldSpec::pointer("pParameter"),
                FieldSpec::ulong("ulParameterLen"),
            ],
        )?)
    }

    /// Build a record. `None` yields a null parameter pointer and zero length;
    /// otherwise one buffer is allocated and the bytes copied into it.
    pub(crate) fn build(variant: Variant, mechanism: u32, parameter: Option<&[u8]>) -> Result<Self> {
        let Some(bytes) = parameter else {
            return Ok(Self {
                variant,
                mechanism,
                parameter: None,
                parameter_len: 0,
            });
        };

        let parameter_len = bytes.len() as u64;
        let max = variant.pointer_width().max_value();
        if parameter_len > max {
            return Err(MarshalError::Overflow {
                field: "ulParameterLen".to_string(),
                value: parameter_len,
                width_bytes: variant.ulong_size(),
            });
        }

        let buffer = UnmanagedBuffer::from_bytes(bytes)?;
        tracing::trace!(mechanism, %variant, parameter_len, "built mechanism record");
        Ok(Self {
            variant,
            mechanism,
            parameter: Some(buffer),
            parameter_len,
        })
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn mechanism_type(&self) -> u32 {
        self.mechanism
    }

    /// Parameter pointer handed to native code; null when there is none.
    pub fn parameter_ptr(&self) -> *const u8 {
        self.parameter
            .as_ref()
            .map_or(std::ptr::null(), UnmanagedBuffer::as_ptr)
    }

    pub fn parameter_len(&self) -> u64 {
        self.parameter_len
    }

    pub fn has_parameter(&self) -> bool {
        self.parameter.is_some()
    }

    /// Copy of the parameter block, if any.
    pub fn parameter_bytes(&self) -> Result<Option<Vec<u8>>> {
        self.parameter.as_ref().map(UnmanagedBuffer::read).transpose()
    }

    /// The `CK_MECHANISM` bytes for this record's variant.
    pub fn to_native_bytes(&self) -> Result<Vec<u8>> {
        let layout = Self::layout(self.variant)?;
        let mut writer = NativeWriter::new(&layout);
        writer
            .u32("mechanism", self.mechanism)?
            .pointer("pParameter", memory::address_or_null(&self.parameter))?
            .ulong("ulParameterLen", self.parameter_len)?;
        Ok(writer.finish()?)
    }

    /// Free the parameter buffer and zero the length. Idempotent.
    pub fn release(&mut self) {
        memory::free_slot(&mut self.parameter);
        self.parameter_len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::thread_stats;

    #[test]
    fn null_parameter_record() {
        for variant in Variant::ALL {
            let before = thread_stats();
            let record = NativeMechanismRecord::build(variant, 0x0000_0001, None).unwrap();
            assert!(record.parameter_ptr().is_null());
            assert_eq!(record.parameter_len(), 0);
            assert_eq!(record.parameter_bytes().unwrap(), None);
            assert_eq!(thread_stats().since(before).allocations, 0);

            let bytes = record.to_native_bytes().unwrap();
            let layout = NativeMechanismRecord::layout(variant).unwrap();
            assert_eq!(bytes.len(), layout.size);
            assert_eq!(&bytes[0..4], &1u32.to_ne_bytes());
            assert!(bytes[4..].iter().all(|b| *b == 0), "{variant}");
        }
    }

    #[test]
    fn record_sizes_per_variant() {
        let sizes: Vec<usize> = Variant::ALL
            .iter()
            .map(|v| NativeMechanismRecord::layout(*v).unwrap().size)
            .collect();
        assert_eq!(sizes, vec![12, 12, 24, 20]);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn parameter_pointer_and_length_on_eight_byte_variants() {
        for (variant, ptr_at, len_at) in [(Variant::V80, 8, 16), (Variant::V81, 4, 12)] {
            let record = NativeMechanismRecord::build(variant, 0x1082, Some(&[7u8; 16][..])).unwrap();
            let bytes = record.to_native_bytes().unwrap();
            let ptr = u64::from_ne_bytes(bytes[ptr_at..ptr_at + 8].try_into().unwrap());
            let len = u64::from_ne_bytes(bytes[len_at..len_at + 8].try_into().unwrap());
            assert_eq!(ptr as usize, record.parameter_ptr() as usize);
            assert_ne!(ptr, 0);
            assert_eq!(len, 16);
            assert_eq!(record.parameter_bytes().unwrap(), Some(vec![7; 16]));
        }
    }

    #[test]
    fn release_frees_exactly_once() {
        let before = thread_stats();
        let mut record = NativeMechanismRecord::build(Variant::V80, 1, Some(&[1u8, 2, 3][..])).unwrap();
        record.release();
        record.release();
        drop(record);
        let delta = thread_stats().since(before);
        assert_eq!(delta.allocations, 1);
        assert_eq!(delta.frees, 1);
    }

    #[test]
    fn released_record_has_zero_length() {
        let mut record = NativeMechanismRecord::build(Variant::V81, 1, Some(&[1u8][..])).unwrap();
        record.release();
        assert_eq!(record.parameter_len(), 0);
        assert!(!record.has_parameter());
        assert!(record.parameter_ptr().is_null());
    }
}
