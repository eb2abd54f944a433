//! Packed column: a compressed buffer with its code width and length.

use crate::compression::bitpacking::{min_code_width, pack, BitPackable, CodeWidth, CompressedBuf};
use crate::compression::scalar::CodeIter;
use crate::error::{Error, Result};

/// Immutable bit-packed column of small unsigned integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedColumn {
    buf: CompressedBuf,
    width: CodeWidth,
    len: usize,
}

impl PackedColumn {
    /// Pack values with given code width.
    /// Returns error if any value does not fit in the width.
    #[inline]
    pub fn new<T: BitPackable>(values: &[T], width: CodeWidth) -> Result<Self> {
        let mask = width.value_mask() as u64;
        if values.iter().any(|v| v.to_code() > mask) {
            return Err(Error::InvalidArgument);
        }
        Ok(PackedColumn {
            buf: pack(values, width),
            width,
            len: values.len(),
        })
    }

    /// Pack values with the smallest width that holds all of them.
    /// Empty input is packed with width 1.
    #[inline]
    pub fn pack_auto<T: BitPackable>(values: &[T]) -> Result<Self> {
        let width = if values.is_empty() {
            CodeWidth::new(CodeWidth::MIN)?
        } else {
            min_code_width(values).ok_or(Error::InvalidArgument)?
        };
        Self::new(values, width)
    }

    #[inline]
    pub fn buf(&self) -> &CompressedBuf {
        &self.buf
    }

    #[inline]
    pub fn width(&self) -> CodeWidth {
        self.width
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate values with the scalar bit cursor.
    #[inline]
    pub fn iter(&self) -> CodeIter<'_> {
        CodeIter::new(self.buf.words(), self.width, self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_column() {
        let values: Vec<u16> = (1..=509).collect();
        let col = PackedColumn::pack_auto(&values).unwrap();
        assert_eq!(col.width().bits(), 9);
        assert_eq!(col.len(), 509);
        assert!(col.iter().map(|v| v as u16).eq(values.iter().copied()));

        let col = PackedColumn::pack_auto::<u8>(&[]).unwrap();
        assert!(col.is_empty());
        assert_eq!(col.iter().count(), 0);
    }

    #[test]
    fn test_packed_column_value_too_large() {
        let width = CodeWidth::new(4).unwrap();
        assert!(PackedColumn::new(&[1u8, 15], width).is_ok());
        assert!(matches!(
            PackedColumn::new(&[1u8, 16], width),
            Err(Error::InvalidArgument)
        ));
        assert!(PackedColumn::pack_auto(&[70000u32]).is_err());
    }
}
