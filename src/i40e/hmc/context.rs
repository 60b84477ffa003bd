//! Bit-field codec between plain structs and the packed contexts hardware reads.
//!
//! A context is described by a table of [`ContextField`] rows, one per struct field.
//! [`write`] places one field at an arbitrary bit offset of the destination; [`read`] is
//! its inverse. Bits outside the field are never touched.

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::{Error, Result};

/// Where a struct field lives, and where its bits go in the packed context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextField {
    pub name: &'static str,
    /// Byte offset of the field in the struct.
    pub offset: usize,
    /// Byte size of the field in the struct: 1, 2, 4 or 8.
    pub size: usize,
    /// Bits of the field that are kept, at most 64.
    pub width: u32,
    /// First bit of the field in the packed context.
    pub lsb: u32,
}

/// Builds a [`ContextField`] for `$field` of struct `$ty`, checking at compile time that
/// the field has type `$fty`.
macro_rules! context_field {
    ($ty:ty, $field:ident: $fty:ty, $width:expr, $lsb:expr) => {{
        let _check: fn(&$ty) -> $fty = |c| c.$field;
        $crate::i40e::hmc::context::ContextField {
            name: stringify!($field),
            offset: ::core::mem::offset_of!($ty, $field),
            size: ::core::mem::size_of::<$fty>(),
            width: $width,
            lsb: $lsb,
        }
    }};
}
pub(crate) use context_field;

impl ContextField {
    fn check(&self, context_len: usize, struct_len: usize) -> Result<()> {
        if !matches!(self.size, 1 | 2 | 4 | 8) {
            return Err(Error::OutOfRange { what: "context field size", index: self.size, limit: 8 });
        }
        if self.width == 0 || self.width as usize > self.size * 8 {
            return Err(Error::OutOfRange { what: "context field width", index: self.width as usize, limit: self.size * 8 });
        }
        if self.offset + self.size > struct_len {
            return Err(Error::OutOfRange { what: "context field offset", index: self.offset + self.size, limit: struct_len });
        }
        let end = self.lsb as usize + self.width as usize;
        if end > context_len * 8 {
            return Err(Error::OutOfRange { what: "context bit", index: end, limit: context_len * 8 });
        }
        Ok(())
    }

    fn mask(&self) -> u64 {
        u64::MAX >> (64 - self.width)
    }

    // Bytes of context the field touches, starting at lsb / 8
    fn span(&self) -> usize {
        ((self.lsb % 8 + self.width) as usize).div_ceil(8)
    }
}

// Fields are native-endian integers; the packed context is always little-endian.
fn load(bytes: &[u8]) -> u64 {
    match bytes.len() {
        1 => bytes[0] as u64,
        2 => u16::from_ne_bytes([bytes[0], bytes[1]]) as u64,
        4 => u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64,
        _ => u64::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]]),
    }
}

fn store(bytes: &mut [u8], value: u64) {
    match bytes.len() {
        1 => bytes[0] = value as u8,
        2 => bytes.copy_from_slice(&(value as u16).to_ne_bytes()),
        4 => bytes.copy_from_slice(&(value as u32).to_ne_bytes()),
        _ => bytes.copy_from_slice(&value.to_ne_bytes()),
    }
}

/// Packs one field of `src` (the struct's bytes) into `dest` (the context).
pub fn write(dest: &mut [u8], field: &ContextField, src: &[u8]) -> Result<()> {
    field.check(dest.len(), src.len())?;

    let shift = field.lsb % 8;
    let first = (field.lsb / 8) as usize;
    let value = load(&src[field.offset..field.offset + field.size]) & field.mask();

    let mut carry = 0u8;
    let mut carry_mask = 0u8;
    for i in 0..(field.width as usize).div_ceil(8) {
        let byte = (value >> (8 * i)) as u8;
        let mask = (field.mask() >> (8 * i)) as u8;
        let d = dest[first + i];
        dest[first + i] = (d & !((mask << shift) | carry_mask)) | (byte << shift) | carry;
        // What shifted out of this byte lands at the bottom of the next one
        carry = byte.checked_shr(8 - shift).unwrap_or(0);
        carry_mask = mask.checked_shr(8 - shift).unwrap_or(0);
    }
    if carry_mask != 0 {
        let last = first + (field.width as usize).div_ceil(8);
        dest[last] = (dest[last] & !carry_mask) | carry;
    }
    Ok(())
}

/// Unpacks one field of `src` (the context) into `dest` (the struct's bytes),
/// zero-extended to the field's size.
pub fn read(src: &[u8], field: &ContextField, dest: &mut [u8]) -> Result<()> {
    field.check(src.len(), dest.len())?;

    let first = (field.lsb / 8) as usize;
    let window = src[first..first + field.span()].iter().rev().fold(0u128, |acc, b| (acc << 8) | *b as u128);
    let value = (window >> (field.lsb % 8)) as u64 & field.mask();
    store(&mut dest[field.offset..field.offset + field.size], value);
    Ok(())
}

/// Zeroes `dest`, then packs every field of `context` into it.
pub fn pack<T: AsBytes>(dest: &mut [u8], context: &T, table: &[ContextField]) -> Result<()> {
    dest.fill(0);
    for field in table {
        write(dest, field, context.as_bytes())?;
    }
    Ok(())
}

pub fn unpack<T: AsBytes + FromBytes + FromZeroes>(src: &[u8], table: &[ContextField]) -> Result<T> {
    let mut context = T::new_zeroed();
    for field in table {
        read(src, field, context.as_bytes_mut())?;
    }
    Ok(context)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(size: usize, width: u32, lsb: u32) -> ContextField {
        ContextField { name: "test", offset: 0, size, width, lsb }
    }

    #[test]
    fn unaligned_field_spans_bytes() {
        let mut dest = [0u8; 4];
        let src = 0x1FFFu16.to_ne_bytes();
        write(&mut dest, &field(2, 13, 5), &src).unwrap();
        // 13 ones starting at bit 5
        assert_eq!(u32::from_le_bytes(dest), 0x1FFF << 5);
    }

    #[test]
    fn neighbours_survive() {
        let mut dest = [0xFFu8; 3];
        let src = 0u16.to_ne_bytes();
        write(&mut dest, &field(2, 10, 3), &src).unwrap();
        assert_eq!(dest, [0b0000_0111, 0b1110_0000, 0xFF]);
    }

    #[test]
    fn wide_value_is_truncated_to_width() {
        let mut dest = [0u8; 2];
        let src = [0xFFu8];
        write(&mut dest, &field(1, 3, 6), &src).unwrap();
        assert_eq!(dest, [0b1100_0000, 0b0000_0001]);

        let mut back = [0u8];
        read(&dest, &field(1, 3, 6), &mut back).unwrap();
        assert_eq!(back, [0b111]);
    }

    #[test]
    fn full_width_u64() {
        let mut dest = [0u8; 9];
        let src = 0x8123_4567_89AB_CDEFu64.to_ne_bytes();
        write(&mut dest, &field(8, 64, 4), &src).unwrap();
        assert_eq!(dest[0], 0xF0);
        assert_eq!(dest[8], 0x08);

        let mut back = [0u8; 8];
        read(&dest, &field(8, 64, 4), &mut back).unwrap();
        assert_eq!(u64::from_ne_bytes(back), 0x8123_4567_89AB_CDEF);
    }

    #[test]
    fn rejects_bad_rows() {
        let mut dest = [0u8; 2];
        assert!(matches!(write(&mut dest, &field(2, 17, 0), &[0; 2]), Err(Error::OutOfRange { .. })));
        assert!(matches!(write(&mut dest, &field(2, 0, 0), &[0; 2]), Err(Error::OutOfRange { .. })));
        assert!(matches!(write(&mut dest, &field(3, 8, 0), &[0; 3]), Err(Error::OutOfRange { .. })));
        assert!(matches!(write(&mut dest, &field(2, 9, 8), &[0; 2]), Err(Error::OutOfRange { .. })));
        assert!(matches!(write(&mut dest, &field(4, 8, 0), &[0; 2]), Err(Error::OutOfRange { .. })));
    }
}
