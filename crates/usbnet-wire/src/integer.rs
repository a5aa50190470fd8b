// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Fixed-width integer encoding used for TLV numeric values.

use byteorder::{BigEndian, ByteOrder};

use crate::error::WireError;

/// Encode `value` in `width` bytes (1, 2 or 4). Width 1 stores the low byte;
/// widths 2 and 4 store big-endian.
pub fn pack_integer(value: i64, width: u8) -> Result<Vec<u8>, WireError> {
    match width {
        1 => Ok(vec![value as u8]),
        2 => {
            let mut out = vec![0u8; 2];
            BigEndian::write_u16(&mut out, value as u16);
            Ok(out)
        }
        4 => {
            let mut out = vec![0u8; 4];
            BigEndian::write_u32(&mut out, value as u32);
            Ok(out)
        }
        _ => Err(WireError::EncodingLimit),
    }
}

/// Decode an integer of `width` bytes from the front of `bytes`, optionally
/// sign-extending.
pub fn unpack_integer(bytes: &[u8], width: u8, signed: bool) -> Result<i64, WireError> {
    let slice = bytes.get(..width as usize).ok_or(WireError::Truncated)?;
    Ok(match (width, signed) {
        (1, false) => slice[0] as i64,
        (1, true) => slice[0] as i8 as i64,
        (2, false) => BigEndian::read_u16(slice) as i64,
        (2, true) => BigEndian::read_u16(slice) as i16 as i64,
        (4, false) => BigEndian::read_u32(slice) as i64,
        (4, true) => BigEndian::read_u32(slice) as i32 as i64,
        _ => return Err(WireError::EncodingLimit),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_round_trip_all_widths() {
        for &width in &[1u8, 2, 4] {
            let max = match width {
                1 => 0xFFi64,
                2 => 0xFFFF,
                _ => 0xFFFF_FFFF,
            };
            for v in [0i64, 1, max / 2, max] {
                let packed = pack_integer(v, width).unwrap();
                assert_eq!(packed.len(), width as usize);
                assert_eq!(unpack_integer(&packed, width, false).unwrap(), v);
            }
        }
    }

    #[test]
    fn signed_sign_extends() {
        let packed = pack_integer(-1, 2).unwrap();
        assert_eq!(unpack_integer(&packed, 2, true).unwrap(), -1);
        assert_eq!(unpack_integer(&packed, 2, false).unwrap(), 0xFFFF);
    }

    #[test]
    fn other_widths_are_encoding_limit() {
        assert_eq!(pack_integer(1, 3).unwrap_err(), WireError::EncodingLimit);
        assert_eq!(
            unpack_integer(&[0, 0, 0], 3, false).unwrap_err(),
            WireError::EncodingLimit
        );
    }

    #[test]
    fn short_input_is_truncated() {
        assert_eq!(unpack_integer(&[0], 2, false).unwrap_err(), WireError::Truncated);
    }
}
