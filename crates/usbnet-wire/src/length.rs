// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! The variable-length size field shared by frames and TLV items.

use byteorder::{BigEndian, ByteOrder};

use crate::error::WireError;

const SHORT_MAX: u32 = 0x80;
const LONG16: u8 = 0x82;
const LONG32: u8 = 0x84;

/// Encode `v` as a variable-length size field.
///
/// `v <= 0x80` encodes as a single byte equal to `v`. Otherwise a leading
/// byte `0x80 + N` (`N` in `{2, 4}`) is followed by `N` big-endian bytes.
pub fn pack_length(v: u32) -> Result<Vec<u8>, WireError> {
    if v <= SHORT_MAX {
        return Ok(vec![v as u8]);
    }
    if v <= 0xFFFF {
        let mut out = vec![LONG16, 0, 0];
        BigEndian::write_u16(&mut out[1..], v as u16);
        return Ok(out);
    }
    let mut out = vec![LONG32, 0, 0, 0, 0];
    BigEndian::write_u32(&mut out[1..], v);
    Ok(out)
}

/// Decode a variable-length size field from the front of `bytes`.
///
/// Returns the decoded value and the number of bytes consumed.
pub fn unpack_length(bytes: &[u8]) -> Result<(u32, usize), WireError> {
    let lead = *bytes.first().ok_or(WireError::Truncated)?;
    if lead as u32 <= SHORT_MAX {
        return Ok((lead as u32, 1));
    }
    match lead {
        LONG16 => {
            let rest = bytes.get(1..3).ok_or(WireError::Truncated)?;
            Ok((BigEndian::read_u16(rest) as u32, 3))
        }
        LONG32 => {
            let rest = bytes.get(1..5).ok_or(WireError::Truncated)?;
            Ok((BigEndian::read_u32(rest), 5))
        }
        _ => Err(WireError::MalformedLength),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_form_boundary() {
        assert_eq!(pack_length(0x80).unwrap(), vec![0x80]);
    }

    #[test]
    fn long16_just_above_boundary() {
        assert_eq!(pack_length(0x81).unwrap(), vec![0x82, 0x00, 0x81]);
    }

    #[test]
    fn long32_boundary() {
        assert_eq!(
            pack_length(0x10000).unwrap(),
            vec![0x84, 0x00, 0x01, 0x00, 0x00]
        );
    }

    #[test]
    fn leading_byte_strictly_between_short_and_long16_is_malformed() {
        let err = unpack_length(&[0x81, 0xFF, 0xFF]).unwrap_err();
        assert_eq!(err, WireError::MalformedLength);
    }

    #[test]
    fn round_trip_over_full_u32_range_samples() {
        for v in [0u32, 1, 0x7F, 0x80, 0x81, 0xFF, 0x100, 0xFFFF, 0x10000, 0xFFFF_FFFF] {
            let packed = pack_length(v).unwrap();
            let (decoded, consumed) = unpack_length(&packed).unwrap();
            assert_eq!(decoded, v);
            assert_eq!(consumed, packed.len());
        }
    }

    #[test]
    fn truncated_input_fails_cleanly() {
        assert_eq!(unpack_length(&[]).unwrap_err(), WireError::Truncated);
        assert_eq!(unpack_length(&[0x84, 0, 0]).unwrap_err(), WireError::Truncated);
    }
}
