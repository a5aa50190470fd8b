// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Parsing side of the framed message (C2): a cursor over a packet's
//! payload or a container item's value bytes.

use crate::error::WireError;
use crate::integer::unpack_integer;
use crate::length::unpack_length;
use crate::tag::Tag;

/// A cursor over a TLV sequence.
///
/// At any moment either the cursor points at a valid TLV item (after a
/// successful `advance`) or it is at `end`, signifying the end of the
/// sequence. `enter()` descends into the current item's value bytes,
/// producing an independent cursor bounded by that container's declared
/// length.
#[derive(Debug, Clone)]
pub struct Iter<'a> {
    buf: &'a [u8],
    /// Offset of the next item header to parse.
    next: usize,
    /// End of this cursor's range (exclusive).
    end: usize,
    /// The item `advance` most recently landed on, if any.
    current: Option<Current>,
}

#[derive(Debug, Copy, Clone)]
struct Current {
    tag: Tag,
    value_start: usize,
    value_len: usize,
}

impl<'a> Iter<'a> {
    pub fn new(buf: &'a [u8]) -> Iter<'a> {
        Iter {
            buf,
            next: 0,
            end: buf.len(),
            current: None,
        }
    }

    fn bounded(buf: &'a [u8], start: usize, end: usize) -> Iter<'a> {
        Iter {
            buf,
            next: start,
            end,
            current: None,
        }
    }

    /// Move to the next sibling item. On success the current item's tag,
    /// length and value slice become available. Returns `Ok(false)` at the
    /// end of the sequence.
    pub fn advance(&mut self) -> Result<bool, WireError> {
        if self.next >= self.end {
            self.current = None;
            return Ok(false);
        }
        let tag_byte = *self.buf.get(self.next).ok_or(WireError::Truncated)?;
        let tag = Tag::from_byte(tag_byte);
        let len_start = self.next + 1;
        let len_bytes = self.buf.get(len_start..self.end).ok_or(WireError::Truncated)?;
        let (value_len, consumed) = unpack_length(len_bytes)?;
        let value_start = len_start + consumed;
        let value_end = value_start
            .checked_add(value_len as usize)
            .ok_or(WireError::EncodingLimit)?;
        if value_end > self.end || value_end > self.buf.len() {
            return Err(WireError::Truncated);
        }
        self.current = Some(Current {
            tag,
            value_start,
            value_len: value_len as usize,
        });
        self.next = value_end;
        Ok(true)
    }

    /// The current item's tag. Only meaningful after `advance` returned
    /// `Ok(true)`; returns `Tag::Invalid` otherwise.
    pub fn tag(&self) -> Tag {
        self.current.map(|c| c.tag).unwrap_or(Tag::Invalid)
    }

    /// The current item's raw value length.
    pub fn len(&self) -> usize {
        self.current.map(|c| c.value_len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The current item's raw value bytes.
    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        let c = self.current?;
        self.buf.get(c.value_start..c.value_start + c.value_len)
    }

    /// Interpret the current item's value as a fixed-width integer, using
    /// its declared length as the width (1, 2 or 4 bytes).
    pub fn as_int(&self, signed: bool) -> Result<i64, WireError> {
        let bytes = self.as_bytes().ok_or(WireError::Truncated)?;
        let width = u8::try_from(bytes.len()).map_err(|_| WireError::EncodingLimit)?;
        unpack_integer(bytes, width, signed)
    }

    /// Convenience for unsigned values.
    pub fn as_uint(&self) -> Result<i64, WireError> {
        self.as_int(false)
    }

    /// Interpret the current item's value as a NUL-terminated UTF-8
    /// string, returning the bytes up to (not including) the first NUL, or
    /// the full value if there is none.
    pub fn as_str(&self) -> Result<&'a str, WireError> {
        let bytes = self.as_bytes().ok_or(WireError::Truncated)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        std::str::from_utf8(&bytes[..end]).map_err(|_| WireError::MalformedLength)
    }

    /// Descend into the current item's value bytes. Only meaningful for a
    /// container tag (`Sequence`/`Set`/`Structure`); on a non-container
    /// item the returned cursor is empty.
    pub fn enter(&self) -> Iter<'a> {
        match self.current {
            Some(c) if c.tag.is_container() => {
                Iter::bounded(self.buf, c.value_start, c.value_start + c.value_len)
            }
            _ => Iter::bounded(self.buf, 0, 0),
        }
    }

    /// Whether this cursor has been exhausted (either never had anything,
    /// or `advance` has returned `Ok(false)`).
    pub fn at_end(&self) -> bool {
        self.next >= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;

    #[test]
    fn empty_payload_advances_to_end_immediately() {
        let mut it = Iter::new(&[]);
        assert_eq!(it.advance(), Ok(false));
    }

    #[test]
    fn entering_a_non_container_yields_empty_range() {
        let mut pkt = Packet::new(1);
        pkt.append_integer(Tag::Integer, 1, 5).unwrap();
        let mut it = pkt.iter();
        assert!(it.advance().unwrap());
        let mut inner = it.enter();
        assert_eq!(inner.advance(), Ok(false));
    }

    #[test]
    fn truncated_length_field_is_an_error() {
        // Tag byte present, but the long-form length's trailing bytes are
        // missing.
        let buf = [Tag::Octets.as_byte(), 0x82, 0x00];
        let mut it = Iter::new(&buf);
        assert_eq!(it.advance(), Err(WireError::Truncated));
    }

    #[test]
    fn declared_length_exceeding_buffer_is_truncated() {
        let buf = [Tag::Octets.as_byte(), 10, 1, 2, 3];
        let mut it = Iter::new(&buf);
        assert_eq!(it.advance(), Err(WireError::Truncated));
    }

    #[test]
    fn walking_every_leaf_with_enter_and_advance_visits_each_once() {
        // Build: Structure { Integer, Sequence { Integer, Integer } }
        let mut pkt = Packet::new(1);
        let s = pkt.begin_container(Tag::Structure);
        pkt.append_integer(Tag::Integer, 1, 1).unwrap();
        let seq = pkt.begin_container(Tag::Sequence);
        pkt.append_integer(Tag::Integer, 1, 2).unwrap();
        pkt.append_integer(Tag::Integer, 1, 3).unwrap();
        pkt.finalize_container(seq).unwrap();
        pkt.finalize_container(s).unwrap();

        fn visit(it: &mut Iter, leaves: &mut Vec<i64>) {
            while it.advance().unwrap() {
                if it.tag().is_container() {
                    let mut child = it.enter();
                    visit(&mut child, leaves);
                } else {
                    leaves.push(it.as_int(false).unwrap());
                }
            }
        }

        let mut leaves = Vec::new();
        let mut top = pkt.iter();
        visit(&mut top, &mut leaves);
        assert_eq!(leaves, vec![1, 2, 3]);
    }
}
