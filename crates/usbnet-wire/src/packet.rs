// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Construction side of the framed message (C2): a typed buffer with an
//! opcode and a payload of TLV items.

use crate::error::WireError;
use crate::integer::pack_integer;
use crate::iter::Iter;
use crate::length::pack_length;
use crate::tag::Tag;

/// Opaque handle to a container header reserved by `begin_container`.
///
/// Holds the payload offset of the header's length field so
/// `finalize_container` can back-patch it once the container's children
/// have been appended. Containers nest: callers are expected to finalize in
/// LIFO order, but `Packet` does not enforce this itself — it only needs the
/// offset, not a stack.
#[derive(Debug, Copy, Clone)]
pub struct ContainerHandle {
    tag_offset: usize,
}

/// A frame under construction: an opcode plus a growable, always
/// well-formed TLV payload.
#[derive(Debug, Clone)]
pub struct Packet {
    opcode: u8,
    payload: Vec<u8>,
}

impl Packet {
    pub fn new(opcode: u8) -> Packet {
        Packet {
            opcode,
            payload: Vec::new(),
        }
    }

    /// Reset this packet to an empty payload under a new opcode, without
    /// releasing its backing allocation. Used by the client stub's shared
    /// frame to avoid reallocating on every call.
    pub fn reset(&mut self, opcode: u8) {
        self.opcode = opcode;
        self.payload.clear();
    }

    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Append one leaf TLV item: `tag`, a packed length, then `bytes`.
    pub fn append_tlv(&mut self, tag: Tag, bytes: &[u8]) -> Result<(), WireError> {
        let len = u32::try_from(bytes.len()).map_err(|_| WireError::EncodingLimit)?;
        self.payload.push(tag.as_byte());
        self.payload.extend_from_slice(&pack_length(len)?);
        self.payload.extend_from_slice(bytes);
        Ok(())
    }

    /// Append a fixed-width integer, tagged `tag`.
    pub fn append_integer(&mut self, tag: Tag, width: u8, value: i64) -> Result<(), WireError> {
        let bytes = pack_integer(value, width)?;
        self.append_tlv(tag, &bytes)
    }

    /// Append the UTF-8 bytes of `s` plus a terminating NUL, tagged
    /// `Tag::Octets`.
    pub fn append_string(&mut self, s: &str) -> Result<(), WireError> {
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        self.append_tlv(Tag::Octets, &bytes)
    }

    /// Reserve a container header whose length will be back-patched by
    /// `finalize_container`. Containers may nest: each `begin_container`
    /// call returns an independent handle.
    pub fn begin_container(&mut self, tag: Tag) -> ContainerHandle {
        let tag_offset = self.payload.len();
        self.payload.push(tag.as_byte());
        // Reserve the maximal (5-byte) long-form length field; finalize
        // will shrink it down to the form the actual size needs.
        self.payload.extend_from_slice(&[0u8; 5]);
        ContainerHandle { tag_offset }
    }

    /// Back-patch the length field reserved by `begin_container` now that
    /// every child has been appended.
    pub fn finalize_container(&mut self, handle: ContainerHandle) -> Result<(), WireError> {
        let header_end = handle.tag_offset + 1 + 5;
        let body_len = u32::try_from(self.payload.len() - header_end)
            .map_err(|_| WireError::EncodingLimit)?;
        let packed = pack_length(body_len)?;
        // Splice the real (possibly shorter) length field in over the
        // reserved 5-byte placeholder.
        let tail: Vec<u8> = self.payload.split_off(header_end);
        self.payload.truncate(handle.tag_offset + 1);
        self.payload.extend_from_slice(&packed);
        self.payload.extend_from_slice(&tail);
        Ok(())
    }

    /// A cursor over this packet's top-level payload items.
    pub fn iter(&self) -> Iter<'_> {
        Iter::new(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_items_round_trip() {
        let mut pkt = Packet::new(0x42);
        pkt.append_integer(Tag::Integer, 4, -7).unwrap();
        pkt.append_string("001").unwrap();

        let mut it = pkt.iter();
        assert!(it.advance().unwrap());
        assert_eq!(it.tag(), Tag::Integer);
        assert_eq!(it.as_int(true).unwrap(), -7);

        assert!(it.advance().unwrap());
        assert_eq!(it.tag(), Tag::Octets);
        assert_eq!(it.as_str().unwrap(), "001");

        assert!(!it.advance().unwrap());
    }

    #[test]
    fn nested_containers_finalize_with_exact_lengths() {
        let mut pkt = Packet::new(0x42);
        let bus = pkt.begin_container(Tag::Structure);
        pkt.append_string("001").unwrap();
        let dev = pkt.begin_container(Tag::Sequence);
        pkt.append_string("001").unwrap();
        pkt.append_integer(Tag::UnsignedInt, 1, 2).unwrap();
        pkt.finalize_container(dev).unwrap();
        pkt.finalize_container(bus).unwrap();

        let mut it = pkt.iter();
        assert!(it.advance().unwrap());
        assert_eq!(it.tag(), Tag::Structure);
        let mut outer = it.enter();
        assert!(outer.advance().unwrap());
        assert_eq!(outer.as_str().unwrap(), "001");
        assert!(outer.advance().unwrap());
        assert_eq!(outer.tag(), Tag::Sequence);
        let mut inner = outer.enter();
        assert!(inner.advance().unwrap());
        assert_eq!(inner.as_str().unwrap(), "001");
        assert!(inner.advance().unwrap());
        assert_eq!(inner.as_uint().unwrap(), 2);
        assert!(!inner.advance().unwrap());
        assert!(!outer.advance().unwrap());
    }

    #[test]
    fn reset_clears_payload_but_keeps_capacity() {
        let mut pkt = Packet::new(1);
        pkt.append_integer(Tag::Integer, 4, 99).unwrap();
        let cap_before = pkt.payload.capacity();
        pkt.reset(2);
        assert!(pkt.is_empty());
        assert_eq!(pkt.opcode(), 2);
        assert_eq!(pkt.payload.capacity(), cap_before);
    }

    #[test]
    fn oversized_item_rejected() {
        let mut pkt = Packet::new(1);
        assert_eq!(pkt.append_integer(Tag::Integer, 9, 0).unwrap_err(), WireError::EncodingLimit);
    }
}
