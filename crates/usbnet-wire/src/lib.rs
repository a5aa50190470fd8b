// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Self-describing, length-prefixed TLV wire format for the usbnet RPC
//! substrate.
//!
//! This crate is the bottom of the stack: [`error`], [`length`] and
//! [`integer`] make up the codec (C1); [`packet`] and [`iter`] make up the
//! framed message (C2). Neither layer touches a socket — see
//! `usbnet-transport` for that.
//!
//! # Examples
//! ```
//! use usbnet_wire::{opcode::Opcode, packet::Packet, tag::Tag};
//!
//! let mut pkt = Packet::new(Opcode::FindBusses.as_byte());
//! pkt.append_integer(Tag::Integer, 4, 0).unwrap();
//!
//! let mut it = pkt.iter();
//! assert!(it.advance().unwrap());
//! assert_eq!(it.as_int(true).unwrap(), 0);
//! ```

pub mod error;
pub mod integer;
pub mod iter;
pub mod length;
pub mod opcode;
pub mod packet;
pub mod tag;

pub use error::WireError;
pub use iter::Iter;
pub use opcode::Opcode;
pub use packet::{ContainerHandle, Packet};
pub use tag::Tag;
