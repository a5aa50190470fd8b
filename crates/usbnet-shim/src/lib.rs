// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Client stub runtime (C5): the preloaded shim that stands in for the
//! wrapped USB library inside a host process.
//!
//! [`stub::Stub`] owns the marshal/send/recv/unmarshal cycle and the
//! process-wide call serialisation; [`arena::BusArena`] is the safe,
//! position-reconciled virtual bus tree it maintains across `FindDevices`
//! calls. [`cstruct`] and [`ffi`] sit above both: they are the only parts of
//! this crate that know about the wrapped library's C layout, synthesising
//! a fresh `repr(C)` pointer tree from the arena on every `usb_get_busses()`
//! call rather than ever handing out a pointer into the arena itself.

pub mod arena;
pub mod cstruct;
pub mod error;
pub mod ffi;
pub mod stub;

pub use arena::BusArena;
pub use error::ShimError;
pub use stub::Stub;
