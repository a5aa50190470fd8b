// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Descriptor ABI and backend seam shared by `usbnet-server` and
//! `usbnet-shim`.
//!
//! This crate owns the one piece of the system that is "taken as given":
//! the shape of the wrapped USB library's descriptor structs and the
//! calls it exposes. Nothing here talks to the network; `usbnet-server`
//! decodes wire opcodes into [`UsbBackend`] calls, and `usbnet-shim`
//! re-synthesizes these same structs into the pointer tree the host C
//! code expects from `usb_get_busses()`.

pub mod backend;
pub mod descriptors;
pub mod mock;

pub use backend::UsbBackend;
pub use descriptors::{
    AltSetting, BusInfo, ConfigDescriptor, ConfigInfo, DeviceDescriptor, DeviceInfo,
    EndpointDescriptor, InterfaceDescriptor,
};
pub use mock::MockBackend;
