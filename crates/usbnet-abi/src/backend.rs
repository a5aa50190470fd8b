// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! The seam where the wrapped (out-of-scope) USB library plugs in.
//!
//! `usbnet-server` dispatches each decoded opcode to one [`UsbBackend`]
//! method; it never touches the real library directly. A production build
//! wires in an adapter over the host's libusb-0.1; tests and the
//! standalone examples use [`crate::mock::MockBackend`].

use crate::descriptors::BusInfo;

/// One method per opcode in the RPC catalog. Every signature returns the
/// library's own status convention (`0` or a positive count for success,
/// a negative `errno`-style code for failure) rather than a `Result`,
/// since that status is itself part of the reply payload the client stub
/// expects to unmarshal — it is data, not a local error.
pub trait UsbBackend {
    /// `usb_init`: one-time library setup. Idempotent.
    fn init(&mut self);

    /// `usb_find_busses`: (re)scan for busses, return how many changed.
    fn find_busses(&mut self) -> i32;

    /// `usb_find_devices`: (re)scan for devices on every known bus,
    /// returning the changed-device count and the full current topology.
    fn find_devices(&mut self) -> (i32, Vec<BusInfo>);

    /// `usb_open`: open a device by its bus location and device number.
    /// On success, returns the native handle (file descriptor) the rest
    /// of the calls below key on; on failure, a negative status.
    fn open(&mut self, bus_location: u32, devnum: u32) -> i32;

    /// `usb_close`: close a previously opened handle.
    fn close(&mut self, handle: i32) -> i32;

    /// `usb_control_msg`. `buf` is the outbound payload for host-to-device
    /// transfers; the return carries the status and, for device-to-host
    /// transfers, the bytes actually read.
    fn control_msg(
        &mut self,
        handle: i32,
        request_type: i32,
        request: i32,
        value: i32,
        index: i32,
        buf: &[u8],
        timeout_ms: i32,
    ) -> (i32, Vec<u8>);

    /// `usb_claim_interface`.
    fn claim_interface(&mut self, handle: i32, interface: i32) -> i32;

    /// `usb_release_interface`.
    fn release_interface(&mut self, handle: i32, interface: i32) -> i32;

    /// `usb_get_driver_np`: query the kernel driver name bound to an
    /// interface, if any.
    fn get_kernel_driver(&mut self, handle: i32, interface: i32, buf_len: u32) -> (i32, Vec<u8>);

    /// `usb_detach_kernel_driver_np`.
    fn detach_kernel_driver(&mut self, handle: i32, interface: i32) -> i32;

    /// `usb_bulk_read`.
    fn bulk_read(&mut self, handle: i32, endpoint: i32, size: i32, timeout_ms: i32) -> (i32, Vec<u8>);

    /// `usb_bulk_write`.
    fn bulk_write(&mut self, handle: i32, endpoint: i32, data: &[u8], timeout_ms: i32) -> i32;

    /// `usb_set_configuration`.
    fn set_configuration(&mut self, handle: i32, configuration: i32) -> i32;

    /// `usb_set_altinterface`.
    fn set_alt_interface(&mut self, handle: i32, alternate: i32) -> i32;

    /// `usb_resetep`.
    fn reset_ep(&mut self, handle: i32, endpoint: u32) -> i32;

    /// `usb_clear_halt`.
    fn clear_halt(&mut self, handle: i32, endpoint: u32) -> i32;

    /// `usb_reset`.
    fn reset(&mut self, handle: i32) -> i32;

    /// `usb_interrupt_read`.
    fn interrupt_read(&mut self, handle: i32, endpoint: i32, size: i32, timeout_ms: i32) -> (i32, Vec<u8>);

    /// `usb_interrupt_write`.
    fn interrupt_write(&mut self, handle: i32, endpoint: i32, data: &[u8], timeout_ms: i32) -> i32;
}
