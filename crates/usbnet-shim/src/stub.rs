// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! The client stub runtime (C5): marshal, send, receive, unmarshal — one
//! call at a time, serialised across every caller thread by a single
//! process-wide mutex (spec §4.5, §5).

use std::io::{Read, Write};
use std::os::unix::io::RawFd;
use std::sync::Mutex;

use tracing::error;
use usbnet_handoff::HandoffError;
use usbnet_transport::{recv_frame, send_frame};
use usbnet_wire::opcode::Opcode;
use usbnet_wire::tag::Tag;
use usbnet_wire::{Iter, Packet, WireError};

use crate::arena::BusArena;
use crate::error::ShimError;

struct Inner<S> {
    stream: S,
    /// The shared, reusable frame buffer (spec §4.5 item 2): claimed and
    /// reset at the start of every call rather than allocated fresh.
    frame: Packet,
    tree: BusArena,
}

/// One call's worth of marshalling state, serialised by [`Stub`]'s mutex.
///
/// Generic over any `Read + Write` byte stream so it is testable without a
/// real TCP socket (a `UnixStream` pair, or the transport crate's own
/// `Cursor`-based tests, suffice).
pub struct Stub<S> {
    inner: Mutex<Inner<S>>,
    /// The raw descriptor backing `inner.stream`, re-validated with a
    /// peer-name query before every call (spec §4.4). `None` for the
    /// stream doubles the test suite drives directly, which have no
    /// underlying descriptor to validate.
    fd: Option<RawFd>,
}

impl<S: Read + Write> Stub<S> {
    pub fn new(stream: S) -> Stub<S> {
        Stub {
            inner: Mutex::new(Inner {
                stream,
                frame: Packet::new(0),
                tree: BusArena::new(),
            }),
            fd: None,
        }
    }

    /// As [`Stub::new`], but also records the session hand-off descriptor
    /// so every call can be preceded by the peer-name validation spec
    /// §4.4 requires before each use of the cached fd.
    pub fn new_with_fd(stream: S, fd: RawFd) -> Stub<S> {
        Stub {
            inner: Mutex::new(Inner {
                stream,
                frame: Packet::new(0),
                tree: BusArena::new(),
            }),
            fd: Some(fd),
        }
    }

    /// Run one call end to end: acquire the mutex, claim the shared frame,
    /// marshal the request with `build`, send it, and — unless `opcode` is
    /// `Init` (which has no reply, spec §6) — receive and validate the
    /// reply, returning its raw payload for the caller to unmarshal.
    fn call(
        &self,
        opcode: Opcode,
        build: impl FnOnce(&mut Packet) -> Result<(), WireError>,
    ) -> Result<Vec<u8>, ShimError> {
        if let Some(fd) = self.fd {
            if !usbnet_handoff::validate(fd) {
                // Spec §7 SessionLost: the wrapped library's API has no
                // plumbing for transport restart, so recovery is not
                // possible — the only correct response is to terminate.
                let err = ShimError::from(HandoffError::SessionLost);
                error!(error = %err, "usbnet-shim: aborting");
                panic!("usbnet-shim: {err}");
            }
        }

        let mut inner = self.inner.lock().unwrap();
        inner.frame.reset(opcode.as_byte());
        build(&mut inner.frame)?;
        send_frame(&mut inner.stream, inner.frame.opcode(), inner.frame.payload())?;

        if opcode == Opcode::Init {
            return Ok(Vec::new());
        }

        let (reply_op, payload) = recv_frame(&mut inner.stream)?;
        if reply_op != opcode.as_byte() {
            return Err(ShimError::ProtocolMismatch { expected: opcode.as_byte(), found: reply_op });
        }
        Ok(payload)
    }

    /// Run an arbitrary closure against the virtual bus tree. Readers must
    /// only call this between RPCs, never while holding a borrow across a
    /// call — the same constraint the wrapped library already imposes on
    /// its caller (spec §5).
    pub fn with_tree<R>(&self, f: impl FnOnce(&BusArena) -> R) -> R {
        let inner = self.inner.lock().unwrap();
        f(&inner.tree)
    }

    pub fn init(&self) -> Result<(), ShimError> {
        self.call(Opcode::Init, |_| Ok(()))?;
        Ok(())
    }

    pub fn find_busses(&self) -> Result<i32, ShimError> {
        let payload = self.call(Opcode::FindBusses, |_| Ok(()))?;
        let mut it = Iter::new(&payload);
        Ok(next_int(&mut it)? as i32)
    }

    /// `usb_find_devices`: rescans the remote topology and reconciles the
    /// virtual bus tree in place (spec §4.5's bus-tree reconstruction
    /// rules, implemented by [`BusArena::reconcile`]).
    pub fn find_devices(&self) -> Result<i32, ShimError> {
        let payload = self.call(Opcode::FindDevices, |_| Ok(()))?;
        let mut it = Iter::new(&payload);
        let count = next_int(&mut it)? as i32;
        let busses = decode_bus_tree(&mut it)?;

        let mut inner = self.inner.lock().unwrap();
        inner.tree.reconcile(busses);
        Ok(count)
    }

    pub fn open(&self, bus_location: u32, devnum: u32) -> Result<i32, ShimError> {
        let payload = self.call(Opcode::Open, |pkt| {
            pkt.append_integer(Tag::UnsignedInt, 4, bus_location as i64)?;
            pkt.append_integer(Tag::UnsignedInt, 4, devnum as i64)
        })?;
        let mut it = Iter::new(&payload);
        let rc = next_int(&mut it)? as i32;
        let handle = next_int(&mut it)? as i32;
        Ok(if rc < 0 { rc } else { handle })
    }

    pub fn close(&self, handle: i32) -> Result<i32, ShimError> {
        let payload = self.call(Opcode::Close, |pkt| pkt.append_integer(Tag::Integer, 4, handle as i64))?;
        let mut it = Iter::new(&payload);
        Ok(next_int(&mut it)? as i32)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn control_msg(
        &self,
        handle: i32,
        request_type: i32,
        request: i32,
        value: i32,
        index: i32,
        buf: &[u8],
        timeout_ms: i32,
    ) -> Result<(i32, Vec<u8>), ShimError> {
        let payload = self.call(Opcode::ControlMsg, |pkt| {
            pkt.append_integer(Tag::Integer, 4, handle as i64)?;
            pkt.append_integer(Tag::Integer, 4, request_type as i64)?;
            pkt.append_integer(Tag::Integer, 4, request as i64)?;
            pkt.append_integer(Tag::Integer, 4, value as i64)?;
            pkt.append_integer(Tag::Integer, 4, index as i64)?;
            pkt.append_tlv(Tag::Octets, buf)?;
            pkt.append_integer(Tag::Integer, 4, timeout_ms as i64)
        })?;
        let mut it = Iter::new(&payload);
        let rc = next_int(&mut it)? as i32;
        let buf_back = next_bytes(&mut it)?;
        Ok((rc, buf_back))
    }

    pub fn claim_interface(&self, handle: i32, interface: i32) -> Result<i32, ShimError> {
        self.handle_and_int_call(Opcode::ClaimInterface, handle, interface)
    }

    pub fn release_interface(&self, handle: i32, interface: i32) -> Result<i32, ShimError> {
        self.handle_and_int_call(Opcode::ReleaseInterface, handle, interface)
    }

    pub fn get_kernel_driver(&self, handle: i32, interface: i32, buf_len: u32) -> Result<(i32, Vec<u8>), ShimError> {
        let payload = self.call(Opcode::GetKernelDriver, |pkt| {
            pkt.append_integer(Tag::Integer, 4, handle as i64)?;
            pkt.append_integer(Tag::Integer, 4, interface as i64)?;
            pkt.append_integer(Tag::UnsignedInt, 4, buf_len as i64)
        })?;
        let mut it = Iter::new(&payload);
        let rc = next_int(&mut it)? as i32;
        let name = next_bytes(&mut it)?;
        Ok((rc, name))
    }

    pub fn detach_kernel_driver(&self, handle: i32, interface: i32) -> Result<i32, ShimError> {
        self.handle_and_int_call(Opcode::DetachKernelDriver, handle, interface)
    }

    pub fn bulk_read(&self, handle: i32, endpoint: i32, size: i32, timeout_ms: i32) -> Result<(i32, Vec<u8>), ShimError> {
        self.read_call(Opcode::BulkRead, handle, endpoint, size, timeout_ms)
    }

    pub fn bulk_write(&self, handle: i32, endpoint: i32, data: &[u8], timeout_ms: i32) -> Result<i32, ShimError> {
        self.write_call(Opcode::BulkWrite, handle, endpoint, data, timeout_ms)
    }

    pub fn set_configuration(&self, handle: i32, configuration: i32) -> Result<(i32, i32), ShimError> {
        self.handle_and_int_echo_call(Opcode::SetConfiguration, handle, configuration)
    }

    pub fn set_alt_interface(&self, handle: i32, alternate: i32) -> Result<(i32, i32), ShimError> {
        self.handle_and_int_echo_call(Opcode::SetAltInterface, handle, alternate)
    }

    pub fn reset_ep(&self, handle: i32, endpoint: u32) -> Result<i32, ShimError> {
        self.handle_and_uint_call(Opcode::ResetEp, handle, endpoint)
    }

    pub fn clear_halt(&self, handle: i32, endpoint: u32) -> Result<i32, ShimError> {
        self.handle_and_uint_call(Opcode::ClearHalt, handle, endpoint)
    }

    pub fn reset(&self, handle: i32) -> Result<i32, ShimError> {
        let payload = self.call(Opcode::Reset, |pkt| pkt.append_integer(Tag::Integer, 4, handle as i64))?;
        let mut it = Iter::new(&payload);
        Ok(next_int(&mut it)? as i32)
    }

    pub fn interrupt_read(&self, handle: i32, endpoint: i32, size: i32, timeout_ms: i32) -> Result<(i32, Vec<u8>), ShimError> {
        self.read_call(Opcode::InterruptRead, handle, endpoint, size, timeout_ms)
    }

    pub fn interrupt_write(&self, handle: i32, endpoint: i32, data: &[u8], timeout_ms: i32) -> Result<i32, ShimError> {
        self.write_call(Opcode::InterruptWrite, handle, endpoint, data, timeout_ms)
    }

    fn handle_and_int_call(&self, opcode: Opcode, handle: i32, arg: i32) -> Result<i32, ShimError> {
        let payload = self.call(opcode, |pkt| {
            pkt.append_integer(Tag::Integer, 4, handle as i64)?;
            pkt.append_integer(Tag::Integer, 4, arg as i64)
        })?;
        let mut it = Iter::new(&payload);
        Ok(next_int(&mut it)? as i32)
    }

    fn handle_and_uint_call(&self, opcode: Opcode, handle: i32, arg: u32) -> Result<i32, ShimError> {
        let payload = self.call(opcode, |pkt| {
            pkt.append_integer(Tag::Integer, 4, handle as i64)?;
            pkt.append_integer(Tag::UnsignedInt, 4, arg as i64)
        })?;
        let mut it = Iter::new(&payload);
        Ok(next_int(&mut it)? as i32)
    }

    fn handle_and_int_echo_call(&self, opcode: Opcode, handle: i32, arg: i32) -> Result<(i32, i32), ShimError> {
        let payload = self.call(opcode, |pkt| {
            pkt.append_integer(Tag::Integer, 4, handle as i64)?;
            pkt.append_integer(Tag::Integer, 4, arg as i64)
        })?;
        let mut it = Iter::new(&payload);
        let rc = next_int(&mut it)? as i32;
        let echo = next_int(&mut it)? as i32;
        Ok((rc, echo))
    }

    fn read_call(&self, opcode: Opcode, handle: i32, endpoint: i32, size: i32, timeout_ms: i32) -> Result<(i32, Vec<u8>), ShimError> {
        let payload = self.call(opcode, |pkt| {
            pkt.append_integer(Tag::Integer, 4, handle as i64)?;
            pkt.append_integer(Tag::Integer, 4, endpoint as i64)?;
            pkt.append_integer(Tag::Integer, 4, size as i64)?;
            pkt.append_integer(Tag::Integer, 4, timeout_ms as i64)
        })?;
        let mut it = Iter::new(&payload);
        let rc = next_int(&mut it)? as i32;
        let data = next_bytes(&mut it)?;
        Ok((rc, data))
    }

    fn write_call(&self, opcode: Opcode, handle: i32, endpoint: i32, data: &[u8], timeout_ms: i32) -> Result<i32, ShimError> {
        let payload = self.call(opcode, |pkt| {
            pkt.append_integer(Tag::Integer, 4, handle as i64)?;
            pkt.append_integer(Tag::Integer, 4, endpoint as i64)?;
            pkt.append_tlv(Tag::Octets, data)?;
            pkt.append_integer(Tag::Integer, 4, timeout_ms as i64)
        })?;
        let mut it = Iter::new(&payload);
        Ok(next_int(&mut it)? as i32)
    }
}

fn next_int(it: &mut Iter) -> Result<i64, WireError> {
    if !it.advance()? {
        return Err(WireError::Truncated);
    }
    it.as_int(true)
}

fn next_bytes(it: &mut Iter) -> Result<Vec<u8>, WireError> {
    if !it.advance()? {
        return Err(WireError::Truncated);
    }
    Ok(it.as_bytes().ok_or(WireError::Truncated)?.to_vec())
}

/// Decode the bus/device topology carried after the count in a
/// `FindDevices` reply, mirroring `usbnet-server::dispatch::serialize_bus_tree`
/// in reverse (spec §4.6).
fn decode_bus_tree(it: &mut Iter) -> Result<Vec<usbnet_abi::BusInfo>, WireError> {
    use usbnet_abi::{AltSetting, BusInfo, ConfigDescriptor, ConfigInfo, DeviceDescriptor, DeviceInfo, EndpointDescriptor, InterfaceDescriptor};

    let mut busses = Vec::new();
    while it.advance()? {
        if it.tag() != Tag::Structure {
            return Err(WireError::UnexpectedTag { expected: Tag::Structure, found: it.tag() });
        }
        let mut bus_it = it.enter();

        if !bus_it.advance()? {
            return Err(WireError::Truncated);
        }
        let dirname = bus_it.as_str()?.to_string();
        if !bus_it.advance()? {
            return Err(WireError::Truncated);
        }
        let location = bus_it.as_uint()? as u32;

        let mut devices = Vec::new();
        while bus_it.advance()? {
            if bus_it.tag() != Tag::Sequence {
                return Err(WireError::UnexpectedTag { expected: Tag::Sequence, found: bus_it.tag() });
            }
            let mut dev_it = bus_it.enter();

            if !dev_it.advance()? {
                return Err(WireError::Truncated);
            }
            let filename = dev_it.as_str()?.to_string();
            if !dev_it.advance()? {
                return Err(WireError::Truncated);
            }
            let devnum = dev_it.as_uint()? as u32;
            if !dev_it.advance()? {
                return Err(WireError::Truncated);
            }
            let descriptor = DeviceDescriptor::from_bytes(dev_it.as_bytes().ok_or(WireError::Truncated)?, true)
                .ok_or(WireError::Truncated)?;

            let mut configs = Vec::with_capacity(descriptor.b_num_configurations as usize);
            for _ in 0..descriptor.b_num_configurations {
                if !dev_it.advance()? {
                    return Err(WireError::Truncated);
                }
                let config_descriptor = ConfigDescriptor::from_bytes(dev_it.as_bytes().ok_or(WireError::Truncated)?, true)
                    .ok_or(WireError::Truncated)?;

                let mut interfaces = Vec::with_capacity(config_descriptor.b_num_interfaces as usize);
                for _ in 0..config_descriptor.b_num_interfaces {
                    let num_altsetting = next_uint_child(&mut dev_it)? as usize;
                    let mut alt_settings = Vec::with_capacity(num_altsetting);
                    for _ in 0..num_altsetting {
                        if !dev_it.advance()? {
                            return Err(WireError::Truncated);
                        }
                        let iface_descriptor =
                            InterfaceDescriptor::from_bytes(dev_it.as_bytes().ok_or(WireError::Truncated)?)
                                .ok_or(WireError::Truncated)?;

                        let mut endpoints = Vec::with_capacity(iface_descriptor.b_num_endpoints as usize);
                        for _ in 0..iface_descriptor.b_num_endpoints {
                            if !dev_it.advance()? {
                                return Err(WireError::Truncated);
                            }
                            let ep = EndpointDescriptor::from_bytes(dev_it.as_bytes().ok_or(WireError::Truncated)?, true)
                                .ok_or(WireError::Truncated)?;
                            endpoints.push(ep);
                        }

                        let extra_len = next_uint_child(&mut dev_it)? as usize;
                        let extra = if extra_len > 0 {
                            if !dev_it.advance()? {
                                return Err(WireError::Truncated);
                            }
                            dev_it.as_bytes().ok_or(WireError::Truncated)?.to_vec()
                        } else {
                            Vec::new()
                        };

                        alt_settings.push(AltSetting { descriptor: iface_descriptor, endpoints, extra });
                    }
                    interfaces.push(alt_settings);
                }

                configs.push(ConfigInfo { descriptor: config_descriptor, interfaces });
            }

            devices.push(DeviceInfo { filename, devnum, descriptor, configs });
        }

        busses.push(BusInfo { dirname, location, devices });
    }
    Ok(busses)
}

fn next_uint_child(it: &mut Iter) -> Result<i64, WireError> {
    if !it.advance()? {
        return Err(WireError::Truncated);
    }
    it.as_uint()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use usbnet_abi::{DeviceDescriptor, DeviceInfo};

    /// A duplex in-memory byte stream: reads come from a pre-seeded
    /// buffer, writes accumulate for inspection — used to drive [`Stub`]
    /// without a real socket.
    struct Duplex {
        inbound: Cursor<Vec<u8>>,
        outbound: Vec<u8>,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.inbound.read(buf)
        }
    }
    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.outbound.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn seeded(reply_opcode: u8, reply_payload: &[u8]) -> Duplex {
        let mut wire = Vec::new();
        usbnet_transport::send_frame(&mut wire, reply_opcode, reply_payload).unwrap();
        Duplex { inbound: Cursor::new(wire), outbound: Vec::new() }
    }

    #[test]
    fn init_sends_a_request_and_awaits_no_reply() {
        let stub = Stub::new(Duplex { inbound: Cursor::new(Vec::new()), outbound: Vec::new() });
        stub.init().unwrap();
        let sent = {
            let inner = stub.inner.lock().unwrap();
            inner.stream.outbound.clone()
        };
        assert_eq!(sent, vec![Opcode::Init.as_byte(), 0]);
    }

    #[test]
    #[should_panic(expected = "usbnet-shim")]
    fn a_call_aborts_when_the_cached_descriptor_fails_its_peer_name_check() {
        use std::os::unix::io::AsRawFd;
        use std::os::unix::net::UnixStream;

        // Open and immediately drop one side of a pair so its fd number is
        // guaranteed stale — `getpeername` on it must fail.
        let stale_fd = {
            let (a, _b) = UnixStream::pair().unwrap();
            a.as_raw_fd()
        };
        let stub = Stub::new_with_fd(
            Duplex { inbound: Cursor::new(Vec::new()), outbound: Vec::new() },
            stale_fd,
        );
        let _ = stub.init();
    }

    #[test]
    fn find_busses_parses_the_count() {
        let mut reply = Packet::new(Opcode::FindBusses.as_byte());
        reply.append_integer(Tag::Integer, 4, 3).unwrap();
        let stub = Stub::new(seeded(reply.opcode(), reply.payload()));
        assert_eq!(stub.find_busses().unwrap(), 3);
    }

    #[test]
    fn opcode_mismatch_on_reply_is_reported() {
        let mut reply = Packet::new(Opcode::FindBusses.as_byte());
        reply.append_integer(Tag::Integer, 4, 0).unwrap();
        // Seed a reply carrying the *wrong* opcode for the Open call below.
        let stub = Stub::new(seeded(reply.opcode(), reply.payload()));
        let err = stub.open(1, 2).unwrap_err();
        assert!(matches!(err, ShimError::ProtocolMismatch { .. }));
    }

    #[test]
    fn open_reports_the_handle_on_success() {
        let mut reply = Packet::new(Opcode::Open.as_byte());
        reply.append_integer(Tag::Integer, 4, 0).unwrap();
        reply.append_integer(Tag::Integer, 4, 42).unwrap();
        let stub = Stub::new(seeded(reply.opcode(), reply.payload()));
        assert_eq!(stub.open(1, 2).unwrap(), 42);
    }

    #[test]
    fn open_reports_the_negative_rc_on_failure_not_the_handle() {
        let mut reply = Packet::new(Opcode::Open.as_byte());
        reply.append_integer(Tag::Integer, 4, -2).unwrap();
        reply.append_integer(Tag::Integer, 4, 0).unwrap();
        let stub = Stub::new(seeded(reply.opcode(), reply.payload()));
        assert_eq!(stub.open(1, 2).unwrap(), -2);
    }

    #[test]
    fn find_devices_reconciles_the_tree_from_the_reply() {
        let mut reply = Packet::new(Opcode::FindDevices.as_byte());
        reply.append_integer(Tag::Integer, 4, 1).unwrap();
        let bus = reply.begin_container(Tag::Structure);
        reply.append_string("001").unwrap();
        reply.append_integer(Tag::UnsignedInt, 4, 1).unwrap();
        let dev = reply.begin_container(Tag::Sequence);
        reply.append_string("002").unwrap();
        reply.append_integer(Tag::UnsignedInt, 4, 2).unwrap();
        let descriptor = DeviceDescriptor { b_num_configurations: 0, ..Default::default() };
        reply.append_tlv(Tag::Raw, &descriptor.to_bytes(true)).unwrap();
        reply.finalize_container(dev).unwrap();
        reply.finalize_container(bus).unwrap();

        let stub = Stub::new(seeded(reply.opcode(), reply.payload()));
        let count = stub.find_devices().unwrap();
        assert_eq!(count, 1);

        stub.with_tree(|tree| {
            assert_eq!(tree.len(), 1);
            assert_eq!(tree.busses[0].dirname, "001");
            assert_eq!(tree.busses[0].devices[0].devnum, 2);
        });
        let _ = DeviceInfo::default();
    }
}
