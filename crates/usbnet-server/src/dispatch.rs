// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Opcode routing: decode a request payload, call the backend, compose the
//! reply packet. One function per opcode, matching the table in spec §6.

use usbnet_abi::{BusInfo, UsbBackend};
use usbnet_wire::opcode::Opcode;
use usbnet_wire::tag::Tag;
use usbnet_wire::{Iter, Packet, WireError};

use crate::registry::HandleRegistry;

/// Dispatch one decoded frame. Returns `Ok(None)` when the call has no
/// reply (`Init`) or the opcode is unrecognised — the caller logs and
/// drops in that case. `Err` means the request payload itself was
/// malformed and the session must be closed without a reply.
pub fn dispatch(
    opcode_byte: u8,
    payload: &[u8],
    backend: &mut dyn UsbBackend,
    registry: &mut HandleRegistry,
) -> Result<Option<Packet>, WireError> {
    let opcode = match Opcode::from_byte(opcode_byte) {
        Some(op) => op,
        None => return Ok(None),
    };

    let mut it = Iter::new(payload);

    let reply = match opcode {
        Opcode::Init => {
            backend.init();
            None
        }
        Opcode::FindBusses => {
            let count = backend.find_busses();
            let mut pkt = Packet::new(opcode_byte);
            pkt.append_integer(Tag::Integer, 4, count as i64)?;
            Some(pkt)
        }
        Opcode::FindDevices => {
            let (count, busses) = backend.find_devices();
            let mut pkt = Packet::new(opcode_byte);
            pkt.append_integer(Tag::Integer, 4, count as i64)?;
            serialize_bus_tree(&mut pkt, &busses)?;
            Some(pkt)
        }
        Opcode::Open => {
            let bus_loc = next_uint(&mut it)?;
            let devnum = next_uint(&mut it)?;
            let rc = backend.open(bus_loc as u32, devnum as u32);
            let mut pkt = Packet::new(opcode_byte);
            if rc >= 0 {
                registry.insert(rc);
                pkt.append_integer(Tag::Integer, 4, 0)?;
                pkt.append_integer(Tag::Integer, 4, rc as i64)?;
            } else {
                pkt.append_integer(Tag::Integer, 4, rc as i64)?;
                pkt.append_integer(Tag::Integer, 4, 0)?;
            }
            Some(pkt)
        }
        Opcode::Close => {
            let handle = next_handle(&mut it)?;
            let rc = close_handle(handle, backend, registry);
            let mut pkt = Packet::new(opcode_byte);
            pkt.append_integer(Tag::Integer, 4, rc as i64)?;
            Some(pkt)
        }
        Opcode::ControlMsg => {
            let handle = next_handle(&mut it)?;
            let request_type = next_int(&mut it)?;
            let request = next_int(&mut it)?;
            let value = next_int(&mut it)?;
            let index = next_int(&mut it)?;
            let buf = next_bytes(&mut it)?;
            let timeout = next_int(&mut it)?;
            let (rc, buf_back) = if registry.contains(handle) {
                backend.control_msg(handle, request_type as i32, request as i32, value as i32, index as i32, &buf, timeout as i32)
            } else {
                (not_found(), Vec::new())
            };
            let mut pkt = Packet::new(opcode_byte);
            pkt.append_integer(Tag::Integer, 4, rc as i64)?;
            pkt.append_tlv(Tag::Octets, &buf_back)?;
            Some(pkt)
        }
        Opcode::ClaimInterface => {
            let handle = next_handle(&mut it)?;
            let ifnum = next_int(&mut it)?;
            let rc = if registry.contains(handle) {
                backend.claim_interface(handle, ifnum as i32)
            } else {
                not_found()
            };
            let mut pkt = Packet::new(opcode_byte);
            pkt.append_integer(Tag::Integer, 4, rc as i64)?;
            Some(pkt)
        }
        Opcode::ReleaseInterface => {
            let handle = next_handle(&mut it)?;
            let ifnum = next_int(&mut it)?;
            let rc = if registry.contains(handle) {
                backend.release_interface(handle, ifnum as i32)
            } else {
                not_found()
            };
            let mut pkt = Packet::new(opcode_byte);
            pkt.append_integer(Tag::Integer, 4, rc as i64)?;
            Some(pkt)
        }
        Opcode::GetKernelDriver => {
            let handle = next_handle(&mut it)?;
            let ifnum = next_int(&mut it)?;
            let buf_len = next_uint(&mut it)?;
            let (rc, name) = if registry.contains(handle) {
                backend.get_kernel_driver(handle, ifnum as i32, buf_len as u32)
            } else {
                (not_found(), Vec::new())
            };
            let mut pkt = Packet::new(opcode_byte);
            pkt.append_integer(Tag::Integer, 4, rc as i64)?;
            pkt.append_tlv(Tag::Octets, &name)?;
            Some(pkt)
        }
        Opcode::DetachKernelDriver => {
            let handle = next_handle(&mut it)?;
            let ifnum = next_int(&mut it)?;
            let rc = if registry.contains(handle) {
                backend.detach_kernel_driver(handle, ifnum as i32)
            } else {
                not_found()
            };
            let mut pkt = Packet::new(opcode_byte);
            pkt.append_integer(Tag::Integer, 4, rc as i64)?;
            Some(pkt)
        }
        Opcode::BulkRead => {
            let handle = next_handle(&mut it)?;
            let ep = next_int(&mut it)?;
            let size = next_int(&mut it)?;
            let timeout = next_int(&mut it)?;
            let (rc, data) = if registry.contains(handle) {
                backend.bulk_read(handle, ep as i32, size as i32, timeout as i32)
            } else {
                (not_found(), Vec::new())
            };
            let mut pkt = Packet::new(opcode_byte);
            pkt.append_integer(Tag::Integer, 4, rc as i64)?;
            pkt.append_tlv(Tag::Octets, &data)?;
            Some(pkt)
        }
        Opcode::BulkWrite => {
            let handle = next_handle(&mut it)?;
            let ep = next_int(&mut it)?;
            let data = next_bytes(&mut it)?;
            let timeout = next_int(&mut it)?;
            let rc = if registry.contains(handle) {
                backend.bulk_write(handle, ep as i32, &data, timeout as i32)
            } else {
                not_found()
            };
            let mut pkt = Packet::new(opcode_byte);
            pkt.append_integer(Tag::Integer, 4, rc as i64)?;
            Some(pkt)
        }
        Opcode::SetConfiguration => {
            let handle = next_handle(&mut it)?;
            let cfg = next_int(&mut it)?;
            let rc = if registry.contains(handle) {
                backend.set_configuration(handle, cfg as i32)
            } else {
                not_found()
            };
            let mut pkt = Packet::new(opcode_byte);
            pkt.append_integer(Tag::Integer, 4, rc as i64)?;
            pkt.append_integer(Tag::Integer, 4, cfg)?;
            Some(pkt)
        }
        Opcode::SetAltInterface => {
            let handle = next_handle(&mut it)?;
            let alt = next_int(&mut it)?;
            let rc = if registry.contains(handle) {
                backend.set_alt_interface(handle, alt as i32)
            } else {
                not_found()
            };
            let mut pkt = Packet::new(opcode_byte);
            pkt.append_integer(Tag::Integer, 4, rc as i64)?;
            pkt.append_integer(Tag::Integer, 4, alt)?;
            Some(pkt)
        }
        Opcode::ResetEp => {
            let handle = next_handle(&mut it)?;
            let ep = next_uint(&mut it)?;
            let rc = if registry.contains(handle) {
                backend.reset_ep(handle, ep as u32)
            } else {
                not_found()
            };
            let mut pkt = Packet::new(opcode_byte);
            pkt.append_integer(Tag::Integer, 4, rc as i64)?;
            Some(pkt)
        }
        Opcode::ClearHalt => {
            let handle = next_handle(&mut it)?;
            let ep = next_uint(&mut it)?;
            let rc = if registry.contains(handle) {
                backend.clear_halt(handle, ep as u32)
            } else {
                not_found()
            };
            let mut pkt = Packet::new(opcode_byte);
            pkt.append_integer(Tag::Integer, 4, rc as i64)?;
            Some(pkt)
        }
        Opcode::Reset => {
            let handle = next_handle(&mut it)?;
            let rc = if registry.contains(handle) {
                backend.reset(handle)
            } else {
                not_found()
            };
            let mut pkt = Packet::new(opcode_byte);
            pkt.append_integer(Tag::Integer, 4, rc as i64)?;
            Some(pkt)
        }
        Opcode::InterruptRead => {
            let handle = next_handle(&mut it)?;
            let ep = next_int(&mut it)?;
            let size = next_int(&mut it)?;
            let timeout = next_int(&mut it)?;
            let (rc, data) = if registry.contains(handle) {
                backend.interrupt_read(handle, ep as i32, size as i32, timeout as i32)
            } else {
                (not_found(), Vec::new())
            };
            let mut pkt = Packet::new(opcode_byte);
            pkt.append_integer(Tag::Integer, 4, rc as i64)?;
            pkt.append_tlv(Tag::Octets, &data)?;
            Some(pkt)
        }
        Opcode::InterruptWrite => {
            let handle = next_handle(&mut it)?;
            let ep = next_int(&mut it)?;
            let data = next_bytes(&mut it)?;
            let timeout = next_int(&mut it)?;
            let rc = if registry.contains(handle) {
                backend.interrupt_write(handle, ep as i32, &data, timeout as i32)
            } else {
                not_found()
            };
            let mut pkt = Packet::new(opcode_byte);
            pkt.append_integer(Tag::Integer, 4, rc as i64)?;
            Some(pkt)
        }
    };

    Ok(reply)
}

/// A request referencing an unknown handle becomes a negative return code
/// in the reply, never a closed session (spec §7, `NotFound`).
fn not_found() -> i32 {
    -9 // EBADF, matching the wrapped library's errno convention
}

fn close_handle(handle: i32, backend: &mut dyn UsbBackend, registry: &mut HandleRegistry) -> i32 {
    if registry.remove(handle) {
        backend.close(handle)
    } else {
        not_found()
    }
}

fn next_int(it: &mut Iter) -> Result<i64, WireError> {
    if !it.advance()? {
        return Err(WireError::Truncated);
    }
    it.as_int(true)
}

fn next_uint(it: &mut Iter) -> Result<i64, WireError> {
    if !it.advance()? {
        return Err(WireError::Truncated);
    }
    it.as_uint()
}

fn next_handle(it: &mut Iter) -> Result<i32, WireError> {
    Ok(next_int(it)? as i32)
}

fn next_bytes(it: &mut Iter) -> Result<Vec<u8>, WireError> {
    if !it.advance()? {
        return Err(WireError::Truncated);
    }
    Ok(it.as_bytes().ok_or(WireError::Truncated)?.to_vec())
}

/// Serialize the bus/device topology into `pkt` following the reply shape
/// in spec §4.6: one `Structure` per bus, one `Sequence` per device inside
/// it, descriptors as network-byte-order `Raw` blobs. Containers are
/// finalized bottom-up so their declared lengths are exact.
fn serialize_bus_tree(pkt: &mut Packet, busses: &[BusInfo]) -> Result<(), WireError> {
    for bus in busses {
        let bus_handle = pkt.begin_container(Tag::Structure);
        pkt.append_string(&bus.dirname)?;
        pkt.append_integer(Tag::UnsignedInt, 4, bus.location as i64)?;

        for device in &bus.devices {
            let dev_handle = pkt.begin_container(Tag::Sequence);
            pkt.append_string(&device.filename)?;
            pkt.append_integer(Tag::UnsignedInt, 4, device.devnum as i64)?;
            pkt.append_tlv(Tag::Raw, &device.descriptor.to_bytes(true))?;

            for config in &device.configs {
                pkt.append_tlv(Tag::Raw, &config.descriptor.to_bytes(true))?;

                for alt_settings in &config.interfaces {
                    pkt.append_integer(Tag::Integer, 4, alt_settings.len() as i64)?;
                    for alt in alt_settings {
                        pkt.append_tlv(Tag::Raw, &alt.descriptor.to_bytes())?;
                        for ep in &alt.endpoints {
                            pkt.append_tlv(Tag::Raw, &ep.to_bytes(true))?;
                        }
                        pkt.append_integer(Tag::Integer, 4, alt.extra.len() as i64)?;
                        if !alt.extra.is_empty() {
                            pkt.append_tlv(Tag::Raw, &alt.extra)?;
                        }
                    }
                }
            }

            pkt.finalize_container(dev_handle)?;
        }

        pkt.finalize_container(bus_handle)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use usbnet_abi::MockBackend;
    use usbnet_wire::opcode::CALL_BASE;

    #[test]
    fn init_has_no_reply() {
        let mut backend = MockBackend::new();
        let mut registry = HandleRegistry::new();
        let reply = dispatch(Opcode::Init.as_byte(), &[], &mut backend, &mut registry).unwrap();
        assert!(reply.is_none());
    }

    #[test]
    fn find_busses_on_empty_host_replies_zero() {
        let mut backend = MockBackend::new();
        let mut registry = HandleRegistry::new();
        let reply = dispatch(Opcode::FindBusses.as_byte(), &[], &mut backend, &mut registry)
            .unwrap()
            .unwrap();
        let mut it = reply.iter();
        assert!(it.advance().unwrap());
        assert_eq!(it.as_int(true).unwrap(), 0);
    }

    #[test]
    fn open_then_close_round_trips_through_the_registry() {
        let mut backend = MockBackend::with_one_device(1, 2, 0x1234, 0x5678);
        let mut registry = HandleRegistry::new();

        let mut open_req = Packet::new(Opcode::Open.as_byte());
        open_req.append_integer(Tag::UnsignedInt, 4, 1).unwrap();
        open_req.append_integer(Tag::UnsignedInt, 4, 2).unwrap();
        let open_reply = dispatch(Opcode::Open.as_byte(), open_req.payload(), &mut backend, &mut registry)
            .unwrap()
            .unwrap();

        let mut it = open_reply.iter();
        assert!(it.advance().unwrap());
        assert_eq!(it.as_int(true).unwrap(), 0);
        assert!(it.advance().unwrap());
        let handle = it.as_int(true).unwrap();
        assert!(registry.contains(handle as i32));

        let mut close_req = Packet::new(Opcode::Close.as_byte());
        close_req.append_integer(Tag::Integer, 4, handle).unwrap();
        let close_reply = dispatch(Opcode::Close.as_byte(), close_req.payload(), &mut backend, &mut registry)
            .unwrap()
            .unwrap();
        let mut it = close_reply.iter();
        assert!(it.advance().unwrap());
        assert_eq!(it.as_int(true).unwrap(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_opcode_yields_no_reply() {
        let mut backend = MockBackend::new();
        let mut registry = HandleRegistry::new();
        let reply = dispatch(CALL_BASE + 99, &[], &mut backend, &mut registry).unwrap();
        assert!(reply.is_none());
    }

    #[test]
    fn control_msg_against_an_unopened_handle_reports_a_negative_rc_without_failing() {
        let mut backend = MockBackend::new();
        let mut registry = HandleRegistry::new();
        let mut req = Packet::new(Opcode::ControlMsg.as_byte());
        req.append_integer(Tag::Integer, 4, 99).unwrap();
        req.append_integer(Tag::Integer, 4, 0).unwrap();
        req.append_integer(Tag::Integer, 4, 0).unwrap();
        req.append_integer(Tag::Integer, 4, 0).unwrap();
        req.append_integer(Tag::Integer, 4, 0).unwrap();
        req.append_tlv(Tag::Octets, &[]).unwrap();
        req.append_integer(Tag::Integer, 4, 1000).unwrap();

        let reply = dispatch(Opcode::ControlMsg.as_byte(), req.payload(), &mut backend, &mut registry)
            .unwrap()
            .unwrap();
        let mut it = reply.iter();
        assert!(it.advance().unwrap());
        assert!(it.as_int(true).unwrap() < 0);
    }

    #[test]
    fn find_devices_serializes_the_seeded_topology() {
        let mut backend = MockBackend::with_one_device(1, 2, 0x1234, 0x5678);
        let mut registry = HandleRegistry::new();
        let reply = dispatch(Opcode::FindDevices.as_byte(), &[], &mut backend, &mut registry)
            .unwrap()
            .unwrap();

        let mut it = reply.iter();
        assert!(it.advance().unwrap());
        assert_eq!(it.as_int(true).unwrap(), 1);
        assert!(it.advance().unwrap());
        assert_eq!(it.tag(), Tag::Structure);
        let mut bus = it.enter();
        assert!(bus.advance().unwrap());
        assert_eq!(bus.as_str().unwrap(), "001");
        assert!(bus.advance().unwrap());
        assert_eq!(bus.as_uint().unwrap(), 1);
        assert!(bus.advance().unwrap());
        assert_eq!(bus.tag(), Tag::Sequence);
        let mut dev = bus.enter();
        assert!(dev.advance().unwrap());
        assert_eq!(dev.as_str().unwrap(), "002");
        assert!(dev.advance().unwrap());
        assert_eq!(dev.as_uint().unwrap(), 2);
    }
}
