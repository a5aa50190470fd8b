// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! `repr(C)` mirror of the wrapped library's public pointer tree
//! (`usb.h`'s `struct usb_bus`/`struct usb_device` family, matched against
//! `usbnet.h`'s own note that it tracks "libusb-0.1.12, may lose binary
//! compatibility").
//!
//! [`build_tree`] is the only place this crate manufactures these structs:
//! it walks a [`crate::arena::BusArena`] and allocates a brand new,
//! doubly-linked C tree from it. The arena remains the single source of
//! truth; a pointer tree built here is a disposable snapshot, freed in full
//! by [`free_tree`] before the next one is built. This keeps the unsafe
//! surface to two functions instead of smearing raw pointers through the
//! reconciliation logic in `arena.rs`.

use std::os::raw::{c_char, c_int, c_void};
use std::ptr;

use usbnet_abi::{AltSetting, ConfigInfo};

use crate::arena::{Bus, BusArena, Device};

const PATH_MAX: usize = 4096;
const MAXINTERFACES: usize = 32;

#[repr(C)]
pub struct UsbBus {
    pub next: *mut UsbBus,
    pub prev: *mut UsbBus,
    pub dirname: [c_char; PATH_MAX + 1],
    pub location: u32,
    pub devices: *mut UsbDevice,
}

#[repr(C)]
pub struct UsbDevice {
    pub next: *mut UsbDevice,
    pub prev: *mut UsbDevice,
    pub filename: [c_char; PATH_MAX + 1],
    pub bus: *mut UsbBus,
    pub descriptor: usbnet_abi::DeviceDescriptor,
    pub config: *mut UsbConfigDescriptor,
    pub dev: *mut c_void,
    pub devnum: u8,
    pub num_children: u8,
    pub children: *mut *mut UsbDevice,
}

#[repr(C)]
pub struct UsbConfigDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub w_total_length: u16,
    pub b_num_interfaces: u8,
    pub b_configuration_value: u8,
    pub i_configuration: u8,
    pub bm_attributes: u8,
    pub max_power: u8,
    pub interface: *mut UsbInterface,
    pub extra: *mut u8,
    pub extralen: c_int,
}

#[repr(C)]
pub struct UsbInterface {
    pub altsetting: *mut UsbInterfaceDescriptor,
    pub num_altsetting: c_int,
}

#[repr(C)]
pub struct UsbInterfaceDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub b_interface_number: u8,
    pub b_alternate_setting: u8,
    pub b_num_endpoints: u8,
    pub b_interface_class: u8,
    pub b_interface_sub_class: u8,
    pub b_interface_protocol: u8,
    pub i_interface: u8,
    pub endpoint: *mut usbnet_abi::EndpointDescriptor,
    pub extra: *mut u8,
    pub extralen: c_int,
}

/// `usb_dev_handle`, per `original_source`'s `usbnet.h` (`libusb/usbi.h:41`
/// in the upstream library). `fd` doubles here as the client-visible open
/// handle returned by `Stub::open`, not a real local file descriptor.
#[repr(C)]
pub struct UsbDevHandle {
    pub fd: c_int,
    pub bus: *mut UsbBus,
    pub device: *mut UsbDevice,
    pub config: c_int,
    pub interface: c_int,
    pub altsetting: c_int,
    pub impl_info: *mut c_void,
}

fn copy_cstr(dst: &mut [c_char], src: &str) {
    for slot in dst.iter_mut() {
        *slot = 0;
    }
    for (slot, byte) in dst.iter_mut().zip(src.as_bytes()).take(dst.len() - 1) {
        *slot = *byte as c_char;
    }
}

fn build_interface(alt_settings: &[AltSetting]) -> UsbInterface {
    let mut altsetting: Vec<UsbInterfaceDescriptor> = Vec::with_capacity(alt_settings.len());
    for alt in alt_settings {
        let d = &alt.descriptor;
        let endpoint = if alt.endpoints.is_empty() {
            ptr::null_mut()
        } else {
            Box::into_raw(alt.endpoints.clone().into_boxed_slice()) as *mut usbnet_abi::EndpointDescriptor
        };
        let (extra, extralen) = if alt.extra.is_empty() {
            (ptr::null_mut(), 0)
        } else {
            (Box::into_raw(alt.extra.clone().into_boxed_slice()) as *mut u8, alt.extra.len() as c_int)
        };
        altsetting.push(UsbInterfaceDescriptor {
            b_length: d.b_length,
            b_descriptor_type: d.b_descriptor_type,
            b_interface_number: d.b_interface_number,
            b_alternate_setting: d.b_alternate_setting,
            b_num_endpoints: d.b_num_endpoints,
            b_interface_class: d.b_interface_class,
            b_interface_sub_class: d.b_interface_sub_class,
            b_interface_protocol: d.b_interface_protocol,
            i_interface: d.i_interface,
            endpoint,
            extra,
            extralen,
        });
    }
    let num_altsetting = altsetting.len() as c_int;
    let ptr = if altsetting.is_empty() {
        ptr::null_mut()
    } else {
        Box::into_raw(altsetting.into_boxed_slice()) as *mut UsbInterfaceDescriptor
    };
    UsbInterface { altsetting: ptr, num_altsetting }
}

fn build_config(config: &ConfigInfo) -> UsbConfigDescriptor {
    let d = &config.descriptor;
    let interfaces: Vec<UsbInterface> = config.interfaces.iter().map(|alts| build_interface(alts)).collect();
    let interface = if interfaces.is_empty() {
        ptr::null_mut()
    } else {
        Box::into_raw(interfaces.into_boxed_slice()) as *mut UsbInterface
    };
    UsbConfigDescriptor {
        b_length: d.b_length,
        b_descriptor_type: d.b_descriptor_type,
        w_total_length: d.w_total_length,
        b_num_interfaces: d.b_num_interfaces,
        b_configuration_value: d.b_configuration_value,
        i_configuration: d.i_configuration,
        bm_attributes: d.bm_attributes,
        max_power: d.max_power,
        interface,
        extra: ptr::null_mut(),
        extralen: 0,
    }
}

fn build_device(dev: &Device, owning_bus: *mut UsbBus, prev: *mut UsbDevice) -> Box<UsbDevice> {
    let configs: Vec<UsbConfigDescriptor> = dev.configs.iter().map(build_config).collect();
    let config = if configs.is_empty() {
        ptr::null_mut()
    } else {
        Box::into_raw(configs.into_boxed_slice()) as *mut UsbConfigDescriptor
    };
    let mut node = Box::new(UsbDevice {
        next: ptr::null_mut(),
        prev,
        filename: [0; PATH_MAX + 1],
        bus: owning_bus,
        descriptor: dev.descriptor,
        config,
        dev: ptr::null_mut(),
        devnum: dev.devnum as u8,
        num_children: 0,
        children: ptr::null_mut(),
    });
    copy_cstr(&mut node.filename, &dev.filename);
    node
}

fn build_bus(bus: &Bus, prev: *mut UsbBus) -> Box<UsbBus> {
    let mut node = Box::new(UsbBus {
        next: ptr::null_mut(),
        prev,
        dirname: [0; PATH_MAX + 1],
        location: bus.location,
        devices: ptr::null_mut(),
    });
    copy_cstr(&mut node.dirname, &bus.dirname);

    let bus_ptr: *mut UsbBus = node.as_mut();
    let mut head: *mut UsbDevice = ptr::null_mut();
    let mut tail: *mut UsbDevice = ptr::null_mut();
    for dev in &bus.devices {
        let raw = Box::into_raw(build_device(dev, bus_ptr, tail));
        if head.is_null() {
            head = raw;
        } else {
            unsafe { (*tail).next = raw };
        }
        tail = raw;
    }
    node.devices = head;
    node
}

/// Allocate a fresh doubly-linked `usb_bus` list from `arena`, mirroring
/// `usb_get_busses()`'s contract that the returned pointer is valid until
/// the next `find_devices`/`find_busses` pass. Returns null for an empty
/// tree, matching the wrapped library's own behaviour before any bus has
/// been found.
pub fn build_tree(arena: &BusArena) -> *mut UsbBus {
    let mut head: *mut UsbBus = ptr::null_mut();
    let mut tail: *mut UsbBus = ptr::null_mut();
    for bus in &arena.busses {
        let raw = Box::into_raw(build_bus(bus, tail));
        if head.is_null() {
            head = raw;
        } else {
            unsafe { (*tail).next = raw };
        }
        tail = raw;
    }
    head
}

/// Free every node a prior [`build_tree`] call allocated, following the
/// same traversal `deinit_hostfd()` in the original client wrapper used.
///
/// # Safety
/// `head` must be null or a pointer returned by [`build_tree`] that has not
/// already been freed.
pub unsafe fn free_tree(head: *mut UsbBus) {
    let mut bus = head;
    while !bus.is_null() {
        let next_bus = (*bus).next;
        let mut dev = (*bus).devices;
        while !dev.is_null() {
            let next_dev = (*dev).next;
            free_device(dev);
            dev = next_dev;
        }
        drop(Box::from_raw(bus));
        bus = next_bus;
    }
}

unsafe fn free_device(dev: *mut UsbDevice) {
    let num_configs = (*dev).descriptor.b_num_configurations as usize;
    if !(*dev).config.is_null() {
        let configs = Vec::from_raw_parts((*dev).config, num_configs, num_configs);
        for cfg in configs {
            free_config(cfg);
        }
    }
    drop(Box::from_raw(dev));
}

unsafe fn free_config(cfg: UsbConfigDescriptor) {
    let num_ifaces = cfg.b_num_interfaces as usize;
    if !cfg.interface.is_null() {
        let ifaces = Vec::from_raw_parts(cfg.interface, num_ifaces, num_ifaces);
        for iface in ifaces {
            free_interface(iface);
        }
    }
}

unsafe fn free_interface(iface: UsbInterface) {
    let num_alt = iface.num_altsetting as usize;
    if iface.altsetting.is_null() {
        return;
    }
    let altsettings = Vec::from_raw_parts(iface.altsetting, num_alt, num_alt);
    for alt in altsettings {
        let num_ep = alt.b_num_endpoints as usize;
        if !alt.endpoint.is_null() {
            drop(Vec::from_raw_parts(alt.endpoint, num_ep, num_ep));
        }
        if !alt.extra.is_null() && alt.extralen > 0 {
            drop(Vec::from_raw_parts(alt.extra, alt.extralen as usize, alt.extralen as usize));
        }
    }
}

/// `MAXINTERFACES`, carried over from `usb.h` for host code that sizes its
/// own interface arrays against it; unused inside this crate.
pub const _MAXINTERFACES: usize = MAXINTERFACES;

#[cfg(test)]
mod tests {
    use super::*;
    use usbnet_abi::{BusInfo, DeviceDescriptor, DeviceInfo};

    fn one_bus_one_device() -> BusArena {
        let mut arena = BusArena::new();
        arena.reconcile(vec![BusInfo {
            dirname: "001".into(),
            location: 1,
            devices: vec![DeviceInfo {
                filename: "002".into(),
                devnum: 2,
                descriptor: DeviceDescriptor { b_num_configurations: 0, ..Default::default() },
                configs: Vec::new(),
            }],
        }]);
        arena
    }

    #[test]
    fn empty_arena_builds_a_null_tree() {
        let arena = BusArena::new();
        let tree = build_tree(&arena);
        assert!(tree.is_null());
    }

    #[test]
    fn builds_and_frees_a_one_bus_one_device_tree() {
        let arena = one_bus_one_device();
        let tree = build_tree(&arena);
        assert!(!tree.is_null());
        unsafe {
            assert_eq!((*tree).location, 1);
            assert!(!(*tree).devices.is_null());
            assert_eq!((*(*tree).devices).devnum, 2);
            assert!((*tree).next.is_null());
            free_tree(tree);
        }
    }

    #[test]
    fn each_build_is_an_independent_allocation() {
        let arena = one_bus_one_device();
        let first = build_tree(&arena);
        let second = build_tree(&arena);
        assert_ne!(first, second);
        unsafe {
            free_tree(first);
            free_tree(second);
        }
    }
}
