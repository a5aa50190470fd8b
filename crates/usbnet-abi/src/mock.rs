// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! An in-memory fake bus topology implementing [`UsbBackend`], standing in
//! for the wrapped USB library in tests and the end-to-end scenarios.

use std::collections::HashMap;

use crate::backend::UsbBackend;
use crate::descriptors::{
    AltSetting, BusInfo, ConfigDescriptor, ConfigInfo, DeviceDescriptor, DeviceInfo,
    EndpointDescriptor, InterfaceDescriptor,
};

/// One simulated open handle: which device it refers to, and the
/// interface it has claimed (if any).
#[derive(Debug, Clone, Default)]
struct OpenHandle {
    bus_location: u32,
    devnum: u32,
    claimed_interface: Option<i32>,
    configuration: i32,
}

/// A fake bus/device tree plus the bookkeeping needed to answer every
/// [`UsbBackend`] call the same way a real device would.
pub struct MockBackend {
    busses: Vec<BusInfo>,
    handles: HashMap<i32, OpenHandle>,
    next_handle: i32,
}

impl Default for MockBackend {
    fn default() -> Self {
        MockBackend::new()
    }
}

impl MockBackend {
    pub fn new() -> MockBackend {
        MockBackend {
            busses: Vec::new(),
            handles: HashMap::new(),
            next_handle: 3, // fds 0-2 are stdio; stay out of their way
        }
    }

    /// Build a single-bus, single-device topology: one bulk IN/OUT pair
    /// and one interrupt IN endpoint on interface 0, alt setting 0.
    pub fn with_one_device(bus_location: u32, devnum: u32, id_vendor: u16, id_product: u16) -> MockBackend {
        let mut b = MockBackend::new();
        b.add_device(bus_location, devnum, id_vendor, id_product);
        b
    }

    pub fn add_device(&mut self, bus_location: u32, devnum: u32, id_vendor: u16, id_product: u16) {
        let alt = AltSetting {
            descriptor: InterfaceDescriptor {
                b_length: InterfaceDescriptor::WIRE_LEN as u8,
                b_descriptor_type: 0x04,
                b_interface_number: 0,
                b_alternate_setting: 0,
                b_num_endpoints: 3,
                b_interface_class: 0xFF,
                b_interface_sub_class: 0,
                b_interface_protocol: 0,
                i_interface: 0,
            },
            endpoints: vec![
                EndpointDescriptor {
                    b_length: EndpointDescriptor::WIRE_LEN as u8,
                    b_descriptor_type: 0x05,
                    b_endpoint_address: 0x81,
                    bm_attributes: 0x02,
                    w_max_packet_size: 512,
                    b_interval: 0,
                },
                EndpointDescriptor {
                    b_length: EndpointDescriptor::WIRE_LEN as u8,
                    b_descriptor_type: 0x05,
                    b_endpoint_address: 0x02,
                    bm_attributes: 0x02,
                    w_max_packet_size: 512,
                    b_interval: 0,
                },
                EndpointDescriptor {
                    b_length: EndpointDescriptor::WIRE_LEN as u8,
                    b_descriptor_type: 0x05,
                    b_endpoint_address: 0x83,
                    bm_attributes: 0x03,
                    w_max_packet_size: 8,
                    b_interval: 10,
                },
            ],
            extra: Vec::new(),
        };
        let config = ConfigInfo {
            descriptor: ConfigDescriptor {
                b_length: ConfigDescriptor::WIRE_LEN as u8,
                b_descriptor_type: 0x02,
                w_total_length: 0,
                b_num_interfaces: 1,
                b_configuration_value: 1,
                i_configuration: 0,
                bm_attributes: 0x80,
                max_power: 50,
            },
            interfaces: vec![vec![alt]],
        };
        let device = DeviceInfo {
            filename: format!("{:03}", devnum),
            devnum,
            descriptor: DeviceDescriptor {
                b_length: DeviceDescriptor::WIRE_LEN as u8,
                b_descriptor_type: 0x01,
                bcd_usb: 0x0110,
                b_device_class: 0,
                b_device_sub_class: 0,
                b_device_protocol: 0,
                b_max_packet_size0: 64,
                id_vendor,
                id_product,
                bcd_device: 0x0100,
                i_manufacturer: 0,
                i_product: 0,
                i_serial_number: 0,
                b_num_configurations: 1,
            },
            configs: vec![config],
        };

        if let Some(bus) = self.busses.iter_mut().find(|b| b.location == bus_location) {
            bus.devices.push(device);
        } else {
            self.busses.push(BusInfo {
                dirname: format!("{:03}", bus_location),
                location: bus_location,
                devices: vec![device],
            });
        }
    }

    fn find(&self, bus_location: u32, devnum: u32) -> Option<&DeviceInfo> {
        self.busses
            .iter()
            .find(|b| b.location == bus_location)?
            .devices
            .iter()
            .find(|d| d.devnum == devnum)
    }
}

const ENOENT: i32 = -2;
const EBADF: i32 = -9;

impl UsbBackend for MockBackend {
    fn init(&mut self) {}

    fn find_busses(&mut self) -> i32 {
        self.busses.len() as i32
    }

    fn find_devices(&mut self) -> (i32, Vec<BusInfo>) {
        let count: usize = self.busses.iter().map(|b| b.devices.len()).sum();
        (count as i32, self.busses.clone())
    }

    fn open(&mut self, bus_location: u32, devnum: u32) -> i32 {
        if self.find(bus_location, devnum).is_none() {
            return ENOENT;
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(
            handle,
            OpenHandle {
                bus_location,
                devnum,
                claimed_interface: None,
                configuration: 1,
            },
        );
        handle
    }

    fn close(&mut self, handle: i32) -> i32 {
        match self.handles.remove(&handle) {
            Some(_) => 0,
            None => EBADF,
        }
    }

    fn control_msg(
        &mut self,
        handle: i32,
        _request_type: i32,
        _request: i32,
        _value: i32,
        _index: i32,
        buf: &[u8],
        _timeout_ms: i32,
    ) -> (i32, Vec<u8>) {
        if !self.handles.contains_key(&handle) {
            return (EBADF, Vec::new());
        }
        (buf.len() as i32, buf.to_vec())
    }

    fn claim_interface(&mut self, handle: i32, interface: i32) -> i32 {
        match self.handles.get_mut(&handle) {
            Some(h) => {
                h.claimed_interface = Some(interface);
                0
            }
            None => EBADF,
        }
    }

    fn release_interface(&mut self, handle: i32, _interface: i32) -> i32 {
        match self.handles.get_mut(&handle) {
            Some(h) => {
                h.claimed_interface = None;
                0
            }
            None => EBADF,
        }
    }

    fn get_kernel_driver(&mut self, handle: i32, _interface: i32, buf_len: u32) -> (i32, Vec<u8>) {
        if !self.handles.contains_key(&handle) {
            return (EBADF, Vec::new());
        }
        // No kernel driver bound in the simulated topology.
        (-1, vec![0u8; buf_len.min(1) as usize])
    }

    fn detach_kernel_driver(&mut self, handle: i32, _interface: i32) -> i32 {
        if !self.handles.contains_key(&handle) {
            return EBADF;
        }
        -1
    }

    fn bulk_read(&mut self, handle: i32, _endpoint: i32, size: i32, _timeout_ms: i32) -> (i32, Vec<u8>) {
        if !self.handles.contains_key(&handle) {
            return (EBADF, Vec::new());
        }
        let size = size.max(0) as usize;
        (size as i32, vec![0xAAu8; size])
    }

    fn bulk_write(&mut self, handle: i32, _endpoint: i32, data: &[u8], _timeout_ms: i32) -> i32 {
        if !self.handles.contains_key(&handle) {
            return EBADF;
        }
        data.len() as i32
    }

    fn set_configuration(&mut self, handle: i32, configuration: i32) -> i32 {
        match self.handles.get_mut(&handle) {
            Some(h) => {
                h.configuration = configuration;
                0
            }
            None => EBADF,
        }
    }

    fn set_alt_interface(&mut self, handle: i32, _alternate: i32) -> i32 {
        if !self.handles.contains_key(&handle) {
            return EBADF;
        }
        0
    }

    fn reset_ep(&mut self, handle: i32, _endpoint: u32) -> i32 {
        if !self.handles.contains_key(&handle) {
            return EBADF;
        }
        0
    }

    fn clear_halt(&mut self, handle: i32, _endpoint: u32) -> i32 {
        if !self.handles.contains_key(&handle) {
            return EBADF;
        }
        0
    }

    fn reset(&mut self, handle: i32) -> i32 {
        if !self.handles.contains_key(&handle) {
            return EBADF;
        }
        0
    }

    fn interrupt_read(&mut self, handle: i32, endpoint: i32, size: i32, timeout_ms: i32) -> (i32, Vec<u8>) {
        self.bulk_read(handle, endpoint, size, timeout_ms)
    }

    fn interrupt_write(&mut self, handle: i32, endpoint: i32, data: &[u8], timeout_ms: i32) -> i32 {
        self.bulk_write(handle, endpoint, data, timeout_ms)
    }
}
