// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! `repr(C)` mirror of the wrapped USB library's descriptor structs.
//!
//! Field names and widths follow the classic libusb-0.1 `usb.h` layout
//! referenced throughout `original_source` (`src/usbnet.h`,
//! `src/proto/protobase.h`): the contract spec.md §1 calls "taken as
//! given". These are plain data holders — byte-order swapping for the
//! wire happens in `usbnet-server`/`usbnet-shim`, not here, since whether a
//! given instance is host-order or network-order depends on which side of
//! the RPC boundary is holding it.

/// USB device descriptor (18 bytes on the wire).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[repr(C)]
pub struct DeviceDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub bcd_usb: u16,
    pub b_device_class: u8,
    pub b_device_sub_class: u8,
    pub b_device_protocol: u8,
    pub b_max_packet_size0: u8,
    pub id_vendor: u16,
    pub id_product: u16,
    pub bcd_device: u16,
    pub i_manufacturer: u8,
    pub i_product: u8,
    pub i_serial_number: u8,
    pub b_num_configurations: u8,
}

/// USB configuration descriptor (9 bytes on the wire, `extra` excluded).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub w_total_length: u16,
    pub b_num_interfaces: u8,
    pub b_configuration_value: u8,
    pub i_configuration: u8,
    pub bm_attributes: u8,
    pub max_power: u8,
}

/// USB interface descriptor — one alternate setting (9 bytes on the wire).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub b_interface_number: u8,
    pub b_alternate_setting: u8,
    pub b_num_endpoints: u8,
    pub b_interface_class: u8,
    pub b_interface_sub_class: u8,
    pub b_interface_protocol: u8,
    pub i_interface: u8,
}

/// USB endpoint descriptor (7 bytes on the wire).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[repr(C)]
pub struct EndpointDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub b_endpoint_address: u8,
    pub bm_attributes: u8,
    pub w_max_packet_size: u16,
    pub b_interval: u8,
}

impl DeviceDescriptor {
    pub const WIRE_LEN: usize = 18;

    /// Encode in the byte order `swap_multibyte` selects: `true` swaps the
    /// 16-bit fields (network order for the wire), `false` leaves them in
    /// host order (raw in-memory layout the client tree exposes to host
    /// code).
    pub fn to_bytes(&self, swap_multibyte: bool) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0] = self.b_length;
        out[1] = self.b_descriptor_type;
        write_u16(&mut out[2..4], self.bcd_usb, swap_multibyte);
        out[4] = self.b_device_class;
        out[5] = self.b_device_sub_class;
        out[6] = self.b_device_protocol;
        out[7] = self.b_max_packet_size0;
        write_u16(&mut out[8..10], self.id_vendor, swap_multibyte);
        write_u16(&mut out[10..12], self.id_product, swap_multibyte);
        write_u16(&mut out[12..14], self.bcd_device, swap_multibyte);
        out[14] = self.i_manufacturer;
        out[15] = self.i_product;
        out[16] = self.i_serial_number;
        out[17] = self.b_num_configurations;
        out
    }

    pub fn from_bytes(b: &[u8], swap_multibyte: bool) -> Option<DeviceDescriptor> {
        if b.len() < Self::WIRE_LEN {
            return None;
        }
        Some(DeviceDescriptor {
            b_length: b[0],
            b_descriptor_type: b[1],
            bcd_usb: read_u16(&b[2..4], swap_multibyte),
            b_device_class: b[4],
            b_device_sub_class: b[5],
            b_device_protocol: b[6],
            b_max_packet_size0: b[7],
            id_vendor: read_u16(&b[8..10], swap_multibyte),
            id_product: read_u16(&b[10..12], swap_multibyte),
            bcd_device: read_u16(&b[12..14], swap_multibyte),
            i_manufacturer: b[14],
            i_product: b[15],
            i_serial_number: b[16],
            b_num_configurations: b[17],
        })
    }
}

impl ConfigDescriptor {
    pub const WIRE_LEN: usize = 9;

    pub fn to_bytes(&self, swap_multibyte: bool) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0] = self.b_length;
        out[1] = self.b_descriptor_type;
        write_u16(&mut out[2..4], self.w_total_length, swap_multibyte);
        out[4] = self.b_num_interfaces;
        out[5] = self.b_configuration_value;
        out[6] = self.i_configuration;
        out[7] = self.bm_attributes;
        out[8] = self.max_power;
        out
    }

    pub fn from_bytes(b: &[u8], swap_multibyte: bool) -> Option<ConfigDescriptor> {
        if b.len() < Self::WIRE_LEN {
            return None;
        }
        Some(ConfigDescriptor {
            b_length: b[0],
            b_descriptor_type: b[1],
            w_total_length: read_u16(&b[2..4], swap_multibyte),
            b_num_interfaces: b[4],
            b_configuration_value: b[5],
            i_configuration: b[6],
            bm_attributes: b[7],
            max_power: b[8],
        })
    }
}

impl InterfaceDescriptor {
    pub const WIRE_LEN: usize = 9;

    pub fn to_bytes(&self) -> [u8; Self::WIRE_LEN] {
        [
            self.b_length,
            self.b_descriptor_type,
            self.b_interface_number,
            self.b_alternate_setting,
            self.b_num_endpoints,
            self.b_interface_class,
            self.b_interface_sub_class,
            self.b_interface_protocol,
            self.i_interface,
        ]
    }

    pub fn from_bytes(b: &[u8]) -> Option<InterfaceDescriptor> {
        if b.len() < Self::WIRE_LEN {
            return None;
        }
        Some(InterfaceDescriptor {
            b_length: b[0],
            b_descriptor_type: b[1],
            b_interface_number: b[2],
            b_alternate_setting: b[3],
            b_num_endpoints: b[4],
            b_interface_class: b[5],
            b_interface_sub_class: b[6],
            b_interface_protocol: b[7],
            i_interface: b[8],
        })
    }
}

impl EndpointDescriptor {
    pub const WIRE_LEN: usize = 7;

    pub fn to_bytes(&self, swap_multibyte: bool) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0] = self.b_length;
        out[1] = self.b_descriptor_type;
        out[2] = self.b_endpoint_address;
        out[3] = self.bm_attributes;
        write_u16(&mut out[4..6], self.w_max_packet_size, swap_multibyte);
        out[6] = self.b_interval;
        out
    }

    pub fn from_bytes(b: &[u8], swap_multibyte: bool) -> Option<EndpointDescriptor> {
        if b.len() < Self::WIRE_LEN {
            return None;
        }
        Some(EndpointDescriptor {
            b_length: b[0],
            b_descriptor_type: b[1],
            b_endpoint_address: b[2],
            bm_attributes: b[3],
            w_max_packet_size: read_u16(&b[4..6], swap_multibyte),
            b_interval: b[6],
        })
    }
}

fn write_u16(out: &mut [u8], v: u16, swap: bool) {
    let bytes = if swap { v.swap_bytes().to_ne_bytes() } else { v.to_ne_bytes() };
    out.copy_from_slice(&bytes);
}

fn read_u16(b: &[u8], swap: bool) -> u16 {
    let v = u16::from_ne_bytes([b[0], b[1]]);
    if swap {
        v.swap_bytes()
    } else {
        v
    }
}

/// One alternate setting: its descriptor, endpoints, and any trailing
/// class/vendor-specific extra descriptor bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AltSetting {
    pub descriptor: InterfaceDescriptor,
    pub endpoints: Vec<EndpointDescriptor>,
    pub extra: Vec<u8>,
}

/// One configuration: its descriptor and, per interface number, the list
/// of alternate settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigInfo {
    pub descriptor: ConfigDescriptor,
    pub interfaces: Vec<Vec<AltSetting>>,
}

/// One device as enumerated by `find_devices`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub filename: String,
    pub devnum: u32,
    pub descriptor: DeviceDescriptor,
    pub configs: Vec<ConfigInfo>,
}

/// One bus as enumerated by `find_devices`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusInfo {
    pub dirname: String,
    pub location: u32,
    pub devices: Vec<DeviceInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_descriptor_round_trips_through_swapped_bytes() {
        let d = DeviceDescriptor {
            b_length: 18,
            b_descriptor_type: 1,
            bcd_usb: 0x0110,
            b_device_class: 0,
            b_device_sub_class: 0,
            b_device_protocol: 0,
            b_max_packet_size0: 64,
            id_vendor: 0x1234,
            id_product: 0x5678,
            bcd_device: 0x0100,
            i_manufacturer: 1,
            i_product: 2,
            i_serial_number: 0,
            b_num_configurations: 1,
        };
        let wire = d.to_bytes(true);
        let back = DeviceDescriptor::from_bytes(&wire, true).unwrap();
        assert_eq!(d, back);
    }
}
