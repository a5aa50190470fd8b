// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! The virtual bus tree: the client-side reconstruction of the server's
//! bus/device topology (spec §3, §4.5).
//!
//! Buses and devices are boxed so their addresses stay stable across a
//! reconciliation pass that only mutates in place — this is what the
//! Design Notes (spec §9) mean by "an owning container for children plus
//! a non-owning handle for the back-reference": `Device::bus` is an index
//! into the arena's bus vector, never an owning or aliasing pointer.
//! Configs/interfaces/alt-settings/endpoints are *not* reconciled by
//! position — spec §4.5 only calls out bus and device nodes for
//! position-matched reuse; everything below a device is simply
//! reallocated in full on every pass, matching "arrays are allocated to
//! exactly the declared counts".

use usbnet_abi::{BusInfo, ConfigInfo, DeviceDescriptor};

/// One device in the virtual tree. `bus` is the owning bus's index in
/// [`BusArena::busses`], not a pointer — see the module doc.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub bus: usize,
    pub filename: String,
    pub devnum: u32,
    pub descriptor: DeviceDescriptor,
    pub configs: Vec<ConfigInfo>,
}

/// One bus in the virtual tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bus {
    pub dirname: String,
    pub location: u32,
    pub devices: Vec<Box<Device>>,
}

/// The full virtual bus tree, rebuilt by [`BusArena::reconcile`] on every
/// `FindDevices` reply.
#[derive(Debug, Default)]
pub struct BusArena {
    pub busses: Vec<Box<Bus>>,
}

impl BusArena {
    pub fn new() -> BusArena {
        BusArena::default()
    }

    pub fn is_empty(&self) -> bool {
        self.busses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.busses.len()
    }

    /// Reconcile the tree against a freshly decoded bus list, in place.
    ///
    /// Buses and, within each bus, devices are matched by position: an
    /// existing node at index `i` is mutated to the new values; indices
    /// beyond the existing length are appended; existing nodes beyond the
    /// new length are dropped (freed). A matching position whose content
    /// is unchanged stays structurally identical and keeps its own `Box`
    /// allocation — `Box`'s address is the node's identity for the
    /// "reuse/free" properties in spec §8.
    pub fn reconcile(&mut self, incoming: Vec<BusInfo>) {
        let new_len = incoming.len();
        for (i, wire_bus) in incoming.into_iter().enumerate() {
            if i < self.busses.len() {
                Self::reconcile_bus(&mut self.busses[i], i, wire_bus);
            } else {
                self.busses.push(Box::new(Self::new_bus(i, wire_bus)));
            }
        }
        self.busses.truncate(new_len);
    }

    fn new_bus(bus_index: usize, wire: BusInfo) -> Bus {
        Bus {
            dirname: wire.dirname,
            location: wire.location,
            devices: wire
                .devices
                .into_iter()
                .map(|d| {
                    Box::new(Device {
                        bus: bus_index,
                        filename: d.filename,
                        devnum: d.devnum,
                        descriptor: d.descriptor,
                        configs: d.configs,
                    })
                })
                .collect(),
        }
    }

    fn reconcile_bus(slot: &mut Bus, bus_index: usize, wire: BusInfo) {
        slot.dirname = wire.dirname;
        slot.location = wire.location;

        let new_len = wire.devices.len();
        for (j, wire_dev) in wire.devices.into_iter().enumerate() {
            if j < slot.devices.len() {
                let dev = &mut slot.devices[j];
                dev.bus = bus_index;
                dev.filename = wire_dev.filename;
                dev.devnum = wire_dev.devnum;
                dev.descriptor = wire_dev.descriptor;
                dev.configs = wire_dev.configs;
            } else {
                slot.devices.push(Box::new(Device {
                    bus: bus_index,
                    filename: wire_dev.filename,
                    devnum: wire_dev.devnum,
                    descriptor: wire_dev.descriptor,
                    configs: wire_dev.configs,
                }));
            }
        }
        slot.devices.truncate(new_len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usbnet_abi::DeviceInfo;

    fn bus(location: u32, devnums: &[u32]) -> BusInfo {
        BusInfo {
            dirname: format!("{:03}", location),
            location,
            devices: devnums
                .iter()
                .map(|&devnum| DeviceInfo {
                    filename: format!("{:03}", devnum),
                    devnum,
                    descriptor: DeviceDescriptor::default(),
                    configs: Vec::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn identical_replies_produce_structurally_identical_trees() {
        let mut arena = BusArena::new();
        arena.reconcile(vec![bus(1, &[2, 3])]);
        let before: Vec<_> = arena.busses[0].devices.iter().map(|d| (**d).clone()).collect();

        arena.reconcile(vec![bus(1, &[2, 3])]);
        let after: Vec<_> = arena.busses[0].devices.iter().map(|d| (**d).clone()).collect();

        assert_eq!(before, after);
    }

    #[test]
    fn changing_only_devnum_mutates_exactly_that_device_node_in_place() {
        let mut arena = BusArena::new();
        arena.reconcile(vec![bus(1, &[2, 3])]);
        let addr_before: Vec<*const Device> = arena.busses[0].devices.iter().map(|d| d.as_ref() as *const _).collect();

        arena.reconcile(vec![bus(1, &[9, 3])]);
        let addr_after: Vec<*const Device> = arena.busses[0].devices.iter().map(|d| d.as_ref() as *const _).collect();

        // Same boxes reused in place; only the first device's content changed.
        assert_eq!(addr_before, addr_after);
        assert_eq!(arena.busses[0].devices[0].devnum, 9);
        assert_eq!(arena.busses[0].devices[1].devnum, 3);
    }

    #[test]
    fn removing_the_last_device_frees_exactly_one_device_node() {
        let mut arena = BusArena::new();
        arena.reconcile(vec![bus(1, &[2, 3, 4])]);
        assert_eq!(arena.busses[0].devices.len(), 3);

        arena.reconcile(vec![bus(1, &[2, 3])]);
        assert_eq!(arena.busses[0].devices.len(), 2);
        assert_eq!(arena.busses[0].devices[0].devnum, 2);
        assert_eq!(arena.busses[0].devices[1].devnum, 3);
    }

    #[test]
    fn additional_busses_are_appended_and_excess_busses_are_freed() {
        let mut arena = BusArena::new();
        arena.reconcile(vec![bus(1, &[2]), bus(2, &[5])]);
        assert_eq!(arena.len(), 2);

        arena.reconcile(vec![bus(1, &[2])]);
        assert_eq!(arena.len(), 1);

        arena.reconcile(vec![bus(1, &[2]), bus(2, &[5]), bus(3, &[7])]);
        assert_eq!(arena.len(), 3);
        assert_eq!(arena.busses[2].location, 3);
    }

    #[test]
    fn device_bus_back_reference_tracks_its_containing_bus_index() {
        let mut arena = BusArena::new();
        arena.reconcile(vec![bus(1, &[2]), bus(2, &[5])]);
        assert_eq!(arena.busses[0].devices[0].bus, 0);
        assert_eq!(arena.busses[1].devices[0].bus, 1);
    }
}
