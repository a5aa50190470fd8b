use usbnet_wire::{opcode::Opcode, packet::Packet, tag::Tag};

#[test]
fn find_busses_reply_round_trips_through_the_wire() {
    let mut pkt = Packet::new(Opcode::FindBusses.as_byte());
    pkt.append_integer(Tag::Integer, 4, 0).unwrap();

    let mut it = pkt.iter();
    assert!(it.advance().unwrap());
    assert_eq!(it.tag(), Tag::Integer);
    assert_eq!(it.as_int(true).unwrap(), 0);
    assert!(!it.advance().unwrap());
}

#[test]
fn enumerate_one_bus_one_device() {
    // Mirrors the end-to-end scenario of one bus "001" at location 1
    // holding one device "001" devnum 2 with zero interfaces.
    let mut pkt = Packet::new(Opcode::FindDevices.as_byte());
    pkt.append_integer(Tag::Integer, 4, 1).unwrap();

    let bus = pkt.begin_container(Tag::Structure);
    pkt.append_string("001").unwrap();
    pkt.append_integer(Tag::UnsignedInt, 4, 1).unwrap();

    let dev = pkt.begin_container(Tag::Sequence);
    pkt.append_string("001").unwrap();
    pkt.append_integer(Tag::UnsignedInt, 4, 2).unwrap();
    pkt.append_tlv(Tag::Raw, &[0u8; 18]).unwrap();
    pkt.finalize_container(dev).unwrap();
    pkt.finalize_container(bus).unwrap();

    let mut it = pkt.iter();
    assert!(it.advance().unwrap());
    assert_eq!(it.as_int(true).unwrap(), 1);

    assert!(it.advance().unwrap());
    assert_eq!(it.tag(), Tag::Structure);
    let mut bus_it = it.enter();

    assert!(bus_it.advance().unwrap());
    assert_eq!(bus_it.as_str().unwrap(), "001");
    assert!(bus_it.advance().unwrap());
    assert_eq!(bus_it.as_uint().unwrap(), 1);

    assert!(bus_it.advance().unwrap());
    assert_eq!(bus_it.tag(), Tag::Sequence);
    let mut dev_it = bus_it.enter();
    assert!(dev_it.advance().unwrap());
    assert_eq!(dev_it.as_str().unwrap(), "001");
    assert!(dev_it.advance().unwrap());
    assert_eq!(dev_it.as_uint().unwrap(), 2);
    assert!(dev_it.advance().unwrap());
    assert_eq!(dev_it.tag(), Tag::Raw);
    assert_eq!(dev_it.len(), 18);
}

#[test]
fn unknown_opcode_byte_does_not_parse_as_a_catalog_entry() {
    assert_eq!(Opcode::from_byte(opcode_base_plus_99()), None);
}

fn opcode_base_plus_99() -> u8 {
    usbnet_wire::opcode::CALL_BASE + 99
}
