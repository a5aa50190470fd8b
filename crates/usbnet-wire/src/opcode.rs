// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! The RPC opcode catalog. Every call is one request frame then one reply
//! frame carrying the same opcode byte.

use crate::tag::Tag;

/// Base opcode value; every call's opcode is `CALL_BASE + N`.
pub const CALL_BASE: u8 = Tag::Call as u8;

/// One request/reply pair of the wrapped USB library's remote API.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Init = CALL_BASE + 1,
    FindBusses = CALL_BASE + 2,
    FindDevices = CALL_BASE + 3,
    Open = CALL_BASE + 5,
    Close = CALL_BASE + 6,
    ControlMsg = CALL_BASE + 7,
    ClaimInterface = CALL_BASE + 8,
    ReleaseInterface = CALL_BASE + 9,
    GetKernelDriver = CALL_BASE + 10,
    DetachKernelDriver = CALL_BASE + 11,
    BulkRead = CALL_BASE + 12,
    BulkWrite = CALL_BASE + 13,
    SetConfiguration = CALL_BASE + 14,
    SetAltInterface = CALL_BASE + 15,
    ResetEp = CALL_BASE + 16,
    ClearHalt = CALL_BASE + 17,
    Reset = CALL_BASE + 18,
    InterruptRead = CALL_BASE + 19,
    InterruptWrite = CALL_BASE + 20,
}

impl Opcode {
    /// Decode a raw opcode byte. Returns `None` for an unknown opcode; the
    /// dispatcher logs and drops these without a reply (spec §4.6).
    pub fn from_byte(b: u8) -> Option<Opcode> {
        Some(match b {
            x if x == Opcode::Init as u8 => Opcode::Init,
            x if x == Opcode::FindBusses as u8 => Opcode::FindBusses,
            x if x == Opcode::FindDevices as u8 => Opcode::FindDevices,
            x if x == Opcode::Open as u8 => Opcode::Open,
            x if x == Opcode::Close as u8 => Opcode::Close,
            x if x == Opcode::ControlMsg as u8 => Opcode::ControlMsg,
            x if x == Opcode::ClaimInterface as u8 => Opcode::ClaimInterface,
            x if x == Opcode::ReleaseInterface as u8 => Opcode::ReleaseInterface,
            x if x == Opcode::GetKernelDriver as u8 => Opcode::GetKernelDriver,
            x if x == Opcode::DetachKernelDriver as u8 => Opcode::DetachKernelDriver,
            x if x == Opcode::BulkRead as u8 => Opcode::BulkRead,
            x if x == Opcode::BulkWrite as u8 => Opcode::BulkWrite,
            x if x == Opcode::SetConfiguration as u8 => Opcode::SetConfiguration,
            x if x == Opcode::SetAltInterface as u8 => Opcode::SetAltInterface,
            x if x == Opcode::ResetEp as u8 => Opcode::ResetEp,
            x if x == Opcode::ClearHalt as u8 => Opcode::ClearHalt,
            x if x == Opcode::Reset as u8 => Opcode::Reset,
            x if x == Opcode::InterruptRead as u8 => Opcode::InterruptRead,
            x if x == Opcode::InterruptWrite as u8 => Opcode::InterruptWrite,
            _ => return None,
        })
    }

    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_opcode_round_trips() {
        let all = [
            Opcode::Init,
            Opcode::FindBusses,
            Opcode::FindDevices,
            Opcode::Open,
            Opcode::Close,
            Opcode::ControlMsg,
            Opcode::ClaimInterface,
            Opcode::ReleaseInterface,
            Opcode::GetKernelDriver,
            Opcode::DetachKernelDriver,
            Opcode::BulkRead,
            Opcode::BulkWrite,
            Opcode::SetConfiguration,
            Opcode::SetAltInterface,
            Opcode::ResetEp,
            Opcode::ClearHalt,
            Opcode::Reset,
            Opcode::InterruptRead,
            Opcode::InterruptWrite,
        ];
        for op in all {
            assert_eq!(Opcode::from_byte(op.as_byte()), Some(op));
        }
    }

    #[test]
    fn unknown_opcode_is_none() {
        assert_eq!(Opcode::from_byte(CALL_BASE + 99), None);
    }
}
