// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

use std::fmt;

use usbnet_handoff::HandoffError;
use usbnet_transport::TransportError;
use usbnet_wire::WireError;

/// Errors the client stub runtime (C5) can raise. Every variant maps to a
/// negative library-error return at the FFI boundary (spec §7); none of
/// them are recoverable by retry inside the stub itself.
#[derive(Debug)]
pub enum ShimError {
    /// The socket failed, or the frame on it was malformed.
    Transport(TransportError),
    /// The reply carried a different opcode than the request.
    ProtocolMismatch { expected: u8, found: u8 },
    /// The session hand-off channel (C4) could not produce a usable
    /// descriptor, or the cached one failed its peer-name check.
    Handoff(HandoffError),
}

impl fmt::Display for ShimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ShimError::Transport(e) => write!(f, "transport error: {}", e),
            ShimError::ProtocolMismatch { expected, found } => {
                write!(f, "reply opcode {:#x} did not match request opcode {:#x}", found, expected)
            }
            ShimError::Handoff(e) => write!(f, "session hand-off error: {}", e),
        }
    }
}

impl std::error::Error for ShimError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShimError::Transport(e) => Some(e),
            ShimError::Handoff(e) => Some(e),
            ShimError::ProtocolMismatch { .. } => None,
        }
    }
}

impl From<TransportError> for ShimError {
    fn from(e: TransportError) -> Self {
        ShimError::Transport(e)
    }
}

impl From<WireError> for ShimError {
    fn from(e: WireError) -> Self {
        ShimError::Transport(TransportError::from(e))
    }
}

impl From<HandoffError> for ShimError {
    fn from(e: HandoffError) -> Self {
        ShimError::Handoff(e)
    }
}
