// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

use std::error;
use std::fmt;
use std::io;

use usbnet_wire::WireError;

/// Errors produced while sending or receiving a framed message (C3).
#[derive(Debug)]
pub enum TransportError {
    /// The underlying socket returned a non-recoverable error.
    Io(io::Error),
    /// A full frame could not be read (short read, peer hung up mid-frame).
    Truncated,
    /// The frame's length field or integer encoding was malformed.
    Wire(WireError),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransportError::Io(e) => write!(f, "transport IO error: {}", e),
            TransportError::Truncated => write!(f, "truncated frame"),
            TransportError::Wire(e) => write!(f, "malformed frame: {}", e),
        }
    }
}

impl error::Error for TransportError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            TransportError::Truncated
        } else {
            TransportError::Io(e)
        }
    }
}

impl From<WireError> for TransportError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Truncated => TransportError::Truncated,
            other => TransportError::Wire(other),
        }
    }
}
