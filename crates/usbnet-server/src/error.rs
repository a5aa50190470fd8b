// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

use std::fmt;
use std::io;

use usbnet_transport::TransportError;
use usbnet_wire::WireError;

#[derive(Debug)]
pub enum ServerError {
    Io(io::Error),
    Wire(WireError),
    Transport(TransportError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ServerError::Io(e) => write!(f, "io error: {}", e),
            ServerError::Wire(e) => write!(f, "wire error: {}", e),
            ServerError::Transport(e) => write!(f, "transport error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Io(e) => Some(e),
            ServerError::Wire(e) => Some(e),
            ServerError::Transport(e) => Some(e),
        }
    }
}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        ServerError::Io(e)
    }
}

impl From<WireError> for ServerError {
    fn from(e: WireError) -> Self {
        ServerError::Wire(e)
    }
}

impl From<TransportError> for ServerError {
    fn from(e: TransportError) -> Self {
        ServerError::Transport(e)
    }
}
