// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

use std::fmt;
use std::io;

use usbnet_handoff::HandoffError;

/// Errors the client wrapper (C4 parent side) can raise while setting up a
/// proxied session. All of these are setup failures per spec §6's CLI
/// contract: "connection or setup failure exits with a non-zero code."
#[derive(Debug)]
pub enum ClientError {
    /// `host[:port]` or `user@host[:port]` could not be parsed.
    InvalidTarget(String),
    /// The SSH tunnel process could not be spawned.
    TunnelSpawn(io::Error),
    /// The TCP connection (direct or through the tunnel) failed.
    Connect(io::Error),
    /// The session hand-off region could not be published.
    Handoff(HandoffError),
    /// The trailing command vector was empty.
    NoCommand,
    /// The target command could not be spawned.
    Spawn(io::Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClientError::InvalidTarget(s) => write!(f, "invalid target '{}': expected host[:port]", s),
            ClientError::TunnelSpawn(e) => write!(f, "failed to spawn SSH tunnel: {}", e),
            ClientError::Connect(e) => write!(f, "connection failed: {}", e),
            ClientError::Handoff(e) => write!(f, "session hand-off failed: {}", e),
            ClientError::NoCommand => write!(f, "no command given to execute"),
            ClientError::Spawn(e) => write!(f, "failed to execute target command: {}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::TunnelSpawn(e) | ClientError::Connect(e) | ClientError::Spawn(e) => Some(e),
            ClientError::Handoff(e) => Some(e),
            ClientError::InvalidTarget(_) | ClientError::NoCommand => None,
        }
    }
}

impl From<HandoffError> for ClientError {
    fn from(e: HandoffError) -> Self {
        ClientError::Handoff(e)
    }
}
