// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Per-session state: one accepted TCP connection, its open-handle
//! registry, and its place in the state machine from spec §4.6
//! (Listening-for-frame / Dispatching / Closed).

use mio::net::TcpStream;

use crate::registry::HandleRegistry;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    ListeningForFrame,
    Dispatching,
    Closed,
}

pub struct Session {
    pub stream: TcpStream,
    pub registry: HandleRegistry,
    pub state: SessionState,
}

impl Session {
    pub fn new(stream: TcpStream) -> Session {
        let _ = usbnet_transport::disable_nagle_fd(raw_fd(&stream));
        Session {
            stream,
            registry: HandleRegistry::new(),
            state: SessionState::ListeningForFrame,
        }
    }
}

#[cfg(unix)]
fn raw_fd(stream: &TcpStream) -> std::os::unix::io::RawFd {
    use std::os::unix::io::AsRawFd;
    stream.as_raw_fd()
}
