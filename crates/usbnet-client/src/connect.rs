// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Establishing the proxied TCP session: a direct connect, or — when an
//! SSH auth token is given — a tunnel spawned first and a connect to the
//! forwarded local port. Mirrors `ClientSocket::connect` in
//! `original_source/src/client/clientsocket.cpp`.

use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use crate::error::ClientError;
use crate::target::{HostAddr, TunnelTarget};
use crate::tunnel::SshTunnel;

/// The established session: the connected socket and, if an SSH tunnel
/// was spawned, its handle — kept alive for the session's lifetime and
/// torn down on drop.
pub struct Session {
    pub stream: TcpStream,
    _tunnel: Option<SshTunnel>,
}

/// Connect to `target`, optionally through an SSH tunnel to `auth`.
/// `connect_timeout` bounds the final TCP connect; when tunnelling, it
/// also bounds the wait after spawning `ssh` before that connect is
/// attempted (the original's `msleep(d->timeout)` between `popen2` and
/// `Socket::connect`).
pub fn connect(target: &HostAddr, auth: Option<&TunnelTarget>, connect_timeout: Duration) -> Result<Session, ClientError> {
    let (connect_host, connect_port, tunnel) = match auth {
        Some(auth) => {
            // The original forwards the server's own port + 1 on
            // localhost; kept here for parity with scripts/tooling that
            // assume that convention.
            let local_port = target.port.wrapping_add(1);
            let tunnel = SshTunnel::spawn(auth, &target.host, target.port, local_port)?;
            thread::sleep(connect_timeout);
            ("localhost".to_string(), local_port, Some(tunnel))
        }
        None => (target.host.clone(), target.port, None),
    };

    let addr = (connect_host.as_str(), connect_port)
        .to_socket_addrs()
        .map_err(ClientError::Connect)?
        .next()
        .ok_or_else(|| ClientError::InvalidTarget(format!("{}:{}", connect_host, connect_port)))?;

    let stream = TcpStream::connect_timeout(&addr, connect_timeout).map_err(ClientError::Connect)?;
    usbnet_transport::disable_nagle(&stream).map_err(ClientError::Connect)?;

    Ok(Session { stream, _tunnel: tunnel })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn connects_directly_when_no_tunnel_is_requested() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let target = HostAddr { host: "127.0.0.1".to_string(), port };

        let session = connect(&target, None, Duration::from_millis(500)).unwrap();
        assert!(session._tunnel.is_none());
        listener.accept().unwrap();
    }

    #[test]
    fn an_unreachable_target_fails_within_the_timeout() {
        // A TEST-NET-1 address (RFC 5737) that routes nowhere: the connect
        // attempt blocks instead of refusing immediately.
        let target = HostAddr { host: "192.0.2.1".to_string(), port: 22222 };
        let err = connect(&target, None, Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, ClientError::Connect(_)));
    }
}
