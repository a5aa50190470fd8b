// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Parsing for the two host-ish strings the client CLI accepts: the
//! server target (`host[:port]`) and the optional SSH tunnel credentials
//! (`user@host[:port]`), mirroring `ClientSocket::setCredentials` in
//! `original_source/src/client/clientsocket.cpp`.

use crate::error::ClientError;

pub const DEFAULT_PORT: u16 = 22222;
const DEFAULT_SSH_PORT: u16 = 22;

/// `host[:port]`, the positional server target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddr {
    pub host: String,
    pub port: u16,
}

impl HostAddr {
    pub fn parse(s: &str) -> Result<HostAddr, ClientError> {
        let (host, port) = split_host_port(s, DEFAULT_PORT)?;
        if host.is_empty() {
            return Err(ClientError::InvalidTarget(s.to_string()));
        }
        Ok(HostAddr { host, port })
    }
}

/// `user@host[:port]`: the optional SSH tunnel target, from `-a/--auth`.
/// An absent `user` means "use whatever `ssh` resolves from its own
/// config"; an absent `host` means "tunnel through the server target
/// itself" (the original's `if(d->tunHost.empty()) d->tunHost = host;`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelTarget {
    pub user: Option<String>,
    pub host: Option<String>,
    pub port: u16,
}

impl TunnelTarget {
    pub fn parse(s: &str) -> Result<TunnelTarget, ClientError> {
        let (user, rest) = match s.split_once('@') {
            Some((user, rest)) => (Some(user.to_string()), rest),
            None => (None, s),
        };
        let (host, port) = split_host_port(rest, DEFAULT_SSH_PORT)?;
        Ok(TunnelTarget {
            user,
            host: if host.is_empty() { None } else { Some(host) },
            port,
        })
    }
}

fn split_host_port(s: &str, default_port: u16) -> Result<(String, u16), ClientError> {
    match s.rsplit_once(':') {
        Some((host, port_str)) => {
            let port: u16 = port_str
                .parse()
                .map_err(|_| ClientError::InvalidTarget(s.to_string()))?;
            Ok((host.to_string(), port))
        }
        None => Ok((s.to_string(), default_port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_addr_defaults_the_port() {
        assert_eq!(HostAddr::parse("example.com").unwrap(), HostAddr { host: "example.com".into(), port: DEFAULT_PORT });
    }

    #[test]
    fn host_addr_parses_an_explicit_port() {
        assert_eq!(HostAddr::parse("example.com:2222").unwrap(), HostAddr { host: "example.com".into(), port: 2222 });
    }

    #[test]
    fn host_addr_rejects_a_non_numeric_port() {
        assert!(HostAddr::parse("example.com:ssh").is_err());
    }

    #[test]
    fn tunnel_target_parses_user_host_and_port() {
        let t = TunnelTarget::parse("alice@jump.example.com:2200").unwrap();
        assert_eq!(t.user.as_deref(), Some("alice"));
        assert_eq!(t.host.as_deref(), Some("jump.example.com"));
        assert_eq!(t.port, 2200);
    }

    #[test]
    fn tunnel_target_without_a_user_leaves_it_unset() {
        let t = TunnelTarget::parse("jump.example.com").unwrap();
        assert_eq!(t.user, None);
        assert_eq!(t.host.as_deref(), Some("jump.example.com"));
        assert_eq!(t.port, DEFAULT_SSH_PORT);
    }

    #[test]
    fn tunnel_target_with_only_a_user_leaves_host_unset() {
        let t = TunnelTarget::parse("alice@").unwrap();
        assert_eq!(t.user.as_deref(), Some("alice"));
        assert_eq!(t.host, None);
    }
}
