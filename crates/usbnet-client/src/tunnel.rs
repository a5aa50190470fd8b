// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! SSH port-forward spawning, out of scope for *behavior* per spec §1
//! ("SSH tunnel spawning" is an external collaborator) but the spawn call
//! site is ambient CLI wiring and follows `ClientSocket::connect`'s
//! `popen2("ssh ...")` in `original_source/src/client/clientsocket.cpp`.

use std::process::{Child, Command};

use crate::error::ClientError;
use crate::target::TunnelTarget;

/// A running `ssh -L` forwarder. Killed on drop, mirroring
/// `ClientSocket::close`'s `kill(d->tunnel, SIGTERM); waitpid(...)`.
pub struct SshTunnel {
    child: Child,
}

impl SshTunnel {
    /// Spawn `ssh` to forward local port `local_port` to
    /// `target_host:target_port` via the jump host named in `tunnel`.
    /// An absent [`TunnelTarget::host`] tunnels through `target_host`
    /// itself, matching the original's fallback.
    pub fn spawn(tunnel: &TunnelTarget, target_host: &str, target_port: u16, local_port: u16) -> Result<SshTunnel, ClientError> {
        let destination = ssh_destination(tunnel, target_host);
        let forward = forward_spec(local_port, target_host, target_port);

        let child = Command::new("ssh")
            .arg("-o")
            .arg("PreferredAuthentications=publickey")
            .arg(&destination)
            .arg("-p")
            .arg(tunnel.port.to_string())
            .arg("-T")
            .arg("-L")
            .arg(&forward)
            .arg("-N")
            .spawn()
            .map_err(ClientError::TunnelSpawn)?;

        Ok(SshTunnel { child })
    }
}

/// `[user@]host`, the `ssh` destination argument. An absent tunnel host
/// falls back to the proxied server's own host.
fn ssh_destination(tunnel: &TunnelTarget, target_host: &str) -> String {
    let jump_host = tunnel.host.as_deref().unwrap_or(target_host);
    match &tunnel.user {
        Some(user) => format!("{}@{}", user, jump_host),
        None => jump_host.to_string(),
    }
}

/// `local_port:target_host:target_port`, the `-L` forwarding spec.
fn forward_spec(local_port: u16, target_host: &str, target_port: u16) -> String {
    format!("{}:{}:{}", local_port, target_host, target_port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_includes_the_user_when_given() {
        let tunnel = TunnelTarget { user: Some("alice".to_string()), host: Some("jump.example.com".to_string()), port: 22 };
        assert_eq!(ssh_destination(&tunnel, "device.example.com"), "alice@jump.example.com");
    }

    #[test]
    fn destination_falls_back_to_the_target_host_when_unset() {
        let tunnel = TunnelTarget { user: None, host: None, port: 22 };
        assert_eq!(ssh_destination(&tunnel, "device.example.com"), "device.example.com");
    }

    #[test]
    fn forward_spec_formats_local_colon_host_colon_remote() {
        assert_eq!(forward_spec(22223, "device.example.com", 22222), "22223:device.example.com:22222");
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
