// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Cross-process publication of the connected socket from parent to
//! preloaded child (C4).
//!
//! The parent creates a named region, writes the socket's file-descriptor
//! number, and detaches; the shim in the preloaded child attaches the same
//! region on its first intercepted call and reads the integer back. The
//! region is keyed by the fixed constant from the legacy build
//! (`0x2a2a2a2a`), matching spec §6.

use std::env;
use std::mem;
use std::os::unix::io::RawFd;

use shared_memory::{Shmem, ShmemConf, ShmemError};

/// The legacy build's well-known hand-off key.
pub const HANDOFF_KEY: u32 = 0x2a2a2a2a;

/// Environment variable carrying the fallback inherited-descriptor number,
/// used when the shared-memory mechanism is unavailable (spec §4.4: "any
/// OS-supported mechanism that delivers a pre-opened socket to a direct
/// child process").
pub const HANDOFF_ENV_VAR: &str = "USBNET_INHERITED_FD";

fn os_id() -> String {
    format!("usbnet-handoff-{:08x}", HANDOFF_KEY)
}

#[derive(Debug)]
pub enum HandoffError {
    /// The shared-memory region could not be created or attached.
    Region(ShmemError),
    /// The region was reachable but held no valid value yet.
    Empty,
    /// The cached descriptor failed its peer-name validation; per spec
    /// §7 this is fatal and not recoverable.
    SessionLost,
}

impl std::fmt::Display for HandoffError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            HandoffError::Region(e) => write!(f, "hand-off region error: {}", e),
            HandoffError::Empty => write!(f, "hand-off region has not been published yet"),
            HandoffError::SessionLost => write!(f, "cached remote descriptor failed validation"),
        }
    }
}

impl std::error::Error for HandoffError {}

/// Parent-side handle: owns the region for the lifetime of the proxied
/// session and destroys it on drop.
pub struct ShmHandoff {
    shmem: Shmem,
}

impl ShmHandoff {
    /// Create (or recreate) the hand-off region and publish `fd`.
    pub fn publish(fd: RawFd) -> Result<ShmHandoff, HandoffError> {
        let mut shmem = ShmemConf::new()
            .size(mem::size_of::<i32>())
            .os_id(os_id())
            .create()
            .or_else(|_| ShmemConf::new().os_id(os_id()).open())
            .map_err(HandoffError::Region)?;

        // SAFETY: the region is sized for exactly one i32 and is only ever
        // accessed through this typed view on either side of the hand-off.
        unsafe {
            let ptr = shmem.as_ptr() as *mut i32;
            ptr.write(fd as i32);
        }
        Ok(ShmHandoff { shmem })
    }
}

// The region is destroyed automatically when `shared_memory::Shmem` (the
// owner side) drops, matching spec §4.4's "the parent destroys the
// region" on exit.
impl Drop for ShmHandoff {
    fn drop(&mut self) {
        let _ = &self.shmem;
    }
}

/// Child-side lookup: attach the already-published region and read the fd.
pub fn retrieve() -> Result<RawFd, HandoffError> {
    let shmem = ShmemConf::new()
        .os_id(os_id())
        .open()
        .map_err(HandoffError::Region)?;

    // SAFETY: same typed view as `publish`; the parent always writes
    // before the child is allowed to run (it execs the child after the
    // region is populated).
    let value = unsafe { (shmem.as_ptr() as *const i32).read() };
    if value < 0 {
        return Err(HandoffError::Empty);
    }
    Ok(value as RawFd)
}

/// Validate a cached descriptor with an inexpensive peer-name query, as
/// required before every use (spec §4.4).
pub fn validate(fd: RawFd) -> bool {
    unsafe {
        let mut addr: libc::sockaddr_storage = mem::zeroed();
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        libc::getpeername(fd, &mut addr as *mut _ as *mut libc::sockaddr, &mut len) == 0
    }
}

/// The environment-variable fallback channel: a dedicated inherited
/// descriptor number advertised to the child instead of attaching shared
/// memory. Selected automatically by [`retrieve_any`] when the
/// shared-memory region cannot be opened.
pub fn publish_env(fd: RawFd) {
    env::set_var(HANDOFF_ENV_VAR, fd.to_string());
}

pub fn retrieve_env() -> Option<RawFd> {
    env::var(HANDOFF_ENV_VAR).ok()?.parse().ok()
}

/// Try the shared-memory channel first, falling back to the environment
/// variable. This is the entry point the shim actually calls.
pub fn retrieve_any() -> Result<RawFd, HandoffError> {
    match retrieve() {
        Ok(fd) => Ok(fd),
        Err(_) => retrieve_env().ok_or(HandoffError::Empty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn published_fd_round_trips() {
        let (a, _b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();

        let _region = ShmHandoff::publish(fd).unwrap();
        let retrieved = retrieve().unwrap();
        assert_eq!(retrieved, fd);
    }

    #[test]
    fn validate_rejects_a_closed_descriptor() {
        let fd = {
            let (a, _b) = UnixStream::pair().unwrap();
            a.as_raw_fd()
        };
        // `a` has been dropped (and thus closed); `fd` is now stale.
        assert!(!validate(fd));
    }

    #[test]
    fn validate_accepts_a_live_connected_socket() {
        let (a, _b) = UnixStream::pair().unwrap();
        assert!(validate(a.as_raw_fd()));
    }

    #[test]
    fn env_fallback_round_trips() {
        let (a, _b) = UnixStream::pair().unwrap();
        publish_env(a.as_raw_fd());
        assert_eq!(retrieve_env(), Some(a.as_raw_fd()));
    }
}
