// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! The per-session open-handle registry.
//!
//! The client-visible handle is the underlying native file descriptor
//! number the wrapped library's `open` returned, so the registry is just
//! the set of handles currently live on this session. A miss on lookup is
//! not a local error: the dispatcher turns it into a negative return code
//! in the reply, per spec.

use std::collections::HashSet;

use usbnet_abi::UsbBackend;

#[derive(Debug, Default)]
pub struct HandleRegistry {
    open: HashSet<i32>,
}

impl HandleRegistry {
    pub fn new() -> HandleRegistry {
        HandleRegistry::default()
    }

    pub fn contains(&self, handle: i32) -> bool {
        self.open.contains(&handle)
    }

    pub fn insert(&mut self, handle: i32) {
        self.open.insert(handle);
    }

    pub fn remove(&mut self, handle: i32) -> bool {
        self.open.remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Close every still-open handle against `backend` and empty the
    /// registry. Called when a session tears down, so no handle outlives
    /// its session (spec's session-close invariant).
    pub fn close_all(&mut self, backend: &mut dyn UsbBackend) {
        for handle in self.open.drain() {
            backend.close(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usbnet_abi::MockBackend;

    #[test]
    fn insert_remove_tracks_live_set() {
        let mut reg = HandleRegistry::new();
        reg.insert(42);
        assert!(reg.contains(42));
        assert!(reg.remove(42));
        assert!(!reg.contains(42));
    }

    #[test]
    fn close_all_empties_the_registry_and_calls_backend_close() {
        let mut backend = MockBackend::with_one_device(1, 2, 0x1234, 0x5678);
        let handle = backend.open(1, 2);
        let mut reg = HandleRegistry::new();
        reg.insert(handle);

        reg.close_all(&mut backend);
        assert!(reg.is_empty());
        assert_eq!(backend.close(handle), -9);
    }
}
