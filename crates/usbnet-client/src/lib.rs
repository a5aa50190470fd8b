// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Parent side of the session hand-off (C4) and the CLI front-end for the
//! client wrapper executable, per spec §4.4 and §6.
//!
//! [`target`] parses the two host-ish CLI strings; [`tunnel`] spawns the
//! optional SSH port-forward; [`connect`] establishes the TCP session
//! (through the tunnel when one was requested); [`launch`] execs the
//! trailing command with the shim preloaded once the hand-off region has
//! been published.

pub mod connect;
pub mod error;
pub mod launch;
pub mod target;
pub mod tunnel;

pub use connect::{connect as connect_session, Session};
pub use error::ClientError;
pub use target::{HostAddr, TunnelTarget};
