// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Server dispatch (C6): accept loop, opcode routing, open-handle
//! registry, response framing.

pub mod dispatch;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;

pub use error::ServerError;
pub use registry::HandleRegistry;
pub use server::Server;
