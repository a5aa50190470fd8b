// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use usbnet_abi::MockBackend;
use usbnet_server::Server;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BindScope {
    Local,
    All,
}

impl BindScope {
    fn addr(self) -> IpAddr {
        match self {
            BindScope::Local => IpAddr::V4(Ipv4Addr::LOCALHOST),
            BindScope::All => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

/// Dispatch daemon for the networked USB proxy.
#[derive(Debug, Parser)]
#[command(name = "usbnet-serverd", version)]
struct Args {
    /// Interfaces to bind: `local` (127.0.0.1) or `all` (0.0.0.0)
    #[arg(long, value_enum, default_value_t = BindScope::Local)]
    bind: BindScope,

    /// TCP port to listen on
    #[arg(long, default_value_t = 22222)]
    port: u16,

    /// Suppress informational logging
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let args = Args::parse();

    let filter = if args.quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let addr = SocketAddr::new(args.bind.addr(), args.port);
    let mut server = match Server::bind(addr) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to bind");
            process::exit(1);
        }
    };

    // The real USB library is out of scope; `MockBackend` stands in for it
    // everywhere a concrete backend is needed.
    let mut backend = MockBackend::new();

    let shutdown = Arc::new(AtomicBool::new(false));
    for sig in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(e) = signal_hook::flag::register(sig, Arc::clone(&shutdown)) {
            error!(error = %e, signal = sig, "failed to install signal handler");
        }
    }

    info!("usbnet-serverd ready");
    if let Err(e) = server.run(&mut backend, || shutdown.load(Ordering::Relaxed)) {
        error!(error = %e, "server loop exited with an error");
        process::exit(1);
    }
    info!("usbnet-serverd shut down cleanly");
}
