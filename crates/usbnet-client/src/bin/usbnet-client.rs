// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use usbnet_client::target::{HostAddr, TunnelTarget};
use usbnet_client::{connect_session, launch, ClientError};

/// Client wrapper: runs a command against a remote USB host over the
/// usbnet RPC substrate, with the proxy shim preloaded.
#[derive(Debug, Parser)]
#[command(name = "usbnet-client", version, trailing_var_arg = true)]
struct Args {
    /// Target server host[:port]
    #[arg(short = 'o', long, default_value = "localhost:22222")]
    host: String,

    /// SSH tunnel credentials, user@host[:port]
    #[arg(short, long)]
    auth: Option<String>,

    /// Path to the preloaded shim library
    #[arg(short, long, default_value = "libusbnet.so")]
    library: PathBuf,

    /// Connection timeout in milliseconds
    #[arg(short, long = "timeout", default_value_t = 1000)]
    timeout_ms: u64,

    /// Suppress informational logging
    #[arg(short, long)]
    quiet: bool,

    /// Command to execute with the shim preloaded
    #[arg(required = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() {
    let args = Args::parse();

    let filter = if args.quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(args) {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!(error = %e, "usbnet-client failed");
            process::exit(1);
        }
    }
}

fn run(args: Args) -> Result<i32, ClientError> {
    let target = HostAddr::parse(&args.host)?;
    let auth = args.auth.as_deref().map(TunnelTarget::parse).transpose()?;
    let timeout = Duration::from_millis(args.timeout_ms);

    info!(host = %target.host, port = target.port, "connecting");
    let session = connect_session(&target, auth.as_ref(), timeout)?;

    let region = usbnet_handoff::ShmHandoff::publish(session.stream.as_raw_fd())?;

    info!(command = ?args.command, library = %args.library.display(), "launching");
    let status = launch::run_with_preload(&args.command, &args.library)?;
    drop(region);

    Ok(status.code().unwrap_or(1))
}
