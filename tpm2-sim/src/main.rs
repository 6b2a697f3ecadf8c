// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM 2.0 simulator listening on a Unix socket

use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use tpm2_sim::{remove_socket, serve, Simulator};

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Socket path to listen on
    #[arg(short, long, env = "TPM_SIM_SOCKET", default_value = "/tmp/rust-tpm")]
    socket: PathBuf,
}

fn main() -> Result<()> {
    {
        use tracing_subscriber::{fmt, EnvFilter};
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt().with_env_filter(filter).init();
    }
    let args = Args::parse();

    remove_socket(&args.socket)
        .with_context(|| format!("failed to remove stale socket {}", args.socket.display()))?;
    let listener = UnixListener::bind(&args.socket)
        .with_context(|| format!("failed to bind {}", args.socket.display()))?;
    info!("TPM simulator listening on {}", args.socket.display());

    // Unlink the socket on SIGINT/SIGTERM
    let socket = args.socket.clone();
    ctrlc::set_handler(move || {
        info!("shutting down, removing {}", socket.display());
        if let Err(err) = remove_socket(&socket) {
            warn!("unable to unlink {}: {err}", socket.display());
        }
        std::process::exit(0);
    })
    .context("failed to install signal handler")?;

    let sim = Arc::new(Mutex::new(Simulator::new()));
    for stream in listener.incoming() {
        let mut stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                error!("failed to accept connection: {err}");
                break;
            }
        };
        let sim = Arc::clone(&sim);
        std::thread::spawn(move || {
            if let Err(err) = serve(&sim, &mut stream) {
                warn!("connection closed with error: {err}");
            }
        });
    }

    remove_socket(&args.socket)
        .with_context(|| format!("failed to unlink {}", args.socket.display()))?;
    Ok(())
}
