// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Send `TPM2_Startup` to a TPM.
//!
//! The TPM is reached either through a character device (`/dev/tpm0`) or a
//! Unix socket served by `tpm2-sim`.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tpm2_transport::{
    ErrorCategory, ShutdownType, StartupType, TpmContext, TpmError, TransportConfig,
};
use tracing::info;

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// TPM device node or simulator socket
    #[arg(short, long, env = "TPM_PATH", default_value = "/tmp/rust-tpm")]
    tpm: PathBuf,

    /// Resume saved state (TPM_SU_STATE) instead of clearing (TPM_SU_CLEAR)
    #[arg(long)]
    state: bool,

    /// The previous power cycle ended with TPM2_Shutdown(STATE). Without it
    /// `--state` is refused before anything is sent.
    #[arg(long, requires = "state")]
    saved_state: bool,

    /// Largest response accepted from the TPM
    #[arg(long, default_value_t = tpm2_transport::DEFAULT_MAX_RESPONSE_SIZE)]
    max_response_size: usize,
}

enum Channel {
    Device(File),
    Socket(UnixStream),
}

impl Channel {
    fn open(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path)
            .with_context(|| format!("failed to stat TPM path: {}", path.display()))?;
        if meta.file_type().is_socket() {
            let stream = UnixStream::connect(path)
                .with_context(|| format!("failed to connect to TPM socket: {}", path.display()))?;
            return Ok(Channel::Socket(stream));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open TPM device: {}", path.display()))?;
        Ok(Channel::Device(file))
    }
}

impl Read for Channel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Channel::Device(f) => f.read(buf),
            Channel::Socket(s) => s.read(buf),
        }
    }
}

impl Write for Channel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Channel::Device(f) => f.write(buf),
            Channel::Socket(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Channel::Device(f) => f.flush(),
            Channel::Socket(s) => s.flush(),
        }
    }
}

fn describe(err: &TpmError) -> &'static str {
    match err.category() {
        ErrorCategory::Connection => "cannot talk to the TPM",
        ErrorCategory::Rejected => "the TPM rejected TPM2_Startup",
        ErrorCategory::Usage => "TPM2_Startup was called incorrectly",
    }
}

/// Pick the startup type and carry the caller's shutdown record into the
/// lifecycle; a fresh process has no record of its own
fn prepare<C: Read + Write>(ctx: &mut TpmContext<C>, args: &Args) -> StartupType {
    if args.saved_state {
        ctx.lifecycle_mut().record_shutdown(ShutdownType::State);
    }
    if args.state {
        StartupType::State
    } else {
        StartupType::Clear
    }
}

fn main() -> Result<()> {
    {
        use tracing_subscriber::{fmt, EnvFilter};
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt().with_env_filter(filter).init();
    }
    let args = Args::parse();

    let channel = Channel::open(&args.tpm)?;
    let config = TransportConfig {
        max_response_size: args.max_response_size,
    };
    let mut ctx = TpmContext::with_config(channel, config);

    let startup_type = prepare(&mut ctx, &args);
    ctx.startup(startup_type)
        .map_err(|e| {
            let what = describe(&e);
            anyhow::Error::new(e).context(what)
        })
        .with_context(|| format!("TPM at {}", args.tpm.display()))?;

    info!("TPM at {} is ready", args.tpm.display());
    Ok(())
}
