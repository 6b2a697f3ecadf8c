// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Pure Rust TPM 2.0 transport
//!
//! This crate frames TPM 2.0 commands, moves them over any connected byte
//! channel and interprets the responses. It drives the one command every TPM
//! needs before anything else: `TPM2_Startup`.
//!
//! ## Layers
//!
//! - [`codec`]: `tag | size | code | body` framing, big-endian
//! - [`Transport`]: one command in flight per channel, exact-size reads
//! - [`StartupMachine`]: power/initialization lifecycle
//! - [`classify`]: response code decomposition into [`ErrorClassification`]
//!
//! ## Example
//!
//! ```no_run
//! use std::os::unix::net::UnixStream;
//! use tpm2_transport::{StartupType, TpmContext};
//!
//! let stream = UnixStream::connect("/tmp/rust-tpm")?;
//! let mut ctx = TpmContext::new(stream);
//! ctx.startup(StartupType::Clear)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod codec;
mod commands;
mod constants;
mod error;
mod marshal;
mod response_code;
mod startup;
mod transport;

#[cfg(test)]
mod mock;

pub use commands::TpmContext;
pub use constants::*;
pub use error::{ErrorCategory, Result, TpmError};
pub use response_code::{classify, ErrorClassification, Severity};
pub use startup::{StartupMachine, TpmLifecycleState};
pub use transport::{Transport, TransportConfig};

pub use codec::{TpmCommand, TpmResponse};
pub use marshal::{CommandBuffer, Marshal, ResponseBuffer, Unmarshal};
