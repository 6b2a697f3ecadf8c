// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! High-level TPM context
//!
//! Pairs one transport session with the lifecycle of the TPM behind it.

use std::io::{Read, Write};

use crate::constants::StartupType;
use crate::error::Result;
use crate::startup::{StartupMachine, TpmLifecycleState};
use crate::transport::{Transport, TransportConfig};

pub struct TpmContext<C> {
    transport: Transport<C>,
    lifecycle: StartupMachine,
}

impl<C: Read + Write> TpmContext<C> {
    /// Create a context over a connected channel. The TPM on the other end is
    /// assumed powered on and not yet started.
    pub fn new(channel: C) -> Self {
        Self::with_config(channel, TransportConfig::default())
    }

    /// Like [`TpmContext::new`] with explicit framing limits
    pub fn with_config(channel: C, config: TransportConfig) -> Self {
        Self {
            transport: Transport::with_config(channel, config),
            lifecycle: StartupMachine::powered_on(),
        }
    }

    /// Issue `TPM2_Startup`
    pub fn startup(&mut self, startup_type: StartupType) -> Result<()> {
        self.lifecycle.startup(&self.transport, startup_type)
    }

    /// Lifecycle state of the TPM as seen by this context
    pub fn state(&self) -> TpmLifecycleState {
        self.lifecycle.state()
    }

    /// Underlying session, for commands other than Startup
    pub fn transport(&self) -> &Transport<C> {
        &self.transport
    }

    /// Lifecycle tracking, e.g. to record a shutdown or a power cycle
    pub fn lifecycle_mut(&mut self) -> &mut StartupMachine {
        &mut self.lifecycle
    }

    /// Drop the context and return the channel
    pub fn into_inner(self) -> C {
        self.transport.into_inner()
    }
}
