// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM power/initialization lifecycle and `TPM2_Startup`
//!
//! A TPM rejects every command except `TPM2_Startup` until it has been
//! started once per power cycle:
//!
//! ```text
//! PoweredOff --power_on--> PoweredOnUninitialized --TPM2_Startup--> Ready
//!      ^                                                             |
//!      +------------------------- power_off -------------------------+
//! ```

use std::io::{Read, Write};

use tracing::{debug, info, warn};

use crate::codec::TpmCommand;
use crate::constants::{ShutdownType, StartupType, TpmCc};
use crate::error::{Result, TpmError};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpmLifecycleState {
    PoweredOff,
    PoweredOnUninitialized,
    Ready,
}

/// Tracks whether Startup has been sent to one TPM in the current power cycle
#[derive(Debug)]
pub struct StartupMachine {
    state: TpmLifecycleState,
    saved_state: bool,
}

impl Default for StartupMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StartupMachine {
    /// A machine for a TPM that has not been powered on yet
    pub fn new() -> Self {
        Self {
            state: TpmLifecycleState::PoweredOff,
            saved_state: false,
        }
    }

    /// A machine for a TPM that is already powered, e.g. one reached through
    /// a freshly opened channel
    pub fn powered_on() -> Self {
        Self {
            state: TpmLifecycleState::PoweredOnUninitialized,
            saved_state: false,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> TpmLifecycleState {
        self.state
    }

    /// Whether a `TPM2_Shutdown(STATE)` was recorded and not yet consumed
    pub fn has_saved_state(&self) -> bool {
        self.saved_state
    }

    /// Apply power; a no-op unless the TPM is off
    pub fn power_on(&mut self) {
        if self.state == TpmLifecycleState::PoweredOff {
            info!("TPM powered on");
            self.state = TpmLifecycleState::PoweredOnUninitialized;
        }
    }

    /// Remove power. A recorded STATE shutdown survives.
    pub fn power_off(&mut self) {
        info!("TPM powered off");
        self.state = TpmLifecycleState::PoweredOff;
    }

    /// Record the type of a `TPM2_Shutdown` the caller issued. Only a STATE
    /// shutdown allows the next power cycle to resume with `TPM_SU_STATE`.
    pub fn record_shutdown(&mut self, shutdown_type: ShutdownType) {
        debug!("recorded shutdown: {shutdown_type:?}");
        self.saved_state = shutdown_type == ShutdownType::State;
    }

    /// Check that `TPM2_Startup(startup_type)` may be sent now
    pub fn check_startup(&self, startup_type: StartupType) -> Result<()> {
        match self.state {
            TpmLifecycleState::Ready => return Err(TpmError::AlreadyStarted),
            TpmLifecycleState::PoweredOff => return Err(TpmError::NotPoweredOn),
            TpmLifecycleState::PoweredOnUninitialized => {}
        }
        if startup_type == StartupType::State && !self.saved_state {
            return Err(TpmError::InvalidStartupType);
        }
        Ok(())
    }

    /// Send `TPM2_Startup` and move to `Ready` on success. On any failure the
    /// state is left untouched so the caller can retry with other arguments.
    pub fn startup<C: Read + Write>(
        &mut self,
        transport: &Transport<C>,
        startup_type: StartupType,
    ) -> Result<()> {
        self.check_startup(startup_type)?;

        let mut cmd = TpmCommand::new(TpmCc::Startup);
        cmd.add(&startup_type);
        let response = transport.execute(&cmd.finalize())?;
        if let Err(err) = response.ensure_success() {
            warn!("TPM2_Startup({startup_type:?}) rejected: {err}");
            return Err(err);
        }

        info!("TPM2_Startup({startup_type:?}) succeeded");
        self.state = TpmLifecycleState::Ready;
        self.saved_state = false;
        Ok(())
    }
}
