// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

use crate::response_code::ErrorClassification;

pub type Result<T> = std::result::Result<T, TpmError>;

#[derive(Debug, Error)]
pub enum TpmError {
    #[error("channel failure: {0}")]
    Channel(#[from] std::io::Error),
    #[error("framing error: {0}")]
    Framing(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("session is desynchronized by an earlier failure, reopen the channel")]
    SessionDesynced,
    #[error("TPM2_Startup was already issued in this power cycle")]
    AlreadyStarted,
    #[error("TPM is powered off")]
    NotPoweredOn,
    #[error("TPM_SU_STATE requires a recorded state-preserving shutdown")]
    InvalidStartupType,
    #[error("TPM rejected the command: {0}")]
    Remote(ErrorClassification),
}

/// What the caller has to fix after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The device could not be talked to; reopen the channel
    Connection,
    /// The TPM answered and refused the command
    Rejected,
    /// The call itself was wrong; nothing was sent
    Usage,
}

impl TpmError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            TpmError::Channel(_)
            | TpmError::Framing(_)
            | TpmError::MalformedResponse(_)
            | TpmError::SessionDesynced => ErrorCategory::Connection,
            TpmError::Remote(_) => ErrorCategory::Rejected,
            TpmError::AlreadyStarted | TpmError::NotPoweredOn | TpmError::InvalidStartupType => {
                ErrorCategory::Usage
            }
        }
    }

    /// Whether the session that produced this error must be discarded
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Connection
    }

    /// The TPM's classification, for errors the TPM itself reported
    pub fn classification(&self) -> Option<&ErrorClassification> {
        match self {
            TpmError::Remote(class) => Some(class),
            _ => None,
        }
    }
}
