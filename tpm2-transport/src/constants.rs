// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM 2.0 constants: command codes, structure tags, startup types and the
//! response code bit layout

/// Size of both the command and the response header: tag (2) + size (4) + code (4)
pub const HEADER_SIZE: usize = 10;

/// Default cap on a single response, matching the TPM's usual buffer size
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 4096;

/// Largest command a TPM accepts (TPM_PT_MAX_COMMAND_SIZE on most devices)
pub const MAX_COMMAND_SIZE: usize = 4096;

/// TPM 2.0 Command Codes (TPM_CC)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TpmCc {
    Startup = 0x00000144,
    Shutdown = 0x00000145,
}

impl TpmCc {
    pub fn to_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0x00000144 => Some(TpmCc::Startup),
            0x00000145 => Some(TpmCc::Shutdown),
            _ => None,
        }
    }
}

/// TPM command/response header tag (TPM_ST)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TpmSt {
    NoSessions = 0x8001,
    Sessions = 0x8002,
}

impl TpmSt {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x8001 => Some(TpmSt::NoSessions),
            0x8002 => Some(TpmSt::Sessions),
            _ => None,
        }
    }
}

/// TPM 2.0 Startup/Shutdown Types (TPM_SU)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TpmSu {
    Clear = 0x0000,
    State = 0x0001,
}

impl TpmSu {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x0000 => Some(TpmSu::Clear),
            0x0001 => Some(TpmSu::State),
            _ => None,
        }
    }
}

/// Parameter of `TPM2_Startup`
pub type StartupType = TpmSu;

/// Parameter of `TPM2_Shutdown`
pub type ShutdownType = TpmSu;

/// TPM 2.0 Response Code layout and well-known values (TPM_RC)
pub mod tpm_rc {
    pub const SUCCESS: u32 = 0x000;

    /// Set for format-0 codes defined by TPM 2.0 (clear means TPM 1.2)
    pub const VER1: u32 = 0x100;
    /// Set for format-1 codes
    pub const FMT1: u32 = 0x080;
    /// Format-0 warning codes
    pub const WARN: u32 = 0x900;

    /// Format-0 severity bit
    pub const S_BIT: u32 = 0x800;
    /// Format-0 vendor-defined bit
    pub const T_BIT: u32 = 0x400;
    /// Format-1 parameter bit
    pub const P_BIT: u32 = 0x040;

    /// Format-0 error number
    pub const E0_MASK: u32 = 0x07F;
    /// Format-1 error number
    pub const E1_MASK: u32 = 0x03F;
    /// Format-1 handle/parameter/session number
    pub const N_MASK: u32 = 0xF00;
    pub const N_SHIFT: u32 = 8;

    pub const INITIALIZE: u32 = VER1;
    pub const FAILURE: u32 = VER1 + 0x001;
    pub const COMMAND_SIZE: u32 = VER1 + 0x042;
    pub const COMMAND_CODE: u32 = VER1 + 0x043;

    pub const VALUE: u32 = FMT1 + 0x004;
    pub const TAG: u32 = FMT1 + 0x017;
    pub const INSUFFICIENT: u32 = FMT1 + 0x01A;

    /// Parameter 1 qualifier for format-1 codes
    pub const P_1: u32 = P_BIT | 0x100;

    pub const BAD_TAG: u32 = 0x01E;
}
