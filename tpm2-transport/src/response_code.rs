// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM 2.0 response code interpretation
//!
//! A response code is decomposed by its bit layout rather than looked up in a
//! list of known values, so any 32-bit value yields a classification:
//!
//! ```text
//!  bit 7 clear, bit 8 clear  -> TPM 1.2 (legacy) code
//!  bit 7 clear, bit 8 set    -> format 0: E = bits 0..6, T = bit 10, S = bit 11
//!  bit 7 set                 -> format 1: E = bits 0..5, P = bit 6, N = bits 8..11
//! ```
//!
//! Format-1 codes carry the position of the offending item: the parameter
//! number when P is set, otherwise a handle (N < 8) or session (N >= 8).

use std::fmt;

use crate::constants::tpm_rc;

/// Severity of a format-0 code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A non-success TPM response code, split along the TCG layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// TPM 1.2 response code
    Legacy { code: u32 },
    /// Format-0 code, or a format-1 code that names no handle, parameter or session
    Generic {
        number: u8,
        severity: Severity,
        vendor: bool,
        code: u32,
    },
    /// Format-1 code tied to command parameter `number` (1-based)
    Parameter { number: u8, error: u8, code: u32 },
    /// Format-1 code tied to command handle `number` (1-based)
    Handle { number: u8, error: u8, code: u32 },
    /// Format-1 code tied to authorization session `number` (1-based)
    Session { number: u8, error: u8, code: u32 },
}

/// Classify a response code. Returns `None` for `TPM_RC_SUCCESS`.
pub fn classify(code: u32) -> Option<ErrorClassification> {
    if code == tpm_rc::SUCCESS {
        return None;
    }

    if code & tpm_rc::FMT1 == 0 {
        if code & tpm_rc::VER1 == 0 {
            return Some(ErrorClassification::Legacy { code });
        }
        let severity = if code & tpm_rc::S_BIT != 0 {
            Severity::Warning
        } else {
            Severity::Error
        };
        return Some(ErrorClassification::Generic {
            number: (code & tpm_rc::E0_MASK) as u8,
            severity,
            vendor: code & tpm_rc::T_BIT != 0,
            code,
        });
    }

    let error = (code & tpm_rc::E1_MASK) as u8;
    let n = ((code & tpm_rc::N_MASK) >> tpm_rc::N_SHIFT) as u8;
    let class = if code & tpm_rc::P_BIT != 0 {
        ErrorClassification::Parameter {
            number: n,
            error,
            code,
        }
    } else if n == 0 {
        ErrorClassification::Generic {
            number: error,
            severity: Severity::Error,
            vendor: false,
            code,
        }
    } else if n < 8 {
        ErrorClassification::Handle {
            number: n,
            error,
            code,
        }
    } else {
        ErrorClassification::Session {
            number: n - 8,
            error,
            code,
        }
    };
    Some(class)
}

impl ErrorClassification {
    /// The raw response code
    pub fn code(&self) -> u32 {
        match *self {
            Self::Legacy { code }
            | Self::Generic { code, .. }
            | Self::Parameter { code, .. }
            | Self::Handle { code, .. }
            | Self::Session { code, .. } => code,
        }
    }

    /// The code with handle/parameter/session qualifiers stripped, e.g.
    /// `0x1C4` becomes `TPM_RC_VALUE` (`0x084`)
    pub fn base_code(&self) -> u32 {
        base_code(self.code())
    }

    /// TCG name of the base code, if it is one the TCG defines
    pub fn name(&self) -> Option<&'static str> {
        match self {
            Self::Legacy { .. } => None,
            Self::Generic { vendor: true, .. } => None,
            _ => rc_name(self.base_code()),
        }
    }

    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Self::Generic {
                severity: Severity::Warning,
                ..
            }
        )
    }
}

fn base_code(code: u32) -> u32 {
    if code & tpm_rc::FMT1 != 0 {
        tpm_rc::FMT1 | (code & tpm_rc::E1_MASK)
    } else if code & tpm_rc::VER1 != 0 {
        code & (tpm_rc::VER1 | tpm_rc::S_BIT | tpm_rc::T_BIT | tpm_rc::E0_MASK)
    } else {
        code
    }
}

fn rc_name(base: u32) -> Option<&'static str> {
    RC_NAMES
        .iter()
        .find(|(value, _)| *value == base)
        .map(|(_, name)| *name)
}

impl fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.code();
        let name = self.name().unwrap_or("unknown response code");
        match *self {
            Self::Legacy { .. } => write!(f, "TPM 1.2 response code 0x{code:08x}"),
            Self::Generic {
                vendor: true,
                number,
                ..
            } => write!(f, "vendor-defined code {number} (0x{code:08x})"),
            Self::Generic { severity, .. } => {
                let kind = match severity {
                    Severity::Error => "",
                    Severity::Warning => "warning ",
                };
                write!(f, "{kind}{name} (0x{code:08x})")
            }
            Self::Parameter { number, .. } => {
                write!(f, "{name} in parameter {number} (0x{code:08x})")
            }
            Self::Handle { number, .. } => write!(f, "{name} in handle {number} (0x{code:08x})"),
            Self::Session { number, .. } => {
                write!(f, "{name} in session {number} (0x{code:08x})")
            }
        }
    }
}

/// TCG-defined base codes (TPM 2.0 Part 2, table "TPM_RC Values")
const RC_NAMES: &[(u32, &str)] = &[
    // Format 0 errors
    (0x100, "TPM_RC_INITIALIZE"),
    (0x101, "TPM_RC_FAILURE"),
    (0x103, "TPM_RC_SEQUENCE"),
    (0x10B, "TPM_RC_PRIVATE"),
    (0x119, "TPM_RC_HMAC"),
    (0x120, "TPM_RC_DISABLED"),
    (0x121, "TPM_RC_EXCLUSIVE"),
    (0x124, "TPM_RC_AUTH_TYPE"),
    (0x125, "TPM_RC_AUTH_MISSING"),
    (0x126, "TPM_RC_POLICY"),
    (0x127, "TPM_RC_PCR"),
    (0x128, "TPM_RC_PCR_CHANGED"),
    (0x12D, "TPM_RC_UPGRADE"),
    (0x12E, "TPM_RC_TOO_MANY_CONTEXTS"),
    (0x12F, "TPM_RC_AUTH_UNAVAILABLE"),
    (0x130, "TPM_RC_REBOOT"),
    (0x131, "TPM_RC_UNBALANCED"),
    (0x142, "TPM_RC_COMMAND_SIZE"),
    (0x143, "TPM_RC_COMMAND_CODE"),
    (0x144, "TPM_RC_AUTHSIZE"),
    (0x145, "TPM_RC_AUTH_CONTEXT"),
    (0x146, "TPM_RC_NV_RANGE"),
    (0x147, "TPM_RC_NV_SIZE"),
    (0x148, "TPM_RC_NV_LOCKED"),
    (0x149, "TPM_RC_NV_AUTHORIZATION"),
    (0x14A, "TPM_RC_NV_UNINITIALIZED"),
    (0x14B, "TPM_RC_NV_SPACE"),
    (0x14C, "TPM_RC_NV_DEFINED"),
    (0x150, "TPM_RC_BAD_CONTEXT"),
    (0x151, "TPM_RC_CPHASH"),
    (0x152, "TPM_RC_PARENT"),
    (0x153, "TPM_RC_NEEDS_TEST"),
    (0x154, "TPM_RC_NO_RESULT"),
    (0x155, "TPM_RC_SENSITIVE"),
    // Format 1 errors
    (0x081, "TPM_RC_ASYMMETRIC"),
    (0x082, "TPM_RC_ATTRIBUTES"),
    (0x083, "TPM_RC_HASH"),
    (0x084, "TPM_RC_VALUE"),
    (0x085, "TPM_RC_HIERARCHY"),
    (0x087, "TPM_RC_KEY_SIZE"),
    (0x088, "TPM_RC_MGF"),
    (0x089, "TPM_RC_MODE"),
    (0x08A, "TPM_RC_TYPE"),
    (0x08B, "TPM_RC_HANDLE"),
    (0x08C, "TPM_RC_KDF"),
    (0x08D, "TPM_RC_RANGE"),
    (0x08E, "TPM_RC_AUTH_FAIL"),
    (0x08F, "TPM_RC_NONCE"),
    (0x090, "TPM_RC_PP"),
    (0x092, "TPM_RC_SCHEME"),
    (0x095, "TPM_RC_SIZE"),
    (0x096, "TPM_RC_SYMMETRIC"),
    (0x097, "TPM_RC_TAG"),
    (0x098, "TPM_RC_SELECTOR"),
    (0x09A, "TPM_RC_INSUFFICIENT"),
    (0x09B, "TPM_RC_SIGNATURE"),
    (0x09C, "TPM_RC_KEY"),
    (0x09D, "TPM_RC_POLICY_FAIL"),
    (0x09F, "TPM_RC_INTEGRITY"),
    (0x0A0, "TPM_RC_TICKET"),
    (0x0A1, "TPM_RC_RESERVED_BITS"),
    (0x0A2, "TPM_RC_BAD_AUTH"),
    (0x0A3, "TPM_RC_EXPIRED"),
    (0x0A4, "TPM_RC_POLICY_CC"),
    (0x0A5, "TPM_RC_BINDING"),
    (0x0A6, "TPM_RC_CURVE"),
    (0x0A7, "TPM_RC_ECC_POINT"),
    // Warnings
    (0x901, "TPM_RC_CONTEXT_GAP"),
    (0x902, "TPM_RC_OBJECT_MEMORY"),
    (0x903, "TPM_RC_SESSION_MEMORY"),
    (0x904, "TPM_RC_MEMORY"),
    (0x905, "TPM_RC_SESSION_HANDLES"),
    (0x906, "TPM_RC_OBJECT_HANDLES"),
    (0x907, "TPM_RC_LOCALITY"),
    (0x908, "TPM_RC_YIELDED"),
    (0x909, "TPM_RC_CANCELED"),
    (0x90A, "TPM_RC_TESTING"),
    (0x910, "TPM_RC_REFERENCE_H0"),
    (0x911, "TPM_RC_REFERENCE_H1"),
    (0x912, "TPM_RC_REFERENCE_H2"),
    (0x913, "TPM_RC_REFERENCE_H3"),
    (0x914, "TPM_RC_REFERENCE_H4"),
    (0x915, "TPM_RC_REFERENCE_H5"),
    (0x916, "TPM_RC_REFERENCE_H6"),
    (0x918, "TPM_RC_REFERENCE_S0"),
    (0x919, "TPM_RC_REFERENCE_S1"),
    (0x91A, "TPM_RC_REFERENCE_S2"),
    (0x91B, "TPM_RC_REFERENCE_S3"),
    (0x91C, "TPM_RC_REFERENCE_S4"),
    (0x91D, "TPM_RC_REFERENCE_S5"),
    (0x91E, "TPM_RC_REFERENCE_S6"),
    (0x920, "TPM_RC_NV_RATE"),
    (0x921, "TPM_RC_LOCKOUT"),
    (0x922, "TPM_RC_RETRY"),
    (0x923, "TPM_RC_NV_UNAVAILABLE"),
    (0x97F, "TPM_RC_NOT_USED"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_success_is_not_an_error() {
        assert_eq!(classify(tpm_rc::SUCCESS), None);
    }

    #[test]
    fn test_format0_initialize() {
        let class = classify(0x0000_0100).unwrap();
        assert_eq!(
            class,
            ErrorClassification::Generic {
                number: 0,
                severity: Severity::Error,
                vendor: false,
                code: 0x100,
            }
        );
        assert_eq!(class.name(), Some("TPM_RC_INITIALIZE"));
    }

    #[test]
    fn test_format1_parameter() {
        let class = classify(tpm_rc::VALUE | tpm_rc::P_1).unwrap();
        assert_eq!(
            class,
            ErrorClassification::Parameter {
                number: 1,
                error: 0x04,
                code: 0x1C4,
            }
        );
        assert_eq!(class.base_code(), tpm_rc::VALUE);
        assert_eq!(class.to_string(), "TPM_RC_VALUE in parameter 1 (0x000001c4)");
    }

    #[test]
    fn test_format1_parameter_fifteen() {
        let class = classify(0x0000_0FC4).unwrap();
        assert!(matches!(
            class,
            ErrorClassification::Parameter { number: 15, .. }
        ));
    }

    #[test]
    fn test_format1_handle_and_session() {
        // TPM_RC_HANDLE on handle 1
        assert_eq!(
            classify(0x0000_018B),
            Some(ErrorClassification::Handle {
                number: 1,
                error: 0x0B,
                code: 0x18B,
            })
        );
        // TPM_RC_AUTH_FAIL on session 1
        let class = classify(0x0000_098E).unwrap();
        assert_eq!(
            class,
            ErrorClassification::Session {
                number: 1,
                error: 0x0E,
                code: 0x98E,
            }
        );
        assert_eq!(class.name(), Some("TPM_RC_AUTH_FAIL"));
    }

    #[test]
    fn test_format1_without_position_is_generic() {
        let class = classify(tpm_rc::INSUFFICIENT).unwrap();
        assert!(matches!(
            class,
            ErrorClassification::Generic {
                number: 0x1A,
                severity: Severity::Error,
                ..
            }
        ));
        assert_eq!(class.name(), Some("TPM_RC_INSUFFICIENT"));
    }

    #[test]
    fn test_warning_and_vendor() {
        let retry = classify(0x0000_0922).unwrap();
        assert!(retry.is_warning());
        assert_eq!(retry.name(), Some("TPM_RC_RETRY"));
        assert_eq!(retry.to_string(), "warning TPM_RC_RETRY (0x00000922)");

        let vendor = classify(0x0000_0501).unwrap();
        assert!(matches!(
            vendor,
            ErrorClassification::Generic {
                vendor: true,
                number: 1,
                ..
            }
        ));
        assert_eq!(vendor.name(), None);
    }

    #[test]
    fn test_legacy() {
        assert_eq!(
            classify(tpm_rc::BAD_TAG),
            Some(ErrorClassification::Legacy { code: 0x1E })
        );
    }

    #[test]
    fn test_unknown_codes_still_classify() {
        let class = classify(0xFFFF_FFFF).unwrap();
        assert_eq!(class.code(), 0xFFFF_FFFF);
        assert!(class.to_string().contains("0xffffffff"));
    }

    proptest! {
        #[test]
        fn classify_is_pure_and_total(code in any::<u32>()) {
            let first = classify(code);
            prop_assert_eq!(first, classify(code));
            match first {
                None => {
                    prop_assert_eq!(code, 0);
                }
                Some(class) => {
                    prop_assert_eq!(class.code(), code);
                    let _ = class.to_string();
                }
            }
        }
    }
}
