// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM transport session
//!
//! Moves one framed command to the TPM and one framed response back over any
//! connected byte channel: `/dev/tpm0`, a simulator socket or an in-memory
//! stream.

use std::io::{ErrorKind, Read, Write};
use std::sync::Mutex;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::codec::{decode_response_header, TpmResponse};
use crate::constants::{DEFAULT_MAX_RESPONSE_SIZE, HEADER_SIZE};
use crate::error::{Result, TpmError};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest response accepted from the peer, header included
    pub max_response_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
        }
    }
}

struct Link<C> {
    channel: C,
    desynced: bool,
}

/// A session over one byte channel.
///
/// The TPM processes one command at a time, so the channel sits behind a
/// mutex and a second caller blocks until the first caller's response has
/// been read in full. Once a command fails mid-frame the session refuses
/// further use: the peer may still be holding a partial response.
pub struct Transport<C> {
    link: Mutex<Link<C>>,
    config: TransportConfig,
}

impl<C: Read + Write> Transport<C> {
    /// Open a session with the default framing limits
    pub fn new(channel: C) -> Self {
        Self::with_config(channel, TransportConfig::default())
    }

    /// Open a session with explicit framing limits
    pub fn with_config(channel: C, config: TransportConfig) -> Self {
        Self {
            link: Mutex::new(Link {
                channel,
                desynced: false,
            }),
            config,
        }
    }

    /// Whether an earlier failure left the framing position unknown
    pub fn is_desynced(&self) -> bool {
        self.link.lock().map(|link| link.desynced).unwrap_or(true)
    }

    /// Send a complete command frame and return the complete response frame
    pub fn send_command(&self, command: &[u8]) -> Result<Vec<u8>> {
        let mut link = self.link.lock().map_err(|_| TpmError::SessionDesynced)?;
        if link.desynced {
            return Err(TpmError::SessionDesynced);
        }

        match exchange(&mut link.channel, command, self.config.max_response_size) {
            Ok(response) => Ok(response),
            Err(err) => {
                if err.is_fatal() {
                    warn!("TPM session desynchronized: {err}");
                    link.desynced = true;
                }
                Err(err)
            }
        }
    }

    /// Send a command and parse the response frame
    pub fn execute(&self, command: &[u8]) -> Result<TpmResponse> {
        let response = self.send_command(command)?;
        TpmResponse::parse(&response)
    }

    /// Tear down the session and hand back the channel
    pub fn into_inner(self) -> C {
        match self.link.into_inner() {
            Ok(link) => link.channel,
            Err(poisoned) => poisoned.into_inner().channel,
        }
    }
}

fn exchange<C: Read + Write>(channel: &mut C, command: &[u8], max_size: usize) -> Result<Vec<u8>> {
    debug!("sending TPM command: {} bytes", command.len());
    channel.write_all(command)?;
    channel.flush()?;

    let mut header = [0u8; HEADER_SIZE];
    channel.read_exact(&mut header).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            TpmError::MalformedResponse("channel closed inside the response header".into())
        } else {
            TpmError::Channel(e)
        }
    })?;

    let (hdr, _) = decode_response_header(&header)?;
    let size = hdr.size as usize;
    if size < HEADER_SIZE {
        return Err(TpmError::Framing(format!(
            "declared response size {size} is smaller than the header"
        )));
    }
    if size > max_size {
        return Err(TpmError::Framing(format!(
            "declared response size {size} exceeds the limit of {max_size}"
        )));
    }

    let mut response = vec![0u8; size];
    response[..HEADER_SIZE].copy_from_slice(&header);
    if size > HEADER_SIZE {
        channel
            .read_exact(&mut response[HEADER_SIZE..])
            .map_err(|e| {
                if e.kind() == ErrorKind::UnexpectedEof {
                    TpmError::Framing(format!(
                        "channel closed before the declared {size} response bytes arrived"
                    ))
                } else {
                    TpmError::Channel(e)
                }
            })?;
    }

    debug!(
        "TPM response: {} bytes, rc=0x{:08x}",
        size, hdr.response_code
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_response, TpmCommand};
    use crate::constants::{tpm_rc, TpmCc, TpmSt, TpmSu};
    use crate::mock::MockChannel;
    use std::sync::Arc;

    fn startup_clear() -> Vec<u8> {
        let mut cmd = TpmCommand::new(TpmCc::Startup);
        cmd.add(&TpmSu::Clear);
        cmd.finalize()
    }

    #[test]
    fn test_exchange_success() {
        let transport = Transport::new(MockChannel::with_response(&encode_response(
            TpmSt::NoSessions,
            tpm_rc::SUCCESS,
            &[],
        )));

        let response = transport.execute(&startup_clear()).unwrap();
        assert!(response.is_success());

        let channel = transport.into_inner();
        assert_eq!(channel.write_calls(), 1);
        assert_eq!(channel.written(), startup_clear());
        assert_eq!(channel.read_calls(), 1);
        assert_eq!(channel.bytes_read(), HEADER_SIZE);
    }

    #[test]
    fn test_response_with_body() {
        let body = [0xDE, 0xAD, 0xBE, 0xEF];
        let transport = Transport::new(MockChannel::with_response(&encode_response(
            TpmSt::NoSessions,
            tpm_rc::SUCCESS,
            &body,
        )));

        let response = transport.execute(&startup_clear()).unwrap();
        assert_eq!(response.data, body);
    }

    #[test]
    fn test_partial_reads_and_writes_are_completed() {
        let body: Vec<u8> = (0..100).collect();
        let mut channel =
            MockChannel::with_response(&encode_response(TpmSt::Sessions, tpm_rc::SUCCESS, &body));
        channel.max_read = 3;
        channel.max_write = 5;
        channel.interrupt_first_read = true;
        let transport = Transport::new(channel);

        let response = transport.execute(&startup_clear()).unwrap();
        assert_eq!(response.data, body);
        assert_eq!(response.header.tag, TpmSt::Sessions);

        let channel = transport.into_inner();
        assert_eq!(channel.written(), startup_clear());
        assert!(channel.write_calls() > 1);
    }

    #[test]
    fn test_undersized_declared_size_is_framing() {
        let response = [0x80, 0x01, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00, 0x00, 0xFF];
        let transport = Transport::new(MockChannel::with_response(&response));

        let err = transport.send_command(&startup_clear()).unwrap_err();
        assert!(matches!(err, TpmError::Framing(_)));

        let channel = transport.into_inner();
        // Only the header was consumed
        assert_eq!(channel.read_calls(), 1);
        assert_eq!(channel.bytes_read(), HEADER_SIZE);
    }

    #[test]
    fn test_oversized_declared_size_is_framing() {
        let mut response = encode_response(TpmSt::NoSessions, 0, &[0u8; 64]);
        response[2..6].copy_from_slice(&(8192u32).to_be_bytes());
        let transport = Transport::new(MockChannel::with_response(&response));

        assert!(matches!(
            transport.send_command(&startup_clear()),
            Err(TpmError::Framing(_))
        ));
        assert_eq!(transport.into_inner().bytes_read(), HEADER_SIZE);
    }

    #[test]
    fn test_configured_limit() {
        let response = encode_response(TpmSt::NoSessions, 0, &[0u8; 64]);
        let config = TransportConfig {
            max_response_size: 32,
        };
        let transport = Transport::with_config(MockChannel::with_response(&response), config);
        assert!(matches!(
            transport.send_command(&startup_clear()),
            Err(TpmError::Framing(_))
        ));
    }

    #[test]
    fn test_limit_is_inclusive() {
        let config = TransportConfig {
            max_response_size: 32,
        };

        let at_limit = encode_response(TpmSt::NoSessions, 0, &[0x5A; 32 - HEADER_SIZE]);
        assert_eq!(at_limit.len(), 32);
        let transport =
            Transport::with_config(MockChannel::with_response(&at_limit), config.clone());
        let response = transport.execute(&startup_clear()).unwrap();
        assert_eq!(response.data.len(), 32 - HEADER_SIZE);
        assert!(!transport.is_desynced());

        let over_limit = encode_response(TpmSt::NoSessions, 0, &[0x5A; 33 - HEADER_SIZE]);
        let transport = Transport::with_config(MockChannel::with_response(&over_limit), config);
        assert!(matches!(
            transport.send_command(&startup_clear()),
            Err(TpmError::Framing(_))
        ));
        assert!(transport.is_desynced());
        assert_eq!(transport.into_inner().bytes_read(), HEADER_SIZE);
    }

    #[test]
    fn test_config_defaults() {
        let config: TransportConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_response_size, DEFAULT_MAX_RESPONSE_SIZE);
        let config: TransportConfig =
            serde_json::from_str(r#"{"max_response_size": 1024}"#).unwrap();
        assert_eq!(config.max_response_size, 1024);
    }

    #[test]
    fn test_truncated_body_is_framing() {
        let mut response = encode_response(TpmSt::NoSessions, 0, &[1, 2, 3, 4]);
        response.truncate(12);
        let transport = Transport::new(MockChannel::with_response(&response));
        assert!(matches!(
            transport.send_command(&startup_clear()),
            Err(TpmError::Framing(_))
        ));
    }

    #[test]
    fn test_short_header_is_malformed() {
        let transport = Transport::new(MockChannel::with_response(&[0x80, 0x01, 0x00]));
        assert!(matches!(
            transport.send_command(&startup_clear()),
            Err(TpmError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_write_failure_is_channel_error() {
        let mut channel = MockChannel::default();
        channel.fail_writes = true;
        let transport = Transport::new(channel);
        let err = transport.send_command(&startup_clear()).unwrap_err();
        assert!(matches!(err, TpmError::Channel(_)));
        assert_eq!(transport.into_inner().read_calls(), 0);
    }

    #[test]
    fn test_session_is_unusable_after_fatal_error() {
        let mut script = vec![0x80, 0x01, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00, 0x00];
        script.extend(encode_response(TpmSt::NoSessions, 0, &[]));
        let transport = Transport::new(MockChannel::with_response(&script));

        assert!(transport.send_command(&startup_clear()).is_err());
        assert!(transport.is_desynced());
        assert!(matches!(
            transport.send_command(&startup_clear()),
            Err(TpmError::SessionDesynced)
        ));

        let channel = transport.into_inner();
        assert_eq!(channel.write_calls(), 1);
    }

    #[test]
    fn test_remote_error_keeps_session_usable() {
        let mut script = encode_response(TpmSt::NoSessions, tpm_rc::INITIALIZE, &[]);
        script.extend(encode_response(TpmSt::NoSessions, tpm_rc::SUCCESS, &[]));
        let transport = Transport::new(MockChannel::with_response(&script));

        let first = transport.execute(&startup_clear()).unwrap();
        assert!(first.ensure_success().is_err());
        assert!(!transport.is_desynced());
        assert!(transport.execute(&startup_clear()).unwrap().is_success());
    }

    #[test]
    fn test_concurrent_callers_are_serialized() {
        let mut script = Vec::new();
        for i in 0..8u8 {
            script.extend(encode_response(TpmSt::NoSessions, 0, &[i; 16]));
        }
        let transport = Arc::new(Transport::new(MockChannel::with_response(&script)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let transport = Arc::clone(&transport);
                std::thread::spawn(move || transport.execute(&startup_clear()).unwrap())
            })
            .collect();

        let mut seen: Vec<u8> = handles
            .into_iter()
            .map(|h| {
                let response = h.join().unwrap();
                // Each response body is uniform, so interleaved reads would show up here
                assert!(response.data.iter().all(|b| *b == response.data[0]));
                response.data[0]
            })
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<u8>>());
    }
}
