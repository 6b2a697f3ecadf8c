// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! In-process TPM 2.0 simulator
//!
//! Implements just enough of a TPM to answer `TPM2_Startup` and
//! `TPM2_Shutdown` the way a real device does, including the error codes a
//! device returns for malformed or out-of-sequence commands.

use std::io::{self, ErrorKind, Read, Write};
use std::path::Path;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use tpm2_transport::codec::{encode_response, CommandHeader};
use tpm2_transport::{
    tpm_rc, ResponseBuffer, TpmCc, TpmSt, TpmSu, Unmarshal, HEADER_SIZE, MAX_COMMAND_SIZE,
};

type RcResult<T> = std::result::Result<T, u32>;

#[derive(Debug, Default)]
pub struct Simulator {
    started: bool,
    saved_state: bool,
}

impl Simulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Drop power: the next command must be `TPM2_Startup` again. State
    /// saved by `TPM2_Shutdown(STATE)` survives.
    pub fn power_cycle(&mut self) {
        info!("simulated power cycle");
        self.started = false;
    }

    /// Execute one complete command frame and return the response frame
    pub fn execute(&mut self, request: &[u8]) -> Vec<u8> {
        match self.dispatch(request) {
            Ok(tag) => encode_response(tag, tpm_rc::SUCCESS, &[]),
            Err(rc) => {
                debug!("command failed: rc=0x{rc:08x}");
                encode_response(TpmSt::NoSessions, rc, &[])
            }
        }
    }

    fn dispatch(&mut self, request: &[u8]) -> RcResult<TpmSt> {
        let header = parse_header(request)?;
        let Some(cc) = TpmCc::from_u32(header.command_code) else {
            return Err(tpm_rc::COMMAND_CODE);
        };
        if !self.started && cc != TpmCc::Startup {
            return Err(tpm_rc::INITIALIZE);
        }

        info!("executing TPM command 0x{:x}", header.command_code);
        let mut params = ResponseBuffer::new(&request[HEADER_SIZE..]);
        match cc {
            TpmCc::Startup => self.startup(&mut params)?,
            TpmCc::Shutdown => self.shutdown(&mut params)?,
        }
        Ok(header.tag)
    }

    fn startup(&mut self, params: &mut ResponseBuffer) -> RcResult<()> {
        if self.started {
            return Err(tpm_rc::INITIALIZE);
        }
        let su = startup_type(params)?;
        if su == TpmSu::State && !self.saved_state {
            return Err(tpm_rc::VALUE | tpm_rc::P_1);
        }
        self.started = true;
        self.saved_state = false;
        Ok(())
    }

    fn shutdown(&mut self, params: &mut ResponseBuffer) -> RcResult<()> {
        let su = startup_type(params)?;
        self.saved_state = su == TpmSu::State;
        Ok(())
    }
}

fn parse_header(request: &[u8]) -> RcResult<CommandHeader> {
    let mut buf = ResponseBuffer::new(request);
    let tag_raw = buf.get_u16().map_err(|_| tpm_rc::INSUFFICIENT)?;
    let size = buf.get_u32().map_err(|_| tpm_rc::INSUFFICIENT)?;
    let command_code = buf.get_u32().map_err(|_| tpm_rc::INSUFFICIENT)?;

    let tag = TpmSt::from_u16(tag_raw).ok_or(tpm_rc::BAD_TAG)?;
    if size as usize != request.len() {
        return Err(tpm_rc::COMMAND_SIZE);
    }
    Ok(CommandHeader {
        tag,
        size,
        command_code,
    })
}

fn startup_type(params: &mut ResponseBuffer) -> RcResult<TpmSu> {
    if params.remaining() < 2 {
        return Err(tpm_rc::INSUFFICIENT | tpm_rc::P_1);
    }
    TpmSu::unmarshal(params).map_err(|_| tpm_rc::VALUE | tpm_rc::P_1)
}

/// Unlink the listening socket; a socket that is already gone is not an error
pub fn remove_socket(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Serve framed commands from `stream` until the peer hangs up
pub fn serve<S: Read + Write>(sim: &Mutex<Simulator>, stream: &mut S) -> io::Result<()> {
    loop {
        let mut header = [0u8; HEADER_SIZE];
        match stream.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }

        let size = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;
        if !(HEADER_SIZE..=MAX_COMMAND_SIZE).contains(&size) {
            // The frame boundary is lost; answer once and drop the connection
            warn!("rejecting command with size {size}");
            let response = encode_response(TpmSt::NoSessions, tpm_rc::COMMAND_SIZE, &[]);
            stream.write_all(&response)?;
            return Ok(());
        }

        let mut request = vec![0u8; size];
        request[..HEADER_SIZE].copy_from_slice(&header);
        stream.read_exact(&mut request[HEADER_SIZE..])?;

        let response = sim
            .lock()
            .map_err(|_| io::Error::other("simulator state poisoned"))?
            .execute(&request);
        stream.write_all(&response)?;
        stream.flush()?;
    }
}
