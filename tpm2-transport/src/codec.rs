// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM command/response framing
//!
//! Every frame is `tag:u16 | size:u32 | code:u32 | body`, where `size` counts
//! the whole frame including the 10 header bytes.

use crate::constants::*;
use crate::error::{Result, TpmError};
use crate::marshal::*;
use crate::response_code::{classify, ErrorClassification};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    pub tag: TpmSt,
    pub size: u32,
    pub command_code: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub tag: TpmSt,
    pub size: u32,
    pub response_code: u32,
}

fn encode_frame(tag: TpmSt, code: u32, body: &[u8]) -> Vec<u8> {
    let mut buf = CommandBuffer::with_capacity(HEADER_SIZE + body.len());
    buf.put_u16(tag.to_u16());
    buf.put_u32(0); // Size placeholder
    buf.put_u32(code);
    buf.put_bytes(body);
    let size = buf.len() as u32;
    buf.update_u32(2, size);
    buf.into_vec()
}

/// Serialize a command. The size field is always derived from `body`.
pub fn encode_command(tag: TpmSt, command_code: u32, body: &[u8]) -> Vec<u8> {
    encode_frame(tag, command_code, body)
}

/// Serialize a response; the TPM-side mirror of [`encode_command`]
pub fn encode_response(tag: TpmSt, response_code: u32, body: &[u8]) -> Vec<u8> {
    encode_frame(tag, response_code, body)
}

/// Parse the first 10 bytes of a response, returning the header and whatever
/// follows it
pub fn decode_response_header(bytes: &[u8]) -> Result<(ResponseHeader, &[u8])> {
    if bytes.len() < HEADER_SIZE {
        return Err(TpmError::MalformedResponse(format!(
            "response too short: {} bytes",
            bytes.len()
        )));
    }

    let mut buf = ResponseBuffer::new(bytes);
    let tag_raw = buf.get_u16()?;
    let tag = TpmSt::from_u16(tag_raw).ok_or_else(|| {
        TpmError::MalformedResponse(format!("invalid response tag: 0x{tag_raw:04x}"))
    })?;
    let size = buf.get_u32()?;
    let response_code = buf.get_u32()?;

    let header = ResponseHeader {
        tag,
        size,
        response_code,
    };
    Ok((header, buf.rest()))
}

/// TPM command builder
pub struct TpmCommand {
    buf: CommandBuffer,
}

impl TpmCommand {
    /// Create a new command without sessions
    pub fn new(command_code: TpmCc) -> Self {
        Self::with_tag(TpmSt::NoSessions, command_code)
    }

    /// Create a new command with sessions
    pub fn with_sessions(command_code: TpmCc) -> Self {
        Self::with_tag(TpmSt::Sessions, command_code)
    }

    fn with_tag(tag: TpmSt, command_code: TpmCc) -> Self {
        let mut buf = CommandBuffer::with_capacity(64);

        // Header: tag (2) + size (4) + command code (4)
        buf.put_u16(tag.to_u16());
        buf.put_u32(0); // Size placeholder
        buf.put_u32(command_code.to_u32());

        Self { buf }
    }

    /// Append a big-endian u16 parameter
    pub fn add_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    /// Append a big-endian u32 parameter
    pub fn add_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    /// Append raw bytes
    pub fn add_bytes(&mut self, data: &[u8]) {
        self.buf.put_bytes(data);
    }

    /// Add a marshallable structure
    pub fn add<T: Marshal>(&mut self, value: &T) {
        value.marshal(&mut self.buf);
    }

    /// Finalize the command and return the bytes
    pub fn finalize(mut self) -> Vec<u8> {
        let size = self.buf.len() as u32;
        self.buf.update_u32(2, size);
        self.buf.into_vec()
    }
}

/// A complete TPM response
#[derive(Debug)]
pub struct TpmResponse {
    pub header: ResponseHeader,
    pub data: Vec<u8>,
}

impl TpmResponse {
    /// Parse a complete response frame. The declared size must match the
    /// frame length exactly.
    pub fn parse(response: &[u8]) -> Result<Self> {
        let (header, rest) = decode_response_header(response)?;
        if header.size as usize != response.len() {
            return Err(TpmError::Framing(format!(
                "response size mismatch: declared {}, got {}",
                header.size,
                response.len()
            )));
        }

        Ok(Self {
            header,
            data: rest.to_vec(),
        })
    }

    /// Raw response code from the header
    pub fn response_code(&self) -> u32 {
        self.header.response_code
    }

    /// Check if the response indicates success
    pub fn is_success(&self) -> bool {
        self.header.response_code == tpm_rc::SUCCESS
    }

    /// Decompose the response code; `None` on success
    pub fn classification(&self) -> Option<ErrorClassification> {
        classify(self.header.response_code)
    }

    /// Ensure the response is successful
    pub fn ensure_success(&self) -> Result<()> {
        match self.classification() {
            None => Ok(()),
            Some(class) => Err(TpmError::Remote(class)),
        }
    }
}
