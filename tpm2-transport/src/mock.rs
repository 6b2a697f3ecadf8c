// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Scripted byte channel for tests

use std::io::{self, Cursor, Read, Write};

/// Replays a fixed response script and records everything written to it
pub(crate) struct MockChannel {
    input: Cursor<Vec<u8>>,
    written: Vec<u8>,
    write_calls: usize,
    read_calls: usize,
    bytes_read: usize,
    /// Upper bound on bytes returned by one `read` call
    pub max_read: usize,
    /// Upper bound on bytes accepted by one `write` call
    pub max_write: usize,
    pub interrupt_first_read: bool,
    pub fail_writes: bool,
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::with_response(&[])
    }
}

impl MockChannel {
    pub fn with_response(script: &[u8]) -> Self {
        Self {
            input: Cursor::new(script.to_vec()),
            written: Vec::new(),
            write_calls: 0,
            read_calls: 0,
            bytes_read: 0,
            max_read: usize::MAX,
            max_write: usize::MAX,
            interrupt_first_read: false,
            fail_writes: false,
        }
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.clone()
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls
    }

    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }
}

impl Read for MockChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.interrupt_first_read {
            self.interrupt_first_read = false;
            return Err(io::ErrorKind::Interrupted.into());
        }
        self.read_calls += 1;
        let limit = buf.len().min(self.max_read);
        let n = self.input.read(&mut buf[..limit])?;
        self.bytes_read += n;
        Ok(n)
    }
}

impl Write for MockChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
        }
        self.write_calls += 1;
        let n = buf.len().min(self.max_write);
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
