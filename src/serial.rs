// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::io::{Read, Write};
use std::time::Duration;
use serialport::{SerialPort as SerialPortTrait, ClearBuffer, DataBits, FlowControl, Parity, StopBits};

// ============================================================================
// Transport Trait
// ============================================================================

/// Byte transport a logger session runs over
pub trait Transport: Send {
    /// Wait up to `timeout` for input and read what is available.
    /// Fails with `ErrorKind::TimedOut` when nothing arrived.
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize>;

    /// Single write attempt. Returns how many bytes the device accepted.
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize>;

    /// Throw away pending input, output or both
    fn discard(&mut self, which: ClearBuffer) -> std::io::Result<()>;
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Real serial port implementation that wraps the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
        flow_control: FlowControl,
    ) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(flow_control)
            .timeout(Duration::from_millis(100))
            .open()?;

        log::debug!("Opened {} at {} baud", port_name, baud_rate);
        Ok(RealSerialPort { port })
    }
}

impl Transport for RealSerialPort {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        self.port.set_timeout(timeout)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        self.port.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.port.write(buf)?;
        self.port.flush()?;
        Ok(written)
    }

    fn discard(&mut self, which: ClearBuffer) -> std::io::Result<()> {
        self.port.clear(which)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }
}

impl Drop for RealSerialPort {
    fn drop(&mut self) {
        log::debug!("Closing {}", self.port.name().unwrap_or_default());
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

/// One scripted answer to a `read_timeout` call
#[cfg(test)]
#[derive(Debug, Clone)]
pub enum MockRead {
    Chunk(Vec<u8>),
    Timeout,
    Fail(std::io::ErrorKind),
}

#[cfg(test)]
impl MockRead {
    pub fn text(bytes: &[u8]) -> Self {
        MockRead::Chunk(bytes.to_vec())
    }
}

#[cfg(test)]
pub struct MockSerialPort {
    reads: Vec<MockRead>,
    read_pos: usize,
    // Offset into a chunk that did not fit the caller's buffer
    chunk_pos: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
    // Accept at most this many bytes per write
    write_limit: Option<usize>,
    write_error: Option<std::io::ErrorKind>,
    // Track discard requests, verified only when expectations are set
    discard_log: Vec<ClearBuffer>,
    expected_discards: Option<Vec<ClearBuffer>>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(reads: Vec<MockRead>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            reads,
            read_pos: 0,
            chunk_pos: 0,
            write_log: Vec::new(),
            expected_writes,
            write_limit: None,
            write_error: None,
            discard_log: Vec::new(),
            expected_discards: None,
        }
    }

    pub fn with_expected_discards(mut self, discards: Vec<ClearBuffer>) -> Self {
        self.expected_discards = Some(discards);
        self
    }

    pub fn with_write_limit(mut self, limit: usize) -> Self {
        self.write_limit = Some(limit);
        self
    }

    pub fn with_write_error(mut self, kind: std::io::ErrorKind) -> Self {
        self.write_error = Some(kind);
        self
    }
}

#[cfg(test)]
impl Transport for MockSerialPort {
    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> std::io::Result<usize> {
        // Out of responses = timeout
        let Some(next) = self.reads.get(self.read_pos) else {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "Mock timeout"));
        };

        match next {
            MockRead::Timeout => {
                self.read_pos += 1;
                Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "Mock timeout"))
            }
            MockRead::Fail(kind) => {
                let kind = *kind;
                self.read_pos += 1;
                Err(std::io::Error::new(kind, "Mock failure"))
            }
            MockRead::Chunk(bytes) => {
                let rest = &bytes[self.chunk_pos..];
                let n = rest.len().min(buf.len());
                buf[..n].copy_from_slice(&rest[..n]);
                if n == rest.len() {
                    self.read_pos += 1;
                    self.chunk_pos = 0;
                } else {
                    self.chunk_pos += n;
                }
                Ok(n)
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(kind) = self.write_error {
            return Err(std::io::Error::new(kind, "Mock write failure"));
        }
        let n = self.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        self.write_log.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn discard(&mut self, which: ClearBuffer) -> std::io::Result<()> {
        self.discard_log.push(which);
        Ok(())
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.read_pos,
            self.reads.len(),
            "MockSerialPort dropped with {} unconsumed reads (consumed {} of {})",
            self.reads.len() - self.read_pos,
            self.read_pos,
            self.reads.len()
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockSerialPort write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );

        if let Some(expected) = &self.expected_discards {
            assert_eq!(
                &self.discard_log,
                expected,
                "MockSerialPort discard log mismatch!"
            );
        }
    }
}
