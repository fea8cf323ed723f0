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
use serialport::{SerialPort as SerialPortTrait, DataBits, Parity, StopBits};
use tracing::warn;

/// Longest response line accepted; longer lines are dropped up to their `\n`
pub const MAX_LINE: usize = 256;

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Line oriented serial operations needed by the programmer protocol
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    /// Read one complete line, up to and including its `\n`. Returns an empty
    /// line if `timeout` expires first; a partial line is kept for the next call.
    fn read_line(&mut self, timeout: Duration) -> std::io::Result<Vec<u8>>;
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Real serial port implementation that wraps the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
    lines: LineReader,
}

impl RealSerialPort {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
    ) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_millis(1000))
            .open()?;

        Ok(RealSerialPort { port, lines: LineReader::new() })
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> std::io::Result<Vec<u8>> {
        self.port.set_timeout(timeout)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        self.lines.read_line(&mut self.port)
    }
}

// ============================================================================
// Line Assembly
// ============================================================================

/// Assembles newline terminated lines from a byte stream whose reads time out.
#[derive(Default)]
pub struct LineReader {
    pending: Vec<u8>,
    // Inside an over-long line, dropping bytes until its `\n`
    discarding: bool,
}

impl LineReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next complete line, or an empty one if the source times out first.
    pub fn read_line<R: Read + ?Sized>(&mut self, source: &mut R) -> std::io::Result<Vec<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match source.read(&mut byte) {
                Ok(0) => return Ok(Vec::new()),
                Ok(_) if self.discarding => {
                    if byte[0] == b'\n' {
                        self.discarding = false;
                    }
                }
                Ok(_) => {
                    self.pending.push(byte[0]);
                    if byte[0] == b'\n' {
                        return Ok(std::mem::take(&mut self.pending));
                    }
                    if self.pending.len() >= MAX_LINE {
                        warn!("Dropping response line longer than {} bytes", MAX_LINE);
                        self.pending.clear();
                        self.discarding = true;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(Vec::new()),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

#[cfg(test)]
pub struct MockSerialPort {
    // Lines to return on reads (None = timeout with nothing received)
    read_buffer: Vec<Option<Vec<u8>>>,
    read_pos: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(responses: Vec<Option<Vec<u8>>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            read_buffer: responses,
            read_pos: 0,
            write_log: Vec::new(),
            expected_writes,
        }
    }

    /// Script of text lines, each terminated with CRLF the way the device sends them.
    pub fn lines(lines: &[&str], expected_writes: &[u8]) -> Self {
        let responses = lines
            .iter()
            .map(|line| Some(format!("{}\r\n", line).into_bytes()))
            .collect();
        Self::new(responses, expected_writes.to_vec())
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> std::io::Result<Vec<u8>> {
        // Reading past the script is a test failure, not a timeout
        if self.read_pos >= self.read_buffer.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Mock script exhausted"
            ));
        }

        let line = self.read_buffer[self.read_pos].clone().unwrap_or_default();
        self.read_pos += 1;
        Ok(line)
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
            self.read_buffer.len(),
            "MockSerialPort dropped with {} unconsumed responses (read {} of {} lines)",
            self.read_buffer.len() - self.read_pos,
            self.read_pos,
            self.read_buffer.len()
        );

        assert_eq!(
            String::from_utf8_lossy(&self.write_log),
            String::from_utf8_lossy(&self.expected_writes),
            "MockSerialPort write log mismatch!"
        );
    }
}

// ============================================================================
// Chunked Byte Source for Testing
// ============================================================================

/// Byte stream delivered in chunks (None = read timeout), as a serial port
/// hands it over.
#[cfg(test)]
pub struct ChunkedSource {
    chunks: std::collections::VecDeque<Option<Vec<u8>>>,
}

#[cfg(test)]
impl ChunkedSource {
    pub fn new(chunks: Vec<Option<&[u8]>>) -> Self {
        ChunkedSource { chunks: chunks.into_iter().map(|c| c.map(<[u8]>::to_vec)).collect() }
    }
}

#[cfg(test)]
impl Read for ChunkedSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.chunks.pop_front() {
            Some(Some(mut chunk)) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.chunks.push_front(Some(chunk.split_off(n)));
                }
                Ok(n)
            }
            _ => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "Chunk timeout")),
        }
    }
}

/// Serial port that assembles lines from a `ChunkedSource` like `RealSerialPort` does.
#[cfg(test)]
pub struct ChunkedSerialPort {
    source: ChunkedSource,
    lines: LineReader,
}

#[cfg(test)]
impl ChunkedSerialPort {
    pub fn new(chunks: Vec<Option<&[u8]>>) -> Self {
        ChunkedSerialPort { source: ChunkedSource::new(chunks), lines: LineReader::new() }
    }
}

#[cfg(test)]
impl SerialPort for ChunkedSerialPort {
    fn write_all(&mut self, _buf: &[u8]) -> std::io::Result<()> {
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> std::io::Result<Vec<u8>> {
        self.lines.read_line(&mut self.source)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_split_by_timeout_is_kept() {
        let mut source = ChunkedSource::new(vec![Some(&b"O"[..]), None, Some(&b"K\r\n"[..])]);
        let mut lines = LineReader::new();

        assert_eq!(lines.read_line(&mut source).unwrap(), Vec::<u8>::new());
        assert_eq!(lines.read_line(&mut source).unwrap(), b"OK\r\n".to_vec());
    }

    #[test]
    fn test_several_lines_in_one_chunk() {
        let mut source = ChunkedSource::new(vec![Some(&b"info\r\nOK\r\n"[..])]);
        let mut lines = LineReader::new();

        assert_eq!(lines.read_line(&mut source).unwrap(), b"info\r\n".to_vec());
        assert_eq!(lines.read_line(&mut source).unwrap(), b"OK\r\n".to_vec());
        assert_eq!(lines.read_line(&mut source).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_overlong_line_dropped_whole() {
        let mut long = vec![b'D'; MAX_LINE];
        long.extend_from_slice(b"OK tail\r\n");
        let mut source = ChunkedSource::new(vec![Some(&long[..]), Some(&b"ER\r\n"[..])]);
        let mut lines = LineReader::new();

        // Nothing of the long line, including its `OK` tail, comes through
        assert_eq!(lines.read_line(&mut source).unwrap(), b"ER\r\n".to_vec());
    }

    #[test]
    fn test_overlong_line_dropped_across_timeout() {
        let long = vec![b'7'; MAX_LINE + 10];
        let mut source = ChunkedSource::new(vec![Some(&long[..]), None, Some(&b"OK tail\r\nOK\r\n"[..])]);
        let mut lines = LineReader::new();

        assert_eq!(lines.read_line(&mut source).unwrap(), Vec::<u8>::new());
        assert_eq!(lines.read_line(&mut source).unwrap(), b"OK\r\n".to_vec());
    }
}
