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

//! Handshake engine
//!
//! After every command the device prints any number of informational lines
//! and then a single line starting with `OK` or `ER`. One handshake cycle
//! consumes response lines until one of those terminal lines arrives, the
//! device goes quiet for too many lines, or an optional deadline passes.

use std::io::Write;
use std::time::{Duration, Instant};
use tracing::debug;
use crate::protocol::{self, Response, MAX_CHATTER};
use crate::serial::SerialPort;
use crate::transfer::TransferError;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Empty lines tolerated before the device is considered wedged
    pub max_chatter: usize,
    /// Wait for a single response line
    pub line_timeout: Duration,
    /// Wall clock limit for a whole cycle, if any
    pub deadline: Option<Duration>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        HandshakeConfig {
            max_chatter: MAX_CHATTER,
            line_timeout: Duration::from_millis(1000),
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Acknowledged { lines: usize },
    Failed(HandshakeFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeFailure {
    /// Terminal `ER` line, kept as sent
    DeviceReported(String),
    /// Bytes that are not ASCII text
    ChannelDecode(Vec<u8>),
    /// Number of empty lines seen
    ExcessiveChatter(usize),
    DeadlineExpired(Duration),
}

impl HandshakeOutcome {
    /// Map a failed cycle onto the fatal transfer error.
    pub fn into_result(self) -> Result<usize, TransferError> {
        match self {
            HandshakeOutcome::Acknowledged { lines } => Ok(lines),
            HandshakeOutcome::Failed(HandshakeFailure::DeviceReported(line)) => {
                Err(TransferError::DeviceReported(line))
            }
            HandshakeOutcome::Failed(HandshakeFailure::ChannelDecode(bytes)) => {
                Err(TransferError::ChannelDecode(bytes))
            }
            HandshakeOutcome::Failed(HandshakeFailure::ExcessiveChatter(count)) => {
                Err(TransferError::ExcessiveChatter(count))
            }
            HandshakeOutcome::Failed(HandshakeFailure::DeadlineExpired(limit)) => {
                Err(TransferError::DeadlineExpired(limit))
            }
        }
    }
}

/// Human readable status reported while a transfer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress<'a> {
    /// Command line sent to the device, without line ending
    Command(&'a str),
    /// Non-empty line received from the device, without line ending
    Response(&'a str),
    /// Record left out because its checksum does not match
    Skipped(&'a str),
}

/// Where a cycle delivers what it receives.
pub struct Sinks<'a> {
    /// Raw data lines, exactly as received
    pub output: Option<&'a mut dyn Write>,
    pub progress: &'a mut dyn for<'p> FnMut(Progress<'p>),
}

/// Result of feeding one line into the state machine.
#[derive(Debug, PartialEq, Eq)]
pub enum Transition<'a> {
    Data(&'a str),
    Chatter,
    Done(HandshakeOutcome),
}

// ============================================================================
// State Machine
// ============================================================================

/// State of one handshake cycle, independent of any I/O.
pub struct Handshake {
    max_chatter: usize,
    chatter: usize,
    lines: usize,
}

impl Handshake {
    pub fn new(max_chatter: usize) -> Self {
        Handshake { max_chatter, chatter: 0, lines: 0 }
    }

    /// Lines consumed so far
    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn chatter(&self) -> usize {
        self.chatter
    }

    /// Advance on one raw line as read from the channel.
    pub fn accept<'a>(&mut self, raw: &'a [u8]) -> Transition<'a> {
        self.lines += 1;

        if !raw.is_ascii() {
            return Transition::Done(HandshakeOutcome::Failed(HandshakeFailure::ChannelDecode(raw.to_vec())));
        }
        // ASCII is valid UTF-8
        let text = std::str::from_utf8(raw).unwrap_or_default();
        let text = text.trim_end_matches(['\r', '\n']);

        match protocol::classify(text) {
            Response::Success => Transition::Done(HandshakeOutcome::Acknowledged { lines: self.lines }),
            Response::Failure => {
                Transition::Done(HandshakeOutcome::Failed(HandshakeFailure::DeviceReported(text.to_string())))
            }
            Response::Data => Transition::Data(text),
            Response::Chatter => {
                self.chatter += 1;
                if self.chatter > self.max_chatter {
                    Transition::Done(HandshakeOutcome::Failed(HandshakeFailure::ExcessiveChatter(self.chatter)))
                } else {
                    Transition::Chatter
                }
            }
        }
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Run one cycle: read lines until the state machine reaches a terminal state.
pub fn run(
    serial: &mut dyn SerialPort,
    sinks: &mut Sinks<'_>,
    config: &HandshakeConfig,
) -> std::io::Result<HandshakeOutcome> {
    let mut handshake = Handshake::new(config.max_chatter);
    let started = Instant::now();

    loop {
        if let Some(limit) = config.deadline {
            if started.elapsed() >= limit {
                debug!("Handshake deadline of {:?} expired after {} lines", limit, handshake.lines());
                return Ok(HandshakeOutcome::Failed(HandshakeFailure::DeadlineExpired(limit)));
            }
        }

        let raw = serial.read_line(config.line_timeout)?;
        match handshake.accept(&raw) {
            Transition::Data(text) => {
                debug!("Received: {:?}", text);
                (sinks.progress)(Progress::Response(text));
                if let Some(output) = sinks.output.as_mut() {
                    output.write_all(&raw)?;
                }
            }
            Transition::Chatter => {
                debug!("Chatter {}/{}", handshake.chatter(), config.max_chatter);
            }
            Transition::Done(outcome) => {
                if let Ok(text) = std::str::from_utf8(&raw) {
                    let text = text.trim_end_matches(['\r', '\n']);
                    if !text.is_empty() {
                        (sinks.progress)(Progress::Response(text));
                    }
                }
                debug!("Handshake finished: {:?}", outcome);
                return Ok(outcome);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::{ChunkedSerialPort, MockSerialPort};

    fn run_script(
        serial: &mut dyn SerialPort,
        output: &mut Vec<u8>,
        progress: &mut Vec<String>,
        config: &HandshakeConfig,
    ) -> HandshakeOutcome {
        let mut record = |event: Progress<'_>| {
            if let Progress::Response(text) = event {
                progress.push(text.to_string());
            }
        };
        let mut sinks = Sinks { output: Some(output as &mut dyn Write), progress: &mut record };
        run(serial, &mut sinks, config).expect("Handshake I/O failed")
    }

    #[test]
    fn test_data_then_ok() {
        let mut serial = MockSerialPort::lines(&["info1", "", "info2", "OK"], b"");
        let mut output = Vec::new();
        let mut progress = Vec::new();

        let outcome = run_script(&mut serial, &mut output, &mut progress, &HandshakeConfig::default());

        assert_eq!(outcome, HandshakeOutcome::Acknowledged { lines: 4 });
        assert_eq!(output, b"info1\r\ninfo2\r\n".to_vec());
        assert_eq!(progress, vec!["info1", "info2", "OK"]);
    }

    #[test]
    fn test_ok_split_across_reads() {
        let mut serial = ChunkedSerialPort::new(vec![
            Some(&b"D000 C3"[..]),
            Some(&b" 93\r\nO"[..]),
            None,
            Some(&b"K\r\n"[..]),
        ]);
        let mut output = Vec::new();
        let mut progress = Vec::new();

        let outcome = run_script(&mut serial, &mut output, &mut progress, &HandshakeConfig::default());

        assert_eq!(outcome, HandshakeOutcome::Acknowledged { lines: 3 });
        assert_eq!(output, b"D000 C3 93\r\n".to_vec());
        assert_eq!(progress, vec!["D000 C3 93", "OK"]);
    }

    #[test]
    fn test_chatter_counted_not_delivered() {
        let mut handshake = Handshake::new(MAX_CHATTER);
        assert_eq!(handshake.accept(b"info1\r\n"), Transition::Data("info1"));
        assert_eq!(handshake.accept(b"\r\n"), Transition::Chatter);
        assert_eq!(handshake.accept(b""), Transition::Chatter);
        assert_eq!(handshake.chatter(), 2);
        assert_eq!(
            handshake.accept(b"OK\r\n"),
            Transition::Done(HandshakeOutcome::Acknowledged { lines: 4 })
        );
    }

    #[test]
    fn test_excessive_chatter() {
        let mut serial = MockSerialPort::new(vec![None; MAX_CHATTER + 1], Vec::new());
        let mut output = Vec::new();
        let mut progress = Vec::new();

        // 101 empty lines are consumed, a 102nd read would exhaust the mock
        let outcome = run_script(&mut serial, &mut output, &mut progress, &HandshakeConfig::default());

        assert_eq!(outcome, HandshakeOutcome::Failed(HandshakeFailure::ExcessiveChatter(101)));
        assert!(output.is_empty());
        assert!(progress.is_empty());
    }

    #[test]
    fn test_chatter_below_ceiling_is_tolerated() {
        let mut script = vec![None; MAX_CHATTER];
        script.push(Some(b"OK\r\n".to_vec()));
        let mut serial = MockSerialPort::new(script, Vec::new());
        let mut output = Vec::new();
        let mut progress = Vec::new();

        let outcome = run_script(&mut serial, &mut output, &mut progress, &HandshakeConfig::default());

        assert_eq!(outcome, HandshakeOutcome::Acknowledged { lines: MAX_CHATTER + 1 });
    }

    #[test]
    fn test_device_error_stops_immediately() {
        let mut serial = MockSerialPort::lines(&["ERR: bad address"], b"");
        let mut output = Vec::new();
        let mut progress = Vec::new();

        let outcome = run_script(&mut serial, &mut output, &mut progress, &HandshakeConfig::default());

        assert_eq!(
            outcome,
            HandshakeOutcome::Failed(HandshakeFailure::DeviceReported("ERR: bad address".to_string()))
        );
        assert!(output.is_empty());
        assert_eq!(progress, vec!["ERR: bad address"]);
    }

    #[test]
    fn test_non_ascii_is_fatal() {
        let mut serial = MockSerialPort::new(
            vec![Some(b"info\r\n".to_vec()), Some(vec![0x4F, 0xFF, 0x0D, 0x0A])],
            Vec::new(),
        );
        let mut output = Vec::new();
        let mut progress = Vec::new();

        let outcome = run_script(&mut serial, &mut output, &mut progress, &HandshakeConfig::default());

        assert_eq!(
            outcome,
            HandshakeOutcome::Failed(HandshakeFailure::ChannelDecode(vec![0x4F, 0xFF, 0x0D, 0x0A]))
        );
        assert_eq!(output, b"info\r\n".to_vec());
    }

    #[test]
    fn test_zero_deadline_expires_before_reading() {
        let mut serial = MockSerialPort::new(Vec::new(), Vec::new());
        let mut output = Vec::new();
        let mut progress = Vec::new();
        let config = HandshakeConfig { deadline: Some(Duration::ZERO), ..HandshakeConfig::default() };

        let outcome = run_script(&mut serial, &mut output, &mut progress, &config);

        assert_eq!(outcome, HandshakeOutcome::Failed(HandshakeFailure::DeadlineExpired(Duration::ZERO)));
    }

    #[test]
    fn test_custom_chatter_ceiling() {
        let mut serial = MockSerialPort::new(vec![None, None, None], Vec::new());
        let mut output = Vec::new();
        let mut progress = Vec::new();
        let config = HandshakeConfig { max_chatter: 2, ..HandshakeConfig::default() };

        let outcome = run_script(&mut serial, &mut output, &mut progress, &config);

        assert_eq!(outcome, HandshakeOutcome::Failed(HandshakeFailure::ExcessiveChatter(3)));
    }

    #[test]
    fn test_into_result() {
        assert_eq!(HandshakeOutcome::Acknowledged { lines: 2 }.into_result().unwrap(), 2);
        assert!(matches!(
            HandshakeOutcome::Failed(HandshakeFailure::DeviceReported("ER".into())).into_result(),
            Err(TransferError::DeviceReported(_))
        ));
        assert!(matches!(
            HandshakeOutcome::Failed(HandshakeFailure::ExcessiveChatter(101)).into_result(),
            Err(TransferError::ExcessiveChatter(101))
        ));
    }
}
