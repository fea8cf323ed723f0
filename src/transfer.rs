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

use std::marker::PhantomData;
use std::io::{BufRead, Write};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use crate::command::{self, ReadRequest};
use crate::handshake::{self, HandshakeConfig, Progress, Sinks};
use crate::record::{self, NasRecord, RecordError};
use crate::serial::SerialPort;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad record: {0}")]
    Record(#[from] RecordError),

    #[error("problem converting serial port data to ASCII: {0:02X?}")]
    ChannelDecode(Vec<u8>),

    #[error("error reported by device: {0}")]
    DeviceReported(String),

    #[error("too much chatter on the serial port ({0} empty lines)")]
    ExcessiveChatter(usize),

    #[error("no response from device within {0:?}")]
    DeadlineExpired(Duration),

    #[error("transfer complete")]
    TransferComplete(TransferStats),
}

// ============================================================================
// Session
// ============================================================================

/// What to do with a record whose checksum does not add up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumPolicy {
    /// Send it anyway and let the device decide
    Ignore,
    /// Warn and leave it out
    Skip,
    /// Abort the transfer
    #[default]
    Reject,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub records_sent: usize,
    pub records_skipped: usize,
    pub response_lines: usize,
}

pub enum Job {
    /// One read command, its data lines go to the output sink
    Read(ReadRequest),
    /// One write command per line of a NAS file
    Write(Box<dyn BufRead + Send>),
}

/// Everything one transfer owns for its lifetime: the channel, the sinks and
/// the settings.
pub struct TransferSession {
    serial: Box<dyn SerialPort>,
    output: Option<Box<dyn Write + Send>>,
    progress: Box<dyn for<'p> FnMut(Progress<'p>) + Send>,
    handshake: HandshakeConfig,
    checksum_policy: ChecksumPolicy,
    wait_ready: bool,
}

impl TransferSession {
    pub fn new(serial: Box<dyn SerialPort>) -> Self {
        TransferSession {
            serial,
            output: None,
            progress: Box::new(|_: Progress<'_>| {}),
            handshake: HandshakeConfig::default(),
            checksum_policy: ChecksumPolicy::default(),
            wait_ready: true,
        }
    }

    /// Destination for data lines received during a read.
    #[must_use]
    pub fn with_output(mut self, output: Box<dyn Write + Send>) -> Self {
        self.output = Some(output);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Box<dyn for<'p> FnMut(Progress<'p>) + Send>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_handshake(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = handshake;
        self
    }

    #[must_use]
    pub fn with_checksum_policy(mut self, policy: ChecksumPolicy) -> Self {
        self.checksum_policy = policy;
        self
    }

    /// Whether to wait for the banner the programmer prints after a reset.
    #[must_use]
    pub fn with_wait_ready(mut self, wait_ready: bool) -> Self {
        self.wait_ready = wait_ready;
        self
    }

    fn send(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.serial.write_all(line)?;
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches(['\r', '\n']);
        debug!("Sent: {:?}", text);
        (self.progress)(Progress::Command(text));
        Ok(())
    }

    fn await_response(&mut self, persist: bool) -> Result<usize, TransferError> {
        let mut sinks = Sinks {
            output: match self.output.as_deref_mut() {
                Some(output) if persist => Some(output as &mut dyn Write),
                _ => None,
            },
            progress: &mut *self.progress,
        };
        let outcome = handshake::run(&mut *self.serial, &mut sinks, &self.handshake)?;
        outcome.into_result()
    }
}

// ============================================================================
// States
// ============================================================================

pub struct WaitReady;
pub struct NextCommand;
pub struct AwaitAck;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct TransferFsm<State> {
    state: PhantomData<State>,
    session: TransferSession,
    job: Job,
    read_sent: bool,
    stats: TransferStats,
}

// ============================================================================
// Trait
// ============================================================================

pub trait TransferState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn TransferState>, TransferError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> TransferFsm<S> {
    fn transition<T>(self) -> Box<TransferFsm<T>> {
        Box::new(TransferFsm {
            state: PhantomData,
            session: self.session,
            job: self.job,
            read_sent: self.read_sent,
            stats: self.stats,
        })
    }

    fn io_error(&self, e: std::io::Error) -> TransferError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        TransferError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }

    fn complete(mut self) -> TransferError {
        if let Some(output) = self.session.output.as_mut() {
            if let Err(e) = output.flush() {
                return self.io_error(e);
            }
        }
        info!(
            "Transfer finished: {} records sent, {} skipped",
            self.stats.records_sent, self.stats.records_skipped
        );
        TransferError::TransferComplete(self.stats)
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl TransferState for TransferFsm<WaitReady> {
    fn step(self: Box<Self>) -> Result<Box<dyn TransferState>, TransferError> {
        let mut fsm = *self;
        if fsm.session.wait_ready {
            debug!("Waiting for device to report ready");
            // The banner is never persisted
            fsm.stats.response_lines += fsm.session.await_response(false)?;
            info!("Device ready");
        }
        let next = fsm.transition::<NextCommand>();
        Ok(next as Box<dyn TransferState>)
    }
}

impl TransferState for TransferFsm<NextCommand> {
    fn step(self: Box<Self>) -> Result<Box<dyn TransferState>, TransferError> {
        let mut fsm = *self;

        let line = match fsm.next_command() {
            Ok(Some(line)) => line,
            Ok(None) => return Err(fsm.complete()),
            Err(TransferError::Io(e)) => return Err(fsm.io_error(e)),
            Err(e) => return Err(e),
        };

        if let Err(e) = fsm.session.send(&line) {
            return Err(fsm.io_error(e));
        }
        let next = fsm.transition::<AwaitAck>();
        Ok(next as Box<dyn TransferState>)
    }
}

impl TransferFsm<NextCommand> {
    /// Frame the next command to send, or `None` once the job is done.
    fn next_command(&mut self) -> Result<Option<Vec<u8>>, TransferError> {
        let source = match &mut self.job {
            Job::Read(_) if self.read_sent => return Ok(None),
            Job::Read(request) => {
                self.read_sent = true;
                return Ok(Some(command::frame_read(request)));
            }
            Job::Write(source) => source,
        };

        loop {
            let mut buf = Vec::new();
            if source.read_until(b'\n', &mut buf)? == 0 {
                debug!("End of input");
                return Ok(None);
            }
            let raw = buf.trim_ascii();
            if raw.is_empty() {
                debug!("Empty line, end of input");
                return Ok(None);
            }
            if record::is_terminator(raw) {
                debug!("Found terminator record");
                return Ok(None);
            }

            let record = NasRecord::decode(raw)?;
            debug!("Record {}", String::from_utf8_lossy(&record.encode()));
            match self.session.checksum_policy {
                ChecksumPolicy::Ignore => {}
                ChecksumPolicy::Reject => record.check()?,
                ChecksumPolicy::Skip if !record.verify_checksum() => {
                    warn!(
                        "Skipping record at {:04X}: checksum {:02X}, computed {:02X}",
                        record.address, record.checksum, record.computed_checksum()
                    );
                    (self.session.progress)(Progress::Skipped(&String::from_utf8_lossy(raw)));
                    self.stats.records_skipped += 1;
                    continue;
                }
                ChecksumPolicy::Skip => {}
            }
            return Ok(Some(command::frame_write(raw)));
        }
    }
}

impl TransferState for TransferFsm<AwaitAck> {
    fn step(self: Box<Self>) -> Result<Box<dyn TransferState>, TransferError> {
        let mut fsm = *self;
        let persist = matches!(fsm.job, Job::Read(_));

        let lines = match fsm.session.await_response(persist) {
            Ok(lines) => lines,
            Err(TransferError::Io(e)) => return Err(fsm.io_error(e)),
            Err(e) => return Err(e),
        };
        fsm.stats.response_lines += lines;

        if persist {
            return Err(fsm.complete());
        }
        fsm.stats.records_sent += 1;
        let next = fsm.transition::<NextCommand>();
        Ok(next as Box<dyn TransferState>)
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl TransferFsm<WaitReady> {
    pub fn new(session: TransferSession, job: Job) -> Box<dyn TransferState> {
        Box::new(TransferFsm {
            state: PhantomData::<WaitReady>,
            session,
            job,
            read_sent: false,
            stats: TransferStats::default(),
        })
    }
}

/// Step the state machine until the transfer completes or fails.
pub fn run(mut state: Box<dyn TransferState>) -> Result<TransferStats, TransferError> {
    loop {
        match state.step() {
            Ok(next_state) => {
                state = next_state;
            }
            Err(TransferError::TransferComplete(stats)) => {
                return Ok(stats);
            }
            Err(e) => {
                return Err(e);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
