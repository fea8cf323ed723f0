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

// NAS file transfer for the serial EEPROM programmer
mod command;
mod handshake;
mod protocol;
mod record;
mod serial;
mod transfer;

use clap::{Parser, Subcommand, ValueEnum};
use serialport::{DataBits, Parity, StopBits};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;
use command::ReadRequest;
use handshake::{HandshakeConfig, Progress};
use protocol::MAX_CHATTER;
use serial::RealSerialPort;
use transfer::{ChecksumPolicy, Job, TransferError, TransferFsm, TransferSession, TransferStats};

#[derive(Parser)]
#[command(name = "nastool", version)]
#[command(about = "Read and write NAS files with the serial EEPROM programmer", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM4)
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "9600")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name="BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "2", value_name="BITS")]
    stop_bits: u8,

    /// How long to wait for each response line
    #[arg(long, default_value = "1000", value_name = "MS")]
    line_timeout: u64,

    /// Give up on a command if the device has not finished within this time
    #[arg(long, value_name = "SECS")]
    deadline: Option<u64>,

    /// What to do with records whose checksum is wrong
    #[arg(long, value_enum, default_value = "reject")]
    checksum: ChecksumArg,

    /// Do not wait for the programmer's start-up banner
    #[arg(long)]
    no_wait_ready: bool,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a range of the EEPROM as NAS records
    Read {
        /// Start address in hex (e.g. D000)
        start: String,
        /// Number of bytes to read, in hex (e.g. 7FF)
        length: String,
        /// Save the records to a new file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write a NAS file to the EEPROM
    Write {
        /// NAS file to send
        file: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ChecksumArg {
    Ignore,
    Skip,
    Reject,
}

impl From<ChecksumArg> for ChecksumPolicy {
    fn from(arg: ChecksumArg) -> Self {
        match arg {
            ChecksumArg::Ignore => ChecksumPolicy::Ignore,
            ChecksumArg::Skip => ChecksumPolicy::Skip,
            ChecksumArg::Reject => ChecksumPolicy::Reject,
        }
    }
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn init_logging(debug: bool) {
    let level = if debug { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Echo device traffic: `>` for commands, `<` for responses.
fn print_progress(event: Progress<'_>) {
    match event {
        Progress::Command(text) => println!(">{}", text),
        Progress::Response(text) => println!("<{}", text),
        Progress::Skipped(text) => println!("!{} (checksum mismatch, skipped)", text),
    }
}

fn exit_with(message: &str) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    println!("nastool version {}", env!("CARGO_PKG_VERSION"));

    let data_bits = parse_data_bits(cli.data_bits).unwrap_or_else(|e| exit_with(&e));
    let parity = parse_parity(&cli.parity).unwrap_or_else(|e| exit_with(&e));
    let stop_bits = parse_stop_bits(cli.stop_bits).unwrap_or_else(|e| exit_with(&e));

    // Everything that can be checked without the device is checked before the port is opened
    let job = match prepare_job(&cli.command) {
        Ok(job) => job,
        Err(e) => exit_with(&e.to_string()),
    };

    println!("Opening serial port: {}", cli.port);
    println!("Settings: {} baud, {:?}, {:?}, {:?}", cli.baud, data_bits, parity, stop_bits);

    let serial_port = match RealSerialPort::open(&cli.port, cli.baud, data_bits, parity, stop_bits) {
        Ok(port) => port,
        Err(e) => exit_with(&format!("Failed to open serial port: {}", e)),
    };

    let handshake = HandshakeConfig {
        max_chatter: MAX_CHATTER,
        line_timeout: Duration::from_millis(cli.line_timeout),
        deadline: cli.deadline.map(Duration::from_secs),
    };

    let mut session = TransferSession::new(Box::new(serial_port))
        .with_progress(Box::new(print_progress))
        .with_handshake(handshake)
        .with_checksum_policy(cli.checksum.into())
        .with_wait_ready(!cli.no_wait_ready);

    if let Commands::Read { output: Some(path), .. } = &cli.command {
        match File::create_new(path) {
            Ok(file) => {
                println!("File {} created", path.display());
                session = session.with_output(Box::new(file));
            }
            Err(e) => exit_with(&format!("Cannot create {}: {}", path.display(), e)),
        }
    }

    if !cli.no_wait_ready {
        println!("Serial port {} opened, waiting for programmer to respond", cli.port);
    }

    match transfer::run(TransferFsm::new(session, job)) {
        Ok(stats) => report(&cli.command, stats),
        Err(e) => exit_with(&e.to_string()),
    }
}

fn prepare_job(command: &Commands) -> Result<Job, TransferError> {
    match command {
        Commands::Read { start, length, output } => {
            let request = ReadRequest::new(start, length)?;
            println!("Reading 0x{} bytes from 0x{}", request.length(), request.start());
            if let Some(path) = output {
                if path.exists() {
                    return Err(TransferError::Io(std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        format!("File {} exists - please choose a different name", path.display()),
                    )));
                }
            }
            Ok(Job::Read(request))
        }
        Commands::Write { file } => {
            if !file.exists() {
                return Err(TransferError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", file.display()),
                )));
            }
            println!("Processing {}", file.display());
            Ok(Job::Write(Box::new(BufReader::new(File::open(file)?))))
        }
    }
}

fn report(command: &Commands, stats: TransferStats) {
    match command {
        Commands::Read { .. } => {
            println!("\nRead completed: {} response lines from device", stats.response_lines)
        }
        Commands::Write { .. } => {
            println!("\nWrite completed: {} records sent", stats.records_sent);
            if stats.records_skipped > 0 {
                println!("{} records skipped", stats.records_skipped);
            }
            println!("{} response lines from device", stats.response_lines);
        }
    }
}
