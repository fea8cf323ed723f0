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

//! EEPROM programmer line protocol constants

/// Read range - `R<address> <length>`, device streams NAS lines back
pub const READ_COMMAND: u8 = b'R';

/// Write record - `W<record>`, device programs one NAS record
pub const WRITE_COMMAND: u8 = b'W';

/// Terminates every command line; the device's line reader expects exactly this
pub const LINE_END: &[u8] = b"\r\n";

/// First character of the line that ends a NAS file
pub const RECORD_TERMINATOR: u8 = b'.';

/// Response prefix that ends a handshake successfully
pub const OK_PREFIX: &str = "OK";

/// Response prefix that ends a handshake with a device error
pub const ER_PREFIX: &str = "ER";

/// Empty responses tolerated in one handshake before giving up on the device
pub const MAX_CHATTER: usize = 100;

/// Largest number of data bytes in one NAS record
pub const MAX_PAYLOAD: usize = 8;

/// Hex digits of the address field
pub const ADDRESS_DIGITS: usize = 4;

/// Classification of one response line from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Terminal line, command accepted
    Success,
    /// Terminal line, device reported an error
    Failure,
    /// Informational or payload line
    Data,
    /// Nothing but line ending (or a read timeout)
    Chatter,
}

/// Terminal prefixes, checked in order.
const TERMINALS: &[(&str, Response)] = &[
    (OK_PREFIX, Response::Success),
    (ER_PREFIX, Response::Failure),
];

/// Classify a response line with its line ending already stripped.
pub fn classify(line: &str) -> Response {
    if line.is_empty() {
        return Response::Chatter;
    }
    TERMINALS
        .iter()
        .find(|(prefix, _)| line.starts_with(prefix))
        .map(|&(_, response)| response)
        .unwrap_or(Response::Data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_terminals() {
        assert_eq!(classify("OK"), Response::Success);
        assert_eq!(classify("OK ready"), Response::Success);
        assert_eq!(classify("ER"), Response::Failure);
        assert_eq!(classify("ERR: bad address"), Response::Failure);
    }

    #[test]
    fn test_classify_data_and_chatter() {
        assert_eq!(classify(""), Response::Chatter);
        assert_eq!(classify("D000 C3 00 D0 00 00 00 00 00 C3"), Response::Data);
        assert_eq!(classify("EEPROM programmer v1"), Response::Data);
        assert_eq!(classify("O"), Response::Data);
        assert_eq!(classify("ok"), Response::Data);
        assert_eq!(classify(" OK"), Response::Data);
    }
}
