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

//! Logger dialog vocabulary

use std::time::Duration;

/// Answer sent to a yes/no confirmation prompt
pub const CONFIRM: u8 = b'Y';

/// Emitted by the logger once a data line has been stored
pub const ACK_MARKER: u8 = b'*';

/// Terminates every prompt phrase
pub const PROMPT_END: u8 = b':';

/// Menu entry that puts the logger into programming mode
pub const PROGRAM_CHOICE: u8 = b'P';

/// Poll budget while waiting for the logger to present a prompt
pub const PROMPT_POLL: Duration = Duration::from_secs(1);

/// Poll budget while waiting for the ack marker
pub const ACK_POLL: Duration = Duration::from_secs(2);

/// Line terminator the logger expects
pub const LINE_END: &[u8] = b"\r\n";

const CONFIRM_PHRASES: [&[u8]; 3] = [b"Y to confirm", b"\"Y\" to confirm", b"\"Y\" to continue"];
const SELECT_PHRASE: &[u8] = b"Program [P]";
const READY_PHRASE: &[u8] = b"waiting for";

// ============================================================================
// Prompts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Yes/no confirmation, answered with CONFIRM
    Confirm,
    /// Menu offering the program entry
    Select,
    /// Logger is ready for a data line
    Ready,
}

impl Prompt {
    /// Classify the phrase ending at the most recent colon in `buf`.
    ///
    /// The phrase runs backwards from the colon up to the first control
    /// character. Anything that does not contain one of the known phrases is
    /// device noise.
    pub fn find(buf: &[u8]) -> Option<Prompt> {
        let colon = buf.iter().rposition(|&b| b == PROMPT_END)?;
        let start = buf[..colon]
            .iter()
            .rposition(|&b| b < b' ')
            .map_or(0, |i| i + 1);
        let phrase = &buf[start..colon];

        if CONFIRM_PHRASES.iter().any(|p| contains(phrase, p)) {
            Some(Prompt::Confirm)
        } else if contains(phrase, SELECT_PHRASE) {
            Some(Prompt::Select)
        } else if contains(phrase, READY_PHRASE) {
            Some(Prompt::Ready)
        } else {
            None
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

// ============================================================================
// Data lines
// ============================================================================

/// Trim trailing whitespace and control bytes and append CRLF.
pub fn prepare_line(line: &[u8]) -> Vec<u8> {
    let end = line.iter().rposition(|&b| b > b' ').map_or(0, |i| i + 1);
    let mut out = Vec::with_capacity(end + LINE_END.len());
    out.extend_from_slice(&line[..end]);
    out.extend_from_slice(LINE_END);
    out
}

// ============================================================================
// Tests
// ============================================================================
