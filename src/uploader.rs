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

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::marker::PhantomData;
use std::path::Path;
use thiserror::Error;
use crate::protocol::*;
use crate::session::{Session, SessionError, State};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("{op}: {source}")]
    Session {
        op: &'static str,
        #[source]
        source: SessionError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("logger presented no prompt after {polls} polls")]
    NoPrompt { polls: u32 },

    #[error("no acknowledgment for line {line}")]
    NoAck { line: usize },

    #[error("Transfer complete")]
    TransferComplete,
}

fn failed(op: &'static str) -> impl FnOnce(SessionError) -> UploadError {
    move |source| UploadError::Session { op, source }
}

// ============================================================================
// States
// ============================================================================

pub struct AwaitPrompt;
pub struct SendLine;
pub struct AwaitAck;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct UploadFsm<S> {
    state: PhantomData<S>,
    session: Session,
    lines: VecDeque<Vec<u8>>,
    line_no: usize,
    menu_choice: u8,
    prompt_polls: u32,
    max_prompt_polls: u32,
}

// ============================================================================
// Trait
// ============================================================================

pub trait UploadState {
    fn step(self: Box<Self>) -> Result<Box<dyn UploadState>, UploadError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> UploadFsm<S> {
    fn transition<T>(self) -> Box<UploadFsm<T>> {
        Box::new(UploadFsm {
            state: PhantomData,
            session: self.session,
            lines: self.lines,
            line_no: self.line_no,
            menu_choice: self.menu_choice,
            prompt_polls: self.prompt_polls,
            max_prompt_polls: self.max_prompt_polls,
        })
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl UploadState for UploadFsm<AwaitPrompt> {
    fn step(self: Box<Self>) -> Result<Box<dyn UploadState>, UploadError> {
        let mut fsm = *self;

        match fsm.session.poll(PROMPT_POLL) {
            Ok(State::DialogConfirm) => {
                fsm.prompt_polls = 0;
                log::debug!("Confirmation requested, sending '{}'", CONFIRM as char);
                fsm.session.respond_confirm().map_err(failed("respond-confirm"))?;
                Ok(Box::new(fsm) as Box<dyn UploadState>)
            }
            Ok(State::DialogSelect) => {
                fsm.prompt_polls = 0;
                log::debug!("Menu offered, selecting '{}'", fsm.menu_choice as char);
                fsm.session.respond_select(fsm.menu_choice).map_err(failed("respond-select"))?;
                Ok(Box::new(fsm) as Box<dyn UploadState>)
            }
            Ok(State::Data) => {
                fsm.prompt_polls = 0;
                log::debug!("Logger waiting for data");
                let next = fsm.transition::<SendLine>();
                Ok(next as Box<dyn UploadState>)
            }
            Ok(_) => {
                fsm.prompt_polls += 1;
                if fsm.prompt_polls >= fsm.max_prompt_polls {
                    return Err(UploadError::NoPrompt { polls: fsm.prompt_polls });
                }
                log::debug!("No prompt yet ({}/{})", fsm.prompt_polls, fsm.max_prompt_polls);
                Ok(Box::new(fsm) as Box<dyn UploadState>)
            }
            Err(SessionError::Interrupted) => {
                log::debug!("Poll interrupted, retrying");
                Ok(Box::new(fsm) as Box<dyn UploadState>)
            }
            Err(e) => Err(failed("poll")(e)),
        }
    }
}

impl UploadState for UploadFsm<SendLine> {
    fn step(self: Box<Self>) -> Result<Box<dyn UploadState>, UploadError> {
        let mut fsm = *self;

        let Some(line) = fsm.lines.pop_front() else {
            log::info!("Sent {} lines", fsm.line_no);
            fsm.session.close();
            return Err(UploadError::TransferComplete);
        };

        fsm.line_no += 1;
        fsm.session.send_data_line(&line).map_err(failed("send-data-line"))?;
        log::debug!("Sent line {} ({} bytes)", fsm.line_no, line.len());

        let next = fsm.transition::<AwaitAck>();
        Ok(next as Box<dyn UploadState>)
    }
}

impl UploadState for UploadFsm<AwaitAck> {
    fn step(self: Box<Self>) -> Result<Box<dyn UploadState>, UploadError> {
        let mut fsm = *self;

        match fsm.session.poll(ACK_POLL) {
            Ok(State::Data) => {
                log::debug!("Line {} acknowledged", fsm.line_no);
                let next = fsm.transition::<SendLine>();
                Ok(next as Box<dyn UploadState>)
            }
            Ok(_) => {
                log::debug!("Line {} not acknowledged, logger {}", fsm.line_no, fsm.session.state());
                Err(UploadError::NoAck { line: fsm.line_no })
            }
            Err(SessionError::Interrupted) => {
                log::debug!("Poll interrupted, retrying");
                Ok(Box::new(fsm) as Box<dyn UploadState>)
            }
            Err(e) => Err(failed("poll")(e)),
        }
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl UploadFsm<AwaitPrompt> {
    pub fn new(session: Session, lines: Vec<Vec<u8>>, menu_choice: u8, max_prompt_polls: u32) -> Box<dyn UploadState> {
        Box::new(UploadFsm {
            state: PhantomData::<AwaitPrompt>,
            session,
            lines: lines.into(),
            line_no: 0,
            menu_choice,
            prompt_polls: 0,
            max_prompt_polls: max_prompt_polls.max(1),
        })
    }
}

/// Drive `fsm` until the transfer completes or fails
pub fn run(mut fsm: Box<dyn UploadState>) -> Result<(), UploadError> {
    loop {
        match fsm.step() {
            Ok(next) => fsm = next,
            Err(UploadError::TransferComplete) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Read `path` and turn every line into a CRLF terminated data line
pub fn load_lines(path: &Path) -> std::io::Result<Vec<Vec<u8>>> {
    let reader = BufReader::new(File::open(path)?);
    reader
        .split(b'\n')
        .map(|line| line.map(|l| prepare_line(&l)))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::{MockRead, MockSerialPort};

    fn upload(reads: Vec<MockRead>, expected_writes: &[u8], lines: &[&[u8]], max_prompt_polls: u32) -> Result<(), UploadError> {
        let mock = MockSerialPort::new(reads, expected_writes.to_vec());
        let session = Session::open(Box::new(mock)).unwrap();
        let lines = lines.iter().map(|l| prepare_line(l)).collect();
        run(UploadFsm::new(session, lines, PROGRAM_CHOICE, max_prompt_polls))
    }

    #[test]
    fn test_load_lines() {
        let test_file = std::env::temp_dir().join("loglink_load_lines.txt");
        std::fs::write(&test_file, b"ABCD\nEFGH  \r\n\n  IJ\t\n").unwrap();

        let lines = load_lines(&test_file).unwrap();
        assert_eq!(
            lines,
            vec![b"ABCD\r\n".to_vec(), b"EFGH\r\n".to_vec(), b"\r\n".to_vec(), b"  IJ\r\n".to_vec()]
        );

        std::fs::remove_file(&test_file).ok();
    }

    #[test]
    fn test_load_lines_without_trailing_newline() {
        let test_file = std::env::temp_dir().join("loglink_no_newline.txt");
        std::fs::write(&test_file, b"ONE\nTWO").unwrap();

        let lines = load_lines(&test_file).unwrap();
        assert_eq!(lines, vec![b"ONE\r\n".to_vec(), b"TWO\r\n".to_vec()]);

        std::fs::remove_file(&test_file).ok();
    }

    #[test]
    fn test_load_lines_missing_file() {
        let missing = std::env::temp_dir().join("loglink_does_not_exist.txt");
        assert!(load_lines(&missing).is_err());
    }

    #[test]
    fn test_upload_full_dialog() {
        let reads = vec![
            MockRead::text(b"\r\nErase stored flights\r\ntype \"Y\" to confirm:"),
            MockRead::text(b"Y\r\nErased.\r\nRead [R] Program [P]:"),
            MockRead::text(b"P\r\nwaiting for data:"),
            MockRead::text(b"*"),
            MockRead::text(b"\r\n*"),
        ];

        upload(reads, b"YPABCD\r\nEFGH\r\n", &[b"ABCD", b"EFGH  "], 5).expect("Upload should succeed");
    }

    #[test]
    fn test_upload_waits_for_prompt() {
        let reads = vec![
            MockRead::Timeout,
            MockRead::text(b"booting...\r\n"),
            MockRead::Timeout,
            MockRead::text(b"waiting for data:"),
            MockRead::text(b"*"),
        ];

        upload(reads, b"ABCD\r\n", &[b"ABCD"], 5).expect("Upload should succeed");
    }

    #[test]
    fn test_upload_prompt_wait_applies_per_prompt() {
        let reads = vec![
            MockRead::Timeout,
            MockRead::Timeout,
            MockRead::text(b"type \"Y\" to confirm:"),
            MockRead::Timeout,
            MockRead::Timeout,
            MockRead::text(b"Program [P]:"),
            MockRead::text(b"waiting for data:"),
            MockRead::text(b"*"),
        ];

        upload(reads, b"YPABCD\r\n", &[b"ABCD"], 3).expect("Upload should succeed");
    }

    #[test]
    fn test_upload_no_prompt() {
        let reads = vec![MockRead::Timeout, MockRead::Timeout];

        match upload(reads, b"", &[b"ABCD"], 2) {
            Err(UploadError::NoPrompt { polls: 2 }) => {}
            other => panic!("Expected NoPrompt, got {:?}", other),
        }
    }

    #[test]
    fn test_upload_no_ack() {
        let reads = vec![
            MockRead::text(b"waiting for data:"),
            MockRead::text(b"*"),
            MockRead::text(b"checksum error\r\n"),
            MockRead::Timeout,
        ];

        match upload(reads, b"ABCD\r\nEFGH\r\n", &[b"ABCD", b"EFGH"], 5) {
            Err(UploadError::NoAck { line: 2 }) => {}
            other => panic!("Expected NoAck, got {:?}", other),
        }
    }

    #[test]
    fn test_upload_retries_interrupted_poll() {
        let reads = vec![
            MockRead::Fail(std::io::ErrorKind::Interrupted),
            MockRead::text(b"waiting for data:"),
            MockRead::Fail(std::io::ErrorKind::Interrupted),
            MockRead::text(b"*"),
        ];

        upload(reads, b"ABCD\r\n", &[b"ABCD"], 5).expect("Upload should succeed");
    }

    #[test]
    fn test_upload_aborts_on_short_write() {
        let mock = MockSerialPort::new(vec![MockRead::text(b"waiting for data:")], b"ABC".to_vec())
            .with_write_limit(3);
        let session = Session::open(Box::new(mock)).unwrap();
        let fsm = UploadFsm::new(session, vec![prepare_line(b"ABCDEF")], PROGRAM_CHOICE, 5);

        match run(fsm) {
            Err(UploadError::Session { op: "send-data-line", source: SessionError::ShortWrite { written: 3, expected: 8 } }) => {}
            other => panic!("Expected short write, got {:?}", other),
        }
    }

    #[test]
    fn test_upload_aborts_on_read_failure() {
        let reads = vec![MockRead::Fail(std::io::ErrorKind::BrokenPipe)];

        match upload(reads, b"", &[b"ABCD"], 5) {
            Err(UploadError::Session { op: "poll", source: SessionError::Io(_) }) => {}
            other => panic!("Expected poll failure, got {:?}", other),
        }
    }

    #[test]
    fn test_upload_empty_file() {
        upload(vec![MockRead::text(b"waiting for data:")], b"", &[], 5).expect("Upload should succeed");
    }
}
