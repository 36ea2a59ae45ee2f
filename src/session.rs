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

use std::io::{ErrorKind, Write};
use std::time::{Duration, Instant};
use serialport::ClearBuffer;
use thiserror::Error;
use crate::buffer::ReceiveBuffer;
use crate::protocol::*;
use crate::serial::Transport;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("interrupted, retry the operation")]
    Interrupted,

    #[error("{op} is not valid while {state}")]
    WrongState { op: &'static str, state: State },

    #[error("short write: device accepted {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session is no longer valid")]
    Invalid,
}

// ============================================================================
// States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No pending prompt or data request
    Idle,
    /// Logger asked for a yes/no confirmation
    DialogConfirm,
    /// Logger offered its menu
    DialogSelect,
    /// Data line sent, waiting for the ack marker
    WaitAck,
    /// Logger is ready for a data line
    Data,
    /// Transport released after a fatal error
    Invalid,
}

impl State {
    /// States where the logger waits on us and further input is chatter
    fn awaits_response(self) -> bool {
        matches!(self, State::DialogConfirm | State::DialogSelect | State::Data)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::Idle => "idle",
            State::DialogConfirm => "awaiting confirmation",
            State::DialogSelect => "awaiting menu choice",
            State::WaitAck => "waiting for ack",
            State::Data => "ready for data",
            State::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

impl From<Prompt> for State {
    fn from(prompt: Prompt) -> Self {
        match prompt {
            Prompt::Confirm => State::DialogConfirm,
            Prompt::Select => State::DialogSelect,
            Prompt::Ready => State::Data,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// One open dialog with the logger.
///
/// Not shareable between callers; every transition happens inside the call
/// that observes it.
pub struct Session {
    state: State,
    transport: Option<Box<dyn Transport>>,
    rx: ReceiveBuffer,
    dump: Option<Box<dyn Write + Send>>,
}

impl Session {
    /// Take ownership of an open transport and drop anything already queued.
    pub fn open(transport: Box<dyn Transport>) -> Result<Self, SessionError> {
        Session::with_capacity(transport, crate::buffer::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(mut transport: Box<dyn Transport>, capacity: usize) -> Result<Self, SessionError> {
        transport.discard(ClearBuffer::All)?;
        let rx = ReceiveBuffer::new(capacity);
        log::debug!("Session open, {} byte receive buffer", rx.capacity());
        Ok(Session {
            state: State::Idle,
            transport: Some(transport),
            rx,
            dump: None,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Mirror every chunk read from the logger into `sink`
    pub fn attach_dump(&mut self, sink: Box<dyn Write + Send>) {
        self.dump = Some(sink);
    }

    /// Release the transport. Consuming `self` makes a second close impossible.
    pub fn close(mut self) {
        if self.transport.take().is_some() {
            log::debug!("Session closed");
        }
    }

    /// Wait up to `timeout` for the logger to reach a state that needs an
    /// answer from us.
    ///
    /// Returns the state reached, or the unchanged state once the budget is
    /// spent. Output-pending states flush stale input and return at once.
    pub fn poll(&mut self, timeout: Duration) -> Result<State, SessionError> {
        if self.state == State::Invalid {
            return Err(SessionError::Invalid);
        }
        if timeout.is_zero() {
            return Ok(self.state);
        }
        if self.state.awaits_response() {
            if !self.rx.is_empty() {
                log::trace!("Discarding {} stale bytes", self.rx.len());
            }
            self.rx.clear();
            let transport = self.transport.as_mut().ok_or(SessionError::Invalid)?;
            if let Err(e) = transport.discard(ClearBuffer::Input) {
                return Err(self.fail(e));
            }
            return Ok(self.state);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(self.state);
            }

            self.rx.make_room();
            let start = self.rx.len();
            let transport = self.transport.as_mut().ok_or(SessionError::Invalid)?;
            match self.rx.fill(|buf| transport.read_timeout(buf, remaining)) {
                // A hung-up tty reads zero bytes forever
                Ok(0) => {
                    log::debug!("Read returned no data while {}", self.state);
                    return Ok(self.state);
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(self.state),
                Err(e) if e.kind() == ErrorKind::Interrupted => return Err(SessionError::Interrupted),
                Err(e) => return Err(self.fail(e)),
            }

            self.mirror(start);
            if let Some(next) = self.classify(start) {
                log::debug!("{} -> {}", self.state, next);
                self.state = next;
                self.rx.clear();
                return Ok(next);
            }
        }
    }

    /// Answer a pending confirmation prompt
    pub fn respond_confirm(&mut self) -> Result<(), SessionError> {
        self.expect("respond-confirm", &[State::DialogConfirm])?;
        self.send(&[CONFIRM])?;
        self.state = State::Idle;
        Ok(())
    }

    /// Answer a pending menu with `choice`
    pub fn respond_select(&mut self, choice: u8) -> Result<(), SessionError> {
        self.expect("respond-select", &[State::DialogSelect])?;
        self.send(&[choice])?;
        self.state = State::Idle;
        Ok(())
    }

    /// Send one already terminated data line
    pub fn send_data_line(&mut self, line: &[u8]) -> Result<(), SessionError> {
        self.expect("send-data-line", &[State::Data, State::Idle])?;
        self.send(line)?;
        self.state = State::WaitAck;
        Ok(())
    }

    fn expect(&self, op: &'static str, allowed: &[State]) -> Result<(), SessionError> {
        if self.state == State::Invalid {
            return Err(SessionError::Invalid);
        }
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::WrongState { op, state: self.state })
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let transport = self.transport.as_mut().ok_or(SessionError::Invalid)?;
        match transport.write(bytes) {
            Ok(n) if n == bytes.len() => {
                self.rx.clear();
                Ok(())
            }
            Ok(n) => {
                self.invalidate();
                Err(SessionError::ShortWrite { written: n, expected: bytes.len() })
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => Err(SessionError::Interrupted),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn classify(&self, chunk_start: usize) -> Option<State> {
        let bytes = self.rx.as_slice();
        if self.state == State::WaitAck && bytes[chunk_start..].contains(&ACK_MARKER) {
            return Some(State::Data);
        }
        Prompt::find(bytes).map(State::from)
    }

    fn mirror(&mut self, start: usize) {
        let Some(sink) = self.dump.as_mut() else {
            return;
        };
        let chunk = &self.rx.as_slice()[start..];
        if let Err(e) = sink.write_all(chunk).and_then(|_| sink.flush()) {
            log::warn!("Dropping diagnostic dump after write failure: {}", e);
            self.dump = None;
        }
    }

    fn fail(&mut self, e: std::io::Error) -> SessionError {
        log::debug!("Fatal transport error while {}: {}", self.state, e);
        self.invalidate();
        SessionError::Io(e)
    }

    fn invalidate(&mut self) {
        self.state = State::Invalid;
        self.transport = None;
        self.rx.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
