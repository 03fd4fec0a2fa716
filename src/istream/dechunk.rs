//! Filter removing HTTP/1.1 chunked transfer encoding.
//!
//! # State Machine
//! ```text
//! None ─hex─▶ Size ─other─▶ AfterSize ─\n─▶ Data ──(chunk done)──▶ AfterData ─\n─▶ None
//!                                   └─(size 0)─▶ Trailer ◀─\n── TrailerData
//!                                                  │ \n
//!                                                  ▼
//!                                              EofDetected
//! ```
//!
//! The eof callback runs once the terminating chunk has been parsed and
//! before the downstream handler sees eof, while the input is still
//! attached.  The HTTP client uses it to learn that the connection carried
//! a complete body and may be reused.
//!
//! In verbatim mode the framing is validated but forwarded unmodified; data
//! is held back until a complete parsed unit can be offered in one block.

use std::os::fd::OwnedFd;
use std::task::Context;

use super::{BoxIstream, FdType, Istream, IstreamError, IstreamHandler, IstreamPointer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    None,
    Size,
    AfterSize,
    Data,
    AfterData,
    Trailer,
    TrailerData,
    EofDetected,
    Closed,
}

pub type EofCallback = Box<dyn FnOnce() + Send>;

pub struct DechunkIstream {
    input: IstreamPointer,
    parser: Parser,
}

struct Parser {
    state: State,
    remaining_chunk: u64,
    had_input: bool,
    had_output: bool,

    verbatim: bool,
    /// The terminating chunk was parsed, but the bytes before it have not
    /// all been accepted downstream yet.
    eof_verbatim: bool,
    /// Bytes at the start of the input's next offer that were already
    /// parsed but not yet accepted downstream.
    pending_verbatim: usize,

    eof_callback: Option<EofCallback>,
}

impl DechunkIstream {
    pub fn new(input: BoxIstream, eof_callback: EofCallback) -> Self {
        Self {
            input: IstreamPointer::new(input),
            parser: Parser {
                state: State::None,
                remaining_chunk: 0,
                had_input: false,
                had_output: false,
                verbatim: false,
                eof_verbatim: false,
                pending_verbatim: 0,
                eof_callback: Some(eof_callback),
            },
        }
    }

    /// Forward the chunked framing instead of decoding it.
    pub fn set_verbatim(&mut self) {
        self.parser.verbatim = true;
        self.parser.eof_verbatim = false;
        self.parser.pending_verbatim = 0;
    }
}

impl Istream for DechunkIstream {
    fn available(&self, partial: bool) -> Option<u64> {
        (partial && self.parser.state == State::Data).then_some(self.parser.remaining_chunk)
    }

    fn read(&mut self, cx: &mut Context<'_>, handler: &mut dyn IstreamHandler) {
        self.parser.had_output = false;

        loop {
            self.parser.had_input = false;
            let mut feeder = Feeder {
                parser: &mut self.parser,
                handler: &mut *handler,
            };
            self.input.read(cx, &mut feeder);

            if matches!(self.parser.state, State::EofDetected | State::Closed) {
                self.input.close();
                return;
            }

            if !(self.input.is_defined() && self.parser.had_input && !self.parser.had_output) {
                return;
            }
        }
    }

    fn into_fd(self: Box<Self>) -> Result<(FdType, OwnedFd), BoxIstream> {
        Err(self)
    }
}

/// Input handler for one read; decodes into the downstream handler.
struct Feeder<'a> {
    parser: &'a mut Parser,
    handler: &'a mut dyn IstreamHandler,
}

impl Feeder<'_> {
    fn abort(&mut self, message: &str) -> usize {
        self.parser.state = State::Closed;
        self.handler
            .on_error(IstreamError::Protocol(message.to_string()));
        0
    }

    fn eof_detected(&mut self) {
        self.parser.state = State::EofDetected;
        if let Some(callback) = self.parser.eof_callback.take() {
            callback();
        }
        self.handler.on_eof();
    }

    fn invoke_data(&mut self, data: &[u8]) -> usize {
        self.parser.had_output = true;
        self.handler.on_data(data)
    }

    fn feed(&mut self, data: &[u8]) -> usize {
        let length = data.len();
        let mut position = if self.parser.verbatim {
            self.parser.pending_verbatim
        } else {
            0
        };

        self.parser.had_input = true;

        if position > length {
            // the input offers less than what was parsed last time
            let nbytes = self.invoke_data(data);
            self.parser.pending_verbatim -= nbytes;
            return nbytes;
        }

        while position < length {
            match self.parser.state {
                State::None | State::Size => {
                    let c = data[position];
                    let digit = match c {
                        b'0'..=b'9' => c - b'0',
                        b'a'..=b'f' => c - b'a' + 0xa,
                        b'A'..=b'F' => c - b'A' + 0xa,
                        _ if self.parser.state == State::Size => {
                            self.parser.state = State::AfterSize;
                            position += 1;
                            continue;
                        }
                        _ => return self.abort("chunk length expected"),
                    };

                    if self.parser.state == State::None {
                        self.parser.state = State::Size;
                        self.parser.remaining_chunk = 0;
                    }

                    position += 1;
                    match self
                        .parser
                        .remaining_chunk
                        .checked_mul(0x10)
                        .and_then(|n| n.checked_add(u64::from(digit)))
                    {
                        Some(n) => self.parser.remaining_chunk = n,
                        None => return self.abort("chunk length too large"),
                    }
                }

                State::AfterSize => {
                    if data[position] == b'\n' {
                        self.parser.state = if self.parser.remaining_chunk == 0 {
                            State::Trailer
                        } else {
                            State::Data
                        };
                    }
                    position += 1;
                }

                State::Data => {
                    let size = ((length - position) as u64).min(self.parser.remaining_chunk) as usize;

                    let nbytes = if self.parser.verbatim {
                        // postponed; sent in one block below
                        size
                    } else {
                        let n = self.invoke_data(&data[position..position + size]);
                        if n == 0 {
                            return position;
                        }
                        n
                    };

                    self.parser.remaining_chunk -= nbytes as u64;
                    if self.parser.remaining_chunk == 0 {
                        self.parser.state = State::AfterData;
                    }
                    position += nbytes;

                    if nbytes < size {
                        // handler is full
                        return position;
                    }
                }

                State::AfterData => {
                    match data[position] {
                        b'\n' => self.parser.state = State::None,
                        b'\r' => {}
                        _ => return self.abort("newline expected"),
                    }
                    position += 1;
                }

                State::Trailer => match data[position] {
                    b'\n' => {
                        position += 1;

                        if self.parser.verbatim {
                            // everything up to and including the terminating
                            // chunk goes out before eof
                            let nbytes = self.invoke_data(&data[..position]);
                            self.parser.pending_verbatim = position - nbytes;
                            if self.parser.pending_verbatim > 0 {
                                self.parser.eof_verbatim = true;
                                return nbytes;
                            }
                        }

                        self.eof_detected();
                        return position;
                    }
                    b'\r' => position += 1,
                    _ => {
                        position += 1;
                        self.parser.state = State::TrailerData;
                    }
                },

                State::TrailerData => {
                    if data[position] == b'\n' {
                        self.parser.state = State::Trailer;
                    }
                    position += 1;
                }

                State::EofDetected | State::Closed => return 0,
            }
        }

        if self.parser.verbatim && position > 0 {
            let nbytes = self.invoke_data(&data[..position]);
            // the rest is not parsed again on the next offer
            self.parser.pending_verbatim = position - nbytes;
            return nbytes;
        }

        position
    }
}

impl IstreamHandler for Feeder<'_> {
    fn on_data(&mut self, data: &[u8]) -> usize {
        if matches!(self.parser.state, State::EofDetected | State::Closed) {
            return 0;
        }

        if self.parser.verbatim && self.parser.eof_verbatim {
            // the terminating chunk was parsed last time; flush what is
            // left before it, then finish
            let pending = self.parser.pending_verbatim.min(data.len());
            let nbytes = self.invoke_data(&data[..pending]);
            if nbytes == 0 {
                return 0;
            }

            self.parser.pending_verbatim -= nbytes;
            if self.parser.pending_verbatim > 0 {
                return nbytes;
            }

            self.eof_detected();
            return nbytes;
        }

        self.feed(data)
    }

    fn on_eof(&mut self) {
        if matches!(self.parser.state, State::EofDetected | State::Closed) {
            return;
        }
        self.parser.state = State::Closed;
        self.handler.on_error(IstreamError::PrematureEof(
            "premature EOF in dechunker".to_string(),
        ));
    }

    fn on_error(&mut self, error: IstreamError) {
        if !matches!(self.parser.state, State::EofDetected | State::Closed) {
            self.handler.on_error(error);
        }
        self.parser.state = State::Closed;
    }
}
