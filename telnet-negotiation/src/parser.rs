//! # Telnet Command Parser
//!
//! Separates telnet command sequences from in-band data according to
//! **RFC 854**, with the subnegotiation rules MUD protocols rely on.
//!
//! The parser is stateful across calls: a command or subnegotiation that
//! spans two reads is held internally and completed by the next call.
//! Nothing is delivered early and nothing is lost at read boundaries.
//!
//! ## Sequences recognised
//! - Escaped data: `IAC IAC` decodes to one literal 255 byte
//! - Negotiation: `IAC WILL/WONT/DO/DONT <option>` (any option byte)
//! - Sub-negotiation: `IAC SB <option> <data...> IAC SE`, with IAC
//!   doubling inside the payload
//! - Simple commands (`IAC GA`, `IAC NOP`, unknown commands): consumed
//!
//! ## In-band data filtering
//! Control bytes below space are filtered out of the data stream, with
//! the exception of `\n`, `\r`, `\t` and backspace, which the line
//! assembler needs to see.

use crate::protocol::{IAC, TelnetCommand};

/// Upper bound on an accumulated subnegotiation payload. A peer that
/// exceeds it gets the whole subnegotiation discarded.
pub const MAX_SUBNEG_LENGTH: usize = 2048;

/// Parser state for IAC sequence detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    /// Expecting normal data or IAC
    Data,
    /// Found IAC, expecting a command byte
    Iac,
    /// Found a negotiation command, expecting the option byte
    Negotiation(TelnetCommand),
    /// Found IAC SB, expecting the option byte
    SubOption,
    /// Accumulating subnegotiation payload
    SubData(u8),
    /// Saw IAC inside a subnegotiation; SE ends it, IAC is a literal 255
    SubIac(u8),
}

/// A decoded telnet event, ready for dispatch to an option handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetEvent {
    /// `IAC WILL/WONT/DO/DONT <option>`. The option is the raw byte so
    /// unknown options can still be refused.
    Negotiation { command: TelnetCommand, option: u8 },
    /// A complete `IAC SB <option> ... IAC SE` with the payload already
    /// IAC-unescaped.
    Subnegotiation { option: u8, data: Vec<u8> },
    /// A single-byte command such as GA or NOP.
    Command(TelnetCommand),
    /// A subnegotiation was cut short by `IAC <x>` where x is neither
    /// IAC nor SE. The partial payload was discarded.
    MalformedSubnegotiation { option: u8 },
    /// A subnegotiation payload exceeded [`MAX_SUBNEG_LENGTH`] and was
    /// discarded.
    OversizedSubnegotiation { option: u8 },
}

/// Result of feeding one chunk of raw bytes through the parser.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParseResult {
    /// In-band data bytes, IAC-unescaped and control-filtered.
    pub data: Vec<u8>,
    /// Telnet events found in the chunk, in wire order.
    pub events: Vec<TelnetEvent>,
}

/// Stateful telnet stream parser. One per connection.
#[derive(Debug, Clone)]
pub struct TelnetParser {
    state: ParserState,
    sub_buf: Vec<u8>,
    sub_overflow: bool,
}

impl Default for TelnetParser {
    fn default() -> Self {
        Self::new()
    }
}

/// In-band bytes the line assembler needs; everything else below space
/// is stripped.
fn is_stream_byte(byte: u8) -> bool {
    byte >= 0x20 || matches!(byte, b'\n' | b'\r' | b'\t' | 0x08)
}

impl TelnetParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Data,
            sub_buf: Vec::new(),
            sub_overflow: false,
        }
    }

    /// Feed raw bytes from the socket. All input is consumed; sequences
    /// that are still incomplete at the end of the chunk stay buffered
    /// until the next call.
    pub fn parse(&mut self, input: &[u8]) -> ParseResult {
        let mut out = ParseResult::default();

        for &byte in input {
            match self.state {
                ParserState::Data => {
                    if byte == IAC {
                        self.state = ParserState::Iac;
                    } else if is_stream_byte(byte) {
                        out.data.push(byte);
                    }
                }

                ParserState::Iac => {
                    if byte == IAC {
                        // IAC IAC = escaped data byte 255
                        out.data.push(IAC);
                        self.state = ParserState::Data;
                    } else {
                        match TelnetCommand::from_byte(byte) {
                            Some(TelnetCommand::SB) => {
                                self.state = ParserState::SubOption;
                            }
                            Some(cmd) if cmd.is_negotiation() => {
                                self.state = ParserState::Negotiation(cmd);
                            }
                            Some(cmd) => {
                                out.events.push(TelnetEvent::Command(cmd));
                                self.state = ParserState::Data;
                            }
                            None => {
                                // Unknown command byte, consume silently
                                self.state = ParserState::Data;
                            }
                        }
                    }
                }

                ParserState::Negotiation(cmd) => {
                    out.events.push(TelnetEvent::Negotiation {
                        command: cmd,
                        option: byte,
                    });
                    self.state = ParserState::Data;
                }

                ParserState::SubOption => {
                    self.sub_buf.clear();
                    self.sub_overflow = false;
                    self.state = ParserState::SubData(byte);
                }

                ParserState::SubData(option) => {
                    if byte == IAC {
                        self.state = ParserState::SubIac(option);
                    } else if self.sub_buf.len() >= MAX_SUBNEG_LENGTH {
                        self.sub_overflow = true;
                    } else {
                        self.sub_buf.push(byte);
                    }
                }

                ParserState::SubIac(option) => {
                    if byte == IAC {
                        // IAC IAC inside the payload decodes to one 255
                        if self.sub_buf.len() >= MAX_SUBNEG_LENGTH {
                            self.sub_overflow = true;
                        } else {
                            self.sub_buf.push(IAC);
                        }
                        self.state = ParserState::SubData(option);
                    } else if byte == TelnetCommand::SE.to_byte() {
                        if self.sub_overflow {
                            out.events
                                .push(TelnetEvent::OversizedSubnegotiation { option });
                        } else {
                            out.events.push(TelnetEvent::Subnegotiation {
                                option,
                                data: std::mem::take(&mut self.sub_buf),
                            });
                        }
                        self.sub_buf.clear();
                        self.state = ParserState::Data;
                    } else {
                        // IAC <x> inside a subnegotiation: malformed,
                        // drop what we collected
                        out.events
                            .push(TelnetEvent::MalformedSubnegotiation { option });
                        self.sub_buf.clear();
                        self.state = ParserState::Data;
                    }
                }
            }
        }

        out
    }

    /// True while the parser holds an incomplete sequence.
    pub fn mid_sequence(&self) -> bool {
        self.state != ParserState::Data
    }

    /// Return to the initial state, dropping any partial sequence.
    pub fn reset(&mut self) {
        self.state = ParserState::Data;
        self.sub_buf.clear();
        self.sub_overflow = false;
    }
}
