//! # Telnet Negotiation Library
//!
//! Telnet protocol plumbing for a MUD server, as defined in:
//! - RFC 854: Telnet Protocol Specification
//! - RFC 1143: The Q Method of Implementing TELNET Option Negotiation
//! - RFC 1073 (NAWS), RFC 1091 (TTYPE) and the conventional MUD
//!   extension options (MCCP 85/86, MSSP 70, MXP 91, GMCP 201)
//!
//! The library is wire-level only: it turns raw socket bytes into data
//! and events, tracks per-option negotiation state, and frames outgoing
//! negotiations and subnegotiations (with IAC doubling). What an option
//! *means* - starting a compressor, parsing a JSON package - is the
//! server's business.
//!
//! ## Modules
//! - `protocol`: telnet constants, commands, options, wire framing
//! - `parser`: stateful IAC parser separating data from events
//! - `negotiation`: per-option WILL/WONT/DO/DONT state tracking
//! - `naws`: window-size payload encoding/decoding

pub mod naws;
pub mod negotiation;
pub mod parser;
pub mod protocol;

// Re-export the types nearly every caller wants
pub use naws::WindowSize;
pub use negotiation::{OptionState, OptionTable, Reply, Side, StateEvent};
pub use parser::{MAX_SUBNEG_LENGTH, ParseResult, TelnetEvent, TelnetParser};
pub use protocol::{IAC, TelnetCommand, TelnetOption, negotiate, subnegotiate};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
