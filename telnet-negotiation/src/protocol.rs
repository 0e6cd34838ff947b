//! # Telnet Protocol Constants and Types
//!
//! Core telnet protocol definitions as used by MUD servers:
//! - **RFC 854**: Telnet Protocol Specification
//! - **RFC 855**: Telnet Option Specifications
//! - The de-facto MUD option numbers (MCCP, MSSP, MXP, GMCP)
//!
//! ## Key Concepts from RFC 854:
//!
//! ### IAC (Interpret As Command) - Byte 255
//! The IAC byte (255/0xFF) signals that the following bytes should be
//! interpreted as a telnet command rather than data. Any data byte with
//! value 255 must be escaped as IAC IAC (255 255). The same doubling
//! applies *inside* subnegotiation payloads.
//!
//! ### Command Structure
//! - Negotiation: `IAC WILL/WONT/DO/DONT <option>`
//! - Simple commands: `IAC <command>` (like IAC GA)
//! - Sub-options (RFC 855): `IAC SB <option> <parameters...> IAC SE`

/// IAC - Interpret As Command (RFC 854, Section 4)
pub const IAC: u8 = 255;

/// MSSP variable-name marker inside an MSSP subnegotiation payload.
pub const MSSP_VAR: u8 = 1;
/// MSSP value marker inside an MSSP subnegotiation payload.
pub const MSSP_VAL: u8 = 2;

/// Terminal-type subnegotiation command bytes (RFC 1091).
pub const TTYPE_IS: u8 = 0;
pub const TTYPE_SEND: u8 = 1;

/// Telnet Commands (RFC 854, Section 4)
///
/// These commands follow the IAC byte. Only the subset a MUD server
/// actually meets on the wire is modelled; anything else is consumed
/// silently by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TelnetCommand {
    /// End of subnegotiation parameters (RFC 855)
    SE = 240,
    /// No Operation - used as keepalive by some clients
    NOP = 241,
    /// Go Ahead - sent after prompts for clients that request it
    GA = 249,
    /// Subnegotiation Begin (RFC 855)
    SB = 250,
    /// WILL - sender wants to enable an option on its side
    WILL = 251,
    /// WONT - sender refuses or disables an option on its side
    WONT = 252,
    /// DO - sender asks the receiver to enable an option
    DO = 253,
    /// DONT - sender asks the receiver to disable an option
    DONT = 254,
}

impl TelnetCommand {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            240 => Some(TelnetCommand::SE),
            241 => Some(TelnetCommand::NOP),
            249 => Some(TelnetCommand::GA),
            250 => Some(TelnetCommand::SB),
            251 => Some(TelnetCommand::WILL),
            252 => Some(TelnetCommand::WONT),
            253 => Some(TelnetCommand::DO),
            254 => Some(TelnetCommand::DONT),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// WILL, WONT, DO and DONT take part in the RFC 1143 state machine.
    pub fn is_negotiation(self) -> bool {
        matches!(
            self,
            TelnetCommand::WILL | TelnetCommand::WONT | TelnetCommand::DO | TelnetCommand::DONT
        )
    }
}

/// Telnet options this server negotiates.
///
/// The RFC-assigned numbers plus the conventional MUD extension numbers.
/// Unknown option bytes still travel through the parser (so they can be
/// refused); this enum covers the options with actual handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TelnetOption {
    /// Echo (RFC 857) - server-side echo off during password entry
    Echo = 1,
    /// Suppress Go Ahead (RFC 858)
    SuppressGoAhead = 3,
    /// Terminal Type (RFC 1091) - client name/version query
    TerminalType = 24,
    /// Negotiate About Window Size (RFC 1073)
    Naws = 31,
    /// MUD Server Status Protocol
    Mssp = 70,
    /// MUD Client Compression Protocol v1 (legacy)
    Mccp1 = 85,
    /// MUD Client Compression Protocol v2 (preferred)
    Mccp2 = 86,
    /// MUD eXtension Protocol - rich markup
    Mxp = 91,
    /// Generic MUD Communication Protocol - JSON sidechannel
    Gmcp = 201,
}

impl TelnetOption {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(TelnetOption::Echo),
            3 => Some(TelnetOption::SuppressGoAhead),
            24 => Some(TelnetOption::TerminalType),
            31 => Some(TelnetOption::Naws),
            70 => Some(TelnetOption::Mssp),
            85 => Some(TelnetOption::Mccp1),
            86 => Some(TelnetOption::Mccp2),
            91 => Some(TelnetOption::Mxp),
            201 => Some(TelnetOption::Gmcp),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Short label used by the `protocols` status display.
    pub fn label(self) -> &'static str {
        match self {
            TelnetOption::Echo => "ECHO",
            TelnetOption::SuppressGoAhead => "SGA",
            TelnetOption::TerminalType => "TTYPE",
            TelnetOption::Naws => "NAWS",
            TelnetOption::Mssp => "MSSP",
            TelnetOption::Mccp1 => "MCCP1",
            TelnetOption::Mccp2 => "MCCP2",
            TelnetOption::Mxp => "MXP",
            TelnetOption::Gmcp => "GMCP",
        }
    }
}

/// Build a three-byte negotiation atom: `IAC <command> <option>`.
pub fn negotiate(command: TelnetCommand, option: u8) -> [u8; 3] {
    [IAC, command.to_byte(), option]
}

/// Frame a subnegotiation payload: `IAC SB <option> <payload> IAC SE`.
///
/// Every IAC byte inside the payload is doubled on the wire, so the
/// payload may carry arbitrary binary data.
pub fn subnegotiate(option: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(payload.len() + 5);
    bytes.push(IAC);
    bytes.push(TelnetCommand::SB.to_byte());
    bytes.push(option);
    for &b in payload {
        bytes.push(b);
        if b == IAC {
            bytes.push(IAC);
        }
    }
    bytes.push(IAC);
    bytes.push(TelnetCommand::SE.to_byte());
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iac_constant() {
        assert_eq!(IAC, 255);
        assert_eq!(IAC, 0xFF);
    }

    #[test]
    fn command_byte_conversion() {
        assert_eq!(TelnetCommand::from_byte(251), Some(TelnetCommand::WILL));
        assert_eq!(TelnetCommand::from_byte(252), Some(TelnetCommand::WONT));
        assert_eq!(TelnetCommand::from_byte(253), Some(TelnetCommand::DO));
        assert_eq!(TelnetCommand::from_byte(254), Some(TelnetCommand::DONT));
        assert_eq!(TelnetCommand::from_byte(100), None);

        assert_eq!(TelnetCommand::WILL.to_byte(), 251);
        assert_eq!(TelnetCommand::SE.to_byte(), 240);
    }

    #[test]
    fn option_byte_conversion() {
        assert_eq!(TelnetOption::from_byte(1), Some(TelnetOption::Echo));
        assert_eq!(TelnetOption::from_byte(24), Some(TelnetOption::TerminalType));
        assert_eq!(TelnetOption::from_byte(86), Some(TelnetOption::Mccp2));
        assert_eq!(TelnetOption::from_byte(201), Some(TelnetOption::Gmcp));
        assert_eq!(TelnetOption::from_byte(99), None);

        assert_eq!(TelnetOption::Gmcp.to_byte(), 201);
        assert_eq!(TelnetOption::Mccp1.to_byte(), 85);
    }

    #[test]
    fn negotiation_commands() {
        assert!(TelnetCommand::WILL.is_negotiation());
        assert!(TelnetCommand::DONT.is_negotiation());
        assert!(!TelnetCommand::NOP.is_negotiation());
        assert!(!TelnetCommand::GA.is_negotiation());
    }

    #[test]
    fn negotiate_atom() {
        assert_eq!(
            negotiate(TelnetCommand::WILL, TelnetOption::Mccp2.to_byte()),
            [255, 251, 86]
        );
        assert_eq!(negotiate(TelnetCommand::DO, 31), [255, 253, 31]);
    }

    #[test]
    fn subnegotiate_framing() {
        // IAC SB TTYPE SEND IAC SE
        assert_eq!(subnegotiate(24, &[TTYPE_SEND]), vec![255, 250, 24, 1, 255, 240]);
    }

    #[test]
    fn subnegotiate_doubles_iac() {
        let framed = subnegotiate(201, &[b'x', 255, b'y']);
        assert_eq!(framed, vec![255, 250, 201, b'x', 255, 255, b'y', 255, 240]);
    }
}
