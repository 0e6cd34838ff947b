//! # Telnet Option Negotiation
//!
//! Option state tracking in the style of **RFC 1143** (the Q method),
//! reduced to the four states a MUD server needs to avoid negotiation
//! loops. Each option on each side of the connection is in one of:
//!
//! - **No**: option is disabled
//! - **WantYes**: we sent WILL/DO and are waiting for the answer
//! - **Yes**: option is enabled and operational
//! - **WantNo**: we sent WONT/DONT and are waiting for the answer
//!
//! The table never initiates a second request while one is in flight,
//! answers every WILL/DO from the peer exactly once (acceptance is the
//! caller's policy decision), and never answers an answer, which is
//! what breaks the WILL/WONT ping-pong the RFC warns about.
//!
//! Terminology follows the modern "local"/"remote" convention:
//! - *local* options are ours, negotiated with WILL/WONT
//! - *remote* options are the peer's, negotiated with DO/DONT

use crate::protocol::{TelnetCommand, negotiate};

/// Negotiation state of a single option on a single side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptionState {
    /// Option disabled
    #[default]
    No,
    /// Negotiating to enable (sent WILL or DO)
    WantYes,
    /// Option enabled
    Yes,
    /// Negotiating to disable (sent WONT or DONT)
    WantNo,
}

/// Which side of the connection an option lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Our options (WILL/WONT)
    Local,
    /// The peer's options (DO/DONT)
    Remote,
}

/// What a received negotiation byte did to the option's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    /// Nothing changed (duplicate or stray negotiation byte)
    None,
    /// The option just became active
    Enabled,
    /// The option just went inactive
    Disabled,
    /// Our offer was declined; the option was never activated
    Refused,
}

/// The answer to a received negotiation byte: an optional three-byte
/// response atom plus the resulting state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub response: Option<[u8; 3]>,
    pub event: StateEvent,
}

impl Reply {
    fn quiet(event: StateEvent) -> Self {
        Reply { response: None, event }
    }

    fn answer(cmd: TelnetCommand, option: u8, event: StateEvent) -> Self {
        Reply {
            response: Some(negotiate(cmd, option)),
            event,
        }
    }
}

/// Per-connection option negotiation table, indexed by raw option byte
/// so unknown options can be tracked and refused like any other.
#[derive(Debug, Clone)]
pub struct OptionTable {
    local: [OptionState; 256],
    remote: [OptionState; 256],
}

impl Default for OptionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl OptionTable {
    /// All options start disabled.
    pub fn new() -> Self {
        Self {
            local: [OptionState::No; 256],
            remote: [OptionState::No; 256],
        }
    }

    pub fn state(&self, side: Side, option: u8) -> OptionState {
        match side {
            Side::Local => self.local[option as usize],
            Side::Remote => self.remote[option as usize],
        }
    }

    pub fn is_enabled(&self, side: Side, option: u8) -> bool {
        self.state(side, option) == OptionState::Yes
    }

    fn slot(&mut self, side: Side, option: u8) -> &mut OptionState {
        match side {
            Side::Local => &mut self.local[option as usize],
            Side::Remote => &mut self.remote[option as usize],
        }
    }

    /// Offer one of our options to the peer (`IAC WILL <opt>`).
    /// Returns the bytes to send, or `None` if the option is already
    /// enabled or a negotiation is in flight.
    pub fn offer_local(&mut self, option: u8) -> Option<[u8; 3]> {
        let slot = self.slot(Side::Local, option);
        if *slot != OptionState::No {
            return None;
        }
        *slot = OptionState::WantYes;
        Some(negotiate(TelnetCommand::WILL, option))
    }

    /// Ask the peer to enable one of its options (`IAC DO <opt>`).
    pub fn request_remote(&mut self, option: u8) -> Option<[u8; 3]> {
        let slot = self.slot(Side::Remote, option);
        if *slot != OptionState::No {
            return None;
        }
        *slot = OptionState::WantYes;
        Some(negotiate(TelnetCommand::DO, option))
    }

    /// Withdraw one of our options (`IAC WONT <opt>`).
    pub fn retract_local(&mut self, option: u8) -> Option<[u8; 3]> {
        let slot = self.slot(Side::Local, option);
        if *slot != OptionState::Yes {
            return None;
        }
        *slot = OptionState::WantNo;
        Some(negotiate(TelnetCommand::WONT, option))
    }

    /// Ask the peer to disable one of its options (`IAC DONT <opt>`).
    pub fn retract_remote(&mut self, option: u8) -> Option<[u8; 3]> {
        let slot = self.slot(Side::Remote, option);
        if *slot != OptionState::Yes {
            return None;
        }
        *slot = OptionState::WantNo;
        Some(negotiate(TelnetCommand::DONT, option))
    }

    /// Process a negotiation byte from the peer. `accept` is the
    /// caller's policy for peer-initiated requests: whether this option
    /// may be enabled on the side the command addresses. Answers to our
    /// own offers ignore `accept` (we asked for it).
    pub fn receive(&mut self, command: TelnetCommand, option: u8, accept: bool) -> Reply {
        match command {
            // Peer will enable its option (answer to DO, or an offer)
            TelnetCommand::WILL => {
                let slot = self.slot(Side::Remote, option);
                match *slot {
                    OptionState::WantYes => {
                        *slot = OptionState::Yes;
                        Reply::quiet(StateEvent::Enabled)
                    }
                    OptionState::Yes => Reply::quiet(StateEvent::None),
                    OptionState::No => {
                        if accept {
                            *slot = OptionState::Yes;
                            Reply::answer(TelnetCommand::DO, option, StateEvent::Enabled)
                        } else {
                            Reply::answer(TelnetCommand::DONT, option, StateEvent::None)
                        }
                    }
                    // Crossed with our DONT; hold the line
                    OptionState::WantNo => {
                        *slot = OptionState::No;
                        Reply::quiet(StateEvent::None)
                    }
                }
            }

            // Peer disables (or declines) its option
            TelnetCommand::WONT => {
                let slot = self.slot(Side::Remote, option);
                match *slot {
                    OptionState::Yes => {
                        *slot = OptionState::No;
                        Reply::answer(TelnetCommand::DONT, option, StateEvent::Disabled)
                    }
                    OptionState::WantYes => {
                        *slot = OptionState::No;
                        Reply::quiet(StateEvent::Refused)
                    }
                    OptionState::WantNo => {
                        *slot = OptionState::No;
                        Reply::quiet(StateEvent::Disabled)
                    }
                    OptionState::No => Reply::quiet(StateEvent::None),
                }
            }

            // Peer wants us to enable our option (answer to WILL, or a request)
            TelnetCommand::DO => {
                let slot = self.slot(Side::Local, option);
                match *slot {
                    OptionState::WantYes => {
                        *slot = OptionState::Yes;
                        Reply::quiet(StateEvent::Enabled)
                    }
                    OptionState::Yes => Reply::quiet(StateEvent::None),
                    OptionState::No => {
                        if accept {
                            *slot = OptionState::Yes;
                            Reply::answer(TelnetCommand::WILL, option, StateEvent::Enabled)
                        } else {
                            Reply::answer(TelnetCommand::WONT, option, StateEvent::None)
                        }
                    }
                    OptionState::WantNo => {
                        *slot = OptionState::No;
                        Reply::quiet(StateEvent::None)
                    }
                }
            }

            // Peer wants us to disable (or declines) our option
            TelnetCommand::DONT => {
                let slot = self.slot(Side::Local, option);
                match *slot {
                    OptionState::Yes => {
                        *slot = OptionState::No;
                        Reply::answer(TelnetCommand::WONT, option, StateEvent::Disabled)
                    }
                    OptionState::WantYes => {
                        *slot = OptionState::No;
                        Reply::quiet(StateEvent::Refused)
                    }
                    OptionState::WantNo => {
                        *slot = OptionState::No;
                        Reply::quiet(StateEvent::Disabled)
                    }
                    OptionState::No => Reply::quiet(StateEvent::None),
                }
            }

            // Not a negotiation byte
            _ => Reply::quiet(StateEvent::None),
        }
    }

    /// Drop every option back to disabled. Used when re-syncing a
    /// client after a hot restart.
    pub fn reset(&mut self) {
        self.local = [OptionState::No; 256];
        self.remote = [OptionState::No; 256];
    }

    /// Options currently enabled, as (side, option byte) pairs.
    pub fn enabled_options(&self) -> Vec<(Side, u8)> {
        let mut out = Vec::new();
        for i in 0..=255u8 {
            if self.local[i as usize] == OptionState::Yes {
                out.push((Side::Local, i));
            }
            if self.remote[i as usize] == OptionState::Yes {
                out.push((Side::Remote, i));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TelnetOption;

    const GMCP: u8 = TelnetOption::Gmcp as u8;
    const NAWS: u8 = TelnetOption::Naws as u8;
    const MCCP2: u8 = TelnetOption::Mccp2 as u8;

    #[test]
    fn initial_state_disabled() {
        let table = OptionTable::new();
        assert!(!table.is_enabled(Side::Local, GMCP));
        assert!(!table.is_enabled(Side::Remote, NAWS));
        assert_eq!(table.state(Side::Local, GMCP), OptionState::No);
    }

    #[test]
    fn offer_then_do_enables() {
        let mut table = OptionTable::new();
        let offer = table.offer_local(MCCP2);
        assert_eq!(offer, Some([255, 251, MCCP2]));
        assert_eq!(table.state(Side::Local, MCCP2), OptionState::WantYes);

        let reply = table.receive(TelnetCommand::DO, MCCP2, false);
        assert_eq!(reply.response, None);
        assert_eq!(reply.event, StateEvent::Enabled);
        assert!(table.is_enabled(Side::Local, MCCP2));
    }

    #[test]
    fn offer_then_dont_refuses_without_activation() {
        let mut table = OptionTable::new();
        table.offer_local(MCCP2);
        let reply = table.receive(TelnetCommand::DONT, MCCP2, false);
        assert_eq!(reply.response, None);
        assert_eq!(reply.event, StateEvent::Refused);
        assert!(!table.is_enabled(Side::Local, MCCP2));
    }

    #[test]
    fn duplicate_offer_suppressed() {
        let mut table = OptionTable::new();
        assert!(table.offer_local(GMCP).is_some());
        assert!(table.offer_local(GMCP).is_none());
    }

    #[test]
    fn unsolicited_do_honours_policy() {
        let mut table = OptionTable::new();
        let accepted = table.receive(TelnetCommand::DO, GMCP, true);
        assert_eq!(accepted.response, Some([255, 251, GMCP]));
        assert_eq!(accepted.event, StateEvent::Enabled);

        let mut table = OptionTable::new();
        let refused = table.receive(TelnetCommand::DO, 99, false);
        assert_eq!(refused.response, Some([255, 252, 99]));
        assert_eq!(refused.event, StateEvent::None);
        assert!(!table.is_enabled(Side::Local, 99));
    }

    #[test]
    fn unsolicited_will_honours_policy() {
        let mut table = OptionTable::new();
        let accepted = table.receive(TelnetCommand::WILL, NAWS, true);
        assert_eq!(accepted.response, Some([255, 253, NAWS]));
        assert_eq!(accepted.event, StateEvent::Enabled);

        let refused = table.receive(TelnetCommand::WILL, 18, false);
        assert_eq!(refused.response, Some([255, 254, 18]));
        assert!(!table.is_enabled(Side::Remote, 18));
    }

    #[test]
    fn requested_will_needs_no_response() {
        let mut table = OptionTable::new();
        assert_eq!(table.request_remote(NAWS), Some([255, 253, NAWS]));
        let reply = table.receive(TelnetCommand::WILL, NAWS, false);
        assert_eq!(reply.response, None);
        assert_eq!(reply.event, StateEvent::Enabled);
        assert!(table.is_enabled(Side::Remote, NAWS));
    }

    #[test]
    fn disable_handshake() {
        let mut table = OptionTable::new();
        table.offer_local(GMCP);
        table.receive(TelnetCommand::DO, GMCP, false);
        assert!(table.is_enabled(Side::Local, GMCP));

        assert_eq!(table.retract_local(GMCP), Some([255, 252, GMCP]));
        let reply = table.receive(TelnetCommand::DONT, GMCP, false);
        assert_eq!(reply.response, None);
        assert_eq!(reply.event, StateEvent::Disabled);
        assert!(!table.is_enabled(Side::Local, GMCP));
    }

    #[test]
    fn peer_disables_mid_session() {
        let mut table = OptionTable::new();
        table.offer_local(MCCP2);
        table.receive(TelnetCommand::DO, MCCP2, false);

        let reply = table.receive(TelnetCommand::DONT, MCCP2, false);
        assert_eq!(reply.response, Some([255, 252, MCCP2]));
        assert_eq!(reply.event, StateEvent::Disabled);
    }

    #[test]
    fn no_answer_to_an_answer() {
        let mut table = OptionTable::new();
        table.offer_local(GMCP);
        let first = table.receive(TelnetCommand::DO, GMCP, false);
        assert!(first.response.is_none());
        // A duplicate DO must not generate traffic either
        let second = table.receive(TelnetCommand::DO, GMCP, false);
        assert!(second.response.is_none());
        assert_eq!(second.event, StateEvent::None);
    }

    #[test]
    fn reset_clears_everything() {
        let mut table = OptionTable::new();
        table.offer_local(GMCP);
        table.receive(TelnetCommand::DO, GMCP, false);
        table.request_remote(NAWS);
        table.receive(TelnetCommand::WILL, NAWS, false);
        assert_eq!(table.enabled_options().len(), 2);

        table.reset();
        assert!(table.enabled_options().is_empty());
    }
}
