//! Game-side callbacks.
//!
//! The connection core never interprets game semantics: it accepts
//! connections, negotiates protocols, frames lines, drives the pulse
//! clock, and hands finished work to the [`GameHooks`] implementation.
//! Everything the simulation needs to cross back (sending text, media
//! cues, vitals updates) goes through the server's send/emit functions;
//! the hooks never touch a socket.

use crate::board::NoteDraft;
use crate::server::{Server, SessionId};

/// Current and maximum pools, for prompts and `Char.Vitals`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Vitals {
    pub hp: i32,
    pub max_hp: i32,
    pub mana: i32,
    pub max_mana: i32,
    pub mv: i32,
    pub max_mv: i32,
}

/// Level/class/position snapshot for `Char.Status`.
#[derive(Debug, Clone, Default)]
pub struct CharStatus {
    pub level: i32,
    pub class_name: String,
    pub position: String,
    pub exp: i64,
}

/// Identity snapshot for `Char.Info`.
#[derive(Debug, Clone, Default)]
pub struct CharInfo {
    pub name: String,
    pub guild: String,
}

/// Room snapshot for `Room.Info`. The vnum and exit targets are opaque
/// world identifiers; the core forwards them without interpretation.
#[derive(Debug, Clone, Default)]
pub struct RoomInfo {
    pub vnum: i64,
    pub name: String,
    pub area: String,
    pub terrain: String,
    /// (direction, destination vnum) pairs, e.g. ("n", 3001)
    pub exits: Vec<(String, i64)>,
}

/// World-size counters for the server-status reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusCounts {
    pub areas: u32,
    pub rooms: u32,
    pub objects: u32,
    pub mobs: u32,
    pub help_pages: u32,
}

/// The complete interface between the connection core and the game.
///
/// `nanny` owns login/menu policy, `interpret` owns commands, `tick`
/// advances the simulation once per pulse. The save/reload/free trio is
/// the persistence boundary; the data accessors feed the prompt and the
/// structured-messaging emitters.
pub trait GameHooks {
    /// One line of input from a session that is not yet playing.
    fn nanny(&mut self, server: &mut Server, sid: SessionId, line: &str);

    /// One line of input from a playing session.
    fn interpret(&mut self, server: &mut Server, sid: SessionId, line: &str);

    /// Advance the simulation one pulse.
    fn tick(&mut self, server: &mut Server);

    /// Persist the character bound to this session, if any.
    fn save_character(&mut self, server: &mut Server, sid: SessionId);

    /// Re-bind a named character to a freshly restored session after a
    /// hot restart. Returns false if the character cannot be restored.
    fn reload_character(&mut self, server: &mut Server, sid: SessionId, name: &str) -> bool;

    /// Release the character bound to this session (session is closing
    /// before reaching the playing state).
    fn free_character(&mut self, server: &mut Server, sid: SessionId);

    /// World-size counters for the server-status protocol.
    fn status_counts(&mut self) -> StatusCounts;

    /// Custom prompt markup for this session, or `None` to use the
    /// compact built-in prompt.
    fn render_prompt(&mut self, _server: &Server, _sid: SessionId) -> Option<String> {
        None
    }

    /// An inbound structured-messaging package outside the `Core.*`
    /// namespace, forwarded unaltered.
    fn on_structured_message(
        &mut self,
        _server: &mut Server,
        _sid: SessionId,
        _package: &str,
        _payload: &str,
    ) {
    }

    /// Vitals for the character this session controls.
    fn vitals(&self, _sid: SessionId) -> Option<Vitals> {
        None
    }

    fn char_status(&self, _sid: SessionId) -> Option<CharStatus> {
        None
    }

    fn char_info(&self, _sid: SessionId) -> Option<CharInfo> {
        None
    }

    fn room_info(&self, _sid: SessionId) -> Option<RoomInfo> {
        None
    }

    /// A finished note leaves the note writer. The draft is complete:
    /// recipients, subject, expiry and text.
    fn post_note(&mut self, _server: &mut Server, _sid: SessionId, _note: &NoteDraft) {}

    /// The line editor finished. `text` is the joined buffer on save,
    /// `None` on abort.
    fn editor_done(&mut self, _server: &mut Server, _sid: SessionId, _text: Option<String>) {}

    /// Whether this session may use the editor's `/!` command escape.
    fn can_use_editor_shell(&self, _sid: SessionId) -> bool {
        false
    }
}
