//! A minimal reference game behind the hook boundary.
//!
//! This is deliberately thin: enough login flow, commands and world
//! data to exercise every path the connection core exposes (prompts,
//! the editor, notes, the pager, structured messages, hot restart)
//! without pretending to be a world simulation.

use std::collections::HashMap;

use telnet_negotiation::TelnetOption;
use telnet_negotiation::negotiate;
use telnet_negotiation::protocol::TelnetCommand;

use crate::board::NoteDraft;
use crate::commands;
use crate::gmcp;
use crate::hooks::{CharInfo, CharStatus, GameHooks, RoomInfo, StatusCounts, Vitals};
use crate::server::{Server, SessionId};
use crate::session::ConnState;

const MOTD: &str = "\n\r#CWelcome to Duskhaven.#n\n\r\n\r\
    The city sleeps badly. Try #7help#n, #7look#n, or #7protocols#n.\n\r\n\r\
    [Press Enter]\n\r";

const HELP_TEXT: &str = "Commands available:\n\r\
  look              look around\n\r\
  say <text>        speak to the room\n\r\
  who               list connected players\n\r\
  score             your character sheet\n\r\
  prompt <tpl>      custom prompt (%h %H %m %M %v %V), 'prompt' to reset\n\r\
  ansi / reader     toggle color / screen-reader mode\n\r\
  note              write a board note\n\r\
  describe          edit your description\n\r\
  protocols         connection protocol status\n\r\
  cfg ...           configuration registry\n\r\
  copyover          hot restart without dropping links\n\r\
  shutdown          stop the server\n\r\
  quit              leave the game\n\r";

struct Player {
    name: String,
    vitals: Vitals,
    level: i32,
    exp: i64,
    description: String,
    bad_tries: u8,
}

impl Player {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            vitals: Vitals {
                hp: 100,
                max_hp: 100,
                mana: 100,
                max_mana: 100,
                mv: 100,
                max_mv: 100,
            },
            level: if name.eq_ignore_ascii_case("sysop") { 10 } else { 1 },
            exp: 0,
            description: String::new(),
            bad_tries: 0,
        }
    }
}

/// The reference game: in-memory players, one room, and a note board
/// persisted as JSON under the data directory.
#[derive(Default)]
pub struct DemoGame {
    players: HashMap<SessionId, Player>,
    /// Known account passwords within this process lifetime
    passwords: HashMap<String, String>,
    notes: Vec<NoteDraft>,
    /// Where the board file lives; `None` keeps the board in memory
    data_dir: Option<String>,
    pulses: u64,
}

impl DemoGame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a game backed by a data directory, loading any board
    /// notes a previous run left behind.
    pub fn load(data_dir: &str) -> Self {
        let mut game = Self {
            data_dir: Some(data_dir.to_string()),
            ..Self::default()
        };
        if let Some(path) = game.notes_path() {
            if let Ok(json) = std::fs::read_to_string(&path) {
                match serde_json::from_str::<Vec<NoteDraft>>(&json) {
                    Ok(notes) => game.notes = notes,
                    Err(e) => {
                        tracing::warn!(error = %e, "board file unreadable, starting empty");
                    }
                }
            }
        }
        game
    }

    fn notes_path(&self) -> Option<std::path::PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| std::path::Path::new(dir).join("notes.json"))
    }

    fn save_notes(&self) {
        let Some(path) = self.notes_path() else { return };
        match serde_json::to_string_pretty(&self.notes) {
            Ok(json) => {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(e) = std::fs::write(&path, json) {
                    tracing::warn!(error = %e, "board save failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "board serialize failed"),
        }
    }

    fn valid_name(name: &str) -> bool {
        (2..=12).contains(&name.len()) && name.chars().all(|c| c.is_ascii_alphabetic())
    }

    fn echo_off(server: &mut Server, sid: SessionId) {
        server.write_to_buffer(sid, &negotiate(TelnetCommand::WILL, TelnetOption::Echo.to_byte()));
    }

    fn echo_on(server: &mut Server, sid: SessionId) {
        server.write_to_buffer(sid, &negotiate(TelnetCommand::WONT, TelnetOption::Echo.to_byte()));
    }

    fn room(&self) -> RoomInfo {
        RoomInfo {
            vnum: 3001,
            name: "The Shattered Plaza".to_string(),
            area: "Duskhaven".to_string(),
            terrain: "city".to_string(),
            exits: vec![("n".to_string(), 3002), ("e".to_string(), 3005)],
        }
    }

    fn enter_game(&mut self, server: &mut Server, sid: SessionId) {
        if let Some(sess) = server.session_mut(sid) {
            sess.state = ConnState::Playing;
            sess.character = Some(sid as u64);
        }
        let name = self.players.get(&sid).map(|p| p.name.clone()).unwrap_or_default();
        tracing::info!(%name, "entered the game");
        server.send_to_session(sid, "\n\rYou step into the plaza.\n\r");
        self.look(server, sid);

        // Capability burst for clients on the sidechannel
        let (info, status, vitals, room) = (
            self.char_info(sid),
            self.char_status(sid),
            self.vitals(sid),
            self.room(),
        );
        if let Some(sess) = server.session_mut(sid) {
            if let Some(info) = info {
                let _ = gmcp::send_info(sess, &info);
            }
            if let Some(status) = status {
                let _ = gmcp::send_status(sess, &status);
            }
            if let Some(vitals) = vitals {
                let _ = gmcp::send_vitals(sess, &vitals);
            }
            let _ = gmcp::send_room_info(sess, &room);
        }
    }

    fn look(&mut self, server: &mut Server, sid: SessionId) {
        let room = self.room();
        server.send_to_session(
            sid,
            &format!(
                "#C{}#n\n\rBroken flagstones radiate from a dry fountain. \
                 Exits: #7north east#n.\n\r",
                room.name
            ),
        );
        if let Some(sess) = server.session_mut(sid) {
            let _ = gmcp::send_room_info(sess, &room);
        }
    }

    fn who(&self, server: &mut Server, sid: SessionId) {
        let mut out = String::from("#7Connected players:#n\n\r");
        for player in self.players.values() {
            out.push_str(&format!("  {}\n\r", player.name));
        }
        server.send_to_session(sid, &out);
    }

    fn say(&self, server: &mut Server, sid: SessionId, text: &str) {
        let Some(speaker) = self.players.get(&sid).map(|p| p.name.clone()) else {
            return;
        };
        let listeners: Vec<SessionId> = self.players.keys().copied().collect();
        for other in listeners {
            if other == sid {
                server.send_to_session(sid, &format!("#gYou say '{}#g'#n\n\r", text));
            } else {
                server.send_to_session(other, &format!("#g{} says '{}#g'#n\n\r", speaker, text));
            }
        }
    }

    fn score(&self, server: &mut Server, sid: SessionId) {
        let Some(player) = self.players.get(&sid) else { return };
        server.send_to_session(
            sid,
            &format!(
                "#7{}#n, level {}.  {}/{} hp, {}/{} mana, {}/{} moves, {} exp.\n\r",
                player.name,
                player.level,
                player.vitals.hp,
                player.vitals.max_hp,
                player.vitals.mana,
                player.vitals.max_mana,
                player.vitals.mv,
                player.vitals.max_mv,
                player.exp
            ),
        );
    }
}

impl GameHooks for DemoGame {
    fn nanny(&mut self, server: &mut Server, sid: SessionId, line: &str) {
        let state = match server.session(sid) {
            Some(sess) => sess.state,
            None => return,
        };
        let line = line.trim();

        match state {
            ConnState::ResolvingName | ConnState::GetName => {
                if !Self::valid_name(line) {
                    server.send_to_session(sid, "Illegal name, try another.\n\rName: ");
                    return;
                }
                let name = {
                    let mut n = line.to_lowercase();
                    n[..1].make_ascii_uppercase();
                    n
                };
                if let Some(sess) = server.session_mut(sid) {
                    sess.name = name.clone();
                }
                if self.passwords.contains_key(&name) {
                    if let Some(sess) = server.session_mut(sid) {
                        sess.state = ConnState::GetPassword;
                    }
                    server.send_to_session(sid, "Password: ");
                    Self::echo_off(server, sid);
                } else {
                    if let Some(sess) = server.session_mut(sid) {
                        sess.state = ConnState::ConfirmNew;
                    }
                    server.send_to_session(
                        sid,
                        &format!("Did I get that right, {} (Y/N)? ", name),
                    );
                }
            }

            ConnState::GetPassword => {
                Self::echo_on(server, sid);
                let name = server.session(sid).map(|s| s.name.clone()).unwrap_or_default();
                let ok = self.passwords.get(&name).is_some_and(|p| p == line);
                if ok {
                    self.players.insert(sid, Player::new(&name));
                    if let Some(sess) = server.session_mut(sid) {
                        sess.state = ConnState::Motd;
                    }
                    server.send_to_session(sid, MOTD);
                } else {
                    let tries = {
                        let player = self.players.entry(sid).or_insert_with(|| Player::new(&name));
                        player.bad_tries += 1;
                        player.bad_tries
                    };
                    if tries >= 3 {
                        server.send_to_session(sid, "Wrong password.\n\r");
                        self.players.remove(&sid);
                        if let Some(sess) = server.session_mut(sid) {
                            sess.closing = true;
                        }
                    } else {
                        server.send_to_session(sid, "Wrong password.\n\rPassword: ");
                        Self::echo_off(server, sid);
                    }
                }
            }

            ConnState::ConfirmNew => {
                match line.chars().next().map(|c| c.to_ascii_lowercase()) {
                    Some('y') => {
                        let name = server.session(sid).map(|s| s.name.clone()).unwrap_or_default();
                        self.passwords.insert(name.clone(), String::new());
                        self.players.insert(sid, Player::new(&name));
                        if let Some(sess) = server.session_mut(sid) {
                            sess.state = ConnState::Motd;
                        }
                        server.send_to_session(sid, MOTD);
                    }
                    _ => {
                        if let Some(sess) = server.session_mut(sid) {
                            sess.name.clear();
                            sess.state = ConnState::GetName;
                        }
                        server.send_to_session(sid, "Then what is it? Name: ");
                    }
                }
            }

            ConnState::Motd => self.enter_game(server, sid),

            _ => {}
        }
    }

    fn interpret(&mut self, server: &mut Server, sid: SessionId, line: &str) {
        let line = line.trim();
        let (cmd, args) = match line.find(' ') {
            Some(at) => (&line[..at], line[at + 1..].trim()),
            None => (line, ""),
        };

        match cmd.to_ascii_lowercase().as_str() {
            "" => {}
            "look" | "l" => self.look(server, sid),
            "say" | "'" => self.say(server, sid, args),
            "who" => self.who(server, sid),
            "score" => self.score(server, sid),
            "help" => server.page_to_session(sid, HELP_TEXT),
            "protocols" => commands::do_protocols(server, sid),
            "cfg" => commands::do_cfg(server, sid, args),
            "note" => {
                let name = self.players.get(&sid).map(|p| p.name.clone()).unwrap_or_default();
                server.start_note(sid, &name);
            }
            "describe" => {
                let initial = self
                    .players
                    .get(&sid)
                    .map(|p| p.description.clone())
                    .unwrap_or_default();
                server.start_editing(sid, &initial);
            }
            "prompt" => {
                if let Some(sess) = server.session_mut(sid) {
                    sess.custom_prompt = if args.is_empty() {
                        None
                    } else {
                        Some(args.to_string())
                    };
                }
                server.send_to_session(sid, "Prompt set.\n\r");
            }
            "ansi" => {
                let now = {
                    let Some(sess) = server.session_mut(sid) else { return };
                    sess.ansi = !sess.ansi;
                    sess.ansi
                };
                server.send_to_session(
                    sid,
                    if now { "#GColor on.#n\n\r" } else { "Color off.\n\r" },
                );
            }
            "reader" => {
                let now = {
                    let Some(sess) = server.session_mut(sid) else { return };
                    sess.screen_reader = !sess.screen_reader;
                    sess.screen_reader
                };
                server.send_to_session(
                    sid,
                    if now {
                        "Screen reader mode on.\n\r"
                    } else {
                        "Screen reader mode off.\n\r"
                    },
                );
            }
            "copyover" => {
                server.send_to_session(sid, "Initiating hot restart...\n\r");
                server.request_copyover();
            }
            "shutdown" => {
                server.send_to_session(sid, "Shutting down.\n\r");
                server.request_shutdown();
            }
            "quit" => {
                server.send_to_session(sid, "Come back soon.\n\r");
                if let Some(sess) = server.session_mut(sid) {
                    sess.closing = true;
                }
            }
            _ => server.send_to_session(sid, "Huh?\n\r"),
        }
    }

    fn tick(&mut self, server: &mut Server) {
        self.pulses += 1;
        // Slow regeneration with a vitals push for capable clients
        if self.pulses % 16 != 0 {
            return;
        }
        let ids: Vec<SessionId> = self.players.keys().copied().collect();
        for sid in ids {
            let Some(player) = self.players.get_mut(&sid) else { continue };
            if player.vitals.hp < player.vitals.max_hp {
                player.vitals.hp = (player.vitals.hp + 5).min(player.vitals.max_hp);
                let vitals = player.vitals;
                if let Some(sess) = server.session_mut(sid) {
                    let _ = gmcp::send_vitals(sess, &vitals);
                }
            }
        }
    }

    fn save_character(&mut self, _server: &mut Server, sid: SessionId) {
        if let Some(player) = self.players.get(&sid) {
            tracing::debug!(name = %player.name, "character saved");
        }
    }

    fn reload_character(&mut self, _server: &mut Server, sid: SessionId, name: &str) -> bool {
        self.passwords.insert(name.to_string(), String::new());
        self.players.insert(sid, Player::new(name));
        true
    }

    fn free_character(&mut self, _server: &mut Server, sid: SessionId) {
        self.players.remove(&sid);
    }

    fn status_counts(&mut self) -> StatusCounts {
        StatusCounts {
            areas: 1,
            rooms: 3,
            objects: 0,
            mobs: 0,
            help_pages: 1,
        }
    }

    fn on_structured_message(
        &mut self,
        _server: &mut Server,
        _sid: SessionId,
        package: &str,
        _payload: &str,
    ) {
        tracing::debug!(package, "structured message from client");
    }

    fn vitals(&self, sid: SessionId) -> Option<Vitals> {
        self.players.get(&sid).map(|p| p.vitals)
    }

    fn char_status(&self, sid: SessionId) -> Option<CharStatus> {
        self.players.get(&sid).map(|p| CharStatus {
            level: p.level,
            class_name: "Wanderer".to_string(),
            position: "standing".to_string(),
            exp: p.exp,
        })
    }

    fn char_info(&self, sid: SessionId) -> Option<CharInfo> {
        self.players.get(&sid).map(|p| CharInfo {
            name: p.name.clone(),
            guild: "None".to_string(),
        })
    }

    fn room_info(&self, _sid: SessionId) -> Option<RoomInfo> {
        Some(self.room())
    }

    fn post_note(&mut self, server: &mut Server, sid: SessionId, note: &NoteDraft) {
        tracing::info!(from = %note.sender, subject = %note.subject, "note posted");
        self.notes.push(note.clone());
        self.save_notes();
        let count = self.notes.len();
        server.send_to_session(sid, &format!("The board now carries {} note(s).\n\r", count));
    }

    fn editor_done(&mut self, _server: &mut Server, sid: SessionId, text: Option<String>) {
        if let (Some(player), Some(text)) = (self.players.get_mut(&sid), text) {
            player.description = text;
        }
    }

    fn can_use_editor_shell(&self, sid: SessionId) -> bool {
        self.players.get(&sid).is_some_and(|p| p.level >= 10)
    }
}
