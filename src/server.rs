//! The connection manager and game loop.
//!
//! One OS thread runs everything: accept, per-socket reads, telnet
//! event dispatch, line routing, the game tick, and the write phase,
//! all at a fixed pulse cadence. Sessions live in a single owning
//! container keyed by a stable index; cross-session references (snoop
//! links) are non-owning indexes validated at dereference.
//!
//! The only other threads are throwaway reverse-DNS workers whose sole
//! output is a host string behind a done flag.

use std::net::{IpAddr, SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use jiff::Timestamp;
use telnet_negotiation::protocol::{IAC, TTYPE_IS, TTYPE_SEND, subnegotiate};
use telnet_negotiation::{
    StateEvent, TelnetCommand, TelnetEvent, TelnetOption, WindowSize, negotiate,
};

use crate::board::{self, NoteStep};
use crate::config::{CfgKey, ConfigRegistry, Settings};
use crate::copyover::{self, CrashSnapshot, HandoffRecord, RESTART_BANNER};
use crate::editor::{self, EditorAction};
use crate::errors::{MudError, MudResult};
use crate::gmcp;
use crate::hooks::GameHooks;
use crate::mccp::{CompressStream, CompressVersion};
use crate::mssp::{self, StatusReport};
use crate::mxp;
use crate::output::{RenderOpts, compact_prompt, expand_prompt_template, render_markup};
use crate::pager::{self, PagerAction};
use crate::session::{
    ConnState, DNS_DONE, DNS_PENDING, DnsSlot, LID_MESSAGE, LineOutcome, Session,
};

pub use crate::session::SessionId;

const ACCEPT_BACKLOG: i32 = 3;

/// Pulses a fresh connection may sit in ResolvingName before the
/// dotted quad is accepted as-is.
const DNS_WAIT_PULSES: u32 = 8;

/// The whole server: listener, session table, config, clock.
pub struct Server {
    listener: TcpListener,
    pub port: u16,
    pub sessions: Vec<Option<Session>>,
    pub config: ConfigRegistry,
    pub settings: Settings,
    pub boot_time: Timestamp,
    pub shutdown: bool,
    copyover_requested: bool,
    dns_workers: Arc<AtomicUsize>,
    resolver: Option<Arc<hickory_resolver::Resolver>>,
}

/// Peer-initiated option requests the server agrees to. Anything else
/// gets the refusing counterpart so no option is left hanging.
fn accept_option(command: TelnetCommand, option: u8) -> bool {
    use TelnetOption::*;
    match (command, TelnetOption::from_byte(option)) {
        // DO <opt>: our side of the option
        (TelnetCommand::DO, Some(Echo | SuppressGoAhead | Mssp | Gmcp | Mxp | Mccp1 | Mccp2)) => {
            true
        }
        // WILL <opt>: the peer's side
        (TelnetCommand::WILL, Some(Naws | TerminalType)) => true,
        _ => false,
    }
}

impl Server {
    /// Bind the listener and build an empty server.
    pub fn new(port: u16, settings: Settings, config: ConfigRegistry) -> MudResult<Self> {
        use socket2::{Domain, Protocol, Socket, Type};

        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| MudError::Listener(format!("socket: {}", e)))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| MudError::Listener(format!("SO_REUSEADDR: {}", e)))?;
        let addr: SocketAddr = format!("0.0.0.0:{}", port)
            .parse()
            .map_err(|e| MudError::Listener(format!("address: {}", e)))?;
        socket
            .bind(&addr.into())
            .map_err(|e| MudError::Listener(format!("bind: {}", e)))?;
        socket
            .listen(ACCEPT_BACKLOG)
            .map_err(|e| MudError::Listener(format!("listen: {}", e)))?;

        let listener: TcpListener = socket.into();
        listener
            .set_nonblocking(true)
            .map_err(|e| MudError::Listener(format!("nonblocking: {}", e)))?;

        Ok(Self::with_listener(listener, port, settings, config))
    }

    /// Adopt a listener inherited across a hot-restart exec.
    pub fn from_inherited(
        listener_fd: i32,
        port: u16,
        settings: Settings,
        config: ConfigRegistry,
    ) -> MudResult<Self> {
        use std::os::unix::io::FromRawFd;

        let listener = unsafe { TcpListener::from_raw_fd(listener_fd) };
        listener
            .set_nonblocking(true)
            .map_err(|e| MudError::Listener(format!("nonblocking: {}", e)))?;
        Ok(Self::with_listener(listener, port, settings, config))
    }

    fn with_listener(
        listener: TcpListener,
        port: u16,
        settings: Settings,
        config: ConfigRegistry,
    ) -> Self {
        let resolver = hickory_resolver::Resolver::from_system_conf()
            .or_else(|_| {
                hickory_resolver::Resolver::new(Default::default(), Default::default())
            })
            .ok()
            .map(Arc::new);

        Self {
            listener,
            port,
            sessions: Vec::new(),
            config,
            settings,
            boot_time: Timestamp::now(),
            shutdown: false,
            copyover_requested: false,
            dns_workers: Arc::new(AtomicUsize::new(0)),
            resolver,
        }
    }

    // --------------------------------------------------------------
    // Accessors used by the game side
    // --------------------------------------------------------------

    pub fn session(&self, sid: SessionId) -> Option<&Session> {
        self.sessions.get(sid).and_then(Option::as_ref)
    }

    pub fn session_mut(&mut self, sid: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(sid).and_then(Option::as_mut)
    }

    pub fn playing_count(&self) -> usize {
        self.sessions
            .iter()
            .flatten()
            .filter(|s| s.state == ConnState::Playing)
            .count()
    }

    /// Ask the loop to stop at the end of the current pulse.
    pub fn request_shutdown(&mut self) {
        self.shutdown = true;
    }

    /// The listener's bound address (useful when bound to port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Drive exactly one pulse of work without the clock. This is the
    /// loop body of [`Server::run`]; embedders with their own clock can
    /// call it directly.
    pub fn pulse_once(&mut self, hooks: &mut dyn GameHooks) -> MudResult<()> {
        self.pulse(hooks)
    }

    /// Ask for a graceful hot restart at the end of the current pulse.
    pub fn request_copyover(&mut self) {
        self.copyover_requested = true;
    }

    /// Attach or detach a snoop link: `watcher` sees a copy of
    /// `target`'s output.
    pub fn set_snoop(&mut self, target: SessionId, watcher: Option<SessionId>) {
        if let Some(sess) = self.session_mut(target) {
            sess.snoop_by = watcher;
        }
    }

    fn handoff_path(&self) -> PathBuf {
        PathBuf::from(&self.settings.data_dir).join("copyover.dat")
    }

    fn sentinel_path(&self) -> PathBuf {
        PathBuf::from(&self.settings.data_dir).join("crash.sentinel")
    }

    fn listener_fd(&self) -> i32 {
        use std::os::unix::io::AsRawFd;
        self.listener.as_raw_fd()
    }

    // --------------------------------------------------------------
    // Output API exposed to the game callback
    // --------------------------------------------------------------

    /// Render markup and append it to a session's output buffer.
    pub fn send_to_session(&mut self, sid: SessionId, markup: &str) {
        let overflowed = {
            let Some(sess) = self.sessions.get_mut(sid).and_then(Option::as_mut) else {
                return;
            };
            let opts = RenderOpts {
                ansi: sess.ansi,
                mxp: sess.mxp_on,
                screen_reader: sess.screen_reader,
            };
            let mut seed = sess.color_seed;
            let bytes = render_markup(markup, opts, &mut seed);
            sess.color_seed = seed;
            sess.append_out(&bytes).is_err()
        };
        if overflowed {
            self.flag_output_overflow(sid);
        }
    }

    /// Append raw bytes to a session's output buffer, no rendering.
    pub fn write_to_buffer(&mut self, sid: SessionId, bytes: &[u8]) {
        let overflowed = {
            let Some(sess) = self.sessions.get_mut(sid).and_then(Option::as_mut) else {
                return;
            };
            sess.append_out(bytes).is_err()
        };
        if overflowed {
            self.flag_output_overflow(sid);
        }
    }

    fn flag_output_overflow(&mut self, sid: SessionId) {
        let Some(sess) = self.sessions.get_mut(sid).and_then(Option::as_mut) else {
            return;
        };
        tracing::error!(peer = %sess.peer_label(), "output buffer overflow, closing");
        sess.clear_output();
        let _ = sess.write_uncompressed_now(LID_MESSAGE);
        sess.closing = true;
    }

    // --------------------------------------------------------------
    // The loop
    // --------------------------------------------------------------

    /// Run pulses until shutdown. Returns an error only for fatal
    /// conditions (a failed restart exec).
    pub fn run(&mut self, hooks: &mut dyn GameHooks) -> MudResult<()> {
        tracing::info!(
            port = self.port,
            "{} is ready to rock",
            self.settings.game_name
        );

        let mut slow_pulses: i64 = 0;

        while !self.shutdown {
            let start = Instant::now();
            let pps = self.config.get(CfgKey::PulsePerSecond).clamp(1, 100);
            let mult = self.config.get(CfgKey::TickMultiplier).max(1);
            let pulse = Duration::from_micros(1_000_000 / (pps * mult) as u64);

            self.pulse(hooks)?;
            self.refresh_crash_snapshot();

            // Synchronize to the clock
            let elapsed = start.elapsed();
            if elapsed >= pulse {
                slow_pulses += 1;
                tracing::warn!(
                    lag_ms = (elapsed - pulse).as_millis() as u64,
                    "pulse overran"
                );
                if slow_pulses >= self.config.get(CfgKey::SlowPulseLimit) {
                    tracing::error!("too many consecutive slow pulses, shutting down");
                    self.shutdown = true;
                }
            } else {
                slow_pulses = 0;
                std::thread::sleep(pulse - elapsed);
            }
        }

        // Drain on the way out
        for sess in self.sessions.iter_mut().flatten() {
            let _ = sess.flush_output();
            let _ = sess.end_compression();
        }
        tracing::info!("normal termination of game");
        Ok(())
    }

    /// One pulse of work.
    fn pulse(&mut self, hooks: &mut dyn GameHooks) -> MudResult<()> {
        self.accept_new();

        // Input phase
        for sid in 0..self.sessions.len() {
            if self
                .sessions
                .get(sid)
                .and_then(Option::as_ref)
                .is_none_or(|s| s.closing)
            {
                continue;
            }

            self.poll_dns(sid);
            self.read_session(sid, hooks);
            self.consume_line(sid, hooks);
        }

        // Autonomous game motion
        hooks.tick(self);

        // Output phase
        for sid in 0..self.sessions.len() {
            let wants_output = match self.sessions.get(sid).and_then(Option::as_ref) {
                Some(s) if !s.closing => s.fcommand || s.has_buffered_output(),
                _ => false,
            };
            if wants_output {
                if let Err(e) = self.process_output(hooks, sid, true) {
                    self.note_session_error(sid, &e);
                    if let Some(sess) = self.session_mut(sid) {
                        sess.closing = true;
                    }
                }
            }
            if let Some(sess) = self.session_mut(sid) {
                sess.fcommand = false;
            }
        }

        // Reap
        for sid in 0..self.sessions.len() {
            let closing = self
                .sessions
                .get(sid)
                .and_then(Option::as_ref)
                .is_some_and(|s| s.closing);
            if closing {
                self.close_session(hooks, sid);
            }
        }

        if self.copyover_requested {
            self.copyover_requested = false;
            self.do_copyover(hooks)?;
        }

        Ok(())
    }

    // --------------------------------------------------------------
    // Accept / DNS
    // --------------------------------------------------------------

    fn accept_new(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        tracing::warn!(error = %e, "accept: nonblocking failed");
                        continue;
                    }
                    // Prompts must not sit in Nagle's buffer
                    let _ = stream.set_nodelay(true);
                    self.register_connection(stream, addr.ip());
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn register_connection(&mut self, stream: std::net::TcpStream, ip: IpAddr) {
        let host = ip.to_string();
        let mut sess = Session::new(stream, host);
        tracing::info!(peer = %sess.peer_label(), "connection established");

        if ip.is_loopback() {
            sess.host = "localhost".to_string();
            sess.state = ConnState::GetName;
        } else if !self.spawn_dns_worker(&mut sess, ip) {
            // Worker ceiling reached: shed load instead of queueing
            let _ = sess.write_uncompressed_now(
                b"Sorry, currently under attack, try again later.\n\r",
            );
            tracing::warn!(peer = %sess.peer_label(), "dns worker ceiling hit, rejecting");
            return;
        }

        self.send_offers(&mut sess);

        let greeting = format!(
            "#R{}#n\n\r\n\rBy what name do you wish to be known? ",
            self.settings.game_name
        );
        let opts = RenderOpts {
            ansi: sess.ansi,
            mxp: false,
            screen_reader: false,
        };
        let mut seed = sess.color_seed;
        let bytes = render_markup(&greeting, opts, &mut seed);
        sess.color_seed = seed;
        let _ = sess.append_out(&bytes);

        self.store_session(sess);
    }

    fn store_session(&mut self, sess: Session) -> SessionId {
        match self.sessions.iter().position(Option::is_none) {
            Some(sid) => {
                self.sessions[sid] = Some(sess);
                sid
            }
            None => {
                self.sessions.push(Some(sess));
                self.sessions.len() - 1
            }
        }
    }

    /// The protocol offers every fresh connection receives, in the
    /// order clients expect: compression first, rich markup last.
    fn send_offers(&mut self, sess: &mut Session) {
        use TelnetOption::*;
        let mut bytes = Vec::with_capacity(18);
        for opt in [Mccp2, Mccp1, Mssp, Gmcp, Mxp] {
            if let Some(atom) = sess.opts.offer_local(opt.to_byte()) {
                bytes.extend_from_slice(&atom);
            }
        }
        if let Some(atom) = sess.opts.request_remote(Naws.to_byte()) {
            bytes.extend_from_slice(&atom);
        }
        let _ = sess.append_out(&bytes);
    }

    /// After a hot restart, reset the client's view of every option
    /// with the refusing counterpart before offering it fresh. Clients
    /// that believe an option is still active from before the exec
    /// would otherwise ignore the plain offer.
    fn resync_offers(&mut self, sess: &mut Session) {
        use TelnetOption::*;
        let mut bytes = Vec::with_capacity(36);
        for opt in [Mccp2, Mccp1, Mssp, Gmcp, Mxp] {
            bytes.extend_from_slice(&negotiate(TelnetCommand::WONT, opt.to_byte()));
        }
        bytes.extend_from_slice(&negotiate(TelnetCommand::DONT, Naws.to_byte()));
        let _ = sess.write_uncompressed_now(&bytes);

        sess.opts.reset();
        self.send_offers(sess);
    }

    fn spawn_dns_worker(&mut self, sess: &mut Session, ip: IpAddr) -> bool {
        let ceiling = self.config.get(CfgKey::MaxDnsWorkers).max(1) as usize;
        if self.dns_workers.load(Ordering::Relaxed) >= ceiling {
            return false;
        }

        let slot = Arc::new(DnsSlot {
            status: AtomicU8::new(DNS_PENDING),
            host: std::sync::Mutex::new(String::new()),
        });
        sess.dns = Some(slot.clone());

        let counter = self.dns_workers.clone();
        let resolver = self.resolver.clone();
        counter.fetch_add(1, Ordering::Relaxed);

        std::thread::spawn(move || {
            if let Some(resolver) = resolver {
                if let Ok(lookup) = resolver.reverse_lookup(ip) {
                    if let Some(name) = lookup.iter().next() {
                        let name = name.to_string();
                        if let Ok(mut host) = slot.host.lock() {
                            *host = name.trim_end_matches('.').to_string();
                        }
                    }
                }
            }
            slot.status.store(DNS_DONE, Ordering::Release);
            counter.fetch_sub(1, Ordering::Relaxed);
        });

        true
    }

    /// Move ResolvingName sessions on once the worker reports, or once
    /// we have waited long enough; the dotted quad works fine either
    /// way.
    fn poll_dns(&mut self, sid: SessionId) {
        let Some(sess) = self.sessions.get_mut(sid).and_then(Option::as_mut) else {
            return;
        };
        if sess.state != ConnState::ResolvingName {
            return;
        }

        let done = sess
            .dns
            .as_ref()
            .map(|slot| slot.status.load(Ordering::Acquire) == DNS_DONE)
            .unwrap_or(true);

        if done {
            if let Some(slot) = sess.dns.take() {
                if let Ok(host) = slot.host.lock() {
                    if !host.is_empty() {
                        sess.host = host.clone();
                    }
                }
            }
            sess.state = ConnState::GetName;
        } else {
            sess.dns_pulses += 1;
            if sess.dns_pulses >= DNS_WAIT_PULSES {
                sess.state = ConnState::GetName;
            }
        }
    }

    // --------------------------------------------------------------
    // Read / dispatch
    // --------------------------------------------------------------

    fn read_session(&mut self, sid: SessionId, hooks: &mut dyn GameHooks) {
        let parsed = {
            let Some(sess) = self.sessions.get_mut(sid).and_then(Option::as_mut) else {
                return;
            };
            match sess.read_raw() {
                Ok(chunk) if chunk.is_empty() => None,
                Ok(chunk) => Some(sess.parser.parse(&chunk)),
                Err(e) => {
                    self.note_session_error(sid, &e);
                    if let Some(sess) = self.session_mut(sid) {
                        if matches!(e, MudError::InputOverflow) {
                            let _ = sess.write_uncompressed_now(LID_MESSAGE);
                        }
                        sess.closing = true;
                    }
                    return;
                }
            }
        };

        let Some(result) = parsed else { return };

        for event in result.events {
            self.on_telnet_event(hooks, sid, event);
        }

        let flooded = {
            let Some(sess) = self.sessions.get_mut(sid).and_then(Option::as_mut) else {
                return;
            };
            sess.push_inband(&result.data);
            sess.input_flooded()
        };
        if flooded {
            self.note_session_error(sid, &MudError::InputOverflow);
            if let Some(sess) = self.session_mut(sid) {
                let _ = sess.write_uncompressed_now(LID_MESSAGE);
                sess.closing = true;
            }
        }
    }

    fn note_session_error(&mut self, sid: SessionId, error: &MudError) {
        let Some(sess) = self.session(sid) else { return };
        match error {
            MudError::PeerClosed => {
                tracing::info!(peer = %sess.peer_label(), "peer closed connection");
            }
            MudError::InputOverflow => {
                tracing::warn!(peer = %sess.peer_label(), "input overflow");
            }
            MudError::OutputOverflow => {
                tracing::warn!(peer = %sess.peer_label(), "output overflow");
            }
            other => {
                tracing::warn!(peer = %sess.peer_label(), error = %other, "session error");
            }
        }
    }

    fn consume_line(&mut self, sid: SessionId, hooks: &mut dyn GameHooks) {
        let outcome = {
            let Some(sess) = self.sessions.get_mut(sid).and_then(Option::as_mut) else {
                return;
            };
            if sess.closing {
                return;
            }
            sess.assemble_line()
        };

        match outcome {
            LineOutcome::Pending => self.bump_idle(sid),
            LineOutcome::Spam => {
                self.note_session_error(sid, &MudError::InputOverflow);
                if let Some(sess) = self.session_mut(sid) {
                    let _ = sess.write_uncompressed_now(LID_MESSAGE);
                    sess.closing = true;
                }
            }
            LineOutcome::Ready { too_long } => {
                let line = {
                    let Some(sess) = self.sessions.get_mut(sid).and_then(Option::as_mut) else {
                        return;
                    };
                    sess.fcommand = true;
                    sess.idle_pulses = 0;
                    sess.idle_warned = false;
                    if too_long {
                        let _ = sess.append_out(b"Line too long.\n\r");
                    }
                    std::mem::take(&mut sess.incomm)
                };

                self.dispatch_line(hooks, sid, &line);

                // Flush right away so responses and prompts reach the
                // player before their next keystroke, not a pulse late.
                let pending = self
                    .session(sid)
                    .is_some_and(|s| !s.closing && s.has_buffered_output());
                if pending {
                    if let Some(sess) = self.session_mut(sid) {
                        if sess.go_ahead {
                            let _ = sess.append_out(&[IAC, TelnetCommand::GA.to_byte()]);
                        }
                    }
                    if let Err(e) = self.process_output(hooks, sid, false) {
                        self.note_session_error(sid, &e);
                        if let Some(sess) = self.session_mut(sid) {
                            sess.closing = true;
                        }
                    }
                }
            }
        }
    }

    fn bump_idle(&mut self, sid: SessionId) {
        let warn_at = self.config.get(CfgKey::IdleWarnPulses);
        let close_at = self.config.get(CfgKey::IdleClosePulses);
        let action = {
            let Some(sess) = self.sessions.get_mut(sid).and_then(Option::as_mut) else {
                return;
            };
            if sess.state == ConnState::ResolvingName {
                return;
            }
            sess.idle_pulses += 1;
            if sess.idle_pulses >= close_at {
                2
            } else if sess.idle_pulses >= warn_at && !sess.idle_warned {
                sess.idle_warned = true;
                1
            } else {
                0
            }
        };
        match action {
            1 => self.send_to_session(sid, "#yYou have been idle for a while. Say something, or the void will claim you.#n\n\r"),
            2 => {
                self.send_to_session(sid, "Idle too long. Goodbye.\n\r");
                if let Some(sess) = self.session_mut(sid) {
                    sess.closing = true;
                }
            }
            _ => {}
        }
    }

    /// Route one assembled line to its consumer based on session state.
    fn dispatch_line(&mut self, hooks: &mut dyn GameHooks, sid: SessionId, line: &str) {
        let state = match self.session(sid) {
            Some(sess) => sess.state,
            None => return,
        };

        match state {
            ConnState::Editing => self.editor_line(hooks, sid, line),
            s if s.is_note() => self.note_line(hooks, sid, line),
            ConnState::Pager => self.pager_line(sid, line),
            ConnState::Playing => hooks.interpret(self, sid, line),
            ConnState::Closed => {}
            _ => hooks.nanny(self, sid, line),
        }
    }

    // --------------------------------------------------------------
    // Editor / note / pager routing
    // --------------------------------------------------------------

    /// Enter the line editor, seeding it with existing text. Only a
    /// playing session may enter, and it displaces any pager.
    pub fn start_editing(&mut self, sid: SessionId, initial: &str) {
        let Some(sess) = self.sessions.get_mut(sid).and_then(Option::as_mut) else {
            return;
        };
        if sess.state != ConnState::Playing {
            return;
        }
        sess.editor = Some(editor::EditorState::from_text(initial));
        sess.pager = None;
        sess.note = None;
        sess.state = ConnState::Editing;
        self.send_to_session(
            sid,
            "Begin entering your text now (/? = help /s = save /c = clear /l = list)\n\r\
             -----------------------------------------------------------------------\n\r> ",
        );
    }

    /// Begin composing a note. Only a playing session may start one.
    pub fn start_note(&mut self, sid: SessionId, sender: &str) {
        let Some(sess) = self.sessions.get_mut(sid).and_then(Option::as_mut) else {
            return;
        };
        if sess.state != ConnState::Playing {
            return;
        }
        sess.note = Some(board::NoteDraft {
            sender: sender.to_string(),
            ..Default::default()
        });
        sess.editor = None;
        sess.pager = None;
        sess.state = ConnState::NoteTo;
        self.send_to_session(sid, "\n\r#yTo#n:      ");
    }

    /// Page long output instead of flooding the screen. Only a playing
    /// session is paged; anything else gets the text directly.
    pub fn page_to_session(&mut self, sid: SessionId, text: &str) {
        let height = match self.session(sid) {
            None => return,
            Some(sess) if sess.state != ConnState::Playing => {
                self.send_to_session(sid, text);
                return;
            }
            Some(sess) => sess.window.height as usize,
        };

        let mut pstate = pager::PagerState::new(text);
        let first = pstate.advance(height);
        let done = pstate.is_done();
        if let Some(sess) = self.session_mut(sid) {
            if !done {
                sess.prev_state = sess.state;
                sess.state = ConnState::Pager;
                sess.pager = Some(pstate);
                sess.editor = None;
                sess.note = None;
            }
        }
        self.send_to_session(sid, &first);
    }

    fn editor_line(&mut self, hooks: &mut dyn GameHooks, sid: SessionId, line: &str) {
        let allow_shell = hooks.can_use_editor_shell(sid);
        let action = {
            let Some(sess) = self.sessions.get_mut(sid).and_then(Option::as_mut) else {
                return;
            };
            let Some(edit) = sess.editor.as_mut() else {
                tracing::warn!(peer = %sess.peer_label(), "editing state without editor");
                sess.state = ConnState::Playing;
                return;
            };
            editor::handle_line(edit, line, allow_shell)
        };

        match action {
            EditorAction::Continue(response) => self.send_to_session(sid, &response),
            EditorAction::Save => {
                let text = self
                    .session_mut(sid)
                    .and_then(|s| s.editor.take())
                    .map(|e| e.to_text());
                if let Some(sess) = self.session_mut(sid) {
                    sess.state = ConnState::Playing;
                }
                self.send_to_session(sid, "Saved.\n\r");
                hooks.editor_done(self, sid, text);
            }
            EditorAction::Abort => {
                if let Some(sess) = self.session_mut(sid) {
                    sess.editor = None;
                    sess.state = ConnState::Playing;
                }
                self.send_to_session(sid, "\n\rAborting...\n\r");
                hooks.editor_done(self, sid, None);
            }
            EditorAction::Shell(command) => {
                hooks.interpret(self, sid, &command);
                self.send_to_session(sid, "\n\r> ");
            }
        }
    }

    fn note_line(&mut self, hooks: &mut dyn GameHooks, sid: SessionId, line: &str) {
        let purge_days = self.config.get(CfgKey::BoardPurgeDays);
        let max_lines = self.config.get(CfgKey::BoardMaxNoteLines).max(1) as usize;
        let privileged = hooks.can_use_editor_shell(sid);

        let step = {
            let Some(sess) = self.sessions.get_mut(sid).and_then(Option::as_mut) else {
                return;
            };
            let state = sess.state;
            let Some(draft) = sess.note.as_mut() else {
                tracing::warn!(peer = %sess.peer_label(), "note state without a note in progress");
                sess.state = ConnState::Playing;
                return;
            };
            let now = Timestamp::now();
            match state {
                ConnState::NoteTo => board::handle_note_to(draft, line, "all"),
                ConnState::NoteSubject => {
                    board::handle_note_subject(draft, line, privileged, purge_days, now)
                }
                ConnState::NoteExpire => {
                    board::handle_note_expire(draft, line, purge_days, now)
                }
                ConnState::NoteText => board::handle_note_text(draft, line, max_lines),
                ConnState::NoteFinish => board::handle_note_finish(draft, line),
                _ => return,
            }
        };

        match step {
            NoteStep::Stay(msg) => {
                if !msg.is_empty() {
                    self.send_to_session(sid, &msg);
                }
            }
            NoteStep::Goto(state, msg) => {
                if let Some(sess) = self.session_mut(sid) {
                    sess.state = state;
                }
                self.send_to_session(sid, &msg);
            }
            NoteStep::Post(msg) => {
                let note = self.session_mut(sid).and_then(|s| s.note.take());
                if let Some(sess) = self.session_mut(sid) {
                    sess.state = ConnState::Playing;
                }
                self.send_to_session(sid, &msg);
                if let Some(note) = note {
                    hooks.post_note(self, sid, &note);
                }
            }
            NoteStep::Discard(msg) => {
                if let Some(sess) = self.session_mut(sid) {
                    sess.note = None;
                    sess.state = ConnState::Playing;
                }
                self.send_to_session(sid, &msg);
            }
        }
    }

    fn pager_line(&mut self, sid: SessionId, line: &str) {
        let (action, done) = {
            let Some(sess) = self.sessions.get_mut(sid).and_then(Option::as_mut) else {
                return;
            };
            let height = sess.window.height as usize;
            let Some(pstate) = sess.pager.as_mut() else {
                sess.state = sess.prev_state;
                return;
            };
            let action = pager::handle_line(pstate, line, height);
            let done = pstate.is_done();
            (action, done)
        };

        match action {
            PagerAction::Show(text) => {
                self.send_to_session(sid, &text);
                if done {
                    self.leave_pager(sid);
                }
            }
            PagerAction::Quit => self.leave_pager(sid),
        }
    }

    fn leave_pager(&mut self, sid: SessionId) {
        if let Some(sess) = self.session_mut(sid) {
            sess.pager = None;
            sess.state = sess.prev_state;
        }
    }

    // --------------------------------------------------------------
    // Telnet events
    // --------------------------------------------------------------

    fn on_telnet_event(&mut self, hooks: &mut dyn GameHooks, sid: SessionId, event: TelnetEvent) {
        match event {
            TelnetEvent::Negotiation { command, option } => {
                let state_event = {
                    let Some(sess) = self.sessions.get_mut(sid).and_then(Option::as_mut) else {
                        return;
                    };
                    let accept = accept_option(command, option);
                    let reply = sess.opts.receive(command, option, accept);
                    if let Some(atom) = reply.response {
                        let _ = sess.write_raw_now(&atom);
                    }
                    reply.event
                };
                self.on_option_change(hooks, sid, command, option, state_event);
            }
            TelnetEvent::Subnegotiation { option, data } => {
                self.on_subnegotiation(hooks, sid, option, data);
            }
            TelnetEvent::Command(_) => {}
            TelnetEvent::MalformedSubnegotiation { option } => {
                let Some(sess) = self.sessions.get_mut(sid).and_then(Option::as_mut) else {
                    return;
                };
                if !sess.subneg_error_logged {
                    sess.subneg_error_logged = true;
                    tracing::warn!(
                        peer = %sess.peer_label(),
                        option,
                        "malformed subnegotiation dropped"
                    );
                }
            }
            TelnetEvent::OversizedSubnegotiation { option } => {
                let Some(sess) = self.sessions.get_mut(sid).and_then(Option::as_mut) else {
                    return;
                };
                tracing::warn!(
                    peer = %sess.peer_label(),
                    option,
                    "oversized subnegotiation discarded"
                );
            }
        }
    }

    /// Act on an option becoming active or inactive.
    fn on_option_change(
        &mut self,
        hooks: &mut dyn GameHooks,
        sid: SessionId,
        command: TelnetCommand,
        option: u8,
        event: StateEvent,
    ) {
        use TelnetOption::*;
        let Some(opt) = TelnetOption::from_byte(option) else {
            return;
        };

        // GA after prompts is wanted exactly while the peer keeps
        // suppress-go-ahead off. DONT always counts as asking for go-
        // aheads, even when the option was never on.
        if opt == SuppressGoAhead {
            if let Some(sess) = self.session_mut(sid) {
                match command {
                    TelnetCommand::DO if event == StateEvent::Enabled => {
                        sess.go_ahead = false;
                    }
                    TelnetCommand::DONT => sess.go_ahead = true,
                    _ => {}
                }
            }
            return;
        }

        match (command, event) {
            // DO: one of our options came on
            (TelnetCommand::DO, StateEvent::Enabled) => match opt {
                Mccp2 => self.start_compression(sid, CompressVersion::V2),
                Mccp1 => self.start_compression(sid, CompressVersion::V1),
                Mssp => self.send_status_reply(hooks, sid),
                Gmcp => {
                    let Server {
                        sessions, settings, ..
                    } = self;
                    if let Some(Some(sess)) = sessions.get_mut(sid) {
                        if let Err(e) = gmcp::init(sess, settings) {
                            tracing::warn!(error = %e, "gmcp init failed");
                            sess.closing = true;
                        }
                    }
                }
                Mxp => {
                    if let Some(sess) = self.session_mut(sid) {
                        if let Err(e) = mxp::start(sess) {
                            tracing::warn!(error = %e, "mxp start failed");
                            sess.closing = true;
                        }
                    }
                }
                _ => {}
            },

            // DONT: one of our options went off (or was refused)
            (TelnetCommand::DONT, StateEvent::Disabled | StateEvent::Refused) => match opt {
                Mccp2 => self.stop_compression(sid, CompressVersion::V2),
                Mccp1 => self.stop_compression(sid, CompressVersion::V1),
                Gmcp => {
                    if let Some(sess) = self.session_mut(sid) {
                        sess.gmcp_on = false;
                    }
                }
                Mxp => {
                    if let Some(sess) = self.session_mut(sid) {
                        mxp::end(sess);
                    }
                }
                _ => {}
            },

            // WILL: a peer option came on
            (TelnetCommand::WILL, StateEvent::Enabled) => match opt {
                Naws => {
                    if let Some(sess) = self.session_mut(sid) {
                        sess.naws_on = true;
                    }
                }
                TerminalType => {
                    if let Some(sess) = self.session_mut(sid) {
                        sess.ttype_on = true;
                        let query = subnegotiate(TerminalType.to_byte(), &[TTYPE_SEND]);
                        let _ = sess.write_raw_now(&query);
                    }
                }
                _ => {}
            },

            // WONT: a peer option went off
            (TelnetCommand::WONT, StateEvent::Disabled | StateEvent::Refused) => match opt {
                Naws => {
                    if let Some(sess) = self.session_mut(sid) {
                        sess.naws_on = false;
                    }
                }
                TerminalType => {
                    if let Some(sess) = self.session_mut(sid) {
                        sess.ttype_on = false;
                    }
                }
                _ => {}
            },

            _ => {}
        }
    }

    fn on_subnegotiation(
        &mut self,
        hooks: &mut dyn GameHooks,
        sid: SessionId,
        option: u8,
        data: Vec<u8>,
    ) {
        match TelnetOption::from_byte(option) {
            Some(TelnetOption::Gmcp) => {
                let inbound = {
                    let Server {
                        sessions, settings, ..
                    } = self;
                    let Some(Some(sess)) = sessions.get_mut(sid) else {
                        return;
                    };
                    match gmcp::handle_subnegotiation(sess, settings, &data) {
                        Ok(inbound) => inbound,
                        Err(e) => {
                            tracing::warn!(error = %e, "gmcp subnegotiation failed");
                            sess.closing = true;
                            return;
                        }
                    }
                };
                if let gmcp::Inbound::Forward { package, payload } = inbound {
                    hooks.on_structured_message(self, sid, &package, &payload);
                }
            }
            Some(TelnetOption::Naws) => {
                if data.len() >= 4 {
                    if let Some(size) = WindowSize::parse(&data[..4]) {
                        if let Some(sess) = self.session_mut(sid) {
                            sess.window = size;
                            sess.naws_on = true;
                        }
                    }
                }
            }
            Some(TelnetOption::TerminalType) => {
                if data.first() == Some(&TTYPE_IS) {
                    if let Some(sess) = self.session_mut(sid) {
                        if sess.client_name.is_empty() {
                            sess.client_name =
                                String::from_utf8_lossy(&data[1..]).trim().to_string();
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn start_compression(&mut self, sid: SessionId, version: CompressVersion) {
        let Some(sess) = self.sessions.get_mut(sid).and_then(Option::as_mut) else {
            return;
        };

        if let Some(active) = &sess.compress {
            if active.version() == version {
                return;
            }
            // v2 supersedes v1; a v1 agreement never downgrades v2
            if version == CompressVersion::V1 {
                return;
            }
            if sess.flush_output().is_err() || sess.end_compression().is_err() {
                sess.closing = true;
                return;
            }
        }

        // Everything queued so far goes out in plaintext, then the
        // stream boundary, then compressed bytes only.
        if sess.flush_output().is_err() {
            sess.closing = true;
            return;
        }
        if sess
            .write_uncompressed_now(&version.start_marker())
            .is_err()
        {
            sess.closing = true;
            return;
        }
        sess.compress = Some(CompressStream::new(version));
        tracing::debug!(peer = %sess.peer_label(), %version, "compression started");
    }

    fn stop_compression(&mut self, sid: SessionId, version: CompressVersion) {
        let Some(sess) = self.sessions.get_mut(sid).and_then(Option::as_mut) else {
            return;
        };
        let active = sess.compress.as_ref().map(|c| c.version());
        if active != Some(version) {
            return;
        }
        if sess.flush_output().is_err() || sess.end_compression().is_err() {
            sess.closing = true;
        }
    }

    fn send_status_reply(&mut self, hooks: &mut dyn GameHooks, sid: SessionId) {
        let counts = hooks.status_counts();
        let reply = mssp::build_reply(&StatusReport {
            settings: &self.settings,
            counts,
            players: self.playing_count(),
            boot_epoch: self.boot_time.as_second(),
            port: self.port,
        });
        if let Some(sess) = self.session_mut(sid) {
            let _ = sess.write_raw_now(&reply);
        }
    }

    // --------------------------------------------------------------
    // Output phase
    // --------------------------------------------------------------

    fn process_output(
        &mut self,
        hooks: &mut dyn GameHooks,
        sid: SessionId,
        with_prompt: bool,
    ) -> MudResult<()> {
        if with_prompt && !self.shutdown {
            let wants_prompt = self.session(sid).is_some_and(|s| {
                s.state == ConnState::Playing && (s.fcommand || s.out_len() > 0)
            });
            if wants_prompt {
                let markup = match hooks.render_prompt(self, sid) {
                    Some(markup) => Some(markup),
                    None => {
                        let template = self
                            .session(sid)
                            .and_then(|s| s.custom_prompt.clone());
                        hooks.vitals(sid).map(|v| match template {
                            Some(t) => expand_prompt_template(&t, &v),
                            None => compact_prompt(&v),
                        })
                    }
                };
                if let Some(sess) = self.session_mut(sid) {
                    if sess.blank_line {
                        let _ = sess.append_out(b"\n\r");
                    }
                }
                if let Some(markup) = markup {
                    self.send_to_session(sid, &markup);
                }
                if let Some(sess) = self.session_mut(sid) {
                    if sess.go_ahead {
                        let _ = sess.append_out(&[IAC, TelnetCommand::GA.to_byte()]);
                    }
                }
            }
        }

        // Snoop-o-rama
        let (watcher, copy) = match self.session(sid) {
            Some(sess) => (sess.snoop_by, sess.peek_out()),
            None => return Ok(()),
        };
        if let Some(watcher) = watcher {
            if watcher != sid && !copy.is_empty() {
                self.write_to_buffer(watcher, b"% ");
                self.write_to_buffer(watcher, &copy);
            }
        }

        match self.session_mut(sid) {
            Some(sess) => sess.flush_output(),
            None => Ok(()),
        }
    }

    // --------------------------------------------------------------
    // Close / restart
    // --------------------------------------------------------------

    fn close_session(&mut self, hooks: &mut dyn GameHooks, sid: SessionId) {
        let (state, snooper) = match self.sessions.get_mut(sid).and_then(Option::as_mut) {
            Some(sess) => (sess.state, sess.snoop_by.take()),
            None => return,
        };

        if let Some(watcher) = snooper {
            if watcher != sid {
                self.send_to_session(watcher, "Your victim has left the game.\n\r");
            }
        }
        for other in self.sessions.iter_mut().flatten() {
            if other.snoop_by == Some(sid) {
                other.snoop_by = None;
            }
        }

        if state.in_game() {
            hooks.save_character(self, sid);
        } else {
            hooks.free_character(self, sid);
        }

        if let Some(mut sess) = self.sessions.get_mut(sid).and_then(Option::take) {
            let _ = sess.flush_output();
            let _ = sess.end_compression();
            if !sess.name.is_empty() {
                tracing::info!(name = %sess.name, "closing link");
            }
            // Drop closes the socket, exactly once
        }
    }

    /// Graceful hot restart: save everyone, write the handoff file, and
    /// exec a fresh copy of the binary. Only returns on failure.
    fn do_copyover(&mut self, hooks: &mut dyn GameHooks) -> MudResult<()> {
        tracing::info!("copyover requested, handing off sessions");

        for sid in 0..self.sessions.len() {
            let in_game = self
                .sessions
                .get(sid)
                .and_then(Option::as_ref)
                .is_some_and(|s| s.state.in_game() && !s.name.is_empty());
            if in_game {
                hooks.save_character(self, sid);
            }
        }

        let mut records: Vec<HandoffRecord> = Vec::new();
        for sess in self.sessions.iter_mut().flatten() {
            let _ = sess.flush_output();
            let _ = sess.end_compression();

            if sess.state.in_game() {
                if let Some(record) =
                    copyover::record_for(sess.raw_fd(), &sess.name, &sess.host)
                {
                    let _ = sess.write_uncompressed_now(RESTART_BANNER);
                    copyover::clear_cloexec(record.fd);
                    records.push(record);
                    continue;
                }
            }
            // Anyone mid-login is dropped with an apology
            let _ = sess.write_uncompressed_now(
                b"\n\rSorry, the server is restarting. Come back in a moment.\n\r",
            );
        }

        copyover::write_handoff(&self.handoff_path(), &records)
            .map_err(|e| MudError::Restart(format!("handoff write: {}", e)))?;

        // exec only returns on failure
        Err(copyover::exec_restart(self.port, self.listener_fd()))
    }

    /// Re-attach the sessions a previous process left in the handoff
    /// file. Runs once, before the first pulse of the new process.
    pub fn recover_sessions(&mut self, hooks: &mut dyn GameHooks) {
        let path = self.handoff_path();
        let records = match copyover::read_handoff(&path) {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "copyover recovery: no handoff file");
                return;
            }
        };
        let _ = std::fs::remove_file(&path);
        copyover::clear_sentinel(&self.sentinel_path());

        for record in records {
            let stream = match copyover::rebind_fd(record.fd) {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(fd = record.fd, error = %e, "failed to re-attach descriptor");
                    continue;
                }
            };

            let mut sess = Session::new(stream, record.host.clone());
            sess.state = ConnState::Playing;
            sess.name = record.name.clone();
            let _ = sess.write_uncompressed_now(b"\n\rRestoring from hot reboot...\n\r");
            self.resync_offers(&mut sess);
            let sid = self.store_session(sess);

            if hooks.reload_character(self, sid, &record.name) {
                tracing::info!(name = %record.name, "session restored");
            } else {
                self.send_to_session(sid, "Sorry, failed to restore your character.\n\r");
                if let Some(sess) = self.session_mut(sid) {
                    sess.closing = true;
                }
                self.close_session(hooks, sid);
            }
        }
    }

    fn refresh_crash_snapshot(&self) {
        let records = self
            .sessions
            .iter()
            .flatten()
            .filter(|s| s.state.in_game() && !s.name.is_empty())
            .map(|s| HandoffRecord {
                fd: s.raw_fd(),
                name: s.name.clone(),
                host: s.host.clone(),
            })
            .collect();

        copyover::update_snapshot(CrashSnapshot {
            handoff_path: self.handoff_path(),
            sentinel_path: self.sentinel_path(),
            port: self.port,
            listener_fd: self.listener_fd(),
            records,
        });
    }
}
