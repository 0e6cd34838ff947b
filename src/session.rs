use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Mutex;
use std::sync::atomic::AtomicU8;

use telnet_negotiation::{OptionTable, TelnetParser, WindowSize};

use crate::board::NoteDraft;
use crate::editor::EditorState;
use crate::errors::{MudError, MudResult, mask_host};
use crate::mccp::CompressStream;
use crate::pager::PagerState;

/// Stable index of a session in the server's owning container.
/// Cross-session references (snooper, switch targets) are held as
/// non-owning ids and validated at dereference.
pub type SessionId = usize;

/// Receive buffer bound, with the headroom the reader keeps free.
pub const INPUT_BUF_SIZE: usize = 4096;
pub const INPUT_HEADROOM: usize = 10;

/// One command line. Content is capped two bytes short of the slot.
pub const MAX_INPUT_LENGTH: usize = 256;
pub const MAX_LINE_CONTENT: usize = MAX_INPUT_LENGTH - 2;

/// Output buffer starts small, doubles on demand, and is never allowed
/// past the ceiling; crossing it closes the session.
pub const OUTPUT_INITIAL: usize = 2048;
pub const OUTPUT_CEILING: usize = 262144;

/// Max bytes handed to one underlying socket write.
const WRITE_BLOCK: usize = 4096;

/// Consecutive `!`-repeats before the session is treated as hostile.
pub const MAX_REPEAT: u32 = 20;

/// The user-facing overflow complaint, identical for input and output
/// floods.
pub const LID_MESSAGE: &[u8] = b"\n\r*** PUT A LID ON IT!!! ***\n\r";

/// Connection state: where a finished input line gets routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting on reverse DNS shortly after accept
    ResolvingName,
    GetName,
    GetPassword,
    ConfirmNew,
    Motd,
    Playing,
    NoteTo,
    NoteSubject,
    NoteExpire,
    NoteText,
    NoteFinish,
    Editing,
    Pager,
    /// Terminal state; the loop reaps the session
    Closed,
}

impl ConnState {
    pub fn is_note(self) -> bool {
        matches!(
            self,
            ConnState::NoteTo
                | ConnState::NoteSubject
                | ConnState::NoteExpire
                | ConnState::NoteText
                | ConnState::NoteFinish
        )
    }

    /// States where a character is attached and in the world.
    pub fn in_game(self) -> bool {
        self == ConnState::Playing || self == ConnState::Editing || self.is_note()
    }
}

/// Reverse-lookup result slot shared with the DNS worker thread. The
/// worker writes `host` then bumps `status`; the loop only reads the
/// host after seeing DONE.
#[derive(Debug)]
pub struct DnsSlot {
    pub status: AtomicU8,
    pub host: Mutex<String>,
}

pub const DNS_PENDING: u8 = 0;
pub const DNS_DONE: u8 = 1;

/// Result of trying to pull one line out of the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// No complete line yet; partial data stays buffered
    Pending,
    /// `incomm` holds a line; `too_long` marks a truncated one
    Ready { too_long: bool },
    /// Repeat spam crossed the limit; treat as input overflow
    Spam,
}

/// One TCP connection and everything the core tracks about it.
pub struct Session {
    stream: TcpStream,
    /// Peer address: dotted quad at accept, possibly a name once the
    /// resolver worker finishes.
    pub host: String,
    pub dns: Option<std::sync::Arc<DnsSlot>>,
    /// Pulses spent waiting in ResolvingName
    pub dns_pulses: u32,

    pub state: ConnState,
    /// State to restore when the pager closes
    pub prev_state: ConnState,

    /// Telnet stream parser (holds partial sequences between reads)
    pub parser: TelnetParser,
    /// Per-option negotiation state, both sides
    pub opts: OptionTable,

    /// Cooked in-band bytes waiting for line assembly
    inbuf: Vec<u8>,
    /// The assembled line awaiting dispatch (empty = none)
    pub incomm: String,
    /// Last non-`!` line, for `!` substitution
    inlast: String,
    repeat: u32,
    /// A command was consumed this pulse
    pub fcommand: bool,

    /// Rendered bytes waiting to be flushed
    outbuf: Vec<u8>,
    /// Logical capacity of `outbuf`; doubles up to the ceiling
    outsize: usize,
    /// Bytes past the compressor (or raw), awaiting the socket
    wire_pending: Vec<u8>,

    pub compress: Option<CompressStream>,
    pub mxp_on: bool,
    pub gmcp_on: bool,
    pub gmcp_packages: u32,
    pub media_default_sent: bool,
    /// Malformed-subnegotiation complaints are logged once per session
    pub subneg_error_logged: bool,
    pub client_name: String,
    pub ttype_on: bool,
    pub naws_on: bool,
    pub window: WindowSize,

    pub editor: Option<EditorState>,
    pub pager: Option<PagerState>,
    pub note: Option<NoteDraft>,

    /// Session mirroring our output, if any
    pub snoop_by: Option<SessionId>,

    pub idle_pulses: i64,
    pub idle_warned: bool,

    /// Player-facing render flags
    pub ansi: bool,
    pub screen_reader: bool,
    pub go_ahead: bool,
    pub blank_line: bool,
    pub custom_prompt: Option<String>,

    /// Player name once known (used by the handoff file)
    pub name: String,
    /// Opaque world binding for the character this session controls
    pub character: Option<u64>,
    /// Opaque binding for switch: the session's own character while it
    /// controls another
    pub original: Option<u64>,

    pub color_seed: u32,
    /// Marked for reaping at the end of the pulse
    pub closing: bool,
}

impl Session {
    pub fn new(stream: TcpStream, host: String) -> Self {
        Self {
            stream,
            host,
            dns: None,
            dns_pulses: 0,
            state: ConnState::ResolvingName,
            prev_state: ConnState::Playing,
            parser: TelnetParser::new(),
            opts: OptionTable::new(),
            inbuf: Vec::with_capacity(INPUT_BUF_SIZE),
            incomm: String::new(),
            inlast: String::new(),
            repeat: 0,
            fcommand: false,
            outbuf: Vec::with_capacity(OUTPUT_INITIAL),
            outsize: OUTPUT_INITIAL,
            wire_pending: Vec::new(),
            compress: None,
            mxp_on: false,
            gmcp_on: false,
            gmcp_packages: 0,
            media_default_sent: false,
            subneg_error_logged: false,
            client_name: String::new(),
            ttype_on: false,
            naws_on: false,
            window: WindowSize::default(),
            editor: None,
            pager: None,
            note: None,
            snoop_by: None,
            idle_pulses: 0,
            idle_warned: false,
            ansi: true,
            screen_reader: false,
            go_ahead: false,
            blank_line: false,
            custom_prompt: None,
            name: String::new(),
            character: None,
            original: None,
            color_seed: 0x2545f491,
            closing: false,
        }
    }

    /// Masked peer address for log lines.
    pub fn peer_label(&self) -> String {
        mask_host(&self.host)
    }

    /// The raw fd, for the handoff file.
    pub fn raw_fd(&self) -> i32 {
        use std::os::unix::io::AsRawFd;
        self.stream.as_raw_fd()
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    // ------------------------------------------------------------
    // Receive side
    // ------------------------------------------------------------

    /// Pull whatever the socket has, bounded by the receive buffer's
    /// free space. Returns the raw bytes for the telnet parser.
    ///
    /// Errors: `InputOverflow` when the buffer is full without a
    /// newline, `PeerClosed` on EOF, `Io` on anything else. A would-
    /// block read returns an empty chunk.
    pub fn read_raw(&mut self) -> MudResult<Vec<u8>> {
        // Hold horses if a command is already waiting
        if !self.incomm.is_empty() {
            return Ok(Vec::new());
        }

        if self.inbuf.len() >= INPUT_BUF_SIZE - INPUT_HEADROOM {
            return Err(MudError::InputOverflow);
        }

        let mut chunk = Vec::new();
        let mut scratch = [0u8; INPUT_BUF_SIZE];

        loop {
            let free = INPUT_BUF_SIZE - INPUT_HEADROOM - self.inbuf.len() - chunk.len();
            if free == 0 {
                break;
            }
            match self.stream.read(&mut scratch[..free]) {
                Ok(0) => {
                    if chunk.is_empty() {
                        return Err(MudError::PeerClosed);
                    }
                    break;
                }
                Ok(n) => {
                    chunk.extend_from_slice(&scratch[..n]);
                    if matches!(chunk.last(), Some(b'\n') | Some(b'\r')) {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(chunk)
    }

    /// Append parsed in-band bytes to the receive buffer.
    pub fn push_inband(&mut self, data: &[u8]) {
        self.inbuf.extend_from_slice(data);
    }

    /// True when the receive buffer filled up without producing a line.
    pub fn input_flooded(&self) -> bool {
        self.inbuf.len() >= INPUT_BUF_SIZE - INPUT_HEADROOM
            && !self.inbuf.iter().any(|&b| b == b'\n' || b == b'\r')
    }

    /// Transfer one line from the receive buffer to the line slot.
    ///
    /// Handles backspace, the printable filter, the length cap, the
    /// `!` repeat substitution and spam escalation, then compacts the
    /// buffer past the consumed newline(s).
    pub fn assemble_line(&mut self) -> LineOutcome {
        // Hold horses if a command is already waiting
        if !self.incomm.is_empty() {
            return LineOutcome::Pending;
        }

        let Some(_) = self
            .inbuf
            .iter()
            .position(|&b| b == b'\n' || b == b'\r')
        else {
            return LineOutcome::Pending;
        };

        let mut line: Vec<u8> = Vec::with_capacity(64);
        let mut too_long = false;
        let mut i = 0;

        while i < self.inbuf.len() {
            let b = self.inbuf[i];
            if b == b'\n' || b == b'\r' {
                break;
            }
            if line.len() >= MAX_LINE_CONTENT {
                too_long = true;
                // discard the rest of the physical line
                while i < self.inbuf.len()
                    && self.inbuf[i] != b'\n'
                    && self.inbuf[i] != b'\r'
                {
                    i += 1;
                }
                break;
            }
            if b == 0x08 {
                line.pop();
            } else if b.is_ascii_graphic() || b == b' ' {
                line.push(b);
            }
            // anything else is dropped
            i += 1;
        }

        // Consume the newline run that terminated the line
        while i < self.inbuf.len() && (self.inbuf[i] == b'\n' || self.inbuf[i] == b'\r') {
            i += 1;
        }
        self.inbuf.drain(..i);

        let mut text = String::from_utf8_lossy(&line).into_owned();
        if text.is_empty() {
            text = " ".to_string();
        }

        // Deal with bozos holding down the repeat key
        if text.len() > 1 || text == "!" {
            if text != "!" && text != self.inlast {
                self.repeat = 0;
            } else {
                self.repeat += 1;
                if self.repeat >= MAX_REPEAT {
                    self.repeat = 0;
                    return LineOutcome::Spam;
                }
            }
        }

        // '!' substitution: repeat the last non-'!' line
        if text == "!" {
            self.incomm = self.inlast.clone();
            if self.incomm.is_empty() {
                self.incomm = " ".to_string();
            }
        } else {
            self.inlast = text.clone();
            self.incomm = text;
        }

        LineOutcome::Ready { too_long }
    }

    // ------------------------------------------------------------
    // Send side
    // ------------------------------------------------------------

    /// Append bytes to the output buffer, doubling capacity on demand.
    /// Crossing the ceiling is an `OutputOverflow` error and the caller
    /// closes the session.
    pub fn append_out(&mut self, bytes: &[u8]) -> MudResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }

        // An initial linebreak separates fresh output from whatever
        // half-typed input is sitting on the player's screen.
        if self.outbuf.is_empty() && self.wire_pending.is_empty() && !self.fcommand {
            self.outbuf.extend_from_slice(b"\n\r");
        }

        while self.outbuf.len() + bytes.len() >= self.outsize {
            if self.outsize >= OUTPUT_CEILING {
                return Err(MudError::OutputOverflow);
            }
            self.outsize *= 2;
        }

        self.outbuf.extend_from_slice(bytes);
        Ok(())
    }

    pub fn has_buffered_output(&self) -> bool {
        !self.outbuf.is_empty() || !self.wire_pending.is_empty()
    }

    pub fn out_len(&self) -> usize {
        self.outbuf.len()
    }

    /// Copy of the unflushed output, for snoop fan-out.
    pub fn peek_out(&self) -> Vec<u8> {
        self.outbuf.clone()
    }

    /// Drop everything buffered (used when reaping an errored socket).
    pub fn clear_output(&mut self) {
        self.outbuf.clear();
        self.wire_pending.clear();
    }

    /// Push buffered output through the compressor (when active) and on
    /// to the socket. Would-block leaves the remainder staged for the
    /// next pulse; nothing is dropped.
    pub fn flush_output(&mut self) -> MudResult<()> {
        if !self.outbuf.is_empty() {
            let chunk = std::mem::take(&mut self.outbuf);
            match &mut self.compress {
                Some(cs) => cs.write(&chunk)?,
                None => self.wire_pending.extend_from_slice(&chunk),
            }
        }
        if let Some(cs) = &mut self.compress {
            let ready = cs.take_pending()?;
            self.wire_pending.extend(ready);
        }
        self.write_wire()
    }

    /// Send bytes that are already wire-format (negotiations, framed
    /// subnegotiations). They pass through the compressor when one is
    /// active so stream order is preserved.
    pub fn write_raw_now(&mut self, bytes: &[u8]) -> MudResult<()> {
        match &mut self.compress {
            Some(cs) => {
                cs.write(bytes)?;
                let ready = cs.take_pending()?;
                self.wire_pending.extend(ready);
            }
            None => self.wire_pending.extend_from_slice(bytes),
        }
        self.write_wire()
    }

    /// Bypass everything, including the compressor. Only used for the
    /// compression start markers, which must go out uncompressed.
    pub fn write_uncompressed_now(&mut self, bytes: &[u8]) -> MudResult<()> {
        self.wire_pending.extend_from_slice(bytes);
        self.write_wire()
    }

    fn write_wire(&mut self) -> MudResult<()> {
        while !self.wire_pending.is_empty() {
            let n = self.wire_pending.len().min(WRITE_BLOCK);
            match self.stream.write(&self.wire_pending[..n]) {
                Ok(0) => return Err(MudError::PeerClosed),
                Ok(written) => {
                    self.wire_pending.drain(..written);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Finalize and free the compression stream, writing the trailer.
    /// Safe to call on sessions that never compressed.
    pub fn end_compression(&mut self) -> MudResult<()> {
        if let Some(cs) = self.compress.take() {
            let tail = cs.finish()?;
            self.wire_pending.extend(tail);
            self.write_wire()?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    /// A session over a real loopback socket, plus the client end.
    pub fn session_pair() -> (Session, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server_side, _) = listener.accept().unwrap();
        server_side.set_nonblocking(true).unwrap();
        let session = Session::new(server_side, "127.0.0.1".to_string());
        (session, client)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::session_pair;
    use super::*;
    use std::io::Read as _;

    fn feed(session: &mut Session, bytes: &[u8]) {
        session.push_inband(bytes);
    }

    #[test]
    fn simple_line() {
        let (mut s, _client) = session_pair();
        feed(&mut s, b"look\n");
        assert_eq!(s.assemble_line(), LineOutcome::Ready { too_long: false });
        assert_eq!(s.incomm, "look");
    }

    #[test]
    fn partial_line_waits() {
        let (mut s, _client) = session_pair();
        feed(&mut s, b"loo");
        assert_eq!(s.assemble_line(), LineOutcome::Pending);
        feed(&mut s, b"k\r\n");
        assert_eq!(s.assemble_line(), LineOutcome::Ready { too_long: false });
        assert_eq!(s.incomm, "look");
    }

    #[test]
    fn line_slot_holds_until_consumed() {
        let (mut s, _client) = session_pair();
        feed(&mut s, b"first\nsecond\n");
        assert!(matches!(s.assemble_line(), LineOutcome::Ready { .. }));
        assert_eq!(s.incomm, "first");
        // second line waits until the slot is cleared
        assert_eq!(s.assemble_line(), LineOutcome::Pending);
        s.incomm.clear();
        assert!(matches!(s.assemble_line(), LineOutcome::Ready { .. }));
        assert_eq!(s.incomm, "second");
    }

    #[test]
    fn backspace_edits_line() {
        let (mut s, _client) = session_pair();
        feed(&mut s, b"lokk\x08\x08ok\n");
        s.assemble_line();
        assert_eq!(s.incomm, "look");
    }

    #[test]
    fn empty_line_becomes_space() {
        let (mut s, _client) = session_pair();
        feed(&mut s, b"\n");
        assert!(matches!(s.assemble_line(), LineOutcome::Ready { .. }));
        assert_eq!(s.incomm, " ");
    }

    #[test]
    fn long_line_truncated() {
        let (mut s, _client) = session_pair();
        let mut input = vec![b'a'; 400];
        input.push(b'\n');
        feed(&mut s, &input);
        assert_eq!(s.assemble_line(), LineOutcome::Ready { too_long: true });
        assert_eq!(s.incomm.len(), MAX_LINE_CONTENT);
        // rest of the physical line was discarded
        s.incomm.clear();
        feed(&mut s, b"next\n");
        s.assemble_line();
        assert_eq!(s.incomm, "next");
    }

    #[test]
    fn bang_repeats_last_line() {
        let (mut s, _client) = session_pair();
        feed(&mut s, b"kill rat\n");
        s.assemble_line();
        assert_eq!(s.incomm, "kill rat");
        s.incomm.clear();

        feed(&mut s, b"!\n");
        s.assemble_line();
        assert_eq!(s.incomm, "kill rat");
    }

    #[test]
    fn bang_after_bang_repeats_same_line() {
        let (mut s, _client) = session_pair();
        feed(&mut s, b"say hi\n!\n!\n");
        s.assemble_line();
        assert_eq!(s.incomm, "say hi");
        s.incomm.clear();
        s.assemble_line();
        assert_eq!(s.incomm, "say hi");
        s.incomm.clear();
        // repeat buffer still holds the previous non-'!' line
        s.assemble_line();
        assert_eq!(s.incomm, "say hi");
    }

    #[test]
    fn repeat_spam_escalates() {
        let (mut s, _client) = session_pair();
        feed(&mut s, b"north\n");
        s.assemble_line();
        s.incomm.clear();

        let mut outcome = LineOutcome::Pending;
        for _ in 0..MAX_REPEAT {
            feed(&mut s, b"!\n");
            outcome = s.assemble_line();
            if outcome == LineOutcome::Spam {
                break;
            }
            s.incomm.clear();
        }
        assert_eq!(outcome, LineOutcome::Spam);
    }

    #[test]
    fn distinct_lines_reset_repeat_counter() {
        let (mut s, _client) = session_pair();
        for i in 0..(MAX_REPEAT * 2) {
            feed(&mut s, format!("say {}\n", i).as_bytes());
            assert!(matches!(s.assemble_line(), LineOutcome::Ready { .. }));
            s.incomm.clear();
        }
    }

    #[test]
    fn output_buffer_doubles_to_ceiling() {
        let (mut s, _client) = session_pair();
        s.fcommand = true; // suppress the initial linebreak

        // zero-length append at any fill level is a no-op
        assert!(s.append_out(b"").is_ok());

        let chunk = vec![b'x'; 8192];
        let mut total = 0;
        loop {
            match s.append_out(&chunk) {
                Ok(()) => total += chunk.len(),
                Err(MudError::OutputOverflow) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
            assert!(total < OUTPUT_CEILING);
        }
        // a zero-length append still succeeds at the ceiling
        assert!(s.append_out(b"").is_ok());
    }

    #[test]
    fn initial_linebreak_prefixed() {
        let (mut s, _client) = session_pair();
        s.append_out(b"hello").unwrap();
        assert_eq!(s.peek_out(), b"\n\rhello".to_vec());

        let (mut s, _client) = session_pair();
        s.fcommand = true;
        s.append_out(b"hello").unwrap();
        assert_eq!(s.peek_out(), b"hello".to_vec());
    }

    #[test]
    fn flush_writes_to_socket() {
        let (mut s, mut client) = session_pair();
        s.fcommand = true;
        s.append_out(b"ping").unwrap();
        s.flush_output().unwrap();

        let mut buf = [0u8; 16];
        client
            .set_read_timeout(Some(std::time::Duration::from_secs(2)))
            .unwrap();
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert!(!s.has_buffered_output());
    }

    #[test]
    fn compressed_flush_decodes() {
        use crate::mccp::{CompressStream, CompressVersion};
        let (mut s, mut client) = session_pair();
        s.fcommand = true;
        s.compress = Some(CompressStream::new(CompressVersion::V2));

        s.append_out(b"squeezed").unwrap();
        s.flush_output().unwrap();
        s.end_compression().unwrap();

        client
            .set_read_timeout(Some(std::time::Duration::from_millis(300)))
            .unwrap();
        let mut wire = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            match client.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => wire.extend_from_slice(&buf[..n]),
                Err(_) => break,
            }
        }

        let mut decoder = flate2::read::ZlibDecoder::new(&wire[..]);
        let mut plain = Vec::new();
        decoder.read_to_end(&mut plain).unwrap();
        assert_eq!(plain, b"squeezed");
    }

    #[test]
    fn input_flood_detected() {
        let (mut s, _client) = session_pair();
        feed(&mut s, &vec![b'a'; INPUT_BUF_SIZE - INPUT_HEADROOM]);
        assert!(s.input_flooded());
        assert!(matches!(s.read_raw(), Err(MudError::InputOverflow)));
    }

    #[test]
    fn state_classification() {
        assert!(ConnState::NoteText.is_note());
        assert!(!ConnState::Playing.is_note());
        assert!(ConnState::Playing.in_game());
        assert!(ConnState::Editing.in_game());
        assert!(ConnState::NoteFinish.in_game());
        assert!(!ConnState::GetName.in_game());
    }
}
