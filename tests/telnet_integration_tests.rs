//! End-to-end exercises over real sockets: a server instance pulsed by
//! hand, talking to a plain TcpStream standing in for a MUD client.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use duskmud::config::{ConfigRegistry, Settings};
use duskmud::game::DemoGame;
use duskmud::server::Server;
use duskmud::session::ConnState;

const IAC: u8 = 255;
const GA: u8 = 249;
const SB: u8 = 250;
const SE: u8 = 240;
const WILL: u8 = 251;
const WONT: u8 = 252;
const DO: u8 = 253;
const DONT: u8 = 254;
const SGA: u8 = 3;

fn start_server() -> (Server, DemoGame, TcpStream) {
    let server = Server::new(0, Settings::default(), ConfigRegistry::new())
        .expect("bind ephemeral port");
    let game = DemoGame::new();
    let addr = server.local_addr().expect("local addr");
    let client = TcpStream::connect(("127.0.0.1", addr.port())).expect("connect");
    client
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    (server, game, client)
}

fn pulse(server: &mut Server, game: &mut DemoGame, times: usize) {
    for _ in 0..times {
        server.pulse_once(game).expect("pulse");
    }
}

/// Read whatever the client can see within the timeout window.
fn drain(client: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    let deadline = Instant::now() + Duration::from_millis(400);
    while Instant::now() < deadline {
        match client.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(_) => break,
        }
    }
    out
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[test]
fn connection_receives_protocol_offers_in_order() {
    let (mut server, mut game, mut client) = start_server();
    pulse(&mut server, &mut game, 1);

    let bytes = drain(&mut client);
    let offers: [&[u8]; 6] = [
        &[IAC, WILL, 86],
        &[IAC, WILL, 85],
        &[IAC, WILL, 70],
        &[IAC, WILL, 201],
        &[IAC, WILL, 91],
        &[IAC, DO, 31],
    ];
    let mut last = 0;
    for offer in offers {
        let at = bytes
            .windows(offer.len())
            .position(|w| w == offer)
            .unwrap_or_else(|| panic!("offer {:?} missing", offer));
        assert!(at >= last, "offers out of order");
        last = at;
    }
    // And the greeting follows
    assert!(contains(&bytes, b"By what name"));
}

#[test]
fn negotiation_handshake_state() {
    let (mut server, mut game, mut client) = start_server();
    pulse(&mut server, &mut game, 1);
    drain(&mut client);

    // Accept v2, refuse v1, accept the data channel, report a window
    client
        .write_all(&[
            IAC, DO, 86, IAC, DONT, 85, IAC, DO, 201, IAC, WILL, 31, IAC, SB, 31, 0, 120, 0,
            40, IAC, SE,
        ])
        .unwrap();
    pulse(&mut server, &mut game, 2);

    let sess = server.session(0).expect("session");
    assert!(sess.compress.is_some(), "compression v2 should be active");
    assert!(sess.gmcp_on, "structured messaging should be active");
    assert!(sess.naws_on);
    assert_eq!(sess.window.width, 120);
    assert_eq!(sess.window.height, 40);
    assert!(!sess.mxp_on, "rich markup was never accepted");

    // The v2 stream boundary went out uncompressed
    let bytes = drain(&mut client);
    assert!(contains(&bytes, &[IAC, SB, 86, IAC, SE]));
}

#[test]
fn input_overflow_closes_with_complaint() {
    let (mut server, mut game, mut client) = start_server();
    pulse(&mut server, &mut game, 1);
    drain(&mut client);

    // 5 KB of letters, never a newline
    let flood = vec![b'a'; 5 * 1024];
    client.write_all(&flood).unwrap();
    pulse(&mut server, &mut game, 4);

    let bytes = drain(&mut client);
    assert!(contains(&bytes, b"*** PUT A LID ON IT!!! ***"));
    assert!(server.session(0).is_none(), "session should be reaped");

    // And the flood never reached the interpreter as a line
    // (the next connection starts clean)
    let addr = server.local_addr().unwrap();
    let mut second = TcpStream::connect(("127.0.0.1", addr.port())).unwrap();
    second
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    pulse(&mut server, &mut game, 1);
    let fresh = drain(&mut second);
    assert!(contains(&fresh, b"By what name"));
}

#[test]
fn line_with_embedded_negotiation() {
    let (mut server, mut game, mut client) = start_server();
    pulse(&mut server, &mut game, 1);
    drain(&mut client);

    // "Hi" with a WILL NAWS spliced in before the newline
    client
        .write_all(&[b'H', b'i', IAC, WILL, 31, b'\n'])
        .unwrap();
    pulse(&mut server, &mut game, 2);

    let sess = server.session(0).expect("session");
    assert!(sess.naws_on, "window-size option should be client-willing");
    // "Hi" was delivered as a (rejected) name to the login flow
    let bytes = drain(&mut client);
    assert!(contains(&bytes, b"Illegal name") || contains(&bytes, b"Did I get that right"));
}

#[test]
fn login_flow_reaches_playing() {
    let (mut server, mut game, mut client) = start_server();
    pulse(&mut server, &mut game, 1);
    drain(&mut client);

    client.write_all(b"Taran\r\n").unwrap();
    pulse(&mut server, &mut game, 2);
    let bytes = drain(&mut client);
    assert!(contains(&bytes, b"Did I get that right, Taran"));

    client.write_all(b"y\r\n").unwrap();
    pulse(&mut server, &mut game, 2);
    let bytes = drain(&mut client);
    assert!(contains(&bytes, b"Welcome to Duskhaven"));
    assert_eq!(server.session(0).unwrap().state, ConnState::Motd);

    client.write_all(b"\r\n").unwrap();
    pulse(&mut server, &mut game, 2);
    let bytes = drain(&mut client);
    assert!(contains(&bytes, b"You step into the plaza"));
    assert_eq!(server.session(0).unwrap().state, ConnState::Playing);

    // A playing command gets a response and exactly one prompt
    client.write_all(b"look\r\n").unwrap();
    pulse(&mut server, &mut game, 2);
    let bytes = drain(&mut client);
    assert!(contains(&bytes, b"Shattered Plaza"));
    let prompts = bytes
        .windows(b"/100".len())
        .filter(|w| *w == b"/100")
        .count();
    assert!(prompts >= 3, "compact prompt carries three pools");
}

#[test]
fn go_ahead_follows_suppress_negotiation() {
    let (mut server, mut game, mut client) = start_server();
    pulse(&mut server, &mut game, 1);
    drain(&mut client);

    for line in [&b"Taran\r\n"[..], b"y\r\n", b"\r\n"] {
        client.write_all(line).unwrap();
        pulse(&mut server, &mut game, 2);
        drain(&mut client);
    }
    assert!(!server.session(0).unwrap().go_ahead);

    // The peer asks for go-aheads by keeping SGA off
    client.write_all(&[IAC, DONT, SGA]).unwrap();
    pulse(&mut server, &mut game, 2);
    assert!(server.session(0).unwrap().go_ahead);
    drain(&mut client);

    client.write_all(b"look\r\n").unwrap();
    pulse(&mut server, &mut game, 2);
    let bytes = drain(&mut client);
    assert!(
        contains(&bytes, &[IAC, GA]),
        "prompt should be followed by IAC GA"
    );

    // Suppressing go-ahead turns it back off
    client.write_all(&[IAC, DO, SGA]).unwrap();
    pulse(&mut server, &mut game, 2);
    assert!(!server.session(0).unwrap().go_ahead);
}

#[test]
fn compressed_output_preserves_text_before_sidechannel() {
    let (mut server, mut game, mut client) = start_server();
    pulse(&mut server, &mut game, 1);
    drain(&mut client);

    // Negotiate compression v2 plus the data channel, then log in.
    // Everything after the stream marker arrives compressed, so the
    // whole downstream is accumulated and inflated as one stream.
    let mut wire_all: Vec<u8> = Vec::new();
    client.write_all(&[IAC, DO, 86, IAC, DO, 201]).unwrap();
    pulse(&mut server, &mut game, 2);
    wire_all.extend(drain(&mut client));

    for line in [&b"Taran\r\n"[..], b"y\r\n", b"\r\n"] {
        client.write_all(line).unwrap();
        pulse(&mut server, &mut game, 2);
        wire_all.extend(drain(&mut client));
    }
    assert_eq!(server.session(0).unwrap().state, ConnState::Playing);

    // One more command: text plus a Room.Info package on its heels
    client.write_all(b"look\r\n").unwrap();
    pulse(&mut server, &mut game, 2);
    wire_all.extend(drain(&mut client));

    let marker = [IAC, SB, 86, IAC, SE];
    let marker_at = wire_all
        .windows(marker.len())
        .position(|w| w == marker)
        .expect("uncompressed stream marker present");
    let stream = &wire_all[marker_at + marker.len()..];

    let mut decoder = flate2::read::ZlibDecoder::new(stream);
    let mut plain = Vec::new();
    // The stream is still open; read what the sync flushes made visible
    let mut buf = [0u8; 4096];
    loop {
        match decoder.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => plain.extend_from_slice(&buf[..n]),
            Err(_) => break,
        }
    }

    let text_at = plain
        .windows(b"Shattered Plaza".len())
        .rposition(|w| w == b"Shattered Plaza")
        .expect("room text present");
    let room_at = plain
        .windows(b"Room.Info".len())
        .rposition(|w| w == b"Room.Info")
        .expect("room package present");
    assert!(
        text_at < room_at,
        "in-band text must hit the wire before the structured message"
    );
}

#[test]
fn refused_unknown_option_gets_counterpart() {
    let (mut server, mut game, mut client) = start_server();
    pulse(&mut server, &mut game, 1);
    drain(&mut client);

    // An option nobody handles: 42
    client.write_all(&[IAC, WILL, 42, IAC, DO, 43]).unwrap();
    pulse(&mut server, &mut game, 2);

    let bytes = drain(&mut client);
    assert!(contains(&bytes, &[IAC, DONT, 42]));
    assert!(contains(&bytes, &[IAC, WONT, 43]));
}

#[test]
fn quit_reaps_session() {
    let (mut server, mut game, mut client) = start_server();
    pulse(&mut server, &mut game, 1);
    drain(&mut client);

    for line in [&b"Mira\r\n"[..], b"y\r\n", b"\r\n"] {
        client.write_all(line).unwrap();
        pulse(&mut server, &mut game, 2);
        drain(&mut client);
    }
    client.write_all(b"quit\r\n").unwrap();
    pulse(&mut server, &mut game, 3);

    let bytes = drain(&mut client);
    assert!(contains(&bytes, b"Come back soon"));
    assert!(server.session(0).is_none());
    assert_eq!(server.playing_count(), 0);
}
