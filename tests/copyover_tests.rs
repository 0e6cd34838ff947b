//! Hot-restart recovery: re-attaching live descriptors from a handoff
//! file, the way a freshly exec'd process does.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, IntoRawFd};
use std::time::Duration;

use duskmud::config::{ConfigRegistry, Settings};
use duskmud::copyover::{self, HandoffRecord};
use duskmud::game::DemoGame;
use duskmud::server::Server;
use duskmud::session::ConnState;

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn drain(client: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match client.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(_) => break,
        }
    }
    out
}

#[test]
fn recovery_reattaches_sessions_and_resyncs_protocols() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        data_dir: dir.path().to_string_lossy().into_owned(),
        ..Settings::default()
    };

    // Three "surviving" connections, as raw fds the way exec leaves them
    let survivor_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = survivor_listener.local_addr().unwrap();

    let mut clients = Vec::new();
    let mut records = Vec::new();
    for name in ["Taran", "Mira", "Okk"] {
        let client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(300)))
            .unwrap();
        let (server_side, _) = survivor_listener.accept().unwrap();
        records.push(HandoffRecord {
            fd: server_side.into_raw_fd(),
            name: name.to_string(),
            host: "127.0.0.1".to_string(),
        });
        clients.push(client);
    }

    let handoff = dir.path().join("copyover.dat");
    copyover::write_handoff(&handoff, &records).unwrap();

    // The "new process": a fresh server that reads the handoff file
    let mut server = Server::new(0, settings, ConfigRegistry::new()).unwrap();
    let mut game = DemoGame::new();
    server.recover_sessions(&mut game);

    // All three came back in the playing state with their names
    let mut restored = 0;
    for sid in 0..8 {
        if let Some(sess) = server.session(sid) {
            assert_eq!(sess.state, ConnState::Playing);
            assert!(["Taran", "Mira", "Okk"].contains(&sess.name.as_str()));
            restored += 1;
        }
    }
    assert_eq!(restored, 3);
    assert_eq!(server.playing_count(), 3);

    // The handoff file is consumed
    assert!(!handoff.exists());

    // Run a pulse so queued offers drain to the wire
    server.pulse_once(&mut game).unwrap();

    for client in &mut clients {
        let bytes = drain(client);
        assert!(contains(&bytes, b"Restoring from hot reboot"));
        // Reset pair precedes the fresh offer for compression v2
        let wont = bytes
            .windows(3)
            .position(|w| w == [255, 252, 86])
            .expect("WONT MCCP2 reset");
        let will = bytes
            .windows(3)
            .position(|w| w == [255, 251, 86])
            .expect("WILL MCCP2 offer");
        assert!(wont < will, "reset must precede the fresh offer");
        // Window-size reset pair as well (DONT then DO)
        let dont = bytes
            .windows(3)
            .position(|w| w == [255, 254, 31])
            .expect("DONT NAWS reset");
        let do_ = bytes
            .windows(3)
            .position(|w| w == [255, 253, 31])
            .expect("DO NAWS offer");
        assert!(dont < do_);
    }

    // The next line each survivor types goes to the interpreter
    for (i, client) in clients.iter_mut().enumerate() {
        client.write_all(b"score\r\n").unwrap();
        server.pulse_once(&mut game).unwrap();
        server.pulse_once(&mut game).unwrap();
        let bytes = drain(client);
        assert!(
            contains(&bytes, b"level 1"),
            "survivor {} should be back at the interpreter",
            i
        );
    }
}

#[test]
fn failed_descriptor_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        data_dir: dir.path().to_string_lossy().into_owned(),
        ..Settings::default()
    };

    // One real survivor and one dead fd
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    let (server_side, _) = listener.accept().unwrap();

    let records = vec![
        HandoffRecord {
            fd: 10_000, // nothing there
            name: "Ghost".to_string(),
            host: "203.0.113.1".to_string(),
        },
        HandoffRecord {
            fd: server_side.as_raw_fd(),
            name: "Taran".to_string(),
            host: "127.0.0.1".to_string(),
        },
    ];
    std::mem::forget(server_side); // ownership moves to the recovery path

    let handoff = dir.path().join("copyover.dat");
    copyover::write_handoff(&handoff, &records).unwrap();

    let mut server = Server::new(0, settings, ConfigRegistry::new()).unwrap();
    let mut game = DemoGame::new();
    server.recover_sessions(&mut game);

    let names: Vec<String> = (0..4)
        .filter_map(|sid| server.session(sid).map(|s| s.name.clone()))
        .collect();
    assert_eq!(names, vec!["Taran".to_string()]);
}
