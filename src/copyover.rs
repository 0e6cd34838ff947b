//! Hot restart ("copyover"): carry live TCP sessions across an exec of
//! the server binary.
//!
//! Live descriptors are written to a handoff file as ASCII lines of
//! `<fd> <player_name> <peer_host>` with a `-1` terminator, the
//! close-on-exec flags are cleared, and the process re-execs itself
//! with `{port, "copyover", listener_fd}`. The new process re-binds
//! each descriptor to a fresh session, resyncs the client's protocol
//! state, and reloads the player.
//!
//! The same machinery backs crash recovery: a SIGSEGV handler writes
//! the handoff file from a snapshot the game loop keeps current, tells
//! every player what happened, and execs. A sentinel file suppresses
//! recursive crash loops.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::errors::{MudError, MudResult};

/// Farewell written to every surviving descriptor before the exec.
pub const RESTART_BANNER: &[u8] =
    b"\n\r <*>          Server is restarting           <*>\n\r\n\r <*>   Attempting to restore last savefile   <*>\n\r";

/// One surviving session in the handoff file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffRecord {
    pub fd: i32,
    pub name: String,
    pub host: String,
}

/// Write the handoff file: one line per record plus the terminator.
/// Names and hosts are ASCII-word-safe by construction, so no quoting.
pub fn write_handoff(path: &Path, records: &[HandoffRecord]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let mut file = fs::File::create(path)?;
    for r in records {
        writeln!(file, "{} {} {}", r.fd, r.name, r.host)?;
    }
    writeln!(file, "-1")?;
    file.sync_all()
}

/// Read the handoff file back. Parsing stops at the `-1` terminator;
/// malformed lines are skipped with a log.
pub fn read_handoff(path: &Path) -> std::io::Result<Vec<HandoffRecord>> {
    let content = fs::read_to_string(path)?;
    let mut records = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line == "-1" {
            break;
        }
        let mut parts = line.split_whitespace();
        let (Some(fd), Some(name), Some(host)) = (parts.next(), parts.next(), parts.next())
        else {
            tracing::warn!(line, "skipping malformed handoff line");
            continue;
        };
        match fd.parse::<i32>() {
            Ok(fd) if fd >= 0 => records.push(HandoffRecord {
                fd,
                name: name.to_string(),
                host: host.to_string(),
            }),
            _ => tracing::warn!(line, "skipping handoff line with bad descriptor"),
        }
    }

    Ok(records)
}

/// Clear FD_CLOEXEC so a descriptor survives the exec.
pub fn clear_cloexec(fd: i32) {
    unsafe {
        libc::fcntl(fd, libc::F_SETFD, 0);
    }
}

/// Replace the process image with a fresh copy of ourselves in
/// recovery mode. Only returns on failure.
pub fn exec_restart(port: u16, listener_fd: i32) -> MudError {
    use std::os::unix::process::CommandExt;

    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => return MudError::Restart(format!("current_exe: {}", e)),
    };

    clear_cloexec(listener_fd);

    let err = std::process::Command::new(&exe)
        .arg(port.to_string())
        .arg("copyover")
        .arg(listener_fd.to_string())
        .exec();

    // exec only returns on error
    MudError::Restart(format!("exec {}: {}", exe.display(), err))
}

/// Everything the crash handler needs, refreshed by the game loop each
/// pulse. The SIGSEGV handler runs with the world in an unknown state,
/// so it works only from this snapshot and the raw descriptors.
#[derive(Debug, Clone, Default)]
pub struct CrashSnapshot {
    pub handoff_path: PathBuf,
    pub sentinel_path: PathBuf,
    pub port: u16,
    pub listener_fd: i32,
    pub records: Vec<HandoffRecord>,
}

static SNAPSHOT: Mutex<Option<CrashSnapshot>> = Mutex::new(None);

/// Refresh the crash snapshot. Called once per pulse from the loop.
pub fn update_snapshot(snapshot: CrashSnapshot) {
    if let Ok(mut slot) = SNAPSHOT.lock() {
        *slot = Some(snapshot);
    }
}

/// Install the fatal-signal handler.
pub fn install_crash_handler() {
    unsafe {
        libc::signal(
            libc::SIGSEGV,
            crash_handler as extern "C" fn(libc::c_int) as libc::sighandler_t,
        );
        // Writes to dead sockets must come back as errors, not signals
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

extern "C" fn crash_handler(_sig: libc::c_int) {
    let Ok(guard) = SNAPSHOT.try_lock() else {
        unsafe { libc::_exit(1) };
    };
    let Some(snapshot) = guard.as_ref() else {
        unsafe { libc::_exit(1) };
    };

    // Suppress recursive crashes: if the sentinel survives from a
    // previous attempt, die for real this time.
    if snapshot.sentinel_path.exists() {
        unsafe {
            libc::signal(libc::SIGSEGV, libc::SIG_DFL);
            libc::raise(libc::SIGSEGV);
        }
        return;
    }
    let _ = fs::write(&snapshot.sentinel_path, "0");

    // Tell every surviving player, then hand their sockets over.
    for record in &snapshot.records {
        unsafe {
            libc::write(
                record.fd,
                RESTART_BANNER.as_ptr() as *const libc::c_void,
                RESTART_BANNER.len(),
            );
        }
        clear_cloexec(record.fd);
    }

    if write_handoff(&snapshot.handoff_path, &snapshot.records).is_err() {
        unsafe { libc::_exit(1) };
    }

    let _ = exec_restart(snapshot.port, snapshot.listener_fd);
    // exec failed; nothing left to salvage
    unsafe { libc::_exit(1) };
}

/// Remove a stale crash sentinel at boot so the next crash can recover.
pub fn clear_sentinel(path: &Path) {
    let _ = fs::remove_file(path);
}

/// Convenience: one session survives the restart if it was in the
/// world with a named character on a real descriptor.
pub fn record_for(fd: i32, name: &str, host: &str) -> Option<HandoffRecord> {
    if name.is_empty() || fd < 0 {
        return None;
    }
    Some(HandoffRecord {
        fd,
        name: name.to_string(),
        host: host.to_string(),
    })
}

/// Result of trying to restore one descriptor in the new process.
pub fn rebind_fd(fd: i32) -> MudResult<std::net::TcpStream> {
    use std::os::unix::io::FromRawFd;

    // The descriptor was inherited across exec; claim ownership.
    let stream = unsafe { std::net::TcpStream::from_raw_fd(fd) };
    stream.set_nonblocking(true)?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
