//! MCCP - downstream compression (telnet options 85 and 86).
//!
//! Both versions wrap the outgoing byte stream in a zlib deflate
//! stream. They differ only in option number and in the start marker
//! the server emits, uncompressed, immediately before the first
//! compressed byte:
//!
//! - v1 (option 85): `IAC SB 85 WILL SE` (the historical quirk)
//! - v2 (option 86): `IAC SB 86 IAC SE`
//!
//! Only one version is active at a time; v2 supersedes v1 when both
//! are negotiated. On stop or session close the stream is finalized so
//! the client's inflater sees a clean end-of-stream.

use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use telnet_negotiation::TelnetOption;
use telnet_negotiation::protocol::{IAC, TelnetCommand};

/// Which compression variant a session negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressVersion {
    V1,
    V2,
}

impl CompressVersion {
    pub fn option(self) -> u8 {
        match self {
            CompressVersion::V1 => TelnetOption::Mccp1.to_byte(),
            CompressVersion::V2 => TelnetOption::Mccp2.to_byte(),
        }
    }

    /// The uncompressed stream-boundary announcement. Everything after
    /// these five bytes is compressed.
    pub fn start_marker(self) -> [u8; 5] {
        match self {
            CompressVersion::V1 => [
                IAC,
                TelnetCommand::SB.to_byte(),
                TelnetOption::Mccp1.to_byte(),
                TelnetCommand::WILL.to_byte(),
                TelnetCommand::SE.to_byte(),
            ],
            CompressVersion::V2 => [
                IAC,
                TelnetCommand::SB.to_byte(),
                TelnetOption::Mccp2.to_byte(),
                IAC,
                TelnetCommand::SE.to_byte(),
            ],
        }
    }
}

impl std::fmt::Display for CompressVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressVersion::V1 => write!(f, "v1"),
            CompressVersion::V2 => write!(f, "v2"),
        }
    }
}

/// One session's compression stream context.
///
/// Writes buffer inside the encoder; `take_pending` performs a sync
/// flush and drains whatever is ready for the socket, which the loop
/// does at least once per pulse. Tiny writes are therefore cheap.
#[derive(Debug)]
pub struct CompressStream {
    version: CompressVersion,
    encoder: ZlibEncoder<Vec<u8>>,
}

impl CompressStream {
    pub fn new(version: CompressVersion) -> Self {
        Self {
            version,
            encoder: ZlibEncoder::new(Vec::new(), Compression::default()),
        }
    }

    pub fn version(&self) -> CompressVersion {
        self.version
    }

    /// Feed plaintext bytes into the stream.
    pub fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.encoder.write_all(bytes)
    }

    /// Sync-flush and drain the bytes ready for the wire. The flush
    /// guarantees the client can decode everything written so far.
    pub fn take_pending(&mut self) -> std::io::Result<Vec<u8>> {
        self.encoder.flush()?;
        Ok(std::mem::take(self.encoder.get_mut()))
    }

    /// Finalize the stream: remaining output plus the zlib trailer.
    /// The stream context is consumed; the session continues in
    /// plaintext (or is closing).
    pub fn finish(self) -> std::io::Result<Vec<u8>> {
        self.encoder.finish()
    }
}
