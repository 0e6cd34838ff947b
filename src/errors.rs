use std::fmt;

/// Custom configuration errors
#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String, String),
    UnknownKey(String),
    Io(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue(key, value) => {
                write!(f, "Invalid value '{}' for key '{}'", value, key)
            }
            ConfigError::UnknownKey(key) => write!(f, "Unknown configuration key: '{}'", key),
            ConfigError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Session and server errors.
///
/// Everything here is local to one connection except `Listener`, which
/// is fatal at boot. The game loop maps any session error into a close
/// plus a log line and keeps running.
#[derive(Debug)]
pub enum MudError {
    /// I/O related errors (socket reads/writes, handoff files)
    Io(std::io::Error),

    /// Peer closed the connection normally
    PeerClosed,

    /// Receive buffer filled without a newline, or repeat spam
    InputOverflow,

    /// Output buffer grew past the hard ceiling
    OutputOverflow,

    /// Listening socket failure (fatal at boot)
    Listener(String),

    /// Hot-restart machinery failure
    Restart(String),

    /// Configuration error
    Configuration(String),
}

impl fmt::Display for MudError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MudError::Io(err) => write!(f, "I/O error: {}", err),
            MudError::PeerClosed => write!(f, "Peer closed connection"),
            MudError::InputOverflow => write!(f, "Input overflow"),
            MudError::OutputOverflow => write!(f, "Output overflow"),
            MudError::Listener(msg) => write!(f, "Listener error: {}", msg),
            MudError::Restart(msg) => write!(f, "Restart error: {}", msg),
            MudError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for MudError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MudError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MudError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => MudError::PeerClosed,
            _ => MudError::Io(err),
        }
    }
}

impl From<ConfigError> for MudError {
    fn from(err: ConfigError) -> Self {
        MudError::Configuration(err.to_string())
    }
}

/// Result type alias for server operations
pub type MudResult<T> = Result<T, MudError>;

/// Masked rendering of a peer address for logs. Dotted quads keep the
/// first two octets; anything else (resolved hostnames) is fully masked.
pub fn mask_host(host: &str) -> String {
    if host.is_empty() {
        return "(unknown)".to_string();
    }

    let octets: Vec<&str> = host.split('.').collect();
    if octets.len() == 4 && octets.iter().all(|o| o.parse::<u8>().is_ok()) {
        return format!("{}.{}.x.x", octets[0], octets[1]);
    }

    "***masked***".to_string()
}
