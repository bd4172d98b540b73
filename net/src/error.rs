use std::fmt::{Display, Formatter};

pub type PeerResult<T> = Result<T, PeerError>;

/// Error taxonomy for the codec, handshake and session layers.
///
/// Codec errors are values the caller decides what to do with; session-level
/// I/O errors are isolated to the peer that raised them and never escalate to
/// the [`crate::session::manager::SessionManager`].
#[derive(Debug)]
pub enum PeerError {
    /// Buffer shorter than a declared field; recoverable by reading more bytes.
    Truncated,
    /// Frame header magic did not match the configured network.
    BadMagic { expected: u32, actual: u32 },
    /// sha256d(payload)[0..4] did not match the header checksum.
    BadChecksum,
    /// Declared payload length exceeded the configured per-frame cap.
    OversizedFrame { declared: u32, max: u32 },
    /// Command field was not valid NUL-padded ASCII.
    BadCommandEncoding(String),
    /// Handshake did not complete.
    HandshakeFailed(HandshakeFailure),
    /// TCP connect attempt failed.
    ConnectFailed(std::io::Error),
    /// Any other I/O failure on an established connection.
    Io(std::io::Error),
    /// Operation attempted against a session that is already `Closed`.
    Disconnected,
    /// Catch-all for malformed input rejected by a message builder (bad hex, etc).
    Malformed(String),
}

#[derive(Debug)]
pub enum HandshakeFailure {
    Timeout,
    PeerClosed,
    Parse(String),
}

impl Display for PeerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerError::Truncated => write!(f, "buffer truncated"),
            PeerError::BadMagic { expected, actual } =>
                write!(f, "bad magic: expected {:#010x}, got {:#010x}", expected, actual),
            PeerError::BadChecksum => write!(f, "checksum mismatch"),
            PeerError::OversizedFrame { declared, max } =>
                write!(f, "oversized frame: declared {} bytes, max is {}", declared, max),
            PeerError::BadCommandEncoding(s) => write!(f, "bad command encoding: {}", s),
            PeerError::HandshakeFailed(reason) => write!(f, "handshake failed: {}", reason),
            PeerError::ConnectFailed(e) => write!(f, "connect failed: {}", e),
            PeerError::Io(e) => write!(f, "{}", e),
            PeerError::Disconnected => write!(f, "session is closed"),
            PeerError::Malformed(s) => write!(f, "malformed input: {}", s),
        }
    }
}

impl Display for HandshakeFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeFailure::Timeout => write!(f, "timed out"),
            HandshakeFailure::PeerClosed => write!(f, "peer closed the connection"),
            HandshakeFailure::Parse(e) => write!(f, "parse error: {}", e),
        }
    }
}

impl std::error::Error for PeerError {}

impl From<std::io::Error> for PeerError {
    fn from(value: std::io::Error) -> Self {
        PeerError::Io(value)
    }
}
