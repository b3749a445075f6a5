//! Error types for the FTP control/data channel core.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error taxonomy, surfaced to the client as a numeric response code
/// (see `response_code`) or as a silent session teardown.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error on a control or data socket, or on the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Command line exceeded the 1024-byte cap before a terminating LF.
    #[error("command line too long")]
    Oversize,

    /// Peer closed the control connection before sending any bytes.
    #[error("peer closed connection")]
    PeerClosed,

    /// Malformed command line or command argument (PORT parse failure, etc).
    #[error("syntax error: {0}")]
    SyntaxError(String),

    /// Command not valid in the session's current auth state.
    #[error("not logged in")]
    NotLoggedIn,

    /// Path failed jail validation (traversal, NUL byte, length, etc).
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Path was lexically valid but the filesystem operation was refused.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// A transfer command was issued with no PORT/PASV armed.
    #[error("no data channel established")]
    NoDataChannel,

    /// PORT connect or PASV accept failed.
    #[error("data channel failed: {0}")]
    DataChannelFailed(String),

    /// Transfer started but failed partway through.
    #[error("transfer aborted: {0}")]
    TransferAborted(String),

    /// Command recognized but not supported with the given argument.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Command verb not recognized at all.
    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

impl Error {
    /// Maps an error to the RFC 959 response code a command handler should
    /// send back to the client. Control-channel-terminal errors
    /// (`Io`, `PeerClosed`, `Oversize`) have no code: the session just ends.
    pub fn response_code(&self) -> Option<u16> {
        match self {
            Error::Io(_) | Error::PeerClosed | Error::Oversize => None,
            Error::SyntaxError(_) => Some(501),
            Error::UnknownCommand(_) => Some(500),
            Error::NotLoggedIn => Some(530),
            Error::InvalidPath(_) | Error::AccessDenied(_) => Some(550),
            Error::NoDataChannel | Error::DataChannelFailed(_) => Some(425),
            Error::TransferAborted(_) => Some(426),
            Error::NotImplemented(_) => Some(504),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_errors_have_no_response_code() {
        assert_eq!(Error::PeerClosed.response_code(), None);
        assert_eq!(Error::Oversize.response_code(), None);
    }

    #[test]
    fn path_errors_map_to_550() {
        assert_eq!(
            Error::InvalidPath("x".into()).response_code(),
            Some(550)
        );
        assert_eq!(
            Error::AccessDenied("x".into()).response_code(),
            Some(550)
        );
    }

    #[test]
    fn data_channel_errors_map_to_425() {
        assert_eq!(Error::NoDataChannel.response_code(), Some(425));
        assert_eq!(
            Error::DataChannelFailed("x".into()).response_code(),
            Some(425)
        );
    }
}
