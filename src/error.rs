use std::io;
use thiserror::Error;

/// Failures surfaced by the client and server operations.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("not connected: call connect() first")]
    NotConnected,
    #[error("invalid session state: {0}")]
    InvalidState(String),
    #[error("peer refused the transfer")]
    PermissionDenied,
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("stream closed by peer")]
    StreamClosed,
    #[error("i/o failure: {0}")]
    Io(#[source] io::Error),
    #[error("operation cancelled")]
    Cancelled,
    #[error("background task failed: {0}")]
    TaskFailed(String),
}

impl From<io::Error> for TransferError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => TransferError::StreamClosed,
            _ => TransferError::Io(err),
        }
    }
}

impl TransferError {
    /// True for transport-level failures, as opposed to protocol or policy errors.
    pub fn is_stream_failure(&self) -> bool {
        matches!(self, TransferError::StreamClosed | TransferError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
