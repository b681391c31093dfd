// SPDX-License-Identifier: GPL-3.0-only

//! Error taxonomy for the protocol core.

use std::fmt;
use std::net::AddrParseError;

/// Result type alias using [`StreamError`].
pub type StreamResult<T> = Result<T, StreamError>;

/// The abstract error kinds from the protocol's error handling design.
#[derive(Debug)]
pub enum StreamError {
    /// A socket read/write returned failure or a short count. Fatal to the Connection.
    Transport(String),
    /// Orderly remote shutdown (zero-byte read). Not logged as an error.
    PeerClosed,
    /// A payload's length disagreed with the fixed size expected for its kind.
    Protocol(String),
    /// A request required a precondition that wasn't met (e.g. no camera open).
    State(String),
    /// The camera driver or renderer raised a runtime failure.
    Upstream(String),
    /// A locally supplied parameter (e.g. a bad IP address) was invalid.
    Config(String),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Transport(msg) => write!(f, "transport error: {}", msg),
            StreamError::PeerClosed => write!(f, "peer closed the connection"),
            StreamError::Protocol(msg) => write!(f, "protocol violation: {}", msg),
            StreamError::State(msg) => write!(f, "invalid state: {}", msg),
            StreamError::Upstream(msg) => write!(f, "upstream error: {}", msg),
            StreamError::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for StreamError {}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Transport(err.to_string())
    }
}

impl From<AddrParseError> for StreamError {
    fn from(err: AddrParseError) -> Self {
        StreamError::Config(err.to_string())
    }
}

impl StreamError {
    /// True for the orderly-shutdown case the reader loop must not log as an error.
    pub fn is_peer_closed(&self) -> bool {
        matches!(self, StreamError::PeerClosed)
    }
}
