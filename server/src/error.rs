//! Error types, split by how far a failure is allowed to reach.

use shared::{Opcode, WireError};
use thiserror::Error;

/// A request failed but the session keeps running. The frame is dropped and
/// the client gets no reply.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("opcode {0} requires a logged-in session")]
    NotAuthenticated(Opcode),
    #[error("user {0} already has a live session")]
    AlreadyOnline(crate::store::UserId),
}

/// Ends one session. Other sessions are unaffected.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt stream: {0}")]
    Wire(WireError),
    #[error("connection closed in the middle of a frame")]
    TruncatedFrame,
    #[error("no activity for {0:?}")]
    TimedOut(std::time::Duration),
}

/// Stops the listener. The supervisor restarts the server from scratch.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("listener failed: {0}")]
    Listener(#[source] std::io::Error),
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}
