//! Client for the MTA:SA debug backend.
//!
//! The backend is a small HTTP service that the game server and client talk to from inside
//! the debugged resource. It only ever answers requests: breakpoints and run-state changes
//! are posted to it, and pause snapshots are read back by polling `get_resume_mode`.

mod client;
mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod mock;

pub use client::BackendClient;
pub use types::{
    ResourceInfo, ResumeMode, ResumeState, UnknownResumeMode, VariableMap, VariableValue,
    OBJECT_MARKER_KEY,
};

use thiserror::Error;

/// Path prefix of the debug endpoints.
pub const DEBUG_PREFIX: &str = "/MTADebug";
/// Path prefix of the server console endpoint.
pub const SERVER_PREFIX: &str = "/MTAServer";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("backend replied {status} to {path}")]
    Status { path: String, status: u16 },

    #[error("malformed reply from {path}: {message}")]
    Decode { path: String, message: String },
}

impl BackendError {
    /// Whether retrying the same request later can reasonably succeed.
    ///
    /// Connection failures, timeouts and non-200 replies are expected while the game
    /// server is starting or the resource is restarting.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(err) => err.is_connect() || err.is_timeout() || err.is_request(),
            Self::Status { .. } => true,
            Self::Url(_) | Self::Decode { .. } => false,
        }
    }
}

pub type Result<T, E = BackendError> = std::result::Result<T, E>;
