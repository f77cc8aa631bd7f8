use mta_debug_api::BackendError;
use thiserror::Error;

use crate::dap::codec::DapError;

pub type AdapterResult<T> = Result<T, AdapterError>;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error(transparent)]
    Dap(#[from] DapError),

    #[error("backend: {0}")]
    Backend(#[from] BackendError),

    #[error("invalid {command} arguments: {message}")]
    InvalidArguments { command: String, message: String },

    #[error("unknown threadId {0}")]
    UnknownThread(i64),

    #[error("unknown variablesReference {0}")]
    UnknownVariablesReference(i64),

    #[error("no resource is attached yet")]
    NotLaunched,

    #[error("launch was already requested")]
    AlreadyLaunched,
}

impl AdapterError {
    pub fn invalid_arguments(command: &str, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            command: command.to_string(),
            message: message.into(),
        }
    }
}
