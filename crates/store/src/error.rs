use thiserror::Error;

chat_fabric_common::impl_context!();

/// Errors surfaced by a table-store backend.
///
/// Per `§7`'s policy, a backend failure never kills the caller's connection:
/// handlers treat `Err` the same as an empty/`None` result and log it, they
/// just need a typed value to log.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error("backend unavailable, reconnect required: {0}")]
    BackendUnavailable(String),
}

impl chat_fabric_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
