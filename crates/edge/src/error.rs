use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error("store error: {0}")]
    Store(#[from] chat_fabric_store::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl chat_fabric_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

chat_fabric_common::impl_context!();
