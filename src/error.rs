use thiserror::Error;

use crate::id::Id;

#[derive(Error, Debug)]
pub enum Error {
    #[error("entry not found: {0}")]
    NotFound(Id),

    #[error("entry already exists: {0}")]
    Exists(Id),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_exists(&self) -> bool {
        matches!(self, Error::Exists(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
