use std::io;

use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Rejected before any frame is put on the wire.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("failed to send request, reason: {0}")]
    Transmission(#[source] io::Error),
    #[error("failed to parse frame: {0}")]
    Parse(&'static str),
    #[error("session error: {0}")]
    Resource(String),
    #[error("scan cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
