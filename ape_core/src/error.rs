use std::io;

use thiserror::Error;

use crate::engine::StatusCode;
use crate::info::InfoField;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a session or tag operation.
///
/// Engine failures carry the engine's status code untouched; its meaning is
/// defined by the engine, so no variant interprets it further.
#[derive(Error, Debug)]
pub enum Error {
    /// Handle creation or session start failed.
    #[error("engine could not start the session ({code})")]
    Init { code: StatusCode },

    #[error("engine read failed ({code})")]
    Read { code: StatusCode },

    #[error("engine write failed ({code})")]
    Write { code: StatusCode },

    #[error("engine seek failed ({code})")]
    Seek { code: StatusCode },

    /// Finish or kill failed.
    #[error("engine could not finalize the output ({code})")]
    Finalize { code: StatusCode },

    #[error("engine query for {field:?} failed ({code})")]
    Query { field: InfoField, code: StatusCode },

    #[error("engine tag operation failed ({code})")]
    Tag { code: StatusCode },

    /// Misuse detected by the wrapper (lease overrun, use after close, ...).
    /// Not recoverable by retrying.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("invalid audio format: {0}")]
    InvalidFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::ProtocolViolation(msg.into())
    }

    /// Engine status behind this failure, if it came from the engine.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Init { code }
            | Error::Read { code }
            | Error::Write { code }
            | Error::Seek { code }
            | Error::Finalize { code }
            | Error::Query { code, .. }
            | Error::Tag { code } => Some(*code),
            Error::ProtocolViolation(_) | Error::InvalidFormat(_) | Error::Io(_) => None,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::Io(e) => e,
            Error::ProtocolViolation(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
            other => io::Error::other(other),
        }
    }
}
