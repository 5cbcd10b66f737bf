//! Record decoder error types.

use std::io;

use thiserror::Error;

/// A known field whose value could not be coerced to its type.
#[derive(Debug, Error)]
pub enum FieldError {
    #[error("{value:?} is not a valid identifier: {source}")]
    InvalidId { value: String, source: uuid::Error },

    #[error("{value:?} is not a hyphenated identifier")]
    NotHyphenated { value: String },

    #[error("{value:?} is not a valid UTC timestamp: {source}")]
    InvalidTimestamp {
        value: String,
        source: chrono::ParseError,
    },

    #[error("expected {expected}, found {found}")]
    UnexpectedValue {
        expected: &'static str,
        found: &'static str,
    },
}

/// Errors surfaced by the record decoder.
///
/// Only [`DecodeError::Field`] is local to one record; the decoder has already
/// moved past that record and the next one can be read. Every other variant
/// leaves the stream unusable.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("malformed JSON at byte {offset}: {message}")]
    Syntax { offset: u64, message: String },

    #[error("not a CloudTrail log (byte {offset}): {message}")]
    Format { offset: u64, message: String },

    #[error("cannot decode field {field:?} of record at bytes {char_start}..{char_end}: {source}")]
    Field {
        field: String,
        char_start: u64,
        char_end: u64,
        source: FieldError,
    },

    #[error("no more records in this log file")]
    Exhausted,

    #[error("record decoder is closed")]
    Closed,
}

impl DecodeError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DecodeError::Field { .. })
    }

    /// Byte range of the record that failed, for field errors.
    pub fn byte_range(&self) -> Option<(u64, u64)> {
        match self {
            DecodeError::Field {
                char_start,
                char_end,
                ..
            } => Some((*char_start, *char_end)),
            _ => None,
        }
    }
}

impl From<DecodeError> for io::Error {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Io(err) => err,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
