//! Routing of absorbed failures.

use std::error::Error as StdError;

use thiserror::Error;

use crate::decoder::DecodeError;
use crate::progress::ProgressStatus;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A failure the pipeline absorbed, with the stage it happened in.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProcessingError {
    message: String,
    #[source]
    cause: Option<BoxError>,
    status: ProgressStatus,
}

impl ProcessingError {
    pub fn new(message: impl Into<String>, status: ProgressStatus) -> Self {
        ProcessingError {
            message: message.into(),
            cause: None,
            status,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> &ProgressStatus {
        &self.status
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// The decoder error behind this failure, if there is one.
    pub fn decode_error(&self) -> Option<&DecodeError> {
        self.cause.as_deref()?.downcast_ref::<DecodeError>()
    }
}

/// Receives every failure the pipeline absorbs. Implementations must not panic.
pub trait ExceptionHandler: Send + Sync {
    fn handle_exception(&self, error: ProcessingError);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingExceptionHandler;

impl ExceptionHandler for LoggingExceptionHandler {
    fn handle_exception(&self, error: ProcessingError) {
        let status = error.status();
        let log = status.log().map(|log| format!("s3://{}/{}", log.bucket, log.object_key));

        match (error.cause(), log) {
            (Some(cause), Some(log)) => tracing::error!(
                "{} [{} {}]: {}",
                error.message(),
                status.state,
                log,
                cause
            ),
            (Some(cause), None) => {
                tracing::error!("{} [{}]: {}", error.message(), status.state, cause)
            }
            (None, Some(log)) => tracing::error!("{} [{} {}]", error.message(), status.state, log),
            (None, None) => tracing::error!("{} [{}]", error.message(), status.state),
        }
    }
}
