//! Hooks the embedding application plugs into the pipeline.

use thiserror::Error;

use crate::exception::BoxError;
use crate::model::{ClientRecord, LogFile, Source};

/// Failure raised by a user callback.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CallbackError {
    message: String,
    #[source]
    cause: Option<BoxError>,
}

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        CallbackError {
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

/// Decides whether a Source is worth fetching at all.
pub trait SourceFilter: Send + Sync {
    fn filter_source(&self, source: &Source) -> Result<bool, CallbackError>;
}

impl<F> SourceFilter for F
where
    F: Fn(&Source) -> Result<bool, CallbackError> + Send + Sync,
{
    fn filter_source(&self, source: &Source) -> Result<bool, CallbackError> {
        self(source)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl SourceFilter for AcceptAll {
    fn filter_source(&self, _source: &Source) -> Result<bool, CallbackError> {
        Ok(true)
    }
}

/// Receives decoded records, one batch at a time, in file order.
///
/// Called from tokio's blocking pool, so implementations may block.
pub trait RecordsProcessor: Send + Sync {
    fn process_records(
        &self,
        records: Vec<ClientRecord>,
        source: &Source,
        log: &LogFile,
    ) -> Result<(), CallbackError>;
}

/// Writes each record to the log as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingRecordsProcessor;

impl RecordsProcessor for LoggingRecordsProcessor {
    fn process_records(
        &self,
        records: Vec<ClientRecord>,
        _source: &Source,
        log: &LogFile,
    ) -> Result<(), CallbackError> {
        for record in &records {
            let json = serde_json::to_string(record)
                .map_err(|err| CallbackError::new("Failed to serialize record").with_cause(err))?;
            tracing::info!("{}", json);
        }
        tracing::info!(
            "Processed {} records from s3://{}/{}",
            records.len(),
            log.bucket,
            log.object_key
        );
        Ok(())
    }
}
