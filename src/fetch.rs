//! Log file download.

use std::future::Future;
use std::sync::Arc;

use aws_config::SdkConfig;
use aws_sdk_s3::{self as s3};
use bytes::Bytes;
use thiserror::Error;

use crate::exception::{BoxError, ExceptionHandler, ProcessingError};
use crate::model::{LogFile, Source};
use crate::progress::{ProgressReporter, ProgressState, ProgressStatus};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage service error: {0}")]
    Service(#[source] BoxError),

    #[error("failed to read object body: {0}")]
    Read(#[source] BoxError),
}

/// Read access to log file storage.
pub trait ObjectStore: Send + Sync {
    fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> impl Future<Output = Result<Bytes, StorageError>> + Send;
}

pub fn s3_client(config: &SdkConfig, path_style: bool) -> s3::Client {
    let client = s3::Client::new(config);

    if path_style {
        tracing::info!("Using path-style buckets");
        let config_builder = client.config().clone().to_builder();
        s3::Client::from_conf(config_builder.force_path_style(true).build())
    } else {
        client
    }
}

#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: s3::Client,
}

impl S3ObjectStore {
    pub fn new(client: s3::Client) -> Self {
        S3ObjectStore { client }
    }
}

impl ObjectStore for S3ObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| StorageError::Service(Box::new(s3::Error::from(err))))?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|err| StorageError::Read(Box::new(err)))?;

        Ok(body.into_bytes())
    }
}

/// Downloads log files, reporting progress and absorbing failures.
///
/// A failed download never surfaces as an error: it is handed to the exception
/// handler and the caller simply gets no content. Nothing is retried here; an
/// unacknowledged message is redelivered by the queue.
pub struct LogFetcher<S, P> {
    store: S,
    progress: Arc<P>,
    exceptions: Arc<dyn ExceptionHandler>,
}

impl<S: ObjectStore, P: ProgressReporter> LogFetcher<S, P> {
    pub fn new(store: S, progress: Arc<P>, exceptions: Arc<dyn ExceptionHandler>) -> Self {
        LogFetcher {
            store,
            progress,
            exceptions,
        }
    }

    pub fn progress(&self) -> &Arc<P> {
        &self.progress
    }

    pub fn exception_handler(&self) -> &Arc<dyn ExceptionHandler> {
        &self.exceptions
    }

    /// Fetch one log file. Sets `log.size` on success.
    pub async fn download_log(&self, log: &mut LogFile, source: &Source) -> Option<Bytes> {
        let status = ProgressStatus::for_log(ProgressState::DownloadLog, source, log);
        let token = self.progress.report_start(&status);

        match self.store.get_object(&log.bucket, &log.object_key).await {
            Ok(content) => {
                log.size = Some(content.len() as u64);
                tracing::info!(
                    "Downloaded s3://{}/{} ({} bytes)",
                    log.bucket,
                    log.object_key,
                    content.len()
                );

                let status = ProgressStatus::for_log(ProgressState::DownloadLog, source, log)
                    .with_success(true);
                self.progress.report_end(&status, token);
                Some(content)
            }
            Err(err) => {
                self.exceptions.handle_exception(
                    ProcessingError::new("Failed to download log file.", status.clone())
                        .with_cause(err),
                );
                self.progress.report_end(&status, token);
                None
            }
        }
    }
}
