//! Per-Source processing: filter, download, decode, hand off.

use std::io::BufRead;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::callbacks::{AcceptAll, RecordsProcessor, SourceFilter};
use crate::decoder::{
    DecodeDiagnostics, DecodeError, DeliveryInfoProvider, LogFileDelivery, RawRecordDelivery,
    RecordDecoder, TracingDiagnostics,
};
use crate::exception::{ExceptionHandler, ProcessingError};
use crate::fetch::{LogFetcher, ObjectStore};
use crate::model::{ClientRecord, LogFile, Source};
use crate::progress::{ProgressReporter, ProgressState, ProgressStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOutcome {
    /// Every log file was downloaded and fully handed to the processor.
    Completed,
    /// The filter rejected the Source; nothing was downloaded.
    Filtered,
    /// At least one log file failed. The message should stay on the queue.
    Incomplete,
}

impl SourceOutcome {
    pub fn should_delete(&self) -> bool {
        !matches!(self, SourceOutcome::Incomplete)
    }

    /// Progress stage to report when acknowledging the message.
    pub fn delete_state(&self) -> ProgressState {
        match self {
            SourceOutcome::Filtered => ProgressState::DeleteFilteredMessage,
            _ => ProgressState::DeleteMessage,
        }
    }
}

/// What to do with the rest of a log file after one record fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordErrorPolicy {
    #[default]
    Skip,
    Abort,
}

#[derive(Debug, Error)]
#[error("unknown record error policy {0:?}, expected \"skip\" or \"abort\"")]
pub struct ParsePolicyError(String);

impl FromStr for RecordErrorPolicy {
    type Err = ParsePolicyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "skip" => Ok(RecordErrorPolicy::Skip),
            "abort" => Ok(RecordErrorPolicy::Abort),
            _ => Err(ParsePolicyError(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub max_records_per_batch: usize,
    pub record_error_policy: RecordErrorPolicy,
    /// Attach each record's original JSON text to its delivery info.
    pub raw_records: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            max_records_per_batch: 100,
            record_error_policy: RecordErrorPolicy::Skip,
            raw_records: false,
        }
    }
}

pub struct SourcePipeline<S, P> {
    fetcher: LogFetcher<S, P>,
    filter: Arc<dyn SourceFilter>,
    job: LogDecodeJob,
}

impl<S: ObjectStore, P: ProgressReporter> SourcePipeline<S, P> {
    pub fn new(fetcher: LogFetcher<S, P>, processor: Arc<dyn RecordsProcessor>) -> Self {
        let job = LogDecodeJob {
            processor,
            exceptions: fetcher.exception_handler().clone(),
            diagnostics: Arc::new(TracingDiagnostics),
            options: PipelineOptions::default(),
        };
        SourcePipeline {
            fetcher,
            filter: Arc::new(AcceptAll),
            job,
        }
    }

    pub fn with_filter(mut self, filter: Arc<dyn SourceFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DecodeDiagnostics>) -> Self {
        self.job.diagnostics = diagnostics;
        self
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.job.options = options;
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.job.options
    }

    pub fn fetcher(&self) -> &LogFetcher<S, P> {
        &self.fetcher
    }

    /// Run every log file of `source` through download and decode.
    ///
    /// Failures are routed to the exception handler, never returned. Sizes of
    /// downloaded files are written back into `source.log_files`.
    pub async fn process_source(&self, source: &mut Source) -> SourceOutcome {
        let status = ProgressStatus::for_source(ProgressState::ProcessSource, source);
        let token = self.progress().report_start(&status);

        let outcome = self.run_source(source, &status).await;

        let status = ProgressStatus::for_source(ProgressState::ProcessSource, source)
            .with_success(outcome != SourceOutcome::Incomplete);
        self.progress().report_end(&status, token);
        outcome
    }

    async fn run_source(&self, source: &mut Source, status: &ProgressStatus) -> SourceOutcome {
        match self.filter.filter_source(source) {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(
                    "Source with {} log files filtered out",
                    source.log_files.len()
                );
                return SourceOutcome::Filtered;
            }
            Err(err) => {
                self.exceptions().handle_exception(
                    ProcessingError::new("Source filter failed.", status.clone()).with_cause(err),
                );
                return SourceOutcome::Incomplete;
            }
        }

        let mut failed = 0;
        for index in 0..source.log_files.len() {
            let mut log = source.log_files[index].clone();

            let success = match self.fetcher.download_log(&mut log, source).await {
                Some(content) => self.process_log(content, source, &log).await,
                None => false,
            };
            if !success {
                failed += 1;
            }

            source.log_files[index] = log;
        }

        if failed > 0 {
            tracing::warn!(
                "{} of {} log files failed, leaving message for redelivery",
                failed,
                source.log_files.len()
            );
            SourceOutcome::Incomplete
        } else {
            SourceOutcome::Completed
        }
    }

    /// Decode one downloaded file and hand its records to the processor.
    ///
    /// Decoding and the processor calls run on tokio's blocking pool, so a
    /// slow processor does not stall other Sources.
    pub async fn process_log(&self, content: Bytes, source: &Source, log: &LogFile) -> bool {
        let status = ProgressStatus::for_log(ProgressState::ProcessLog, source, log);
        let token = self.progress().report_start(&status);

        let job = self.job.clone();
        let (task_source, task_log, task_status) = (source.clone(), log.clone(), status.clone());
        let result = tokio::task::spawn_blocking(move || {
            job.run(content, &task_source, &task_log, &task_status)
        })
        .await
        .unwrap_or_else(|err| {
            let error = ProcessingError::new("Log processing task failed.", status.clone());
            Err(error.with_cause(err))
        });

        let success = match result {
            Ok(count) => {
                tracing::info!(
                    "Decoded {} records from s3://{}/{}",
                    count,
                    log.bucket,
                    log.object_key
                );
                true
            }
            Err(err) => {
                self.exceptions().handle_exception(err);
                false
            }
        };

        self.progress().report_end(&status.with_success(success), token);
        success
    }

    fn progress(&self) -> &Arc<P> {
        self.fetcher.progress()
    }

    fn exceptions(&self) -> &Arc<dyn ExceptionHandler> {
        self.fetcher.exception_handler()
    }
}

/// The synchronous half of [`SourcePipeline::process_log`].
#[derive(Clone)]
struct LogDecodeJob {
    processor: Arc<dyn RecordsProcessor>,
    exceptions: Arc<dyn ExceptionHandler>,
    diagnostics: Arc<dyn DecodeDiagnostics>,
    options: PipelineOptions,
}

impl LogDecodeJob {
    fn run(
        &self,
        content: Bytes,
        source: &Source,
        log: &LogFile,
        status: &ProgressStatus,
    ) -> Result<usize, ProcessingError> {
        let delivery: Box<dyn DeliveryInfoProvider> = if self.options.raw_records {
            Box::new(RawRecordDelivery::new(log, content.clone()))
        } else {
            Box::new(LogFileDelivery::new(log))
        };

        let mut decoder =
            RecordDecoder::from_bytes(content, delivery).with_diagnostics(self.diagnostics.clone());
        let result = self.emit_records(&mut decoder, source, log, status);
        decoder.close();
        result
    }

    fn emit_records<R: BufRead, D: DeliveryInfoProvider>(
        &self,
        decoder: &mut RecordDecoder<R, D>,
        source: &Source,
        log: &LogFile,
        status: &ProgressStatus,
    ) -> Result<usize, ProcessingError> {
        let batch_size = self.options.max_records_per_batch.max(1);
        let mut batch: Vec<ClientRecord> = Vec::with_capacity(batch_size);
        let mut decoded = 0;

        decoder
            .read_header()
            .map_err(|err| decode_failure("Log file is not a CloudTrail log.", status, err))?;

        while decoder
            .has_next()
            .map_err(|err| decode_failure("Failed to read log file.", status, err))?
        {
            match decoder.next_record() {
                Ok(record) => {
                    decoded += 1;
                    batch.push(record);
                    if batch.len() >= batch_size {
                        let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                        self.emit(full, source, log, status)?;
                    }
                }
                Err(err) if !err.is_fatal() => {
                    let message = record_failure_message(&err);
                    if self.options.record_error_policy == RecordErrorPolicy::Abort {
                        return Err(decode_failure(&message, status, err));
                    }
                    self.exceptions
                        .handle_exception(decode_failure(&message, status, err));
                }
                Err(err) => return Err(decode_failure("Failed to read log file.", status, err)),
            }
        }

        if !batch.is_empty() {
            self.emit(batch, source, log, status)?;
        }
        Ok(decoded)
    }

    fn emit(
        &self,
        batch: Vec<ClientRecord>,
        source: &Source,
        log: &LogFile,
        status: &ProgressStatus,
    ) -> Result<(), ProcessingError> {
        self.processor
            .process_records(batch, source, log)
            .map_err(|err| {
                ProcessingError::new("Records processor failed.", status.clone()).with_cause(err)
            })
    }
}

fn decode_failure(message: &str, status: &ProgressStatus, err: DecodeError) -> ProcessingError {
    ProcessingError::new(message, status.clone()).with_cause(err)
}

fn record_failure_message(err: &DecodeError) -> String {
    match err.byte_range() {
        Some((start, end)) => format!("Failed to decode record at bytes {start}..{end}."),
        None => "Failed to decode record.".to_string(),
    }
}
