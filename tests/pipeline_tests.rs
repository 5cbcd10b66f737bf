//! Tests for per-Source processing.

mod common;

use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use cloudtrail_ingest::callbacks::{CallbackError, RecordsProcessor, SourceFilter};
use cloudtrail_ingest::decoder::DecodeError;
use cloudtrail_ingest::exception::ExceptionHandler;
use cloudtrail_ingest::fetch::LogFetcher;
use cloudtrail_ingest::model::{ClientRecord, LogFile, Source};
use cloudtrail_ingest::pipeline::{
    PipelineOptions, RecordErrorPolicy, SourceOutcome, SourcePipeline,
};
use cloudtrail_ingest::progress::{ProgressState, ProgressStatus};

use common::{
    CollectingProcessor, MemoryStore, ProgressEvent, RecordingExceptions, RecordingProgress,
    log_body, record,
};

struct Harness {
    pipeline: SourcePipeline<MemoryStore, RecordingProgress>,
    progress: Arc<RecordingProgress>,
    exceptions: Arc<RecordingExceptions>,
    processor: Arc<CollectingProcessor>,
}

fn harness(store: MemoryStore, processor: CollectingProcessor, options: PipelineOptions) -> Harness {
    let progress = Arc::new(RecordingProgress::default());
    let exceptions = Arc::new(RecordingExceptions::default());
    let processor = Arc::new(processor);

    let handler: Arc<dyn ExceptionHandler> = exceptions.clone();
    let records: Arc<dyn RecordsProcessor> = processor.clone();
    let pipeline = SourcePipeline::new(LogFetcher::new(store, progress.clone(), handler), records)
        .with_options(options);

    Harness {
        pipeline,
        progress,
        exceptions,
        processor,
    }
}

fn source(keys: &[&str]) -> Source {
    Source::new(
        "receipt",
        keys.iter().map(|key| LogFile::new("trail", *key)).collect(),
    )
}

fn three_records() -> String {
    let a = record("11111111-1111-1111-1111-111111111111", "A");
    let b = record("22222222-2222-2222-2222-222222222222", "B");
    let c = record("33333333-3333-3333-3333-333333333333", "C");
    log_body(&[&a, &b, &c])
}

fn stages(progress: &RecordingProgress) -> Vec<ProgressEvent> {
    progress.events()
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_processes_every_log_file() {
    let store = MemoryStore::default()
        .with_object("trail", "one.json", &three_records())
        .with_object("trail", "two.json", &log_body(&[r#"{"eventName":"D"}"#]));
    let h = harness(store, CollectingProcessor::default(), PipelineOptions::default());

    let mut source = source(&["one.json", "two.json"]);
    let outcome = h.pipeline.process_source(&mut source).await;

    assert_eq!(outcome, SourceOutcome::Completed);
    assert!(outcome.should_delete());
    assert_eq!(outcome.delete_state(), ProgressState::DeleteMessage);

    let names: Vec<_> = h
        .processor
        .records()
        .iter()
        .map(|client| client.record.event_name().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["A", "B", "C", "D"]);
    assert_eq!(h.exceptions.len(), 0);

    assert!(source.log_files.iter().all(|log| log.size.is_some()));
}

#[tokio::test]
async fn test_stage_brackets_nest_in_order() {
    let store = MemoryStore::default().with_object("trail", "one.json", &three_records());
    let h = harness(store, CollectingProcessor::default(), PipelineOptions::default());

    let mut source = source(&["one.json"]);
    h.pipeline.process_source(&mut source).await;

    assert_eq!(
        stages(&h.progress),
        vec![
            ProgressEvent::Start(ProgressState::ProcessSource, 0),
            ProgressEvent::Start(ProgressState::DownloadLog, 1),
            ProgressEvent::End(ProgressState::DownloadLog, 1, true),
            ProgressEvent::Start(ProgressState::ProcessLog, 2),
            ProgressEvent::End(ProgressState::ProcessLog, 2, true),
            ProgressEvent::End(ProgressState::ProcessSource, 0, true),
        ]
    );
}

#[tokio::test]
async fn test_records_are_batched() {
    let store = MemoryStore::default().with_object("trail", "one.json", &three_records());
    let options = PipelineOptions {
        max_records_per_batch: 2,
        ..PipelineOptions::default()
    };
    let h = harness(store, CollectingProcessor::default(), options);

    h.pipeline.process_source(&mut source(&["one.json"])).await;

    assert_eq!(h.processor.batch_sizes(), vec![2, 1]);
}

#[tokio::test]
async fn test_delivery_info_points_at_log_file() {
    let store = MemoryStore::default().with_object("trail", "one.json", &three_records());
    let h = harness(store, CollectingProcessor::default(), PipelineOptions::default());

    h.pipeline.process_source(&mut source(&["one.json"])).await;

    for client in h.processor.records() {
        let location = client.delivery.location.unwrap();
        assert_eq!(location.bucket, "trail");
        assert_eq!(location.object_key, "one.json");
        assert!(client.delivery.raw_record.is_none());
    }
}

#[tokio::test]
async fn test_raw_records_option_attaches_text() {
    let raw = r#"{"eventName":"A","custom":{"x":1}}"#;
    let store = MemoryStore::default().with_object("trail", "one.json", &log_body(&[raw]));
    let options = PipelineOptions {
        raw_records: true,
        ..PipelineOptions::default()
    };
    let h = harness(store, CollectingProcessor::default(), options);

    h.pipeline.process_source(&mut source(&["one.json"])).await;

    let records = h.processor.records();
    assert_eq!(records[0].delivery.raw_record.as_deref(), Some(raw));
}

// ============================================================================
// Filtering
// ============================================================================

#[tokio::test]
async fn test_filtered_source_skips_download() {
    let store = MemoryStore::default().with_object("trail", "one.json", &three_records());
    let h = harness(store, CollectingProcessor::default(), PipelineOptions::default());

    let reject: Arc<dyn SourceFilter> =
        Arc::new(|_source: &Source| -> Result<bool, CallbackError> { Ok(false) });
    let pipeline = h.pipeline.with_filter(reject);

    let outcome = pipeline.process_source(&mut source(&["one.json"])).await;

    assert_eq!(outcome, SourceOutcome::Filtered);
    assert!(outcome.should_delete());
    assert_eq!(outcome.delete_state(), ProgressState::DeleteFilteredMessage);
    assert!(h.processor.records().is_empty());
    assert_eq!(
        stages(&h.progress),
        vec![
            ProgressEvent::Start(ProgressState::ProcessSource, 0),
            ProgressEvent::End(ProgressState::ProcessSource, 0, true),
        ]
    );
}

#[tokio::test]
async fn test_filter_error_is_routed() {
    let h = harness(MemoryStore::default(), CollectingProcessor::default(), PipelineOptions::default());

    let broken: Arc<dyn SourceFilter> = Arc::new(|_source: &Source| -> Result<bool, CallbackError> {
        Err(CallbackError::new("filter exploded"))
    });
    let pipeline = h.pipeline.with_filter(broken);

    let outcome = pipeline.process_source(&mut source(&["one.json"])).await;

    assert_eq!(outcome, SourceOutcome::Incomplete);
    assert!(!outcome.should_delete());
    assert_eq!(h.exceptions.messages(), vec!["Source filter failed."]);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_missing_file_leaves_source_incomplete() {
    let store = MemoryStore::default().with_object("trail", "one.json", &three_records());
    let h = harness(store, CollectingProcessor::default(), PipelineOptions::default());

    let outcome = h
        .pipeline
        .process_source(&mut source(&["missing.json", "one.json"]))
        .await;

    assert_eq!(outcome, SourceOutcome::Incomplete);
    assert_eq!(h.processor.records().len(), 3);
    assert_eq!(h.exceptions.messages(), vec!["Failed to download log file."]);

    let ended: Vec<ProgressStatus> = h.progress.ended();
    let source_end = ended.last().unwrap();
    assert_eq!(source_end.state, ProgressState::ProcessSource);
    assert!(!source_end.is_success());
}

#[tokio::test]
async fn test_bad_record_is_skipped_by_default() {
    let good = record("22222222-2222-2222-2222-222222222222", "Good");
    let body = log_body(&[r#"{"eventID":"nope","eventName":"Bad"}"#, &good]);
    let store = MemoryStore::default().with_object("trail", "one.json", &body);
    let h = harness(store, CollectingProcessor::default(), PipelineOptions::default());

    let outcome = h.pipeline.process_source(&mut source(&["one.json"])).await;

    assert_eq!(outcome, SourceOutcome::Completed);
    assert_eq!(h.processor.records().len(), 1);

    let errors = h.exceptions.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message().starts_with("Failed to decode record at bytes 12.."));
    assert_eq!(errors[0].status().state, ProgressState::ProcessLog);
    assert!(matches!(
        errors[0].decode_error(),
        Some(DecodeError::Field { .. })
    ));
}

#[tokio::test]
async fn test_bad_record_aborts_file_when_configured() {
    let good = record("22222222-2222-2222-2222-222222222222", "Good");
    let body = log_body(&[&good, r#"{"eventTime":"never"}"#, &good]);
    let store = MemoryStore::default().with_object("trail", "one.json", &body);
    let options = PipelineOptions {
        record_error_policy: RecordErrorPolicy::Abort,
        ..PipelineOptions::default()
    };
    let h = harness(store, CollectingProcessor::default(), options);

    let outcome = h.pipeline.process_source(&mut source(&["one.json"])).await;

    assert_eq!(outcome, SourceOutcome::Incomplete);
    // the partial batch is dropped with the file
    assert!(h.processor.records().is_empty());
    assert_eq!(h.exceptions.len(), 1);
}

#[tokio::test]
async fn test_not_a_cloudtrail_log() {
    let store = MemoryStore::default().with_object("trail", "one.json", r#"{"Events":[]}"#);
    let h = harness(store, CollectingProcessor::default(), PipelineOptions::default());

    let outcome = h.pipeline.process_source(&mut source(&["one.json"])).await;

    assert_eq!(outcome, SourceOutcome::Incomplete);
    assert_eq!(h.exceptions.messages(), vec!["Log file is not a CloudTrail log."]);
    let errors = h.exceptions.errors.lock().unwrap();
    assert!(matches!(
        errors[0].decode_error(),
        Some(DecodeError::Format { .. })
    ));
}

#[tokio::test]
async fn test_processor_failure_fails_the_file() {
    let store = MemoryStore::default().with_object("trail", "one.json", &three_records());
    let h = harness(store, CollectingProcessor::failing(), PipelineOptions::default());

    let outcome = h.pipeline.process_source(&mut source(&["one.json"])).await;

    assert_eq!(outcome, SourceOutcome::Incomplete);
    assert_eq!(h.exceptions.messages(), vec!["Records processor failed."]);
    assert_eq!(
        stages(&h.progress)[4],
        ProgressEvent::End(ProgressState::ProcessLog, 2, false)
    );
}

// ============================================================================
// Blocking work
// ============================================================================

#[derive(Default)]
struct ThreadRecordingProcessor {
    threads: Mutex<Vec<ThreadId>>,
    panic: bool,
}

impl RecordsProcessor for ThreadRecordingProcessor {
    fn process_records(
        &self,
        _records: Vec<ClientRecord>,
        _source: &Source,
        _log: &LogFile,
    ) -> Result<(), CallbackError> {
        if self.panic {
            panic!("processor bug");
        }
        self.threads.lock().unwrap().push(thread::current().id());
        Ok(())
    }
}

fn thread_pipeline(
    processor: Arc<ThreadRecordingProcessor>,
) -> (SourcePipeline<MemoryStore, RecordingProgress>, Arc<RecordingExceptions>) {
    let store = MemoryStore::default().with_object("trail", "one.json", &three_records());
    let exceptions = Arc::new(RecordingExceptions::default());
    let handler: Arc<dyn ExceptionHandler> = exceptions.clone();
    let fetcher = LogFetcher::new(store, Arc::new(RecordingProgress::default()), handler);
    (SourcePipeline::new(fetcher, processor), exceptions)
}

#[tokio::test]
async fn test_processor_runs_off_the_runtime_thread() {
    let processor = Arc::new(ThreadRecordingProcessor::default());
    let (pipeline, exceptions) = thread_pipeline(processor.clone());

    let outcome = pipeline.process_source(&mut source(&["one.json"])).await;

    assert_eq!(outcome, SourceOutcome::Completed);
    assert!(exceptions.messages().is_empty());
    let threads = processor.threads.lock().unwrap();
    assert_eq!(threads.len(), 1);
    assert_ne!(threads[0], thread::current().id());
}

#[tokio::test]
async fn test_processor_panic_fails_the_file() {
    let processor = Arc::new(ThreadRecordingProcessor {
        panic: true,
        ..Default::default()
    });
    let (pipeline, exceptions) = thread_pipeline(processor);

    let outcome = pipeline.process_source(&mut source(&["one.json"])).await;

    assert_eq!(outcome, SourceOutcome::Incomplete);
    assert_eq!(exceptions.messages(), vec!["Log processing task failed."]);
}

// ============================================================================
// Options
// ============================================================================

#[test]
fn test_record_error_policy_from_str() {
    assert_eq!("skip".parse::<RecordErrorPolicy>().unwrap(), RecordErrorPolicy::Skip);
    assert_eq!(" ABORT ".parse::<RecordErrorPolicy>().unwrap(), RecordErrorPolicy::Abort);
    assert!("retry".parse::<RecordErrorPolicy>().is_err());
}

#[test]
fn test_default_options() {
    let options = PipelineOptions::default();
    assert_eq!(options.max_records_per_batch, 100);
    assert_eq!(options.record_error_policy, RecordErrorPolicy::Skip);
    assert!(!options.raw_records);
}
