//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use cloudtrail_ingest::callbacks::{CallbackError, RecordsProcessor};
use cloudtrail_ingest::decoder::DecodeDiagnostics;
use cloudtrail_ingest::exception::{ExceptionHandler, ProcessingError};
use cloudtrail_ingest::fetch::{ObjectStore, StorageError};
use cloudtrail_ingest::model::{ClientRecord, LogFile, Source};
use cloudtrail_ingest::progress::{ProgressReporter, ProgressState, ProgressStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Start(ProgressState, u64),
    End(ProgressState, u64, bool),
}

#[derive(Default)]
pub struct RecordingProgress {
    next_token: AtomicU64,
    pub events: Mutex<Vec<ProgressEvent>>,
    pub ended: Mutex<Vec<ProgressStatus>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn ended(&self) -> Vec<ProgressStatus> {
        self.ended.lock().unwrap().clone()
    }
}

impl ProgressReporter for RecordingProgress {
    type Token = u64;

    fn report_start(&self, status: &ProgressStatus) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap()
            .push(ProgressEvent::Start(status.state, token));
        token
    }

    fn report_end(&self, status: &ProgressStatus, token: u64) {
        self.events
            .lock()
            .unwrap()
            .push(ProgressEvent::End(status.state, token, status.is_success()));
        self.ended.lock().unwrap().push(status.clone());
    }
}

#[derive(Default)]
pub struct RecordingExceptions {
    pub errors: Mutex<Vec<ProcessingError>>,
}

impl RecordingExceptions {
    pub fn messages(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap()
            .iter()
            .map(|err| err.message().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.errors.lock().unwrap().len()
    }
}

impl ExceptionHandler for RecordingExceptions {
    fn handle_exception(&self, error: ProcessingError) {
        self.errors.lock().unwrap().push(error);
    }
}

#[derive(Default)]
pub struct MemoryStore {
    objects: HashMap<(String, String), Bytes>,
}

impl MemoryStore {
    pub fn with_object(mut self, bucket: &str, key: &str, content: &str) -> Self {
        self.objects.insert(
            (bucket.to_string(), key.to_string()),
            Bytes::copy_from_slice(content.as_bytes()),
        );
        self
    }
}

impl ObjectStore for MemoryStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| {
                StorageError::Service(Box::new(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("NoSuchKey: {bucket}/{key}"),
                )))
            })
    }
}

#[derive(Default)]
pub struct CollectingProcessor {
    pub batches: Mutex<Vec<(String, Vec<ClientRecord>)>>,
    pub fail: bool,
}

impl CollectingProcessor {
    pub fn failing() -> Self {
        CollectingProcessor {
            fail: true,
            ..Default::default()
        }
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .map(|(_, records)| records.len())
            .collect()
    }

    pub fn records(&self) -> Vec<ClientRecord> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, records)| records.clone())
            .collect()
    }
}

impl RecordsProcessor for CollectingProcessor {
    fn process_records(
        &self,
        records: Vec<ClientRecord>,
        _source: &Source,
        log: &LogFile,
    ) -> Result<(), CallbackError> {
        if self.fail {
            return Err(CallbackError::new("downstream unavailable"));
        }
        self.batches
            .lock()
            .unwrap()
            .push((log.object_key.clone(), records));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingDiagnostics {
    pub versions: Mutex<Vec<String>>,
}

impl DecodeDiagnostics for RecordingDiagnostics {
    fn unsupported_version(&self, version: &str) {
        self.versions.lock().unwrap().push(version.to_string());
    }
}

/// A log file body holding the given record objects.
pub fn log_body(records: &[&str]) -> String {
    format!("{{\"Records\":[{}]}}", records.join(","))
}

pub fn record(event_id: &str, event_name: &str) -> String {
    format!(
        r#"{{"eventVersion":"1.02","eventTime":"2014-01-01T00:00:00Z","eventID":"{event_id}","eventName":"{event_name}"}}"#
    )
}
