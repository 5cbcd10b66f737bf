//! Progress reporting around each processing stage.
//!
//! Every stage is bracketed: `report_start` hands back a token that the caller
//! passes unchanged to `report_end`. Reporters are observers only and cannot
//! change what the pipeline does.

use std::fmt;
use std::time::Instant;

use serde::Serialize;

use crate::model::{LogFile, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressState {
    Poll,
    DeleteMessage,
    DeleteFilteredMessage,
    ParseMessage,
    ProcessSource,
    DownloadLog,
    ProcessLog,
    UncaughtException,
}

impl ProgressState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressState::Poll => "poll",
            ProgressState::DeleteMessage => "delete-message",
            ProgressState::DeleteFilteredMessage => "delete-filtered-message",
            ProgressState::ParseMessage => "parse-message",
            ProgressState::ProcessSource => "process-source",
            ProgressState::DownloadLog => "download-log",
            ProgressState::ProcessLog => "process-log",
            ProgressState::UncaughtException => "uncaught-exception",
        }
    }
}

impl fmt::Display for ProgressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage-specific context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProgressInfo {
    Basic {
        success: bool,
    },
    Source {
        source: Box<Source>,
        success: bool,
    },
    Log {
        source: Box<Source>,
        log: LogFile,
        success: bool,
    },
    Exception {
        message: String,
    },
}

impl ProgressInfo {
    pub fn is_success(&self) -> bool {
        match self {
            ProgressInfo::Basic { success }
            | ProgressInfo::Source { success, .. }
            | ProgressInfo::Log { success, .. } => *success,
            ProgressInfo::Exception { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressStatus {
    pub state: ProgressState,
    pub info: ProgressInfo,
}

impl ProgressStatus {
    pub fn basic(state: ProgressState) -> Self {
        ProgressStatus {
            state,
            info: ProgressInfo::Basic { success: false },
        }
    }

    pub fn for_source(state: ProgressState, source: &Source) -> Self {
        ProgressStatus {
            state,
            info: ProgressInfo::Source {
                source: Box::new(source.clone()),
                success: false,
            },
        }
    }

    pub fn for_log(state: ProgressState, source: &Source, log: &LogFile) -> Self {
        ProgressStatus {
            state,
            info: ProgressInfo::Log {
                source: Box::new(source.clone()),
                log: log.clone(),
                success: false,
            },
        }
    }

    pub fn exception(message: impl Into<String>) -> Self {
        ProgressStatus {
            state: ProgressState::UncaughtException,
            info: ProgressInfo::Exception {
                message: message.into(),
            },
        }
    }

    /// Copy of this status with the success flag replaced. Exception statuses
    /// carry no flag and come back unchanged.
    pub fn with_success(&self, success: bool) -> Self {
        let mut status = self.clone();
        match &mut status.info {
            ProgressInfo::Basic { success: flag }
            | ProgressInfo::Source { success: flag, .. }
            | ProgressInfo::Log { success: flag, .. } => *flag = success,
            ProgressInfo::Exception { .. } => {}
        }
        status
    }

    pub fn is_success(&self) -> bool {
        self.info.is_success()
    }

    pub fn source(&self) -> Option<&Source> {
        match &self.info {
            ProgressInfo::Source { source, .. } | ProgressInfo::Log { source, .. } => {
                Some(source.as_ref())
            }
            _ => None,
        }
    }

    pub fn log(&self) -> Option<&LogFile> {
        match &self.info {
            ProgressInfo::Log { log, .. } => Some(log),
            _ => None,
        }
    }
}

pub trait ProgressReporter: Send + Sync {
    /// Opaque correlation value handed back to `report_end`.
    type Token: Send;

    fn report_start(&self, status: &ProgressStatus) -> Self::Token;

    fn report_end(&self, status: &ProgressStatus, token: Self::Token);
}

/// Logs every stage with its duration at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingProgressReporter;

impl ProgressReporter for LoggingProgressReporter {
    type Token = Instant;

    fn report_start(&self, status: &ProgressStatus) -> Instant {
        tracing::debug!("Starting {}", status.state);
        Instant::now()
    }

    fn report_end(&self, status: &ProgressStatus, started: Instant) {
        tracing::debug!(
            "Finished {} in {:?} (success: {})",
            status.state,
            started.elapsed(),
            status.is_success()
        );
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgressReporter;

impl ProgressReporter for NoopProgressReporter {
    type Token = ();

    fn report_start(&self, _status: &ProgressStatus) {}

    fn report_end(&self, _status: &ProgressStatus, _token: ()) {}
}
