//! Queue polling and acknowledgement.

use std::sync::Arc;

use aws_sdk_sqs::Client;
use aws_sdk_sqs::types::{Message, MessageSystemAttributeName};

use crate::config::Config;
use crate::exception::{ExceptionHandler, ProcessingError};
use crate::model::Source;
use crate::progress::{ProgressReporter, ProgressState, ProgressStatus};
use crate::source::parse_source;

pub struct SqsManager<P> {
    client: Client,
    queue_url: String,
    max_messages: i32,
    visibility_timeout_secs: i32,
    progress: Arc<P>,
    exceptions: Arc<dyn ExceptionHandler>,
}

impl<P: ProgressReporter> SqsManager<P> {
    pub fn new(
        client: Client,
        config: &Config,
        progress: Arc<P>,
        exceptions: Arc<dyn ExceptionHandler>,
    ) -> Self {
        SqsManager {
            client,
            queue_url: config.queue_url.clone(),
            max_messages: config.max_messages,
            visibility_timeout_secs: config.visibility_timeout_secs,
            progress,
            exceptions,
        }
    }

    /// Receive up to the configured number of messages. Errors are routed to
    /// the exception handler and yield an empty batch.
    pub async fn poll_queue(&self) -> Vec<Message> {
        let status = ProgressStatus::basic(ProgressState::Poll);
        let token = self.progress.report_start(&status);

        let result = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(self.max_messages)
            .visibility_timeout(self.visibility_timeout_secs)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .send()
            .await;

        match result {
            Ok(output) => {
                let messages = output.messages.unwrap_or_default();
                tracing::debug!("Received {} messages", messages.len());
                self.progress.report_end(&status.with_success(true), token);
                messages
            }
            Err(err) => {
                self.exceptions.handle_exception(
                    ProcessingError::new("Failed to poll queue.", status.clone())
                        .with_cause(aws_sdk_sqs::Error::from(err)),
                );
                self.progress.report_end(&status, token);
                Vec::new()
            }
        }
    }

    /// Messages that cannot be parsed are reported and stay on the queue.
    pub fn parse_messages(&self, messages: Vec<Message>) -> Vec<Source> {
        let mut sources = Vec::with_capacity(messages.len());

        for message in messages {
            let status = ProgressStatus::basic(ProgressState::ParseMessage);
            let token = self.progress.report_start(&status);

            match parse_source(&message) {
                Ok(source) => {
                    sources.push(source);
                    self.progress.report_end(&status.with_success(true), token);
                }
                Err(err) => {
                    tracing::warn!(
                        "Skipping message {}",
                        message.message_id().unwrap_or("<no id>")
                    );
                    self.exceptions.handle_exception(
                        ProcessingError::new("Failed to parse message.", status.clone())
                            .with_cause(err),
                    );
                    self.progress.report_end(&status, token);
                }
            }
        }

        sources
    }

    pub async fn delete_message(&self, source: &Source, state: ProgressState) -> bool {
        let status = ProgressStatus::for_source(state, source);
        let token = self.progress.report_start(&status);

        let result = self
            .client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(&source.receipt_handle)
            .send()
            .await;

        match result {
            Ok(_) => {
                tracing::info!("Message deleted successfully");
                self.progress.report_end(&status.with_success(true), token);
                true
            }
            Err(err) => {
                self.exceptions.handle_exception(
                    ProcessingError::new("Failed to delete message.", status.clone())
                        .with_cause(aws_sdk_sqs::Error::from(err)),
                );
                self.progress.report_end(&status, token);
                false
            }
        }
    }
}
