//! Turning queue messages into Sources.

use std::collections::HashMap;

use aws_sdk_sqs::types::Message;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::model::{LogFile, Source};

#[derive(Debug, Error)]
pub enum SourceParseError {
    #[error("message has no body")]
    MissingBody,

    #[error("message has no receipt handle")]
    MissingReceiptHandle,

    #[error("message body is not a CloudTrail notification: {0}")]
    InvalidNotification(#[from] serde_json::Error),

    #[error("notification for bucket {0} lists no log files")]
    NoLogFiles(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloudTrailNotification {
    s3_bucket: String,
    s3_object_key: Vec<String>,
}

/// Log files announced by a notification body.
///
/// The body is either an SNS envelope whose `Message` holds the notification
/// as a JSON string, or the notification itself when raw delivery is enabled
/// on the subscription.
pub fn parse_notification(body: &str) -> Result<Vec<LogFile>, SourceParseError> {
    let value: Value = serde_json::from_str(body)?;

    let notification: CloudTrailNotification = match value.get("Message").and_then(Value::as_str) {
        Some(message) => serde_json::from_str(message)?,
        None => serde_json::from_value(value)?,
    };

    if notification.s3_object_key.is_empty() {
        return Err(SourceParseError::NoLogFiles(notification.s3_bucket));
    }

    let bucket = notification.s3_bucket;
    Ok(notification
        .s3_object_key
        .into_iter()
        .map(|key| LogFile::new(bucket.clone(), key))
        .collect())
}

pub fn parse_source(message: &Message) -> Result<Source, SourceParseError> {
    let body = message.body().ok_or(SourceParseError::MissingBody)?;
    let receipt_handle = message
        .receipt_handle()
        .ok_or(SourceParseError::MissingReceiptHandle)?;

    let log_files = parse_notification(body)?;

    let attributes: HashMap<String, String> = message
        .attributes()
        .map(|attributes| {
            attributes
                .iter()
                .map(|(name, value)| (name.as_str().to_string(), value.clone()))
                .collect()
        })
        .unwrap_or_default();

    Ok(Source {
        log_files,
        receipt_handle: receipt_handle.to_string(),
        message_id: message.message_id().map(str::to_owned),
        attributes,
    })
}
