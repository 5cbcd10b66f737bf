//! Fetches CloudTrail log files announced on a queue and decodes them into
//! typed audit records.

pub mod callbacks;
pub mod config;
pub mod decoder;
pub mod exception;
pub mod fetch;
pub mod fields;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod source;
pub mod sqs;
