//! Strategies that turn a record's byte range into delivery metadata.

use bytes::Bytes;

use crate::model::{DeliveryInfo, LogFile, LogLocation};

pub trait DeliveryInfoProvider {
    fn delivery_info(&self, char_start: u64, char_end: u64) -> DeliveryInfo;
}

impl<T: DeliveryInfoProvider + ?Sized> DeliveryInfoProvider for Box<T> {
    fn delivery_info(&self, char_start: u64, char_end: u64) -> DeliveryInfo {
        (**self).delivery_info(char_start, char_end)
    }
}

/// Offsets with no file identity attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct OffsetsOnly;

impl DeliveryInfoProvider for OffsetsOnly {
    fn delivery_info(&self, char_start: u64, char_end: u64) -> DeliveryInfo {
        DeliveryInfo {
            char_start,
            char_end,
            location: None,
            raw_record: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogFileDelivery {
    location: LogLocation,
}

impl LogFileDelivery {
    pub fn new(log: &LogFile) -> Self {
        LogFileDelivery {
            location: LogLocation::from(log),
        }
    }
}

impl DeliveryInfoProvider for LogFileDelivery {
    fn delivery_info(&self, char_start: u64, char_end: u64) -> DeliveryInfo {
        DeliveryInfo {
            char_start,
            char_end,
            location: Some(self.location.clone()),
            raw_record: None,
        }
    }
}

/// Attaches the record's original JSON text, sliced out of the fetched file.
#[derive(Debug, Clone)]
pub struct RawRecordDelivery {
    location: LogLocation,
    content: Bytes,
}

impl RawRecordDelivery {
    pub fn new(log: &LogFile, content: Bytes) -> Self {
        RawRecordDelivery {
            location: LogLocation::from(log),
            content,
        }
    }

    fn slice(&self, char_start: u64, char_end: u64) -> Option<String> {
        let start = usize::try_from(char_start).ok()?;
        let end = usize::try_from(char_end).ok()?;
        let raw = self.content.get(start..end)?;
        Some(String::from_utf8_lossy(raw).into_owned())
    }
}

impl DeliveryInfoProvider for RawRecordDelivery {
    fn delivery_info(&self, char_start: u64, char_end: u64) -> DeliveryInfo {
        DeliveryInfo {
            char_start,
            char_end,
            location: Some(self.location.clone()),
            raw_record: self.slice(char_start, char_end),
        }
    }
}
