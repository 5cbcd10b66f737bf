use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One CloudTrail log file announced by a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogFile {
    pub bucket: String,
    pub object_key: String,
    // filled in after a successful download
    pub size: Option<u64>,
}

impl LogFile {
    pub fn new(bucket: impl Into<String>, object_key: impl Into<String>) -> Self {
        LogFile {
            bucket: bucket.into(),
            object_key: object_key.into(),
            size: None,
        }
    }
}

/// A queue notification and the log files it announces.
///
/// The receipt handle is only carried through so the poller can acknowledge the
/// message once the files are processed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Source {
    pub log_files: Vec<LogFile>,
    pub receipt_handle: String,
    pub message_id: Option<String>,
    pub attributes: HashMap<String, String>,
}

impl Source {
    pub fn new(receipt_handle: impl Into<String>, log_files: Vec<LogFile>) -> Self {
        Source {
            log_files,
            receipt_handle: receipt_handle.into(),
            ..Default::default()
        }
    }
}

/// Attribute maps keep every value as raw text, `None` for JSON null.
pub type Attributes = HashMap<String, Option<String>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    String(String),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Id(Uuid),
    UserIdentity(Box<UserIdentity>),
    SessionContext(Box<SessionContext>),
    SessionIssuer(SessionIssuer),
    WebIdentity(WebIdentitySessionContext),
    Attributes(Attributes),
    Resources(Vec<Resource>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(value) => Some(value),
            _ => None,
        }
    }
}

impl From<Option<String>> for FieldValue {
    fn from(value: Option<String>) -> Self {
        value.map(FieldValue::String).unwrap_or(FieldValue::Null)
    }
}

/// Name-to-value bag shared by records and every nested structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Fields(HashMap<String, FieldValue>);

impl Fields {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.0.insert(name.into(), value);
    }
}

/// A decoded audit record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record {
    fields: Fields,
}

impl Record {
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn event_version(&self) -> Option<&str> {
        self.fields.get_str("eventVersion")
    }

    pub fn event_name(&self) -> Option<&str> {
        self.fields.get_str("eventName")
    }

    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        match self.fields.get("eventTime") {
            Some(FieldValue::Timestamp(time)) => Some(*time),
            _ => None,
        }
    }

    pub fn event_id(&self) -> Option<Uuid> {
        self.id_field("eventID")
    }

    pub fn request_id(&self) -> Option<Uuid> {
        self.id_field("requestID")
    }

    pub fn account_id(&self) -> Option<&str> {
        self.fields.get_str("accountId")
    }

    pub fn user_identity(&self) -> Option<&UserIdentity> {
        match self.fields.get("userIdentity") {
            Some(FieldValue::UserIdentity(identity)) => Some(identity.as_ref()),
            _ => None,
        }
    }

    /// `None` when the field is absent, `Some(None)` for an explicit JSON null.
    pub fn read_only(&self) -> Option<Option<bool>> {
        match self.fields.get("readOnly")? {
            FieldValue::Bool(value) => Some(Some(*value)),
            _ => Some(None),
        }
    }

    /// `None` when the field is absent, `Some(None)` for an explicit JSON null.
    pub fn resources(&self) -> Option<Option<&[Resource]>> {
        match self.fields.get("resources")? {
            FieldValue::Resources(resources) => Some(Some(resources.as_slice())),
            _ => Some(None),
        }
    }

    fn id_field(&self, name: &str) -> Option<Uuid> {
        match self.fields.get(name) {
            Some(FieldValue::Id(id)) => Some(*id),
            _ => None,
        }
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name, value);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct UserIdentity {
    fields: Fields,
}

impl UserIdentity {
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn identity_type(&self) -> Option<&str> {
        self.fields.get_str("type")
    }

    pub fn principal_id(&self) -> Option<&str> {
        self.fields.get_str("principalId")
    }

    pub fn arn(&self) -> Option<&str> {
        self.fields.get_str("arn")
    }

    pub fn account_id(&self) -> Option<&str> {
        self.fields.get_str("accountId")
    }

    pub fn access_key_id(&self) -> Option<&str> {
        self.fields.get_str("accessKeyId")
    }

    pub fn user_name(&self) -> Option<&str> {
        self.fields.get_str("userName")
    }

    pub fn invoked_by(&self) -> Option<&str> {
        self.fields.get_str("invokedBy")
    }

    pub fn session_context(&self) -> Option<&SessionContext> {
        match self.fields.get("sessionContext") {
            Some(FieldValue::SessionContext(context)) => Some(context.as_ref()),
            _ => None,
        }
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name, value);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SessionContext {
    fields: Fields,
}

impl SessionContext {
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        match self.fields.get("attributes") {
            Some(FieldValue::Attributes(attributes)) => Some(attributes),
            _ => None,
        }
    }

    pub fn session_issuer(&self) -> Option<&SessionIssuer> {
        match self.fields.get("sessionIssuer") {
            Some(FieldValue::SessionIssuer(issuer)) => Some(issuer),
            _ => None,
        }
    }

    pub fn web_id_federation_data(&self) -> Option<&WebIdentitySessionContext> {
        match self.fields.get("webIdFederationData") {
            Some(FieldValue::WebIdentity(federation)) => Some(federation),
            _ => None,
        }
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name, value);
    }
}

/// Identity that granted a role or federated session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SessionIssuer {
    fields: Fields,
}

impl SessionIssuer {
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn issuer_type(&self) -> Option<&str> {
        self.fields.get_str("type")
    }

    pub fn principal_id(&self) -> Option<&str> {
        self.fields.get_str("principalId")
    }

    pub fn arn(&self) -> Option<&str> {
        self.fields.get_str("arn")
    }

    pub fn account_id(&self) -> Option<&str> {
        self.fields.get_str("accountId")
    }

    pub fn user_name(&self) -> Option<&str> {
        self.fields.get_str("userName")
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name, value);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct WebIdentitySessionContext {
    fields: Fields,
}

impl WebIdentitySessionContext {
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        match self.fields.get("attributes") {
            Some(FieldValue::Attributes(attributes)) => Some(attributes),
            _ => None,
        }
    }

    pub fn federated_provider(&self) -> Option<&str> {
        self.fields.get_str("federatedProvider")
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name, value);
    }
}

/// Resource entries have no fixed schema, every field is kept as raw text.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Resource {
    fields: Fields,
}

impl Resource {
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get_str(name)
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name, value);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLocation {
    pub bucket: String,
    pub object_key: String,
}

impl From<&LogFile> for LogLocation {
    fn from(log: &LogFile) -> Self {
        LogLocation {
            bucket: log.bucket.clone(),
            object_key: log.object_key.clone(),
        }
    }
}

/// Where a record sits inside its log file.
///
/// `char_start..char_end` is a byte range over the file content that covers the
/// record's JSON object, braces included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryInfo {
    pub char_start: u64,
    pub char_end: u64,
    pub location: Option<LogLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_record: Option<String>,
}

/// A decoded record paired with its delivery metadata, the unit handed downstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientRecord {
    pub record: Record,
    pub delivery: DeliveryInfo,
}
