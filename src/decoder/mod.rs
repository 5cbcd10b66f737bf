//! Streaming decoder for CloudTrail log files.
//!
//! A log file is a single JSON object whose `Records` field holds an array of
//! audit records. [`RecordDecoder`] walks that document one token at a time and
//! hands back one [`ClientRecord`] per array element, never holding more than
//! the record being decoded.
//!
//! # Usage
//!
//! ```ignore
//! let mut decoder = RecordDecoder::from_bytes(content, LogFileDelivery::new(&log));
//! decoder.read_header()?;
//! while decoder.has_next()? {
//!     match decoder.next_record() {
//!         Ok(record) => handle(record),
//!         Err(err) if !err.is_fatal() => report(err),
//!         Err(err) => return Err(err),
//!     }
//! }
//! decoder.close();
//! ```
//!
//! Known fields decode into typed values (timestamps, identifiers, nested
//! identity structures). Every other field is kept as its raw JSON text, so
//! fields added by newer log producers survive decoding unchanged.

pub mod delivery;
pub mod error;
pub mod token;

use std::io::BufRead;
use std::sync::Arc;

use bytes::buf::Reader;
use bytes::{Buf, Bytes};
use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

pub use delivery::{DeliveryInfoProvider, LogFileDelivery, OffsetsOnly, RawRecordDelivery};
pub use error::{DecodeError, FieldError};
use token::{Token, TokenReader};

use crate::fields::{FieldScope, KnownField};
use crate::model::{
    Attributes, ClientRecord, FieldValue, Record, Resource, SessionContext, SessionIssuer,
    UserIdentity, WebIdentitySessionContext,
};

pub const RECORDS_KEY: &str = "Records";

/// Newest `eventVersion` whose field set this decoder was written against.
pub const SUPPORTED_EVENT_VERSION: f64 = 1.02;

pub const EVENT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

// 8-4-4-4-12; simple, braced and urn forms are rejected
const HYPHENATED_ID_LEN: usize = 36;

/// Non-fatal observations made while decoding.
pub trait DecodeDiagnostics: Send + Sync {
    fn unsupported_version(&self, version: &str);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl DecodeDiagnostics for TracingDiagnostics {
    fn unsupported_version(&self, version: &str) {
        tracing::warn!(
            "eventVersion {} is newer than supported version {}, decoding with the known field set",
            version,
            SUPPORTED_EVENT_VERSION
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Unopened,
    HeaderConsumed,
    RecordsAvailable,
    RecordsExhausted,
    Failed,
    Closed,
}

// Field failures carry no offsets yet; the record boundary adds them.
enum Failure {
    Field { field: String, source: FieldError },
    Fatal(DecodeError),
}

impl Failure {
    fn field(field: &str, source: FieldError) -> Self {
        Failure::Field {
            field: field.to_string(),
            source,
        }
    }

    fn unexpected(field: &str, expected: &'static str, found: &Token) -> Self {
        Failure::field(
            field,
            FieldError::UnexpectedValue {
                expected,
                found: found.describe(),
            },
        )
    }

    fn within(self, parent: &str) -> Self {
        match self {
            Failure::Field { field, source } if field.is_empty() => Failure::Field {
                field: parent.to_string(),
                source,
            },
            Failure::Field { field, source } => Failure::Field {
                field: format!("{parent}.{field}"),
                source,
            },
            fatal => fatal,
        }
    }
}

impl From<DecodeError> for Failure {
    fn from(err: DecodeError) -> Self {
        Failure::Fatal(err)
    }
}

type Step<T> = Result<T, Failure>;

/// Pull-based decoder over one log file.
///
/// Not shareable between threads while decoding; run one decoder per file.
pub struct RecordDecoder<R, D> {
    tokens: Option<TokenReader<R>>,
    delivery: D,
    diagnostics: Arc<dyn DecodeDiagnostics>,
    state: DecoderState,
    record_start: u64,
    record_depth: usize,
    record_is_array: bool,
}

impl<D: DeliveryInfoProvider> RecordDecoder<Reader<Bytes>, D> {
    pub fn from_bytes(content: Bytes, delivery: D) -> Self {
        RecordDecoder::new(content.reader(), delivery)
    }
}

impl<R: BufRead, D: DeliveryInfoProvider> RecordDecoder<R, D> {
    pub fn new(reader: R, delivery: D) -> Self {
        RecordDecoder {
            tokens: Some(TokenReader::new(reader)),
            delivery,
            diagnostics: Arc::new(TracingDiagnostics),
            state: DecoderState::Unopened,
            record_start: 0,
            record_depth: 0,
            record_is_array: false,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DecodeDiagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Bytes consumed from the underlying reader so far.
    pub fn offset(&self) -> u64 {
        self.tokens.as_ref().map_or(0, |tokens| tokens.offset())
    }

    /// Consume `{"Records": [`. Anything else means the file is not a CloudTrail log.
    pub fn read_header(&mut self) -> Result<(), DecodeError> {
        match self.state {
            DecoderState::Unopened => {}
            DecoderState::Closed => return Err(DecodeError::Closed),
            _ => return Ok(()),
        }

        match self.expect_header() {
            Ok(()) => {
                self.state = DecoderState::HeaderConsumed;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Advance to the next record. Consumes the record's opening token, so call
    /// it once per record; repeated calls before [`RecordDecoder::next_record`]
    /// keep answering `true` without reading further.
    pub fn has_next(&mut self) -> Result<bool, DecodeError> {
        match self.state {
            DecoderState::Unopened => self.read_header()?,
            DecoderState::HeaderConsumed => {}
            DecoderState::RecordsAvailable => return Ok(true),
            DecoderState::RecordsExhausted | DecoderState::Failed => return Ok(false),
            DecoderState::Closed => return Err(DecodeError::Closed),
        }

        match self.advance_to_record() {
            Ok(found) => Ok(found),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Decode the record [`RecordDecoder::has_next`] stopped at.
    ///
    /// On [`DecodeError::Field`] the rest of the failing record has already been
    /// skipped, and decoding can continue with the next record.
    pub fn next_record(&mut self) -> Result<ClientRecord, DecodeError> {
        match self.state {
            DecoderState::RecordsAvailable => {}
            DecoderState::Unopened | DecoderState::HeaderConsumed => {
                if !self.has_next()? {
                    return Err(DecodeError::Exhausted);
                }
            }
            DecoderState::RecordsExhausted | DecoderState::Failed => {
                return Err(DecodeError::Exhausted);
            }
            DecoderState::Closed => return Err(DecodeError::Closed),
        }

        self.state = DecoderState::HeaderConsumed;
        let char_start = self.record_start;

        let decoded = if self.record_is_array {
            Err(Failure::field(
                "record",
                FieldError::UnexpectedValue {
                    expected: "a record object",
                    found: "an array",
                },
            ))
        } else {
            self.decode_record()
        };

        match decoded {
            Ok(record) => {
                let char_end = self.offset();
                Ok(ClientRecord {
                    record,
                    delivery: self.delivery.delivery_info(char_start, char_end),
                })
            }
            Err(Failure::Field { field, source }) => {
                if let Err(err) = self.skip_rest_of_record() {
                    return Err(self.fail(err));
                }
                Err(DecodeError::Field {
                    field,
                    char_start,
                    char_end: self.offset(),
                    source,
                })
            }
            Err(Failure::Fatal(err)) => Err(self.fail(err)),
        }
    }

    /// Release the underlying reader. Safe to call more than once.
    pub fn close(&mut self) {
        if self.tokens.take().is_some() {
            tracing::debug!("Closed record decoder in state {:?}", self.state);
        }
        self.state = DecoderState::Closed;
    }

    fn fail(&mut self, err: DecodeError) -> DecodeError {
        if err.is_fatal() && self.state != DecoderState::Closed {
            self.state = DecoderState::Failed;
        }
        err
    }

    fn tokens(&mut self) -> Result<&mut TokenReader<R>, DecodeError> {
        self.tokens.as_mut().ok_or(DecodeError::Closed)
    }

    fn require(&mut self) -> Result<Token, DecodeError> {
        self.tokens()?.require_token()
    }

    fn expect_header(&mut self) -> Result<(), DecodeError> {
        let tokens = self.tokens()?;

        let token = tokens.next_token()?;
        if token != Some(Token::StartObject) {
            return Err(format_error(tokens, "expected a JSON object", token.as_ref()));
        }

        match tokens.next_token()? {
            Some(Token::FieldName(name)) if name == RECORDS_KEY => {}
            other => {
                return Err(format_error(
                    tokens,
                    "expected the \"Records\" field",
                    other.as_ref(),
                ));
            }
        }

        let token = tokens.next_token()?;
        if token != Some(Token::StartArray) {
            return Err(format_error(tokens, "expected the record array", token.as_ref()));
        }
        Ok(())
    }

    fn advance_to_record(&mut self) -> Result<bool, DecodeError> {
        let tokens = self.tokens.as_mut().ok_or(DecodeError::Closed)?;

        match tokens.next_token()? {
            Some(token @ (Token::StartObject | Token::StartArray)) => {
                self.record_start = tokens.token_start();
                self.record_depth = tokens.depth();
                self.record_is_array = token == Token::StartArray;
                self.state = DecoderState::RecordsAvailable;
                Ok(true)
            }
            Some(Token::EndArray) => {
                self.state = DecoderState::RecordsExhausted;
                Ok(false)
            }
            other => Err(format_error(tokens, "expected a record object", other.as_ref())),
        }
    }

    fn skip_rest_of_record(&mut self) -> Result<(), DecodeError> {
        let depth = self.record_depth;
        self.tokens()?.skip_to_depth(depth)
    }

    fn next_field_name(&mut self) -> Step<Option<String>> {
        match self.require()? {
            Token::EndObject => Ok(None),
            Token::FieldName(name) => Ok(Some(name)),
            other => Err(Failure::Fatal(DecodeError::Syntax {
                offset: self.offset(),
                message: format!("expected a field name, found {}", other.describe()),
            })),
        }
    }

    fn decode_record(&mut self) -> Step<Record> {
        let mut record = Record::default();

        while let Some(name) = self.next_field_name()? {
            let value = match KnownField::lookup(FieldScope::Record, &name) {
                Some(KnownField::EventVersion) => {
                    let version = self.text_value(&name)?;
                    if let Some(version) = version.as_str() {
                        self.check_version(version);
                    }
                    version
                }
                Some(KnownField::EventTime) => self.timestamp_value(&name)?,
                Some(KnownField::EventId | KnownField::RequestId) => self.id_value(&name)?,
                Some(KnownField::UserIdentity) => {
                    self.user_identity().map_err(|failure| failure.within(&name))?
                }
                Some(KnownField::ReadOnly) => self.read_only(&name)?,
                Some(KnownField::Resources) => {
                    self.resources().map_err(|failure| failure.within(&name))?
                }
                Some(_) => self.text_value(&name)?,
                None => self.default_value()?.into(),
            };
            record.insert(name, value);
        }

        derive_account_id(&mut record);
        Ok(record)
    }

    fn user_identity(&mut self) -> Step<FieldValue> {
        if !self.open_object("an identity object or null")? {
            return Ok(FieldValue::Null);
        }

        let mut identity = UserIdentity::default();
        while let Some(name) = self.next_field_name()? {
            let value = match KnownField::lookup(FieldScope::UserIdentity, &name) {
                Some(KnownField::SessionContext) => {
                    self.session_context().map_err(|failure| failure.within(&name))?
                }
                Some(_) => self.text_value(&name)?,
                None => self.default_value()?.into(),
            };
            identity.insert(name, value);
        }
        Ok(FieldValue::UserIdentity(Box::new(identity)))
    }

    fn session_context(&mut self) -> Step<FieldValue> {
        if !self.open_object("a session context object or null")? {
            return Ok(FieldValue::Null);
        }

        let mut context = SessionContext::default();
        while let Some(name) = self.next_field_name()? {
            let value = match KnownField::lookup(FieldScope::SessionContext, &name) {
                Some(KnownField::Attributes) => {
                    self.attributes().map_err(|failure| failure.within(&name))?
                }
                Some(KnownField::SessionIssuer) => {
                    self.session_issuer().map_err(|failure| failure.within(&name))?
                }
                Some(KnownField::WebIdFederationData) => {
                    self.web_identity().map_err(|failure| failure.within(&name))?
                }
                _ => self.default_value()?.into(),
            };
            context.insert(name, value);
        }
        Ok(FieldValue::SessionContext(Box::new(context)))
    }

    fn session_issuer(&mut self) -> Step<FieldValue> {
        if !self.open_object("a session issuer object or null")? {
            return Ok(FieldValue::Null);
        }

        let mut issuer = SessionIssuer::default();
        while let Some(name) = self.next_field_name()? {
            let value = match KnownField::lookup(FieldScope::SessionIssuer, &name) {
                Some(_) => self.text_value(&name)?,
                None => self.default_value()?.into(),
            };
            issuer.insert(name, value);
        }
        Ok(FieldValue::SessionIssuer(issuer))
    }

    fn web_identity(&mut self) -> Step<FieldValue> {
        if !self.open_object("a federation object or null")? {
            return Ok(FieldValue::Null);
        }

        let mut federation = WebIdentitySessionContext::default();
        while let Some(name) = self.next_field_name()? {
            let value = match KnownField::lookup(FieldScope::WebIdentity, &name) {
                Some(KnownField::Attributes) => {
                    self.attributes().map_err(|failure| failure.within(&name))?
                }
                Some(_) => self.text_value(&name)?,
                None => self.default_value()?.into(),
            };
            federation.insert(name, value);
        }
        Ok(FieldValue::WebIdentity(federation))
    }

    fn attributes(&mut self) -> Step<FieldValue> {
        if !self.open_object("an attribute map or null")? {
            return Ok(FieldValue::Null);
        }

        let mut attributes = Attributes::new();
        while let Some(name) = self.next_field_name()? {
            let value = self.default_value()?;
            attributes.insert(name, value);
        }
        Ok(FieldValue::Attributes(attributes))
    }

    fn resources(&mut self) -> Step<FieldValue> {
        match self.require()? {
            Token::Null => return Ok(FieldValue::Null),
            Token::StartArray => {}
            token => return Err(Failure::unexpected("", "a resource list or null", &token)),
        }

        let mut resources = Vec::new();
        loop {
            match self.require()? {
                Token::EndArray => break,
                Token::StartObject => resources.push(self.resource()?),
                token => return Err(Failure::unexpected("", "a resource object", &token)),
            }
        }
        Ok(FieldValue::Resources(resources))
    }

    // the opening brace was consumed by `resources`
    fn resource(&mut self) -> Step<Resource> {
        let mut resource = Resource::default();
        while let Some(name) = self.next_field_name()? {
            let value = match KnownField::lookup(FieldScope::Resource, &name) {
                Some(_) => self.text_value(&name)?,
                None => self.default_value()?.into(),
            };
            resource.insert(name, value);
        }
        Ok(resource)
    }

    /// `Ok(false)` when the value is an explicit null.
    fn open_object(&mut self, expected: &'static str) -> Step<bool> {
        match self.require()? {
            Token::StartObject => Ok(true),
            Token::Null => Ok(false),
            token => Err(Failure::unexpected("", expected, &token)),
        }
    }

    fn text_value(&mut self, field: &str) -> Step<FieldValue> {
        match self.require()? {
            Token::Null => Ok(FieldValue::Null),
            token if token.is_container_start() => {
                Err(Failure::unexpected(field, "a string", &token))
            }
            token => Ok(token.into_scalar_text().into()),
        }
    }

    fn timestamp_value(&mut self, field: &str) -> Step<FieldValue> {
        match self.text_value(field)? {
            FieldValue::String(text) => match parse_event_time(&text) {
                Ok(time) => Ok(FieldValue::Timestamp(time)),
                Err(source) => Err(Failure::field(
                    field,
                    FieldError::InvalidTimestamp {
                        value: text,
                        source,
                    },
                )),
            },
            other => Ok(other),
        }
    }

    fn id_value(&mut self, field: &str) -> Step<FieldValue> {
        match self.text_value(field)? {
            FieldValue::String(text) if text.len() != HYPHENATED_ID_LEN => Err(Failure::field(
                field,
                FieldError::NotHyphenated { value: text },
            )),
            FieldValue::String(text) => match Uuid::parse_str(&text) {
                Ok(id) => Ok(FieldValue::Id(id)),
                Err(source) => Err(Failure::field(
                    field,
                    FieldError::InvalidId {
                        value: text,
                        source,
                    },
                )),
            },
            other => Ok(other),
        }
    }

    fn read_only(&mut self, field: &str) -> Step<FieldValue> {
        match self.require()? {
            Token::Null => Ok(FieldValue::Null),
            Token::Bool(value) => Ok(FieldValue::Bool(value)),
            token => Err(Failure::unexpected(field, "a boolean or null", &token)),
        }
    }

    /// Passthrough rule: null stays null, nested values are re-serialized to
    /// their JSON text, scalars keep their text.
    fn default_value(&mut self) -> Result<Option<String>, DecodeError> {
        let tokens = self.tokens()?;
        let token = tokens.require_token()?;
        if token.is_container_start() {
            return Ok(Some(tokens.read_tree(token)?.to_string()));
        }
        Ok(token.into_scalar_text())
    }

    fn check_version(&self, version: &str) {
        match version.trim().parse::<f64>() {
            Ok(parsed) if parsed <= SUPPORTED_EVENT_VERSION => {}
            _ => self.diagnostics.unsupported_version(version),
        }
    }
}

impl<R: BufRead, D: DeliveryInfoProvider> Iterator for RecordDecoder<R, D> {
    type Item = Result<ClientRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == DecoderState::Closed {
            return None;
        }
        match self.has_next() {
            Ok(true) => Some(self.next_record()),
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

pub fn parse_event_time(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(text, EVENT_TIME_FORMAT).map(|time| time.and_utc())
}

/// Fill the top-level `accountId` from the identity, falling back to the
/// session issuer. An `accountId` already on the record is left alone.
fn derive_account_id(record: &mut Record) {
    // an explicit null counts as absent
    if record.account_id().is_some() {
        return;
    }

    let account_id = record
        .user_identity()
        .and_then(|identity| {
            identity
                .account_id()
                .or_else(|| identity.session_context()?.session_issuer()?.account_id())
        })
        .map(str::to_owned);

    if let Some(account_id) = account_id {
        record.insert("accountId", FieldValue::String(account_id));
    }
}

fn format_error<R: BufRead>(
    tokens: &TokenReader<R>,
    expected: &str,
    found: Option<&Token>,
) -> DecodeError {
    DecodeError::Format {
        offset: tokens.token_start(),
        message: format!(
            "{expected}, found {}",
            found.map_or("the end of input", Token::describe)
        ),
    }
}
