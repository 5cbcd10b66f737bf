//! Registry of the record fields that decode into typed slots.
//!
//! Lookups are scoped to the structure being decoded. A name that has no
//! entry in its scope is a passthrough field and keeps its raw JSON text.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldScope {
    Record,
    UserIdentity,
    SessionContext,
    SessionIssuer,
    WebIdentity,
    Resource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownField {
    EventVersion,
    EventTime,
    EventId,
    RequestId,
    UserIdentity,
    ReadOnly,
    Resources,
    AccountId,
    Type,
    PrincipalId,
    Arn,
    AccessKeyId,
    UserName,
    InvokedBy,
    SessionContext,
    Attributes,
    SessionIssuer,
    WebIdFederationData,
    FederatedProvider,
}

impl KnownField {
    pub fn name(&self) -> &'static str {
        match self {
            KnownField::EventVersion => "eventVersion",
            KnownField::EventTime => "eventTime",
            KnownField::EventId => "eventID",
            KnownField::RequestId => "requestID",
            KnownField::UserIdentity => "userIdentity",
            KnownField::ReadOnly => "readOnly",
            KnownField::Resources => "resources",
            KnownField::AccountId => "accountId",
            KnownField::Type => "type",
            KnownField::PrincipalId => "principalId",
            KnownField::Arn => "arn",
            KnownField::AccessKeyId => "accessKeyId",
            KnownField::UserName => "userName",
            KnownField::InvokedBy => "invokedBy",
            KnownField::SessionContext => "sessionContext",
            KnownField::Attributes => "attributes",
            KnownField::SessionIssuer => "sessionIssuer",
            KnownField::WebIdFederationData => "webIdFederationData",
            KnownField::FederatedProvider => "federatedProvider",
        }
    }

    /// Resolve `name` within `scope`. `None` means the field is passed through.
    pub fn lookup(scope: FieldScope, name: &str) -> Option<KnownField> {
        use FieldScope as S;
        use KnownField as F;

        match (scope, name) {
            (S::Record, "eventVersion") => Some(F::EventVersion),
            (S::Record, "eventTime") => Some(F::EventTime),
            (S::Record, "eventID") => Some(F::EventId),
            (S::Record, "requestID") => Some(F::RequestId),
            (S::Record, "userIdentity") => Some(F::UserIdentity),
            (S::Record, "readOnly") => Some(F::ReadOnly),
            (S::Record, "resources") => Some(F::Resources),
            (S::Record | S::UserIdentity | S::SessionIssuer, "accountId") => Some(F::AccountId),

            (S::UserIdentity | S::SessionIssuer, "type") => Some(F::Type),
            (S::UserIdentity | S::SessionIssuer, "principalId") => Some(F::PrincipalId),
            (S::UserIdentity | S::SessionIssuer, "arn") => Some(F::Arn),
            (S::UserIdentity | S::SessionIssuer, "userName") => Some(F::UserName),
            (S::UserIdentity, "accessKeyId") => Some(F::AccessKeyId),
            (S::UserIdentity, "invokedBy") => Some(F::InvokedBy),
            (S::UserIdentity, "sessionContext") => Some(F::SessionContext),

            (S::SessionContext | S::WebIdentity, "attributes") => Some(F::Attributes),
            (S::SessionContext, "sessionIssuer") => Some(F::SessionIssuer),
            (S::SessionContext, "webIdFederationData") => Some(F::WebIdFederationData),
            (S::WebIdentity, "federatedProvider") => Some(F::FederatedProvider),

            _ => None,
        }
    }
}
