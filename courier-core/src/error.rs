//! Error types for Courier.
//!
//! Two families of errors live in the toolkit:
//!
//! - [`Error`] - the domain error value. It travels on the wire inside reply
//!   envelopes, aggregates nested field errors and is what every fallible
//!   operation of the toolkit returns through [`Result`](crate::Result).
//! - Framework enums such as [`ResolveError`](crate::inject::ResolveError) or
//!   the registration and transport errors of `courier-std`. They describe
//!   programming or infrastructure failures and are converted into an
//!   [`ErrorKind::Internal`] error at the mediator boundary.
//!
//! # Kinds
//!
//! An [`Error`] is identified by its `code`, not by a Rust type. The
//! constructors on [`Error`] produce the fixed codes, statuses and details of
//! the taxonomy; [`Error::kind`] maps a code back to an [`ErrorKind`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A boxed error type for dynamic error handling.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Free-form key/value context attached to an [`Error`].
pub type Details = Map<String, Value>;

/// HTTP-like status classes carried by some error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// 400
    BadRequest,
    /// 401
    Unauthorized,
    /// 403
    Forbidden,
    /// 404
    NotFound,
    /// 405
    MethodNotAllowed,
    /// 409
    Conflict,
    /// 429
    TooManyRequests,
    /// 500
    Internal,
    /// 502
    BadGateway,
    /// 503
    Unavailable,
    /// 504
    GatewayTimeout,
}

impl Status {
    /// Numeric status code.
    pub const fn code(self) -> u16 {
        match self {
            Status::BadRequest => 400,
            Status::Unauthorized => 401,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::MethodNotAllowed => 405,
            Status::Conflict => 409,
            Status::TooManyRequests => 429,
            Status::Internal => 500,
            Status::BadGateway => 502,
            Status::Unavailable => 503,
            Status::GatewayTimeout => 504,
        }
    }

    /// Parse a numeric status code.
    pub const fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            400 => Status::BadRequest,
            401 => Status::Unauthorized,
            403 => Status::Forbidden,
            404 => Status::NotFound,
            405 => Status::MethodNotAllowed,
            409 => Status::Conflict,
            429 => Status::TooManyRequests,
            500 => Status::Internal,
            502 => Status::BadGateway,
            503 => Status::Unavailable,
            504 => Status::GatewayTimeout,
            _ => return None,
        })
    }
}

/// The kind of an [`Error`], derived from its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A required field was absent.
    MissingField,
    /// A field failed validation, or an aggregate of such failures.
    InvalidField,
    /// A value is not one of the allowed enumeration options.
    UnknownOption,
    /// A message could not be materialized into its typed form.
    ValidationFailed,
    /// An unexpected failure; always carries debug context.
    Internal,
    /// The request itself is malformed.
    BadRequest,
    /// The caller is not authenticated.
    Unauthenticated,
    /// The caller lacks a required privilege.
    Forbidden,
    /// The addressed resource does not exist.
    NotFound,
    /// The operation would leave the system inconsistent.
    Conflict,
    /// No subscriber answered the subject of a request.
    MissingSubscriber,
    /// A request received no reply within its deadline.
    RequestTimeout,
    /// A token could not be verified.
    InvalidToken,
    /// A token is well formed but expired.
    ExpiredToken,
    /// An application-defined code.
    Other,
}

impl ErrorKind {
    /// The wire code of this kind, `None` for [`ErrorKind::Other`].
    pub const fn code(self) -> Option<&'static str> {
        Some(match self {
            ErrorKind::MissingField => "missing_field",
            ErrorKind::InvalidField => "invalid_field",
            ErrorKind::UnknownOption => "unknown_option",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::Internal => "internal_error",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::MissingSubscriber => "missing_subscriber",
            ErrorKind::RequestTimeout => "request_timeout",
            ErrorKind::InvalidToken => "invalid_token",
            ErrorKind::ExpiredToken => "expired_token",
            ErrorKind::Other => return None,
        })
    }

    fn from_code(code: &str) -> Self {
        match code {
            "missing_field" => ErrorKind::MissingField,
            "invalid_field" => ErrorKind::InvalidField,
            "unknown_option" => ErrorKind::UnknownOption,
            "validation_failed" => ErrorKind::ValidationFailed,
            "internal_error" => ErrorKind::Internal,
            "bad_request" => ErrorKind::BadRequest,
            "unauthenticated" => ErrorKind::Unauthenticated,
            "forbidden" => ErrorKind::Forbidden,
            "not_found" => ErrorKind::NotFound,
            "conflict" => ErrorKind::Conflict,
            "missing_subscriber" => ErrorKind::MissingSubscriber,
            "request_timeout" => ErrorKind::RequestTimeout,
            "invalid_token" => ErrorKind::InvalidToken,
            "expired_token" => ErrorKind::ExpiredToken,
            _ => ErrorKind::Other,
        }
    }
}

/// The domain error value.
///
/// Errors are immutable values: the `with_*` methods consume the error and
/// return a new one, so a shared error is never modified in place.
///
/// The wire form omits `field`, `hints` and `debug` when they are empty and
/// reads their absence (or `null`) as empty. `status` is local metadata and
/// is not transmitted; it is restored from the code on deserialization.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{code}: {detail}")]
pub struct Error {
    code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    #[serde(skip)]
    status: Option<Status>,
    #[serde(default = "default_detail")]
    detail: String,
    #[serde(
        default,
        skip_serializing_if = "Map::is_empty",
        deserialize_with = "null_as_default"
    )]
    hints: Details,
    #[serde(
        default,
        skip_serializing_if = "Map::is_empty",
        deserialize_with = "null_as_default"
    )]
    debug: Details,
    #[serde(default, deserialize_with = "null_as_default")]
    errors: Vec<Error>,
}

fn default_detail() -> String {
    String::from("An unexpected error occurred.")
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// Constructors
// ============================================================================

impl Error {
    /// Create an error with an application-defined code.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            field: None,
            status: None,
            detail: default_detail(),
            hints: Details::new(),
            debug: Details::new(),
            errors: Vec::new(),
        }
    }

    fn preset(code: &str, status: Option<Status>, detail: &str) -> Self {
        Self {
            status,
            detail: detail.to_owned(),
            ..Self::new(code)
        }
    }

    /// A required field is absent.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::preset(
            "missing_field",
            None,
            "This field is required to process your request",
        )
        .at(field)
    }

    /// A field has invalid data. Attach the offending field with [`Error::at`].
    pub fn invalid_field() -> Self {
        Self::preset(
            "invalid_field",
            None,
            "This field has invalid data, see hints for more details",
        )
    }

    /// An `invalid_field` aggregate carrying every nested failure.
    pub fn aggregate(errors: Vec<Error>) -> Self {
        Self::invalid_field().with_errors(errors)
    }

    /// A value that is not one of `options`.
    pub fn unknown_option<S: AsRef<str>>(options: &[S], received: impl Into<Value>) -> Self {
        let expected = options
            .iter()
            .map(|option| Value::String(option.as_ref().to_owned()))
            .collect::<Vec<_>>();
        Self::preset(
            "unknown_option",
            None,
            "The value is not one of the allowed options",
        )
        .with_hint("expected", Value::Array(expected))
        .with_hint("received", received)
    }

    /// A message could not be materialized; `errors` are the field failures.
    pub fn validation_failed(errors: Vec<Error>) -> Self {
        Self::preset(
            "validation_failed",
            Some(Status::BadRequest),
            "Your request contains invalid or missing data. Check hints for more details",
        )
        .with_errors(errors)
    }

    /// An unexpected failure.
    pub fn internal() -> Self {
        Self::preset(
            "internal_error",
            Some(Status::Internal),
            "An unexpected error occurred. Please try again later.",
        )
    }

    /// An unexpected failure caused by `source`, recorded as `debug.message`.
    pub fn internal_from(source: &dyn fmt::Display) -> Self {
        Self::internal().with_debug("message", source.to_string())
    }

    /// The request is malformed.
    pub fn bad_request() -> Self {
        Self::preset(
            "bad_request",
            Some(Status::BadRequest),
            "Your request is invalid. Check hints for more details",
        )
    }

    /// The caller is not authenticated.
    pub fn unauthenticated() -> Self {
        Self::preset(
            "unauthenticated",
            Some(Status::Unauthorized),
            "This request is only allowed for authenticated users",
        )
    }

    /// The caller lacks a privilege.
    pub fn forbidden() -> Self {
        Self::preset(
            "forbidden",
            Some(Status::Forbidden),
            "You do not have required privilege for this operation. See hints for more details",
        )
    }

    /// The addressed resource does not exist.
    pub fn not_found() -> Self {
        Self::preset(
            "not_found",
            Some(Status::NotFound),
            "There is no resource corresponding to your request",
        )
    }

    /// The operation would leave the system inconsistent.
    pub fn conflict() -> Self {
        Self::preset(
            "conflict",
            Some(Status::Conflict),
            "Can not perform this operation since it will put the system in an inconsistent state",
        )
    }

    /// Nobody is subscribed to the subject of a request.
    pub fn missing_subscriber() -> Self {
        Self::preset(
            "missing_subscriber",
            Some(Status::NotFound),
            "No subscriber found for the given message subject",
        )
    }

    /// A request timed out waiting for its reply.
    pub fn request_timeout() -> Self {
        Self::preset(
            "request_timeout",
            Some(Status::GatewayTimeout),
            "No reply was received before the request deadline",
        )
    }

    /// A token failed verification.
    pub fn invalid_token() -> Self {
        Self::preset(
            "invalid_token",
            Some(Status::Unauthorized),
            "The provided token is not a valid token",
        )
    }

    /// A token has expired.
    pub fn expired_token() -> Self {
        Self::preset(
            "expired_token",
            Some(Status::Unauthorized),
            "The provided token has expired",
        )
    }
}

// ============================================================================
// Builders and accessors
// ============================================================================

impl Error {
    /// Tag the error with a field path.
    pub fn at(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Replace the human readable detail.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    /// Override the status.
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Add a hint for the caller.
    pub fn with_hint(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.hints.insert(key.into(), value.into());
        self
    }

    /// Add debug context. Debug context is meant for logs, see [`Error::redacted`].
    pub fn with_debug(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.debug.insert(key.into(), value.into());
        self
    }

    /// Replace the nested errors.
    pub fn with_errors(mut self, errors: Vec<Error>) -> Self {
        self.errors = errors;
        self
    }

    /// Machine readable code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Kind derived from the code.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_code(&self.code)
    }

    /// Field path the error is about, if any.
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    /// Status class, if the kind has one.
    pub fn status(&self) -> Option<Status> {
        self.status
    }

    /// Human readable detail.
    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// Hints for the caller.
    pub fn hints(&self) -> &Details {
        &self.hints
    }

    /// A single hint.
    pub fn hint(&self, key: &str) -> Option<&Value> {
        self.hints.get(key)
    }

    /// Debug context.
    pub fn debug(&self) -> &Details {
        &self.debug
    }

    /// Nested errors of an aggregate.
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Consume an aggregate into its nested errors.
    ///
    /// An error without nested errors yields itself, so the result is never
    /// empty.
    pub fn into_errors(self) -> Vec<Error> {
        if self.errors.is_empty() {
            vec![self]
        } else {
            self.errors
        }
    }

    /// A copy with the debug context stripped at every nesting level.
    pub fn redacted(&self) -> Self {
        Self {
            debug: Details::new(),
            errors: self.errors.iter().map(Error::redacted).collect(),
            ..self.clone()
        }
    }

    /// Wire form of the error.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::String(self.code.clone()))
    }

    /// Rebuild an error from its wire form.
    ///
    /// The status is restored from the code when the code belongs to the
    /// taxonomy. Input that is not an error object yields an internal error.
    pub fn from_value(raw: Value) -> Self {
        match serde_json::from_value::<Error>(raw) {
            Ok(error) => error.restore_status(),
            Err(err) => Self::internal_from(&err),
        }
    }

    fn restore_status(mut self) -> Self {
        self.status = match self.kind() {
            ErrorKind::ValidationFailed | ErrorKind::BadRequest => Some(Status::BadRequest),
            ErrorKind::Internal => Some(Status::Internal),
            ErrorKind::Unauthenticated | ErrorKind::InvalidToken | ErrorKind::ExpiredToken => {
                Some(Status::Unauthorized)
            }
            ErrorKind::Forbidden => Some(Status::Forbidden),
            ErrorKind::NotFound | ErrorKind::MissingSubscriber => Some(Status::NotFound),
            ErrorKind::Conflict => Some(Status::Conflict),
            ErrorKind::RequestTimeout => Some(Status::GatewayTimeout),
            _ => self.status,
        };
        self.errors = self.errors.into_iter().map(Error::restore_status).collect();
        self
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::internal_from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn presets_carry_fixed_codes_and_statuses() {
        let err = Error::internal();
        assert_eq!(err.code(), "internal_error");
        assert_eq!(err.status(), Some(Status::Internal));
        assert_eq!(err.kind(), ErrorKind::Internal);

        let err = Error::missing_subscriber();
        assert_eq!(err.status().map(Status::code), Some(404));
        assert_eq!(err.kind(), ErrorKind::MissingSubscriber);

        assert_eq!(Error::missing_field("email").field(), Some("email"));
        assert_eq!(Error::new("quota_exceeded").kind(), ErrorKind::Other);
    }

    #[test]
    fn wire_form_omits_empty_keys() {
        let value = Error::invalid_field().at("age").to_value();
        let object = value.as_object().unwrap();
        assert_eq!(object["code"], "invalid_field");
        assert_eq!(object["field"], "age");
        assert!(!object.contains_key("hints"));
        assert!(!object.contains_key("debug"));
        assert!(!object.contains_key("status"));
        assert_eq!(object["errors"], json!([]));
    }

    #[test]
    fn wire_form_reads_nulls_as_empty() {
        let err = Error::from_value(json!({
            "code": "forbidden",
            "detail": "no",
            "field": null,
            "hints": null,
            "debug": null,
            "errors": [{"code": "missing_field", "field": "id"}],
        }));
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(err.status(), Some(Status::Forbidden));
        assert!(err.hints().is_empty());
        assert_eq!(err.errors()[0].field(), Some("id"));
    }

    #[test]
    fn redaction_strips_nested_debug() {
        let err = Error::validation_failed(vec![
            Error::internal().with_debug("message", "boom"),
        ])
        .with_debug("subject", "user.get");
        let redacted = err.redacted();
        assert!(redacted.debug().is_empty());
        assert!(redacted.errors()[0].debug().is_empty());
        assert_eq!(err.debug()["subject"], "user.get");
    }

    #[test]
    fn unknown_option_lists_expected_values() {
        let err = Error::unknown_option(&["ASC", "DESC"], "UP");
        assert_eq!(err.hint("expected"), Some(&json!(["ASC", "DESC"])));
        assert_eq!(err.hint("received"), Some(&json!("UP")));
    }

    #[test]
    fn into_errors_is_never_empty() {
        assert_eq!(Error::bad_request().into_errors().len(), 1);
        let aggregate = Error::aggregate(vec![Error::missing_field("a"), Error::missing_field("b")]);
        assert_eq!(aggregate.into_errors().len(), 2);
    }
}
