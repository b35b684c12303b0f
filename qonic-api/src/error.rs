//! Error types for the `qonic-api` crate.
//!
//! Errors are modeled as a root `Error` holding an `error_kind` tree and an
//! optional source. Handshake errors from `qonic-auth` are translated into this
//! layer so callers only match on one type.

use std::error::Error as StdError;
use std::fmt;

use qonic_auth::error::{Error as AuthError, ErrorKind as AuthErrorKind};
use serde::Deserialize;
use serde_json::Value;

/// Top-level error type for qonic-api crate.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ApiErrorKind,
}

/// Major categories of errors when talking to the resource API.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiErrorKind {
    /// The API answered with a non-success status.
    Api(ApiError),
    /// The request never produced an HTTP response.
    Transport(TransportErrorKind),
    /// A success body could not be decoded.
    InvalidResponse,
    /// A success body lacked a required field.
    MissingField(String),
    /// A result redirect came back without a `Location` header.
    MissingLocation,
    /// A call was attempted before an access token was installed.
    NotAuthorized,
    /// An operation did not reach a terminal status before the deadline.
    Timeout,
    /// The sign-in handshake failed.
    Auth(AuthErrorKind),
}

/// Failures below the HTTP layer.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportErrorKind {
    BuilderFailed,
    Timeout,
    Network,
}

/// Non-success response from the resource API.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: u16,
    pub reason: String,
    pub error_code: Option<String>,
    pub error_details: Option<String>,
}

/// Error fields the API may put in a failed response body.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<Value>,
    #[serde(rename = "type")]
    kind: Option<Value>,
    #[serde(rename = "errorDetails")]
    error_details: Option<Value>,
    detail: Option<Value>,
}

impl ApiError {
    /// Build from a failed response's status and raw body.
    ///
    /// The body is parsed as JSON on a best-effort basis; `error` wins over
    /// `type` and `errorDetails` wins over `detail`.
    pub fn from_response(status: reqwest::StatusCode, body: &str) -> Self {
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
        Self {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            error_code: text(parsed.error).or_else(|| text(parsed.kind)),
            error_details: text(parsed.error_details).or_else(|| text(parsed.detail)),
        }
    }
}

fn text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut parts = vec![format!("{} {}", self.status, self.reason)
            .trim_end()
            .to_string()];
        parts.extend(self.error_code.iter().cloned());
        parts.extend(self.error_details.iter().cloned());
        write!(f, "{}", parts.join(" - "))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ApiErrorKind::Api(api_error) => return write!(f, "{api_error}"),
            // The wrapped handshake error already describes itself
            ApiErrorKind::Auth(_) => {
                return match &self.source {
                    Some(source) => write!(f, "{source}"),
                    None => write!(f, "Authorization failed"),
                }
            }
            ApiErrorKind::Transport(kind) => match kind {
                TransportErrorKind::BuilderFailed => write!(f, "Request could not be built")?,
                TransportErrorKind::Timeout => write!(f, "Request timed out")?,
                TransportErrorKind::Network => write!(f, "Network error")?,
            },
            ApiErrorKind::InvalidResponse => write!(f, "Response body could not be decoded")?,
            ApiErrorKind::MissingField(field) => {
                write!(f, "Response is missing required field `{field}`")?
            }
            ApiErrorKind::MissingLocation => write!(f, "Result response has no Location header")?,
            ApiErrorKind::NotAuthorized => write!(f, "Not signed in: no access token installed")?,
            ApiErrorKind::Timeout => write!(f, "Timed out waiting for the operation")?,
        }
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<ApiError> for Error {
    fn from(api_error: ApiError) -> Self {
        Error {
            source: None,
            error_kind: ApiErrorKind::Api(api_error),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let error_kind = if err.is_builder() {
            ApiErrorKind::Transport(TransportErrorKind::BuilderFailed)
        } else if err.is_timeout() {
            ApiErrorKind::Transport(TransportErrorKind::Timeout)
        } else if err.is_decode() {
            ApiErrorKind::InvalidResponse
        } else {
            ApiErrorKind::Transport(TransportErrorKind::Network)
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ApiErrorKind::InvalidResponse,
        }
    }
}

// Handshake errors keep their kind so callers can tell a rejected login from
// an unreachable API.
impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        Error {
            error_kind: ApiErrorKind::Auth(err.error_kind.clone()),
            source: Some(Box::new(err)),
        }
    }
}

impl Error {
    /// The API error carried by this error, if the server answered with a failure status.
    pub fn api_error(&self) -> Option<&ApiError> {
        match &self.error_kind {
            ApiErrorKind::Api(api_error) => Some(api_error),
            _ => None,
        }
    }
}

/// Helper function to create missing field errors.
pub fn missing_field(field: &str) -> Error {
    Error {
        source: None,
        error_kind: ApiErrorKind::MissingField(field.to_string()),
    }
}
