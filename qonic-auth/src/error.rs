//! Error types for the `qonic-auth` crate.
//!
//! Follows the same pattern as the other layers: a root Error struct holding an
//! error kind tree and an optional source for error chaining.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for qonic-auth crate.
/// Holds error kind and optional source for error chaining.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in qonic-auth.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    /// The local callback port could not be bound.
    Bind,
    /// The callback listener stopped before a redirect arrived.
    Listener,
    Authorization(AuthorizationErrorKind),
    /// No callback arrived before the configured deadline.
    Timeout,
    /// Required handshake settings are missing or malformed.
    Config,
    Http(HttpErrorKind),
}

/// Reasons a handshake attempt is rejected. All of them are final for the attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorizationErrorKind {
    /// The provider redirected back with an `error` parameter.
    ProviderError(String),
    StateMismatch,
    MissingCode,
    /// The token endpoint refused the code; carries the provider's details when present.
    TokenExchangeFailed(Option<String>),
    MissingAccessToken,
}

/// Errors from HTTP client operations.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpErrorKind {
    BuilderFailed,
    RequestFailed,
    Network,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Bind => write!(f, "Callback listener error: port unavailable")?,
            ErrorKind::Listener => {
                write!(f, "Callback listener error: server stopped before the redirect")?
            }
            ErrorKind::Authorization(kind) => match kind {
                AuthorizationErrorKind::ProviderError(error) => {
                    write!(f, "Authorization error: provider error: {error}")?
                }
                AuthorizationErrorKind::StateMismatch => {
                    write!(f, "Authorization error: state mismatch")?
                }
                AuthorizationErrorKind::MissingCode => write!(f, "Authorization error: no code")?,
                AuthorizationErrorKind::TokenExchangeFailed(Some(details)) => {
                    write!(f, "Authorization error: token exchange failed: {details}")?
                }
                AuthorizationErrorKind::TokenExchangeFailed(None) => {
                    write!(f, "Authorization error: token exchange failed")?
                }
                AuthorizationErrorKind::MissingAccessToken => {
                    write!(f, "Authorization error: no access token")?
                }
            },
            ErrorKind::Timeout => write!(f, "Timed out waiting for the authorization callback")?,
            ErrorKind::Config => write!(f, "Configuration error")?,
            ErrorKind::Http(kind) => write!(f, "HTTP error: {:?}", kind)?,
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

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let error_kind = if err.is_builder() {
            ErrorKind::Http(HttpErrorKind::BuilderFailed)
        } else if err.is_request() {
            ErrorKind::Http(HttpErrorKind::RequestFailed)
        } else {
            ErrorKind::Http(HttpErrorKind::Network)
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

/// Helper function to create authorization errors.
pub fn authorization_error(kind: AuthorizationErrorKind) -> Error {
    Error {
        source: None,
        error_kind: ErrorKind::Authorization(kind),
    }
}

/// Helper function to create configuration errors.
pub fn config_error(message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Config,
    }
}

impl Error {
    /// True when this error rejected the handshake itself, as opposed to a
    /// local resource or transport problem.
    pub fn is_authorization(&self) -> bool {
        matches!(self.error_kind, ErrorKind::Authorization(_))
    }
}
