//! Token endpoint request and response schemas.

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{authorization_error, AuthorizationErrorKind, Error};

/// Form body for the `authorization_code` grant.
#[derive(Debug, Serialize)]
pub(crate) struct TokenExchangeRequest<'a> {
    pub grant_type: &'static str,
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub code: &'a str,
    pub redirect_uri: &'a str,
    pub code_verifier: &'a str,
}

/// Access token obtained from a successful exchange.
///
/// Only held in memory by whoever performed the login.
#[derive(Debug, Clone)]
pub struct TokenResponse {
    pub access_token: SecretString,
    /// Remaining fields of the token endpoint reply, without `access_token`.
    pub raw: Map<String, Value>,
}

impl TokenResponse {
    pub fn new(access_token: String) -> Self {
        Self {
            access_token: SecretString::new(access_token),
            raw: Map::new(),
        }
    }

    /// Interpret a token endpoint reply.
    ///
    /// An `error`/`errorDetails` indicator or a non-success status fails the
    /// exchange; a reply without `access_token` is rejected separately.
    pub(crate) fn from_reply(success: bool, body: &str) -> Result<Self, Error> {
        let mut raw: Map<String, Value> = serde_json::from_str(body).unwrap_or_default();
        let error = text(raw.get("error"));
        let error_details = text(raw.get("errorDetails"));

        if !success || error.is_some() || error_details.is_some() {
            let details = error_details
                .or_else(|| text(raw.get("error_description")))
                .or(error)
                .or_else(|| (!body.trim().is_empty()).then(|| body.trim().to_string()));
            return Err(authorization_error(
                AuthorizationErrorKind::TokenExchangeFailed(details),
            ));
        }

        match raw.remove("access_token") {
            Some(Value::String(token)) if !token.is_empty() => Ok(Self {
                access_token: SecretString::new(token),
                raw,
            }),
            _ => Err(authorization_error(
                AuthorizationErrorKind::MissingAccessToken,
            )),
        }
    }

    pub fn bearer(&self) -> &str {
        self.access_token.expose_secret()
    }
}

/// Reply field as text; null and empty strings count as absent.
fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
