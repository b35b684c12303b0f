//! CSRF state for a single OAuth flow.

use super::pkce::{generate_state, DEFAULT_STATE_LENGTH};
use crate::error::{authorization_error, AuthorizationErrorKind, Error};

/// State parameter and redirect target of one authorization attempt.
///
/// Consumed by [`AuthorizationState::verify`]; a new login must generate a new one.
#[derive(Debug)]
pub struct AuthorizationState {
    state: String,
    redirect_uri: String,
}

impl AuthorizationState {
    /// Generate a fresh state token bound to `redirect_uri`.
    pub fn generate(redirect_uri: &str) -> Self {
        Self {
            state: generate_state(DEFAULT_STATE_LENGTH),
            redirect_uri: redirect_uri.to_string(),
        }
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Validate and consume the state.
    ///
    /// Rejects a missing, empty or different `returned` value. On success the
    /// redirect URI is handed back for the token exchange.
    pub fn verify(self, returned: Option<&str>) -> Result<String, Error> {
        match returned {
            Some(returned) if !returned.is_empty() && returned == self.state => {
                Ok(self.redirect_uri)
            }
            _ => Err(authorization_error(AuthorizationErrorKind::StateMismatch)),
        }
    }
}
