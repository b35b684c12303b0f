//! Authorization Code + PKCE handshake over a loopback redirect.

use std::time::Duration;

use log::*;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::browser::{BrowserLauncher, SystemBrowser};
use super::callback::CallbackListener;
use super::pkce::{PkceChallenge, PkceMaterial, CHALLENGE_METHOD};
use super::state::AuthorizationState;
use super::token::{TokenExchangeRequest, TokenResponse};
use crate::error::{authorization_error, config_error, AuthorizationErrorKind, Error};

/// Settings for one client registration.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    /// Base URL hosting `/auth/authorize` and `/auth/token`.
    pub issuer_url: String,
    /// Space-separated scope list.
    pub scope: String,
    pub redirect_uri: String,
    pub callback_port: u16,
    /// `None` waits for the redirect indefinitely.
    pub callback_timeout: Option<Duration>,
}

impl FlowConfig {
    fn authorize_endpoint(&self) -> String {
        format!("{}/auth/authorize", self.issuer_url.trim_end_matches('/'))
    }

    fn token_endpoint(&self) -> String {
        format!("{}/auth/token", self.issuer_url.trim_end_matches('/'))
    }

    /// Path component of the redirect URI, served by the loopback listener.
    ///
    /// The redirect URI must point at `callback_port`, or the redirect would
    /// never reach the listener.
    fn callback_path(&self) -> Result<String, Error> {
        let redirect = Url::parse(&self.redirect_uri).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: crate::error::ErrorKind::Config,
        })?;
        if redirect.port_or_known_default() != Some(self.callback_port) {
            return Err(config_error(&format!(
                "redirect URI {} does not target callback port {}",
                self.redirect_uri, self.callback_port
            )));
        }
        match redirect.path() {
            "" | "/" => Err(config_error("redirect URI must include a callback path")),
            path => Ok(path.to_string()),
        }
    }
}

/// Runs the browser-based login and returns the access token.
///
/// Every call to [`AuthorizationFlow::login`] uses new PKCE material and state;
/// a failed attempt is never resumed.
pub struct AuthorizationFlow {
    config: FlowConfig,
    http: reqwest::Client,
    browser: Box<dyn BrowserLauncher>,
}

impl AuthorizationFlow {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            browser: Box::new(SystemBrowser),
        }
    }

    /// Replace the browser launcher.
    pub fn with_browser(mut self, browser: Box<dyn BrowserLauncher>) -> Self {
        self.browser = browser;
        self
    }

    /// Use a preconfigured HTTP client for the token exchange.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub async fn login(&self) -> Result<TokenResponse, Error> {
        let pkce = PkceMaterial::default();
        let state = AuthorizationState::generate(&self.config.redirect_uri);
        self.run(pkce, state).await
    }

    /// Build the authorization URL the user has to visit.
    pub fn authorization_url(&self, state: &str, challenge: &PkceChallenge) -> Result<Url, Error> {
        let mut url = Url::parse(&self.config.authorize_endpoint()).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: crate::error::ErrorKind::Config,
        })?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("scope", &self.config.scope)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("state", state)
            .append_pair("code_challenge", challenge.as_str())
            .append_pair("code_challenge_method", CHALLENGE_METHOD);
        Ok(url)
    }

    pub(crate) async fn run(
        &self,
        pkce: PkceMaterial,
        state: AuthorizationState,
    ) -> Result<TokenResponse, Error> {
        let path = self.config.callback_path()?;
        let listener = CallbackListener::bind(self.config.callback_port, &path).await?;

        let url = self.authorization_url(state.state(), &pkce.challenge)?;
        info!("Open this URL in your browser to authorize:\n{url}");
        if let Err(e) = self.browser.launch(url.as_str()) {
            warn!("Could not launch a browser ({e}); open the URL above manually");
        }

        let callback = listener
            .await_callback(self.config.callback_timeout)
            .await?;

        if let Some(error) = callback.error.filter(|error| !error.is_empty()) {
            warn!("Authorization provider returned an error: {error}");
            return Err(authorization_error(AuthorizationErrorKind::ProviderError(
                error,
            )));
        }

        let redirect_uri = state.verify(callback.state.as_deref()).map_err(|e| {
            warn!("Authorization callback state did not match; aborting login");
            e
        })?;

        let code = callback
            .code
            .filter(|code| !code.is_empty())
            .ok_or_else(|| authorization_error(AuthorizationErrorKind::MissingCode))?;

        self.exchange_code(&code, &redirect_uri, &pkce).await
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        pkce: &PkceMaterial,
    ) -> Result<TokenResponse, Error> {
        let request = TokenExchangeRequest {
            grant_type: "authorization_code",
            client_id: &self.config.client_id,
            client_secret: self.config.client_secret.expose_secret(),
            code,
            redirect_uri,
            code_verifier: pkce.verifier.as_str(),
        };

        debug!("Exchanging authorization code for an access token");

        let response = self
            .http
            .post(self.config.token_endpoint())
            .form(&request)
            .send()
            .await
            .map_err(|e| {
                warn!("Failed to reach the token endpoint: {e}");
                Error::from(e)
            })?;

        let success = response.status().is_success();
        let body = response.text().await?;
        let token = TokenResponse::from_reply(success, &body).map_err(|e| {
            warn!("Token exchange rejected: {e}");
            e
        })?;

        info!("Successfully exchanged authorization code for an access token");
        Ok(token)
    }
}
