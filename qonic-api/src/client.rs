//! Bearer-authenticated client for the resource API.

use std::time::Duration;

use log::*;
use qonic_auth::oauth::{AuthorizationFlow, TokenResponse};
use reqwest::{header, Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiErrorKind, Error};

/// Correlation header sent with every call.
pub const SESSION_HEADER: &str = "X-Client-Session-Id";

pub const DEFAULT_BASE_URL: &str = "https://api.qonic.com/v1";

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Request timeout.
    pub timeout: Duration,
    /// User agent string.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("qonic-api/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Result of a call whose success body may be empty.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload<T> {
    Content(T),
    NoContent,
}

impl<T> Payload<T> {
    pub fn content(self) -> Option<T> {
        match self {
            Payload::Content(content) => Some(content),
            Payload::NoContent => None,
        }
    }

    /// Require a body, naming what was expected if there is none.
    pub fn require(self, what: &str) -> Result<T, Error> {
        self.content().ok_or_else(|| crate::error::missing_field(what))
    }
}

/// Client for the resource API.
///
/// Owns the access token and the client session id for its lifetime. The token is
/// never written anywhere.
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    // Used where the API answers with a redirect to a download location.
    http_no_redirect: reqwest::Client,
    access_token: Option<SecretString>,
    session_id: Uuid,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, Error> {
        Self::with_config(base_url, ClientConfig::default())
    }

    pub fn with_config(base_url: &str, config: ClientConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        let http_no_redirect = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            base_url: format!("{}/", base_url.trim_end_matches('/')),
            http,
            http_no_redirect,
            access_token: None,
            session_id: Uuid::new_v4(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Install a freshly obtained access token.
    pub fn set_access_token(&mut self, token: &TokenResponse) {
        self.access_token = Some(token.access_token.clone());
    }

    pub fn has_access_token(&self) -> bool {
        self.access_token.is_some()
    }

    /// Run the browser sign-in and install the resulting token.
    pub async fn authorize(&mut self, flow: &AuthorizationFlow) -> Result<(), Error> {
        let token = flow.login().await?;
        self.set_access_token(&token);
        Ok(())
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Start a new client session by generating a fresh correlation id.
    pub fn new_session_id(&mut self) -> Uuid {
        self.session_id = Uuid::new_v4();
        debug!("Client session id rotated to {}", self.session_id);
        self.session_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        follow_redirects: bool,
    ) -> Result<RequestBuilder, Error> {
        let token = self.access_token.as_ref().ok_or_else(|| Error {
            source: None,
            error_kind: ApiErrorKind::NotAuthorized,
        })?;
        let http = if follow_redirects {
            &self.http
        } else {
            &self.http_no_redirect
        };

        Ok(http
            .request(method, self.url(path))
            .bearer_auth(token.expose_secret())
            .header(header::ACCEPT, "application/json")
            .header(SESSION_HEADER, self.session_id.to_string()))
    }

    /// Send a request, turning failure statuses into [`ApiError`].
    async fn send(&self, builder: RequestBuilder) -> Result<Response, Error> {
        let response = builder.send().await.map_err(|e| {
            warn!("Request to the Qonic API failed: {e}");
            Error::from(e)
        })?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let url = response.url().clone();
            let body = response.text().await.unwrap_or_default();
            let api_error = ApiError::from_response(status, &body);
            warn!("{} {url} failed: {api_error}", status.as_u16());
            return Err(api_error.into());
        }

        Ok(response)
    }

    async fn payload<T: DeserializeOwned>(response: Response) -> Result<Payload<T>, Error> {
        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(Payload::NoContent);
        }
        Ok(Payload::Content(serde_json::from_slice(&body)?))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let response = self.send(self.request(Method::GET, path, true)?).await?;
        Self::payload(response).await?.require(path)
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<Payload<T>, Error>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let builder = self.request(Method::POST, path, true)?.json(body);
        Self::payload(self.send(builder).await?).await
    }

    /// POST without a request body.
    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<Payload<T>, Error> {
        let builder = self.request(Method::POST, path, true)?;
        Self::payload(self.send(builder).await?).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<Payload<T>, Error>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let builder = self.request(Method::PUT, path, true)?.json(body);
        Self::payload(self.send(builder).await?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<Payload<T>, Error> {
        let builder = self.request(Method::DELETE, path, true)?;
        Self::payload(self.send(builder).await?).await
    }

    /// GET a redirect-style endpoint and return its `Location` header.
    pub async fn location(&self, path: &str) -> Result<String, Error> {
        let response = self.send(self.request(Method::GET, path, false)?).await?;
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        location.ok_or_else(|| Error {
            source: Some(
                format!("{} response from {path} without Location", response.status()).into(),
            ),
            error_kind: ApiErrorKind::MissingLocation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::authorized_client;
    use mockito::{Matcher, Server};
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_calls_carry_bearer_and_session_headers() {
        let mut server = Server::new_async().await;
        let client = authorized_client(&server.url());

        let mock = server
            .mock("GET", "/projects")
            .match_header("authorization", "Bearer tok123")
            .match_header(
                "x-client-session-id",
                client.session_id().to_string().as_str(),
            )
            .with_status(200)
            .with_body(r#"{"projects":[]}"#)
            .create_async()
            .await;

        let body: Value = client.get("projects").await.unwrap();
        assert_eq!(body, json!({"projects": []}));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_base_url_with_path_prefix() {
        let mut server = Server::new_async().await;
        let client = authorized_client(&format!("{}/v1/", server.url()));

        let mock = server
            .mock("GET", "/v1/operations/op1")
            .with_body(r#"{"id":"op1","status":"Running"}"#)
            .create_async()
            .await;

        let _: Value = client.get("/operations/op1").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_not_found_maps_to_api_error() {
        let mut server = Server::new_async().await;
        let client = authorized_client(&server.url());

        server
            .mock("GET", "/projects/p/models/m")
            .with_status(404)
            .with_body(r#"{"type":"NotFound","detail":"model missing"}"#)
            .create_async()
            .await;

        let err = client.get::<Value>("projects/p/models/m").await.unwrap_err();
        let api_error = err.api_error().expect("api error");
        assert_eq!(api_error.status, 404);
        assert_eq!(api_error.error_code.as_deref(), Some("NotFound"));
        assert_eq!(api_error.error_details.as_deref(), Some("model missing"));
    }

    #[tokio::test]
    async fn test_empty_success_body_is_no_content() {
        let mut server = Server::new_async().await;
        let client = authorized_client(&server.url());

        server
            .mock("POST", "/projects/p/discard")
            .with_status(204)
            .create_async()
            .await;

        let payload: Payload<Value> = client.post_empty("projects/p/discard").await.unwrap();
        assert_eq!(payload, Payload::NoContent);
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let mut server = Server::new_async().await;
        let client = authorized_client(&server.url());

        let mock = server
            .mock("POST", "/projects/p/locations")
            .match_body(Matcher::Json(json!({"name": "NewLocation"})))
            .with_status(201)
            .with_body(r#"{"guid":"l1"}"#)
            .create_async()
            .await;

        let payload: Payload<Value> = client
            .post("projects/p/locations", &json!({"name": "NewLocation"}))
            .await
            .unwrap();
        assert_eq!(payload.content(), Some(json!({"guid": "l1"})));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_call_without_token_is_rejected() {
        let client = ApiClient::new("http://127.0.0.1:9").unwrap();
        let err = client.get::<Value>("projects").await.unwrap_err();
        assert_eq!(err.error_kind, ApiErrorKind::NotAuthorized);
    }

    #[tokio::test]
    async fn test_location_is_read_without_following() {
        let mut server = Server::new_async().await;
        let client = authorized_client(&server.url());

        server
            .mock("GET", "/result")
            .with_status(302)
            .with_header("location", "https://storage.example.com/signed?sig=abc")
            .create_async()
            .await;

        let location = client.location("result").await.unwrap();
        assert_eq!(location, "https://storage.example.com/signed?sig=abc");
    }

    #[tokio::test]
    async fn test_missing_location_is_an_error() {
        let mut server = Server::new_async().await;
        let client = authorized_client(&server.url());

        server
            .mock("GET", "/result")
            .with_status(200)
            .create_async()
            .await;

        let err = client.location("result").await.unwrap_err();
        assert_eq!(err.error_kind, ApiErrorKind::MissingLocation);
    }

    #[test]
    fn test_new_session_id_rotates() {
        let mut client = ApiClient::new(DEFAULT_BASE_URL).unwrap();
        let first = client.session_id();
        let second = client.new_session_id();
        assert_ne!(first, second);
        assert_eq!(client.session_id(), second);
    }
}
