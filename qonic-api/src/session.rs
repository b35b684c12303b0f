//! Modification sessions: batched product edits bracketed by start/end-session.
//!
//! The server allows one active session per model. Nothing here locks against
//! concurrent brackets on the same model; callers must not overlap them.

use std::collections::BTreeMap;
use std::fmt;

use log::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{ApiClient, Payload};
use crate::error::Error;
use crate::resources::ModelTarget;

/// Field edits keyed by field name, then product guid.
type FieldEdits = BTreeMap<String, BTreeMap<String, Value>>;

/// A batch of product field edits.
///
/// Serializes as `{"add": {field: {guid: value}}, "update": {...}, "delete": {...}}`,
/// leaving out empty sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeSet {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    add: FieldEdits,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    update: FieldEdits,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    delete: FieldEdits,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, field: &str, guid: &str, value: impl Into<Value>) -> Self {
        insert(&mut self.add, field, guid, value.into());
        self
    }

    /// Set `field` on `guid`; a `Value::Null` resets it.
    pub fn update(mut self, field: &str, guid: &str, value: impl Into<Value>) -> Self {
        insert(&mut self.update, field, guid, value.into());
        self
    }

    pub fn delete(mut self, field: &str, guid: &str) -> Self {
        insert(&mut self.delete, field, guid, Value::Null);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    /// Number of individual field edits.
    pub fn len(&self) -> usize {
        [&self.add, &self.update, &self.delete]
            .iter()
            .flat_map(|section| section.values())
            .map(BTreeMap::len)
            .sum()
    }
}

fn insert(section: &mut FieldEdits, field: &str, guid: &str, value: Value) {
    section
        .entry(field.to_string())
        .or_default()
        .insert(guid.to_string(), value);
}

/// A single rejected field edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldModificationError {
    pub guid: String,
    pub field: String,
    pub error: String,
    pub description: String,
}

impl fmt::Display for FieldModificationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}: {}: {}: {}",
            self.guid, self.field, self.error, self.description
        )
    }
}

#[derive(Debug, Default, Deserialize)]
struct ModificationResponse {
    #[serde(default)]
    errors: Vec<FieldModificationError>,
}

/// Where a modification session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    /// The last submission was accepted in full.
    Committed,
    /// The last submission had field-level rejections.
    Rejected,
}

/// An open modification session on one model.
///
/// Obtained from [`ModificationSession::start`]; must be closed with
/// [`ModificationSession::end`].
pub struct ModificationSession<'a> {
    client: &'a mut ApiClient,
    target: ModelTarget,
    state: SessionState,
}

impl<'a> ModificationSession<'a> {
    /// Rotate the client session id and open a session on `target`.
    pub async fn start(client: &'a mut ApiClient, target: &ModelTarget) -> Result<Self, Error> {
        client.start_session(target).await?;
        Ok(Self {
            client,
            target: target.clone(),
            state: SessionState::Active,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn target(&self) -> &ModelTarget {
        &self.target
    }

    /// Submit a changeset, returning the per-field rejections.
    pub async fn submit(
        &mut self,
        changes: &ChangeSet,
    ) -> Result<Vec<FieldModificationError>, Error> {
        let errors = self.client.modify_products(&self.target, changes).await?;
        self.state = if errors.is_empty() {
            SessionState::Committed
        } else {
            SessionState::Rejected
        };
        Ok(errors)
    }

    pub async fn delete_product(&mut self, guid: &str) -> Result<(), Error> {
        self.client.delete_product(&self.target, guid).await?;
        self.state = SessionState::Committed;
        Ok(())
    }

    /// Close the session. The session counts as closed even if the call fails.
    pub async fn end(mut self) -> Result<(), Error> {
        self.state = SessionState::Idle;
        self.client.end_session(&self.target).await
    }
}

impl Drop for ModificationSession<'_> {
    fn drop(&mut self) {
        if self.state != SessionState::Idle {
            warn!(
                "Modification session on {} dropped without end-session",
                self.target
            );
        }
    }
}

impl ApiClient {
    /// Start a new client session id and open a modification session on `target`.
    pub async fn start_session(&mut self, target: &ModelTarget) -> Result<(), Error> {
        self.new_session_id();
        info!("Starting modification session on {target}");
        self.post_empty::<Value>(&target.path("start-session"))
            .await?;
        Ok(())
    }

    pub async fn end_session(&self, target: &ModelTarget) -> Result<(), Error> {
        info!("Closing modification session on {target}");
        self.post_empty::<Value>(&target.path("end-session")).await?;
        Ok(())
    }

    /// Submit a changeset inside an already open session.
    pub async fn modify_products(
        &self,
        target: &ModelTarget,
        changes: &ChangeSet,
    ) -> Result<Vec<FieldModificationError>, Error> {
        debug!("Submitting {} field edits to {target}", changes.len());
        let response = match self
            .post::<_, ModificationResponse>(&target.path("products"), changes)
            .await?
        {
            Payload::Content(response) => response,
            Payload::NoContent => ModificationResponse::default(),
        };
        if !response.errors.is_empty() {
            warn!(
                "{} field edits rejected on {target}",
                response.errors.len()
            );
        }
        Ok(response.errors)
    }

    pub async fn delete_product(&self, target: &ModelTarget, guid: &str) -> Result<(), Error> {
        self.delete::<Value>(&target.path(&format!("products/{guid}")))
            .await?;
        Ok(())
    }

    /// Open a session, submit `changes`, and always close the session again.
    ///
    /// Field rejections come back as data. If the submission fails, end-session
    /// still runs before the error is returned.
    pub async fn run_bracketed_modification(
        &mut self,
        target: &ModelTarget,
        changes: &ChangeSet,
    ) -> Result<Vec<FieldModificationError>, Error> {
        let mut session = ModificationSession::start(self, target).await?;
        let submitted = session.submit(changes).await;
        let ended = session.end().await;
        settle(submitted, ended)
    }

    /// Delete one product inside its own modification session.
    pub async fn run_bracketed_delete(
        &mut self,
        target: &ModelTarget,
        guid: &str,
    ) -> Result<(), Error> {
        let mut session = ModificationSession::start(self, target).await?;
        let deleted = session.delete_product(guid).await;
        let ended = session.end().await;
        settle(deleted, ended)
    }
}

/// Combine the work result with the end-session result; the work error wins.
fn settle<T>(outcome: Result<T, Error>, ended: Result<(), Error>) -> Result<T, Error> {
    match (outcome, ended) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(end_error)) => Err(end_error),
        (Err(error), Ok(())) => Err(error),
        (Err(error), Err(end_error)) => {
            warn!("end-session also failed: {end_error}");
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiErrorKind;
    use crate::test_support::authorized_client;
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn target() -> ModelTarget {
        ModelTarget::new("p1", "m1")
    }

    async fn session_mocks(server: &mut ServerGuard) -> (mockito::Mock, mockito::Mock) {
        let start = server
            .mock("POST", "/projects/p1/models/m1/start-session")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let end = server
            .mock("POST", "/projects/p1/models/m1/end-session")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        (start, end)
    }

    #[test]
    fn test_changeset_shape() {
        let changes = ChangeSet::new()
            .add(
                "FireRating",
                "g1",
                json!({"PropertySet": "Pset_BeamCommon", "Value": "F60"}),
            )
            .update("FireRating", "g2", Value::Null)
            .delete("FireRating", "g3");

        assert_eq!(changes.len(), 3);
        assert_eq!(
            serde_json::to_value(&changes).unwrap(),
            json!({
                "add": {"FireRating": {"g1": {"PropertySet": "Pset_BeamCommon", "Value": "F60"}}},
                "update": {"FireRating": {"g2": null}},
                "delete": {"FireRating": {"g3": null}},
            })
        );
    }

    #[test]
    fn test_changeset_omits_empty_sections() {
        let changes = ChangeSet::new().delete("TestProperty", "g1");
        assert_eq!(
            serde_json::to_value(&changes).unwrap(),
            json!({"delete": {"TestProperty": {"g1": null}}})
        );

        let parsed: ChangeSet =
            serde_json::from_value(json!({"delete": {"TestProperty": {"g1": null}}})).unwrap();
        assert_eq!(parsed, changes);
        assert!(ChangeSet::new().is_empty());
    }

    #[test]
    fn test_field_error_display() {
        let error = FieldModificationError {
            guid: "g1".to_string(),
            field: "FireRating".to_string(),
            error: "InvalidValue".to_string(),
            description: "out of range".to_string(),
        };
        assert_eq!(error.to_string(), "g1: FireRating: InvalidValue: out of range");
    }

    #[tokio::test]
    async fn test_accepted_changeset() {
        let mut server = Server::new_async().await;
        let mut client = authorized_client(&server.url());
        let (start, end) = session_mocks(&mut server).await;
        let products = server
            .mock("POST", "/projects/p1/models/m1/products")
            .match_body(Matcher::Json(json!({"update": {"FireRating": {"g1": null}}})))
            .with_body(r#"{"errors":[]}"#)
            .expect(1)
            .create_async()
            .await;

        let changes = ChangeSet::new().update("FireRating", "g1", Value::Null);
        let errors = client
            .run_bracketed_modification(&target(), &changes)
            .await
            .unwrap();

        assert!(errors.is_empty());
        start.assert_async().await;
        products.assert_async().await;
        end.assert_async().await;
    }

    #[tokio::test]
    async fn test_field_rejections_are_returned() {
        let mut server = Server::new_async().await;
        let mut client = authorized_client(&server.url());
        let (start, end) = session_mocks(&mut server).await;
        server
            .mock("POST", "/projects/p1/models/m1/products")
            .with_body(
                r#"{"errors":[{"guid":"g1","field":"FireRating","error":"InvalidValue","description":"out of range"}]}"#,
            )
            .create_async()
            .await;

        let changes = ChangeSet::new().add("FireRating", "g1", json!({"Value": "F999"}));
        let errors = client
            .run_bracketed_modification(&target(), &changes)
            .await
            .unwrap();

        assert_eq!(
            errors,
            vec![FieldModificationError {
                guid: "g1".to_string(),
                field: "FireRating".to_string(),
                error: "InvalidValue".to_string(),
                description: "out of range".to_string(),
            }]
        );
        start.assert_async().await;
        end.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_failure_still_ends_session() {
        let mut server = Server::new_async().await;
        let mut client = authorized_client(&server.url());
        let (start, end) = session_mocks(&mut server).await;
        server
            .mock("POST", "/projects/p1/models/m1/products")
            .with_status(500)
            .with_body(r#"{"error":"InternalError"}"#)
            .create_async()
            .await;

        let changes = ChangeSet::new().delete("FireRating", "g1");
        let err = client
            .run_bracketed_modification(&target(), &changes)
            .await
            .unwrap_err();

        assert_eq!(err.api_error().map(|e| e.status), Some(500));
        start.assert_async().await;
        end.assert_async().await;
    }

    /// Loopback server answering every request with an empty 200, except
    /// `/products`, whose connection is closed without a response.
    async fn hang_up_on_products() -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let paths = Arc::new(Mutex::new(Vec::new()));
        let seen = paths.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    head.extend_from_slice(&buf[..n]);
                }
                let head = String::from_utf8_lossy(&head).to_string();
                let path = head
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or_default()
                    .to_string();
                seen.lock().unwrap().push(path.clone());

                if path.ends_with("/products") {
                    drop(socket);
                    continue;
                }
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await;
            }
        });

        (format!("http://{addr}"), paths)
    }

    #[tokio::test]
    async fn test_transport_failure_still_ends_session() {
        let (base_url, paths) = hang_up_on_products().await;
        let mut client = authorized_client(&base_url);

        let changes = ChangeSet::new().delete("FireRating", "g1");
        let err = client
            .run_bracketed_modification(&target(), &changes)
            .await
            .unwrap_err();

        assert!(matches!(err.error_kind, ApiErrorKind::Transport(_)));
        assert_eq!(
            *paths.lock().unwrap(),
            vec![
                "/projects/p1/models/m1/start-session".to_string(),
                "/projects/p1/models/m1/products".to_string(),
                "/projects/p1/models/m1/end-session".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_undecodable_response_still_ends_session() {
        let mut server = Server::new_async().await;
        let mut client = authorized_client(&server.url());
        let (_start, end) = session_mocks(&mut server).await;
        server
            .mock("POST", "/projects/p1/models/m1/products")
            .with_body("not json")
            .create_async()
            .await;

        let changes = ChangeSet::new().delete("FireRating", "g1");
        let err = client
            .run_bracketed_modification(&target(), &changes)
            .await
            .unwrap_err();

        assert_eq!(err.error_kind, ApiErrorKind::InvalidResponse);
        end.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_start_skips_submit_and_end() {
        let mut server = Server::new_async().await;
        let mut client = authorized_client(&server.url());
        server
            .mock("POST", "/projects/p1/models/m1/start-session")
            .with_status(409)
            .with_body(r#"{"type":"SessionActive"}"#)
            .create_async()
            .await;
        let products = server
            .mock("POST", "/projects/p1/models/m1/products")
            .expect(0)
            .create_async()
            .await;
        let end = server
            .mock("POST", "/projects/p1/models/m1/end-session")
            .expect(0)
            .create_async()
            .await;

        let changes = ChangeSet::new().delete("FireRating", "g1");
        let err = client
            .run_bracketed_modification(&target(), &changes)
            .await
            .unwrap_err();

        assert_eq!(
            err.api_error().and_then(|e| e.error_code.as_deref()),
            Some("SessionActive")
        );
        products.assert_async().await;
        end.assert_async().await;
    }

    #[tokio::test]
    async fn test_session_start_rotates_session_id() {
        let mut server = Server::new_async().await;
        let mut client = authorized_client(&server.url());
        let before = client.session_id();
        server
            .mock("POST", "/projects/p1/models/m1/start-session")
            .create_async()
            .await;

        client.start_session(&target()).await.unwrap();
        assert_ne!(client.session_id(), before);
    }

    #[tokio::test]
    async fn test_session_states() {
        let mut server = Server::new_async().await;
        let mut client = authorized_client(&server.url());
        let (_start, end) = session_mocks(&mut server).await;
        server
            .mock("POST", "/projects/p1/models/m1/products")
            .with_body(
                r#"{"errors":[{"guid":"g1","field":"Name","error":"ReadOnly","description":"cannot edit"}]}"#,
            )
            .create_async()
            .await;

        let mut session = ModificationSession::start(&mut client, &target())
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Active);

        session
            .submit(&ChangeSet::new().update("Name", "g1", "Beam A"))
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Rejected);

        session.end().await.unwrap();
        end.assert_async().await;
    }

    #[tokio::test]
    async fn test_bracketed_delete() {
        let mut server = Server::new_async().await;
        let mut client = authorized_client(&server.url());
        let (start, end) = session_mocks(&mut server).await;
        let delete = server
            .mock("DELETE", "/projects/p1/models/m1/products/g1")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        client.run_bracketed_delete(&target(), "g1").await.unwrap();

        start.assert_async().await;
        delete.assert_async().await;
        end.assert_async().await;
    }
}
