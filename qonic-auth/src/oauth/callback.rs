//! Single-use loopback listener that captures the OAuth redirect.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use log::*;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{Error, ErrorKind};

const CONFIRMATION_PAGE: &str = "<h3>Qonic OAuth completed. You can close this tab.</h3>";

/// How long idle browser connections may hold up shutdown before the server is aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Query parameters delivered by the provider's redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackResult {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Sender half of the result channel, taken by the first matching request.
type ResultSlot = Arc<Mutex<Option<oneshot::Sender<CallbackResult>>>>;

/// Local HTTP receiver for exactly one redirect.
///
/// Requests to other paths get a 404. The port is released once
/// [`CallbackListener::await_callback`] returns or the listener is dropped.
pub struct CallbackListener {
    local_addr: SocketAddr,
    path: String,
    result_rx: oneshot::Receiver<CallbackResult>,
    // Dropping the sender also triggers shutdown.
    shutdown_tx: oneshot::Sender<()>,
    server: JoinHandle<std::io::Result<()>>,
}

impl CallbackListener {
    /// Bind `127.0.0.1:port` and start serving `path` in the background.
    ///
    /// Port `0` picks a free port; see [`CallbackListener::local_addr`].
    pub async fn bind(port: u16, path: &str) -> Result<Self, Error> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        let (result_tx, result_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let slot: ResultSlot = Arc::new(Mutex::new(Some(result_tx)));

        let app = Router::new()
            .route(&path, get(capture_callback))
            .with_state(slot);

        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        debug!("Callback listener bound on {local_addr}{path}");

        Ok(Self {
            local_addr,
            path,
            result_rx,
            shutdown_tx,
            server,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait for the redirect, then stop the server and release the port.
    ///
    /// With `timeout == None` this waits until a request arrives.
    pub async fn await_callback(self, timeout: Option<Duration>) -> Result<CallbackResult, Error> {
        let Self {
            local_addr,
            result_rx,
            shutdown_tx,
            mut server,
            ..
        } = self;

        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, result_rx).await.ok(),
            None => Some(result_rx.await),
        };

        let _ = shutdown_tx.send(());
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
            Ok(Ok(Ok(()))) => debug!("Callback listener on {local_addr} stopped"),
            Ok(Ok(Err(e))) => warn!("Callback listener on {local_addr} failed: {e}"),
            Ok(Err(e)) => warn!("Callback listener task on {local_addr} did not finish: {e}"),
            Err(_) => {
                debug!("Callback listener on {local_addr} still had open connections; aborting");
                server.abort();
            }
        }

        match received {
            Some(Ok(result)) => Ok(result),
            Some(Err(e)) => Err(Error {
                source: Some(Box::new(e)),
                error_kind: ErrorKind::Listener,
            }),
            None => {
                warn!("No authorization callback received within {timeout:?}");
                Err(Error {
                    source: None,
                    error_kind: ErrorKind::Timeout,
                })
            }
        }
    }
}

async fn capture_callback(
    State(slot): State<ResultSlot>,
    Query(result): Query<CallbackResult>,
) -> impl IntoResponse {
    let sender = slot.lock().ok().and_then(|mut sender| sender.take());
    match sender {
        Some(sender) => {
            if sender.send(result).is_err() {
                debug!("Callback received after the listener stopped waiting");
            }
        }
        None => debug!("Ignoring repeated callback request"),
    }

    ([(header::CONNECTION, "close")], Html(CONFIRMATION_PAGE))
}

fn bind_error(err: std::io::Error) -> Error {
    Error {
        source: Some(Box::new(err)),
        error_kind: ErrorKind::Bind,
    }
}
