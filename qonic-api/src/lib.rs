//! # qonic-api
//!
//! Bearer-authenticated client for the Qonic resource API:
//! - Request client carrying the access token and client session id
//! - Modification sessions bracketing batched product edits
//! - Polling of long-running operations
//! - Model import, IFC export and quantity calculation calls
//!
//! ## Usage
//!
//! ```rust,ignore
//! use qonic_api::{ApiClient, ChangeSet, ModelTarget};
//!
//! let mut client = ApiClient::new(qonic_api::client::DEFAULT_BASE_URL)?;
//! client.authorize(&flow).await?;
//!
//! let changes = ChangeSet::new().delete("FireRating", guid);
//! let rejected = client
//!     .run_bracketed_modification(&ModelTarget::new(project, model), &changes)
//!     .await?;
//! ```

pub mod client;
pub mod error;
pub mod operation;
pub mod resources;
pub mod session;

// Re-export commonly used types
pub use client::{ApiClient, ClientConfig, Payload};
pub use error::{ApiError, ApiErrorKind, Error};
pub use operation::{await_terminal, Operation, OperationSource, OperationStatus};
pub use resources::{CreateModelRequest, ModelTarget, ProductFilter};
pub use session::{ChangeSet, FieldModificationError, ModificationSession, SessionState};
