//! # qonic-auth
//!
//! Browser-based sign-in for the Qonic API:
//! - PKCE verifier/challenge and anti-CSRF state generation
//! - Single-use loopback listener for the OAuth redirect
//! - Authorization flow orchestration and token exchange
//!
//! ## Usage
//!
//! ```rust,ignore
//! use qonic_auth::oauth::{AuthorizationFlow, FlowConfig};
//!
//! let token = AuthorizationFlow::new(config).login().await?;
//! ```

pub mod error;
pub mod oauth;

// Re-export commonly used types
pub use error::{Error, ErrorKind};
