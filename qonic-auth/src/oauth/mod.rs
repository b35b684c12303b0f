//! OAuth 2.0 authorization infrastructure.
//!
//! Provides the Authorization Code flow with PKCE, using a loopback listener to
//! receive the redirect.

mod browser;
mod callback;
mod flow;
mod pkce;
mod state;
mod token;

pub use browser::{BrowserLauncher, ManualBrowser, SystemBrowser};
pub use callback::{CallbackListener, CallbackResult};
pub use flow::{AuthorizationFlow, FlowConfig};
pub use pkce::{
    generate_state, PkceChallenge, PkceMaterial, PkceVerifier, CHALLENGE_METHOD,
    DEFAULT_STATE_LENGTH, DEFAULT_VERIFIER_LENGTH, MAX_VERIFIER_LENGTH, MIN_VERIFIER_LENGTH,
};
pub use state::AuthorizationState;
pub use token::TokenResponse;
