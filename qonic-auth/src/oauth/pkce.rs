//! PKCE (Proof Key for Code Exchange) support for OAuth 2.0.
//!
//! Implements RFC 7636 for securing authorization code flows in public clients.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::distributions::{Alphanumeric, DistString};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Characters RFC 7636 allows in a code verifier.
const UNRESERVED: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

pub const MIN_VERIFIER_LENGTH: usize = 43;
pub const MAX_VERIFIER_LENGTH: usize = 128;
pub const DEFAULT_VERIFIER_LENGTH: usize = 64;
pub const DEFAULT_STATE_LENGTH: usize = 24;

/// The only challenge method this client sends.
pub const CHALLENGE_METHOD: &str = "S256";

/// PKCE code verifier (random string).
#[derive(Debug, Clone)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Generate a new random PKCE verifier of `length` characters.
    ///
    /// Each character is sampled independently from the unreserved alphabet.
    /// Lengths outside 43..=128 are clamped into that range.
    pub fn generate(length: usize) -> Self {
        let length = length.clamp(MIN_VERIFIER_LENGTH, MAX_VERIFIER_LENGTH);
        let mut rng = rand::thread_rng();
        let verifier = (0..length)
            .map(|_| UNRESERVED[rng.gen_range(0..UNRESERVED.len())] as char)
            .collect();
        Self(verifier)
    }

    /// Create a PKCE verifier from an existing string.
    pub fn from_string(verifier: String) -> Self {
        Self(verifier)
    }

    /// Get the verifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Generate the corresponding code challenge.
    pub fn challenge(&self) -> PkceChallenge {
        PkceChallenge::from_verifier(self)
    }
}

/// PKCE code challenge (SHA256 hash of verifier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge(String);

impl PkceChallenge {
    /// Create a code challenge from a verifier.
    ///
    /// Uses SHA256 hashing and base64url encoding as per RFC 7636.
    pub fn from_verifier(verifier: &PkceVerifier) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_str().as_bytes());
        let hash = hasher.finalize();
        let challenge = URL_SAFE_NO_PAD.encode(hash);
        Self(challenge)
    }

    /// Get the challenge string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Verifier and challenge for one authorization attempt.
#[derive(Debug, Clone)]
pub struct PkceMaterial {
    pub verifier: PkceVerifier,
    pub challenge: PkceChallenge,
}

impl PkceMaterial {
    pub fn generate(length: usize) -> Self {
        let verifier = PkceVerifier::generate(length);
        let challenge = verifier.challenge();
        Self {
            verifier,
            challenge,
        }
    }

    pub fn method(&self) -> &'static str {
        CHALLENGE_METHOD
    }
}

impl Default for PkceMaterial {
    fn default() -> Self {
        Self::generate(DEFAULT_VERIFIER_LENGTH)
    }
}

/// Generate an alphanumeric anti-CSRF state token.
pub fn generate_state(length: usize) -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), length)
}
