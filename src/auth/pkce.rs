//! PKCE (Proof Key for Code Exchange) generation.
//!
//! Binds a public-client authorization to a verifier known only to the
//! requester. Verifiers render as base64url, which keeps the character set
//! inside the RFC 7636 unreserved alphabet.

use crate::error::Error;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Minimum verifier length per RFC 7636.
pub const MIN_VERIFIER_LENGTH: usize = 43;
/// Maximum verifier length per RFC 7636.
pub const MAX_VERIFIER_LENGTH: usize = 128;

/// Challenge derivation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PkceMethod {
    /// `challenge = base64url(SHA-256(verifier))`.
    #[default]
    S256,
    /// `challenge = verifier`. Only for servers that cannot hash.
    Plain,
}

impl PkceMethod {
    /// Wire value for `code_challenge_method`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::S256 => "S256",
            Self::Plain => "plain",
        }
    }
}

/// A PKCE verifier/challenge pair.
#[derive(Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
    pub method: PkceMethod,
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"***")
            .field("challenge", &self.challenge)
            .field("method", &self.method)
            .finish()
    }
}

/// Generate a pair with a 43-character verifier (32 random bytes).
pub fn generate(method: PkceMethod) -> PkcePair {
    generate_with_length(method, MIN_VERIFIER_LENGTH)
        .unwrap_or_else(|_| unreachable!("minimum length is always valid"))
}

/// Generate a pair with a verifier of exactly `length` characters.
pub fn generate_with_length(method: PkceMethod, length: usize) -> Result<PkcePair, Error> {
    if !(MIN_VERIFIER_LENGTH..=MAX_VERIFIER_LENGTH).contains(&length) {
        return Err(Error::validation(format!(
            "verifier length must be {MIN_VERIFIER_LENGTH}..={MAX_VERIFIER_LENGTH}, got {length}"
        )));
    }

    // base64 yields 4 chars per 3 bytes; over-provision then trim.
    let byte_len = length.div_ceil(4) * 3;
    let mut bytes = vec![0u8; byte_len];
    rand::rng().fill_bytes(&mut bytes);
    let mut verifier = URL_SAFE_NO_PAD.encode(&bytes);
    verifier.truncate(length);

    let challenge = compute_challenge(&verifier, method);
    Ok(PkcePair { verifier, challenge, method })
}

/// Derive the challenge for an existing verifier.
pub fn compute_challenge(verifier: &str, method: PkceMethod) -> String {
    match method {
        PkceMethod::S256 => {
            let mut hasher = Sha256::new();
            hasher.update(verifier.as_bytes());
            URL_SAFE_NO_PAD.encode(hasher.finalize())
        }
        PkceMethod::Plain => verifier.to_string(),
    }
}
