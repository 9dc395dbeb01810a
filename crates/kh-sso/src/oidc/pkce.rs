//! PKCE (RFC 7636) with the S256 method.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};

use crate::shared::random::{generate_random_string, TOKEN_BYTES};

pub const CHALLENGE_METHOD: &str = "S256";

#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    /// 32 random bytes as the verifier, its SHA-256 as the challenge.
    pub fn generate() -> Self {
        let verifier = generate_random_string(TOKEN_BYTES);
        let challenge = code_challenge(&verifier);
        Self { verifier, challenge }
    }
}

/// BASE64URL(SHA256(verifier)) without padding
pub fn code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}
