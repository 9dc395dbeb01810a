//! Random tokens for state, nonce, and PKCE values.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;

/// Bytes of entropy behind every state token and nonce (256 bits).
pub const TOKEN_BYTES: usize = 32;

/// `length` random bytes from the OS-seeded thread RNG, base64url without padding.
pub fn generate_random_string(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(&bytes)
}

pub fn generate_token() -> String {
    generate_random_string(TOKEN_BYTES)
}
