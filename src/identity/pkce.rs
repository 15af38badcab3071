//! PKCE verifier and S256 challenge for email-link sign-ins
//!
//! Sign-up sends the challenge to the auth service and keeps the verifier in a
//! short-lived cookie; the auth callback sends the verifier back with the
//! one-time code.

use base64::Engine as _;
use sha2::{Digest, Sha256};

/// Challenge method sent alongside the challenge
pub const CHALLENGE_METHOD: &str = "s256";

/// A verifier and the challenge derived from it
#[derive(Debug, Clone)]
pub struct PkcePair {
    /// 43 base64url characters from 32 random bytes
    pub verifier: String,
    /// base64url(SHA-256(verifier)), no padding
    pub challenge: String,
}

/// Generate a fresh verifier and its challenge
///
/// # Examples
///
/// ```
/// use parley::identity::pkce::{challenge_for, generate};
///
/// let pair = generate();
/// assert_eq!(pair.verifier.len(), 43);
/// assert_eq!(challenge_for(&pair.verifier), pair.challenge);
/// ```
pub fn generate() -> PkcePair {
    use rand::RngCore as _;

    let mut random_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut random_bytes);

    let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes);
    let challenge = challenge_for(&verifier);
    PkcePair {
        verifier,
        challenge,
    }
}

/// S256 challenge for a verifier
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice())
}
