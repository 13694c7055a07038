//! Password hashing, random secrets and Stripe webhook signatures

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Accepted clock skew for webhook timestamps, in seconds
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("Failed to hash password: {0}")]
    Hash(String),
    #[error("Invalid password hash format: {0}")]
    InvalidHash(String),
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Missing or malformed Stripe-Signature header")]
    Malformed,
    #[error("Webhook timestamp outside the tolerance window")]
    Stale,
    #[error("No matching v1 signature")]
    Mismatch,
    #[error("Webhook secret rejected by HMAC")]
    InvalidSecret,
}

/// Hash a password with Argon2id into a PHC string
pub fn hash_password(password: &str) -> Result<String, SecurityError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| SecurityError::Hash(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, SecurityError> {
    let parsed = PasswordHash::new(hash).map_err(|e| SecurityError::InvalidHash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// 32 random bytes, hex encoded; shared with the WordPress connector
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Six-digit one-time code, zero padded
pub fn generate_two_fa_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32))
}

/// Check a `Stripe-Signature` header (`t=...,v1=...`) against the raw body
pub fn verify_stripe_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse().ok(),
            Some(("v1", v)) => signatures.push(v),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }
    match now.checked_sub(timestamp).map(i64::unsigned_abs) {
        Some(skew) if skew <= WEBHOOK_TOLERANCE_SECS.unsigned_abs() => {}
        _ => return Err(SignatureError::Stale),
    }

    let mac = signing_mac(secret, timestamp, payload)?;
    for candidate in signatures {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        // verify_slice compares in constant time
        if mac.clone().verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(SignatureError::Mismatch)
}

fn signing_mac(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Build a header the way Stripe does
#[cfg(test)]
pub fn sign_stripe_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let signature = signing_mac(secret, timestamp, payload).unwrap().finalize().into_bytes();
    format!("t={},v1={}", timestamp, hex::encode(signature))
}
