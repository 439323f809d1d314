use crate::error::{AppError, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, ParamsBuilder,
};
use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// The size of the refresh secret in bytes.
const REFRESH_SECRET_SIZE: usize = 32;
/// The number of hex characters kept from the SHA-256 digest.
pub const BINDING_SIGNATURE_LEN: usize = 8;

/// The memory cost for Argon2 in MB.
const ARGON2_MEMORY_MB: u32 = 19;
/// The number of iterations for Argon2.
const ARGON2_ITERATIONS: u32 = 2;
/// The parallelism factor for Argon2.
const ARGON2_PARALLELISM: u32 = 1;

/// Generates a new random refresh secret.
///
/// # Returns
///
/// A URL-safe base64-encoded secret carrying 256 bits of entropy.
pub fn generate_refresh_secret() -> Result<String> {
    let mut secret = [0u8; REFRESH_SECRET_SIZE];
    OsRng
        .try_fill_bytes(&mut secret)
        .map_err(|e| AppError::Internal(format!("Failed to generate refresh secret: {}", e)))?;

    let encoded = general_purpose::URL_SAFE_NO_PAD.encode(secret);
    secret.zeroize();
    Ok(encoded)
}

/// Derives the binding signature carried by an access token.
///
/// The first eight hex characters of SHA-256 over the refresh plaintext.
pub fn derive_binding_signature(refresh_secret: &str) -> String {
    let digest = Sha256::digest(refresh_secret.as_bytes());
    let mut signature = hex::encode(digest);
    signature.truncate(BINDING_SIGNATURE_LEN);
    signature
}

/// Compares two binding signatures in constant time.
pub fn signatures_match(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

fn argon2() -> Result<Argon2<'static>> {
    let params = ParamsBuilder::new()
        .m_cost(ARGON2_MEMORY_MB * 1024)
        .t_cost(ARGON2_ITERATIONS)
        .p_cost(ARGON2_PARALLELISM)
        .build()
        .map_err(|e| AppError::Internal(format!("Argon2 params: {}", e)))?;

    Ok(Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        params,
    ))
}

/// Hashes a refresh secret using Argon2id with a random salt.
///
/// # Arguments
///
/// * `refresh_secret` - The plaintext handed to the caller.
///
/// # Returns
///
/// A `Result` containing the PHC-formatted hash.
pub fn hash_refresh_secret(refresh_secret: &str) -> Result<String> {
    let mut secret_bytes = refresh_secret.as_bytes().to_vec();

    let mut salt_bytes = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut salt_bytes)
        .map_err(|e| AppError::Internal(format!("Failed to generate salt: {}", e)))?;

    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::Internal(format!("Salt encoding error: {}", e)))?;

    let hash = argon2()?
        .hash_password(&secret_bytes, &salt)
        .map_err(|e| AppError::Internal(format!("Argon2 hash error: {}", e)))?
        .to_string();

    secret_bytes.zeroize();
    Ok(hash)
}

/// Verifies a refresh secret against a stored hash.
///
/// # Returns
///
/// `Ok(false)` on mismatch; an error only when the stored hash is unreadable.
pub fn verify_refresh_secret(refresh_secret: &str, hash: &str) -> Result<bool> {
    let mut secret_bytes = refresh_secret.as_bytes().to_vec();
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Hash parse error: {}", e)))?;

    let result = Argon2::default()
        .verify_password(&secret_bytes, &parsed_hash)
        .is_ok();

    secret_bytes.zeroize();
    Ok(result)
}
