/// Password hashing with Argon2id
///
/// Digests are PHC strings (`$argon2id$v=19$...`) carrying their own salt and
/// parameters, so verification needs nothing but the stored string.
use crate::error::{ApiError, ApiResult};
use argon2::{Argon2, PasswordHasher as _, PasswordVerifier as _};
use password_hash::{PasswordHash, SaltString};

pub struct PasswordHasher;

impl PasswordHasher {
    /// Hash a plaintext password with a fresh random salt
    pub fn hash(password: &str) -> ApiResult<String> {
        let mut salt_bytes = [0u8; 16];
        getrandom::getrandom(&mut salt_bytes)
            .map_err(|e| ApiError::Internal(format!("Salt generation failed: {}", e)))?;
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| ApiError::Internal(format!("Salt encoding failed: {}", e)))?;

        let phc = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| ApiError::Internal(format!("Password hashing failed: {}", e)))?
            .to_string();

        Ok(phc)
    }

    /// Check a plaintext password against a stored digest.
    ///
    /// An unparseable digest counts as a mismatch. The digest comparison itself
    /// is constant time.
    pub fn verify(password: &str, digest: &str) -> bool {
        match PasswordHash::new(digest) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::warn!("Stored password digest is not a valid PHC string: {}", e);
                false
            }
        }
    }
}
