use bcrypt::{hash, verify, BcryptError, DEFAULT_COST};

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("password must be at least {} characters", MIN_PASSWORD_LEN)]
    TooShort,
    #[error("password hashing failed: {0}")]
    Hash(#[from] BcryptError),
}

pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(PasswordError::TooShort);
    }
    Ok(hash(password, DEFAULT_COST)?)
}

/// Malformed hashes never match
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    verify(password, password_hash).unwrap_or(false)
}
