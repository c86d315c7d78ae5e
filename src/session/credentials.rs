use argon2::password_hash::{
    rand_core::OsRng, Error as HashError, PasswordHash, PasswordHasher, PasswordVerifier,
    SaltString,
};
use argon2::Argon2;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("stored password hash is malformed")]
    MalformedHash,
    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Checks a presented password against the account's stored hash.
///
/// Hashing policy belongs to the account service; this is only the seam.
pub trait CredentialVerifier: Send + Sync {
    /// `Ok(false)` for a wrong password, `Err` when the check itself failed.
    fn verify(&self, password: &SecretString, stored_hash: &str) -> Result<bool, CredentialError>;
}

/// Argon2 PHC-string verifier.
#[derive(Clone, Copy, Debug, Default)]
pub struct Argon2Verifier;

impl CredentialVerifier for Argon2Verifier {
    fn verify(&self, password: &SecretString, stored_hash: &str) -> Result<bool, CredentialError> {
        let parsed = PasswordHash::new(stored_hash).map_err(|_| CredentialError::MalformedHash)?;

        match Argon2::default().verify_password(password.expose_secret().as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(HashError::Password) => Ok(false),
            Err(err) => Err(CredentialError::Hash(err.to_string())),
        }
    }
}

/// Argon2id PHC string for `password` with a random salt.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &SecretString) -> Result<String, CredentialError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.expose_secret().as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| CredentialError::Hash(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[test]
    fn argon2_accepts_only_the_right_password() -> Result<(), CredentialError> {
        let hash = hash_password(&secret("correct horse"))?;
        assert!(hash.starts_with("$argon2id$"));

        assert!(Argon2Verifier.verify(&secret("correct horse"), &hash)?);
        assert!(!Argon2Verifier.verify(&secret("battery staple"), &hash)?);
        Ok(())
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(matches!(
            Argon2Verifier.verify(&secret("x"), "plaintext"),
            Err(CredentialError::MalformedHash)
        ));
    }
}
