//! Self-describing password hashes.
//!
//! Stored hashes carry their scheme in their shape: bcrypt (`$2b$12$...`),
//! argon2 PHC strings (`$argon2id$...`), or a bare 64-char hex digest of
//! `password + server_secret` written by the legacy scheme.

use argon2::{
    password_hash::{PasswordHash, PasswordVerifier as _},
    Argon2,
};
use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::config::{AuthConfig, PasswordScheme};

lazy_static! {
    static ref LEGACY_RE: Regex = Regex::new(r"^[0-9a-fA-F]{64}$").unwrap();
    static ref BCRYPT_RE: Regex = Regex::new(r"^\$2[aby]\$\d{2}\$[./A-Za-z0-9]{53}$").unwrap();
    static ref ARGON2_RE: Regex = Regex::new(r"^\$argon2(i|d|id)\$").unwrap();
}

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("bcrypt failed: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),
    #[error("hashing task aborted")]
    Aborted,
    #[error("legacy hashing requires auth.server_secret")]
    MissingSecret,
}

/// Closed set of hash formats the verifier understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashScheme {
    Legacy,
    Bcrypt,
    Argon2,
}

impl HashScheme {
    /// `None` when the stored string matches no known shape
    pub fn detect(hash: &str) -> Option<Self> {
        if LEGACY_RE.is_match(hash) {
            Some(HashScheme::Legacy)
        } else if BCRYPT_RE.is_match(hash) {
            Some(HashScheme::Bcrypt)
        } else if ARGON2_RE.is_match(hash) {
            Some(HashScheme::Argon2)
        } else {
            None
        }
    }

    fn verify(self, password: &str, hash: &str, secret: Option<&str>) -> bool {
        match self {
            HashScheme::Legacy => verify_legacy(password, hash, secret),
            HashScheme::Bcrypt => bcrypt::verify(password, hash).unwrap_or(false),
            HashScheme::Argon2 => match PasswordHash::new(hash) {
                Ok(parsed) => Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok(),
                Err(_) => false,
            },
        }
    }
}

#[derive(Clone)]
pub struct PasswordVerifier {
    scheme: PasswordScheme,
    secret: Option<Arc<str>>,
    bcrypt_cost: u32,
}

impl PasswordVerifier {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            scheme: config.password_scheme,
            secret: config.legacy_secret().map(Arc::from),
            bcrypt_cost: config.bcrypt_cost,
        }
    }

    /// The scheme new hashes are written with
    pub fn current_scheme(&self) -> HashScheme {
        match self.scheme {
            PasswordScheme::Adaptive => HashScheme::Bcrypt,
            PasswordScheme::Legacy => HashScheme::Legacy,
        }
    }

    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        match self.current_scheme() {
            HashScheme::Legacy => {
                let secret = self.secret.as_deref().ok_or(PasswordError::MissingSecret)?;
                Ok(legacy_digest(password, secret))
            }
            _ => Ok(bcrypt::hash(password, self.bcrypt_cost)?),
        }
    }

    /// Never errors: anything unexpected is a failed verification.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        match HashScheme::detect(hash) {
            Some(scheme) => scheme.verify(password, hash, self.secret.as_deref()),
            // Unrecognized shape: try bcrypt, fall back to the legacy digest
            None => match bcrypt::verify(password, hash) {
                Ok(matched) => matched,
                Err(_) => verify_legacy(password, hash, self.secret.as_deref()),
            },
        }
    }

    /// Whether a hash that just verified should be rewritten in the current scheme
    pub fn needs_rehash(&self, hash: &str) -> bool {
        HashScheme::detect(hash) != Some(self.current_scheme())
    }

    /// `hash` off the async runtime; bcrypt is deliberately slow
    pub async fn hash_blocking(&self, password: &str) -> Result<String, PasswordError> {
        let verifier = self.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || verifier.hash(&password))
            .await
            .map_err(|_| PasswordError::Aborted)?
    }

    /// `verify` off the async runtime
    pub async fn verify_blocking(&self, password: &str, hash: &str) -> bool {
        let verifier = self.clone();
        let password = password.to_string();
        let hash = hash.to_string();
        match tokio::task::spawn_blocking(move || verifier.verify(&password, &hash)).await {
            Ok(matched) => matched,
            Err(e) => {
                tracing::warn!(error = %e, "Password verification task failed");
                false
            }
        }
    }
}

fn legacy_digest(password: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// A legacy digest never verifies without the salt it was written with
fn verify_legacy(password: &str, hash: &str, secret: Option<&str>) -> bool {
    let Some(secret) = secret else {
        tracing::warn!("Legacy password digest found but auth.server_secret is not set");
        return false;
    };
    let expected = legacy_digest(password, secret);
    let provided = hash.to_ascii_lowercase();
    expected.len() == provided.len() && expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::password_hash::{PasswordHasher, SaltString};

    fn verifier(scheme: PasswordScheme) -> PasswordVerifier {
        let config = AuthConfig {
            server_secret: Some("pepper".to_string()),
            password_scheme: scheme,
            bcrypt_cost: 4,
            ..AuthConfig::default()
        };
        PasswordVerifier::new(&config)
    }

    #[test]
    fn test_detect_schemes() {
        let bcrypt_hash = bcrypt::hash("pw", 4).unwrap();
        assert_eq!(HashScheme::detect(&bcrypt_hash), Some(HashScheme::Bcrypt));
        assert_eq!(
            HashScheme::detect(&legacy_digest("pw", "s")),
            Some(HashScheme::Legacy)
        );
        assert_eq!(
            HashScheme::detect("$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA"),
            Some(HashScheme::Argon2)
        );
        assert_eq!(HashScheme::detect("plaintext"), None);
    }

    #[test]
    fn test_adaptive_hash_verifies() {
        let v = verifier(PasswordScheme::Adaptive);
        let hash = v.hash("correct horse").unwrap();
        assert!(hash.starts_with("$2"));
        assert!(v.verify("correct horse", &hash));
        assert!(!v.verify("wrong horse", &hash));
        assert!(!v.needs_rehash(&hash));
    }

    #[test]
    fn test_legacy_hash_verifies_with_secret() {
        let v = verifier(PasswordScheme::Legacy);
        let hash = v.hash("hunter22").unwrap();
        assert_eq!(hash, legacy_digest("hunter22", "pepper"));
        assert!(v.verify("hunter22", &hash));
        assert!(v.verify("hunter22", &hash.to_uppercase()));
        assert!(!v.verify("hunter23", &hash));

        // Same digest under a different secret does not verify
        let other = PasswordVerifier::new(&AuthConfig {
            server_secret: Some("other".to_string()),
            ..AuthConfig::default()
        });
        assert!(!other.verify("hunter22", &hash));
    }

    #[test]
    fn test_legacy_digest_survives_restart() {
        let config = AuthConfig {
            server_secret: Some("pepper".to_string()),
            password_scheme: PasswordScheme::Legacy,
            ..AuthConfig::default()
        };
        let hash = PasswordVerifier::new(&config).hash("hunter22").unwrap();
        // A fresh verifier from the same config stands in for a restarted instance
        assert!(PasswordVerifier::new(&config).verify("hunter22", &hash));
    }

    #[test]
    fn test_legacy_without_secret_fails_closed() {
        let v = PasswordVerifier::new(&AuthConfig {
            password_scheme: PasswordScheme::Legacy,
            ..AuthConfig::default()
        });
        assert!(matches!(v.hash("hunter22"), Err(PasswordError::MissingSecret)));
        assert!(!v.verify("hunter22", &legacy_digest("hunter22", "")));
    }

    #[test]
    fn test_argon2_hash_verifies_and_needs_rehash() {
        let salt = SaltString::encode_b64(b"fixed-test-salt!").unwrap();
        let hash = Argon2::default()
            .hash_password(b"s3cret-pass", &salt)
            .unwrap()
            .to_string();

        let v = verifier(PasswordScheme::Adaptive);
        assert!(v.verify("s3cret-pass", &hash));
        assert!(!v.verify("nope", &hash));
        assert!(v.needs_rehash(&hash));
    }

    #[test]
    fn test_garbage_hash_fails_closed() {
        let v = verifier(PasswordScheme::Adaptive);
        assert!(!v.verify("anything", ""));
        assert!(!v.verify("anything", "$2b$garbage"));
        assert!(!v.verify("anything", "$argon2id$broken"));
    }

    #[test]
    fn test_legacy_needs_rehash_under_adaptive() {
        let v = verifier(PasswordScheme::Adaptive);
        assert!(v.needs_rehash(&legacy_digest("pw", "pepper")));
        let legacy = verifier(PasswordScheme::Legacy);
        assert!(!legacy.needs_rehash(&legacy_digest("pw", "pepper")));
    }

    #[tokio::test]
    async fn test_blocking_wrappers() {
        let v = verifier(PasswordScheme::Adaptive);
        let hash = v.hash_blocking("offloaded").await.unwrap();
        assert!(v.verify_blocking("offloaded", &hash).await);
        assert!(!v.verify_blocking("other", &hash).await);
    }
}
