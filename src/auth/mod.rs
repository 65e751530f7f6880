//! Authentication core: password hashes, lockout, sessions, CSRF and
//! role-based permissions. Everything here is transport-agnostic; the HTTP
//! wiring lives in `crate::api`.

pub mod csrf;
pub mod lockout;
pub mod password;
pub mod permissions;
pub mod session;

pub use csrf::validate_csrf;
pub use lockout::LockoutTracker;
pub use password::{HashScheme, PasswordError, PasswordVerifier};
pub use permissions::{Action, Module, PermissionResolver, Scope, UserPermissions};
pub use session::{NewSession, SessionStore};

use rand::Rng;
use sha2::{Digest, Sha256};

/// Generate a random 256-bit token, hex encoded
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_is_unique_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_token_is_stable() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), hash_token("abd"));
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
