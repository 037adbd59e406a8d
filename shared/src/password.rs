//! Salted password hashing
//!
//! Hash is `hex(SHA-256(password || salt))`, the same function the account
//! registration service uses, so verification recomputes it with the stored salt.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Default salt length in bytes
pub const SALT_LENGTH: usize = 8;

/// Generate a random salt of `len` bytes.
pub fn generate_salt(len: usize) -> Vec<u8> {
    let mut salt = vec![0u8; len];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Hash a password with the given salt.
pub fn hash_password(password: &str, salt: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt);
    hex::encode(hasher.finalize())
}

/// Check a plaintext password against a stored hash in constant time.
pub fn verify_password(password: &str, salt: &[u8], stored_hash: &str) -> bool {
    let candidate = hash_password(password, salt);
    candidate.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}
