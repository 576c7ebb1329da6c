//! Password KDF.
//!
//! PBKDF2-HMAC-SHA256 with a 16-byte random salt and 100k iterations.
//! The rest of the system treats the output as an opaque blob: the state
//! machine stores it, this module derives and verifies it.

use bytes::Bytes;
use halite_types::Credential;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;
const ROUNDS: u32 = 100_000;

/// Derives a fresh credential for a new account.
pub fn derive_credential(password: &str) -> Credential {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    derive_with_salt(password, &salt)
}

/// Derives a credential from a fixed salt (verification and tests).
pub fn derive_with_salt(password: &str, salt: &[u8]) -> Credential {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, ROUNDS, &mut key);
    Credential {
        hash: Bytes::copy_from_slice(&key),
        salt: Bytes::copy_from_slice(salt),
    }
}

/// Checks a password against a stored credential.
pub fn verify_password(password: &str, credential: &Credential) -> bool {
    let derived = derive_with_salt(password, &credential.salt);
    derived.hash == credential.hash
}
