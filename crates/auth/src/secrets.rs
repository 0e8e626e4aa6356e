//! Secret hashing and API key generation.
//!
//! Plaintext secrets exist only inside [`IssuedCredentials`] returned to the
//! caller once. What the store keeps is `sha256$<salt hex>$<digest hex>`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::model::IssuedCredentials;

pub const API_KEY_PREFIX: &str = "UA-";
const API_KEY_BODY_LEN: usize = 32;
const SECRET_LEN: usize = 64;
const SALT_LEN: usize = 16;
const SCHEME: &str = "sha256";

const API_KEY_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SECRET_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*";

/// Compare two byte strings without leaking where they differ.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// One-way secret hashing with constant-time verification.
pub trait SecretHasher: Send + Sync {
    fn hash(&self, secret: &str) -> String;

    fn verify(&self, secret: &str, stored_hash: &str) -> bool;
}

impl<H> SecretHasher for Arc<H>
where
    H: SecretHasher + ?Sized,
{
    fn hash(&self, secret: &str) -> String {
        (**self).hash(secret)
    }

    fn verify(&self, secret: &str, stored_hash: &str) -> bool {
        (**self).verify(secret, stored_hash)
    }
}

/// Salted SHA-256. Adequate for high-entropy generated secrets, not for passwords.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256SecretHasher;

impl Sha256SecretHasher {
    fn digest(salt: &[u8], secret: &str) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(secret.as_bytes());
        hasher.finalize().to_vec()
    }
}

impl SecretHasher for Sha256SecretHasher {
    fn hash(&self, secret: &str) -> String {
        let salt: [u8; SALT_LEN] = rand::thread_rng().r#gen();
        let digest = Self::digest(&salt, secret);
        format!("{SCHEME}${}${}", hex::encode(salt), hex::encode(digest))
    }

    fn verify(&self, secret: &str, stored_hash: &str) -> bool {
        let mut parts = stored_hash.split('$');
        let (Some(SCHEME), Some(salt), Some(expected), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        let (Ok(salt), Ok(expected)) = (hex::decode(salt), hex::decode(expected)) else {
            return false;
        };
        constant_time_eq(&Self::digest(&salt, secret), &expected)
    }
}

/// Random key material in the authority's published formats.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyGenerator;

impl KeyGenerator {
    /// `UA-` followed by 32 characters of `[A-Z0-9]`.
    pub fn api_key(&self) -> String {
        format!("{API_KEY_PREFIX}{}", random_string(API_KEY_ALPHABET, API_KEY_BODY_LEN))
    }

    /// 64 characters of `[A-Za-z0-9!@#$%^&*]`.
    pub fn secret(&self) -> String {
        random_string(SECRET_ALPHABET, SECRET_LEN)
    }
}

fn random_string(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(alphabet[rng.gen_range(0..alphabet.len())]))
        .collect()
}

/// Issues a key pair and hands back the plaintext once with the hash to persist.
#[derive(Clone)]
pub struct CredentialIssuer {
    hasher: Arc<dyn SecretHasher>,
    keys: KeyGenerator,
    key_ttl: Duration,
}

impl CredentialIssuer {
    pub fn new(hasher: Arc<dyn SecretHasher>, key_ttl: Duration) -> Self {
        Self {
            hasher,
            keys: KeyGenerator,
            key_ttl,
        }
    }

    pub fn hasher(&self) -> &dyn SecretHasher {
        self.hasher.as_ref()
    }

    pub fn key_ttl(&self) -> Duration {
        self.key_ttl
    }

    /// Returns the credentials for the caller and the secret hash for the store.
    pub fn issue(&self, now: DateTime<Utc>) -> (IssuedCredentials, String) {
        let secret = self.keys.secret();
        let secret_hash = self.hasher.hash(&secret);
        let credentials = IssuedCredentials {
            api_key: self.keys.api_key(),
            secret,
            expires_at: now + self.key_ttl,
        };
        (credentials, secret_hash)
    }
}

impl core::fmt::Debug for CredentialIssuer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CredentialIssuer")
            .field("key_ttl", &self.key_ttl)
            .finish_non_exhaustive()
    }
}
