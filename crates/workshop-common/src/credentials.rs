//! Credential hashing for tenant logins
//!
//! Both consumers of tenant passwords (Argo CD local accounts and the
//! htpasswd identity provider) accept bcrypt `$2y$` hashes. Salts are
//! derived from a caller-supplied context so an unchanged password always
//! hashes to the same string and repeated passes leave secrets untouched.

use bcrypt::Version;
use sha2::{Digest, Sha256};

#[cfg(test)]
use mockall::automock;

use crate::Error;

/// Lowest bcrypt cost accepted
pub const MIN_COST: u32 = 4;
/// Highest bcrypt cost accepted
pub const MAX_COST: u32 = 31;

/// Hashes plaintext passwords
#[cfg_attr(test, automock)]
pub trait CredentialHasher: Send + Sync {
    /// Hash `password`. Equal `(context, password)` pairs yield equal hashes.
    fn hash(&self, context: &str, password: &str) -> Result<String, Error>;
}

/// bcrypt hasher with deterministic salts
#[derive(Clone, Debug)]
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    /// Create a hasher with the given cost
    pub fn new(cost: u32) -> Result<Self, Error> {
        if !(MIN_COST..=MAX_COST).contains(&cost) {
            return Err(Error::credential(
                "hasher",
                format!("bcrypt cost {cost} outside {MIN_COST}..={MAX_COST}"),
            ));
        }
        Ok(Self { cost })
    }

    /// Configured cost
    pub fn cost(&self) -> u32 {
        self.cost
    }
}

impl CredentialHasher for BcryptHasher {
    fn hash(&self, context: &str, password: &str) -> Result<String, Error> {
        let parts = bcrypt::hash_with_salt(password, self.cost, derive_salt(context))
            .map_err(|e| Error::credential(context, e.to_string()))?;
        Ok(parts.format_for_version(Version::TwoY))
    }
}

fn derive_salt(context: &str) -> [u8; 16] {
    let digest = Sha256::digest(context.as_bytes());
    let mut salt = [0u8; 16];
    salt.copy_from_slice(&digest[..16]);
    salt
}

/// One htpasswd line: `name:hash`
pub fn htpasswd_line(username: &str, hash: &str) -> String {
    format!("{username}:{hash}")
}
