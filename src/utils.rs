//! Utility functions for identifiers and hashing

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique entity id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Generates an opaque bearer token from two uuid7 values.
pub fn new_secret_token() -> String {
    let mut bytes = Vec::with_capacity(32);
    bytes.extend_from_slice(uuid7().as_bytes());
    bytes.extend_from_slice(uuid7().as_bytes());
    format!("mkt_{}", hex::encode(bytes))
}

/// Digest under which a bearer token is stored; the raw token never touches disk.
pub fn token_digest(token: &str) -> String {
    sha256::digest(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_their_prefix() {
        let id = new_uuid_to_bech32("project_").unwrap();
        assert!(id.starts_with("project_1"));
    }

    #[test]
    fn tokens_are_unique_and_digest_is_stable() {
        let a = new_secret_token();
        let b = new_secret_token();
        assert_ne!(a, b);
        assert!(a.starts_with("mkt_"));
        assert_eq!(token_digest(&a), token_digest(&a));
        assert_ne!(token_digest(&a), token_digest(&b));
    }
}
