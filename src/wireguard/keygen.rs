//! WireGuard Curve25519 key material
//!
//! Key pair generation, the zeroizing `SecretKey` wrapper and
//! validation of operator-supplied keys.

use std::fmt;

use async_trait::async_trait;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::backend::{CapabilityError, KeyGenerator};
use crate::error::ProvisionError;

/// Length of a base64-encoded 32-byte WireGuard key
pub const KEY_B64_LEN: usize = 44;

/// Private or preshared key, wiped from memory on drop
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(Zeroizing<String>);

impl SecretKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Zeroizing::new(key.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(***)")
    }
}

/// Generated WireGuard key pair (Base64 encoded)
#[derive(Debug, Clone)]
pub struct WgKeyPair {
    pub private_key: SecretKey,
    pub public_key: String,
    pub preshared_key: Option<SecretKey>,
}

/// Generate a new Curve25519 key pair for WireGuard
pub fn generate_keypair() -> WgKeyPair {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);

    WgKeyPair {
        private_key: SecretKey::new(
            base64::engine::general_purpose::STANDARD.encode(secret.as_bytes()),
        ),
        public_key: base64::engine::general_purpose::STANDARD.encode(public.as_bytes()),
        preshared_key: Some(generate_preshared_key()),
    }
}

/// Generate a random 32-byte preshared key
pub fn generate_preshared_key() -> SecretKey {
    let mut raw = Zeroizing::new([0u8; 32]);
    OsRng.fill_bytes(&mut *raw);
    SecretKey::new(base64::engine::general_purpose::STANDARD.encode(&*raw))
}

/// Decode a base64 key and check it carries exactly 32 bytes
fn decode_key(key: &str) -> Result<Zeroizing<[u8; 32]>, ProvisionError> {
    if key.len() != KEY_B64_LEN {
        return Err(ProvisionError::InvalidKeyFormat(format!(
            "expected {} base64 characters, got {}",
            KEY_B64_LEN,
            key.len()
        )));
    }

    let bytes = Zeroizing::new(
        base64::engine::general_purpose::STANDARD
            .decode(key)
            .map_err(|e| ProvisionError::InvalidKeyFormat(format!("not valid base64: {}", e)))?,
    );

    let mut out = Zeroizing::new([0u8; 32]);
    if bytes.len() != out.len() {
        return Err(ProvisionError::InvalidKeyFormat(format!(
            "decoded to {} bytes, expected 32",
            bytes.len()
        )));
    }
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Validate an operator-supplied private key (44 chars, base64, 32 bytes)
pub fn validate_private_key(key: &str) -> Result<SecretKey, ProvisionError> {
    let key = key.trim();
    decode_key(key)?;
    Ok(SecretKey::new(key))
}

/// Derive the public key belonging to a private key
pub fn public_key_for(private_key: &SecretKey) -> Result<String, ProvisionError> {
    let bytes = decode_key(private_key.expose())?;
    let secret = StaticSecret::from(*bytes);
    let public = PublicKey::from(&secret);
    Ok(base64::engine::general_purpose::STANDARD.encode(public.as_bytes()))
}

/// Key generation performed in-process instead of on the router
#[derive(Debug, Default)]
pub struct LocalKeyGenerator;

#[async_trait]
impl KeyGenerator for LocalKeyGenerator {
    async fn generate_keypair(&self) -> Result<WgKeyPair, CapabilityError> {
        Ok(generate_keypair())
    }
}
