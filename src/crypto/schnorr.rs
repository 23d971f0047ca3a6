//! Schnorr signing primitive
//!
//! secp256k1 Schnorr keys used by the masternode-payments signer. Winner
//! announcements are signed over a BLAKE3 digest of their signing message.

use k256::schnorr::signature::{Signer, Verifier};
use k256::schnorr::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{hash_bytes, Hash};

/// Signature errors
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid key encoding: {0}")]
    Encoding(#[from] hex::FromHexError),
}

/// 32-byte private key
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

/// 32-byte x-only public key
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "pubkey_serde")] pub [u8; 32]);

/// 64-byte Schnorr signature
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchnorrSignature(#[serde(with = "sig_serde")] pub [u8; 64]);

mod pubkey_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("Invalid public key length"))
    }
}

mod sig_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 64], D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("Invalid signature length"))
    }
}

impl PrivateKey {
    /// Generate a new random private key
    pub fn generate() -> Self {
        PrivateKey(SigningKey::random(&mut OsRng))
    }

    /// Create from 32 bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, SignatureError> {
        SigningKey::from_bytes(bytes)
            .map(PrivateKey)
            .map_err(|_| SignatureError::InvalidPrivateKey)
    }

    /// Parse a hex-encoded secret (as found in the node config)
    pub fn from_hex(hex: &str) -> Result<Self, SignatureError> {
        let bytes: [u8; 32] = hex::decode(hex.trim())?
            .try_into()
            .map_err(|_| SignatureError::InvalidPrivateKey)?;
        Self::from_bytes(&bytes)
    }

    /// Get the corresponding public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().to_bytes().into())
    }

    /// Sign a message digest
    pub fn sign(&self, digest: &Hash) -> SchnorrSignature {
        let signature: Signature = self.0.sign(&digest.0);
        SchnorrSignature(signature.to_bytes())
    }

    /// Sign a text message (hashed with BLAKE3 first)
    pub fn sign_message(&self, message: &str) -> SchnorrSignature {
        self.sign(&hash_bytes(message.as_bytes()))
    }
}

impl PublicKey {
    /// Create from 32 bytes, rejecting points off the curve
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, SignatureError> {
        VerifyingKey::from_bytes(bytes).map_err(|_| SignatureError::InvalidPublicKey)?;
        Ok(PublicKey(*bytes))
    }

    /// Parse a hex-encoded x-only key
    pub fn from_hex(hex: &str) -> Result<Self, SignatureError> {
        let bytes: [u8; 32] = hex::decode(hex.trim())?
            .try_into()
            .map_err(|_| SignatureError::InvalidPublicKey)?;
        Self::from_bytes(&bytes)
    }

    /// Verify a signature over a digest
    pub fn verify(&self, digest: &Hash, signature: &SchnorrSignature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let Ok(sig) = Signature::try_from(signature.0.as_slice()) else {
            return false;
        };
        verifying_key.verify(&digest.0, &sig).is_ok()
    }

    /// Verify a signature over a text message
    pub fn verify_message(&self, message: &str, signature: &SchnorrSignature) -> bool {
        self.verify(&hash_bytes(message.as_bytes()), signature)
    }

    /// BLAKE3 hash of the key bytes, used to build pay-to-key payee scripts
    pub fn key_hash(&self) -> Hash {
        hash_bytes(&self.0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl SchnorrSignature {
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        SchnorrSignature(*bytes)
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl std::fmt::Debug for SchnorrSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_message() {
        let private = PrivateKey::generate();
        let public = private.public_key();

        let signature = private.sign_message("COutPoint(ab, 1)1200payee");
        assert!(public.verify_message("COutPoint(ab, 1)1200payee", &signature));
        assert!(!public.verify_message("COutPoint(ab, 1)1201payee", &signature));
    }

    #[test]
    fn test_wrong_key_fails() {
        let signer = PrivateKey::generate();
        let other = PrivateKey::generate().public_key();

        let digest = hash_bytes(b"winner");
        assert!(!other.verify(&digest, &signer.sign(&digest)));
    }

    #[test]
    fn test_hex_roundtrip_for_config_keys() {
        let private = PrivateKey::generate();
        let public = private.public_key();

        let parsed = PublicKey::from_hex(&public.to_hex()).unwrap();
        assert_eq!(parsed, public);
        assert!(PrivateKey::from_hex("zz").is_err());
        assert!(PublicKey::from_hex("00").is_err());
    }

    #[test]
    fn test_garbage_signature_rejected() {
        let public = PrivateKey::generate().public_key();
        let garbage = SchnorrSignature::from_bytes(&[0xAB; 64]);
        assert!(!public.verify_message("anything", &garbage));
    }
}
