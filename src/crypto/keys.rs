//! Elliptic-curve keys and key images
//!
//! Keys live on secp256k1 and travel as 33-byte compressed points. A key
//! image `I = x * Hp(P)` is derived from an output's secret key and is what
//! a ring signature reveals to prevent double spending.

use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::elliptic_curve::{Field, PrimeField};
use k256::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::{hash_bytes, Hash};

/// Key errors
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid secret key")]
    InvalidSecretKey,
}

/// Serde support for fixed byte arrays longer than 32 bytes.
pub(crate) mod byte_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        if bytes.len() != N {
            return Err(serde::de::Error::custom(format!(
                "Invalid length {}, expected {}",
                bytes.len(),
                N
            )));
        }
        let mut arr = [0u8; N];
        arr.copy_from_slice(&bytes);
        Ok(arr)
    }
}

/// Compressed public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "byte_array")] pub [u8; 33]);

/// Key image of a spent output
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyImage(#[serde(with = "byte_array")] pub [u8; 33]);

/// Secret scalar
#[derive(Clone)]
pub struct SecretKey(pub(crate) Scalar);

/// Secret key with its public key
#[derive(Clone, Debug)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub secret_key: SecretKey,
}

pub(crate) fn encode_point(point: &ProjectivePoint) -> [u8; 33] {
    let encoded = point.to_affine().to_encoded_point(true);
    let bytes = encoded.as_bytes();
    let mut out = [0u8; 33];
    let len = bytes.len().min(33);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

pub(crate) fn decode_point(bytes: &[u8; 33]) -> Option<ProjectivePoint> {
    let encoded = EncodedPoint::from_bytes(&bytes[..]).ok()?;
    let affine: Option<AffinePoint> = AffinePoint::from_encoded_point(&encoded).into();
    affine.map(ProjectivePoint::from)
}

pub(crate) fn scalar_from_bytes(bytes: &[u8; 32]) -> Option<Scalar> {
    Scalar::from_repr(FieldBytes::clone_from_slice(bytes)).into()
}

pub(crate) fn scalar_to_bytes(scalar: &Scalar) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&scalar.to_bytes());
    out
}

pub(crate) fn random_scalar() -> Scalar {
    Scalar::random(&mut OsRng)
}

/// Map arbitrary data onto a scalar (rehashing the rare out-of-range digest)
pub(crate) fn hash_to_scalar(data: &[u8]) -> Scalar {
    let mut digest = hash_bytes(data);
    loop {
        if let Some(scalar) = scalar_from_bytes(&digest.0) {
            return scalar;
        }
        digest = hash_bytes(&digest.0);
    }
}

/// Map a public key onto a curve point with unknown discrete log
/// (try-and-increment over the x coordinate).
pub(crate) fn hash_to_point(key: &PublicKey) -> ProjectivePoint {
    let mut counter: u32 = 0;
    loop {
        let mut data = Vec::with_capacity(37);
        data.extend_from_slice(&key.0);
        data.extend_from_slice(&counter.to_le_bytes());
        let digest: Hash = hash_bytes(&data);

        let mut candidate = [0u8; 33];
        candidate[0] = 0x02;
        candidate[1..].copy_from_slice(&digest.0);
        if let Some(point) = decode_point(&candidate) {
            return point;
        }
        counter = counter.wrapping_add(1);
    }
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8; 33]) -> Result<Self, KeyError> {
        decode_point(bytes).ok_or(KeyError::InvalidPublicKey)?;
        Ok(PublicKey(*bytes))
    }

    /// Whether the bytes decode to a curve point
    pub fn is_valid(&self) -> bool {
        decode_point(&self.0).is_some()
    }

    pub(crate) fn point(&self) -> Option<ProjectivePoint> {
        decode_point(&self.0)
    }

    pub fn to_bytes(&self) -> [u8; 33] {
        self.0
    }
}

impl KeyImage {
    pub fn is_valid(&self) -> bool {
        decode_point(&self.0).is_some()
    }

    pub(crate) fn point(&self) -> Option<ProjectivePoint> {
        decode_point(&self.0)
    }
}

impl SecretKey {
    pub fn generate() -> Self {
        SecretKey(random_scalar())
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, KeyError> {
        scalar_from_bytes(bytes)
            .filter(|s| !bool::from(s.is_zero()))
            .map(SecretKey)
            .ok_or(KeyError::InvalidSecretKey)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        scalar_to_bytes(&self.0)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(encode_point(&(ProjectivePoint::GENERATOR * self.0)))
    }
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret_key = SecretKey::generate();
        KeyPair {
            public_key: secret_key.public_key(),
            secret_key,
        }
    }
}

/// Derive the key image of an output key from its secret key
pub fn generate_key_image(public_key: &PublicKey, secret_key: &SecretKey) -> KeyImage {
    KeyImage(encode_point(&(hash_to_point(public_key) * secret_key.0)))
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl fmt::Debug for KeyImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyImage({})", hex::encode(self.0))
    }
}

impl fmt::Display for KeyImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_is_valid_point() {
        let pair = KeyPair::generate();
        assert!(pair.public_key.is_valid());
        assert!(PublicKey::from_bytes(&pair.public_key.0).is_ok());
    }

    #[test]
    fn test_garbage_public_key_rejected() {
        assert!(PublicKey::from_bytes(&[0u8; 33]).is_err());
        assert!(!PublicKey([7u8; 33]).is_valid());
    }

    #[test]
    fn test_secret_key_roundtrip() {
        let secret = SecretKey::generate();
        let recovered = SecretKey::from_bytes(&secret.to_bytes()).unwrap();
        assert_eq!(secret.public_key(), recovered.public_key());
        assert!(SecretKey::from_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_key_image_deterministic_and_distinct() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let ia = generate_key_image(&a.public_key, &a.secret_key);
        assert_eq!(ia, generate_key_image(&a.public_key, &a.secret_key));
        assert_ne!(ia, generate_key_image(&b.public_key, &b.secret_key));
        assert!(ia.is_valid());
    }

    #[test]
    fn test_serde_roundtrip_through_bincode() {
        let key = KeyPair::generate().public_key;
        let bytes = bincode::serialize(&key).unwrap();
        let back: PublicKey = bincode::deserialize(&bytes).unwrap();
        assert_eq!(key, back);
    }
}
