//! Schnorr signatures over a message hash
//!
//! A signature is the pair `(c, r)` with `c = Hs(m || P || r*G + c*P)`.
//! Ring signatures are made of the same pairs, one per ring member.

use k256::ProjectivePoint;
use serde::{Deserialize, Serialize};

use super::keys::{
    byte_array, encode_point, hash_to_scalar, random_scalar, scalar_from_bytes, scalar_to_bytes,
};
use super::{Hash, PublicKey, SecretKey};

/// 64-byte signature: challenge `c` followed by response `r`
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "byte_array")] pub [u8; 64]);

impl Signature {
    pub(crate) fn from_scalars(c: &k256::Scalar, r: &k256::Scalar) -> Self {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&scalar_to_bytes(c));
        bytes[32..].copy_from_slice(&scalar_to_bytes(r));
        Signature(bytes)
    }

    /// Split into `(c, r)`; `None` if either half is not a canonical scalar
    pub(crate) fn scalars(&self) -> Option<(k256::Scalar, k256::Scalar)> {
        let mut c = [0u8; 32];
        let mut r = [0u8; 32];
        c.copy_from_slice(&self.0[..32]);
        r.copy_from_slice(&self.0[32..]);
        Some((scalar_from_bytes(&c)?, scalar_from_bytes(&r)?))
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

fn challenge(message: &Hash, public_key: &PublicKey, commitment: &ProjectivePoint) -> k256::Scalar {
    let mut data = Vec::with_capacity(32 + 33 + 33);
    data.extend_from_slice(&message.0);
    data.extend_from_slice(&public_key.0);
    data.extend_from_slice(&encode_point(commitment));
    hash_to_scalar(&data)
}

/// Sign `message` with `secret_key`, whose public key is `public_key`
pub fn generate_signature(message: &Hash, public_key: &PublicKey, secret_key: &SecretKey) -> Signature {
    let k = random_scalar();
    let commitment = ProjectivePoint::GENERATOR * k;
    let c = challenge(message, public_key, &commitment);
    let r = k - c * secret_key.0;
    Signature::from_scalars(&c, &r)
}

/// Verify a signature made by [`generate_signature`]
pub fn check_signature(message: &Hash, public_key: &PublicKey, signature: &Signature) -> bool {
    let point = match public_key.point() {
        Some(p) => p,
        None => return false,
    };
    let (c, r) = match signature.scalars() {
        Some(s) => s,
        None => return false,
    };
    let commitment = ProjectivePoint::GENERATOR * r + point * c;
    challenge(message, public_key, &commitment) == c
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hash_bytes, KeyPair};

    #[test]
    fn test_sign_verify() {
        let pair = KeyPair::generate();
        let message = hash_bytes(b"test message");
        let signature = generate_signature(&message, &pair.public_key, &pair.secret_key);
        assert!(check_signature(&message, &pair.public_key, &signature));
    }

    #[test]
    fn test_wrong_key_fails() {
        let signer = KeyPair::generate();
        let other = KeyPair::generate();
        let message = hash_bytes(b"test message");
        let signature = generate_signature(&message, &signer.public_key, &signer.secret_key);
        assert!(!check_signature(&message, &other.public_key, &signature));
    }

    #[test]
    fn test_wrong_message_fails() {
        let pair = KeyPair::generate();
        let signature = generate_signature(&hash_bytes(b"message 1"), &pair.public_key, &pair.secret_key);
        assert!(!check_signature(&hash_bytes(b"message 2"), &pair.public_key, &signature));
    }

    #[test]
    fn test_non_canonical_scalar_rejected() {
        let pair = KeyPair::generate();
        let message = hash_bytes(b"m");
        assert!(!check_signature(&message, &pair.public_key, &Signature([0xff; 64])));
    }
}
