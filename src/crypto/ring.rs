//! Ring signatures
//!
//! Proves that the signer knows the secret key of one of the ring's
//! public keys, and that the supplied key image belongs to that key,
//! without revealing which member signed.

use k256::{ProjectivePoint, Scalar};

use super::keys::{encode_point, hash_to_point, hash_to_scalar, random_scalar};
use super::{Hash, KeyImage, PublicKey, SecretKey, Signature};

fn ring_challenge(prefix_hash: &Hash, commitments: &[(ProjectivePoint, ProjectivePoint)]) -> Scalar {
    let mut data = Vec::with_capacity(32 + commitments.len() * 66);
    data.extend_from_slice(&prefix_hash.0);
    for (l, r) in commitments {
        data.extend_from_slice(&encode_point(l));
        data.extend_from_slice(&encode_point(r));
    }
    hash_to_scalar(&data)
}

/// Sign `prefix_hash` with the secret key of `ring[real_index]`.
///
/// Returns `None` if `real_index` is out of range or a ring key is not a
/// curve point.
pub fn generate_ring_signature(
    prefix_hash: &Hash,
    key_image: &KeyImage,
    ring: &[PublicKey],
    secret_key: &SecretKey,
    real_index: usize,
) -> Option<Vec<Signature>> {
    if real_index >= ring.len() {
        return None;
    }
    let image = key_image.point()?;
    let points: Vec<ProjectivePoint> = ring.iter().map(|k| k.point()).collect::<Option<_>>()?;

    let k = random_scalar();
    let mut scalars = vec![(Scalar::ZERO, Scalar::ZERO); ring.len()];
    let mut commitments = Vec::with_capacity(ring.len());
    let mut sum = Scalar::ZERO;

    for (i, point) in points.iter().enumerate() {
        let hp = hash_to_point(&ring[i]);
        if i == real_index {
            commitments.push((ProjectivePoint::GENERATOR * k, hp * k));
        } else {
            let c = random_scalar();
            let r = random_scalar();
            commitments.push((
                ProjectivePoint::GENERATOR * r + *point * c,
                hp * r + image * c,
            ));
            scalars[i] = (c, r);
            sum += c;
        }
    }

    let h = ring_challenge(prefix_hash, &commitments);
    let c_real = h - sum;
    scalars[real_index] = (c_real, k - c_real * secret_key.0);

    Some(scalars.iter().map(|(c, r)| Signature::from_scalars(c, r)).collect())
}

/// Verify a ring signature over `prefix_hash` for `key_image`
pub fn check_ring_signature(
    prefix_hash: &Hash,
    key_image: &KeyImage,
    ring: &[PublicKey],
    signatures: &[Signature],
) -> bool {
    if ring.is_empty() || ring.len() != signatures.len() {
        return false;
    }
    let image = match key_image.point() {
        Some(p) => p,
        None => return false,
    };

    let mut commitments = Vec::with_capacity(ring.len());
    let mut sum = Scalar::ZERO;
    for (key, signature) in ring.iter().zip(signatures) {
        let point = match key.point() {
            Some(p) => p,
            None => return false,
        };
        let (c, r) = match signature.scalars() {
            Some(s) => s,
            None => return false,
        };
        commitments.push((
            ProjectivePoint::GENERATOR * r + point * c,
            hash_to_point(key) * r + image * c,
        ));
        sum += c;
    }

    ring_challenge(prefix_hash, &commitments) == sum
}
