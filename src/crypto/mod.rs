//! Cryptography module - hashing, tree hash, keys, signatures and ring signatures

mod hash;
mod keys;
mod merkle;
mod ring;
mod schnorr;

pub use hash::*;
pub use keys::{generate_key_image, KeyError, KeyImage, KeyPair, PublicKey, SecretKey};
pub use merkle::*;
pub use ring::*;
pub use schnorr::*;

