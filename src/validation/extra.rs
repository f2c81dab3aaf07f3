//! Transaction `extra` field
//!
//! A tagged sequence carrying the transaction public key, an arbitrary
//! nonce (which may hold a payment id) and the merge-mining tag.

use thiserror::Error;

use crate::crypto::{Hash, PublicKey};

const TAG_PADDING: u8 = 0x00;
const TAG_PUBKEY: u8 = 0x01;
const TAG_NONCE: u8 = 0x02;
const TAG_MERGE_MINING: u8 = 0x03;

const NONCE_PAYMENT_ID: u8 = 0x00;

/// Longest nonce and longest padding run
pub const MAX_EXTRA_NONCE_SIZE: usize = 255;
pub const MAX_EXTRA_PADDING_SIZE: usize = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtraError {
    #[error("extra field truncated at offset {0}")]
    Truncated(usize),
    #[error("unknown extra tag {tag:#04x} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },
    #[error("padding contains non-zero bytes or is too long")]
    BadPadding,
    #[error("nonce of {0} bytes is too long")]
    NonceTooLong(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeMiningTag {
    pub depth: u8,
    pub merkle_root: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraField {
    Padding(usize),
    PublicKey(PublicKey),
    Nonce(Vec<u8>),
    MergeMiningTag(MergeMiningTag),
}

fn take<'a>(extra: &'a [u8], pos: usize, len: usize) -> Result<&'a [u8], ExtraError> {
    extra.get(pos..pos + len).ok_or(ExtraError::Truncated(pos))
}

/// Parse every field of an extra blob
pub fn parse_extra(extra: &[u8]) -> Result<Vec<ExtraField>, ExtraError> {
    let mut fields = Vec::new();
    let mut pos = 0;

    while pos < extra.len() {
        let tag = extra[pos];
        pos += 1;
        match tag {
            TAG_PADDING => {
                let rest = &extra[pos..];
                if rest.len() + 1 > MAX_EXTRA_PADDING_SIZE || rest.iter().any(|b| *b != 0) {
                    return Err(ExtraError::BadPadding);
                }
                fields.push(ExtraField::Padding(rest.len() + 1));
                pos = extra.len();
            }
            TAG_PUBKEY => {
                let mut key = [0u8; 33];
                key.copy_from_slice(take(extra, pos, 33)?);
                fields.push(ExtraField::PublicKey(PublicKey(key)));
                pos += 33;
            }
            TAG_NONCE => {
                let len = *take(extra, pos, 1)?.first().ok_or(ExtraError::Truncated(pos))? as usize;
                pos += 1;
                fields.push(ExtraField::Nonce(take(extra, pos, len)?.to_vec()));
                pos += len;
            }
            TAG_MERGE_MINING => {
                let len = *take(extra, pos, 1)?.first().ok_or(ExtraError::Truncated(pos))? as usize;
                pos += 1;
                let body = take(extra, pos, len)?;
                if body.len() < 33 {
                    return Err(ExtraError::Truncated(pos));
                }
                let mut root = [0u8; 32];
                root.copy_from_slice(&body[1..33]);
                fields.push(ExtraField::MergeMiningTag(MergeMiningTag {
                    depth: body[0],
                    merkle_root: Hash(root),
                }));
                pos += len;
            }
            other => return Err(ExtraError::UnknownTag { tag: other, offset: pos - 1 }),
        }
    }

    Ok(fields)
}

/// First transaction public key in `extra`
pub fn get_transaction_public_key(extra: &[u8]) -> Option<PublicKey> {
    parse_extra(extra).ok()?.into_iter().find_map(|f| match f {
        ExtraField::PublicKey(key) => Some(key),
        _ => None,
    })
}

/// Payment id carried by the first nonce, if it holds one
pub fn get_payment_id(extra: &[u8]) -> Option<Hash> {
    let nonce = parse_extra(extra).ok()?.into_iter().find_map(|f| match f {
        ExtraField::Nonce(nonce) => Some(nonce),
        _ => None,
    })?;
    if nonce.len() != 33 || nonce[0] != NONCE_PAYMENT_ID {
        return None;
    }
    let mut id = [0u8; 32];
    id.copy_from_slice(&nonce[1..]);
    Some(Hash(id))
}

pub fn get_merge_mining_tag(extra: &[u8]) -> Option<MergeMiningTag> {
    parse_extra(extra).ok()?.into_iter().find_map(|f| match f {
        ExtraField::MergeMiningTag(tag) => Some(tag),
        _ => None,
    })
}

pub fn append_public_key(extra: &mut Vec<u8>, key: &PublicKey) {
    extra.push(TAG_PUBKEY);
    extra.extend_from_slice(&key.0);
}

pub fn append_nonce(extra: &mut Vec<u8>, nonce: &[u8]) -> Result<(), ExtraError> {
    if nonce.len() > MAX_EXTRA_NONCE_SIZE {
        return Err(ExtraError::NonceTooLong(nonce.len()));
    }
    extra.push(TAG_NONCE);
    extra.push(nonce.len() as u8);
    extra.extend_from_slice(nonce);
    Ok(())
}

pub fn append_payment_id(extra: &mut Vec<u8>, payment_id: &Hash) {
    let mut nonce = Vec::with_capacity(33);
    nonce.push(NONCE_PAYMENT_ID);
    nonce.extend_from_slice(&payment_id.0);
    extra.push(TAG_NONCE);
    extra.push(nonce.len() as u8);
    extra.extend_from_slice(&nonce);
}

pub fn append_merge_mining_tag(extra: &mut Vec<u8>, tag: &MergeMiningTag) {
    extra.push(TAG_MERGE_MINING);
    extra.push(33);
    extra.push(tag.depth);
    extra.extend_from_slice(&tag.merkle_root.0);
}
