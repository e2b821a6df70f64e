// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! HMAC wrappers with COSE style tag truncation.
//!
//! https://datatracker.ietf.org/doc/html/rfc9053#section-3.1

use super::IntegrityError;
use crate::algorithm::HashAlgorithm;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;

macro_rules! hmac_digest {
    ($hash:ty, $key:expr, $msg:expr) => {{
        let mut mac = Hmac::<$hash>::new_from_slice($key).expect("HMAC accepts keys of any size");
        mac.update($msg);
        mac.finalize().into_bytes().to_vec()
    }};
}

/// compute authenticates msg and returns the leftmost tag_len bytes of the
/// HMAC output.
pub fn compute(hash: HashAlgorithm, key: &[u8], msg: &[u8], tag_len: usize) -> Vec<u8> {
    let mut tag = match hash {
        HashAlgorithm::Sha256 => hmac_digest!(Sha256, key, msg),
        HashAlgorithm::Sha384 => hmac_digest!(Sha384, key, msg),
        HashAlgorithm::Sha512 => hmac_digest!(Sha512, key, msg),
    };
    tag.truncate(tag_len);
    tag
}

/// verify checks a truncated tag in constant time.
pub fn verify(
    hash: HashAlgorithm,
    key: &[u8],
    msg: &[u8],
    tag: &[u8],
    tag_len: usize,
) -> Result<(), IntegrityError> {
    if tag.len() != tag_len {
        return Err(IntegrityError);
    }
    let expected = compute(hash, key, msg, tag_len);
    if bool::from(expected.ct_eq(tag)) {
        Ok(())
    } else {
        Err(IntegrityError)
    }
}
