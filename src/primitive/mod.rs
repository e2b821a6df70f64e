// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Uniform call surface over the MAC, AEAD, signature, key wrap and key
//! agreement primitives backing the COSE algorithms.
//!
//! Every verification style failure collapses into the opaque IntegrityError
//! so that callers cannot tell a bad tag from a bad key.

pub mod aead;
pub mod ecdh;
pub mod keywrap;
pub mod mac;
pub mod signature;

use crate::algorithm::HashAlgorithm;
use crate::hkdf;
use zeroize::Zeroizing;

/// IntegrityError is returned when a tag, signature or ciphertext fails to
/// authenticate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("integrity check failed")]
pub struct IntegrityError;

/// derive expands a base secret into `len` bytes of key material with HKDF,
/// binding it to the serialized key derivation context.
pub fn derive(
    hash: HashAlgorithm,
    secret: &[u8],
    salt: &[u8],
    context: &[u8],
    len: usize,
) -> Zeroizing<Vec<u8>> {
    hkdf::key(hash, secret, salt, context, len)
}
