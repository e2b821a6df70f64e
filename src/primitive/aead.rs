// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! AEAD wrappers for AES-GCM, AES-CCM and ChaCha20/Poly1305.
//!
//! https://datatracker.ietf.org/doc/html/rfc9053#section-4

use super::IntegrityError;
use crate::algorithm::Algorithm;
use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::consts::{U7, U8, U12, U13, U16};
use aes_gcm::aead::generic_array::typenum::Unsigned;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, Nonce, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use ccm::Ccm;
use chacha20poly1305::ChaCha20Poly1305;

type Aes192Gcm = AesGcm<Aes192, U12>;

// Ccm<cipher, tag size, nonce size>
type AesCcm16_64_128 = Ccm<Aes128, U8, U13>;
type AesCcm16_64_256 = Ccm<Aes256, U8, U13>;
type AesCcm64_64_128 = Ccm<Aes128, U8, U7>;
type AesCcm64_64_256 = Ccm<Aes256, U8, U7>;
type AesCcm16_128_128 = Ccm<Aes128, U16, U13>;
type AesCcm16_128_256 = Ccm<Aes256, U16, U13>;
type AesCcm64_128_128 = Ccm<Aes128, U16, U7>;
type AesCcm64_128_256 = Ccm<Aes256, U16, U7>;

/// seal encrypts and authenticates msg, returning the ciphertext with the
/// authentication tag appended.
pub fn seal(
    alg: Algorithm,
    key: &[u8],
    nonce: &[u8],
    msg: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, IntegrityError> {
    dispatch(alg, true, key, nonce, msg, aad)
}

/// open authenticates and decrypts a ciphertext produced by seal.
pub fn open(
    alg: Algorithm,
    key: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, IntegrityError> {
    dispatch(alg, false, key, nonce, ciphertext, aad)
}

fn dispatch(
    alg: Algorithm,
    encrypt: bool,
    key: &[u8],
    nonce: &[u8],
    data: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, IntegrityError> {
    match alg {
        Algorithm::A128Gcm => run::<Aes128Gcm>(encrypt, key, nonce, data, aad),
        Algorithm::A192Gcm => run::<Aes192Gcm>(encrypt, key, nonce, data, aad),
        Algorithm::A256Gcm => run::<Aes256Gcm>(encrypt, key, nonce, data, aad),
        Algorithm::AesCcm16_64_128 => run::<AesCcm16_64_128>(encrypt, key, nonce, data, aad),
        Algorithm::AesCcm16_64_256 => run::<AesCcm16_64_256>(encrypt, key, nonce, data, aad),
        Algorithm::AesCcm64_64_128 => run::<AesCcm64_64_128>(encrypt, key, nonce, data, aad),
        Algorithm::AesCcm64_64_256 => run::<AesCcm64_64_256>(encrypt, key, nonce, data, aad),
        Algorithm::AesCcm16_128_128 => run::<AesCcm16_128_128>(encrypt, key, nonce, data, aad),
        Algorithm::AesCcm16_128_256 => run::<AesCcm16_128_256>(encrypt, key, nonce, data, aad),
        Algorithm::AesCcm64_128_128 => run::<AesCcm64_128_128>(encrypt, key, nonce, data, aad),
        Algorithm::AesCcm64_128_256 => run::<AesCcm64_128_256>(encrypt, key, nonce, data, aad),
        Algorithm::ChaCha20Poly1305 => run::<ChaCha20Poly1305>(encrypt, key, nonce, data, aad),
        _ => Err(IntegrityError),
    }
}

fn run<C: KeyInit + Aead>(
    encrypt: bool,
    key: &[u8],
    nonce: &[u8],
    data: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, IntegrityError> {
    // Sizes are checked upfront, the generic array conversions panic otherwise
    if nonce.len() != <<C as AeadCore>::NonceSize as Unsigned>::USIZE {
        return Err(IntegrityError);
    }
    let cipher = C::new_from_slice(key).map_err(|_| IntegrityError)?;
    let nonce = Nonce::<C>::from_slice(nonce);
    let payload = Payload { msg: data, aad };

    let result = if encrypt {
        cipher.encrypt(nonce, payload)
    } else {
        cipher.decrypt(nonce, payload)
    };
    result.map_err(|_| IntegrityError)
}
