// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Digital signature wrappers for EdDSA, ECDSA and RSA.
//!
//! https://datatracker.ietf.org/doc/html/rfc9053#section-2
//! https://datatracker.ietf.org/doc/html/rfc8230

use super::IntegrityError;
use crate::algorithm::HashAlgorithm;
use p256::ecdsa::signature::{RandomizedSigner, SignatureEncoding, Signer, Verifier};
use rand_core::OsRng;
use rsa::{RsaPrivateKey, RsaPublicKey, pkcs1v15, pss};
use sha2::{Sha256, Sha384, Sha512};

/// ed25519_sign creates a pure Ed25519 signature over msg.
pub fn ed25519_sign(key: &ed25519_dalek::SigningKey, msg: &[u8]) -> Vec<u8> {
    key.sign(msg).to_bytes().to_vec()
}

/// ed25519_verify checks a pure Ed25519 signature over msg.
pub fn ed25519_verify(
    key: &ed25519_dalek::VerifyingKey,
    msg: &[u8],
    sig: &[u8],
) -> Result<(), IntegrityError> {
    let sig = ed25519_dalek::Signature::from_slice(sig).map_err(|_| IntegrityError)?;
    key.verify(msg, &sig).map_err(|_| IntegrityError)
}

// ECDSA signatures are the fixed size r || s concatenation, with the message
// hashed by the digest bound to the curve.
macro_rules! ecdsa {
    ($curve:ident, $sign:ident, $verify:ident) => {
        /// Creates a deterministic ECDSA signature over msg.
        pub fn $sign(key: &$curve::SecretKey, msg: &[u8]) -> Vec<u8> {
            let signer = $curve::ecdsa::SigningKey::from(key);
            let sig: $curve::ecdsa::Signature = signer.sign(msg);
            sig.to_bytes().to_vec()
        }

        /// Checks an ECDSA signature over msg.
        pub fn $verify(
            key: &$curve::PublicKey,
            msg: &[u8],
            sig: &[u8],
        ) -> Result<(), IntegrityError> {
            let verifier = $curve::ecdsa::VerifyingKey::from(key);
            let sig = $curve::ecdsa::Signature::from_slice(sig).map_err(|_| IntegrityError)?;
            verifier.verify(msg, &sig).map_err(|_| IntegrityError)
        }
    };
}

ecdsa!(p256, p256_sign, p256_verify);
ecdsa!(p384, p384_sign, p384_verify);
ecdsa!(k256, k256_sign, k256_verify);

/// RsaPadding selects between the PSS and PKCS#1 v1.5 signature encodings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RsaPadding {
    Pss,
    Pkcs1v15,
}

macro_rules! rsa_sign_with {
    ($hash:ty, $padding:expr, $key:expr, $msg:expr) => {
        match $padding {
            RsaPadding::Pss => pss::BlindedSigningKey::<$hash>::new($key.clone())
                .sign_with_rng(&mut OsRng, $msg)
                .to_vec(),
            RsaPadding::Pkcs1v15 => pkcs1v15::SigningKey::<$hash>::new($key.clone())
                .sign($msg)
                .to_vec(),
        }
    };
}

macro_rules! rsa_verify_with {
    ($hash:ty, $padding:expr, $key:expr, $msg:expr, $sig:expr) => {
        match $padding {
            RsaPadding::Pss => {
                let sig = pss::Signature::try_from($sig).map_err(|_| IntegrityError)?;
                pss::VerifyingKey::<$hash>::new($key.clone())
                    .verify($msg, &sig)
                    .map_err(|_| IntegrityError)
            }
            RsaPadding::Pkcs1v15 => {
                let sig = pkcs1v15::Signature::try_from($sig).map_err(|_| IntegrityError)?;
                pkcs1v15::VerifyingKey::<$hash>::new($key.clone())
                    .verify($msg, &sig)
                    .map_err(|_| IntegrityError)
            }
        }
    };
}

/// rsa_sign creates an RSA signature over msg. PSS uses a salt as long as
/// the digest.
pub fn rsa_sign(
    padding: RsaPadding,
    hash: HashAlgorithm,
    key: &RsaPrivateKey,
    msg: &[u8],
) -> Vec<u8> {
    match hash {
        HashAlgorithm::Sha256 => rsa_sign_with!(Sha256, padding, key, msg),
        HashAlgorithm::Sha384 => rsa_sign_with!(Sha384, padding, key, msg),
        HashAlgorithm::Sha512 => rsa_sign_with!(Sha512, padding, key, msg),
    }
}

/// rsa_verify checks an RSA signature over msg.
pub fn rsa_verify(
    padding: RsaPadding,
    hash: HashAlgorithm,
    key: &RsaPublicKey,
    msg: &[u8],
    sig: &[u8],
) -> Result<(), IntegrityError> {
    match hash {
        HashAlgorithm::Sha256 => rsa_verify_with!(Sha256, padding, key, msg, sig),
        HashAlgorithm::Sha384 => rsa_verify_with!(Sha384, padding, key, msg, sig),
        HashAlgorithm::Sha512 => rsa_verify_with!(Sha512, padding, key, msg, sig),
    }
}
