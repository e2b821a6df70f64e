// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Octet key pairs (kty OKP) for Ed25519 signatures and X25519 agreement.
//!
//! https://datatracker.ietf.org/doc/html/rfc8032
//! https://datatracker.ietf.org/doc/html/rfc7748

use super::Error;
use crate::algorithm::Curve;
use crate::primitive::{IntegrityError, ecdh, signature};
use rand_core::OsRng;
use zeroize::Zeroizing;

/// Size of Ed25519 and X25519 public and private keys in bytes.
pub const OKP_KEY_SIZE: usize = 32;

/// OkpKey is an Ed25519 or X25519 public key, optionally accompanied by its
/// private half.
#[derive(Clone)]
pub enum OkpKey {
    Ed25519 {
        public: ed25519_dalek::VerifyingKey,
        secret: Option<ed25519_dalek::SigningKey>,
    },
    X25519 {
        public: x25519_dalek::PublicKey,
        secret: Option<x25519_dalek::StaticSecret>,
    },
}

fn fixed(name: &str, param: &[u8]) -> Result<[u8; OKP_KEY_SIZE], Error> {
    param.try_into().map_err(|_| {
        Error::InvalidKeyParameter(format!(
            "{name} must be {OKP_KEY_SIZE} bytes, got {}",
            param.len()
        ))
    })
}

impl OkpKey {
    /// generate creates a new, random key pair on the given curve.
    pub fn generate(curve: Curve) -> Result<Self, Error> {
        match curve {
            Curve::Ed25519 => {
                let secret = ed25519_dalek::SigningKey::generate(&mut OsRng);
                Ok(OkpKey::Ed25519 {
                    public: secret.verifying_key(),
                    secret: Some(secret),
                })
            }
            Curve::X25519 => {
                let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
                Ok(OkpKey::X25519 {
                    public: x25519_dalek::PublicKey::from(&secret),
                    secret: Some(secret),
                })
            }
            _ => Err(Error::InvalidKeyParameter(format!(
                "{} is not an OKP curve",
                curve.name()
            ))),
        }
    }

    /// from_params assembles a key from its COSE parameters. The public key is
    /// derived from d if x is omitted.
    pub fn from_params(curve: Curve, x: Option<&[u8]>, d: Option<&[u8]>) -> Result<Self, Error> {
        let x = x.map(|x| fixed("x", x)).transpose()?;
        let d = d.map(|d| fixed("d", d).map(Zeroizing::new)).transpose()?;

        match curve {
            Curve::Ed25519 => {
                let secret = d.map(|d| ed25519_dalek::SigningKey::from_bytes(&d));
                let public = match (x, &secret) {
                    (Some(x), _) => ed25519_dalek::VerifyingKey::from_bytes(&x).map_err(|_| {
                        Error::InvalidKeyParameter("x is not a valid Ed25519 point".into())
                    })?,
                    (None, Some(secret)) => secret.verifying_key(),
                    (None, None) => return Err(Error::MalformedKey("missing x".into())),
                };
                if let Some(secret) = &secret {
                    if secret.verifying_key() != public {
                        return Err(Error::InvalidKeyParameter("d does not match x".into()));
                    }
                }
                Ok(OkpKey::Ed25519 { public, secret })
            }
            Curve::X25519 => {
                let secret = d.map(|d| x25519_dalek::StaticSecret::from(*d));
                let public = match (x, &secret) {
                    (Some(x), _) => x25519_dalek::PublicKey::from(x),
                    (None, Some(secret)) => x25519_dalek::PublicKey::from(secret),
                    (None, None) => return Err(Error::MalformedKey("missing x".into())),
                };
                if let Some(secret) = &secret {
                    if x25519_dalek::PublicKey::from(secret) != public {
                        return Err(Error::InvalidKeyParameter("d does not match x".into()));
                    }
                }
                Ok(OkpKey::X25519 { public, secret })
            }
            _ => Err(Error::InvalidKeyParameter(format!(
                "{} is not an OKP curve",
                curve.name()
            ))),
        }
    }

    /// to_params returns the public key x and, for private keys, d.
    pub fn to_params(&self) -> (Vec<u8>, Option<Zeroizing<Vec<u8>>>) {
        match self {
            OkpKey::Ed25519 { public, secret } => (
                public.as_bytes().to_vec(),
                secret.as_ref().map(|s| Zeroizing::new(s.to_bytes().to_vec())),
            ),
            OkpKey::X25519 { public, secret } => (
                public.as_bytes().to_vec(),
                secret.as_ref().map(|s| Zeroizing::new(s.to_bytes().to_vec())),
            ),
        }
    }

    /// curve returns the curve the key lives on.
    pub fn curve(&self) -> Curve {
        match self {
            OkpKey::Ed25519 { .. } => Curve::Ed25519,
            OkpKey::X25519 { .. } => Curve::X25519,
        }
    }

    /// is_private reports whether the private half is present.
    pub fn is_private(&self) -> bool {
        match self {
            OkpKey::Ed25519 { secret, .. } => secret.is_some(),
            OkpKey::X25519 { secret, .. } => secret.is_some(),
        }
    }

    /// public_only returns a copy of the key without the private half.
    pub fn public_only(&self) -> Self {
        match self {
            OkpKey::Ed25519 { public, .. } => OkpKey::Ed25519 {
                public: *public,
                secret: None,
            },
            OkpKey::X25519 { public, .. } => OkpKey::X25519 {
                public: *public,
                secret: None,
            },
        }
    }

    /// sign creates a pure Ed25519 signature. It returns None for public or
    /// X25519 keys.
    pub fn sign(&self, msg: &[u8]) -> Option<Vec<u8>> {
        match self {
            OkpKey::Ed25519 {
                secret: Some(secret),
                ..
            } => Some(signature::ed25519_sign(secret, msg)),
            _ => None,
        }
    }

    /// verify checks a pure Ed25519 signature.
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> Result<(), IntegrityError> {
        match self {
            OkpKey::Ed25519 { public, .. } => signature::ed25519_verify(public, msg, sig),
            OkpKey::X25519 { .. } => Err(IntegrityError),
        }
    }

    /// agree runs X25519 between this private key and a peer's public key.
    pub fn agree(&self, peer: &OkpKey) -> Result<Zeroizing<Vec<u8>>, Error> {
        match (self, peer) {
            (
                OkpKey::X25519 {
                    secret: Some(secret),
                    ..
                },
                OkpKey::X25519 { public, .. },
            ) => ecdh::x25519(secret, public)
                .map_err(|_| Error::InvalidKeyParameter("peer key has low order".into())),
            (OkpKey::X25519 { secret: None, .. }, _) => {
                Err(Error::KeyUsageMismatch("key agreement requires a private key".into()))
            }
            _ => Err(Error::KeyUsageMismatch(
                "key agreement requires X25519 keys on both sides".into(),
            )),
        }
    }
}
