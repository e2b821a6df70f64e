// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Elliptic curve keys with x and y coordinates (kty EC2).

use super::Error;
use crate::algorithm::Curve;
use crate::primitive::{IntegrityError, ecdh, signature};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::OsRng;
use zeroize::Zeroizing;

/// Ec2Key is a public key on one of the supported short Weierstrass curves,
/// optionally accompanied by its private scalar.
#[derive(Clone)]
pub enum Ec2Key {
    P256 {
        public: p256::PublicKey,
        secret: Option<p256::SecretKey>,
    },
    P384 {
        public: p384::PublicKey,
        secret: Option<p384::SecretKey>,
    },
    Secp256k1 {
        public: k256::PublicKey,
        secret: Option<k256::SecretKey>,
    },
}

// Assembles a key from raw coordinates, deriving the public point from the
// private scalar when the coordinates are omitted.
macro_rules! from_params_on {
    ($curve:ident, $variant:ident, $x:expr, $y:expr, $d:expr) => {{
        let secret = match $d {
            Some(d) => Some(
                $curve::SecretKey::from_slice(d)
                    .map_err(|_| Error::InvalidKeyParameter("d is not a valid scalar".into()))?,
            ),
            None => None,
        };
        let public = match ($x, $y) {
            (Some(x), Some(y)) => {
                let mut sec1 = Vec::with_capacity(1 + x.len() + y.len());
                sec1.push(0x04);
                sec1.extend_from_slice(x);
                sec1.extend_from_slice(y);
                $curve::PublicKey::from_sec1_bytes(&sec1).map_err(|_| {
                    Error::InvalidKeyParameter("x and y are not a point on the curve".into())
                })?
            }
            (None, None) => match &secret {
                Some(secret) => secret.public_key(),
                None => return Err(Error::MalformedKey("missing x and y".into())),
            },
            _ => return Err(Error::MalformedKey("x and y must be present together".into())),
        };
        if let Some(secret) = &secret {
            if secret.public_key() != public {
                return Err(Error::InvalidKeyParameter("d does not match x and y".into()));
            }
        }
        Ec2Key::$variant { public, secret }
    }};
}

macro_rules! coordinates {
    ($public:expr) => {{
        let point = $public.to_encoded_point(false);
        let bytes = point.as_bytes();
        let half = (bytes.len() - 1) / 2;
        (bytes[1..1 + half].to_vec(), bytes[1 + half..].to_vec())
    }};
}

impl Ec2Key {
    /// generate creates a new, random key pair on the given curve.
    pub fn generate(curve: Curve) -> Result<Self, Error> {
        match curve {
            Curve::P256 => {
                let secret = p256::SecretKey::random(&mut OsRng);
                Ok(Ec2Key::P256 {
                    public: secret.public_key(),
                    secret: Some(secret),
                })
            }
            Curve::P384 => {
                let secret = p384::SecretKey::random(&mut OsRng);
                Ok(Ec2Key::P384 {
                    public: secret.public_key(),
                    secret: Some(secret),
                })
            }
            Curve::Secp256k1 => {
                let secret = k256::SecretKey::random(&mut OsRng);
                Ok(Ec2Key::Secp256k1 {
                    public: secret.public_key(),
                    secret: Some(secret),
                })
            }
            _ => Err(Error::InvalidKeyParameter(format!(
                "{} is not an EC2 curve",
                curve.name()
            ))),
        }
    }

    /// from_params assembles a key from its COSE parameters. Coordinates and
    /// the scalar must be exactly as long as the curve's field elements.
    pub fn from_params(
        curve: Curve,
        x: Option<&[u8]>,
        y: Option<&[u8]>,
        d: Option<&[u8]>,
    ) -> Result<Self, Error> {
        let size = curve.coordinate_len();
        for (name, param) in [("x", x), ("y", y), ("d", d)] {
            if let Some(param) = param {
                if param.len() != size {
                    return Err(Error::InvalidKeyParameter(format!(
                        "{name} must be {size} bytes for {}, got {}",
                        curve.name(),
                        param.len()
                    )));
                }
            }
        }
        let key = match curve {
            Curve::P256 => from_params_on!(p256, P256, x, y, d),
            Curve::P384 => from_params_on!(p384, P384, x, y, d),
            Curve::Secp256k1 => from_params_on!(k256, Secp256k1, x, y, d),
            _ => {
                return Err(Error::InvalidKeyParameter(format!(
                    "{} is not an EC2 curve",
                    curve.name()
                )));
            }
        };
        Ok(key)
    }

    /// to_params returns the uncompressed x and y coordinates and, for private
    /// keys, the scalar d.
    pub fn to_params(&self) -> (Vec<u8>, Vec<u8>, Option<Zeroizing<Vec<u8>>>) {
        match self {
            Ec2Key::P256 { public, secret } => {
                let (x, y) = coordinates!(public);
                (x, y, secret.as_ref().map(|s| Zeroizing::new(s.to_bytes().to_vec())))
            }
            Ec2Key::P384 { public, secret } => {
                let (x, y) = coordinates!(public);
                (x, y, secret.as_ref().map(|s| Zeroizing::new(s.to_bytes().to_vec())))
            }
            Ec2Key::Secp256k1 { public, secret } => {
                let (x, y) = coordinates!(public);
                (x, y, secret.as_ref().map(|s| Zeroizing::new(s.to_bytes().to_vec())))
            }
        }
    }

    /// curve returns the curve the key lives on.
    pub fn curve(&self) -> Curve {
        match self {
            Ec2Key::P256 { .. } => Curve::P256,
            Ec2Key::P384 { .. } => Curve::P384,
            Ec2Key::Secp256k1 { .. } => Curve::Secp256k1,
        }
    }

    /// is_private reports whether the private scalar is present.
    pub fn is_private(&self) -> bool {
        match self {
            Ec2Key::P256 { secret, .. } => secret.is_some(),
            Ec2Key::P384 { secret, .. } => secret.is_some(),
            Ec2Key::Secp256k1 { secret, .. } => secret.is_some(),
        }
    }

    /// public_only returns a copy of the key without the private scalar.
    pub fn public_only(&self) -> Self {
        match self {
            Ec2Key::P256 { public, .. } => Ec2Key::P256 {
                public: public.clone(),
                secret: None,
            },
            Ec2Key::P384 { public, .. } => Ec2Key::P384 {
                public: public.clone(),
                secret: None,
            },
            Ec2Key::Secp256k1 { public, .. } => Ec2Key::Secp256k1 {
                public: public.clone(),
                secret: None,
            },
        }
    }

    /// sign creates an ECDSA signature with the digest bound to the curve.
    /// It returns None for public keys.
    pub fn sign(&self, msg: &[u8]) -> Option<Vec<u8>> {
        match self {
            Ec2Key::P256 { secret, .. } => secret.as_ref().map(|s| signature::p256_sign(s, msg)),
            Ec2Key::P384 { secret, .. } => secret.as_ref().map(|s| signature::p384_sign(s, msg)),
            Ec2Key::Secp256k1 { secret, .. } => {
                secret.as_ref().map(|s| signature::k256_sign(s, msg))
            }
        }
    }

    /// verify checks an ECDSA signature.
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> Result<(), IntegrityError> {
        match self {
            Ec2Key::P256 { public, .. } => signature::p256_verify(public, msg, sig),
            Ec2Key::P384 { public, .. } => signature::p384_verify(public, msg, sig),
            Ec2Key::Secp256k1 { public, .. } => signature::k256_verify(public, msg, sig),
        }
    }

    /// agree runs ECDH between this private key and a peer's public key on
    /// the same curve.
    pub fn agree(&self, peer: &Ec2Key) -> Result<Zeroizing<Vec<u8>>, Error> {
        match (self, peer) {
            (
                Ec2Key::P256 {
                    secret: Some(secret),
                    ..
                },
                Ec2Key::P256 { public, .. },
            ) => Ok(ecdh::p256(secret, public)),
            (
                Ec2Key::P384 {
                    secret: Some(secret),
                    ..
                },
                Ec2Key::P384 { public, .. },
            ) => Ok(ecdh::p384(secret, public)),
            _ if !self.is_private() => {
                Err(Error::KeyUsageMismatch("key agreement requires a private key".into()))
            }
            _ if self.curve() != peer.curve() => Err(Error::KeyUsageMismatch(format!(
                "peer key is on {}, want {}",
                peer.curve().name(),
                self.curve().name()
            ))),
            _ => Err(Error::KeyUsageMismatch(format!(
                "key agreement is not supported on {}",
                self.curve().name()
            ))),
        }
    }
}
