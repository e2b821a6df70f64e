// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! DER key import from PKCS#8 private keys and SPKI public keys.

use super::{Ec2Key, Error, KeyMaterial, OkpKey, RsaKey};
use crate::algorithm::Curve;
use const_oid::ObjectIdentifier;
use der::Decode;
use der::asn1::OctetStringRef;
use pkcs8::{DecodePrivateKey, PrivateKeyInfo};
use spki::{DecodePublicKey, SubjectPublicKeyInfoRef};

const ID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const ID_SECP256R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const ID_SECP384R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");
const ID_SECP256K1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.10");
const ID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");
const ID_X25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.110");
const ID_RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

fn invalid(err: impl std::fmt::Display) -> Error {
    Error::InvalidKeyParameter(err.to_string())
}

fn unsupported_curve(oid: ObjectIdentifier) -> Error {
    Error::InvalidKeyParameter(format!("unsupported curve {oid}"))
}

/// private_key parses a DER encoded PKCS#8 private key.
pub fn private_key(der: &[u8]) -> Result<KeyMaterial, Error> {
    let info = PrivateKeyInfo::try_from(der).map_err(invalid)?;
    let oid = info.algorithm.oid;

    if oid == ID_EC_PUBLIC_KEY {
        let curve = info.algorithm.parameters_oid().map_err(invalid)?;
        let key = if curve == ID_SECP256R1 {
            let secret = p256::SecretKey::from_pkcs8_der(der).map_err(invalid)?;
            Ec2Key::P256 {
                public: secret.public_key(),
                secret: Some(secret),
            }
        } else if curve == ID_SECP384R1 {
            let secret = p384::SecretKey::from_pkcs8_der(der).map_err(invalid)?;
            Ec2Key::P384 {
                public: secret.public_key(),
                secret: Some(secret),
            }
        } else if curve == ID_SECP256K1 {
            let secret = k256::SecretKey::from_pkcs8_der(der).map_err(invalid)?;
            Ec2Key::Secp256k1 {
                public: secret.public_key(),
                secret: Some(secret),
            }
        } else {
            return Err(unsupported_curve(curve));
        };
        return Ok(KeyMaterial::Ec2(key));
    }
    if oid == ID_ED25519 {
        let secret = ed25519_dalek::SigningKey::from_pkcs8_der(der).map_err(invalid)?;
        return Ok(KeyMaterial::Okp(OkpKey::Ed25519 {
            public: secret.verifying_key(),
            secret: Some(secret),
        }));
    }
    if oid == ID_X25519 {
        // The private key is an OCTET STRING wrapped in the outer one
        let inner = OctetStringRef::from_der(info.private_key).map_err(invalid)?;
        let key = OkpKey::from_params(Curve::X25519, None, Some(inner.as_bytes()))?;
        return Ok(KeyMaterial::Okp(key));
    }
    if oid == ID_RSA_ENCRYPTION {
        let secret = rsa::RsaPrivateKey::from_pkcs8_der(der).map_err(invalid)?;
        return Ok(KeyMaterial::Rsa(RsaKey::from_private(secret)?));
    }
    Err(Error::InvalidKeyParameter(format!("unsupported key algorithm {oid}")))
}

/// public_key parses a DER encoded SubjectPublicKeyInfo.
pub fn public_key(der: &[u8]) -> Result<KeyMaterial, Error> {
    let info = SubjectPublicKeyInfoRef::try_from(der).map_err(invalid)?;
    let oid = info.algorithm.oid;

    if oid == ID_EC_PUBLIC_KEY {
        let curve = info.algorithm.parameters_oid().map_err(invalid)?;
        let key = if curve == ID_SECP256R1 {
            Ec2Key::P256 {
                public: p256::PublicKey::from_public_key_der(der).map_err(invalid)?,
                secret: None,
            }
        } else if curve == ID_SECP384R1 {
            Ec2Key::P384 {
                public: p384::PublicKey::from_public_key_der(der).map_err(invalid)?,
                secret: None,
            }
        } else if curve == ID_SECP256K1 {
            Ec2Key::Secp256k1 {
                public: k256::PublicKey::from_public_key_der(der).map_err(invalid)?,
                secret: None,
            }
        } else {
            return Err(unsupported_curve(curve));
        };
        return Ok(KeyMaterial::Ec2(key));
    }
    if oid == ID_ED25519 {
        let public = ed25519_dalek::VerifyingKey::from_public_key_der(der).map_err(invalid)?;
        return Ok(KeyMaterial::Okp(OkpKey::Ed25519 {
            public,
            secret: None,
        }));
    }
    if oid == ID_X25519 {
        let x = info
            .subject_public_key
            .as_bytes()
            .ok_or_else(|| Error::InvalidKeyParameter("unaligned X25519 public key".into()))?;
        return Ok(KeyMaterial::Okp(OkpKey::from_params(Curve::X25519, Some(x), None)?));
    }
    if oid == ID_RSA_ENCRYPTION {
        let public = rsa::RsaPublicKey::from_public_key_der(der).map_err(invalid)?;
        return Ok(KeyMaterial::Rsa(RsaKey::from_public(public)?));
    }
    Err(Error::InvalidKeyParameter(format!("unsupported key algorithm {oid}")))
}
