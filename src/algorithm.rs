// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Registry of the supported COSE algorithms and elliptic curves.
//!
//! https://www.iana.org/assignments/cose/cose.xhtml#algorithms
//! https://datatracker.ietf.org/doc/html/rfc9053

use serde::{Deserialize, Deserializer};

/// Error is the failures that can occur while resolving registry entries.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(i64),
    #[error("unknown algorithm name: {0}")]
    UnknownAlgorithmName(String),
    #[error("unsupported curve: {0}")]
    UnsupportedCurve(i64),
}

/// HashAlgorithm is the digest backing a MAC, signature or key derivation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// output_len returns the digest size in bytes.
    pub const fn output_len(self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }
}

/// Curve is an entry of the COSE Elliptic Curves registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Curve {
    P256,
    P384,
    X25519,
    Ed25519,
    Secp256k1,
}

impl Curve {
    /// id returns the registered curve identifier.
    pub const fn id(self) -> i64 {
        match self {
            Curve::P256 => 1,
            Curve::P384 => 2,
            Curve::X25519 => 4,
            Curve::Ed25519 => 6,
            Curve::Secp256k1 => 8,
        }
    }

    /// from_id resolves a registered curve identifier.
    pub fn from_id(id: i64) -> Result<Self, Error> {
        match id {
            1 => Ok(Curve::P256),
            2 => Ok(Curve::P384),
            4 => Ok(Curve::X25519),
            6 => Ok(Curve::Ed25519),
            8 => Ok(Curve::Secp256k1),
            _ => Err(Error::UnsupportedCurve(id)),
        }
    }

    /// name returns the registered curve name.
    pub const fn name(self) -> &'static str {
        match self {
            Curve::P256 => "P-256",
            Curve::P384 => "P-384",
            Curve::X25519 => "X25519",
            Curve::Ed25519 => "Ed25519",
            Curve::Secp256k1 => "secp256k1",
        }
    }

    /// is_okp reports whether keys on this curve are octet key pairs rather
    /// than EC2 points.
    pub const fn is_okp(self) -> bool {
        matches!(self, Curve::X25519 | Curve::Ed25519)
    }

    /// coordinate_len returns the byte size of a coordinate or private scalar.
    pub const fn coordinate_len(self) -> usize {
        match self {
            Curve::P384 => 48,
            _ => 32,
        }
    }
}

/// AeadCipher is the block or stream cipher construction behind an AEAD.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AeadCipher {
    AesGcm,
    AesCcm,
    ChaCha20Poly1305,
}

/// SignatureScheme is the digital signature construction of an algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignatureScheme {
    EdDsa,
    Ecdsa(Curve),
    RsaPss(HashAlgorithm),
    RsaPkcs1(HashAlgorithm),
}

/// KeyDistribution is the way a recipient obtains the content key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyDistribution {
    /// The shared key is used as the content key.
    Direct,
    /// The content key is derived from the shared key with HKDF.
    DirectHkdf { hash: HashAlgorithm },
    /// The content key is wrapped with AES key wrap.
    KeyWrap,
    /// The content key is derived from an ECDH shared secret with HKDF.
    EcdhHkdf { hash: HashAlgorithm, ephemeral: bool },
    /// A key encryption key is derived from an ECDH shared secret with HKDF
    /// and used to wrap the content key.
    EcdhKeyWrap { ephemeral: bool, wrap: Algorithm },
}

/// Family is the algorithm family together with its family specific knobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
    Mac(HashAlgorithm),
    Aead(AeadCipher),
    Signature(SignatureScheme),
    KeyDistribution(KeyDistribution),
}

/// AlgorithmSpec is the full parametrization of a registered algorithm.
///
/// Lengths are in bytes and zero where the algorithm does not constrain them:
/// signature keys are sized by their curve or modulus, and direct key
/// distribution inherits the length of the content algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AlgorithmSpec {
    pub algorithm: Algorithm,
    pub family: Family,
    pub key_len: usize,
    pub tag_len: usize,
    pub nonce_len: usize,
}

impl AlgorithmSpec {
    /// requires_derivation reports whether the algorithm runs a key derivation
    /// step before the content key is available.
    pub const fn requires_derivation(&self) -> bool {
        matches!(
            self.family,
            Family::KeyDistribution(
                KeyDistribution::DirectHkdf { .. }
                    | KeyDistribution::EcdhHkdf { .. }
                    | KeyDistribution::EcdhKeyWrap { .. }
            )
        )
    }

    /// is_direct reports whether the recipient layer carries no ciphertext and
    /// the content key is the shared or derived key itself.
    pub const fn is_direct(&self) -> bool {
        matches!(
            self.family,
            Family::KeyDistribution(
                KeyDistribution::Direct
                    | KeyDistribution::DirectHkdf { .. }
                    | KeyDistribution::EcdhHkdf { .. }
            )
        )
    }
}

/// Algorithm is a supported entry of the COSE Algorithms registry.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Algorithm {
    // HMAC
    Hmac256_64,
    Hmac256,
    Hmac384,
    Hmac512,
    // AEAD
    A128Gcm,
    A192Gcm,
    A256Gcm,
    AesCcm16_64_128,
    AesCcm16_64_256,
    AesCcm64_64_128,
    AesCcm64_64_256,
    AesCcm16_128_128,
    AesCcm16_128_256,
    AesCcm64_128_128,
    AesCcm64_128_256,
    ChaCha20Poly1305,
    // Signatures
    EdDsa,
    Es256,
    Es384,
    Es256K,
    Ps256,
    Ps384,
    Ps512,
    Rs256,
    Rs384,
    Rs512,
    // Key distribution
    Direct,
    DirectHkdfSha256,
    DirectHkdfSha512,
    A128Kw,
    A192Kw,
    A256Kw,
    EcdhEsHkdf256,
    EcdhEsHkdf512,
    EcdhSsHkdf256,
    EcdhSsHkdf512,
    EcdhEsA128Kw,
    EcdhEsA192Kw,
    EcdhEsA256Kw,
    EcdhSsA128Kw,
    EcdhSsA192Kw,
    EcdhSsA256Kw,
}

impl Algorithm {
    /// ALL lists every supported algorithm in registry order.
    pub const ALL: [Algorithm; 42] = [
        Algorithm::Hmac256_64,
        Algorithm::Hmac256,
        Algorithm::Hmac384,
        Algorithm::Hmac512,
        Algorithm::A128Gcm,
        Algorithm::A192Gcm,
        Algorithm::A256Gcm,
        Algorithm::AesCcm16_64_128,
        Algorithm::AesCcm16_64_256,
        Algorithm::AesCcm64_64_128,
        Algorithm::AesCcm64_64_256,
        Algorithm::AesCcm16_128_128,
        Algorithm::AesCcm16_128_256,
        Algorithm::AesCcm64_128_128,
        Algorithm::AesCcm64_128_256,
        Algorithm::ChaCha20Poly1305,
        Algorithm::EdDsa,
        Algorithm::Es256,
        Algorithm::Es384,
        Algorithm::Es256K,
        Algorithm::Ps256,
        Algorithm::Ps384,
        Algorithm::Ps512,
        Algorithm::Rs256,
        Algorithm::Rs384,
        Algorithm::Rs512,
        Algorithm::Direct,
        Algorithm::DirectHkdfSha256,
        Algorithm::DirectHkdfSha512,
        Algorithm::A128Kw,
        Algorithm::A192Kw,
        Algorithm::A256Kw,
        Algorithm::EcdhEsHkdf256,
        Algorithm::EcdhEsHkdf512,
        Algorithm::EcdhSsHkdf256,
        Algorithm::EcdhSsHkdf512,
        Algorithm::EcdhEsA128Kw,
        Algorithm::EcdhEsA192Kw,
        Algorithm::EcdhEsA256Kw,
        Algorithm::EcdhSsA128Kw,
        Algorithm::EcdhSsA192Kw,
        Algorithm::EcdhSsA256Kw,
    ];

    /// id returns the registered algorithm identifier.
    pub const fn id(self) -> i64 {
        match self {
            Algorithm::Hmac256_64 => 4,
            Algorithm::Hmac256 => 5,
            Algorithm::Hmac384 => 6,
            Algorithm::Hmac512 => 7,
            Algorithm::A128Gcm => 1,
            Algorithm::A192Gcm => 2,
            Algorithm::A256Gcm => 3,
            Algorithm::AesCcm16_64_128 => 10,
            Algorithm::AesCcm16_64_256 => 11,
            Algorithm::AesCcm64_64_128 => 12,
            Algorithm::AesCcm64_64_256 => 13,
            Algorithm::AesCcm16_128_128 => 30,
            Algorithm::AesCcm16_128_256 => 31,
            Algorithm::AesCcm64_128_128 => 32,
            Algorithm::AesCcm64_128_256 => 33,
            Algorithm::ChaCha20Poly1305 => 24,
            Algorithm::EdDsa => -8,
            Algorithm::Es256 => -7,
            Algorithm::Es384 => -35,
            Algorithm::Es256K => -47,
            Algorithm::Ps256 => -37,
            Algorithm::Ps384 => -38,
            Algorithm::Ps512 => -39,
            Algorithm::Rs256 => -257,
            Algorithm::Rs384 => -258,
            Algorithm::Rs512 => -259,
            Algorithm::Direct => -6,
            Algorithm::DirectHkdfSha256 => -10,
            Algorithm::DirectHkdfSha512 => -11,
            Algorithm::A128Kw => -3,
            Algorithm::A192Kw => -4,
            Algorithm::A256Kw => -5,
            Algorithm::EcdhEsHkdf256 => -25,
            Algorithm::EcdhEsHkdf512 => -26,
            Algorithm::EcdhSsHkdf256 => -27,
            Algorithm::EcdhSsHkdf512 => -28,
            Algorithm::EcdhEsA128Kw => -29,
            Algorithm::EcdhEsA192Kw => -30,
            Algorithm::EcdhEsA256Kw => -31,
            Algorithm::EcdhSsA128Kw => -32,
            Algorithm::EcdhSsA192Kw => -33,
            Algorithm::EcdhSsA256Kw => -34,
        }
    }

    /// from_id resolves a registered algorithm identifier.
    pub fn from_id(id: i64) -> Result<Self, Error> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.id() == id)
            .ok_or(Error::UnsupportedAlgorithm(id))
    }

    /// name returns the registered algorithm name.
    pub const fn name(self) -> &'static str {
        match self {
            Algorithm::Hmac256_64 => "HMAC 256/64",
            Algorithm::Hmac256 => "HMAC 256/256",
            Algorithm::Hmac384 => "HMAC 384/384",
            Algorithm::Hmac512 => "HMAC 512/512",
            Algorithm::A128Gcm => "A128GCM",
            Algorithm::A192Gcm => "A192GCM",
            Algorithm::A256Gcm => "A256GCM",
            Algorithm::AesCcm16_64_128 => "AES-CCM-16-64-128",
            Algorithm::AesCcm16_64_256 => "AES-CCM-16-64-256",
            Algorithm::AesCcm64_64_128 => "AES-CCM-64-64-128",
            Algorithm::AesCcm64_64_256 => "AES-CCM-64-64-256",
            Algorithm::AesCcm16_128_128 => "AES-CCM-16-128-128",
            Algorithm::AesCcm16_128_256 => "AES-CCM-16-128-256",
            Algorithm::AesCcm64_128_128 => "AES-CCM-64-128-128",
            Algorithm::AesCcm64_128_256 => "AES-CCM-64-128-256",
            Algorithm::ChaCha20Poly1305 => "ChaCha20/Poly1305",
            Algorithm::EdDsa => "EdDSA",
            Algorithm::Es256 => "ES256",
            Algorithm::Es384 => "ES384",
            Algorithm::Es256K => "ES256K",
            Algorithm::Ps256 => "PS256",
            Algorithm::Ps384 => "PS384",
            Algorithm::Ps512 => "PS512",
            Algorithm::Rs256 => "RS256",
            Algorithm::Rs384 => "RS384",
            Algorithm::Rs512 => "RS512",
            Algorithm::Direct => "direct",
            Algorithm::DirectHkdfSha256 => "direct+HKDF-SHA-256",
            Algorithm::DirectHkdfSha512 => "direct+HKDF-SHA-512",
            Algorithm::A128Kw => "A128KW",
            Algorithm::A192Kw => "A192KW",
            Algorithm::A256Kw => "A256KW",
            Algorithm::EcdhEsHkdf256 => "ECDH-ES+HKDF-256",
            Algorithm::EcdhEsHkdf512 => "ECDH-ES+HKDF-512",
            Algorithm::EcdhSsHkdf256 => "ECDH-SS+HKDF-256",
            Algorithm::EcdhSsHkdf512 => "ECDH-SS+HKDF-512",
            Algorithm::EcdhEsA128Kw => "ECDH-ES+A128KW",
            Algorithm::EcdhEsA192Kw => "ECDH-ES+A192KW",
            Algorithm::EcdhEsA256Kw => "ECDH-ES+A256KW",
            Algorithm::EcdhSsA128Kw => "ECDH-SS+A128KW",
            Algorithm::EcdhSsA192Kw => "ECDH-SS+A192KW",
            Algorithm::EcdhSsA256Kw => "ECDH-SS+A256KW",
        }
    }

    /// from_name resolves a registered algorithm name. The JOSE style HMAC
    /// names (HS256, HS384, HS512) are accepted as aliases.
    pub fn from_name(name: &str) -> Result<Self, Error> {
        match name {
            "HS256" => return Ok(Algorithm::Hmac256),
            "HS384" => return Ok(Algorithm::Hmac384),
            "HS512" => return Ok(Algorithm::Hmac512),
            _ => {}
        }
        Self::ALL
            .into_iter()
            .find(|alg| alg.name() == name)
            .ok_or_else(|| Error::UnknownAlgorithmName(name.to_string()))
    }

    /// spec returns the full parametrization of the algorithm.
    pub const fn spec(self) -> AlgorithmSpec {
        use AeadCipher::*;
        use HashAlgorithm::*;

        let (family, key_len, tag_len, nonce_len) = match self {
            Algorithm::Hmac256_64 => (Family::Mac(Sha256), 32, 8, 0),
            Algorithm::Hmac256 => (Family::Mac(Sha256), 32, 32, 0),
            Algorithm::Hmac384 => (Family::Mac(Sha384), 48, 48, 0),
            Algorithm::Hmac512 => (Family::Mac(Sha512), 64, 64, 0),

            Algorithm::A128Gcm => (Family::Aead(AesGcm), 16, 16, 12),
            Algorithm::A192Gcm => (Family::Aead(AesGcm), 24, 16, 12),
            Algorithm::A256Gcm => (Family::Aead(AesGcm), 32, 16, 12),
            Algorithm::AesCcm16_64_128 => (Family::Aead(AesCcm), 16, 8, 13),
            Algorithm::AesCcm16_64_256 => (Family::Aead(AesCcm), 32, 8, 13),
            Algorithm::AesCcm64_64_128 => (Family::Aead(AesCcm), 16, 8, 7),
            Algorithm::AesCcm64_64_256 => (Family::Aead(AesCcm), 32, 8, 7),
            Algorithm::AesCcm16_128_128 => (Family::Aead(AesCcm), 16, 16, 13),
            Algorithm::AesCcm16_128_256 => (Family::Aead(AesCcm), 32, 16, 13),
            Algorithm::AesCcm64_128_128 => (Family::Aead(AesCcm), 16, 16, 7),
            Algorithm::AesCcm64_128_256 => (Family::Aead(AesCcm), 32, 16, 7),
            Algorithm::ChaCha20Poly1305 => (Family::Aead(ChaCha20Poly1305), 32, 16, 12),

            Algorithm::EdDsa => (Family::Signature(SignatureScheme::EdDsa), 0, 0, 0),
            Algorithm::Es256 => (Family::Signature(SignatureScheme::Ecdsa(Curve::P256)), 0, 0, 0),
            Algorithm::Es384 => (Family::Signature(SignatureScheme::Ecdsa(Curve::P384)), 0, 0, 0),
            Algorithm::Es256K => (
                Family::Signature(SignatureScheme::Ecdsa(Curve::Secp256k1)),
                0,
                0,
                0,
            ),
            Algorithm::Ps256 => (Family::Signature(SignatureScheme::RsaPss(Sha256)), 0, 0, 0),
            Algorithm::Ps384 => (Family::Signature(SignatureScheme::RsaPss(Sha384)), 0, 0, 0),
            Algorithm::Ps512 => (Family::Signature(SignatureScheme::RsaPss(Sha512)), 0, 0, 0),
            Algorithm::Rs256 => (Family::Signature(SignatureScheme::RsaPkcs1(Sha256)), 0, 0, 0),
            Algorithm::Rs384 => (Family::Signature(SignatureScheme::RsaPkcs1(Sha384)), 0, 0, 0),
            Algorithm::Rs512 => (Family::Signature(SignatureScheme::RsaPkcs1(Sha512)), 0, 0, 0),

            Algorithm::Direct => (Family::KeyDistribution(KeyDistribution::Direct), 0, 0, 0),
            Algorithm::DirectHkdfSha256 => (
                Family::KeyDistribution(KeyDistribution::DirectHkdf { hash: Sha256 }),
                0,
                0,
                0,
            ),
            Algorithm::DirectHkdfSha512 => (
                Family::KeyDistribution(KeyDistribution::DirectHkdf { hash: Sha512 }),
                0,
                0,
                0,
            ),
            Algorithm::A128Kw => (Family::KeyDistribution(KeyDistribution::KeyWrap), 16, 0, 0),
            Algorithm::A192Kw => (Family::KeyDistribution(KeyDistribution::KeyWrap), 24, 0, 0),
            Algorithm::A256Kw => (Family::KeyDistribution(KeyDistribution::KeyWrap), 32, 0, 0),
            Algorithm::EcdhEsHkdf256 => (ecdh_hkdf(Sha256, true), 0, 0, 0),
            Algorithm::EcdhEsHkdf512 => (ecdh_hkdf(Sha512, true), 0, 0, 0),
            Algorithm::EcdhSsHkdf256 => (ecdh_hkdf(Sha256, false), 0, 0, 0),
            Algorithm::EcdhSsHkdf512 => (ecdh_hkdf(Sha512, false), 0, 0, 0),
            Algorithm::EcdhEsA128Kw => (ecdh_wrap(Algorithm::A128Kw, true), 16, 0, 0),
            Algorithm::EcdhEsA192Kw => (ecdh_wrap(Algorithm::A192Kw, true), 24, 0, 0),
            Algorithm::EcdhEsA256Kw => (ecdh_wrap(Algorithm::A256Kw, true), 32, 0, 0),
            Algorithm::EcdhSsA128Kw => (ecdh_wrap(Algorithm::A128Kw, false), 16, 0, 0),
            Algorithm::EcdhSsA192Kw => (ecdh_wrap(Algorithm::A192Kw, false), 24, 0, 0),
            Algorithm::EcdhSsA256Kw => (ecdh_wrap(Algorithm::A256Kw, false), 32, 0, 0),
        };
        AlgorithmSpec {
            algorithm: self,
            family,
            key_len,
            tag_len,
            nonce_len,
        }
    }
}

const fn ecdh_hkdf(hash: HashAlgorithm, ephemeral: bool) -> Family {
    Family::KeyDistribution(KeyDistribution::EcdhHkdf { hash, ephemeral })
}

const fn ecdh_wrap(wrap: Algorithm, ephemeral: bool) -> Family {
    Family::KeyDistribution(KeyDistribution::EcdhKeyWrap { ephemeral, wrap })
}

/// lookup resolves an algorithm identifier into its parametrization.
pub fn lookup(id: i64) -> Result<AlgorithmSpec, Error> {
    Ok(Algorithm::from_id(id)?.spec())
}

impl<'de> Deserialize<'de> for Algorithm {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Id(i64),
            Name(String),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Id(id) => Algorithm::from_id(id).map_err(serde::de::Error::custom),
            Repr::Name(name) => Algorithm::from_name(&name).map_err(serde::de::Error::custom),
        }
    }
}
