// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! RSA keys (kty RSA) for PSS and PKCS#1 v1.5 signatures.
//!
//! https://datatracker.ietf.org/doc/html/rfc8230

use super::Error;
use crate::algorithm::HashAlgorithm;
use crate::primitive::signature::{self, RsaPadding};
use crate::primitive::IntegrityError;
use rand_core::OsRng;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

/// COSE Key label for the modulus.
pub const LABEL_N: i64 = -1;
/// COSE Key label for the public exponent.
pub const LABEL_E: i64 = -2;
/// COSE Key label for the private exponent.
pub const LABEL_D: i64 = -3;
/// COSE Key label for the first prime factor.
pub const LABEL_P: i64 = -4;
/// COSE Key label for the second prime factor.
pub const LABEL_Q: i64 = -5;
/// COSE Key label for the first factor CRT exponent.
pub const LABEL_DP: i64 = -6;
/// COSE Key label for the second factor CRT exponent.
pub const LABEL_DQ: i64 = -7;
/// COSE Key label for the CRT coefficient.
pub const LABEL_QINV: i64 = -8;
/// COSE Key label for additional primes of multi-prime keys.
pub const LABEL_OTHER: i64 = -9;

/// Minimum modulus size in bits.
pub const MIN_MODULUS_BITS: usize = 2048;

/// RsaKey is an RSA public key, optionally accompanied by its private half.
#[derive(Clone)]
pub struct RsaKey {
    public: RsaPublicKey,
    secret: Option<RsaPrivateKey>,
}

/// RsaParams holds the raw big-endian parameters of an RSA COSE key.
#[derive(Default)]
pub struct RsaParams<'a> {
    pub n: Option<&'a [u8]>,
    pub e: Option<&'a [u8]>,
    pub d: Option<&'a [u8]>,
    pub p: Option<&'a [u8]>,
    pub q: Option<&'a [u8]>,
    pub dp: Option<&'a [u8]>,
    pub dq: Option<&'a [u8]>,
    pub qinv: Option<&'a [u8]>,
}

fn check_public(key: &RsaPublicKey) -> Result<(), Error> {
    if key.n().bits() < MIN_MODULUS_BITS {
        return Err(Error::InvalidKeyParameter(format!(
            "modulus must be at least {MIN_MODULUS_BITS} bits, got {}",
            key.n().bits()
        )));
    }
    // Whilst the RSA algorithm permits different exponents, every modern
    // system only ever uses 65537 and most also enforce this. Might as
    // well do the same.
    if *key.e() != BigUint::from(65537u32) {
        return Err(Error::InvalidKeyParameter("public exponent must be 65537".into()));
    }
    Ok(())
}

impl RsaKey {
    /// generate creates a new, random private key with a 65537 exponent.
    pub fn generate(bits: usize) -> Result<Self, Error> {
        let secret = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| Error::InvalidKeyParameter(e.to_string()))?;
        Self::from_private(secret)
    }

    /// from_public wraps an RSA public key.
    pub fn from_public(public: RsaPublicKey) -> Result<Self, Error> {
        check_public(&public)?;
        Ok(Self {
            public,
            secret: None,
        })
    }

    /// from_private wraps an RSA private key.
    pub fn from_private(secret: RsaPrivateKey) -> Result<Self, Error> {
        let public = secret.to_public_key();
        check_public(&public)?;
        secret
            .validate()
            .map_err(|e| Error::InvalidKeyParameter(e.to_string()))?;
        Ok(Self {
            public,
            secret: Some(secret),
        })
    }

    /// from_params assembles a key from its COSE parameters. Private keys
    /// need both primes; CRT values, when present, must match the ones
    /// recomputed from the primes.
    pub fn from_params(params: &RsaParams<'_>) -> Result<Self, Error> {
        let (Some(n), Some(e)) = (params.n, params.e) else {
            return Err(Error::MalformedKey("RSA keys need n and e".into()));
        };
        let n = BigUint::from_bytes_be(n);
        let e = BigUint::from_bytes_be(e);

        let Some(d) = params.d else {
            if params.p.is_some() || params.q.is_some() {
                return Err(Error::MalformedKey("RSA primes without d".into()));
            }
            let public = RsaPublicKey::new(n, e)
                .map_err(|e| Error::InvalidKeyParameter(e.to_string()))?;
            return Self::from_public(public);
        };
        let (Some(p), Some(q)) = (params.p, params.q) else {
            return Err(Error::MalformedKey("RSA private keys need p and q".into()));
        };
        let secret = RsaPrivateKey::from_components(
            n,
            e,
            BigUint::from_bytes_be(d),
            vec![BigUint::from_bytes_be(p), BigUint::from_bytes_be(q)],
        )
        .map_err(|e| Error::InvalidKeyParameter(e.to_string()))?;

        // The upstream rsa crate ignores CRT parameters and recomputes them,
        // accepting malformed values. Reject anything that disagrees.
        let crt = [
            ("dP", params.dp, secret.dp().cloned()),
            ("dQ", params.dq, secret.dq().cloned()),
            ("qInv", params.qinv, secret.crt_coefficient()),
        ];
        for (name, given, computed) in crt {
            if let Some(given) = given {
                if computed != Some(BigUint::from_bytes_be(given)) {
                    return Err(Error::InvalidKeyParameter(format!("{name} does not match")));
                }
            }
        }
        Self::from_private(secret)
    }

    /// to_params returns the labelled big-endian parameters of the key, with
    /// the private ones zeroized on drop.
    pub fn to_params(&self) -> Vec<(i64, Zeroizing<Vec<u8>>)> {
        let mut out = vec![
            (LABEL_N, Zeroizing::new(self.public.n().to_bytes_be())),
            (LABEL_E, Zeroizing::new(self.public.e().to_bytes_be())),
        ];
        if let Some(secret) = &self.secret {
            let primes = secret.primes();
            out.push((LABEL_D, Zeroizing::new(secret.d().to_bytes_be())));
            out.push((LABEL_P, Zeroizing::new(primes[0].to_bytes_be())));
            out.push((LABEL_Q, Zeroizing::new(primes[1].to_bytes_be())));
            if let Some(dp) = secret.dp() {
                out.push((LABEL_DP, Zeroizing::new(dp.to_bytes_be())));
            }
            if let Some(dq) = secret.dq() {
                out.push((LABEL_DQ, Zeroizing::new(dq.to_bytes_be())));
            }
            if let Some(qinv) = secret.crt_coefficient() {
                out.push((LABEL_QINV, Zeroizing::new(qinv.to_bytes_be())));
            }
        }
        out
    }

    /// is_private reports whether the private half is present.
    pub fn is_private(&self) -> bool {
        self.secret.is_some()
    }

    /// public_only returns a copy of the key without the private half.
    pub fn public_only(&self) -> Self {
        Self {
            public: self.public.clone(),
            secret: None,
        }
    }

    /// sign creates an RSA signature. It returns None for public keys.
    pub fn sign(&self, padding: RsaPadding, hash: HashAlgorithm, msg: &[u8]) -> Option<Vec<u8>> {
        self.secret
            .as_ref()
            .map(|secret| signature::rsa_sign(padding, hash, secret, msg))
    }

    /// verify checks an RSA signature.
    pub fn verify(
        &self,
        padding: RsaPadding,
        hash: HashAlgorithm,
        msg: &[u8],
        sig: &[u8],
    ) -> Result<(), IntegrityError> {
        signature::rsa_verify(padding, hash, &self.public, msg, sig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::DecodePrivateKey;

    fn test_key() -> RsaPrivateKey {
        RsaPrivateKey::from_pkcs8_pem(include_str!("testdata/rsa2048.pem")).unwrap()
    }

    // Tests that the labelled parameters round trip, both for the private and
    // the public half.
    #[test]
    fn test_params_roundtrip() {
        let key = RsaKey::from_private(test_key()).unwrap();
        let params = key.to_params();
        assert_eq!(params.len(), 8);

        let find = |label: i64| {
            params
                .iter()
                .find(|(l, _)| *l == label)
                .map(|(_, v)| v.as_slice())
        };
        let parsed = RsaKey::from_params(&RsaParams {
            n: find(LABEL_N),
            e: find(LABEL_E),
            d: find(LABEL_D),
            p: find(LABEL_P),
            q: find(LABEL_Q),
            dp: find(LABEL_DP),
            dq: find(LABEL_DQ),
            qinv: find(LABEL_QINV),
        })
        .unwrap();
        assert!(parsed.is_private());
        assert_eq!(parsed.to_params(), params);

        let public = RsaKey::from_params(&RsaParams {
            n: find(LABEL_N),
            e: find(LABEL_E),
            ..Default::default()
        })
        .unwrap();
        assert!(!public.is_private());
        assert_eq!(public.to_params().len(), 2);
    }

    // Tests that inconsistent CRT values and incomplete private keys are
    // rejected.
    #[test]
    fn test_params_reject() {
        let key = RsaKey::from_private(test_key()).unwrap();
        let params = key.to_params();
        let find = |label: i64| {
            params
                .iter()
                .find(|(l, _)| *l == label)
                .map(|(_, v)| v.as_slice())
        };
        let mut dp = find(LABEL_DP).unwrap().to_vec();
        let last = dp.len() - 1;
        dp[last] ^= 0x01;

        let result = RsaKey::from_params(&RsaParams {
            n: find(LABEL_N),
            e: find(LABEL_E),
            d: find(LABEL_D),
            p: find(LABEL_P),
            q: find(LABEL_Q),
            dp: Some(dp.as_slice()),
            ..Default::default()
        });
        assert!(matches!(result, Err(Error::InvalidKeyParameter(_))));

        let result = RsaKey::from_params(&RsaParams {
            n: find(LABEL_N),
            e: find(LABEL_E),
            d: find(LABEL_D),
            ..Default::default()
        });
        assert!(matches!(result, Err(Error::MalformedKey(_))));

        let result = RsaKey::from_params(&RsaParams {
            n: find(LABEL_N),
            ..Default::default()
        });
        assert!(matches!(result, Err(Error::MalformedKey(_))));
    }

    // Tests both paddings with every digest.
    #[test]
    fn test_sign_verify() {
        let key = RsaKey::from_private(test_key()).unwrap();
        let public = key.public_only();
        for padding in [RsaPadding::Pss, RsaPadding::Pkcs1v15] {
            for hash in [HashAlgorithm::Sha256, HashAlgorithm::Sha384, HashAlgorithm::Sha512] {
                let sig = key.sign(padding, hash, b"message").unwrap();
                assert_eq!(sig.len(), 256);
                public.verify(padding, hash, b"message", &sig).unwrap();
                assert_eq!(
                    public.verify(padding, hash, b"massage", &sig),
                    Err(IntegrityError)
                );
            }
        }
        assert!(public.sign(RsaPadding::Pss, HashAlgorithm::Sha256, b"message").is_none());
    }
}
