// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! HKDF cryptography wrappers and parametrization.
//!
//! https://datatracker.ietf.org/doc/html/rfc5869

use crate::algorithm::HashAlgorithm;
use hkdf::Hkdf;
use sha2::{Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

/// key derives a key of `len` bytes from the secret, salt, and info using HKDF
/// with the requested hash function. An empty salt is treated as absent.
///
/// # Panics
///
/// Panics if len exceeds the maximum HKDF output length, which is 255 times
/// the digest size of the hash.
pub fn key(
    hash: HashAlgorithm,
    secret: &[u8],
    salt: &[u8],
    info: &[u8],
    len: usize,
) -> Zeroizing<Vec<u8>> {
    let salt = if salt.is_empty() { None } else { Some(salt) };

    let mut output = Zeroizing::new(vec![0u8; len]);
    let expanded = match hash {
        HashAlgorithm::Sha256 => Hkdf::<Sha256>::new(salt, secret).expand(info, &mut output),
        HashAlgorithm::Sha384 => Hkdf::<Sha384>::new(salt, secret).expand(info, &mut output),
        HashAlgorithm::Sha512 => Hkdf::<Sha512>::new(salt, secret).expand(info, &mut output),
    };
    expanded.unwrap();
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test vectors from RFC 5869 Appendix A (SHA-256), plus the A.1 inputs
    // run through SHA-512.
    #[test]
    fn test_hkdf() {
        struct TestCase {
            hash: HashAlgorithm,
            secret: &'static str,
            salt: &'static str,
            info: &'static str,
            out: &'static str,
        }
        let tests = [
            // RFC 5869 A.1: Basic test case with SHA-256
            TestCase {
                hash: HashAlgorithm::Sha256,
                secret: "0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b",
                salt: "000102030405060708090a0b0c",
                info: "f0f1f2f3f4f5f6f7f8f9",
                out: "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf\
                      34007208d5b887185865",
            },
            // RFC 5869 A.3: Test with SHA-256 and zero-length salt/info
            TestCase {
                hash: HashAlgorithm::Sha256,
                secret: "0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b",
                salt: "",
                info: "",
                out: "8da4e775a563c18f715f802a063c5a31b8a11f5c5ee1879ec3454e5f3c738d2d\
                      9d201395faa4b61a96c8",
            },
            // A.1 inputs with SHA-512
            TestCase {
                hash: HashAlgorithm::Sha512,
                secret: "0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b",
                salt: "000102030405060708090a0b0c",
                info: "f0f1f2f3f4f5f6f7f8f9",
                out: "832390086cda71fb47625bb5ceb168e4c8e26a1a16ed34d9fc7fe92c14815793\
                      38da362cb8d9f925d7cb",
            },
        ];
        for tc in tests {
            let secret = hex::decode(tc.secret).unwrap();
            let salt = hex::decode(tc.salt).unwrap();
            let info = hex::decode(tc.info).unwrap();
            let expected = hex::decode(tc.out).unwrap();

            let got = key(tc.hash, &secret, &salt, &info, expected.len());
            assert_eq!(got.as_slice(), expected.as_slice());
        }
    }
}
