// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! AES key wrap wrappers.
//!
//! https://datatracker.ietf.org/doc/html/rfc3394

use super::IntegrityError;
use aes::cipher::generic_array::GenericArray;
use aes_kw::{KekAes128, KekAes192, KekAes256};
use zeroize::Zeroizing;

/// wrap encrypts a content key with a 128, 192 or 256 bit key encryption key.
pub fn wrap(kek: &[u8], key: &[u8]) -> Result<Vec<u8>, IntegrityError> {
    let wrapped = match kek.len() {
        16 => KekAes128::new(GenericArray::from_slice(kek)).wrap_vec(key),
        24 => KekAes192::new(GenericArray::from_slice(kek)).wrap_vec(key),
        32 => KekAes256::new(GenericArray::from_slice(kek)).wrap_vec(key),
        _ => return Err(IntegrityError),
    };
    wrapped.map_err(|_| IntegrityError)
}

/// unwrap decrypts and checks the integrity of a wrapped content key.
pub fn unwrap(kek: &[u8], wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, IntegrityError> {
    let key = match kek.len() {
        16 => KekAes128::new(GenericArray::from_slice(kek)).unwrap_vec(wrapped),
        24 => KekAes192::new(GenericArray::from_slice(kek)).unwrap_vec(wrapped),
        32 => KekAes256::new(GenericArray::from_slice(kek)).unwrap_vec(wrapped),
        _ => return Err(IntegrityError),
    };
    key.map(Zeroizing::new).map_err(|_| IntegrityError)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test vectors from RFC 3394 section 4.
    #[test]
    fn test_vectors() {
        struct TestCase {
            kek: &'static str,
            key: &'static str,
            wrapped: &'static str,
        }
        let tests = [
            // 4.1 Wrap 128 bits of Key Data with a 128-bit KEK
            TestCase {
                kek: "000102030405060708090a0b0c0d0e0f",
                key: "00112233445566778899aabbccddeeff",
                wrapped: "1fa68b0a8112b447aef34bd8fb5a7b829d3e862371d2cfe5",
            },
            // 4.2 Wrap 128 bits of Key Data with a 192-bit KEK
            TestCase {
                kek: "000102030405060708090a0b0c0d0e0f1011121314151617",
                key: "00112233445566778899aabbccddeeff",
                wrapped: "96778b25ae6ca435f92b5b97c050aed2468ab8a17ad84e5d",
            },
            // 4.3 Wrap 128 bits of Key Data with a 256-bit KEK
            TestCase {
                kek: "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
                key: "00112233445566778899aabbccddeeff",
                wrapped: "64e8c3f9ce0f5ba263e9777905818a2a93c8191e7d6e8ae7",
            },
        ];
        for tc in tests {
            let kek = hex::decode(tc.kek).unwrap();
            let key = hex::decode(tc.key).unwrap();

            let wrapped = wrap(&kek, &key).unwrap();
            assert_eq!(hex::encode(&wrapped), tc.wrapped);
            assert_eq!(unwrap(&kek, &wrapped).unwrap().as_slice(), key.as_slice());
        }
    }

    // Tests that a wrong key encryption key or a corrupted blob is detected.
    #[test]
    fn test_reject() {
        let wrapped = wrap(&[1u8; 16], &[2u8; 32]).unwrap();
        assert!(unwrap(&[3u8; 16], &wrapped).is_err());

        let mut bad = wrapped.clone();
        bad[5] ^= 0x01;
        assert!(unwrap(&[1u8; 16], &bad).is_err());
        assert!(wrap(&[1u8; 20], &[2u8; 32]).is_err());
    }
}
