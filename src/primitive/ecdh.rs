// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Elliptic curve Diffie-Hellman wrappers.
//!
//! https://datatracker.ietf.org/doc/html/rfc9053#section-6.3

use super::IntegrityError;
use zeroize::Zeroizing;

/// p256 computes the raw x coordinate of the shared P-256 point.
pub fn p256(secret: &p256::SecretKey, public: &p256::PublicKey) -> Zeroizing<Vec<u8>> {
    let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    Zeroizing::new(shared.raw_secret_bytes().to_vec())
}

/// p384 computes the raw x coordinate of the shared P-384 point.
pub fn p384(secret: &p384::SecretKey, public: &p384::PublicKey) -> Zeroizing<Vec<u8>> {
    let shared = p384::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    Zeroizing::new(shared.raw_secret_bytes().to_vec())
}

/// x25519 computes the X25519 shared secret, rejecting low order peer keys.
pub fn x25519(
    secret: &x25519_dalek::StaticSecret,
    public: &x25519_dalek::PublicKey,
) -> Result<Zeroizing<Vec<u8>>, IntegrityError> {
    let shared = secret.diffie_hellman(public);
    if !shared.was_contributory() {
        return Err(IntegrityError);
    }
    Ok(Zeroizing::new(shared.as_bytes().to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    // Tests that both sides of every curve agree on the same secret.
    #[test]
    fn test_agreement() {
        let alice = p256::SecretKey::random(&mut OsRng);
        let bob = p256::SecretKey::random(&mut OsRng);
        assert_eq!(p256(&alice, &bob.public_key()), p256(&bob, &alice.public_key()));
        assert_eq!(p256(&alice, &bob.public_key()).len(), 32);

        let alice = p384::SecretKey::random(&mut OsRng);
        let bob = p384::SecretKey::random(&mut OsRng);
        assert_eq!(p384(&alice, &bob.public_key()), p384(&bob, &alice.public_key()));
        assert_eq!(p384(&alice, &bob.public_key()).len(), 48);

        let alice = x25519_dalek::StaticSecret::random_from_rng(OsRng);
        let bob = x25519_dalek::StaticSecret::random_from_rng(OsRng);
        assert_eq!(
            x25519(&alice, &x25519_dalek::PublicKey::from(&bob)).unwrap(),
            x25519(&bob, &x25519_dalek::PublicKey::from(&alice)).unwrap()
        );
    }

    // Tests that the all-zero X25519 point is rejected.
    #[test]
    fn test_x25519_low_order() {
        let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
        let zero = x25519_dalek::PublicKey::from([0u8; 32]);
        assert_eq!(x25519(&secret, &zero), Err(IntegrityError));
    }
}
