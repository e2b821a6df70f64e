// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Recipient layers of COSE_Mac and COSE_Encrypt: how the content key is
//! shared with, wrapped for, or agreed with each recipient.
//!
//! https://datatracker.ietf.org/doc/html/rfc9052#section-8.5
//! https://datatracker.ietf.org/doc/html/rfc9053#section-6

use super::Error;
use super::header::{self, Header, ProtectedHeader};
use super::structure::KdfContext;
use super::types::CoseRecipient;
use crate::algorithm::{Algorithm, Family, KeyDistribution};
use crate::key::{self, CoseKey, KeyOp};
use crate::primitive::keywrap;
use crate::rand;

/// Size of the salt generated for direct+HKDF recipients.
pub const SALT_SIZE: usize = 32;

/// Recipient describes one recipient of a COSE_Mac or COSE_Encrypt message:
/// the key distribution algorithm, the recipient's key (the shared secret,
/// the key encryption key, or the recipient's public key for key agreement)
/// and the headers of the recipient layer.
#[derive(Clone, Debug)]
pub struct Recipient<'a> {
    alg: Algorithm,
    key: &'a CoseKey,
    sender: Option<&'a CoseKey>,
    protected: Header,
    unprotected: Header,
}

impl<'a> Recipient<'a> {
    /// new creates a recipient using the given key distribution algorithm.
    pub fn new(alg: Algorithm, key: &'a CoseKey) -> Self {
        Self {
            alg,
            key,
            sender: None,
            protected: Header::default(),
            unprotected: Header::default(),
        }
    }

    /// with_sender sets the sender's static private key, needed by the
    /// ECDH-SS algorithms.
    pub fn with_sender(mut self, sender: &'a CoseKey) -> Self {
        self.sender = Some(sender);
        self
    }

    /// with_protected sets the protected bucket of the recipient layer.
    pub fn with_protected(mut self, header: Header) -> Self {
        self.protected = header;
        self
    }

    /// with_unprotected sets the unprotected bucket of the recipient layer.
    pub fn with_unprotected(mut self, header: Header) -> Self {
        self.unprotected = header;
        self
    }

    pub fn alg(&self) -> Algorithm {
        self.alg
    }

    pub fn key(&self) -> &'a CoseKey {
        self.key
    }

    fn distribution(&self) -> Result<KeyDistribution, Error> {
        match self.alg.spec().family {
            Family::KeyDistribution(kind) => Ok(kind),
            _ => Err(Error::InvalidArgument(format!(
                "{} is not a key distribution algorithm",
                self.alg.name()
            ))),
        }
    }

    // Places the algorithm and the key identifier unless the caller already
    // did. Algorithms running a KDF bind the algorithm through the protected
    // bucket, the others leave the protected bucket empty.
    fn headers(&self) -> (Header, Header) {
        let mut protected = self.protected.clone();
        let mut unprotected = self.unprotected.clone();
        if protected.alg.is_none() && unprotected.alg.is_none() {
            if self.alg.spec().requires_derivation() {
                protected.alg = Some(self.alg);
            } else {
                unprotected.alg = Some(self.alg);
            }
        }
        if protected.kid.is_none() && unprotected.kid.is_none() {
            unprotected.kid = self.key.kid().map(<[u8]>::to_vec);
        }
        (protected, unprotected)
    }

    // Picks the private half of the key agreement and advertises its public
    // half to the recipient.
    fn agreement_key(&self, ephemeral: bool, unprotected: &mut Header) -> Result<CoseKey, Error> {
        if ephemeral {
            let curve = self.key.curve().ok_or_else(|| {
                Error::KeyUsageMismatch("key agreement needs a curve key".into())
            })?;
            let own = CoseKey::generate_on(curve, None)?;
            unprotected.ephemeral_key = Some(own.public_key()?.to_map()?);
            return Ok(own);
        }
        let sender = self.sender.ok_or_else(|| {
            Error::InvalidArgument(format!("{} needs a sender key", self.alg.name()))
        })?;
        sender.check(self.alg, KeyOp::DeriveKey)?;
        match sender.kid() {
            Some(kid) => unprotected.static_key_id = Some(kid.to_vec()),
            None => unprotected.static_key = Some(sender.public_key()?.to_map()?),
        }
        Ok(sender.clone())
    }

    // Builds a recipient whose key is, or derives, the content key itself.
    fn encode_direct(
        &self,
        content_alg: Algorithm,
        op: KeyOp,
    ) -> Result<(CoseKey, CoseRecipient), Error> {
        let (protected, mut unprotected) = self.headers();
        let (cek, protected) = match self.distribution()? {
            KeyDistribution::Direct => {
                check_direct(self.key, content_alg, op)?;
                (self.key.clone(), ProtectedHeader::new(protected)?)
            }
            KeyDistribution::DirectHkdf { .. } => {
                self.key.check(self.alg, KeyOp::DeriveKey)?;
                if protected.salt.is_none() && unprotected.salt.is_none() {
                    unprotected.salt = Some(rand::generate(SALT_SIZE));
                }
                let salt = header::lookup(&protected, &unprotected, |h| h.salt.clone())
                    .unwrap_or_default();
                let protected = ProtectedHeader::new(protected)?;
                let context = kdf_context(content_alg, &protected, &unprotected)?;
                let cek = self.key.expand_key(self.alg, &salt, &context, content_alg)?;
                (cek, protected)
            }
            KeyDistribution::EcdhHkdf { ephemeral, .. } => {
                check_peer(self.key, self.alg)?;
                let own = self.agreement_key(ephemeral, &mut unprotected)?;
                let salt = header::lookup(&protected, &unprotected, |h| h.salt.clone())
                    .unwrap_or_default();
                let protected = ProtectedHeader::new(protected)?;
                let context = kdf_context(content_alg, &protected, &unprotected)?;
                let cek = own.derive_key(self.key, self.alg, &salt, &context, content_alg)?;
                (cek, protected)
            }
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "{} does not share the content key directly",
                    self.alg.name()
                )));
            }
        };
        Ok((
            cek,
            CoseRecipient {
                protected,
                unprotected,
                ciphertext: Vec::new(),
            },
        ))
    }

    // Builds a recipient carrying the content key wrapped for it.
    fn encode_wrapped(&self, cek: &CoseKey) -> Result<CoseRecipient, Error> {
        let (protected, mut unprotected) = self.headers();
        let secret = cek
            .symmetric_bytes()
            .ok_or_else(|| Error::InvalidArgument("content key must be symmetric".into()))?;

        let (protected, ciphertext) = match self.distribution()? {
            KeyDistribution::KeyWrap => {
                self.key.check(self.alg, KeyOp::WrapKey)?;
                let kek = self.key.symmetric_bytes().ok_or_else(|| {
                    Error::KeyUsageMismatch("key wrapping needs a symmetric key".into())
                })?;
                let protected = ProtectedHeader::new(protected)?;
                (protected, wrap(kek, secret)?)
            }
            KeyDistribution::EcdhKeyWrap { ephemeral, wrap: kw } => {
                check_peer(self.key, self.alg)?;
                let own = self.agreement_key(ephemeral, &mut unprotected)?;
                let salt = header::lookup(&protected, &unprotected, |h| h.salt.clone())
                    .unwrap_or_default();
                let protected = ProtectedHeader::new(protected)?;
                let context = kdf_context(kw, &protected, &unprotected)?;
                let kek = own.derive_key(self.key, self.alg, &salt, &context, kw)?;
                let kek = kek
                    .symmetric_bytes()
                    .ok_or_else(|| Error::InvalidArgument("derived key must be symmetric".into()))?;
                let wrapped = wrap(kek, secret)?;
                (protected, wrapped)
            }
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "{} does not wrap the content key",
                    self.alg.name()
                )));
            }
        };
        Ok(CoseRecipient {
            protected,
            unprotected,
            ciphertext,
        })
    }
}

fn wrap(kek: &[u8], secret: &[u8]) -> Result<Vec<u8>, Error> {
    keywrap::wrap(kek, secret)
        .map_err(|_| Error::InvalidKeyParameter("key wrapping failed".into()))
}

// Checks a shared key used as the content key. Keys bound to the direct
// algorithm itself may protect content of any algorithm they fit.
fn check_direct(key: &CoseKey, content_alg: Algorithm, op: KeyOp) -> Result<(), Error> {
    if key.alg() != Some(Algorithm::Direct) {
        return Ok(key.check(content_alg, op)?);
    }
    if !key.supports(content_alg) {
        return Err(Error::KeyUsageMismatch(format!(
            "direct key cannot be used with {}",
            content_alg.name()
        )));
    }
    Ok(key.ensure(op)?)
}

/// usable reports whether a candidate key can serve a recipient layer of
/// the given algorithm, without running any cryptography.
pub(crate) fn usable(key: &CoseKey, alg: Algorithm, content_alg: Algorithm, op: KeyOp) -> bool {
    match alg.spec().family {
        Family::KeyDistribution(KeyDistribution::Direct) => {
            check_direct(key, content_alg, op).is_ok()
        }
        Family::KeyDistribution(KeyDistribution::KeyWrap) => {
            key.check(alg, KeyOp::UnwrapKey).is_ok()
        }
        Family::KeyDistribution(_) => key.check(alg, KeyOp::DeriveKey).is_ok(),
        _ => false,
    }
}

// Checks a peer's public key against a key agreement algorithm. Unlike
// CoseKey::check, no private half is required.
fn check_peer(peer: &CoseKey, alg: Algorithm) -> Result<(), Error> {
    if let Some(own) = peer.alg() {
        if own != alg {
            return Err(Error::KeyUsageMismatch(format!(
                "recipient key is bound to {}, not {}",
                own.name(),
                alg.name()
            )));
        }
    }
    if !peer.supports(alg) {
        return Err(Error::KeyUsageMismatch(format!(
            "recipient key cannot be used with {}",
            alg.name()
        )));
    }
    Ok(())
}

// Serializes the KDF context of a recipient layer.
fn kdf_context(
    target: Algorithm,
    protected: &ProtectedHeader,
    unprotected: &Header,
) -> Result<Vec<u8>, Error> {
    let party_u = header::lookup(&protected.header, unprotected, |h| {
        (!h.party_u.is_empty()).then_some(&h.party_u)
    });
    let party_v = header::lookup(&protected.header, unprotected, |h| {
        (!h.party_v.is_empty()).then_some(&h.party_v)
    });
    let empty = header::PartyInfo::default();
    KdfContext {
        algorithm: target,
        party_u: party_u.unwrap_or(&empty),
        party_v: party_v.unwrap_or(&empty),
        key_len: key::derived_len(target)?,
        protected: &protected.bytes,
    }
    .encode()
}

/// encode_recipients builds the recipient layers of a message and returns
/// the content key the body must be protected with. Direct recipients share
/// or derive that key and must not be mixed with wrapping ones; key wrapping
/// recipients each get a fresh random content key wrapped for them.
pub(crate) fn encode_recipients(
    recipients: &[Recipient<'_>],
    content_alg: Algorithm,
    op: KeyOp,
) -> Result<(CoseKey, Vec<CoseRecipient>), Error> {
    if recipients.is_empty() {
        return Err(Error::InvalidArgument("at least one recipient is required".into()));
    }
    let direct = recipients
        .iter()
        .filter(|r| r.alg.spec().is_direct())
        .count();
    if direct == 0 {
        let cek = CoseKey::from_symmetric(content_alg, None)?;
        let layers = recipients
            .iter()
            .map(|r| r.encode_wrapped(&cek))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok((cek, layers));
    }
    if direct != recipients.len() {
        return Err(Error::InvalidArgument(
            "direct recipients cannot be mixed with key wrapping ones".into(),
        ));
    }
    if recipients.len() > 1 && recipients.iter().any(|r| r.alg != Algorithm::Direct) {
        return Err(Error::InvalidArgument(
            "key derivation recipients must be the only recipient".into(),
        ));
    }
    let mut cek: Option<CoseKey> = None;
    let mut layers = Vec::with_capacity(recipients.len());
    for recipient in recipients {
        let (key, layer) = recipient.encode_direct(content_alg, op)?;
        if let Some(shared) = &cek {
            if shared.symmetric_bytes() != key.symmetric_bytes() {
                return Err(Error::InvalidArgument(
                    "direct recipients must share the same key".into(),
                ));
            }
        } else {
            cek = Some(key);
        }
        layers.push(layer);
    }
    let cek = cek.ok_or_else(|| Error::InvalidArgument("no content key".into()))?;
    Ok((cek, layers))
}

/// recover_key recovers the content key of a message from one recipient
/// layer with one candidate key. Key usage problems are reported as
/// KeyUsageMismatch before any cryptography runs; failed unwrapping is
/// reported as the opaque VerificationFailed. `keys` is searched for the
/// sender's static key when the layer only names it by identifier.
pub(crate) fn recover_key(
    recipient: &CoseRecipient,
    key: &CoseKey,
    content_alg: Algorithm,
    op: KeyOp,
    keys: &[&CoseKey],
) -> Result<CoseKey, Error> {
    let protected = &recipient.protected;
    let unprotected = &recipient.unprotected;
    let alg = header::lookup(&protected.header, unprotected, |h| h.alg)
        .ok_or_else(|| Error::MalformedMessage("recipient has no algorithm".into()))?;
    let Family::KeyDistribution(kind) = alg.spec().family else {
        return Err(Error::MalformedMessage(format!(
            "{} is not a key distribution algorithm",
            alg.name()
        )));
    };
    let salt = header::lookup(&protected.header, unprotected, |h| h.salt.clone())
        .unwrap_or_default();

    match kind {
        KeyDistribution::Direct => {
            check_direct(key, content_alg, op)?;
            Ok(key.clone())
        }
        KeyDistribution::DirectHkdf { .. } => {
            key.check(alg, KeyOp::DeriveKey)?;
            let context = kdf_context(content_alg, protected, unprotected)?;
            Ok(key.expand_key(alg, &salt, &context, content_alg)?)
        }
        KeyDistribution::EcdhHkdf { ephemeral, .. } => {
            key.check(alg, KeyOp::DeriveKey)?;
            let peer = sender_key(recipient, ephemeral, keys)?;
            let context = kdf_context(content_alg, protected, unprotected)?;
            Ok(key.derive_key(&peer, alg, &salt, &context, content_alg)?)
        }
        KeyDistribution::KeyWrap => {
            key.check(alg, KeyOp::UnwrapKey)?;
            let kek = key.symmetric_bytes().ok_or_else(|| {
                Error::KeyUsageMismatch("key unwrapping needs a symmetric key".into())
            })?;
            unwrap(kek, &recipient.ciphertext, content_alg)
        }
        KeyDistribution::EcdhKeyWrap { ephemeral, wrap } => {
            key.check(alg, KeyOp::DeriveKey)?;
            let peer = sender_key(recipient, ephemeral, keys)?;
            let context = kdf_context(wrap, protected, unprotected)?;
            let kek = key.derive_key(&peer, alg, &salt, &context, wrap)?;
            let kek = kek
                .symmetric_bytes()
                .ok_or(Error::VerificationFailed)?;
            unwrap(kek, &recipient.ciphertext, content_alg)
        }
    }
}

fn unwrap(kek: &[u8], wrapped: &[u8], content_alg: Algorithm) -> Result<CoseKey, Error> {
    let secret = keywrap::unwrap(kek, wrapped).map_err(|_| Error::VerificationFailed)?;
    CoseKey::from_symmetric(content_alg, Some(&secret)).map_err(|_| Error::VerificationFailed)
}

// Finds the sender's public key of a key agreement layer.
fn sender_key(
    recipient: &CoseRecipient,
    ephemeral: bool,
    keys: &[&CoseKey],
) -> Result<CoseKey, Error> {
    let protected = &recipient.protected.header;
    let unprotected = &recipient.unprotected;
    if ephemeral {
        let map = header::lookup(protected, unprotected, |h| h.ephemeral_key.as_ref())
            .ok_or_else(|| Error::MalformedMessage("missing ephemeral key".into()))?;
        return Ok(CoseKey::from_map(map)?);
    }
    if let Some(map) = header::lookup(protected, unprotected, |h| h.static_key.as_ref()) {
        return Ok(CoseKey::from_map(map)?);
    }
    let kid = header::lookup(protected, unprotected, |h| h.static_key_id.as_deref())
        .ok_or_else(|| Error::MalformedMessage("missing static key".into()))?;
    keys.iter()
        .find(|k| k.kid() == Some(kid))
        .map(|k| k.public_key())
        .transpose()?
        .ok_or_else(|| Error::KeyUsageMismatch("unknown static sender key".into()))
}
