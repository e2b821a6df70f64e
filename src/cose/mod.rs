// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! COSE message engine for MAC0/MAC, Sign1/Sign and Encrypt0/Encrypt.
//!
//! https://datatracker.ietf.org/doc/html/rfc9052
//! https://datatracker.ietf.org/doc/html/rfc9053

mod header;
mod recipient;
mod structure;
mod types;

pub use header::{
    ContentType, HEADER_ALGORITHM, HEADER_CONTENT_TYPE, HEADER_CRITICAL, HEADER_EPHEMERAL_KEY,
    HEADER_IV, HEADER_KID, HEADER_PARTIAL_IV, HEADER_PARTY_U_IDENTITY, HEADER_PARTY_U_NONCE,
    HEADER_PARTY_U_OTHER, HEADER_PARTY_V_IDENTITY, HEADER_PARTY_V_NONCE, HEADER_PARTY_V_OTHER,
    HEADER_SALT, HEADER_STATIC_KEY, HEADER_STATIC_KEY_ID, Header, PartyInfo, ProtectedHeader,
};
pub use recipient::Recipient;
pub use structure::{
    CONTEXT_ENCRYPT, CONTEXT_ENCRYPT0, CONTEXT_MAC, CONTEXT_MAC0, CONTEXT_SIGNATURE,
    CONTEXT_SIGNATURE1, EncStructure, KdfContext, MacStructure, SigStructure,
};
pub use types::{
    CoseEncrypt, CoseEncrypt0, CoseMac, CoseMac0, CoseMessage, CoseRecipient, CoseSign,
    CoseSign1, CoseSignature, MessageType, RecipientLayer, TAG_ENCRYPT, TAG_ENCRYPT0, TAG_MAC,
    TAG_MAC0, TAG_SIGN, TAG_SIGN1, detect,
};

use crate::algorithm::{self, Algorithm, Family};
use crate::cbor::{self, Label};
use crate::key::{self, CoseKey, KeyOp};
use crate::primitive::{IntegrityError, aead, mac};
use crate::rand;
use tracing::{debug, trace};

/// Error is the failures that can occur during COSE operations.
///
/// Structural and configuration problems are reported with detail before any
/// cryptography runs. Failed tags, signatures and decryptions all collapse
/// into VerificationFailed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("cbor: {0}")]
    Cbor(#[from] cbor::Error),
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(i64),
    #[error("unsupported critical parameter: {0}")]
    UnsupportedCriticalParameter(Label),
    #[error("invalid key parameter: {0}")]
    InvalidKeyParameter(String),
    #[error("malformed key: {0}")]
    MalformedKey(String),
    #[error("key usage mismatch: {0}")]
    KeyUsageMismatch(String),
    #[error("no algorithm in the headers or the key")]
    MissingAlgorithm,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("verification failed")]
    VerificationFailed,
}

impl From<algorithm::Error> for Error {
    fn from(err: algorithm::Error) -> Self {
        match err {
            algorithm::Error::UnsupportedAlgorithm(id) => Error::UnsupportedAlgorithm(id),
            algorithm::Error::UnsupportedCurve(_) => Error::InvalidKeyParameter(err.to_string()),
            algorithm::Error::UnknownAlgorithmName(_) => Error::InvalidArgument(err.to_string()),
        }
    }
}

impl From<key::Error> for Error {
    fn from(err: key::Error) -> Self {
        match err {
            key::Error::MalformedKey(msg) => Error::MalformedKey(msg),
            key::Error::InvalidKeyParameter(msg) => Error::InvalidKeyParameter(msg),
            key::Error::KeyUsageMismatch(msg) => Error::KeyUsageMismatch(msg),
            key::Error::UnsupportedAlgorithm(id) => Error::UnsupportedAlgorithm(id),
        }
    }
}

impl From<IntegrityError> for Error {
    fn from(_: IntegrityError) -> Self {
        Error::VerificationFailed
    }
}

/// Headers is the pair of header buckets of one message layer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Headers {
    pub protected: Header,
    pub unprotected: Header,
}

impl Headers {
    /// new creates an empty pair of buckets.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_protected(mut self, header: Header) -> Self {
        self.protected = header;
        self
    }

    pub fn with_unprotected(mut self, header: Header) -> Self {
        self.unprotected = header;
        self
    }

    // Resolves the algorithm of a layer: the headers win, then the key's
    // binding, which is moved into the protected bucket.
    fn resolve_alg(&mut self, fallback: Option<Algorithm>) -> Result<Algorithm, Error> {
        if let Some(alg) = self.protected.alg.or(self.unprotected.alg) {
            return Ok(alg);
        }
        let alg = fallback.ok_or(Error::MissingAlgorithm)?;
        self.protected.alg = Some(alg);
        Ok(alg)
    }

    // Advertises the key identifier unless the caller placed one.
    fn place_kid(&mut self, key: &CoseKey) {
        if self.protected.kid.is_none() && self.unprotected.kid.is_none() {
            self.unprotected.kid = key.kid().map(<[u8]>::to_vec);
        }
    }

    // Freezes the protected bucket after checking the pair is consistent.
    // Critical labels set by the producer are its own to understand.
    fn freeze(self) -> Result<(ProtectedHeader, Header), Error> {
        header::check(&self.protected, &self.unprotected, &self.protected.crit)
            .map_err(invalid_argument)?;
        Ok((ProtectedHeader::new(self.protected)?, self.unprotected))
    }
}

/// EncodeOptions tunes message construction.
#[derive(Clone, Debug, Default)]
pub struct EncodeOptions {
    /// Externally supplied data bound into the tag, signature or AEAD.
    pub external_aad: Vec<u8>,
    /// Leaves the payload slot nil; only valid for MAC and signature messages.
    pub detached: bool,
}

/// DecodeOptions tunes message verification.
#[derive(Clone, Debug, Default)]
pub struct DecodeOptions {
    /// Externally supplied data the producer bound into the message.
    pub external_aad: Vec<u8>,
    /// Payload of a message that was encoded detached.
    pub detached_payload: Option<Vec<u8>>,
    /// Critical header labels the caller understands beyond the registered ones.
    pub critical: Vec<Label>,
}

/// Signer is one signer of a COSE_Sign message.
#[derive(Clone, Debug)]
pub struct Signer<'a> {
    pub key: &'a CoseKey,
    pub headers: Headers,
}

impl<'a> Signer<'a> {
    /// new creates a signer with empty headers; the algorithm and key
    /// identifier are taken from the key.
    pub fn new(key: &'a CoseKey) -> Self {
        Self {
            key,
            headers: Headers::default(),
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// Decoded is a verified message: its payload and both body buckets.
#[derive(Clone, Debug, PartialEq)]
pub struct Decoded {
    pub kind: MessageType,
    pub payload: Vec<u8>,
    pub protected: Header,
    pub unprotected: Header,
}

/// mac0 creates a COSE_Mac0 message over the payload.
///
/// - `payload`: The content to authenticate
/// - `key`: The symmetric MAC key
/// - `headers`: Caller headers; alg and kid are filled in from the key
/// - `opts`: External AAD and detached mode
///
/// Returns the tagged, serialized COSE_Mac0.
pub fn mac0(
    payload: &[u8],
    key: &CoseKey,
    mut headers: Headers,
    opts: &EncodeOptions,
) -> Result<Vec<u8>, Error> {
    let alg = headers.resolve_alg(key.alg())?;
    let (hash, tag_len) = mac_params(alg).ok_or_else(|| wrong_family(alg, "MAC"))?;
    key.check(alg, KeyOp::MacCreate)?;
    headers.place_kid(key);
    debug!(kind = "COSE_Mac0", alg = alg.id(), "encoding message");

    // Build and authenticate the MAC_structure
    let (protected, unprotected) = headers.freeze()?;
    let tbm = MacStructure {
        context: CONTEXT_MAC0,
        protected: &protected.bytes,
        external_aad: &opts.external_aad,
        payload,
    }
    .encode()?;
    let tag = mac::compute(hash, secret(key)?, &tbm, tag_len);

    Ok(CoseMessage::Mac0(CoseMac0 {
        protected,
        unprotected,
        payload: (!opts.detached).then(|| payload.to_vec()),
        tag,
    })
    .to_bytes()?)
}

/// mac creates a COSE_Mac message whose MAC key reaches each recipient
/// through its recipient layer.
///
/// If no algorithm is set in the headers, the binding of the first
/// recipient's key is used when it names a MAC algorithm.
pub fn mac(
    payload: &[u8],
    recipients: &[Recipient<'_>],
    mut headers: Headers,
    opts: &EncodeOptions,
) -> Result<Vec<u8>, Error> {
    let fallback = content_alg_hint(recipients, |alg| mac_params(alg).is_some());
    let alg = headers.resolve_alg(fallback)?;
    let (hash, tag_len) = mac_params(alg).ok_or_else(|| wrong_family(alg, "MAC"))?;
    debug!(
        kind = "COSE_Mac",
        alg = alg.id(),
        recipients = recipients.len(),
        "encoding message"
    );
    let (cek, layers) = recipient::encode_recipients(recipients, alg, KeyOp::MacCreate)?;

    let (protected, unprotected) = headers.freeze()?;
    let tbm = MacStructure {
        context: CONTEXT_MAC,
        protected: &protected.bytes,
        external_aad: &opts.external_aad,
        payload,
    }
    .encode()?;
    let tag = mac::compute(hash, secret(&cek)?, &tbm, tag_len);

    Ok(CoseMessage::Mac(CoseMac {
        protected,
        unprotected,
        payload: (!opts.detached).then(|| payload.to_vec()),
        tag,
        recipients: layers.into_iter().map(RecipientLayer::from).collect(),
    })
    .to_bytes()?)
}

/// sign1 creates a COSE_Sign1 message over the payload.
///
/// - `payload`: The content to sign
/// - `key`: The private signing key
/// - `headers`: Caller headers; alg and kid are filled in from the key
/// - `opts`: External AAD and detached mode
///
/// Returns the tagged, serialized COSE_Sign1.
pub fn sign1(
    payload: &[u8],
    key: &CoseKey,
    mut headers: Headers,
    opts: &EncodeOptions,
) -> Result<Vec<u8>, Error> {
    let alg = headers.resolve_alg(key.alg())?;
    if !matches!(alg.spec().family, Family::Signature(_)) {
        return Err(wrong_family(alg, "signature"));
    }
    key.check(alg, KeyOp::Sign)?;
    headers.place_kid(key);
    debug!(kind = "COSE_Sign1", alg = alg.id(), "encoding message");

    // Build and sign the Sig_structure
    let (protected, unprotected) = headers.freeze()?;
    let tbs = SigStructure {
        body_protected: &protected.bytes,
        sign_protected: None,
        external_aad: &opts.external_aad,
        payload,
    }
    .encode()?;
    let signature = key.sign(alg, &tbs)?;

    Ok(CoseMessage::Sign1(CoseSign1 {
        protected,
        unprotected,
        payload: (!opts.detached).then(|| payload.to_vec()),
        signature,
    })
    .to_bytes()?)
}

/// sign creates a COSE_Sign message carrying one signature per signer.
pub fn sign(
    payload: &[u8],
    signers: &[Signer<'_>],
    headers: Headers,
    opts: &EncodeOptions,
) -> Result<Vec<u8>, Error> {
    if signers.is_empty() {
        return Err(Error::InvalidArgument("at least one signer is required".into()));
    }
    debug!(kind = "COSE_Sign", signers = signers.len(), "encoding message");
    let (protected, unprotected) = headers.freeze()?;

    let mut signatures = Vec::with_capacity(signers.len());
    for signer in signers {
        let mut headers = signer.headers.clone();
        let alg = headers.resolve_alg(signer.key.alg())?;
        if !matches!(alg.spec().family, Family::Signature(_)) {
            return Err(wrong_family(alg, "signature"));
        }
        signer.key.check(alg, KeyOp::Sign)?;
        headers.place_kid(signer.key);

        let (sign_protected, sign_unprotected) = headers.freeze()?;
        let tbs = SigStructure {
            body_protected: &protected.bytes,
            sign_protected: Some(&sign_protected.bytes),
            external_aad: &opts.external_aad,
            payload,
        }
        .encode()?;
        signatures.push(CoseSignature {
            signature: signer.key.sign(alg, &tbs)?,
            protected: sign_protected,
            unprotected: sign_unprotected,
        });
    }
    Ok(CoseMessage::Sign(CoseSign {
        protected,
        unprotected,
        payload: (!opts.detached).then(|| payload.to_vec()),
        signatures,
    })
    .to_bytes()?)
}

/// encrypt0 creates a COSE_Encrypt0 message with the payload encrypted under
/// the key. A random IV is generated unless the headers carry an IV or a
/// Partial IV (combined with the key's Base IV).
///
/// - `payload`: The content to encrypt
/// - `key`: The symmetric content encryption key
/// - `headers`: Caller headers; alg, kid and iv are filled in as needed
/// - `opts`: External AAD
///
/// Returns the tagged, serialized COSE_Encrypt0.
pub fn encrypt0(
    payload: &[u8],
    key: &CoseKey,
    headers: Headers,
    opts: &EncodeOptions,
) -> Result<Vec<u8>, Error> {
    Ok(CoseMessage::Encrypt0(seal_encrypt0(payload, key, headers, opts)?).to_bytes()?)
}

/// seal_encrypt0 builds an untagged COSE_Encrypt0 structure.
pub(crate) fn seal_encrypt0(
    payload: &[u8],
    key: &CoseKey,
    mut headers: Headers,
    opts: &EncodeOptions,
) -> Result<CoseEncrypt0, Error> {
    if opts.detached {
        return Err(Error::InvalidArgument("ciphertext cannot be detached".into()));
    }
    let alg = headers.resolve_alg(key.alg())?;
    if !matches!(alg.spec().family, Family::Aead(_)) {
        return Err(wrong_family(alg, "content encryption"));
    }
    key.check(alg, KeyOp::Encrypt)?;
    headers.place_kid(key);
    debug!(kind = "COSE_Encrypt0", alg = alg.id(), "encoding message");

    let nonce = prepare_nonce(&mut headers, alg, key.base_iv())?;
    let (protected, unprotected) = headers.freeze()?;
    let aad = EncStructure {
        context: CONTEXT_ENCRYPT0,
        protected: &protected.bytes,
        external_aad: &opts.external_aad,
    }
    .encode()?;
    let ciphertext = aead::seal(alg, secret(key)?, &nonce, payload, &aad)
        .map_err(|_| Error::InvalidKeyParameter("encryption failed".into()))?;

    Ok(CoseEncrypt0 {
        protected,
        unprotected,
        ciphertext,
    })
}

/// encrypt creates a COSE_Encrypt message whose content key reaches each
/// recipient through its recipient layer.
///
/// If no algorithm is set in the headers, the binding of the first
/// recipient's key is used when it names a content encryption algorithm.
pub fn encrypt(
    payload: &[u8],
    recipients: &[Recipient<'_>],
    mut headers: Headers,
    opts: &EncodeOptions,
) -> Result<Vec<u8>, Error> {
    if opts.detached {
        return Err(Error::InvalidArgument("ciphertext cannot be detached".into()));
    }
    let fallback =
        content_alg_hint(recipients, |alg| matches!(alg.spec().family, Family::Aead(_)));
    let alg = headers.resolve_alg(fallback)?;
    if !matches!(alg.spec().family, Family::Aead(_)) {
        return Err(wrong_family(alg, "content encryption"));
    }
    debug!(
        kind = "COSE_Encrypt",
        alg = alg.id(),
        recipients = recipients.len(),
        "encoding message"
    );
    let (cek, layers) = recipient::encode_recipients(recipients, alg, KeyOp::Encrypt)?;

    let nonce = prepare_nonce(&mut headers, alg, cek.base_iv())?;
    let (protected, unprotected) = headers.freeze()?;
    let aad = EncStructure {
        context: CONTEXT_ENCRYPT,
        protected: &protected.bytes,
        external_aad: &opts.external_aad,
    }
    .encode()?;
    let ciphertext = aead::seal(alg, secret(&cek)?, &nonce, payload, &aad)
        .map_err(|_| Error::InvalidKeyParameter("encryption failed".into()))?;

    Ok(CoseMessage::Encrypt(CoseEncrypt {
        protected,
        unprotected,
        ciphertext,
        recipients: layers.into_iter().map(RecipientLayer::from).collect(),
    })
    .to_bytes()?)
}

/// is_message reports whether data looks like a tagged COSE message. It is
/// a structural check only, meant for callers deciding whether to recurse
/// into a nested token.
pub fn is_message(data: &[u8]) -> bool {
    detect(data).is_some()
}

/// decode verifies or decrypts a tagged COSE message of any of the six
/// shapes and returns its payload.
///
/// Candidate keys are tried in order and the first one that verifies wins.
/// Keys whose kid differs from the one advertised by the message (or its
/// recipient or signer) are skipped. If no key fits the message at all the
/// error is KeyUsageMismatch, otherwise a failed check is the opaque
/// VerificationFailed.
pub fn decode(data: &[u8], keys: &[&CoseKey], opts: &DecodeOptions) -> Result<Vec<u8>, Error> {
    Ok(decode_message(data, keys, opts)?.payload)
}

/// decode_message is decode returning the body headers along with the
/// payload.
pub fn decode_message(
    data: &[u8],
    keys: &[&CoseKey],
    opts: &DecodeOptions,
) -> Result<Decoded, Error> {
    let message = CoseMessage::from_bytes(data)?;
    let kind = message.message_type();
    debug!(kind = kind.name(), candidates = keys.len(), "decoding message");

    let (payload, protected, unprotected) = match message {
        CoseMessage::Mac0(msg) => (open_mac0(&msg, keys, opts)?, msg.protected, msg.unprotected),
        CoseMessage::Mac(msg) => (open_mac(&msg, keys, opts)?, msg.protected, msg.unprotected),
        CoseMessage::Sign1(msg) => {
            (open_sign1(&msg, keys, opts)?, msg.protected, msg.unprotected)
        }
        CoseMessage::Sign(msg) => (open_sign(&msg, keys, opts)?, msg.protected, msg.unprotected),
        CoseMessage::Encrypt0(msg) => {
            (open_encrypt0(&msg, keys, opts)?, msg.protected, msg.unprotected)
        }
        CoseMessage::Encrypt(msg) => {
            (open_encrypt(&msg, keys, opts)?, msg.protected, msg.unprotected)
        }
    };
    Ok(Decoded {
        kind,
        payload,
        protected: protected.header,
        unprotected,
    })
}

fn open_mac0(msg: &CoseMac0, keys: &[&CoseKey], opts: &DecodeOptions) -> Result<Vec<u8>, Error> {
    header::check(&msg.protected.header, &msg.unprotected, &opts.critical)?;
    let alg = body_alg(&msg.protected, &msg.unprotected)?;
    let (hash, tag_len) = mac_params(alg).ok_or_else(|| unexpected_family(alg, "MAC"))?;
    let payload = payload(&msg.payload, opts)?;
    let tbm = MacStructure {
        context: CONTEXT_MAC0,
        protected: &msg.protected.bytes,
        external_aad: &opts.external_aad,
        payload: &payload,
    }
    .encode()?;
    let kid = kid(&msg.protected, &msg.unprotected);

    let mut compatible = false;
    for (i, key) in keys.iter().enumerate() {
        if key.check(alg, KeyOp::MacVerify).is_err() {
            continue;
        }
        compatible = true;
        if !kid_matches(key, kid) {
            continue;
        }
        trace!(candidate = i, "verifying tag");
        if mac::verify(hash, secret(key)?, &tbm, &msg.tag, tag_len).is_ok() {
            return Ok(payload);
        }
    }
    Err(exhausted(compatible))
}

fn open_mac(msg: &CoseMac, keys: &[&CoseKey], opts: &DecodeOptions) -> Result<Vec<u8>, Error> {
    header::check(&msg.protected.header, &msg.unprotected, &opts.critical)?;
    let alg = body_alg(&msg.protected, &msg.unprotected)?;
    let (hash, tag_len) = mac_params(alg).ok_or_else(|| unexpected_family(alg, "MAC"))?;
    let layers = recipient_layers(&msg.recipients, opts);
    let payload = payload(&msg.payload, opts)?;
    let tbm = MacStructure {
        context: CONTEXT_MAC,
        protected: &msg.protected.bytes,
        external_aad: &opts.external_aad,
        payload: &payload,
    }
    .encode()?;

    search_recipients(&layers, keys, alg, KeyOp::MacVerify, |cek| {
        Ok(mac::verify(hash, secret(cek)?, &tbm, &msg.tag, tag_len)
            .is_ok()
            .then(|| payload.clone()))
    })
}

fn open_sign1(msg: &CoseSign1, keys: &[&CoseKey], opts: &DecodeOptions) -> Result<Vec<u8>, Error> {
    header::check(&msg.protected.header, &msg.unprotected, &opts.critical)?;
    let alg = body_alg(&msg.protected, &msg.unprotected)?;
    if !matches!(alg.spec().family, Family::Signature(_)) {
        return Err(unexpected_family(alg, "signature"));
    }
    let payload = payload(&msg.payload, opts)?;
    let tbs = SigStructure {
        body_protected: &msg.protected.bytes,
        sign_protected: None,
        external_aad: &opts.external_aad,
        payload: &payload,
    }
    .encode()?;
    let kid = kid(&msg.protected, &msg.unprotected);

    let mut compatible = false;
    for (i, key) in keys.iter().enumerate() {
        if key.check(alg, KeyOp::Verify).is_err() {
            continue;
        }
        compatible = true;
        if !kid_matches(key, kid) {
            continue;
        }
        trace!(candidate = i, "verifying signature");
        if key.verify(alg, &tbs, &msg.signature).is_ok() {
            return Ok(payload);
        }
    }
    Err(exhausted(compatible))
}

fn open_sign(msg: &CoseSign, keys: &[&CoseKey], opts: &DecodeOptions) -> Result<Vec<u8>, Error> {
    header::check(&msg.protected.header, &msg.unprotected, &opts.critical)?;
    let payload = payload(&msg.payload, opts)?;

    // Validate every signer layer before any signature is checked
    let mut algs = Vec::with_capacity(msg.signatures.len());
    for signature in &msg.signatures {
        header::check(&signature.protected.header, &signature.unprotected, &opts.critical)?;
        let alg = body_alg(&signature.protected, &signature.unprotected)?;
        if !matches!(alg.spec().family, Family::Signature(_)) {
            return Err(unexpected_family(alg, "signature"));
        }
        algs.push(alg);
    }
    let mut compatible = false;
    for (i, key) in keys.iter().enumerate() {
        for (signature, &alg) in msg.signatures.iter().zip(&algs) {
            if key.check(alg, KeyOp::Verify).is_err() {
                continue;
            }
            compatible = true;
            if !kid_matches(key, kid(&signature.protected, &signature.unprotected)) {
                continue;
            }
            let tbs = SigStructure {
                body_protected: &msg.protected.bytes,
                sign_protected: Some(&signature.protected.bytes),
                external_aad: &opts.external_aad,
                payload: &payload,
            }
            .encode()?;
            trace!(candidate = i, "verifying signature");
            if key.verify(alg, &tbs, &signature.signature).is_ok() {
                return Ok(payload);
            }
        }
    }
    Err(exhausted(compatible))
}

/// open_encrypt0 decrypts an untagged COSE_Encrypt0 structure.
pub(crate) fn open_encrypt0(
    msg: &CoseEncrypt0,
    keys: &[&CoseKey],
    opts: &DecodeOptions,
) -> Result<Vec<u8>, Error> {
    header::check(&msg.protected.header, &msg.unprotected, &opts.critical)?;
    let alg = body_alg(&msg.protected, &msg.unprotected)?;
    if !matches!(alg.spec().family, Family::Aead(_)) {
        return Err(unexpected_family(alg, "content encryption"));
    }
    let aad = EncStructure {
        context: CONTEXT_ENCRYPT0,
        protected: &msg.protected.bytes,
        external_aad: &opts.external_aad,
    }
    .encode()?;
    let kid = kid(&msg.protected, &msg.unprotected);

    let mut compatible = false;
    for (i, key) in keys.iter().enumerate() {
        if key.check(alg, KeyOp::Decrypt).is_err() {
            continue;
        }
        let nonce = match nonce(&msg.protected.header, &msg.unprotected, alg, key.base_iv()) {
            Ok(nonce) => nonce,
            Err(Error::KeyUsageMismatch(_)) => continue,
            Err(err) => return Err(err),
        };
        compatible = true;
        if !kid_matches(key, kid) {
            continue;
        }
        trace!(candidate = i, "decrypting content");
        if let Ok(plaintext) = aead::open(alg, secret(key)?, &nonce, &msg.ciphertext, &aad) {
            return Ok(plaintext);
        }
    }
    Err(exhausted(compatible))
}

fn open_encrypt(
    msg: &CoseEncrypt,
    keys: &[&CoseKey],
    opts: &DecodeOptions,
) -> Result<Vec<u8>, Error> {
    header::check(&msg.protected.header, &msg.unprotected, &opts.critical)?;
    let alg = body_alg(&msg.protected, &msg.unprotected)?;
    if !matches!(alg.spec().family, Family::Aead(_)) {
        return Err(unexpected_family(alg, "content encryption"));
    }
    let layers = recipient_layers(&msg.recipients, opts);
    let aad = EncStructure {
        context: CONTEXT_ENCRYPT,
        protected: &msg.protected.bytes,
        external_aad: &opts.external_aad,
    }
    .encode()?;

    search_recipients(&layers, keys, alg, KeyOp::Decrypt, |cek| {
        let nonce = match nonce(&msg.protected.header, &msg.unprotected, alg, cek.base_iv()) {
            Ok(nonce) => nonce,
            Err(Error::KeyUsageMismatch(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        Ok(aead::open(alg, secret(cek)?, &nonce, &msg.ciphertext, &aad).ok())
    })
}

// Validates each recipient layer on its own. A damaged layer only disables
// itself; the others remain candidates.
fn recipient_layers<'a>(
    recipients: &'a [RecipientLayer],
    opts: &DecodeOptions,
) -> Vec<Result<(&'a CoseRecipient, Algorithm), Error>> {
    recipients
        .iter()
        .map(|layer| recipient_layer(layer, opts))
        .collect()
}

fn recipient_layer<'a>(
    layer: &'a RecipientLayer,
    opts: &DecodeOptions,
) -> Result<(&'a CoseRecipient, Algorithm), Error> {
    let recipient = layer.parsed()?;
    header::check(&recipient.protected.header, &recipient.unprotected, &opts.critical)?;
    let alg = body_alg(&recipient.protected, &recipient.unprotected)?;
    if !matches!(alg.spec().family, Family::KeyDistribution(_)) {
        return Err(unexpected_family(alg, "key distribution"));
    }
    Ok((recipient, alg))
}

// Tries every candidate key against every valid recipient layer, keys first,
// and returns the first content the recovered key opens. When no key fits any
// valid layer, a damaged layer's error is reported over the usage mismatch.
fn search_recipients<T>(
    layers: &[Result<(&CoseRecipient, Algorithm), Error>],
    keys: &[&CoseKey],
    content_alg: Algorithm,
    op: KeyOp,
    mut open: impl FnMut(&CoseKey) -> Result<Option<T>, Error>,
) -> Result<T, Error> {
    let mut compatible = false;
    for (i, key) in keys.iter().enumerate() {
        for &(recipient, alg) in layers.iter().flatten() {
            if !recipient::usable(key, alg, content_alg, op) {
                continue;
            }
            compatible = true;
            if !kid_matches(key, kid(&recipient.protected, &recipient.unprotected)) {
                continue;
            }
            trace!(candidate = i, alg = alg.id(), "recovering content key");
            let cek = match recipient::recover_key(recipient, key, content_alg, op, keys) {
                Ok(cek) => cek,
                Err(Error::VerificationFailed | Error::KeyUsageMismatch(_)) => continue,
                Err(err) => return Err(err),
            };
            if let Some(content) = open(&cek)? {
                return Ok(content);
            }
        }
    }
    if !compatible {
        if let Some(Err(err)) = layers.iter().find(|layer| layer.is_err()) {
            return Err(err.clone());
        }
    }
    Err(exhausted(compatible))
}

// Picks the content algorithm bound to the first recipient's key, if it is
// of the wanted family.
fn content_alg_hint(
    recipients: &[Recipient<'_>],
    fits: impl Fn(Algorithm) -> bool,
) -> Option<Algorithm> {
    recipients
        .first()
        .and_then(|r| r.key().alg())
        .filter(|&alg| fits(alg))
}

// Nonce of an encryption layer taken from the headers. Without an IV or
// Partial IV a fresh random IV is placed in the unprotected bucket.
fn prepare_nonce(
    headers: &mut Headers,
    alg: Algorithm,
    base_iv: Option<&[u8]>,
) -> Result<Vec<u8>, Error> {
    let (protected, unprotected) = (&headers.protected, &headers.unprotected);
    let has_iv = protected.iv.is_some() || unprotected.iv.is_some();
    let has_partial = protected.partial_iv.is_some() || unprotected.partial_iv.is_some();
    if !has_iv && !has_partial {
        headers.unprotected.iv = Some(rand::generate(alg.spec().nonce_len));
    }
    nonce(&headers.protected, &headers.unprotected, alg, base_iv).map_err(invalid_argument)
}

// Nonce of an encryption layer: the full IV, or the Partial IV left padded
// to the nonce size and XORed into the key's Base IV.
fn nonce(
    protected: &Header,
    unprotected: &Header,
    alg: Algorithm,
    base_iv: Option<&[u8]>,
) -> Result<Vec<u8>, Error> {
    let size = alg.spec().nonce_len;
    let iv = header::lookup(protected, unprotected, |h| h.iv.as_deref());
    let partial = header::lookup(protected, unprotected, |h| h.partial_iv.as_deref());

    match (iv, partial) {
        (Some(_), Some(_)) => Err(Error::MalformedMessage(
            "IV and Partial IV must not both be present".into(),
        )),
        (Some(iv), None) => {
            if iv.len() != size {
                return Err(Error::MalformedMessage(format!(
                    "IV must be {size} bytes, have {}",
                    iv.len()
                )));
            }
            Ok(iv.to_vec())
        }
        (None, Some(partial)) => {
            if partial.len() > size {
                return Err(Error::MalformedMessage(format!(
                    "Partial IV must be at most {size} bytes, have {}",
                    partial.len()
                )));
            }
            let base = base_iv.ok_or_else(|| {
                Error::KeyUsageMismatch("Partial IV needs a key with a Base IV".into())
            })?;
            if base.len() != size {
                return Err(Error::KeyUsageMismatch(format!(
                    "Base IV must be {size} bytes, have {}",
                    base.len()
                )));
            }
            let mut nonce = base.to_vec();
            for (out, byte) in nonce[size - partial.len()..].iter_mut().zip(partial) {
                *out ^= byte;
            }
            Ok(nonce)
        }
        (None, None) => Err(Error::MalformedMessage("missing IV".into())),
    }
}

fn mac_params(alg: Algorithm) -> Option<(algorithm::HashAlgorithm, usize)> {
    match alg.spec().family {
        Family::Mac(hash) => Some((hash, alg.spec().tag_len)),
        _ => None,
    }
}

fn body_alg(protected: &ProtectedHeader, unprotected: &Header) -> Result<Algorithm, Error> {
    header::lookup(&protected.header, unprotected, |h| h.alg)
        .ok_or_else(|| Error::MalformedMessage("missing algorithm".into()))
}

fn kid<'a>(protected: &'a ProtectedHeader, unprotected: &'a Header) -> Option<&'a [u8]> {
    header::lookup(&protected.header, unprotected, |h| h.kid.as_deref())
}

// A key without kid, or a layer without kid, never rules a key out.
fn kid_matches(key: &CoseKey, kid: Option<&[u8]>) -> bool {
    match (key.kid(), kid) {
        (Some(own), Some(kid)) => own == kid,
        _ => true,
    }
}

fn payload(embedded: &Option<Vec<u8>>, opts: &DecodeOptions) -> Result<Vec<u8>, Error> {
    match (embedded, &opts.detached_payload) {
        (Some(payload), None) => Ok(payload.clone()),
        (None, Some(payload)) => Ok(payload.clone()),
        (Some(_), Some(_)) => Err(Error::InvalidArgument(
            "payload is embedded, a detached one cannot be supplied".into(),
        )),
        (None, None) => Err(Error::InvalidArgument(
            "payload is detached and was not supplied".into(),
        )),
    }
}

fn secret(key: &CoseKey) -> Result<&[u8], Error> {
    key.symmetric_bytes()
        .ok_or_else(|| Error::KeyUsageMismatch("key is not symmetric".into()))
}

fn exhausted(compatible: bool) -> Error {
    if compatible {
        Error::VerificationFailed
    } else {
        Error::KeyUsageMismatch("no candidate key fits the message".into())
    }
}

fn wrong_family(alg: Algorithm, family: &str) -> Error {
    Error::InvalidArgument(format!("{} is not a {family} algorithm", alg.name()))
}

fn unexpected_family(alg: Algorithm, family: &str) -> Error {
    Error::MalformedMessage(format!("{} is not a {family} algorithm", alg.name()))
}

// Header problems found while encoding are the caller's configuration.
fn invalid_argument(err: Error) -> Error {
    match err {
        Error::MalformedMessage(msg) => Error::InvalidArgument(msg),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{Curve, SignatureScheme};
    use crate::cbor::Value;
    use crate::key::{KeyMaterial, OkpKey};

    const PAYLOAD: &[u8] = b"This is the content.";

    fn counting(len: u8) -> Vec<u8> {
        (0..len).collect()
    }

    fn hmac_key() -> CoseKey {
        CoseKey::from_symmetric(Algorithm::Hmac256, Some(&counting(32)))
            .unwrap()
            .with_kid(b"01".to_vec())
    }

    fn aes_key() -> CoseKey {
        CoseKey::from_symmetric(Algorithm::A128Gcm, Some(&counting(16)))
            .unwrap()
            .with_kid(b"01".to_vec())
    }

    fn ed25519_key() -> CoseKey {
        let okp = OkpKey::from_params(Curve::Ed25519, None, Some(&counting(32))).unwrap();
        CoseKey::new(KeyMaterial::Okp(okp))
            .unwrap()
            .with_kid(b"11".to_vec())
            .with_alg(Algorithm::EdDsa)
            .unwrap()
    }

    fn iv() -> Vec<u8> {
        (0x20..0x2c).collect()
    }

    // Tests that every message shape encodes to its literal reference bytes,
    // pinning the protected bytes, structures and layout at once.
    #[test]
    fn test_encode_fixtures() {
        struct TestCase {
            encoded: Vec<u8>,
            want: &'static str,
        }
        let opts = EncodeOptions::default();
        let hmac = hmac_key();
        let aes = aes_key();
        let ed25519 = ed25519_key();

        let tests = [
            TestCase {
                encoded: mac0(PAYLOAD, &hmac, Headers::new(), &opts).unwrap(),
                want: "d18443a10105a10442303154546869732069732074686520636f6e74656e742e582053fc384fae09af17063eb006cdff80432a2bbdabd8abad3873e4dbef082e5778",
            },
            TestCase {
                encoded: mac(
                    PAYLOAD,
                    &[Recipient::new(Algorithm::Direct, &hmac)],
                    Headers::new(),
                    &opts,
                )
                .unwrap(),
                want: "d8618543a10105a054546869732069732074686520636f6e74656e742e5820609fe33b699850963e9107580625f7fec29fae9fd2925c13bd300f6cddc943b2818340a201250442303140",
            },
            TestCase {
                encoded: sign1(PAYLOAD, &ed25519, Headers::new(), &opts).unwrap(),
                want: "d28443a10127a10442313154546869732069732074686520636f6e74656e742e58400b497547d7a31db87246c70e380b31b3f1d76f4ffa640a76c92baf6bb610091fd2845cecd1a9f1aca90dcf7c98a7be5b19543235328a8f9e6503559c8060920e",
            },
            TestCase {
                encoded: sign(PAYLOAD, &[Signer::new(&ed25519)], Headers::new(), &opts).unwrap(),
                want: "d8628440a054546869732069732074686520636f6e74656e742e818343a10127a104423131584033b1bc5508aa69c5dc97f49a09c66b5a14bcdb94851c427133324b6dd57101c4da4ab5294a4b6fa06c8e8f1eee97649df8fb1f37eec35b9d251c99d7b34b8f03",
            },
            TestCase {
                encoded: encrypt0(
                    PAYLOAD,
                    &aes,
                    Headers::new().with_unprotected(Header::new().with_iv(iv())),
                    &opts,
                )
                .unwrap(),
                want: "d08343a10101a204423031054c202122232425262728292a2b5824949d7bd7a6990a29cf20eaf412a0fa0aaddf01b09ab447c39dcef4bb02b5ad744fbbead1",
            },
            TestCase {
                encoded: encrypt(
                    PAYLOAD,
                    &[Recipient::new(Algorithm::Direct, &aes)],
                    Headers::new().with_unprotected(Header::new().with_iv(iv())),
                    &opts,
                )
                .unwrap(),
                want: "d8608443a10101a1054c202122232425262728292a2b5824949d7bd7a6990a29cf20eaf412a0fa0aaddf01b064746e123cec50d63ab9c8ad9ab7e54c818340a201250442303140",
            },
        ];
        for (i, tc) in tests.iter().enumerate() {
            assert_eq!(hex::encode(&tc.encoded), tc.want, "test {i}");

            let key = match i {
                0 | 1 => &hmac,
                2 | 3 => &ed25519,
                _ => &aes,
            };
            let decoded = decode(&tc.encoded, &[key], &DecodeOptions::default()).unwrap();
            assert_eq!(decoded, PAYLOAD, "test {i}");
        }
    }

    // Tests that single recipient shapes round trip with every algorithm of
    // their family.
    #[test]
    fn test_roundtrip_algorithms() {
        let opts = EncodeOptions {
            external_aad: b"external".to_vec(),
            ..Default::default()
        };
        let dopts = DecodeOptions {
            external_aad: b"external".to_vec(),
            ..Default::default()
        };
        let rsa = CoseKey::generate(Algorithm::Ps256).unwrap();
        for alg in Algorithm::ALL {
            let encoded = match alg.spec().family {
                Family::Mac(_) => {
                    let key = CoseKey::generate(alg).unwrap();
                    let encoded = mac0(PAYLOAD, &key, Headers::new(), &opts).unwrap();
                    (encoded, key)
                }
                Family::Aead(_) => {
                    let key = CoseKey::generate(alg).unwrap();
                    let encoded = encrypt0(PAYLOAD, &key, Headers::new(), &opts).unwrap();
                    (encoded, key)
                }
                Family::Signature(scheme) => {
                    let key = match scheme {
                        SignatureScheme::RsaPss(_) | SignatureScheme::RsaPkcs1(_) => {
                            CoseKey::new(rsa.material().clone())
                                .unwrap()
                                .with_alg(alg)
                                .unwrap()
                        }
                        _ => CoseKey::generate(alg).unwrap(),
                    };
                    let encoded = sign1(PAYLOAD, &key, Headers::new(), &opts).unwrap();
                    (encoded, key.public_key().unwrap())
                }
                Family::KeyDistribution(_) => continue,
            };
            let (encoded, key) = encoded;
            assert_eq!(
                decode(&encoded, &[&key], &dopts).unwrap(),
                PAYLOAD,
                "alg {}",
                alg.name()
            );
        }
    }

    // Tests COSE_Encrypt and COSE_Mac through every key distribution
    // algorithm.
    #[test]
    fn test_roundtrip_recipients() {
        let receiver = CoseKey::generate_on(Curve::P256, None).unwrap();
        let x25519 = CoseKey::generate_on(Curve::X25519, None).unwrap();
        let sender = CoseKey::generate_on(Curve::P256, None)
            .unwrap()
            .with_kid(b"sender".to_vec());
        let sender_public = sender.public_key().unwrap();

        for alg in Algorithm::ALL {
            let own = match alg.spec().family {
                Family::KeyDistribution(kind) => match kind {
                    algorithm::KeyDistribution::Direct => {
                        CoseKey::generate(Algorithm::Direct).unwrap()
                    }
                    algorithm::KeyDistribution::DirectHkdf { .. }
                    | algorithm::KeyDistribution::KeyWrap => CoseKey::generate(alg).unwrap(),
                    algorithm::KeyDistribution::EcdhHkdf { ephemeral: true, .. }
                    | algorithm::KeyDistribution::EcdhKeyWrap { ephemeral: true, .. } => {
                        x25519.clone()
                    }
                    _ => receiver.clone(),
                },
                _ => continue,
            };
            let peer = match own.key_type() {
                key::KeyType::Symmetric => own.clone(),
                _ => own.public_key().unwrap(),
            };
            let mut recipient = Recipient::new(alg, &peer);
            if matches!(alg, Algorithm::EcdhSsHkdf256
                | Algorithm::EcdhSsHkdf512
                | Algorithm::EcdhSsA128Kw
                | Algorithm::EcdhSsA192Kw
                | Algorithm::EcdhSsA256Kw)
            {
                recipient = recipient.with_sender(&sender);
            }
            let headers = Headers::new().with_protected(Header::new().with_alg(Algorithm::A256Gcm));
            let encoded = encrypt(
                PAYLOAD,
                std::slice::from_ref(&recipient),
                headers,
                &EncodeOptions::default(),
            )
            .unwrap();
            let decoded =
                decode(&encoded, &[&own, &sender_public], &DecodeOptions::default()).unwrap();
            assert_eq!(decoded, PAYLOAD, "alg {}", alg.name());

            let headers = Headers::new().with_protected(Header::new().with_alg(Algorithm::Hmac256));
            let encoded = mac(
                PAYLOAD,
                std::slice::from_ref(&recipient),
                headers,
                &EncodeOptions::default(),
            )
            .unwrap();
            let decoded =
                decode(&encoded, &[&own, &sender_public], &DecodeOptions::default()).unwrap();
            assert_eq!(decoded, PAYLOAD, "alg {}", alg.name());
        }
    }

    // Tests that flipping a bit in the protected header, the tag or the
    // ciphertext, or changing the advertised kid, fails verification.
    #[test]
    fn test_tamper_detection() {
        let hmac = hmac_key();
        let aes = aes_key();
        let opts = EncodeOptions::default();

        // Protected {1: alg, 3: 0} puts the content type at offset 7 and the
        // last kid byte at offset 12 of both messages.
        let protected = || Header::new().with_content_type(ContentType::Format(0));
        let tagged = mac0(
            PAYLOAD,
            &hmac,
            Headers::new().with_protected(protected()),
            &opts,
        )
        .unwrap();
        let sealed = encrypt0(
            PAYLOAD,
            &aes,
            Headers::new()
                .with_protected(protected())
                .with_unprotected(Header::new().with_iv(iv())),
            &opts,
        )
        .unwrap();

        struct TestCase<'a> {
            data: &'a [u8],
            offset: usize,
            key: &'a CoseKey,
        }
        let tests = [
            TestCase { data: &tagged, offset: 7, key: &hmac },
            TestCase { data: &tagged, offset: tagged.len() - 1, key: &hmac },
            TestCase { data: &tagged, offset: 12, key: &hmac },
            TestCase { data: &sealed, offset: 7, key: &aes },
            TestCase { data: &sealed, offset: sealed.len() - 1, key: &aes },
            TestCase { data: &sealed, offset: 12, key: &aes },
        ];
        for (i, tc) in tests.iter().enumerate() {
            let mut data = tc.data.to_vec();
            data[tc.offset] ^= 0x01;
            let result = decode(&data, &[tc.key], &DecodeOptions::default());
            assert_eq!(result, Err(Error::VerificationFailed), "test {i}");
        }

        // Flipping the alg byte at offset 5 turns HMAC 256/256 into HMAC
        // 256/64. The key is bound to the former, so it is ruled out before
        // any tag is checked and the failure is a usage mismatch.
        let mut data = tagged.clone();
        assert_eq!(data[5], 0x05);
        data[5] ^= 0x01;
        assert!(matches!(
            decode(&data, &[&hmac], &DecodeOptions::default()),
            Err(Error::KeyUsageMismatch(_))
        ));

        // An unbound key of the right length still reaches the tag check
        let unbound = CoseKey::new(hmac.material().clone()).unwrap();
        assert_eq!(
            decode(&data, &[&unbound], &DecodeOptions::default()),
            Err(Error::VerificationFailed)
        );
    }

    // Tests that the first key that verifies wins and earlier failures stay
    // silent.
    #[test]
    fn test_first_match() {
        let k1 = CoseKey::from_symmetric(Algorithm::Hmac256, None).unwrap();
        let k2 = CoseKey::from_symmetric(Algorithm::Hmac256, None).unwrap();
        let encoded = mac0(PAYLOAD, &k2, Headers::new(), &EncodeOptions::default()).unwrap();

        let opts = DecodeOptions::default();
        assert_eq!(decode(&encoded, &[&k1, &k2], &opts).unwrap(), PAYLOAD);
        assert_eq!(
            decode(&encoded, &[&k1], &opts).unwrap_err(),
            Error::VerificationFailed
        );
        // An incompatible key alone is a usage problem, not a failed check
        let signer = CoseKey::generate(Algorithm::EdDsa).unwrap();
        assert!(matches!(
            decode(&encoded, &[&signer], &opts),
            Err(Error::KeyUsageMismatch(_))
        ));
        assert_eq!(decode(&encoded, &[&signer, &k2], &opts).unwrap(), PAYLOAD);
    }

    // Tests that either recipient recovers the payload and that damaging one
    // recipient layer leaves the other intact.
    #[test]
    fn test_multi_recipient() {
        let r1 = CoseKey::from_symmetric(Algorithm::A128Kw, None)
            .unwrap()
            .with_kid(b"r1".to_vec());
        let r2 = CoseKey::from_symmetric(Algorithm::A256Kw, None)
            .unwrap()
            .with_kid(b"r2".to_vec());
        let encoded = encrypt(
            PAYLOAD,
            &[
                Recipient::new(Algorithm::A128Kw, &r1),
                Recipient::new(Algorithm::A256Kw, &r2),
            ],
            Headers::new().with_protected(Header::new().with_alg(Algorithm::A128Gcm)),
            &EncodeOptions::default(),
        )
        .unwrap();

        let opts = DecodeOptions::default();
        assert_eq!(decode(&encoded, &[&r1], &opts).unwrap(), PAYLOAD);
        assert_eq!(decode(&encoded, &[&r2], &opts).unwrap(), PAYLOAD);

        // Corrupt the wrapped key of the first recipient
        let CoseMessage::Encrypt(mut msg) = CoseMessage::from_bytes(&encoded).unwrap() else {
            panic!("not an Encrypt message");
        };
        let RecipientLayer::Parsed(first) = &mut msg.recipients[0] else {
            panic!("first recipient did not parse");
        };
        first.ciphertext[0] ^= 0x01;
        let corrupted = CoseMessage::Encrypt(msg).to_bytes().unwrap();

        assert_eq!(
            decode(&corrupted, &[&r1], &opts).unwrap_err(),
            Error::VerificationFailed
        );
        assert_eq!(decode(&corrupted, &[&r2], &opts).unwrap(), PAYLOAD);
    }

    // Tests that a recipient layer which does not parse or names an unknown
    // algorithm only disables itself, for both multi-recipient shapes.
    #[test]
    fn test_damaged_recipient_layer() {
        // Replaces one field of the first recipient layer of a message
        fn damage(encoded: &[u8], recipients_at: usize, field: usize, value: Value) -> Vec<u8> {
            let Value::Tag(tag, mut body) = cbor::decode(encoded).unwrap() else {
                panic!("message is not tagged");
            };
            let Value::Array(fields) = body.as_mut() else {
                panic!("message is not an array");
            };
            let Value::Array(recipients) = &mut fields[recipients_at] else {
                panic!("recipients are not an array");
            };
            let Value::Array(layer) = &mut recipients[0] else {
                panic!("recipient is not an array");
            };
            layer[field] = value;
            cbor::encode(&Value::Tag(tag, body)).unwrap()
        }

        let r1 = CoseKey::from_symmetric(Algorithm::A128Kw, None)
            .unwrap()
            .with_kid(b"r1".to_vec());
        let r2 = CoseKey::from_symmetric(Algorithm::A256Kw, None)
            .unwrap()
            .with_kid(b"r2".to_vec());
        let recipients = [
            Recipient::new(Algorithm::A128Kw, &r1),
            Recipient::new(Algorithm::A256Kw, &r2),
        ];
        let enc = EncodeOptions::default();
        let messages = [
            (
                encrypt(
                    PAYLOAD,
                    &recipients,
                    Headers::new().with_protected(Header::new().with_alg(Algorithm::A128Gcm)),
                    &enc,
                )
                .unwrap(),
                3,
            ),
            (
                mac(
                    PAYLOAD,
                    &recipients,
                    Headers::new().with_protected(Header::new().with_alg(Algorithm::Hmac256)),
                    &enc,
                )
                .unwrap(),
                4,
            ),
        ];

        struct TestCase {
            field: usize,
            value: Value,
            unusable: fn(&Error) -> bool,
        }
        let tests = [
            TestCase {
                field: 1,
                value: Value::Map(vec![(Value::from(1), Value::from(-65535))]),
                unusable: |err| matches!(err, Error::UnsupportedAlgorithm(-65535)),
            },
            TestCase {
                field: 0,
                value: Value::Bytes(vec![0xff]),
                unusable: |err| matches!(err, Error::MalformedMessage(_)),
            },
            TestCase {
                field: 2,
                value: Value::Text("not a wrapped key".into()),
                unusable: |err| matches!(err, Error::MalformedMessage(_)),
            },
        ];
        let opts = DecodeOptions::default();
        for (i, tc) in tests.iter().enumerate() {
            for (encoded, recipients_at) in &messages {
                let damaged = damage(encoded, *recipients_at, tc.field, tc.value.clone());

                // The intact layer still recovers the payload
                assert_eq!(decode(&damaged, &[&r2], &opts).unwrap(), PAYLOAD, "test {i}");
                assert_eq!(decode(&damaged, &[&r1, &r2], &opts).unwrap(), PAYLOAD, "test {i}");

                // The damaged layer is kept verbatim on re-encoding
                let msg = CoseMessage::from_bytes(&damaged).unwrap();
                assert_eq!(msg.to_bytes().unwrap(), damaged, "test {i}");

                // Without a key for any intact layer the damage is reported
                let err = decode(&damaged, &[&r1], &opts).unwrap_err();
                assert!((tc.unusable)(&err), "test {i}: {err:?}");
            }
        }
    }

    // Tests that a signed message inside an encrypted one decodes through two
    // caller driven layers.
    #[test]
    fn test_nested_decode() {
        let inner_key = ed25519_key();
        let outer_key = aes_key();
        let opts = EncodeOptions::default();

        let inner = sign1(PAYLOAD, &inner_key, Headers::new(), &opts).unwrap();
        let outer = encrypt0(&inner, &outer_key, Headers::new(), &opts).unwrap();
        assert!(is_message(&outer));
        assert!(!is_message(PAYLOAD));

        let keys = [&outer_key, &inner_key];
        let mut data = outer;
        let mut layers = 0;
        while is_message(&data) {
            data = decode(&data, &keys, &DecodeOptions::default()).unwrap();
            layers += 1;
        }
        assert_eq!(layers, 2);
        assert_eq!(data, PAYLOAD);
    }

    // Tests that an unknown critical header fails even with a valid tag, and
    // passes once the caller acknowledges it.
    #[test]
    fn test_critical_rejection() {
        let key = hmac_key();
        let headers = Headers::new().with_protected(
            Header::new()
                .with_param("x-unknown", cbor::Value::Bool(true))
                .with_critical(&[Label::from("x-unknown")]),
        );
        let encoded = mac0(PAYLOAD, &key, headers, &EncodeOptions::default()).unwrap();

        assert_eq!(
            decode(&encoded, &[&key], &DecodeOptions::default()).unwrap_err(),
            Error::UnsupportedCriticalParameter(Label::from("x-unknown"))
        );
        let opts = DecodeOptions {
            critical: vec![Label::from("x-unknown")],
            ..Default::default()
        };
        assert_eq!(decode(&encoded, &[&key], &opts).unwrap(), PAYLOAD);
    }

    // Tests that neither headers nor key naming an algorithm is rejected,
    // and that header algorithms win over the key's absence.
    #[test]
    fn test_missing_algorithm() {
        let unbound = CoseKey::new(KeyMaterial::Symmetric(counting(32).into())).unwrap();
        let opts = EncodeOptions::default();

        assert_eq!(
            mac0(PAYLOAD, &unbound, Headers::new(), &opts).unwrap_err(),
            Error::MissingAlgorithm
        );
        let headers = Headers::new().with_protected(Header::new().with_alg(Algorithm::Hmac256));
        let encoded = mac0(PAYLOAD, &unbound, headers, &opts).unwrap();
        assert_eq!(
            hex::encode(&encoded[..7]),
            "d18443a10105a0",
            "alg must be protected, no kid advertised"
        );
    }

    // Tests Partial IV handling against the key's Base IV.
    #[test]
    fn test_partial_iv() {
        let key = aes_key().with_base_iv(vec![0u8; 12]);
        let headers =
            || Headers::new().with_unprotected(Header::new().with_partial_iv(vec![0x01, 0x02]));
        let encoded = encrypt0(PAYLOAD, &key, headers(), &EncodeOptions::default()).unwrap();
        assert_eq!(
            decode(&encoded, &[&key], &DecodeOptions::default()).unwrap(),
            PAYLOAD
        );
        // Without a Base IV the key cannot serve the message
        let plain = aes_key();
        assert!(matches!(
            encrypt0(PAYLOAD, &plain, headers(), &EncodeOptions::default()),
            Err(Error::KeyUsageMismatch(_))
        ));
        assert!(matches!(
            decode(&encoded, &[&plain], &DecodeOptions::default()),
            Err(Error::KeyUsageMismatch(_))
        ));
        // Both IV kinds at once are rejected
        let both = Headers::new()
            .with_unprotected(Header::new().with_iv(iv()).with_partial_iv(vec![0x01]));
        assert!(matches!(
            encrypt0(PAYLOAD, &key, both, &EncodeOptions::default()),
            Err(Error::InvalidArgument(_))
        ));
    }

    // Tests detached payloads for MAC and signature messages.
    #[test]
    fn test_detached_payload() {
        let hmac = hmac_key();
        let ed25519 = ed25519_key();
        let opts = EncodeOptions {
            detached: true,
            ..Default::default()
        };
        let tagged = mac0(PAYLOAD, &hmac, Headers::new(), &opts).unwrap();
        let signed = sign1(PAYLOAD, &ed25519, Headers::new(), &opts).unwrap();

        for (data, key) in [(&tagged, &hmac), (&signed, &ed25519)] {
            assert!(matches!(
                decode(data, &[key], &DecodeOptions::default()),
                Err(Error::InvalidArgument(_))
            ));
            let dopts = DecodeOptions {
                detached_payload: Some(PAYLOAD.to_vec()),
                ..Default::default()
            };
            assert_eq!(decode(data, &[key], &dopts).unwrap(), PAYLOAD);

            let dopts = DecodeOptions {
                detached_payload: Some(b"other content".to_vec()),
                ..Default::default()
            };
            assert_eq!(
                decode(data, &[key], &dopts).unwrap_err(),
                Error::VerificationFailed
            );
        }
        assert!(matches!(
            encrypt0(PAYLOAD, &aes_key(), Headers::new(), &opts),
            Err(Error::InvalidArgument(_))
        ));
    }

    // Tests that a COSE_Sign verifies with any one of its signers.
    #[test]
    fn test_sign_multiple() {
        let ed25519 = ed25519_key();
        let p256 = CoseKey::generate(Algorithm::Es256)
            .unwrap()
            .with_kid(b"22".to_vec());
        let encoded = sign(
            PAYLOAD,
            &[Signer::new(&ed25519), Signer::new(&p256)],
            Headers::new(),
            &EncodeOptions::default(),
        )
        .unwrap();

        let opts = DecodeOptions::default();
        for key in [ed25519.public_key().unwrap(), p256.public_key().unwrap()] {
            assert_eq!(decode(&encoded, &[&key], &opts).unwrap(), PAYLOAD);
        }
        let other = CoseKey::generate(Algorithm::Es256).unwrap();
        assert_eq!(
            decode(&encoded, &[&other], &opts).unwrap_err(),
            Error::VerificationFailed
        );
    }

    // Tests the claims scenario over HMAC 256/256 with a fresh key.
    #[test]
    fn test_hmac_claims() {
        let claims = cbor::canonical_map(vec![
            (cbor::Value::from(1), cbor::Value::Text("https://as.example".into())),
            (cbor::Value::from(2), cbor::Value::Text("dajiaji".into())),
            (cbor::Value::from(7), cbor::bstr(b"123")),
        ])
        .unwrap();
        let payload = cbor::encode(&claims).unwrap();

        let key = CoseKey::from_symmetric(Algorithm::Hmac256, None).unwrap();
        let other = CoseKey::from_symmetric(Algorithm::Hmac256, None).unwrap();
        let encoded = mac0(&payload, &key, Headers::new(), &EncodeOptions::default()).unwrap();

        let decoded = decode(&encoded, &[&key], &DecodeOptions::default()).unwrap();
        assert_eq!(cbor::decode(&decoded).unwrap(), claims);
        assert_eq!(
            decode(&encoded, &[&other], &DecodeOptions::default()).unwrap_err(),
            Error::VerificationFailed
        );
    }
}
