// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! CBOR Web Tokens on top of the COSE message engine.
//!
//! <https://datatracker.ietf.org/doc/html/rfc8392>
//!
//! A token is a claims set carried as the payload of a COSE_Mac0, COSE_Sign1
//! or COSE_Encrypt0 (or their multi-recipient forms), optionally nested
//! inside further COSE layers and optionally wrapped in CBOR tag 61.
//!
//! # Example
//!
//! ```ignore
//! use cose_cwt::algorithm::Algorithm;
//! use cose_cwt::cwt::{Claims, Config, Cwt};
//! use cose_cwt::key::CoseKey;
//!
//! let key = CoseKey::from_symmetric(Algorithm::Hmac256, None)?;
//! let cwt = Cwt::new(Config::default());
//!
//! let claims = Claims::new().with_issuer("https://as.example").with_subject("dajiaji");
//! let token = cwt.encode(&claims, &key)?;
//! let verified = cwt.decode(&token, &[&key])?;
//! ```

pub mod claims;

pub use claims::{Claims, Confirmation, claim_key, claim_name};

use crate::algorithm::{Algorithm, Family};
use crate::cbor;
use crate::cose::{
    self, ContentType, DecodeOptions, EncodeOptions, Header, Headers, Recipient,
};
use crate::key::{self, CoseKey};
use serde::Deserialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// CBOR tag of a CWT.
pub const TAG_CWT: u64 = 61;

// Encoding of tag 61 in front of a tagged token.
const TAG_CWT_PREFIX: [u8; 2] = [0xd8, 0x3d];

/// Error is the failures that can occur during CWT operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("cbor: {0}")]
    Cbor(#[from] cbor::Error),
    #[error("cose: {0}")]
    Cose(#[from] cose::Error),
    #[error("claim validation failed: {0}")]
    ClaimValidationFailed(ClaimFailure),
    #[error("token nested deeper than {0} layers")]
    NestingTooDeep(usize),
}

impl From<key::Error> for Error {
    fn from(err: key::Error) -> Self {
        Error::Cose(cose::Error::from(err))
    }
}

/// ClaimFailure is the reason a claims set was rejected.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClaimFailure {
    #[error("token expired: exp {exp} <= now {now}")]
    Expired { exp: i64, now: i64 },
    #[error("token not yet valid: nbf {nbf} > now {now}")]
    NotYetValid { nbf: i64, now: i64 },
    #[error("malformed claims: {0}")]
    Malformed(String),
}

/// Config is the tunable behavior of token encoding and decoding. Missing
/// fields take their defaults, so a partial document deserializes fine.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Algorithm override, by registered name or numeric id. Without it the
    /// algorithm bound to the key is used.
    pub alg: Option<Algorithm>,
    /// Key identifier override, placed in the unprotected header.
    pub kid: Option<String>,
    /// External data authenticated along with every layer.
    pub external_aad: Vec<u8>,
    /// Lifetime in seconds injected as exp when the claims carry none. Zero
    /// disables the injection.
    pub expires_in: i64,
    /// Whether to inject iat when the claims carry none.
    pub issued_at: bool,
    /// Clock skew tolerance in seconds applied to exp and nbf.
    pub leeway: i64,
    /// Skips the exp and nbf checks. The cryptographic check always runs.
    pub skip_verification: bool,
    /// Maximum number of COSE layers accepted on decode.
    pub max_nesting: usize,
    /// Whether encoded tokens are wrapped in CBOR tag 61.
    pub tagged: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            alg: None,
            kid: None,
            external_aad: Vec::new(),
            expires_in: 3600,
            issued_at: true,
            leeway: 60,
            skip_verification: false,
            max_nesting: 2,
            tagged: false,
        }
    }
}

/// Cwt encodes and decodes tokens under a fixed configuration.
#[derive(Clone, Debug, Default)]
pub struct Cwt {
    config: Config,
}

impl Cwt {
    /// new creates a token codec with the given configuration.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// config returns the configuration of the codec.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// encode protects a claims set with a single key using the current
    /// system time for the injected time claims.
    pub fn encode(&self, claims: &Claims, key: &CoseKey) -> Result<Vec<u8>, Error> {
        self.encode_at(claims, key, now())
    }

    /// encode_at protects a claims set with a single key.
    ///
    /// The message type follows the algorithm family: MAC algorithms produce
    /// a COSE_Mac0, signature algorithms a COSE_Sign1 and content encryption
    /// algorithms a COSE_Encrypt0.
    pub fn encode_at(&self, claims: &Claims, key: &CoseKey, now: i64) -> Result<Vec<u8>, Error> {
        let payload = self.stamp(claims, now).to_bytes()?;
        let token = self.protect(&payload, key, Header::new())?;
        Ok(self.finish(token))
    }

    /// encode_with_recipients protects a claims set as a COSE_Mac or
    /// COSE_Encrypt whose key reaches every recipient.
    pub fn encode_with_recipients(
        &self,
        claims: &Claims,
        recipients: &[Recipient<'_>],
        now: i64,
    ) -> Result<Vec<u8>, Error> {
        let payload = self.stamp(claims, now).to_bytes()?;

        let alg = self
            .config
            .alg
            .or_else(|| recipients.first().and_then(|r| r.key().alg()))
            .ok_or(cose::Error::MissingAlgorithm)?;
        let headers = self.headers(Header::new().with_alg(alg));
        let opts = self.encode_options();

        let token = match alg.spec().family {
            Family::Mac(_) => cose::mac(&payload, recipients, headers, &opts)?,
            Family::Aead(_) => cose::encrypt(&payload, recipients, headers, &opts)?,
            _ => {
                return Err(cose::Error::InvalidArgument(format!(
                    "algorithm {} cannot protect a multi-recipient token",
                    alg.id()
                ))
                .into());
            }
        };
        Ok(self.finish(token))
    }

    /// wrap adds an outer COSE layer around an already encoded token. The
    /// outer layer advertises the CWT content type so decoders know to
    /// recurse.
    pub fn wrap(&self, token: &[u8], key: &CoseKey) -> Result<Vec<u8>, Error> {
        let inner = token.strip_prefix(&TAG_CWT_PREFIX[..]).unwrap_or(token);
        let protected = Header::new().with_content_type(ContentType::Format(TAG_CWT));

        let wrapped = self.protect(inner, key, protected)?;
        Ok(self.finish(wrapped))
    }

    /// decode verifies a token using the current system time for the claim
    /// checks.
    pub fn decode(&self, data: &[u8], keys: &[&CoseKey]) -> Result<Claims, Error> {
        self.decode_at(data, keys, now())
    }

    /// decode_at verifies a token and returns its claims set.
    ///
    /// - `data`: The token, with or without tag 61
    /// - `keys`: Candidate keys for every layer, tried in order
    /// - `now`: Unix time in seconds for the exp and nbf checks
    ///
    /// Nested layers are peeled while the payload is itself a COSE message,
    /// up to the configured maximum.
    pub fn decode_at(&self, data: &[u8], keys: &[&CoseKey], now: i64) -> Result<Claims, Error> {
        let opts = DecodeOptions {
            external_aad: self.config.external_aad.clone(),
            ..Default::default()
        };
        let mut payload = data.to_vec();
        let mut layers = 0;

        loop {
            if let Some(inner) = payload.strip_prefix(&TAG_CWT_PREFIX[..]) {
                payload = inner.to_vec();
            }
            if !cose::is_message(&payload) {
                break;
            }
            if layers == self.config.max_nesting {
                return Err(Error::NestingTooDeep(self.config.max_nesting));
            }
            payload = cose::decode(&payload, keys, &opts)?;
            layers += 1;
            debug!(layer = layers, "peeled token layer");
        }
        if layers == 0 {
            return Err(
                cose::Error::MalformedMessage("token is not a tagged COSE message".into()).into(),
            );
        }
        let claims = Claims::from_bytes(&payload)?;
        if !self.config.skip_verification {
            self.validate(&claims, now)?;
        }
        Ok(claims)
    }

    // Checks the time claims against now, tolerating the configured skew.
    fn validate(&self, claims: &Claims, now: i64) -> Result<(), Error> {
        let leeway = self.config.leeway;
        if let Some(exp) = claims.exp {
            if now >= exp.saturating_add(leeway) {
                return Err(Error::ClaimValidationFailed(ClaimFailure::Expired { exp, now }));
            }
        }
        if let Some(nbf) = claims.nbf {
            if now.saturating_add(leeway) < nbf {
                return Err(Error::ClaimValidationFailed(ClaimFailure::NotYetValid {
                    nbf,
                    now,
                }));
            }
        }
        Ok(())
    }

    // Injects the configured time claims the caller left out.
    fn stamp(&self, claims: &Claims, now: i64) -> Claims {
        let mut claims = claims.clone();
        if claims.exp.is_none() && self.config.expires_in > 0 {
            claims.exp = Some(now.saturating_add(self.config.expires_in));
        }
        if claims.iat.is_none() && self.config.issued_at {
            claims.iat = Some(now);
        }
        claims
    }

    // Runs the single-key message matching the algorithm family.
    fn protect(&self, payload: &[u8], key: &CoseKey, protected: Header) -> Result<Vec<u8>, Error> {
        let alg = self
            .config
            .alg
            .or(key.alg())
            .ok_or(cose::Error::MissingAlgorithm)?;
        let headers = self.headers(protected.with_alg(alg));
        let opts = self.encode_options();

        debug!(alg = alg.id(), tagged = self.config.tagged, "encoding token");
        let token = match alg.spec().family {
            Family::Mac(_) => cose::mac0(payload, key, headers, &opts)?,
            Family::Signature(_) => cose::sign1(payload, key, headers, &opts)?,
            Family::Aead(_) => cose::encrypt0(payload, key, headers, &opts)?,
            Family::KeyDistribution(_) => {
                return Err(cose::Error::InvalidArgument(format!(
                    "algorithm {} needs recipients",
                    alg.id()
                ))
                .into());
            }
        };
        Ok(token)
    }

    fn headers(&self, protected: Header) -> Headers {
        let mut unprotected = Header::new();
        if let Some(kid) = &self.config.kid {
            unprotected = unprotected.with_kid(kid.as_bytes());
        }
        Headers::new()
            .with_protected(protected)
            .with_unprotected(unprotected)
    }

    fn encode_options(&self) -> EncodeOptions {
        EncodeOptions {
            external_aad: self.config.external_aad.clone(),
            detached: false,
        }
    }

    fn finish(&self, token: Vec<u8>) -> Vec<u8> {
        if !self.config.tagged {
            return token;
        }
        let mut tagged = TAG_CWT_PREFIX.to_vec();
        tagged.extend_from_slice(&token);
        tagged
    }
}

/// now returns the current Unix time in seconds.
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
