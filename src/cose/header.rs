// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! COSE header maps and the byte-frozen protected bucket.
//!
//! https://datatracker.ietf.org/doc/html/rfc9052#section-3

use super::Error;
use crate::algorithm::Algorithm;
use crate::cbor::{self, Label, Value};
use std::collections::HashSet;

/// COSE header label for the algorithm.
pub const HEADER_ALGORITHM: i64 = 1;
/// COSE header label for the critical parameters.
pub const HEADER_CRITICAL: i64 = 2;
/// COSE header label for the content type.
pub const HEADER_CONTENT_TYPE: i64 = 3;
/// COSE header label for the key identifier.
pub const HEADER_KID: i64 = 4;
/// COSE header label for the full IV.
pub const HEADER_IV: i64 = 5;
/// COSE header label for the partial IV.
pub const HEADER_PARTIAL_IV: i64 = 6;
/// COSE header label for the sender's ephemeral public key.
pub const HEADER_EPHEMERAL_KEY: i64 = -1;
/// COSE header label for the sender's static public key.
pub const HEADER_STATIC_KEY: i64 = -2;
/// COSE header label for the sender's static key identifier.
pub const HEADER_STATIC_KEY_ID: i64 = -3;
/// COSE header label for the HKDF salt.
pub const HEADER_SALT: i64 = -20;
/// COSE header labels for the KDF party information.
pub const HEADER_PARTY_U_IDENTITY: i64 = -21;
pub const HEADER_PARTY_U_NONCE: i64 = -22;
pub const HEADER_PARTY_U_OTHER: i64 = -23;
pub const HEADER_PARTY_V_IDENTITY: i64 = -24;
pub const HEADER_PARTY_V_NONCE: i64 = -25;
pub const HEADER_PARTY_V_OTHER: i64 = -26;

const KNOWN_LABELS: [i64; 16] = [
    HEADER_ALGORITHM,
    HEADER_CRITICAL,
    HEADER_CONTENT_TYPE,
    HEADER_KID,
    HEADER_IV,
    HEADER_PARTIAL_IV,
    HEADER_EPHEMERAL_KEY,
    HEADER_STATIC_KEY,
    HEADER_STATIC_KEY_ID,
    HEADER_SALT,
    HEADER_PARTY_U_IDENTITY,
    HEADER_PARTY_U_NONCE,
    HEADER_PARTY_U_OTHER,
    HEADER_PARTY_V_IDENTITY,
    HEADER_PARTY_V_NONCE,
    HEADER_PARTY_V_OTHER,
];

/// ContentType is the media type of the payload, either as a CoAP content
/// format number or as a media type string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContentType {
    Format(u64),
    Media(String),
}

/// PartyInfo is the identity, nonce and other information one party
/// contributes to a key derivation context.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartyInfo {
    pub identity: Option<Vec<u8>>,
    pub nonce: Option<Vec<u8>>,
    pub other: Option<Vec<u8>>,
}

impl PartyInfo {
    /// is_empty reports whether the party contributes nothing.
    pub fn is_empty(&self) -> bool {
        self.identity.is_none() && self.nonce.is_none() && self.other.is_none()
    }
}

/// Header is one COSE header bucket: the registered parameters as typed
/// fields, anything else retained verbatim in `rest`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Header {
    pub alg: Option<Algorithm>,
    pub crit: Vec<Label>,
    pub content_type: Option<ContentType>,
    pub kid: Option<Vec<u8>>,
    pub iv: Option<Vec<u8>>,
    pub partial_iv: Option<Vec<u8>>,
    pub ephemeral_key: Option<Value>,
    pub static_key: Option<Value>,
    pub static_key_id: Option<Vec<u8>>,
    pub salt: Option<Vec<u8>>,
    pub party_u: PartyInfo,
    pub party_v: PartyInfo,
    pub rest: Vec<(Label, Value)>,
}

impl Header {
    /// new creates an empty header bucket.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alg(mut self, alg: Algorithm) -> Self {
        self.alg = Some(alg);
        self
    }

    pub fn with_kid(mut self, kid: impl Into<Vec<u8>>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    pub fn with_iv(mut self, iv: impl Into<Vec<u8>>) -> Self {
        self.iv = Some(iv.into());
        self
    }

    pub fn with_partial_iv(mut self, iv: impl Into<Vec<u8>>) -> Self {
        self.partial_iv = Some(iv.into());
        self
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    pub fn with_salt(mut self, salt: impl Into<Vec<u8>>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    /// with_critical marks labels as critical. Critical labels must also be
    /// present in the same protected bucket.
    pub fn with_critical(mut self, labels: &[Label]) -> Self {
        self.crit = labels.to_vec();
        self
    }

    /// with_param adds an application specific parameter. Registered labels
    /// must go through their typed fields instead.
    pub fn with_param(mut self, label: impl Into<Label>, value: Value) -> Self {
        self.rest.push((label.into(), value));
        self
    }

    /// param looks up an application specific parameter.
    pub fn param(&self, label: &Label) -> Option<&Value> {
        self.rest.iter().find(|(l, _)| l == label).map(|(_, v)| v)
    }

    /// is_empty reports whether the bucket carries no parameters at all.
    pub fn is_empty(&self) -> bool {
        self.labels().is_empty()
    }

    /// labels returns the labels of every parameter present in the bucket.
    pub fn labels(&self) -> Vec<Label> {
        let mut labels = Vec::new();
        let mut add = |present: bool, label: i64| {
            if present {
                labels.push(Label::Int(label));
            }
        };
        add(self.alg.is_some(), HEADER_ALGORITHM);
        add(!self.crit.is_empty(), HEADER_CRITICAL);
        add(self.content_type.is_some(), HEADER_CONTENT_TYPE);
        add(self.kid.is_some(), HEADER_KID);
        add(self.iv.is_some(), HEADER_IV);
        add(self.partial_iv.is_some(), HEADER_PARTIAL_IV);
        add(self.ephemeral_key.is_some(), HEADER_EPHEMERAL_KEY);
        add(self.static_key.is_some(), HEADER_STATIC_KEY);
        add(self.static_key_id.is_some(), HEADER_STATIC_KEY_ID);
        add(self.salt.is_some(), HEADER_SALT);
        add(self.party_u.identity.is_some(), HEADER_PARTY_U_IDENTITY);
        add(self.party_u.nonce.is_some(), HEADER_PARTY_U_NONCE);
        add(self.party_u.other.is_some(), HEADER_PARTY_U_OTHER);
        add(self.party_v.identity.is_some(), HEADER_PARTY_V_IDENTITY);
        add(self.party_v.nonce.is_some(), HEADER_PARTY_V_NONCE);
        add(self.party_v.other.is_some(), HEADER_PARTY_V_OTHER);
        labels.extend(self.rest.iter().map(|(label, _)| label.clone()));
        labels
    }

    /// to_map serializes the bucket into a header map with deterministic
    /// ordering.
    pub fn to_map(&self) -> Result<Value, Error> {
        let mut entries = Vec::new();
        let mut push = |label: i64, value: Value| entries.push((Value::from(label), value));

        if let Some(alg) = self.alg {
            push(HEADER_ALGORITHM, Value::from(alg.id()));
        }
        if !self.crit.is_empty() {
            push(
                HEADER_CRITICAL,
                Value::Array(self.crit.iter().map(Label::to_value).collect()),
            );
        }
        match &self.content_type {
            Some(ContentType::Format(id)) => push(HEADER_CONTENT_TYPE, Value::from(*id)),
            Some(ContentType::Media(media)) => {
                push(HEADER_CONTENT_TYPE, Value::Text(media.clone()))
            }
            None => {}
        }
        let bstrs = [
            (HEADER_KID, &self.kid),
            (HEADER_IV, &self.iv),
            (HEADER_PARTIAL_IV, &self.partial_iv),
            (HEADER_STATIC_KEY_ID, &self.static_key_id),
            (HEADER_SALT, &self.salt),
            (HEADER_PARTY_U_IDENTITY, &self.party_u.identity),
            (HEADER_PARTY_U_NONCE, &self.party_u.nonce),
            (HEADER_PARTY_U_OTHER, &self.party_u.other),
            (HEADER_PARTY_V_IDENTITY, &self.party_v.identity),
            (HEADER_PARTY_V_NONCE, &self.party_v.nonce),
            (HEADER_PARTY_V_OTHER, &self.party_v.other),
        ];
        for (label, value) in bstrs {
            if let Some(value) = value {
                push(label, cbor::bstr(value));
            }
        }
        if let Some(key) = &self.ephemeral_key {
            push(HEADER_EPHEMERAL_KEY, key.clone());
        }
        if let Some(key) = &self.static_key {
            push(HEADER_STATIC_KEY, key.clone());
        }
        let mut seen = HashSet::new();
        for (label, value) in &self.rest {
            if let Label::Int(n) = label {
                if KNOWN_LABELS.contains(n) {
                    return Err(Error::InvalidArgument(format!(
                        "header {label} must be set through its typed field"
                    )));
                }
            }
            if !seen.insert(label) {
                return Err(Error::InvalidArgument(format!("duplicate header {label}")));
            }
            entries.push((label.to_value(), value.clone()));
        }
        Ok(cbor::canonical_map(entries)?)
    }

    /// from_map parses a header map, typing the registered parameters.
    pub fn from_map(value: &Value) -> Result<Self, Error> {
        let entries = value
            .as_map()
            .ok_or_else(|| Error::MalformedMessage("header must be a map".into()))?;

        let mut header = Header::default();
        let mut seen = HashSet::new();
        for (label, value) in entries {
            let label = Label::from_value(label).ok_or_else(|| {
                Error::MalformedMessage("header labels must be integers or text strings".into())
            })?;
            if !seen.insert(label.clone()) {
                return Err(Error::MalformedMessage(format!("duplicate header {label}")));
            }
            let Label::Int(n) = label else {
                header.rest.push((label, value.clone()));
                continue;
            };
            match n {
                HEADER_ALGORITHM => {
                    let id = cbor::int(value).ok_or_else(|| {
                        Error::MalformedMessage("alg must be an integer".into())
                    })?;
                    header.alg = Some(Algorithm::from_id(id)?);
                }
                HEADER_CRITICAL => {
                    let labels = value.as_array().ok_or_else(|| {
                        Error::MalformedMessage("crit must be an array".into())
                    })?;
                    if labels.is_empty() {
                        return Err(Error::MalformedMessage("crit must not be empty".into()));
                    }
                    for label in labels {
                        header.crit.push(Label::from_value(label).ok_or_else(|| {
                            Error::MalformedMessage("crit entries must be labels".into())
                        })?);
                    }
                }
                HEADER_CONTENT_TYPE => {
                    header.content_type = Some(match value {
                        Value::Text(media) => ContentType::Media(media.clone()),
                        _ => cbor::int(value)
                            .and_then(|id| u64::try_from(id).ok())
                            .map(ContentType::Format)
                            .ok_or_else(|| {
                                Error::MalformedMessage(
                                    "content type must be a uint or a text string".into(),
                                )
                            })?,
                    });
                }
                HEADER_KID => header.kid = Some(header_bytes(n, value)?),
                HEADER_IV => header.iv = Some(header_bytes(n, value)?),
                HEADER_PARTIAL_IV => header.partial_iv = Some(header_bytes(n, value)?),
                HEADER_EPHEMERAL_KEY => header.ephemeral_key = Some(header_map(n, value)?),
                HEADER_STATIC_KEY => header.static_key = Some(header_map(n, value)?),
                HEADER_STATIC_KEY_ID => header.static_key_id = Some(header_bytes(n, value)?),
                HEADER_SALT => header.salt = Some(header_bytes(n, value)?),
                HEADER_PARTY_U_IDENTITY => header.party_u.identity = Some(header_bytes(n, value)?),
                HEADER_PARTY_U_NONCE => header.party_u.nonce = Some(header_bytes(n, value)?),
                HEADER_PARTY_U_OTHER => header.party_u.other = Some(header_bytes(n, value)?),
                HEADER_PARTY_V_IDENTITY => header.party_v.identity = Some(header_bytes(n, value)?),
                HEADER_PARTY_V_NONCE => header.party_v.nonce = Some(header_bytes(n, value)?),
                HEADER_PARTY_V_OTHER => header.party_v.other = Some(header_bytes(n, value)?),
                _ => header.rest.push((Label::Int(n), value.clone())),
            }
        }
        Ok(header)
    }

    /// has_party_info reports whether any KDF party parameter is present.
    pub fn has_party_info(&self) -> bool {
        !self.party_u.is_empty() || !self.party_v.is_empty()
    }
}

fn header_bytes(label: i64, value: &Value) -> Result<Vec<u8>, Error> {
    cbor::bytes(value)
        .map(|b| b.to_vec())
        .ok_or_else(|| Error::MalformedMessage(format!("header {label} must be a byte string")))
}

fn header_map(label: i64, value: &Value) -> Result<Value, Error> {
    match value {
        Value::Map(_) => Ok(value.clone()),
        _ => Err(Error::MalformedMessage(format!("header {label} must be a COSE key"))),
    }
}

/// ProtectedHeader is the protected bucket together with the exact bytes it
/// travels as. The bytes are what every AAD structure is built from; they are
/// never regenerated from the parsed header.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProtectedHeader {
    pub header: Header,
    pub bytes: Vec<u8>,
}

impl ProtectedHeader {
    /// new freezes a header into its serialized form. An empty header becomes
    /// the zero-length byte string.
    pub fn new(header: Header) -> Result<Self, Error> {
        let bytes = if header.is_empty() {
            Vec::new()
        } else {
            cbor::encode(&header.to_map()?)?
        };
        Ok(Self { header, bytes })
    }

    /// parse reads a protected bucket from its wire bytes, keeping them
    /// verbatim.
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        let header = if bytes.is_empty() {
            Header::default()
        } else {
            Header::from_map(&cbor::decode(bytes).map_err(|e| {
                Error::MalformedMessage(format!("protected header: {e}"))
            })?)?
        };
        Ok(Self {
            header,
            bytes: bytes.to_vec(),
        })
    }
}

/// check validates a pair of buckets: no label may appear in both, and every
/// critical label must be protected, present and understood. Labels this
/// crate does not process are understood only if the caller lists them in
/// `acknowledged`.
pub fn check(
    protected: &Header,
    unprotected: &Header,
    acknowledged: &[Label],
) -> Result<(), Error> {
    if !unprotected.crit.is_empty() {
        return Err(Error::MalformedMessage(
            "crit must be in the protected header".into(),
        ));
    }
    let present: HashSet<Label> = protected.labels().into_iter().collect();
    for label in unprotected.labels() {
        if present.contains(&label) {
            return Err(Error::MalformedMessage(format!(
                "header {label} appears in both buckets"
            )));
        }
    }
    for label in &protected.crit {
        let known = matches!(label, Label::Int(n) if KNOWN_LABELS.contains(n));
        if !known && !acknowledged.contains(label) {
            return Err(Error::UnsupportedCriticalParameter(label.clone()));
        }
        if !present.contains(label) {
            return Err(Error::MalformedMessage(format!(
                "critical header {label} is missing"
            )));
        }
    }
    Ok(())
}

/// lookup returns a field from whichever bucket carries it, preferring the
/// protected one.
pub fn lookup<'a, T>(
    protected: &'a Header,
    unprotected: &'a Header,
    field: impl Fn(&'a Header) -> Option<T>,
) -> Option<T> {
    field(protected).or_else(|| field(unprotected))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Tests that protected buckets freeze into canonical bytes and that an
    // empty bucket is the zero-length string.
    #[test]
    fn test_protected_bytes() {
        struct TestCase {
            header: Header,
            bytes: &'static str,
        }
        let tests = [
            TestCase {
                header: Header::new(),
                bytes: "",
            },
            TestCase {
                header: Header::new().with_alg(Algorithm::Hmac256),
                bytes: "a10105",
            },
            TestCase {
                header: Header::new().with_alg(Algorithm::EdDsa),
                bytes: "a10127",
            },
            TestCase {
                header: Header::new()
                    .with_kid(b"01".to_vec())
                    .with_alg(Algorithm::A128Gcm)
                    .with_content_type(ContentType::Format(61)),
                bytes: "a3010103183d04423031",
            },
        ];
        for tc in tests {
            let protected = ProtectedHeader::new(tc.header.clone()).unwrap();
            assert_eq!(hex::encode(&protected.bytes), tc.bytes);

            let parsed = ProtectedHeader::parse(&protected.bytes).unwrap();
            assert_eq!(parsed.header, tc.header);
            assert_eq!(parsed.bytes, protected.bytes);
        }
    }

    // Tests that parsing keeps non-canonical bytes verbatim.
    #[test]
    fn test_parse_keeps_bytes() {
        // {4: h'3031', 1: 5} is not in canonical order
        let bytes = hex::decode("a2044230310105").unwrap();
        let parsed = ProtectedHeader::parse(&bytes).unwrap();
        assert_eq!(parsed.bytes, bytes);
        assert_eq!(parsed.header.alg, Some(Algorithm::Hmac256));
        assert_eq!(parsed.header.kid.as_deref(), Some(&b"01"[..]));

        // Re-freezing the parsed header would produce different bytes
        let refrozen = ProtectedHeader::new(parsed.header).unwrap();
        assert_eq!(hex::encode(refrozen.bytes), "a2010504423031");
    }

    // Tests that malformed header maps are rejected.
    #[test]
    fn test_from_map_reject() {
        struct TestCase {
            entries: Vec<(Value, Value)>,
            unsupported: bool,
        }
        let tests = [
            // Text kid
            TestCase {
                entries: vec![(Value::from(4), Value::from("01"))],
                unsupported: false,
            },
            // Text algorithm
            TestCase {
                entries: vec![(Value::from(1), Value::from("HS256"))],
                unsupported: false,
            },
            // Empty crit
            TestCase {
                entries: vec![(Value::from(2), Value::Array(vec![]))],
                unsupported: false,
            },
            // Duplicate label
            TestCase {
                entries: vec![
                    (Value::from(1), Value::from(5)),
                    (Value::from(1), Value::from(5)),
                ],
                unsupported: false,
            },
            // Unknown algorithm
            TestCase {
                entries: vec![(Value::from(1), Value::from(-65535))],
                unsupported: true,
            },
        ];
        for (i, tc) in tests.into_iter().enumerate() {
            let err = Header::from_map(&Value::Map(tc.entries)).unwrap_err();
            match err {
                Error::MalformedMessage(_) => assert!(!tc.unsupported, "case {i}"),
                Error::UnsupportedAlgorithm(id) => {
                    assert!(tc.unsupported, "case {i}");
                    assert_eq!(id, -65535);
                }
                other => panic!("case {i}: unexpected error {other}"),
            }
        }
    }

    // Tests the cross-bucket rules.
    #[test]
    fn test_check() {
        let protected = Header::new().with_alg(Algorithm::Hmac256);
        let unprotected = Header::new().with_kid(b"01".to_vec());
        check(&protected, &unprotected, &[]).unwrap();

        // Same label in both buckets
        let doubled = Header::new().with_alg(Algorithm::Hmac256);
        assert!(matches!(
            check(&protected, &doubled, &[]),
            Err(Error::MalformedMessage(_))
        ));
        // Critical header in the unprotected bucket
        let crit = Header::new().with_critical(&[Label::Int(HEADER_KID)]);
        assert!(matches!(
            check(&protected, &crit, &[]),
            Err(Error::MalformedMessage(_))
        ));
        // Unknown critical header, then acknowledged by the caller
        let custom = Header::new()
            .with_alg(Algorithm::Hmac256)
            .with_param("x-unknown", Value::from(1))
            .with_critical(&[Label::from("x-unknown")]);
        assert_eq!(
            check(&custom, &Header::new(), &[]),
            Err(Error::UnsupportedCriticalParameter(Label::from("x-unknown")))
        );
        check(&custom, &Header::new(), &[Label::from("x-unknown")]).unwrap();

        // Known critical header that is absent
        let absent = Header::new()
            .with_alg(Algorithm::Hmac256)
            .with_critical(&[Label::Int(HEADER_CONTENT_TYPE)]);
        assert!(matches!(
            check(&absent, &Header::new(), &[]),
            Err(Error::MalformedMessage(_))
        ));
    }

    // Tests that registered labels cannot sneak in as custom parameters.
    #[test]
    fn test_to_map_reject() {
        let header = Header::new().with_param(HEADER_ALGORITHM, Value::from(5));
        assert!(matches!(header.to_map(), Err(Error::InvalidArgument(_))));

        let header = Header::new()
            .with_param("x", Value::from(1))
            .with_param("x", Value::from(2));
        assert!(matches!(header.to_map(), Err(Error::InvalidArgument(_))));
    }
}
