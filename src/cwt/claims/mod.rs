// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! CWT claims set and the claim name table.
//!
//! <https://datatracker.ietf.org/doc/html/rfc8392#section-3>
//! <https://datatracker.ietf.org/doc/html/rfc8747>

use super::{ClaimFailure, Error};
use crate::cbor::{self, Label, Value};
use crate::cose;
use crate::key::{self, CoseKey};
use std::collections::HashSet;

/// Issuer claim key.
pub const CLAIM_ISS: i64 = 1;
/// Subject claim key.
pub const CLAIM_SUB: i64 = 2;
/// Audience claim key.
pub const CLAIM_AUD: i64 = 3;
/// Expiration time claim key.
pub const CLAIM_EXP: i64 = 4;
/// Not before claim key.
pub const CLAIM_NBF: i64 = 5;
/// Issued at claim key.
pub const CLAIM_IAT: i64 = 6;
/// CWT ID claim key.
pub const CLAIM_CTI: i64 = 7;
/// Confirmation claim key.
pub const CLAIM_CNF: i64 = 8;

/// Confirmation method labels inside the cnf map.
pub const CNF_COSE_KEY: i64 = 1;
pub const CNF_ENCRYPTED_COSE_KEY: i64 = 2;
pub const CNF_KID: i64 = 3;

const CLAIM_NAMES: [(&str, i64); 12] = [
    ("iss", CLAIM_ISS),
    ("sub", CLAIM_SUB),
    ("aud", CLAIM_AUD),
    ("exp", CLAIM_EXP),
    ("nbf", CLAIM_NBF),
    ("iat", CLAIM_IAT),
    ("cti", CLAIM_CTI),
    ("cnf", CLAIM_CNF),
    ("hcert", -260),
    ("EUPHNonce", -259),
    ("EATMAROEPrefix", -258),
    ("EAT-FDO", -257),
];

/// claim_key resolves a registered claim name to its integer key.
pub fn claim_key(name: &str) -> Option<i64> {
    CLAIM_NAMES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|&(_, key)| key)
}

/// claim_name returns the registered name of an integer claim key.
pub fn claim_name(key: i64) -> Option<&'static str> {
    CLAIM_NAMES
        .iter()
        .find(|(_, k)| *k == key)
        .map(|&(name, _)| name)
}

// Maps registered claim names onto their integer keys; anything else is
// kept as given.
fn resolve(label: Label) -> Label {
    if let Label::Text(name) = &label {
        if let Some(key) = claim_key(name) {
            return Label::Int(key);
        }
    }
    label
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::ClaimValidationFailed(ClaimFailure::Malformed(msg.into()))
}

/// Confirmation is the proof-of-possession key a token is bound to.
#[derive(Clone, Debug)]
pub enum Confirmation {
    /// The key itself, normally its public half.
    Key(CoseKey),
    /// The key sealed into an untagged COSE_Encrypt0.
    EncryptedKey(Vec<u8>),
    /// Only the identifier of a key known to the recipient.
    Kid(Vec<u8>),
}

impl Confirmation {
    /// encrypted seals a key for the confirmation claim.
    pub fn encrypted(key: &CoseKey, kek: &CoseKey) -> Result<Self, Error> {
        Ok(Confirmation::EncryptedKey(key::encrypted::encrypt(key, kek)?))
    }

    /// key returns the confirmation key, decrypting it with kek if it was
    /// sealed. Kid confirmations carry no key.
    pub fn key(&self, kek: Option<&CoseKey>) -> Result<Option<CoseKey>, Error> {
        match self {
            Confirmation::Key(key) => Ok(Some(key.clone())),
            Confirmation::EncryptedKey(data) => {
                let kek = kek.ok_or_else(|| {
                    Error::Cose(cose::Error::InvalidArgument(
                        "encrypted confirmation key needs a key encryption key".into(),
                    ))
                })?;
                Ok(Some(key::encrypted::decrypt(data, kek)?))
            }
            Confirmation::Kid(_) => Ok(None),
        }
    }

    fn to_value(&self) -> Result<Value, Error> {
        let (label, value) = match self {
            Confirmation::Key(key) => (CNF_COSE_KEY, key.to_map()?),
            Confirmation::EncryptedKey(data) => (CNF_ENCRYPTED_COSE_KEY, cbor::decode(data)?),
            Confirmation::Kid(kid) => (CNF_KID, cbor::bstr(kid)),
        };
        Ok(Value::Map(vec![(Value::from(label), value)]))
    }

    fn from_value(value: &Value) -> Result<Self, Error> {
        let entries = value
            .as_map()
            .ok_or_else(|| malformed("cnf must be a map"))?;
        let [(label, value)] = entries.as_slice() else {
            return Err(malformed("cnf must hold exactly one confirmation method"));
        };
        match cbor::int(label) {
            Some(CNF_COSE_KEY) => Ok(Confirmation::Key(CoseKey::from_map(value)?)),
            Some(CNF_ENCRYPTED_COSE_KEY) => Ok(Confirmation::EncryptedKey(cbor::encode(value)?)),
            Some(CNF_KID) => cbor::bytes(value)
                .map(|kid| Confirmation::Kid(kid.to_vec()))
                .ok_or_else(|| malformed("cnf kid must be a byte string")),
            _ => Err(malformed("unknown cnf confirmation method")),
        }
    }
}

/// Claims is a CWT claims set: the registered claims as typed fields and
/// every other claim retained in `other`.
#[derive(Clone, Debug, Default)]
pub struct Claims {
    pub iss: Option<String>,
    pub sub: Option<String>,
    pub aud: Vec<String>,
    pub exp: Option<i64>,
    pub nbf: Option<i64>,
    pub iat: Option<i64>,
    pub cti: Option<Vec<u8>>,
    pub cnf: Option<Confirmation>,
    pub other: Vec<(Label, Value)>,
}

impl Claims {
    /// new creates an empty claims set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_issuer(mut self, iss: impl Into<String>) -> Self {
        self.iss = Some(iss.into());
        self
    }

    pub fn with_subject(mut self, sub: impl Into<String>) -> Self {
        self.sub = Some(sub.into());
        self
    }

    pub fn with_audience(mut self, aud: impl Into<String>) -> Self {
        self.aud.push(aud.into());
        self
    }

    pub fn with_expiration(mut self, exp: i64) -> Self {
        self.exp = Some(exp);
        self
    }

    pub fn with_not_before(mut self, nbf: i64) -> Self {
        self.nbf = Some(nbf);
        self
    }

    pub fn with_issued_at(mut self, iat: i64) -> Self {
        self.iat = Some(iat);
        self
    }

    pub fn with_cti(mut self, cti: impl Into<Vec<u8>>) -> Self {
        self.cti = Some(cti.into());
        self
    }

    pub fn with_confirmation(mut self, cnf: Confirmation) -> Self {
        self.cnf = Some(cnf);
        self
    }

    /// with_claim sets a claim by registered name or by key. Registered
    /// claims are type checked into their fields.
    pub fn with_claim(mut self, label: impl Into<Label>, value: Value) -> Result<Self, Error> {
        let label = resolve(label.into());
        self.other.retain(|(l, _)| *l != label);
        self.set(label, &value)?;
        Ok(self)
    }

    /// from_named builds a claims set from a mapping whose keys are claim
    /// names or integer keys.
    pub fn from_named(entries: impl IntoIterator<Item = (Label, Value)>) -> Result<Self, Error> {
        entries
            .into_iter()
            .try_fold(Claims::new(), |claims, (label, value)| {
                claims.with_claim(label, value)
            })
    }

    /// claim returns an unregistered claim by name or key.
    pub fn claim(&self, label: impl Into<Label>) -> Option<&Value> {
        let label = resolve(label.into());
        self.other.iter().find(|(l, _)| *l == label).map(|(_, v)| v)
    }

    fn set(&mut self, label: Label, value: &Value) -> Result<(), Error> {
        let text = |name: &str| {
            value
                .as_text()
                .map(str::to_string)
                .ok_or_else(|| malformed(format!("{name} must be a text string")))
        };
        // Float NumericDates must hold a whole number of seconds
        let time = |name: &str| match value {
            Value::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
                Ok(*f as i64)
            }
            Value::Float(_) => Err(malformed(format!("{name} must be whole seconds"))),
            _ => cbor::int(value).ok_or_else(|| malformed(format!("{name} must be a number"))),
        };
        match label {
            Label::Int(CLAIM_ISS) => self.iss = Some(text("iss")?),
            Label::Int(CLAIM_SUB) => self.sub = Some(text("sub")?),
            Label::Int(CLAIM_AUD) => {
                self.aud = match value {
                    Value::Text(aud) => vec![aud.clone()],
                    Value::Array(items) => items
                        .iter()
                        .map(|item| {
                            item.as_text()
                                .map(str::to_string)
                                .ok_or_else(|| malformed("aud entries must be text strings"))
                        })
                        .collect::<Result<_, _>>()?,
                    _ => return Err(malformed("aud must be a text string or an array")),
                }
            }
            Label::Int(CLAIM_EXP) => self.exp = Some(time("exp")?),
            Label::Int(CLAIM_NBF) => self.nbf = Some(time("nbf")?),
            Label::Int(CLAIM_IAT) => self.iat = Some(time("iat")?),
            Label::Int(CLAIM_CTI) => {
                self.cti = Some(
                    cbor::bytes(value)
                        .ok_or_else(|| malformed("cti must be a byte string"))?
                        .to_vec(),
                )
            }
            Label::Int(CLAIM_CNF) => self.cnf = Some(Confirmation::from_value(value)?),
            other => self.other.push((other, value.clone())),
        }
        Ok(())
    }

    /// to_map serializes the claims set into a deterministically ordered map.
    pub fn to_map(&self) -> Result<Value, Error> {
        let mut entries = Vec::new();
        let mut push = |key: i64, value: Value| entries.push((Value::from(key), value));

        if let Some(iss) = &self.iss {
            push(CLAIM_ISS, Value::Text(iss.clone()));
        }
        if let Some(sub) = &self.sub {
            push(CLAIM_SUB, Value::Text(sub.clone()));
        }
        match self.aud.as_slice() {
            [] => {}
            [aud] => push(CLAIM_AUD, Value::Text(aud.clone())),
            auds => push(
                CLAIM_AUD,
                Value::Array(auds.iter().cloned().map(Value::Text).collect()),
            ),
        }
        if let Some(exp) = self.exp {
            push(CLAIM_EXP, Value::from(exp));
        }
        if let Some(nbf) = self.nbf {
            push(CLAIM_NBF, Value::from(nbf));
        }
        if let Some(iat) = self.iat {
            push(CLAIM_IAT, Value::from(iat));
        }
        if let Some(cti) = &self.cti {
            push(CLAIM_CTI, cbor::bstr(cti));
        }
        if let Some(cnf) = &self.cnf {
            push(CLAIM_CNF, cnf.to_value()?);
        }
        let mut seen = HashSet::new();
        for (label, value) in &self.other {
            if matches!(label, Label::Int(CLAIM_ISS..=CLAIM_CNF)) {
                return Err(malformed(format!("claim {label} must use its field")));
            }
            if !seen.insert(label) {
                return Err(malformed(format!("duplicate claim {label}")));
            }
            entries.push((label.to_value(), value.clone()));
        }
        Ok(cbor::canonical_map(entries)?)
    }

    /// to_bytes serializes the claims set into CBOR.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(cbor::encode(&self.to_map()?)?)
    }

    /// from_map parses a claims set, type checking the registered claims.
    pub fn from_map(value: &Value) -> Result<Self, Error> {
        let entries = value
            .as_map()
            .ok_or_else(|| malformed("claims set must be a map"))?;

        let mut claims = Claims::new();
        let mut seen = HashSet::new();
        for (label, value) in entries {
            let label = Label::from_value(label)
                .ok_or_else(|| malformed("claim keys must be integers or text strings"))?;
            if !seen.insert(label.clone()) {
                return Err(malformed(format!("duplicate claim {label}")));
            }
            claims.set(label, value)?;
        }
        Ok(claims)
    }

    /// from_bytes parses a CBOR encoded claims set.
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        let value = cbor::decode(data).map_err(|e| malformed(format!("claims set: {e}")))?;
        Self::from_map(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::Algorithm;

    // Tests the claim name table in both directions.
    #[test]
    fn test_claim_names() {
        struct TestCase {
            name: &'static str,
            key: i64,
        }
        let tests = [
            TestCase { name: "iss", key: 1 },
            TestCase { name: "cnf", key: 8 },
            TestCase { name: "hcert", key: -260 },
            TestCase { name: "EUPHNonce", key: -259 },
            TestCase { name: "EATMAROEPrefix", key: -258 },
            TestCase { name: "EAT-FDO", key: -257 },
        ];
        for tc in &tests {
            assert_eq!(claim_key(tc.name), Some(tc.key), "name {}", tc.name);
            assert_eq!(claim_name(tc.key), Some(tc.name), "key {}", tc.key);
        }
        assert_eq!(claim_key("unknown"), None);
        assert_eq!(claim_name(100), None);
    }

    // Tests the serialized form of a claims set against literal bytes.
    #[test]
    fn test_claims_bytes() {
        let claims = Claims::from_named([
            (Label::from("iss"), Value::Text("coap://as.example.com".into())),
            (Label::from("sub"), Value::Text("erikw".into())),
            (Label::from("aud"), Value::Text("coap://light.example.com".into())),
            (Label::from("exp"), Value::from(1444064944)),
            (Label::from("nbf"), Value::from(1443944944)),
            (Label::from("iat"), Value::from(1443944944)),
            (Label::from("cti"), cbor::bstr(&[0x0b, 0x71])),
        ])
        .unwrap();

        // RFC 8392 Appendix A.1
        assert_eq!(
            hex::encode(claims.to_bytes().unwrap()),
            "a70175636f61703a2f2f61732e6578616d706c652e636f6d02656572696b77037818636f61703a2f2f6c696768742e6578616d706c652e636f6d041a5612aeb0051a5610d9f0061a5610d9f007420b71"
        );
        let parsed = Claims::from_bytes(&claims.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.sub.as_deref(), Some("erikw"));
        assert_eq!(parsed.exp, Some(1444064944));
        assert_eq!(parsed.cti.as_deref(), Some(&[0x0b, 0x71][..]));
    }

    // Tests that unregistered claims survive a round trip by name and key.
    #[test]
    fn test_other_claims() {
        let claims = Claims::new()
            .with_claim("hcert", Value::Map(vec![]))
            .unwrap()
            .with_claim(Label::Int(-70000), Value::Bool(true))
            .unwrap()
            .with_claim("x-app", Value::Text("value".into()))
            .unwrap();

        let parsed = Claims::from_bytes(&claims.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.claim("hcert"), Some(&Value::Map(vec![])));
        assert_eq!(parsed.claim(-260i64), Some(&Value::Map(vec![])));
        assert_eq!(parsed.claim(-70000i64), Some(&Value::Bool(true)));
        assert_eq!(parsed.claim("x-app"), Some(&Value::Text("value".into())));
    }

    // Tests that registered claims of the wrong type are rejected.
    #[test]
    fn test_claims_reject() {
        let tests = [
            ("iss", Value::from(1)),
            ("exp", Value::Text("tomorrow".into())),
            ("cti", Value::Text("123".into())),
            ("aud", Value::Array(vec![Value::from(1)])),
            ("cnf", Value::Map(vec![])),
            ("exp", Value::Float(1444064944.5)),
            ("nbf", Value::Float(f64::NAN)),
            ("iat", Value::Float(f64::INFINITY)),
        ];
        for (i, (name, value)) in tests.into_iter().enumerate() {
            assert!(
                matches!(
                    Claims::new().with_claim(name, value),
                    Err(Error::ClaimValidationFailed(ClaimFailure::Malformed(_)))
                ),
                "test {i}"
            );
        }

        // Whole seconds carried as a float are taken as is
        let claims = Claims::new()
            .with_claim("exp", Value::Float(1444064944.0))
            .unwrap();
        assert_eq!(claims.exp, Some(1444064944));
    }

    // Tests the three confirmation methods.
    #[test]
    fn test_confirmation() {
        let pop = CoseKey::generate(Algorithm::EdDsa)
            .unwrap()
            .with_kid(b"pop".to_vec());
        let public = pop.public_key().unwrap();
        let kek = CoseKey::from_symmetric(Algorithm::A256Gcm, None).unwrap();

        let methods = [
            Confirmation::Key(public.clone()),
            Confirmation::encrypted(&public, &kek).unwrap(),
            Confirmation::Kid(b"pop".to_vec()),
        ];
        for (i, cnf) in methods.into_iter().enumerate() {
            let claims = Claims::new().with_confirmation(cnf);
            let parsed = Claims::from_bytes(&claims.to_bytes().unwrap()).unwrap();
            let cnf = parsed.cnf.unwrap();

            match cnf.key(Some(&kek)).unwrap() {
                Some(key) => assert_eq!(
                    key.to_bytes().unwrap(),
                    public.to_bytes().unwrap(),
                    "test {i}"
                ),
                None => assert!(matches!(cnf, Confirmation::Kid(ref kid) if kid == b"pop")),
            }
        }
    }
}
