// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! The to-be-authenticated structures every COSE operation runs over.
//!
//! https://datatracker.ietf.org/doc/html/rfc9052#section-4.4
//! https://datatracker.ietf.org/doc/html/rfc9052#section-5.3
//! https://datatracker.ietf.org/doc/html/rfc9052#section-6.3
//! https://datatracker.ietf.org/doc/html/rfc9053#section-5.2

use super::Error;
use super::header::PartyInfo;
use crate::algorithm::Algorithm;
use crate::cbor::{self, Value};

/// Context strings of the to-be-authenticated structures.
pub const CONTEXT_MAC0: &str = "MAC0";
pub const CONTEXT_MAC: &str = "MAC";
pub const CONTEXT_SIGNATURE1: &str = "Signature1";
pub const CONTEXT_SIGNATURE: &str = "Signature";
pub const CONTEXT_ENCRYPT0: &str = "Encrypt0";
pub const CONTEXT_ENCRYPT: &str = "Encrypt";

/// MAC_structure for computing MAC tags per RFC 9052 Section 6.3.
///
/// ```text
/// MAC_structure = [
///     context:      "MAC0" / "MAC",
///     protected:    bstr,
///     external_aad: bstr,
///     payload:      bstr
/// ]
/// ```
pub struct MacStructure<'a> {
    pub context: &'static str,
    pub protected: &'a [u8],
    pub external_aad: &'a [u8],
    pub payload: &'a [u8],
}

impl MacStructure<'_> {
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(cbor::encode(&Value::Array(vec![
            Value::Text(self.context.into()),
            cbor::bstr(self.protected),
            cbor::bstr(self.external_aad),
            cbor::bstr(self.payload),
        ]))?)
    }
}

/// Sig_structure for computing signatures per RFC 9052 Section 4.4. Sign1
/// messages have no signer bucket, Sign messages carry the signer's
/// protected bytes after the body's.
///
/// ```text
/// Sig_structure = [
///     context:        "Signature" / "Signature1",
///     body_protected: bstr,
///     ? sign_protected: bstr,
///     external_aad:   bstr,
///     payload:        bstr
/// ]
/// ```
pub struct SigStructure<'a> {
    pub body_protected: &'a [u8],
    pub sign_protected: Option<&'a [u8]>,
    pub external_aad: &'a [u8],
    pub payload: &'a [u8],
}

impl SigStructure<'_> {
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut fields = Vec::with_capacity(5);
        match self.sign_protected {
            Some(sign_protected) => {
                fields.push(Value::Text(CONTEXT_SIGNATURE.into()));
                fields.push(cbor::bstr(self.body_protected));
                fields.push(cbor::bstr(sign_protected));
            }
            None => {
                fields.push(Value::Text(CONTEXT_SIGNATURE1.into()));
                fields.push(cbor::bstr(self.body_protected));
            }
        }
        fields.push(cbor::bstr(self.external_aad));
        fields.push(cbor::bstr(self.payload));
        Ok(cbor::encode(&Value::Array(fields))?)
    }
}

/// Enc_structure for computing AAD per RFC 9052 Section 5.3.
///
/// ```text
/// Enc_structure = [
///     context:      "Encrypt0" / "Encrypt",
///     protected:    bstr,
///     external_aad: bstr
/// ]
/// ```
pub struct EncStructure<'a> {
    pub context: &'static str,
    pub protected: &'a [u8],
    pub external_aad: &'a [u8],
}

impl EncStructure<'_> {
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(cbor::encode(&Value::Array(vec![
            Value::Text(self.context.into()),
            cbor::bstr(self.protected),
            cbor::bstr(self.external_aad),
        ]))?)
    }
}

/// COSE_KDF_Context for key derivation per RFC 9053 Section 5.2. The key
/// length is given in bytes and encoded in bits; the protected bytes are
/// those of the recipient layer running the derivation.
///
/// ```text
/// COSE_KDF_Context = [
///     AlgorithmID: int,
///     PartyUInfo:  [identity, nonce, other],
///     PartyVInfo:  [identity, nonce, other],
///     SuppPubInfo: [keyDataLength: uint, protected: bstr]
/// ]
/// ```
pub struct KdfContext<'a> {
    pub algorithm: Algorithm,
    pub party_u: &'a PartyInfo,
    pub party_v: &'a PartyInfo,
    pub key_len: usize,
    pub protected: &'a [u8],
}

impl KdfContext<'_> {
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let party = |info: &PartyInfo| {
            let field = |value: &Option<Vec<u8>>| match value {
                Some(bytes) => cbor::bstr(bytes),
                None => Value::Null,
            };
            Value::Array(vec![
                field(&info.identity),
                field(&info.nonce),
                field(&info.other),
            ])
        };
        Ok(cbor::encode(&Value::Array(vec![
            Value::from(self.algorithm.id()),
            party(self.party_u),
            party(self.party_v),
            Value::Array(vec![
                Value::from(self.key_len as u64 * 8),
                cbor::bstr(self.protected),
            ]),
        ]))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &[u8] = b"This is the content.";

    // Tests the structures against literal bytes, so a wrong field, order or
    // length prefix cannot hide behind a round trip.
    #[test]
    fn test_structures() {
        struct TestCase {
            encoded: Vec<u8>,
            want: &'static str,
        }
        let party = PartyInfo::default();
        let tests = [
            TestCase {
                encoded: MacStructure {
                    context: CONTEXT_MAC0,
                    protected: &hex::decode("a10105").unwrap(),
                    external_aad: b"",
                    payload: PAYLOAD,
                }
                .encode()
                .unwrap(),
                want: "84644d41433043a101054054546869732069732074686520636f6e74656e742e",
            },
            TestCase {
                encoded: MacStructure {
                    context: CONTEXT_MAC0,
                    protected: &hex::decode("a10105").unwrap(),
                    external_aad: b"aad",
                    payload: PAYLOAD,
                }
                .encode()
                .unwrap(),
                want: "84644d41433043a101054361616454546869732069732074686520636f6e74656e742e",
            },
            TestCase {
                encoded: MacStructure {
                    context: CONTEXT_MAC,
                    protected: &hex::decode("a10105").unwrap(),
                    external_aad: b"",
                    payload: PAYLOAD,
                }
                .encode()
                .unwrap(),
                want: "84634d414343a101054054546869732069732074686520636f6e74656e742e",
            },
            TestCase {
                encoded: SigStructure {
                    body_protected: &hex::decode("a10127").unwrap(),
                    sign_protected: None,
                    external_aad: b"",
                    payload: PAYLOAD,
                }
                .encode()
                .unwrap(),
                want: "846a5369676e61747572653143a101274054546869732069732074686520636f6e74656e742e",
            },
            TestCase {
                encoded: SigStructure {
                    body_protected: b"",
                    sign_protected: Some(&hex::decode("a10127").unwrap()),
                    external_aad: b"",
                    payload: PAYLOAD,
                }
                .encode()
                .unwrap(),
                want: "85695369676e61747572654043a101274054546869732069732074686520636f6e74656e742e",
            },
            TestCase {
                encoded: EncStructure {
                    context: CONTEXT_ENCRYPT0,
                    protected: &hex::decode("a10101").unwrap(),
                    external_aad: b"",
                }
                .encode()
                .unwrap(),
                want: "8368456e63727970743043a1010140",
            },
            TestCase {
                encoded: EncStructure {
                    context: CONTEXT_ENCRYPT,
                    protected: &hex::decode("a10101").unwrap(),
                    external_aad: b"",
                }
                .encode()
                .unwrap(),
                want: "8367456e637279707443a1010140",
            },
            TestCase {
                encoded: KdfContext {
                    algorithm: Algorithm::A128Gcm,
                    party_u: &party,
                    party_v: &party,
                    key_len: 16,
                    protected: &hex::decode("a1013818").unwrap(),
                }
                .encode()
                .unwrap(),
                want: "840183f6f6f683f6f6f682188044a1013818",
            },
        ];
        for (i, tc) in tests.iter().enumerate() {
            assert_eq!(hex::encode(&tc.encoded), tc.want, "test {i}");
        }
    }

    // Tests that party information lands in its slots.
    #[test]
    fn test_kdf_context_parties() {
        let party_u = PartyInfo {
            identity: Some(b"lighting-client".to_vec()),
            ..Default::default()
        };
        let party_v = PartyInfo {
            nonce: Some(vec![0x01]),
            other: Some(vec![0x02]),
            ..Default::default()
        };
        let encoded = KdfContext {
            algorithm: Algorithm::A128Kw,
            party_u: &party_u,
            party_v: &party_v,
            key_len: 16,
            protected: b"",
        }
        .encode()
        .unwrap();

        // [-3, [h'6c69...', nil, nil], [nil, h'01', h'02'], [128, h'']]
        assert_eq!(
            hex::encode(encoded),
            format!(
                "8422834f{}f6f683f64101410282188040",
                hex::encode(b"lighting-client")
            )
        );
    }
}
