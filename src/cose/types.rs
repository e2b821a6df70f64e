// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! COSE message structures and their CBOR array layouts.

use super::Error;
use super::header::{Header, ProtectedHeader};
use crate::cbor::{self, Value};

/// CBOR tag of COSE_Encrypt0.
pub const TAG_ENCRYPT0: u64 = 16;
/// CBOR tag of COSE_Mac0.
pub const TAG_MAC0: u64 = 17;
/// CBOR tag of COSE_Sign1.
pub const TAG_SIGN1: u64 = 18;
/// CBOR tag of COSE_Encrypt.
pub const TAG_ENCRYPT: u64 = 96;
/// CBOR tag of COSE_Mac.
pub const TAG_MAC: u64 = 97;
/// CBOR tag of COSE_Sign.
pub const TAG_SIGN: u64 = 98;

/// MessageType is one of the six COSE message shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    Encrypt0,
    Mac0,
    Sign1,
    Encrypt,
    Mac,
    Sign,
}

impl MessageType {
    /// tag returns the CBOR tag of the message type.
    pub const fn tag(self) -> u64 {
        match self {
            MessageType::Encrypt0 => TAG_ENCRYPT0,
            MessageType::Mac0 => TAG_MAC0,
            MessageType::Sign1 => TAG_SIGN1,
            MessageType::Encrypt => TAG_ENCRYPT,
            MessageType::Mac => TAG_MAC,
            MessageType::Sign => TAG_SIGN,
        }
    }

    /// from_tag resolves a CBOR tag into a message type.
    pub const fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            TAG_ENCRYPT0 => Some(MessageType::Encrypt0),
            TAG_MAC0 => Some(MessageType::Mac0),
            TAG_SIGN1 => Some(MessageType::Sign1),
            TAG_ENCRYPT => Some(MessageType::Encrypt),
            TAG_MAC => Some(MessageType::Mac),
            TAG_SIGN => Some(MessageType::Sign),
            _ => None,
        }
    }

    /// name returns the message name as used in RFC 9052.
    pub const fn name(self) -> &'static str {
        match self {
            MessageType::Encrypt0 => "COSE_Encrypt0",
            MessageType::Mac0 => "COSE_Mac0",
            MessageType::Sign1 => "COSE_Sign1",
            MessageType::Encrypt => "COSE_Encrypt",
            MessageType::Mac => "COSE_Mac",
            MessageType::Sign => "COSE_Sign",
        }
    }
}

// Splits an array into exactly `N` fields.
fn fields<'a, const N: usize>(value: &'a Value, name: &str) -> Result<&'a [Value; N], Error> {
    let array = value
        .as_array()
        .ok_or_else(|| Error::MalformedMessage(format!("{name} must be an array")))?;
    array.as_slice().try_into().map_err(|_| {
        Error::MalformedMessage(format!(
            "{name} must have {N} fields, got {}",
            array.len()
        ))
    })
}

fn protected_field(value: &Value) -> Result<ProtectedHeader, Error> {
    let bytes = cbor::bytes(value).ok_or_else(|| {
        Error::MalformedMessage("protected header must be a byte string".into())
    })?;
    ProtectedHeader::parse(bytes)
}

fn bytes_field(value: &Value, name: &str) -> Result<Vec<u8>, Error> {
    cbor::bytes(value)
        .map(|b| b.to_vec())
        .ok_or_else(|| Error::MalformedMessage(format!("{name} must be a byte string")))
}

fn payload_field(value: &Value) -> Result<Option<Vec<u8>>, Error> {
    match value {
        Value::Null => Ok(None),
        _ => bytes_field(value, "payload").map(Some),
    }
}

fn payload_value(payload: &Option<Vec<u8>>) -> Value {
    match payload {
        Some(payload) => cbor::bstr(payload),
        None => Value::Null,
    }
}

fn list_field<T>(
    value: &Value,
    name: &str,
    parse: impl Fn(&Value) -> Result<T, Error>,
) -> Result<Vec<T>, Error> {
    let items = value
        .as_array()
        .ok_or_else(|| Error::MalformedMessage(format!("{name} must be an array")))?;
    if items.is_empty() {
        return Err(Error::MalformedMessage(format!("{name} must not be empty")));
    }
    items.iter().map(parse).collect()
}

/// COSE_Mac0 structure per RFC 9052 Section 6.2.
///
/// ```text
/// COSE_Mac0 = [
///     protected:   bstr,
///     unprotected: header_map,
///     payload:     bstr / nil,
///     tag:         bstr
/// ]
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct CoseMac0 {
    pub protected: ProtectedHeader,
    pub unprotected: Header,
    pub payload: Option<Vec<u8>>,
    pub tag: Vec<u8>,
}

impl CoseMac0 {
    pub fn to_value(&self) -> Result<Value, Error> {
        Ok(Value::Array(vec![
            cbor::bstr(&self.protected.bytes),
            self.unprotected.to_map()?,
            payload_value(&self.payload),
            cbor::bstr(&self.tag),
        ]))
    }

    pub fn from_value(value: &Value) -> Result<Self, Error> {
        let [protected, unprotected, payload, tag] = fields::<4>(value, "COSE_Mac0")?;
        Ok(Self {
            protected: protected_field(protected)?,
            unprotected: Header::from_map(unprotected)?,
            payload: payload_field(payload)?,
            tag: bytes_field(tag, "tag")?,
        })
    }
}

/// COSE_Mac structure per RFC 9052 Section 6.1.
///
/// ```text
/// COSE_Mac = [
///     protected:   bstr,
///     unprotected: header_map,
///     payload:     bstr / nil,
///     tag:         bstr,
///     recipients:  [+COSE_recipient]
/// ]
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct CoseMac {
    pub protected: ProtectedHeader,
    pub unprotected: Header,
    pub payload: Option<Vec<u8>>,
    pub tag: Vec<u8>,
    pub recipients: Vec<RecipientLayer>,
}

impl CoseMac {
    pub fn to_value(&self) -> Result<Value, Error> {
        Ok(Value::Array(vec![
            cbor::bstr(&self.protected.bytes),
            self.unprotected.to_map()?,
            payload_value(&self.payload),
            cbor::bstr(&self.tag),
            Value::Array(
                self.recipients
                    .iter()
                    .map(RecipientLayer::to_value)
                    .collect::<Result<_, _>>()?,
            ),
        ]))
    }

    pub fn from_value(value: &Value) -> Result<Self, Error> {
        let [protected, unprotected, payload, tag, recipients] = fields::<5>(value, "COSE_Mac")?;
        Ok(Self {
            protected: protected_field(protected)?,
            unprotected: Header::from_map(unprotected)?,
            payload: payload_field(payload)?,
            tag: bytes_field(tag, "tag")?,
            recipients: list_field(recipients, "recipients", |layer| {
                Ok(RecipientLayer::from_value(layer))
            })?,
        })
    }
}

/// COSE_Sign1 structure per RFC 9052 Section 4.2.
///
/// ```text
/// COSE_Sign1 = [
///     protected:   bstr,
///     unprotected: header_map,
///     payload:     bstr / nil,
///     signature:   bstr
/// ]
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct CoseSign1 {
    pub protected: ProtectedHeader,
    pub unprotected: Header,
    pub payload: Option<Vec<u8>>,
    pub signature: Vec<u8>,
}

impl CoseSign1 {
    pub fn to_value(&self) -> Result<Value, Error> {
        Ok(Value::Array(vec![
            cbor::bstr(&self.protected.bytes),
            self.unprotected.to_map()?,
            payload_value(&self.payload),
            cbor::bstr(&self.signature),
        ]))
    }

    pub fn from_value(value: &Value) -> Result<Self, Error> {
        let [protected, unprotected, payload, signature] = fields::<4>(value, "COSE_Sign1")?;
        Ok(Self {
            protected: protected_field(protected)?,
            unprotected: Header::from_map(unprotected)?,
            payload: payload_field(payload)?,
            signature: bytes_field(signature, "signature")?,
        })
    }
}

/// COSE_Signature structure per RFC 9052 Section 4.1.
///
/// ```text
/// COSE_Signature = [
///     protected:   bstr,
///     unprotected: header_map,
///     signature:   bstr
/// ]
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct CoseSignature {
    pub protected: ProtectedHeader,
    pub unprotected: Header,
    pub signature: Vec<u8>,
}

impl CoseSignature {
    pub fn to_value(&self) -> Result<Value, Error> {
        Ok(Value::Array(vec![
            cbor::bstr(&self.protected.bytes),
            self.unprotected.to_map()?,
            cbor::bstr(&self.signature),
        ]))
    }

    pub fn from_value(value: &Value) -> Result<Self, Error> {
        let [protected, unprotected, signature] = fields::<3>(value, "COSE_Signature")?;
        Ok(Self {
            protected: protected_field(protected)?,
            unprotected: Header::from_map(unprotected)?,
            signature: bytes_field(signature, "signature")?,
        })
    }
}

/// COSE_Sign structure per RFC 9052 Section 4.1.
///
/// ```text
/// COSE_Sign = [
///     protected:   bstr,
///     unprotected: header_map,
///     payload:     bstr / nil,
///     signatures:  [+COSE_Signature]
/// ]
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct CoseSign {
    pub protected: ProtectedHeader,
    pub unprotected: Header,
    pub payload: Option<Vec<u8>>,
    pub signatures: Vec<CoseSignature>,
}

impl CoseSign {
    pub fn to_value(&self) -> Result<Value, Error> {
        Ok(Value::Array(vec![
            cbor::bstr(&self.protected.bytes),
            self.unprotected.to_map()?,
            payload_value(&self.payload),
            Value::Array(
                self.signatures
                    .iter()
                    .map(CoseSignature::to_value)
                    .collect::<Result<_, _>>()?,
            ),
        ]))
    }

    pub fn from_value(value: &Value) -> Result<Self, Error> {
        let [protected, unprotected, payload, signatures] = fields::<4>(value, "COSE_Sign")?;
        Ok(Self {
            protected: protected_field(protected)?,
            unprotected: Header::from_map(unprotected)?,
            payload: payload_field(payload)?,
            signatures: list_field(signatures, "signatures", CoseSignature::from_value)?,
        })
    }
}

/// COSE_Encrypt0 structure per RFC 9052 Section 5.2.
///
/// ```text
/// COSE_Encrypt0 = [
///     protected:   bstr,
///     unprotected: header_map,
///     ciphertext:  bstr
/// ]
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct CoseEncrypt0 {
    pub protected: ProtectedHeader,
    pub unprotected: Header,
    pub ciphertext: Vec<u8>,
}

impl CoseEncrypt0 {
    pub fn to_value(&self) -> Result<Value, Error> {
        Ok(Value::Array(vec![
            cbor::bstr(&self.protected.bytes),
            self.unprotected.to_map()?,
            cbor::bstr(&self.ciphertext),
        ]))
    }

    pub fn from_value(value: &Value) -> Result<Self, Error> {
        let [protected, unprotected, ciphertext] = fields::<3>(value, "COSE_Encrypt0")?;
        Ok(Self {
            protected: protected_field(protected)?,
            unprotected: Header::from_map(unprotected)?,
            ciphertext: bytes_field(ciphertext, "ciphertext")?,
        })
    }
}

/// COSE_Encrypt structure per RFC 9052 Section 5.1.
///
/// ```text
/// COSE_Encrypt = [
///     protected:   bstr,
///     unprotected: header_map,
///     ciphertext:  bstr,
///     recipients:  [+COSE_recipient]
/// ]
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct CoseEncrypt {
    pub protected: ProtectedHeader,
    pub unprotected: Header,
    pub ciphertext: Vec<u8>,
    pub recipients: Vec<RecipientLayer>,
}

impl CoseEncrypt {
    pub fn to_value(&self) -> Result<Value, Error> {
        Ok(Value::Array(vec![
            cbor::bstr(&self.protected.bytes),
            self.unprotected.to_map()?,
            cbor::bstr(&self.ciphertext),
            Value::Array(
                self.recipients
                    .iter()
                    .map(RecipientLayer::to_value)
                    .collect::<Result<_, _>>()?,
            ),
        ]))
    }

    pub fn from_value(value: &Value) -> Result<Self, Error> {
        let [protected, unprotected, ciphertext, recipients] = fields::<4>(value, "COSE_Encrypt")?;
        Ok(Self {
            protected: protected_field(protected)?,
            unprotected: Header::from_map(unprotected)?,
            ciphertext: bytes_field(ciphertext, "ciphertext")?,
            recipients: list_field(recipients, "recipients", |layer| {
                Ok(RecipientLayer::from_value(layer))
            })?,
        })
    }
}

/// COSE_recipient structure per RFC 9052 Section 5.1. The ciphertext is the
/// wrapped content key, empty for direct and key agreement recipients. Only
/// one recipient layer is supported.
///
/// ```text
/// COSE_recipient = [
///     protected:   bstr,
///     unprotected: header_map,
///     ciphertext:  bstr / nil
/// ]
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct CoseRecipient {
    pub protected: ProtectedHeader,
    pub unprotected: Header,
    pub ciphertext: Vec<u8>,
}

impl CoseRecipient {
    pub fn to_value(&self) -> Result<Value, Error> {
        Ok(Value::Array(vec![
            cbor::bstr(&self.protected.bytes),
            self.unprotected.to_map()?,
            cbor::bstr(&self.ciphertext),
        ]))
    }

    pub fn from_value(value: &Value) -> Result<Self, Error> {
        if let Some(array) = value.as_array() {
            if array.len() == 4 {
                return Err(Error::MalformedMessage(
                    "nested recipient layers are not supported".into(),
                ));
            }
        }
        let [protected, unprotected, ciphertext] = fields::<3>(value, "COSE_recipient")?;
        let ciphertext = match ciphertext {
            Value::Null => Vec::new(),
            _ => bytes_field(ciphertext, "recipient ciphertext")?,
        };
        Ok(Self {
            protected: protected_field(protected)?,
            unprotected: Header::from_map(unprotected)?,
            ciphertext,
        })
    }
}

/// RecipientLayer is one entry of a recipients array. A layer that does not
/// parse is kept verbatim along with the reason, so that the other layers of
/// the message stay usable.
#[derive(Clone, Debug, PartialEq)]
pub enum RecipientLayer {
    Parsed(CoseRecipient),
    Malformed { raw: Value, error: Error },
}

impl RecipientLayer {
    pub fn to_value(&self) -> Result<Value, Error> {
        match self {
            RecipientLayer::Parsed(recipient) => recipient.to_value(),
            RecipientLayer::Malformed { raw, .. } => Ok(raw.clone()),
        }
    }

    pub fn from_value(value: &Value) -> Self {
        match CoseRecipient::from_value(value) {
            Ok(recipient) => RecipientLayer::Parsed(recipient),
            Err(error) => RecipientLayer::Malformed {
                raw: value.clone(),
                error,
            },
        }
    }

    /// parsed returns the recipient, or the reason it failed to parse.
    pub fn parsed(&self) -> Result<&CoseRecipient, Error> {
        match self {
            RecipientLayer::Parsed(recipient) => Ok(recipient),
            RecipientLayer::Malformed { error, .. } => Err(error.clone()),
        }
    }
}

impl From<CoseRecipient> for RecipientLayer {
    fn from(recipient: CoseRecipient) -> Self {
        RecipientLayer::Parsed(recipient)
    }
}

/// CoseMessage is any of the six tagged COSE messages.
#[derive(Clone, Debug, PartialEq)]
pub enum CoseMessage {
    Encrypt0(CoseEncrypt0),
    Mac0(CoseMac0),
    Sign1(CoseSign1),
    Encrypt(CoseEncrypt),
    Mac(CoseMac),
    Sign(CoseSign),
}

impl CoseMessage {
    /// message_type returns the shape of the message.
    pub fn message_type(&self) -> MessageType {
        match self {
            CoseMessage::Encrypt0(_) => MessageType::Encrypt0,
            CoseMessage::Mac0(_) => MessageType::Mac0,
            CoseMessage::Sign1(_) => MessageType::Sign1,
            CoseMessage::Encrypt(_) => MessageType::Encrypt,
            CoseMessage::Mac(_) => MessageType::Mac,
            CoseMessage::Sign(_) => MessageType::Sign,
        }
    }

    /// to_bytes serializes the message as a tagged CBOR item.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let inner = match self {
            CoseMessage::Encrypt0(msg) => msg.to_value()?,
            CoseMessage::Mac0(msg) => msg.to_value()?,
            CoseMessage::Sign1(msg) => msg.to_value()?,
            CoseMessage::Encrypt(msg) => msg.to_value()?,
            CoseMessage::Mac(msg) => msg.to_value()?,
            CoseMessage::Sign(msg) => msg.to_value()?,
        };
        let tag = self.message_type().tag();
        Ok(cbor::encode(&Value::Tag(tag, Box::new(inner)))?)
    }

    /// from_bytes parses a tagged COSE message.
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        let value = cbor::decode(data)
            .map_err(|e| Error::MalformedMessage(format!("not a CBOR item: {e}")))?;
        let Value::Tag(tag, inner) = &value else {
            return Err(Error::MalformedMessage("COSE message must be tagged".into()));
        };
        let kind = MessageType::from_tag(*tag)
            .ok_or_else(|| Error::MalformedMessage(format!("unknown COSE tag {tag}")))?;

        Ok(match kind {
            MessageType::Encrypt0 => CoseMessage::Encrypt0(CoseEncrypt0::from_value(inner)?),
            MessageType::Mac0 => CoseMessage::Mac0(CoseMac0::from_value(inner)?),
            MessageType::Sign1 => CoseMessage::Sign1(CoseSign1::from_value(inner)?),
            MessageType::Encrypt => CoseMessage::Encrypt(CoseEncrypt::from_value(inner)?),
            MessageType::Mac => CoseMessage::Mac(CoseMac::from_value(inner)?),
            MessageType::Sign => CoseMessage::Sign(CoseSign::from_value(inner)?),
        })
    }
}

/// detect reports the message type of a tagged COSE item without parsing
/// the message body.
pub fn detect(data: &[u8]) -> Option<MessageType> {
    match cbor::decode(data).ok()? {
        Value::Tag(tag, inner) if inner.is_array() => MessageType::from_tag(tag),
        _ => None,
    }
}
