// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Encrypted COSE keys: a COSE_Key map carried as the plaintext of an
//! untagged COSE_Encrypt0, as used by the encrypted confirmation claim.
//!
//! https://datatracker.ietf.org/doc/html/rfc8747#section-3.3

use super::CoseKey;
use crate::cbor;
use crate::cose::{self, CoseEncrypt0, DecodeOptions, EncodeOptions, Headers};

/// encrypt seals the serialized key under a content encryption key.
///
/// Returns the untagged COSE_Encrypt0 array.
pub fn encrypt(key: &CoseKey, kek: &CoseKey) -> Result<Vec<u8>, cose::Error> {
    let plaintext = key.to_bytes()?;
    let msg = cose::seal_encrypt0(&plaintext, kek, Headers::default(), &EncodeOptions::default())?;
    Ok(cbor::encode(&msg.to_value()?)?)
}

/// decrypt opens an untagged COSE_Encrypt0 array and parses the COSE key
/// inside.
pub fn decrypt(data: &[u8], kek: &CoseKey) -> Result<CoseKey, cose::Error> {
    let value = cbor::decode(data)
        .map_err(|e| cose::Error::MalformedMessage(format!("encrypted key: {e}")))?;
    let msg = CoseEncrypt0::from_value(&value)?;
    let plaintext = cose::open_encrypt0(&msg, &[kek], &DecodeOptions::default())?;
    Ok(CoseKey::from_bytes(&plaintext)?)
}
