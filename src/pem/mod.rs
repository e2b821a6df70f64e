// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Strict PEM decoding for importing key material.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

const PEM_HEADER: &[u8] = b"-----BEGIN ";
const PEM_FOOTER: &[u8] = b"-----END ";
const PEM_ENDING: &[u8] = b"-----";

/// Error is the failures that can occur while decoding a PEM block.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("missing PEM header")]
    MissingHeader,
    #[error("malformed PEM header")]
    MalformedHeader,
    #[error("missing PEM footer")]
    MissingFooter,
    #[error("malformed PEM body")]
    MalformedBody,
    #[error("trailing data after PEM block")]
    TrailingData,
    #[error("invalid base64: {0}")]
    Base64(String),
}

/// Block is a decoded PEM block: the label between the dashes and the DER
/// payload it carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub label: String,
    pub der: Vec<u8>,
}

/// decode parses a single PEM block with strict validation.
///
/// Rules:
///   - Header must start at byte 0 (no leading whitespace)
///   - Footer must match the header label and end the data
///   - Line endings must be consistent (\n or \r\n throughout)
///   - Strict base64 decoding (no padding errors, etc.)
pub fn decode(data: &[u8]) -> Result<Block, Error> {
    if !data.starts_with(PEM_HEADER) {
        return Err(Error::MissingHeader);
    }
    let header_end = data
        .iter()
        .position(|&b| b == b'\n')
        .ok_or(Error::MalformedHeader)?;

    // Detect line ending style from the header line
    let line_ending: &[u8] = if header_end > 0 && data[header_end - 1] == b'\r' {
        b"\r\n"
    } else {
        b"\n"
    };
    let header = &data[..header_end + 1 - line_ending.len()];
    if !header.ends_with(PEM_ENDING) || header.len() <= PEM_HEADER.len() + PEM_ENDING.len() {
        return Err(Error::MalformedHeader);
    }
    let label = &header[PEM_HEADER.len()..header.len() - PEM_ENDING.len()];

    // Locate the matching footer and make sure nothing but a line ending
    // follows it
    let mut footer = PEM_FOOTER.to_vec();
    footer.extend_from_slice(label);
    footer.extend_from_slice(PEM_ENDING);

    let search = &data[header_end + 1..];
    let footer_at = search
        .windows(footer.len())
        .position(|w| w == footer.as_slice())
        .ok_or(Error::MissingFooter)?;

    let rest = &search[footer_at + footer.len()..];
    if !rest.is_empty() && rest != line_ending {
        return Err(Error::TrailingData);
    }
    let body = &search[..footer_at];
    if body.is_empty() || !body.ends_with(line_ending) {
        return Err(Error::MalformedBody);
    }
    let body = &body[..body.len() - 1];

    // Every body line, the last one included, must use the same line ending
    // as the header
    let mut b64 = Vec::with_capacity(body.len());
    for line in body.split(|&b| b == b'\n') {
        let line = if line_ending.len() == 2 {
            line.strip_suffix(b"\r").ok_or(Error::MalformedBody)?
        } else {
            line
        };
        if line.contains(&b'\r') {
            return Err(Error::MalformedBody);
        }
        b64.extend_from_slice(line);
    }
    let der = STANDARD
        .decode(&b64)
        .map_err(|e| Error::Base64(e.to_string()))?;

    Ok(Block {
        label: String::from_utf8_lossy(label).into_owned(),
        der,
    })
}
