// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

#![no_main]

use cose_cwt::algorithm::Algorithm;
use cose_cwt::cose::{self, CoseMessage, DecodeOptions};
use cose_cwt::cwt::{Config, Cwt};
use cose_cwt::key::CoseKey;
use libfuzzer_sys::fuzz_target;
use std::sync::LazyLock;

static KEYS: LazyLock<Vec<CoseKey>> = LazyLock::new(|| {
    [Algorithm::Hmac256, Algorithm::A128Gcm, Algorithm::A128Kw]
        .into_iter()
        .map(|alg| CoseKey::from_symmetric(alg, None).unwrap())
        .collect()
});

fuzz_target!(|data: &[u8]| {
    // Anything that parses must serialize canonically
    if let Ok(msg) = CoseMessage::from_bytes(data) {
        if let Ok(encoded) = msg.to_bytes() {
            let reparsed = CoseMessage::from_bytes(&encoded)
                .expect("Failed to parse re-encoded message");
            assert_eq!(reparsed.to_bytes().expect("re-encode"), encoded);
        }
    }
    // Decoding arbitrary input must fail cleanly, never panic
    let keys: Vec<&CoseKey> = KEYS.iter().collect();
    let _ = cose::decode(data, &keys, &DecodeOptions::default());
    let _ = Cwt::new(Config::default()).decode_at(data, &keys, 0);
});
