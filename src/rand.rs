// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use zeroize::Zeroizing;

/// generate creates an arbitrarily large buffer filled with randomness.
pub fn generate(bytes: usize) -> Vec<u8> {
    // Create a random buffer with a WASM friendly source
    let mut buf = vec![0u8; bytes];
    getrandom::fill(&mut buf[..]).expect("Failed to get random bytes");
    buf
}

/// secret is the same as generate, but the buffer is wiped when dropped. It's
/// meant for content encryption keys and other short lived key material.
pub fn secret(bytes: usize) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(generate(bytes))
}
