// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! COSE (RFC 9052/9053) MAC, signature and encryption messages, COSE keys
//! and CBOR Web Tokens (RFC 8392) on top of the RustCrypto primitives.

pub mod algorithm;
pub mod cbor;
pub mod cose;
#[cfg(feature = "cwt")]
pub mod cwt;
pub mod hkdf;
pub mod key;
#[cfg(feature = "pem")]
pub mod pem;
pub mod primitive;
pub mod rand;
