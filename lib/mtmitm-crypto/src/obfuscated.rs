// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use aes::cipher::{generic_array::GenericArray, KeyIvInit, StreamCipher};

/// The pair of AES-256-CTR keystreams derived from a 64-byte obfuscation
/// nonce.
///
/// `read` is derived directly from the nonce bytes and is the only one
/// actually used: because the proxy is a passive observer, it decrypts
/// both client-originated and server-originated bytes with the same
/// keystream each endpoint used to encrypt its own outgoing stream. `write`
/// is derived from the reversed nonce and kept only for completeness; no
/// in-scope transport variant has required it so far.
pub struct ObfuscationContext {
    read: ctr::Ctr128BE<aes::Aes256>,
    write: ctr::Ctr128BE<aes::Aes256>,
}

impl ObfuscationContext {
    pub fn new(nonce: &[u8; 64]) -> Self {
        let reversed = nonce.iter().copied().rev().collect::<Vec<_>>();
        Self {
            read: ctr::Ctr128BE::<aes::Aes256>::new(
                GenericArray::from_slice(&nonce[8..40]),
                GenericArray::from_slice(&nonce[40..56]),
            ),
            write: ctr::Ctr128BE::<aes::Aes256>::new(
                GenericArray::from_slice(&reversed[8..40]),
                GenericArray::from_slice(&reversed[40..56]),
            ),
        }
    }

    /// Decrypt (in place) bytes read from either direction of the wire.
    pub fn read(&mut self, buffer: &mut [u8]) {
        self.read.apply_keystream(buffer);
    }

    /// The reverse-direction keystream. Not invoked by the demultiplexer
    /// or framer; plumbed through in case a future transport variant needs
    /// it (see the open question on reverse-direction CTR re-encryption).
    #[allow(dead_code)]
    pub fn write(&mut self, buffer: &mut [u8]) {
        self.write.apply_keystream(buffer);
    }
}
