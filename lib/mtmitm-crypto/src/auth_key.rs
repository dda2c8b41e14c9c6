// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use sha1::{Digest, Sha1};
use std::fmt;

/// A 256-byte Telegram authorization key, long-term-shared between a
/// client session and the server.
#[derive(Clone)]
pub struct AuthKey {
    data: [u8; 256],
    id: u64,
}

impl PartialEq for AuthKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl AuthKey {
    /// Wraps the given raw key bytes, computing its identifier as the
    /// little-endian integer formed by bytes `[12..20]` of its SHA-1
    /// digest.
    pub fn from_bytes(data: [u8; 256]) -> Self {
        let sha = Sha1::digest(data);
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&sha[12..20]);
        Self {
            data,
            id: u64::from_le_bytes(id_bytes),
        }
    }

    pub fn data(&self) -> &[u8; 256] {
        &self.data
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthKey").field("id", &self.id).finish()
    }
}
