// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use mtmitm_crypto::AuthKey;

#[derive(Debug)]
pub enum LoadError {
    /// A hex-encoded key didn't decode to exactly 256 bytes.
    WrongLength { got: usize },
    InvalidHex(hex::FromHexError),
    Io(io::Error),
}

impl std::error::Error for LoadError {}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongLength { got } => write!(f, "expected a 256-byte key, got {got} bytes"),
            Self::InvalidHex(e) => write!(f, "invalid hex: {e}"),
            Self::Io(e) => write!(f, "{e}"),
        }
    }
}

impl From<hex::FromHexError> for LoadError {
    fn from(e: hex::FromHexError) -> Self {
        Self::InvalidHex(e)
    }
}

impl From<io::Error> for LoadError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Decodes a single hex-encoded authorization key.
pub fn parse_hex_key(text: &str) -> Result<AuthKey, LoadError> {
    let bytes = hex::decode(text.trim())?;
    let array: [u8; 256] = bytes
        .clone()
        .try_into()
        .map_err(|_| LoadError::WrongLength { got: bytes.len() })?;
    Ok(AuthKey::from_bytes(array))
}

/// Process-wide mapping from authorization key id to key bytes. Populated
/// once at startup from CLI-supplied keys and/or a key file, then only
/// ever read while serving.
#[derive(Default)]
pub struct KeyRegistry {
    keys: HashMap<u64, AuthKey>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a key. A later registration with the same id silently
    /// overwrites an earlier one.
    pub fn insert(&mut self, key: AuthKey) {
        self.keys.insert(key.id(), key);
    }

    pub fn insert_hex(&mut self, text: &str) -> Result<u64, LoadError> {
        let key = parse_hex_key(text)?;
        let id = key.id();
        self.insert(key);
        Ok(id)
    }

    /// Reads a newline-delimited file of hex-encoded keys, skipping blank
    /// lines.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), LoadError> {
        let contents = fs::read_to_string(path)?;
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            self.insert_hex(line)?;
        }
        Ok(())
    }

    pub fn get(&self, auth_key_id: u64) -> Option<&AuthKey> {
        self.keys.get(&auth_key_id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hex() -> String {
        hex::encode([1u8; 256])
    }

    #[test]
    fn registers_and_looks_up_by_derived_id() {
        let mut registry = KeyRegistry::new();
        let id = registry.insert_hex(&sample_hex()).unwrap();
        assert!(registry.get(id).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_registration_overwrites() {
        let mut registry = KeyRegistry::new();
        registry.insert_hex(&sample_hex()).unwrap();
        registry.insert_hex(&sample_hex()).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn rejects_wrong_length_key() {
        let err = parse_hex_key(&hex::encode([1u8; 32])).unwrap_err();
        assert!(matches!(err, LoadError::WrongLength { got: 32 }));
    }
}
