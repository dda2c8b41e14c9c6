// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![deny(unsafe_code)]

pub mod aes;
mod auth_key;
mod obfuscated;

pub use auth_key::AuthKey;
pub use obfuscated::ObfuscationContext;

use sha2::{Digest, Sha256};

/// Which side originated the message being decrypted, per the MTProto 2.0
/// key derivation: `x = 0` for client-originated, `x = 8` for
/// server-originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sender {
    Client,
    Server,
}

impl Sender {
    fn x(self) -> usize {
        match self {
            Sender::Client => 0,
            Sender::Server => 8,
        }
    }
}

/// Computes `(aes_key, aes_iv)` from an authorization key and a message key,
/// per the [MTProto 2.0 key derivation].
///
/// [MTProto 2.0 key derivation]: https://core.telegram.org/mtproto/description#defining-aes-key-and-initialization-vector
pub fn kdf(auth_key: &[u8; 256], msg_key: &[u8; 16], sender: Sender) -> ([u8; 32], [u8; 32]) {
    let x = sender.x();

    let sha256_a = Sha256::digest({
        let mut buf = Vec::with_capacity(16 + 36);
        buf.extend_from_slice(msg_key);
        buf.extend_from_slice(&auth_key[x..x + 36]);
        buf
    });
    let sha256_b = Sha256::digest({
        let mut buf = Vec::with_capacity(36 + 16);
        buf.extend_from_slice(&auth_key[x + 40..x + 76]);
        buf.extend_from_slice(msg_key);
        buf
    });

    let mut aes_key = [0u8; 32];
    aes_key[0..8].copy_from_slice(&sha256_a[0..8]);
    aes_key[8..24].copy_from_slice(&sha256_b[8..24]);
    aes_key[24..32].copy_from_slice(&sha256_a[24..32]);

    let mut aes_iv = [0u8; 32];
    aes_iv[0..8].copy_from_slice(&sha256_b[0..8]);
    aes_iv[8..24].copy_from_slice(&sha256_a[8..24]);
    aes_iv[24..32].copy_from_slice(&sha256_b[24..32]);

    (aes_key, aes_iv)
}

/// Decrypts a padded ciphertext using AES-IGE. Does not verify or strip
/// padding: the caller is responsible for interpreting the declared inner
/// length and ignoring the trailing padding bytes.
pub fn decrypt_ige(padded_ciphertext: &[u8], key: &[u8; 32], iv: &[u8; 32]) -> Vec<u8> {
    aes::ige_decrypt(padded_ciphertext, key, iv)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_test_auth_key() -> [u8; 256] {
        let mut buffer = [0u8; 256];
        buffer
            .iter_mut()
            .enumerate()
            .for_each(|(i, x)| *x = i as u8);
        buffer
    }

    fn get_test_msg_key() -> [u8; 16] {
        let mut buffer = [0u8; 16];
        buffer
            .iter_mut()
            .enumerate()
            .for_each(|(i, x)| *x = i as u8);
        buffer
    }

    #[test]
    fn calc_client_key() {
        let auth_key = get_test_auth_key();
        let msg_key = get_test_msg_key();
        let expected = (
            [
                112, 78, 208, 156, 139, 65, 102, 138, 232, 249, 157, 36, 71, 56, 247, 29, 189, 220,
                68, 70, 155, 107, 189, 74, 168, 87, 61, 208, 66, 189, 5, 158,
            ],
            [
                77, 38, 96, 0, 165, 80, 237, 171, 191, 76, 124, 228, 15, 208, 4, 60, 201, 34, 48,
                24, 76, 211, 23, 165, 204, 156, 36, 130, 253, 59, 147, 24,
            ],
        );
        assert_eq!(kdf(&auth_key, &msg_key, Sender::Client), expected);
    }

    #[test]
    fn calc_server_key() {
        let auth_key = get_test_auth_key();
        let msg_key = get_test_msg_key();
        let expected = (
            [
                33, 119, 37, 121, 155, 36, 88, 6, 69, 129, 116, 161, 252, 251, 200, 131, 144, 104,
                7, 177, 80, 51, 253, 208, 234, 43, 77, 105, 207, 156, 54, 78,
            ],
            [
                102, 154, 101, 56, 145, 122, 79, 165, 108, 163, 35, 96, 164, 49, 201, 22, 11, 228,
                173, 136, 113, 64, 152, 13, 171, 145, 206, 123, 220, 71, 255, 188,
            ],
        );
        assert_eq!(kdf(&auth_key, &msg_key, Sender::Server), expected);
    }

    #[test]
    fn verify_ige_decryption() {
        let plaintext_like = {
            let mut buffer = [0u8; 32];
            buffer
                .iter_mut()
                .enumerate()
                .for_each(|(i, x)| *x = i as u8);
            buffer
        };
        let key = plaintext_like;
        let iv = plaintext_like;
        let expected = vec![
            229, 119, 122, 250, 205, 123, 44, 22, 247, 172, 64, 202, 230, 30, 246, 3, 254, 230, 9,
            143, 184, 168, 134, 10, 185, 238, 103, 44, 215, 229, 186, 204,
        ];
        assert_eq!(decrypt_ige(&plaintext_like, &key, &iv), expected);
    }
}
