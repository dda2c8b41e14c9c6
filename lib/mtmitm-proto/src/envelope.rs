// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use mtmitm_crypto::{decrypt_ige, kdf, AuthKey, Sender};

/// The outer envelope of a framed body, before any decryption. Its shape is
/// fully determined by the first 8 bytes (`auth_key_id`).
#[derive(Clone, Debug, PartialEq)]
pub enum EnvelopeOuter {
    Unencrypted { message_id: u64, payload: Vec<u8> },
    Encrypted { auth_key_id: u64, msg_key: [u8; 16], ciphertext: Vec<u8> },
}

impl EnvelopeOuter {
    pub fn auth_key_id(&self) -> u64 {
        match self {
            Self::Unencrypted { .. } => 0,
            Self::Encrypted { auth_key_id, .. } => *auth_key_id,
        }
    }
}

/// The plaintext layout of an encrypted envelope's body, once successfully
/// decrypted. Padding is left untouched (and unverified): this is a
/// passive observer, not an endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct EnvelopeInner {
    pub salt: i64,
    pub session_id: i64,
    pub message_id: i64,
    pub seq_no: i32,
    pub payload: Vec<u8>,
}

/// Parses a framed body into its outer envelope. `None` if the body is too
/// short to even carry an `auth_key_id`, or an unencrypted envelope claims
/// a payload length the body doesn't actually contain.
pub fn parse_outer(body: &[u8]) -> Option<EnvelopeOuter> {
    if body.len() < 8 {
        return None;
    }
    let auth_key_id = u64::from_le_bytes(body[0..8].try_into().unwrap());

    if auth_key_id == 0 {
        if body.len() < 20 {
            return None;
        }
        let message_id = u64::from_le_bytes(body[8..16].try_into().unwrap());
        let length = u32::from_le_bytes(body[16..20].try_into().unwrap()) as usize;
        if 20 + length > body.len() {
            return None;
        }
        Some(EnvelopeOuter::Unencrypted {
            message_id,
            payload: body[20..20 + length].to_vec(),
        })
    } else {
        if body.len() < 24 {
            return None;
        }
        let mut msg_key = [0u8; 16];
        msg_key.copy_from_slice(&body[8..24]);
        Some(EnvelopeOuter::Encrypted {
            auth_key_id,
            msg_key,
            ciphertext: body[24..].to_vec(),
        })
    }
}

/// Decrypts an encrypted envelope's ciphertext given its authorization key
/// and which side originated it. `None` on any failure (absent key is the
/// caller's responsibility to check before calling this); never panics.
pub fn decrypt(ciphertext: &[u8], msg_key: &[u8; 16], auth_key: &AuthKey, sender: Sender) -> Option<EnvelopeInner> {
    if ciphertext.len() < 32 || ciphertext.len() % 16 != 0 {
        return None;
    }

    let (aes_key, aes_iv_full) = kdf(auth_key.data(), msg_key, sender);
    let mut aes_iv = [0u8; 32];
    aes_iv.copy_from_slice(&aes_iv_full);

    let plaintext = decrypt_ige(ciphertext, &aes_key, &aes_iv);
    if plaintext.len() < 32 {
        return None;
    }

    let salt = i64::from_le_bytes(plaintext[0..8].try_into().ok()?);
    let session_id = i64::from_le_bytes(plaintext[8..16].try_into().ok()?);
    let message_id = i64::from_le_bytes(plaintext[16..24].try_into().ok()?);
    let seq_no = i32::from_le_bytes(plaintext[24..28].try_into().ok()?);
    let inner_length = u32::from_le_bytes(plaintext[28..32].try_into().ok()?) as usize;

    if 32 + inner_length > plaintext.len() {
        return None;
    }

    Some(EnvelopeInner {
        salt,
        session_id,
        message_id,
        seq_no,
        payload: plaintext[32..32 + inner_length].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unencrypted_envelope() {
        let mut body = 0u64.to_le_bytes().to_vec(); // auth_key_id = 0
        body.extend_from_slice(&42u64.to_le_bytes()); // message_id
        body.extend_from_slice(&4u32.to_le_bytes()); // length
        body.extend_from_slice(&[1, 2, 3, 4]);

        let outer = parse_outer(&body).unwrap();
        assert_eq!(
            outer,
            EnvelopeOuter::Unencrypted {
                message_id: 42,
                payload: vec![1, 2, 3, 4],
            }
        );
    }

    #[test]
    fn parses_encrypted_envelope_shape() {
        let mut body = 7u64.to_le_bytes().to_vec();
        body.extend_from_slice(&[0xAB; 16]); // msg_key
        body.extend_from_slice(&[0xCD; 32]); // ciphertext

        let outer = parse_outer(&body).unwrap();
        match outer {
            EnvelopeOuter::Encrypted { auth_key_id, msg_key, ciphertext } => {
                assert_eq!(auth_key_id, 7);
                assert_eq!(msg_key, [0xAB; 16]);
                assert_eq!(ciphertext, vec![0xCD; 32]);
            }
            _ => panic!("expected encrypted envelope"),
        }
    }

    #[test]
    fn too_short_body_is_not_fatal() {
        assert_eq!(parse_outer(&[1, 2, 3]), None);
    }

    #[test]
    fn decrypt_rejects_implausible_plaintext_without_panicking() {
        let auth_key = AuthKey::from_bytes([0u8; 256]);
        let ciphertext = vec![0u8; 16]; // one IGE block, far too short to be real
        let result = decrypt(&ciphertext, &[0u8; 16], &auth_key, Sender::Client);
        assert!(result.is_none());
    }

    #[test]
    fn decrypt_rejects_non_block_aligned_ciphertext_without_panicking() {
        let auth_key = AuthKey::from_bytes([0u8; 256]);
        // 33 bytes: long enough to pass the length-32 floor, but not a
        // multiple of the 16-byte IGE block size a wire-controlled frame
        // length has no reason to respect.
        let ciphertext = vec![0u8; 33];
        let result = decrypt(&ciphertext, &[0u8; 16], &auth_key, Sender::Client);
        assert!(result.is_none());
    }

    #[test]
    fn decrypt_round_trips_known_plaintext() {
        use mtmitm_crypto::aes;

        let mut auth_key_bytes = [0u8; 256];
        auth_key_bytes.iter_mut().enumerate().for_each(|(i, b)| *b = i as u8);
        let auth_key = AuthKey::from_bytes(auth_key_bytes);
        let msg_key = [7u8; 16];

        let (aes_key, aes_iv_full) = kdf(auth_key.data(), &msg_key, Sender::Server);
        let mut aes_iv = [0u8; 32];
        aes_iv.copy_from_slice(&aes_iv_full);

        let mut plaintext = 1i64.to_le_bytes().to_vec(); // salt
        plaintext.extend_from_slice(&2i64.to_le_bytes()); // session_id
        plaintext.extend_from_slice(&3i64.to_le_bytes()); // message_id
        plaintext.extend_from_slice(&4i32.to_le_bytes()); // seq_no
        plaintext.extend_from_slice(&4u32.to_le_bytes()); // inner_length
        plaintext.extend_from_slice(&[9, 9, 9, 9]); // payload
        plaintext.extend_from_slice(&[0; 12]); // padding to a 16-byte boundary

        let mut ciphertext = plaintext.clone();
        aes::ige_encrypt(&mut ciphertext, &aes_key, &aes_iv);
        let inner = decrypt(&ciphertext, &msg_key, &auth_key, Sender::Server).unwrap();
        assert_eq!(inner.salt, 1);
        assert_eq!(inner.session_id, 2);
        assert_eq!(inner.message_id, 3);
        assert_eq!(inner.seq_no, 4);
        assert_eq!(inner.payload, vec![9, 9, 9, 9]);
    }
}
