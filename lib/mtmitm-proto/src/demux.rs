// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use mtmitm_crypto::ObfuscationContext;

use crate::errors::{Error, Result};
use crate::framer::Transport;

/// What the first bytes of a tunnel told us: which framing variant is in
/// use, the obfuscation keystream to decrypt everything that follows (if
/// any), and whatever trailing bytes of the initial delivery weren't part
/// of the transport signature itself and must still be fed to the framer.
pub struct Classified {
    pub transport: Transport,
    pub obfuscation: Option<ObfuscationContext>,
    pub leftover: Vec<u8>,
}

/// Classifies the first bytes of the client-originated direction. Returns
/// `Ok(None)` when not enough bytes have arrived yet to decide; the caller
/// should buffer more and call again. This inspects the client direction
/// only and is meant to run exactly once per tunnel.
pub fn classify(initial: &[u8]) -> Result<Option<Classified>> {
    let Some(&first) = initial.first() else {
        return Ok(None);
    };

    match first {
        0xEF => Ok(Some(Classified {
            transport: Transport::Abridged,
            obfuscation: None,
            leftover: initial[1..].to_vec(),
        })),
        0xEE | 0xDD => {
            if initial.len() < 4 {
                return Ok(None);
            }
            if initial[1..4] != [first; 3] {
                return Err(Error::UnknownTransport);
            }
            Ok(Some(Classified {
                transport: Transport::Intermediate,
                obfuscation: None,
                leftover: initial[4..].to_vec(),
            }))
        }
        _ => classify_full_or_obfuscated(initial),
    }
}

fn classify_full_or_obfuscated(initial: &[u8]) -> Result<Option<Classified>> {
    if initial.len() < 8 {
        return Ok(None);
    }
    if initial[4..8] == [0, 0, 0, 0] {
        // The peeked bytes are the first frame's own header (length || seq
        // = 0); nothing is consumed here, the framer re-reads them.
        return Ok(Some(Classified {
            transport: Transport::Full,
            obfuscation: None,
            leftover: initial.to_vec(),
        }));
    }

    if initial.len() < 64 {
        return Ok(None);
    }

    let nonce: [u8; 64] = initial[0..64].try_into().expect("checked length above");
    let mut obf = ObfuscationContext::new(&nonce);
    let mut decrypted_nonce = nonce;
    obf.read(&mut decrypted_nonce);

    let transport = match &decrypted_nonce[56..60] {
        [0xEF, 0xEF, 0xEF, 0xEF] => Transport::Abridged,
        [0xEE, 0xEE, 0xEE, 0xEE] | [0xDD, 0xDD, 0xDD, 0xDD] => Transport::Intermediate,
        _ => return Err(Error::UnknownTransport),
    };

    Ok(Some(Classified {
        transport,
        obfuscation: Some(obf),
        leftover: initial[64..].to_vec(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_plain_abridged() {
        let classified = classify(&[0xEF, 1, 2, 3]).unwrap().unwrap();
        assert_eq!(classified.transport, Transport::Abridged);
        assert!(classified.obfuscation.is_none());
        assert_eq!(classified.leftover, vec![1, 2, 3]);
    }

    #[test]
    fn recognises_plain_intermediate() {
        let classified = classify(&[0xEE, 0xEE, 0xEE, 0xEE, 9]).unwrap().unwrap();
        assert_eq!(classified.transport, Transport::Intermediate);
        assert_eq!(classified.leftover, vec![9]);
    }

    #[test]
    fn rejects_malformed_intermediate_marker() {
        let err = classify(&[0xEE, 0xEE, 0x00, 0xEE]).unwrap_err();
        assert_eq!(err, Error::UnknownTransport);
    }

    #[test]
    fn recognises_plain_full_signature_without_consuming() {
        let initial = {
            let mut v = 20u32.to_le_bytes().to_vec(); // length
            v.extend_from_slice(&0i32.to_le_bytes()); // seq = 0
            v.extend_from_slice(&[1, 2, 3, 4]);
            v
        };
        let classified = classify(&initial).unwrap().unwrap();
        assert_eq!(classified.transport, Transport::Full);
        assert!(classified.obfuscation.is_none());
        assert_eq!(classified.leftover, initial);
    }

    #[test]
    fn needs_more_data_for_short_prefix() {
        assert_eq!(classify(&[]).unwrap(), None);
        assert_eq!(classify(&[1, 2, 3]).unwrap(), None);
    }

    #[test]
    fn recognises_obfuscated_abridged_nonce() {
        let mut nonce = [0u8; 64];
        nonce.iter_mut().enumerate().for_each(|(i, b)| *b = i as u8);
        nonce[56..60].copy_from_slice(&[0xEF, 0xEF, 0xEF, 0xEF]);

        // Encrypt the nonce the way a real client would: derive the same
        // read keystream and apply it, so decrypting reveals the markers.
        let mut encryptor = ObfuscationContext::new(&nonce);
        let mut on_wire = nonce;
        encryptor.read(&mut on_wire);

        let classified = classify(&on_wire).unwrap().unwrap();
        assert_eq!(classified.transport, Transport::Abridged);
        assert!(classified.obfuscation.is_some());
        assert!(classified.leftover.is_empty());
    }

    #[test]
    fn rejects_unknown_obfuscated_marker() {
        let mut nonce = [0u8; 64];
        nonce.iter_mut().enumerate().for_each(|(i, b)| *b = i as u8);
        nonce[56..60].copy_from_slice(&[1, 2, 3, 4]);
        let mut encryptor = ObfuscationContext::new(&nonce);
        let mut on_wire = nonce;
        encryptor.read(&mut on_wire);

        let err = classify(&on_wire).unwrap_err();
        assert_eq!(err, Error::UnknownTransport);
    }
}
