// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::cell::RefCell;
use std::rc::Rc;

use mtmitm_crypto::ObfuscationContext;

use crate::chunked_buffer::ChunkedBuffer;
use crate::errors::{Error, Result};

/// Which framing variant a direction was classified as by the
/// demultiplexer. `IntermediatePadded` behaves identically to
/// `Intermediate` at this layer; it only exists so callers can tell the two
/// signatures apart if they care to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Abridged,
    Intermediate,
    Full,
}

/// The length already parsed from a header, waiting for enough body bytes
/// to arrive. `Full` additionally carries the 4-byte CRC trailer to
/// discard once the body is in hand.
#[derive(Clone, Copy, Debug)]
enum Pending {
    Abridged { body_len: usize },
    Intermediate { body_len: usize },
    Full { body_len: usize },
}

/// Per-direction transport framer. Consumes bytes from its `ChunkedBuffer`
/// (through the shared `ObfuscationContext`, if the tunnel is obfuscated)
/// and emits one complete frame body per successful call.
pub struct Framer {
    variant: Transport,
    pending: Option<Pending>,
    buffer: ChunkedBuffer,
    obf: Option<Rc<RefCell<ObfuscationContext>>>,
}

impl Framer {
    pub fn new(variant: Transport, obf: Option<Rc<RefCell<ObfuscationContext>>>) -> Self {
        Self {
            variant,
            pending: None,
            buffer: ChunkedBuffer::new(),
            obf,
        }
    }

    /// Buffers newly arrived bytes, decrypting them in place first if the
    /// tunnel is obfuscated. Must be called with bytes in the exact order
    /// they arrived on the wire.
    pub fn feed(&mut self, mut data: Vec<u8>) {
        if let Some(obf) = &self.obf {
            obf.borrow_mut().read(&mut data);
        }
        self.buffer.append(data);
    }

    /// Produces the next complete frame body, if enough bytes have been
    /// buffered. `Ok(None)` means "need more data"; the parsed header (if
    /// any) is preserved so the next call resumes without re-reading it.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.pending.is_none() {
            self.pending = match self.parse_header()? {
                Some(pending) => Some(pending),
                None => return Ok(None),
            };
        }

        let (body_len, trailer_len) = match self.pending.unwrap() {
            Pending::Abridged { body_len } => (body_len, 0),
            Pending::Intermediate { body_len } => (body_len, 0),
            Pending::Full { body_len } => (body_len, 4),
        };

        if self.buffer.remaining() < body_len + trailer_len {
            return Ok(None);
        }

        let mut body = self.buffer.consume(body_len).expect("checked above");
        if trailer_len > 0 {
            self.buffer.consume(trailer_len); // CRC, not verified
        }
        self.pending = None;
        body.shrink_to_fit();
        Ok(Some(body))
    }

    fn parse_header(&mut self) -> Result<Option<Pending>> {
        match self.variant {
            Transport::Abridged => {
                if self.buffer.remaining() < 1 {
                    return Ok(None);
                }
                let l0 = self.buffer.peek(1).unwrap()[0];
                if l0 & 0x7F == 0x7F {
                    if self.buffer.remaining() < 4 {
                        return Ok(None);
                    }
                    let header = self.buffer.consume(4).unwrap();
                    let len = (header[1] as usize) | ((header[2] as usize) << 8) | ((header[3] as usize) << 16);
                    Ok(Some(Pending::Abridged { body_len: len * 4 }))
                } else {
                    self.buffer.consume(1).unwrap();
                    Ok(Some(Pending::Abridged {
                        body_len: (l0 & 0x7F) as usize * 4,
                    }))
                }
            }
            Transport::Intermediate => {
                if self.buffer.remaining() < 4 {
                    return Ok(None);
                }
                let header = self.buffer.consume(4).unwrap();
                let len = u32::from_le_bytes(header.try_into().unwrap());
                Ok(Some(Pending::Intermediate {
                    body_len: len as usize,
                }))
            }
            Transport::Full => {
                if self.buffer.remaining() < 8 {
                    return Ok(None);
                }
                let header = self.buffer.consume(8).unwrap();
                let length = u32::from_le_bytes(header[0..4].try_into().unwrap());
                if length < 12 {
                    return Err(Error::MalformedFrame);
                }
                Ok(Some(Pending::Full {
                    body_len: length as usize - 12,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abridged_short_form_round_trip() {
        let mut framer = Framer::new(Transport::Abridged, None);
        // length 1 (x4 = 4 bytes body), header byte = 1
        framer.feed(vec![1, 0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(framer.next_frame().unwrap(), Some(vec![0xAA, 0xBB, 0xCC, 0xDD]));
        assert_eq!(framer.next_frame().unwrap(), None);
    }

    #[test]
    fn abridged_long_form() {
        let mut framer = Framer::new(Transport::Abridged, None);
        let body = vec![0u8; 400];
        let words = 100u32; // 100 * 4 = 400 bytes
        let mut data = vec![0x7F, (words & 0xFF) as u8, ((words >> 8) & 0xFF) as u8, ((words >> 16) & 0xFF) as u8];
        data.extend_from_slice(&body);
        framer.feed(data);
        assert_eq!(framer.next_frame().unwrap(), Some(body));
    }

    #[test]
    fn intermediate_split_across_two_deliveries() {
        let mut framer = Framer::new(Transport::Intermediate, None);
        framer.feed(vec![4, 0, 0, 0, 0xAA, 0xBB]); // header + partial body
        assert_eq!(framer.next_frame().unwrap(), None);
        framer.feed(vec![0xCC, 0xDD]);
        assert_eq!(framer.next_frame().unwrap(), Some(vec![0xAA, 0xBB, 0xCC, 0xDD]));
    }

    #[test]
    fn full_drops_seq_and_crc() {
        let mut framer = Framer::new(Transport::Full, None);
        let body = vec![1, 2, 3, 4];
        let length = 12 + body.len() as u32;
        let mut data = length.to_le_bytes().to_vec();
        data.extend_from_slice(&0i32.to_le_bytes()); // seq_no
        data.extend_from_slice(&body);
        data.extend_from_slice(&[0xFF; 4]); // crc, ignored
        framer.feed(data);
        assert_eq!(framer.next_frame().unwrap(), Some(body));
    }

    #[test]
    fn full_rejects_length_below_overhead() {
        let mut framer = Framer::new(Transport::Full, None);
        framer.feed(11u32.to_le_bytes().to_vec());
        framer.feed(0i32.to_le_bytes().to_vec());
        assert_eq!(framer.next_frame().unwrap_err(), Error::MalformedFrame);
    }

    #[test]
    fn obfuscated_bytes_are_decrypted_before_framing() {
        let nonce = {
            let mut buf = [0u8; 64];
            buf.iter_mut().enumerate().for_each(|(i, b)| *b = i as u8);
            buf
        };
        let mut encryptor = ObfuscationContext::new(&nonce);
        let mut frame = vec![1, 0xAA, 0xBB, 0xCC, 0xDD];
        encryptor.read(&mut frame);

        let decryptor = Rc::new(RefCell::new(ObfuscationContext::new(&nonce)));
        let mut framer = Framer::new(Transport::Abridged, Some(decryptor));
        framer.feed(frame);
        assert_eq!(framer.next_frame().unwrap(), Some(vec![0xAA, 0xBB, 0xCC, 0xDD]));
    }
}
