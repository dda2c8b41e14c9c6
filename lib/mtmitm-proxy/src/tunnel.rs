// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Per-tunnel orchestration: relay raw bytes between the client and the
//! real Telegram endpoint while passively classifying, framing, and
//! decoding a copy of everything that passes through.
//!
//! A tunnel runs as a single `spawn_local`'d task handling both directions,
//! per the single-threaded, cooperative model this whole crate assumes:
//! there is exactly one owner of the shared `ObfuscationContext`, so no
//! locking is needed to pair it with both directions' framers.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use mtmitm_crypto::Sender;
use mtmitm_proto::{classify, decrypt, parse_outer, Classified, EnvelopeOuter, Error as ProtoError, Framer};
use mtmitm_schema::Registry;
use mtmitm_session::{write_session, KeyRegistry, MessageRecord, Metadata};
use mtmitm_tl::{read_object, Cursor};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Which endpoint originated a frame, used both to pick the correct MTProto
/// 2.0 KDF side and to label the log.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl Direction {
    fn sender(self) -> Sender {
        match self {
            Direction::ClientToServer => Sender::Client,
            Direction::ServerToClient => Sender::Server,
        }
    }
}

/// Minimum bytes needed before [`classify`] can possibly succeed (an
/// obfuscated 64-byte nonce is the largest prefix it inspects).
const CLASSIFY_PEEK: usize = 64;
const CHUNK_SIZE: usize = 4096;

/// Drives a single SOCKS5-tunneled connection: relays bytes verbatim in
/// both directions while building a session log of whatever classifying
/// the client direction revealed about the framing and, where a key is
/// known, the decrypted contents.
pub struct Tunnel {
    client: TcpStream,
    upstream: TcpStream,
    keys: Rc<KeyRegistry>,
    schema: Rc<Registry>,
    output_dir: PathBuf,
    quiet: bool,
    records: Rc<RefCell<Vec<MessageRecord>>>,
}

impl Tunnel {
    pub fn new(
        client: TcpStream,
        upstream: TcpStream,
        keys: Rc<KeyRegistry>,
        schema: Rc<Registry>,
        output_dir: PathBuf,
        quiet: bool,
    ) -> Self {
        Self {
            client,
            upstream,
            keys,
            schema,
            output_dir,
            quiet,
            records: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// A handle to this tunnel's growing record list, shared so a shutdown
    /// handler can flush it to disk even while the tunnel is still running.
    pub fn records_handle(&self) -> Rc<RefCell<Vec<MessageRecord>>> {
        Rc::clone(&self.records)
    }

    /// Runs the tunnel to completion: relays until either side closes or a
    /// read/write fails, then flushes whatever was captured to disk.
    pub async fn run(mut self) {
        if let Err(e) = self.relay().await {
            log::debug!("tunnel ended: {e}");
        }
        flush(&self.output_dir, &self.records);
    }

    async fn relay(&mut self) -> std::io::Result<()> {
        let mut client_buf = Vec::new();

        // Classification only ever looks at the client-originated
        // direction. The destination stays silent until the client speaks
        // first (the client always sends the transport signature before
        // the server replies), so it's safe to read just this side until
        // classification resolves.
        let classified = loop {
            let mut chunk = [0u8; CHUNK_SIZE];
            let n = self.client.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            self.upstream.write_all(&chunk[..n]).await?;
            client_buf.extend_from_slice(&chunk[..n]);

            match classify(&client_buf) {
                Ok(Some(classified)) => break classified,
                Ok(None) if client_buf.len() < CLASSIFY_PEEK => continue,
                Ok(None) => return Ok(()), // pathological: never resolves
                Err(e) => {
                    log::debug!("unknown transport, relaying raw for the rest of this tunnel: {e}");
                    return self.relay_raw().await;
                }
            }
        };

        let Classified {
            transport,
            obfuscation,
            leftover,
        } = classified;
        let obf = obfuscation.map(|o| Rc::new(RefCell::new(o)));

        let mut client_framer = Framer::new(transport, obf.clone());
        let mut server_framer = Framer::new(transport, obf);
        client_framer.feed(leftover);

        let mut client_ignored = false;
        let mut server_ignored = false;
        let mut client_chunk = [0u8; CHUNK_SIZE];
        let mut server_chunk = [0u8; CHUNK_SIZE];

        loop {
            tokio::select! {
                result = self.client.read(&mut client_chunk) => {
                    let n = result?;
                    if n == 0 {
                        return Ok(());
                    }
                    self.upstream.write_all(&client_chunk[..n]).await?;
                    if !client_ignored {
                        client_framer.feed(client_chunk[..n].to_vec());
                        drain_frames(
                            &mut client_framer,
                            Direction::ClientToServer,
                            &self.keys,
                            &self.schema,
                            &self.records,
                            self.quiet,
                            &mut client_ignored,
                            &mut server_ignored,
                        );
                    }
                }
                result = self.upstream.read(&mut server_chunk) => {
                    let n = result?;
                    if n == 0 {
                        return Ok(());
                    }
                    self.client.write_all(&server_chunk[..n]).await?;
                    if !server_ignored {
                        server_framer.feed(server_chunk[..n].to_vec());
                        drain_frames(
                            &mut server_framer,
                            Direction::ServerToClient,
                            &self.keys,
                            &self.schema,
                            &self.records,
                            self.quiet,
                            &mut server_ignored,
                            &mut client_ignored,
                        );
                    }
                }
            }
        }
    }

    /// Fallback path once the client direction's transport can't be
    /// classified at all: keep relaying both directions verbatim, with no
    /// further analysis, for the rest of the connection's life. Everything
    /// read so far has already been forwarded by the caller.
    async fn relay_raw(&mut self) -> std::io::Result<()> {
        let (mut client_r, mut client_w) = self.client.split();
        let (mut upstream_r, mut upstream_w) = self.upstream.split();
        tokio::select! {
            r = tokio::io::copy(&mut client_r, &mut upstream_w) => { r?; }
            r = tokio::io::copy(&mut upstream_r, &mut client_w) => { r?; }
        }
        Ok(())
    }
}

/// Pulls every complete frame currently available out of `framer`, turning
/// each into a [`MessageRecord`]. A malformed frame stops analysis of just
/// this direction; an unrecognised transport (which `Framer` never itself
/// reports, but is kept symmetric with `classify`'s error type) stops both.
#[allow(clippy::too_many_arguments)]
fn drain_frames(
    framer: &mut Framer,
    direction: Direction,
    keys: &KeyRegistry,
    schema: &Registry,
    records: &RefCell<Vec<MessageRecord>>,
    quiet: bool,
    this_ignored: &mut bool,
    other_ignored: &mut bool,
) {
    loop {
        match framer.next_frame() {
            Ok(Some(body)) => {
                let record = process_frame(&body, direction, keys, schema);
                let arrow = match direction {
                    Direction::ClientToServer => "->",
                    Direction::ServerToClient => "<-",
                };
                if quiet {
                    log::debug!("{arrow} {record:?}");
                } else {
                    log::info!("{arrow} {record:?}");
                }
                records.borrow_mut().push(record);
            }
            Ok(None) => break,
            Err(ProtoError::MalformedFrame) => {
                log::debug!("malformed frame from {direction:?}, ignoring this direction from now on");
                *this_ignored = true;
                break;
            }
            Err(ProtoError::UnknownTransport) => {
                log::debug!("unknown transport discovered mid-stream, ignoring both directions");
                *this_ignored = true;
                *other_ignored = true;
                break;
            }
        }
    }
}

/// Writes out whatever has accumulated in `records` so far. Shared between
/// normal tunnel teardown and the shutdown handler's forced flush of any
/// still-running tunnels.
pub fn flush(output_dir: &std::path::Path, records: &RefCell<Vec<MessageRecord>>) {
    match write_session(output_dir, &records.borrow()) {
        Ok(Some(path)) => log::info!("wrote session log to {}", path.display()),
        Ok(None) => {}
        Err(e) => log::warn!("failed to write session log: {e}"),
    }
}

/// Turns one decrypted/parsed frame body into a [`MessageRecord`], given
/// which direction it came from.
fn process_frame(body: &[u8], direction: Direction, keys: &KeyRegistry, schema: &Registry) -> MessageRecord {
    let Some(outer) = parse_outer(body) else {
        return MessageRecord::undecrypted(Metadata::default(), body.to_vec());
    };

    match outer {
        EnvelopeOuter::Unencrypted { message_id, payload } => {
            let metadata = Metadata {
                message_id: Some(message_id as i64),
                ..Default::default()
            };
            decode_payload(metadata, &payload, schema)
        }
        EnvelopeOuter::Encrypted {
            auth_key_id,
            msg_key,
            ciphertext,
        } => {
            let base_metadata = Metadata {
                auth_key_id,
                msg_key: Some(msg_key),
                ..Default::default()
            };

            let Some(key) = keys.get(auth_key_id) else {
                return MessageRecord::undecrypted(base_metadata, ciphertext);
            };

            let Some(inner) = decrypt(&ciphertext, &msg_key, key, direction.sender()) else {
                return MessageRecord::undecrypted(base_metadata, ciphertext);
            };

            let metadata = Metadata {
                auth_key_id,
                msg_key: Some(msg_key),
                salt: Some(inner.salt),
                session_id: Some(inner.session_id),
                message_id: Some(inner.message_id),
                seq_no: Some(inner.seq_no),
            };
            decode_payload(metadata, &inner.payload, schema)
        }
    }
}

fn decode_payload(metadata: Metadata, payload: &[u8], schema: &Registry) -> MessageRecord {
    let mut cursor = Cursor::from_slice(payload);
    match read_object(&mut cursor, schema) {
        Ok(value) => MessageRecord::decoded(metadata, value),
        Err(e) => {
            log::debug!("failed to decode TL body: {e}");
            MessageRecord::undecoded(metadata, payload.to_vec())
        }
    }
}

impl std::fmt::Debug for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Direction::ClientToServer => "client->server",
            Direction::ServerToClient => "server->client",
        })
    }
}
