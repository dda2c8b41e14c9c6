// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The SOCKS5 accept loop: binds, negotiates each incoming connection,
//! dials the real destination, and spawns a [`Tunnel`] to relay it.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::rc::Rc;

use mtmitm_schema::Registry;
use mtmitm_session::{KeyRegistry, MessageRecord};
use tokio::net::{TcpListener, TcpStream};

use crate::socks5::{self, ConnectRequest, ProxyAuth, Target};
use crate::tunnel::{flush, Tunnel};

/// Everything a [`Server`] needs that doesn't change across the connections
/// it accepts.
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub proxy_auth: ProxyAuth,
    pub keys: Rc<KeyRegistry>,
    pub schema: Rc<Registry>,
    pub output_dir: PathBuf,
    pub quiet: bool,
}

type RecordsHandle = Rc<RefCell<Vec<MessageRecord>>>;

/// Still-running tunnels' record buffers, kept only so a graceful shutdown
/// can flush partial sessions that haven't disconnected on their own yet.
#[derive(Default)]
struct ActiveTunnels {
    next_id: Cell<u64>,
    handles: RefCell<HashMap<u64, RecordsHandle>>,
}

impl ActiveTunnels {
    fn register(&self, handle: RecordsHandle) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.handles.borrow_mut().insert(id, handle);
        id
    }

    fn unregister(&self, id: u64) {
        self.handles.borrow_mut().remove(&id);
    }
}

pub struct Server {
    listener: TcpListener,
    config: Rc<ServerConfig>,
    active: Rc<ActiveTunnels>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        log::info!("listening on {}", config.listen_addr);
        Ok(Self {
            listener,
            config: Rc::new(config),
            active: Rc::new(ActiveTunnels::default()),
        })
    }

    /// Accepts connections forever, spawning one tunnel task per connection
    /// onto the current `LocalSet`. Each tunnel owns its own
    /// `ObfuscationContext`, so nothing here needs to be `Send`.
    pub async fn serve(&self) -> std::io::Result<()> {
        loop {
            let (socket, peer) = self.listener.accept().await?;
            let config = Rc::clone(&self.config);
            let active = Rc::clone(&self.active);
            tokio::task::spawn_local(async move {
                if let Err(e) = handle_connection(socket, peer, config, active).await {
                    log::warn!("tunnel from {peer} failed: {e}");
                }
            });
        }
    }

    /// Flushes every tunnel still running at the moment this is called.
    /// Used by the `ctrl_c` shutdown handler so an interrupted session
    /// isn't silently lost.
    pub fn shutdown_flush(&self) {
        let handles = self.active.handles.borrow();
        log::info!("flushing {} still-open tunnel(s) before exit", handles.len());
        for records in handles.values() {
            flush(&self.config.output_dir, records);
        }
    }
}

async fn handle_connection(
    mut client: TcpStream,
    peer: SocketAddr,
    config: Rc<ServerConfig>,
    active: Rc<ActiveTunnels>,
) -> std::io::Result<()> {
    let request = match socks5::negotiate(&mut client, &config.proxy_auth).await {
        Ok(request) => request,
        Err(e) => {
            log::debug!("SOCKS5 negotiation with {peer} failed: {e}");
            return Ok(());
        }
    };

    let upstream = match connect_upstream(&request).await {
        Ok(stream) => stream,
        Err(e) => {
            log::debug!("couldn't reach {:?}:{} for {peer}: {e}", request.target, request.port);
            socks5::reply_failure(&mut client, socks5::REPLY_GENERAL_FAILURE).await.ok();
            return Ok(());
        }
    };

    let bound = upstream.local_addr()?;
    socks5::reply_success(&mut client, bound).await?;

    log::info!("tunnel opened: {peer} -> {:?}:{}", request.target, request.port);
    let tunnel = Tunnel::new(
        client,
        upstream,
        Rc::clone(&config.keys),
        Rc::clone(&config.schema),
        config.output_dir.clone(),
        config.quiet,
    );

    let id = active.register(tunnel.records_handle());
    tunnel.run().await;
    active.unregister(id);
    Ok(())
}

async fn connect_upstream(request: &ConnectRequest) -> std::io::Result<TcpStream> {
    match &request.target {
        Target::Ip(ip) => TcpStream::connect((*ip, request.port)).await,
        Target::Domain(domain) => TcpStream::connect((domain.as_str(), request.port)).await,
    }
}
