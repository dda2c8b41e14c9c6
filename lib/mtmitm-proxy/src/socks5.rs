// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A from-scratch SOCKS5 (RFC 1928/1929) server ingress: greeting, method
//! negotiation, optional username/password authentication, and the
//! `CONNECT` command. `tokio_socks` only speaks the client half of this
//! protocol, so the server side is hand-rolled here.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tokio::io::{self, AsyncReadExt, AsyncWriteExt};

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const REP_SUCCESS: u8 = 0x00;
const REP_GENERAL_FAILURE: u8 = 0x01;
const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REP_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

#[derive(Debug)]
pub enum Socks5Error {
    Io(io::Error),
    UnsupportedVersion(u8),
    NoAcceptableMethod,
    AuthenticationFailed,
    UnsupportedCommand(u8),
    UnsupportedAddressType(u8),
}

impl std::error::Error for Socks5Error {}

impl fmt::Display for Socks5Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "{e}"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported SOCKS version: {v:#04x}"),
            Self::NoAcceptableMethod => write!(f, "client offered no acceptable auth method"),
            Self::AuthenticationFailed => write!(f, "username/password authentication failed"),
            Self::UnsupportedCommand(c) => write!(f, "unsupported command: {c:#04x}"),
            Self::UnsupportedAddressType(a) => write!(f, "unsupported address type: {a:#04x}"),
        }
    }
}

impl From<io::Error> for Socks5Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// The login/password table gating the proxy's own SOCKS5 entry point,
/// independent of the Telegram authorization keys used to decrypt traffic.
#[derive(Clone, Debug, Default)]
pub struct ProxyAuth {
    users: HashMap<String, String>,
}

impl ProxyAuth {
    pub fn open() -> Self {
        Self::default()
    }

    pub fn with_users(users: HashMap<String, String>) -> Self {
        Self { users }
    }

    fn required(&self) -> bool {
        !self.users.is_empty()
    }

    fn check(&self, user: &str, pass: &str) -> bool {
        self.users.get(user).is_some_and(|expected| expected == pass)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Ip(IpAddr),
    Domain(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectRequest {
    pub target: Target,
    pub port: u16,
}

/// Runs the greeting, optional authentication, and `CONNECT` request
/// stages against an already-accepted client socket. On success, the
/// caller is responsible for connecting to `request.target` and sending
/// the reply via [`reply_success`] or [`reply_failure`].
pub async fn negotiate<S>(stream: &mut S, auth: &ProxyAuth) -> Result<ConnectRequest, Socks5Error>
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    negotiate_method(stream, auth).await?;
    if auth.required() {
        authenticate(stream, auth).await?;
    }
    read_connect_request(stream).await
}

async fn negotiate_method<S>(stream: &mut S, auth: &ProxyAuth) -> Result<(), Socks5Error>
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    let version = stream.read_u8().await?;
    if version != VERSION {
        return Err(Socks5Error::UnsupportedVersion(version));
    }
    let nmethods = stream.read_u8().await?;
    let mut methods = vec![0u8; nmethods as usize];
    stream.read_exact(&mut methods).await?;

    let wanted = if auth.required() { METHOD_USER_PASS } else { METHOD_NO_AUTH };
    if !methods.contains(&wanted) {
        stream.write_all(&[VERSION, METHOD_NONE_ACCEPTABLE]).await?;
        return Err(Socks5Error::NoAcceptableMethod);
    }

    stream.write_all(&[VERSION, wanted]).await?;
    Ok(())
}

async fn authenticate<S>(stream: &mut S, auth: &ProxyAuth) -> Result<(), Socks5Error>
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    let version = stream.read_u8().await?;
    let ulen = stream.read_u8().await?;
    let mut user = vec![0u8; ulen as usize];
    stream.read_exact(&mut user).await?;
    let plen = stream.read_u8().await?;
    let mut pass = vec![0u8; plen as usize];
    stream.read_exact(&mut pass).await?;

    let user = String::from_utf8_lossy(&user);
    let pass = String::from_utf8_lossy(&pass);
    let ok = version == 0x01 && auth.check(&user, &pass);

    stream.write_all(&[0x01, if ok { 0x00 } else { 0x01 }]).await?;
    if ok {
        Ok(())
    } else {
        Err(Socks5Error::AuthenticationFailed)
    }
}

async fn read_connect_request<S>(stream: &mut S) -> Result<ConnectRequest, Socks5Error>
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    let version = stream.read_u8().await?;
    if version != VERSION {
        return Err(Socks5Error::UnsupportedVersion(version));
    }
    let cmd = stream.read_u8().await?;
    if cmd != CMD_CONNECT {
        reply_failure(stream, REP_COMMAND_NOT_SUPPORTED).await.ok();
        return Err(Socks5Error::UnsupportedCommand(cmd));
    }
    let _reserved = stream.read_u8().await?;
    let atyp = stream.read_u8().await?;

    let target = match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            Target::Ip(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await?;
            let mut domain = vec![0u8; len as usize];
            stream.read_exact(&mut domain).await?;
            Target::Domain(String::from_utf8_lossy(&domain).into_owned())
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            Target::Ip(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        other => {
            reply_failure(stream, REP_ADDRESS_TYPE_NOT_SUPPORTED).await.ok();
            return Err(Socks5Error::UnsupportedAddressType(other));
        }
    };

    let port = stream.read_u16().await?;
    Ok(ConnectRequest { target, port })
}

/// Sends the success reply. `bound` is the local address of the socket the
/// proxy opened to the destination, echoed back per RFC 1928; most clients
/// ignore it.
pub async fn reply_success<S>(stream: &mut S, bound: std::net::SocketAddr) -> io::Result<()>
where
    S: AsyncWriteExt + Unpin,
{
    write_reply(stream, REP_SUCCESS, bound).await
}

pub async fn reply_failure<S>(stream: &mut S, code: u8) -> io::Result<()>
where
    S: AsyncWriteExt + Unpin,
{
    write_reply(stream, code, std::net::SocketAddr::from(([0, 0, 0, 0], 0))).await
}

pub const REPLY_GENERAL_FAILURE: u8 = REP_GENERAL_FAILURE;

async fn write_reply<S>(stream: &mut S, rep: u8, bound: std::net::SocketAddr) -> io::Result<()>
where
    S: AsyncWriteExt + Unpin,
{
    let mut reply = vec![VERSION, rep, 0x00];
    match bound.ip() {
        IpAddr::V4(v4) => {
            reply.push(ATYP_IPV4);
            reply.extend_from_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            reply.push(ATYP_IPV6);
            reply.extend_from_slice(&v6.octets());
        }
    }
    reply.extend_from_slice(&bound.port().to_be_bytes());
    stream.write_all(&reply).await
}
