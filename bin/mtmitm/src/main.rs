// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CLI entry point: wires CLI arguments into a [`KeyRegistry`], a compiled
//! schema [`Registry`], and a [`mtmitm_proxy::Server`], then drives the
//! single-threaded cooperative event loop until `ctrl_c`.

use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::rc::Rc;

use clap::StructOpt;
use mtmitm_proxy::{ProxyAuth, Server, ServerConfig};
use mtmitm_schema::Registry;
use mtmitm_session::KeyRegistry;
use simple_logger::SimpleLogger;

#[derive(Debug, clap::Parser)]
#[clap(author, version, about = "Passive MTProto interception proxy", long_about = None)]
struct Arguments {
    /// Address to listen for incoming SOCKS5 connections on.
    #[clap(short = 'H', long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    host: IpAddr,

    /// Port to listen for incoming SOCKS5 connections on.
    #[clap(short, long, default_value_t = 1080)]
    port: u16,

    /// Path to a compiled `mtmitm-schema` JSON document (produced by
    /// `mtmitm-tlc`). Required: without a schema, bodies can still be
    /// framed and decrypted, but never decoded into TL objects.
    #[clap(long)]
    schema: String,

    /// A hex-encoded 256-byte authorization key. Repeatable.
    #[clap(short, long = "key")]
    keys: Vec<String>,

    /// A file of newline-delimited hex-encoded authorization keys.
    #[clap(short = 'f', long = "keys-file")]
    keys_file: Option<String>,

    /// Suppress the per-message live echo (still available via
    /// `RUST_LOG=debug`).
    #[clap(short, long)]
    quiet: bool,

    /// Directory session logs are written to.
    #[clap(short, long, default_value = "sessions")]
    output: String,

    /// Disable username/password authentication on the SOCKS5 ingress.
    #[clap(long)]
    proxy_no_auth: bool,

    /// A `login:password` pair accepted by the SOCKS5 ingress. Repeatable.
    #[clap(long = "proxy-user")]
    proxy_users: Vec<String>,
}

fn parse_proxy_auth(args: &Arguments) -> ProxyAuth {
    if args.proxy_no_auth {
        return ProxyAuth::open();
    }

    let mut users = HashMap::new();
    for entry in &args.proxy_users {
        match entry.split_once(':') {
            Some((login, password)) => {
                users.insert(login.to_string(), password.to_string());
            }
            None => log::warn!("ignoring malformed --proxy-user entry (expected login:password): {entry}"),
        }
    }
    ProxyAuth::with_users(users)
}

fn load_keys(args: &Arguments) -> Result<KeyRegistry, Box<dyn std::error::Error>> {
    let mut registry = KeyRegistry::new();
    for key in &args.keys {
        registry.insert_hex(key)?;
    }
    if let Some(path) = &args.keys_file {
        registry.load_file(path)?;
    }
    Ok(registry)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Making errors inside a `tokio::main` produces confusing diagnostics,
    // so the "real main" is wrapped by this, matching `bin/scrape-docs`.
    let local = tokio::task::LocalSet::new();
    local.run_until(real_main()).await
}

async fn real_main() -> ExitCode {
    let args = Arguments::parse();

    // `--quiet` only silences the per-message echo (handled in `mtmitm-proxy`
    // by logging it at `debug!` instead of `info!`); the logger itself
    // always stays at the level `RUST_LOG` asks for, defaulting to `info`.
    SimpleLogger::new().with_level(log::LevelFilter::Info).env().init().expect("logger already initialized");

    let keys = match load_keys(&args) {
        Ok(keys) => keys,
        Err(e) => {
            log::error!("failed to load authorization keys: {e}");
            return ExitCode::FAILURE;
        }
    };
    log::info!("loaded {} authorization key(s)", keys.len());

    let schema_json = match fs::read_to_string(&args.schema) {
        Ok(json) => json,
        Err(e) => {
            log::error!("failed to read schema file {}: {e}", args.schema);
            return ExitCode::FAILURE;
        }
    };
    let schema = match Registry::load(&schema_json) {
        Ok(schema) => schema,
        Err(e) => {
            log::error!("failed to parse schema file {}: {e}", args.schema);
            return ExitCode::FAILURE;
        }
    };

    let config = ServerConfig {
        listen_addr: SocketAddr::new(args.host, args.port),
        proxy_auth: parse_proxy_auth(&args),
        keys: Rc::new(keys),
        schema: Rc::new(schema),
        output_dir: args.output.into(),
        quiet: args.quiet,
    };

    let server = match Server::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            log::error!("failed to bind: {e}");
            return ExitCode::FAILURE;
        }
    };

    tokio::select! {
        result = server.serve() => {
            if let Err(e) = result {
                log::error!("accept loop ended: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("received ctrl-c, shutting down");
            server.shutdown_flush();
        }
    }

    ExitCode::SUCCESS
}
