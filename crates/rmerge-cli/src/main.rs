// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! Command-line tools for inspecting rmerge info records and exercising the
//! socket layer.
//!
//! # Usage
//!
//! ```bash
//! rmerge-cli info-dump fleet.infocodec
//! rmerge-cli sock-test server --port 7070 --uds-path /tmp/rmerge-sock-test.sock
//! rmerge-cli sock-test client-tcp --host 127.0.0.1 --port 7070
//! ```

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rmerge_core::global_node_info::GlobalNodeInfo;
use rmerge_core::net::{ShutdownFlag, SockClient, SockServer, SockServerConnection};
use rmerge_core::net::socket::{recv_framed, send_framed};
use rmerge_core::RuntimeConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rmerge-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect rmerge info records and exercise the socket layer")]
struct Cli {
    /// Verbose mode (debug-level logs)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read a persisted InfoCodec-encoded fleet snapshot and print node summaries.
    InfoDump {
        /// Path to the persisted info-record file.
        file: PathBuf,
    },
    /// Loopback echo test exercising the socket layer.
    SockTest {
        #[command(subcommand)]
        role: SockTestRole,
    },
}

#[derive(Subcommand)]
enum SockTestRole {
    /// Run the echo server, listening on both TCP and a Unix-domain socket.
    Server {
        #[arg(long, default_value_t = 7676)]
        port: u16,
        #[arg(long, default_value = "/tmp/rmerge-sock-test.sock")]
        uds_path: String,
    },
    /// Connect over TCP and send one echo round-trip.
    ClientTcp {
        #[arg(long, default_value = "localhost")]
        host: String,
        #[arg(long, default_value_t = 7676)]
        port: u16,
        #[arg(long, default_value = "hello")]
        message: String,
    },
    /// Connect over the localhost Unix-domain fallback and send one echo round-trip.
    ClientUds {
        #[arg(long, default_value_t = 7676)]
        port: u16,
        #[arg(long, default_value = "hello")]
        message: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::InfoDump { file } => info_dump(&file),
        Command::SockTest { role } => sock_test(role),
    }
}

fn info_dump(path: &PathBuf) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let fleet = GlobalNodeInfo::new();
    fleet.decode(&bytes).context("decoding info record")?;

    println!("fleet snapshot: {} node(s)", fleet.node_count());
    for id in fleet.machine_ids() {
        let node = fleet.node(id);
        println!(
            "  machine {id}: host={:?} syncId={} renderActive={} progress={:.3}",
            *node.host_name.lock(),
            *node.current_sync_id.lock(),
            *node.render_active.lock(),
            *node.progress.lock(),
        );
    }
    println!("renderPrepProgress: {:.3}", fleet.render_prep_progress());
    Ok(())
}

fn sock_test(role: SockTestRole) -> Result<()> {
    let config = RuntimeConfig::default();
    match role {
        SockTestRole::Server { port, uds_path } => run_echo_server(port, &uds_path, &config),
        SockTestRole::ClientTcp { host, port, message } => run_echo_client(&host, port, None, &message, &config),
        SockTestRole::ClientUds { port, message } => run_echo_client("localhost", port, None, &message, &config),
    }
}

fn run_echo_server(port: u16, uds_path: &str, config: &RuntimeConfig) -> Result<()> {
    let server = SockServer::bind(port, uds_path, config).context("binding sock-test server")?;
    let shutdown = ShutdownFlag::new();
    tracing::info!(port, uds_path, "sock-test server listening");
    server.main_loop(&shutdown, config, |conn| {
        if let Err(err) = echo_once(conn) {
            tracing::warn!(%err, "echo connection failed");
        }
    });
    Ok(())
}

fn echo_once(conn: SockServerConnection) -> Result<()> {
    match conn {
        SockServerConnection::Tcp(mut stream) => echo_stream(&mut stream),
        SockServerConnection::Uds(mut stream) => echo_stream(&mut stream),
    }
}

fn echo_stream(stream: &mut (impl Read + Write)) -> Result<()> {
    if let Some(payload) = recv_framed(stream).context("receiving sock-test payload")? {
        send_framed(stream, &payload).context("echoing sock-test payload")?;
    }
    Ok(())
}

fn run_echo_client(host: &str, port: u16, path_base: Option<&str>, message: &str, config: &RuntimeConfig) -> Result<()> {
    let mut client = SockClient::connect(host, port, path_base, config).context("connecting sock-test client")?;
    match &mut client {
        SockClient::Tcp(stream) => {
            send_framed(stream, message.as_bytes())?;
            let reply = recv_framed(stream)?.context("server closed without replying")?;
            println!("echo: {}", String::from_utf8_lossy(&reply));
        }
        SockClient::Uds(stream) => {
            send_framed(stream, message.as_bytes())?;
            let reply = recv_framed(stream)?.context("server closed without replying")?;
            println!("echo: {}", String::from_utf8_lossy(&reply));
        }
    }
    Ok(())
}
