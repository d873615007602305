// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! `SockClient`: connect-with-retry over TCP or a `localhost` Unix-domain
//! fallback (§4.9 "Client connect").

use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::Duration;

use crate::config::RuntimeConfig;
use crate::error::{CoreError, Result};
use crate::net::socket::tune_tcp_stream;

/// Either side of the connect outcome; both sides speak the same
/// length-framed protocol via [`crate::net::socket`].
pub enum SockClient {
    Tcp(TcpStream),
    Uds(UnixStream),
}

impl SockClient {
    /// Connect to `host:port`. If `host == "localhost"`, skip DNS/TCP
    /// entirely and connect to the Unix-domain path derived from
    /// `path_base` (or `/tmp/SockClient.localhost.<port>` if none is given),
    /// honoring the Linux abstract-namespace convention when the path starts
    /// with `@` (§4.9).
    pub fn connect(host: &str, port: u16, path_base: Option<&str>, config: &RuntimeConfig) -> Result<Self> {
        if host == "localhost" {
            let path = match path_base {
                Some(base) => format!("{base}.{port}"),
                None => format!("/tmp/SockClient.localhost.{port}"),
            };
            return connect_uds(&path).map(SockClient::Uds);
        }
        connect_tcp(host, port, config).map(SockClient::Tcp)
    }
}

/// `gethostbyname`-style DNS resolution, retried up to `config.dns_retries`
/// times against transient zero-result answers, followed by up to
/// `config.connect_retries` TCP connect attempts at
/// `config.connect_retry_interval` cadence (§4.9).
fn connect_tcp(host: &str, port: u16, config: &RuntimeConfig) -> Result<TcpStream> {
    use std::net::ToSocketAddrs;

    let mut addrs = Vec::new();
    for attempt in 0..config.dns_retries {
        match (host, port).to_socket_addrs() {
            Ok(resolved) => {
                addrs = resolved.collect();
                if !addrs.is_empty() {
                    break;
                }
            }
            Err(_) if attempt + 1 < config.dns_retries => {
                thread::sleep(config.connect_retry_interval);
                continue;
            }
            Err(e) => return Err(CoreError::NameResolutionFailed(format!("{host}: {e}"))),
        }
        if addrs.is_empty() {
            thread::sleep(config.connect_retry_interval);
        }
    }
    if addrs.is_empty() {
        return Err(CoreError::NameResolutionFailed(host.to_string()));
    }

    let mut last_err = None;
    for attempt in 0..config.connect_retries {
        for addr in &addrs {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    tune_tcp_stream(&stream, config)?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        if attempt + 1 < config.connect_retries {
            thread::sleep(config.connect_retry_interval);
        }
    }
    Err(CoreError::SocketFatal(
        last_err.unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "no addresses tried")),
    ))
}

fn connect_uds(path: &str) -> Result<UnixStream> {
    if let Some(abstract_name) = path.strip_prefix('@') {
        return connect_abstract_uds(abstract_name);
    }
    UnixStream::connect(path).map_err(CoreError::from)
}

#[cfg(target_os = "linux")]
fn connect_abstract_uds(name: &str) -> Result<UnixStream> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::SocketAddr;

    let addr = SocketAddr::from_abstract_name(name.as_bytes()).map_err(CoreError::from)?;
    UnixStream::connect_addr(&addr).map_err(CoreError::from)
}

#[cfg(not(target_os = "linux"))]
fn connect_abstract_uds(name: &str) -> Result<UnixStream> {
    Err(CoreError::NameResolutionFailed(format!(
        "abstract Unix-domain sockets are Linux-only, got @{name}"
    )))
}
