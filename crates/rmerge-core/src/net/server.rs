// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! `SockServer`: dual internet + Unix-domain accept loop (§4.9 "Server loop").

use std::net::{TcpListener, TcpStream};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::net::socket::tune_tcp_stream;

/// An accepted connection from either transport, handed to the caller's
/// callback or pushed onto the connection queue.
pub enum SockServerConnection {
    Tcp(TcpStream),
    Uds(UnixStream),
}

/// Shared shutdown flag; cloned into the accept loop and flipped by the
/// owner to stop it within one poll interval (§4.9, §5 "Cancellation").
#[derive(Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn request_shutdown(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// MT-safe FIFO of accepted connections, drained by a worker pool
/// (§5 "SockServerConnectionQueue is mutex-guarded").
#[derive(Default)]
pub struct ConnectionQueue(Mutex<std::collections::VecDeque<SockServerConnection>>);

impl ConnectionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, conn: SockServerConnection) {
        self.0.lock().unwrap().push_back(conn);
    }

    pub fn pop(&self) -> Option<SockServerConnection> {
        self.0.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct SockServer {
    tcp: TcpListener,
    uds: UnixListener,
    uds_path: String,
}

impl SockServer {
    /// Bind both an internet listener on `port` and a Unix-domain listener
    /// at `uds_path`, both non-blocking so `main_loop`'s poll never stalls
    /// (§4.9).
    pub fn bind(port: u16, uds_path: impl Into<String>, config: &RuntimeConfig) -> Result<Self> {
        let _ = config;
        let tcp = TcpListener::bind(("0.0.0.0", port))?;
        tcp.set_nonblocking(true)?;

        let uds_path = uds_path.into();
        let _ = std::fs::remove_file(&uds_path);
        let uds = UnixListener::bind(&uds_path)?;
        uds.set_nonblocking(true)?;

        Ok(Self { tcp, uds, uds_path })
    }

    /// Poll both listeners every `config.accept_poll_interval` until
    /// `shutdown` is set, invoking `on_accept` for each new connection
    /// (§4.9 "Server loop", §5 "Cancellation": "checks the shutdown flag
    /// each iteration").
    pub fn main_loop(&self, shutdown: &ShutdownFlag, config: &RuntimeConfig, mut on_accept: impl FnMut(SockServerConnection)) {
        while !shutdown.is_set() {
            match self.tcp.accept() {
                Ok((stream, _addr)) => {
                    if tune_tcp_stream(&stream, config).is_ok() {
                        on_accept(SockServerConnection::Tcp(stream));
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(_) => {}
            }
            match self.uds.accept() {
                Ok((stream, _addr)) => {
                    let _ = stream.set_nonblocking(true);
                    on_accept(SockServerConnection::Uds(stream));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(_) => {}
            }
            std::thread::sleep(config.accept_poll_interval);
        }
    }
}

impl Drop for SockServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.uds_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_flag_stops_accept_loop_promptly() {
        let config = RuntimeConfig {
            accept_poll_interval: Duration::from_millis(5),
            ..RuntimeConfig::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let uds_path = dir.path().join("sockserver.sock");
        let server = SockServer::bind(0, uds_path.to_str().unwrap(), &config).unwrap();
        let shutdown = ShutdownFlag::new();
        let shutdown_clone = shutdown.clone();
        let handle = std::thread::spawn(move || {
            let mut accepted = 0;
            server.main_loop(&shutdown_clone, &config, |_conn| accepted += 1);
            accepted
        });
        std::thread::sleep(Duration::from_millis(20));
        shutdown.request_shutdown();
        let accepted = handle.join().unwrap();
        assert_eq!(accepted, 0);
    }
}
