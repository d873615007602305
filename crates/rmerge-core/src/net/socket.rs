// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! Blocking send/recv primitives shared by [`super::client`] and [`super::server`] (§4.9).
//!
//! Mirrors the teacher's [`crate::net`] `ByteStream` split: callers work
//! against any `Read + Write` stream, and the retry/EOF semantics here are
//! the only thing specific to this protocol.

use std::io::{self, ErrorKind, Read, Write};
use std::net::TcpStream;

use crate::config::RuntimeConfig;
use crate::error::{CoreError, Result};

/// Apply the socket-buffer and latency knobs from `config` to a freshly
/// connected or accepted TCP stream (§4.9 "configure SO_{SND,RCV}BUF ...
/// TCP_NODELAY on internet sockets").
pub fn tune_tcp_stream(stream: &TcpStream, config: &RuntimeConfig) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let target = config.socket_buffer_target as u32;
    let sock = socket2::SockRef::from(stream);
    // Buffer sizing is advisory; the kernel clamps to its own max, and a
    // failure to raise it is not fatal to the connection.
    let _ = sock.set_send_buffer_size(target as usize);
    let _ = sock.set_recv_buffer_size(target as usize);
    Ok(())
}

/// Blocking send loop: retries on `EAGAIN`/`EINTR`; `EPIPE` means the peer
/// closed the connection and is reported as [`CoreError::SocketFatal`], not
/// retried (§4.9 socket primitive).
pub fn send_all(stream: &mut impl Write, mut buf: &[u8]) -> Result<()> {
    while !buf.is_empty() {
        match stream.write(buf) {
            Ok(0) => return Err(CoreError::SocketFatal(io::Error::new(ErrorKind::BrokenPipe, "peer closed"))),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == ErrorKind::Interrupted || e.kind() == ErrorKind::WouldBlock => continue,
            Err(e) if e.kind() == ErrorKind::BrokenPipe => return Err(CoreError::SocketFatal(e)),
            Err(e) => return Err(CoreError::SocketFatal(e)),
        }
    }
    Ok(())
}

/// Result of a blocking receive: either a data chunk, or the sentinel for
/// "peer is gone" (`read() == 0`, or `EBADF`, per §4.9).
pub enum RecvOutcome {
    Data(Vec<u8>),
    Eof,
}

/// Blocking receive loop filling up to `max_len` bytes, retrying on
/// `EAGAIN`/`EINTR` (§4.9 socket primitive).
pub fn recv_some(stream: &mut impl Read, max_len: usize) -> Result<RecvOutcome> {
    let mut buf = vec![0u8; max_len];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return Ok(RecvOutcome::Eof),
            Ok(n) => {
                buf.truncate(n);
                return Ok(RecvOutcome::Data(buf));
            }
            Err(e) if e.kind() == ErrorKind::Interrupted || e.kind() == ErrorKind::WouldBlock => continue,
            Err(e) if matches!(e.raw_os_error(), Some(libc::EBADF)) => return Ok(RecvOutcome::Eof),
            Err(e) => return Err(CoreError::SocketFatal(e)),
        }
    }
}

/// Length-prefixed framing used by every message on this transport: a
/// 4-byte little-endian length followed by that many payload bytes.
pub fn send_framed(stream: &mut impl Write, payload: &[u8]) -> Result<()> {
    send_all(stream, &(payload.len() as u32).to_le_bytes())?;
    send_all(stream, payload)
}

pub fn recv_framed(stream: &mut impl Read) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match recv_exact(stream, &mut len_buf)? {
        false => return Ok(None),
        true => {}
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    if !recv_exact(stream, &mut payload)? {
        return Ok(None);
    }
    Ok(Some(payload))
}

fn recv_exact(stream: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match recv_some(stream, buf.len() - filled)? {
            RecvOutcome::Eof => return Ok(false),
            RecvOutcome::Data(chunk) => {
                buf[filled..filled + chunk.len()].copy_from_slice(&chunk);
                filled += chunk.len();
            }
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn framed_round_trip_over_in_memory_buffer() {
        let mut buf = Vec::new();
        send_framed(&mut buf, b"hello").unwrap();
        let mut cursor = Cursor::new(buf);
        let got = recv_framed(&mut cursor).unwrap().unwrap();
        assert_eq!(got, b"hello");
    }

    #[test]
    fn recv_framed_on_empty_stream_is_eof_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(recv_framed(&mut cursor).unwrap().is_none());
    }
}
