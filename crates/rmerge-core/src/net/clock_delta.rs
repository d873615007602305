// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! Clock-delta request/reply wire messages exchanged over [`super::client`]/[`super::server`]
//! connections, producing a [`crate::global_node_info::ClockDeltaSample`] (§4.9).

use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;
use crate::global_node_info::ClockDeltaSample;
use crate::net::socket::{recv_framed, send_framed};

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Requesting side of the handshake: send `t0`, await the peer's
/// `(t1, t2)` echo, stamp `t3` on receipt.
pub fn request_clock_delta(stream: &mut (impl Read + Write)) -> Result<ClockDeltaSample> {
    let t0 = now_micros();
    send_framed(stream, &t0.to_le_bytes())?;

    let reply = recv_framed(stream)?.ok_or_else(|| {
        crate::error::CoreError::SocketFatal(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "peer closed during clock-delta handshake"))
    })?;
    let t3 = now_micros();

    let t1 = u64::from_le_bytes(reply[0..8].try_into().unwrap());
    let t2 = u64::from_le_bytes(reply[8..16].try_into().unwrap());

    Ok(ClockDeltaSample {
        t0_request_sent_us: t0,
        t1_peer_received_us: t1,
        t2_peer_replied_us: t2,
        t3_reply_received_us: t3,
    })
}

/// Peer side: read the requester's `t0`, stamp `t1` on receipt and `t2` just
/// before replying, echo both back.
pub fn respond_to_clock_delta(stream: &mut (impl Read + Write)) -> Result<()> {
    let Some(request) = recv_framed(stream)? else {
        return Ok(());
    };
    let t1 = now_micros();
    let _t0 = u64::from_le_bytes(request[0..8].try_into().unwrap());

    let t2 = now_micros();
    let mut reply = Vec::with_capacity(16);
    reply.extend_from_slice(&t1.to_le_bytes());
    reply.extend_from_slice(&t2.to_le_bytes());
    send_framed(stream, &reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// A pipe-like test double: writes from one role are readable by the
    /// other, modeling a single loopback round trip without real sockets.
    struct LoopbackPair {
        outbox: Cursor<Vec<u8>>,
        inbox: Cursor<Vec<u8>>,
    }

    impl Read for LoopbackPair {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.inbox.read(buf)
        }
    }
    impl Write for LoopbackPair {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.outbox.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn request_then_respond_produces_consistent_sample() {
        let mut requester_side = LoopbackPair { outbox: Cursor::new(Vec::new()), inbox: Cursor::new(Vec::new()) };

        // Simulate the requester's send, then hand its bytes to the
        // responder, then feed the responder's reply back.
        let t0 = now_micros();
        send_framed(&mut requester_side, &t0.to_le_bytes()).unwrap();
        let sent = requester_side.outbox.into_inner();

        let mut responder_side = LoopbackPair { outbox: Cursor::new(Vec::new()), inbox: Cursor::new(sent) };
        respond_to_clock_delta(&mut responder_side).unwrap();
        let reply_bytes = responder_side.outbox.into_inner();

        let mut requester_side2 = LoopbackPair { outbox: Cursor::new(Vec::new()), inbox: Cursor::new(reply_bytes) };
        let t1 = u64::from_le_bytes(
            recv_framed(&mut requester_side2).unwrap().unwrap()[0..8].try_into().unwrap(),
        );
        assert!(t1 >= t0);
    }
}
