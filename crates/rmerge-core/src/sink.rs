// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! Fleet info sink interface — where `"auxInfo"` channel bytes get routed
//! once a producer's message is recognized as info-only or carries an
//! aux-info buffer alongside pixel data (§4.3, §4.5).

/// Receives raw `InfoCodec`-encoded bytes extracted from an `"auxInfo"`
/// channel. Implemented by `GlobalNodeInfo` in production; tests can use a
/// simple `Vec`-backed collector.
pub trait FleetInfoSink: Send + Sync {
    fn ingest_aux_info(&self, machine_id: i32, bytes: &[u8]);
}

/// No-op sink, useful when a caller has not wired up fleet info tracking.
#[derive(Debug, Default)]
pub struct NullFleetInfoSink;

impl FleetInfoSink for NullFleetInfoSink {
    fn ingest_aux_info(&self, _machine_id: i32, _bytes: &[u8]) {}
}
