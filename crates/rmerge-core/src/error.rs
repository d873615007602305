// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! Error types shared across the merge core.
//!
//! Mirrors the error-handling design in §7 of the design document: most
//! failures here are local, logged, and skipped rather than propagated as
//! panics or process-wide interrupts. `CoreError` exists for the handful of
//! operations that must report failure to their caller.

use std::fmt;

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Failure modes that can be returned from a public core operation.
///
/// Every variant corresponds to one of the error kinds enumerated in the
/// design document's error-handling section.
#[derive(Debug)]
pub enum CoreError {
    /// `InfoCodec::decode` failed to parse the input as the expected tree shape.
    MalformedInfoRecord(String),

    /// A progressive-frame buffer's `DataType` tag did not match any known
    /// decode branch.
    UnknownDataType(u32),

    /// A producer's framebuffer viewport did not match the output viewport
    /// during merge.
    ViewportMismatch { expected: (u32, u32), got: (u32, u32) },

    /// `machineId` was outside `[0, producerCount)`.
    ProducerOutOfRange { machine_id: i32, producer_count: usize },

    /// `connect`/`send`/`recv` failed for a reason other than `EAGAIN`/`EINTR`.
    SocketFatal(std::io::Error),

    /// DNS resolution exhausted its retry budget.
    NameResolutionFailed(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedInfoRecord(msg) => write!(f, "malformed info record: {msg}"),
            Self::UnknownDataType(tag) => write!(f, "unknown progressive-frame data type tag {tag}"),
            Self::ViewportMismatch { expected, got } => write!(
                f,
                "viewport mismatch: expected {expected:?}, got {got:?}"
            ),
            Self::ProducerOutOfRange { machine_id, producer_count } => write!(
                f,
                "machine id {machine_id} out of range for {producer_count} producers"
            ),
            Self::SocketFatal(err) => write!(f, "socket error: {err}"),
            Self::NameResolutionFailed(host) => write!(f, "failed to resolve host '{host}'"),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SocketFatal(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::SocketFatal(err)
    }
}
