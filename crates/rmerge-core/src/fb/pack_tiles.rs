// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! The pixel codec that packs/unpacks tiles is out of scope (§1) and treated
//! as a black box here via the [`PackTiles`] trait. A [`NullPackTiles`]
//! stand-in is provided so the rest of the crate (and its tests) can be
//! exercised without a real codec; production callers supply their own
//! implementation backed by the actual renderer's tile codec.

use crate::fb::plane::{PassPrecision, Plane};
use crate::fb::tile::{ActivePixels, Viewport};

/// Tag returned when probing an arriving named buffer, used to dispatch to
/// the right plane (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Beauty,
    BeautyWithNumSample,
    BeautyOdd,
    BeautyOddWithNumSample,
    PixelInfo,
    HeatMap,
    HeatMapWithNumSample,
    Weight,
    Reference,
    Undef,
    /// Anything not matching a reserved channel name is a renderOutputAov.
    RenderOutputAov,
}

/// Decoded buffer output: a `plane` patch plus the active-pixel mask the
/// codec produced and the coarse/fine precision it detected in the wire data.
pub struct DecodedBuffer {
    pub active: ActivePixels,
    pub coarse_hint: PassPrecision,
    pub fine_hint: PassPrecision,
}

/// Black-box pixel codec interface (§1 "out of scope", documented operations only).
pub trait PackTiles: Send + Sync {
    /// Inspect `bytes` (without consuming) and classify which plane it targets.
    fn probe_data_type(&self, channel_name: &str) -> DataType;

    /// Decode `bytes` into `plane`, returning the mask/precision the codec observed.
    fn decode_into(&self, bytes: &[u8], plane: &mut Plane) -> DecodedBuffer;

    /// Encode `plane` restricted to `active` (or the whole plane if `None`) at `precision`.
    fn encode_from(&self, plane: &Plane, active: Option<&ActivePixels>, precision: PassPrecision) -> Vec<u8>;
}

/// A codec that performs no real (de)compression; useful for tests and for
/// exercising the merge/accounting logic without the real tile codec.
#[derive(Debug, Default)]
pub struct NullPackTiles;

impl PackTiles for NullPackTiles {
    fn probe_data_type(&self, channel_name: &str) -> DataType {
        match channel_name {
            "Beauty" => DataType::Beauty,
            "BeautyWithNumSample" => DataType::BeautyWithNumSample,
            "RenderBufferOdd" => DataType::BeautyOdd,
            "RenderBufferOddWithNumSample" => DataType::BeautyOddWithNumSample,
            "PixelInfo" => DataType::PixelInfo,
            "HeatMap" => DataType::HeatMap,
            "HeatMapWithNumSample" => DataType::HeatMapWithNumSample,
            "Weight" => DataType::Weight,
            "Reference" => DataType::Reference,
            "" => DataType::Undef,
            _ => DataType::RenderOutputAov,
        }
    }

    fn decode_into(&self, _bytes: &[u8], plane: &mut Plane) -> DecodedBuffer {
        let active = ActivePixels::new(plane.viewport);
        DecodedBuffer {
            active,
            coarse_hint: plane.coarse_hint,
            fine_hint: plane.fine_hint,
        }
    }

    fn encode_from(&self, plane: &Plane, _active: Option<&ActivePixels>, _precision: PassPrecision) -> Vec<u8> {
        // Black-box stand-in: a real codec would pack `plane.data` into the
        // wire tile format; we just hand back a length marker.
        let _ = plane;
        Vec::new()
    }
}

/// Viewport helper shared by decode dispatch (kept here to avoid a cyclic
/// import between `plane` and `multi_chans`).
pub fn decode_active_pixels(codec: &dyn PackTiles, bytes: &[u8], plane: &mut Plane) -> DecodedBuffer {
    codec.decode_into(bytes, plane)
}
