// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! Framebuffer planes and the owned `Fb` container.
//!
//! `Fb` is an intentionally minimal stand-in for the real renderer's tiled
//! pixel planes (out of scope per §1) — just enough owned state to exercise
//! accumulation, resizing, and the pass-precision/HDRI decision logic that
//! *is* in scope.

use std::collections::HashMap;

use crate::fb::tile::{ActivePixels, Viewport};

/// Numeric width used to transmit a plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassPrecision {
    F32,
    H16,
    Uc8,
    /// Decided at send time by the HDRI heuristic (§4.8).
    RuntimeDecision,
}

/// One pixel plane: per-pixel float channels plus an active mask.
///
/// `channels` holds `channels_per_pixel` floats per pixel, row-major over the
/// plane's viewport; `sample_count` (when present) tracks per-pixel sample
/// counts for planes that accumulate progressively.
#[derive(Debug, Clone)]
pub struct Plane {
    pub viewport: Viewport,
    pub channels_per_pixel: u32,
    pub data: Vec<f32>,
    pub sample_count: Option<Vec<u32>>,
    pub active: ActivePixels,
    pub coarse_hint: PassPrecision,
    pub fine_hint: PassPrecision,
}

impl Plane {
    pub fn new(viewport: Viewport, channels_per_pixel: u32, with_samples: bool) -> Self {
        let pixel_count = (viewport.aligned_width() * viewport.aligned_height()) as usize;
        Self {
            data: vec![0.0; pixel_count * channels_per_pixel as usize],
            sample_count: with_samples.then(|| vec![0u32; pixel_count]),
            active: ActivePixels::new(viewport),
            viewport,
            channels_per_pixel,
            coarse_hint: PassPrecision::RuntimeDecision,
            fine_hint: PassPrecision::F32,
        }
    }

    pub fn reset(&mut self) {
        self.data.iter_mut().for_each(|v| *v = 0.0);
        if let Some(sc) = &mut self.sample_count {
            sc.iter_mut().for_each(|v| *v = 0);
        }
        self.active.reset();
    }

    pub fn resize(&mut self, viewport: Viewport) {
        *self = Self::new(viewport, self.channels_per_pixel, self.sample_count.is_some());
    }

    /// True if any pixel with a positive sample count has a channel whose
    /// value exceeds `threshold` (used by the AOV HDRI test, §4.8).
    pub fn any_channel_over(&self, threshold: f32) -> bool {
        self.data.iter().any(|&v| v > threshold)
    }
}

/// Owned, per-producer-slot container of aligned pixel planes (§3 "Fb").
#[derive(Debug, Clone)]
pub struct Fb {
    pub viewport: Viewport,
    pub beauty: Plane,
    pub beauty_odd: Plane,
    pub pixel_info: Plane,
    pub heat_map: Plane,
    pub weight: Plane,
    pub aovs: HashMap<String, Plane>,
    pub has_beauty: bool,
    pub has_beauty_odd: bool,
    pub has_pixel_info: bool,
    pub has_heat_map: bool,
    pub has_weight: bool,
}

impl Fb {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            viewport,
            beauty: Plane::new(viewport, 4, true),
            beauty_odd: Plane::new(viewport, 4, true),
            pixel_info: Plane::new(viewport, 1, false),
            heat_map: Plane::new(viewport, 1, true),
            weight: Plane::new(viewport, 1, false),
            aovs: HashMap::new(),
            has_beauty: false,
            has_beauty_odd: false,
            has_pixel_info: false,
            has_heat_map: false,
            has_weight: false,
        }
    }

    /// Reset every plane at a frame boundary; AOVs keep their keys but clear
    /// their contents (new AOVs can still appear after a reset).
    pub fn reset(&mut self) {
        self.beauty.reset();
        self.beauty_odd.reset();
        self.pixel_info.reset();
        self.heat_map.reset();
        self.weight.reset();
        for plane in self.aovs.values_mut() {
            plane.reset();
        }
        self.has_beauty = false;
        self.has_beauty_odd = false;
        self.has_pixel_info = false;
        self.has_heat_map = false;
        self.has_weight = false;
    }

    /// Resize every plane to a new viewport, dropping previous contents.
    pub fn resize(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.beauty.resize(viewport);
        self.beauty_odd.resize(viewport);
        self.pixel_info.resize(viewport);
        self.heat_map.resize(viewport);
        self.weight.resize(viewport);
        for plane in self.aovs.values_mut() {
            plane.resize(viewport);
        }
    }

    pub fn aov_mut(&mut self, name: &str) -> &mut Plane {
        self.aovs
            .entry(name.to_string())
            .or_insert_with(|| Plane::new(self.viewport, 1, true))
    }
}
