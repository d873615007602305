// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! Outbound progressive-frame assembly: pass-precision selection, the HDRI
//! heuristic, and latency-log stitching (§4.8).

use crate::fb::message::NamedBuffer;
use crate::fb::plane::{Fb, PassPrecision};
use crate::fb::single_chan::FbMsgSingleChan;

/// Sender-side precision policy (§4.8 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPrecisionPolicy {
    Full32,
    Full16,
    Auto32,
    Auto16,
}

/// Fraction of the aligned-viewport area that must be HDR for the whole
/// plane to be classified HDRI (§4.8).
const HDRI_AREA_FRACTION: f32 = 0.005;

/// Resolved precision for one pass of one plane, cached per outbound
/// message so repeated queries for the same plane/pass don't re-scan pixels
/// (§4.8 "cached per outbound message so multiple channels share one
/// result").
#[derive(Default)]
pub struct MergeFbSender {
    cached_beauty_hdri: Option<bool>,
    upstream_latency_log: Option<FbMsgSingleChan>,
}

impl MergeFbSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve coarse/fine precision for the beauty plane under `policy`,
    /// given the producer's own coarse/fine hints (§4.8 table).
    pub fn resolve_beauty_precision(&mut self, fb: &Fb, policy: SendPrecisionPolicy, coarse: bool) -> PassPrecision {
        let hc = fb.beauty.coarse_hint;
        let hf = fb.beauty.fine_hint;
        match policy {
            SendPrecisionPolicy::Full32 => PassPrecision::F32,
            SendPrecisionPolicy::Full16 => {
                let hint = if coarse { hc } else { hf };
                if hint == PassPrecision::F32 {
                    PassPrecision::F32
                } else {
                    PassPrecision::H16
                }
            }
            SendPrecisionPolicy::Auto32 => {
                if coarse {
                    self.honor_or_hdri_test(fb, hc)
                } else {
                    PassPrecision::F32
                }
            }
            SendPrecisionPolicy::Auto16 => self.honor_or_hdri_test(fb, if coarse { hc } else { hf }),
        }
    }

    fn honor_or_hdri_test(&mut self, fb: &Fb, hint: PassPrecision) -> PassPrecision {
        if hint != PassPrecision::RuntimeDecision {
            return hint;
        }
        if self.beauty_is_hdri(fb) {
            PassPrecision::H16
        } else {
            PassPrecision::Uc8
        }
    }

    /// HDRI test for beauty (§4.8): count pixels with any channel above
    /// `1.0`, classify HDRI once that count exceeds 0.5% of the aligned
    /// viewport's pixel area.
    fn beauty_is_hdri(&mut self, fb: &Fb) -> bool {
        if let Some(cached) = self.cached_beauty_hdri {
            return cached;
        }
        let plane = &fb.beauty;
        let pixel_count = (plane.viewport.aligned_width() * plane.viewport.aligned_height()) as usize;
        let threshold = (pixel_count as f32 * HDRI_AREA_FRACTION).ceil() as usize;
        let channels = plane.channels_per_pixel as usize;
        let mut over = 0usize;
        for pixel in 0..pixel_count {
            let base = pixel * channels;
            if plane.data[base..base + channels].iter().any(|&v| v > 1.0) {
                over += 1;
                if over > threshold {
                    break;
                }
            }
        }
        let is_hdri = over > threshold;
        self.cached_beauty_hdri = Some(is_hdri);
        is_hdri
    }

    /// HDRI test for an AOV plane (§4.8): non-float u8 planes are never
    /// HDRI; the hypothetical "non-float non-u8" case cannot be
    /// downconverted and is always treated as HDRI. Float planes run the
    /// per-pixel sample-count comparison.
    pub fn aov_is_hdri(&self, aov: &crate::fb::plane::Plane, format: AovFormat) -> bool {
        match format {
            AovFormat::U8 => false,
            AovFormat::NonFloatNonU8 => true,
            AovFormat::Float => {
                let Some(sample_count) = &aov.sample_count else {
                    return false;
                };
                let pixel_count = sample_count.len();
                if pixel_count == 0 {
                    return false;
                }
                let threshold = (pixel_count as f32 * HDRI_AREA_FRACTION).ceil() as usize;
                let channels = aov.channels_per_pixel as usize;
                let mut over = 0usize;
                for pixel in 0..pixel_count {
                    let samples = sample_count[pixel];
                    if samples == 0 {
                        continue;
                    }
                    let base = pixel * channels;
                    if aov.data[base..base + channels].iter().any(|&v| v > samples as f32) {
                        over += 1;
                        if over > threshold {
                            break;
                        }
                    }
                }
                over > threshold
            }
        }
    }

    /// Stash the upstream (back-end) latency log so the next
    /// [`Self::add_latency_log`] call appends it after the merged-side log
    /// (§4.8 `encodeUpstreamLatencyLog`).
    pub fn encode_upstream_latency_log(&mut self, log: FbMsgSingleChan) {
        self.upstream_latency_log = Some(log);
    }

    /// Append the merged-side latency log, plus the upstream log if one was
    /// provided, as named buffers on the outbound message (§4.8 `addLatencyLog`).
    pub fn add_latency_log(&mut self, merged_log: &FbMsgSingleChan, buffers: &mut Vec<NamedBuffer>) {
        buffers.push(NamedBuffer {
            name: crate::fb::message::channel::LATENCY_LOG.to_string(),
            bytes: merged_log.encode(),
        });
        if let Some(upstream) = self.upstream_latency_log.take() {
            buffers.push(NamedBuffer {
                name: crate::fb::message::channel::LATENCY_LOG_UPSTREAM.to_string(),
                bytes: upstream.encode(),
            });
        }
    }

    /// Reset the per-message HDRI cache; call once per outbound message.
    pub fn begin_message(&mut self) {
        self.cached_beauty_hdri = None;
    }
}

/// AOV pixel format, used only to branch the HDRI test (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AovFormat {
    U8,
    Float,
    NonFloatNonU8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fb::tile::Viewport;

    fn fb_with_beauty_values(values: &[f32]) -> Fb {
        let mut fb = Fb::new(Viewport::new(0, 0, 8, 8));
        for (slot, &v) in fb.beauty.data.iter_mut().zip(values) {
            *slot = v;
        }
        fb
    }

    #[test]
    fn full32_always_resolves_to_f32() {
        let mut sender = MergeFbSender::new();
        let fb = Fb::new(Viewport::new(0, 0, 8, 8));
        let p = sender.resolve_beauty_precision(&fb, SendPrecisionPolicy::Full32, true);
        assert_eq!(p, PassPrecision::F32);
    }

    #[test]
    fn auto16_runs_hdri_test_for_runtime_decision_hint() {
        let pixel_count = 8 * 8;
        let mut values = vec![0.0f32; pixel_count * 4];
        // Push well above the 0.5% area threshold into HDR range.
        for i in 0..pixel_count {
            values[i * 4] = 2.0;
        }
        let fb = fb_with_beauty_values(&values);
        let mut sender = MergeFbSender::new();
        let p = sender.resolve_beauty_precision(&fb, SendPrecisionPolicy::Auto16, true);
        assert_eq!(p, PassPrecision::H16);
    }

    #[test]
    fn non_hdr_image_resolves_to_uc8_under_auto() {
        let fb = Fb::new(Viewport::new(0, 0, 8, 8)); // all zero, no HDR pixels
        let mut sender = MergeFbSender::new();
        let p = sender.resolve_beauty_precision(&fb, SendPrecisionPolicy::Auto16, true);
        assert_eq!(p, PassPrecision::Uc8);
    }

    #[test]
    fn hdri_cache_gives_same_classification_across_passes() {
        let pixel_count = 8 * 8;
        let mut values = vec![0.0f32; pixel_count * 4];
        values[0] = 2.0;
        let mut fb = fb_with_beauty_values(&values);
        fb.beauty.fine_hint = PassPrecision::RuntimeDecision;
        let mut sender = MergeFbSender::new();
        let coarse = sender.resolve_beauty_precision(&fb, SendPrecisionPolicy::Auto16, true);
        assert_eq!(sender.cached_beauty_hdri, Some(coarse == PassPrecision::H16));
        let fine = sender.resolve_beauty_precision(&fb, SendPrecisionPolicy::Auto16, false);
        assert_eq!(coarse, fine);
    }

    #[test]
    fn u8_aov_is_never_hdri() {
        let sender = MergeFbSender::new();
        let aov = crate::fb::plane::Plane::new(Viewport::new(0, 0, 4, 4), 1, true);
        assert!(!sender.aov_is_hdri(&aov, AovFormat::U8));
    }

    #[test]
    fn non_float_non_u8_aov_is_always_hdri() {
        let sender = MergeFbSender::new();
        let aov = crate::fb::plane::Plane::new(Viewport::new(0, 0, 4, 4), 1, true);
        assert!(sender.aov_is_hdri(&aov, AovFormat::NonFloatNonU8));
    }

    #[test]
    fn add_latency_log_appends_upstream_when_present() {
        let mut sender = MergeFbSender::new();
        let mut merged = FbMsgSingleChan::new();
        merged.push(vec![1, 2, 3]);
        let mut upstream = FbMsgSingleChan::new();
        upstream.push(vec![9]);
        sender.encode_upstream_latency_log(upstream);

        let mut buffers = Vec::new();
        sender.add_latency_log(&merged, &mut buffers);
        assert_eq!(buffers.len(), 2);
        assert_eq!(buffers[0].name, crate::fb::message::channel::LATENCY_LOG);
        assert_eq!(buffers[1].name, crate::fb::message::channel::LATENCY_LOG_UPSTREAM);
    }
}
