//! Color extraction from a pixel source
//!
//! Reduces an opaque pixel snapshot to one or more representative colors per
//! tick, low-pass filters the result against the previous output, and can
//! boost it from a pulled audio feature vector (energy level, beat edges).

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::device::RgbColor;

/// Region handed to the pixel source when sampling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRegion {
    /// The whole surface
    Full,
    /// Zone `index` of `of` equal partitions
    Zone { index: usize, of: usize },
}

/// Read-only snapshot access to the running visual source
///
/// The core never mutates the source; `sample_pixels` may decimate internally
/// and return however many pixels it considers representative.
pub trait PixelSource: Send + Sync {
    fn sample_pixels(&self, region: SampleRegion) -> Vec<RgbColor>;
}

/// Strategy used to reduce a pixel buffer to representative color(s)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    /// Single most frequent quantized color
    Dominant,
    /// Mean of the sampled pixels
    Average,
    /// One representative color per spatial zone
    Zones,
}

/// Opaque audio feature vector, pulled on demand
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioFeatures {
    /// Overall energy, 0..1
    pub energy: f32,
    /// Dominant pitch position, 0..1
    pub pitch: f32,
    /// Beat detected in the current analysis window
    pub is_beat: bool,
}

/// Supplier of the latest audio feature vector
pub trait FeatureSource: Send + Sync {
    fn latest(&self) -> AudioFeatures;
}

/// Value gain applied proportionally to audio energy
const ENERGY_VALUE_GAIN: f32 = 0.5;
/// Extra value spike on a beat rising edge
const BEAT_VALUE_SPIKE: f32 = 0.25;
/// Extra saturation spike on a beat rising edge
const BEAT_SATURATION_SPIKE: f32 = 0.15;
/// Quantization shift for dominant-color bucketing (16 levels per channel)
const QUANT_SHIFT: u8 = 4;

/// Stateful per-tick color extractor
///
/// Holds the previous smoothed output (the low-pass filter memory) and the
/// previous beat flag (for edge detection), so one extractor instance belongs
/// to one sync session.
pub struct ColorExtractor {
    mode: ExtractionMode,
    zone_count: usize,
    smoothing: f32,
    previous: Vec<[f32; 3]>,
    prev_beat: bool,
}

impl ColorExtractor {
    pub fn new(mode: ExtractionMode, zone_count: usize, smoothing: f32) -> Self {
        Self {
            mode,
            zone_count: zone_count.max(1),
            smoothing: smoothing.clamp(0.0, 1.0),
            previous: Vec::new(),
            prev_beat: false,
        }
    }

    /// Produce this tick's colors: extract, boost, smooth
    pub fn extract(
        &mut self,
        source: &dyn PixelSource,
        features: Option<&AudioFeatures>,
    ) -> Vec<RgbColor> {
        let mut raw = self.raw_colors(source);

        if let Some(features) = features {
            let beat_edge = features.is_beat && !self.prev_beat;
            self.prev_beat = features.is_beat;
            for color in raw.iter_mut() {
                *color = boost(*color, features, beat_edge);
            }
        }

        let smoothed = self.smooth(raw);
        trace!("Extracted {} color(s) in {:?} mode", smoothed.len(), self.mode);

        smoothed
            .iter()
            .map(|c| RgbColor::new(c[0].round() as u8, c[1].round() as u8, c[2].round() as u8))
            .collect()
    }

    fn raw_colors(&self, source: &dyn PixelSource) -> Vec<[f32; 3]> {
        match self.mode {
            ExtractionMode::Average => vec![mean(&source.sample_pixels(SampleRegion::Full))],
            ExtractionMode::Dominant => vec![dominant(&source.sample_pixels(SampleRegion::Full))],
            ExtractionMode::Zones => (0..self.zone_count)
                .map(|index| {
                    mean(&source.sample_pixels(SampleRegion::Zone {
                        index,
                        of: self.zone_count,
                    }))
                })
                .collect(),
        }
    }

    /// Exponential low-pass: `out = prev + (raw - prev) * (1 - smoothing)`
    ///
    /// Smoothing 0 passes the raw value through; approaching 1 the output is
    /// nearly frozen. The filter resets whenever the zone count changes.
    fn smooth(&mut self, raw: Vec<[f32; 3]>) -> Vec<[f32; 3]> {
        if self.smoothing == 0.0 || self.previous.len() != raw.len() {
            self.previous = raw.clone();
            return raw;
        }

        let alpha = 1.0 - self.smoothing;
        let smoothed: Vec<[f32; 3]> = self
            .previous
            .iter()
            .zip(raw.iter())
            .map(|(prev, raw)| {
                [
                    prev[0] + (raw[0] - prev[0]) * alpha,
                    prev[1] + (raw[1] - prev[1]) * alpha,
                    prev[2] + (raw[2] - prev[2]) * alpha,
                ]
            })
            .collect();

        self.previous = smoothed.clone();
        smoothed
    }
}

fn mean(pixels: &[RgbColor]) -> [f32; 3] {
    if pixels.is_empty() {
        return [0.0, 0.0, 0.0];
    }
    let mut sum = [0.0f64; 3];
    for pixel in pixels {
        sum[0] += pixel.r as f64;
        sum[1] += pixel.g as f64;
        sum[2] += pixel.b as f64;
    }
    let n = pixels.len() as f64;
    [
        (sum[0] / n) as f32,
        (sum[1] / n) as f32,
        (sum[2] / n) as f32,
    ]
}

/// Most frequent quantized color, averaged over its bucket members
fn dominant(pixels: &[RgbColor]) -> [f32; 3] {
    if pixels.is_empty() {
        return [0.0, 0.0, 0.0];
    }

    let mut buckets: std::collections::HashMap<(u8, u8, u8), (u32, [u64; 3])> =
        std::collections::HashMap::new();
    for pixel in pixels {
        let key = (
            pixel.r >> QUANT_SHIFT,
            pixel.g >> QUANT_SHIFT,
            pixel.b >> QUANT_SHIFT,
        );
        let entry = buckets.entry(key).or_insert((0, [0; 3]));
        entry.0 += 1;
        entry.1[0] += pixel.r as u64;
        entry.1[1] += pixel.g as u64;
        entry.1[2] += pixel.b as u64;
    }

    let (count, sums) = buckets
        .values()
        .max_by_key(|(count, _)| *count)
        .copied()
        .unwrap_or((1, [0; 3]));

    let n = count as f32;
    [
        sums[0] as f32 / n,
        sums[1] as f32 / n,
        sums[2] as f32 / n,
    ]
}

/// Boost brightness/saturation from the feature vector
fn boost(color: [f32; 3], features: &AudioFeatures, beat_edge: bool) -> [f32; 3] {
    let (h, mut s, mut v) = rgb_to_hsv(color[0] / 255.0, color[1] / 255.0, color[2] / 255.0);

    v *= 1.0 + ENERGY_VALUE_GAIN * features.energy.clamp(0.0, 1.0);
    if beat_edge {
        v += BEAT_VALUE_SPIKE;
        s += BEAT_SATURATION_SPIKE;
    }

    let (r, g, b) = hsv_to_rgb(h, s.clamp(0.0, 1.0), v.clamp(0.0, 1.0));
    [r * 255.0, g * 255.0, b * 255.0]
}

/// Convert HSV (all 0..1) to RGB (0..1)
pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let h_i = (h * 6.0) as i32;
    let f = h * 6.0 - h_i as f32;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);

    match h_i.rem_euclid(6) {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}

/// Convert RGB (0..1) to HSV (all 0..1)
pub fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        (((g - b) / delta).rem_euclid(6.0)) / 6.0
    } else if max == g {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };

    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}
