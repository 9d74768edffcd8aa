//! Single-frame liveness heuristic.
//!
//! A printed photograph or a screen replay tends to lose high-frequency detail
//! and flatten colour. This module scores one RGB capture on two signals:
//!
//! - **Sharpness**: variance of the 3×3 Laplacian of the BT.601 luma image.
//! - **Colour dispersion**: standard deviation of the three per-channel
//!   standard deviations.
//!
//! Each signal is scaled into [0, 1] and the two are averaged. The capture is
//! accepted when the combined score exceeds the configured threshold.
//!
//! # Threat Coverage
//!
//! - **Blocks:** blank, near-uniform or heavily blurred surfaces.
//! - **Does not block:** sharp printed photos or high-quality displays unless
//!   the threshold is calibrated against real spoof samples.

use image::RgbImage;

/// Laplacian variance at which the sharpness signal saturates.
const SHARPNESS_SCALE: f64 = 1000.0;

/// Channel standard-deviation spread at which the colour signal saturates.
const COLOR_SCALE: f64 = 100.0;

/// Default acceptance threshold.
///
/// Nearly every real capture clears it. Treat it as a starting point to be
/// calibrated, not as an operating point.
pub const DEFAULT_LIVENESS_THRESHOLD: f32 = 0.01;

/// Outcome of a liveness check on one capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessReport {
    /// Whether the combined score exceeded the threshold.
    pub is_live: bool,
    /// Combined score in [0, 1].
    pub score: f32,
    /// Normalized sharpness signal in [0, 1].
    pub sharpness: f32,
    /// Normalized colour-dispersion signal in [0, 1].
    pub color_dispersion: f32,
}

/// Scores captures for physical-presence plausibility.
#[derive(Debug, Clone, Copy)]
pub struct LivenessAnalyzer {
    threshold: f32,
}

impl Default for LivenessAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_LIVENESS_THRESHOLD)
    }
}

impl LivenessAnalyzer {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Analyze a capture. Pure and deterministic.
    pub fn analyze(&self, image: &RgbImage) -> LivenessReport {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return LivenessReport {
                is_live: false,
                score: 0.0,
                sharpness: 0.0,
                color_dispersion: 0.0,
            };
        }

        let gray = luma_bt601(image);
        let sharpness = normalize(
            laplacian_variance(&gray, width as usize, height as usize),
            SHARPNESS_SCALE,
        );
        let color_dispersion = normalize(channel_std_spread(image), COLOR_SCALE);

        let score = ((sharpness + color_dispersion) / 2.0) as f32;

        LivenessReport {
            is_live: score > self.threshold,
            score,
            sharpness: sharpness as f32,
            color_dispersion: color_dispersion as f32,
        }
    }
}

fn normalize(value: f64, scale: f64) -> f64 {
    if value.is_finite() {
        (value / scale).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Convert to 8-bit luma with BT.601 weights, rounding like a camera pipeline.
fn luma_bt601(image: &RgbImage) -> Vec<f64> {
    image
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            (0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64).round()
        })
        .collect()
}

/// Mirror an out-of-range index back into `0..n` without repeating the edge pixel.
fn reflect101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let last = n as isize - 1;
    let mut i = i;
    while i < 0 || i > last {
        i = if i < 0 { -i } else { 2 * last - i };
    }
    i as usize
}

/// Population variance of the 4-neighbour Laplacian over every pixel.
fn laplacian_variance(gray: &[f64], width: usize, height: usize) -> f64 {
    let at = |x: isize, y: isize| gray[reflect101(y, height) * width + reflect101(x, width)];

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;

    for y in 0..height as isize {
        for x in 0..width as isize {
            let lap = at(x, y - 1) + at(x - 1, y) + at(x + 1, y) + at(x, y + 1) - 4.0 * at(x, y);
            sum += lap;
            sum_sq += lap * lap;
        }
    }

    let n = (width * height) as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

/// Standard deviation across the three per-channel standard deviations.
fn channel_std_spread(image: &RgbImage) -> f64 {
    let n = (image.width() as f64) * (image.height() as f64);
    let mut sum = [0.0f64; 3];
    let mut sum_sq = [0.0f64; 3];

    for p in image.pixels() {
        for c in 0..3 {
            let v = p.0[c] as f64;
            sum[c] += v;
            sum_sq[c] += v * v;
        }
    }

    let stds: Vec<f64> = (0..3)
        .map(|c| {
            let mean = sum[c] / n;
            (sum_sq[c] / n - mean * mean).max(0.0).sqrt()
        })
        .collect();

    population_std(&stds)
}

fn population_std(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}
