//! Audio Analysis Module
//!
//! Extracts one instantaneous feature frame per hop from the live input. The
//! frame layout is fixed by the configured feature list and must match the
//! dimensionality the corpora were built with.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

use realfft::num_complex::Complex32;
use realfft::{RealFftPlanner, RealToComplex};
use tracing::debug;

use crate::audio_input::SampleFeed;
use crate::config::{AnalysisConfig, FeatureKind};

/// Keeps flatness finite on silent bands
const FLATNESS_EPSILON: f32 = 1e-10;

/// Anything that yields one feature frame per hop
pub trait FeatureSource: Send {
    /// Frame length D
    fn dimension(&self) -> usize;

    /// Consume the input that arrived during the last hop and recompute the frame
    fn advance(&mut self);

    fn current_feature_vector(&self) -> &[f32];
}

/// Hann-windowed FFT analyzer over the most recent `fft_size` input samples
pub struct SpectralAnalyzer {
    feed: Box<dyn SampleFeed>,
    features: Vec<FeatureKind>,
    rolloff_fraction: f32,
    dimension: usize,

    history: VecDeque<f32>,
    scratch: Vec<f32>,
    window: Vec<f32>,
    r2c: Arc<dyn RealToComplex<f32>>,
    fft_input: Vec<f32>,
    spectrum: Vec<Complex32>,
    magnitudes: Vec<f32>,
    previous_magnitudes: Vec<f32>,

    current: Vec<f32>,
}

impl SpectralAnalyzer {
    pub fn new(config: &AnalysisConfig, feed: Box<dyn SampleFeed>) -> Self {
        let fft_size = config.fft_size.max(2);
        let mut planner = RealFftPlanner::<f32>::new();
        let r2c = planner.plan_fft_forward(fft_size);

        let window: Vec<f32> = (0..fft_size)
            .map(|i| {
                let phase = 2.0 * PI * i as f32 / (fft_size as f32 - 1.0);
                0.5 * (1.0 - phase.cos())
            })
            .collect();

        let bins = fft_size / 2 + 1;
        let dimension = config.dimension();

        Self {
            feed,
            features: config.features.clone(),
            rolloff_fraction: config.rolloff_fraction,
            dimension,
            history: VecDeque::from(vec![0.0; fft_size]),
            scratch: vec![0.0; config.hop_size.max(1)],
            window,
            fft_input: r2c.make_input_vec(),
            spectrum: r2c.make_output_vec(),
            r2c,
            magnitudes: vec![0.0; bins],
            previous_magnitudes: vec![0.0; bins],
            current: vec![0.0; dimension],
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.feed.sample_rate()
    }

    fn ingest(&mut self) -> usize {
        let mut total = 0;
        loop {
            let n = self.feed.pull(&mut self.scratch);
            if n == 0 {
                break;
            }
            total += n;
            for &sample in &self.scratch[..n] {
                self.history.pop_front();
                self.history.push_back(sample);
            }
        }
        total
    }

    fn transform(&mut self) -> bool {
        for ((dst, src), w) in self.fft_input.iter_mut().zip(&self.history).zip(&self.window) {
            *dst = src * w;
        }
        if let Err(e) = self.r2c.process(&mut self.fft_input, &mut self.spectrum) {
            debug!("FFT failed: {}", e);
            return false;
        }
        std::mem::swap(&mut self.magnitudes, &mut self.previous_magnitudes);
        for (m, c) in self.magnitudes.iter_mut().zip(&self.spectrum) {
            *m = c.norm();
        }
        true
    }

    fn compute(&mut self) {
        let mut out = Vec::with_capacity(self.dimension);
        for kind in &self.features {
            match *kind {
                FeatureKind::Centroid => out.push(centroid(&self.magnitudes)),
                FeatureKind::Flux => out.push(flux(&self.magnitudes, &self.previous_magnitudes)),
                FeatureKind::Rms => out.push(rms(self.history.iter().copied())),
                FeatureKind::Rolloff => out.push(rolloff(&self.magnitudes, self.rolloff_fraction)),
                FeatureKind::Flatness { bands } => band_flatness(&self.magnitudes, bands, &mut out),
                FeatureKind::Zcr => out.push(zero_crossing_rate(&self.history)),
            }
        }
        self.current = out;
    }
}

impl FeatureSource for SpectralAnalyzer {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn advance(&mut self) {
        self.ingest();
        if self.transform() {
            self.compute();
        }
    }

    fn current_feature_vector(&self) -> &[f32] {
        &self.current
    }
}

/// Magnitude-weighted mean bin, normalised so Nyquist is 1
fn centroid(magnitudes: &[f32]) -> f32 {
    let total: f32 = magnitudes.iter().sum();
    if total <= 0.0 || magnitudes.len() < 2 {
        return 0.0;
    }
    let weighted: f32 = magnitudes.iter().enumerate().map(|(k, m)| k as f32 * m).sum();
    weighted / total / (magnitudes.len() - 1) as f32
}

/// Mean positive magnitude change per bin
fn flux(current: &[f32], previous: &[f32]) -> f32 {
    if current.is_empty() {
        return 0.0;
    }
    let rise: f32 = current
        .iter()
        .zip(previous)
        .map(|(c, p)| (c - p).max(0.0))
        .sum();
    rise / current.len() as f32
}

fn rms(samples: impl ExactSizeIterator<Item = f32>) -> f32 {
    let n = samples.len();
    if n == 0 {
        return 0.0;
    }
    let energy: f32 = samples.map(|s| s * s).sum();
    (energy / n as f32).sqrt()
}

/// Normalised bin below which `fraction` of the spectral energy lies
fn rolloff(magnitudes: &[f32], fraction: f32) -> f32 {
    let total: f32 = magnitudes.iter().map(|m| m * m).sum();
    if total <= 0.0 || magnitudes.len() < 2 {
        return 0.0;
    }
    let threshold = total * fraction;
    let mut cumulative = 0.0;
    for (k, m) in magnitudes.iter().enumerate() {
        cumulative += m * m;
        if cumulative >= threshold {
            return k as f32 / (magnitudes.len() - 1) as f32;
        }
    }
    1.0
}

/// Geometric over arithmetic mean of the power in `bands` equal slices of the
/// spectrum (DC excluded). Silent bands read 0.
fn band_flatness(magnitudes: &[f32], bands: usize, out: &mut Vec<f32>) {
    let bins = magnitudes.get(1..).unwrap_or(&[]);
    for band in 0..bands {
        let start = band * bins.len() / bands;
        let end = (band + 1) * bins.len() / bands;
        let slice = &bins[start..end];
        if slice.is_empty() {
            out.push(0.0);
            continue;
        }
        let n = slice.len() as f32;
        let arithmetic = slice.iter().map(|m| m * m).sum::<f32>() / n;
        if arithmetic < FLATNESS_EPSILON {
            out.push(0.0);
            continue;
        }
        let log_mean = slice
            .iter()
            .map(|m| (m * m + FLATNESS_EPSILON).ln())
            .sum::<f32>()
            / n;
        out.push((log_mean.exp() / arithmetic).min(1.0));
    }
}

/// Fraction of adjacent sample pairs that change sign
fn zero_crossing_rate(samples: &VecDeque<f32>) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .iter()
        .zip(samples.iter().skip(1))
        .filter(|(a, b)| (**a >= 0.0) != (**b >= 0.0))
        .count();
    crossings as f32 / (samples.len() - 1) as f32
}
