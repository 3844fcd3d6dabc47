//! Feature aggregation
//!
//! Collects one instantaneous feature frame per hop and reduces every
//! `frames_per_window` frames to their per-dimension mean. Only the mean is
//! ever queried against a corpus.

use crate::error::{MosaicError, Result};

pub struct FeatureAggregator {
    dim: usize,
    frames_per_window: usize,
    /// frames_per_window × dim, row-major
    window: Vec<f32>,
    filled: usize,
}

impl FeatureAggregator {
    pub fn new(dim: usize, frames_per_window: usize) -> Self {
        let frames_per_window = frames_per_window.max(1);
        Self {
            dim,
            frames_per_window,
            window: vec![0.0; dim * frames_per_window],
            filled: 0,
        }
    }

    /// Store the next hop's frame. Returns the window mean once the window is
    /// full, after which accumulation starts over.
    pub fn push(&mut self, frame: &[f32]) -> Result<Option<Vec<f32>>> {
        if frame.len() != self.dim {
            return Err(MosaicError::DimensionMismatch {
                expected: self.dim,
                actual: frame.len(),
            });
        }

        let start = self.filled * self.dim;
        self.window[start..start + self.dim].copy_from_slice(frame);
        self.filled += 1;

        if self.filled < self.frames_per_window {
            return Ok(None);
        }

        self.filled = 0;
        Ok(Some(self.mean()))
    }

    fn mean(&self) -> Vec<f32> {
        let mut sums = vec![0.0f64; self.dim];
        for row in self.window.chunks_exact(self.dim.max(1)) {
            for (sum, value) in sums.iter_mut().zip(row) {
                *sum += *value as f64;
            }
        }
        let n = self.frames_per_window as f64;
        sums.into_iter().map(|s| (s / n) as f32).collect()
    }

    /// Frames stored in the current, incomplete window
    pub fn pending(&self) -> usize {
        self.filled
    }
}
