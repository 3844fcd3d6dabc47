//! Source audio loading for fragment playback
//!
//! Tracks are WAV files addressed by track index through the [`TrackTable`].
//! Short tracks are decoded once and cached; tracks longer than the preload
//! limit are streamed, decoding only the chunk a fragment needs.
//!
//! ```no_run
//! use mosaic::config::TrackEntry;
//! use mosaic::corpus::TrackTable;
//! use mosaic::sample_loader::SourceBank;
//!
//! let tracks = TrackTable::new(&[TrackEntry { name: "cello".into(), file: "cello.wav".into() }]);
//! let bank = SourceBank::new(tracks, 300.0);
//! let slice = bank.fetch(0, 12.5, 0.4).unwrap();
//! println!("{} frames from {}", slice.sample.len(), slice.start_frame);
//! ```

use std::collections::HashMap;
use std::io::{Read, Seek};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::corpus::TrackTable;
use crate::error::{MosaicError, Result};

/// Decoded audio; `right` is `None` for mono sources
#[derive(Clone, Debug)]
pub struct StereoSample {
    pub left: Vec<f32>,
    pub right: Option<Vec<f32>>,
    pub sample_rate: u32,
}

impl StereoSample {
    pub fn mono(data: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            left: data,
            right: None,
            sample_rate,
        }
    }

    pub fn stereo(left: Vec<f32>, right: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            left,
            right: Some(right),
            sample_rate,
        }
    }

    pub fn is_stereo(&self) -> bool {
        self.right.is_some()
    }

    /// Frames (samples per channel)
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Linearly interpolated (left, right) at a fractional frame position;
    /// mono sources return the same value on both sides
    pub fn get_interpolated(&self, position: f64) -> (f32, f32) {
        if position < 0.0 {
            return (0.0, 0.0);
        }
        let idx = position as usize;
        if idx >= self.left.len() {
            return (0.0, 0.0);
        }
        let frac = (position - idx as f64) as f32;

        let lerp = |data: &[f32]| {
            let next = data.get(idx + 1).copied().unwrap_or(0.0);
            data[idx] * (1.0 - frac) + next * frac
        };

        let left = lerp(self.left.as_slice());
        let right = match &self.right {
            Some(right) if idx < right.len() => lerp(right.as_slice()),
            Some(_) => 0.0,
            None => left,
        };
        (left, right)
    }
}

/// A playable source plus the frame a fragment starts at
#[derive(Clone, Debug)]
pub struct SourceSlice {
    pub sample: Arc<StereoSample>,
    pub start_frame: f64,
}

/// Resolves track indices to decoded audio
pub struct SourceBank {
    tracks: TrackTable,
    max_preload_secs: f32,
    cache: Mutex<HashMap<usize, Arc<StereoSample>>>,
}

impl SourceBank {
    pub fn new(tracks: TrackTable, max_preload_secs: f32) -> Self {
        Self {
            tracks,
            max_preload_secs,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn tracks(&self) -> &TrackTable {
        &self.tracks
    }

    /// Decode every track short enough to cache. Failures are reported and skipped.
    pub fn preload(&self) -> usize {
        let mut loaded = 0;
        for track in 0..self.tracks.len() {
            match self.load_cached(track) {
                Ok(Some(sample)) => {
                    loaded += 1;
                    info!(
                        "Cached track {} ({:.1}s, {} Hz{})",
                        self.tracks.name(track).unwrap_or("?"),
                        sample.len() as f64 / sample.sample_rate as f64,
                        sample.sample_rate,
                        if sample.is_stereo() { ", stereo" } else { "" }
                    );
                }
                Ok(None) => debug!("Track {} will be streamed", track),
                Err(e) => warn!("{}", e),
            }
        }
        loaded
    }

    /// Cached slice only; never touches the disk
    pub fn cached(&self, track: usize, start_secs: f64) -> Option<SourceSlice> {
        let cache = self.cache.lock().ok()?;
        let sample = cache.get(&track)?.clone();
        let start_frame = start_secs * sample.sample_rate as f64;
        if start_frame >= sample.len() as f64 {
            return None;
        }
        Some(SourceSlice { sample, start_frame })
    }

    /// Source audio for a fragment starting at `start_secs` and lasting at
    /// most `span_secs`
    pub fn fetch(&self, track: usize, start_secs: f64, span_secs: f64) -> Result<SourceSlice> {
        let unresolved = |reason: String| MosaicError::SourceResolution { track, reason };

        if let Some(slice) = self.cached(track, start_secs) {
            return Ok(slice);
        }

        if let Some(sample) = self.load_cached(track)? {
            let start_frame = start_secs * sample.sample_rate as f64;
            if start_frame >= sample.len() as f64 {
                return Err(unresolved(format!(
                    "offset {:.3}s beyond end of source",
                    start_secs
                )));
            }
            return Ok(SourceSlice { sample, start_frame });
        }

        let path = self
            .tracks
            .file(track)
            .ok_or_else(|| unresolved("no such track".to_string()))?;
        let mut reader =
            hound::WavReader::open(path).map_err(|e| unresolved(format!("{}: {}", path.display(), e)))?;
        let rate = reader.spec().sample_rate;
        let start = (start_secs * rate as f64) as u32;
        if start >= reader.duration() {
            return Err(unresolved(format!(
                "offset {:.3}s beyond end of source",
                start_secs
            )));
        }
        reader
            .seek(start)
            .map_err(|e| unresolved(format!("seek failed: {}", e)))?;
        let frames = (span_secs * rate as f64).ceil() as usize;
        let chunk = decode(&mut reader, Some(frames)).map_err(|e| unresolved(e.to_string()))?;

        Ok(SourceSlice {
            sample: Arc::new(chunk),
            start_frame: 0.0,
        })
    }

    /// Decode and cache a whole track, or `None` if it exceeds the preload limit
    fn load_cached(&self, track: usize) -> Result<Option<Arc<StereoSample>>> {
        let unresolved = |reason: String| MosaicError::SourceResolution { track, reason };

        if let Some(sample) = self.cache.lock().ok().and_then(|c| c.get(&track).cloned()) {
            return Ok(Some(sample));
        }

        let path = self
            .tracks
            .file(track)
            .ok_or_else(|| unresolved("no such track".to_string()))?;
        let mut reader =
            hound::WavReader::open(path).map_err(|e| unresolved(format!("{}: {}", path.display(), e)))?;
        let spec = reader.spec();
        let seconds = reader.duration() as f64 / spec.sample_rate as f64;
        if seconds > self.max_preload_secs as f64 {
            return Ok(None);
        }

        let sample = Arc::new(decode(&mut reader, None).map_err(|e| unresolved(e.to_string()))?);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(track, sample.clone());
        }
        Ok(Some(sample))
    }
}

/// Decode from the reader's current position, up to `max_frames` frames
pub(crate) fn decode<R: Read + Seek>(
    reader: &mut hound::WavReader<R>,
    max_frames: Option<usize>,
) -> Result<StereoSample> {
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;
    let limit = max_frames.map_or(usize::MAX, |f| f.saturating_mul(channels));

    let raw: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .take(limit)
            .collect::<std::result::Result<Vec<f32>, hound::Error>>()?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .take(limit)
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<f32>, hound::Error>>()?
        }
    };

    // Deinterleave: L R L R -> (L L, R R); channels beyond two are dropped
    let sample = if channels >= 2 {
        let frames = raw.len() / channels;
        let mut left = Vec::with_capacity(frames);
        let mut right = Vec::with_capacity(frames);
        for frame in raw.chunks_exact(channels) {
            left.push(frame[0]);
            right.push(frame[1]);
        }
        StereoSample::stereo(left, right, spec.sample_rate)
    } else {
        StereoSample::mono(raw, spec.sample_rate)
    };

    Ok(sample)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackEntry;
    use std::path::Path;

    fn write_ramp(path: &Path, frames: usize, channels: u16, rate: u32) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            for c in 0..channels {
                let value = if c == 0 { i as i16 } else { -(i as i16) };
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    fn bank(dir: &Path, max_preload_secs: f32) -> SourceBank {
        let tracks = TrackTable::new(&[
            TrackEntry { name: "ramp".into(), file: dir.join("ramp.wav") },
            TrackEntry { name: "missing".into(), file: dir.join("missing.wav") },
        ]);
        SourceBank::new(tracks, max_preload_secs)
    }

    #[test]
    fn test_interpolation() {
        let sample = StereoSample::mono(vec![0.0, 1.0, 0.0], 10);
        assert_eq!(sample.get_interpolated(0.5), (0.5, 0.5));
        assert_eq!(sample.get_interpolated(3.0), (0.0, 0.0));
        let stereo = StereoSample::stereo(vec![1.0, 1.0], vec![-1.0, -1.0], 10);
        assert_eq!(stereo.get_interpolated(0.0), (1.0, -1.0));
    }

    #[test]
    fn test_fetch_cached_offset() {
        let dir = tempfile::tempdir().unwrap();
        write_ramp(&dir.path().join("ramp.wav"), 1000, 1, 100);
        let bank = bank(dir.path(), 60.0);

        let slice = bank.fetch(0, 2.5, 1.0).unwrap();
        assert_eq!(slice.start_frame, 250.0);
        assert_eq!(slice.sample.len(), 1000);
        assert!(bank.cached(0, 0.0).is_some());
    }

    #[test]
    fn test_fetch_streams_long_tracks() {
        let dir = tempfile::tempdir().unwrap();
        write_ramp(&dir.path().join("ramp.wav"), 1000, 2, 100);
        let bank = bank(dir.path(), 1.0);

        let slice = bank.fetch(0, 5.0, 0.5).unwrap();
        assert_eq!(slice.start_frame, 0.0);
        assert_eq!(slice.sample.len(), 50);
        assert!(slice.sample.is_stereo());
        let expected = 500.0 / 32768.0;
        assert!((slice.sample.left[0] - expected).abs() < 1e-6);
        assert!(bank.cached(0, 5.0).is_none());
    }

    #[test]
    fn test_missing_source_is_resolution_error() {
        let dir = tempfile::tempdir().unwrap();
        let bank = bank(dir.path(), 60.0);
        assert!(matches!(
            bank.fetch(1, 0.0, 1.0),
            Err(MosaicError::SourceResolution { track: 1, .. })
        ));
        assert!(matches!(
            bank.fetch(7, 0.0, 1.0),
            Err(MosaicError::SourceResolution { track: 7, .. })
        ));
    }

    #[test]
    fn test_offset_beyond_end() {
        let dir = tempfile::tempdir().unwrap();
        write_ramp(&dir.path().join("ramp.wav"), 100, 1, 100);
        let bank = bank(dir.path(), 60.0);
        assert!(bank.fetch(0, 2.0, 0.1).is_err());
    }

    #[test]
    fn test_preload_counts_cached_tracks() {
        let dir = tempfile::tempdir().unwrap();
        write_ramp(&dir.path().join("ramp.wav"), 100, 1, 100);
        let bank = bank(dir.path(), 60.0);
        assert_eq!(bank.preload(), 1);
    }
}
