//! Analysis input feeds
//!
//! A [`SampleFeed`] delivers mono samples as they become available in real
//! time. The live feed captures a cpal input device into a lock-free ring
//! buffer; the file feed plays a WAV file at its own rate and loops it.

use std::path::Path;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapRb};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::error::{MosaicError, Result};
use crate::sample_loader::decode;

/// Seconds of captured audio the ring buffer can hold
const CAPTURE_BUFFER_SECS: usize = 2;

/// Source of mono analysis samples
pub trait SampleFeed: Send {
    fn sample_rate(&self) -> u32;

    /// Copy samples that arrived since the last call into `out`; returns the
    /// count written. Never blocks.
    fn pull(&mut self, out: &mut [f32]) -> usize;
}

/// Live input from the default capture device
pub struct CaptureFeed {
    consumer: HeapCons<f32>,
    sample_rate: u32,
}

impl CaptureFeed {
    /// Start capturing. The returned stream must be kept alive for as long as
    /// the feed is read.
    pub fn open() -> Result<(Self, cpal::Stream)> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| MosaicError::AudioDevice("no audio input device found".into()))?;
        info!(
            "Input device: {}",
            device.name().unwrap_or_else(|_| "<unnamed>".into())
        );

        let config = device
            .default_input_config()
            .map_err(|e| MosaicError::AudioDevice(e.to_string()))?;
        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;

        let ring = HeapRb::<f32>::new(sample_rate as usize * CAPTURE_BUFFER_SECS);
        let (producer, consumer) = ring.split();

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => build_capture::<f32>(&device, &config.into(), producer, channels),
            cpal::SampleFormat::I16 => build_capture::<i16>(&device, &config.into(), producer, channels),
            cpal::SampleFormat::U16 => build_capture::<u16>(&device, &config.into(), producer, channels),
            other => Err(MosaicError::AudioDevice(format!(
                "unsupported input sample format {:?}",
                other
            ))),
        }?;
        stream
            .play()
            .map_err(|e| MosaicError::AudioDevice(e.to_string()))?;
        info!("Capturing input at {} Hz, {} channels", sample_rate, channels);

        Ok((Self { consumer, sample_rate }, stream))
    }
}

fn build_capture<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: ringbuf::HeapProd<f32>,
    channels: usize,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let channels = channels.max(1);
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels) {
                    let sum: f32 = frame.iter().map(|s| s.to_sample::<f32>()).sum();
                    // Overflow drops the newest samples; the analyzer only needs recent audio
                    let _ = producer.try_push(sum / channels as f32);
                }
            },
            |err| error!("Input stream error: {}", err),
            None,
        )
        .map_err(|e| MosaicError::AudioDevice(e.to_string()))
}

impl SampleFeed for CaptureFeed {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn pull(&mut self, out: &mut [f32]) -> usize {
        self.consumer.pop_slice(out)
    }
}

/// A WAV file played back in real time, looping at the end
pub struct FileFeed {
    samples: Vec<f32>,
    sample_rate: u32,
    position: usize,
    started: Option<Instant>,
    delivered: u64,
}

impl FileFeed {
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = hound::WavReader::open(path)?;
        let sample = decode(&mut reader, None)?;
        let samples = match &sample.right {
            Some(right) => sample
                .left
                .iter()
                .zip(right)
                .map(|(l, r)| (l + r) * 0.5)
                .collect(),
            None => sample.left.clone(),
        };
        if samples.is_empty() {
            return Err(MosaicError::AudioDevice(format!(
                "{} contains no audio",
                path.display()
            )));
        }
        info!(
            "Input file {} ({:.1}s at {} Hz)",
            path.display(),
            samples.len() as f64 / sample.sample_rate as f64,
            sample.sample_rate
        );
        Ok(Self::from_samples(samples, sample.sample_rate))
    }

    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            position: 0,
            started: None,
            delivered: 0,
        }
    }
}

impl SampleFeed for FileFeed {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn pull(&mut self, out: &mut [f32]) -> usize {
        if self.samples.is_empty() {
            return 0;
        }
        let started = *self.started.get_or_insert_with(Instant::now);
        let due = (started.elapsed().as_secs_f64() * self.sample_rate as f64) as u64;
        let available = due.saturating_sub(self.delivered).min(out.len() as u64) as usize;

        for slot in &mut out[..available] {
            *slot = self.samples[self.position];
            self.position = (self.position + 1) % self.samples.len();
        }
        self.delivered += available as u64;
        available
    }
}

/// Produces nothing; stands in when capture cannot start
#[derive(Debug, Default)]
pub struct SilentFeed {
    sample_rate: u32,
}

impl SilentFeed {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl SampleFeed for SilentFeed {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn pull(&mut self, _out: &mut [f32]) -> usize {
        0
    }
}

/// Live capture if possible, otherwise silence. The stream, when present,
/// must outlive the feed.
pub fn open_capture_or_silence(fallback_rate: u32) -> (Box<dyn SampleFeed>, Option<cpal::Stream>) {
    match CaptureFeed::open() {
        Ok((feed, stream)) => (Box::new(feed), Some(stream)),
        Err(e) => {
            warn!("{}; analysing silence instead", e);
            (Box::new(SilentFeed::new(fallback_rate)), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_file_feed_paces_and_loops() {
        let mut feed = FileFeed::from_samples(vec![1.0, 2.0, 3.0], 100);
        let mut out = [0.0f32; 16];
        assert_eq!(feed.pull(&mut out), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let n = feed.pull(&mut out);
        assert_eq!(n, 5);
        assert_eq!(&out[..5], &[1.0, 2.0, 3.0, 1.0, 2.0]);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(feed.pull(&mut out), 2);
        assert_eq!(&out[..2], &[3.0, 1.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_feed_respects_buffer_size() {
        let mut feed = FileFeed::from_samples(vec![0.5; 10], 1000);
        feed.pull(&mut []);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut out = [0.0f32; 8];
        assert_eq!(feed.pull(&mut out), 8);
        assert_eq!(feed.pull(&mut out), 8);
    }

    #[test]
    fn test_file_feed_downmixes_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..4 {
            writer.write_sample(1.0f32).unwrap();
            writer.write_sample(0.0f32).unwrap();
        }
        writer.finalize().unwrap();

        let feed = FileFeed::open(&path).unwrap();
        assert_eq!(feed.sample_rate(), 8000);
        assert_eq!(feed.samples, vec![0.5; 4]);
    }

    #[test]
    fn test_silent_feed() {
        let mut feed = SilentFeed::new(44100);
        let mut out = [1.0f32; 4];
        assert_eq!(feed.pull(&mut out), 0);
        assert_eq!(feed.sample_rate(), 44100);
    }
}
