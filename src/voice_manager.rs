//! Voice bank - the fixed pool of fragment playback voices
//!
//! Voices are configured by render tasks and mixed by the audio callback.
//! Each voice sits behind its own mutex; the callback only ever `try_lock`s,
//! so a voice being reconfigured is skipped for one block instead of
//! stalling the output.

use std::f32::consts::FRAC_PI_4;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::envelope::{EnvelopeState, GateEnvelope};
use crate::sample_loader::{SourceSlice, StereoSample};

/// A single voice that plays one fragment
pub struct Voice {
    source: Option<Arc<StereoSample>>,
    position: f64,
    /// Source frames advanced per output frame
    increment: f64,
    /// Equal-power gains for this voice's fixed pan position
    gains: (f32, f32),
    envelope: GateEnvelope,
    /// Bumped on every start; stale release requests compare against it
    generation: u64,
    /// Newest claim ticket issued for this voice
    latest_claim: u64,
}

impl Voice {
    fn new(pan: f32) -> Self {
        let angle = (pan.clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
        Self {
            source: None,
            position: 0.0,
            increment: 1.0,
            gains: (angle.cos(), angle.sin()),
            envelope: GateEnvelope::new(),
            generation: 0,
            latest_claim: 0,
        }
    }

    fn start(&mut self, slice: SourceSlice, rate: f32, output_rate: f32, attack_secs: f32) -> u64 {
        self.increment = rate as f64 * slice.sample.sample_rate as f64 / output_rate as f64;
        self.position = slice.start_frame;
        self.source = Some(slice.sample);
        self.envelope.open(attack_secs, output_rate);
        self.generation += 1;
        self.generation
    }

    /// Process one frame of audio
    fn process(&mut self) -> (f32, f32) {
        let Some(source) = &self.source else {
            return (0.0, 0.0);
        };

        if self.position >= source.len() as f64 {
            // Source ran out before the envelope closed
            self.source = None;
            self.envelope.kill();
            return (0.0, 0.0);
        }

        let (left, right) = source.get_interpolated(self.position);
        let level = self.envelope.process();
        self.position += self.increment;

        if !self.envelope.is_active() {
            self.source = None;
        }

        (left * level * self.gains.0, right * level * self.gains.1)
    }
}

/// Observable state of one voice
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceStatus {
    pub generation: u64,
    pub envelope: EnvelopeState,
    pub has_source: bool,
    pub position: f64,
}

/// Manages a fixed pool of voices
pub struct VoiceBank {
    voices: Vec<Mutex<Voice>>,
    gain: f32,
    output_rate: AtomicU32,
}

impl VoiceBank {
    /// Pool of `count` voices spread symmetrically across the stereo field
    pub fn new(count: usize, pan_spread: f32, gain: f32, output_rate: u32) -> Self {
        let count = count.max(1);
        let voices = (0..count)
            .map(|i| {
                let pan = if count == 1 {
                    0.0
                } else {
                    pan_spread * (2.0 * i as f32 / (count - 1) as f32 - 1.0)
                };
                Mutex::new(Voice::new(pan))
            })
            .collect();

        Self {
            voices,
            gain,
            output_rate: AtomicU32::new(output_rate),
        }
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    /// Set by the output stream once the device rate is known
    pub fn set_output_rate(&self, rate: u32) {
        self.output_rate.store(rate, Ordering::Release);
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate.load(Ordering::Acquire)
    }

    /// Record that the render holding `ticket` owns `index`. Tickets only
    /// move forward, whatever order concurrent claims land in.
    pub fn claim(&self, index: usize, ticket: u64) {
        if let Some(Ok(mut voice)) = self.voices.get(index).map(|v| v.lock()) {
            voice.latest_claim = voice.latest_claim.max(ticket);
        }
    }

    /// Point a voice at a new fragment and open its envelope. Whatever the
    /// voice was playing is replaced. Returns the voice's new generation, or
    /// `None` if a render with a newer ticket has claimed the voice since.
    pub fn start(
        &self,
        index: usize,
        ticket: u64,
        slice: SourceSlice,
        rate: f32,
        attack_secs: f32,
    ) -> Option<u64> {
        let output_rate = self.output_rate() as f32;
        let mut voice = self.voices.get(index)?.lock().ok()?;
        if ticket < voice.latest_claim {
            return None;
        }
        voice.latest_claim = ticket;
        Some(voice.start(slice, rate, output_rate, attack_secs))
    }

    /// Begin the release of `index` if it still plays the fragment started as
    /// `generation`. Returns false when the voice has since been reused.
    pub fn release(&self, index: usize, generation: u64, release_secs: f32) -> bool {
        let output_rate = self.output_rate() as f32;
        let Some(Ok(mut voice)) = self.voices.get(index).map(|v| v.lock()) else {
            return false;
        };
        if voice.generation != generation {
            return false;
        }
        voice.envelope.release(release_secs, output_rate);
        true
    }

    pub fn status(&self, index: usize) -> Option<VoiceStatus> {
        let voice = self.voices.get(index)?.lock().ok()?;
        Some(VoiceStatus {
            generation: voice.generation,
            envelope: voice.envelope.state(),
            has_source: voice.source.is_some(),
            position: voice.position,
        })
    }

    pub fn active_voice_count(&self) -> usize {
        self.voices
            .iter()
            .filter_map(|v| v.lock().ok())
            .filter(|v| v.source.is_some())
            .count()
    }

    /// Mix all voices into `left`/`right`, overwriting their contents
    pub fn mix_block(&self, left: &mut [f32], right: &mut [f32]) {
        left.fill(0.0);
        right.fill(0.0);

        for slot in &self.voices {
            let Ok(mut voice) = slot.try_lock() else {
                continue;
            };
            if voice.source.is_none() {
                continue;
            }
            for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                let (vl, vr) = voice.process();
                *l += vl;
                *r += vr;
            }
        }

        // Soft clipping to keep overlapping voices in range
        for sample in left.iter_mut().chain(right.iter_mut()) {
            *sample = (*sample * self.gain).tanh();
        }
    }

    /// Silence every voice
    pub fn reset(&self) {
        for slot in &self.voices {
            if let Ok(mut voice) = slot.lock() {
                voice.source = None;
                voice.envelope.kill();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice(frames: usize, value: f32) -> SourceSlice {
        SourceSlice {
            sample: Arc::new(StereoSample::mono(vec![value; frames], 100)),
            start_frame: 0.0,
        }
    }

    #[test]
    fn test_pan_spread() {
        let bank = VoiceBank::new(3, 1.0, 1.0, 100);
        let gains: Vec<_> = bank.voices.iter().map(|v| v.lock().unwrap().gains).collect();
        assert!(gains[0].0 > 0.99 && gains[0].1 < 0.01);
        assert!((gains[1].0 - gains[1].1).abs() < 1e-6);
        assert!(gains[2].1 > 0.99 && gains[2].0 < 0.01);
    }

    #[test]
    fn test_stale_release_is_ignored() {
        let bank = VoiceBank::new(1, 0.0, 1.0, 100);
        let first = bank.start(0, 1, slice(100, 0.5), 1.0, 0.0).unwrap();
        let second = bank.start(0, 2, slice(100, 0.5), 1.0, 0.0).unwrap();
        assert_eq!(second, first + 1);

        assert!(!bank.release(0, first, 0.1));
        assert_ne!(bank.status(0).unwrap().envelope, EnvelopeState::Release);
        assert!(bank.release(0, second, 0.1));
        assert_eq!(bank.status(0).unwrap().envelope, EnvelopeState::Release);
    }

    #[test]
    fn test_older_claim_cannot_start_over_newer() {
        let bank = VoiceBank::new(1, 0.0, 1.0, 100);
        bank.claim(0, 1);
        bank.claim(0, 3);
        bank.claim(0, 2);

        // The newer render starts first; the older one finishes decoding late
        let newer = SourceSlice { start_frame: 40.0, ..slice(100, 0.5) };
        let generation = bank.start(0, 3, newer, 1.0, 0.0).unwrap();
        assert_eq!(bank.start(0, 1, slice(100, 0.5), 1.0, 0.0), None);

        let status = bank.status(0).unwrap();
        assert_eq!(status.generation, generation);
        assert_eq!(status.position, 40.0);
        assert!(bank.release(0, generation, 0.1));
    }

    #[test]
    fn test_mix_plays_and_finishes() {
        let bank = VoiceBank::new(1, 0.0, 1.0, 100);
        let generation = bank.start(0, 1, slice(1000, 0.5), 1.0, 0.0).unwrap();
        let mut left = vec![0.0; 10];
        let mut right = vec![0.0; 10];
        bank.mix_block(&mut left, &mut right);
        assert!(left[5] > 0.0 && right[5] > 0.0);
        assert_eq!(bank.active_voice_count(), 1);

        bank.release(0, generation, 0.05);
        bank.mix_block(&mut left, &mut right);
        bank.mix_block(&mut left, &mut right);
        assert_eq!(bank.active_voice_count(), 0);
        assert!(!bank.status(0).unwrap().has_source);
    }

    #[test]
    fn test_rate_scales_increment() {
        let bank = VoiceBank::new(1, 0.0, 1.0, 200);
        bank.start(0, 1, slice(1000, 0.5), 2.0, 0.0).unwrap();
        let mut left = vec![0.0; 10];
        let mut right = vec![0.0; 10];
        bank.mix_block(&mut left, &mut right);
        // 2x rate at half the output rate: one source frame per output frame
        assert!((bank.status(0).unwrap().position - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_source_exhaustion_frees_voice() {
        let bank = VoiceBank::new(1, 0.0, 1.0, 100);
        bank.start(0, 1, slice(4, 0.5), 1.0, 0.0).unwrap();
        let mut left = vec![0.0; 8];
        let mut right = vec![0.0; 8];
        bank.mix_block(&mut left, &mut right);
        assert_eq!(left[6], 0.0);
        assert_eq!(bank.active_voice_count(), 0);
    }
}
