//! Voice scheduling
//!
//! Every retrieval cycle hands one fragment to [`VoiceScheduler::render`],
//! which claims the next voice in cyclic order and spawns a task that opens
//! the voice, holds it for `2 × window − release`, then releases it. Render
//! tasks run concurrently, so consecutive fragments overlap and crossfade.
//!
//! Voice claims never check whether the voice is still sounding. When the
//! cursor wraps onto a busy voice, that voice is taken over; the earlier task
//! keeps running but its release no longer applies (see [`VoiceBank::release`]).
//! Each claim carries a ticket, so a render whose source took longer to
//! decode than a later render on the same voice is dropped instead of
//! starting over it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::CycleTiming;
use crate::control::Rate;
use crate::corpus::{Corpus, FragmentId};
use crate::error::{MosaicError, Result};
use crate::sample_loader::{SourceBank, SourceSlice};
use crate::voice_manager::VoiceBank;

/// Extra source audio decoded beyond the nominal envelope length
const SPAN_MARGIN_SECS: f64 = 0.25;

/// A voice handed to one render, with the ticket ordering it against other claims
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceClaim {
    pub voice: usize,
    pub ticket: u64,
}

pub struct VoiceScheduler {
    bank: Arc<VoiceBank>,
    sources: Arc<SourceBank>,
    timing: CycleTiming,
    cursor: AtomicUsize,
}

impl VoiceScheduler {
    pub fn new(bank: Arc<VoiceBank>, sources: Arc<SourceBank>, timing: CycleTiming) -> Self {
        Self {
            bank,
            sources,
            timing,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn bank(&self) -> &Arc<VoiceBank> {
        &self.bank
    }

    pub fn timing(&self) -> CycleTiming {
        self.timing
    }

    /// Number of render calls made so far
    pub fn renders(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Claim the next voice. Concurrent callers always get distinct counter
    /// values, so the j-th claim is voice `j mod M` with ticket `j + 1`.
    pub fn claim_voice(&self) -> VoiceClaim {
        let j = self.cursor.fetch_add(1, Ordering::AcqRel);
        let claim = VoiceClaim {
            voice: j % self.bank.len(),
            ticket: j as u64 + 1,
        };
        self.bank.claim(claim.voice, claim.ticket);
        claim
    }

    /// Start playing `id` from `corpus` on the next voice without waiting for it
    pub fn render(self: &Arc<Self>, corpus: Arc<Corpus>, id: FragmentId, rate: Rate) -> JoinHandle<()> {
        let claim = self.claim_voice();
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = scheduler.play(claim, &corpus, id, rate).await {
                debug!("Render of fragment {} on voice {} aborted: {}", id, claim.voice, e);
            }
        })
    }

    async fn play(&self, claim: VoiceClaim, corpus: &Corpus, id: FragmentId, rate: Rate) -> Result<()> {
        let voice = claim.voice;
        let Some(fragment) = corpus.fragment(id).copied() else {
            debug!("Fragment {} not in corpus '{}'", id, corpus.name());
            return Ok(());
        };

        let slice = self.resolve(fragment.track, fragment.start_secs, rate).await?;

        let attack = self.timing.attack.as_secs_f32();
        let Some(generation) = self.bank.start(voice, claim.ticket, slice, rate.factor(), attack) else {
            debug!("Voice {} claimed by a newer render; fragment {} dropped", voice, id);
            return Ok(());
        };
        debug!(
            "Voice {} <- fragment {} (track {}, {:.3}s)",
            voice, id, fragment.track, fragment.start_secs
        );

        tokio::time::sleep(self.timing.hold()).await;
        if !self.bank.release(voice, generation, self.timing.release.as_secs_f32()) {
            debug!("Voice {} was reassigned before release", voice);
        }
        tokio::time::sleep(self.timing.release).await;
        Ok(())
    }

    /// Cached sources are used directly; anything else is decoded off the runtime
    async fn resolve(&self, track: usize, start_secs: f64, rate: Rate) -> Result<SourceSlice> {
        if let Some(slice) = self.sources.cached(track, start_secs) {
            return Ok(slice);
        }

        let span = self.span_secs(rate);
        let sources = Arc::clone(&self.sources);
        tokio::task::spawn_blocking(move || sources.fetch(track, start_secs, span))
            .await
            .map_err(|e| MosaicError::SourceResolution {
                track,
                reason: e.to_string(),
            })?
    }

    /// Source seconds consumed by one envelope at `rate`
    fn span_secs(&self, rate: Rate) -> f64 {
        let envelope = (self.timing.window * 2).as_secs_f64();
        envelope * rate.factor() as f64 + SPAN_MARGIN_SECS
    }
}

impl std::fmt::Debug for VoiceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceScheduler")
            .field("voices", &self.bank.len())
            .field("renders", &self.renders())
            .field("hold", &self.timing.hold())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::TrackTable;
    use std::time::Duration;

    fn scheduler(voices: usize) -> Arc<VoiceScheduler> {
        let bank = Arc::new(VoiceBank::new(voices, 0.5, 1.0, 100));
        let sources = Arc::new(SourceBank::new(TrackTable::new(&[]), 10.0));
        let timing = CycleTiming {
            hop: Duration::from_millis(10),
            window: Duration::from_millis(80),
            attack: Duration::from_millis(10),
            release: Duration::from_millis(50),
        };
        Arc::new(VoiceScheduler::new(bank, sources, timing))
    }

    #[test]
    fn test_claims_cycle_through_pool() {
        let s = scheduler(3);
        let claims: Vec<_> = (0..7).map(|_| s.claim_voice()).collect();
        let voices: Vec<_> = claims.iter().map(|c| c.voice).collect();
        let tickets: Vec<_> = claims.iter().map(|c| c.ticket).collect();
        assert_eq!(voices, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(tickets, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(s.renders(), 7);
    }

    #[test]
    fn test_concurrent_claims_are_distinct() {
        let s = scheduler(4);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || (0..100).map(|_| s.claim_voice().voice).collect::<Vec<_>>())
            })
            .collect();
        let mut counts = [0usize; 4];
        for h in handles {
            for v in h.join().unwrap() {
                counts[v] += 1;
            }
        }
        assert_eq!(counts, [200; 4]);
    }

    #[test]
    fn test_envelope_length_is_two_windows() {
        let s = scheduler(1);
        let timing = s.timing();
        assert_eq!(timing.hold() + timing.release, Duration::from_millis(160));
        assert_eq!(s.timing().hold(), Duration::from_millis(110));
    }

    #[tokio::test]
    async fn test_unresolvable_fragment_aborts_quietly() {
        let s = scheduler(2);
        let corpus = Arc::new(Corpus::empty("none", 1));
        s.render(corpus, 3, Rate::Normal).await.unwrap();
        // The voice was still claimed; nothing started on it
        assert_eq!(s.renders(), 1);
        assert_eq!(s.bank().status(0).unwrap().generation, 0);
    }
}
