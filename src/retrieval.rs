//! Fragment selection
//!
//! Turns one aggregated feature vector plus the current control snapshot into
//! the id of the fragment to play next.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::control::{ControlState, Mode};
use crate::corpus::{Corpus, FragmentId};
use crate::error::Result;

pub struct RetrievalPolicy<R = StdRng> {
    k: usize,
    previous: Option<FragmentId>,
    rng: R,
}

impl RetrievalPolicy<StdRng> {
    /// Policy with an entropy-seeded RNG, or a fixed seed for reproducible runs
    pub fn new(k: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(k, rng)
    }
}

impl<R: Rng> RetrievalPolicy<R> {
    pub fn with_rng(k: usize, rng: R) -> Self {
        Self {
            k: k.max(1),
            previous: None,
            rng,
        }
    }

    /// Pick the fragment for this cycle. `None` when the corpus has nothing to offer.
    pub fn select(
        &mut self,
        state: &ControlState,
        feature_mean: &[f32],
        corpus: &Corpus,
    ) -> Result<Option<FragmentId>> {
        let selected = match state.mode {
            Mode::Responsive => self.nearest(feature_mean, corpus)?,
            Mode::Freeze => match state.frozen_fragment.or(self.previous) {
                Some(id) => Some(id),
                // Nothing played yet: take one match and hold it from then on
                None => self.nearest(feature_mean, corpus)?,
            },
            Mode::Sequential => {
                if corpus.is_empty() {
                    None
                } else {
                    Some(self.previous.map_or(0, |prev| (prev + 1) % corpus.len()))
                }
            }
        };

        if selected.is_some() {
            self.previous = selected;
        }
        Ok(selected)
    }

    fn nearest(&mut self, feature_mean: &[f32], corpus: &Corpus) -> Result<Option<FragmentId>> {
        let candidates = corpus.search(feature_mean, self.k)?;
        Ok(candidates.choose(&mut self.rng).copied())
    }

    /// Continue from `id`, e.g. when sequential playback should resume mid-corpus
    pub fn set_previous(&mut self, id: Option<FragmentId>) {
        self.previous = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{FeatureMatrix, Fragment};

    fn corpus(points: &[f32]) -> Corpus {
        let mut features = FeatureMatrix::new(1);
        let mut fragments = Vec::new();
        for (id, p) in points.iter().enumerate() {
            features.push_row(&[*p]).unwrap();
            fragments.push(Fragment { id, track: 0, start_secs: id as f64 });
        }
        Corpus::new("test", fragments, features)
    }

    fn state(mode: Mode) -> ControlState {
        ControlState { mode, ..ControlState::default() }
    }

    #[test]
    fn test_sequential_wraps() {
        let corpus = corpus(&[0.0, 1.0, 2.0]);
        let mut policy = RetrievalPolicy::new(2, Some(1));
        policy.set_previous(Some(2));
        let seq = state(Mode::Sequential);
        assert_eq!(policy.select(&seq, &[0.0], &corpus).unwrap(), Some(0));
        assert_eq!(policy.select(&seq, &[0.0], &corpus).unwrap(), Some(1));
        assert_eq!(policy.select(&seq, &[0.0], &corpus).unwrap(), Some(2));
        assert_eq!(policy.select(&seq, &[0.0], &corpus).unwrap(), Some(0));
    }

    #[test]
    fn test_sequential_starts_at_zero() {
        let corpus = corpus(&[0.0, 1.0]);
        let mut policy = RetrievalPolicy::new(2, Some(1));
        assert_eq!(policy.select(&state(Mode::Sequential), &[5.0], &corpus).unwrap(), Some(0));
    }

    #[test]
    fn test_freeze_holds_id() {
        let corpus = corpus(&[0.0, 1.0, 2.0, 3.0]);
        let mut policy = RetrievalPolicy::new(2, Some(3));
        let frozen = ControlState {
            mode: Mode::Freeze,
            frozen_fragment: Some(2),
            ..ControlState::default()
        };
        for query in [0.0, 3.0, -10.0, 99.0] {
            assert_eq!(policy.select(&frozen, &[query], &corpus).unwrap(), Some(2));
        }
    }

    #[test]
    fn test_freeze_falls_back_to_previous() {
        let corpus = corpus(&[0.0, 10.0]);
        let mut policy = RetrievalPolicy::new(1, Some(3));
        assert_eq!(policy.select(&state(Mode::Responsive), &[10.0], &corpus).unwrap(), Some(1));
        assert_eq!(policy.select(&state(Mode::Freeze), &[0.0], &corpus).unwrap(), Some(1));
    }

    #[test]
    fn test_responsive_picks_among_k_nearest() {
        let corpus = corpus(&[0.0, 100.0, 1.0, 50.0]);
        let mut policy = RetrievalPolicy::new(2, Some(42));
        for _ in 0..200 {
            let id = policy.select(&state(Mode::Responsive), &[0.4], &corpus).unwrap().unwrap();
            assert!(id == 0 || id == 2, "unexpected id {}", id);
        }
    }

    #[test]
    fn test_empty_corpus_yields_nothing() {
        let corpus = Corpus::empty("empty", 1);
        let mut policy = RetrievalPolicy::new(2, Some(1));
        for mode in [Mode::Responsive, Mode::Freeze, Mode::Sequential] {
            assert_eq!(policy.select(&state(mode), &[0.0], &corpus).unwrap(), None);
        }
    }
}
