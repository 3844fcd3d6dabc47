//! The analysis and retrieval loop
//!
//! One tokio task ticks at the hop rate: each tick advances the analyzer and
//! feeds its frame to the aggregator. Every completed window becomes one
//! retrieval cycle, which reads the control snapshot, picks a fragment,
//! publishes the new state and spawns a render task. The tick is the only
//! place the loop waits.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::aggregator::FeatureAggregator;
use crate::audio_analysis::FeatureSource;
use crate::config::MosaicConfig;
use crate::control::{ControlCommand, SharedControl};
use crate::corpus::{CorpusSet, FragmentId};
use crate::error::{MosaicError, Result};
use crate::osc_control::{StateListener, StateUpdate};
use crate::retrieval::RetrievalPolicy;
use crate::scheduler::VoiceScheduler;

pub struct Engine {
    source: Box<dyn FeatureSource>,
    aggregator: FeatureAggregator,
    policy: RetrievalPolicy,
    corpora: Arc<CorpusSet>,
    control: Arc<SharedControl>,
    scheduler: Arc<VoiceScheduler>,
    listeners: Vec<Box<dyn StateListener>>,
    hop: Duration,
    cycles: u64,
}

impl Engine {
    /// Wire the loop together. Every part must agree on the feature dimensionality.
    pub fn new(
        config: &MosaicConfig,
        source: Box<dyn FeatureSource>,
        corpora: Arc<CorpusSet>,
        control: Arc<SharedControl>,
        scheduler: Arc<VoiceScheduler>,
    ) -> Result<Self> {
        let dim = config.analysis.dimension();
        if source.dimension() != dim {
            return Err(MosaicError::DimensionMismatch {
                expected: dim,
                actual: source.dimension(),
            });
        }
        if let Some(corpus) = corpora.iter().find(|c| c.dim() != dim) {
            return Err(MosaicError::DimensionMismatch {
                expected: dim,
                actual: corpus.dim(),
            });
        }

        Ok(Self {
            source,
            aggregator: FeatureAggregator::new(dim, config.analysis.frames_per_window),
            policy: RetrievalPolicy::new(config.retrieval.k, config.retrieval.seed),
            corpora,
            control,
            scheduler,
            listeners: Vec::new(),
            hop: config.timing().hop,
            cycles: 0,
        })
    }

    pub fn add_listener(&mut self, listener: Box<dyn StateListener>) {
        self.listeners.push(listener);
    }

    /// Completed retrieval cycles
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// One hop: analyse, aggregate and, when a window completes, retrieve
    pub fn step(&mut self) -> Result<Option<FragmentId>> {
        self.source.advance();
        let frame = self.source.current_feature_vector();
        match self.aggregator.push(frame)? {
            Some(mean) => self.cycle(&mean),
            None => Ok(None),
        }
    }

    /// One retrieval cycle for an aggregated feature mean
    pub fn cycle(&mut self, feature_mean: &[f32]) -> Result<Option<FragmentId>> {
        self.cycles += 1;
        let state = self.control.snapshot();
        let Some(corpus) = self.corpora.get(state.corpus).cloned() else {
            return Ok(None);
        };

        let Some(id) = self.policy.select(&state, feature_mean, &corpus)? else {
            debug!("Corpus '{}' has nothing to play", corpus.name());
            return Ok(None);
        };

        self.control.record_emitted(id);
        let update = StateUpdate::new(&state, id);
        for listener in &self.listeners {
            listener.publish(&update);
        }
        self.scheduler.render(corpus, id, state.rate);
        Ok(Some(id))
    }

    /// Run until `shutdown` turns true or its sender is dropped. Only fatal
    /// errors end the loop early.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut interval = tokio::time::interval(self.hop);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Engine running, hop {:?}", self.hop);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.step() {
                        if e.is_fatal() {
                            return Err(e);
                        }
                        warn!("{}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Engine stopped after {} cycles", self.cycles);
        Ok(())
    }
}

/// Apply commands from every control surface until one asks to quit, then
/// signal shutdown
pub async fn run_control(
    mut commands: mpsc::UnboundedReceiver<ControlCommand>,
    control: Arc<SharedControl>,
    shutdown: watch::Sender<bool>,
) {
    while let Some(command) = commands.recv().await {
        if command == ControlCommand::Quit {
            info!("Quit requested");
            break;
        }
        control.apply(command);
    }
    let _ = shutdown.send(true);
}
