//! Shared control state
//!
//! Written only by the control surface, read once per aggregation cycle by the
//! engine and by each render task. Every command publishes a complete new
//! snapshot with a single atomic store, so readers never see a mode change
//! without its rate reset.

use arc_swap::ArcSwap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::corpus::FragmentId;

const NO_FRAGMENT: usize = usize::MAX;

/// Fragment selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Follow the live input through nearest-neighbour search
    #[default]
    Responsive,
    /// Repeat the fragment that was playing when freeze was engaged
    Freeze,
    /// Step through the corpus in order, ignoring the input
    Sequential,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Responsive => "responsive",
            Mode::Freeze => "freeze",
            Mode::Sequential => "play",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "responsive" => Some(Mode::Responsive),
            "freeze" => Some(Mode::Freeze),
            "play" | "sequential" => Some(Mode::Sequential),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discrete playback rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rate {
    Half,
    #[default]
    Normal,
    Double,
}

impl Rate {
    pub fn factor(&self) -> f32 {
        match self {
            Rate::Half => 0.5,
            Rate::Normal => 1.0,
            Rate::Double => 2.0,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "half" => Some(Rate::Half),
            "normal" => Some(Rate::Normal),
            "double" => Some(Rate::Double),
            _ => None,
        }
    }
}

/// One consistent view of the control state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlState {
    pub corpus: usize,
    pub mode: Mode,
    pub rate: Rate,
    /// Fragment held while in `Freeze`
    pub frozen_fragment: Option<FragmentId>,
}

impl ControlState {
    pub fn is_frozen(&self) -> bool {
        self.mode == Mode::Freeze
    }

    pub fn is_playing(&self) -> bool {
        self.mode == Mode::Sequential
    }
}

/// Named operator commands; mapping raw input to these lives in the input layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    SelectCorpus(usize),
    SetMode(Mode),
    SetRate(Rate),
    Reset,
    Quit,
}

/// Control state shared between the control task and the engine
pub struct SharedControl {
    state: ArcSwap<ControlState>,
    corpus_count: usize,
    last_emitted: AtomicUsize,
}

impl SharedControl {
    pub fn new(corpus_count: usize) -> Self {
        Self {
            state: ArcSwap::from_pointee(ControlState::default()),
            corpus_count,
            last_emitted: AtomicUsize::new(NO_FRAGMENT),
        }
    }

    pub fn snapshot(&self) -> ControlState {
        **self.state.load()
    }

    /// Record the fragment chosen by the latest cycle
    pub fn record_emitted(&self, id: FragmentId) {
        self.last_emitted.store(id, Ordering::Release);
    }

    pub fn last_emitted(&self) -> Option<FragmentId> {
        match self.last_emitted.load(Ordering::Acquire) {
            NO_FRAGMENT => None,
            id => Some(id),
        }
    }

    /// Apply a command. Returns the new snapshot, or `None` when the command
    /// was rejected or is not a state change (`Quit`).
    pub fn apply(&self, command: ControlCommand) -> Option<ControlState> {
        let current = self.snapshot();
        let next = self.transition(current, command)?;
        self.state.store(Arc::new(next));
        info!(
            "Control: corpus {} mode {} rate {}",
            next.corpus,
            next.mode,
            next.rate.factor()
        );
        Some(next)
    }

    fn transition(&self, current: ControlState, command: ControlCommand) -> Option<ControlState> {
        match command {
            ControlCommand::SelectCorpus(index) => {
                if index >= self.corpus_count {
                    warn!(
                        "Ignoring corpus {}: only {} configured",
                        index, self.corpus_count
                    );
                    return None;
                }
                Some(ControlState { corpus: index, ..current })
            }
            ControlCommand::SetMode(mode) => Some(ControlState {
                corpus: current.corpus,
                mode,
                rate: Rate::Normal,
                frozen_fragment: match mode {
                    Mode::Freeze => self.last_emitted(),
                    _ => None,
                },
            }),
            ControlCommand::SetRate(rate) => Some(ControlState { rate, ..current }),
            ControlCommand::Reset => Some(ControlState::default()),
            ControlCommand::Quit => None,
        }
    }
}
