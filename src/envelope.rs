//! Attack/release gate envelope for fragment voices
//!
//! The scheduler opens the gate, holds it, then closes it; the audio callback
//! advances the level one sample at a time.

/// Envelope state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeState {
    Idle,
    Attack,
    Open,
    Release,
}

/// Linear attack/release gate
#[derive(Debug, Clone)]
pub struct GateEnvelope {
    state: EnvelopeState,
    level: f32,
    /// Level change per sample in the current ramp
    step: f32,
}

impl Default for GateEnvelope {
    fn default() -> Self {
        Self::new()
    }
}

impl GateEnvelope {
    pub fn new() -> Self {
        Self {
            state: EnvelopeState::Idle,
            level: 0.0,
            step: 0.0,
        }
    }

    /// Start the attack ramp. The ramp begins at the current level, so
    /// retriggering a sounding voice does not click.
    pub fn open(&mut self, attack_secs: f32, sample_rate: f32) {
        let samples = (attack_secs * sample_rate).max(1.0);
        self.step = (1.0 - self.level) / samples;
        self.state = if self.step > 0.0 {
            EnvelopeState::Attack
        } else {
            EnvelopeState::Open
        };
    }

    /// Start the release ramp from wherever the level is now
    pub fn release(&mut self, release_secs: f32, sample_rate: f32) {
        if self.state == EnvelopeState::Idle {
            return;
        }
        let samples = (release_secs * sample_rate).max(1.0);
        self.step = self.level / samples;
        self.state = EnvelopeState::Release;
    }

    /// Silence immediately
    pub fn kill(&mut self) {
        self.state = EnvelopeState::Idle;
        self.level = 0.0;
        self.step = 0.0;
    }

    /// Advance one sample and return the new level
    pub fn process(&mut self) -> f32 {
        match self.state {
            EnvelopeState::Idle => {
                self.level = 0.0;
            }
            EnvelopeState::Attack => {
                self.level += self.step;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.state = EnvelopeState::Open;
                }
            }
            EnvelopeState::Open => {
                self.level = 1.0;
            }
            EnvelopeState::Release => {
                self.level -= self.step;
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.state = EnvelopeState::Idle;
                }
            }
        }
        self.level
    }

    pub fn state(&self) -> EnvelopeState {
        self.state
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn is_active(&self) -> bool {
        self.state != EnvelopeState::Idle
    }
}
