//! Engine configuration
//!
//! Loaded from a TOML file. Every section has defaults, so only the track and
//! corpus lists normally need to be written out:
//!
//! ```toml
//! [voices]
//! count = 8
//!
//! [[tracks]]
//! name = "cello"
//! file = "audio/cello.wav"
//!
//! [[corpora]]
//! name = "cello"
//! path = "corpora/cello.txt"
//! ```

use crate::error::{MosaicError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name searched in the working directory and the user config directory
pub const CONFIG_FILE_NAME: &str = "mosaic.toml";

const MAX_FFT_SIZE: usize = 1 << 20;
const MAX_FRAMES_PER_WINDOW: usize = 1 << 16;
const MAX_ENVELOPE_SECS: f32 = 60.0;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MosaicConfig {
    /// Analysis sample rate in Hz
    pub sample_rate: u32,
    pub analysis: AnalysisConfig,
    pub retrieval: RetrievalConfig,
    pub voices: VoiceConfig,
    pub sources: SourceConfig,
    pub osc: OscConfig,
    pub tracks: Vec<TrackEntry>,
    pub corpora: Vec<CorpusEntry>,
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            analysis: AnalysisConfig::default(),
            retrieval: RetrievalConfig::default(),
            voices: VoiceConfig::default(),
            sources: SourceConfig::default(),
            osc: OscConfig::default(),
            tracks: Vec::new(),
            corpora: Vec::new(),
        }
    }
}

/// One spectral feature and the number of dimensions it contributes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureKind {
    Centroid,
    Flux,
    Rms,
    Rolloff,
    Flatness { bands: usize },
    Zcr,
}

impl FeatureKind {
    pub fn dimensions(&self) -> usize {
        match self {
            FeatureKind::Flatness { bands } => *bands,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub fft_size: usize,
    pub hop_size: usize,
    /// Hops averaged into one retrieval query
    pub frames_per_window: usize,
    pub rolloff_fraction: f32,
    pub features: Vec<FeatureKind>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: 1024,
            hop_size: 512,
            frames_per_window: 8,
            rolloff_fraction: 0.85,
            features: vec![
                FeatureKind::Centroid,
                FeatureKind::Flux,
                FeatureKind::Rms,
                FeatureKind::Rolloff,
                FeatureKind::Flatness { bands: 4 },
                FeatureKind::Zcr,
            ],
        }
    }
}

impl AnalysisConfig {
    /// Feature vector length D
    pub fn dimension(&self) -> usize {
        self.features.iter().map(FeatureKind::dimensions).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Neighbours fetched per query; one is picked at random
    pub k: usize,
    /// Fixed RNG seed for reproducible candidate choice
    pub seed: Option<u64>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { k: 2, seed: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VoiceConfig {
    pub count: usize,
    pub attack_secs: f32,
    pub release_secs: f32,
    /// 0.0 keeps every voice centred, 1.0 spreads the pool hard left to right
    pub pan_spread: f32,
    pub gain: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            count: 6,
            attack_secs: 0.01,
            release_secs: 0.05,
            pan_spread: 0.5,
            gain: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    /// Sources longer than this are streamed in chunks instead of cached whole
    pub max_preload_secs: f32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            max_preload_secs: 300.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OscConfig {
    /// `host:port` receiving state notifications; off when unset
    pub target: Option<String>,
    /// Address of outgoing state messages
    pub address: String,
    /// UDP port accepting control commands; off when unset
    pub control_port: Option<u16>,
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            target: None,
            address: "/mosaic/state".to_string(),
            control_port: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackEntry {
    pub name: String,
    pub file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorpusEntry {
    pub name: String,
    pub path: PathBuf,
}

/// Durations derived from the analysis and voice settings
///
/// Fixed for the process lifetime; envelope timing depends on it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleTiming {
    pub hop: Duration,
    pub window: Duration,
    pub attack: Duration,
    pub release: Duration,
}

impl CycleTiming {
    /// Time a voice stays open before its release starts
    pub fn hold(&self) -> Duration {
        (self.window * 2).saturating_sub(self.release)
    }
}

impl MosaicConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: MosaicConfig =
            toml::from_str(text).map_err(|e| MosaicError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file; relative track and corpus paths resolve against its directory
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            MosaicError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    /// Find the config file: explicit path, then `./mosaic.toml`, then the user config dir
    pub fn resolve_path(cli_arg: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = cli_arg {
            return Ok(path.to_path_buf());
        }

        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Ok(local);
        }

        if let Some(user) = dirs::config_dir().map(|d| d.join("mosaic").join(CONFIG_FILE_NAME)) {
            if user.exists() {
                return Ok(user);
            }
        }

        Err(MosaicError::Config(format!(
            "no {} found; pass --config",
            CONFIG_FILE_NAME
        )))
    }

    fn rebase(&mut self, base: &Path) {
        for track in &mut self.tracks {
            if track.file.is_relative() {
                track.file = base.join(&track.file);
            }
        }
        for corpus in &mut self.corpora {
            if corpus.path.is_relative() {
                corpus.path = base.join(&corpus.path);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let a = &self.analysis;
        if self.sample_rate == 0 {
            return Err(MosaicError::Config("sample_rate must be positive".into()));
        }
        if a.fft_size == 0 || a.hop_size == 0 || a.frames_per_window == 0 {
            return Err(MosaicError::Config(
                "fft_size, hop_size and frames_per_window must be positive".into(),
            ));
        }
        if a.hop_size > a.fft_size {
            return Err(MosaicError::Config(format!(
                "hop_size {} exceeds fft_size {}",
                a.hop_size, a.fft_size
            )));
        }
        if a.dimension() == 0 {
            return Err(MosaicError::Config("feature list yields zero dimensions".into()));
        }
        if !(0.0..=1.0).contains(&a.rolloff_fraction) {
            return Err(MosaicError::Config("rolloff_fraction must lie in [0, 1]".into()));
        }
        if self.retrieval.k == 0 {
            return Err(MosaicError::Config("retrieval.k must be positive".into()));
        }
        if self.voices.count == 0 {
            return Err(MosaicError::Config("voices.count must be positive".into()));
        }
        if a.fft_size > MAX_FFT_SIZE || a.frames_per_window > MAX_FRAMES_PER_WINDOW {
            return Err(MosaicError::Config(format!(
                "fft_size is limited to {} and frames_per_window to {}",
                MAX_FFT_SIZE, MAX_FRAMES_PER_WINDOW
            )));
        }

        let v = &self.voices;
        for (name, secs) in [("attack_secs", v.attack_secs), ("release_secs", v.release_secs)] {
            if !secs.is_finite() || !(0.0..=MAX_ENVELOPE_SECS).contains(&secs) {
                return Err(MosaicError::Config(format!(
                    "voices.{} must be a number of seconds in [0, {}], got {}",
                    name, MAX_ENVELOPE_SECS, secs
                )));
            }
        }
        if !v.gain.is_finite() || !v.pan_spread.is_finite() || !self.sources.max_preload_secs.is_finite() {
            return Err(MosaicError::Config(
                "voices.gain, voices.pan_spread and sources.max_preload_secs must be finite".into(),
            ));
        }

        let timing = self.timing();
        if timing.release >= timing.window * 2 {
            return Err(MosaicError::Config(format!(
                "release {:?} must be shorter than twice the window {:?}",
                timing.release, timing.window
            )));
        }

        let mut names = BTreeSet::new();
        for track in &self.tracks {
            if !names.insert(track.name.as_str()) {
                return Err(MosaicError::Config(format!(
                    "duplicate track name '{}'",
                    track.name
                )));
            }
        }

        Ok(())
    }

    /// Derived durations; only meaningful once [`validate`](Self::validate) has passed
    pub fn timing(&self) -> CycleTiming {
        let hop = Duration::from_secs_f64(self.analysis.hop_size as f64 / self.sample_rate as f64);
        CycleTiming {
            hop,
            window: hop * self.analysis.frames_per_window as u32,
            attack: Duration::from_secs_f32(self.voices.attack_secs),
            release: Duration::from_secs_f32(self.voices.release_secs),
        }
    }
}
