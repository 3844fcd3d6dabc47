//! # Mosaic - Real-Time Concatenative Resynthesis
//!
//! Mosaic listens to a live input, describes each short window of it as a
//! spectral feature vector, finds the most similar fragments in a corpus of
//! pre-analysed recordings, and plays those fragments back through a rotating
//! pool of enveloped voices. The result follows the input's timbre using
//! someone else's sounds.
//!
//! ## Core Features
//!
//! - **Corpus Loading**: flat feature tables validated against a fixed dimensionality
//! - **Nearest-Neighbour Retrieval**: exhaustive Euclidean search, random pick among the k closest
//! - **Windowed Aggregation**: per-hop frames averaged into one query per window
//! - **Three Modes**: responsive (follow the input), freeze (hold one fragment), play (step through the corpus)
//! - **Overlapping Voices**: round-robin voice pool with attack/hold/release crossfades
//! - **Live Control**: keyboard and OSC commands for corpus, mode and playback rate
//! - **State Notifications**: every choice published over OSC for visualisers
//!
//! ## Quick Start
//!
//! ```rust
//! use mosaic::config::TrackEntry;
//! use mosaic::control::{ControlState, Mode};
//! use mosaic::corpus::{Corpus, TrackTable};
//! use mosaic::retrieval::RetrievalPolicy;
//! use std::path::Path;
//!
//! let tracks = TrackTable::new(&[TrackEntry { name: "cello".into(), file: "cello.wav".into() }]);
//! let table = "cello 0.0 0.1 0.9\ncello 0.5 0.8 0.2\ncello 1.0 0.4 0.4\n";
//! let corpus = Corpus::parse("cello", Path::new("cello.txt"), table, 2, &tracks).unwrap();
//!
//! let mut policy = RetrievalPolicy::new(1, Some(7));
//! let state = ControlState { mode: Mode::Responsive, ..ControlState::default() };
//! let id = policy.select(&state, &[0.75, 0.25], &corpus).unwrap();
//! assert_eq!(id, Some(1));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! SampleFeed -> SpectralAnalyzer -> FeatureAggregator -> RetrievalPolicy -> VoiceScheduler -> VoiceBank -> AudioOutput
//!                                                             ^                    ^
//!                                       keyboard / OSC -> SharedControl -----------+
//! ```
//!
//! The engine loop in [`engine`] is the only code that waits on the hop clock.
//! Render tasks run on their own and overlap each other.

pub mod aggregator;
pub mod audio;
pub mod audio_analysis;
pub mod audio_input;
pub mod config;
pub mod control;
pub mod corpus;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod keyboard;
pub mod osc_control;
pub mod retrieval;
pub mod sample_loader;
pub mod scheduler;
pub mod similarity;
pub mod voice_manager;

pub use error::{MosaicError, Result};
