//! Error types for Mosaic
//!
//! Corpus and fragment level failures are recoverable and only reduce what the
//! engine can play. Configuration, device and dimension errors are fatal.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum MosaicError {
    /// Malformed or empty corpus file
    #[error("Corpus format error in {}: {reason}", path.display())]
    CorpusFormat { path: PathBuf, reason: String },

    /// Audio source missing or unreadable at render time
    #[error("Cannot resolve source for track {track}: {reason}")]
    SourceResolution { track: usize, reason: String },

    /// Control input device could not be opened
    #[error("Cannot open control device: {0}")]
    DeviceOpen(String),

    /// Query or frame dimensionality disagrees with the trained index
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Audio input/output device errors
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    /// OSC encoding errors
    #[error("OSC error: {0}")]
    Osc(String),

    /// WAV decoding errors
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MosaicError {
    /// Whether this error must stop the process rather than degrade it
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MosaicError::DeviceOpen(_) | MosaicError::DimensionMismatch { .. } | MosaicError::Config(_)
        )
    }
}

/// Convenience Result type using MosaicError
pub type Result<T> = std::result::Result<T, MosaicError>;
