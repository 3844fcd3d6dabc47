//! Corpus loading
//!
//! A corpus file is a whitespace separated table, one analysed fragment per line:
//!
//! ```text
//! trackLabel startTimeSeconds v_1 v_2 ... v_D
//! ```
//!
//! Rows are validated against the process-wide dimensionality D and the track
//! table. Fragment ids are the dense 0-based ordinal of each accepted row and
//! double as nearest-neighbour labels.

use crate::config::{CorpusEntry, TrackEntry};
use crate::error::{MosaicError, Result};
use crate::similarity::{LinearIndex, SimilarityIndex};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub type FragmentId = usize;

/// One analysed time-window of a source track
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fragment {
    pub id: FragmentId,
    pub track: usize,
    /// Offset into the source track in seconds
    pub start_secs: f64,
}

/// Immutable mapping from track label to track index, plus each track's audio file
#[derive(Debug, Clone, Default)]
pub struct TrackTable {
    by_label: BTreeMap<String, usize>,
    files: Vec<PathBuf>,
    names: Vec<String>,
}

impl TrackTable {
    /// Build from the configured track list; a track is addressable by its
    /// name and by its audio file name, with or without extension
    pub fn new(tracks: &[TrackEntry]) -> Self {
        let mut by_label = BTreeMap::new();
        for (index, track) in tracks.iter().enumerate() {
            by_label.insert(track.name.clone(), index);
        }
        // Names win over file-derived aliases
        for (index, track) in tracks.iter().enumerate() {
            if let Some(file_name) = track.file.file_name().and_then(|s| s.to_str()) {
                by_label.entry(file_name.to_string()).or_insert(index);
            }
            if let Some(stem) = track.file.file_stem().and_then(|s| s.to_str()) {
                by_label.entry(stem.to_string()).or_insert(index);
            }
        }

        Self {
            by_label,
            files: tracks.iter().map(|t| t.file.clone()).collect(),
            names: tracks.iter().map(|t| t.name.clone()).collect(),
        }
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.by_label.get(label).copied()
    }

    pub fn file(&self, track: usize) -> Option<&Path> {
        self.files.get(track).map(PathBuf::as_path)
    }

    pub fn name(&self, track: usize) -> Option<&str> {
        self.names.get(track).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Row-major fragment count × D matrix
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    dim: usize,
    data: Vec<f32>,
}

impl FeatureMatrix {
    pub fn new(dim: usize) -> Self {
        Self { dim, data: Vec::new() }
    }

    pub fn push_row(&mut self, row: &[f32]) -> Result<()> {
        if row.len() != self.dim {
            return Err(MosaicError::DimensionMismatch {
                expected: self.dim,
                actual: row.len(),
            });
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    pub fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.dim..(index + 1) * self.dim]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dim.max(1))
    }

    pub fn row_count(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

/// One track's fragment set with its trained index
pub struct Corpus {
    name: String,
    fragments: Vec<Fragment>,
    features: FeatureMatrix,
    index: Box<dyn SimilarityIndex>,
}

impl std::fmt::Debug for Corpus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Corpus")
            .field("name", &self.name)
            .field("fragments", &self.fragments.len())
            .field("dim", &self.features.dim())
            .finish()
    }
}

impl Corpus {
    /// Assemble a corpus and train its index
    pub fn new(name: impl Into<String>, fragments: Vec<Fragment>, features: FeatureMatrix) -> Self {
        let ids: Vec<FragmentId> = fragments.iter().map(|f| f.id).collect();
        let mut index = LinearIndex::new(features.dim());
        index.train(&features, &ids);

        Self {
            name: name.into(),
            fragments,
            features,
            index: Box::new(index),
        }
    }

    /// Corpus with no fragments, used in place of one that failed to load
    pub fn empty(name: impl Into<String>, dim: usize) -> Self {
        Self::new(name, Vec::new(), FeatureMatrix::new(dim))
    }

    /// Parse a corpus file named after its file stem
    pub fn load(path: &Path, dim: usize, tracks: &TrackTable) -> Result<Self> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("corpus");
        Self::load_named(name, path, dim, tracks)
    }

    /// Parse a corpus file and train its index
    pub fn load_named(name: &str, path: &Path, dim: usize, tracks: &TrackTable) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| MosaicError::CorpusFormat {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(name, path, &text, dim, tracks)
    }

    /// Parse corpus text; `path` is only used in diagnostics
    pub fn parse(name: &str, path: &Path, text: &str, dim: usize, tracks: &TrackTable) -> Result<Self> {
        let format_error = |reason: String| MosaicError::CorpusFormat {
            path: path.to_path_buf(),
            reason,
        };

        let mut lines = text
            .lines()
            .enumerate()
            .map(|(n, line)| (n + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty())
            .peekable();

        let (_, first) = lines
            .peek()
            .copied()
            .ok_or_else(|| format_error("no non-empty rows".to_string()))?;
        let inferred = first.split_whitespace().count().saturating_sub(2);
        if inferred == 0 {
            return Err(format_error(
                "first row carries no feature values".to_string(),
            ));
        }
        if inferred != dim {
            return Err(format_error(format!(
                "rows carry {} feature values, engine is configured for {}",
                inferred, dim
            )));
        }

        let mut fragments = Vec::new();
        let mut features = FeatureMatrix::new(dim);
        let mut values = Vec::with_capacity(dim);
        let mut skipped = 0usize;

        for (line_no, line) in lines {
            match parse_row(line, dim, tracks, &mut values) {
                Ok((track, start_secs)) => {
                    features.push_row(&values)?;
                    fragments.push(Fragment {
                        id: fragments.len(),
                        track,
                        start_secs,
                    });
                }
                Err(reason) => {
                    skipped += 1;
                    warn!("{}:{}: skipping row: {}", path.display(), line_no, reason);
                }
            }
        }

        if fragments.is_empty() {
            return Err(format_error(format!("no valid rows ({} rejected)", skipped)));
        }

        info!(
            "Loaded corpus '{}': {} fragments, {} dimensions{}",
            name,
            fragments.len(),
            dim,
            if skipped > 0 {
                format!(", {} rows skipped", skipped)
            } else {
                String::new()
            }
        );

        Ok(Self::new(name, fragments, features))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fragment(&self, id: FragmentId) -> Option<&Fragment> {
        self.fragments.get(id)
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn features(&self) -> &FeatureMatrix {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.index.dimension()
    }

    /// k nearest fragment ids to `query`, closest first
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<FragmentId>> {
        self.index.search(query, k)
    }
}

fn parse_row(
    line: &str,
    dim: usize,
    tracks: &TrackTable,
    values: &mut Vec<f32>,
) -> std::result::Result<(usize, f64), String> {
    let mut fields = line.split_whitespace();
    let label = fields.next().ok_or("missing track label")?;
    let start = fields.next().ok_or("missing start time")?;

    let track = tracks
        .index_of(label)
        .ok_or_else(|| format!("unknown track '{}'", label))?;
    let start_secs: f64 = start
        .parse()
        .map_err(|_| format!("bad start time '{}'", start))?;
    if !start_secs.is_finite() || start_secs < 0.0 {
        return Err(format!("start time {} out of range", start_secs));
    }

    values.clear();
    for field in fields {
        let value: f32 = field
            .parse()
            .map_err(|_| format!("bad feature value '{}'", field))?;
        if !value.is_finite() {
            return Err(format!("non-finite feature value '{}'", field));
        }
        values.push(value);
    }
    if values.len() != dim {
        return Err(format!("expected {} feature values, found {}", dim, values.len()));
    }

    Ok((track, start_secs))
}

/// All corpora, indexed by song-mode number
#[derive(Debug, Clone, Default)]
pub struct CorpusSet {
    corpora: Vec<Arc<Corpus>>,
}

impl CorpusSet {
    pub fn new(corpora: Vec<Corpus>) -> Self {
        Self {
            corpora: corpora.into_iter().map(Arc::new).collect(),
        }
    }

    /// Load every configured corpus; a corpus that fails is replaced by an
    /// empty one so the song-mode numbering stays stable
    pub fn load(entries: &[CorpusEntry], dim: usize, tracks: &TrackTable) -> Self {
        let corpora = entries
            .iter()
            .map(|entry| match Corpus::load_named(&entry.name, &entry.path, dim, tracks) {
                Ok(corpus) => corpus,
                Err(e) => {
                    warn!("Corpus '{}' unavailable: {}", entry.name, e);
                    Corpus::empty(entry.name.clone(), dim)
                }
            })
            .collect();
        Self::new(corpora)
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Corpus>> {
        self.corpora.get(index)
    }

    pub fn len(&self) -> usize {
        self.corpora.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corpora.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Corpus>> {
        self.corpora.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracks() -> TrackTable {
        TrackTable::new(&[
            TrackEntry { name: "cello".into(), file: PathBuf::from("audio/cello_take2.wav") },
            TrackEntry { name: "voice".into(), file: PathBuf::from("audio/voice.wav") },
        ])
    }

    fn parse(text: &str, dim: usize) -> Result<Corpus> {
        Corpus::parse("test", Path::new("test.txt"), text, dim, &tracks())
    }

    #[test]
    fn test_track_table_aliases() {
        let table = tracks();
        assert_eq!(table.index_of("cello"), Some(0));
        assert_eq!(table.index_of("cello_take2"), Some(0));
        assert_eq!(table.index_of("cello_take2.wav"), Some(0));
        assert_eq!(table.index_of("voice"), Some(1));
        assert_eq!(table.index_of("drums"), None);
        assert_eq!(table.name(1), Some("voice"));
    }

    #[test]
    fn test_parse_dense_ids() {
        let corpus = parse("cello 0.0 1 2 3\n\nvoice 0.5 4 5 6\ncello\t1.0\t7 8 9\n", 3).unwrap();
        assert_eq!(corpus.len(), 3);
        let ids: Vec<_> = corpus.fragments().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(corpus.fragment(1).unwrap().track, 1);
        assert_eq!(corpus.fragment(2).unwrap().start_secs, 1.0);
        assert_eq!(corpus.features().row_count(), 3);
        assert_eq!(corpus.features().row(2), &[7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_invalid_rows_are_skipped() {
        let text = "cello 0.0 1 2\ndrums 0.1 1 2\ncello 0.2 1\ncello x 1 2\ncello 0.3 3 4\n";
        let corpus = parse(text, 2).unwrap();
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.fragment(1).unwrap().start_secs, 0.3);
        assert_eq!(corpus.fragment(1).unwrap().id, 1);
    }

    #[test]
    fn test_non_finite_rows_are_skipped() {
        let text = "cello 0.0 nan 1\ncello 0.1 1 inf\ncello 0.2 -inf 0\ncello 0.3 NaN NaN\ncello 0.4 2 2\n";
        let corpus = parse(text, 2).unwrap();
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.fragment(0).unwrap().start_secs, 0.4);
        assert!(corpus.features().row(0).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_nearest_survives_silent_frames() {
        // Analysis tools write nan for silent frames; those rows must not crowd out real ones
        let mut text = String::new();
        for i in 0..200 {
            if i % 2 == 0 {
                text.push_str(&format!("cello {} nan\n", i));
            } else {
                text.push_str(&format!("cello {} {}\n", i, 1000 + i));
            }
        }
        text.push_str("cello 999 0.0\n");

        let corpus = parse(&text, 1).unwrap();
        assert_eq!(corpus.len(), 101);
        let nearest = corpus.search(&[0.0], 2).unwrap();
        assert_eq!(nearest[0], 100);
        assert_eq!(corpus.fragment(nearest[0]).unwrap().start_secs, 999.0);
        assert_eq!(corpus.features().row(nearest[1]), &[1001.0]);
    }

    #[test]
    fn test_empty_file_rejected() {
        let err = parse("\n   \n", 3).unwrap_err();
        assert!(matches!(err, MosaicError::CorpusFormat { .. }));
    }

    #[test]
    fn test_first_row_without_values_rejected() {
        assert!(matches!(parse("cello 0.0\n", 3), Err(MosaicError::CorpusFormat { .. })));
    }

    #[test]
    fn test_dimension_disagreement_rejected() {
        assert!(matches!(parse("cello 0.0 1 2\n", 3), Err(MosaicError::CorpusFormat { .. })));
    }

    #[test]
    fn test_all_rows_invalid_rejected() {
        assert!(matches!(
            parse("drums 0.0 1 2\nbass 1.0 1 2\n", 2),
            Err(MosaicError::CorpusFormat { .. })
        ));
    }

    #[test]
    fn test_search_returns_nearest() {
        let corpus = parse("cello 0.0 0 0\ncello 1.0 10 10\ncello 2.0 1 1\n", 2).unwrap();
        assert_eq!(corpus.search(&[0.2, 0.2], 2).unwrap(), vec![0, 2]);
    }

    #[test]
    fn test_corpus_set_keeps_numbering_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("take_03.txt");
        std::fs::write(&good, "cello 0.0 1 2\n").unwrap();
        let entries = vec![
            CorpusEntry { name: "missing".into(), path: dir.path().join("missing.txt") },
            CorpusEntry { name: "good".into(), path: good },
        ];

        let set = CorpusSet::load(&entries, 2, &tracks());
        assert_eq!(set.len(), 2);
        assert!(set.get(0).unwrap().is_empty());
        assert_eq!(set.get(1).unwrap().len(), 1);
        // Configured names win over file stems
        assert_eq!(set.get(0).unwrap().name(), "missing");
        assert_eq!(set.get(1).unwrap().name(), "good");
    }
}
