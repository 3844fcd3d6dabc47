/// Tests for corpus files loaded from disk
///
/// This module tests that:
/// 1. N valid rows load as N fragments with ids 0..N-1 and an N×D matrix
/// 2. A broken corpus is replaced by an empty one without disturbing the others
/// 3. Paths in a config file resolve against the config's directory

use mosaic::config::{CorpusEntry, MosaicConfig, TrackEntry};
use mosaic::corpus::{Corpus, CorpusSet, TrackTable};
use mosaic::MosaicError;
use std::fs;
use std::path::PathBuf;

fn tracks() -> TrackTable {
    TrackTable::new(&[
        TrackEntry { name: "drums".into(), file: PathBuf::from("drums.wav") },
        TrackEntry { name: "strings".into(), file: PathBuf::from("strings.wav") },
    ])
}

#[test]
fn test_rows_become_dense_fragments() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mix.txt");
    let mut text = String::new();
    for i in 0..25 {
        let track = if i % 3 == 0 { "strings" } else { "drums" };
        text.push_str(&format!("{} {} {} {} {}\n", track, i as f32 * 0.25, i, i * 2, i * 3));
        if i % 5 == 0 {
            text.push('\n');
        }
    }
    fs::write(&path, text).unwrap();

    let corpus = Corpus::load(&path, 3, &tracks()).expect("corpus should load");
    assert_eq!(corpus.name(), "mix");
    assert_eq!(corpus.len(), 25);
    assert_eq!(corpus.features().row_count(), 25);
    assert_eq!(corpus.dim(), 3);
    for (i, fragment) in corpus.fragments().iter().enumerate() {
        assert_eq!(fragment.id, i);
        assert_eq!(corpus.features().row(i), &[i as f32, (i * 2) as f32, (i * 3) as f32]);
    }
    assert_eq!(corpus.fragment(3).unwrap().track, 1);
    assert_eq!(corpus.fragment(4).unwrap().start_secs, 1.0);
}

#[test]
fn test_empty_file_is_a_format_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blank.txt");
    fs::write(&path, "\n   \n\n").unwrap();

    match Corpus::load(&path, 3, &tracks()) {
        Err(MosaicError::CorpusFormat { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected a corpus format error, got {:?}", other),
    }
}

#[test]
fn test_failed_corpus_keeps_numbering() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.txt");
    let bad = dir.path().join("bad.txt");
    fs::write(&good, "drums 0.0 1 2\ndrums 0.5 3 4\n").unwrap();
    fs::write(&bad, "").unwrap();

    let entries = vec![
        CorpusEntry { name: "bad".into(), path: bad },
        CorpusEntry { name: "missing".into(), path: dir.path().join("nope.txt") },
        CorpusEntry { name: "good".into(), path: good },
    ];
    let set = CorpusSet::load(&entries, 2, &tracks());

    assert_eq!(set.len(), 3);
    assert!(set.get(0).unwrap().is_empty());
    assert!(set.get(1).unwrap().is_empty());
    assert_eq!(set.get(2).unwrap().len(), 2);
    // Empty corpora still answer queries, with nothing
    assert!(set.get(0).unwrap().search(&[0.0, 0.0], 2).unwrap().is_empty());
}

#[test]
fn test_wrong_dimensionality_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wide.txt");
    fs::write(&path, "drums 0.0 1 2 3 4\n").unwrap();

    assert!(matches!(
        Corpus::load(&path, 3, &tracks()),
        Err(MosaicError::CorpusFormat { .. })
    ));
}

#[test]
fn test_config_paths_resolve_next_to_config() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("corpora")).unwrap();
    fs::write(
        dir.path().join("corpora/strings.txt"),
        "bowed 1.5 0.1 0.2\nbowed.wav 2.0 0.3 0.4\n",
    )
    .unwrap();
    let config_path = dir.path().join("mosaic.toml");
    fs::write(
        &config_path,
        r#"
[analysis]
features = [{ kind = "centroid" }, { kind = "rms" }]

[[tracks]]
name = "bowed"
file = "audio/bowed.wav"

[[corpora]]
name = "strings"
path = "corpora/strings.txt"
"#,
    )
    .unwrap();

    let config = MosaicConfig::load(&config_path).expect("config should load");
    assert_eq!(config.analysis.dimension(), 2);
    assert_eq!(config.tracks[0].file, dir.path().join("audio/bowed.wav"));

    let tracks = TrackTable::new(&config.tracks);
    let set = CorpusSet::load(&config.corpora, config.analysis.dimension(), &tracks);
    let corpus = set.get(0).unwrap();
    assert_eq!(corpus.len(), 2);
    assert!(corpus.fragments().iter().all(|f| f.track == 0));
}
