//! Benchmarks for nearest-neighbour retrieval
//!
//! Measures one query against synthetic corpora of increasing size, covering
//! both the sequential scan and the parallel path above 4096 rows, and the
//! cost of mixing a full voice pool for one audio block.
//!
//! Run with: cargo bench --bench similarity_bench

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use mosaic::corpus::{Corpus, FeatureMatrix, Fragment};
use mosaic::sample_loader::{SourceSlice, StereoSample};
use mosaic::voice_manager::VoiceBank;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

const DIM: usize = 9;

fn synthetic_corpus(rows: usize) -> Corpus {
    let mut rng = rand::rngs::StdRng::seed_from_u64(rows as u64);
    let mut features = FeatureMatrix::new(DIM);
    let mut fragments = Vec::with_capacity(rows);
    let mut row = [0.0f32; DIM];
    for id in 0..rows {
        for v in row.iter_mut() {
            *v = rng.gen();
        }
        features.push_row(&row).unwrap();
        fragments.push(Fragment { id, track: 0, start_secs: id as f64 * 0.1 });
    }
    Corpus::new("bench", fragments, features)
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("corpus_search");
    let query = [0.5f32; DIM];

    for rows in [500, 2_000, 8_000, 32_000] {
        let corpus = synthetic_corpus(rows);
        group.bench_with_input(BenchmarkId::new("k2", rows), &corpus, |b, corpus| {
            b.iter(|| corpus.search(black_box(&query), 2).unwrap())
        });
    }

    group.finish();
}

fn bench_mix(c: &mut Criterion) {
    let sample = Arc::new(StereoSample::mono(
        (0..44_100).map(|i| (i as f32 * 0.01).sin()).collect(),
        44_100,
    ));
    let bank = VoiceBank::new(6, 0.5, 0.8, 48_000);
    let restart = || {
        for voice in 0..bank.len() {
            let slice = SourceSlice { sample: Arc::clone(&sample), start_frame: voice as f64 * 1000.0 };
            bank.start(voice, 0, slice, 1.0, 0.01);
        }
    };

    let mut left = vec![0.0f32; 512];
    let mut right = vec![0.0f32; 512];
    c.bench_function("mix_six_voices_512", |b| {
        b.iter_batched(
            restart,
            |()| bank.mix_block(black_box(&mut left), black_box(&mut right)),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_search, bench_mix);
criterion_main!(benches);
