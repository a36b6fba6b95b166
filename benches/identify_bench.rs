use criterion::{black_box, criterion_group, criterion_main, Criterion};
use carve_recovery::entropy::calculate_shannon_entropy;
use carve_recovery::oracle::HeuristicOracle;
use carve_recovery::search::find_pattern;
use carve_recovery::{
    reconstruct_streams, FileKind, Fragment, FragmentIdentifier, Identification,
    IdentificationSource,
};
use std::sync::Arc;

fn noisy_block(seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
    (0..512)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

fn bench_identify(c: &mut Criterion) {
    let mut group = c.benchmark_group("identify");

    let block = noisy_block(7);
    let mut header = block.clone();
    header[..4].copy_from_slice(b"\xff\xd8\xff\xe0");

    let signatures_only = FragmentIdentifier::without_oracle();
    let heuristic = FragmentIdentifier::new(Arc::new(HeuristicOracle::new()), 0.7);

    group.bench_function("signature_header", |b| {
        b.iter(|| black_box(signatures_only.identify(black_box(&header))))
    });

    group.bench_function("heuristic_oracle", |b| {
        b.iter(|| black_box(heuristic.identify(black_box(&block))))
    });

    group.bench_function("entropy_512", |b| {
        b.iter(|| black_box(calculate_shannon_entropy(black_box(&block))))
    });

    let haystack = vec![0u8; 1024 * 1024];
    group.bench_function("find_pattern_1mb_miss", |b| {
        b.iter(|| black_box(find_pattern(black_box(&haystack), b"\xff\xd9")))
    });

    group.finish();
}

fn bench_reconstruct(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconstruct");

    // Two interleaved JPEG streams of 512 blocks each
    let mut fragments = Vec::new();
    for i in 0..1024u64 {
        let mut data = noisy_block(i);
        let identification = if i < 2 {
            data[..2].copy_from_slice(b"\xff\xd8");
            Identification::signature(FileKind::Jpeg)
        } else {
            Identification::new(FileKind::Jpeg, 0.9, IdentificationSource::AiHighConfidence)
        };
        fragments.push(Fragment::new(i * 512, data, identification));
    }

    group.bench_function("interleaved_1024_blocks", |b| {
        b.iter(|| black_box(reconstruct_streams(black_box(fragments.clone()))))
    });

    group.finish();
}

criterion_group!(benches, bench_identify, bench_reconstruct);
criterion_main!(benches);
