//! Lookup benchmarks over a synthetic index.
//!
//! Run with: `cargo bench`
//! Save baseline: `cargo bench -- --save-baseline main`
//! Compare: `cargo bench -- --baseline main`

use criterion::{Criterion, criterion_group, criterion_main};
use ssi::{IndexBuilder, IndexReader, OffsetMode};
use std::hint::black_box;

const KEY_COUNT: u32 = 100_000;

fn bench_lookups(c: &mut Criterion) {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let path = dir.path().join("bench.ssi");

    let mut builder = IndexBuilder::new(OffsetMode::U32);
    let fh = builder.register_file("seqs.fa", 1).unwrap();
    for i in 0..KEY_COUNT {
        builder
            .add_primary_key(format!("seq{i:06}").as_bytes(), fh, i as u64 * 131, None)
            .unwrap();
    }
    builder.finalize(&path).unwrap();

    let mut reader = IndexReader::open(&path).unwrap();

    let mut n = 0u32;
    c.bench_function("lookup_by_name/hit", |b| {
        b.iter(|| {
            n = (n + 7919) % KEY_COUNT;
            let key = format!("seq{n:06}");
            black_box(reader.lookup_by_name(key.as_bytes()).unwrap());
        })
    });

    c.bench_function("lookup_by_name/miss", |b| {
        b.iter(|| {
            black_box(reader.lookup_by_name(b"zzz-not-present").is_err());
        })
    });

    let mut ord = 0u32;
    c.bench_function("lookup_by_ordinal", |b| {
        b.iter(|| {
            ord = (ord + 7919) % KEY_COUNT;
            black_box(reader.lookup_by_ordinal(ord).unwrap());
        })
    });
}

criterion_group!(benches, bench_lookups);
criterion_main!(benches);
