use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use quorumkv::cluster::ring::DEFAULT_VIRTUAL_NODES;
use quorumkv::cluster::{HashRing, NodeId};
use quorumkv::{DB, Options};
use tempfile::tempdir;

const KEYS: u32 = 10_000;

fn key(i: u32) -> Vec<u8> {
    format!("key_{i:08}").into_bytes()
}

fn filled_db(dir: &std::path::Path, flush: bool) -> DB {
    let db = DB::open(Options::new(dir).flush_threshold(1024 * 1024)).expect("open db");
    for i in 0..KEYS {
        db.upsert(&key(i), &[b'v'; 100], None).expect("upsert");
    }
    if flush {
        db.flush().expect("flush");
    }
    db
}

fn bench_upsert(c: &mut Criterion) {
    let mut group = c.benchmark_group("upsert");
    group.throughput(Throughput::Elements(1));
    for size in [16usize, 1024] {
        let dir = tempdir().expect("tempdir");
        let db = DB::open(Options::new(dir.path())).expect("open db");
        let payload = vec![b'v'; size];
        let mut i = 0u32;
        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            b.iter(|| {
                i = i.wrapping_add(1);
                db.upsert(&key(i % KEYS), &payload, None).expect("upsert");
            });
        });
    }
    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");
    for (name, flush) in [("memtable", false), ("sstable", true)] {
        let dir = tempdir().expect("tempdir");
        let db = filled_db(dir.path(), flush);
        let mut i = 0u32;
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| {
                i = (i + 7919) % KEYS;
                black_box(db.get(&key(i)).expect("get"));
            });
        });
    }

    let dir = tempdir().expect("tempdir");
    let db = filled_db(dir.path(), true);
    group.bench_function(BenchmarkId::from_parameter("miss"), |b| {
        b.iter(|| black_box(db.get(b"absent_key").is_err()));
    });
    group.finish();
}

fn bench_range(c: &mut Criterion) {
    let dir = tempdir().expect("tempdir");
    let db = filled_db(dir.path(), true);

    let mut group = c.benchmark_group("range");
    for len in [10u32, 1000] {
        group.throughput(Throughput::Elements(u64::from(len)));
        group.bench_function(BenchmarkId::from_parameter(len), |b| {
            b.iter(|| {
                let scanned = db
                    .range(&key(100), Some(&key(100 + len)))
                    .expect("range")
                    .count();
                assert_eq!(scanned, len as usize);
            });
        });
    }
    group.finish();
}

fn bench_ring(c: &mut Criterion) {
    let nodes: Vec<NodeId> = (0..5).map(|i| NodeId::new(format!("http://node{i}:8080"))).collect();
    let ring = HashRing::new(nodes[0].clone(), nodes, DEFAULT_VIRTUAL_NODES);
    let mut i = 0u32;
    c.bench_function("ring/nodes_for_key", |b| {
        b.iter(|| {
            i = i.wrapping_add(1);
            black_box(ring.nodes_for_key(&key(i), 3));
        });
    });
}

criterion_group!(benches, bench_upsert, bench_get, bench_range, bench_ring);
criterion_main!(benches);
