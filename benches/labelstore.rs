use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kuba_pipeline::{
    labels::Labels,
    labelstore::{LabelStore, LabelStoreConfig, LabelStoreService, StalenessTracker},
    types::stale_nan,
};
use prometheus::Registry;

const SERIES_PER_WORKER: usize = 1_000;
const WORKERS: usize = 8;

fn store(shards: usize) -> Arc<LabelStoreService> {
    let config = LabelStoreConfig {
        shards,
        ..Default::default()
    };
    Arc::new(LabelStoreService::new(config, &Registry::new()).expect("label store"))
}

fn series(worker: usize, i: usize) -> Labels {
    Labels::from_pairs([
        ("__name__", "http_requests_total".to_string()),
        ("instance", format!("host-{}", worker)),
        ("path", format!("/api/{}", i)),
    ])
}

/// Every worker resolves its series and reports half of them stale
fn trackers(ls: &LabelStoreService, worker: usize) -> Vec<StalenessTracker> {
    (0..SERIES_PER_WORKER)
        .map(|i| {
            let labels = series(worker, i);
            StalenessTracker {
                global_ref_id: ls.get_or_add_global_ref_id(&labels),
                value: if i % 2 == 0 { stale_nan() } else { 1.0 },
                labels,
            }
        })
        .collect()
}

fn bench_get_or_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_or_add_global_ref_id");
    group.throughput(Throughput::Elements((WORKERS * SERIES_PER_WORKER) as u64));

    for shards in [1, 16, 256] {
        let ls = store(shards);
        let labels: Vec<Vec<Labels>> = (0..WORKERS)
            .map(|w| (0..SERIES_PER_WORKER).map(|i| series(w, i)).collect())
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(shards), &shards, |b, _| {
            b.iter(|| {
                thread::scope(|s| {
                    for worker in &labels {
                        let ls = &ls;
                        s.spawn(move || {
                            for l in worker {
                                black_box(ls.get_or_add_global_ref_id(l));
                            }
                        });
                    }
                });
            })
        });
    }
    group.finish();
}

fn bench_track_staleness(c: &mut Criterion) {
    let mut group = c.benchmark_group("track_staleness");
    group.throughput(Throughput::Elements((WORKERS * SERIES_PER_WORKER) as u64));

    for shards in [1, 16, 256] {
        let ls = store(shards);
        let batches: Vec<Vec<StalenessTracker>> = (0..WORKERS).map(|w| trackers(&ls, w)).collect();

        group.bench_with_input(BenchmarkId::from_parameter(shards), &shards, |b, _| {
            b.iter(|| {
                thread::scope(|s| {
                    for batch in &batches {
                        let ls = &ls;
                        s.spawn(move || ls.track_staleness(batch));
                    }
                });
            })
        });
    }
    group.finish();
}

fn bench_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("check_and_remove_stale_markers");

    for shards in [1, 16] {
        let ls = store(shards);
        let batches: Vec<Vec<StalenessTracker>> = (0..WORKERS).map(|w| trackers(&ls, w)).collect();
        for batch in &batches {
            ls.track_staleness(batch);
        }

        // Default stale duration: markers are scanned but none expire
        group.bench_with_input(BenchmarkId::from_parameter(shards), &shards, |b, _| {
            b.iter(|| ls.check_and_remove_stale_markers())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_get_or_add, bench_track_staleness, bench_sweep);
criterion_main!(benches);
