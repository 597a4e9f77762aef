//! # Remote Capability Protocol Benchmarks
//!
//! Hot paths run once per inbound message:
//!
//! | Path | Runs on | Per |
//! |------|---------|-----|
//! | Mode aggregation | trigger subscriber, registration server | quorum check |
//! | Message cache insert + ready | every component | inbound message |
//! | Request hash | executable server | Execute request |
//! | Transmission permutation | executable client, local target | request |

use capability_types::{CapabilityRequest, PeerId, RequestMetadata};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use remote_capabilities::domain::{
    aggregate_mode_raw, peer_delays, request_hash, MessageCache, Schedule, TransmissionConfig,
};
use serde_json::json;
use std::time::Duration;

fn bench_mode_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregation");

    for n in [4usize, 16, 64] {
        // F faulty members with distinct payloads, the rest agreeing
        let f = (n - 1) / 3;
        let mut payloads: Vec<Vec<u8>> = (0..f).map(|i| format!("forged-{i}").into_bytes()).collect();
        payloads.extend((f..n).map(|_| vec![7u8; 512]));

        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("mode_raw", n), &payloads, |b, payloads| {
            b.iter(|| black_box(aggregate_mode_raw(payloads, (f + 1) as u32).is_ok()))
        });
    }
    group.finish();
}

fn bench_message_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_cache");
    let senders: Vec<PeerId> = (0..16).map(|_| PeerId::random()).collect();

    group.bench_function("insert_then_ready_16_senders", |b| {
        b.iter(|| {
            let mut cache: MessageCache<String, PeerId> = MessageCache::new();
            for (i, sender) in senders.iter().enumerate() {
                cache.insert("event-1".to_string(), *sender, i as i64, vec![1u8; 128]);
            }
            black_box(cache.ready(&"event-1".to_string(), 11, 0, true).0)
        })
    });

    group.bench_function("sweep_1000_keys", |b| {
        b.iter(|| {
            let mut cache: MessageCache<u32, PeerId> = MessageCache::new();
            for key in 0..1000u32 {
                cache.insert(key, senders[0], i64::from(key), vec![]);
            }
            black_box(cache.delete_older_than(500))
        })
    });
    group.finish();
}

fn bench_request_hash(c: &mut Criterion) {
    let request = CapabilityRequest {
        metadata: RequestMetadata {
            workflow_execution_id: "95ef5e32deb99a10ee6804bc4af1385568755915c631d2d7ff6552ac6dbb2ce0"
                .to_string(),
            ..Default::default()
        },
        config: json!({"schedule": "oneAtATime", "deltaStage": "1s"}),
        inputs: json!({
            "report": {"observations": (0..64).collect::<Vec<u32>>(), "signed_at": 1_700_000_000},
            "receiver": "0x4f3c1bd3",
        }),
    };
    let excluded = vec!["report.signed_at".to_string()];

    c.bench_function("request_hash/with_exclusion", |b| {
        b.iter(|| black_box(request_hash(&request, &excluded).is_ok()))
    });
}

fn bench_transmission_schedule(c: &mut Criterion) {
    let mut group = c.benchmark_group("transmission");
    let config = TransmissionConfig {
        schedule: Schedule::OneAtATime,
        delta_stage: Duration::from_millis(500),
    };

    for n in [4usize, 31] {
        let members: Vec<PeerId> = (0..n).map(|_| PeerId::random()).collect();
        group.bench_with_input(BenchmarkId::new("peer_delays", n), &members, |b, members| {
            b.iter(|| black_box(peer_delays(members, "execution-1", &config).len()))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_mode_aggregation,
    bench_message_cache,
    bench_request_hash,
    bench_transmission_schedule
);
criterion_main!(benches);
