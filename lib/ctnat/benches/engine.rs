// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::criterion_group;
use criterion::criterion_main;
use ctnat::engine::checksum::Checksum;
use ctnat::engine::tracker::TrackerCfg;
use ctnat_test_utils::*;
use std::hint::black_box;

// Lookup cost on the established path as the table fills.
pub fn established_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("established");

    for nconns in [16u16, 1024, 8000] {
        let h = harness_with(TrackerCfg::default());
        let rule = masq_rule("out");
        for i in 0..nconns {
            let mut p =
                udp_pkt(ip("10.0.0.1"), 10_000 + i, ip("192.0.2.1"), 53, b"x");
            h.tracker.process(&mut p, Some(&rule)).unwrap();
        }

        let pkt = udp_pkt(ip("10.0.0.1"), 10_000, ip("192.0.2.1"), 53, b"x");
        group.bench_with_input(
            BenchmarkId::from_parameter(nconns),
            &pkt,
            |b, pkt| {
                b.iter_batched_ref(
                    || pkt.clone(),
                    |p| black_box(h.tracker.process(p, Some(&rule))),
                    criterion::BatchSize::SmallInput,
                )
            },
        );
    }

    group.finish();
}

// Creating and tearing down a masqueraded connection.
pub fn new_conn(c: &mut Criterion) {
    let h = harness();
    let rule = masq_rule("out");
    let pkt = tcp_pkt(ip("10.0.0.1"), 33000, ip("192.0.2.1"), 443, &[]);

    c.bench_function("new masquerade conn", |b| {
        b.iter_batched_ref(
            || pkt.clone(),
            |p| {
                let v = h.tracker.process(p, Some(&rule)).unwrap();
                let (conn, _, _) = accepted(v);
                h.tracker.registry().remove(&conn);
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

pub fn rate_check(c: &mut Criterion) {
    let rl = RateLimit::new(RateLimitCfg::per_second(1_000_000, 100)).unwrap();
    c.bench_function("rate check", |b| b.iter(|| black_box(rl.check())));
}

pub fn checksum(c: &mut Criterion) {
    let buf = vec![0xa5u8; 1460];
    c.bench_function("checksum 1460", |b| {
        b.iter(|| black_box(Checksum::compute(black_box(&buf))))
    });
}

criterion_group!(benches, established_lookup, new_conn, rate_check, checksum);
criterion_main!(benches);
