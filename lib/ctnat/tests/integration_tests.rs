// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Integration tests.
//!
//! Packets here are built and checked with smoltcp, so every checksum
//! assertion compares the engine's incremental repair against a full
//! recomputation done by independent code.

use core::time::Duration;
use ctnat::api::DumpConnsResp;
use ctnat::api::ManipType;
use ctnat::cfg::Config;
use ctnat::engine::nat::NatEngine;
use ctnat::engine::tracker::DropReason;
use ctnat::print::print_conns_into;
use ctnat::provider::null_log;
use ctnat_test_utils::icmp::gen_icmp_echo_reply;
use ctnat_test_utils::icmp::gen_icmp_echo_req;
use ctnat_test_utils::pcap::PcapBuilder;
use ctnat_test_utils::pcap::read_pkts;
use ctnat_test_utils::*;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::BTreeSet;
use std::thread;

fn snat_rule(range: &str) -> Rule {
    Rule::new("snat", TupleMatch::any())
        .nat(NatAction::Snat(range.parse().unwrap()))
}

fn dnat_rule(range: &str) -> Rule {
    Rule::new("dnat", TupleMatch::any())
        .nat(NatAction::Dnat(range.parse().unwrap()))
}

fn src_of(pkt: &[u8]) -> (Ipv4Addr, u16) {
    let ip = Ipv4Addr::from([pkt[12], pkt[13], pkt[14], pkt[15]]);
    (ip, u16::from_be_bytes([pkt[20], pkt[21]]))
}

fn dst_of(pkt: &[u8]) -> (Ipv4Addr, u16) {
    let ip = Ipv4Addr::from([pkt[16], pkt[17], pkt[18], pkt[19]]);
    (ip, u16::from_be_bytes([pkt[22], pkt[23]]))
}

// A reply to the flow whose reply tuple is `reply`.
fn udp_reply(reply: &Tuple, payload: &[u8]) -> Vec<u8> {
    udp_pkt(reply.src.ip, reply.src.id, reply.dst.ip, reply.dst.id, payload)
}

#[test]
fn reply_tuple_finds_connection() {
    let reg = ConnRegistry::default();
    let orig = Tuple::new_ports(
        Protocol::TCP,
        ip("10.0.0.1"),
        1234,
        ip("93.184.0.1"),
        80,
    );
    let reply = orig.invert().unwrap();
    assert_eq!(reply.src.ip, ip("93.184.0.1"));
    assert_eq!(reply.src.id, 80);
    assert_eq!(reply.dst.ip, ip("10.0.0.1"));
    assert_eq!(reply.dst.id, 1234);

    let conn = reg.insert(orig, reply).unwrap();
    let (found, dir) = reg.lookup(&reply).unwrap();
    assert_eq!(found.id(), conn.id());
    assert_eq!(dir, Direction::Reply);

    let (found, dir) = reg.lookup(&orig).unwrap();
    assert_eq!(found.id(), conn.id());
    assert_eq!(dir, Direction::Original);

    assert!(matches!(
        reg.insert(orig, reply),
        Err(Error::DuplicateTuple(_))
    ));
    assert_eq!(reg.len(), 1);
}

#[test]
fn port_range_exhaustion() {
    let h = harness();
    let rule = snat_rule("203.0.113.5:40000-40002");
    let server = ip("192.0.2.1");
    let mut ports = BTreeSet::new();

    for client in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        let mut pkt = udp_pkt(ip(client), 5000, server, 53, b"query");
        let (conn, dir, new) =
            accepted(h.tracker.process(&mut pkt, Some(&rule)).unwrap());
        assert!(new);
        assert_eq!(dir, Direction::Original);
        assert!(conn.status().contains(ConnStatus::SRC_NAT));

        let reply = conn.tuple(Direction::Reply);
        assert_eq!(reply.dst.ip, ip("203.0.113.5"));
        assert!(ports.insert(reply.dst.id));

        assert_eq!(src_of(&pkt), (reply.dst.ip, reply.dst.id));
        verify_checksums(&pkt).unwrap();
    }
    assert_eq!(ports, BTreeSet::from([40000, 40001, 40002]));

    let mut pkt = udp_pkt(ip("10.0.0.4"), 5000, server, 53, b"query");
    let err = h.tracker.process(&mut pkt, Some(&rule)).unwrap_err();
    assert!(matches!(err, Error::TranslationExhausted { .. }));
    assert_eq!(h.tracker.registry().len(), 3);
}

#[test]
fn rate_limit_one_per_second_burst_five() {
    let h = harness();
    let t0 = Moment::now();
    let limit = RateLimit::new_at(RateLimitCfg::new(10_000, 5), t0).unwrap();
    let rule = Rule::new("limited", TupleMatch::any()).limit(limit);
    let pkt = udp_pkt(ip("10.0.0.1"), 5000, ip("192.0.2.1"), 53, b"x");

    for _ in 0..5 {
        let mut p = pkt.clone();
        let v = h.tracker.process_at(&mut p, Some(&rule), t0).unwrap();
        assert!(v.is_accept());
    }

    let mut p = pkt.clone();
    assert!(matches!(
        h.tracker.process_at(&mut p, Some(&rule), t0).unwrap(),
        Verdict::Drop(DropReason::RateLimited)
    ));

    let t1 = t0 + Duration::from_millis(1_000);
    let mut p = pkt.clone();
    let v = h.tracker.process_at(&mut p, Some(&rule), t1).unwrap();
    assert!(v.is_accept());
}

#[test]
fn masquerade_evicted_on_interface_down() {
    let h = harness();
    let rule = masq_rule("out");
    let mut pkt = tcp_pkt(ip("10.0.0.1"), 33000, ip("192.0.2.1"), 443, &[]);

    let (conn, _, _) =
        accepted(h.tracker.process(&mut pkt, Some(&rule)).unwrap());
    assert_eq!(conn.nat_meta().ifindex, Some(ETH0));
    assert_eq!(src_of(&pkt).0, ETH0_ADDR);
    verify_checksums(&pkt).unwrap();

    let orig = *conn.tuple(Direction::Original);
    let reply = *conn.tuple(Direction::Reply);
    assert!(h.tracker.registry().lookup(&orig).is_some());

    assert_eq!(h.tracker.masq().on_interface_down_or_changed(ETH0), 1);
    assert!(h.tracker.registry().lookup(&orig).is_none());
    assert!(h.tracker.registry().lookup(&reply).is_none());
}

#[test]
fn zero_udp_checksum_preserved() {
    let h = harness();
    let rule = snat_rule("203.0.113.9:40000-40009");
    let mut pkt =
        udp_pkt_no_csum(ip("10.0.0.1"), 5000, ip("192.0.2.1"), 53, b"hello");

    let (conn, _, _) =
        accepted(h.tracker.process(&mut pkt, Some(&rule)).unwrap());
    let reply = conn.tuple(Direction::Reply);
    assert_eq!(src_of(&pkt), (ip("203.0.113.9"), reply.dst.id));
    assert_eq!(&pkt[UDP_CSUM_OFF..UDP_CSUM_OFF + 2], &[0, 0]);
    verify_checksums(&pkt).unwrap();
}

#[test]
fn masquerade_round_trip_udp() {
    let h = harness();
    let rule = masq_rule("out");
    let client = ip("10.0.0.7");
    let server = ip("192.0.2.1");

    let mut out = udp_pkt(client, 5353, server, 53, b"question");
    let (conn, _, _) =
        accepted(h.tracker.process(&mut out, Some(&rule)).unwrap());
    assert_eq!(src_of(&out), (ETH0_ADDR, 5353));
    verify_checksums(&out).unwrap();

    let mut back = udp_reply(conn.tuple(Direction::Reply), b"answer");
    let (conn2, dir, new) =
        accepted(h.tracker.process(&mut back, Some(&rule)).unwrap());
    assert_eq!(conn2.id(), conn.id());
    assert_eq!(dir, Direction::Reply);
    assert!(!new);
    assert_eq!(dst_of(&back), (client, 5353));
    assert_eq!(src_of(&back), (server, 53));
    verify_checksums(&back).unwrap();
}

#[test]
fn dnat_round_trip_tcp() {
    let h = harness();
    let rule = dnat_rule("10.1.1.1:8080");
    let client = ip("198.51.100.7");
    let public = ip("203.0.113.1");

    let mut syn = tcp_pkt(client, 40001, public, 80, &[]);
    let (conn, _, _) =
        accepted(h.tracker.process(&mut syn, Some(&rule)).unwrap());
    assert!(conn.status().contains(ConnStatus::DST_NAT));
    assert_eq!(dst_of(&syn), (ip("10.1.1.1"), 8080));
    verify_checksums(&syn).unwrap();

    let mut synack = tcp_pkt(ip("10.1.1.1"), 8080, client, 40001, b"ok");
    let (_, dir, _) =
        accepted(h.tracker.process(&mut synack, Some(&rule)).unwrap());
    assert_eq!(dir, Direction::Reply);
    assert_eq!(src_of(&synack), (public, 80));
    verify_checksums(&synack).unwrap();
}

#[test]
fn masquerade_round_trip_icmp() {
    let h = harness();
    let rule = masq_rule("ping");
    let client = ip("10.0.0.1");
    let server = ip("192.0.2.1");

    // Another host already holds id 7 on the outside.
    let mut other = gen_icmp_echo_req(ip("10.0.0.2"), server, 7, 1, b"a");
    h.tracker.process(&mut other, Some(&rule)).unwrap();

    let mut req = gen_icmp_echo_req(client, server, 7, 1, b"ping");
    let (conn, _, _) =
        accepted(h.tracker.process(&mut req, Some(&rule)).unwrap());
    verify_checksums(&req).unwrap();
    let outside_id = u16::from_be_bytes([req[24], req[25]]);
    assert_ne!(outside_id, 7);
    assert_eq!(conn.tuple(Direction::Reply).src.id, outside_id);

    let mut reply =
        gen_icmp_echo_reply(server, ETH0_ADDR, outside_id, 1, b"ping");
    let (conn2, dir, _) =
        accepted(h.tracker.process(&mut reply, Some(&rule)).unwrap());
    assert_eq!(conn2.id(), conn.id());
    assert_eq!(dir, Direction::Reply);
    assert_eq!(&reply[16..20], &client.bytes());
    assert_eq!(u16::from_be_bytes([reply[24], reply[25]]), 7);
    verify_checksums(&reply).unwrap();
}

#[test]
fn address_change_forces_new_translation() {
    let h = harness();
    let rule = masq_rule("out");
    let mut pkt = udp_pkt(ip("10.0.0.1"), 5000, ip("192.0.2.1"), 53, b"x");
    h.tracker.process(&mut pkt.clone(), Some(&rule)).unwrap();

    h.routes.set(ETH0, ip("198.51.100.200"));
    assert_eq!(h.tracker.handle_event(IfEvent::AddrChanged(ETH0)), 1);

    let (_, _, new) =
        accepted(h.tracker.process(&mut pkt, Some(&rule)).unwrap());
    assert!(new);
    assert_eq!(src_of(&pkt).0, ip("198.51.100.200"));
}

#[test]
fn concurrent_first_packets_create_once() {
    let h = harness();
    let rule = masq_rule("out");
    let pkt = udp_pkt(ip("10.0.0.1"), 5000, ip("192.0.2.1"), 53, b"x");

    let created: usize = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(|| {
                    let mut n = 0;
                    for _ in 0..100 {
                        let mut p = pkt.clone();
                        let v = h.tracker.process(&mut p, Some(&rule));
                        let (_, _, new) = accepted(v.unwrap());
                        n += usize::from(new);
                    }
                    n
                })
            })
            .collect();
        handles.into_iter().map(|t| t.join().unwrap()).sum()
    });

    assert_eq!(created, 1);
    assert_eq!(h.tracker.registry().len(), 1);
    let (conn, _) = h
        .tracker
        .registry()
        .lookup(&Tuple::new_ports(
            Protocol::UDP,
            ip("10.0.0.1"),
            5000,
            ip("192.0.2.1"),
            53,
        ))
        .unwrap();
    assert_eq!(conn.hits(), 800);
}

#[test]
fn concurrent_allocation_never_collides() {
    let h = harness();
    let rule = snat_rule("203.0.113.5:40000-40099");

    thread::scope(|s| {
        for t in 0..4u8 {
            let h = &h;
            let rule = &rule;
            s.spawn(move || {
                for i in 0..25u8 {
                    let client = Ipv4Addr::from([10, 0, t, i]);
                    let mut p =
                        udp_pkt(client, 5000, ip("192.0.2.1"), 53, b"x");
                    h.tracker.process(&mut p, Some(rule)).unwrap();
                }
            });
        }
    });

    let dump = h.tracker.dump(Moment::now());
    assert_eq!(dump.conns.len(), 100);
    let ports: BTreeSet<u16> =
        dump.conns.iter().map(|c| c.reply.dst.id).collect();
    assert_eq!(ports.len(), 100);
    assert!(ports.iter().all(|p| (40000..=40099).contains(p)));
}

#[test]
fn eviction_races_with_lookups() {
    let h = harness();
    let rule = masq_rule("out");
    let mut tuples = vec![];
    for i in 0..200u16 {
        let mut p =
            udp_pkt(ip("10.0.0.1"), 10_000 + i, ip("192.0.2.1"), 53, b"x");
        let (conn, _, _) =
            accepted(h.tracker.process(&mut p, Some(&rule)).unwrap());
        tuples.push(*conn.tuple(Direction::Original));
        tuples.push(*conn.tuple(Direction::Reply));
    }

    let evicted = thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for t in &tuples {
                    // Either fully present or fully gone.
                    let found = h.tracker.registry().lookup(t);
                    if let Some((conn, dir)) = found {
                        assert_eq!(conn.tuple(dir), t);
                    }
                }
            });
        }
        h.tracker.masq().on_interface_down_or_changed(ETH0)
    });

    assert_eq!(evicted, 200);
    for t in &tuples {
        assert!(h.tracker.registry().lookup(t).is_none());
    }
}

// Random rewrites of random packets, checked by recomputation.
#[test]
fn incremental_checksums_match_recompute() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let nat = NatEngine::new(null_log());

    for _ in 0..2_000 {
        let src = Ipv4Addr::from(rng.random::<u32>());
        let dst = Ipv4Addr::from(rng.random::<u32>());
        let sport = rng.random::<u16>();
        let dport = rng.random::<u16>();
        let len = rng.random_range(0..64);
        let mut payload = vec![0u8; len];
        rng.fill(&mut payload[..]);

        let mut pkt = match rng.random_range(0..4) {
            0 => tcp_pkt(src, sport, dst, dport, &payload),
            1 => udp_pkt(src, sport, dst, dport, &payload),
            2 => udp_pkt_no_csum(src, sport, dst, dport, &payload),
            _ => gen_icmp_echo_req(src, dst, sport, dport, &payload),
        };
        let zero_udp = pkt[9] == 17
            && pkt[UDP_CSUM_OFF..UDP_CSUM_OFF + 2] == [0, 0];

        let mut view = PacketView::parse(&mut pkt).unwrap();
        let mut target = view.tuple();
        let manip = if rng.random_bool(0.5) {
            target.src.ip = Ipv4Addr::from(rng.random::<u32>());
            target.src.id = rng.random();
            ManipType::Src
        } else {
            target.dst.ip = Ipv4Addr::from(rng.random::<u32>());
            target.dst.id = rng.random();
            if target.proto == Protocol::ICMP {
                target.src.id = rng.random();
            }
            ManipType::Dst
        };
        nat.manip_pkt(&mut view, &target, manip).unwrap();

        verify_checksums(&pkt).unwrap();
        if zero_udp {
            assert_eq!(&pkt[UDP_CSUM_OFF..UDP_CSUM_OFF + 2], &[0, 0]);
        }
        let tuple = PacketView::parse(&mut pkt).unwrap().tuple();
        match manip {
            ManipType::Src => assert!(tuple.src_equal(&target)),
            ManipType::Dst => {
                assert_eq!(tuple.dst.ip, target.dst.ip)
            }
        }
    }
}

#[test]
fn random_ranges_are_respected() {
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..20 {
        let h = harness();
        let lo = rng.random_range(1024..60_000u16);
        let hi = lo + rng.random_range(0..32u16);
        let rule = snat_rule(&format!("203.0.113.5-203.0.113.8:{lo}-{hi}"));

        for i in 0..rng.random_range(1..64u8) {
            let client = Ipv4Addr::from([10, 0, 0, i]);
            let mut p = udp_pkt(client, 5000, ip("192.0.2.1"), 53, b"x");
            match h.tracker.process(&mut p, Some(&rule)) {
                Ok(v) => {
                    let (conn, _, _) = accepted(v);
                    let r = conn.tuple(Direction::Reply);
                    assert!((lo..=hi).contains(&r.dst.id));
                    let a = u32::from(r.dst.ip);
                    assert!(a >= u32::from(ip("203.0.113.5")));
                    assert!(a <= u32::from(ip("203.0.113.8")));
                }
                Err(Error::TranslationExhausted { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        let dump = h.tracker.dump(Moment::now());
        let replies: BTreeSet<Tuple> =
            dump.conns.iter().map(|c| c.reply).collect();
        assert_eq!(replies.len(), dump.conns.len());
    }
}

#[test]
fn token_bucket_stays_bounded() {
    let mut rng = StdRng::seed_from_u64(42);
    let t0 = Moment::now();
    let cfg = RateLimitCfg::new(rng.random_range(1..50_000), 4);
    let rl = RateLimit::new_at(cfg, t0).unwrap();
    let mut now = t0;

    for _ in 0..5_000 {
        if rng.random_bool(0.3) {
            now = now + Duration::from_millis(rng.random_range(0..2_000));
        }
        rl.check_at(now);
        let st = rl.state();
        assert!(st.credit <= st.credit_cap);
    }
}

#[test]
fn config_driven_replay() {
    let cfg = Config::from_toml(
        r#"
        [[interface]]
        name = "eth0"
        index = 2
        addr = "203.0.113.1"

        [[rule]]
        name = "web"
        proto = "tcp"
        dst_port = 80
        nat = "dnat"
        to = "10.1.1.1:8080"

        [[rule]]
        name = "out"
        src = "10.0.0.0/8"
        nat = "masquerade"
        out = "eth0"
        "#,
    )
    .unwrap();
    let setup = cfg.build(null_log()).unwrap();

    let mut cap = PcapBuilder::new(Vec::new());
    let public = ip("203.0.113.1");
    let server = ip("192.0.2.1");
    cap.add_pkt(&tcp_pkt(ip("198.51.100.7"), 40001, public, 80, &[]));
    cap.add_pkt(&udp_pkt(ip("10.0.0.1"), 5000, server, 53, b"q"));
    cap.add_pkt(&udp_pkt(server, 53, public, 5000, b"a"));
    let bytes = cap.finish();

    for mut pkt in read_pkts(&bytes) {
        let tuple = PacketView::parse(&mut pkt).unwrap().tuple();
        let rule = setup.rules.select(&tuple);
        setup.tracker.process(&mut pkt, rule).unwrap();
        verify_checksums(&pkt).unwrap();
    }

    let dump = setup.tracker.dump(Moment::now());
    assert_eq!(dump.conns.len(), 2);
    assert_eq!(dump.conns.iter().filter(|c| c.dnat).count(), 1);
    assert_eq!(dump.conns.iter().filter(|c| c.masquerade).count(), 1);

    let json = serde_json::to_string(&dump).unwrap();
    let back: DumpConnsResp = serde_json::from_str(&json).unwrap();
    assert_eq!(back, dump);

    let mut out = vec![];
    print_conns_into(&mut out, &dump).unwrap();
    let out = String::from_utf8(out).unwrap();
    assert!(out.contains("Connections: 2"));
    assert!(out.contains("SNAT,MASQ"));
}
