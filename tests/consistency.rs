//! Cross-view consistency of generated datasets
//!
//! End-to-end properties over the whole pipeline: determinism, address
//! space separation, and agreement between the attacker-side and
//! victim-side renderings of every attack flow.

use std::net::Ipv4Addr;

use chrono::{NaiveDate, NaiveDateTime};

use flowsynth::config::GeneratorConfig;
use flowsynth::record::{FlowRecord, NoiseDataset, Protocol};
use flowsynth::topology::{AttackVector, Network, ScanPattern, Topology, VectorWindow};
use flowsynth::view::GeneratedView;
use flowsynth::writer::render_view;
use flowsynth::FlowSynth;

fn stime(sec: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2017, 3, 15)
        .unwrap()
        .and_hms_opt(6, 0, sec)
        .unwrap()
}

fn window(duration_secs: u64) -> VectorWindow {
    VectorWindow {
        start: stime(10),
        duration_secs,
    }
}

fn noise() -> NoiseDataset {
    let base = FlowRecord {
        protocol: Protocol::Tcp,
        src_ip: "1.2.3.4".parse().unwrap(),
        src_port: 52476,
        dst_ip: "5.6.7.8".parse().unwrap(),
        dst_port: 25,
        stime: stime(0),
        packets: 12,
        bytes: 3400,
        duration_secs: 2.5,
    };
    let mut other = base.clone();
    other.src_ip = "94.23.80.138".parse().unwrap();
    other.stime = stime(5);
    NoiseDataset {
        inbound: vec![base.clone(), other],
        outbound: vec![FlowRecord {
            src_ip: base.dst_ip,
            dst_ip: base.src_ip,
            src_port: base.dst_port,
            dst_port: base.src_port,
            ..base
        }],
    }
}

/// Two attacker networks plus a victim, one UDP flood vector
/// (one host each, fixed source port, a single send interval).
fn flood_topology() -> Topology {
    Topology {
        networks: vec![
            Network::new("atk0", "172.20.0.0/16".parse().unwrap()),
            Network::new("atk1", "172.21.0.0/16".parse().unwrap()),
            Network::new("victim", "172.22.0.0/16".parse().unwrap())
                .with_victim("172.22.99.99".parse().unwrap()),
        ],
        vectors: vec![AttackVector::Flood {
            sources: vec!["atk0".into(), "atk1".into()],
            target: "victim".into(),
            protocol: Protocol::Udp,
            dst_port: 12345,
            src_port: Some(53),
            hosts_per_source: 1,
            rate_per_host: 1.0,
            packets_per_flow: 20,
            bytes_per_flow: 6000,
            flow_secs: 55,
            window: window(1),
        }],
    }
}

fn view<'a>(views: &'a [GeneratedView], id: &str) -> &'a GeneratedView {
    views.iter().find(|v| v.network == id).unwrap()
}

#[test]
fn flood_is_consistent_across_views() {
    let generator = FlowSynth::new(GeneratorConfig::default());
    let views = generator.generate(&noise(), &flood_topology()).unwrap();

    let victim_atk: Vec<&FlowRecord> = view(&views, "victim")
        .inbound
        .iter()
        .filter(|r| r.dst_port == 12345)
        .collect();
    assert_eq!(victim_atk.len(), 2);

    let atk0_block: ipnetwork::Ipv4Network = "172.20.0.0/16".parse().unwrap();
    let atk1_block: ipnetwork::Ipv4Network = "172.21.0.0/16".parse().unwrap();
    let victim_addr: Ipv4Addr = "172.22.99.99".parse().unwrap();

    for rec in &victim_atk {
        assert_eq!(rec.protocol, Protocol::Udp);
        assert_eq!(rec.src_port, 53);
        assert_eq!(rec.dst_ip, victim_addr);
        assert!(atk0_block.contains(rec.src_ip) || atk1_block.contains(rec.src_ip));
    }

    // Each attacker's outbound holds exactly the matching record
    for id in ["atk0", "atk1"] {
        let outbound: Vec<&FlowRecord> = view(&views, id)
            .outbound
            .iter()
            .filter(|r| r.dst_port == 12345)
            .collect();
        assert_eq!(outbound.len(), 1);
        assert!(
            victim_atk.iter().any(|v| *v == outbound[0]),
            "attacker {} record missing from victim view",
            id
        );
    }
}

#[test]
fn amplification_pairs_are_consistent() {
    let topology = Topology {
        networks: vec![
            Network::new("atk", "172.20.0.0/16".parse().unwrap()),
            Network::new("reflector", "172.21.0.0/16".parse().unwrap()),
            Network::new("victim", "172.22.0.0/16".parse().unwrap())
                .with_victim("172.22.99.99".parse().unwrap()),
        ],
        vectors: vec![AttackVector::Amplification {
            sources: vec!["atk".into()],
            reflector: "reflector".into(),
            target: "victim".into(),
            protocol: Protocol::Udp,
            service_port: 123,
            client_port: 80,
            amplification_factor: 500,
            reflector_hosts: 3,
            rate_per_host: 1.0,
            request_packets: 1,
            request_bytes: 200,
            flow_secs: 55,
            window: window(2),
        }],
    };

    let generator = FlowSynth::new(GeneratorConfig::default());
    let views = generator.generate(&noise(), &topology).unwrap();

    let victim_addr: Ipv4Addr = "172.22.99.99".parse().unwrap();
    let reflector_block: ipnetwork::Ipv4Network = "172.21.0.0/16".parse().unwrap();

    // Requests: attacker outbound == reflector inbound, spoofed victim source
    let atk_out: Vec<&FlowRecord> = view(&views, "atk")
        .outbound
        .iter()
        .filter(|r| r.dst_port == 123)
        .collect();
    let refl_in: Vec<&FlowRecord> = view(&views, "reflector")
        .inbound
        .iter()
        .filter(|r| r.dst_port == 123)
        .collect();
    assert_eq!(atk_out.len(), 6); // 3 reflector hosts x 2 ticks
    assert_eq!(atk_out.len(), refl_in.len());
    for req in &atk_out {
        assert_eq!(req.src_ip, victim_addr, "spoofed source must be the victim");
        assert!(reflector_block.contains(req.dst_ip));
        assert!(refl_in.iter().any(|r| *r == *req));
    }

    // Responses: reflector outbound == victim inbound, volume scaled x500
    let refl_out: Vec<&FlowRecord> = view(&views, "reflector")
        .outbound
        .iter()
        .filter(|r| r.src_port == 123)
        .collect();
    let victim_in: Vec<&FlowRecord> = view(&views, "victim")
        .inbound
        .iter()
        .filter(|r| r.src_port == 123)
        .collect();
    assert_eq!(refl_out.len(), 6);
    assert_eq!(refl_out.len(), victim_in.len());
    for resp in &refl_out {
        assert_eq!(resp.dst_ip, victim_addr);
        assert!(reflector_block.contains(resp.src_ip));
        assert!(victim_in.iter().any(|r| *r == *resp));
        let paired_request = atk_out
            .iter()
            .find(|req| req.dst_ip == resp.src_ip && req.stime == resp.stime)
            .expect("every response pairs with a request");
        assert_eq!(resp.bytes, paired_request.bytes * 500);
    }

    // The attacker never appears as a source address at the victim
    let atk_block: ipnetwork::Ipv4Network = "172.20.0.0/16".parse().unwrap();
    assert!(view(&views, "victim")
        .inbound
        .iter()
        .all(|r| !atk_block.contains(r.src_ip)));
}

#[test]
fn probe_attempts_land_in_target_block() {
    let topology = Topology {
        networks: vec![
            Network::new("atk", "172.20.0.0/16".parse().unwrap()),
            Network::new("scanned", "172.22.0.0/16".parse().unwrap()),
        ],
        vectors: vec![AttackVector::Probe {
            sources: vec!["atk".into()],
            target: "scanned".into(),
            protocol: Protocol::Tcp,
            first_port: 2323,
            last_port: 2323,
            hosts_per_source: 2,
            rate_per_host: 2.0,
            pattern: ScanPattern::Random,
            attempt_secs: 5,
            window: window(3),
        }],
    };

    let generator = FlowSynth::new(GeneratorConfig::default());
    let views = generator.generate(&noise(), &topology).unwrap();

    let scanned_block: ipnetwork::Ipv4Network = "172.22.0.0/16".parse().unwrap();
    let attempts: Vec<&FlowRecord> = view(&views, "scanned")
        .inbound
        .iter()
        .filter(|r| r.dst_port == 2323)
        .collect();
    assert_eq!(attempts.len(), 12); // 2 hosts x ceil(3s x 2/s)
    for rec in &attempts {
        assert_eq!(rec.protocol, Protocol::Tcp);
        assert!(scanned_block.contains(rec.dst_ip));
        assert_eq!(rec.packets, 6);
        assert_eq!(rec.bytes, 384);
    }

    let outbound_attempts = view(&views, "atk")
        .outbound
        .iter()
        .filter(|r| r.dst_port == 2323)
        .count();
    assert_eq!(outbound_attempts, 12);
}

#[test]
fn runs_are_byte_identical_for_same_seed() {
    let config = GeneratorConfig::default().with_seed(7);
    let topology = flood_topology();

    let first = FlowSynth::new(config.clone())
        .generate(&noise(), &topology)
        .unwrap();
    let second = FlowSynth::new(config)
        .generate(&noise(), &topology)
        .unwrap();

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        let (a_in, a_out) = render_view(a).unwrap();
        let (b_in, b_out) = render_view(b).unwrap();
        assert_eq!(a_in, b_in);
        assert_eq!(a_out, b_out);
    }
}

#[test]
fn seeds_change_external_addresses() {
    let topology = flood_topology();
    let first = FlowSynth::new(GeneratorConfig::default().with_seed(1))
        .generate(&noise(), &topology)
        .unwrap();
    let second = FlowSynth::new(GeneratorConfig::default().with_seed(2))
        .generate(&noise(), &topology)
        .unwrap();

    // Same noise record, different remote remapping
    assert_ne!(
        view(&first, "atk0").inbound[0].src_ip,
        view(&second, "atk0").inbound[0].src_ip
    );
}

#[test]
fn remote_addresses_diverge_and_locals_stay_in_block() {
    let generator = FlowSynth::new(GeneratorConfig::default());
    let views = generator.generate(&noise(), &flood_topology()).unwrap();

    // tcp 1.2.3.4:52476 -> 5.6.7.8:25 seen at two networks
    let at_a = view(&views, "atk0")
        .inbound
        .iter()
        .find(|r| r.src_port == 52476)
        .unwrap();
    let at_b = view(&views, "atk1")
        .inbound
        .iter()
        .find(|r| r.src_port == 52476)
        .unwrap();

    assert_ne!(at_a.src_ip, at_b.src_ip, "external remap must not correlate");
    assert_eq!(at_a.dst_ip, "172.20.7.8".parse::<Ipv4Addr>().unwrap());
    assert_eq!(at_b.dst_ip, "172.21.7.8".parse::<Ipv4Addr>().unwrap());
}

#[test]
fn no_external_address_lands_in_declared_blocks() {
    let generator = FlowSynth::new(GeneratorConfig::default());
    let topology = flood_topology();
    let views = generator.generate(&noise(), &topology).unwrap();

    for v in &views {
        for rec in v.inbound.iter().chain(&v.outbound) {
            for addr in [rec.src_ip, rec.dst_ip] {
                let owner = topology.networks.iter().find(|n| n.block.contains(addr));
                if let Some(owner) = owner {
                    // Addresses inside a declared block must belong there:
                    // either this view's own side or an attack endpoint
                    let legitimate = owner.id == v.network
                        || rec.dst_port == 12345
                        || rec.src_port == 53;
                    assert!(
                        legitimate,
                        "view {} shows {} inside block of {}",
                        v.network, addr, owner.id
                    );
                }
            }
        }
    }
}

#[test]
fn end_to_end_files_load_back() {
    let dir = tempfile::tempdir().unwrap();
    let dataset_dir = dir.path().join("dataset");
    std::fs::create_dir(&dataset_dir).unwrap();

    // Render the in-memory noise fixture to disk in table form
    let noise_views = GeneratedView {
        network: "seed".into(),
        inbound: noise().inbound,
        outbound: noise().outbound,
    };
    let (inbound, outbound) = render_view(&noise_views).unwrap();
    std::fs::write(dataset_dir.join("inbound"), inbound).unwrap();
    std::fs::write(dataset_dir.join("outbound"), outbound).unwrap();

    let topology_path = dir.path().join("topology.toml");
    std::fs::write(
        &topology_path,
        r#"
        [[networks]]
        id = "atk0"
        block = "172.20"

        [[networks]]
        id = "victim"
        block = "172.22"
        victim_addr = "172.22.99.99"

        [[vectors]]
        type = "flood"
        sources = ["atk0"]
        target = "victim"
        protocol = "udp"
        dst_port = 12345
        src_port = 53
        hosts_per_source = 1
        rate_per_host = 1.0
        packets_per_flow = 20
        bytes_per_flow = 6000

        [vectors.window]
        start = "2017-03-15T06:00:10"
        duration_secs = 1
        "#,
    )
    .unwrap();

    let outdir = dir.path().join("result");
    FlowSynth::new(GeneratorConfig::default())
        .run(&dataset_dir, &topology_path, &outdir)
        .unwrap();

    // Generated files parse with the same reader as the input tables
    let text = std::fs::read_to_string(outdir.join("victim-inbound.txt")).unwrap();
    let records = NoiseDataset::parse_table(&text, "victim-inbound").unwrap();
    assert_eq!(records.len(), 3); // 2 noise + 1 attack flow
    assert!(records.iter().any(|r| r.dst_port == 12345));
}
