//! Attack flow synthesis
//!
//! Turns topology-level attack vectors into one canonical stream of
//! fully-addressed flow events. Every event is minted exactly once, before
//! any per-view assembly starts, so the outbound record at the source
//! network and the inbound record at the destination network are the same
//! wire tuple by construction.
//!
//! Event spacing is fixed-interval per modeled host (`1/rate`), with a
//! 10 ms stagger between hosts; an optional jittered policy adds a seeded
//! uniform offset within one interval.

use std::net::Ipv4Addr;

use chrono::{Duration, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::config::{GeneratorConfig, TimingPolicy};
use crate::error::{GenError, Result};
use crate::mapper::{AddressMapper, AddressRole};
use crate::record::{FlowRecord, Protocol};
use crate::topology::{AttackVector, ScanPattern, Topology, VectorWindow};

/// Role of one event within its vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Spoofed request toward an amplification service
    AmplificationRequest,
    /// Amplified response toward the victim
    AmplificationResponse,
    Flood,
    Probe,
}

/// One synthesized attack flow, fully addressed
///
/// `source_net`/`dest_net` are the logical identities the assembler uses to
/// fan the event out: outbound at the source view, inbound at the
/// destination view, identical tuple at both.
#[derive(Debug, Clone, PartialEq)]
pub struct AttackFlowEvent {
    /// Index of the originating vector in the topology
    pub vector: usize,
    pub kind: EventKind,
    pub source_net: String,
    pub dest_net: String,
    pub protocol: Protocol,
    pub src_addr: Ipv4Addr,
    pub src_port: u16,
    pub dst_addr: Ipv4Addr,
    pub dst_port: u16,
    pub stime: NaiveDateTime,
    pub duration_secs: f64,
    pub packets: u64,
    pub bytes: u64,
}

impl AttackFlowEvent {
    /// The flow record this event renders as, in either view
    pub fn to_record(&self) -> FlowRecord {
        FlowRecord {
            protocol: self.protocol,
            src_ip: self.src_addr,
            src_port: self.src_port,
            dst_ip: self.dst_addr,
            dst_port: self.dst_port,
            stime: self.stime,
            packets: self.packets,
            bytes: self.bytes,
            duration_secs: self.duration_secs,
        }
    }
}

/// Per-vector cap on emitted events
struct EventBudget {
    vector: usize,
    remaining: u64,
    warned: bool,
}

impl EventBudget {
    fn new(vector: usize, cap: u64) -> Self {
        Self {
            vector,
            remaining: cap,
            warned: false,
        }
    }

    fn push(&mut self, events: &mut Vec<AttackFlowEvent>, event: AttackFlowEvent) {
        if self.remaining == 0 {
            if !self.warned {
                warn!(
                    vector = self.vector,
                    "event cap reached, dropping the remainder of this vector"
                );
                self.warned = true;
            }
            return;
        }
        self.remaining -= 1;
        events.push(event);
    }

    fn exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Room for a paired emission. Amplification never splits a
    /// request/response pair across the cap.
    fn has_pair(&mut self) -> bool {
        if self.remaining < 2 {
            if !self.warned {
                warn!(
                    vector = self.vector,
                    "event cap reached, dropping the remainder of this vector"
                );
                self.warned = true;
            }
            self.remaining = 0;
            return false;
        }
        true
    }
}

/// Generates the canonical attack event stream for one run
pub struct Synthesizer<'a> {
    mapper: &'a AddressMapper,
    config: &'a GeneratorConfig,
}

impl<'a> Synthesizer<'a> {
    pub fn new(mapper: &'a AddressMapper, config: &'a GeneratorConfig) -> Self {
        Self { mapper, config }
    }

    /// Generate all events for all vectors. Must complete before any view
    /// assembly: amplification pairing needs both sides materialized.
    pub fn synthesize(&self, topology: &Topology) -> Result<Vec<AttackFlowEvent>> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut events = Vec::new();

        for (idx, vector) in topology.vectors.iter().enumerate() {
            let before = events.len();
            let mut budget = EventBudget::new(idx, self.config.max_events_per_vector);

            match vector {
                AttackVector::Amplification { .. } => {
                    self.gen_amplification(idx, vector, topology, &mut rng, &mut budget, &mut events)?
                }
                AttackVector::Flood { .. } => {
                    self.gen_flood(idx, vector, topology, &mut rng, &mut budget, &mut events)?
                }
                AttackVector::Probe { .. } => {
                    self.gen_probe(idx, vector, topology, &mut rng, &mut budget, &mut events)?
                }
            }

            debug!(
                vector = idx,
                kind = vector.kind(),
                events = events.len() - before,
                "vector synthesized"
            );
        }

        info!(total = events.len(), "attack event synthesis complete");
        Ok(events)
    }

    fn gen_amplification(
        &self,
        idx: usize,
        vector: &AttackVector,
        topology: &Topology,
        rng: &mut StdRng,
        budget: &mut EventBudget,
        events: &mut Vec<AttackFlowEvent>,
    ) -> Result<()> {
        let AttackVector::Amplification {
            sources,
            reflector,
            target,
            protocol,
            service_port,
            client_port,
            amplification_factor,
            reflector_hosts,
            rate_per_host,
            request_packets,
            request_bytes,
            flow_secs,
            window,
        } = vector
        else {
            unreachable!("dispatched on variant");
        };

        let reflector_mapping = self.mapper.mapping_for(reflector)?;
        let victim_addr = self.victim_wire_addr(topology, target)?;
        let hosts = self.clamp_hosts(*reflector_hosts, idx);

        for host in 0..hosts {
            let amp_addr = reflector_mapping.host_in_block("amplifier", host);
            for stime in self.event_times(window, *rate_per_host, host, rng) {
                if budget.exhausted() {
                    break;
                }
                for source in sources {
                    if !budget.has_pair() {
                        break;
                    }
                    let packets = self.jitter(*request_packets, rng);
                    let bytes = self.jitter(*request_bytes, rng);

                    // The attacker spoofs the victim's address: the request
                    // carries it as source, so the reflector replies to the
                    // victim, never to the attacker.
                    budget.push(
                        events,
                        AttackFlowEvent {
                            vector: idx,
                            kind: EventKind::AmplificationRequest,
                            source_net: source.clone(),
                            dest_net: reflector.clone(),
                            protocol: *protocol,
                            src_addr: victim_addr,
                            src_port: *client_port,
                            dst_addr: amp_addr,
                            dst_port: *service_port,
                            stime,
                            duration_secs: *flow_secs as f64,
                            packets,
                            bytes,
                        },
                    );
                    budget.push(
                        events,
                        AttackFlowEvent {
                            vector: idx,
                            kind: EventKind::AmplificationResponse,
                            source_net: reflector.clone(),
                            dest_net: target.clone(),
                            protocol: *protocol,
                            src_addr: amp_addr,
                            src_port: *service_port,
                            dst_addr: victim_addr,
                            dst_port: *client_port,
                            stime,
                            duration_secs: *flow_secs as f64,
                            packets: packets * u64::from(*amplification_factor),
                            bytes: bytes * u64::from(*amplification_factor),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    fn gen_flood(
        &self,
        idx: usize,
        vector: &AttackVector,
        topology: &Topology,
        rng: &mut StdRng,
        budget: &mut EventBudget,
        events: &mut Vec<AttackFlowEvent>,
    ) -> Result<()> {
        let AttackVector::Flood {
            sources,
            target,
            protocol,
            dst_port,
            src_port,
            hosts_per_source,
            rate_per_host,
            packets_per_flow,
            bytes_per_flow,
            flow_secs,
            window,
        } = vector
        else {
            unreachable!("dispatched on variant");
        };

        let victim_addr = self.victim_wire_addr(topology, target)?;
        let hosts = self.clamp_hosts(*hosts_per_source, idx);

        for source in sources {
            let mapping = self.mapper.mapping_for(source)?;
            for host in 0..hosts {
                let bot_addr = mapping.host_in_block("bot", host);
                let port_base = derived_port_base(source, host);
                for (tick, stime) in self
                    .event_times(window, *rate_per_host, host, rng)
                    .into_iter()
                    .enumerate()
                {
                    if budget.exhausted() {
                        break;
                    }
                    // Derived ports rotate per tick but stay identical in
                    // both views, since they are fixed here at synthesis.
                    let sport = (*src_port)
                        .unwrap_or(10_000 + ((port_base + tick as u32) % 55_536) as u16);
                    budget.push(
                        events,
                        AttackFlowEvent {
                            vector: idx,
                            kind: EventKind::Flood,
                            source_net: source.clone(),
                            dest_net: target.clone(),
                            protocol: *protocol,
                            src_addr: bot_addr,
                            src_port: sport,
                            dst_addr: victim_addr,
                            dst_port: *dst_port,
                            stime,
                            duration_secs: *flow_secs as f64,
                            packets: self.jitter(*packets_per_flow, rng),
                            bytes: self.jitter(*bytes_per_flow, rng),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    fn gen_probe(
        &self,
        idx: usize,
        vector: &AttackVector,
        topology: &Topology,
        rng: &mut StdRng,
        budget: &mut EventBudget,
        events: &mut Vec<AttackFlowEvent>,
    ) -> Result<()> {
        let AttackVector::Probe {
            sources,
            target,
            protocol,
            first_port,
            last_port,
            hosts_per_source,
            rate_per_host,
            pattern,
            attempt_secs,
            window,
        } = vector
        else {
            unreachable!("dispatched on variant");
        };

        let target_block = topology.network(target)?.block;
        // Usable host addresses inside the target block; tiny blocks have
        // no network/broadcast carve-out
        let (first_host, capacity) = if target_block.prefix() >= 31 {
            (u32::from(target_block.network()), target_block.size())
        } else {
            (u32::from(target_block.network()) + 1, target_block.size() - 2)
        };
        let capacity = capacity.max(1);
        let port_span = u32::from(*last_port - *first_port) + 1;

        let hosts = self.clamp_hosts(*hosts_per_source, idx);
        let mut seq: u32 = 0;

        for source in sources {
            let mapping = self.mapper.mapping_for(source)?;
            for host in 0..hosts {
                let scan_addr = mapping.host_in_block("scanner", host);
                for stime in self.event_times(window, *rate_per_host, host, rng) {
                    if budget.exhausted() {
                        break;
                    }
                    let (dst_addr, dst_port) = match pattern {
                        ScanPattern::Sequential => {
                            let n = seq;
                            seq = seq.wrapping_add(1);
                            (
                                Ipv4Addr::from(first_host + (n % capacity)),
                                *first_port + (n % port_span) as u16,
                            )
                        }
                        ScanPattern::Random => (
                            Ipv4Addr::from(first_host + rng.gen_range(0..capacity)),
                            rng.gen_range(*first_port..=*last_port),
                        ),
                    };

                    // Attempt only: a handful of SYN retries, no
                    // established-connection volume.
                    let packets = 1 + attempt_secs;
                    budget.push(
                        events,
                        AttackFlowEvent {
                            vector: idx,
                            kind: EventKind::Probe,
                            source_net: source.clone(),
                            dest_net: target.clone(),
                            protocol: *protocol,
                            src_addr: scan_addr,
                            src_port: rng.gen_range(49_152..=65_535),
                            dst_addr,
                            dst_port,
                            stime,
                            duration_secs: *attempt_secs as f64,
                            packets,
                            bytes: 64 * packets,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// Event start times for one host: fixed `1/rate` spacing from the
    /// window start, staggered 10 ms per host index.
    fn event_times(
        &self,
        window: &VectorWindow,
        rate: f64,
        host: u32,
        rng: &mut StdRng,
    ) -> Vec<NaiveDateTime> {
        let count = (window.duration_secs as f64 * rate).ceil() as u64;
        let interval_ms = 1000.0 / rate;
        let stagger_ms = 10.0 * f64::from(host + 1);

        let mut times = Vec::with_capacity(count as usize);
        for i in 0..count {
            let jitter_ms = match self.config.timing {
                TimingPolicy::FixedInterval => 0.0,
                TimingPolicy::Jittered => rng.gen_range(0.0..interval_ms),
            };
            let offset_ms = stagger_ms + i as f64 * interval_ms + jitter_ms;
            times.push(window.start + Duration::milliseconds(offset_ms.round() as i64));
        }
        times
    }

    fn jitter(&self, base: u64, rng: &mut StdRng) -> u64 {
        if self.config.volume_jitter && base > 0 {
            base + rng.gen_range(0..=base)
        } else {
            base
        }
    }

    fn clamp_hosts(&self, requested: u32, vector: usize) -> u32 {
        if requested > self.config.max_hosts_per_vector {
            warn!(
                vector,
                requested,
                cap = self.config.max_hosts_per_vector,
                "host fan-out clamped"
            );
            self.config.max_hosts_per_vector
        } else {
            requested
        }
    }

    /// The victim's wire address. The victim owns it, so it goes through
    /// the victim network's local mapping, never a remote hash.
    fn victim_wire_addr(&self, topology: &Topology, target: &str) -> Result<Ipv4Addr> {
        let net = topology.network(target)?;
        let victim = net.victim_addr.ok_or_else(|| {
            GenError::TopologyConsistency(format!(
                "target network '{}' declares no victim address",
                target
            ))
        })?;
        self.mapper
            .mapping_for(target)?
            .rewrite(victim, AddressRole::Local)
    }
}

/// Stable per-(network, host) source port base for derived flood ports
fn derived_port_base(network: &str, host: u32) -> u32 {
    let digest = md5::compute(format!("{}|bot-port|{}", network, host));
    digest.0[..8].iter().map(|&b| u32::from(b)).sum()
}
