//! Attack topology model
//!
//! Networks (vantage points with their own address blocks) and the attack
//! vectors bound to them. Loaded once per run and validated before any
//! synthesis starts; immutable afterwards.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::Path;

use chrono::NaiveDateTime;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::error::{GenError, Result};
use crate::record::Protocol;

/// One participant network in the topology
#[derive(Debug, Clone)]
pub struct Network {
    /// Unique identifier, used in vector bindings and output file names
    pub id: String,
    /// Address block this network is authoritative for
    pub block: Ipv4Network,
    /// Address of the victim host, for networks targeted by floods or
    /// amplification. Must lie inside `block`.
    pub victim_addr: Option<Ipv4Addr>,
}

impl Network {
    pub fn new(id: impl Into<String>, block: Ipv4Network) -> Self {
        Self {
            id: id.into(),
            block,
            victim_addr: None,
        }
    }

    pub fn with_victim(mut self, addr: Ipv4Addr) -> Self {
        self.victim_addr = Some(addr);
        self
    }
}

/// Active window of one attack vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorWindow {
    /// Start of the attack
    pub start: NaiveDateTime,
    /// How long the vector stays active
    pub duration_secs: u64,
}

/// Destination selection order for probe scans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPattern {
    #[default]
    Sequential,
    Random,
}

/// One attack behavior bound to source and target networks
///
/// Closed set: the synthesizer matches exhaustively, so a new vector kind
/// is a compile-time-checked extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttackVector {
    /// Spoofed requests bounced off a reflector network toward the victim
    Amplification {
        /// Networks emitting the spoofed requests
        sources: Vec<String>,
        /// Network hosting the reflection/amplification service
        reflector: String,
        /// Victim network
        target: String,
        protocol: Protocol,
        /// Port the amplification service listens on (123 for NTP, 53 for DNS)
        service_port: u16,
        /// Port the victim appears to send requests from
        client_port: u16,
        /// Response volume as a multiple of request volume
        amplification_factor: u32,
        /// Distinct reflector hosts inside the reflector network
        reflector_hosts: u32,
        /// Request flows per second per reflector host
        rate_per_host: f64,
        request_packets: u64,
        request_bytes: u64,
        /// Reported duration of each flow record
        #[serde(default = "default_flow_secs")]
        flow_secs: u64,
        window: VectorWindow,
    },

    /// Direct high-rate traffic from attacking hosts at the victim
    Flood {
        sources: Vec<String>,
        target: String,
        protocol: Protocol,
        dst_port: u16,
        /// Fixed source port (e.g. 53 for DNS-query floods); derived per
        /// host when absent
        #[serde(default)]
        src_port: Option<u16>,
        /// Distinct attacking hosts per source network
        hosts_per_source: u32,
        /// Flows per second per attacking host
        rate_per_host: f64,
        packets_per_flow: u64,
        bytes_per_flow: u64,
        #[serde(default = "default_flow_secs")]
        flow_secs: u64,
        window: VectorWindow,
    },

    /// Connection attempts sweeping the target block, like botnet scanning
    Probe {
        sources: Vec<String>,
        target: String,
        protocol: Protocol,
        /// Destination port range swept by the scan
        first_port: u16,
        last_port: u16,
        /// Distinct scanning hosts per source network
        hosts_per_source: u32,
        /// Attempts per second per scanning host
        rate_per_host: f64,
        #[serde(default)]
        pattern: ScanPattern,
        /// Seconds each unanswered attempt lingers (SYN retries)
        attempt_secs: u64,
        window: VectorWindow,
    },
}

fn default_flow_secs() -> u64 {
    55
}

impl AttackVector {
    pub fn kind(&self) -> &'static str {
        match self {
            AttackVector::Amplification { .. } => "amplification",
            AttackVector::Flood { .. } => "flood",
            AttackVector::Probe { .. } => "probe",
        }
    }

    pub fn sources(&self) -> &[String] {
        match self {
            AttackVector::Amplification { sources, .. } => sources,
            AttackVector::Flood { sources, .. } => sources,
            AttackVector::Probe { sources, .. } => sources,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            AttackVector::Amplification { target, .. } => target,
            AttackVector::Flood { target, .. } => target,
            AttackVector::Probe { target, .. } => target,
        }
    }

    pub fn window(&self) -> &VectorWindow {
        match self {
            AttackVector::Amplification { window, .. } => window,
            AttackVector::Flood { window, .. } => window,
            AttackVector::Probe { window, .. } => window,
        }
    }

    /// All networks this vector references
    pub fn referenced_nets(&self) -> Vec<&str> {
        let mut nets: Vec<&str> = self.sources().iter().map(String::as_str).collect();
        if let AttackVector::Amplification { reflector, .. } = self {
            nets.push(reflector);
        }
        nets.push(self.target());
        nets
    }
}

/// Full topology: networks plus the vectors bound to them
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub networks: Vec<Network>,
    pub vectors: Vec<AttackVector>,
}

/// On-disk topology file shape (TOML)
#[derive(Debug, Deserialize)]
struct TopologyFile {
    networks: Vec<NetworkDef>,
    #[serde(default)]
    vectors: Vec<AttackVector>,
}

#[derive(Debug, Deserialize)]
struct NetworkDef {
    id: String,
    /// CIDR (`172.16.0.0/16`), plain address, or bare prefix (`172.16`)
    block: String,
    #[serde(default)]
    victim_addr: Option<Ipv4Addr>,
}

impl Topology {
    /// Load and validate a topology from a TOML file
    pub fn load<P: AsRef<Path>>(path: P, default_prefix_len: u8) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, &path.display().to_string(), default_prefix_len)
    }

    /// Parse a topology from TOML text
    pub fn parse(text: &str, file: &str, default_prefix_len: u8) -> Result<Self> {
        let parsed: TopologyFile = toml::from_str(text).map_err(|e| GenError::Parse {
            file: file.to_string(),
            line: 0,
            msg: e.to_string(),
        })?;

        let mut networks = Vec::with_capacity(parsed.networks.len());
        for def in parsed.networks {
            let block = parse_block(&def.block, default_prefix_len)?;
            networks.push(Network {
                id: def.id,
                block,
                victim_addr: def.victim_addr,
            });
        }

        let topology = Self {
            networks,
            vectors: parsed.vectors,
        };
        topology.validate()?;
        Ok(topology)
    }

    pub fn network(&self, id: &str) -> Result<&Network> {
        self.networks
            .iter()
            .find(|n| n.id == id)
            .ok_or_else(|| GenError::TopologyConsistency(format!("undeclared network '{}'", id)))
    }

    /// Check the whole topology before synthesis. Every failure names the
    /// offending network or vector.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(GenError::TopologyConsistency(msg));

        let mut seen = HashSet::new();
        for net in &self.networks {
            if net.id.is_empty() {
                return fail("network with empty id".into());
            }
            if !seen.insert(net.id.as_str()) {
                return fail(format!("duplicate network id '{}'", net.id));
            }
            if let Some(victim) = net.victim_addr {
                if !net.block.contains(victim) {
                    return fail(format!(
                        "network '{}': victim address {} outside own block {}",
                        net.id, victim, net.block
                    ));
                }
            }
        }

        for (i, a) in self.networks.iter().enumerate() {
            for b in &self.networks[i + 1..] {
                if a.block.contains(b.block.network()) || b.block.contains(a.block.network()) {
                    return fail(format!(
                        "networks '{}' and '{}' declare overlapping blocks ({}, {})",
                        a.id, b.id, a.block, b.block
                    ));
                }
            }
        }

        for (idx, vector) in self.vectors.iter().enumerate() {
            let tag = format!("vector #{} ({})", idx, vector.kind());

            for id in vector.referenced_nets() {
                if !seen.contains(id) {
                    return fail(format!("{}: references undeclared network '{}'", tag, id));
                }
            }
            if vector.sources().is_empty() {
                return fail(format!("{}: no source networks", tag));
            }
            if vector.sources().iter().any(|s| s == vector.target()) {
                return fail(format!("{}: target network is also a source", tag));
            }
            if vector.window().duration_secs == 0 {
                return fail(format!("{}: zero-length window", tag));
            }

            match vector {
                AttackVector::Amplification {
                    reflector,
                    target,
                    amplification_factor,
                    reflector_hosts,
                    rate_per_host,
                    ..
                } => {
                    if reflector == target {
                        return fail(format!("{}: reflector network is the target", tag));
                    }
                    if *amplification_factor == 0 {
                        return fail(format!("{}: zero amplification factor", tag));
                    }
                    if *reflector_hosts == 0 {
                        return fail(format!("{}: zero reflector hosts", tag));
                    }
                    if *rate_per_host <= 0.0 {
                        return fail(format!("{}: non-positive rate", tag));
                    }
                    self.require_victim(target, &tag)?;
                }
                AttackVector::Flood {
                    target,
                    hosts_per_source,
                    rate_per_host,
                    ..
                } => {
                    if *hosts_per_source == 0 {
                        return fail(format!("{}: zero attacking hosts", tag));
                    }
                    if *rate_per_host <= 0.0 {
                        return fail(format!("{}: non-positive rate", tag));
                    }
                    self.require_victim(target, &tag)?;
                }
                AttackVector::Probe {
                    first_port,
                    last_port,
                    hosts_per_source,
                    rate_per_host,
                    ..
                } => {
                    if first_port > last_port {
                        return fail(format!(
                            "{}: inverted port range {}..{}",
                            tag, first_port, last_port
                        ));
                    }
                    if *hosts_per_source == 0 {
                        return fail(format!("{}: zero scanning hosts", tag));
                    }
                    if *rate_per_host <= 0.0 {
                        return fail(format!("{}: non-positive rate", tag));
                    }
                }
            }
        }

        Ok(())
    }

    fn require_victim(&self, target: &str, tag: &str) -> Result<()> {
        let net = self.network(target)?;
        if net.victim_addr.is_none() {
            return Err(GenError::TopologyConsistency(format!(
                "{}: target network '{}' declares no victim address",
                tag, target
            )));
        }
        Ok(())
    }

    /// True if any vector lists this network as a source or reflector
    pub fn is_attacker(&self, id: &str) -> bool {
        self.vectors.iter().any(|v| {
            v.sources().iter().any(|s| s == id)
                || matches!(v, AttackVector::Amplification { reflector, .. } if reflector == id)
        })
    }

    /// True if any vector targets this network
    pub fn is_victim(&self, id: &str) -> bool {
        self.vectors.iter().any(|v| v.target() == id)
    }
}

/// Parse an own-network block. Accepts full CIDR (`172.16.0.0/16`), a plain
/// address (default prefix applied), or a bare prefix like `172.16`.
pub fn parse_block(text: &str, default_prefix_len: u8) -> Result<Ipv4Network> {
    let bad = |msg: &str| GenError::AddressFormat {
        addr: text.to_string(),
        msg: msg.to_string(),
    };

    if text.contains('/') {
        return text.parse().map_err(|_| bad("not a valid CIDR block"));
    }

    // Pad bare prefixes ("172.16") out to a full address
    let dots = text.matches('.').count();
    if dots > 3 {
        return Err(bad("too many octets"));
    }
    let mut padded = text.to_string();
    for _ in dots..3 {
        padded.push_str(".0");
    }

    let addr: Ipv4Addr = padded.parse().map_err(|_| bad("not a valid IPv4 prefix"))?;
    Ipv4Network::new(addr, default_prefix_len).map_err(|_| bad("bad prefix length"))
}
