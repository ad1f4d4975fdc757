//! Flow records and the noise dataset
//!
//! One record per observed conversation, in the pipe-separated fixed-column
//! text form produced by flow export tooling. The noise dataset is the
//! read-only substrate every generated view is built from.

use std::net::Ipv4Addr;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{GenError, Result};

/// Timestamp format used in flow tables (`2017/03/15T06:00:00.000`)
pub const TIME_FORMAT: &str = "%Y/%m/%dT%H:%M:%S%.3f";

/// IP protocol of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Other(u8),
}

impl Protocol {
    /// IANA protocol number, as written in flow tables
    pub fn number(&self) -> u8 {
        match self {
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
            Protocol::Icmp => 1,
            Protocol::Other(n) => *n,
        }
    }

    pub fn from_number(n: u8) -> Self {
        match n {
            6 => Protocol::Tcp,
            17 => Protocol::Udp,
            1 => Protocol::Icmp,
            other => Protocol::Other(other),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Icmp => write!(f, "icmp"),
            Protocol::Other(n) => write!(f, "proto_{}", n),
        }
    }
}

/// Traffic direction relative to one network's vantage point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One network conversation sample
///
/// Immutable once constructed; address rewriting produces a new record,
/// never a mutation of the original.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowRecord {
    pub protocol: Protocol,
    pub src_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_ip: Ipv4Addr,
    pub dst_port: u16,
    pub stime: NaiveDateTime,
    pub packets: u64,
    pub bytes: u64,
    pub duration_secs: f64,
}

impl FlowRecord {
    /// Parse one table line.
    ///
    /// Returns `Ok(None)` for column-header lines so callers can skip them.
    /// Anything else that does not parse is an error carrying file and line
    /// context.
    pub fn parse_line(line: &str, file: &str, lineno: usize) -> Result<Option<FlowRecord>> {
        let fields: Vec<&str> = line.split('|').map(str::trim).collect();
        if fields.len() < 9 {
            return Err(GenError::Parse {
                file: file.to_string(),
                line: lineno,
                msg: format!("expected 9 fields, got {}", fields.len()),
            });
        }

        // Header lines carry the protocol column label instead of a number.
        // Only recognized labels are skipped; anything else must parse.
        if matches!(fields[0], "pro" | "protocol") {
            return Ok(None);
        }

        let err = |msg: String| GenError::Parse {
            file: file.to_string(),
            line: lineno,
            msg,
        };

        let proto_num: u8 = fields[0]
            .parse()
            .map_err(|_| err(format!("bad protocol number '{}'", fields[0])))?;

        let src_ip = parse_ipv4(fields[1], file, lineno)?;
        let src_port: u16 = fields[2]
            .parse()
            .map_err(|_| err(format!("bad source port '{}'", fields[2])))?;
        let dst_ip = parse_ipv4(fields[3], file, lineno)?;
        let dst_port: u16 = fields[4]
            .parse()
            .map_err(|_| err(format!("bad destination port '{}'", fields[4])))?;

        let stime = NaiveDateTime::parse_from_str(fields[5], TIME_FORMAT)
            .map_err(|e| err(format!("bad timestamp '{}': {}", fields[5], e)))?;

        let packets: u64 = fields[6]
            .parse()
            .map_err(|_| err(format!("bad packet count '{}'", fields[6])))?;
        let bytes: u64 = fields[7]
            .parse()
            .map_err(|_| err(format!("bad byte count '{}'", fields[7])))?;
        let duration_secs: f64 = fields[8]
            .parse()
            .map_err(|_| err(format!("bad duration '{}'", fields[8])))?;

        Ok(Some(FlowRecord {
            protocol: Protocol::from_number(proto_num),
            src_ip,
            src_port,
            dst_ip,
            dst_port,
            stime,
            packets,
            bytes,
            duration_secs,
        }))
    }
}

/// Parse an IPv4 address field. IPv6 is rejected: the rewriting rules
/// (reserved first octets, block re-anchoring) are IPv4 semantics.
fn parse_ipv4(field: &str, file: &str, lineno: usize) -> Result<Ipv4Addr> {
    field.parse::<Ipv4Addr>().map_err(|_| GenError::AddressFormat {
        addr: field.to_string(),
        msg: format!("{} line {}: not an IPv4 address", file, lineno),
    })
}

/// Noise dataset as captured from one vantage point
///
/// Owned by the caller for the whole run; the engine only reads it.
#[derive(Debug, Clone, Default)]
pub struct NoiseDataset {
    pub inbound: Vec<FlowRecord>,
    pub outbound: Vec<FlowRecord>,
}

impl NoiseDataset {
    /// Load from a dataset directory containing `inbound` and `outbound` files
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let inbound = Self::load_table(&dir.join("inbound"))?;
        let outbound = Self::load_table(&dir.join("outbound"))?;
        Ok(Self { inbound, outbound })
    }

    fn load_table(path: &Path) -> Result<Vec<FlowRecord>> {
        let name = path.display().to_string();
        let text = std::fs::read_to_string(path)?;
        Self::parse_table(&text, &name)
    }

    /// Parse one direction's table from text
    pub fn parse_table(text: &str, file: &str) -> Result<Vec<FlowRecord>> {
        let mut records = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(rec) = FlowRecord::parse_line(line, file, idx + 1)? {
                records.push(rec);
            }
        }
        Ok(records)
    }

    pub fn len(&self) -> usize {
        self.inbound.len() + self.outbound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inbound.is_empty() && self.outbound.is_empty()
    }
}
