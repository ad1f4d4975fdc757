//! Deterministic per-view address rewriting
//!
//! Every network sees the shared noise capture through its own address
//! space: local-side addresses are re-anchored into the network's own
//! block, remote-side addresses are remapped through a keyed digest into a
//! reserved external pool. Two views of the same remote address diverge;
//! repeated lookups within one view never do.

use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnetwork::Ipv4Network;

use crate::config::GeneratorConfig;
use crate::error::{GenError, Result};
use crate::topology::Topology;

/// First octets the external pool must never use (reserved/special ranges)
const RESERVED_FIRST_OCTET: [u8; 5] = [0, 10, 127, 172, 255];

/// Rehash rounds before giving up on finding a pool address
const MAX_REHASH: u32 = 16;

/// Which side of a flow an address sits on, relative to the capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressRole {
    /// Address of the capturing network itself; re-anchored into the
    /// viewing network's own block
    Local,
    /// Far-end address; remapped into the external pool
    Remote,
}

/// Builds one rewriting function per network
#[derive(Debug, Clone)]
pub struct AddressMapper {
    seed: u64,
    networks: Vec<(String, Ipv4Network)>,
    /// Declared own-blocks plus configured exclusions; the external pool
    /// avoids all of them
    forbidden: Arc<Vec<Ipv4Network>>,
}

impl AddressMapper {
    pub fn new(topology: &Topology, config: &GeneratorConfig) -> Self {
        let networks: Vec<(String, Ipv4Network)> = topology
            .networks
            .iter()
            .map(|n| (n.id.clone(), n.block))
            .collect();

        let mut forbidden: Vec<Ipv4Network> = networks.iter().map(|(_, b)| *b).collect();
        forbidden.extend(config.pool_exclusions.iter().copied());

        Self {
            seed: config.seed,
            networks,
            forbidden: Arc::new(forbidden),
        }
    }

    /// The rewriting function for one network's view
    pub fn mapping_for(&self, network_id: &str) -> Result<AddressMapping> {
        let block = self
            .networks
            .iter()
            .find(|(id, _)| id == network_id)
            .map(|(_, b)| *b)
            .ok_or_else(|| {
                GenError::TopologyConsistency(format!("undeclared network '{}'", network_id))
            })?;

        Ok(AddressMapping {
            network_id: network_id.to_string(),
            block,
            seed: self.seed,
            forbidden: Arc::clone(&self.forbidden),
        })
    }
}

/// Deterministic, stateless `(original address, role) -> rewritten address`
/// function for one network
#[derive(Debug, Clone)]
pub struct AddressMapping {
    network_id: String,
    block: Ipv4Network,
    seed: u64,
    forbidden: Arc<Vec<Ipv4Network>>,
}

impl AddressMapping {
    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    pub fn block(&self) -> Ipv4Network {
        self.block
    }

    /// Rewrite one address for this view
    pub fn rewrite(&self, addr: Ipv4Addr, role: AddressRole) -> Result<Ipv4Addr> {
        match role {
            AddressRole::Local => Ok(self.rewrite_local(addr)),
            AddressRole::Remote => self.rewrite_remote(addr),
        }
    }

    /// Re-anchor a local address into the own block, preserving the host
    /// bit pattern so distinct hosts stay distinct and lookups repeat.
    fn rewrite_local(&self, addr: Ipv4Addr) -> Ipv4Addr {
        let mask = u32::from(self.block.mask());
        let host = u32::from(addr) & !mask;
        Ipv4Addr::from((u32::from(self.block.network()) & mask) | host)
    }

    /// Remap a remote address into the external pool via a keyed digest.
    /// Scans the digest for a window that avoids reserved first octets and
    /// every declared/excluded block, rehashing with a counter if needed.
    fn rewrite_remote(&self, addr: Ipv4Addr) -> Result<Ipv4Addr> {
        for round in 0..MAX_REHASH {
            let digest = md5::compute(format!(
                "{}|{}|{}|{}",
                self.seed, self.network_id, addr, round
            ));
            for pos in 0..=12 {
                let candidate = Ipv4Addr::new(
                    digest[pos],
                    digest[pos + 1],
                    digest[pos + 2],
                    digest[pos + 3],
                );
                if RESERVED_FIRST_OCTET.contains(&digest[pos]) {
                    continue;
                }
                if self.forbidden.iter().any(|net| net.contains(candidate)) {
                    continue;
                }
                return Ok(candidate);
            }
        }
        // Only reachable when the exclusion set blankets the address space
        Err(GenError::AddressFormat {
            addr: addr.to_string(),
            msg: format!(
                "no usable external address for view '{}' after {} rehashes",
                self.network_id, MAX_REHASH
            ),
        })
    }

    /// Deterministic host address inside the own block, for modeled attack
    /// hosts (reflectors, flooding bots, scanners). Stable per
    /// (seed, network, tag, index); avoids the network and broadcast
    /// addresses.
    pub fn host_in_block(&self, tag: &str, index: u32) -> Ipv4Addr {
        let digest = md5::compute(format!(
            "{}|{}|{}|{}",
            self.seed, self.network_id, tag, index
        ));
        let mask = u32::from(self.block.mask());
        let base = u32::from(self.block.network()) & mask;

        if mask == u32::MAX {
            return Ipv4Addr::from(base);
        }

        let mut host = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) & !mask;
        if host == 0 {
            host = 1;
        } else if host == !mask && self.block.prefix() < 31 {
            host -= 1;
        }
        Ipv4Addr::from(base | host)
    }
}
