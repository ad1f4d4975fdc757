//! flowsynth: multi-view DDoS flow dataset generator
//!
//! Takes one noise-traffic capture plus a topology of networks and attack
//! vectors, and produces a per-network pair of inbound/outbound flow
//! tables that are individually plausible and mutually consistent: an
//! attack flow leaving the source network's view arrives byte-for-byte in
//! the destination network's view.
//!
//! ## Pipeline
//!
//! 1. Topology validation: undeclared references and overlapping blocks
//!    are rejected before anything is generated
//! 2. Attack synthesis: one canonical, fully-addressed event stream
//!    (barrier: amplification pairing needs both sides materialized)
//! 3. View assembly: per network, noise rewritten through that network's
//!    address mapping plus the attack events touching it; independent per
//!    node, so it fans out across workers
//! 4. Output: per-node table files in the input's column format

pub mod config;
pub mod error;
pub mod mapper;
pub mod record;
pub mod synth;
pub mod topology;
pub mod view;
pub mod writer;

use std::path::Path;

use tracing::info;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use config::GeneratorConfig;
use error::Result;
use mapper::AddressMapper;
use record::NoiseDataset;
use synth::Synthesizer;
use topology::Topology;
use view::GeneratedView;

/// Core generator instance
pub struct FlowSynth {
    config: GeneratorConfig,
}

impl FlowSynth {
    /// Create a new generator with the given configuration
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Generate every network's view from shared immutable inputs
    pub fn generate(
        &self,
        noise: &NoiseDataset,
        topology: &Topology,
    ) -> Result<Vec<GeneratedView>> {
        topology.validate()?;

        let mapper = AddressMapper::new(topology, &self.config);

        // The full event set must exist before any view assembly starts
        let events = Synthesizer::new(&mapper, &self.config).synthesize(topology)?;

        info!(
            networks = topology.networks.len(),
            noise_records = noise.len(),
            attack_events = events.len(),
            "assembling views"
        );

        #[cfg(feature = "parallel")]
        let views = topology
            .networks
            .par_iter()
            .map(|network| view::assemble(network, noise, &mapper, &events))
            .collect::<Result<Vec<_>>>()?;

        #[cfg(not(feature = "parallel"))]
        let views = topology
            .networks
            .iter()
            .map(|network| view::assemble(network, noise, &mapper, &events))
            .collect::<Result<Vec<_>>>()?;

        Ok(views)
    }

    /// Full batch run: load inputs, generate, write per-node files
    pub fn run<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
        &self,
        dataset_dir: P,
        topology_path: Q,
        outdir: R,
    ) -> Result<()> {
        let noise = NoiseDataset::load(dataset_dir)?;
        let topology = Topology::load(topology_path, self.config.default_prefix_len)?;

        let views = self.generate(&noise, &topology)?;
        writer::write_views(&views, outdir)?;

        info!(nodes = views.len(), "generation complete");
        Ok(())
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }
}
