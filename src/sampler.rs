use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::Array;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{info, warn};

use crate::mh::{Kernel, MoveRecord};
use crate::storage::{DrawStorage, ListDrawStorage};

/// Settings for running independent chains
#[derive(Debug, Clone, Copy)]
pub struct SamplerSettings {
    pub num_chains: usize,
    /// Kernel steps after warmup. Every `thin`-th one is stored.
    pub num_steps: u64,
    /// Kernel steps discarded at the start of each chain.
    pub num_warmup: u64,
    pub thin: u64,
    pub seed: u64,
    /// Size of the worker pool, 0 for the rayon default.
    pub num_threads: usize,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            num_chains: 4,
            num_steps: 1000,
            num_warmup: 200,
            thin: 1,
            seed: 0,
            num_threads: 0,
        }
    }
}

/// Acceptance counts of one named move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptanceStats {
    pub name: String,
    pub proposed: u64,
    pub accepted: u64,
}

impl AcceptanceStats {
    pub fn rate(&self) -> f64 {
        if self.proposed == 0 {
            return 0.;
        }
        self.accepted as f64 / self.proposed as f64
    }
}

fn record(stats: &mut Vec<AcceptanceStats>, moves: &[MoveRecord]) {
    for step in moves {
        let entry = match stats.iter_mut().position(|s| s.name == step.name) {
            Some(idx) => &mut stats[idx],
            None => {
                stats.push(AcceptanceStats {
                    name: step.name.clone(),
                    proposed: 0,
                    accepted: 0,
                });
                let last = stats.len() - 1;
                &mut stats[last]
            }
        };
        entry.proposed += 1;
        entry.accepted += step.accepted as u64;
    }
}

pub struct ChainOutput<T> {
    pub chain_id: u64,
    /// One list entry of projected values per stored draw.
    pub draws: Arc<dyn Array>,
    /// Counts over warmup and sampling steps.
    pub stats: Vec<AcceptanceStats>,
    pub final_trace: T,
}

/// The rng of chain `chain_id`, an independent stream of the same seed.
pub fn chain_rng(seed: u64, chain_id: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(chain_id);
    rng
}

/// Run a single chain, writing projected draws into `storage`.
pub fn run_chain<T, I, F, S>(
    settings: &SamplerSettings,
    chain_id: u64,
    init: &I,
    kernel: &dyn Kernel<T>,
    project: &F,
    mut storage: S,
) -> Result<ChainOutput<T>>
where
    I: Fn(&mut ChaCha8Rng, u64) -> Result<T>,
    F: Fn(&T) -> Vec<f64>,
    S: DrawStorage,
{
    if settings.thin == 0 {
        bail!("thin must be at least 1");
    }
    let mut rng = chain_rng(settings.seed, chain_id);
    let mut trace = init(&mut rng, chain_id).context("Could not initialize chain")?;
    let mut stats = Vec::new();

    info!(chain = chain_id, kernel = kernel.name(), "starting chain");
    for step in 0..settings.num_warmup + settings.num_steps {
        let transition = kernel
            .step(&mut rng, &trace)
            .with_context(|| format!("Kernel step {step} failed"))?;
        record(&mut stats, &transition.moves);
        trace = transition.trace;

        if step >= settings.num_warmup && (step - settings.num_warmup) % settings.thin == 0 {
            storage.append_value(&project(&trace))?;
        }
    }
    for s in &stats {
        info!(chain = chain_id, kernel = %s.name, rate = s.rate(), "acceptance");
    }

    Ok(ChainOutput {
        chain_id,
        draws: storage.finalize()?,
        stats,
        final_trace: trace,
    })
}

/// Run `settings.num_chains` chains in parallel, sorted by chain id.
pub fn sample_chains<T, I, F>(
    settings: &SamplerSettings,
    init: I,
    kernel: &dyn Kernel<T>,
    project: F,
) -> Result<Vec<ChainOutput<T>>>
where
    T: Send,
    I: Fn(&mut ChaCha8Rng, u64) -> Result<T> + Sync,
    F: Fn(&T) -> Vec<f64> + Sync,
{
    let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("mh-worker-{}", i));
    if settings.num_threads > 0 {
        builder = builder.num_threads(settings.num_threads);
    }
    let pool = builder.build().context("Could not start thread pool")?;

    let capacity = (settings.num_steps / settings.thin.max(1)) as usize + 1;
    pool.install(|| {
        (0..settings.num_chains as u64)
            .into_par_iter()
            .map(|chain_id| {
                let storage = ListDrawStorage::with_capacity(capacity);
                run_chain(settings, chain_id, &init, kernel, &project, storage)
                    .inspect_err(|err| warn!(chain = chain_id, "chain aborted: {err:#}"))
                    .with_context(|| format!("Chain {chain_id} failed"))
            })
            .collect::<Result<Vec<_>>>()
    })
}
