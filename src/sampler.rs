use std::io::Write;

use anyhow::{Context, Result};
use log::info;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::{
    chain::{AnnealedChain, Chain, ModelPair, Progress},
    log_file::LogWriter,
    log_sample::{LogSample, LogSampleStream},
    power_posterior::PowerPosterior,
    schedule::ScheduleSettings,
};

/// Settings for an annealed chain
#[derive(Debug, Clone, Copy)]
pub struct ChainSettings {
    /// Number of steps at the start beta before annealing begins. These are
    /// recorded and show up as a leading plateau in the trace.
    pub num_burnin: u64,
    pub seed: u64,
    pub schedule: ScheduleSettings,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            num_burnin: 100,
            seed: 0,
            schedule: ScheduleSettings::default(),
        }
    }
}

impl ChainSettings {
    /// Total number of draws of a chain, burn-in included.
    pub fn num_draws(&self) -> u64 {
        self.num_burnin + 1 + self.schedule.chain_length()
    }

    /// Create a chain for `model`. Chains with different ids draw from
    /// independent random streams of the same seed.
    pub fn new_chain<P: ModelPair>(
        &self,
        chain: u64,
        model: P,
    ) -> Result<AnnealedChain<P, PowerPosterior, ChaCha8Rng>> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(chain);
        AnnealedChain::new(model, &self.schedule, self.num_burnin, rng)
            .with_context(|| format!("Failed to initialize chain {}", chain))
    }
}

/// Run a chain to the end, lazily.
pub fn sample_sequentially<P: ModelPair>(
    model: P,
    settings: ChainSettings,
    chain: u64,
) -> Result<impl Iterator<Item = Result<(LogSample, Progress)>>> {
    let mut sampler = settings.new_chain(chain, model)?;
    let draws = sampler.num_draws();
    Ok((0..draws).map(move |_| sampler.draw()))
}

/// The recorded trace of a finished chain and its acceptance statistics.
#[derive(Debug, Clone)]
pub struct ChainSummary {
    pub trace: LogSampleStream,
    pub num_draws: u64,
    pub num_accepted: u64,
    pub num_reversals: u64,
}

impl ChainSummary {
    pub fn acceptance_rate(&self) -> f64 {
        if self.num_draws == 0 {
            return 0.;
        }
        self.num_accepted as f64 / self.num_draws as f64
    }

    fn observe(&mut self, progress: &Progress) {
        self.num_draws += 1;
        self.num_accepted = progress.num_accepted;
        self.num_reversals += progress.reversed as u64;
    }
}

fn run_chain<P: ModelPair>(
    model: P,
    settings: ChainSettings,
    chain: u64,
    mut on_sample: impl FnMut(&LogSample) -> Result<()>,
) -> Result<ChainSummary> {
    let mut summary = ChainSummary {
        trace: LogSampleStream::named(format!("chain {}", chain)),
        num_draws: 0,
        num_accepted: 0,
        num_reversals: 0,
    };
    for draw in sample_sequentially(model, settings, chain)? {
        let (sample, progress) = draw?;
        on_sample(&sample)?;
        summary.observe(&progress);
        summary.trace.push(sample);
    }
    info!(
        "Chain {} finished: {} draws, acceptance rate {:.3}",
        chain,
        summary.num_draws,
        summary.acceptance_rate()
    );
    Ok(summary)
}

/// Run a chain and keep its trace in memory.
pub fn sample_trace<P: ModelPair>(
    model: P,
    settings: ChainSettings,
    chain: u64,
) -> Result<ChainSummary> {
    run_chain(model, settings, chain, |_| Ok(()))
}

/// Run a chain and write every draw to `writer` as it is produced.
///
/// The schedule is written as a comment above the header.
pub fn sample_to_log<P: ModelPair, W: Write>(
    model: P,
    settings: ChainSettings,
    chain: u64,
    writer: W,
) -> Result<(ChainSummary, W)> {
    let schedule = settings.schedule;
    let mut log = LogWriter::new(writer).with_comment(format!(
        "schedule {} start {} steps {} burnin {}",
        schedule.mode, schedule.start_beta, schedule.num_steps, settings.num_burnin
    ));
    let summary = run_chain(model, settings, chain, |sample| log.record(sample))?;
    let writer = log.finalize()?;
    Ok((summary, writer))
}
