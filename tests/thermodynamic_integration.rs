use std::fs::File;
use std::io::BufWriter;

use anyhow::Result;
use approx::assert_abs_diff_eq;
use pretty_assertions::assert_eq;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use thiserror::Error;
use ti_rs::{
    read_log_file, sample_to_log, sample_trace, BayesFactorEstimator, ChainSettings,
    InnerLogLikelihoods, LogpError, ModelPair, ScheduleMode, ScheduleSettings, ScheduleShape,
};

/// Two unnormalized zero-mean normals with variances 1 and 4. The ratio of
/// their normalizing constants is 2.
struct NormalPair {
    theta: f64,
    proposed: Option<f64>,
    step: Normal<f64>,
}

impl NormalPair {
    fn new() -> Self {
        Self {
            theta: 0.,
            proposed: None,
            step: Normal::new(0., 1.5).unwrap(),
        }
    }
}

#[derive(Error, Debug)]
enum NormalPairError {}

impl LogpError for NormalPairError {
    fn is_recoverable(&self) -> bool {
        true
    }
}

impl ModelPair for NormalPair {
    type LogpError = NormalPairError;

    fn log_likelihoods(&mut self) -> Result<InnerLogLikelihoods, Self::LogpError> {
        let theta = self.proposed.unwrap_or(self.theta);
        let sq = theta * theta;
        Ok(InnerLogLikelihoods::new(-sq / 2., -sq / 8.))
    }

    fn propose<R: Rng + ?Sized>(&mut self, rng: &mut R) -> f64 {
        self.proposed = Some(self.theta + self.step.sample(rng));
        0.
    }

    fn accept(&mut self) {
        if let Some(theta) = self.proposed.take() {
            self.theta = theta;
        }
    }

    fn reject(&mut self) {
        self.proposed = None;
    }
}

fn settings(mode: ScheduleMode, start_beta: f64) -> ChainSettings {
    ChainSettings {
        num_burnin: 1000,
        seed: 42,
        schedule: ScheduleSettings {
            mode,
            start_beta,
            num_steps: 20000,
        },
    }
}

const LN_2: f64 = std::f64::consts::LN_2;

#[test]
fn oneway_recovers_known_bayes_factor() -> Result<()> {
    for start in [0., 1.] {
        let summary = sample_trace(NormalPair::new(), settings(ScheduleMode::OneWay, start), 0)?;
        assert_eq!(summary.num_draws, 21001);
        assert_eq!(summary.num_reversals, 0);
        assert!(summary.acceptance_rate() > 0.2);

        let estimate = BayesFactorEstimator::default().estimate(&summary.trace)?;
        assert_eq!(estimate.shape, ScheduleShape::OneWay);
        // The burn-in plateau collapses into its last row
        assert_eq!(estimate.num_retained, 20001);
        let log_bf = estimate.log_bayes_factor().unwrap();
        assert_abs_diff_eq!(log_bf, LN_2, epsilon = 0.15);
    }
    Ok(())
}

#[test]
fn bothways_sweeps_agree() -> Result<()> {
    let summary = sample_trace(NormalPair::new(), settings(ScheduleMode::BothWays, 0.), 1)?;
    assert_eq!(summary.num_reversals, 1);

    let estimate = BayesFactorEstimator::default().estimate(&summary.trace)?;
    assert_eq!(estimate.shape, ScheduleShape::BothWays);
    let sweeps = estimate.log_bayes_factors();
    assert_eq!(sweeps.len(), 2);
    for sweep in sweeps {
        assert_abs_diff_eq!(sweep.unwrap(), LN_2, epsilon = 0.15);
    }
    assert_eq!(estimate.segments[0].num_samples, 20001);
    assert_eq!(estimate.segments[1].num_samples, 20001);
    Ok(())
}

#[test]
fn static_chain_is_not_integrated() -> Result<()> {
    let summary = sample_trace(NormalPair::new(), settings(ScheduleMode::Static, 0.5), 0)?;
    assert!(summary.trace.betas().all(|beta| beta == 0.5));
    assert!(BayesFactorEstimator::default().estimate(&summary.trace).is_err());
    Ok(())
}

#[test]
fn log_file_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("chain.log");

    let file = BufWriter::new(File::create(&path)?);
    let mut settings = settings(ScheduleMode::BothWays, 1.);
    settings.schedule.num_steps = 2000;
    let (summary, _) = sample_to_log(NormalPair::new(), settings, 0, file)?;

    let stream = read_log_file(&path)?;
    assert_eq!(stream.samples(), summary.trace.samples());

    let estimator = BayesFactorEstimator::default();
    let from_file = estimator.estimate(&stream)?;
    let in_memory = estimator.estimate(&summary.trace)?;
    assert_eq!(from_file, in_memory);
    Ok(())
}
