use anyhow::{Context, Result};
use log::debug;
use rand::Rng;

use crate::{
    log_sample::LogSample,
    power_posterior::{InnerLogLikelihoods, PosteriorEvaluator, PowerPosterior},
    schedule::{AnnealingSchedule, AnnealingState, ScheduleSettings, StepOutcome},
};

/// Errors that happen when the host evaluates its models
pub trait LogpError: std::error::Error + Send + Sync + 'static {
    /// Unrecoverable errors during the evaluation stop sampling,
    /// recoverable errors reject the proposal.
    fn is_recoverable(&self) -> bool;
}

/// The two compared models, together with the host's parameter state and
/// proposal mechanism.
///
/// The chain calls `propose`, then `log_likelihoods` for the proposed state,
/// and finally exactly one of `accept` or `reject`. After `reject` the host
/// must be back in the state it was in before `propose`.
pub trait ModelPair {
    type LogpError: LogpError;

    /// Log-likelihoods of model 0 and model 1 at the current state.
    fn log_likelihoods(&mut self) -> Result<InnerLogLikelihoods, Self::LogpError>;

    /// Move to a proposed state and return the log Hastings ratio of the move.
    ///
    /// Returning `-inf` rejects the proposal without evaluating the models.
    fn propose<R: Rng + ?Sized>(&mut self, rng: &mut R) -> f64;

    fn accept(&mut self);

    fn reject(&mut self);
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Progress {
    pub draw: u64,
    pub burn_in: bool,
    pub beta: f64,
    pub accepted: bool,
    /// Beta changed direction in this draw
    pub reversed: bool,
    pub num_accepted: u64,
}

/// Draw (beta, U) samples from an annealed chain.
pub trait Chain {
    /// Run one step of the chain and return the sample it records.
    fn draw(&mut self) -> Result<(LogSample, Progress)>;

    /// Total number of draws, burn-in included.
    fn num_draws(&self) -> u64;

    fn annealing_state(&self) -> &AnnealingState;
}

/// A Metropolis-Hastings chain over the power posterior of a [`ModelPair`].
///
/// The first `num_burnin` draws keep beta at its start value, as does the draw
/// after them. Every later draw advances the schedule by one step before the
/// proposal, so the recorded trace opens with a constant-beta plateau of
/// `num_burnin + 1` rows.
pub struct AnnealedChain<P, E, R>
where
    P: ModelPair,
    E: PosteriorEvaluator,
    R: Rng,
{
    model: P,
    posterior: E,
    schedule: AnnealingSchedule,
    state: AnnealingState,
    rng: R,
    current_logp: f64,
    num_burnin: u64,
    chain_length: u64,
    draw_count: u64,
    num_accepted: u64,
}

impl<P, R> AnnealedChain<P, PowerPosterior, R>
where
    P: ModelPair,
    R: Rng,
{
    /// Set up a chain at the host's current state.
    ///
    /// Fails if the schedule settings are invalid or the models cannot be
    /// evaluated at the initial state.
    pub fn new(mut model: P, schedule: &ScheduleSettings, num_burnin: u64, rng: R) -> Result<Self> {
        let (controller, state) = schedule.build()?;
        let initial = model
            .log_likelihoods()
            .context("Failed to evaluate the models at the initial state")?;
        Ok(Self::with_evaluator(
            model,
            PowerPosterior::new(initial),
            controller,
            state,
            schedule.chain_length(),
            num_burnin,
            rng,
        ))
    }
}

impl<P, E, R> AnnealedChain<P, E, R>
where
    P: ModelPair,
    E: PosteriorEvaluator,
    R: Rng,
{
    /// Set up a chain with a custom evaluator. The evaluator's cache must
    /// hold the inner log-likelihoods of the host's current state.
    pub fn with_evaluator(
        model: P,
        posterior: E,
        schedule: AnnealingSchedule,
        state: AnnealingState,
        chain_length: u64,
        num_burnin: u64,
        rng: R,
    ) -> Self {
        let current_logp = posterior.current_log_density(&state);
        Self {
            model,
            posterior,
            schedule,
            state,
            rng,
            current_logp,
            num_burnin,
            chain_length,
            draw_count: 0,
            num_accepted: 0,
        }
    }

    pub fn model(&self) -> &P {
        &self.model
    }

    pub fn into_model(self) -> P {
        self.model
    }

    pub fn posterior(&self) -> &E {
        &self.posterior
    }

    pub fn num_accepted(&self) -> u64 {
        self.num_accepted
    }

    pub fn is_finished(&self) -> bool {
        self.draw_count >= self.num_draws()
    }

    fn metropolis_step(&mut self) -> Result<bool> {
        let log_hastings = self.model.propose(&mut self.rng);
        if log_hastings == f64::NEG_INFINITY {
            self.model.reject();
            return Ok(false);
        }

        let proposed = match self.model.log_likelihoods() {
            Ok(inner) => inner,
            Err(err) if err.is_recoverable() => {
                debug!("Rejecting proposal at draw {}: {}", self.draw_count, err);
                self.model.reject();
                return Ok(false);
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("Model evaluation failed at draw {}", self.draw_count)
                })
            }
        };

        let new_logp = self.posterior.evaluate(&self.state, &proposed);
        let log_alpha = new_logp - self.current_logp + log_hastings;

        // NaN compares false on both sides and is rejected
        let accept = log_alpha >= 0. || self.rng.random::<f64>() < log_alpha.exp();
        if accept {
            self.model.accept();
            self.posterior.cache_inner(proposed);
            self.current_logp = new_logp;
        } else {
            self.model.reject();
        }
        Ok(accept)
    }
}

impl<P, E, R> Chain for AnnealedChain<P, E, R>
where
    P: ModelPair,
    E: PosteriorEvaluator,
    R: Rng,
{
    fn draw(&mut self) -> Result<(LogSample, Progress)> {
        let burn_in = self.draw_count < self.num_burnin;
        let outcome = if self.draw_count > self.num_burnin {
            self.schedule.step(&mut self.state)
        } else {
            StepOutcome::default()
        };
        if outcome.needs_recompute() {
            self.current_logp = self.posterior.current_log_density(&self.state);
        }

        let accepted = self.metropolis_step()?;
        if accepted {
            self.num_accepted += 1;
        }

        let sample = LogSample::new(self.state.beta(), self.posterior.cached_u());
        let progress = Progress {
            draw: self.draw_count,
            burn_in,
            beta: self.state.beta(),
            accepted,
            reversed: outcome.reversed,
            num_accepted: self.num_accepted,
        };
        self.draw_count += 1;
        Ok((sample, progress))
    }

    fn num_draws(&self) -> u64 {
        self.num_burnin + 1 + self.chain_length
    }

    fn annealing_state(&self) -> &AnnealingState {
        &self.state
    }
}


#[cfg(test)]
mod tests {
    use super::test_models::{Move, ScriptedModel};
    use super::*;
    use crate::schedule::ScheduleMode;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const ACCEPT: f64 = f64::INFINITY;

    fn oneway(num_steps: u64) -> ScheduleSettings {
        ScheduleSettings {
            mode: ScheduleMode::OneWay,
            start_beta: 0.,
            num_steps,
        }
    }

    #[test]
    fn cache_follows_acceptance() -> Result<()> {
        let script = [
            Move::To(-1., -3., ACCEPT),
            // Model 0 is impossible here, rejected through the likelihood
            Move::To(f64::NEG_INFINITY, 5., 0.),
            // Rejected by the proposal itself
            Move::To(-0.5, 10., f64::NEG_INFINITY),
            Move::Fail(true),
            Move::To(-2., -1., ACCEPT),
        ];
        let model = ScriptedModel::new((-1., -1.), script);
        let rng = ChaCha8Rng::seed_from_u64(1);
        let mut chain = AnnealedChain::new(model, &oneway(4), 0, rng)?;
        assert_eq!(chain.num_draws(), 5);
        assert_eq!(chain.posterior().cached_u(), 0.);
        assert_eq!(chain.model().evaluations, 1);

        let mut trace = Vec::new();
        let mut evaluations = Vec::new();
        while !chain.is_finished() {
            let before = chain.model().evaluations;
            let (sample, progress) = chain.draw()?;
            trace.push((sample.beta, sample.u, progress.accepted));
            evaluations.push(chain.model().evaluations - before);
        }
        assert_eq!(
            trace,
            vec![
                (0., -2., true),
                (0.25, -2., false),
                (0.5, -2., false),
                (0.75, -2., false),
                (1., 1., true),
            ]
        );
        // The proposal with a -inf Hastings ratio never reaches the models
        assert_eq!(evaluations, vec![1, 1, 0, 1, 1]);
        assert_eq!(chain.num_accepted(), 2);
        let model = chain.into_model();
        assert_eq!(model.accepted, 2);
        assert_eq!(model.rejected, 3);
        assert_eq!(model.current, (-2., -1.));
        Ok(())
    }

    #[test]
    fn impossible_model_is_rejected_despite_infinite_other() -> Result<()> {
        let script = [
            Move::To(f64::INFINITY, f64::NEG_INFINITY, 0.),
            Move::To(f64::NEG_INFINITY, f64::INFINITY, 0.),
        ];
        let model = ScriptedModel::new((-1., -2.), script);
        let rng = ChaCha8Rng::seed_from_u64(5);
        let mut chain = AnnealedChain::new(model, &oneway(1), 0, rng)?;
        for _ in 0..2 {
            let (sample, progress) = chain.draw()?;
            assert!(!progress.accepted);
            assert_eq!(sample.u, -1.);
        }
        assert_eq!(chain.into_model().current, (-1., -2.));
        Ok(())
    }

    #[test]
    fn fatal_model_error_stops_chain() -> Result<()> {
        let model = ScriptedModel::new((0., 0.), [Move::Fail(false)]);
        let rng = ChaCha8Rng::seed_from_u64(1);
        let mut chain = AnnealedChain::new(model, &oneway(4), 0, rng)?;
        let err = chain.draw().unwrap_err();
        assert!(err.to_string().contains("draw 0"));
        Ok(())
    }

    #[test]
    fn burn_in_holds_beta() -> Result<()> {
        let script = std::iter::repeat(Move::To(-1., -1., ACCEPT)).take(6);
        let model = ScriptedModel::new((-1., -1.), script);
        let rng = ChaCha8Rng::seed_from_u64(1);
        let mut chain = AnnealedChain::new(model, &oneway(2), 3, rng)?;
        assert_eq!(chain.num_draws(), 6);

        let mut betas = Vec::new();
        let mut burn_in = Vec::new();
        while !chain.is_finished() {
            let (sample, progress) = chain.draw()?;
            betas.push(sample.beta);
            burn_in.push(progress.burn_in);
        }
        assert_eq!(betas, vec![0., 0., 0., 0., 0.5, 1.]);
        assert_eq!(burn_in, vec![true, true, true, false, false, false]);
        Ok(())
    }

    #[test]
    fn recompute_uses_new_beta() -> Result<()> {
        let script = [Move::To(-10., 0., 0.), Move::To(-5., -50., 0.)];
        let model = ScriptedModel::new((-10., 0.), script);
        let rng = ChaCha8Rng::seed_from_u64(3);
        let settings = ScheduleSettings {
            mode: ScheduleMode::OneWay,
            start_beta: 1.,
            num_steps: 1,
        };
        let mut chain = AnnealedChain::new(model, &settings, 0, rng)?;
        // beta = 1, the proposal equals the current state
        let (sample, progress) = chain.draw()?;
        assert!(progress.accepted);
        assert_eq!(sample.u, 10.);
        // beta = 0: the current state scores -10 and the proposal -5. A stale
        // density from beta = 1 would score the current state at 0.
        let (sample, progress) = chain.draw()?;
        assert!(progress.accepted);
        assert_eq!(sample, LogSample::new(0., -45.));
        assert!(chain.is_finished());
        Ok(())
    }

    #[test]
    fn invalid_schedule_is_rejected_before_sampling() {
        let model = ScriptedModel::new((0., 0.), []);
        let rng = ChaCha8Rng::seed_from_u64(1);
        let settings = ScheduleSettings {
            mode: ScheduleMode::BothWays,
            start_beta: 0.4,
            num_steps: 10,
        };
        assert!(AnnealedChain::new(model, &settings, 0, rng).is_err());
    }
}
