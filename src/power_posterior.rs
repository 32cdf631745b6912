use crate::schedule::AnnealingState;

/// Log-likelihoods of the two compared models at one chain state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InnerLogLikelihoods {
    pub log_p0: f64,
    pub log_p1: f64,
}

impl InnerLogLikelihoods {
    pub fn new(log_p0: f64, log_p1: f64) -> Self {
        Self { log_p0, log_p1 }
    }

    /// The log-likelihood ratio of model 1 against model 0.
    pub fn u(&self) -> f64 {
        self.log_p1 - self.log_p0
    }

    pub fn is_finite(&self) -> bool {
        self.log_p0.is_finite() & self.log_p1.is_finite()
    }
}

/// Blend two log-likelihoods in log space: `(1 - beta) * log_p0 + beta * log_p1`.
///
/// If either model is impossible (`-inf`) the blend is `-inf`, for every beta
/// including the endpoints (where `0 * -inf` would otherwise give NaN). Else a
/// NaN input gives NaN and a remaining `+inf` is returned as it is. The
/// chain's accept/reject step is responsible for rejecting such states.
pub fn combine(log_p0: f64, log_p1: f64, beta: f64) -> f64 {
    if log_p0 == f64::NEG_INFINITY || log_p1 == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if log_p0.is_nan() || log_p1.is_nan() {
        return f64::NAN;
    }
    if !log_p0.is_finite() {
        return log_p0;
    }
    if !log_p1.is_finite() {
        return log_p1;
    }
    (1. - beta) * log_p0 + beta * log_p1
}

/// The log-density the chain samples from.
///
/// The chain only ever sees this trait. Whether an implementation blends two
/// models is not visible to the caller.
pub trait PosteriorEvaluator {
    /// Log-density of a proposed state with the given inner log-likelihoods.
    fn evaluate(&self, state: &AnnealingState, proposed: &InnerLogLikelihoods) -> f64;

    /// Log-density of the last accepted state at the current beta.
    fn current_log_density(&self, state: &AnnealingState) -> f64;

    /// Record the inner log-likelihoods of a newly accepted state.
    fn cache_inner(&mut self, accepted: InnerLogLikelihoods);

    /// The U statistic of the last accepted state.
    fn cached_u(&self) -> f64;
}

/// Power posterior between two models, indexed by the beta of an
/// [`AnnealingState`].
///
/// Holds the inner log-likelihoods of the last accepted state. The cache must
/// only be written after an acceptance; U is read from it and never
/// recomputed from the models.
#[derive(Debug, Clone)]
pub struct PowerPosterior {
    cache: InnerLogLikelihoods,
}

impl PowerPosterior {
    pub fn new(initial: InnerLogLikelihoods) -> Self {
        Self { cache: initial }
    }

    pub fn cached(&self) -> &InnerLogLikelihoods {
        &self.cache
    }
}

impl PosteriorEvaluator for PowerPosterior {
    fn evaluate(&self, state: &AnnealingState, proposed: &InnerLogLikelihoods) -> f64 {
        combine(proposed.log_p0, proposed.log_p1, state.beta())
    }

    fn current_log_density(&self, state: &AnnealingState) -> f64 {
        self.evaluate(state, &self.cache)
    }

    fn cache_inner(&mut self, accepted: InnerLogLikelihoods) {
        self.cache = accepted;
    }

    fn cached_u(&self) -> f64 {
        self.cache.u()
    }
}
