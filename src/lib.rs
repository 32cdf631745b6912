//! Log Bayes factors between two models by thermodynamic integration.
//!
//! A Metropolis-Hastings chain samples the power posterior
//! `(1 - beta) * log p0 + beta * log p1` while beta is annealed between 0 and
//! 1, and records `U = log p1 - log p0` at every step. Integrating the
//! expectation of U over beta gives the log Bayes factor of model 1 against
//! model 0.
//!
//! The live side ([`AnnealedChain`], [`sample_trace`], [`sample_to_log`]) is
//! driven by a host implementing [`ModelPair`]. The offline side
//! ([`BayesFactorEstimator`], [`analyze_files`]) works on recorded traces.

pub(crate) mod batch;
pub(crate) mod chain;
pub(crate) mod estimator;
pub(crate) mod log_file;
pub(crate) mod log_sample;
pub(crate) mod power_posterior;
pub(crate) mod sampler;
pub(crate) mod schedule;

pub use batch::{analyze_file, analyze_files, FileOutcome, FileReport};
pub use chain::{AnnealedChain, Chain, LogpError, ModelPair, Progress};
pub use estimator::{
    classify, integrate_segment, segment_samples, trapezoid_sum, useful_samples,
    BayesFactorEstimate, BayesFactorEstimator, EstimateError, EstimatorSettings, IntegrationError,
    Normalization, RetainedSample, ScheduleShape, Segment, SegmentEstimate,
};
pub use log_file::{
    parse_log, parse_value, read_log_file, LogColumn, LogFileError, LogWriter, BETA_COLUMN,
    SAMPLE_COLUMN, U_COLUMN,
};
pub use log_sample::{LogSample, LogSampleStream};
pub use power_posterior::{combine, InnerLogLikelihoods, PosteriorEvaluator, PowerPosterior};
pub use sampler::{sample_sequentially, sample_to_log, sample_trace, ChainSettings, ChainSummary};
pub use schedule::{
    AnnealingSchedule, AnnealingState, Direction, ScheduleError, ScheduleMode, ScheduleSettings,
    StepOutcome, BOUNDARY_EPSILON,
};
