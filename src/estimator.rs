//! Offline estimation of log Bayes factors from a finished (beta, U) trace.
//!
//! The estimate is the thermodynamic integral of Lartillot & Philippe (2006),
//! `log BF = ∫₀¹ E_beta[U] d beta`, approximated by the trapezoid rule over the
//! chain's samples. With beta moving by a constant amount per step, the
//! sample index is proportional to beta, so the integral reduces to a weighted
//! mean of the recorded U values.
//!
//! The steps are:
//! 1. classify the schedule from the first and last beta ([`classify`])
//! 2. drop rows recorded while beta was constant ([`useful_samples`])
//! 3. split a bothways trace into its two sweeps ([`segment_samples`])
//! 4. integrate each sweep ([`integrate_segment`])

use std::{fmt, str::FromStr};

use itertools::Itertools;
use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    log_sample::{LogSample, LogSampleStream},
    schedule::{Direction, BOUNDARY_EPSILON},
};

/// Shape of the beta schedule that produced a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleShape {
    /// From one extreme to the other.
    OneWay,
    /// To the opposite extreme and back again.
    BothWays,
}

impl ScheduleShape {
    pub fn num_segments(&self) -> usize {
        match self {
            ScheduleShape::OneWay => 1,
            ScheduleShape::BothWays => 2,
        }
    }
}

impl fmt::Display for ScheduleShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleShape::OneWay => f.write_str("oneway"),
            ScheduleShape::BothWays => f.write_str("bothways"),
        }
    }
}

/// What the trapezoid sum of a segment is divided by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Normalization {
    /// Divide by the number of samples in the segment.
    #[default]
    SampleCount,
    /// Divide by the number of intervals between samples. This is the exact
    /// composite trapezoid rule on a uniform grid over [0, 1].
    Intervals,
}

impl FromStr for Normalization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "samples" | "sample-count" => Ok(Normalization::SampleCount),
            "intervals" => Ok(Normalization::Intervals),
            _ => Err(format!(
                "unknown normalization {s:?}, expected 'samples' or 'intervals'"
            )),
        }
    }
}

/// Settings for the offline estimator
#[derive(Debug, Clone, Copy)]
pub struct EstimatorSettings {
    /// Absolute tolerance used to decide whether the first and last beta of a
    /// trace sit on 0 or 1.
    pub epsilon: f64,
    pub normalization: Normalization,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            epsilon: BOUNDARY_EPSILON,
            normalization: Normalization::SampleCount,
        }
    }
}

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimateError {
    #[error("{name}: the log contains no samples")]
    Empty { name: String },
    #[error(
        "{name}: cannot classify the beta schedule, it runs from {first} to {last} \
         but must start and end at 0 or 1"
    )]
    Unclassified { name: String, first: f64, last: f64 },
    #[error(
        "{name}: only {retained} usable samples remain after removing constant-beta rows, \
         at least 2 are needed"
    )]
    InsufficientData { name: String, retained: usize },
}

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntegrationError {
    #[error("segment has {0} samples, at least 2 are needed")]
    TooFewSamples(usize),
    #[error("non-finite U value {value} in row {row}")]
    NonFinite { row: usize, value: f64 },
}

/// A sample that survived plateau filtering, with its row in the input
/// trace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetainedSample {
    pub row: usize,
    pub beta: f64,
    pub u: f64,
}

/// Retained samples that share one sweep direction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segment {
    pub direction: Direction,
    pub samples: Vec<RetainedSample>,
}

impl Segment {
    pub fn u_values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.u).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentEstimate {
    pub direction: Direction,
    pub num_samples: usize,
    pub log_bayes_factor: Result<f64, IntegrationError>,
}

/// Result of analysing one trace.
#[derive(Debug, Clone, PartialEq)]
pub struct BayesFactorEstimate {
    pub shape: ScheduleShape,
    /// Number of samples left after plateau filtering
    pub num_retained: usize,
    /// One entry per sweep, in the order the sweeps were run
    pub segments: Vec<SegmentEstimate>,
}

impl BayesFactorEstimate {
    /// The estimate of the first sweep.
    pub fn log_bayes_factor(&self) -> Option<f64> {
        self.segments
            .first()
            .and_then(|s| s.log_bayes_factor.as_ref().ok().copied())
    }

    /// One estimate per sweep. Sweeps whose integration failed are `None`.
    pub fn log_bayes_factors(&self) -> Vec<Option<f64>> {
        self.segments
            .iter()
            .map(|s| s.log_bayes_factor.as_ref().ok().copied())
            .collect()
    }
}

fn stream_name(stream: &LogSampleStream) -> String {
    stream.name().unwrap_or("<unnamed log>").to_string()
}

/// Determine the schedule shape from the first and last beta of a trace.
pub fn classify(stream: &LogSampleStream, epsilon: f64) -> Result<ScheduleShape, EstimateError> {
    let (Some(first), Some(last)) = (stream.first(), stream.last()) else {
        return Err(EstimateError::Empty {
            name: stream_name(stream),
        });
    };
    let (first, last) = (first.beta, last.beta);

    let near = |value: f64, extreme: f64| (value - extreme).abs() < epsilon;
    match (near(first, 0.), near(first, 1.), near(last, 0.), near(last, 1.)) {
        (true, _, _, true) | (_, true, true, _) => Ok(ScheduleShape::OneWay),
        (true, _, true, _) | (_, true, _, true) => Ok(ScheduleShape::BothWays),
        _ => Err(EstimateError::Unclassified {
            name: stream_name(stream),
            first,
            last,
        }),
    }
}

/// Drop the rows recorded while beta was constant.
///
/// A row is kept if beta changed on the way into it or changes on the way out
/// of it. For a leading plateau this keeps only its last row, which becomes
/// the first integration point. An interior plateau keeps its first and last
/// row, a trailing plateau only its first.
pub fn useful_samples(samples: &[LogSample]) -> Vec<RetainedSample> {
    let n = samples.len();
    // Plateau rows carry bit-identical beta values, so exact comparison is intended
    let differs = |a: usize, b: usize| samples[a].beta != samples[b].beta;

    (0..n)
        .filter(|&i| (i > 0 && differs(i - 1, i)) || (i + 1 < n && differs(i, i + 1)))
        .map(|row| RetainedSample {
            row,
            beta: samples[row].beta,
            u: samples[row].u,
        })
        .collect()
}

/// Split retained samples into sweeps.
///
/// A oneway trace is a single segment. For a bothways trace the direction is
/// set by the first change in beta; whenever a later change goes the other
/// way the segment switches. The turning row belongs to both sweeps: it closes
/// the one that ends there and opens the next, so each sweep covers the whole
/// beta interval. Steps without a change in beta never switch segments.
pub fn segment_samples(retained: &[RetainedSample], shape: ScheduleShape) -> Vec<Segment> {
    let Some(first) = retained.first() else {
        return vec![Segment::default(); shape.num_segments()];
    };

    if shape == ScheduleShape::OneWay {
        let direction = retained
            .last()
            .map_or(Direction::Unset, |last| Direction::of(last.beta - first.beta));
        return vec![Segment {
            direction,
            samples: retained.to_vec(),
        }];
    }

    let mut segments = [Segment::default(), Segment::default()];
    let mut current = 0;
    let mut direction = Direction::Unset;
    segments[current].samples.push(*first);

    for (prev, sample) in retained.iter().tuple_windows() {
        match Direction::of(sample.beta - prev.beta) {
            Direction::Unset => {}
            step if direction == Direction::Unset => {
                direction = step;
                segments[current].direction = step;
            }
            step if step != direction => {
                direction = step;
                current = 1 - current;
                if !segments[current].samples.is_empty() {
                    warn!(
                        "Beta changes direction more than once, row {} continues sweep {}",
                        prev.row, current
                    );
                }
                debug!("Beta changed direction at row {}", prev.row);
                segments[current].direction = step;
                segments[current].samples.push(*prev);
            }
            _ => {}
        }
        segments[current].samples.push(*sample);
    }

    segments.into()
}

/// Composite trapezoid sum over the sample index: the first and last values
/// get weight ½, all others weight 1.
pub fn trapezoid_sum(values: &[f64]) -> f64 {
    match values {
        [] => 0.,
        [only] => *only,
        [first, interior @ .., last] => 0.5 * first + interior.iter().sum::<f64>() + 0.5 * last,
    }
}

/// Integrate one segment. Fails on fewer than two samples or on any
/// non-finite U value.
pub fn integrate_segment(
    segment: &Segment,
    normalization: Normalization,
) -> Result<f64, IntegrationError> {
    let n = segment.samples.len();
    if n < 2 {
        return Err(IntegrationError::TooFewSamples(n));
    }
    if let Some(bad) = segment.samples.iter().find(|s| !s.u.is_finite()) {
        return Err(IntegrationError::NonFinite {
            row: bad.row,
            value: bad.u,
        });
    }

    let total = trapezoid_sum(&segment.u_values());
    let denominator = match normalization {
        Normalization::SampleCount => n,
        Normalization::Intervals => n - 1,
    };
    Ok(total / denominator as f64)
}

/// Classifies, filters, segments and integrates (beta, U) traces.
#[derive(Debug, Clone, Default)]
pub struct BayesFactorEstimator {
    settings: EstimatorSettings,
}

impl BayesFactorEstimator {
    pub fn new(settings: EstimatorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EstimatorSettings {
        &self.settings
    }

    pub fn classify(&self, stream: &LogSampleStream) -> Result<ScheduleShape, EstimateError> {
        classify(stream, self.settings.epsilon)
    }

    pub fn estimate(&self, stream: &LogSampleStream) -> Result<BayesFactorEstimate, EstimateError> {
        let shape = self.classify(stream)?;
        info!("{}: classified as {}", stream_name(stream), shape);

        let retained = useful_samples(stream.samples());
        if retained.len() < 2 {
            return Err(EstimateError::InsufficientData {
                name: stream_name(stream),
                retained: retained.len(),
            });
        }

        let segments = segment_samples(&retained, shape)
            .iter()
            .enumerate()
            .map(|(idx, segment)| {
                let log_bayes_factor = integrate_segment(segment, self.settings.normalization);
                if let Err(err) = &log_bayes_factor {
                    warn!("{}: sweep {} failed: {}", stream_name(stream), idx + 1, err);
                }
                SegmentEstimate {
                    direction: segment.direction,
                    num_samples: segment.samples.len(),
                    log_bayes_factor,
                }
            })
            .collect();

        Ok(BayesFactorEstimate {
            shape,
            num_retained: retained.len(),
            segments,
        })
    }
}
