use std::{fmt, str::FromStr};

use log::{debug, info};
use thiserror::Error;

/// Tolerance used to decide whether a beta value sits on one of the extremes.
pub const BOUNDARY_EPSILON: f64 = 1e-7;

/// How beta evolves over the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleMode {
    /// Beta never changes.
    Static,
    /// Beta moves linearly from one extreme to the other.
    #[default]
    OneWay,
    /// Beta moves to the opposite extreme and back to where it started.
    BothWays,
}

impl ScheduleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleMode::Static => "static",
            ScheduleMode::OneWay => "oneway",
            ScheduleMode::BothWays => "bothways",
        }
    }

    /// Number of sweeps between the extremes.
    pub fn num_sweeps(&self) -> u64 {
        match self {
            ScheduleMode::Static => 0,
            ScheduleMode::OneWay => 1,
            ScheduleMode::BothWays => 2,
        }
    }
}

impl fmt::Display for ScheduleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleMode {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(ScheduleMode::Static),
            "oneway" => Ok(ScheduleMode::OneWay),
            "bothways" => Ok(ScheduleMode::BothWays),
            _ => Err(ScheduleError::UnknownMode(s.to_string())),
        }
    }
}

/// Direction of travel of beta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Unset,
    Increasing,
    Decreasing,
}

impl Direction {
    /// The direction of a change in beta. A zero change has no direction.
    pub fn of(delta: f64) -> Direction {
        if delta > 0. {
            Direction::Increasing
        } else if delta < 0. {
            Direction::Decreasing
        } else {
            Direction::Unset
        }
    }
}

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error(
        "Unknown schedule mode {0:?}. Valid options are 'static' (beta stays fixed), \
         'oneway' (beta moves from 0 to 1 or from 1 to 0) and 'bothways' \
         (beta moves to the opposite extreme and then returns to the start)"
    )]
    UnknownMode(String),
    #[error("The number of annealing steps must be positive")]
    ZeroSteps,
    #[error("Starting beta {0} is not in [0, 1]")]
    BetaOutOfRange(f64),
    #[error("A {mode} schedule must start at beta 0 or 1, got {start}")]
    AmbiguousStart { mode: ScheduleMode, start: f64 },
}

/// Settings for the beta schedule of an annealed chain
#[derive(Debug, Clone, Copy)]
pub struct ScheduleSettings {
    pub mode: ScheduleMode,
    /// Beta at the start of the chain. Must be 0 or 1 unless the mode is static.
    pub start_beta: f64,
    /// Number of steps of a single sweep between the extremes. A bothways
    /// schedule performs two sweeps.
    pub num_steps: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            mode: ScheduleMode::OneWay,
            start_beta: 0.,
            num_steps: 1000,
        }
    }
}

impl ScheduleSettings {
    /// Number of schedule steps of a chain. Static chains run `num_steps`
    /// steps without moving beta.
    pub fn chain_length(&self) -> u64 {
        self.num_steps * self.mode.num_sweeps().max(1)
    }

    /// Validate the settings and create the controller together with the
    /// state it drives.
    pub fn build(&self) -> Result<(AnnealingSchedule, AnnealingState), ScheduleError> {
        if self.num_steps == 0 {
            return Err(ScheduleError::ZeroSteps);
        }
        if !(0f64..=1f64).contains(&self.start_beta) {
            return Err(ScheduleError::BetaOutOfRange(self.start_beta));
        }

        let start = match self.mode {
            ScheduleMode::Static => self.start_beta,
            mode => snap_to_extreme(self.start_beta).ok_or(ScheduleError::AmbiguousStart {
                mode,
                start: self.start_beta,
            })?,
        };

        let (target, increment) = match self.mode {
            ScheduleMode::Static => (start, 0.),
            _ => {
                let target = 1. - start;
                (target, (target - start) / self.num_steps as f64)
            }
        };

        debug!(
            "Beta schedule {}: start {}, increment {}, {} steps per sweep",
            self.mode, start, increment, self.num_steps
        );

        let schedule = AnnealingSchedule {
            target,
            steps_per_sweep: self.num_steps,
            steps_in_sweep: 0,
            sweeps_left: self.mode.num_sweeps(),
        };
        let state = AnnealingState {
            mode: self.mode,
            beta: start,
            increment,
            direction: Direction::Unset,
        };
        Ok((schedule, state))
    }
}

fn snap_to_extreme(beta: f64) -> Option<f64> {
    if beta.abs() < BOUNDARY_EPSILON {
        Some(0.)
    } else if (beta - 1.).abs() < BOUNDARY_EPSILON {
        Some(1.)
    } else {
        None
    }
}

/// The annealing parameter and how it moves.
///
/// Only [`AnnealingSchedule::step`] changes it; everything else reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnealingState {
    mode: ScheduleMode,
    beta: f64,
    increment: f64,
    direction: Direction,
}

impl AnnealingState {
    pub fn mode(&self) -> ScheduleMode {
        self.mode
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// The signed change of beta per step.
    pub fn increment(&self) -> f64 {
        self.increment
    }

    /// Direction of the last applied increment.
    pub fn direction(&self) -> Direction {
        self.direction
    }
}

/// What happened to beta during one call to [`AnnealingSchedule::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepOutcome {
    pub beta_changed: bool,
    pub reversed: bool,
}

impl StepOutcome {
    /// Whether the log-density of the current state has to be recomputed
    /// before the next accept/reject test.
    pub fn needs_recompute(&self) -> bool {
        self.beta_changed
    }
}

/// Advances beta once per chain step.
#[derive(Debug, Clone)]
pub struct AnnealingSchedule {
    target: f64,
    steps_per_sweep: u64,
    steps_in_sweep: u64,
    sweeps_left: u64,
}

impl AnnealingSchedule {
    pub fn is_exhausted(&self) -> bool {
        self.sweeps_left == 0
    }

    /// The extreme beta is currently moving towards.
    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn remaining_steps(&self) -> u64 {
        match self.sweeps_left {
            0 => 0,
            n => n * self.steps_per_sweep - self.steps_in_sweep,
        }
    }

    pub fn step(&mut self, state: &mut AnnealingState) -> StepOutcome {
        match state.mode {
            ScheduleMode::Static => StepOutcome::default(),
            ScheduleMode::OneWay | ScheduleMode::BothWays => {
                if self.is_exhausted() {
                    return StepOutcome::default();
                }

                let needed = Direction::of(self.target - state.beta);
                let mut reversed = false;
                match state.direction {
                    // The first step only establishes where beta is heading
                    Direction::Unset => state.direction = needed,
                    current if current != needed => {
                        state.increment = -state.increment;
                        state.direction = needed;
                        reversed = true;
                        info!(
                            "Beta schedule reversed at beta = {}, now heading to {}",
                            state.beta, self.target
                        );
                    }
                    _ => {}
                }

                state.beta += state.increment;
                self.steps_in_sweep += 1;

                if self.steps_in_sweep == self.steps_per_sweep {
                    // Absorb accumulated rounding at the end of each sweep
                    state.beta = self.target;
                    self.steps_in_sweep = 0;
                    self.sweeps_left -= 1;
                    if self.sweeps_left > 0 {
                        self.target = 1. - self.target;
                    }
                }

                StepOutcome {
                    beta_changed: true,
                    reversed,
                }
            }
        }
    }
}
