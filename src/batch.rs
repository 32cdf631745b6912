use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::warn;
use rayon::{prelude::*, ThreadPoolBuilder};

use crate::{
    estimator::{BayesFactorEstimate, BayesFactorEstimator, EstimateError, EstimatorSettings},
    log_file::{read_log_file, LogFileError},
};

/// What happened to one input file.
#[derive(Debug)]
pub enum FileOutcome {
    ReadFailed(LogFileError),
    EstimateFailed(EstimateError),
    Estimated(BayesFactorEstimate),
}

#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub outcome: FileOutcome,
}

impl FileReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, FileOutcome::Estimated(_))
    }
}

/// Read and estimate a single log file.
pub fn analyze_file(path: &Path, estimator: &BayesFactorEstimator) -> FileReport {
    let outcome = match read_log_file(path) {
        Err(err) => {
            warn!("Skipping {}: {}", path.display(), err);
            FileOutcome::ReadFailed(err)
        }
        Ok(stream) => match estimator.estimate(&stream) {
            Ok(estimate) => FileOutcome::Estimated(estimate),
            Err(err) => {
                warn!("Skipping {}: {}", path.display(), err);
                FileOutcome::EstimateFailed(err)
            }
        },
    };
    FileReport {
        path: path.to_path_buf(),
        outcome,
    }
}

/// Analyse log files independently of each other on up to `jobs` threads.
///
/// A failing file does not affect the others. Reports come back in the order
/// of `paths`. With `jobs == 0` rayon picks the number of threads.
pub fn analyze_files<P: AsRef<Path> + Sync>(
    paths: &[P],
    settings: EstimatorSettings,
    jobs: usize,
) -> Result<Vec<FileReport>> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(jobs)
        .thread_name(|i| format!("bayes-factor-{}", i))
        .build()
        .context("Could not start thread pool")?;

    let estimator = BayesFactorEstimator::new(settings);
    Ok(pool.install(|| {
        paths
            .par_iter()
            .map(|path| analyze_file(path.as_ref(), &estimator))
            .collect()
    }))
}
