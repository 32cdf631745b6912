//! Estimate log Bayes factors from the (beta, U) logs of annealed chains.

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::error;
use ti_rs::{
    analyze_files, BayesFactorEstimate, EstimatorSettings, FileOutcome, FileReport, Normalization,
    BOUNDARY_EPSILON,
};

#[derive(Parser)]
#[command(name = "bayes-factor")]
#[command(about = "Thermodynamic integration of annealed MCMC logs into log Bayes factors")]
#[command(version)]
struct Cli {
    /// Tab-separated logs with BetaValue and UValue columns. Each file is
    /// analysed on its own.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Tolerance for deciding whether the first and last beta are 0 or 1
    #[arg(long, default_value_t = BOUNDARY_EPSILON)]
    epsilon: f64,

    /// Divide the trapezoid sum by the number of samples or by the number
    /// of intervals between them
    #[arg(long, default_value = "samples", value_parser = ["samples", "intervals"])]
    normalize: String,

    /// Number of files analysed in parallel (0: one per core)
    #[arg(short, long, default_value_t = 0)]
    jobs: usize,

    /// Print progress information (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn print_error(err: &dyn Error) {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(&format!(": {}", cause));
        source = cause.source();
    }
    println!("error: {}", message);
}

/// Print the estimate of one file. Returns false if a sweep failed.
fn print_estimate(report: &FileReport, estimate: &BayesFactorEstimate) -> bool {
    println!(
        "{}: {} schedule, {} samples used",
        report.path.display(),
        estimate.shape,
        estimate.num_retained
    );
    let multiple = estimate.segments.len() > 1;
    let mut complete = true;
    for (idx, segment) in estimate.segments.iter().enumerate() {
        let label = if multiple {
            format!("sweep {} log Bayes factor", idx + 1)
        } else {
            "log Bayes factor".to_string()
        };
        match &segment.log_bayes_factor {
            Ok(value) => println!("  {}: {}", label, value),
            Err(err) => {
                complete = false;
                println!("  {}: failed ({})", label, err);
            }
        }
    }
    complete
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let normalization: Normalization = match cli.normalize.parse() {
        Ok(normalization) => normalization,
        Err(err) => {
            error!("{}", err);
            return ExitCode::FAILURE;
        }
    };
    let settings = EstimatorSettings {
        epsilon: cli.epsilon,
        normalization,
    };

    let reports = match analyze_files(&cli.files, settings, cli.jobs) {
        Ok(reports) => reports,
        Err(err) => {
            error!("{:#}", err);
            return ExitCode::FAILURE;
        }
    };

    let mut failed = false;
    for report in &reports {
        match &report.outcome {
            FileOutcome::Estimated(estimate) => failed |= !print_estimate(report, estimate),
            FileOutcome::ReadFailed(err) => {
                failed = true;
                print_error(err);
            }
            FileOutcome::EstimateFailed(err) => {
                failed = true;
                print_error(err);
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
