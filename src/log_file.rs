//! Tab-separated log files holding the (beta, U) trace of an annealed chain.
//!
//! The format is the one the estimator reads back:
//! - lines starting with `#` are comments and may appear anywhere
//! - the first other line is the header; it must name a beta column
//!   (`BetaValue` or `beta.value`) and a U column (`UValue` or `u.value`),
//!   matched case-insensitively
//! - every following line holds one value per column, one line per chain step
//!
//! Non-finite values are written as `NaN`, `Infinity` and `-Infinity`.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::log_sample::{LogSample, LogSampleStream};

pub const BETA_COLUMN: &str = "BetaValue";
pub const U_COLUMN: &str = "UValue";
pub const SAMPLE_COLUMN: &str = "Sample";

const BETA_ALIASES: [&str; 2] = ["betavalue", "beta.value"];
const U_ALIASES: [&str; 2] = ["uvalue", "u.value"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogColumn {
    Beta,
    U,
}

impl fmt::Display for LogColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogColumn::Beta => f.write_str("beta"),
            LogColumn::U => f.write_str("U"),
        }
    }
}

fn describe_columns(columns: &[LogColumn]) -> String {
    match columns {
        [column] => column.to_string(),
        _ => columns
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(" and "),
    }
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LogFileError {
    #[error("Unable to read log file {file}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{file}: no header line found")]
    MissingHeader { file: String },
    #[error("{file}: could not find the column for {} in the header", describe_columns(.missing))]
    MissingColumn {
        file: String,
        missing: Vec<LogColumn>,
    },
    #[error(
        "{file}, line {line}: expected a value in column {index} for {column}, \
         found {found} columns"
    )]
    ShortRow {
        file: String,
        line: usize,
        column: LogColumn,
        index: usize,
        found: usize,
    },
    #[error("{file}, line {line}: could not parse {column} value {value:?}")]
    InvalidValue {
        file: String,
        line: usize,
        column: LogColumn,
        value: String,
    },
}

impl LogFileError {
    pub fn file(&self) -> &str {
        match self {
            LogFileError::Io { file, .. }
            | LogFileError::MissingHeader { file }
            | LogFileError::MissingColumn { file, .. }
            | LogFileError::ShortRow { file, .. }
            | LogFileError::InvalidValue { file, .. } => file.as_str(),
        }
    }
}

/// Read a log file into a stream named after the path.
pub fn read_log_file<P: AsRef<Path>>(
    path: P,
) -> std::result::Result<LogSampleStream, LogFileError> {
    let path = path.as_ref();
    let name = path.display().to_string();
    let file = File::open(path).map_err(|source| LogFileError::Io {
        file: name.clone(),
        source,
    })?;
    parse_log(BufReader::new(file), &name)
}

/// Parse a log from any reader. `name` is used in error messages and as the
/// name of the returned stream.
pub fn parse_log<R: BufRead>(
    reader: R,
    name: &str,
) -> std::result::Result<LogSampleStream, LogFileError> {
    let mut stream = LogSampleStream::named(name);
    let mut columns: Option<(usize, usize)> = None;

    for (idx, line) in reader.lines().enumerate() {
        let line_number = idx + 1;
        let line = line.map_err(|source| LogFileError::Io {
            file: name.to_string(),
            source,
        })?;
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.trim().is_empty() || trimmed.trim_start().starts_with('#') {
            continue;
        }

        let cells: Vec<&str> = trimmed.split('\t').map(str::trim).collect();

        let Some((beta_idx, u_idx)) = columns else {
            columns = Some(find_columns(&cells, name)?);
            continue;
        };

        let beta = parse_cell(&cells, beta_idx, LogColumn::Beta, name, line_number)?;
        let u = parse_cell(&cells, u_idx, LogColumn::U, name, line_number)?;
        stream.push(LogSample::new(beta, u));
    }

    if columns.is_none() {
        return Err(LogFileError::MissingHeader {
            file: name.to_string(),
        });
    }
    Ok(stream)
}

fn find_columns(cells: &[&str], name: &str) -> std::result::Result<(usize, usize), LogFileError> {
    let position = |aliases: &[&str]| {
        cells
            .iter()
            .position(|cell| aliases.contains(&cell.to_ascii_lowercase().as_str()))
    };
    let beta = position(&BETA_ALIASES);
    let u = position(&U_ALIASES);

    match (beta, u) {
        (Some(beta), Some(u)) => Ok((beta, u)),
        _ => {
            let missing = [(beta, LogColumn::Beta), (u, LogColumn::U)]
                .into_iter()
                .filter_map(|(idx, column)| idx.is_none().then_some(column))
                .collect();
            Err(LogFileError::MissingColumn {
                file: name.to_string(),
                missing,
            })
        }
    }
}

fn parse_cell(
    cells: &[&str],
    index: usize,
    column: LogColumn,
    name: &str,
    line: usize,
) -> std::result::Result<f64, LogFileError> {
    let cell = cells.get(index).ok_or_else(|| LogFileError::ShortRow {
        file: name.to_string(),
        line,
        column,
        index,
        found: cells.len(),
    })?;
    parse_value(cell).ok_or_else(|| LogFileError::InvalidValue {
        file: name.to_string(),
        line,
        column,
        value: cell.to_string(),
    })
}

/// Parse a single cell. Accepts everything `f64::from_str` does
/// (including `NaN`, `inf` and `Infinity`) plus `NA` for missing values.
pub fn parse_value(cell: &str) -> Option<f64> {
    if cell.eq_ignore_ascii_case("na") {
        return Some(f64::NAN);
    }
    cell.parse().ok()
}

/// Writes a (beta, U) trace in the format [`parse_log`] reads.
pub struct LogWriter<W: Write> {
    writer: W,
    /// Number of decimal places, or `None` for the shortest exact representation
    precision: Option<usize>,
    comments: Vec<String>,
    headers_written: bool,
    sample: u64,
}

impl LogWriter<BufWriter<File>> {
    /// Create a log file at `path`, replacing an existing one.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create log file: {:?}", path))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> LogWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            precision: None,
            comments: Vec::new(),
            headers_written: false,
            sample: 0,
        }
    }

    /// Write values with a fixed number of decimal places.
    ///
    /// By default values are written exactly. A fixed precision can merge
    /// neighbouring beta values of long schedules, which the estimator then
    /// treats as a plateau.
    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = Some(precision);
        self
    }

    /// Add a comment line written before the header.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comments.push(comment.into());
        self
    }

    fn write_header(&mut self) -> Result<()> {
        if self.headers_written {
            return Ok(());
        }
        for comment in &self.comments {
            writeln!(self.writer, "# {}", comment)?;
        }
        writeln!(
            self.writer,
            "{}\t{}\t{}",
            SAMPLE_COLUMN, BETA_COLUMN, U_COLUMN
        )?;
        self.headers_written = true;
        Ok(())
    }

    fn format_value(&self, value: f64) -> String {
        if value.is_nan() {
            "NaN".to_string()
        } else if value.is_infinite() {
            if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
        } else {
            match self.precision {
                Some(prec) => format!("{:.prec$}", value, prec = prec),
                None => format!("{}", value),
            }
        }
    }

    /// Append one row.
    pub fn record(&mut self, sample: &LogSample) -> Result<()> {
        self.write_header()?;
        let row = format!(
            "{}\t{}\t{}",
            self.sample,
            self.format_value(sample.beta),
            self.format_value(sample.u)
        );
        writeln!(self.writer, "{}", row).context("Failed to write log row")?;
        self.sample += 1;
        Ok(())
    }

    pub fn write_stream(&mut self, stream: &LogSampleStream) -> Result<()> {
        self.write_header()?;
        stream
            .samples()
            .iter()
            .try_for_each(|sample| self.record(sample))
    }

    /// Number of rows written so far.
    pub fn num_rows(&self) -> u64 {
        self.sample
    }

    /// Flush and return the underlying writer. Writes the header if no row
    /// was recorded.
    pub fn finalize(mut self) -> Result<W> {
        self.write_header()?;
        self.writer.flush().context("Failed to flush log file")?;
        Ok(self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(text: &str) -> std::result::Result<LogSampleStream, LogFileError> {
        parse_log(text.as_bytes(), "test.log")
    }

    #[test]
    fn header_aliases() -> Result<()> {
        let stream = parse(
            "Sample\tbeta.value\tposterior\tU.Value\n0\t0.0\t-12.5\t2.0\n1\t0.5\t-11\t3\n",
        )?;
        assert_eq!(stream.name(), Some("test.log"));
        assert_eq!(
            stream.samples(),
            &[LogSample::new(0., 2.), LogSample::new(0.5, 3.)]
        );

        let stream = parse("UVALUE\tbetavalue\n1.5\t1\n")?;
        assert_eq!(stream.samples(), &[LogSample::new(1., 1.5)]);
        Ok(())
    }

    #[test]
    fn comments_blank_lines_and_trailing_tabs() -> Result<()> {
        let text = "# generated by a test\n\
                    #\n\
                    Sample\tBetaValue\tUValue\t\n\
                    0\t0.0\t2.0\t\n\
                    # a comment between rows\n\
                    \n\
                    1\t1.0\t6.0\t\r\n";
        let stream = parse(text)?;
        assert_eq!(
            stream.samples(),
            &[LogSample::new(0., 2.), LogSample::new(1., 6.)]
        );
        Ok(())
    }

    #[test]
    fn missing_columns() {
        let err = parse("Sample\tBetaValue\tlikelihood\n0\t0\t1\n").unwrap_err();
        match &err {
            LogFileError::MissingColumn { file, missing } => {
                assert_eq!(file, "test.log");
                assert_eq!(missing, &vec![LogColumn::U]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "test.log: could not find the column for U in the header"
        );

        let err = parse("Sample\tposterior\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "test.log: could not find the column for beta and U in the header"
        );
    }

    #[test]
    fn missing_header() {
        assert!(matches!(
            parse("# only comments\n\n"),
            Err(LogFileError::MissingHeader { .. })
        ));
    }

    #[test]
    fn bad_rows_report_line() {
        let err = parse("BetaValue\tUValue\n0\t1\n0.5\tabc\n").unwrap_err();
        match err {
            LogFileError::InvalidValue {
                line,
                column,
                value,
                ..
            } => {
                assert_eq!(line, 3);
                assert_eq!(column, LogColumn::U);
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected error {other:?}"),
        }

        let err = parse("# c\nBetaValue\tUValue\n0\n").unwrap_err();
        assert!(matches!(
            err,
            LogFileError::ShortRow {
                line: 3,
                column: LogColumn::U,
                index: 1,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn non_finite_values() -> Result<()> {
        let stream = parse("BetaValue\tUValue\n0\tNaN\n0.5\t-Infinity\n0.75\tNA\n1\tinf\n")?;
        let u: Vec<f64> = stream.samples().iter().map(|s| s.u).collect();
        assert!(u[0].is_nan());
        assert_eq!(u[1], f64::NEG_INFINITY);
        assert!(u[2].is_nan());
        assert_eq!(u[3], f64::INFINITY);
        Ok(())
    }

    #[test]
    fn write_log() -> Result<()> {
        let mut writer = LogWriter::new(Vec::new()).with_comment("schedule oneway");
        writer.record(&LogSample::new(0., 2.))?;
        writer.record(&LogSample::new(0.25, f64::NEG_INFINITY))?;
        writer.record(&LogSample::new(1., 0.1))?;
        assert_eq!(writer.num_rows(), 3);
        let bytes = writer.finalize()?;
        let text = String::from_utf8(bytes)?;
        assert_eq!(
            text,
            "# schedule oneway\nSample\tBetaValue\tUValue\n0\t0\t2\n1\t0.25\t-Infinity\n2\t1\t0.1\n"
        );

        let stream = parse(&text)?;
        assert_eq!(stream.len(), 3);
        assert_eq!(stream.samples()[2], LogSample::new(1., 0.1));
        Ok(())
    }

    #[test]
    fn fixed_precision() -> Result<()> {
        let mut writer = LogWriter::new(Vec::new()).with_precision(3);
        writer.write_stream(&[(0.123456, f64::NAN)].into_iter().collect())?;
        let text = String::from_utf8(writer.finalize()?)?;
        assert_eq!(text, "Sample\tBetaValue\tUValue\n0\t0.123\tNaN\n");
        Ok(())
    }

    #[test]
    fn empty_log_has_header() -> Result<()> {
        let text = String::from_utf8(LogWriter::new(Vec::new()).finalize()?)?;
        assert_eq!(text, "Sample\tBetaValue\tUValue\n");
        assert!(parse(&text)?.is_empty());
        Ok(())
    }

    #[test]
    fn unreadable_file() {
        let err = read_log_file("/nonexistent/dir/chain.log").unwrap_err();
        assert!(matches!(err, LogFileError::Io { .. }));
        assert_eq!(err.file(), "/nonexistent/dir/chain.log");
    }
}
