/// One recorded (beta, U) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogSample {
    pub beta: f64,
    pub u: f64,
}

impl LogSample {
    pub fn new(beta: f64, u: f64) -> Self {
        Self { beta, u }
    }
}

/// The (beta, U) samples of one chain, in iteration order.
///
/// The order defines the integration path, so samples can only be appended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogSampleStream {
    name: Option<String>,
    samples: Vec<LogSample>,
}

impl LogSampleStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stream labelled with the name of its source, used in error messages.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            samples: Vec::new(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn push(&mut self, sample: LogSample) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[LogSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&LogSample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&LogSample> {
        self.samples.last()
    }

    pub fn betas(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.beta)
    }
}

impl FromIterator<LogSample> for LogSampleStream {
    fn from_iter<T: IntoIterator<Item = LogSample>>(iter: T) -> Self {
        Self {
            name: None,
            samples: iter.into_iter().collect(),
        }
    }
}

impl FromIterator<(f64, f64)> for LogSampleStream {
    fn from_iter<T: IntoIterator<Item = (f64, f64)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(beta, u)| LogSample::new(beta, u))
            .collect()
    }
}

impl Extend<LogSample> for LogSampleStream {
    fn extend<T: IntoIterator<Item = LogSample>>(&mut self, iter: T) {
        self.samples.extend(iter)
    }
}
