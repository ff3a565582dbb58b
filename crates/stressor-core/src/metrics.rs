//! Derived metrics and their cross-worker aggregation

use core::fmt;

/// How samples of one metric from many workers combine into one value
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregation {
    /// Samples are rates; combine with the harmonic mean
    HarmonicMean = 1,
    GeometricMean = 2,
    Total = 3,
    Maximum = 4,
}

impl Aggregation {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Aggregation::HarmonicMean),
            2 => Some(Aggregation::GeometricMean),
            3 => Some(Aggregation::Total),
            4 => Some(Aggregation::Maximum),
            _ => None,
        }
    }

    /// Combine per-worker samples.
    ///
    /// The means only consider strictly positive samples (a worker that
    /// collected nothing reports 0 and must not drag the result to 0).
    /// Returns 0.0 when there is nothing to combine.
    pub fn combine(self, samples: &[f64]) -> f64 {
        match self {
            Aggregation::HarmonicMean => {
                let (n, inv) = samples
                    .iter()
                    .filter(|v| **v > 0.0)
                    .fold((0usize, 0.0f64), |(n, s), v| (n + 1, s + 1.0 / v));
                if n == 0 { 0.0 } else { n as f64 / inv }
            }
            Aggregation::GeometricMean => {
                let (n, logs) = samples
                    .iter()
                    .filter(|v| **v > 0.0)
                    .fold((0usize, 0.0f64), |(n, s), v| (n + 1, s + v.ln()));
                if n == 0 { 0.0 } else { (logs / n as f64).exp() }
            }
            Aggregation::Total => samples.iter().sum(),
            Aggregation::Maximum => samples.iter().copied().fold(0.0, f64::max),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Aggregation::HarmonicMean => "harmonic mean",
            Aggregation::GeometricMean => "geometric mean",
            Aggregation::Total => "total",
            Aggregation::Maximum => "maximum",
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One metric after aggregation over all workers
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub label: String,
    pub value: f64,
    pub kind: Aggregation,
}
