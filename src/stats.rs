//! Summary statistics over tallied node histories.

use ndarray::prelude::*;

/// Per-component moments of a tallied trace.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceSummary {
    /// Number of tallied samples.
    pub count: usize,
    pub mean: Array1<f64>,
    /// Unbiased sample variance; zero when fewer than two samples were tallied.
    pub variance: Array1<f64>,
}

impl TraceSummary {
    pub fn std_dev(&self) -> Array1<f64> {
        self.variance.mapv(f64::sqrt)
    }
}

/// Stacks a history into a matrix with one row per tallied sample.
pub fn trace_matrix(history: &[Array1<f64>]) -> Array2<f64> {
    let n_params = history.first().map_or(0, |row| row.len());
    Array2::from_shape_fn((history.len(), n_params), |(r, c)| history[r][c])
}

/// Mean and variance of every component, or `None` for an empty history.
///
/// ```rust
/// use bugs_mcmc::stats::summarize;
/// use ndarray::arr1;
///
/// let history = vec![arr1(&[1.0, 10.0]), arr1(&[3.0, 10.0])];
/// let summary = summarize(&history).unwrap();
/// assert_eq!(summary.mean, arr1(&[2.0, 10.0]));
/// assert_eq!(summary.variance, arr1(&[2.0, 0.0]));
/// ```
pub fn summarize(history: &[Array1<f64>]) -> Option<TraceSummary> {
    let trace = trace_matrix(history);
    let mean = trace.mean_axis(Axis(0))?;
    let variance = if trace.nrows() > 1 {
        trace.var_axis(Axis(0), 1.0)
    } else {
        Array1::zeros(trace.ncols())
    };
    Some(TraceSummary {
        count: trace.nrows(),
        mean,
        variance,
    })
}
