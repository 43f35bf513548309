//! Run-length settings for [`Model::sample_with`](crate::model::Model::sample_with).

use crate::error::{ModelError, Result};

/// How long to tune and sample, and what to keep.
///
/// ```rust
/// use bugs_mcmc::config::SampleConfig;
///
/// let config = SampleConfig::new(5_000).burn(1_000).adapt(1_000).thin(5);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.total_iterations(), 6_000);
/// assert_eq!(config.tallies(), 1_000);
/// assert_eq!(config.tuning_step(), 10);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleConfig {
    /// Sweeps kept after burn-in, before thinning. Must be a multiple of `thin`.
    pub iterations: usize,
    /// Leading sweeps of the run loop that are never tallied.
    pub burn: usize,
    /// Component-wise tuning sweeps before the run loop.
    pub adapt: usize,
    /// Keep every `thin`-th sweep.
    pub thin: usize,
    /// Draw a progress bar over the run loop.
    pub progress: bool,
}

impl SampleConfig {
    pub fn new(iterations: usize) -> Self {
        Self {
            iterations,
            burn: 0,
            adapt: 0,
            thin: 1,
            progress: false,
        }
    }

    pub fn burn(mut self, burn: usize) -> Self {
        self.burn = burn;
        self
    }

    pub fn adapt(mut self, adapt: usize) -> Self {
        self.adapt = adapt;
        self
    }

    pub fn thin(mut self, thin: usize) -> Self {
        self.thin = thin;
        self
    }

    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.thin == 0 {
            return Err(ModelError::InvalidConfig("thin must be at least 1".into()));
        }
        if self.iterations % self.thin != 0 {
            return Err(ModelError::InvalidConfig(format!(
                "iterations ({}) must be a multiple of thin ({})",
                self.iterations, self.thin
            )));
        }
        Ok(())
    }

    /// Sweeps between two rescales during tuning; never zero.
    pub fn tuning_step(&self) -> usize {
        (self.adapt / 100).max(1)
    }

    pub fn total_iterations(&self) -> usize {
        self.iterations + self.burn
    }

    /// Number of samples each node tallies over a full run.
    pub fn tallies(&self) -> usize {
        self.iterations / self.thin.max(1)
    }
}
