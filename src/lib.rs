//! A BUGS-style Markov Chain Monte Carlo engine.
//!
//! Register stochastic, observed and deterministic nodes on a [`model::Model`],
//! supply an update callback that recomputes the deterministic ones, and call
//! [`model::Model::sample`]: the engine tunes per-component random-walk scales,
//! then runs block Metropolis-Hastings sweeps with burn-in and thinning, tallying
//! every node along the way.

pub mod config;
pub mod core;
pub mod distributions;
pub mod error;
pub mod model;
pub mod node;
pub mod stats;

pub use config::SampleConfig;
pub use distributions::{Distribution, Param};
pub use error::{ModelError, Result};
pub use model::{ChainState, ChainStats, Model, Nodes};
pub use node::{Deterministic, NodeId, NodeRef, Role, Scalar, Vector};
