/*!
# Model

The [`Model`] owns every registered node in an arena ([`Nodes`]), the update
callback that recomputes deterministic nodes, and the random source. Sampling
runs in two phases:

1. **Tuning** ([`Model::tune`]): every latent stochastic node proposes each of its
   components in turn, each followed by its own accept/reject test, and every
   `tuning_step` sweeps the per-component proposal scales are rescaled towards a
   70% acceptance rate.
2. **Sampling** ([`Model::run`]): all latent nodes jump at once, the whole state is
   accepted or rolled back, and post-burn-in sweeps on thinning boundaries are
   tallied for every node.

[`Model::sample`] chains `init_chain`, `tune` and `run`.

## Example Usage

```rust
use bugs_mcmc::distributions::Distribution;
use bugs_mcmc::model::Model;
use bugs_mcmc::node::Deterministic;

let mut model = Model::build(|nodes| {
    let mu = nodes.register("mu", 0.0, Distribution::normal(0.0, 0.01))?;
    let shifted = nodes.register("shifted", 0.0, Deterministic)?;
    nodes.register("y", vec![1.9, 2.1, 2.0], Distribution::normal(mu, 4.0).observed())?;
    Ok(move |nodes: &mut bugs_mcmc::model::Nodes<'_>| {
        let v = nodes.scalar(mu) + 1.0;
        nodes.set_scalar(shifted, v);
    })
})
.unwrap()
.set_seed(42);

model.sample(1_000, 500, 500, 1).unwrap();
let mu = model.get_node::<bugs_mcmc::node::Scalar>("mu").unwrap();
assert_eq!(model.nodes().samples(mu).len(), 1_000);
```
*/

use std::collections::HashMap;
use std::fmt::Write as _;
use std::ops::Index;

use indicatif::ProgressBar;
use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1};

use crate::config::SampleConfig;
use crate::core::{sampling_progress, RandomSource, SmallRngSource};
use crate::error::{ModelError, Result};
use crate::node::{IntoStorage, Node, NodeId, NodeRef, NodeSpec, Scalar, ValueKind, Vector};
use crate::stats::trace_matrix;

/// Arena of registered nodes, indexed by [`NodeId`] in registration order,
/// together with the name-to-node index used by [`Nodes::lookup`].
#[derive(Debug, Default)]
pub struct Nodes<'a> {
    nodes: Vec<Node<'a>>,
    bindings: HashMap<String, NodeId>,
}

impl<'a> Nodes<'a> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            bindings: HashMap::new(),
        }
    }

    /// Binds `value` to `name` as a new node and returns its typed handle.
    ///
    /// Fails if the name is taken, the value is empty, or a hyperparameter
    /// refers to an unknown node or has a length other than one or the
    /// value's length.
    pub fn register<V>(
        &mut self,
        name: impl Into<String>,
        value: V,
        spec: impl Into<NodeSpec>,
    ) -> Result<NodeRef<V::Kind>>
    where
        V: IntoStorage<'a>,
    {
        let name = name.into();
        if self.bindings.contains_key(&name) {
            return Err(ModelError::DuplicateBinding { name });
        }
        let storage = value.into_storage();
        if storage.is_empty() {
            return Err(ModelError::EmptyValue { name });
        }
        let spec = spec.into();
        if let NodeSpec::Stochastic { distribution, .. } = &spec {
            for param in distribution.params() {
                match param.len(self) {
                    None => {
                        return Err(ModelError::InvalidParam {
                            name,
                            reason: format!("{param:?} refers to an unregistered node"),
                        })
                    }
                    Some(len) if len != 1 && len != storage.len() => {
                        return Err(ModelError::InvalidParam {
                            name,
                            reason: format!(
                                "parameter of length {len} does not fit a value of length {}",
                                storage.len()
                            ),
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        let id = NodeId(self.nodes.len());
        let node = Node::new(name.clone(), <V::Kind as ValueKind>::SHAPE, storage, spec);
        debug!(
            "registered {} node `{name}` ({} element(s), {})",
            node.role(),
            node.len(),
            if node.storage().is_owned() { "owned" } else { "borrowed" }
        );
        self.nodes.push(node);
        self.bindings.insert(name, id);
        Ok(NodeRef::new(id))
    }

    /// Finds the node bound to `name` and checks its value type.
    pub fn lookup<K: ValueKind>(&self, name: &str) -> Result<NodeRef<K>> {
        let id = *self
            .bindings
            .get(name)
            .ok_or_else(|| ModelError::NotFound { name: name.into() })?;
        let found = self.nodes[id.0].shape();
        if found != K::SHAPE {
            return Err(ModelError::TypeMismatch {
                name: name.into(),
                expected: K::SHAPE,
                found,
            });
        }
        Ok(NodeRef::new(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node<'a>> {
        self.nodes.get(id.0)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node<'a> {
        &mut self.nodes[id.0]
    }

    /// Nodes in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node<'a>)> {
        self.nodes.iter().enumerate().map(|(i, node)| (NodeId(i), node))
    }

    pub fn scalar(&self, node: NodeRef<Scalar>) -> f64 {
        self.nodes[node.id().0].value()[0]
    }

    pub fn set_scalar(&mut self, node: NodeRef<Scalar>, value: f64) {
        self.node_mut(node.id()).value_mut()[0] = value;
    }

    pub fn vector(&self, node: NodeRef<Vector>) -> ArrayView1<'_, f64> {
        self.nodes[node.id().0].value()
    }

    /// Mutable access to a vector value, for update callbacks.
    pub fn vector_mut(&mut self, node: NodeRef<Vector>) -> ArrayViewMut1<'_, f64> {
        self.node_mut(node.id()).value_mut()
    }

    /// Tallied values of a scalar node, oldest first.
    pub fn samples(&self, node: NodeRef<Scalar>) -> Array1<f64> {
        self.nodes[node.id().0]
            .history()
            .iter()
            .map(|row| row[0])
            .collect()
    }

    /// Tallied values of a vector node, one row per tally.
    pub fn trace(&self, node: NodeRef<Vector>) -> Array2<f64> {
        trace_matrix(self.nodes[node.id().0].history())
    }

    /// Address of the storage bound to `id`.
    pub fn storage_ptr(&self, id: impl Into<NodeId>) -> *const f64 {
        self.nodes[id.into().0].storage().as_ptr()
    }

    fn preserve_all(&mut self) {
        self.nodes.iter_mut().for_each(Node::preserve);
    }

    fn revert_all(&mut self) {
        self.nodes.iter_mut().for_each(Node::revert);
    }

    fn tally_all(&mut self) {
        self.nodes.iter_mut().for_each(Node::tally);
    }
}

impl<'a> Index<NodeId> for Nodes<'a> {
    type Output = Node<'a>;

    fn index(&self, id: NodeId) -> &Self::Output {
        &self.nodes[id.0]
    }
}

/// Callback recomputing deterministic nodes from the current stochastic values.
pub type UpdateFn<'a> = Box<dyn FnMut(&mut Nodes<'a>) + 'a>;

/// Where the chain is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Uninitialized,
    Tuning,
    Sampling,
    Done,
}

/// Accept/reject counts of the run loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainStats {
    pub accepted: u64,
    pub rejected: u64,
}

impl ChainStats {
    pub fn sweeps(&self) -> u64 {
        self.accepted + self.rejected
    }

    /// `None` until at least one sweep has run.
    pub fn acceptance_ratio(&self) -> Option<f64> {
        match self.sweeps() {
            0 => None,
            n => Some(self.accepted as f64 / n as f64),
        }
    }
}

fn bad_logp(value: f64) -> bool {
    value.is_nan() || value == f64::NEG_INFINITY
}

/// A probabilistic model and the Metropolis sampler driving it.
pub struct Model<'a, R = SmallRngSource> {
    nodes: Nodes<'a>,
    update: UpdateFn<'a>,
    rng: R,
    jumping: Vec<NodeId>,
    deterministics: Vec<NodeId>,
    likelihood_terms: Vec<NodeId>,
    stats: ChainStats,
    state: ChainState,
}

impl<'a> Model<'a> {
    /// An empty model with the given update callback and a randomly seeded source.
    pub fn new<U>(update: U) -> Self
    where
        U: FnMut(&mut Nodes<'a>) + 'a,
    {
        Self::with_rng(SmallRngSource::new(), update)
    }

    /// Registers nodes through `define`, which returns the update callback
    /// (typically closing over the handles it just registered).
    pub fn build<F, U>(define: F) -> Result<Self>
    where
        F: FnOnce(&mut Nodes<'a>) -> Result<U>,
        U: FnMut(&mut Nodes<'a>) + 'a,
    {
        Self::build_with_rng(SmallRngSource::new(), define)
    }

    /// Reseeds the random source.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRngSource::from_seed(seed);
        self
    }
}

impl<'a, R: RandomSource> Model<'a, R> {
    pub fn with_rng<U>(rng: R, update: U) -> Self
    where
        U: FnMut(&mut Nodes<'a>) + 'a,
    {
        Self::from_parts(Nodes::new(), rng, Box::new(update))
    }

    pub fn build_with_rng<F, U>(rng: R, define: F) -> Result<Self>
    where
        F: FnOnce(&mut Nodes<'a>) -> Result<U>,
        U: FnMut(&mut Nodes<'a>) + 'a,
    {
        let mut nodes = Nodes::new();
        let update = define(&mut nodes)?;
        Ok(Self::from_parts(nodes, rng, Box::new(update)))
    }

    fn from_parts(nodes: Nodes<'a>, rng: R, update: UpdateFn<'a>) -> Self {
        Self {
            nodes,
            update,
            rng,
            jumping: Vec::new(),
            deterministics: Vec::new(),
            likelihood_terms: Vec::new(),
            stats: ChainStats::default(),
            state: ChainState::Uninitialized,
        }
    }

    /// See [`Nodes::register`]. The node stays invisible to the sampler until
    /// the next [`Model::init_chain`].
    pub fn register<V>(
        &mut self,
        name: impl Into<String>,
        value: V,
        spec: impl Into<NodeSpec>,
    ) -> Result<NodeRef<V::Kind>>
    where
        V: IntoStorage<'a>,
    {
        self.nodes.register(name, value, spec)
    }

    /// Handle of the node bound to `name`, checked against the value type `K`.
    pub fn get_node<K: ValueKind>(&self, name: &str) -> Result<NodeRef<K>> {
        self.nodes.lookup(name)
    }

    pub fn nodes(&self) -> &Nodes<'a> {
        &self.nodes
    }

    pub fn chain_state(&self) -> ChainState {
        self.state
    }

    pub fn stats(&self) -> ChainStats {
        self.stats
    }

    /// Fraction of accepted run-loop sweeps; `None` before the first sweep.
    pub fn acceptance_ratio(&self) -> Option<f64> {
        self.stats.acceptance_ratio()
    }

    /// Latent stochastic nodes, as of the last [`Model::init_chain`].
    pub fn jumping_stochastics(&self) -> &[NodeId] {
        &self.jumping
    }

    pub fn deterministics(&self) -> &[NodeId] {
        &self.deterministics
    }

    /// Every stochastic node, observed or not, whose likelihood enters [`Model::logp`].
    pub fn likelihood_terms(&self) -> &[NodeId] {
        &self.likelihood_terms
    }

    /// Rebuilds the derived node lists from the registered set and runs the
    /// update callback once.
    pub fn init_chain(&mut self) {
        self.jumping.clear();
        self.deterministics.clear();
        self.likelihood_terms.clear();
        for (id, node) in self.nodes.iter() {
            let role = node.role();
            if role.is_jumping() {
                self.jumping.push(id);
            }
            if role.is_deterministic() {
                self.deterministics.push(id);
            }
            if role.is_stochastic() {
                self.likelihood_terms.push(id);
            }
        }
        (self.update)(&mut self.nodes);
        self.state = ChainState::Tuning;
        debug!(
            "chain initialised: {} jumping, {} deterministic, {} likelihood terms",
            self.jumping.len(),
            self.deterministics.len(),
            self.likelihood_terms.len()
        );
    }

    /// Joint log-probability: the sum of every stochastic node's likelihood.
    pub fn logp(&self) -> f64 {
        self.likelihood_terms
            .iter()
            .filter_map(|&id| self.nodes[id].log_likelihood(&self.nodes))
            .sum()
    }

    /// Metropolis test in log space. A NaN or `-inf` proposal is always
    /// rejected without consuming a draw.
    pub fn reject(&mut self, new_logp: f64, old_logp: f64) -> bool {
        bad_logp(new_logp) || self.rng.uniform().ln() > new_logp - old_logp
    }

    /// One accept/reject test per component of node `id`, each against the
    /// model's current joint log-probability.
    pub(crate) fn component_jump(&mut self, id: NodeId) {
        for i in 0..self.nodes[id].len() {
            let old_logp = self.logp();
            if !self.nodes.node_mut(id).propose_component(i, &mut self.rng) {
                return;
            }
            (self.update)(&mut self.nodes);
            let new_logp = self.logp();
            let accepted = !self.reject(new_logp, old_logp);
            self.nodes.node_mut(id).settle_component(i, accepted);
            if !accepted {
                // deterministics still hold values computed from the rejected move
                (self.update)(&mut self.nodes);
            }
        }
    }

    /// Component-wise tuning sweeps; every `tuning_step` sweeps each latent
    /// node rescales its proposals.
    ///
    /// Within a sweep the nodes are visited in registration order, so a later
    /// node is tested against the state left by the earlier ones.
    pub fn tune(&mut self, iterations: usize, tuning_step: usize) {
        let tuning_step = tuning_step.max(1);
        self.state = ChainState::Tuning;
        for i in 1..=iterations {
            for k in 0..self.jumping.len() {
                let id = self.jumping[k];
                self.component_jump(id);
            }
            if i % tuning_step == 0 {
                debug!("tuning at step: {i}");
                for &id in &self.jumping {
                    self.nodes.node_mut(id).tune();
                }
            }
        }
    }

    /// Block Metropolis sweeps over all latent nodes, tallying every node on
    /// sweep `i` (1-based) when `i > burn` and `i % thin == 0`.
    pub fn run(&mut self, iterations: usize, burn: usize, thin: usize) -> Result<()> {
        self.run_loop(iterations, burn, thin, None)
    }

    fn run_loop(
        &mut self,
        iterations: usize,
        burn: usize,
        thin: usize,
        progress: Option<&ProgressBar>,
    ) -> Result<()> {
        if thin == 0 {
            return Err(ModelError::InvalidConfig("thin must be at least 1".into()));
        }
        self.state = ChainState::Sampling;
        let mut logp = self.logp();
        for i in 1..=iterations {
            let old_logp = logp;
            self.nodes.preserve_all();
            for &id in &self.jumping {
                self.nodes.node_mut(id).jump(&mut self.rng);
            }
            (self.update)(&mut self.nodes);
            logp = self.logp();
            if self.reject(logp, old_logp) {
                self.nodes.revert_all();
                logp = old_logp;
                self.stats.rejected += 1;
            } else {
                self.stats.accepted += 1;
            }
            if i > burn && i % thin == 0 {
                self.nodes.tally_all();
            }
            if let Some(pb) = progress {
                pb.inc(1);
            }
        }
        self.state = ChainState::Done;
        Ok(())
    }

    /// Initialises the chain, tunes for `adapt` sweeps and runs
    /// `iterations + burn` sweeps. Fails without touching the chain unless
    /// `iterations` is a multiple of `thin`.
    pub fn sample(&mut self, iterations: usize, burn: usize, adapt: usize, thin: usize) -> Result<()> {
        self.sample_with(&SampleConfig::new(iterations).burn(burn).adapt(adapt).thin(thin))
    }

    pub fn sample_with(&mut self, config: &SampleConfig) -> Result<()> {
        if let Err(e) = config.validate() {
            warn!("not sampling: {e}");
            return Err(e);
        }
        self.init_chain();
        self.tune(config.adapt, config.tuning_step());

        let pb = config
            .progress
            .then(|| sampling_progress(config.total_iterations()));
        self.run_loop(config.total_iterations(), config.burn, config.thin, pb.as_ref())?;
        if let Some(pb) = pb {
            pb.finish_with_message("Done!");
        }

        match self.acceptance_ratio() {
            Some(ratio) => info!("sampling finished, acceptance ratio {ratio:.3}"),
            None => info!("sampling finished without any sweeps"),
        }
        Ok(())
    }

    /// Drops every tallied sample; the chain state and counters are kept.
    pub fn clear_tallies(&mut self) {
        for node in self.nodes.nodes.iter_mut() {
            node.clear_history();
        }
    }

    /// One line per node (role, current value, tallied mean and spread),
    /// followed by the run-loop acceptance ratio once there is one.
    pub fn report(&self) -> String {
        let mut out = String::new();
        for (_, node) in self.nodes.iter() {
            let _ = writeln!(out, "{node}");
        }
        if let Some(ratio) = self.acceptance_ratio() {
            let _ = writeln!(out, "acceptance ratio: {ratio:.4}");
        }
        out
    }

    pub fn print(&self) {
        print!("{}", self.report());
    }
}
