/*!
# Nodes

A node binds one named value (a scalar or a fixed-length vector) to a role in the
model graph:

- **Stochastic** nodes carry a [`Distribution`] and are proposed by the sampler.
- **Observed** nodes carry a distribution over fixed data. They are never proposed,
  but their log-likelihood still enters the joint log-probability.
- **Deterministic** nodes are recomputed by the model's update callback and are
  never proposed directly.

Every value has at least one element; a scalar is simply the length-one case, so
proposal, rollback and tuning have a single implementation for both shapes.

Values live in a [`Storage`], which records explicitly whether the model owns
the buffer or borrows caller-owned memory for the lifetime `'a`.
*/

use std::fmt;
use std::marker::PhantomData;

use ndarray::{Array1, ArrayView1, ArrayViewMut1};

use crate::core::RandomSource;
use crate::distributions::Distribution;
use crate::model::Nodes;
use crate::stats::summarize;

/// Proposal scale every stochastic component starts from.
pub const INITIAL_SCALE: f64 = 0.25;

/// Per-component acceptance rate the tuner steers towards.
pub const TARGET_ACCEPTANCE: f64 = 0.7;

const DEADBAND: (f64, f64) = (0.6, 0.8);
const DILUTION: f64 = 0.2;

/// Multiplier applied to a proposal scale given the acceptance ratio observed
/// since the last rescale.
///
/// Inside `[0.6, 0.8]` the scale is left alone; outside, it moves proportionally
/// to the distance from [`TARGET_ACCEPTANCE`].
///
/// ```rust
/// use bugs_mcmc::node::tune_factor;
///
/// assert_eq!(tune_factor(0.75), 1.0);
/// assert!(tune_factor(0.95) > 1.0);
/// assert!(tune_factor(0.2) < 1.0);
/// ```
pub fn tune_factor(acceptance_ratio: f64) -> f64 {
    if (DEADBAND.0..=DEADBAND.1).contains(&acceptance_ratio) {
        1.0
    } else {
        1.0 + (acceptance_ratio - TARGET_ACCEPTANCE) * DILUTION
    }
}

/// Position of a node in its model's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Registration index of the node.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The value type a node was registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Scalar,
    Vector,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Scalar => f.write_str("scalar"),
            Shape::Vector => f.write_str("vector"),
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Type-level tag for the value type behind a [`NodeRef`].
pub trait ValueKind: sealed::Sealed {
    const SHAPE: Shape;
}

/// Marker for nodes holding a single `f64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {}

/// Marker for nodes holding a fixed-length vector of `f64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vector {}

impl sealed::Sealed for Scalar {}
impl sealed::Sealed for Vector {}

impl ValueKind for Scalar {
    const SHAPE: Shape = Shape::Scalar;
}

impl ValueKind for Vector {
    const SHAPE: Shape = Shape::Vector;
}

/// A typed handle to a registered node.
pub struct NodeRef<K> {
    id: NodeId,
    kind: PhantomData<fn() -> K>,
}

impl<K> NodeRef<K> {
    pub(crate) fn new(id: NodeId) -> Self {
        Self {
            id,
            kind: PhantomData,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<K> Clone for NodeRef<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for NodeRef<K> {}

impl<K> PartialEq for NodeRef<K> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<K> Eq for NodeRef<K> {}

impl<K: ValueKind> fmt::Debug for NodeRef<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeRef<{}>({})", K::SHAPE, self.id)
    }
}

impl<K> From<NodeRef<K>> for NodeId {
    fn from(node: NodeRef<K>) -> Self {
        node.id
    }
}

/// Backing memory of a node value, tagged with who owns it.
#[derive(Debug)]
pub enum Storage<'a> {
    /// Allocated by the model on the caller's behalf; dropped with the model.
    Owned(Array1<f64>),
    /// Caller-owned memory; the model only ever holds the borrow.
    Borrowed(ArrayViewMut1<'a, f64>),
}

impl<'a> Storage<'a> {
    pub fn view(&self) -> ArrayView1<'_, f64> {
        match self {
            Storage::Owned(values) => values.view(),
            Storage::Borrowed(values) => values.view(),
        }
    }

    pub fn view_mut(&mut self) -> ArrayViewMut1<'_, f64> {
        match self {
            Storage::Owned(values) => values.view_mut(),
            Storage::Borrowed(values) => values.view_mut(),
        }
    }

    pub fn len(&self) -> usize {
        self.view().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Storage::Owned(_))
    }

    /// Address of the first element, for identity checks.
    pub fn as_ptr(&self) -> *const f64 {
        self.view().as_ptr()
    }
}

/// Conversion of a value binding into node storage.
///
/// Values passed by value are copied into model-owned storage; mutable
/// references bind the caller's memory, which holds the chain's current state
/// once the model is dropped.
pub trait IntoStorage<'a> {
    type Kind: ValueKind;

    fn into_storage(self) -> Storage<'a>;
}

impl<'a> IntoStorage<'a> for f64 {
    type Kind = Scalar;

    fn into_storage(self) -> Storage<'a> {
        Storage::Owned(Array1::from_elem(1, self))
    }
}

impl<'a> IntoStorage<'a> for &'a mut f64 {
    type Kind = Scalar;

    fn into_storage(self) -> Storage<'a> {
        Storage::Borrowed(ArrayViewMut1::from(std::slice::from_mut(self)))
    }
}

impl<'a> IntoStorage<'a> for Array1<f64> {
    type Kind = Vector;

    fn into_storage(self) -> Storage<'a> {
        Storage::Owned(self)
    }
}

impl<'a> IntoStorage<'a> for Vec<f64> {
    type Kind = Vector;

    fn into_storage(self) -> Storage<'a> {
        Storage::Owned(Array1::from(self))
    }
}

impl<'a> IntoStorage<'a> for &'a mut Array1<f64> {
    type Kind = Vector;

    fn into_storage(self) -> Storage<'a> {
        Storage::Borrowed(self.view_mut())
    }
}

impl<'a> IntoStorage<'a> for &'a mut [f64] {
    type Kind = Vector;

    fn into_storage(self) -> Storage<'a> {
        Storage::Borrowed(ArrayViewMut1::from(self))
    }
}

impl<'a> IntoStorage<'a> for &'a mut Vec<f64> {
    type Kind = Vector;

    fn into_storage(self) -> Storage<'a> {
        Storage::Borrowed(ArrayViewMut1::from(self.as_mut_slice()))
    }
}

/// Fixed role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Stochastic,
    Observed,
    Deterministic,
}

impl Role {
    pub fn is_stochastic(self) -> bool {
        matches!(self, Role::Stochastic | Role::Observed)
    }

    pub fn is_observed(self) -> bool {
        self == Role::Observed
    }

    pub fn is_deterministic(self) -> bool {
        self == Role::Deterministic
    }

    /// Whether the sampler proposes new values for nodes with this role.
    pub fn is_jumping(self) -> bool {
        self == Role::Stochastic
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Stochastic => f.write_str("stochastic"),
            Role::Observed => f.write_str("observed"),
            Role::Deterministic => f.write_str("deterministic"),
        }
    }
}

/// What to register a value as.
#[derive(Debug)]
pub enum NodeSpec {
    Deterministic,
    Stochastic {
        distribution: Distribution,
        observed: bool,
    },
}

/// Registers a value as deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deterministic;

impl From<Deterministic> for NodeSpec {
    fn from(_: Deterministic) -> Self {
        NodeSpec::Deterministic
    }
}

/// A bare distribution registers a latent (proposed) stochastic node.
impl From<Distribution> for NodeSpec {
    fn from(distribution: Distribution) -> Self {
        NodeSpec::Stochastic {
            distribution,
            observed: false,
        }
    }
}

/// Per-component proposal scales with the accept/reject counts gathered
/// since the last rescale.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalScale {
    scale: Array1<f64>,
    accepted: Vec<u64>,
    rejected: Vec<u64>,
}

impl ProposalScale {
    pub fn new(len: usize) -> Self {
        Self {
            scale: Array1::from_elem(len, INITIAL_SCALE),
            accepted: vec![0; len],
            rejected: vec![0; len],
        }
    }

    pub fn scale(&self) -> ArrayView1<'_, f64> {
        self.scale.view()
    }

    pub fn accepted(&self) -> &[u64] {
        &self.accepted
    }

    pub fn rejected(&self) -> &[u64] {
        &self.rejected
    }

    fn record(&mut self, i: usize, accepted: bool) {
        if accepted {
            self.accepted[i] += 1;
        } else {
            self.rejected[i] += 1;
        }
    }

    /// Rescales every component from its acceptance ratio and resets the counts.
    ///
    /// Components without a single test since the last call keep their scale.
    pub fn tune(&mut self) {
        for i in 0..self.scale.len() {
            let trials = self.accepted[i] + self.rejected[i];
            if trials == 0 {
                continue;
            }
            let ratio = self.accepted[i] as f64 / trials as f64;
            self.scale[i] *= tune_factor(ratio);
            log::trace!("component {i}: acceptance {ratio:.3}, scale {:.5}", self.scale[i]);
        }
        self.accepted.fill(0);
        self.rejected.fill(0);
    }
}

#[derive(Debug)]
struct StochasticState {
    distribution: Distribution,
    observed: bool,
    proposal: ProposalScale,
}

#[derive(Debug)]
enum NodeKind {
    Stochastic(StochasticState),
    Deterministic,
}

/// One registered value together with its rollback snapshot and tallied history.
#[derive(Debug)]
pub struct Node<'a> {
    name: String,
    shape: Shape,
    storage: Storage<'a>,
    old: Array1<f64>,
    history: Vec<Array1<f64>>,
    kind: NodeKind,
}

impl<'a> Node<'a> {
    pub(crate) fn new(name: String, shape: Shape, storage: Storage<'a>, spec: NodeSpec) -> Self {
        let old = storage.view().to_owned();
        let kind = match spec {
            NodeSpec::Deterministic => NodeKind::Deterministic,
            NodeSpec::Stochastic {
                distribution,
                observed,
            } => NodeKind::Stochastic(StochasticState {
                distribution,
                observed,
                proposal: ProposalScale::new(old.len()),
            }),
        };
        Self {
            name,
            shape,
            storage,
            old,
            history: Vec::new(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn role(&self) -> Role {
        match &self.kind {
            NodeKind::Deterministic => Role::Deterministic,
            NodeKind::Stochastic(s) if s.observed => Role::Observed,
            NodeKind::Stochastic(_) => Role::Stochastic,
        }
    }

    /// Number of elements in the value.
    pub fn len(&self) -> usize {
        self.old.len()
    }

    pub fn is_empty(&self) -> bool {
        self.old.is_empty()
    }

    pub fn value(&self) -> ArrayView1<'_, f64> {
        self.storage.view()
    }

    pub(crate) fn value_mut(&mut self) -> ArrayViewMut1<'_, f64> {
        self.storage.view_mut()
    }

    /// The snapshot taken by the last [`Node::preserve`].
    pub fn old_value(&self) -> ArrayView1<'_, f64> {
        self.old.view()
    }

    pub fn storage(&self) -> &Storage<'a> {
        &self.storage
    }

    /// Every tallied value, oldest first.
    pub fn history(&self) -> &[Array1<f64>] {
        &self.history
    }

    pub fn distribution(&self) -> Option<&Distribution> {
        match &self.kind {
            NodeKind::Stochastic(s) => Some(&s.distribution),
            NodeKind::Deterministic => None,
        }
    }

    pub fn proposal(&self) -> Option<&ProposalScale> {
        match &self.kind {
            NodeKind::Stochastic(s) => Some(&s.proposal),
            NodeKind::Deterministic => None,
        }
    }

    /// This node's contribution to the joint log-probability; `None` for
    /// deterministic nodes.
    pub fn log_likelihood(&self, nodes: &Nodes<'_>) -> Option<f64> {
        self.distribution()
            .map(|d| d.log_likelihood(self.storage.view(), nodes))
    }

    pub fn preserve(&mut self) {
        self.old.assign(&self.storage.view());
    }

    pub fn revert(&mut self) {
        self.storage.view_mut().assign(&self.old);
    }

    /// Random-walk proposal over every component at once. No-op unless the
    /// node is a latent stochastic.
    pub fn jump<R: RandomSource + ?Sized>(&mut self, rng: &mut R) {
        let NodeKind::Stochastic(state) = &mut self.kind else {
            return;
        };
        if state.observed {
            return;
        }
        let mut value = self.storage.view_mut();
        for (x, &scale) in value.iter_mut().zip(state.proposal.scale.iter()) {
            *x += rng.normal() * scale;
        }
    }

    /// Snapshots component `i` and perturbs it. Returns `false` (and draws
    /// nothing) unless the node is a latent stochastic.
    pub(crate) fn propose_component<R: RandomSource + ?Sized>(
        &mut self,
        i: usize,
        rng: &mut R,
    ) -> bool {
        let NodeKind::Stochastic(state) = &mut self.kind else {
            return false;
        };
        if state.observed {
            return false;
        }
        let mut value = self.storage.view_mut();
        self.old[i] = value[i];
        value[i] += rng.normal() * state.proposal.scale[i];
        true
    }

    /// Settles a component proposal: restores component `i` on rejection and
    /// counts the outcome.
    pub(crate) fn settle_component(&mut self, i: usize, accepted: bool) {
        if !accepted {
            let old = self.old[i];
            self.storage.view_mut()[i] = old;
        }
        if let NodeKind::Stochastic(state) = &mut self.kind {
            state.proposal.record(i, accepted);
        }
    }

    /// Adapts the proposal scales. No-op for deterministic and observed nodes.
    pub fn tune(&mut self) {
        if let NodeKind::Stochastic(state) = &mut self.kind {
            if !state.observed {
                state.proposal.tune();
            }
        }
    }

    pub fn tally(&mut self) {
        self.history.push(self.storage.view().to_owned());
    }

    pub(crate) fn clear_history(&mut self) {
        self.history.clear();
    }
}

impl fmt::Display for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {:.4}", self.name, self.role(), self.value())?;
        if let Some(summary) = summarize(&self.history) {
            write!(
                f,
                " mean {:.4} sd {:.4} (n = {})",
                summary.mean,
                summary.std_dev(),
                summary.count
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    struct FixedNormal(f64);

    impl RandomSource for FixedNormal {
        fn uniform(&mut self) -> f64 {
            0.5
        }

        fn normal(&mut self) -> f64 {
            self.0
        }
    }

    fn latent(values: Vec<f64>) -> Node<'static> {
        Node::new(
            "x".to_string(),
            Shape::Vector,
            values.into_storage(),
            Distribution::normal(0.0, 1.0).into(),
        )
    }

    #[test]
    fn tune_factor_is_flat_inside_deadband() {
        for r in [0.6, 0.65, 0.7, 0.75, 0.8] {
            assert_eq!(tune_factor(r), 1.0, "r = {r}");
        }
    }

    #[test]
    fn tune_factor_increases_outside_deadband() {
        let below = [0.0, 0.1, 0.3, 0.5, 0.59];
        for w in below.windows(2) {
            assert!(tune_factor(w[0]) < tune_factor(w[1]));
        }
        let above = [0.81, 0.85, 0.9, 1.0];
        for w in above.windows(2) {
            assert!(tune_factor(w[0]) < tune_factor(w[1]));
        }
        assert_abs_diff_eq!(tune_factor(1.0), 1.06, epsilon = 1e-12);
        assert_abs_diff_eq!(tune_factor(0.0), 0.86, epsilon = 1e-12);
    }

    #[test]
    fn jump_moves_every_component_by_its_scale() {
        let mut node = latent(vec![1.0, 2.0, 3.0]);
        node.jump(&mut FixedNormal(2.0));
        assert_abs_diff_eq!(node.value(), arr1(&[1.5, 2.5, 3.5]).view(), epsilon = 1e-12);
    }

    #[test]
    fn preserve_then_revert_restores_value() {
        let mut node = latent(vec![1.0, 2.0]);
        node.preserve();
        assert_eq!(node.old_value(), node.value());
        node.jump(&mut FixedNormal(1.0));
        assert_ne!(node.old_value(), node.value());
        node.revert();
        assert_eq!(node.value(), arr1(&[1.0, 2.0]).view());
    }

    #[test]
    fn observed_and_deterministic_nodes_do_not_jump() {
        let mut observed = Node::new(
            "y".to_string(),
            Shape::Scalar,
            0.5_f64.into_storage(),
            Distribution::normal(0.0, 1.0).observed(),
        );
        let mut det = Node::new(
            "d".to_string(),
            Shape::Scalar,
            0.5_f64.into_storage(),
            Deterministic.into(),
        );
        observed.jump(&mut FixedNormal(1.0));
        det.jump(&mut FixedNormal(1.0));
        assert_eq!(observed.value()[0], 0.5);
        assert_eq!(det.value()[0], 0.5);
        assert_eq!(observed.role(), Role::Observed);
        assert_eq!(det.role(), Role::Deterministic);
        assert!(!observed.propose_component(0, &mut FixedNormal(1.0)));
    }

    #[test]
    fn rejected_component_is_restored_and_counted() {
        let mut node = latent(vec![1.0, 2.0]);
        assert!(node.propose_component(1, &mut FixedNormal(4.0)));
        assert_eq!(node.value()[1], 3.0);
        node.settle_component(1, false);
        assert_eq!(node.value(), arr1(&[1.0, 2.0]).view());

        assert!(node.propose_component(0, &mut FixedNormal(4.0)));
        node.settle_component(0, true);
        assert_eq!(node.value(), arr1(&[2.0, 2.0]).view());

        let proposal = node.proposal().unwrap();
        assert_eq!(proposal.accepted(), &[1, 0]);
        assert_eq!(proposal.rejected(), &[0, 1]);
    }

    #[test]
    fn tune_rescales_and_resets_counts() {
        let mut scale = ProposalScale::new(3);
        // component 0: always accepted, component 1: in the deadband, component 2: untested
        for _ in 0..10 {
            scale.record(0, true);
        }
        for k in 0..10 {
            scale.record(1, k < 7);
        }
        scale.tune();
        assert_abs_diff_eq!(scale.scale()[0], INITIAL_SCALE * 1.06, epsilon = 1e-12);
        assert_eq!(scale.scale()[1], INITIAL_SCALE);
        assert_eq!(scale.scale()[2], INITIAL_SCALE);
        assert!(scale.accepted().iter().all(|&a| a == 0));
        assert!(scale.rejected().iter().all(|&r| r == 0));
    }

    #[test]
    fn borrowed_storage_writes_through() {
        let mut external = 1.0_f64;
        {
            let mut node = Node::new(
                "s".to_string(),
                Shape::Scalar,
                (&mut external).into_storage(),
                Distribution::normal(0.0, 1.0).into(),
            );
            assert!(!node.storage().is_owned());
            node.jump(&mut FixedNormal(4.0));
        }
        assert_eq!(external, 2.0);
    }
}
