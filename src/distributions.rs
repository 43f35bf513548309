/*!
Log-likelihood functors for stochastic nodes.

Each [`Distribution`] evaluates the log-density of a node's current value,
summed over its components. Hyperparameters are [`Param`]s: constants, fixed
data, or other nodes, so a likelihood can depend on whatever the update
callback last computed.

Parameterisations follow the BUGS conventions: [`Distribution::normal`] takes a
mean and a *precision* `tau = 1 / sigma^2`, [`Distribution::gamma`] a shape and
a rate.

# Examples

```rust
use bugs_mcmc::distributions::Distribution;
use bugs_mcmc::model::Nodes;
use ndarray::arr1;

let nodes = Nodes::new();
let standard = Distribution::normal(0.0, 1.0);
let lp = standard.log_likelihood(arr1(&[0.0]).view(), &nodes);
assert!((lp + 0.5 * (2.0 * std::f64::consts::PI).ln()).abs() < 1e-12);
```
*/

use std::f64::consts::PI;
use std::fmt;

use ndarray::{Array1, ArrayView1};

use crate::model::Nodes;
use crate::node::{NodeId, NodeRef, NodeSpec};

/// A hyperparameter of a distribution.
///
/// A length-one parameter applies to every component of the node; a longer one
/// is read element-wise and must match the node's length.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Const(f64),
    Data(Array1<f64>),
    Node(NodeId),
}

impl Param {
    /// Value of the parameter for component `i`.
    ///
    /// A node missing from `nodes` reads as NaN, which the sampler rejects.
    pub fn at(&self, nodes: &Nodes<'_>, i: usize) -> f64 {
        match self {
            Param::Const(c) => *c,
            Param::Data(values) => broadcast(values.view(), i),
            Param::Node(id) => nodes
                .get(*id)
                .map_or(f64::NAN, |node| broadcast(node.value(), i)),
        }
    }

    /// Number of elements, or `None` for a node the arena does not hold.
    pub(crate) fn len(&self, nodes: &Nodes<'_>) -> Option<usize> {
        match self {
            Param::Const(_) => Some(1),
            Param::Data(values) => Some(values.len()),
            Param::Node(id) => nodes.get(*id).map(|node| node.len()),
        }
    }
}

fn broadcast(values: ArrayView1<'_, f64>, i: usize) -> f64 {
    if values.len() == 1 {
        values[0]
    } else {
        values[i]
    }
}

impl From<f64> for Param {
    fn from(value: f64) -> Self {
        Param::Const(value)
    }
}

impl From<Array1<f64>> for Param {
    fn from(values: Array1<f64>) -> Self {
        Param::Data(values)
    }
}

impl From<Vec<f64>> for Param {
    fn from(values: Vec<f64>) -> Self {
        Param::Data(Array1::from(values))
    }
}

impl From<NodeId> for Param {
    fn from(id: NodeId) -> Self {
        Param::Node(id)
    }
}

impl<K> From<NodeRef<K>> for Param {
    fn from(node: NodeRef<K>) -> Self {
        Param::Node(node.id())
    }
}

/// Signature of a user-supplied log-likelihood.
pub type LogLikelihoodFn = Box<dyn Fn(ArrayView1<'_, f64>, &Nodes<'_>) -> f64>;

/// The log-likelihood attached to a stochastic node.
pub enum Distribution {
    Normal { mu: Param, tau: Param },
    Uniform { lower: Param, upper: Param },
    Gamma { alpha: Param, beta: Param },
    Binomial { n: Param, p: Param },
    Custom(LogLikelihoodFn),
}

impl Distribution {
    /// Normal with mean `mu` and precision `tau`.
    pub fn normal(mu: impl Into<Param>, tau: impl Into<Param>) -> Self {
        Distribution::Normal {
            mu: mu.into(),
            tau: tau.into(),
        }
    }

    pub fn uniform(lower: impl Into<Param>, upper: impl Into<Param>) -> Self {
        Distribution::Uniform {
            lower: lower.into(),
            upper: upper.into(),
        }
    }

    /// Gamma with shape `alpha` and rate `beta`.
    pub fn gamma(alpha: impl Into<Param>, beta: impl Into<Param>) -> Self {
        Distribution::Gamma {
            alpha: alpha.into(),
            beta: beta.into(),
        }
    }

    /// Binomial with `n` trials and success probability `p`.
    pub fn binomial(n: impl Into<Param>, p: impl Into<Param>) -> Self {
        Distribution::Binomial {
            n: n.into(),
            p: p.into(),
        }
    }

    /// An opaque log-likelihood over the node's value and the rest of the model.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(ArrayView1<'_, f64>, &Nodes<'_>) -> f64 + 'static,
    {
        Distribution::Custom(Box::new(f))
    }

    /// Registers the node as observed data rather than a latent parameter.
    pub fn observed(self) -> NodeSpec {
        NodeSpec::Stochastic {
            distribution: self,
            observed: true,
        }
    }

    pub fn params(&self) -> Vec<&Param> {
        match self {
            Distribution::Normal { mu, tau } => vec![mu, tau],
            Distribution::Uniform { lower, upper } => vec![lower, upper],
            Distribution::Gamma { alpha, beta } => vec![alpha, beta],
            Distribution::Binomial { n, p } => vec![n, p],
            Distribution::Custom(_) => Vec::new(),
        }
    }

    /// Log-density of `value`, summed over its components.
    ///
    /// Values outside the support yield `-inf`; nothing here fails.
    pub fn log_likelihood(&self, value: ArrayView1<'_, f64>, nodes: &Nodes<'_>) -> f64 {
        let sum_with = |kernel: fn(f64, f64, f64) -> f64, a: &Param, b: &Param| -> f64 {
            value
                .iter()
                .enumerate()
                .map(|(i, &x)| kernel(x, a.at(nodes, i), b.at(nodes, i)))
                .sum()
        };
        match self {
            Distribution::Normal { mu, tau } => sum_with(normal_logp, mu, tau),
            Distribution::Uniform { lower, upper } => sum_with(uniform_logp, lower, upper),
            Distribution::Gamma { alpha, beta } => sum_with(gamma_logp, alpha, beta),
            Distribution::Binomial { n, p } => sum_with(binomial_logp, n, p),
            Distribution::Custom(f) => f(value, nodes),
        }
    }
}

impl fmt::Debug for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distribution::Normal { mu, tau } => f
                .debug_struct("Normal")
                .field("mu", mu)
                .field("tau", tau)
                .finish(),
            Distribution::Uniform { lower, upper } => f
                .debug_struct("Uniform")
                .field("lower", lower)
                .field("upper", upper)
                .finish(),
            Distribution::Gamma { alpha, beta } => f
                .debug_struct("Gamma")
                .field("alpha", alpha)
                .field("beta", beta)
                .finish(),
            Distribution::Binomial { n, p } => f
                .debug_struct("Binomial")
                .field("n", n)
                .field("p", p)
                .finish(),
            Distribution::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

pub fn normal_logp(x: f64, mu: f64, tau: f64) -> f64 {
    if !(tau > 0.0) {
        return f64::NEG_INFINITY;
    }
    0.5 * (0.5 * tau / PI).ln() - 0.5 * tau * (x - mu).powi(2)
}

pub fn uniform_logp(x: f64, lower: f64, upper: f64) -> f64 {
    if lower < upper && (lower..=upper).contains(&x) {
        -(upper - lower).ln()
    } else {
        f64::NEG_INFINITY
    }
}

pub fn gamma_logp(x: f64, alpha: f64, beta: f64) -> f64 {
    // support is the open half-line; x = 0 would be +inf for alpha < 1
    if !(alpha > 0.0 && beta > 0.0) || x <= 0.0 {
        return f64::NEG_INFINITY;
    }
    alpha * beta.ln() - ln_gamma(alpha) + (alpha - 1.0) * x.ln() - beta * x
}

pub fn binomial_logp(x: f64, n: f64, p: f64) -> f64 {
    let integral = x.fract() == 0.0 && n.fract() == 0.0;
    if !integral || x < 0.0 || x > n || !(0.0..=1.0).contains(&p) {
        return f64::NEG_INFINITY;
    }
    let ln_choose = ln_gamma(n + 1.0) - ln_gamma(x + 1.0) - ln_gamma(n - x + 1.0);
    ln_choose + xlogy(x, p) + xlogy(n - x, 1.0 - p)
}

/// `x * ln(y)`, taken as zero when `x` is zero.
fn xlogy(x: f64, y: f64) -> f64 {
    if x == 0.0 {
        0.0
    } else {
        x * y.ln()
    }
}

/// Log-gamma via the Lanczos approximation (g = 7, nine coefficients).
#[allow(clippy::excessive_precision)]
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_13,
        -176.615_029_162_140_59,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_571_6e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        // reflection
        PI.ln() - (PI * x).sin().abs().ln() - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut ag = COEFFS[0];
        for (i, &c) in COEFFS[1..].iter().enumerate() {
            ag += c / (x + i as f64 + 1.0);
        }
        let t = x + 7.5;
        0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + ag.ln()
    }
}
