//! Properties every chain must satisfy regardless of the model: acceptance
//! bookkeeping, rejection under a forced random source, configuration errors,
//! and value bindings that outlive the model.

use bugs_mcmc::core::RandomSource;
use bugs_mcmc::distributions::Distribution;
use bugs_mcmc::error::ModelError;
use bugs_mcmc::model::{Model, Nodes};
use bugs_mcmc::node::{Deterministic, Scalar, Vector};

/// Uniform draws pinned to 1.0, so `ln(u) = 0` rejects any move that lowers
/// the log-probability. Normal draws cycle through non-zero offsets.
struct AlwaysOne {
    next: usize,
}

impl RandomSource for AlwaysOne {
    fn uniform(&mut self) -> f64 {
        1.0
    }

    fn normal(&mut self) -> f64 {
        const OFFSETS: [f64; 4] = [0.7, -1.3, 0.2, -0.4];
        self.next += 1;
        OFFSETS[self.next % OFFSETS.len()]
    }
}

/// Regression-style model with a deterministic node, sampled from `seed`.
fn seeded_traces(seed: u64) -> (ndarray::Array2<f64>, ndarray::Array1<f64>) {
    let mut model = Model::build(|nodes| {
        let beta = nodes.register("beta", vec![0.0, 0.0], Distribution::normal(0.0, 0.01))?;
        let tau = nodes.register("tau", 1.0_f64, Distribution::gamma(1.0, 1.0))?;
        let fit = nodes.register("fit", vec![0.0; 4], Deterministic)?;
        nodes.register(
            "y",
            vec![1.1, 2.9, 5.2, 6.8],
            Distribution::normal(fit, tau).observed(),
        )?;
        Ok(move |nodes: &mut Nodes<'_>| {
            let b = nodes.vector(beta).to_owned();
            for (i, v) in nodes.vector_mut(fit).iter_mut().enumerate() {
                *v = b[0] + b[1] * i as f64;
            }
        })
    })
    .unwrap()
    .set_seed(seed);
    model.sample(600, 200, 200, 3).unwrap();

    let beta = model.get_node::<Vector>("beta").unwrap();
    let tau = model.get_node::<Scalar>("tau").unwrap();
    (model.nodes().trace(beta), model.nodes().samples(tau))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forced_rejection_keeps_initial_value() {
        // Starting at the mode, every proposal lowers logp and is rejected.
        let mut model = Model::with_rng(AlwaysOne { next: 0 }, |_: &mut Nodes<'_>| {});
        let x = model
            .register("x", vec![1.0, -2.0], Distribution::normal(vec![1.0, -2.0], 4.0))
            .unwrap();
        let s = model
            .register("s", 0.5_f64, Distribution::normal(0.5, 1.0))
            .unwrap();
        model.sample(300, 100, 50, 3).unwrap();

        let stats = model.stats();
        assert_eq!(stats.accepted, 0);
        assert_eq!(stats.rejected, 400);
        assert_eq!(model.acceptance_ratio(), Some(0.0));

        let trace = model.nodes().trace(x);
        assert_eq!(trace.nrows(), 100);
        for row in trace.rows() {
            assert_eq!(row, ndarray::arr1(&[1.0, -2.0]));
        }
        assert!(model.nodes().samples(s).iter().all(|&v| v == 0.5));

        // tuning saw only rejections as well
        let proposal = model.nodes()[x.id()].proposal().unwrap();
        assert!(proposal.scale().iter().all(|&sc| sc < bugs_mcmc::node::INITIAL_SCALE));
    }

    #[test]
    fn test_acceptance_ratio_counts_run_sweeps_only() {
        let mut model = Model::new(|_: &mut Nodes<'_>| {}).set_seed(31);
        model
            .register("x", vec![0.0; 4], Distribution::normal(0.0, 1.0))
            .unwrap();
        assert_eq!(model.acceptance_ratio(), None);

        model.sample(1_000, 250, 500, 5).unwrap();
        let stats = model.stats();
        assert_eq!(stats.sweeps(), 1_250);
        let ratio = model.acceptance_ratio().unwrap();
        assert!((0.0..=1.0).contains(&ratio));
        assert!(ratio > 0.0 && ratio < 1.0, "ratio {ratio}");
    }

    #[test]
    fn test_invalid_thinning_aborts_before_sampling() {
        let mut model = Model::new(|_: &mut Nodes<'_>| {}).set_seed(4);
        let x = model
            .register("x", 0.0_f64, Distribution::normal(0.0, 1.0))
            .unwrap();

        let err = model.sample(1_000, 100, 100, 3).unwrap_err();
        assert!(matches!(err, ModelError::InvalidConfig(_)));
        assert!(model.nodes().samples(x).is_empty());
        assert_eq!(model.stats().sweeps(), 0);
        assert!(model.jumping_stochastics().is_empty());
    }

    #[test]
    fn test_nan_likelihood_never_accepted() {
        let mut model = Model::new(|_: &mut Nodes<'_>| {}).set_seed(8);
        let x = model
            .register(
                "x",
                1.0_f64,
                Distribution::custom(|v, _| if v[0] == 1.0 { 0.0 } else { f64::NAN }),
            )
            .unwrap();
        model.sample(200, 0, 20, 1).unwrap();
        assert_eq!(model.stats().accepted, 0);
        assert!(model.nodes().samples(x).iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_get_node_returns_the_bound_storage() {
        let mut data = vec![0.1_f64, 0.2, 0.3];
        let mut scale = 2.0_f64;
        let data_ptr = data.as_ptr();
        let scale_ptr: *const f64 = &scale;

        let mut model = Model::new(|_: &mut Nodes<'_>| {});
        let registered = model
            .register("y", &mut data, Distribution::normal(0.0, 1.0).observed())
            .unwrap();
        model.register("scale", &mut scale, Deterministic).unwrap();

        let found = model.get_node::<Vector>("y").unwrap();
        assert_eq!(found, registered);
        assert_eq!(model.nodes().storage_ptr(found), data_ptr);
        let found = model.get_node::<Scalar>("scale").unwrap();
        assert_eq!(model.nodes().storage_ptr(found), scale_ptr);
        assert!(!model.nodes()[found.id()].storage().is_owned());
    }

    #[test]
    fn test_lookup_failures() {
        let mut model = Model::new(|_: &mut Nodes<'_>| {});
        model.register("v", vec![1.0, 2.0], Deterministic).unwrap();
        assert!(matches!(
            model.get_node::<Vector>("w"),
            Err(ModelError::NotFound { .. })
        ));
        assert!(matches!(
            model.get_node::<Scalar>("v"),
            Err(ModelError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_borrowed_values_hold_final_state_after_drop() {
        let mut mu = 0.0_f64;
        let mut copy = 0.0_f64;
        {
            let (mu_ref, copy_ref) = (&mut mu, &mut copy);
            let mut model = Model::build(move |nodes| {
                let m = nodes.register("mu", mu_ref, Distribution::normal(5.0, 25.0))?;
                let c = nodes.register("copy", copy_ref, Deterministic)?;
                Ok(move |nodes: &mut Nodes<'_>| {
                    let v = nodes.scalar(m);
                    nodes.set_scalar(c, v);
                })
            })
            .unwrap()
            .set_seed(12);
            model.sample(2_000, 500, 500, 1).unwrap();
        }
        assert_ne!(mu, 0.0);
        assert_eq!(mu, copy);
        assert!((mu - 5.0).abs() < 1.5, "final value {mu}");
    }

    #[test]
    fn test_same_seed_reproduces_traces() {
        let (beta_a, tau_a) = seeded_traces(2718);
        let (beta_b, tau_b) = seeded_traces(2718);
        assert_eq!(beta_a.nrows(), 200);
        assert_eq!(beta_a, beta_b);
        assert_eq!(tau_a, tau_b);

        let (beta_c, _) = seeded_traces(2719);
        assert_ne!(beta_a, beta_c);
    }

    #[test]
    fn test_gamma_node_started_at_zero_moves_off_boundary() {
        let mut model = Model::new(|_: &mut Nodes<'_>| {}).set_seed(3);
        let tau = model
            .register("tau", 0.0_f64, Distribution::gamma(0.5, 1.0))
            .unwrap();
        model.sample(2_000, 500, 500, 1).unwrap();

        assert!(model.stats().accepted > 0);
        assert!(model.logp().is_finite());
        let samples = model.nodes().samples(tau);
        assert_eq!(samples.len(), 2_000);
        assert!(samples.iter().all(|&v| v > 0.0));
    }
}
