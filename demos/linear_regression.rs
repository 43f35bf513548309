use bugs_mcmc::config::SampleConfig;
use bugs_mcmc::distributions::Distribution;
use bugs_mcmc::model::{Model, Nodes};
use bugs_mcmc::node::{Deterministic, Scalar};
use rand::{Rng, SeedableRng};
use rand_distr::Normal;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // y = 1.5 - 0.8 x + noise, sigma = 0.4
    let mut rng = rand::rngs::SmallRng::seed_from_u64(1);
    let noise = Normal::new(0.0, 0.4)?;
    let x: Vec<f64> = (0..50).map(|i| i as f64 / 5.0).collect();
    let y: Vec<f64> = x.iter().map(|xi| 1.5 - 0.8 * xi + rng.sample(noise)).collect();

    let mut model = Model::build(move |nodes| {
        let b0 = nodes.register("b0", 0.0, Distribution::normal(0.0, 1e-4))?;
        let b1 = nodes.register("b1", 0.0, Distribution::normal(0.0, 1e-4))?;
        let tau = nodes.register("tau", 1.0, Distribution::gamma(0.1, 0.1))?;
        let y_hat = nodes.register("y_hat", vec![0.0; x.len()], Deterministic)?;
        nodes.register("y", y, Distribution::normal(y_hat, tau).observed())?;

        // y_hat = b0 + b1 * x
        Ok(move |nodes: &mut Nodes<'_>| {
            let (a, b) = (nodes.scalar(b0), nodes.scalar(b1));
            for (fit, xi) in nodes.vector_mut(y_hat).iter_mut().zip(&x) {
                *fit = a + b * xi;
            }
        })
    })?
    .set_seed(42);

    let config = SampleConfig::new(50_000)
        .burn(10_000)
        .adapt(10_000)
        .thin(10)
        .progress(true);
    model.sample_with(&config)?;

    for name in ["b0", "b1", "tau"] {
        let node = model.get_node::<Scalar>(name)?;
        let samples = model.nodes().samples(node);
        println!(
            "{name}: mean {:.4}, sd {:.4}",
            samples.mean().unwrap_or(f64::NAN),
            samples.std(1.0)
        );
    }
    println!("acceptance ratio: {:.3}", model.acceptance_ratio().unwrap_or(0.0));
    Ok(())
}
