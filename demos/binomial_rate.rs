use bugs_mcmc::distributions::Distribution;
use bugs_mcmc::model::{Model, Nodes};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Successes out of 20 trials in five groups sharing one rate.
    let mut successes = vec![4.0, 7.0, 5.0, 6.0, 3.0];
    let mut p = 0.5_f64;

    {
        let (p_ref, successes_ref) = (&mut p, &mut successes);
        let mut model = Model::build(move |nodes| {
            let p = nodes.register("p", p_ref, Distribution::uniform(0.0, 1.0))?;
            nodes.register(
                "successes",
                successes_ref,
                Distribution::binomial(20.0, p).observed(),
            )?;
            Ok(|_: &mut Nodes<'_>| {})
        })?
        .set_seed(7);

        model.sample(20_000, 2_000, 2_000, 4)?;
        model.print();
    }

    // The borrowed binding holds the chain's last state once the model is gone.
    println!("final p: {p:.4}");
    Ok(())
}
