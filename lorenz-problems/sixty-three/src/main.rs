#[macro_use]
extern crate log;
extern crate ndarray as nd;
extern crate na_tenkf;
extern crate sixty_three;
extern crate tracing_subscriber;

use nd::{arr1, arr2, Array, Axis, Ix2};
use tracing_subscriber::EnvFilter;

use na_tenkf::history::StateSteps;
use na_tenkf::{Error, FilterOptions, Linear, Setup, TEnKF, DEFAULT_RCOND};

use sixty_three::{generate_truth_and_observations, rmse, L63Model};

const STEPS: usize = 500;
const RNG_SEED: u64 = 1;
const ENSEMBLE_COUNT: usize = 300;
const PROCESS_STD: f64 = 0.05;
const OBSERVATION_STD: f64 = 1.0;

fn main() -> na_tenkf::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env()
                       .unwrap_or_else(|_| EnvFilter::new("info")))
    .with_target(false)
    .init();

  let model = L63Model::default();
  let h = Linear::new(arr2(&[
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
  ]));

  let start = arr1(&[1.0, 1.0, 1.0]);
  let data = generate_truth_and_observations(&model, &h, start.view(),
                                             STEPS, PROCESS_STD, OBSERVATION_STD,
                                             RNG_SEED)?;

  let setup = Setup {
    ensemble_count: ENSEMBLE_COUNT,
    dim_x: 3,
    dim_z: 2,
    rule: None,
    seed: Some(RNG_SEED + 1),
  };
  let mut filter = TEnKF::new(setup, model, h)?;
  filter.q = Array::eye(3) * PROCESS_STD.powi(2);
  filter.r = Array::eye(2) * OBSERVATION_STD.powi(2);
  filter.p = Array::eye(3) * 10.0;
  filter.x = start;

  info!("Starting filter: {} steps, {} members, sampler {}",
        STEPS, ENSEMBLE_COUNT, filter.sampler_name());
  let out = filter.batch_filter(data.observations.view(), FilterOptions {
    store: true,
    calc_ll: true,
    ..Default::default()
  })?;

  let filtered = filter.history()
    .map(|history| StateSteps::from_trajectory(&history.posteriors) )
    .ok_or_else(|| Error::MissingState("stored run left no history".into()) )?;
  filter.rts_smoother(DEFAULT_RCOND)?;
  let smoothed = filter.smoothed()
    .map(StateSteps::from_trajectory)
    .ok_or_else(|| Error::MissingState("smoother left no result".into()) )?;

  let observed: Array<f64, Ix2> = data.truth.select(Axis(1), &[0, 1]);
  info!("log-likelihood:  {:.4}", out.log_likelihood.unwrap_or(::std::f64::NAN));
  info!("observation RMSE (x, y): {:.4}",
        rmse(data.observations.view(), observed.view()));
  info!("filter RMSE:     {:.4}", rmse(filtered.means.view(), data.truth.view()));
  info!("smoother RMSE:   {:.4}", rmse(smoothed.means.view(), data.truth.view()));

  let spread = |s: &StateSteps| s.variances().mean().unwrap_or(0.0).sqrt();
  info!("mean spread: filter {:.4}, smoother {:.4}", spread(&filtered), spread(&smoothed));

  Ok(())
}
