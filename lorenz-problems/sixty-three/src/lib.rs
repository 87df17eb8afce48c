//! Lorenz-63 twin experiment: a noisy truth run, partial observations of it,
//! and the error of an estimate against the truth.

extern crate ndarray as nd;
extern crate na_tenkf;
extern crate rand;
extern crate rand_distr;
extern crate rand_isaac;

use nd::prelude::*;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rand_isaac::Isaac64Rng;

use na_tenkf::{Error, Observation, Result, Transition};

/// One RK4 step of length `dt` of the Lorenz-63 flow, plus additive noise.
#[derive(Debug, Clone)]
pub struct L63Model {
  pub rho: f64,
  pub sigma: f64,
  pub beta: f64,
  pub dt: f64,
}
impl L63Model {
  pub fn derivative(&self, y: ArrayView1<f64>) -> Array1<f64> {
    debug_assert!(y.len() == 3);
    arr1(&[
      self.sigma * (y[1] - y[0]),
      y[0] * (self.rho - y[2]) - y[1],
      y[0] * y[1] - self.beta * y[2],
    ])
  }

  pub fn step(&self, y: ArrayView1<f64>) -> Array1<f64> {
    let h = self.dt;
    let k1 = self.derivative(y);
    let k2 = self.derivative((&y + &(&k1 * (h / 2.0))).view());
    let k3 = self.derivative((&y + &(&k2 * (h / 2.0))).view());
    let k4 = self.derivative((&y + &(&k3 * h)).view());

    &y + &((k1 + &k2 * 2.0 + &k3 * 2.0 + k4) * (h / 6.0))
  }
}
impl Default for L63Model {
  fn default() -> Self {
    L63Model {
      rho: 28.0,
      sigma: 10.0,
      beta: 8.0 / 3.0,
      dt: 0.01,
    }
  }
}
impl Transition for L63Model {
  fn transition(&self, state: ArrayView1<f64>, noise: ArrayView1<f64>) -> Array1<f64> {
    let mut next = self.step(state);
    next += &noise;
    next
  }
}

/// A truth trajectory and the observations taken of it, one row per step.
#[derive(Debug, Clone)]
pub struct Data {
  /// `T x 3`
  pub truth: Array2<f64>,
  /// `T x dim_z`
  pub observations: Array2<f64>,
}

/// Runs `model` from `initial` for `steps` steps with process noise of
/// standard deviation `process_std` per component, observing every step
/// through `observation` with noise `observation_std`.
pub fn generate_truth_and_observations<H>(model: &L63Model,
                                          observation: &H,
                                          initial: ArrayView1<f64>,
                                          steps: usize,
                                          process_std: f64,
                                          observation_std: f64,
                                          seed: u64) -> Result<Data>
  where H: Observation,
{
  let process = Normal::new(0.0, process_std)
    .map_err(|e| Error::config(format!("process noise: {}", e)))?;
  let measurement = Normal::new(0.0, observation_std)
    .map_err(|e| Error::config(format!("observation noise: {}", e)))?;
  let mut rand = Isaac64Rng::seed_from_u64(seed);

  let dim = initial.len();
  let mut truth = Array::zeros((steps, dim));
  let mut state = initial.to_owned();
  for mut row in truth.outer_iter_mut() {
    let eps: Array1<f64> = Array::from_shape_fn(dim, |_| process.sample(&mut rand) );
    state = model.transition(state.view(), eps.view());
    row.assign(&state);
  }

  let mut observations = observation.observe(truth.t()).reversed_axes();
  observations.mapv_inplace(|v| v + measurement.sample(&mut rand) );

  Ok(Data {
    truth: truth,
    observations: observations,
  })
}

/// Root-mean-square error over all steps and components.
pub fn rmse(estimate: ArrayView2<f64>, truth: ArrayView2<f64>) -> f64 {
  debug_assert_eq!(estimate.dim(), truth.dim());
  if truth.is_empty() {
    return 0.0;
  }
  let sq: f64 = estimate.iter()
    .zip(truth.iter())
    .map(|(e, t)| (e - t).powi(2) )
    .sum();
  (sq / truth.len() as f64).sqrt()
}

#[test]
fn fixed_points_stay_put() {
  use approx::assert_abs_diff_eq;

  let m = L63Model::default();
  let c = (m.beta * (m.rho - 1.0)).sqrt();
  for p in &[arr1(&[0.0, 0.0, 0.0]), arr1(&[c, c, m.rho - 1.0]), arr1(&[-c, -c, m.rho - 1.0])] {
    let next = m.step(p.view());
    for (a, b) in next.iter().zip(p.iter()) {
      assert_abs_diff_eq!(a, b, epsilon = 1e-10);
    }
  }
}

#[test]
fn rk4_tracks_the_flow() {
  use approx::assert_abs_diff_eq;

  // halving dt twice should land close to one full step
  let m = L63Model::default();
  let half = L63Model { dt: m.dt / 2.0, ..m.clone() };
  let y = arr1(&[1.0, 1.0, 1.0]);
  let full = m.step(y.view());
  let two = half.step(half.step(y.view()).view());
  for (a, b) in full.iter().zip(two.iter()) {
    assert_abs_diff_eq!(a, b, epsilon = 1e-4);
  }
}

#[test]
fn data_shapes() {
  use na_tenkf::Linear;

  let h = Linear::new(arr2(&[
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
  ]));
  let init = arr1(&[1.0, 1.0, 1.0]);
  let data = generate_truth_and_observations(&L63Model::default(), &h, init.view(),
                                             25, 0.1, 0.5, 1).unwrap();
  assert_eq!(data.truth.dim(), (25, 3));
  assert_eq!(data.observations.dim(), (25, 2));

  let again = generate_truth_and_observations(&L63Model::default(), &h, init.view(),
                                              25, 0.1, 0.5, 1).unwrap();
  assert_eq!(data.observations, again.observations);

  assert!(generate_truth_and_observations(&L63Model::default(), &h, init.view(),
                                          25, -1.0, 0.5, 1).is_err());
}

#[test]
fn rmse_of_constant_offset() {
  use approx::assert_abs_diff_eq;

  let t = Array::<f64, Ix2>::zeros((4, 3));
  let e = Array::<f64, Ix2>::from_elem((4, 3), 2.0);
  assert_abs_diff_eq!(rmse(e.view(), t.view()), 2.0);
  assert_abs_diff_eq!(rmse(t.view(), t.view()), 0.0);
}
