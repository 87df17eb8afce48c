//! AR(1) with direct observations: `x' = 0.9 x + eps`, `z = x + mu`,
//! `Q = R = P0 = 1`. Closed-form Kalman/RTS quantities are the reference.

extern crate approx;
extern crate na_tenkf;
extern crate ndarray as nd;
extern crate rand;
extern crate rand_distr;
extern crate rand_isaac;

use approx::assert_abs_diff_eq;
use nd::{Array, ArrayView1, ArrayView2, Axis, Ix1, Ix2, Ix3};
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rand_isaac::Isaac64Rng;

use na_tenkf::history::StateSteps;
use na_tenkf::{Error, FilterOptions, Linear, Rule, Setup, TEnKF, DEFAULT_RCOND};

const A: f64 = 0.9;
const STEPS: usize = 20;

fn observations(seed: u64, steps: usize) -> Array<f64, Ix2> {
  let mut rand = Isaac64Rng::seed_from_u64(seed);
  let normal = Normal::new(0.0, 1.0).unwrap();

  let mut x = normal.sample(&mut rand);
  let mut z = Array::zeros((steps, 1));
  for t in 0..steps {
    x = A * x + normal.sample(&mut rand);
    z[[t, 0]] = x + normal.sample(&mut rand);
  }
  z
}

fn ar1(x: ArrayView1<f64>, eps: ArrayView1<f64>) -> Array<f64, Ix1> {
  &x * A + &eps
}
fn identity(x: ArrayView2<f64>) -> Array<f64, Ix2> {
  x.to_owned()
}
fn two_rows(x: ArrayView2<f64>) -> Array<f64, Ix2> {
  Array::zeros((2, x.ncols()))
}

type Ar1Filter = TEnKF<fn(ArrayView1<f64>, ArrayView1<f64>) -> Array<f64, Ix1>,
                       fn(ArrayView2<f64>) -> Array<f64, Ix2>>;

fn filter(n: usize, rule: Option<Rule>, seed: u64) -> Ar1Filter {
  let setup = Setup {
    ensemble_count: n,
    dim_x: 1,
    dim_z: 1,
    rule: rule,
    seed: Some(seed),
  };
  TEnKF::new(setup,
             ar1 as fn(ArrayView1<f64>, ArrayView1<f64>) -> Array<f64, Ix1>,
             identity as fn(ArrayView2<f64>) -> Array<f64, Ix2>)
    .expect("valid setup")
}

struct Kalman {
  prior_means: Vec<f64>,
  prior_vars: Vec<f64>,
  means: Vec<f64>,
  vars: Vec<f64>,
  smoothed_means: Vec<f64>,
  smoothed_vars: Vec<f64>,
  ll: f64,
}

fn kalman(z: &Array<f64, Ix2>) -> Kalman {
  let (q, r) = (1.0, 1.0);
  let (mut m, mut p) = (0.0, 1.0);
  let mut out = Kalman {
    prior_means: vec![],
    prior_vars: vec![],
    means: vec![],
    vars: vec![],
    smoothed_means: vec![],
    smoothed_vars: vec![],
    ll: 0.0,
  };

  for zt in z.column(0).iter() {
    let mp = A * m;
    let pp = A * A * p + q;
    let s = pp + r;
    let k = pp / s;
    out.ll += -0.5 * ((2.0 * ::std::f64::consts::PI).ln() + s.ln() + (zt - mp).powi(2) / s);
    m = mp + k * (zt - mp);
    p = (1.0 - k) * pp;

    out.prior_means.push(mp);
    out.prior_vars.push(pp);
    out.means.push(m);
    out.vars.push(p);
  }

  let t = out.means.len();
  out.smoothed_means = out.means.clone();
  out.smoothed_vars = out.vars.clone();
  for i in (0..t - 1).rev() {
    let j = out.vars[i] * A / out.prior_vars[i + 1];
    out.smoothed_means[i] = out.means[i]
      + j * (out.smoothed_means[i + 1] - out.prior_means[i + 1]);
    out.smoothed_vars[i] = out.vars[i]
      + j * j * (out.smoothed_vars[i + 1] - out.prior_vars[i + 1]);
  }

  out
}

/// `N x T x D` back to `T x D x N`.
fn unroll(rolled: &Array<f64, Ix3>) -> Array<f64, Ix3> {
  rolled.view().permuted_axes([1, 2, 0]).to_owned()
}

#[test]
fn output_shapes() {
  let z = observations(1, STEPS);
  let mut f = filter(30, None, 3);

  let out = f.batch_filter(z.view(), FilterOptions { store: true, ..Default::default() })
    .unwrap();
  let ensembles = out.ensembles.expect("ensembles");
  assert_eq!(ensembles.dim(), (30, STEPS, 1));
  assert!(out.log_likelihood.is_none());

  let history = f.history().expect("history");
  assert_eq!(history.posteriors.dim(), (STEPS, 1, 30));
  assert_eq!(history.priors.dim(), (STEPS, 1, 30));
  assert_eq!(history.prior_anomalies.dim(), (STEPS, 1, 30));
  assert_eq!(history.posterior_anomalies.dim(), (STEPS, 1, 30));

  let smoothed = f.rts_smoother(DEFAULT_RCOND).unwrap();
  assert_eq!(smoothed.dim(), ensembles.dim());
  assert_eq!(f.smoothed().unwrap().dim(), (STEPS, 1, 30));
}

#[test]
fn terminal_step_is_unchanged_by_smoothing() {
  let z = observations(2, STEPS);
  let mut f = filter(40, None, 5);
  let out = f.batch_filter(z.view(), FilterOptions { store: true, ..Default::default() })
    .unwrap();
  let filtered = out.ensembles.unwrap();
  let smoothed = f.rts_smoother(DEFAULT_RCOND).unwrap();

  assert_eq!(smoothed.index_axis(Axis(1), STEPS - 1),
             filtered.index_axis(Axis(1), STEPS - 1));
  // and earlier steps actually move
  assert!(smoothed.index_axis(Axis(1), 0) != filtered.index_axis(Axis(1), 0));
}

#[test]
fn seeded_runs_are_identical() {
  let z = observations(3, STEPS);
  for &rule in &[None, Some(Rule::Random), Some(Rule::Halton)] {
    let mut a = filter(64, rule, 42);
    let mut b = filter(64, rule, 42);
    let ra = a.batch_filter(z.view(), FilterOptions::default()).unwrap();
    let rb = b.batch_filter(z.view(), FilterOptions::default()).unwrap();
    assert_eq!(ra.ensembles, rb.ensembles);

    // a per-call seed overrides the constructor's
    let rc = a.batch_filter(z.view(), FilterOptions { seed: Some(7), ..Default::default() })
      .unwrap();
    assert!(rc.ensembles != ra.ensembles);
  }
}

#[test]
fn converges_to_kalman_filter() {
  let z = observations(4, STEPS);
  let exact = kalman(&z);

  let mut f = filter(5000, None, 11);
  let out = f.batch_filter(z.view(), FilterOptions::default()).unwrap();
  let trajectory = unroll(&out.ensembles.unwrap());
  let states = StateSteps::from_trajectory(&trajectory);

  for t in 0..STEPS {
    assert_abs_diff_eq!(states.means[[t, 0]], exact.means[t], epsilon = 0.05);
    assert_abs_diff_eq!(states.covariances[[t, 0, 0]], exact.vars[t], epsilon = 0.06);
  }
}

#[test]
fn converges_with_plain_monte_carlo() {
  let z = observations(5, STEPS);
  let exact = kalman(&z);

  let mut f = filter(5000, Some(Rule::Random), 12);
  assert_eq!(f.sampler_name(), "monte-carlo");
  let out = f.batch_filter(z.view(), FilterOptions::default()).unwrap();
  let states = StateSteps::from_trajectory(&unroll(&out.ensembles.unwrap()));

  for t in 0..STEPS {
    assert_abs_diff_eq!(states.means[[t, 0]], exact.means[t], epsilon = 0.1);
  }
}

#[test]
fn log_likelihood_matches_exact() {
  let z = observations(6, STEPS);
  let exact = kalman(&z);

  let mut f = filter(5000, None, 13);
  let out = f.batch_filter(z.view(), FilterOptions { calc_ll: true, ..Default::default() })
    .unwrap();
  assert!(out.ensembles.is_none());
  assert!(f.history().is_none());

  let ll = out.log_likelihood.expect("log-likelihood");
  assert_eq!(f.log_likelihood(), Some(ll));
  assert_abs_diff_eq!(ll, exact.ll, epsilon = 0.75);
}

#[test]
fn store_and_likelihood_together() {
  let z = observations(7, STEPS);
  let mut f = filter(100, None, 14);
  let out = f.batch_filter(z.view(), FilterOptions {
    store: true,
    calc_ll: true,
    ..Default::default()
  }).unwrap();

  assert!(out.log_likelihood.unwrap().is_finite());
  assert_eq!(out.ensembles.unwrap().dim(), (100, STEPS, 1));
  assert!(f.rts_smoother(DEFAULT_RCOND).is_ok());
}

#[test]
fn smoother_matches_rts_and_shrinks_spread() {
  let z = observations(8, STEPS);
  let exact = kalman(&z);

  let mut f = filter(5000, None, 15);
  let out = f.batch_filter(z.view(), FilterOptions { store: true, ..Default::default() })
    .unwrap();
  let filtered = StateSteps::from_trajectory(&unroll(&out.ensembles.unwrap()));
  f.rts_smoother(DEFAULT_RCOND).unwrap();
  let smoothed = StateSteps::from_trajectory(f.smoothed().unwrap());

  let fv = filtered.variances();
  let sv = smoothed.variances();
  for t in 0..STEPS - 1 {
    assert!(sv[[t, 0]] < fv[[t, 0]],
            "step {}: smoothed variance {} not below filtered {}", t, sv[[t, 0]], fv[[t, 0]]);
    assert_abs_diff_eq!(smoothed.means[[t, 0]], exact.smoothed_means[t], epsilon = 0.1);
    assert_abs_diff_eq!(sv[[t, 0]], exact.smoothed_vars[t], epsilon = 0.08);
  }
  assert_abs_diff_eq!(sv[[STEPS - 1, 0]], fv[[STEPS - 1, 0]], epsilon = 1e-12);
}

#[test]
fn two_members_are_enough() {
  let z = observations(9, STEPS);
  let mut f = filter(2, None, 16);
  let out = f.batch_filter(z.view(), FilterOptions {
    store: true,
    calc_ll: true,
    ..Default::default()
  }).unwrap();
  assert!(out.ensembles.unwrap().iter().all(|v| v.is_finite() ));
  assert!(out.log_likelihood.unwrap().is_finite());
  let smoothed = f.rts_smoother(DEFAULT_RCOND).unwrap();
  assert!(smoothed.iter().all(|v| v.is_finite() ));
}

#[test]
fn one_member_is_rejected() {
  let setup = Setup { ensemble_count: 1, ..Setup::default() };
  let r = TEnKF::new(setup, ar1, identity);
  match r {
    Err(Error::Configuration(_)) => {},
    Err(e) => panic!("wrong error {:?}", e),
    Ok(_) => panic!("N = 1 accepted"),
  }
}

#[test]
fn smoother_without_history() {
  let mut f = filter(10, None, 1);
  match f.rts_smoother(DEFAULT_RCOND) {
    Err(Error::MissingState(_)) => {},
    other => panic!("expected missing state, got {:?}", other.map(|a| a.dim())),
  }

  // a run without `store` leaves nothing to smooth either
  let z = observations(10, 5);
  f.batch_filter(z.view(), FilterOptions { store: true, ..Default::default() }).unwrap();
  f.batch_filter(z.view(), FilterOptions::default()).unwrap();
  assert!(f.history().is_none());
  assert!(f.rts_smoother(DEFAULT_RCOND).is_err());
}

#[test]
fn explicit_initial_ensemble() {
  let z = observations(11, 3);
  let mut f = filter(4, None, 17);

  let init = Array::from_shape_vec((1, 4), vec![-1.0, 0.0, 1.0, 2.0]).unwrap();
  let out = f.batch_filter(z.view(), FilterOptions {
    init_states: Some(init),
    store: true,
    ..Default::default()
  }).unwrap();
  assert_eq!(out.ensembles.unwrap().dim(), (4, 3, 1));

  let wrong = Array::zeros((1, 3));
  let r = f.batch_filter(z.view(), FilterOptions { init_states: Some(wrong), ..Default::default() });
  match r {
    Err(Error::Configuration(_)) => {},
    other => panic!("expected configuration error, got {:?}", other.map(|o| o.log_likelihood)),
  }
}

#[test]
fn mismatched_dimensions_fail_fast() {
  let mut f = filter(10, None, 1);

  let z = Array::zeros((5, 2));
  assert!(matches!(f.batch_filter(z.view(), FilterOptions::default()),
                   Err(Error::Configuration(_))));

  let z = observations(12, 5);
  f.q = Array::eye(2);
  assert!(matches!(f.batch_filter(z.view(), FilterOptions::default()),
                   Err(Error::Configuration(_))));
  f.q = Array::eye(1);
  f.r = Array::zeros((1, 2));
  assert!(matches!(f.batch_filter(z.view(), FilterOptions::default()),
                   Err(Error::Configuration(_))));
  f.r = Array::eye(1);
  f.x = Array::zeros(3);
  assert!(matches!(f.batch_filter(z.view(), FilterOptions::default()),
                   Err(Error::Configuration(_))));
  f.x = Array::zeros(1);

  let mut bad = z.clone();
  bad[[2, 0]] = ::std::f64::NAN;
  assert!(matches!(f.batch_filter(bad.view(), FilterOptions::default()),
                   Err(Error::Configuration(_))));
  assert!(f.batch_filter(z.view(), FilterOptions::default()).is_ok());

  // observation function returning the wrong number of rows
  let setup = Setup { ensemble_count: 3, seed: Some(1), ..Setup::default() };
  let mut g = TEnKF::new(setup, ar1, two_rows).unwrap();
  match g.batch_filter(z.view(), FilterOptions::default()) {
    Err(Error::Configuration(ref m)) if m.starts_with("step 0") => {},
    other => panic!("expected configuration error at step 0, got {:?}",
                    other.map(|o| o.log_likelihood)),
  }
}

#[test]
fn linear_operators_are_checked_up_front() {
  let setup = Setup { ensemble_count: 10, dim_x: 2, dim_z: 1, ..Setup::default() };
  let a = Array::eye(2);
  let h = Array::from_elem((1, 2), 1.0);
  assert!(TEnKF::new(setup, Linear::new(a.clone()), Linear::new(h.clone())).is_ok());

  let wrong_a = Array::eye(3);
  assert!(matches!(TEnKF::new(setup, Linear::new(wrong_a), Linear::new(h.clone())).err(),
                   Some(Error::Configuration(_))));
  let wrong_h = Array::eye(2);
  assert!(matches!(TEnKF::new(setup, Linear::new(a), Linear::new(wrong_h)).err(),
                   Some(Error::Configuration(_))));
}

#[test]
fn noiseless_update_hits_the_observation() {
  // R = 0 makes the gain 1, so every member lands on z
  let setup = Setup { ensemble_count: 3, seed: Some(2), ..Setup::default() };
  let mut f = TEnKF::new(setup, ar1, identity).unwrap();
  f.q = Array::zeros((1, 1));
  f.r = Array::zeros((1, 1));

  let z = Array::from_elem((1, 1), 2.0);
  let init = Array::from_shape_vec((1, 3), vec![0.0, 1.0, 5.0]).unwrap();
  let out = f.batch_filter(z.view(), FilterOptions {
    init_states: Some(init),
    ..Default::default()
  }).unwrap();
  for v in out.ensembles.unwrap().iter() {
    assert_abs_diff_eq!(*v, 2.0, epsilon = 1e-12);
  }
}

#[test]
fn empty_observation_sequence() {
  let z: Array<f64, Ix2> = Array::zeros((0, 1));
  let mut f = filter(10, None, 1);
  let out = f.batch_filter(z.view(), FilterOptions { store: true, ..Default::default() })
    .unwrap();
  assert_eq!(out.ensembles.unwrap().dim(), (10, 0, 1));
  assert_eq!(f.rts_smoother(DEFAULT_RCOND).unwrap().dim(), (10, 0, 1));

  let out = f.batch_filter(z.view(), FilterOptions { calc_ll: true, ..Default::default() })
    .unwrap();
  assert_eq!(out.log_likelihood, Some(0.0));
}

#[test]
fn linear_operator_collaborators() {
  let z = observations(13, STEPS);
  let setup = Setup {
    ensemble_count: 200,
    seed: Some(3),
    ..Setup::default()
  };
  let a = Array::from_elem((1, 1), A);
  let h = Array::eye(1);
  let mut f = TEnKF::new(setup, Linear::new(a), Linear::new(h)).unwrap();
  let out = f.batch_filter(z.view(), FilterOptions { calc_ll: true, ..Default::default() })
    .unwrap();
  assert!(out.log_likelihood.unwrap().is_finite());
}

#[test]
fn degenerate_innovation_covariance() {
  // no spread anywhere, so S = 0 at the first step
  let z = observations(14, 5);
  let mut f = filter(8, None, 18);
  f.q = Array::zeros((1, 1));
  f.r = Array::zeros((1, 1));
  f.p = Array::zeros((1, 1));
  let init = Array::from_shape_vec((1, 8), vec![1.0; 8]).unwrap();

  let r = f.batch_filter(z.view(), FilterOptions {
    init_states: Some(init),
    store: true,
    ..Default::default()
  });
  match r {
    Err(Error::NumericalInstability { step, .. }) => assert_eq!(step, 0),
    other => panic!("expected numerical instability, got {:?}",
                    other.map(|o| o.log_likelihood)),
  }
  assert!(f.history().is_none());
}
