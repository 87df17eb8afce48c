
use nd::{Array, ArrayBase, ArrayView, Axis, Data, Ix2, Ix3};

use crate::ensemble;

/// Per-step snapshots kept by a forward pass when storage is requested.
///
/// Every array is `T x dim_x x N`. The smoother reads these and nothing else.
#[derive(Clone, Debug)]
pub struct History {
  /// Ensembles after predict, before the update.
  pub priors: Array<f64, Ix3>,
  /// Ensembles after the update.
  pub posteriors: Array<f64, Ix3>,
  pub prior_anomalies: Array<f64, Ix3>,
  pub posterior_anomalies: Array<f64, Ix3>,
}
impl History {
  pub fn new(steps: usize, dim: usize, ensemble_count: usize) -> History {
    let shape = (steps, dim, ensemble_count);
    History {
      priors: Array::zeros(shape),
      posteriors: Array::zeros(shape),
      prior_anomalies: Array::zeros(shape),
      posterior_anomalies: Array::zeros(shape),
    }
  }

  pub fn steps(&self) -> usize { self.posteriors.dim().0 }

  /// All four buffers cover the same horizon and ensemble shape.
  pub fn is_consistent(&self) -> bool {
    let dim = self.posteriors.dim();
    self.priors.dim() == dim &&
      self.prior_anomalies.dim() == dim &&
      self.posterior_anomalies.dim() == dim
  }

  pub fn record(&mut self, step: usize,
                prior: ArrayView<f64, Ix2>,
                prior_anomaly: ArrayView<f64, Ix2>,
                posterior: ArrayView<f64, Ix2>,
                posterior_anomaly: ArrayView<f64, Ix2>) {
    self.priors.index_axis_mut(Axis(0), step).assign(&prior);
    self.prior_anomalies.index_axis_mut(Axis(0), step).assign(&prior_anomaly);
    self.posteriors.index_axis_mut(Axis(0), step).assign(&posterior);
    self.posterior_anomalies.index_axis_mut(Axis(0), step).assign(&posterior_anomaly);
  }
}

/// `T x dim x N` to `N x T x dim`: the ensemble-member axis goes outermost.
pub fn roll<S>(trajectory: &ArrayBase<S, Ix3>) -> Array<f64, Ix3>
  where S: Data<Elem = f64>,
{
  trajectory.view()
    .permuted_axes([2, 0, 1])
    .as_standard_layout()
    .into_owned()
}

/// Ensemble means and covariances over a whole trajectory.
#[derive(Clone, Debug)]
pub struct StateSteps {
  /// `T x dim`
  pub means: Array<f64, Ix2>,
  /// `T x dim x dim`
  pub covariances: Array<f64, Ix3>,
}
impl StateSteps {
  pub fn new(steps: usize, dim: usize) -> StateSteps {
    StateSteps {
      means: Array::zeros((steps, dim)),
      covariances: Array::zeros((steps, dim, dim)),
    }
  }

  /// Summarises a `T x dim x N` trajectory.
  pub fn from_trajectory<S>(trajectory: &ArrayBase<S, Ix3>) -> StateSteps
    where S: Data<Elem = f64>,
  {
    let (steps, dim, _) = trajectory.dim();
    let mut states = StateSteps::new(steps, dim);
    for (step, ensemble) in trajectory.axis_iter(Axis(0)).enumerate() {
      states.store_state(step, &ensemble);
    }
    states
  }

  pub fn store_state<S>(&mut self, step: usize, ensemble: &ArrayBase<S, Ix2>)
    where S: Data<Elem = f64>,
  {
    self.means
      .index_axis_mut(Axis(0), step)
      .assign(&ensemble::mean(ensemble));
    self.covariances
      .index_axis_mut(Axis(0), step)
      .assign(&ensemble::covariance(ensemble));
  }

  /// Per-step variances (the covariance diagonals), `T x dim`.
  pub fn variances(&self) -> Array<f64, Ix2> {
    let (steps, dim) = self.means.dim();
    Array::from_shape_fn((steps, dim), |(t, i)| self.covariances[[t, i, i]] )
  }
}

#[test]
fn roll_moves_members_outermost() {
  let t = Array::from_shape_fn((4, 2, 3), |(t, d, n)| (100 * t + 10 * d + n) as f64 );
  let r = roll(&t);
  assert_eq!(r.dim(), (3, 4, 2));
  for n in 0..3 {
    for s in 0..4 {
      for d in 0..2 {
        assert_eq!(r[[n, s, d]], t[[s, d, n]]);
      }
    }
  }
}

#[test]
fn history_records_snapshots() {
  use nd::arr2;

  let mut h = History::new(2, 1, 2);
  assert!(h.is_consistent());
  let a = arr2(&[[1.0, 3.0]]);
  let b = arr2(&[[-1.0, 1.0]]);
  h.record(1, a.view(), b.view(), b.view(), a.view());
  assert_eq!(h.priors.index_axis(Axis(0), 1), a);
  assert_eq!(h.posteriors.index_axis(Axis(0), 1), b);
  assert_eq!(h.priors.index_axis(Axis(0), 0), arr2(&[[0.0, 0.0]]));
  assert_eq!(h.steps(), 2);
}

#[test]
fn state_steps_summary() {
  use approx::assert_abs_diff_eq;

  let mut t: Array<f64, Ix3> = Array::zeros((2, 1, 3));
  t[[0, 0, 0]] = 1.0;
  t[[0, 0, 1]] = 2.0;
  t[[0, 0, 2]] = 3.0;
  t[[1, 0, 0]] = 5.0;
  t[[1, 0, 1]] = 5.0;
  t[[1, 0, 2]] = 5.0;

  let s = StateSteps::from_trajectory(&t);
  assert_abs_diff_eq!(s.means[[0, 0]], 2.0);
  assert_abs_diff_eq!(s.means[[1, 0]], 5.0);
  assert_abs_diff_eq!(s.variances()[[0, 0]], 1.0);
  assert_abs_diff_eq!(s.variances()[[1, 0]], 0.0);
}
