//! Rauch-Tung-Striebel style backward pass over stored ensemble snapshots.

use nd::{Array, Axis, Ix3};

use na_core::linalg::pseudo_inverse;
use na_core::{Error, Result};

use crate::history::History;

/// Default cut-off for the generalized inverse of the prior anomalies.
pub const DEFAULT_RCOND: f64 = 1e-14;

/// Smooths a `T x dim_x x N` filter history, last step first.
///
/// The last step is the filter posterior unchanged; every earlier step is
/// `X_i + J_i (S_{i+1} - X^f_{i+1})` with `J_i = A_i pinv(A^f_{i+1})`. Prior
/// anomalies are rank deficient by construction (rank <= N - 1), hence the
/// generalized inverse.
pub fn smooth(history: &History, rcond: f64) -> Result<Array<f64, Ix3>> {
  if !history.is_consistent() {
    return Err(Error::MissingState(format!("incomplete filter history: priors {:?}, \
                                            posteriors {:?}",
                                           history.priors.dim(),
                                           history.posteriors.dim())));
  }

  let steps = history.steps();
  let mut smoothed = history.posteriors.clone();
  if steps == 0 {
    return Ok(smoothed);
  }

  let mut s = history.posteriors.index_axis(Axis(0), steps - 1).to_owned();
  for i in (0..steps - 1).rev() {
    let pinv = pseudo_inverse(&history.prior_anomalies.index_axis(Axis(0), i + 1), rcond)
      .map_err(|e| e.at_step(i))?;
    let j = history.posterior_anomalies.index_axis(Axis(0), i).dot(&pinv);

    let correction = j.dot(&(&s - &history.priors.index_axis(Axis(0), i + 1)));
    s = &history.posteriors.index_axis(Axis(0), i) + &correction;

    if s.iter().any(|v| !v.is_finite() ) {
      return Err(Error::NumericalInstability {
        step: i,
        reason: "smoothed ensemble contains non-finite values".into(),
      });
    }
    trace!("smoothed step {}", i);

    smoothed.index_axis_mut(Axis(0), i).assign(&s);
  }

  Ok(smoothed)
}

#[test]
fn single_step_is_posterior() {
  let mut h = History::new(1, 2, 3);
  h.posteriors.fill(1.5);
  let s = smooth(&h, DEFAULT_RCOND).unwrap();
  assert_eq!(s, h.posteriors);
}

#[test]
fn empty_history() {
  let h = History::new(0, 2, 3);
  let s = smooth(&h, DEFAULT_RCOND).unwrap();
  assert_eq!(s.dim(), (0, 2, 3));
}

#[test]
fn inconsistent_history_is_missing_state() {
  let mut h = History::new(3, 1, 4);
  h.priors = Array::zeros((2, 1, 4));
  match smooth(&h, DEFAULT_RCOND) {
    Err(Error::MissingState(_)) => {},
    other => panic!("expected missing state, got {:?}", other),
  }
}

#[test]
fn identity_dynamics_pull_back_the_correction() {
  use approx::assert_abs_diff_eq;
  use nd::arr2;

  // two steps, one state, two members: the step-0 posterior and step-1 prior
  // share anomalies, so J = 1 and smoothed step 0 is X_0 + (S_1 - X^f_1).
  let mut h = History::new(2, 1, 2);
  let x0 = arr2(&[[-1.0, 1.0]]);
  let prior1 = arr2(&[[0.0, 2.0]]);
  let post1 = arr2(&[[0.5, 1.5]]);
  h.record(0, x0.view(), x0.view(), x0.view(), x0.view());
  h.record(1, prior1.view(), x0.view(), post1.view(), arr2(&[[-0.5, 0.5]]).view());

  let s = smooth(&h, DEFAULT_RCOND).unwrap();
  assert_eq!(s.index_axis(Axis(0), 1), post1);
  assert_abs_diff_eq!(s[[0, 0, 0]], -0.5, epsilon = 1e-12);
  assert_abs_diff_eq!(s[[0, 0, 1]], 0.5, epsilon = 1e-12);
}
