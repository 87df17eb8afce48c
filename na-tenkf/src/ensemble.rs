//! Common stuffs for ensembles.
//!
//! An ensemble is a `dim x N` matrix, one member per column.

use nd::{Array, ArrayBase, ArrayView, Axis, Data, Ix1, Ix2};
use rayon::prelude::*;

use na_core::{Error, Result, Transition};

/// Column mean of the ensemble.
pub fn mean<S>(ensemble: &ArrayBase<S, Ix2>) -> Array<f64, Ix1>
  where S: Data<Elem = f64>,
{
  let n = ensemble.ncols();
  if n == 0 {
    return Array::zeros(ensemble.nrows());
  }
  ensemble.sum_axis(Axis(1)) / n as f64
}

/// The ensemble minus its own mean; equivalently `X (I - 1 1^T / N)`.
pub fn anomalies<S>(ensemble: &ArrayBase<S, Ix2>) -> Array<f64, Ix2>
  where S: Data<Elem = f64>,
{
  let m = mean(ensemble);
  let mut out = ensemble.to_owned();
  out -= &m.insert_axis(Axis(1));
  out
}

/// Sample covariance with `N - 1` normalisation.
pub fn covariance<S>(ensemble: &ArrayBase<S, Ix2>) -> Array<f64, Ix2>
  where S: Data<Elem = f64>,
{
  let n = ensemble.ncols();
  let x_bar = anomalies(ensemble);
  let dof = if n > 1 { (n - 1) as f64 } else { 1.0 };
  x_bar.dot(&x_bar.t()) / dof
}

/// Pushes every member through `transition` with its own noise column.
///
/// The previous ensemble is consumed; members are independent so they are
/// evaluated in parallel, but each one only ever sees its own noise draw and
/// the result is assembled in member order.
pub fn predict<T>(ensemble: Array<f64, Ix2>,
                  noise: ArrayView<f64, Ix2>,
                  transition: &T,
                  step: usize) -> Result<Array<f64, Ix2>>
  where T: Transition + ?Sized,
{
  let (dim, n) = ensemble.dim();
  if noise.ncols() != n {
    return Err(Error::config(format!("step {}: {} noise draws for {} members",
                                     step, noise.ncols(), n)));
  }

  let members: Vec<Array<f64, Ix1>> = ensemble
    .axis_iter(Axis(1))
    .into_par_iter()
    .zip(noise.axis_iter(Axis(1)).into_par_iter())
    .map(|(member, eps)| transition.transition(member, eps) )
    .collect();

  let mut next = Array::zeros((dim, n));
  for (i, member) in members.into_iter().enumerate() {
    if member.len() != dim {
      return Err(Error::config(format!("step {}: transition returned a state of length {} \
                                        for member {}, expected {}",
                                       step, member.len(), i, dim)));
    }
    next.column_mut(i).assign(&member);
  }

  Ok(next)
}

#[test]
fn anomalies_are_centered() {
  use approx::assert_abs_diff_eq;
  use nd::arr2;

  let x = arr2(&[
    [1.0, 2.0, 3.0, 6.0],
    [0.0, -1.0, 1.0, 0.0],
  ]);
  let m = mean(&x);
  assert_abs_diff_eq!(m[0], 3.0);
  assert_abs_diff_eq!(m[1], 0.0);

  let a = anomalies(&x);
  for v in a.sum_axis(Axis(1)).iter() {
    assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-14);
  }

  // explicit centering operator
  let n = 4;
  let ones = Array::<f64, Ix2>::ones((n, n)) / n as f64;
  let centering = Array::<f64, Ix2>::eye(n) - &ones;
  let b = x.dot(&centering);
  for (l, r) in a.iter().zip(b.iter()) {
    assert_abs_diff_eq!(l, r, epsilon = 1e-14);
  }
}

#[test]
fn covariance_uses_n_minus_one() {
  use approx::assert_abs_diff_eq;
  use nd::arr2;

  let x = arr2(&[[1.0, 3.0]]);
  let c = covariance(&x);
  assert_abs_diff_eq!(c[[0, 0]], 2.0);
}

#[test]
fn predict_keeps_member_order() {
  use nd::{arr2, ArrayView1};

  let x = arr2(&[
    [1.0, 2.0, 3.0],
    [4.0, 5.0, 6.0],
  ]);
  let eps = arr2(&[
    [0.5, 0.25, -1.5],
    [0.0, 0.0, 0.0],
  ]);
  let fx = |x: ArrayView1<f64>, e: ArrayView1<f64>| -> Array<f64, Ix1> { &x * 2.0 + &e };

  let next = predict(x, eps.view(), &fx, 0).unwrap();
  assert_eq!(next, arr2(&[
    [2.5, 4.25, 4.5],
    [8.0, 10.0, 12.0],
  ]));
}

#[test]
fn predict_rejects_wrong_state_length() {
  use nd::{arr1, arr2, ArrayView1};

  let x = arr2(&[[1.0, 2.0]]);
  let eps = arr2(&[[0.0, 0.0]]);
  let fx = |_: ArrayView1<f64>, _: ArrayView1<f64>| -> Array<f64, Ix1> { arr1(&[0.0, 0.0]) };

  match predict(x, eps.view(), &fx, 3) {
    Err(Error::Configuration(msg)) => assert!(msg.starts_with("step 3")),
    other => panic!("expected configuration error, got {:?}", other),
  }
}
