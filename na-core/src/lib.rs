extern crate ndarray as nd;
extern crate nalgebra as na;
#[macro_use]
extern crate log;

use nd::prelude::*;

pub use error::{Result, Error};

pub mod error;
pub mod linalg;
pub mod stats;

/// A (possibly nonlinear) state transition, applied to one ensemble member
/// at a time together with that member's process-noise draw.
pub trait Transition: Send + Sync {
  fn transition(&self, state: ArrayView1<f64>, noise: ArrayView1<f64>) -> Array1<f64>;

  /// `(input, output)` dimensions, when known up front.
  fn operator_dims(&self) -> Option<(usize, usize)> { None }
}
impl<F> Transition for F
  where F: Fn(ArrayView1<f64>, ArrayView1<f64>) -> Array1<f64> + Send + Sync,
{
  fn transition(&self, state: ArrayView1<f64>, noise: ArrayView1<f64>) -> Array1<f64> {
    self(state, noise)
  }
}

/// Maps a whole `dim_x x N` ensemble to its `dim_z x N` predicted observations.
pub trait Observation: Send + Sync {
  fn observe(&self, ensemble: ArrayView2<f64>) -> Array2<f64>;

  /// `(state, observation)` dimensions, when known up front.
  fn operator_dims(&self) -> Option<(usize, usize)> { None }
}
impl<F> Observation for F
  where F: Fn(ArrayView2<f64>) -> Array2<f64> + Send + Sync,
{
  fn observe(&self, ensemble: ArrayView2<f64>) -> Array2<f64> {
    self(ensemble)
  }
}

/// A matrix used as a linear model. As a transition it computes `A x + eps`,
/// as an observation `H X`.
#[derive(Debug, Clone)]
pub struct Linear {
  pub matrix: Array2<f64>,
}
impl Linear {
  pub fn new(matrix: Array2<f64>) -> Linear {
    Linear { matrix: matrix }
  }

  pub fn operator_input_dim(&self) -> usize { self.matrix.ncols() }
  pub fn operator_output_dim(&self) -> usize { self.matrix.nrows() }
}
impl Transition for Linear {
  fn transition(&self, state: ArrayView1<f64>, noise: ArrayView1<f64>) -> Array1<f64> {
    let mut next = self.matrix.dot(&state);
    next += &noise;
    next
  }
  fn operator_dims(&self) -> Option<(usize, usize)> {
    Some((self.operator_input_dim(), self.operator_output_dim()))
  }
}
impl Observation for Linear {
  fn observe(&self, ensemble: ArrayView2<f64>) -> Array2<f64> {
    self.matrix.dot(&ensemble)
  }
  fn operator_dims(&self) -> Option<(usize, usize)> {
    Some((self.operator_input_dim(), self.operator_output_dim()))
  }
}

#[test]
fn linear_operator() {
  use nd::{arr1, arr2};

  let op = Linear::new(arr2(&[
    [0.5, 1.0],
    [0.0, 2.0],
  ]));
  assert_eq!(op.operator_input_dim(), 2);
  assert_eq!(op.operator_output_dim(), 2);
  assert_eq!(Transition::operator_dims(&op), Some((2, 2)));
  let h = Linear::new(arr2(&[[1.0, 0.0, 0.0]]));
  assert_eq!(Observation::operator_dims(&h), Some((3, 1)));

  let next = op.transition(arr1(&[2.0, 1.0]).view(), arr1(&[0.5, -1.0]).view());
  assert_eq!(next, arr1(&[2.5, 1.0]));

  let obs = op.observe(arr2(&[[1.0, 0.0], [0.0, 1.0]]).view());
  assert_eq!(obs, op.matrix);
}

#[test]
fn closures_are_collaborators() {
  use nd::{arr1, arr2};

  let fx = |x: ArrayView1<f64>, eps: ArrayView1<f64>| -> Array1<f64> {
    x.mapv(|v| v * v) + &eps
  };
  let hx = |x: ArrayView2<f64>| -> Array2<f64> { x.slice(s![..1, ..]).to_owned() };

  let next = fx.transition(arr1(&[3.0]).view(), arr1(&[1.0]).view());
  assert_eq!(next, arr1(&[10.0]));

  let obs = hx.observe(arr2(&[[1.0, 2.0], [3.0, 4.0]]).view());
  assert_eq!(obs, arr2(&[[1.0, 2.0]]));
  assert!(Transition::operator_dims(&fx).is_none());
  assert!(Observation::operator_dims(&hx).is_none());
}
