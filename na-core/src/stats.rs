
use nd::{ArrayBase, Data, Ix1, Ix2};

use crate::linalg::{check_len, check_square, SpdFactor};
use crate::Result;

const LN_2PI: f64 = 1.8378770664093453;

/// Log-density of `N(mean, cov)` evaluated at `x`.
pub fn log_density<S1, S2, S3>(x: &ArrayBase<S1, Ix1>,
                               mean: &ArrayBase<S2, Ix1>,
                               cov: &ArrayBase<S3, Ix2>) -> Result<f64>
  where S1: Data<Elem = f64>,
        S2: Data<Elem = f64>,
        S3: Data<Elem = f64>,
{
  let k = x.len();
  check_len("mean", mean, k)?;
  check_square("covariance", cov, k)?;

  let factor = SpdFactor::new(cov)?;
  let maha = factor.mahalanobis(&(x - mean));

  Ok(-0.5 * (k as f64 * LN_2PI + factor.log_det() + maha))
}

#[test]
fn standard_normal_density() {
  use approx::assert_abs_diff_eq;
  use nd::{arr1, arr2};

  let ld = log_density(&arr1(&[0.0]), &arr1(&[0.0]), &arr2(&[[1.0]])).unwrap();
  assert_abs_diff_eq!(ld, -0.5 * LN_2PI, epsilon = 1e-14);

  let ld = log_density(&arr1(&[2.0]), &arr1(&[0.0]), &arr2(&[[4.0]])).unwrap();
  // -0.5 * (ln 2pi + ln 4 + 1)
  assert_abs_diff_eq!(ld, -0.5 * (LN_2PI + 4.0f64.ln() + 1.0), epsilon = 1e-14);
}

#[test]
fn correlated_density() {
  use approx::assert_abs_diff_eq;
  use nd::{arr1, arr2};

  let cov = arr2(&[
    [2.0, 0.5],
    [0.5, 1.0],
  ]);
  let x = arr1(&[1.0, -1.0]);
  let det: f64 = 2.0 * 1.0 - 0.25;
  // explicit inverse of the 2x2
  let inv = arr2(&[
    [1.0 / det, -0.5 / det],
    [-0.5 / det, 2.0 / det],
  ]);
  let maha = x.dot(&inv.dot(&x));
  let expected = -0.5 * (2.0 * LN_2PI + det.ln() + maha);

  let ld = log_density(&x, &arr1(&[0.0, 0.0]), &cov).unwrap();
  assert_abs_diff_eq!(ld, expected, epsilon = 1e-12);
}

#[test]
fn density_dimension_mismatch() {
  use nd::{arr1, arr2};

  let r = log_density(&arr1(&[0.0, 1.0]), &arr1(&[0.0]), &arr2(&[[1.0]]));
  assert!(r.is_err());
}
