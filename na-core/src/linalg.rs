//! Dense factorizations used by the ensemble filters.

use na::{Cholesky, DMatrix, DVector, Dyn, SymmetricEigen, SVD};
use nd::{Array, ArrayBase, Data, Ix1, Ix2};

use crate::{Error, Result};

/// Cholesky factor `A = L L^T` of a symmetric positive definite matrix.
pub struct SpdFactor {
  chol: Cholesky<f64, Dyn>,
}

impl SpdFactor {
  /// Factors `a`, reading its lower triangle.
  ///
  /// Fails with `NumericalInstability` (step 0; callers re-tag it) when a
  /// pivot is not safely positive relative to the largest diagonal entry.
  pub fn new<S>(a: &ArrayBase<S, Ix2>) -> Result<SpdFactor>
    where S: Data<Elem = f64>,
  {
    let (m, n) = a.dim();
    if m != n {
      return Err(Error::config(format!("cholesky of a non-square {}x{} matrix", m, n)));
    }

    let max_diag = a.diag().iter().fold(0.0f64, |acc, &v| acc.max(v.abs()));
    let tol = max_diag * (m.max(1) as f64) * ::std::f64::EPSILON;

    let chol = to_dmatrix(a)
      .cholesky()
      .ok_or_else(|| Error::NumericalInstability {
        step: 0,
        reason: "matrix is not positive definite (negative pivot)".into(),
      })?;
    for (k, d) in chol.l_dirty().diagonal().iter().enumerate() {
      let pivot = d * d;
      if !pivot.is_finite() || pivot <= tol {
        return Err(Error::NumericalInstability {
          step: 0,
          reason: format!("matrix is not positive definite (pivot {} = {:e})", k, pivot),
        });
      }
    }

    Ok(SpdFactor { chol: chol })
  }

  pub fn dim(&self) -> usize { self.chol.l_dirty().nrows() }

  /// The lower triangular factor.
  pub fn l(&self) -> Array<f64, Ix2> {
    from_dmatrix(&self.chol.l())
  }

  pub fn solve<S>(&self, b: &ArrayBase<S, Ix2>) -> Array<f64, Ix2>
    where S: Data<Elem = f64>,
  {
    from_dmatrix(&self.chol.solve(&to_dmatrix(b)))
  }

  /// `x^T A^-1 x`
  pub fn mahalanobis<S>(&self, x: &ArrayBase<S, Ix1>) -> f64
    where S: Data<Elem = f64>,
  {
    let x = DVector::from_iterator(x.len(), x.iter().cloned());
    x.dot(&self.chol.solve(&x))
  }

  /// `log |A|`
  pub fn log_det(&self) -> f64 {
    2.0 * self.chol.l_dirty().diagonal().iter().map(|v| v.ln() ).sum::<f64>()
  }
}

/// Solves `A X = B` for symmetric positive definite `A` without forming `A^-1`.
pub fn solve_spd<S1, S2>(a: &ArrayBase<S1, Ix2>, b: &ArrayBase<S2, Ix2>) -> Result<Array<f64, Ix2>>
  where S1: Data<Elem = f64>,
        S2: Data<Elem = f64>,
{
  if a.dim().0 != b.dim().0 {
    return Err(Error::config(format!("solve: lhs is {:?} but rhs has {} rows",
                                     a.dim(), b.dim().0)));
  }
  let x = SpdFactor::new(a)?.solve(b);
  if x.iter().any(|v| !v.is_finite() ) {
    return Err(Error::NumericalInstability {
      step: 0,
      reason: "linear solve produced non-finite values".into(),
    });
  }
  Ok(x)
}

/// Returns `F` with `F F^T = cov`, via a symmetric eigendecomposition so that
/// singular (semi-definite) covariances are accepted.
pub fn covariance_factor<S>(cov: &ArrayBase<S, Ix2>) -> Result<Array<f64, Ix2>>
  where S: Data<Elem = f64>,
{
  let (m, n) = cov.dim();
  if m != n {
    return Err(Error::config(format!("covariance must be square, got {}x{}", m, n)));
  }
  if cov.iter().any(|v| !v.is_finite() ) {
    return Err(Error::config("covariance has non-finite entries"));
  }

  let sym = DMatrix::from_fn(n, n, |i, j| 0.5 * (cov[[i, j]] + cov[[j, i]]) );
  let SymmetricEigen { eigenvalues, eigenvectors } = SymmetricEigen::new(sym);

  let scale = eigenvalues.iter().fold(0.0f64, |acc, &v| acc.max(v.abs()));
  let tol = scale * (n.max(1) as f64) * 1e3 * ::std::f64::EPSILON;
  let mut roots = Vec::with_capacity(n);
  for &lambda in eigenvalues.iter() {
    if lambda < -tol {
      return Err(Error::config(format!("covariance is not positive semi-definite \
                                        (eigenvalue {:e})", lambda)));
    }
    if lambda < 0.0 {
      trace!("clamping eigenvalue {:e} to zero", lambda);
    }
    roots.push(lambda.max(0.0).sqrt());
  }

  Ok(Array::from_shape_fn((n, n), |(i, j)| eigenvectors[(i, j)] * roots[j] ))
}

/// Moore-Penrose inverse; singular values at or below `rcond * max(sigma)` are
/// treated as zero.
pub fn pseudo_inverse<S>(a: &ArrayBase<S, Ix2>, rcond: f64) -> Result<Array<f64, Ix2>>
  where S: Data<Elem = f64>,
{
  let (m, n) = a.dim();
  if m == 0 || n == 0 {
    return Ok(Array::zeros((n, m)));
  }
  if a.iter().any(|v| !v.is_finite() ) {
    return Err(Error::NumericalInstability {
      step: 0,
      reason: "pseudo-inverse of a matrix with non-finite entries".into(),
    });
  }

  let svd = SVD::new(to_dmatrix(a), true, true);
  let max_sv = svd.singular_values.iter().fold(0.0f64, |acc, &v| acc.max(v));
  let pinv = svd.pseudo_inverse(rcond.max(0.0) * max_sv)
    .map_err(|e| Error::config(format!("pseudo-inverse: {}", e)))?;

  Ok(from_dmatrix(&pinv))
}

pub fn to_dmatrix<S>(a: &ArrayBase<S, Ix2>) -> DMatrix<f64>
  where S: Data<Elem = f64>,
{
  let (m, n) = a.dim();
  DMatrix::from_fn(m, n, |i, j| a[[i, j]] )
}
pub fn from_dmatrix(m: &DMatrix<f64>) -> Array<f64, Ix2> {
  Array::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)] )
}

/// Symmetric square matrix check used when validating configurations.
pub fn check_square<S>(name: &str, a: &ArrayBase<S, Ix2>, dim: usize) -> Result<()>
  where S: Data<Elem = f64>,
{
  if a.dim() != (dim, dim) {
    return Err(Error::config(format!("{} must be {}x{}, got {}x{}",
                                     name, dim, dim, a.dim().0, a.dim().1)));
  }
  Ok(())
}

pub fn check_len<S>(name: &str, v: &ArrayBase<S, Ix1>, dim: usize) -> Result<()>
  where S: Data<Elem = f64>,
{
  if v.len() != dim {
    return Err(Error::config(format!("{} must have length {}, got {}",
                                     name, dim, v.len())));
  }
  Ok(())
}

#[test]
fn cholesky_llstar() {
  use approx::assert_abs_diff_eq;
  use nd::arr2;

  let a = arr2(&[
    [4.0, 12.0, -16.0],
    [12.0, 37.0, -43.0],
    [-16.0, -43.0, 98.0],
  ]);

  let f = SpdFactor::new(&a).expect("cholesky factorization failed");
  assert_eq!(f.dim(), 3);

  let expected = arr2(&[
    [2.0, 0.0, 0.0],
    [6.0, 1.0, 0.0],
    [-8.0, 5.0, 3.0],
  ]);
  for (l, r) in f.l().iter().zip(expected.iter()) {
    assert_abs_diff_eq!(l, r, epsilon = 1e-12);
  }
  assert_abs_diff_eq!(f.log_det(), 36.0f64.ln(), epsilon = 1e-12);
}

#[test]
fn cholesky_rejects_singular() {
  use nd::arr2;

  let a = arr2(&[
    [1.0, 1.0],
    [1.0, 1.0],
  ]);
  match SpdFactor::new(&a) {
    Err(Error::NumericalInstability { .. }) => {},
    Err(e) => panic!("expected instability, got {:?}", e),
    Ok(_) => panic!("singular matrix factored"),
  }

  let z = Array::<f64, Ix2>::zeros((2, 2));
  assert!(SpdFactor::new(&z).is_err());
  let neg = arr2(&[[-1.0]]);
  assert!(SpdFactor::new(&neg).is_err());
  assert!(solve_spd(&z, &Array::<f64, Ix2>::ones((2, 1))).is_err());
}

#[test]
fn spd_solve() {
  use approx::assert_abs_diff_eq;
  use nd::arr2;

  let a = arr2(&[
    [4.0, 12.0, -16.0],
    [12.0, 37.0, -43.0],
    [-16.0, -43.0, 98.0],
  ]);
  let b = arr2(&[
    [1.0, 0.0],
    [2.0, 1.0],
    [3.0, -1.0],
  ]);
  let x = solve_spd(&a, &b).unwrap();
  let back = a.dot(&x);
  for (l, r) in back.iter().zip(b.iter()) {
    assert_abs_diff_eq!(l, r, epsilon = 1e-9);
  }
}

#[test]
fn factor_of_semidefinite_covariance() {
  use approx::assert_abs_diff_eq;
  use nd::arr2;

  let c = arr2(&[
    [2.0, 0.0, 0.0],
    [0.0, 0.0, 0.0],
    [0.0, 0.0, 0.5],
  ]);
  let f = covariance_factor(&c).unwrap();
  let back = f.dot(&f.t());
  for (l, r) in back.iter().zip(c.iter()) {
    assert_abs_diff_eq!(l, r, epsilon = 1e-12);
  }

  let bad = arr2(&[[1.0, 0.0], [0.0, -1.0]]);
  assert!(covariance_factor(&bad).is_err());
}

#[test]
fn pinv_of_rank_deficient() {
  use approx::assert_abs_diff_eq;
  use nd::arr2;

  // centered rows: rank 1
  let a = arr2(&[
    [1.0, -1.0, 0.0],
    [2.0, -2.0, 0.0],
  ]);
  let p = pseudo_inverse(&a, 1e-14).unwrap();
  assert_eq!(p.dim(), (3, 2));

  let apa = a.dot(&p).dot(&a);
  for (l, r) in apa.iter().zip(a.iter()) {
    assert_abs_diff_eq!(l, r, epsilon = 1e-12);
  }
  let pap = p.dot(&a).dot(&p);
  for (l, r) in pap.iter().zip(p.iter()) {
    assert_abs_diff_eq!(l, r, epsilon = 1e-12);
  }
}
