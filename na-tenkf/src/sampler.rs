//! Multivariate normal draws for ensembles and noise.
//!
//! The preferred strategy is a randomized low-discrepancy design; builds
//! without the `low-discrepancy` feature fall back to plain Monte Carlo.

use nd::{Array, ArrayView, Axis, Ix1, Ix2};
use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};

use na_core::linalg::{check_square, covariance_factor};
use na_core::{Error, Result};

use std::fmt::{self, Debug};
use std::str::FromStr;

/// Sampling rule codes. `L`, `H`, `M`, `K` and `S` are low-discrepancy
/// designs, `R` is plain pseudo-random sampling.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Rule {
  #[default]
  LatinHypercube,
  Halton,
  Hammersley,
  Korobov,
  Sobol,
  Random,
}
impl Rule {
  pub fn from_code(c: char) -> Result<Rule> {
    match c.to_ascii_uppercase() {
      'L' => Ok(Rule::LatinHypercube),
      'H' => Ok(Rule::Halton),
      'M' => Ok(Rule::Hammersley),
      'K' => Ok(Rule::Korobov),
      'S' => Ok(Rule::Sobol),
      'R' => Ok(Rule::Random),
      _ => Err(Error::UnsupportedRule(c)),
    }
  }
  pub fn code(&self) -> char {
    match *self {
      Rule::LatinHypercube => 'L',
      Rule::Halton => 'H',
      Rule::Hammersley => 'M',
      Rule::Korobov => 'K',
      Rule::Sobol => 'S',
      Rule::Random => 'R',
    }
  }
}
impl FromStr for Rule {
  type Err = Error;
  fn from_str(s: &str) -> Result<Rule> {
    let mut chars = s.trim().chars();
    match (chars.next(), chars.next()) {
      (Some(c), None) => Rule::from_code(c),
      (Some(c), Some(_)) => Err(Error::UnsupportedRule(c)),
      (None, _) => Err(Error::config("empty sampling rule")),
    }
  }
}
impl fmt::Display for Rule {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}", self.code())
  }
}

pub trait Sampler: Send + Sync + Debug {
  /// Draws `count` samples of `N(mean, cov)`; one sample per column.
  fn draw(&self, mean: ArrayView<f64, Ix1>, cov: ArrayView<f64, Ix2>,
          count: usize, rand: &mut dyn RngCore) -> Result<Array<f64, Ix2>>;

  fn name(&self) -> &'static str;
}

/// Picks the sampling strategy once, at filter construction.
pub fn select(rule: Option<Rule>) -> Box<dyn Sampler> {
  match rule {
    Some(Rule::Random) => Box::new(MonteCarlo),
    rule => low_discrepancy(rule.unwrap_or_default()),
  }
}

#[cfg(feature = "low-discrepancy")]
fn low_discrepancy(rule: Rule) -> Box<dyn Sampler> {
  Box::new(LowDiscrepancy { rule: rule })
}
#[cfg(not(feature = "low-discrepancy"))]
fn low_discrepancy(rule: Rule) -> Box<dyn Sampler> {
  warn!("low-discrepancy sampling (rule `{}`) is not available in this build; \
         falling back to plain Monte Carlo. This is likely to cause a loss in precision.",
        rule);
  Box::new(MonteCarlo)
}

/// Colours standard normal draws `z` (dim x count) with `F F^T = cov` and
/// shifts them by `mean`.
fn color(mean: ArrayView<f64, Ix1>, cov: ArrayView<f64, Ix2>,
         z: Array<f64, Ix2>) -> Result<Array<f64, Ix2>> {
  let factor = covariance_factor(&cov)?;
  let mut out = factor.dot(&z);
  out += &mean.insert_axis(Axis(1));
  Ok(out)
}

fn check_shapes(mean: &ArrayView<f64, Ix1>, cov: &ArrayView<f64, Ix2>) -> Result<()> {
  check_square("sample covariance", cov, mean.len())
}

#[derive(Copy, Clone, Debug, Default)]
pub struct MonteCarlo;

impl Sampler for MonteCarlo {
  fn draw(&self, mean: ArrayView<f64, Ix1>, cov: ArrayView<f64, Ix2>,
          count: usize, rand: &mut dyn RngCore) -> Result<Array<f64, Ix2>> {
    check_shapes(&mean, &cov)?;
    let dim = mean.len();

    let mut z: Array<f64, Ix2> = Array::zeros((dim, count));
    for j in 0..count {
      for i in 0..dim {
        z[[i, j]] = StandardNormal.sample(rand);
      }
    }

    color(mean, cov, z)
  }

  fn name(&self) -> &'static str { "monte-carlo" }
}

#[cfg(feature = "low-discrepancy")]
pub use self::qmc::LowDiscrepancy;

#[cfg(feature = "low-discrepancy")]
mod qmc {
  use nd::{Array, ArrayView, Axis, Ix1, Ix2};
  use rand::{Rng, RngCore};
  use rand::distributions::Open01;
  use rand::seq::SliceRandom;
  use statrs::distribution::{ContinuousCDF, Normal};

  use na_core::{Error, Result};

  use super::{check_shapes, color, Rule, Sampler};

  /// Randomized quasi-Monte Carlo: the design is randomly shifted (modulo 1)
  /// per dimension and its points are shuffled across columns, so successive
  /// draws are independent of each other.
  #[derive(Copy, Clone, Debug)]
  pub struct LowDiscrepancy {
    pub rule: Rule,
  }

  impl Sampler for LowDiscrepancy {
    fn draw(&self, mean: ArrayView<f64, Ix1>, cov: ArrayView<f64, Ix2>,
            count: usize, rand: &mut dyn RngCore) -> Result<Array<f64, Ix2>> {
      check_shapes(&mean, &cov)?;
      let dim = mean.len();

      let u = match self.rule {
        Rule::LatinHypercube => latin_hypercube(dim, count, rand),
        Rule::Halton => shifted(halton(dim, count), rand),
        Rule::Hammersley => shifted(hammersley(dim, count), rand),
        Rule::Korobov => shifted(korobov(dim, count), rand),
        Rule::Sobol => sobol(dim, count, rand)?,
        Rule::Random => Array::from_shape_fn((dim, count), |_| rand.sample::<f64, _>(Open01) ),
      };

      let normal = Normal::new(0.0, 1.0)
        .map_err(|e| Error::config(format!("standard normal: {}", e)))?;
      let z = u.mapv(|p| normal.inverse_cdf(clamp_open(p)) );

      let mut order: Vec<usize> = (0..count).collect();
      order.shuffle(rand);
      let z = z.select(Axis(1), &order);

      color(mean, cov, z)
    }

    fn name(&self) -> &'static str {
      match self.rule {
        Rule::LatinHypercube => "latin-hypercube",
        Rule::Halton => "halton",
        Rule::Hammersley => "hammersley",
        Rule::Korobov => "korobov",
        Rule::Sobol => "sobol",
        Rule::Random => "random",
      }
    }
  }

  fn clamp_open(p: f64) -> f64 {
    const EDGE: f64 = 1e-15;
    p.max(EDGE).min(1.0 - EDGE)
  }

  fn latin_hypercube(dim: usize, count: usize, rand: &mut dyn RngCore) -> Array<f64, Ix2> {
    let mut u = Array::zeros((dim, count));
    let mut strata: Vec<usize> = (0..count).collect();
    for i in 0..dim {
      strata.shuffle(rand);
      for j in 0..count {
        let jitter: f64 = rand.sample(Open01);
        u[[i, j]] = (strata[j] as f64 + jitter) / count as f64;
      }
    }
    u
  }

  /// Cranley-Patterson rotation.
  fn shifted(mut u: Array<f64, Ix2>, rand: &mut dyn RngCore) -> Array<f64, Ix2> {
    for mut row in u.axis_iter_mut(Axis(0)) {
      let shift: f64 = rand.sample(Open01);
      row.mapv_inplace(|v| (v + shift).fract() );
    }
    u
  }

  fn halton(dim: usize, count: usize) -> Array<f64, Ix2> {
    let primes = small_primes(dim);
    Array::from_shape_fn((dim, count), |(i, j)| radical_inverse(j + 1, primes[i]) )
  }

  fn hammersley(dim: usize, count: usize) -> Array<f64, Ix2> {
    let primes = small_primes(dim.saturating_sub(1));
    Array::from_shape_fn((dim, count), |(i, j)| {
      if i == 0 {
        (j as f64 + 0.5) / count as f64
      } else {
        radical_inverse(j + 1, primes[i - 1])
      }
    })
  }

  const KOROBOV_BASE: u64 = 17797;

  /// Rank-1 lattice with generating vector `(1, a, a^2, ...) mod (count + 1)`.
  pub(super) fn korobov(dim: usize, count: usize) -> Array<f64, Ix2> {
    let modulus = count as u64 + 1;
    let mut generator = Vec::with_capacity(dim);
    let mut g = 1 % modulus;
    for _ in 0..dim {
      generator.push(g);
      g = ((g as u128 * KOROBOV_BASE as u128) % modulus as u128) as u64;
    }
    Array::from_shape_fn((dim, count), |(i, j)| {
      let k = (j as u128 + 1) * generator[i] as u128 % modulus as u128;
      k as f64 / modulus as f64
    })
  }

  /// Owen-scrambled Sobol points, one scramble seed per draw.
  fn sobol(dim: usize, count: usize, rand: &mut dyn RngCore) -> Result<Array<f64, Ix2>> {
    if dim > sobol_burley::NUM_DIMENSIONS as usize {
      return Err(Error::config(format!("sobol sampling supports at most {} dimensions, \
                                        got {}", sobol_burley::NUM_DIMENSIONS, dim)));
    }
    if count > u32::MAX as usize {
      return Err(Error::config(format!("sobol sampling supports at most {} points",
                                       u32::MAX)));
    }
    let seed = rand.next_u32();
    Ok(Array::from_shape_fn((dim, count), |(i, j)| {
      sobol_burley::sample(j as u32, i as u32, seed) as f64
    }))
  }

  /// Return the first `n` prime numbers.
  pub(super) fn small_primes(n: usize) -> Vec<usize> {
    let mut primes = Vec::with_capacity(n);
    let mut candidate = 2usize;
    while primes.len() < n {
      if primes.iter().all(|&p| candidate % p != 0) {
        primes.push(candidate);
      }
      candidate += 1;
    }
    primes
  }

  /// Van der Corput radical inverse of `i` in `base`; lands in `[0, 1)`.
  pub(super) fn radical_inverse(mut i: usize, base: usize) -> f64 {
    let mut result = 0.0;
    let mut fraction = 1.0 / base as f64;
    while i > 0 {
      result += (i % base) as f64 * fraction;
      i /= base;
      fraction /= base as f64;
    }
    result
  }
}

#[cfg(test)]
fn sample_moments(x: &Array<f64, Ix2>) -> (Array<f64, Ix1>, Array<f64, Ix2>) {
  let n = x.ncols() as f64;
  let mean = x.sum_axis(Axis(1)) / n;
  let centered = x - &mean.view().insert_axis(Axis(1));
  let cov = centered.dot(&centered.t()) / (n - 1.0);
  (mean, cov)
}

#[test]
fn rule_codes() {
  assert_eq!(Rule::from_code('l').unwrap(), Rule::LatinHypercube);
  assert_eq!("H".parse::<Rule>().unwrap(), Rule::Halton);
  assert_eq!(Rule::Hammersley.code(), 'M');
  assert_eq!(Rule::from_code('k').unwrap(), Rule::Korobov);
  assert_eq!("S".parse::<Rule>().unwrap(), Rule::Sobol);
  assert_eq!(Rule::Sobol.to_string(), "S");
  assert_eq!(Rule::default(), Rule::LatinHypercube);
  match Rule::from_code('X') {
    Err(Error::UnsupportedRule('X')) => {},
    other => panic!("unexpected {:?}", other),
  }
  assert!("".parse::<Rule>().is_err());
  assert!("LH".parse::<Rule>().is_err());
}

#[test]
fn monte_carlo_moments() {
  use nd::{arr1, arr2};
  use rand::SeedableRng;
  use rand_isaac::Isaac64Rng;

  let mut rand = Isaac64Rng::seed_from_u64(7);
  let mean = arr1(&[1.0, -2.0]);
  let cov = arr2(&[[2.0, 0.6], [0.6, 1.0]]);

  let x = MonteCarlo.draw(mean.view(), cov.view(), 20_000, &mut rand).unwrap();
  assert_eq!(x.dim(), (2, 20_000));

  let (m, c) = sample_moments(&x);
  for (l, r) in m.iter().zip(mean.iter()) {
    assert!((l - r).abs() < 0.05, "mean {} vs {}", l, r);
  }
  for (l, r) in c.iter().zip(cov.iter()) {
    assert!((l - r).abs() < 0.1, "cov {} vs {}", l, r);
  }
}

#[test]
fn rejects_mismatched_shapes() {
  use nd::{arr1, arr2};
  use rand::SeedableRng;
  use rand_isaac::Isaac64Rng;

  let mut rand = Isaac64Rng::seed_from_u64(7);
  let r = MonteCarlo.draw(arr1(&[0.0, 0.0]).view(), arr2(&[[1.0]]).view(), 3, &mut rand);
  assert!(r.is_err());
}

#[test]
fn zero_draws() {
  use nd::{arr1, arr2};
  use rand::SeedableRng;
  use rand_isaac::Isaac64Rng;

  let mut rand = Isaac64Rng::seed_from_u64(1);
  let s = select(None);
  let x = s.draw(arr1(&[0.0]).view(), arr2(&[[1.0]]).view(), 0, &mut rand).unwrap();
  assert_eq!(x.dim(), (1, 0));
}

#[cfg(feature = "low-discrepancy")]
#[test]
fn radical_inverse_base2() {
  use self::qmc::radical_inverse;

  assert!((radical_inverse(1, 2) - 0.5).abs() < 1e-15);
  assert!((radical_inverse(2, 2) - 0.25).abs() < 1e-15);
  assert!((radical_inverse(3, 2) - 0.75).abs() < 1e-15);
  assert!((radical_inverse(1, 3) - 1.0 / 3.0).abs() < 1e-15);
  assert_eq!(self::qmc::small_primes(5), vec![2, 3, 5, 7, 11]);
}

#[cfg(feature = "low-discrepancy")]
#[test]
fn korobov_lattice() {
  use nd::arr2;

  // n = 5, generator (1, 17797 mod 5 = 2)
  let u = self::qmc::korobov(2, 4);
  let expected = arr2(&[
    [0.2, 0.4, 0.6, 0.8],
    [0.4, 0.8, 0.2, 0.6],
  ]);
  for (l, r) in u.iter().zip(expected.iter()) {
    assert!((l - r).abs() < 1e-15, "{} vs {}", l, r);
  }
}

#[cfg(feature = "low-discrepancy")]
#[test]
fn low_discrepancy_moments() {
  use nd::{arr1, arr2};
  use rand::SeedableRng;
  use rand_isaac::Isaac64Rng;

  let mean = arr1(&[0.5, 3.0, -1.0]);
  let cov = arr2(&[
    [1.0, 0.3, 0.0],
    [0.3, 2.0, 0.0],
    [0.0, 0.0, 0.5],
  ]);

  for &rule in &[Rule::LatinHypercube, Rule::Halton, Rule::Hammersley,
                 Rule::Korobov, Rule::Sobol] {
    let mut rand = Isaac64Rng::seed_from_u64(11);
    let s = select(Some(rule));
    assert_eq!(s.name(), LowDiscrepancy { rule: rule }.name());

    let x = s.draw(mean.view(), cov.view(), 4_000, &mut rand).unwrap();
    assert!(x.iter().all(|v| v.is_finite() ));
    let (m, c) = sample_moments(&x);
    for (l, r) in m.iter().zip(mean.iter()) {
      assert!((l - r).abs() < 0.02, "{:?}: mean {} vs {}", rule, l, r);
    }
    for (l, r) in c.iter().zip(cov.iter()) {
      assert!((l - r).abs() < 0.1, "{:?}: cov {} vs {}", rule, l, r);
    }
  }
}

#[test]
fn random_rule_is_monte_carlo() {
  assert_eq!(select(Some(Rule::Random)).name(), "monte-carlo");
}

#[cfg(not(feature = "low-discrepancy"))]
#[test]
fn falls_back_without_low_discrepancy() {
  assert_eq!(select(None).name(), "monte-carlo");
  assert_eq!(select(Some(Rule::Halton)).name(), "monte-carlo");
}
