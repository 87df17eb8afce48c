//! Transposed ensemble Kalman filter with perturbed observations.

use nd::{s, Array, ArrayView, Axis, Ix1, Ix2, Ix3};
use rand::SeedableRng;
use rand_isaac::Isaac64Rng;

use na_core::linalg::{check_len, check_square, solve_spd};
use na_core::stats::log_density;
use na_core::{Error, Observation, Result, Transition};

use crate::ensemble::{self, anomalies};
use crate::history::{roll, History};
use crate::sampler::{self, Rule, Sampler};

use super::rts;

#[derive(Copy, Clone, Debug)]
pub struct Setup {
  pub ensemble_count: usize,
  pub dim_x: usize,
  pub dim_z: usize,
  /// `None` selects the default low-discrepancy rule.
  pub rule: Option<Rule>,
  pub seed: Option<u64>,
}
impl Default for Setup {
  fn default() -> Self {
    Setup {
      ensemble_count: 50,
      dim_x: 1,
      dim_z: 1,
      rule: None,
      seed: None,
    }
  }
}

/// Options for one `batch_filter` call.
#[derive(Clone, Debug, Default)]
pub struct FilterOptions {
  /// `dim_x x N`; sampled from `N(x, P)` when absent.
  pub init_states: Option<Array<f64, Ix2>>,
  /// Overrides the seed given at construction.
  pub seed: Option<u64>,
  /// Keep prior/posterior snapshots for the smoother.
  pub store: bool,
  pub calc_ll: bool,
  /// Log every step at debug level.
  pub verbose: bool,
}

#[derive(Clone, Debug)]
pub struct FilterOutput {
  /// `N x T x dim_x`. Present when `store` is set or `calc_ll` isn't.
  pub ensembles: Option<Array<f64, Ix3>>,
  /// Present when `calc_ll` is set.
  pub log_likelihood: Option<f64>,
}

pub struct TEnKF<F, H>
  where F: Transition,
        H: Observation,
{
  dim_x: usize,
  dim_z: usize,
  ensemble_count: usize,
  seed: Option<u64>,

  transition: F,
  observation: H,
  sampler: Box<dyn Sampler>,

  /// Process noise covariance, `dim_x x dim_x`.
  pub q: Array<f64, Ix2>,
  /// Observation noise covariance, `dim_z x dim_z`.
  pub r: Array<f64, Ix2>,
  /// Initial state covariance, `dim_x x dim_x`.
  pub p: Array<f64, Ix2>,
  /// Initial state mean.
  pub x: Array<f64, Ix1>,

  history: Option<History>,
  smoothed: Option<Array<f64, Ix3>>,
  ll: Option<f64>,
}

impl<F, H> TEnKF<F, H>
  where F: Transition,
        H: Observation,
{
  pub fn new(setup: Setup, transition: F, observation: H) -> Result<TEnKF<F, H>> {
    let Setup {
      ensemble_count,
      dim_x,
      dim_z,
      rule,
      seed,
    } = setup;

    if ensemble_count < 2 {
      return Err(Error::config(format!("the ensemble needs at least 2 members, got {}",
                                       ensemble_count)));
    }
    if dim_x == 0 || dim_z == 0 {
      return Err(Error::config(format!("state and observation dimensions must be \
                                        positive, got {} and {}", dim_x, dim_z)));
    }

    if let Some((input, output)) = transition.operator_dims() {
      if (input, output) != (dim_x, dim_x) {
        return Err(Error::config(format!("transition maps {} to {}, expected {} to {}",
                                         input, output, dim_x, dim_x)));
      }
    }
    if let Some((input, output)) = observation.operator_dims() {
      if (input, output) != (dim_x, dim_z) {
        return Err(Error::config(format!("observation maps {} to {}, expected {} to {}",
                                         input, output, dim_x, dim_z)));
      }
    }

    let sampler = sampler::select(rule);
    debug!("TEnKF: N = {}, dim_x = {}, dim_z = {}, sampler = {}",
           ensemble_count, dim_x, dim_z, sampler.name());

    Ok(TEnKF {
      dim_x: dim_x,
      dim_z: dim_z,
      ensemble_count: ensemble_count,
      seed: seed,

      transition: transition,
      observation: observation,
      sampler: sampler,

      q: Array::eye(dim_x),
      r: Array::eye(dim_z),
      p: Array::eye(dim_x),
      x: Array::zeros(dim_x),

      history: None,
      smoothed: None,
      ll: None,
    })
  }

  pub fn dim_x(&self) -> usize { self.dim_x }
  pub fn dim_z(&self) -> usize { self.dim_z }
  pub fn ensemble_count(&self) -> usize { self.ensemble_count }
  pub fn sampler_name(&self) -> &'static str { self.sampler.name() }

  /// Snapshots from the last `batch_filter` call made with `store`.
  pub fn history(&self) -> Option<&History> { self.history.as_ref() }
  /// `T x dim_x x N` result of the last `rts_smoother` call.
  pub fn smoothed(&self) -> Option<&Array<f64, Ix3>> { self.smoothed.as_ref() }
  /// Log-likelihood of the last `batch_filter` call made with `calc_ll`.
  pub fn log_likelihood(&self) -> Option<f64> { self.ll }

  fn validate(&self, z: &ArrayView<f64, Ix2>, opts: &FilterOptions) -> Result<()> {
    if z.ncols() != self.dim_z {
      return Err(Error::config(format!("observations must have {} columns, got {}",
                                       self.dim_z, z.ncols())));
    }
    check_square("Q", &self.q, self.dim_x)?;
    check_square("R", &self.r, self.dim_z)?;
    check_square("P", &self.p, self.dim_x)?;
    check_len("x", &self.x, self.dim_x)?;
    if let Some(ref init) = opts.init_states {
      if init.dim() != (self.dim_x, self.ensemble_count) {
        return Err(Error::config(format!("initial ensemble must be {}x{}, got {}x{}",
                                         self.dim_x, self.ensemble_count,
                                         init.dim().0, init.dim().1)));
      }
    }
    if z.iter().any(|v| !v.is_finite() ) {
      return Err(Error::config("observations contain non-finite values"));
    }
    Ok(())
  }

  /// Runs the filter over all of `z` (`T x dim_z`, one observation per row).
  pub fn batch_filter(&mut self, z: ArrayView<f64, Ix2>,
                      opts: FilterOptions) -> Result<FilterOutput> {
    self.validate(&z, &opts)?;

    // a new run invalidates whatever the previous one left behind
    self.history = None;
    self.smoothed = None;
    self.ll = None;

    let FilterOptions {
      init_states,
      seed,
      store,
      calc_ll,
      verbose,
    } = opts;

    let steps = z.nrows();
    let (dim_x, dim_z, n) = (self.dim_x, self.dim_z, self.ensemble_count);
    let dof = (n - 1) as f64;

    let mut rand = match seed.or(self.seed) {
      Some(seed) => Isaac64Rng::seed_from_u64(seed),
      None => Isaac64Rng::from_entropy(),
    };

    let zeros_z: Array<f64, Ix1> = Array::zeros(dim_z);
    let zeros_x: Array<f64, Ix1> = Array::zeros(dim_x);
    let mus = self.sampler.draw(zeros_z.view(), self.r.view(), steps * n, &mut rand)?;
    let epss = self.sampler.draw(zeros_x.view(), self.q.view(), steps * n, &mut rand)?;
    let mut x = match init_states {
      Some(init) => init,
      None => self.sampler.draw(self.x.view(), self.p.view(), n, &mut rand)?,
    };

    let mut history = if store { Some(History::new(steps, dim_x, n)) } else { None };
    let mut xs: Option<Array<f64, Ix3>> = if !store && !calc_ll {
      Some(Array::zeros((steps, dim_x, n)))
    } else {
      None
    };
    let mut ll = 0.0;

    for (step, zt) in z.outer_iter().enumerate() {
      let (lo, hi) = (step * n, (step + 1) * n);

      // predict
      x = ensemble::predict(x, epss.slice(s![.., lo..hi]), &self.transition, step)?;

      let y = self.observation.observe(x.view());
      if y.dim() != (dim_z, n) {
        return Err(Error::config(format!("step {}: observation function returned {}x{}, \
                                          expected {}x{}",
                                         step, y.dim().0, y.dim().1, dim_z, n)));
      }

      // update
      let x_bar = anomalies(&x);
      let y_bar = anomalies(&y);
      let s = y_bar.dot(&y_bar.t()) / dof + &self.r;

      let mut innovation = y.mapv(|v| -v );
      innovation += &zt.insert_axis(Axis(1));
      innovation -= &mus.slice(s![.., lo..hi]);

      let weights = solve_spd(&(&s * dof), &innovation)
        .map_err(|e| e.at_step(step))?;
      let gain = x_bar.dot(&y_bar.t());
      let posterior = &x + &gain.dot(&weights);
      if posterior.iter().any(|v| !v.is_finite() ) {
        return Err(Error::NumericalInstability {
          step: step,
          reason: "updated ensemble contains non-finite values".into(),
        });
      }

      if let Some(ref mut history) = history {
        history.record(step, x.view(), x_bar.view(),
                       posterior.view(), anomalies(&posterior).view());
      }

      if calc_ll {
        let z_mean = ensemble::mean(&y);
        let resid = &zt - &z_mean;
        ll += log_density(&resid, &zeros_z, &s)
          .map_err(|e| e.at_step(step))?;
      } else if let Some(ref mut xs) = xs {
        xs.index_axis_mut(Axis(0), step).assign(&posterior);
      }

      if verbose {
        let m = ensemble::mean(&posterior);
        debug!("step {}/{}: posterior mean {}, innovation spread {:.4e}",
               step + 1, steps, m, s.diag().sum());
      }

      x = posterior;
    }

    let ensembles = match (history.as_ref(), xs) {
      (Some(history), _) => Some(roll(&history.posteriors)),
      (None, Some(xs)) => Some(roll(&xs)),
      (None, None) => None,
    };
    let log_likelihood = if calc_ll { Some(ll) } else { None };

    match log_likelihood {
      Some(ll) => info!("TEnKF: {} steps, N = {}, log-likelihood {:.6}", steps, n, ll),
      None => info!("TEnKF: {} steps, N = {}", steps, n),
    }

    self.history = history;
    self.ll = log_likelihood;

    Ok(FilterOutput {
      ensembles: ensembles,
      log_likelihood: log_likelihood,
    })
  }

  /// Backward pass over the history of the last stored `batch_filter` run.
  ///
  /// Returns the smoothed ensembles rolled like the filter output
  /// (`N x T x dim_x`); the unrolled result stays available via `smoothed()`.
  pub fn rts_smoother(&mut self, rcond: f64) -> Result<Array<f64, Ix3>> {
    let smoothed = {
      let history = self.history
        .as_ref()
        .ok_or_else(|| Error::MissingState("rts_smoother needs a prior batch_filter \
                                            run with `store` enabled".into()) )?;
      rts::smooth(history, rcond)?
    };

    let rolled = roll(&smoothed);
    self.smoothed = Some(smoothed);
    Ok(rolled)
  }
}
