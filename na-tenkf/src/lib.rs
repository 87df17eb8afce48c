//! Transposed ensemble Kalman filtering and RTS-style ensemble smoothing
//! for nonlinear, stochastic state-space models.

extern crate ndarray as nd;
#[macro_use]
extern crate log;

pub use na_core::{Error, Result, Transition, Observation, Linear};

pub use history::{History, StateSteps};
pub use kalman::rts::DEFAULT_RCOND;
pub use kalman::tenkf::{FilterOptions, FilterOutput, Setup, TEnKF};
pub use sampler::{Rule, Sampler};

pub mod ensemble;
pub mod history;
pub mod kalman;
pub mod sampler;
