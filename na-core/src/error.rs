
use thiserror::Error;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
  /// Shapes or sizes that don't agree with each other.
  #[error("configuration error: {0}")]
  Configuration(String),

  /// A factorization hit a (near) zero pivot or produced non-finite values.
  #[error("numerical instability at step {step}: {reason}")]
  NumericalInstability {
    step: usize,
    reason: String,
  },

  /// Something that must have been computed earlier wasn't.
  #[error("missing state: {0}")]
  MissingState(String),

  #[error("unsupported sampling rule `{0}`")]
  UnsupportedRule(char),
}

impl Error {
  pub fn config<S: Into<String>>(msg: S) -> Error {
    Error::Configuration(msg.into())
  }

  /// Attach the filter step to an instability raised by a step-agnostic helper.
  pub fn at_step(self, step: usize) -> Error {
    match self {
      Error::NumericalInstability { reason, .. } => {
        Error::NumericalInstability { step, reason }
      },
      other => other,
    }
  }
}
