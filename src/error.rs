use thiserror::Error;

/// Errors surfaced by parameter construction, key-set validation and the
/// bootstrap pipeline. All of them are fatal for the operation that raised
/// them; the only remedy is to reparametrize.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("invalid parameters: {0}")]
    Setup(String),

    #[error("missing switching key for {0}")]
    MissingKey(String),

    #[error("ciphertext at level {have}, operation requires level {need}")]
    LevelUnderflow { have: usize, need: usize },

    #[error("scale mismatch: {0}")]
    ScaleMismatch(String),

    #[error("sine degree {deg} cannot interpolate over [-{k}, {k}]; require deg >= 2K - 1")]
    PolynomialDegreeInfeasible { deg: usize, k: usize },
}

pub type Result<T> = core::result::Result<T, Error>;
