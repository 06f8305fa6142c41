pub mod additive;
pub mod beaver;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShareError {
    #[error("a secret cannot be split among zero parties")]
    NoParties,
    #[error("mismatched share vector lengths")]
    LengthMismatch,
}
