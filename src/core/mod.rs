//! Core constants, errors, and shared primitives.

pub mod constants;
mod error;
mod sequence;

pub use error::*;
pub use sequence::SequenceCounter;
