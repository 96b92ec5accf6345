//! Mathematical utilities: `St` basis expansions and least squares solvers.

pub mod basis;
pub mod ols;

pub use basis::*;
pub use ols::*;
