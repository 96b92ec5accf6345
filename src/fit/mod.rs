//! Fitting, scoring and specification search.
//!
//! Responsibilities:
//!
//! - fit a design spec to one response (OLS or ridge)
//! - score fits (adjusted R², AIC/BIC, cross-validated MSE, nested F tests)
//! - drive the shared-specification search over all responses (parallel)

pub mod fitter;
pub mod lambda_grid;
pub mod scorer;
pub mod selection;

pub use fitter::*;
pub use lambda_grid::*;
pub use scorer::*;
pub use selection::*;
