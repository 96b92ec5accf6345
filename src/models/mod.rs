//! Design matrices and prediction.
//!
//! The fitter and predictor both go through a [`DesignEncoder`] learned on the
//! training rows, so new rows are always encoded in the training basis.

pub mod design;
pub mod predict;

pub use design::*;
pub use predict::*;
