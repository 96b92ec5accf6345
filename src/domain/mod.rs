//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - observations and their recoded form (`Observation`, `RecodedObservation`)
//! - model descriptions (`DesignSpec`, `Transform`, `Interaction`, `FitMethod`)
//! - fit outputs and settings (`ScoreRecord`, `SelectionConfig`)
//! - the categorical recoder (`recode`)

pub mod recode;
pub mod types;

pub use recode::*;
pub use types::*;
