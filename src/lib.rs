//! `cluster-moments` library crate.
//!
//! The binary (`cmom`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the recoder, fitter, scorer, selector and predictor are reusable on
//!   their own (notebooks, other front-ends)

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
