//! Reporting: terminal tables for selection decisions, scores and intervals.

pub mod format;

pub use format::*;
