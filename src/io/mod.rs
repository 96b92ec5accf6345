//! Input/output helpers.
//!
//! - CSV ingest + validation (`ingest`)
//! - prediction and interval exports (`export`)
//! - JSON selection summary (`summary`)

pub mod export;
pub mod ingest;
pub mod summary;

pub use export::*;
pub use ingest::*;
pub use summary::*;
