//! Categorical recoding of `Fr` and `Re`.
//!
//! Both predictors only take a handful of values in the simulation campaign,
//! so they enter the models as ordinal factors:
//!
//! - gravity: `Fr < 0.1` low, `0.1 < Fr < 1` moderate, `Fr > 1` high
//! - flow:    `Re < 100` low, `100 < Re < 300` moderate, `Re > 300` high
//!
//! Boundary policy: the bands are open on both sides, so `Fr ∈ {0.1, 1}` and
//! `Re ∈ {100, 300}` belong to no band and are rejected with
//! [`ModelError::UnclassifiedBoundary`]. `NaN` is a domain error. `Fr = +inf`
//! (no gravity) is high.

use crate::domain::{Flow, Gravity, Observation, RecodedObservation};
use crate::error::{ModelError, Result};

const FR_LOW_UPPER: f64 = 0.1;
const FR_MODERATE_UPPER: f64 = 1.0;
const RE_LOW_UPPER: f64 = 100.0;
const RE_MODERATE_UPPER: f64 = 300.0;

/// Gravity regime for a Froude number.
pub fn gravity_of(fr: f64) -> Result<Gravity> {
    classify(fr, "Fr", FR_LOW_UPPER, FR_MODERATE_UPPER).map(|band| match band {
        Band::Low => Gravity::Low,
        Band::Moderate => Gravity::Moderate,
        Band::High => Gravity::High,
    })
}

/// Flow regime for a Reynolds number.
pub fn flow_of(re: f64) -> Result<Flow> {
    classify(re, "Re", RE_LOW_UPPER, RE_MODERATE_UPPER).map(|band| match band {
        Band::Low => Flow::Low,
        Band::Moderate => Flow::Moderate,
        Band::High => Flow::High,
    })
}

/// Attach gravity and flow regimes to one observation.
pub fn recode(obs: &Observation) -> Result<RecodedObservation> {
    Ok(RecodedObservation {
        obs: *obs,
        gravity: gravity_of(obs.fr)?,
        flow: flow_of(obs.re)?,
    })
}

/// Recode a whole table into a new one; the input is left untouched.
pub fn recode_all(rows: &[Observation]) -> Result<Vec<RecodedObservation>> {
    let out = rows.iter().map(recode).collect::<Result<Vec<_>>>()?;
    tracing::debug!(rows = out.len(), "recoded observations");
    Ok(out)
}

enum Band {
    Low,
    Moderate,
    High,
}

fn classify(value: f64, predictor: &'static str, low_upper: f64, moderate_upper: f64) -> Result<Band> {
    if value.is_nan() {
        return Err(ModelError::Domain(format!("{predictor} is NaN")));
    }
    if value < low_upper {
        Ok(Band::Low)
    } else if value > low_upper && value < moderate_upper {
        Ok(Band::Moderate)
    } else if value > moderate_upper {
        Ok(Band::High)
    } else {
        Err(ModelError::UnclassifiedBoundary { predictor, value })
    }
}
