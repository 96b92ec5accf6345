//! Prediction and coefficient inference for fitted models.

use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::domain::{FitMethod, RecodedObservation, Response};
use crate::error::{ModelError, Result};
use crate::fit::FittedModel;
use crate::models::Term;

/// Linear predictor on the fitting (transformed) scale.
///
/// Rows whose categorical levels were absent from the training rows are
/// rejected with [`ModelError::UnseenLevel`].
pub fn predict_linear(model: &FittedModel, rows: &[RecodedObservation]) -> Result<Vec<f64>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let x = model.encoder.encode(rows)?;
    Ok(x.row_iter()
        .map(|r| r.iter().zip(&model.coefficients).map(|(a, b)| a * b).sum::<f64>())
        .collect())
}

/// Predictions on the original moment scale (`exp` undoes a log fit).
pub fn predict(model: &FittedModel, rows: &[RecodedObservation]) -> Result<Vec<f64>> {
    let transform = model.transform();
    let eta = predict_linear(model, rows)?;
    Ok(eta.into_iter().map(|v| transform.inverse(v)).collect())
}

/// Confidence interval for one coefficient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoefficientInterval {
    pub term: Term,
    /// Display name of `term`.
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    pub low: f64,
    pub high: f64,
}

/// Interval table of one response model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseIntervals {
    pub response: Response,
    pub intervals: Vec<CoefficientInterval>,
}

/// t-based intervals `estimate ± t_{(1+level)/2, df} · se` for every
/// coefficient of an OLS model.
pub fn confidence_intervals(model: &FittedModel, level: f64) -> Result<Vec<CoefficientInterval>> {
    if !(level > 0.0 && level < 1.0) {
        return Err(ModelError::InvalidSpecification(format!(
            "confidence level must lie in (0, 1), got {level}"
        )));
    }
    if let FitMethod::Ridge { lambda } = model.method {
        return Err(ModelError::InvalidSpecification(format!(
            "t intervals are undefined for a ridge fit (lambda = {lambda})"
        )));
    }
    if !(model.df_residual > 0.0) {
        return Err(ModelError::InvalidSpecification(format!(
            "no residual degrees of freedom for {} ({} rows, {} coefficients)",
            model.spec(),
            model.n(),
            model.params
        )));
    }

    let t = StudentsT::new(0.0, 1.0, model.df_residual)
        .map_err(|e| ModelError::InvalidSpecification(format!("t distribution error: {e}")))?;
    let q = t.inverse_cdf(0.5 + level / 2.0);

    Ok(model
        .terms()
        .iter()
        .zip(model.coefficients.iter().zip(&model.std_errors))
        .map(|(term, (&estimate, &std_error))| CoefficientInterval {
            term: *term,
            name: term.to_string(),
            estimate,
            std_error,
            low: estimate - q * std_error,
            high: estimate + q * std_error,
        })
        .collect())
}
