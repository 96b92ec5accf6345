//! Fitting a single specification to a single response.
//!
//! Given:
//! - a [`DesignSpec`] (transform, `St` basis, main effects, interactions)
//! - a response column
//! - recoded training rows
//!
//! we build the design matrix, transform the response and solve either
//! ordinary least squares or ridge. The result is an immutable
//! [`FittedModel`]; refitting on another sample produces a new one.

use nalgebra::{DMatrix, DVector};

use crate::domain::{DesignSpec, FitMethod, RecodedObservation, Response, Transform};
use crate::error::{ModelError, Result};
use crate::math::{solve_least_squares, solve_ridge};
use crate::models::{DesignEncoder, StBasisFit, Term};

/// Columns with a population standard deviation below this are treated as
/// constant when standardizing for ridge.
const MIN_COLUMN_SD: f64 = 1e-12;

/// A specification fitted to one response.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedModel {
    pub response: Response,
    pub method: FitMethod,
    pub encoder: DesignEncoder,
    /// One per term, in `encoder.terms()` order.
    pub coefficients: Vec<f64>,
    /// Standard errors (OLS only; empty for ridge fits).
    pub std_errors: Vec<f64>,
    /// Transformed responses of the training rows.
    pub observed: Vec<f64>,
    /// Fitted values on the transformed scale.
    pub fitted: Vec<f64>,
    pub residuals: Vec<f64>,
    pub rss: f64,
    /// Estimated coefficients including the intercept (effective df for ridge).
    pub params: f64,
    /// `n - params`.
    pub df_residual: f64,
}

impl FittedModel {
    pub fn spec(&self) -> &DesignSpec {
        self.encoder.spec()
    }

    pub fn transform(&self) -> Transform {
        self.encoder.spec().transform
    }

    pub fn terms(&self) -> &[Term] {
        self.encoder.terms()
    }

    pub fn n(&self) -> usize {
        self.observed.len()
    }

    /// Residual variance estimate `RSS / df`; `NaN` without residual df.
    pub fn sigma2(&self) -> f64 {
        if self.df_residual > 0.0 {
            self.rss / self.df_residual
        } else {
            f64::NAN
        }
    }

    pub fn coefficient(&self, term: Term) -> Option<f64> {
        self.terms()
            .iter()
            .position(|t| *t == term)
            .map(|j| self.coefficients[j])
    }

    /// Coefficients of the fitted `St` polynomial on raw powers of `St`
    /// (index `j` multiplies `St^j`) at the reference levels.
    ///
    /// `None` for spline bases.
    pub fn st_raw_coefficients(&self) -> Option<Vec<f64>> {
        let StBasisFit::Polynomial(poly) = self.encoder.basis() else {
            return None;
        };
        let basis_coefs: Vec<f64> = (1..=poly.degree())
            .map(|k| self.coefficient(Term::St(k)).unwrap_or(0.0))
            .collect();
        Some(poly.raw_coefficients(&basis_coefs))
    }
}

/// Fit `spec` to `response` by ordinary least squares.
pub fn fit(spec: &DesignSpec, response: Response, rows: &[RecodedObservation]) -> Result<FittedModel> {
    let encoder = DesignEncoder::learn(spec, rows)?;
    let x = encoder.encode(rows)?;
    let y = response_vector(spec.transform, response, rows)?;

    let ls = solve_least_squares(&x, &y)?;
    let fitted = &x * &ls.beta;

    let n = rows.len();
    let p = x.ncols();
    let mut model = assemble(encoder, response, FitMethod::Ols, &ls.beta, &y, &fitted, p as f64);

    let sigma2 = model.sigma2();
    model.std_errors = (0..p)
        .map(|j| (sigma2 * ls.xtx_inv[(j, j)]).sqrt())
        .collect();

    tracing::trace!(spec = %spec, %response, n, p, rss = model.rss, "ols fit");
    Ok(model)
}

/// Fit `spec` to `response` by ridge regression with penalty `lambda`.
///
/// Non-intercept columns are standardized (population sd) and the response is
/// centred before penalizing, so the intercept is never shrunk; coefficients
/// are mapped back to the original column scale afterwards. The objective is
/// `RSS + lambda * ||b||²` in standardized coordinates.
pub fn fit_ridge(
    spec: &DesignSpec,
    response: Response,
    rows: &[RecodedObservation],
    lambda: f64,
) -> Result<FittedModel> {
    let encoder = DesignEncoder::learn(spec, rows)?;
    let x = encoder.encode(rows)?;
    let y = response_vector(spec.transform, response, rows)?;

    let n = x.nrows();
    let p = x.ncols();
    let n_f = n as f64;

    let mut means = vec![0.0; p];
    let mut sds = vec![1.0; p];
    let mut z = DMatrix::<f64>::zeros(n, p - 1);
    for j in 1..p {
        let col = x.column(j);
        let mean = col.sum() / n_f;
        let sd = (col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n_f).sqrt();
        if !(sd > MIN_COLUMN_SD) {
            return Err(ModelError::RankDeficiency(format!(
                "column {} is constant in the training rows",
                encoder.terms()[j]
            )));
        }
        means[j] = mean;
        sds[j] = sd;
        for i in 0..n {
            z[(i, j - 1)] = (x[(i, j)] - mean) / sd;
        }
    }

    let y_mean = y.sum() / n_f;
    let y_centred = y.map(|v| v - y_mean);
    let solution = solve_ridge(&z, &y_centred, lambda)?;

    let mut beta = DVector::<f64>::zeros(p);
    let mut intercept = y_mean;
    for j in 1..p {
        beta[j] = solution.beta[j - 1] / sds[j];
        intercept -= beta[j] * means[j];
    }
    beta[0] = intercept;

    let fitted = &x * &beta;
    let model = assemble(
        encoder,
        response,
        FitMethod::Ridge { lambda },
        &beta,
        &y,
        &fitted,
        solution.effective_df + 1.0,
    );

    tracing::trace!(spec = %spec, %response, lambda, edf = model.params, "ridge fit");
    Ok(model)
}

/// Dispatch on the estimation method.
pub fn fit_with(
    method: FitMethod,
    spec: &DesignSpec,
    response: Response,
    rows: &[RecodedObservation],
) -> Result<FittedModel> {
    match method {
        FitMethod::Ols => fit(spec, response, rows),
        FitMethod::Ridge { lambda } => fit_ridge(spec, response, rows, lambda),
    }
}

/// Transformed response values for `rows`.
pub fn response_vector(
    transform: Transform,
    response: Response,
    rows: &[RecodedObservation],
) -> Result<DVector<f64>> {
    let values = rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let y = row.obs.response(response).ok_or_else(|| {
                ModelError::InvalidSpecification(format!("row {i} carries no {response} value"))
            })?;
            transform.forward(y)
        })
        .collect::<Result<Vec<f64>>>()?;
    Ok(DVector::from_vec(values))
}

fn assemble(
    encoder: DesignEncoder,
    response: Response,
    method: FitMethod,
    beta: &DVector<f64>,
    y: &DVector<f64>,
    fitted: &DVector<f64>,
    params: f64,
) -> FittedModel {
    let residuals: Vec<f64> = y.iter().zip(fitted.iter()).map(|(a, b)| a - b).collect();
    let rss = residuals.iter().map(|r| r * r).sum::<f64>();
    FittedModel {
        response,
        method,
        encoder,
        coefficients: beta.iter().copied().collect(),
        std_errors: Vec::new(),
        observed: y.iter().copied().collect(),
        fitted: fitted.iter().copied().collect(),
        residuals,
        rss,
        params,
        df_residual: y.len() as f64 - params,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::toy_sample;
    use crate::domain::{Interaction, Observation, recode_all};

    fn toy_rows() -> Vec<RecodedObservation> {
        recode_all(&toy_sample(7, 0.01).unwrap()).unwrap()
    }

    #[test]
    fn fit_shapes_match_design() {
        let rows = toy_rows();
        let spec = DesignSpec::main_effects(Transform::Log);
        let model = fit(&spec, Response::Moment1, &rows).unwrap();

        assert_eq!(model.coefficients.len(), model.terms().len());
        assert_eq!(model.std_errors.len(), model.terms().len());
        assert_eq!(model.fitted.len(), rows.len());
        assert_eq!(model.residuals.len(), rows.len());
        assert_eq!(model.df_residual, (rows.len() - model.terms().len()) as f64);
        let rss: f64 = model.residuals.iter().map(|r| r * r).sum();
        assert_eq!(rss, model.rss);
    }

    #[test]
    fn log_linear_fit_recovers_st_slope() {
        let rows = toy_rows();
        let spec = DesignSpec::main_effects(Transform::Log);
        let model = fit(&spec, Response::Moment1, &rows).unwrap();
        let raw = model.st_raw_coefficients().unwrap();
        // Noise sd 0.01 over St in [0.2, 3] puts the slope standard error near 0.003.
        assert!((raw[1] - 0.1).abs() < 0.02, "slope {}", raw[1]);
    }

    #[test]
    fn log_of_non_positive_response_is_domain_error() {
        let mut obs = toy_sample(7, 0.01).unwrap();
        if let Some(m) = obs[3].moments.as_mut() {
            m[0] = 0.0;
        }
        let rows = recode_all(&obs).unwrap();
        let spec = DesignSpec::main_effects(Transform::Log);
        assert!(matches!(
            fit(&spec, Response::Moment1, &rows),
            Err(ModelError::Domain(_))
        ));
        assert!(fit(&spec.with_transform(Transform::Identity), Response::Moment1, &rows).is_ok());
    }

    #[test]
    fn empty_interaction_cell_is_rank_deficient() {
        let rows: Vec<_> = toy_rows()
            .into_iter()
            .filter(|r| !(r.obs.re > 300.0 && r.obs.fr.is_infinite()))
            .collect();
        let spec = DesignSpec::main_effects(Transform::Log).with_interaction(Interaction::GravityFlow);
        assert!(matches!(
            fit(&spec, Response::Moment1, &rows),
            Err(ModelError::RankDeficiency(_))
        ));
    }

    #[test]
    fn rows_without_responses_are_rejected() {
        let rows = recode_all(&[Observation::new(90.0, 0.3, 1.0, None)]).unwrap();
        let spec = DesignSpec::main_effects(Transform::Identity);
        assert!(matches!(
            fit(&spec, Response::Moment2, &rows),
            Err(ModelError::InvalidSpecification(_))
        ));
    }

    #[test]
    fn ridge_with_zero_penalty_matches_ols() {
        let rows = toy_rows();
        let spec = DesignSpec::main_effects(Transform::Log).with_degree(2);
        let ols = fit(&spec, Response::Moment2, &rows).unwrap();
        let ridge = fit_ridge(&spec, Response::Moment2, &rows, 0.0).unwrap();
        for (a, b) in ols.coefficients.iter().zip(&ridge.coefficients) {
            assert!((a - b).abs() < 1e-8, "{a} vs {b}");
        }
        assert!((ridge.params - ols.params).abs() < 1e-12);
    }

    #[test]
    fn ridge_penalty_shrinks_and_costs_fit() {
        let rows = toy_rows();
        let spec = DesignSpec::main_effects(Transform::Log);
        let light = fit_ridge(&spec, Response::Moment1, &rows, 1e-3).unwrap();
        let heavy = fit_ridge(&spec, Response::Moment1, &rows, 1e3).unwrap();
        let norm = |m: &FittedModel| m.coefficients[1..].iter().map(|c| c * c).sum::<f64>();
        assert!(norm(&heavy) < norm(&light));
        assert!(heavy.rss >= light.rss);
        assert!(heavy.params < light.params);
        assert!(heavy.std_errors.is_empty());
    }
}
