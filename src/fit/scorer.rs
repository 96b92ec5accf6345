//! Fit-quality criteria, cross-validation and nested-model F tests.
//!
//! Conventions:
//! - `p` counts every estimated coefficient including the intercept
//!   (effective degrees of freedom plus one for ridge).
//! - `AIC = n ln(RSS/n) + 2p`, `BIC = n ln(RSS/n) + p ln n`; the constant
//!   `n (1 + ln 2π)` is dropped, so only differences are meaningful.
//!   `RSS` enters unmodified at every scale; a perfect fit (`RSS = 0`) gives
//!   `-inf` for both criteria.
//! - Cross-validated and holdout MSE are on the original moment scale, so
//!   identity and log fits compare directly.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

use crate::domain::{DesignSpec, FitMethod, RecodedObservation, Response, ScoreRecord};
use crate::error::{ModelError, Result};
use crate::fit::fitter::{FittedModel, fit_with, response_vector};
use crate::models::{predict, predict_linear};

/// Score `model` on `rows` (normally its own training rows).
pub fn score(model: &FittedModel, rows: &[RecodedObservation]) -> Result<ScoreRecord> {
    let y = response_vector(model.transform(), model.response, rows)?;
    let eta = predict_linear(model, rows)?;
    let rss: f64 = y.iter().zip(&eta).map(|(a, b)| (a - b).powi(2)).sum();
    let n = rows.len();
    let mean = y.mean();
    let tss: f64 = y.iter().map(|v| (v - mean).powi(2)).sum();

    Ok(criteria(model.spec().id(), model.response, n, model.params, rss, tss))
}

/// Assemble a [`ScoreRecord`] from residual and total sums of squares.
pub fn criteria(
    spec_id: String,
    response: Response,
    n: usize,
    params: f64,
    rss: f64,
    tss: f64,
) -> ScoreRecord {
    let n_f = n as f64;
    let r_squared = if tss > 0.0 { 1.0 - rss / tss } else { f64::NAN };
    let df = n_f - params;
    let adj_r_squared = if df > 0.0 {
        1.0 - (1.0 - r_squared) * (n_f - 1.0) / df
    } else {
        f64::NAN
    };

    ScoreRecord {
        spec_id,
        response,
        n,
        params,
        rss,
        r_squared,
        adj_r_squared,
        aic: aic(n, rss, params),
        bic: bic(n, rss, params),
        mse: rss / n_f,
    }
}

pub fn aic(n: usize, rss: f64, params: f64) -> f64 {
    let n_f = n as f64;
    n_f * (rss / n_f).ln() + 2.0 * params
}

pub fn bic(n: usize, rss: f64, params: f64) -> f64 {
    let n_f = n as f64;
    n_f * (rss / n_f).ln() + params * n_f.ln()
}

/// Holdout error of one response model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldoutScore {
    pub response: Response,
    pub n: usize,
    pub mse: f64,
}

/// Mean squared prediction error of `model` on rows carrying responses,
/// on the original moment scale.
pub fn holdout_mse(model: &FittedModel, rows: &[RecodedObservation]) -> Result<f64> {
    if rows.is_empty() {
        return Err(ModelError::InvalidSpecification(
            "holdout set is empty".to_string(),
        ));
    }
    let observed = raw_responses(model.response, rows)?;
    let predicted = predict(model, rows)?;
    let sse: f64 = observed
        .iter()
        .zip(&predicted)
        .map(|(a, b)| (a - b).powi(2))
        .sum();
    Ok(sse / rows.len() as f64)
}

/// Fold index (`0..k`) for each of `n` rows.
///
/// Rows are shuffled with a `StdRng` seeded from `seed` and dealt round-robin,
/// so fold sizes differ by at most one and the assignment is a pure function
/// of `(n, k, seed)`.
pub fn fold_assignment(n: usize, k: usize, seed: u64) -> Result<Vec<usize>> {
    if k < 2 {
        return Err(ModelError::InvalidSpecification(format!(
            "cross-validation needs at least 2 folds, got {k}"
        )));
    }
    if k > n {
        return Err(ModelError::InvalidSpecification(format!(
            "{k} folds requested for {n} rows"
        )));
    }

    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let mut folds = vec![0; n];
    for (pos, &row) in order.iter().enumerate() {
        folds[row] = pos % k;
    }
    Ok(folds)
}

/// Result of a k-fold cross-validation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CvOutcome {
    /// Mean squared error over every held-out prediction.
    pub mse: f64,
    /// Fold index of each input row.
    pub folds: Vec<usize>,
}

/// k-fold cross-validated MSE of `spec` fitted with `method` to `response`.
///
/// Any failing fold aborts the run with [`ModelError::CrossValidation`]
/// naming the first failing fold.
pub fn cv_mse(
    spec: &DesignSpec,
    method: FitMethod,
    response: Response,
    rows: &[RecodedObservation],
    k: usize,
    seed: u64,
) -> Result<CvOutcome> {
    let folds = fold_assignment(rows.len(), k, seed)?;
    let observed = raw_responses(response, rows)?;

    let per_fold: Vec<Result<f64>> = (0..k)
        .into_par_iter()
        .map(|fold| {
            let train: Vec<RecodedObservation> = rows
                .iter()
                .zip(&folds)
                .filter(|&(_, &f)| f != fold)
                .map(|(r, _)| *r)
                .collect();
            let (held_rows, held_y): (Vec<RecodedObservation>, Vec<f64>) = rows
                .iter()
                .zip(&observed)
                .zip(&folds)
                .filter(|&(_, &f)| f == fold)
                .map(|((r, y), _)| (*r, *y))
                .unzip();

            let model = fit_with(method, spec, response, &train)?;
            let predicted = predict(&model, &held_rows)?;
            Ok(held_y
                .iter()
                .zip(&predicted)
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>())
        })
        .collect();

    let mut sse = 0.0;
    for (fold, result) in per_fold.into_iter().enumerate() {
        match result {
            Ok(v) => sse += v,
            Err(e) => {
                return Err(ModelError::CrossValidation {
                    fold,
                    source: Box::new(e),
                });
            }
        }
    }

    let mse = sse / rows.len() as f64;
    tracing::debug!(spec = %spec, %response, k, seed, mse, "cross-validation");
    Ok(CvOutcome { mse, folds })
}

/// One line of a sequential ANOVA table.
///
/// The first model has no predecessor, so its comparison fields are `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnovaRow {
    pub spec_id: String,
    pub df_residual: f64,
    pub rss: f64,
    pub df_diff: Option<f64>,
    pub ss_diff: Option<f64>,
    pub f_stat: Option<f64>,
    pub p_value: Option<f64>,
}

/// Compare each model in `models` with its predecessor.
///
/// Models must be OLS fits of the same response on the same rows, ordered by
/// strictly increasing parameter count, each term set containing the previous
/// one. The F denominator is the residual mean square of the largest model.
pub fn sequential_anova(models: &[FittedModel]) -> Result<Vec<AnovaRow>> {
    let Some(largest) = models.last() else {
        return Err(ModelError::InvalidSpecification(
            "sequential ANOVA needs at least one model".to_string(),
        ));
    };
    for (i, pair) in models.windows(2).enumerate() {
        check_nested(&pair[0], &pair[1], i, i + 1)?;
    }

    let scale = largest.sigma2();
    let df_scale = largest.df_residual;

    let mut rows = Vec::with_capacity(models.len());
    for (i, model) in models.iter().enumerate() {
        let mut row = AnovaRow {
            spec_id: model.spec().id(),
            df_residual: model.df_residual,
            rss: model.rss,
            df_diff: None,
            ss_diff: None,
            f_stat: None,
            p_value: None,
        };
        if i > 0 {
            let prev = &models[i - 1];
            let df_diff = prev.df_residual - model.df_residual;
            let ss_diff = prev.rss - model.rss;
            let (f_stat, p_value) = f_test(ss_diff, df_diff, scale, df_scale)?;
            row.df_diff = Some(df_diff);
            row.ss_diff = Some(ss_diff);
            row.f_stat = Some(f_stat);
            row.p_value = Some(p_value);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Two-model F test of `smaller` against `larger`: returns `(F, p)`.
pub fn compare_nested(smaller: &FittedModel, larger: &FittedModel) -> Result<(f64, f64)> {
    let table = sequential_anova(&[smaller.clone(), larger.clone()])?;
    match (table[1].f_stat, table[1].p_value) {
        (Some(f), Some(p)) => Ok((f, p)),
        _ => Err(ModelError::InvalidSpecification(
            "nested comparison produced no test".to_string(),
        )),
    }
}

fn f_test(ss_diff: f64, df_diff: f64, scale: f64, df_scale: f64) -> Result<(f64, f64)> {
    if !(df_scale > 0.0 && scale > 0.0) {
        return Err(ModelError::RankDeficiency(format!(
            "largest model leaves no residual variance (df = {df_scale})"
        )));
    }
    let f_stat = (ss_diff / df_diff).max(0.0) / scale;
    let dist = FisherSnedecor::new(df_diff, df_scale)
        .map_err(|e| ModelError::InvalidSpecification(format!("F distribution error: {e}")))?;
    Ok((f_stat, 1.0 - dist.cdf(f_stat)))
}

fn check_nested(a: &FittedModel, b: &FittedModel, earlier: usize, later: usize) -> Result<()> {
    let fail = |reason: String| {
        Err(ModelError::NonNestedModels {
            earlier,
            later,
            reason,
        })
    };

    if a.method != FitMethod::Ols || b.method != FitMethod::Ols {
        return fail("F tests need OLS fits".to_string());
    }
    if a.response != b.response {
        return fail(format!("responses differ ({} vs {})", a.response, b.response));
    }
    if a.observed != b.observed {
        return fail("models were fitted on different data".to_string());
    }
    if a.transform() != b.transform() {
        return fail("response transforms differ".to_string());
    }
    if a.spec().st_basis != b.spec().st_basis {
        return fail("St bases differ".to_string());
    }
    if !b.encoder.basis().spans(a.encoder.basis()) {
        return fail("St basis columns of the smaller model are not columns of the larger".to_string());
    }
    if let Some(term) = a.terms().iter().find(|t| !b.terms().contains(t)) {
        return fail(format!("term {term} of the smaller model is missing from the larger"));
    }
    if !(b.params > a.params) {
        return fail(format!(
            "parameter count does not increase ({} -> {})",
            a.params, b.params
        ));
    }
    Ok(())
}

fn raw_responses(response: Response, rows: &[RecodedObservation]) -> Result<Vec<f64>> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            row.obs.response(response).ok_or_else(|| {
                ModelError::InvalidSpecification(format!("row {i} carries no {response} value"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SampleConfig, generate_sample, toy_sample};
    use crate::domain::{Interaction, StBasis, Transform, recode_all};
    use crate::fit::fitter::fit;

    fn sample_rows() -> Vec<RecodedObservation> {
        recode_all(&generate_sample(&SampleConfig::default()).unwrap().train).unwrap()
    }

    #[test]
    fn score_matches_fitted_residuals() {
        let rows = sample_rows();
        let model = fit(&DesignSpec::main_effects(Transform::Log), Response::Moment2, &rows).unwrap();
        let rec = score(&model, &rows).unwrap();
        assert!((rec.rss - model.rss).abs() <= 1e-9 * model.rss);
        assert_eq!(rec.n, rows.len());
        assert_eq!(rec.params, 6.0);
        assert!(rec.r_squared > 0.0 && rec.r_squared <= 1.0);
        assert!(rec.adj_r_squared < rec.r_squared);
        assert!(rec.bic > rec.aic);
    }

    #[test]
    fn adjusted_r_squared_is_nan_without_residual_df() {
        let rec = criteria("m".to_string(), Response::Moment1, 5, 5.0, 1.0, 10.0);
        assert!(rec.adj_r_squared.is_nan());
        assert!((rec.r_squared - 0.9).abs() < 1e-12);
    }

    #[test]
    fn fold_assignment_is_balanced_and_seeded() {
        let a = fold_assignment(23, 5, 9).unwrap();
        let b = fold_assignment(23, 5, 9).unwrap();
        assert_eq!(a, b);
        for f in 0..5 {
            let size = a.iter().filter(|&&v| v == f).count();
            assert!(size == 4 || size == 5);
        }
        assert_ne!(a, fold_assignment(23, 5, 10).unwrap());
        assert!(fold_assignment(3, 1, 0).is_err());
        assert!(fold_assignment(3, 4, 0).is_err());
    }

    #[test]
    fn cv_is_reproducible() {
        let rows = sample_rows();
        let spec = DesignSpec::main_effects(Transform::Log).with_degree(2);
        let a = cv_mse(&spec, FitMethod::Ols, Response::Moment1, &rows, 5, 3).unwrap();
        let b = cv_mse(&spec, FitMethod::Ols, Response::Moment1, &rows, 5, 3).unwrap();
        assert_eq!(a.folds, b.folds);
        assert_eq!(a.mse.to_bits(), b.mse.to_bits());
        assert!(a.mse > 0.0);
    }

    #[test]
    fn cv_fold_failure_aborts_run() {
        // Leave a single row in the (high, high) cell: whichever fold holds it
        // out trains without that gravity:flow column.
        let mut obs = toy_sample(3, 0.01).unwrap();
        let lone = obs
            .iter()
            .position(|o| o.re > 300.0 && o.fr.is_infinite())
            .unwrap();
        obs.remove(lone);
        let rows = recode_all(&obs).unwrap();
        let spec = DesignSpec::main_effects(Transform::Log).with_interaction(Interaction::GravityFlow);
        let err = cv_mse(&spec, FitMethod::Ols, Response::Moment1, &rows, 9, 1).unwrap_err();
        assert!(matches!(err, ModelError::CrossValidation { .. }));
    }

    #[test]
    fn anova_detects_needed_curvature() {
        let rows = sample_rows();
        let base = DesignSpec::main_effects(Transform::Log);
        let models: Vec<_> = (1..=3)
            .map(|d| fit(&base.clone().with_degree(d), Response::Moment1, &rows).unwrap())
            .collect();
        let table = sequential_anova(&models).unwrap();
        assert_eq!(table.len(), 3);
        assert!(table[0].f_stat.is_none());
        assert!(table[1].p_value.unwrap() < 0.01);
        assert!(table.windows(2).all(|w| w[1].rss <= w[0].rss + 1e-12));
    }

    #[test]
    fn anova_rejects_non_nested_pairs() {
        let rows = sample_rows();
        let base = DesignSpec::main_effects(Transform::Log);
        let a = fit(&base.clone().with_interaction(Interaction::StFlow), Response::Moment1, &rows).unwrap();
        let b = fit(&base.clone().with_interaction(Interaction::StGravity), Response::Moment1, &rows).unwrap();
        assert!(matches!(
            sequential_anova(&[a, b]),
            Err(ModelError::NonNestedModels { earlier: 0, later: 1, .. })
        ));

        let log = fit(&base, Response::Moment1, &rows).unwrap();
        let ident = fit(&base.clone().with_transform(Transform::Identity).with_degree(2), Response::Moment1, &rows)
            .unwrap();
        assert!(compare_nested(&log, &ident).is_err());
    }

    #[test]
    fn anova_rejects_splines_with_different_knots() {
        let rows = sample_rows();
        let spline = DesignSpec::main_effects(Transform::Log).with_basis(StBasis::NaturalSpline);
        let small = fit(&spline.clone().with_degree(3), Response::Moment1, &rows).unwrap();
        let large = fit(&spline.clone().with_degree(4), Response::Moment1, &rows).unwrap();
        assert!(matches!(
            sequential_anova(&[small.clone(), large]),
            Err(ModelError::NonNestedModels { earlier: 0, later: 1, .. })
        ));

        // Same knots, extra terms: a genuine nesting.
        let wider = fit(
            &spline.with_degree(3).with_interaction(Interaction::GravityFlow),
            Response::Moment1,
            &rows,
        )
        .unwrap();
        assert!(compare_nested(&small, &wider).is_ok());
    }

    #[test]
    fn criteria_use_the_unfloored_rss() {
        let rec = criteria("m".to_string(), Response::Moment1, 20, 3.0, 2e-13, 1.0);
        let expected_aic = 20.0 * (2e-13f64 / 20.0).ln() + 6.0;
        let expected_bic = 20.0 * (2e-13f64 / 20.0).ln() + 3.0 * 20f64.ln();
        assert!((rec.aic - expected_aic).abs() < 1e-9);
        assert!((rec.bic - expected_bic).abs() < 1e-9);
        assert!(rec.aic < -600.0);

        let perfect = criteria("m".to_string(), Response::Moment1, 20, 3.0, 0.0, 1.0);
        assert_eq!(perfect.aic, f64::NEG_INFINITY);
        assert_eq!(perfect.bic, f64::NEG_INFINITY);
    }

    #[test]
    fn holdout_mse_is_on_original_scale() {
        let rows = sample_rows();
        let model = fit(&DesignSpec::main_effects(Transform::Log), Response::Moment1, &rows).unwrap();
        let mse = holdout_mse(&model, &rows).unwrap();
        let pred = predict(&model, &rows).unwrap();
        let expected: f64 = rows
            .iter()
            .zip(&pred)
            .map(|(r, p)| (r.obs.moments.unwrap()[0] - p).powi(2))
            .sum::<f64>()
            / rows.len() as f64;
        assert!((mse - expected).abs() < 1e-12);
    }
}
