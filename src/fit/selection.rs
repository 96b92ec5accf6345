//! Specification search shared across the four moment responses.
//!
//! Policy:
//! 1. Transform vote: main effects, degree 1, identity vs natural log. Log
//!    wins a response when it strictly increases adjusted R²; log is chosen
//!    when it wins at least half of the responses (a tie goes to log).
//! 2. Interactions: each of `St:gravity`, `St:flow`, `gravity:flow` is added
//!    alone to the main-effects base and F-tested at `alpha`. A term is kept
//!    when it is significant for at least half of the responses.
//! 3. Degree: sequential ANOVA over degrees `1..=D` with the kept
//!    interactions. Each response stops at the first non-significant step;
//!    the shared degree is the minimum over responses.
//! 4. The resulting single spec is fitted independently to every response.
//!
//! Optionally, ridge and natural-spline fits of the final terms are scored by
//! cross-validation next to the OLS polynomial fit. They are reported only.

use rayon::prelude::*;
use serde::Serialize;

use crate::domain::{
    DesignSpec, FitMethod, Interaction, RecodedObservation, Response, ScoreRecord, SelectionConfig,
    StBasis, Transform,
};
use crate::error::{ModelError, Result};
use crate::fit::fitter::{FittedModel, fit};
use crate::fit::lambda_grid::log_space;
use crate::fit::scorer::{AnovaRow, compare_nested, cv_mse, score, sequential_anova};

/// Adjusted R² of both transforms for one response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformVote {
    pub response: Response,
    pub identity_adj_r_squared: f64,
    pub log_adj_r_squared: f64,
    pub log_wins: bool,
}

/// F test of one interaction for one response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionTest {
    pub interaction: Interaction,
    pub response: Response,
    /// `None` when the extended model could not be fitted.
    pub f_stat: Option<f64>,
    pub p_value: Option<f64>,
    pub significant: bool,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionDecision {
    pub interaction: Interaction,
    pub significant_responses: usize,
    pub tested_responses: usize,
    pub retained: bool,
}

/// Degree search for one response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegreeAnalysis {
    pub response: Response,
    /// Highest degree that could be fitted (row `i` of `anova` is degree `i + 1`).
    pub max_fitted: usize,
    pub anova: Vec<AnovaRow>,
    /// Degree this response alone would choose.
    pub selected: usize,
}

/// Cross-validated ridge penalty search for one response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RidgeSearch {
    pub response: Response,
    pub lambdas: Vec<f64>,
    pub cv_mse: Vec<f64>,
    pub best_lambda: f64,
    pub best_mse: f64,
}

/// Model families compared after selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    OlsPolynomial,
    Ridge,
    NaturalSpline,
}

impl Family {
    pub fn label(self) -> &'static str {
        match self {
            Family::OlsPolynomial => "OLS polynomial",
            Family::Ridge => "ridge",
            Family::NaturalSpline => "natural spline",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FamilyScore {
    pub family: Family,
    pub spec_id: String,
    /// `None` when cross-validation failed; see `note`.
    pub cv_mse: Option<f64>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FamilyComparison {
    pub response: Response,
    pub scores: Vec<FamilyScore>,
    pub ridge: Option<RidgeSearch>,
}

/// Everything the selector decided, plus the final per-response fits.
#[derive(Debug, Clone)]
pub struct Selection {
    pub transform: Transform,
    pub votes: Vec<TransformVote>,
    pub interaction_tests: Vec<InteractionTest>,
    pub interactions: Vec<InteractionDecision>,
    pub degrees: Vec<DegreeAnalysis>,
    pub shared_degree: usize,
    /// The one specification fitted to every response.
    pub spec: DesignSpec,
    /// One OLS fit per response, in input order.
    pub models: Vec<FittedModel>,
    pub scores: Vec<ScoreRecord>,
    pub families: Vec<FamilyComparison>,
}

/// Run the selection policy over all four moments.
pub fn select(rows: &[RecodedObservation], config: &SelectionConfig) -> Result<Selection> {
    select_for(rows, &Response::ALL, config)
}

/// Run the selection policy over `responses`.
pub fn select_for(
    rows: &[RecodedObservation],
    responses: &[Response],
    config: &SelectionConfig,
) -> Result<Selection> {
    config.validate()?;
    if responses.is_empty() {
        return Err(ModelError::InvalidSpecification(
            "no responses to model".to_string(),
        ));
    }
    if rows.is_empty() {
        return Err(ModelError::InvalidSpecification(
            "no training rows".to_string(),
        ));
    }
    let lambdas = if config.compare_families {
        log_space(config.lambda_min, config.lambda_max, config.lambda_steps)?
    } else {
        Vec::new()
    };

    // 1) Transform.
    let votes = responses
        .par_iter()
        .map(|&r| vote_transform(r, rows))
        .collect::<Result<Vec<_>>>()?;
    let transform = choose_transform(&votes);
    tracing::info!(
        log_wins = votes.iter().filter(|v| v.log_wins).count(),
        responses = votes.len(),
        transform = transform.label(),
        "transform selected"
    );

    // 2) Interactions.
    let base = DesignSpec::main_effects(transform);
    let interaction_tests = test_interactions(&base, responses, rows, config.alpha)?;
    let interactions = decide_interactions(&interaction_tests);
    let mut spec = base;
    for decision in &interactions {
        tracing::info!(
            interaction = decision.interaction.label(),
            significant = decision.significant_responses,
            tested = decision.tested_responses,
            retained = decision.retained,
            "interaction decision"
        );
        if decision.retained {
            spec = spec.with_interaction(decision.interaction);
        }
    }

    // 3) Degree.
    let max_degree = max_feasible_degree(rows, config.max_degree)?;
    let degrees = responses
        .par_iter()
        .map(|&r| analyse_degree(&spec, r, rows, max_degree, config.alpha))
        .collect::<Result<Vec<_>>>()?;
    let shared_degree = degrees.iter().map(|d| d.selected).min().unwrap_or(1);
    let spec = spec.with_degree(shared_degree);
    tracing::info!(
        per_response = ?degrees.iter().map(|d| d.selected).collect::<Vec<_>>(),
        shared_degree,
        "degree selected"
    );

    // 4) Final fits.
    let models = responses
        .par_iter()
        .map(|&r| fit(&spec, r, rows))
        .collect::<Result<Vec<_>>>()?;
    let scores = models
        .iter()
        .map(|m| score(m, rows))
        .collect::<Result<Vec<_>>>()?;
    tracing::info!(spec = %spec, "final specification");

    let families = if config.compare_families {
        responses
            .par_iter()
            .map(|&r| compare_families(&spec, r, rows, &lambdas, config))
            .collect()
    } else {
        Vec::new()
    };

    Ok(Selection {
        transform,
        votes,
        interaction_tests,
        interactions,
        degrees,
        shared_degree,
        spec,
        models,
        scores,
        families,
    })
}

/// Log when it wins at least half of the votes.
pub fn choose_transform(votes: &[TransformVote]) -> Transform {
    let wins = votes.iter().filter(|v| v.log_wins).count();
    if 2 * wins >= votes.len() {
        Transform::Log
    } else {
        Transform::Identity
    }
}

/// Highest polynomial degree worth trying: `max_degree` capped at the number
/// of distinct `St` values minus one.
pub fn max_feasible_degree(rows: &[RecodedObservation], max_degree: usize) -> Result<usize> {
    let mut st: Vec<f64> = rows.iter().map(|r| r.obs.st).collect();
    st.sort_by(|a, b| a.total_cmp(b));
    st.dedup();
    if st.len() < 2 {
        return Err(ModelError::RankDeficiency(
            "St takes a single value in the training rows".to_string(),
        ));
    }
    let cap = st.len() - 1;
    if cap < max_degree {
        tracing::warn!(max_degree, distinct_st = st.len(), cap, "degree search capped");
    }
    Ok(max_degree.min(cap))
}

/// Fit the identity and log main-effects models for `response`.
pub fn vote_transform(response: Response, rows: &[RecodedObservation]) -> Result<TransformVote> {
    let identity_spec = DesignSpec::main_effects(Transform::Identity);
    let log_spec = DesignSpec::main_effects(Transform::Log);
    let identity = score(&fit(&identity_spec, response, rows)?, rows)?;
    let log = score(&fit(&log_spec, response, rows)?, rows)?;
    Ok(TransformVote {
        response,
        identity_adj_r_squared: identity.adj_r_squared,
        log_adj_r_squared: log.adj_r_squared,
        log_wins: log.adj_r_squared > identity.adj_r_squared,
    })
}

fn test_interactions(
    base: &DesignSpec,
    responses: &[Response],
    rows: &[RecodedObservation],
    alpha: f64,
) -> Result<Vec<InteractionTest>> {
    let per_response = responses
        .par_iter()
        .map(|&response| {
            let base_model = fit(base, response, rows)?;
            Interaction::ALL
                .iter()
                .map(|&interaction| {
                    let extended = base.clone().with_interaction(interaction);
                    match fit(&extended, response, rows) {
                        Ok(model) => {
                            let (f_stat, p_value) = compare_nested(&base_model, &model)?;
                            Ok(InteractionTest {
                                interaction,
                                response,
                                f_stat: Some(f_stat),
                                p_value: Some(p_value),
                                significant: p_value < alpha,
                                note: None,
                            })
                        }
                        Err(ModelError::RankDeficiency(reason)) => {
                            tracing::warn!(
                                interaction = interaction.label(),
                                %response,
                                %reason,
                                "interaction cannot be estimated"
                            );
                            Ok(InteractionTest {
                                interaction,
                                response,
                                f_stat: None,
                                p_value: None,
                                significant: false,
                                note: Some(reason),
                            })
                        }
                        Err(e) => Err(e),
                    }
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    // Interaction-major order.
    let mut tests: Vec<InteractionTest> = per_response.into_iter().flatten().collect();
    tests.sort_by_key(|t| t.interaction);
    Ok(tests)
}

fn decide_interactions(tests: &[InteractionTest]) -> Vec<InteractionDecision> {
    Interaction::ALL
        .iter()
        .map(|&interaction| {
            let relevant: Vec<_> = tests
                .iter()
                .filter(|t| t.interaction == interaction && t.p_value.is_some())
                .collect();
            let significant = relevant.iter().filter(|t| t.significant).count();
            InteractionDecision {
                interaction,
                significant_responses: significant,
                tested_responses: relevant.len(),
                retained: significant > 0 && 2 * significant >= relevant.len(),
            }
        })
        .collect()
}

/// Sequential ANOVA over degrees `1..=max_degree` for one response.
///
/// Degrees whose design is rank deficient or leaves no residual degrees of
/// freedom end the sequence early.
pub fn analyse_degree(
    spec: &DesignSpec,
    response: Response,
    rows: &[RecodedObservation],
    max_degree: usize,
    alpha: f64,
) -> Result<DegreeAnalysis> {
    let mut models = Vec::with_capacity(max_degree);
    for degree in 1..=max_degree {
        match fit(&spec.clone().with_degree(degree), response, rows) {
            Ok(model) if model.df_residual >= 1.0 => models.push(model),
            Ok(_) => {
                tracing::warn!(%response, degree, "no residual degrees of freedom left; degree search stops");
                break;
            }
            Err(ModelError::RankDeficiency(reason)) if degree > 1 => {
                tracing::warn!(%response, degree, %reason, "degree search stops");
                break;
            }
            Err(e) => return Err(e),
        }
    }
    if models.is_empty() {
        return Err(ModelError::RankDeficiency(format!(
            "{} leaves no residual degrees of freedom for {response}",
            spec
        )));
    }

    let anova = sequential_anova(&models)?;
    let mut selected = 1;
    for (i, row) in anova.iter().enumerate().skip(1) {
        match row.p_value {
            Some(p) if p < alpha => selected = i + 1,
            _ => break,
        }
    }
    tracing::debug!(%response, max_fitted = models.len(), selected, "degree analysis");

    Ok(DegreeAnalysis {
        response,
        max_fitted: models.len(),
        anova,
        selected,
    })
}

/// Cross-validated MSE for every penalty in `lambdas`, on shared folds.
pub fn ridge_search(
    spec: &DesignSpec,
    response: Response,
    rows: &[RecodedObservation],
    lambdas: &[f64],
    folds: usize,
    seed: u64,
) -> Result<RidgeSearch> {
    let cv = lambdas
        .par_iter()
        .map(|&lambda| {
            cv_mse(spec, FitMethod::Ridge { lambda }, response, rows, folds, seed).map(|o| o.mse)
        })
        .collect::<Result<Vec<f64>>>()?;

    let (best_lambda, best_mse) = best_penalty(lambdas, &cv)?;
    tracing::info!(%response, best_lambda, best_mse, "ridge penalty selected");

    Ok(RidgeSearch {
        response,
        lambdas: lambdas.to_vec(),
        cv_mse: cv,
        best_lambda,
        best_mse,
    })
}

/// Penalty with the smallest finite CV MSE.
fn best_penalty(lambdas: &[f64], cv: &[f64]) -> Result<(f64, f64)> {
    if lambdas.is_empty() {
        return Err(ModelError::InvalidSpecification("empty lambda grid".to_string()));
    }
    lambdas
        .iter()
        .zip(cv)
        .filter(|(_, mse)| mse.is_finite())
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(&lambda, &mse)| (lambda, mse))
        .ok_or_else(|| {
            ModelError::Domain(format!(
                "ridge cross-validation produced no finite MSE over {} penalties",
                lambdas.len()
            ))
        })
}

fn compare_families(
    spec: &DesignSpec,
    response: Response,
    rows: &[RecodedObservation],
    lambdas: &[f64],
    config: &SelectionConfig,
) -> FamilyComparison {
    let ols = cv_mse(spec, FitMethod::Ols, response, rows, config.folds, config.seed).map(|o| o.mse);
    let ridge = ridge_search(spec, response, rows, lambdas, config.folds, config.seed);
    let spline_spec = spec.clone().with_basis(StBasis::NaturalSpline);
    let spline =
        cv_mse(&spline_spec, FitMethod::Ols, response, rows, config.folds, config.seed).map(|o| o.mse);

    let ridge_mse = ridge.as_ref().map(|r| r.best_mse).map_err(Clone::clone);
    let scores = vec![
        family_score(Family::OlsPolynomial, spec, response, ols),
        family_score(Family::Ridge, spec, response, ridge_mse),
        family_score(Family::NaturalSpline, &spline_spec, response, spline),
    ];

    FamilyComparison {
        response,
        scores,
        ridge: ridge.ok(),
    }
}

fn family_score(family: Family, spec: &DesignSpec, response: Response, result: Result<f64>) -> FamilyScore {
    match result {
        Ok(mse) => FamilyScore {
            family,
            spec_id: spec.id(),
            cv_mse: Some(mse),
            note: None,
        },
        Err(e) => {
            tracing::warn!(family = family.label(), %response, error = %e, "family comparison failed");
            FamilyScore {
                family,
                spec_id: spec.id(),
                cv_mse: None,
                note: Some(e.to_string()),
            }
        }
    }
}
