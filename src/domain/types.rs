//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting and selection
//! - exported to JSON/CSV
//! - passed between pipeline stages as immutable snapshots

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// One simulation run: three predictors and (for training rows) four raw moments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Reynolds number.
    pub re: f64,
    /// Froude number (gravitational acceleration parameter); may be `+inf`.
    pub fr: f64,
    /// Stokes number.
    pub st: f64,
    /// `R_moment_1..R_moment_4`; absent on prediction rows.
    pub moments: Option<[f64; 4]>,
}

impl Observation {
    pub fn new(re: f64, fr: f64, st: f64, moments: Option<[f64; 4]>) -> Self {
        Self { re, fr, st, moments }
    }

    /// Observed value of `response`, if this row carries responses.
    pub fn response(&self, response: Response) -> Option<f64> {
        self.moments.map(|m| m[response.index()])
    }
}

/// Gravity regime derived from `Fr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gravity {
    Low,
    Moderate,
    High,
}

/// Flow regime derived from `Re`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    Low,
    Moderate,
    High,
}

impl Gravity {
    pub fn label(self) -> &'static str {
        match self {
            Gravity::Low => "low",
            Gravity::Moderate => "moderate",
            Gravity::High => "high",
        }
    }
}

impl Flow {
    pub fn label(self) -> &'static str {
        match self {
            Flow::Low => "low",
            Flow::Moderate => "moderate",
            Flow::High => "high",
        }
    }
}

/// An observation augmented with its categorical regimes.
///
/// Produced only by [`crate::domain::recode`]; the fitter and predictor accept
/// nothing else, so un-recoded rows cannot reach a design matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecodedObservation {
    pub obs: Observation,
    pub gravity: Gravity,
    pub flow: Flow,
}

/// The four response columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Response {
    Moment1,
    Moment2,
    Moment3,
    Moment4,
}

impl Response {
    pub const ALL: [Response; 4] = [
        Response::Moment1,
        Response::Moment2,
        Response::Moment3,
        Response::Moment4,
    ];

    pub fn index(self) -> usize {
        match self {
            Response::Moment1 => 0,
            Response::Moment2 => 1,
            Response::Moment3 => 2,
            Response::Moment4 => 3,
        }
    }

    /// Column name in the input/output tables.
    pub fn column_name(self) -> &'static str {
        match self {
            Response::Moment1 => "R_moment_1",
            Response::Moment2 => "R_moment_2",
            Response::Moment3 => "R_moment_3",
            Response::Moment4 => "R_moment_4",
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

/// Transform applied to the response before fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transform {
    Identity,
    Log,
}

impl Transform {
    /// Map a raw response onto the fitting scale.
    pub fn forward(self, y: f64) -> Result<f64> {
        if !y.is_finite() {
            return Err(ModelError::Domain(format!("response value {y} is not finite")));
        }
        match self {
            Transform::Identity => Ok(y),
            Transform::Log if y > 0.0 => Ok(y.ln()),
            Transform::Log => Err(ModelError::Domain(format!(
                "natural log requested for non-positive response value {y}"
            ))),
        }
    }

    /// Map a linear-predictor value back onto the original response scale.
    pub fn inverse(self, eta: f64) -> f64 {
        match self {
            Transform::Identity => eta,
            Transform::Log => eta.exp(),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Transform::Identity => "identity",
            Transform::Log => "log",
        }
    }
}

/// Basis used to expand the continuous `St` predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StBasis {
    /// Orthogonal polynomial of the given degree.
    Polynomial,
    /// Natural cubic spline with `degree` columns.
    NaturalSpline,
}

/// Pairwise interaction terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Interaction {
    StGravity,
    StFlow,
    GravityFlow,
}

impl Interaction {
    pub const ALL: [Interaction; 3] = [
        Interaction::StGravity,
        Interaction::StFlow,
        Interaction::GravityFlow,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Interaction::StGravity => "St:gravity",
            Interaction::StFlow => "St:flow",
            Interaction::GravityFlow => "gravity:flow",
        }
    }
}

/// Declarative description of one candidate regression model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DesignSpec {
    pub transform: Transform,
    pub st_basis: StBasis,
    /// Number of `St` basis columns (polynomial degree for `Polynomial`).
    pub degree: usize,
    pub gravity: bool,
    pub flow: bool,
    pub interactions: BTreeSet<Interaction>,
}

impl DesignSpec {
    /// Main effects only, linear in `St`.
    pub fn main_effects(transform: Transform) -> Self {
        Self {
            transform,
            st_basis: StBasis::Polynomial,
            degree: 1,
            gravity: true,
            flow: true,
            interactions: BTreeSet::new(),
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_degree(mut self, degree: usize) -> Self {
        self.degree = degree;
        self
    }

    pub fn with_basis(mut self, st_basis: StBasis) -> Self {
        self.st_basis = st_basis;
        self
    }

    pub fn with_interaction(mut self, interaction: Interaction) -> Self {
        self.interactions.insert(interaction);
        self
    }

    /// Check the structural rules: at least one `St` column, and every
    /// interaction accompanied by the main effects it involves.
    pub fn validate(&self) -> Result<()> {
        if self.degree == 0 {
            return Err(ModelError::InvalidSpecification(
                "St basis needs at least one column (degree >= 1)".to_string(),
            ));
        }
        for interaction in &self.interactions {
            let ok = match interaction {
                Interaction::StGravity => self.gravity,
                Interaction::StFlow => self.flow,
                Interaction::GravityFlow => self.gravity && self.flow,
            };
            if !ok {
                return Err(ModelError::InvalidSpecification(format!(
                    "interaction {} requires its main effects",
                    interaction.label()
                )));
            }
        }
        Ok(())
    }

    /// Model formula in R-like notation; doubles as the specification id.
    pub fn id(&self) -> String {
        let lhs = match self.transform {
            Transform::Identity => "y".to_string(),
            Transform::Log => "log(y)".to_string(),
        };
        let mut terms = vec![match self.st_basis {
            StBasis::Polynomial if self.degree == 1 => "St".to_string(),
            StBasis::Polynomial => format!("poly(St, {})", self.degree),
            StBasis::NaturalSpline => format!("ns(St, df = {})", self.degree),
        }];
        if self.gravity {
            terms.push("gravity".to_string());
        }
        if self.flow {
            terms.push("flow".to_string());
        }
        terms.extend(self.interactions.iter().map(|i| i.label().to_string()));
        format!("{lhs} ~ {}", terms.join(" + "))
    }
}

impl fmt::Display for DesignSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

/// How coefficients are estimated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FitMethod {
    Ols,
    /// L2 penalty on standardized, non-intercept coefficients.
    Ridge { lambda: f64 },
}

/// Fit-quality criteria for one (specification, response) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub spec_id: String,
    pub response: Response,
    pub n: usize,
    /// Estimated coefficients including the intercept (effective df for ridge).
    pub params: f64,
    pub rss: f64,
    pub r_squared: f64,
    /// `NaN` when `n - p - 1 <= 0`.
    pub adj_r_squared: f64,
    pub aic: f64,
    pub bic: f64,
    /// `rss / n` on the fitting scale.
    pub mse: f64,
}

/// A prediction-table row with the four predicted moments attached.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    pub obs: Observation,
    /// Predicted `R_moment_1..4` on the original scale.
    pub predicted: [f64; 4],
}

/// Selection and evaluation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Significance level for interaction and degree tests.
    pub alpha: f64,
    /// Highest `St` polynomial degree examined.
    pub max_degree: usize,
    /// Number of cross-validation folds.
    pub folds: usize,
    /// Seed for fold assignment.
    pub seed: u64,
    pub lambda_min: f64,
    pub lambda_max: f64,
    pub lambda_steps: usize,
    /// Coverage of the coefficient confidence intervals.
    pub confidence_level: f64,
    /// Run the ridge and natural-spline comparison after selection.
    pub compare_families: bool,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            max_degree: 8,
            folds: 10,
            seed: 42,
            lambda_min: 1e-4,
            lambda_max: 1e2,
            lambda_steps: 25,
            confidence_level: 0.95,
            compare_families: true,
        }
    }
}

impl SelectionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(ModelError::InvalidSpecification(format!(
                "alpha must lie in (0, 1), got {}",
                self.alpha
            )));
        }
        if self.max_degree == 0 {
            return Err(ModelError::InvalidSpecification(
                "max_degree must be >= 1".to_string(),
            ));
        }
        if self.folds < 2 {
            return Err(ModelError::InvalidSpecification(format!(
                "cross-validation needs at least 2 folds, got {}",
                self.folds
            )));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(ModelError::InvalidSpecification(format!(
                "confidence level must lie in (0, 1), got {}",
                self.confidence_level
            )));
        }
        Ok(())
    }
}
