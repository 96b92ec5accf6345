//! Design matrix construction.
//!
//! A [`DesignEncoder`] is learned once from the training rows of a fit and then
//! reused for every row that model ever sees (training, held-out fold, new
//! data). It freezes:
//!
//! - the `St` basis (orthogonal polynomial centres/norms or spline knots)
//! - the categorical levels present in training; the lowest one is the
//!   reference level and gets no dummy column
//!
//! Column order: intercept, `St` basis, gravity dummies, flow dummies, then the
//! interactions in `Interaction` order. `St:gravity` and `St:flow` multiply the
//! first (linear) `St` column with each dummy; `gravity:flow` multiplies every
//! gravity dummy with every flow dummy.

use std::collections::BTreeSet;
use std::fmt;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::domain::{DesignSpec, Flow, Gravity, Interaction, RecodedObservation, StBasis};
use crate::error::{ModelError, Result};
use crate::math::{NaturalSpline, OrthoPoly};

/// One column of the design matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Term {
    Intercept,
    /// `k`-th `St` basis column (1-based).
    St(usize),
    Gravity(Gravity),
    Flow(Flow),
    StGravity(Gravity),
    StFlow(Flow),
    GravityFlow(Gravity, Flow),
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Intercept => write!(f, "(Intercept)"),
            Term::St(k) => write!(f, "St[{k}]"),
            Term::Gravity(g) => write!(f, "gravity[{}]", g.label()),
            Term::Flow(l) => write!(f, "flow[{}]", l.label()),
            Term::StGravity(g) => write!(f, "St[1]:gravity[{}]", g.label()),
            Term::StFlow(l) => write!(f, "St[1]:flow[{}]", l.label()),
            Term::GravityFlow(g, l) => write!(f, "gravity[{}]:flow[{}]", g.label(), l.label()),
        }
    }
}

/// `St` basis frozen on the training rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StBasisFit {
    Polynomial(OrthoPoly),
    NaturalSpline(NaturalSpline),
}

impl StBasisFit {
    fn learn(kind: StBasis, st: &[f64], degree: usize) -> Result<Self> {
        match kind {
            StBasis::Polynomial => OrthoPoly::fit(st, degree).map(StBasisFit::Polynomial),
            StBasis::NaturalSpline => NaturalSpline::fit(st, degree).map(StBasisFit::NaturalSpline),
        }
    }

    fn eval(&self, st: f64, out: &mut [f64]) {
        match self {
            StBasisFit::Polynomial(poly) => poly.eval(st, out),
            StBasisFit::NaturalSpline(spline) => spline.eval(st, out),
        }
    }

    /// Whether every column of `smaller` is also a column of `self`.
    ///
    /// Orthogonal polynomials nest when learned on the same values; spline
    /// columns depend on every knot, so splines nest only with identical knots.
    pub fn spans(&self, smaller: &StBasisFit) -> bool {
        match (self, smaller) {
            (StBasisFit::Polynomial(big), StBasisFit::Polynomial(small)) => big.extends(small),
            (StBasisFit::NaturalSpline(big), StBasisFit::NaturalSpline(small)) => big == small,
            _ => false,
        }
    }
}

/// Turns recoded rows into design-matrix rows for one specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignEncoder {
    spec: DesignSpec,
    basis: StBasisFit,
    gravity_levels: Vec<Gravity>,
    flow_levels: Vec<Flow>,
    terms: Vec<Term>,
}

impl DesignEncoder {
    /// Learn the basis and level sets from the training rows.
    pub fn learn(spec: &DesignSpec, rows: &[RecodedObservation]) -> Result<Self> {
        spec.validate()?;
        if rows.is_empty() {
            return Err(ModelError::InvalidSpecification(
                "cannot fit on zero rows".to_string(),
            ));
        }

        let st: Vec<f64> = rows.iter().map(|r| r.obs.st).collect();
        let basis = StBasisFit::learn(spec.st_basis, &st, spec.degree)?;

        let gravity_levels: Vec<Gravity> = if spec.gravity {
            rows.iter().map(|r| r.gravity).collect::<BTreeSet<_>>().into_iter().collect()
        } else {
            Vec::new()
        };
        let flow_levels: Vec<Flow> = if spec.flow {
            rows.iter().map(|r| r.flow).collect::<BTreeSet<_>>().into_iter().collect()
        } else {
            Vec::new()
        };

        let terms = build_terms(spec, &gravity_levels, &flow_levels);

        Ok(Self {
            spec: spec.clone(),
            basis,
            gravity_levels,
            flow_levels,
            terms,
        })
    }

    pub fn spec(&self) -> &DesignSpec {
        &self.spec
    }

    pub fn basis(&self) -> &StBasisFit {
        &self.basis
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Reject rows whose levels were absent from the training rows.
    pub fn check_levels(&self, row: &RecodedObservation) -> Result<()> {
        if self.spec.gravity && !self.gravity_levels.contains(&row.gravity) {
            return Err(ModelError::UnseenLevel {
                factor: "gravity",
                level: row.gravity.label().to_string(),
            });
        }
        if self.spec.flow && !self.flow_levels.contains(&row.flow) {
            return Err(ModelError::UnseenLevel {
                factor: "flow",
                level: row.flow.label().to_string(),
            });
        }
        Ok(())
    }

    /// Build the `rows.len() × terms.len()` design matrix.
    pub fn encode(&self, rows: &[RecodedObservation]) -> Result<DMatrix<f64>> {
        let p = self.terms.len();
        let mut x = DMatrix::<f64>::zeros(rows.len(), p);
        let mut st_cols = vec![0.0; self.spec.degree];

        for (i, row) in rows.iter().enumerate() {
            self.check_levels(row)?;
            if !row.obs.st.is_finite() {
                return Err(ModelError::Domain(format!("St={} is not finite", row.obs.st)));
            }
            self.basis.eval(row.obs.st, &mut st_cols);
            for (j, term) in self.terms.iter().enumerate() {
                x[(i, j)] = term_value(*term, row, &st_cols);
            }
        }

        Ok(x)
    }
}

fn build_terms(spec: &DesignSpec, gravity_levels: &[Gravity], flow_levels: &[Flow]) -> Vec<Term> {
    // The first observed level of each factor is the reference.
    let gravity_dummies: &[Gravity] = gravity_levels.get(1..).unwrap_or(&[]);
    let flow_dummies: &[Flow] = flow_levels.get(1..).unwrap_or(&[]);

    let mut terms = vec![Term::Intercept];
    terms.extend((1..=spec.degree).map(Term::St));
    terms.extend(gravity_dummies.iter().map(|&g| Term::Gravity(g)));
    terms.extend(flow_dummies.iter().map(|&f| Term::Flow(f)));

    for interaction in &spec.interactions {
        match interaction {
            Interaction::StGravity => {
                terms.extend(gravity_dummies.iter().map(|&g| Term::StGravity(g)));
            }
            Interaction::StFlow => {
                terms.extend(flow_dummies.iter().map(|&f| Term::StFlow(f)));
            }
            Interaction::GravityFlow => {
                for &g in gravity_dummies {
                    terms.extend(flow_dummies.iter().map(|&f| Term::GravityFlow(g, f)));
                }
            }
        }
    }

    terms
}

fn term_value(term: Term, row: &RecodedObservation, st_cols: &[f64]) -> f64 {
    let ind = |on: bool| if on { 1.0 } else { 0.0 };
    match term {
        Term::Intercept => 1.0,
        Term::St(k) => st_cols[k - 1],
        Term::Gravity(g) => ind(row.gravity == g),
        Term::Flow(f) => ind(row.flow == f),
        Term::StGravity(g) => st_cols[0] * ind(row.gravity == g),
        Term::StFlow(f) => st_cols[0] * ind(row.flow == f),
        Term::GravityFlow(g, f) => ind(row.gravity == g && row.flow == f),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Observation, Transform, recode};

    fn row(re: f64, fr: f64, st: f64) -> RecodedObservation {
        recode(&Observation::new(re, fr, st, None)).unwrap()
    }

    fn grid_rows() -> Vec<RecodedObservation> {
        let mut rows = Vec::new();
        for &re in &[90.0, 224.0, 398.0] {
            for &fr in &[0.052, 0.3, f64::INFINITY] {
                for &st in &[0.5, 2.0] {
                    rows.push(row(re, fr, st));
                }
            }
        }
        rows
    }

    #[test]
    fn main_effects_terms_use_first_level_as_reference() {
        let spec = DesignSpec::main_effects(Transform::Log);
        let enc = DesignEncoder::learn(&spec, &grid_rows()).unwrap();
        assert_eq!(
            enc.terms(),
            &[
                Term::Intercept,
                Term::St(1),
                Term::Gravity(Gravity::Moderate),
                Term::Gravity(Gravity::High),
                Term::Flow(Flow::Moderate),
                Term::Flow(Flow::High),
            ]
        );
    }

    #[test]
    fn interaction_columns_are_products() {
        let spec = DesignSpec::main_effects(Transform::Identity)
            .with_interaction(Interaction::StGravity)
            .with_interaction(Interaction::GravityFlow);
        let rows = grid_rows();
        let enc = DesignEncoder::learn(&spec, &rows).unwrap();
        let x = enc.encode(&rows).unwrap();
        assert_eq!(x.ncols(), 1 + 1 + 2 + 2 + 2 + 4);

        let st_col = enc.terms().iter().position(|t| *t == Term::St(1)).unwrap();
        let sg = enc
            .terms()
            .iter()
            .position(|t| *t == Term::StGravity(Gravity::High))
            .unwrap();
        let gf = enc
            .terms()
            .iter()
            .position(|t| *t == Term::GravityFlow(Gravity::High, Flow::High))
            .unwrap();
        for (i, r) in rows.iter().enumerate() {
            let high_g = if r.gravity == Gravity::High { 1.0 } else { 0.0 };
            let high_f = if r.flow == Flow::High { 1.0 } else { 0.0 };
            assert_eq!(x[(i, sg)], x[(i, st_col)] * high_g);
            assert_eq!(x[(i, gf)], high_g * high_f);
        }
    }

    #[test]
    fn encode_rejects_levels_missing_from_training() {
        let spec = DesignSpec::main_effects(Transform::Identity);
        let training: Vec<_> = grid_rows()
            .into_iter()
            .filter(|r| r.gravity != Gravity::High)
            .collect();
        let enc = DesignEncoder::learn(&spec, &training).unwrap();
        let err = enc.encode(&[row(224.0, f64::INFINITY, 1.0)]).unwrap_err();
        assert_eq!(
            err,
            ModelError::UnseenLevel {
                factor: "gravity",
                level: "high".to_string()
            }
        );
    }

    #[test]
    fn excluded_factor_levels_are_not_checked() {
        let mut spec = DesignSpec::main_effects(Transform::Identity);
        spec.flow = false;
        let training: Vec<_> = grid_rows()
            .into_iter()
            .filter(|r| r.flow == Flow::Low)
            .collect();
        let enc = DesignEncoder::learn(&spec, &training).unwrap();
        assert!(enc.encode(&[row(398.0, 0.3, 1.0)]).is_ok());
    }
}
