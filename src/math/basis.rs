//! Basis expansions for the continuous `St` predictor.
//!
//! Two families:
//!
//! - [`OrthoPoly`]: orthogonal polynomials built by the three-term (Stieltjes)
//!   recurrence on the training values, the same construction as R's
//!   `poly(x, degree)`:
//!
//!   ```text
//!   p_0 = 1
//!   p_1 = x - a_0
//!   p_{k+1} = (x - a_k) p_k - b_k p_{k-1}
//!   a_k = Σ x p_k² / Σ p_k²,   b_k = Σ p_k² / Σ p_{k-1}²
//!   ```
//!
//!   Column `k` is `p_k / ||p_k||`. Columns of degree `d` are the first `d`
//!   columns of degree `d + 1`, so increasing-degree fits on the same rows are
//!   nested. The centres and norms are stored so new rows are evaluated in
//!   the training basis.
//!
//! - [`NaturalSpline`]: natural cubic splines in the truncated-power form
//!   (Hastie, Tibshirani & Friedman, eq. 5.4–5.5), linear beyond the boundary
//!   knots.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// A column whose squared norm collapses below this fraction of its
/// pre-cancellation magnitude means `x` has too few distinct values.
const COLLAPSE_RTOL: f64 = 1e-18;

/// Orthogonal polynomial basis learned on training values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrthoPoly {
    /// Recurrence centres `a_0..a_{d-1}`.
    alpha: Vec<f64>,
    /// Squared norms `||p_0||²..||p_d||²` on the training values.
    norm2: Vec<f64>,
}

impl OrthoPoly {
    /// Build the degree-`degree` basis for the training values `x`.
    pub fn fit(x: &[f64], degree: usize) -> Result<Self> {
        check_values(x)?;
        if degree == 0 {
            return Err(ModelError::InvalidSpecification(
                "polynomial degree must be >= 1".to_string(),
            ));
        }

        let n = x.len();
        let mut alpha = Vec::with_capacity(degree);
        let mut norm2 = Vec::with_capacity(degree + 1);

        let mut prev = vec![0.0; n];
        let mut cur = vec![1.0; n];
        norm2.push(n as f64);

        for k in 0..degree {
            let cur_norm = norm2[k];
            let a = x.iter().zip(&cur).map(|(xi, pi)| xi * pi * pi).sum::<f64>() / cur_norm;
            let b = if k == 0 { 0.0 } else { cur_norm / norm2[k - 1] };

            let mut raw = 0.0;
            let next: Vec<f64> = x
                .iter()
                .zip(cur.iter().zip(&prev))
                .map(|(xi, (pi, qi))| {
                    let lead = (xi - a) * pi;
                    raw += lead * lead;
                    lead - b * qi
                })
                .collect();
            let next_norm = next.iter().map(|v| v * v).sum::<f64>();

            if !(next_norm > COLLAPSE_RTOL * raw) {
                return Err(ModelError::RankDeficiency(format!(
                    "St has too few distinct values for a degree-{degree} polynomial (collapsed at degree {})",
                    k + 1
                )));
            }

            alpha.push(a);
            norm2.push(next_norm);
            prev = cur;
            cur = next;
        }

        Ok(Self { alpha, norm2 })
    }

    pub fn degree(&self) -> usize {
        self.alpha.len()
    }

    /// Whether the columns of `smaller` are the leading columns of `self`:
    /// both were learned on the same values and `self` goes at least as far.
    pub fn extends(&self, smaller: &OrthoPoly) -> bool {
        self.alpha.starts_with(&smaller.alpha) && self.norm2.starts_with(&smaller.norm2)
    }

    /// Evaluate the `degree` scaled basis columns at `x` into `out`.
    pub fn eval(&self, x: f64, out: &mut [f64]) {
        let mut prev = 0.0;
        let mut cur = 1.0;
        for k in 0..self.degree() {
            let b = if k == 0 { 0.0 } else { self.norm2[k] / self.norm2[k - 1] };
            let next = (x - self.alpha[k]) * cur - b * prev;
            out[k] = next / self.norm2[k + 1].sqrt();
            prev = cur;
            cur = next;
        }
    }

    /// Convert basis coefficients into coefficients on raw powers of `x`.
    ///
    /// Returns `degree + 1` values; index `j` multiplies `x^j`.
    pub fn raw_coefficients(&self, coefs: &[f64]) -> Vec<f64> {
        let d = self.degree();
        let mut out = vec![0.0; d + 1];

        // Monomial expansion of the unscaled p_k, built with the same recurrence.
        let mut prev: Vec<f64> = vec![0.0; d + 2];
        let mut cur: Vec<f64> = vec![0.0; d + 2];
        cur[0] = 1.0;

        for k in 0..d.min(coefs.len()) {
            let b = if k == 0 { 0.0 } else { self.norm2[k] / self.norm2[k - 1] };
            let mut next = vec![0.0; d + 2];
            for j in 0..=k {
                next[j + 1] += cur[j];
                next[j] -= self.alpha[k] * cur[j];
                next[j] -= b * prev[j];
            }
            let scale = coefs[k] / self.norm2[k + 1].sqrt();
            for j in 0..=k + 1 {
                out[j] += scale * next[j];
            }
            prev = cur;
            cur = next;
        }

        out
    }
}

/// Natural cubic spline basis with knots at training quantiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NaturalSpline {
    /// Boundary and interior knots, strictly increasing, on the raw scale.
    knots: Vec<f64>,
}

impl NaturalSpline {
    /// Build a basis with `df` columns: `df - 1` interior knots at evenly
    /// spaced quantiles of `x`, boundary knots at its range.
    pub fn fit(x: &[f64], df: usize) -> Result<Self> {
        check_values(x)?;
        if df == 0 {
            return Err(ModelError::InvalidSpecification(
                "natural spline needs df >= 1".to_string(),
            ));
        }

        let mut sorted = x.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let mut knots = Vec::with_capacity(df + 1);
        knots.push(sorted[0]);
        for j in 1..df {
            knots.push(quantile_sorted(&sorted, j as f64 / df as f64));
        }
        knots.push(sorted[sorted.len() - 1]);

        if knots.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(ModelError::RankDeficiency(format!(
                "St has too few distinct values for a natural spline with df = {df}"
            )));
        }

        Ok(Self { knots })
    }

    pub fn df(&self) -> usize {
        self.knots.len() - 1
    }

    /// Evaluate the `df` basis columns at `x` into `out`.
    pub fn eval(&self, x: f64, out: &mut [f64]) {
        let lo = self.knots[0];
        let span = self.knots[self.knots.len() - 1] - lo;
        let u = (x - lo) / span;
        let xi: Vec<f64> = self.knots.iter().map(|k| (k - lo) / span).collect();
        let last = xi.len() - 1;

        let d = |k: usize| -> f64 {
            let a = (u - xi[k]).max(0.0).powi(3);
            let b = (u - xi[last]).max(0.0).powi(3);
            (a - b) / (xi[last] - xi[k])
        };

        out[0] = u;
        let d_last = d(last - 1);
        for k in 0..last - 1 {
            out[k + 1] = d(k) - d_last;
        }
    }
}

/// Type-7 (linear interpolation) quantile of sorted data.
fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

fn check_values(x: &[f64]) -> Result<()> {
    if x.is_empty() {
        return Err(ModelError::InvalidSpecification(
            "cannot build a basis from zero rows".to_string(),
        ));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::Domain("St contains non-finite values".to_string()));
    }
    Ok(())
}
