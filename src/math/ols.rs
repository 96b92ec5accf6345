//! Least squares solvers.
//!
//! In this project we repeatedly solve small dense regression problems of the form:
//!
//! ```text
//! minimize ||y - X β||²              (OLS)
//! minimize ||y - X β||² + λ ||β||²   (ridge, on standardized columns)
//! ```
//!
//! Implementation choices:
//! - Both solvers go through the SVD of `X`, never through an explicit inverse
//!   of `XᵀX`; orthogonal-polynomial columns up to degree 8 stay well
//!   conditioned this way.
//! - OLS refuses rank-deficient designs instead of returning a minimum-norm
//!   solution: a zero column (an empty interaction cell) or a collinear basis
//!   must reach the caller as [`ModelError::RankDeficiency`].
//! - `(XᵀX)⁻¹ = V diag(1/s²) Vᵀ` comes out of the same decomposition and feeds
//!   the coefficient standard errors.

use nalgebra::{DMatrix, DVector};

use crate::error::{ModelError, Result};

/// Singular values below `RANK_RTOL * s_max` count as zero.
const RANK_RTOL: f64 = 1e-10;

/// OLS solution plus the unscaled coefficient covariance.
#[derive(Debug, Clone)]
pub struct LeastSquares {
    pub beta: DVector<f64>,
    /// `(XᵀX)⁻¹`; multiply by σ² for the coefficient covariance.
    pub xtx_inv: DMatrix<f64>,
}

/// Ridge solution on an already standardized, centred design.
#[derive(Debug, Clone)]
pub struct RidgeSolution {
    pub beta: DVector<f64>,
    /// Trace of the ridge hat matrix, `Σ s²/(s² + λ)`.
    pub effective_df: f64,
}

/// Solve an ordinary least squares problem using SVD.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<LeastSquares> {
    let (n, p) = x.shape();
    check_inputs(x, y)?;
    if n < p {
        return Err(ModelError::RankDeficiency(format!(
            "{n} rows cannot identify {p} coefficients"
        )));
    }

    let svd = x.clone().svd(true, true);
    let s = &svd.singular_values;
    let s_max = s.max();
    let tol = s_max * RANK_RTOL;
    let rank = s.iter().filter(|&&v| v > tol).count();
    if rank < p {
        return Err(ModelError::RankDeficiency(format!(
            "rank {rank} < {p} columns"
        )));
    }

    let beta = svd
        .solve(y, tol)
        .map_err(|e| ModelError::RankDeficiency(e.to_string()))?;
    if beta.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::RankDeficiency(
            "least squares produced non-finite coefficients".to_string(),
        ));
    }

    let v_t = svd
        .v_t
        .as_ref()
        .ok_or_else(|| ModelError::RankDeficiency("SVD did not return V".to_string()))?;
    let mut v_scaled = v_t.transpose();
    for (j, mut col) in v_scaled.column_iter_mut().enumerate() {
        col /= s[j] * s[j];
    }
    let xtx_inv = v_scaled * v_t;

    Ok(LeastSquares { beta, xtx_inv })
}

/// Solve `min ||y - Zβ||² + λ||β||²` through the SVD of `Z`.
///
/// `β = V diag(s/(s² + λ)) Uᵀ y`. Callers standardize `Z` and centre `y`
/// so the intercept stays unpenalized.
pub fn solve_ridge(z: &DMatrix<f64>, y: &DVector<f64>, lambda: f64) -> Result<RidgeSolution> {
    if !(lambda.is_finite() && lambda >= 0.0) {
        return Err(ModelError::InvalidSpecification(format!(
            "ridge penalty must be finite and >= 0, got {lambda}"
        )));
    }
    check_inputs(z, y)?;
    if lambda == 0.0 {
        let ols = solve_least_squares(z, y)?;
        return Ok(RidgeSolution {
            effective_df: z.ncols() as f64,
            beta: ols.beta,
        });
    }

    let svd = z.clone().svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u.as_ref(), svd.v_t.as_ref()) else {
        return Err(ModelError::RankDeficiency("SVD did not return U/V".to_string()));
    };
    let s = &svd.singular_values;

    let mut uty = u.transpose() * y;
    let mut effective_df = 0.0;
    for (i, v) in uty.iter_mut().enumerate() {
        let s2 = s[i] * s[i];
        *v *= s[i] / (s2 + lambda);
        effective_df += s2 / (s2 + lambda);
    }
    let beta = v_t.transpose() * uty;

    Ok(RidgeSolution { beta, effective_df })
}

fn check_inputs(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<()> {
    if x.ncols() == 0 || x.nrows() == 0 {
        return Err(ModelError::InvalidSpecification(
            "empty design matrix".to_string(),
        ));
    }
    if x.nrows() != y.len() {
        return Err(ModelError::InvalidSpecification(format!(
            "design has {} rows but response has {}",
            x.nrows(),
            y.len()
        )));
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(ModelError::Domain(
            "design matrix or response contains non-finite values".to_string(),
        ));
    }
    Ok(())
}
