//! Ridge penalty grid.
//!
//! The ridge search evaluates a deterministic, log-spaced grid of penalties;
//! every candidate is scored on the same seeded folds.

use crate::error::{ModelError, Result};

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
pub fn log_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > min) {
        return Err(ModelError::InvalidSpecification(format!(
            "invalid lambda range: min={min}, max={max} (must be finite, > 0, and max > min)"
        )));
    }
    if steps < 2 {
        return Err(ModelError::InvalidSpecification(
            "lambda steps must be >= 2".to_string(),
        ));
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    let mut out = Vec::with_capacity(steps);
    for i in 0..steps {
        out.push((ln_min + step * i as f64).exp());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_space_includes_endpoints() {
        let v = log_space(1e-4, 1e2, 7).unwrap();
        assert_eq!(v.len(), 7);
        assert!((v[0] - 1e-4).abs() < 1e-16);
        assert!((v[6] - 1e2).abs() < 1e-9);
        // one decade per step
        assert!((v[1] / v[0] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn log_space_rejects_bad_ranges() {
        assert!(log_space(0.0, 1.0, 5).is_err());
        assert!(log_space(1.0, 1.0, 5).is_err());
        assert!(log_space(1e-3, 1.0, 1).is_err());
    }
}
