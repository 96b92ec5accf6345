//! Property-based and scenario tests for the modelling engine.
//!
//! - recoding is a pure function on non-boundary inputs
//! - the log transform round-trips
//! - RSS never increases along nested polynomial degrees
//! - cross-validation is reproducible for a fixed seed
//! - adjusted R² recomputed from (fitted, observed) matches the scorer
//! - AIC and BIC follow from the residual sum of squares at any scale

use cluster_moments::data::{SampleConfig, generate_sample, toy_sample};
use cluster_moments::domain::{
    DesignSpec, FitMethod, Flow, Gravity, Observation, RecodedObservation, Response, Transform, recode,
    recode_all,
};
use cluster_moments::error::ModelError;
use cluster_moments::fit::{cv_mse, fit, score};
use cluster_moments::models::predict;
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn arb_fr() -> impl Strategy<Value = f64> {
    prop_oneof![
        1e-4f64..0.0999,
        0.1001f64..0.999,
        1.001f64..1e6,
        Just(f64::INFINITY),
    ]
}

fn arb_re() -> impl Strategy<Value = f64> {
    prop_oneof![1.0f64..99.9, 100.1f64..299.9, 300.1f64..1e5]
}

fn sample_rows(seed: u64) -> Vec<RecodedObservation> {
    let config = SampleConfig {
        rows_per_cell: 5,
        seed,
        noise_sd: 0.05,
    };
    recode_all(&generate_sample(&config).unwrap().train).unwrap()
}

fn scaled_sample_rows(seed: u64, scale: f64) -> Vec<RecodedObservation> {
    let config = SampleConfig {
        rows_per_cell: 5,
        seed,
        noise_sd: 0.05,
    };
    let train: Vec<Observation> = generate_sample(&config)
        .unwrap()
        .train
        .into_iter()
        .map(|o| Observation::new(o.re, o.fr, o.st, o.moments.map(|m| m.map(|v| v * scale))))
        .collect();
    recode_all(&train).unwrap()
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: recoding twice gives identical output and respects the bands.
    #[test]
    fn prop_recode_is_pure(re in arb_re(), fr in arb_fr(), st in 0.01f64..5.0) {
        let obs = Observation::new(re, fr, st, None);
        let a = recode(&obs).unwrap();
        let b = recode(&obs).unwrap();
        prop_assert_eq!(a, b);
        prop_assert_eq!(a.obs, obs);

        let gravity = if fr < 0.1 { Gravity::Low } else if fr < 1.0 { Gravity::Moderate } else { Gravity::High };
        let flow = if re < 100.0 { Flow::Low } else if re < 300.0 { Flow::Moderate } else { Flow::High };
        prop_assert_eq!(a.gravity, gravity);
        prop_assert_eq!(a.flow, flow);
    }

    /// Property: the inverse transform undoes the forward transform.
    #[test]
    fn prop_log_round_trip(y in 1e-8f64..1e8) {
        for transform in [Transform::Log, Transform::Identity] {
            let back = transform.inverse(transform.forward(y).unwrap());
            prop_assert!((back - y).abs() <= 1e-12 * y.abs());
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Property: RSS is non-increasing along nested polynomial degrees.
    #[test]
    fn prop_rss_non_increasing_in_degree(seed in any::<u64>(), response_idx in 0usize..4) {
        let rows = sample_rows(seed);
        let response = Response::ALL[response_idx];
        let base = DesignSpec::main_effects(Transform::Log);
        let rss: Vec<f64> = (1..=5)
            .map(|d| fit(&base.clone().with_degree(d), response, &rows).unwrap().rss)
            .collect();
        for w in rss.windows(2) {
            prop_assert!(w[1] <= w[0] * (1.0 + 1e-9), "rss went up: {:?}", rss);
        }
    }

    /// Property: same seed, same data -> identical folds and bit-identical MSE.
    #[test]
    fn prop_cv_is_reproducible(data_seed in any::<u64>(), cv_seed in any::<u64>()) {
        let rows = sample_rows(data_seed);
        let spec = DesignSpec::main_effects(Transform::Log).with_degree(2);
        let a = cv_mse(&spec, FitMethod::Ols, Response::Moment1, &rows, 5, cv_seed).unwrap();
        let b = cv_mse(&spec, FitMethod::Ols, Response::Moment1, &rows, 5, cv_seed).unwrap();
        prop_assert_eq!(&a.folds, &b.folds);
        prop_assert_eq!(a.mse.to_bits(), b.mse.to_bits());
    }

    /// Property: adjusted R² recomputed from (fitted, observed) matches the scorer.
    #[test]
    fn prop_adjusted_r_squared_is_consistent(seed in any::<u64>(), degree in 1usize..4) {
        let rows = sample_rows(seed);
        let spec = DesignSpec::main_effects(Transform::Log).with_degree(degree);
        let model = fit(&spec, Response::Moment3, &rows).unwrap();
        let record = score(&model, &rows).unwrap();

        let n = model.observed.len() as f64;
        let mean = model.observed.iter().sum::<f64>() / n;
        let tss: f64 = model.observed.iter().map(|y| (y - mean).powi(2)).sum();
        let rss: f64 = model
            .observed
            .iter()
            .zip(&model.fitted)
            .map(|(y, f)| (y - f).powi(2))
            .sum();
        let r2 = 1.0 - rss / tss;
        let adj = 1.0 - (1.0 - r2) * (n - 1.0) / (n - model.terms().len() as f64);

        prop_assert!((rss - model.rss).abs() <= 1e-9 * model.rss);
        prop_assert!((adj - record.adj_r_squared).abs() <= 1e-9 * adj.abs());
    }

    /// Property: AIC and BIC are built from the model's own RSS, even when the
    /// responses are tiny and RSS/n is far below 1e-12.
    #[test]
    fn prop_information_criteria_use_model_rss(
        seed in any::<u64>(),
        scale in 1e-7f64..1e-5,
        degree in 1usize..4,
    ) {
        let rows = scaled_sample_rows(seed, scale);
        let spec = DesignSpec::main_effects(Transform::Identity).with_degree(degree);
        let model = fit(&spec, Response::Moment1, &rows).unwrap();
        let record = score(&model, &rows).unwrap();

        let n = model.observed.len() as f64;
        let rss: f64 = model.residuals.iter().map(|r| r * r).sum();
        let p = model.params;
        let aic = n * (rss / n).ln() + 2.0 * p;
        let bic = n * (rss / n).ln() + p * n.ln();

        prop_assert!((record.aic - aic).abs() <= 1e-9 * aic.abs(), "aic {} vs {}", record.aic, aic);
        prop_assert!((record.bic - bic).abs() <= 1e-9 * bic.abs(), "bic {} vs {}", record.bic, bic);
    }
}

// ============================================================================
// Scenario
// ============================================================================

#[test]
fn toy_grid_scenario() {
    let obs = toy_sample(2024, 0.01).unwrap();
    assert_eq!(obs.len(), 18);
    let rows = recode_all(&obs).unwrap();

    for row in &rows {
        let flow = match row.obs.re as i64 {
            90 => Flow::Low,
            224 => Flow::Moderate,
            398 => Flow::High,
            other => panic!("unexpected Re {other}"),
        };
        let gravity = if row.obs.fr == 0.052 {
            Gravity::Low
        } else if row.obs.fr == 0.3 {
            Gravity::Moderate
        } else {
            assert!(row.obs.fr.is_infinite());
            Gravity::High
        };
        assert_eq!(row.flow, flow);
        assert_eq!(row.gravity, gravity);
    }

    let model = fit(&DesignSpec::main_effects(Transform::Log), Response::Moment1, &rows).unwrap();
    let slope = model.st_raw_coefficients().unwrap()[1];
    assert!((slope - 0.1).abs() < 0.02, "St slope {slope}");

    let held_out = recode(&Observation::new(224.0, 0.3, 1.5, None)).unwrap();
    let pred = predict(&model, &[held_out]).unwrap();
    assert!(pred[0].is_finite() && pred[0] > 0.0);
}

#[test]
fn unseen_level_is_never_a_zero_contribution() {
    let rows: Vec<_> = recode_all(&toy_sample(5, 0.01).unwrap())
        .unwrap()
        .into_iter()
        .filter(|r| r.flow != Flow::High)
        .collect();
    let model = fit(&DesignSpec::main_effects(Transform::Log), Response::Moment1, &rows).unwrap();
    let new_row = recode(&Observation::new(398.0, 0.3, 1.0, None)).unwrap();
    assert_eq!(
        predict(&model, &[new_row]).unwrap_err(),
        ModelError::UnseenLevel {
            factor: "flow",
            level: "high".to_string()
        }
    );
}
