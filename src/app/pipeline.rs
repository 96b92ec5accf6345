//! Shared fit pipeline used by the `fit` and `demo` commands.
//!
//! recode -> select -> fit per response -> predict -> intervals -> holdout
//!
//! Every stage receives immutable inputs and returns new values; the recoded
//! tables are fresh snapshots, never in-place rewrites of the inputs.

use rayon::prelude::*;

use crate::domain::{Observation, PredictionRow, SelectionConfig, recode_all};
use crate::error::Result;
use crate::fit::{HoldoutScore, Selection, holdout_mse, select};
use crate::models::{ResponseIntervals, confidence_intervals, predict};

/// All computed outputs of a single run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub n_train: usize,
    pub selection: Selection,
    /// One row per prediction-table row, in input order.
    pub predictions: Vec<PredictionRow>,
    pub intervals: Vec<ResponseIntervals>,
    /// Present when the prediction table carried responses.
    pub holdout: Vec<HoldoutScore>,
}

/// Execute the full pipeline.
pub fn run(train: &[Observation], test: &[Observation], config: &SelectionConfig) -> Result<RunOutput> {
    let train_rows = recode_all(train)?;
    let test_rows = recode_all(test)?;
    tracing::info!(train = train_rows.len(), test = test_rows.len(), "recoded tables");

    let selection = select(&train_rows, config)?;

    let per_response = selection
        .models
        .par_iter()
        .map(|m| predict(m, &test_rows))
        .collect::<Result<Vec<_>>>()?;
    let predictions = test
        .iter()
        .enumerate()
        .map(|(i, obs)| {
            let mut predicted = [f64::NAN; 4];
            for (model, values) in selection.models.iter().zip(&per_response) {
                predicted[model.response.index()] = values[i];
            }
            PredictionRow {
                obs: *obs,
                predicted,
            }
        })
        .collect();

    let intervals = selection
        .models
        .iter()
        .map(|m| {
            Ok(ResponseIntervals {
                response: m.response,
                intervals: confidence_intervals(m, config.confidence_level)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let holdout = if !test_rows.is_empty() && test.iter().all(|o| o.moments.is_some()) {
        selection
            .models
            .iter()
            .map(|m| {
                let mse = holdout_mse(m, &test_rows)?;
                tracing::info!(response = %m.response, mse, "holdout score");
                Ok(HoldoutScore {
                    response: m.response,
                    n: test_rows.len(),
                    mse,
                })
            })
            .collect::<Result<Vec<_>>>()?
    } else {
        Vec::new()
    };

    Ok(RunOutput {
        n_train: train_rows.len(),
        selection,
        predictions,
        intervals,
        holdout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SampleConfig, generate_sample};
    use crate::error::ModelError;

    fn quick_config() -> SelectionConfig {
        SelectionConfig {
            compare_families: false,
            max_degree: 4,
            ..SelectionConfig::default()
        }
    }

    #[test]
    fn pipeline_predicts_every_test_row() {
        let data = generate_sample(&SampleConfig::default()).unwrap();
        let out = run(&data.train, &data.test, &quick_config()).unwrap();

        assert_eq!(out.predictions.len(), data.test.len());
        assert!(out
            .predictions
            .iter()
            .all(|p| p.predicted.iter().all(|v| v.is_finite() && *v > 0.0)));
        assert_eq!(out.intervals.len(), 4);
        assert_eq!(out.holdout.len(), 4);
        // Inputs are echoed untouched.
        assert_eq!(out.predictions[0].obs, data.test[0]);
    }

    #[test]
    fn test_rows_without_moments_skip_holdout() {
        let data = generate_sample(&SampleConfig::default()).unwrap();
        let test: Vec<_> = data
            .test
            .iter()
            .map(|o| Observation::new(o.re, o.fr, o.st, None))
            .collect();
        let out = run(&data.train, &test, &quick_config()).unwrap();
        assert!(out.holdout.is_empty());
        assert_eq!(out.predictions.len(), test.len());
    }

    #[test]
    fn boundary_values_are_rejected_before_fitting() {
        let data = generate_sample(&SampleConfig::default()).unwrap();
        let test = [Observation::new(100.0, 0.3, 1.0, None)];
        assert!(matches!(
            run(&data.train, &test, &quick_config()),
            Err(ModelError::UnclassifiedBoundary { predictor: "Re", .. })
        ));
    }
}
