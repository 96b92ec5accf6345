//! JSON selection summary.
//!
//! The summary is the portable record of a run:
//! - configuration and every selection decision (votes, F tests, ANOVA tables)
//! - the final specification and per-response coefficients
//! - family comparison and holdout scores when available

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{DesignSpec, Response, ScoreRecord, SelectionConfig, Transform};
use crate::error::AppError;
use crate::fit::{
    DegreeAnalysis, FamilyComparison, HoldoutScore, InteractionDecision, InteractionTest, Selection,
    TransformVote,
};
use crate::models::{CoefficientInterval, ResponseIntervals};

#[derive(Debug, Serialize)]
pub struct SelectionSummary<'a> {
    pub tool: &'static str,
    pub generated_at: DateTime<Utc>,
    pub config: &'a SelectionConfig,
    pub transform: Transform,
    pub spec_id: String,
    pub spec: &'a DesignSpec,
    pub shared_degree: usize,
    pub votes: &'a [TransformVote],
    pub interaction_tests: &'a [InteractionTest],
    pub interactions: &'a [InteractionDecision],
    pub degrees: &'a [DegreeAnalysis],
    pub scores: &'a [ScoreRecord],
    pub models: Vec<ModelSummary<'a>>,
    pub families: &'a [FamilyComparison],
    pub holdout: &'a [HoldoutScore],
}

#[derive(Debug, Serialize)]
pub struct ModelSummary<'a> {
    pub response: Response,
    pub terms: Vec<String>,
    pub coefficients: &'a [f64],
    /// Fitted `St` polynomial on raw powers (index `j` multiplies `St^j`).
    pub st_raw_coefficients: Option<Vec<f64>>,
    pub intervals: Option<&'a [CoefficientInterval]>,
}

pub fn build_summary<'a>(
    selection: &'a Selection,
    config: &'a SelectionConfig,
    intervals: &'a [ResponseIntervals],
    holdout: &'a [HoldoutScore],
) -> SelectionSummary<'a> {
    let models = selection
        .models
        .iter()
        .map(|m| ModelSummary {
            response: m.response,
            terms: m.terms().iter().map(ToString::to_string).collect(),
            coefficients: &m.coefficients,
            st_raw_coefficients: m.st_raw_coefficients(),
            intervals: intervals
                .iter()
                .find(|t| t.response == m.response)
                .map(|t| t.intervals.as_slice()),
        })
        .collect();

    SelectionSummary {
        tool: "cmom",
        generated_at: Utc::now(),
        config,
        transform: selection.transform,
        spec_id: selection.spec.id(),
        spec: &selection.spec,
        shared_degree: selection.shared_degree,
        votes: &selection.votes,
        interaction_tests: &selection.interaction_tests,
        interactions: &selection.interactions,
        degrees: &selection.degrees,
        scores: &selection.scores,
        models,
        families: &selection.families,
        holdout,
    }
}

/// Write the selection summary as pretty-printed JSON.
pub fn write_summary_json(path: &Path, summary: &SelectionSummary<'_>) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create summary JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, summary)
        .map_err(|e| AppError::new(2, format!("Failed to write summary JSON: {e}")))?;
    tracing::info!(path = %path.display(), "wrote selection summary");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SampleConfig, generate_sample};
    use crate::domain::recode_all;
    use crate::fit::select_for;

    #[test]
    fn summary_serializes_decisions_and_models() {
        let rows = recode_all(&generate_sample(&SampleConfig::default()).unwrap().train).unwrap();
        let config = SelectionConfig {
            compare_families: false,
            max_degree: 4,
            ..SelectionConfig::default()
        };
        let selection = select_for(&rows, &[Response::Moment1, Response::Moment2], &config).unwrap();
        let summary = build_summary(&selection, &config, &[], &[]);
        let value = serde_json::to_value(&summary).unwrap();

        assert_eq!(value["tool"], "cmom");
        assert_eq!(value["transform"], "log");
        assert_eq!(value["models"].as_array().unwrap().len(), 2);
        assert_eq!(value["models"][0]["response"], "Moment1");
        assert!(value["models"][0]["intervals"].is_null());
        assert_eq!(value["spec_id"], selection.spec.id());
        assert_eq!(value["votes"].as_array().unwrap().len(), 2);
    }
}
