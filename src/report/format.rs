//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the fitting and selection code stays clean and testable
//! - output changes are localized

use crate::domain::SelectionConfig;
use crate::fit::{FamilyComparison, HoldoutScore, Selection};
use crate::models::ResponseIntervals;

/// Format the selection decisions, the final specification and its scores.
pub fn format_run_summary(n_train: usize, selection: &Selection, config: &SelectionConfig) -> String {
    let mut out = String::new();

    out.push_str("=== cmom - cluster moment regression ===\n");
    out.push_str(&format!(
        "Training rows: {n_train} | alpha={} | max degree={} | folds={} | seed={}\n",
        config.alpha, config.max_degree, config.folds, config.seed
    ));

    out.push_str("\nTransform vote (adjusted R², main effects, degree 1):\n");
    out.push_str(&format!("{:<12} {:>10} {:>10} {:>6}\n", "response", "identity", "log", "log?"));
    for v in &selection.votes {
        out.push_str(&format!(
            "{:<12} {:>10} {:>10} {:>6}\n",
            v.response.column_name(),
            fmt_f(v.identity_adj_r_squared, 4),
            fmt_f(v.log_adj_r_squared, 4),
            if v.log_wins { "yes" } else { "no" }
        ));
    }
    out.push_str(&format!("-> transform: {}\n", selection.transform.label()));

    out.push_str(&format!("\nInteraction tests (alpha={}):\n", config.alpha));
    out.push_str(&format!(
        "{:<14} {:<12} {:>10} {:>10}\n",
        "term", "response", "F", "p"
    ));
    for t in &selection.interaction_tests {
        let suffix = match &t.note {
            Some(note) => format!("  ({})", truncate(note, 48)),
            None if t.significant => "  *".to_string(),
            None => String::new(),
        };
        out.push_str(&format!(
            "{:<14} {:<12} {:>10} {:>10}{suffix}\n",
            t.interaction.label(),
            t.response.column_name(),
            fmt_opt(t.f_stat, 3),
            fmt_opt(t.p_value, 4),
        ));
    }
    for d in &selection.interactions {
        out.push_str(&format!(
            "-> {:<14} significant for {}/{} responses: {}\n",
            d.interaction.label(),
            d.significant_responses,
            d.tested_responses,
            if d.retained { "kept" } else { "dropped" }
        ));
    }

    out.push_str("\nDegree selection (sequential ANOVA p-values by degree):\n");
    for d in &selection.degrees {
        let ps: Vec<String> = d
            .anova
            .iter()
            .skip(1)
            .enumerate()
            .map(|(i, row)| format!("{}:{}", i + 2, fmt_opt(row.p_value, 4)))
            .collect();
        out.push_str(&format!(
            "{:<12} selected={} (fitted up to {}) [{}]\n",
            d.response.column_name(),
            d.selected,
            d.max_fitted,
            ps.join(" ")
        ));
    }
    out.push_str(&format!("-> shared degree: {}\n", selection.shared_degree));

    out.push_str("\nFinal specification:\n");
    out.push_str(&format!("- {}\n", selection.spec));

    out.push_str("\nFit quality (fitting scale):\n");
    out.push_str(&format!(
        "{:<12} {:>5} {:>6} {:>12} {:>8} {:>8} {:>10} {:>10}\n",
        "response", "n", "p", "RSS", "R2", "adj R2", "AIC", "BIC"
    ));
    for s in &selection.scores {
        out.push_str(&format!(
            "{:<12} {:>5} {:>6} {:>12} {:>8} {:>8} {:>10} {:>10}\n",
            s.response.column_name(),
            s.n,
            fmt_f(s.params, 1),
            fmt_f(s.rss, 5),
            fmt_f(s.r_squared, 4),
            fmt_f(s.adj_r_squared, 4),
            fmt_f(s.aic, 2),
            fmt_f(s.bic, 2),
        ));
    }
    for m in &selection.models {
        if let Some(raw) = m.st_raw_coefficients() {
            out.push_str(&format!("- {} St polynomial (raw powers): {}\n", m.response, fmt_vec(&raw)));
        }
    }

    out
}

/// Format the cross-validated family comparison.
pub fn format_families(families: &[FamilyComparison]) -> String {
    let mut out = String::new();
    if families.is_empty() {
        return out;
    }

    out.push_str("Family comparison (cross-validated MSE, original scale):\n");
    out.push_str(&format!(
        "{:<12} {:<16} {:>14} {:>12}\n",
        "response", "family", "cv MSE", "lambda"
    ));
    for fam in families {
        let best = fam
            .scores
            .iter()
            .filter_map(|s| s.cv_mse)
            .fold(f64::INFINITY, f64::min);
        for s in &fam.scores {
            let lambda = match (&fam.ridge, s.family) {
                (Some(r), crate::fit::Family::Ridge) => fmt_f(r.best_lambda, 6),
                _ => String::new(),
            };
            let marker = if s.cv_mse == Some(best) { " *" } else { "" };
            let note = s
                .note
                .as_deref()
                .map(|n| format!("  ({})", truncate(n, 48)))
                .unwrap_or_default();
            out.push_str(
                format!(
                    "{:<12} {:<16} {:>14} {:>12}{marker}{note}\n",
                    fam.response.column_name(),
                    s.family.label(),
                    fmt_opt(s.cv_mse, 6),
                    lambda,
                )
                .trim_end(),
            );
            out.push('\n');
        }
    }
    out
}

/// Format coefficient tables with confidence intervals.
pub fn format_intervals(tables: &[ResponseIntervals], level: f64) -> String {
    let mut out = String::new();
    for table in tables {
        out.push_str(&format!(
            "{} coefficients ({:.0}% intervals):\n",
            table.response.column_name(),
            level * 100.0
        ));
        out.push_str(&format!(
            "{:<32} {:>12} {:>12} {:>12} {:>12}\n",
            "term", "estimate", "std.error", "low", "high"
        ));
        for ci in &table.intervals {
            out.push_str(&format!(
                "{:<32} {:>12} {:>12} {:>12} {:>12}\n",
                truncate(&ci.name, 32),
                fmt_f(ci.estimate, 6),
                fmt_f(ci.std_error, 6),
                fmt_f(ci.low, 6),
                fmt_f(ci.high, 6),
            ));
        }
        out.push('\n');
    }
    out
}

/// Format holdout errors.
pub fn format_holdout(scores: &[HoldoutScore]) -> String {
    let mut out = String::new();
    if scores.is_empty() {
        return out;
    }
    out.push_str("Holdout MSE (original scale):\n");
    for s in scores {
        out.push_str(&format!(
            "{:<12} n={:<5} MSE={}\n",
            s.response.column_name(),
            s.n,
            fmt_f(s.mse, 6)
        ));
    }
    out
}

fn fmt_f(v: f64, decimals: usize) -> String {
    if v.is_nan() {
        "NA".to_string()
    } else if v.abs() >= 1e6 || (v != 0.0 && v.abs() < 1e-4) {
        format!("{v:.3e}")
    } else {
        format!("{v:.decimals$}")
    }
}

fn fmt_opt(v: Option<f64>, decimals: usize) -> String {
    v.map(|x| fmt_f(x, decimals)).unwrap_or_else(|| "-".to_string())
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.6}")).collect();
    format!("[{}]", parts.join(", "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Response;
    use crate::fit::{Family, FamilyScore};
    use crate::models::{CoefficientInterval, Term};

    #[test]
    fn numbers_switch_to_scientific_at_extremes() {
        assert_eq!(fmt_f(1.23456, 2), "1.23");
        assert_eq!(fmt_f(f64::NAN, 2), "NA");
        assert_eq!(fmt_f(0.0, 3), "0.000");
        assert!(fmt_f(2.5e-7, 4).contains('e'));
        assert_eq!(fmt_opt(None, 3), "-");
    }

    #[test]
    fn truncate_marks_cut_strings() {
        assert_eq!(truncate("gravity", 10), "gravity");
        assert_eq!(truncate("gravity[moderate]:flow[high]", 8), "gravity.");
    }

    #[test]
    fn families_mark_the_best_score() {
        let families = [FamilyComparison {
            response: Response::Moment1,
            scores: vec![
                FamilyScore {
                    family: Family::OlsPolynomial,
                    spec_id: "a".to_string(),
                    cv_mse: Some(0.5),
                    note: None,
                },
                FamilyScore {
                    family: Family::NaturalSpline,
                    spec_id: "b".to_string(),
                    cv_mse: Some(0.25),
                    note: None,
                },
                FamilyScore {
                    family: Family::Ridge,
                    spec_id: "a".to_string(),
                    cv_mse: None,
                    note: Some("fold 2 failed".to_string()),
                },
            ],
            ridge: None,
        }];
        let text = format_families(&families);
        let spline_line = text.lines().find(|l| l.contains("natural spline")).unwrap();
        assert!(spline_line.ends_with('*'));
        assert!(text.contains("(fold 2 failed)"));
    }

    #[test]
    fn intervals_table_lists_every_term() {
        let tables = [ResponseIntervals {
            response: Response::Moment2,
            intervals: vec![CoefficientInterval {
                term: Term::St(1),
                name: Term::St(1).to_string(),
                estimate: 0.1,
                std_error: 0.01,
                low: 0.08,
                high: 0.12,
            }],
        }];
        let text = format_intervals(&tables, 0.95);
        assert!(text.starts_with("R_moment_2 coefficients (95% intervals):"));
        assert!(text.contains("St[1]"));
        assert!(text.contains("0.120000"));
    }
}
