//! Export predictions and coefficient intervals to CSV.
//!
//! The exports are meant to be easy to consume in spreadsheets or R.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::domain::{PredictionRow, Response};
use crate::error::AppError;
use crate::models::ResponseIntervals;

/// Write the prediction table: input columns (plus observed moments when the
/// input carried them) followed by `pred_R_moment_1..4`.
pub fn write_predictions_csv(path: &Path, rows: &[PredictionRow]) -> Result<(), AppError> {
    let mut file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create predictions CSV '{}': {e}", path.display())))?;
    write_predictions(&mut file, rows)
        .map_err(|e| AppError::new(2, format!("Failed to write predictions CSV: {e}")))?;
    tracing::info!(path = %path.display(), rows = rows.len(), "wrote predictions");
    Ok(())
}

/// Write one line per (response, coefficient):
/// `response,term,estimate,std_error,low,high`.
pub fn write_intervals_csv(path: &Path, tables: &[ResponseIntervals]) -> Result<(), AppError> {
    let mut file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create intervals CSV '{}': {e}", path.display())))?;
    write_intervals(&mut file, tables)
        .map_err(|e| AppError::new(2, format!("Failed to write intervals CSV: {e}")))?;
    tracing::info!(path = %path.display(), responses = tables.len(), "wrote coefficient intervals");
    Ok(())
}

fn write_predictions<W: Write>(out: &mut W, rows: &[PredictionRow]) -> std::io::Result<()> {
    let with_observed = rows.iter().any(|r| r.obs.moments.is_some());

    let mut header = vec!["Re".to_string(), "Fr".to_string(), "St".to_string()];
    if with_observed {
        header.extend(Response::ALL.iter().map(|r| r.column_name().to_string()));
    }
    header.extend(Response::ALL.iter().map(|r| format!("pred_{}", r.column_name())));
    writeln!(out, "{}", header.join(","))?;

    for row in rows {
        let mut fields = vec![fmt_num(row.obs.re), fmt_num(row.obs.fr), fmt_num(row.obs.st)];
        if with_observed {
            match row.obs.moments {
                Some(m) => fields.extend(m.iter().map(|&v| fmt_num(v))),
                None => fields.extend(std::iter::repeat_n(String::new(), 4)),
            }
        }
        fields.extend(row.predicted.iter().map(|&v| fmt_num(v)));
        writeln!(out, "{}", fields.join(","))?;
    }
    Ok(())
}

fn write_intervals<W: Write>(out: &mut W, tables: &[ResponseIntervals]) -> std::io::Result<()> {
    writeln!(out, "response,term,estimate,std_error,low,high")?;
    for table in tables {
        for ci in &table.intervals {
            writeln!(
                out,
                "{},{},{},{},{},{}",
                table.response.column_name(),
                ci.name,
                fmt_num(ci.estimate),
                fmt_num(ci.std_error),
                fmt_num(ci.low),
                fmt_num(ci.high),
            )?;
        }
    }
    Ok(())
}

/// Shortest round-trip representation; infinities use R's `Inf` spelling.
fn fmt_num(v: f64) -> String {
    if v == f64::INFINITY {
        "Inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else if v.is_nan() {
        "NA".to_string()
    } else {
        format!("{v}")
    }
}
