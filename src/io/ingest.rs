//! CSV ingest.
//!
//! Turns a simulation table into [`Observation`]s:
//!
//! - **Strict schema**: `Re`, `Fr`, `St` are required; `R_moment_1..4` are
//!   all present or all absent (clear errors + exit code 2)
//! - **No silent dropping**: any bad row aborts the load, listing the first
//!   few offending lines
//! - Header names are matched case-insensitively; `Inf`/`inf` parse as `+∞`

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;

use crate::domain::{Observation, Response};
use crate::error::AppError;

/// How many row errors are echoed before truncating.
const MAX_REPORTED_ROW_ERRORS: usize = 5;

/// A loaded table.
#[derive(Debug, Clone)]
pub struct Table {
    pub observations: Vec<Observation>,
    /// Whether the table carried the four moment columns.
    pub has_responses: bool,
}

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    /// 1-based line number in the file (header is line 1).
    pub line: usize,
    pub message: String,
}

/// Load a table from `path`. Training tables pass `require_responses`.
pub fn read_table(path: &Path, require_responses: bool) -> Result<Table, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open CSV '{}': {e}", path.display())))?;
    let table = parse_table(file, require_responses)
        .map_err(|e| AppError::new(e.exit_code(), format!("{}: {e}", path.display())))?;
    tracing::info!(
        path = %path.display(),
        rows = table.observations.len(),
        responses = table.has_responses,
        "loaded table"
    );
    Ok(table)
}

/// Parse a table from any reader.
pub fn parse_table<R: Read>(reader: R, require_responses: bool) -> Result<Table, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    for name in ["re", "fr", "st"] {
        if !header_map.contains_key(name) {
            return Err(AppError::new(2, format!("Missing required column: `{name}`")));
        }
    }

    let moment_columns: Vec<String> = Response::ALL
        .iter()
        .map(|r| r.column_name().to_ascii_lowercase())
        .collect();
    let present = moment_columns.iter().filter(|c| header_map.contains_key(*c)).count();
    let has_responses = match present {
        0 if require_responses => {
            return Err(AppError::new(
                2,
                "Training table needs columns R_moment_1..R_moment_4.",
            ));
        }
        0 => false,
        4 => true,
        _ => {
            return Err(AppError::new(
                2,
                "Moment columns must be all present (R_moment_1..R_moment_4) or all absent.",
            ));
        }
    };

    let mut observations = Vec::new();
    let mut row_errors = Vec::new();

    for (i, record) in reader.records().enumerate() {
        let line = i + 2;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("unreadable record: {e}"),
                });
                continue;
            }
        };
        match parse_row(&record, &header_map, has_responses.then_some(moment_columns.as_slice())) {
            Ok(obs) => observations.push(obs),
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    if !row_errors.is_empty() {
        let mut msg = format!("{} invalid row(s):", row_errors.len());
        for err in row_errors.iter().take(MAX_REPORTED_ROW_ERRORS) {
            msg.push_str(&format!("\n  line {}: {}", err.line, err.message));
        }
        if row_errors.len() > MAX_REPORTED_ROW_ERRORS {
            msg.push_str("\n  ...");
        }
        return Err(AppError::new(2, msg));
    }
    if observations.is_empty() {
        return Err(AppError::new(2, "Table has no data rows."));
    }

    Ok(Table {
        observations,
        has_responses,
    })
}

fn parse_row(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    moment_columns: Option<&[String]>,
) -> Result<Observation, String> {
    let re = parse_number(get_required(record, header_map, "re")?)?;
    let fr = parse_number(get_required(record, header_map, "fr")?)?;
    let st = parse_number(get_required(record, header_map, "st")?)?;
    if !st.is_finite() {
        return Err(format!("St must be finite, got {st}"));
    }

    let moments = match moment_columns {
        Some(columns) => {
            let mut m = [0.0; 4];
            for (slot, name) in m.iter_mut().zip(columns) {
                *slot = parse_number(get_required(record, header_map, name)?)?;
                if !slot.is_finite() {
                    return Err(format!("`{name}` must be finite"));
                }
            }
            Some(m)
        }
        None => None,
    };

    Ok(Observation::new(re, fr, st, moments))
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports may prefix the first header with a UTF-8 BOM.
    let name = name.trim().trim_start_matches('\u{feff}').trim_matches('"');
    name.to_ascii_lowercase()
}

fn get_required<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Result<&'a str, String> {
    let idx = header_map
        .get(name)
        .ok_or_else(|| format!("Missing required column: `{name}`"))?;
    record
        .get(*idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required value: `{name}`"))
}

/// Parse a number, accepting R-style `Inf`/`-Inf`. `NA`/`NaN` are rejected.
fn parse_number(s: &str) -> Result<f64, String> {
    match s.to_ascii_lowercase().as_str() {
        "inf" | "+inf" | "infinity" | "+infinity" => return Ok(f64::INFINITY),
        "-inf" | "-infinity" => return Ok(f64::NEG_INFINITY),
        "na" | "nan" => return Err(format!("missing value '{s}'")),
        _ => {}
    }
    s.parse::<f64>()
        .map_err(|_| format!("invalid number '{s}'"))
        .and_then(|v| {
            if v.is_nan() {
                Err(format!("missing value '{s}'"))
            } else {
                Ok(v)
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_training_table_with_infinite_froude() {
        let csv = "\u{feff}St,Re,Fr,R_moment_1,R_moment_2,R_moment_3,R_moment_4\n\
                   0.1,90,Inf,0.02,0.0004,0.00001,0.000001\n\
                   1.5,224,0.3,0.05,0.01,0.002,0.0005\n";
        let table = parse_table(csv.as_bytes(), true).unwrap();
        assert!(table.has_responses);
        assert_eq!(table.observations.len(), 2);
        let first = table.observations[0];
        assert!(first.fr.is_infinite() && first.fr > 0.0);
        assert_eq!(first.re, 90.0);
        assert_eq!(first.moments.unwrap()[1], 0.0004);
    }

    #[test]
    fn prediction_table_needs_no_moments() {
        let csv = "Re,Fr,St\n398,0.052,2.0\n";
        let table = parse_table(csv.as_bytes(), false).unwrap();
        assert!(!table.has_responses);
        assert_eq!(table.observations[0].moments, None);
        assert_eq!(parse_table(csv.as_bytes(), true).unwrap_err().exit_code(), 2);
    }

    #[test]
    fn partial_moment_columns_are_rejected() {
        let csv = "Re,Fr,St,R_moment_1\n90,0.3,1.0,0.2\n";
        assert!(parse_table(csv.as_bytes(), false).is_err());
    }

    #[test]
    fn bad_rows_abort_with_line_numbers() {
        let csv = "Re,Fr,St\n90,0.3,1.0\n224,NA,1.0\n398,0.3,abc\n";
        let err = parse_table(csv.as_bytes(), false).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("2 invalid row(s)"));
        assert!(msg.contains("line 3"));
        assert!(msg.contains("line 4"));
    }

    #[test]
    fn missing_required_column_is_reported() {
        let csv = "Re,St\n90,1.0\n";
        let err = parse_table(csv.as_bytes(), false).unwrap_err();
        assert!(err.to_string().contains("`fr`"));
    }
}
