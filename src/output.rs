//! Tab-delimited writers for processed tables
use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::dbs::DbsRow;
use crate::session::{Session, Sessions};
use crate::Result;

const ROW_COLUMNS: [&str; 26] = [
    "bottle",
    "analysis_datetime",
    "analysis_datenum",
    "session_id",
    "counts",
    "run_time",
    "salinity",
    "temperature_analysis",
    "density_analysis",
    "certified_reference_value",
    "is_reference_standard",
    "logfile_index",
    "blank_estimate",
    "blank_estimate_min",
    "blank_estimate_max",
    "blank_estimate_std",
    "blank_estimate_count",
    "blank_is_valid",
    "analysis_datenum_scaled",
    "predicted_blank",
    "corrected_counts",
    "calibration_factor_here",
    "calibration_factor_is_valid",
    "session_calibration_factor",
    "calibrated_value",
    "calibration_offset",
];

fn number(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn row_record(row: &DbsRow, extra_columns: &[&str]) -> Vec<String> {
    let blank = &row.sample_blank;
    let mut record = vec![
        row.bottle.clone(),
        row.analysis_datetime
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default(),
        number(row.analysis_datenum),
        row.session_id.clone().unwrap_or_default(),
        number(row.counts),
        number(row.run_time),
        number(row.salinity),
        number(row.temperature_analysis),
        number(row.density_analysis),
        number(row.certified_reference_value),
        row.is_reference_standard.to_string(),
        row.logfile_index.map(|i| i.to_string()).unwrap_or_default(),
        number(blank.mean),
        number(blank.min),
        number(blank.max),
        number(blank.std),
        blank.count.to_string(),
        row.blank_is_valid.to_string(),
        number(row.analysis_datenum_scaled),
        number(row.predicted_blank),
        number(row.corrected_counts),
        number(row.calibration_factor_here),
        row.uses_calibration_factor().to_string(),
        number(row.session_calibration_factor),
        number(row.calibrated_value),
        number(row.calibration_offset),
    ];
    record.extend(
        extra_columns
            .iter()
            .map(|column| row.extra(column).unwrap_or_default().to_owned()),
    );
    record
}

/// Write rows with every derived field, followed by the columns carried over from the source
///
/// Extra columns are the union over all rows, in order of first appearance. Missing values are
/// written as empty cells.
///
/// # Errors
/// Returns an error if writing fails.
pub fn write_rows<W: Write>(writer: W, rows: &[DbsRow]) -> Result<()> {
    let mut extra_columns: Vec<&str> = vec![];
    for (name, _) in rows.iter().flat_map(|row| row.extra.iter()) {
        if !extra_columns.contains(&name.as_str()) && !ROW_COLUMNS.contains(&name.as_str()) {
            extra_columns.push(name);
        }
    }

    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);
    wtr.write_record(ROW_COLUMNS.iter().chain(extra_columns.iter()))?;
    for row in rows {
        wtr.write_record(row_record(row, &extra_columns))?;
    }
    wtr.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct SessionRecord<'a> {
    session_id: &'a str,
    blank_count: usize,
    time_mean: Option<f64>,
    time_std: Option<f64>,
    blank_mean: Option<f64>,
    blank_median: Option<f64>,
    p0: Option<f64>,
    p1: Option<f64>,
    p2: Option<f64>,
    p3: Option<f64>,
    p4: Option<f64>,
    fit_residual_std: Option<f64>,
    fit_rmse: Option<f64>,
    fit_iterations: Option<u64>,
    calibration_factor_mean: Option<f64>,
    calibration_factor_std: Option<f64>,
    calibration_factor_count: usize,
}

impl<'a> From<&'a Session> for SessionRecord<'a> {
    fn from(session: &'a Session) -> Self {
        let p = |ii: usize| session.blank_fit_params.map(|params| params[ii]);
        Self {
            session_id: &session.session_id,
            blank_count: session.blank_count,
            time_mean: session.time_mean,
            time_std: session.time_std,
            blank_mean: session.blank_mean,
            blank_median: session.blank_median,
            p0: p(0),
            p1: p(1),
            p2: p(2),
            p3: p(3),
            p4: p(4),
            fit_residual_std: session.fit_residual_std,
            fit_rmse: session.fit_rmse,
            fit_iterations: session.fit_iterations,
            calibration_factor_mean: session.calibration_factor_mean,
            calibration_factor_std: session.calibration_factor_std,
            calibration_factor_count: session.calibration_factor_count,
        }
    }
}

/// Write one line per session, ordered by session id
///
/// # Errors
/// Returns an error if writing fails.
pub fn write_sessions<W: Write>(writer: W, sessions: &Sessions) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);
    for session in sessions.values() {
        wtr.serialize(SessionRecord::from(session))?;
    }
    wtr.flush()?;
    Ok(())
}

pub(crate) fn write_rows_to_file(path: &Path, rows: &[DbsRow]) -> Result<()> {
    log::info!("writing {} rows to {path:?}", rows.len());
    write_rows(File::create(path)?, rows)
}

pub(crate) fn write_sessions_to_file(path: &Path, sessions: &Sessions) -> Result<()> {
    log::info!("writing {} sessions to {path:?}", sessions.len());
    write_sessions(File::create(path)?, sessions)
}
