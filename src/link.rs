use chrono::{NaiveDateTime, Timelike};

use crate::dbs::DbsRow;
use crate::logfile::Logfile;
use crate::{Error, Result};

/// Logfile run start times only carry whole minutes
fn to_minute(datetime: NaiveDateTime) -> NaiveDateTime {
    datetime.with_second(0).and_then(|dt| dt.with_nanosecond(0)).unwrap_or(datetime)
}

/// Find the logfile run that recorded a dbs row
///
/// A run matches when its sample label equals the row's bottle and it started in the same minute
/// the row was analysed. Rows with no analysis time, or no matching run, are left unlinked.
///
/// # Errors
/// Returns [`Error::AmbiguousLink`] when more than one run matches.
pub fn find_run(row_index: usize, row: &DbsRow, logfile: &Logfile) -> Result<Option<usize>> {
    let Some(datetime) = row.analysis_datetime else {
        return Ok(None);
    };
    let matches = logfile.find(&row.bottle, to_minute(datetime));
    match matches.as_slice() {
        [] => Ok(None),
        [line] => Ok(Some(*line)),
        _ => Err(Error::AmbiguousLink {
            row: row_index,
            bottle: row.bottle.clone(),
            matches: matches.len(),
        }),
    }
}

/// Link every row of a table to its logfile run
///
/// # Errors
/// Fails on the first row with more than one matching run.
pub fn link_rows(rows: &[DbsRow], logfile: &Logfile) -> Result<Vec<Option<usize>>> {
    let links = rows
        .iter()
        .enumerate()
        .map(|(ii, row)| find_run(ii, row, logfile))
        .collect::<Result<Vec<_>>>()?;
    log::info!(
        "linked {} of {} dbs rows to logfile runs",
        links.iter().flatten().count(),
        rows.len()
    );
    Ok(links)
}
