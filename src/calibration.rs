//! Blank correction and calibration against certified reference materials
//!
//! Each function here fills one group of derived fields of the working table. They run in order,
//!
//! 1. [`correct_blanks`] subtracts the blank predicted by the session drift fit from the counts,
//! 2. [`standard_calibration_factors`] turns each reference standard into a calibration factor,
//! 3. [`session_calibrations`] averages the valid factors of each session,
//! 4. [`calibrate`] applies the session factor to every row.
//!
//! A row missing any input of a step gets an empty output for that step and every later one.
use itertools::Itertools;

use crate::dbs::DbsRow;
use crate::diagnostics::{Diagnostic, DiagnosticKind, Location};
use crate::math;
use crate::session::{Session, Sessions};

/// Subtract the blank accumulated over each titration from its counts
pub fn correct_blanks(rows: &mut [DbsRow], sessions: &Sessions) {
    for row in rows.iter_mut() {
        let session = row.session_id.as_ref().and_then(|id| sessions.get(id));
        row.analysis_datenum_scaled = session
            .zip(row.analysis_datenum)
            .and_then(|(session, datenum)| session.scale_time(datenum));
        row.predicted_blank = session
            .zip(row.analysis_datenum_scaled)
            .and_then(|(session, scaled)| session.predict_blank_scaled(scaled));
        row.corrected_counts = match (row.counts, row.run_time, row.predicted_blank) {
            (Some(counts), Some(run_time), Some(blank)) => Some(counts - run_time * blank),
            _ => None,
        };
    }
}

/// Calibration factor of every row carrying a certified value
///
/// The factor converts blank-corrected counts into µmol per litre of sample, so multiplying it
/// back by the corrected counts and dividing by density recovers the certified value.
pub fn standard_calibration_factors(rows: &mut [DbsRow]) {
    for row in rows.iter_mut() {
        row.calibration_factor_here = match (
            row.certified_reference_value,
            row.density_analysis,
            row.corrected_counts,
        ) {
            (Some(certified), Some(density), Some(corrected)) => {
                Some(certified * density / corrected)
            }
            _ => None,
        };
    }
}

/// Average the usable calibration factors of each session and broadcast them to its rows
///
/// Only rows for which [`DbsRow::uses_calibration_factor`] holds contribute. A session without
/// any is reported and its rows get no session factor.
pub fn session_calibrations(rows: &mut [DbsRow], sessions: &mut Sessions) -> Vec<Diagnostic> {
    let factors = rows
        .iter()
        .filter(|row| row.uses_calibration_factor())
        .filter_map(|row| Some((row.session_id.clone()?, row.calibration_factor_here?)))
        .into_group_map();

    let session_ids = rows
        .iter()
        .filter_map(|row| row.session_id.clone())
        .unique()
        .collect::<Vec<_>>();

    let mut diagnostics = vec![];
    for session_id in session_ids {
        let session = sessions
            .entry(session_id.clone())
            .or_insert_with(|| Session::empty(&session_id));
        let used = factors.get(&session_id).map_or(&[][..], Vec::as_slice);
        session.calibration_factor_mean = math::mean(used);
        session.calibration_factor_std = math::sample_std(used);
        session.calibration_factor_count = used.len();
        if used.is_empty() {
            diagnostics.push(Diagnostic::raise(
                DiagnosticKind::EmptySession,
                Location::Session(session_id.clone()),
                "no valid reference standards, session left uncalibrated",
            ));
        } else {
            log::info!(
                "session {session_id}: calibration factor {:?} from {} standards",
                session.calibration_factor_mean,
                used.len()
            );
        }
    }

    for row in rows.iter_mut() {
        row.session_calibration_factor = row
            .session_id
            .as_ref()
            .and_then(|id| sessions.get(id))
            .and_then(|session| session.calibration_factor_mean);
    }

    diagnostics
}

/// Apply the session calibration factor to every row
pub fn calibrate(rows: &mut [DbsRow]) {
    for row in rows.iter_mut() {
        row.calibrated_value = match (
            row.corrected_counts,
            row.session_calibration_factor,
            row.density_analysis,
        ) {
            (Some(corrected), Some(factor), Some(density)) => Some(corrected * factor / density),
            _ => None,
        };
        row.calibration_offset = row
            .calibrated_value
            .zip(row.certified_reference_value)
            .map(|(calibrated, certified)| calibrated - certified);
    }
}

/// Undo the dilution of a sample by the mercuric chloride added to preserve it
///
/// # Examples
///
/// ```
/// use vindta::calibration::poison_correction;
///
/// assert_eq!(poison_correction(2000.0, 500.0, 0.1), 2000.0 * (1.0 + 0.1 / 500.0));
/// ```
pub fn poison_correction(value: f64, sample_volume: f64, poison_volume: f64) -> f64 {
    value * (1.0 + poison_volume / sample_volume)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate};

    use super::{
        calibrate, correct_blanks, poison_correction, session_calibrations,
        standard_calibration_factors,
    };
    use crate::dbs::DbsRow;
    use crate::diagnostics::{DiagnosticKind, Location};
    use crate::session::{Session, Sessions};

    const DENSITY: f64 = 1.0233;
    const CERTIFIED: f64 = 2029.19;

    /// A session whose drift fit is a flat blank of 10 counts per minute
    fn flat_session(id: &str) -> Sessions {
        let mut session = Session::empty(id);
        session.time_mean = Some(17_756.0);
        session.time_std = Some(0.1);
        session.blank_fit_params = Some([10.0, 0.0, 0.0, 0.0, 1.0]);
        Sessions::from([(id.to_owned(), session)])
    }

    fn row(bottle: &str, minutes: i64, counts: f64) -> DbsRow {
        let start = NaiveDate::from_ymd_opt(2018, 8, 13)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let mut row = DbsRow::new(bottle)
            .with_session("C1")
            .with_analysis_datetime(start + Duration::minutes(minutes))
            .with_counts(counts, 10.0);
        row.density_analysis = Some(DENSITY);
        row
    }

    fn crm(minutes: i64, counts: f64) -> DbsRow {
        row("171", minutes, counts).with_certified_value(CERTIFIED)
    }

    fn run_all(rows: &mut [DbsRow], sessions: &mut Sessions) {
        correct_blanks(rows, sessions);
        standard_calibration_factors(rows);
        session_calibrations(rows, sessions);
        calibrate(rows);
    }

    #[test]
    fn blank_correction_subtracts_the_blank_over_the_run_time() {
        let mut rows = vec![row("NIOZ_001", 0, 20_100.0)];
        correct_blanks(&mut rows, &flat_session("C1"));

        approx::assert_relative_eq!(rows[0].predicted_blank.unwrap(), 10.0);
        approx::assert_relative_eq!(rows[0].corrected_counts.unwrap(), 20_000.0);
        assert!(rows[0].analysis_datenum_scaled.is_some());
    }

    #[test]
    fn rows_of_unfitted_sessions_are_left_uncorrected() {
        let mut rows = vec![row("NIOZ_001", 0, 20_100.0).with_session("C2")];
        let mut sessions = flat_session("C1");
        sessions.insert("C2".to_owned(), Session::empty("C2"));

        run_all(&mut rows, &mut sessions);

        assert!(rows[0].predicted_blank.is_none());
        assert!(rows[0].corrected_counts.is_none());
        assert!(rows[0].calibrated_value.is_none());
    }

    #[test]
    fn session_factor_is_the_mean_of_its_standards() {
        let mut rows = vec![
            crm(0, 20_100.0),
            row("NIOZ_001", 20, 19_500.0),
            crm(40, 20_150.0),
            crm(60, 20_050.0),
        ];
        let mut sessions = flat_session("C1");

        run_all(&mut rows, &mut sessions);

        let factors = [0, 2, 3]
            .iter()
            .map(|&ii| rows[ii].calibration_factor_here.unwrap())
            .collect::<Vec<_>>();
        approx::assert_relative_eq!(factors[0], CERTIFIED * DENSITY / 20_000.0);
        let expected = factors.iter().sum::<f64>() / 3.0;

        let session = &sessions["C1"];
        approx::assert_relative_eq!(session.calibration_factor_mean.unwrap(), expected);
        assert_eq!(session.calibration_factor_count, 3);
        assert!(rows[1].calibration_factor_here.is_none());
        approx::assert_relative_eq!(rows[1].session_calibration_factor.unwrap(), expected);
        approx::assert_relative_eq!(
            rows[1].calibrated_value.unwrap(),
            19_400.0 * expected / DENSITY
        );
        assert!(rows[1].calibration_offset.is_none());
    }

    #[test]
    fn calibrated_standards_scatter_around_their_certified_value() {
        let mut rows = vec![crm(0, 20_100.0), crm(40, 20_150.0), crm(60, 20_050.0)];
        let mut sessions = flat_session("C1");

        run_all(&mut rows, &mut sessions);

        let offsets = rows
            .iter()
            .map(|row| row.calibration_offset.unwrap())
            .collect::<Vec<_>>();
        approx::assert_abs_diff_eq!(offsets.iter().sum::<f64>(), 0.0, epsilon = 0.05);
        approx::assert_abs_diff_eq!(offsets[1], CERTIFIED * (50.0 / 20_000.0), epsilon = 0.02);
    }

    #[test]
    fn excluded_standards_do_not_count_towards_the_session_factor() {
        let mut rows = vec![crm(0, 20_100.0), crm(40, 20_150.0), crm(60, 21_000.0)];
        rows[2].calibration_factor_is_valid = Some(false);
        let mut sessions = flat_session("C1");

        run_all(&mut rows, &mut sessions);

        let expected = (rows[0].calibration_factor_here.unwrap()
            + rows[1].calibration_factor_here.unwrap())
            / 2.0;
        let session = &sessions["C1"];
        approx::assert_relative_eq!(session.calibration_factor_mean.unwrap(), expected);
        assert_eq!(session.calibration_factor_count, 2);
        assert!(rows[2].calibration_factor_here.is_some());
        approx::assert_relative_eq!(rows[2].session_calibration_factor.unwrap(), expected);
    }

    #[test]
    fn samples_can_be_opted_in_as_calibrants() {
        let mut rows = vec![crm(0, 20_100.0), row("NIOZ_001", 20, 19_500.0)];
        rows[1].certified_reference_value = Some(2000.0);
        rows[1].calibration_factor_is_valid = Some(true);
        let mut sessions = flat_session("C1");

        run_all(&mut rows, &mut sessions);

        assert_eq!(sessions["C1"].calibration_factor_count, 2);
    }

    #[test]
    fn session_without_standards_is_reported_and_uncalibrated() {
        let mut rows = vec![row("NIOZ_001", 20, 19_500.0)];
        let mut sessions = flat_session("C1");

        correct_blanks(&mut rows, &sessions);
        standard_calibration_factors(&mut rows);
        let diagnostics = session_calibrations(&mut rows, &mut sessions);
        calibrate(&mut rows);

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::EmptySession);
        assert_eq!(diagnostics[0].location, Location::Session("C1".to_owned()));
        assert_eq!(sessions["C1"].calibration_factor_count, 0);
        assert!(rows[0].corrected_counts.is_some());
        assert!(rows[0].calibrated_value.is_none());
    }

    #[test]
    fn poison_correction_scales_by_the_added_volume() {
        approx::assert_relative_eq!(poison_correction(2000.0, 500.0, 0.0), 2000.0);
        approx::assert_relative_eq!(poison_correction(2000.0, 250.0, 0.05), 2000.4);
    }
}
