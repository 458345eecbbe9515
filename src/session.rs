//! Per-session blank drift fits and calibration summaries
use std::collections::BTreeMap;

use itertools::Itertools;

use crate::dbs::DbsRow;
use crate::diagnostics::{Diagnostic, DiagnosticKind, Location};
use crate::math;
use crate::minimisation::{blank_progression, fit_blank_progression, NUM_PARAMS};
use crate::Config;

/// Summary of one analysis session, indexed by session id in [`Sessions`]
#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    pub session_id: String,
    /// Number of valid sample blanks the fit used
    pub blank_count: usize,
    /// Mean of the analysis times used for centring
    pub time_mean: Option<f64>,
    /// Scale factor applied to centred analysis times
    pub time_std: Option<f64>,
    pub blank_mean: Option<f64>,
    pub blank_median: Option<f64>,
    /// Parameters of the blank drift model in scaled time
    pub blank_fit_params: Option<[f64; NUM_PARAMS]>,
    pub fit_iterations: Option<u64>,
    pub fit_residual_std: Option<f64>,
    pub fit_rmse: Option<f64>,
    pub calibration_factor_mean: Option<f64>,
    pub calibration_factor_std: Option<f64>,
    pub calibration_factor_count: usize,
}

pub type Sessions = BTreeMap<String, Session>;

impl Session {
    pub(crate) fn empty(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_owned(),
            blank_count: 0,
            time_mean: None,
            time_std: None,
            blank_mean: None,
            blank_median: None,
            blank_fit_params: None,
            fit_iterations: None,
            fit_residual_std: None,
            fit_rmse: None,
            calibration_factor_mean: None,
            calibration_factor_std: None,
            calibration_factor_count: 0,
        }
    }

    /// Centre and scale an analysis time with this session's parameters
    pub fn scale_time(&self, datenum: f64) -> Option<f64> {
        Some((datenum - self.time_mean?) / self.time_std?)
    }

    /// Blank predicted by the session fit at a scaled analysis time
    pub fn predict_blank_scaled(&self, scaled: f64) -> Option<f64> {
        self.blank_fit_params
            .map(|params| blank_progression(&params, scaled))
    }

    /// Blank predicted by the session fit at an analysis time
    pub fn predict_blank(&self, datenum: f64) -> Option<f64> {
        self.predict_blank_scaled(self.scale_time(datenum)?)
    }
}

/// Whether a row's blank can take part in its session's fit
fn has_usable_blank(row: &DbsRow) -> bool {
    row.blank_is_valid && row.blank_estimate().is_some() && row.analysis_datenum.is_some()
}

/// Fit the blank drift of every session in `rows`
///
/// Sessions are keyed by [`DbsRow::session_id`]. A session without any usable blank, or whose
/// fit fails, is still recorded but carries no fit, so corrections for its rows come out empty
/// while every other session is processed normally.
pub fn fit_sessions(rows: &[DbsRow], config: &Config) -> (Sessions, Vec<Diagnostic>) {
    let mut diagnostics = vec![];
    let groups = rows
        .iter()
        .enumerate()
        .filter_map(|(ii, row)| {
            if row.session_id.is_none() {
                diagnostics.push(Diagnostic::raise(
                    DiagnosticKind::MissingSession,
                    Location::DbsRow(ii),
                    format!("bottle `{}` has no session and is left uncorrected", row.bottle),
                ));
            }
            row.session_id.as_deref().map(|session| (session, row))
        })
        .into_group_map();

    let sessions = groups
        .into_iter()
        .map(|(session_id, members)| {
            let session = fit_session(session_id, &members, config, &mut diagnostics);
            (session_id.to_owned(), session)
        })
        .collect();

    (sessions, diagnostics)
}

fn fit_session(
    session_id: &str,
    members: &[&DbsRow],
    config: &Config,
    diagnostics: &mut Vec<Diagnostic>,
) -> Session {
    let (times, blanks): (Vec<f64>, Vec<f64>) = members
        .iter()
        .filter(|row| has_usable_blank(row))
        .filter_map(|row| Some((row.analysis_datenum?, row.blank_estimate()?)))
        .unzip();

    let mut session = Session::empty(session_id);
    if blanks.is_empty() {
        diagnostics.push(Diagnostic::raise(
            DiagnosticKind::EmptySession,
            Location::Session(session_id.to_owned()),
            "no valid sample blanks, session left without a blank fit",
        ));
        return session;
    }

    // A lone sample, or samples run in the same minute, have no spread to scale by
    let time_mean = math::mean(&times).unwrap_or_default();
    let time_std = math::sample_std(&times)
        .filter(|std| std.is_finite() && *std > 0.0)
        .unwrap_or(1.0);
    let scaled = times
        .iter()
        .map(|t| (t - time_mean) / time_std)
        .collect::<Vec<_>>();

    session.blank_count = blanks.len();
    session.time_mean = Some(time_mean);
    session.time_std = Some(time_std);
    session.blank_mean = math::mean(&blanks);
    session.blank_median = math::median(&blanks);

    match fit_blank_progression(&scaled, &blanks, config) {
        Ok(fit) => {
            let residuals = scaled
                .iter()
                .zip(blanks.iter())
                .map(|(&x, &blank)| blank_progression(&fit.params, x) - blank)
                .collect::<Vec<_>>();
            session.blank_fit_params = Some(fit.params);
            session.fit_iterations = Some(fit.iterations);
            session.fit_residual_std = math::sample_std(&residuals);
            session.fit_rmse = math::rms(&residuals);
            log::info!(
                "session {session_id}: fitted {} blanks, rmse {:?}",
                blanks.len(),
                session.fit_rmse
            );
        }
        Err(e) => {
            diagnostics.push(Diagnostic::raise(
                DiagnosticKind::FitFailed,
                Location::Session(session_id.to_owned()),
                e.to_string(),
            ));
        }
    }

    session
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    use super::fit_sessions;
    use crate::blank::SampleBlank;
    use crate::dbs::DbsRow;
    use crate::diagnostics::{DiagnosticKind, Location};
    use crate::Config;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, 8, 13)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn row_with_blank(session: &str, minutes: i64, blank: f64) -> DbsRow {
        let mut row = DbsRow::new(format!("B{minutes}"))
            .with_session(session)
            .with_analysis_datetime(start() + Duration::minutes(minutes));
        row.sample_blank = SampleBlank {
            mean: Some(blank),
            count: 5,
            ..SampleBlank::default()
        };
        row
    }

    #[test]
    fn constant_blank_session_fits_to_the_constant() {
        let rows = (0..20)
            .map(|ii| row_with_blank("C1", ii * 20, 30.0))
            .collect::<Vec<_>>();

        let (sessions, diagnostics) = fit_sessions(&rows, &Config::default());

        assert!(diagnostics.is_empty());
        let session = &sessions["C1"];
        let params = session.blank_fit_params.unwrap();
        approx::assert_abs_diff_eq!(params[0], 30.0, epsilon = 0.5);
        approx::assert_abs_diff_eq!(params[1], 0.0, epsilon = 0.1);
        approx::assert_abs_diff_eq!(params[2], 0.0, epsilon = 0.1);
        assert_eq!(session.blank_count, 20);
        approx::assert_relative_eq!(session.blank_mean.unwrap(), 30.0);
        approx::assert_relative_eq!(session.blank_median.unwrap(), 30.0);
        assert!(session.fit_rmse.unwrap() < 0.01);
    }

    #[test]
    fn predictions_use_the_stored_centring() {
        let rows = (0..10)
            .map(|ii| row_with_blank("C1", ii * 30, 20.0 + ii as f64))
            .collect::<Vec<_>>();

        let (sessions, _) = fit_sessions(&rows, &Config::default());
        let session = &sessions["C1"];

        for row in &rows {
            let predicted = session.predict_blank(row.analysis_datenum.unwrap()).unwrap();
            approx::assert_abs_diff_eq!(predicted, row.blank_estimate().unwrap(), epsilon = 0.05);
        }
        approx::assert_abs_diff_eq!(
            session.scale_time(session.time_mean.unwrap()).unwrap(),
            0.0
        );
    }

    #[test]
    fn invalid_and_missing_blanks_are_left_out_of_the_fit() {
        let mut rows = (0..10)
            .map(|ii| row_with_blank("C1", ii * 30, 30.0))
            .collect::<Vec<_>>();
        let mut outlier = row_with_blank("C1", 400, 300.0);
        outlier.blank_is_valid = false;
        rows.push(outlier);
        rows.push(DbsRow::new("unlinked").with_session("C1"));

        let (sessions, _) = fit_sessions(&rows, &Config::default());
        let session = &sessions["C1"];

        assert_eq!(session.blank_count, 10);
        approx::assert_relative_eq!(session.blank_mean.unwrap(), 30.0);
    }

    #[test]
    fn session_without_valid_blanks_is_kept_without_a_fit() {
        let mut rows = (0..5)
            .map(|ii| row_with_blank("C1", ii * 30, 30.0))
            .collect::<Vec<_>>();
        let mut flagged = row_with_blank("C2", 0, 30.0);
        flagged.blank_is_valid = false;
        rows.push(flagged);

        let (sessions, diagnostics) = fit_sessions(&rows, &Config::default());

        assert!(sessions["C1"].blank_fit_params.is_some());
        let empty = &sessions["C2"];
        assert!(empty.blank_fit_params.is_none());
        assert!(empty.blank_mean.is_none());
        assert!(empty.predict_blank(0.0).is_none());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::EmptySession);
        assert_eq!(diagnostics[0].location, Location::Session("C2".to_owned()));
    }

    #[test]
    fn single_sample_session_still_fits() {
        let rows = vec![row_with_blank("C1", 0, 25.0)];

        let (sessions, _) = fit_sessions(&rows, &Config::default());
        let session = &sessions["C1"];

        assert_eq!(session.time_std, Some(1.0));
        let predicted = session.predict_blank(rows[0].analysis_datenum.unwrap()).unwrap();
        approx::assert_abs_diff_eq!(predicted, 25.0, epsilon = 1e-3);
    }

    #[test]
    fn rows_without_a_session_are_reported() {
        let mut row = row_with_blank("C1", 0, 25.0);
        row.session_id = None;

        let (sessions, diagnostics) = fit_sessions(&[row], &Config::default());

        assert!(sessions.is_empty());
        assert_eq!(diagnostics[0].kind, DiagnosticKind::MissingSession);
        assert_eq!(diagnostics[0].location, Location::DbsRow(0));
    }

    #[test]
    fn sessions_are_fitted_independently() {
        let mut rows = (0..10)
            .map(|ii| row_with_blank("C1", ii * 30, 30.0))
            .collect::<Vec<_>>();
        rows.extend((0..10).map(|ii| row_with_blank("C2", 1000 + ii * 30, 50.0)));

        let (sessions, _) = fit_sessions(&rows, &Config::default());
        let alone = fit_sessions(&rows[..10], &Config::default()).0;

        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions["C1"], alone["C1"]);
        approx::assert_relative_eq!(sessions["C2"].blank_mean.unwrap(), 50.0);
    }
}
