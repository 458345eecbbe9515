//! Reader for the per-bottle `.dbs` table written by the VINDTA software
use std::fs;
use std::io::Read;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::blank::SampleBlank;
use crate::diagnostics::{Diagnostic, DiagnosticKind, Location};
use crate::{Config, Error, Result};

/// Friendlier names for the `.dbs` columns
const COLUMN_NAMES: [(&str, &str); 22] = [
    ("run type", "run_type"),
    ("i.s. temperature", "temperature_insitu"),
    ("run time", "run_time"),
    ("CT", "dic_raw"),
    ("factor CT", "factor_dic"),
    ("blank", "blank_setting"),
    ("TCT", "total_carbon_titrated"),
    ("last CRM CT", "last_crm_dic"),
    ("cert. CRM CT", "dic_cert"),
    ("last CRM AT", "last_crm_alkalinity"),
    ("cert. CRM AT", "alkalinity_cert"),
    ("batch", "batch_setting"),
    ("AT", "alkalinity_raw"),
    ("factor AT", "factor_alkalinity"),
    ("rms", "rms_alkalinity"),
    ("calc ID", "calc_id"),
    ("Titrino", "titrino"),
    ("sample line", "sample_line"),
    ("pip vol", "pip_vol"),
    ("Lat.", "latitude"),
    ("Long.", "longitude"),
    ("cell ID", "dic_cell_id"),
];

/// Columns dropped on import unless asked to keep them
const DROPPED_COLUMNS: [&str; 24] = [
    "run_type",
    "temperature_insitu",
    "salinity",
    "dic_raw",
    "factor_dic",
    "blank_setting",
    "total_carbon_titrated",
    "last_crm_dic",
    "dic_cert",
    "last_crm_alkalinity",
    "alkalinity_cert",
    "batch_setting",
    "alkalinity_raw",
    "factor_alkalinity",
    "rms_alkalinity",
    "calc_id",
    "titrino",
    "sample_line",
    "pip_vol",
    "comment",
    "latitude",
    "longitude",
    "date",
    "time",
];

const REQUIRED_COLUMNS: [&str; 3] = ["bottle", "date", "time"];

/// Map a raw `.dbs` header onto its canonical column name
pub fn canonical_column(header: &str) -> &str {
    COLUMN_NAMES
        .iter()
        .find(|(raw, _)| *raw == header)
        .map_or(header, |(_, canonical)| canonical)
}

/// One analysis from the `.dbs` table, together with everything the pipeline derives for it
#[derive(Clone, Debug, PartialEq)]
pub struct DbsRow {
    /// Sample name, matched against the logfile sample label
    pub bottle: String,
    pub analysis_datetime: Option<NaiveDateTime>,
    /// Fractional days since 1970-01-01
    pub analysis_datenum: Option<f64>,
    /// Analysis session (coulometer cell) the row belongs to
    pub session_id: Option<String>,
    /// Raw coulometer counts
    pub counts: Option<f64>,
    /// Titration length in minutes
    pub run_time: Option<f64>,
    pub salinity: Option<f64>,
    /// Temperature at analysis in °C
    pub temperature_analysis: Option<f64>,
    /// Sample density at analysis in kg/L
    pub density_analysis: Option<f64>,
    /// Certified DIC of a reference material in µmol/kg
    pub certified_reference_value: Option<f64>,
    pub is_reference_standard: bool,
    /// Remaining columns of the source table, in source order
    pub extra: Vec<(String, String)>,

    pub logfile_index: Option<usize>,
    pub sample_blank: SampleBlank,
    pub blank_is_valid: bool,
    pub analysis_datenum_scaled: Option<f64>,
    /// Blank predicted by the session drift fit, in counts per minute
    pub predicted_blank: Option<f64>,
    pub corrected_counts: Option<f64>,
    pub calibration_factor_here: Option<f64>,
    /// Manual override for using this row's calibration factor, `None` to decide automatically
    pub calibration_factor_is_valid: Option<bool>,
    pub session_calibration_factor: Option<f64>,
    /// Calibrated DIC in µmol/kg
    pub calibrated_value: Option<f64>,
    pub calibration_offset: Option<f64>,
    /// Whether the calibrated value should be reported for the bottle
    pub calibrated_is_valid: bool,
}

impl Default for DbsRow {
    fn default() -> Self {
        Self {
            bottle: String::new(),
            analysis_datetime: None,
            analysis_datenum: None,
            session_id: None,
            counts: None,
            run_time: None,
            salinity: None,
            temperature_analysis: None,
            density_analysis: None,
            certified_reference_value: None,
            is_reference_standard: false,
            extra: vec![],
            logfile_index: None,
            sample_blank: SampleBlank::default(),
            blank_is_valid: true,
            analysis_datenum_scaled: None,
            predicted_blank: None,
            corrected_counts: None,
            calibration_factor_here: None,
            calibration_factor_is_valid: None,
            session_calibration_factor: None,
            calibrated_value: None,
            calibration_offset: None,
            calibrated_is_valid: true,
        }
    }
}

impl DbsRow {
    pub fn new(bottle: impl Into<String>) -> Self {
        Self {
            bottle: bottle.into(),
            ..Self::default()
        }
    }

    /// Set the analysis time, keeping the numeric time in step
    #[must_use]
    pub fn with_analysis_datetime(mut self, datetime: NaiveDateTime) -> Self {
        self.analysis_datetime = Some(datetime);
        self.analysis_datenum = Some(datenum(datetime));
        self
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub const fn with_counts(mut self, counts: f64, run_time: f64) -> Self {
        self.counts = Some(counts);
        self.run_time = Some(run_time);
        self
    }

    /// Mark the row as a reference standard with a certified value
    #[must_use]
    pub const fn with_certified_value(mut self, certified: f64) -> Self {
        self.certified_reference_value = Some(certified);
        self.is_reference_standard = true;
        self
    }

    pub const fn blank_estimate(&self) -> Option<f64> {
        self.sample_blank.mean
    }

    /// Whether this row's calibration factor counts towards its session's calibration
    pub fn uses_calibration_factor(&self) -> bool {
        let finite_factor = self
            .calibration_factor_here
            .map_or(false, f64::is_finite);
        self.calibration_factor_is_valid
            .unwrap_or(self.is_reference_standard)
            && finite_factor
    }

    /// Look up a column carried over from the source table
    pub fn extra(&self, column: &str) -> Option<&str> {
        self.extra
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }
}

/// Fractional days since 1970-01-01T00:00
#[allow(clippy::cast_precision_loss)]
pub fn datenum(datetime: NaiveDateTime) -> f64 {
    let seconds = datetime
        .signed_duration_since(NaiveDateTime::default())
        .num_seconds();
    seconds as f64 / 86_400.0
}

/// Combine a `MM/DD/YY` date and a `HH:MM[:SS]` time
fn parse_datetime(date: &str, time: &str) -> Option<NaiveDateTime> {
    let mut parts = date.trim().split('/');
    let month = parts.next()?.parse::<u32>().ok()?;
    let day = parts.next()?.parse::<u32>().ok()?;
    let year_field = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let year = match year_field.len() {
        2 => 2000 + year_field.parse::<i32>().ok()?,
        _ => year_field.parse::<i32>().ok()?,
    };
    let time = time.trim();
    let time = NaiveTime::parse_from_str(time, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
        .ok()?;
    Some(NaiveDate::from_ymd_opt(year, month, day)?.and_time(time))
}

fn parse_number(
    value: Option<&str>,
    column: &str,
    row: usize,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<f64> {
    let value = value?.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("nan") {
        return None;
    }
    match value.parse::<f64>() {
        Ok(number) => Some(number),
        Err(_) => {
            diagnostics.push(Diagnostic::raise(
                DiagnosticKind::UnparsableNumber,
                Location::DbsRow(row),
                format!("`{value}` in column `{column}` is not a number"),
            ));
            None
        }
    }
}

/// Parse a tab-delimited `.dbs` table
///
/// `source` is recorded in the `dbs_fname` column of every row.
///
/// # Errors
/// Returns an error if the table cannot be read or lacks a `bottle`, `date` or `time` column.
pub fn parse_dbs<R: Read>(
    reader: R,
    source: &str,
    config: &Config,
) -> Result<(Vec<DbsRow>, Vec<Diagnostic>)> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr
        .headers()?
        .iter()
        .map(|header| canonical_column(header.trim()).to_owned())
        .collect::<Vec<_>>();
    for required in REQUIRED_COLUMNS {
        if !headers.iter().any(|header| header == required) {
            return Err(Error::MissingColumn {
                column: required.to_owned(),
            });
        }
    }

    let mut rows = vec![];
    let mut diagnostics = vec![];
    for (ii, record) in rdr.records().enumerate() {
        let record = record?;
        let cell = |column: &str| {
            headers
                .iter()
                .position(|header| header == column)
                .and_then(|jj| record.get(jj))
        };

        let mut row = DbsRow::new(cell("bottle").unwrap_or_default().trim());

        let date = cell("date").unwrap_or_default();
        let time = cell("time").unwrap_or_default();
        if let Some(datetime) = parse_datetime(date, time) {
            row = row.with_analysis_datetime(datetime);
        } else {
            diagnostics.push(Diagnostic::raise(
                DiagnosticKind::UnparsableDate,
                Location::DbsRow(ii),
                format!("could not read analysis time from `{date}` `{time}`"),
            ));
        }

        row.counts = parse_number(cell("counts"), "counts", ii, &mut diagnostics);
        row.run_time = parse_number(cell("run_time"), "run_time", ii, &mut diagnostics);
        if !config.drop_columns {
            row.salinity = parse_number(cell("salinity"), "salinity", ii, &mut diagnostics);
        }
        row.temperature_analysis = parse_number(
            cell("temperature_analysis"),
            "temperature_analysis",
            ii,
            &mut diagnostics,
        );
        if let Some(certified) =
            parse_number(cell("dic_certified"), "dic_certified", ii, &mut diagnostics)
        {
            row = row.with_certified_value(certified);
        }
        row.session_id = cell(&config.session_column)
            .map(str::trim)
            .filter(|session| !session.is_empty())
            .map(ToOwned::to_owned);

        let typed = [
            "bottle",
            "counts",
            "run_time",
            "temperature_analysis",
            "dic_certified",
            config.session_column.as_str(),
        ];
        row.extra = headers
            .iter()
            .zip(record.iter())
            .filter(|(header, _)| !typed.contains(&header.as_str()))
            .filter(|(header, _)| {
                !(config.drop_columns && DROPPED_COLUMNS.contains(&header.as_str()))
            })
            .map(|(header, value)| (header.clone(), value.to_owned()))
            .collect();
        row.extra.push(("dbs_fname".to_owned(), source.to_owned()));

        rows.push(row);
    }

    Ok((rows, diagnostics))
}

/// Read a `.dbs` file from disk
///
/// # Errors
/// Returns an error if the file cannot be read or does not have the required columns.
pub fn read_dbs(path: &Path, config: &Config) -> Result<(Vec<DbsRow>, Vec<Diagnostic>)> {
    let file = fs::read(path)?;
    parse_dbs(&file[..], &path.to_string_lossy(), config)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{datenum, parse_datetime, parse_dbs};
    use crate::diagnostics::{DiagnosticKind, Location};
    use crate::{Config, Error};

    const DBS: &str = "\
run type\tbottle\tstation\tdate\ttime\tcounts\trun time\tcell ID\tsalinity\tLat.
sample\tNIOZ_001\t5\t08/13/18\t10:21\t21000.5\t11\tC_Aug13-18_1008\t34.1\t53.2
CRM\t171\t666\t08/13/18\t10:40\t20500\t10\tC_Aug13-18_1008\t33.434\t53.2
sample\tNIOZ_002\t5\tnot a date\t11:00\toops\t12\t\t35\t53.2
";

    #[test]
    fn columns_are_renamed_and_superfluous_ones_dropped() {
        let (rows, _) = parse_dbs(DBS.as_bytes(), "test.dbs", &Config::default()).unwrap();

        assert_eq!(rows.len(), 3);
        let row = &rows[0];
        assert_eq!(row.bottle, "NIOZ_001");
        assert_eq!(row.session_id.as_deref(), Some("C_Aug13-18_1008"));
        assert_eq!(row.counts, Some(21000.5));
        assert_eq!(row.run_time, Some(11.0));
        assert_eq!(row.extra("station"), Some("5"));
        assert_eq!(row.extra("dbs_fname"), Some("test.dbs"));
        assert!(row.extra("run_type").is_none());
        assert!(row.extra("latitude").is_none());
        assert!(row.extra("date").is_none());
        assert!(row.salinity.is_none());
    }

    #[test]
    fn columns_are_kept_when_dropping_is_disabled() {
        let config = Config {
            drop_columns: false,
            ..Config::default()
        };
        let (rows, _) = parse_dbs(DBS.as_bytes(), "test.dbs", &config).unwrap();

        assert_eq!(rows[0].extra("run_type"), Some("sample"));
        assert_eq!(rows[0].extra("latitude"), Some("53.2"));
        assert_eq!(rows[0].salinity, Some(34.1));
    }

    #[test]
    fn analysis_time_is_read_month_first() {
        let (rows, _) = parse_dbs(DBS.as_bytes(), "test.dbs", &Config::default()).unwrap();
        let expected = NaiveDate::from_ymd_opt(2018, 8, 13)
            .unwrap()
            .and_hms_opt(10, 21, 0)
            .unwrap();
        assert_eq!(rows[0].analysis_datetime, Some(expected));
        approx::assert_relative_eq!(rows[0].analysis_datenum.unwrap(), datenum(expected));
    }

    #[test]
    fn bad_cells_are_reported_without_failing_the_import() {
        let (rows, diagnostics) =
            parse_dbs(DBS.as_bytes(), "test.dbs", &Config::default()).unwrap();

        let row = &rows[2];
        assert!(row.analysis_datetime.is_none());
        assert!(row.analysis_datenum.is_none());
        assert!(row.counts.is_none());
        assert!(row.session_id.is_none());

        let kinds = diagnostics.iter().map(|d| d.kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![DiagnosticKind::UnparsableDate, DiagnosticKind::UnparsableNumber]
        );
        assert!(diagnostics.iter().all(|d| d.location == Location::DbsRow(2)));
    }

    #[test]
    fn certified_values_mark_reference_standards() {
        let text = "bottle\tdate\ttime\tdic_certified\ttemperature_analysis\n\
                    171\t08/13/18\t10:40\t2029.19\t24.5\n\
                    NIOZ_001\t08/13/18\t10:21\t\t\n";
        let (rows, diagnostics) =
            parse_dbs(text.as_bytes(), "test.dbs", &Config::default()).unwrap();

        assert!(diagnostics.is_empty());
        assert!(rows[0].is_reference_standard);
        assert_eq!(rows[0].certified_reference_value, Some(2029.19));
        assert_eq!(rows[0].temperature_analysis, Some(24.5));
        assert!(rows[0].extra("dic_certified").is_none());
        assert!(!rows[1].is_reference_standard);
        assert!(rows[1].temperature_analysis.is_none());
    }

    #[test]
    fn missing_required_column_is_an_error() {
        let text = "bottle\tdate\n1\t08/13/18\n";
        let result = parse_dbs(text.as_bytes(), "test.dbs", &Config::default());
        assert!(matches!(result, Err(Error::MissingColumn { column }) if column == "time"));
    }

    #[test]
    fn datenum_counts_days_from_the_unix_epoch() {
        let datetime = NaiveDate::from_ymd_opt(1970, 1, 2)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        approx::assert_relative_eq!(datenum(datetime), 1.5);
    }

    #[test]
    fn seconds_are_optional_in_the_time_field() {
        let with_seconds = parse_datetime("01/31/20", "09:15:30").unwrap();
        let without = parse_datetime("01/31/20", "09:15").unwrap();
        assert_eq!(with_seconds.date(), without.date());
        assert!(parse_datetime("13/31/20", "09:15").is_none());
    }
}
