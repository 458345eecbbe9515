//! The working table and its processing stages
use std::collections::BTreeMap;
use std::path::Path;

use itertools::Itertools;

use crate::blank::SampleBlank;
use crate::calibration;
use crate::crm;
use crate::dbs::DbsRow;
use crate::density::{Mp81, SeawaterDensity};
use crate::diagnostics::{Diagnostic, DiagnosticKind, Location};
use crate::link;
use crate::logfile::Logfile;
use crate::math;
use crate::output;
use crate::session::{self, Sessions};
use crate::{Config, Error, Result};

/// A step of the pipeline that fills one group of derived fields
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    LogfileIndex,
    SampleBlanks,
    SessionBlanks,
    BlankCorrections,
    Density,
    StandardCalibrations,
    SessionCalibrations,
    Calibrated,
}

impl Stage {
    /// Stages whose results are computed from this one, directly or not
    const fn dependants(self) -> &'static [Self] {
        match self {
            Self::LogfileIndex => &[
                Self::SampleBlanks,
                Self::SessionBlanks,
                Self::BlankCorrections,
                Self::StandardCalibrations,
                Self::SessionCalibrations,
                Self::Calibrated,
            ],
            Self::SampleBlanks => &[
                Self::SessionBlanks,
                Self::BlankCorrections,
                Self::StandardCalibrations,
                Self::SessionCalibrations,
                Self::Calibrated,
            ],
            Self::SessionBlanks => &[
                Self::BlankCorrections,
                Self::StandardCalibrations,
                Self::SessionCalibrations,
                Self::Calibrated,
            ],
            Self::BlankCorrections | Self::Density => &[
                Self::StandardCalibrations,
                Self::SessionCalibrations,
                Self::Calibrated,
            ],
            Self::StandardCalibrations => &[Self::SessionCalibrations, Self::Calibrated],
            Self::SessionCalibrations => &[Self::Calibrated],
            Self::Calibrated => &[],
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StageStatus {
    #[default]
    NotStarted,
    Done,
}

/// Which stages have results in the working table
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stages {
    pub logfile_index: StageStatus,
    pub sample_blanks: StageStatus,
    pub session_blanks: StageStatus,
    pub blank_corrections: StageStatus,
    pub density: StageStatus,
    pub standard_calibrations: StageStatus,
    pub session_calibrations: StageStatus,
    pub calibrated: StageStatus,
}

impl Stages {
    pub const fn status(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::LogfileIndex => self.logfile_index,
            Stage::SampleBlanks => self.sample_blanks,
            Stage::SessionBlanks => self.session_blanks,
            Stage::BlankCorrections => self.blank_corrections,
            Stage::Density => self.density,
            Stage::StandardCalibrations => self.standard_calibrations,
            Stage::SessionCalibrations => self.session_calibrations,
            Stage::Calibrated => self.calibrated,
        }
    }

    fn status_mut(&mut self, stage: Stage) -> &mut StageStatus {
        match stage {
            Stage::LogfileIndex => &mut self.logfile_index,
            Stage::SampleBlanks => &mut self.sample_blanks,
            Stage::SessionBlanks => &mut self.session_blanks,
            Stage::BlankCorrections => &mut self.blank_corrections,
            Stage::Density => &mut self.density,
            Stage::StandardCalibrations => &mut self.standard_calibrations,
            Stage::SessionCalibrations => &mut self.session_calibrations,
            Stage::Calibrated => &mut self.calibrated,
        }
    }

    fn invalidate_dependants(&mut self, stage: Stage) {
        for &dependant in stage.dependants() {
            *self.status_mut(dependant) = StageStatus::NotStarted;
        }
    }

    /// Mark a stage and everything computed from it as stale
    fn invalidate(&mut self, stage: Stage) {
        *self.status_mut(stage) = StageStatus::NotStarted;
        self.invalidate_dependants(stage);
    }

    /// Record a fresh result for a stage, leaving everything computed from it stale
    fn complete(&mut self, stage: Stage) {
        *self.status_mut(stage) = StageStatus::Done;
        self.invalidate_dependants(stage);
    }
}

/// Calibrated DIC of one bottle, averaged over its good analyses
#[derive(Clone, Debug, PartialEq)]
pub struct BottleSummary {
    pub bottle: String,
    pub mean: f64,
    /// Sample standard deviation, present only for repeated analyses
    pub std: Option<f64>,
    pub count: usize,
}

/// The working table of one or more `.dbs` files
///
/// Holds the rows, the logfile they were measured in, the per-session results and every
/// diagnostic raised while reading and processing. The `get_*` methods each compute one
/// [`Stage`]. Calling one always recomputes it, replaces the diagnostics it raised last time and
/// marks the stages built on it as stale. Stages a method depends on
/// are only run if they have not been run yet, so the last stage can be called on a fresh table
/// to run the whole pipeline.
///
/// Edits made through [`Dbs::rows_mut`] are not tracked. After changing a flag, call the stage
/// that reads it directly.
#[derive(Clone, Debug)]
pub struct Dbs {
    rows: Vec<DbsRow>,
    logfile: Option<Logfile>,
    sessions: Sessions,
    /// Raised while reading the input files
    read_diagnostics: Vec<Diagnostic>,
    /// Raised by the last run of each stage
    stage_diagnostics: BTreeMap<Stage, Vec<Diagnostic>>,
    stages: Stages,
    config: Config,
}

impl Dbs {
    pub fn new(rows: Vec<DbsRow>, config: Config) -> Self {
        Self {
            rows,
            logfile: None,
            sessions: Sessions::new(),
            read_diagnostics: vec![],
            stage_diagnostics: BTreeMap::new(),
            stages: Stages::default(),
            config,
        }
    }

    /// Attach the logfile the rows were measured in
    #[must_use]
    pub fn with_logfile(mut self, logfile: Logfile) -> Self {
        self.logfile = Some(logfile);
        self.stages.invalidate(Stage::LogfileIndex);
        self
    }

    /// Join several tables into one
    ///
    /// The tables should not have been processed past their logfile index, the joined table
    /// starts again from a fresh set of stages. Only the diagnostics raised while reading are
    /// carried over.
    pub fn concat(tables: Vec<Self>, logfile: Option<Logfile>) -> Self {
        let config = tables
            .first()
            .map(|table| table.config.clone())
            .unwrap_or_default();
        let mut joined = Self::new(vec![], config);
        joined.logfile = logfile;
        for table in tables {
            let offset = joined.rows.len();
            joined
                .read_diagnostics
                .extend(table.read_diagnostics.into_iter().map(|mut diagnostic| {
                    if let Location::DbsRow(row) = diagnostic.location {
                        diagnostic.location = Location::DbsRow(row + offset);
                    }
                    diagnostic
                }));
            joined.rows.extend(table.rows);
        }
        joined
    }

    /// A new table holding copies of the rows that satisfy `predicate`
    ///
    /// The logfile and session results are copied along, diagnostics are not as their row
    /// locations would no longer hold.
    #[must_use]
    pub fn subset(&self, predicate: impl Fn(&DbsRow) -> bool) -> Self {
        Self {
            rows: self.rows.iter().filter(|row| predicate(row)).cloned().collect(),
            logfile: self.logfile.clone(),
            sessions: self.sessions.clone(),
            read_diagnostics: vec![],
            stage_diagnostics: BTreeMap::new(),
            stages: self.stages,
            config: self.config.clone(),
        }
    }

    pub fn rows(&self) -> &[DbsRow] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [DbsRow] {
        &mut self.rows
    }

    pub const fn logfile(&self) -> Option<&Logfile> {
        self.logfile.as_ref()
    }

    pub const fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    /// Diagnostics raised while reading, then those of each stage in pipeline order
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.read_diagnostics
            .iter()
            .chain(self.stage_diagnostics.values().flatten())
    }

    pub const fn stages(&self) -> &Stages {
        &self.stages
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Record diagnostics raised while reading the rows or the logfile
    pub fn extend_diagnostics(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.read_diagnostics.extend(diagnostics);
    }

    /// Attach certified values to rows of known reference material batches
    ///
    /// `batch_of_row` names the Dickson batch a row was drawn from, if any. Returns the number of
    /// rows that were marked as reference standards.
    pub fn assign_certified_values(
        &mut self,
        batch_of_row: impl Fn(&DbsRow) -> Option<u32>,
    ) -> usize {
        let mut assigned = 0;
        for row in &mut self.rows {
            if let Some(material) = batch_of_row(row).and_then(crm::dickson) {
                row.certified_reference_value = Some(material.dissolved_inorganic_carbon);
                row.is_reference_standard = true;
                assigned += 1;
            }
        }
        log::info!("assigned certified values to {assigned} rows");
        self.stages.invalidate(Stage::StandardCalibrations);
        assigned
    }

    fn run(&mut self, stage: Stage) -> Result<()> {
        self.stage_diagnostics.remove(&stage);
        match stage {
            Stage::LogfileIndex => self.run_logfile_index()?,
            Stage::SampleBlanks => self.run_sample_blanks()?,
            Stage::SessionBlanks => self.run_session_blanks()?,
            Stage::BlankCorrections => self.run_blank_corrections()?,
            Stage::Density => self.run_density(&Mp81),
            Stage::StandardCalibrations => self.run_standard_calibrations()?,
            Stage::SessionCalibrations => self.run_session_calibrations()?,
            Stage::Calibrated => self.run_calibrated()?,
        }
        self.stages.complete(stage);
        Ok(())
    }

    /// Run `stage` unless it already has results
    fn require(&mut self, stage: Stage) -> Result<()> {
        if self.stages.status(stage) == StageStatus::NotStarted {
            self.run(stage)?;
        }
        Ok(())
    }

    fn run_logfile_index(&mut self) -> Result<()> {
        let logfile = self.logfile.as_ref().ok_or(Error::MissingLogfile)?;
        let links = link::link_rows(&self.rows, logfile)?;
        for (row, link) in self.rows.iter_mut().zip(links) {
            row.logfile_index = link;
        }
        Ok(())
    }

    fn run_sample_blanks(&mut self) -> Result<()> {
        self.require(Stage::LogfileIndex)?;
        let logfile = self.logfile.as_ref().ok_or(Error::MissingLogfile)?;
        for row in &mut self.rows {
            let run = row.logfile_index.and_then(|index| logfile.get(index));
            row.sample_blank = SampleBlank::estimate(run, self.config.use_from);
        }
        Ok(())
    }

    fn run_session_blanks(&mut self) -> Result<()> {
        self.require(Stage::SampleBlanks)?;
        let (sessions, diagnostics) = session::fit_sessions(&self.rows, &self.config);
        self.sessions = sessions;
        self.stage_diagnostics.insert(Stage::SessionBlanks, diagnostics);
        Ok(())
    }

    fn run_blank_corrections(&mut self) -> Result<()> {
        self.require(Stage::SessionBlanks)?;
        calibration::correct_blanks(&mut self.rows, &self.sessions);
        Ok(())
    }

    /// Density of every row from its current temperature and salinity
    ///
    /// Missing inputs are replaced by the configured defaults for the computation only, the rows
    /// keep them empty.
    fn run_density(&mut self, model: &impl SeawaterDensity) {
        let default_temperature = self.config.default_temperature;
        let default_salinity = self.config.default_salinity;
        let mut assumed_temperature = 0;
        let mut assumed_salinity = 0;
        for row in &mut self.rows {
            let temperature = row.temperature_analysis.unwrap_or_else(|| {
                assumed_temperature += 1;
                default_temperature
            });
            let salinity = row.salinity.unwrap_or_else(|| {
                assumed_salinity += 1;
                default_salinity
            });
            row.density_analysis = Some(model.density(temperature, salinity));
        }

        let mut diagnostics = vec![];
        if assumed_temperature > 0 {
            diagnostics.push(Diagnostic::raise(
                DiagnosticKind::AssumedDefault,
                Location::Table,
                format!(
                    "analysis temperature not set for {assumed_temperature} rows, \
                     assuming {default_temperature} °C"
                ),
            ));
        }
        if assumed_salinity > 0 {
            diagnostics.push(Diagnostic::raise(
                DiagnosticKind::AssumedDefault,
                Location::Table,
                format!(
                    "salinity not set for {assumed_salinity} rows, assuming {default_salinity}"
                ),
            ));
        }
        self.stage_diagnostics.insert(Stage::Density, diagnostics);
    }

    fn run_standard_calibrations(&mut self) -> Result<()> {
        if !self
            .rows
            .iter()
            .any(|row| row.certified_reference_value.is_some())
        {
            return Err(Error::MissingCertifiedValues);
        }
        self.require(Stage::BlankCorrections)?;
        self.require(Stage::Density)?;
        calibration::standard_calibration_factors(&mut self.rows);
        Ok(())
    }

    fn run_session_calibrations(&mut self) -> Result<()> {
        self.require(Stage::StandardCalibrations)?;
        let diagnostics = calibration::session_calibrations(&mut self.rows, &mut self.sessions);
        self.stage_diagnostics
            .insert(Stage::SessionCalibrations, diagnostics);
        Ok(())
    }

    fn run_calibrated(&mut self) -> Result<()> {
        self.require(Stage::SessionCalibrations)?;
        calibration::calibrate(&mut self.rows);
        Ok(())
    }

    /// Link every row to the logfile run it was measured in
    ///
    /// # Errors
    /// Fails without a logfile, or if a row matches more than one run.
    pub fn get_logfile_index(&mut self) -> Result<()> {
        self.run(Stage::LogfileIndex)
    }

    /// Estimate the coulometer blank of every linked row
    ///
    /// # Errors
    /// Fails without a logfile, or if the rows still need linking and that fails.
    pub fn get_sample_blanks(&mut self) -> Result<()> {
        self.run(Stage::SampleBlanks)
    }

    /// Fit the blank drift of every session
    ///
    /// # Errors
    /// Fails if the sample blanks still need estimating and that fails.
    pub fn get_session_blanks(&mut self) -> Result<()> {
        self.run(Stage::SessionBlanks)
    }

    /// Subtract the fitted blank from every row's counts
    ///
    /// # Errors
    /// Fails if the session fits still need computing and that fails.
    pub fn get_blank_corrections(&mut self) -> Result<()> {
        self.run(Stage::BlankCorrections)
    }

    /// Compute the analysis density of every row, using [`Mp81`]
    pub fn get_density(&mut self) {
        self.get_density_with(&Mp81);
    }

    /// Compute the analysis density of every row, using the given equation of state
    pub fn get_density_with(&mut self, model: &impl SeawaterDensity) {
        self.run_density(model);
        self.stages.complete(Stage::Density);
    }

    /// Compute a calibration factor for each reference standard
    ///
    /// # Errors
    /// Fails with [`Error::MissingCertifiedValues`] if no row carries a certified value, or if an
    /// earlier stage still needs running and that fails.
    pub fn get_standard_calibrations(&mut self) -> Result<()> {
        self.run(Stage::StandardCalibrations)
    }

    /// Average the calibration factors of each session
    ///
    /// # Errors
    /// Fails if an earlier stage still needs running and that fails.
    pub fn get_session_calibrations(&mut self) -> Result<()> {
        self.run(Stage::SessionCalibrations)
    }

    /// Calibrate every row, running any stage that has not been run yet
    ///
    /// # Errors
    /// Fails if an earlier stage still needs running and that fails.
    pub fn calibrate_dic(&mut self) -> Result<()> {
        self.run(Stage::Calibrated)
    }

    /// Calibrated DIC per bottle over the rows flagged as good results
    pub fn summarise_bottles(&self) -> Vec<BottleSummary> {
        let groups: BTreeMap<&str, Vec<f64>> = self
            .rows
            .iter()
            .filter(|row| row.calibrated_is_valid)
            .filter_map(|row| Some((row.bottle.as_str(), row.calibrated_value?)))
            .into_group_map()
            .into_iter()
            .collect();
        groups
            .into_iter()
            .filter_map(|(bottle, values)| {
                Some(BottleSummary {
                    bottle: bottle.to_owned(),
                    mean: math::mean(&values)?,
                    std: math::sample_std(&values),
                    count: values.len(),
                })
            })
            .collect()
    }

    /// Write the rows as a tab-delimited table
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn write_dbs(&self, path: &Path) -> Result<()> {
        output::write_rows_to_file(path, &self.rows)
    }

    /// Write the session results as a tab-delimited table
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn write_sessions(&self, path: &Path) -> Result<()> {
        output::write_sessions_to_file(path, &self.sessions)
    }
}
