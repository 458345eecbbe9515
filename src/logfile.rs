//! Reader for the VINDTA `logfile.bak`
//!
//! The logfile is a line-oriented record of every titration the instrument has run. A run opens
//! with a start line naming the method and the start time,
//!
//! ```text
//! 3C standard.mth run started 08/13/18  10:21
//! bottle	WALCRN2_2018005578	...
//! ...
//! ...
//! 1	1234	1234	...
//! 2	2345	1111	...
//! ```
//!
//! followed by a sample line and, from the fourth line after the start, one row per minute of
//! `minutes<TAB>counts<TAB>increment<TAB>...`.
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;

use crate::diagnostics::{Diagnostic, DiagnosticKind, Location};
use crate::{Config, Result};

/// Offset from a run's start line to its first increment row
const FIRST_INCREMENT_OFFSET: usize = 4;

/// One minute of coulometric titration
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Increment {
    /// Minutes elapsed since the titration started
    pub minutes: f64,
    /// Cumulative coulometer counts
    pub counts: f64,
    /// Counts added during this minute
    pub increment: f64,
}

impl Increment {
    const ZERO: Self = Self {
        minutes: 0.0,
        counts: 0.0,
        increment: 0.0,
    };
}

/// A single titration run read from the logfile
#[derive(Clone, Debug, PartialEq)]
pub struct LogRun {
    /// Zero-based line of the run start in the logfile, unique within one logfile
    pub line_number: usize,
    /// Bottle name, CRM batch or a synthetic `other_N`
    pub sample_label: String,
    pub method: String,
    /// Start of the run, to the minute
    pub timestamp: NaiveDateTime,
    /// Titration table, always starting from a zero row
    increments: Vec<Increment>,
}

impl LogRun {
    pub fn increments(&self) -> &[Increment] {
        &self.increments
    }

    /// Final cumulative count of the titration
    pub fn total_counts(&self) -> f64 {
        self.increments.last().map_or(0.0, |inc| inc.counts)
    }

    /// Number of titration rows read, not counting the zero row
    pub fn run_duration(&self) -> usize {
        self.increments.len() - 1
    }
}

/// All runs read from one logfile, keyed by start line
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Logfile {
    runs: BTreeMap<usize, LogRun>,
}

impl Logfile {
    pub fn get(&self, line_number: usize) -> Option<&LogRun> {
        self.runs.get(&line_number)
    }

    pub fn runs(&self) -> impl Iterator<Item = &LogRun> {
        self.runs.values()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Start lines of every run with this sample label and timestamp
    pub fn find(&self, sample_label: &str, timestamp: NaiveDateTime) -> Vec<usize> {
        self.runs
            .values()
            .filter(|run| run.sample_label == sample_label && run.timestamp == timestamp)
            .map(|run| run.line_number)
            .collect()
    }

    /// Whether any run carries this sample label
    pub fn contains_label(&self, sample_label: &str) -> bool {
        self.runs.values().any(|run| run.sample_label == sample_label)
    }

    /// Parse logfile text, keeping only runs whose method is in `config.methods`
    ///
    /// Runs without an identifiable sample line or with an unreadable start time are skipped and
    /// reported in the returned diagnostics rather than failing the whole parse.
    ///
    /// # Errors
    /// Returns an error only if the method list cannot be compiled into a pattern.
    pub fn parse(text: &str, config: &Config) -> Result<(Self, Vec<Diagnostic>)> {
        let patterns = Patterns::new(&config.methods)?;
        let lines = text.lines().collect::<Vec<_>>();
        let mut runs = BTreeMap::new();
        let mut diagnostics = vec![];

        for (ii, line) in lines.iter().enumerate() {
            let Some(method) = patterns.method(line) else {
                continue;
            };

            let Some(sample_label) = lines
                .get(ii + 1)
                .and_then(|next| patterns.sample_label(next, ii))
            else {
                if !config.ignore_lines.contains(&(ii + 1)) {
                    diagnostics.push(Diagnostic::raise(
                        DiagnosticKind::MissingSampleName,
                        Location::LogfileLine(ii + 1),
                        "bottle name not found",
                    ));
                }
                continue;
            };

            let Some(timestamp) = patterns.timestamp(line) else {
                diagnostics.push(Diagnostic::raise(
                    DiagnosticKind::MalformedTimestamp,
                    Location::LogfileLine(ii + 1),
                    format!("could not read run start time from `{line}`"),
                ));
                continue;
            };

            let mut increments = vec![Increment::ZERO];
            for (jj, row) in lines.iter().enumerate().skip(ii + FIRST_INCREMENT_OFFSET) {
                let Some(increment) = patterns.increment(row) else {
                    break;
                };
                let previous = increments.last().map_or(0.0, |inc: &Increment| inc.minutes);
                if increment.minutes <= previous {
                    diagnostics.push(Diagnostic::raise(
                        DiagnosticKind::NonMonotonicIncrements,
                        Location::LogfileLine(jj + 1),
                        format!(
                            "minute {} does not follow minute {previous}, titration truncated",
                            increment.minutes
                        ),
                    ));
                    break;
                }
                increments.push(increment);
            }

            runs.insert(
                ii,
                LogRun {
                    line_number: ii,
                    sample_label,
                    method: method.to_owned(),
                    timestamp,
                    increments,
                },
            );
        }

        Ok((Self { runs }, diagnostics))
    }
}

/// Read and parse a logfile from disk
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn read_logfile(path: &Path, config: &Config) -> Result<(Logfile, Vec<Diagnostic>)> {
    let text = fs::read_to_string(path)?;
    Logfile::parse(&text, config)
}

struct Patterns {
    method: Regex,
    datetime: Regex,
    bottle: Regex,
    crm: Regex,
    increment: Regex,
}

impl Patterns {
    fn new(methods: &[String]) -> Result<Self> {
        let alternatives = methods
            .iter()
            .map(|method| regex::escape(method))
            .collect::<Vec<_>>()
            .join("|");
        Ok(Self {
            method: Regex::new(&format!(r"^({alternatives})\.mth run started "))?,
            datetime: Regex::new(r"started (\d{2})/(\d{2})/(\d{2})  (\d{2}):(\d{2})")?,
            bottle: Regex::new(r"^(bottle)?\t([^\t]*)\t")?,
            crm: Regex::new(r"^CRM\t([^\t]*)\t")?,
            increment: Regex::new(r"^(\d+)\t(\d+)\t(\d+)(?:\t|$)")?,
        })
    }

    fn method<'a>(&self, line: &'a str) -> Option<&'a str> {
        self.method
            .captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    /// The run start is written month first, matching the dbs date convention
    fn timestamp(&self, line: &str) -> Option<NaiveDateTime> {
        let caps = self.datetime.captures(line)?;
        let field = |ii: usize| caps.get(ii)?.as_str().parse::<u32>().ok();
        let year = 2000 + i32::try_from(field(3)?).ok()?;
        NaiveDate::from_ymd_opt(year, field(1)?, field(2)?)?.and_hms_opt(field(4)?, field(5)?, 0)
    }

    fn sample_label(&self, line: &str, start_line: usize) -> Option<String> {
        if let Some(caps) = self.bottle.captures(line) {
            return caps.get(2).map(|m| m.as_str().to_owned());
        }
        if let Some(caps) = self.crm.captures(line) {
            return caps.get(1).map(|m| m.as_str().to_owned());
        }
        (line == "other").then(|| format!("other_{}", start_line + 1))
    }

    fn increment(&self, line: &str) -> Option<Increment> {
        let caps = self.increment.captures(line.trim())?;
        let field = |ii: usize| caps.get(ii)?.as_str().parse::<f64>().ok();
        Some(Increment {
            minutes: field(1)?,
            counts: field(2)?,
            increment: field(3)?,
        })
    }
}
