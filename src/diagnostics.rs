use std::fmt;

/// What went wrong with a single record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// A run start line was not followed by a recognisable sample line
    MissingSampleName,
    /// A run start line carried no readable timestamp
    MalformedTimestamp,
    /// Increment rows stopped increasing in elapsed minutes
    NonMonotonicIncrements,
    /// A dbs row had a date or time that could not be read
    UnparsableDate,
    /// A dbs cell expected to be numeric could not be read
    UnparsableNumber,
    /// A dbs row has no session identifier
    MissingSession,
    /// A session had no valid samples to fit or average
    EmptySession,
    /// The blank drift fit of a session did not produce usable parameters
    FitFailed,
    /// A missing input was replaced by a configured default
    AssumedDefault,
}

/// Where a diagnostic points
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Location {
    /// One-based line of the logfile
    LogfileLine(usize),
    /// Zero-based row of the dbs table
    DbsRow(usize),
    Session(String),
    Table,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LogfileLine(line) => write!(f, "logfile line {line}"),
            Self::DbsRow(row) => write!(f, "dbs row {row}"),
            Self::Session(session) => write!(f, "session {session}"),
            Self::Table => write!(f, "table"),
        }
    }
}

/// A recoverable problem found while reading or processing
///
/// Diagnostics never stop processing. They are logged at `warn` level as they are raised and
/// collected so callers can inspect them afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub location: Location,
    pub message: String,
}

impl Diagnostic {
    /// Create a diagnostic and emit it to the log
    pub(crate) fn raise(
        kind: DiagnosticKind,
        location: Location,
        message: impl Into<String>,
    ) -> Self {
        let diagnostic = Self {
            kind,
            location,
            message: message.into(),
        };
        log::warn!("{diagnostic}");
        diagnostic
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}
