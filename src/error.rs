use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to read table: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
    #[error("invalid logfile pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("dbs file has no `{column}` column")]
    MissingColumn { column: String },
    #[error("{matches} name/date matches found between dbs and logfile for bottle `{bottle}` at dbs row {row}")]
    AmbiguousLink {
        row: usize,
        bottle: String,
        matches: usize,
    },
    #[error("no logfile has been assigned to this dbs")]
    MissingLogfile,
    #[error("no certified reference values have been provided")]
    MissingCertifiedValues,
    #[error("blank fit failed: {0}")]
    Solver(String),
}
