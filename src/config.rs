use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Settings for a single processing run
///
/// Every field has a default, so a config file only needs to list what differs for the session
/// at hand:
///
/// ```
/// use vindta::Config;
///
/// let config = Config::from_toml_str(
///     r#"
///     methods = ["3C standard", "3C standardRWS"]
///     use_from = 8.0
///     "#,
/// )
/// .unwrap();
///
/// assert_eq!(config.methods.len(), 2);
/// assert_eq!(config.session_column, "dic_cell_id");
/// ```
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Method names (without the `.mth` suffix) whose runs are read from the logfile
    pub methods: Vec<String>,
    /// One-based logfile lines whose missing sample name should not be reported
    pub ignore_lines: Vec<usize>,
    /// Titration minute from which increments count towards the sample blank
    pub use_from: f64,
    /// Canonical dbs column holding the analysis session
    pub session_column: String,
    /// Whether to drop the superfluous dbs columns on import
    pub drop_columns: bool,
    /// Starting parameters of the blank drift fit
    pub initial_guess: [f64; 5],
    /// Iteration cap for the blank drift fit
    pub max_iters: u64,
    /// Convergence tolerance for the blank drift fit
    pub tolerance: f64,
    /// Attach a terminal logger to the optimiser
    pub verbose_fit: bool,
    /// Analysis temperature in °C assumed where a row has none
    pub default_temperature: f64,
    /// Salinity assumed where a row has none
    pub default_salinity: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            methods: vec!["3C standard".to_owned()],
            ignore_lines: vec![],
            use_from: 6.0,
            session_column: "dic_cell_id".to_owned(),
            drop_columns: true,
            initial_guess: [0.0, 1.0, 1.0, 1.0, 1.0],
            max_iters: 200,
            tolerance: f64::EPSILON.sqrt(),
            verbose_fit: false,
            default_temperature: 25.0,
            default_salinity: 35.0,
        }
    }
}

impl Config {
    /// Parse a config from TOML text
    ///
    /// # Errors
    /// Returns an error if the text is not valid TOML or a field has the wrong type.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read a config from a TOML file on disk
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or does not parse.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
