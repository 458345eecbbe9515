#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// #![warn(clippy::cargo)]

pub mod blank;
pub mod calibration;
pub mod config;
pub mod crm;
pub mod dbs;
pub mod density;
pub mod diagnostics;
mod error;
pub mod link;
pub mod logfile;
pub mod math;
pub(crate) mod minimisation;
pub mod output;
pub mod session;
pub mod table;

use std::path::Path;

pub use config::Config;
pub use error::Error;
pub use table::Dbs;

pub type Result<T> = ::std::result::Result<T, Error>;

/// Read a dbs file and its logfile, then run the full blank correction and calibration
///
/// Rows flagged as reference standards must carry a certified value before calibration can run,
/// so this entry point stops after blank correction when no certified values are present in the
/// table. Callers attach certified values with [`Dbs::assign_certified_values`] and then call
/// [`Dbs::calibrate_dic`] themselves.
///
/// # Errors
/// Returns an error if either file cannot be read, if the dbs header is missing a required
/// column, or if a dbs row matches more than one logfile run.
pub fn process(dbs_path: &Path, logfile_path: &Path, config: &Config) -> Result<Dbs> {
    log::info!("reading logfile {logfile_path:?}");
    let (logfile, diagnostics) = logfile::read_logfile(logfile_path, config)?;
    log::info!("found {} runs in logfile", logfile.len());

    log::info!("reading dbs {dbs_path:?}");
    let (rows, dbs_diagnostics) = dbs::read_dbs(dbs_path, config)?;

    let mut table = Dbs::new(rows, config.clone()).with_logfile(logfile);
    table.extend_diagnostics(diagnostics);
    table.extend_diagnostics(dbs_diagnostics);

    if table.rows().iter().any(|row| row.certified_reference_value.is_some()) {
        table.calibrate_dic()?;
    } else {
        table.get_blank_corrections()?;
    }
    Ok(table)
}
