use crate::logfile::LogRun;
use crate::math;

/// Summary of the coulometer blank over the tail of one titration
///
/// The blank is the background rate of the coulometer in counts per minute. Once the sample
/// carbon has been titrated the per-minute increment settles to this rate, so the blank is
/// estimated from the increments recorded at or after `use_from` minutes.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SampleBlank {
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Sample standard deviation, present only with two or more increments
    pub std: Option<f64>,
    pub count: usize,
}

impl SampleBlank {
    /// Estimate the blank of a titration run
    ///
    /// A missing run, or a run with no increments from `use_from` onwards, gives an empty
    /// estimate with a count of zero.
    pub fn estimate(run: Option<&LogRun>, use_from: f64) -> Self {
        let Some(run) = run else {
            return Self::default();
        };
        let increments = run
            .increments()
            .iter()
            .filter(|inc| inc.minutes >= use_from)
            .map(|inc| inc.increment)
            .collect::<Vec<_>>();
        if increments.is_empty() {
            return Self::default();
        }

        Self {
            mean: math::mean(&increments),
            min: increments.iter().copied().reduce(f64::min),
            max: increments.iter().copied().reduce(f64::max),
            std: math::sample_std(&increments),
            count: increments.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SampleBlank;
    use crate::logfile::Logfile;
    use crate::Config;

    const LOGFILE: &str = "\
3C standard.mth run started 08/13/18  10:21
bottle\tB1\t
x
x
1\t900\t900\t
4\t1500\t600\t
5\t1530\t30\t
6\t1562\t32\t
7\t1590\t28\t
8\t1620\t30\t
";

    #[test]
    fn blank_is_taken_from_increments_at_and_after_the_cutoff() {
        let (logfile, _) = Logfile::parse(LOGFILE, &Config::default()).unwrap();
        let blank = SampleBlank::estimate(logfile.get(0), 6.0);

        assert_eq!(blank.count, 3);
        approx::assert_relative_eq!(blank.mean.unwrap(), 30.0);
        assert_eq!(blank.min, Some(28.0));
        assert_eq!(blank.max, Some(32.0));
        approx::assert_relative_eq!(blank.std.unwrap(), 2.0);
    }

    #[test]
    fn missing_run_gives_an_empty_blank() {
        let blank = SampleBlank::estimate(None, 6.0);
        assert_eq!(blank, SampleBlank::default());
        assert_eq!(blank.count, 0);
        assert!(blank.mean.is_none());
    }

    #[test]
    fn cutoff_past_the_end_of_the_titration_gives_an_empty_blank() {
        let (logfile, _) = Logfile::parse(LOGFILE, &Config::default()).unwrap();
        let blank = SampleBlank::estimate(logfile.get(0), 60.0);
        assert_eq!(blank.count, 0);
        assert!(blank.mean.is_none());
    }

    #[test]
    fn estimating_twice_gives_identical_blanks() {
        let (logfile, _) = Logfile::parse(LOGFILE, &Config::default()).unwrap();
        let first = SampleBlank::estimate(logfile.get(0), 5.0);
        let second = SampleBlank::estimate(logfile.get(0), 5.0);
        assert_eq!(first, second);
    }
}
