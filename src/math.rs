use ndarray::Array1;
use num_traits::Float;

/// Slice length as a float, NaN if `F` cannot hold it
fn len_as<F: Float>(x: &[F]) -> F {
    F::from(x.len()).unwrap_or_else(F::nan)
}

/// Arithmetic mean, `None` for an empty slice
pub fn mean<F: Float>(x: &[F]) -> Option<F> {
    if x.is_empty() {
        return None;
    }
    Some(x.iter().fold(F::zero(), |a, &b| a + b) / len_as(x))
}

fn sum_of_squared_deviations<F: Float>(x: &[F], mean: F) -> F {
    x.iter().fold(F::zero(), |a, &b| a + (b - mean).powi(2))
}

/// Standard deviation with `n - 1` degrees of freedom, `None` for fewer than two values
pub fn sample_std<F: Float>(x: &[F]) -> Option<F> {
    if x.len() < 2 {
        return None;
    }
    let mean = mean(x)?;
    let dof = len_as(x) - F::one();
    Some((sum_of_squared_deviations(x, mean) / dof).sqrt())
}

/// Standard deviation with `n` degrees of freedom, `None` for an empty slice
pub fn population_std<F: Float>(x: &[F]) -> Option<F> {
    let mean = mean(x)?;
    Some((sum_of_squared_deviations(x, mean) / len_as(x)).sqrt())
}

/// Median, averaging the central pair for an even number of values
///
/// NaNs are sorted to the end rather than rejected, callers should filter them first.
pub fn median<F: Float>(x: &[F]) -> Option<F> {
    if x.is_empty() {
        return None;
    }
    let mut sorted = x.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Greater));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / (F::one() + F::one()))
    } else {
        Some(sorted[mid])
    }
}

/// Root mean square, `None` for an empty slice
pub fn rms<F: Float>(x: &[F]) -> Option<F> {
    if x.is_empty() {
        return None;
    }
    Some((x.iter().fold(F::zero(), |a, &b| a + b * b) / len_as(x)).sqrt())
}

/// Centre `x` on `offset` and scale it by `factor`
///
/// When not given, `factor` defaults to the population standard deviation of `x` and `offset` to
/// its mean.
///
/// # Examples
///
/// ```
/// use ndarray::arr1;
/// use vindta::math::{centre_and_scale, de_centre_and_scale};
///
/// let x = arr1(&[1., 2., 3.]);
/// let scaled = centre_and_scale(&x, Some(2.), Some(2.));
/// assert_eq!(scaled, arr1(&[-0.5, 0., 0.5]));
/// assert_eq!(de_centre_and_scale(&scaled, 2., 2.), x);
/// ```
pub fn centre_and_scale<F: Float>(
    x: &Array1<F>,
    factor: Option<F>,
    offset: Option<F>,
) -> Array1<F> {
    let values = x.to_vec();
    let factor = factor.or_else(|| population_std(&values)).unwrap_or_else(F::one);
    let offset = offset.or_else(|| mean(&values)).unwrap_or_else(F::zero);
    x.mapv(|xi| (xi - offset) / factor)
}

/// Undo [`centre_and_scale`]
pub fn de_centre_and_scale<F: Float>(x: &Array1<F>, factor: F, offset: F) -> Array1<F> {
    x.mapv(|xi| xi * factor + offset)
}

#[cfg(test)]
mod tests {
    use ndarray::Array1;
    use ndarray_rand::rand::{Rng, SeedableRng};
    use proptest::prelude::*;
    use rand_isaac::Isaac64Rng;

    use super::{
        centre_and_scale, de_centre_and_scale, mean, median, population_std, rms, sample_std,
    };

    #[test]
    fn statistics_of_empty_slices_are_missing() {
        let empty: [f64; 0] = [];
        assert!(mean(&empty).is_none());
        assert!(sample_std(&empty).is_none());
        assert!(population_std(&empty).is_none());
        assert!(median(&empty).is_none());
        assert!(rms(&empty).is_none());
        assert!(sample_std(&[1.0]).is_none());
    }

    #[test]
    fn median_of_even_count_averages_the_central_pair() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[5.0, 1.0, 3.0]), Some(3.0));
    }

    #[test]
    fn sample_and_population_deviations_differ_by_degrees_of_freedom() {
        let x = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        approx::assert_relative_eq!(population_std(&x).unwrap(), 2.0);
        approx::assert_relative_eq!(sample_std(&x).unwrap(), (32.0f64 / 7.0).sqrt());
    }

    #[test]
    fn default_centring_gives_zero_mean_and_unit_population_deviation() {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        let x: Array1<f64> = Array1::from_iter((0..50).map(|_| rng.gen_range(18_000.0..19_000.0)));

        let scaled = centre_and_scale(&x, None, None).to_vec();

        approx::assert_abs_diff_eq!(mean(&scaled).unwrap(), 0.0, epsilon = 1e-9);
        approx::assert_relative_eq!(population_std(&scaled).unwrap(), 1.0, max_relative = 1e-9);
    }

    proptest! {
        #[test]
        fn de_centring_undoes_centring(
            x in proptest::collection::vec(-1e6f64..1e6, 0..40),
            factor in 1e-3f64..1e3,
            offset in -1e6f64..1e6,
        ) {
            let x = Array1::from(x);
            let scaled = centre_and_scale(&x, Some(factor), Some(offset));
            let restored = de_centre_and_scale(&scaled, factor, offset);
            for (a, b) in x.iter().zip(restored.iter()) {
                prop_assert!((a - b).abs() <= 1e-9 * a.abs().max(1.0) + 1e-6);
            }
        }
    }
}
