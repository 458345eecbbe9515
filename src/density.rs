//! Seawater density at the conditions of analysis

/// A seawater equation of state
pub trait SeawaterDensity {
    /// Density in kg/L at `temperature` (°C) and practical `salinity`, at one atmosphere
    fn density(&self, temperature: f64, salinity: f64) -> f64;
}

/// One-atmosphere equation of state of Millero and Poisson (1981)
#[derive(Clone, Copy, Debug, Default)]
pub struct Mp81;

/// Pure water density in kg/m³ (the SMOW polynomial)
fn water_density(t: f64) -> f64 {
    999.842_594 + 6.793_952e-2 * t - 9.095_290e-3 * t.powi(2) + 1.001_685e-4 * t.powi(3)
        - 1.120_083e-6 * t.powi(4)
        + 6.536_332e-9 * t.powi(5)
}

impl SeawaterDensity for Mp81 {
    fn density(&self, temperature: f64, salinity: f64) -> f64 {
        let t = temperature;
        let a = 8.244_93e-1 - 4.089_9e-3 * t + 7.643_8e-5 * t.powi(2) - 8.246_7e-7 * t.powi(3)
            + 5.387_5e-9 * t.powi(4);
        let b = -5.724_66e-3 + 1.022_7e-4 * t - 1.654_6e-6 * t.powi(2);
        let c = 4.831_4e-4;
        let rho = water_density(t) + a * salinity + b * salinity.powf(1.5) + c * salinity.powi(2);
        rho / 1000.0
    }
}
