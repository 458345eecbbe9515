//! Certified reference materials

/// Certified composition of one batch of reference seawater
///
/// Concentrations are in µmol/kg, the `_std` fields are the certified uncertainties.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReferenceMaterial {
    pub batch: u32,
    pub salinity: f64,
    pub dissolved_inorganic_carbon: f64,
    pub dissolved_inorganic_carbon_std: f64,
    pub total_alkalinity: f64,
    pub total_alkalinity_std: f64,
    pub phosphate: f64,
    pub silicate: f64,
    pub nitrite: f64,
    pub nitrate: f64,
}

const DICKSON: [ReferenceMaterial; 2] = [
    ReferenceMaterial {
        batch: 171,
        salinity: 33.434,
        dissolved_inorganic_carbon: 2029.19,
        dissolved_inorganic_carbon_std: 0.87,
        total_alkalinity: 2217.40,
        total_alkalinity_std: 0.63,
        phosphate: 0.43,
        silicate: 2.3,
        nitrite: 0.00,
        nitrate: 3.1,
    },
    ReferenceMaterial {
        batch: 186,
        salinity: 33.525,
        dissolved_inorganic_carbon: 2012.59,
        dissolved_inorganic_carbon_std: 0.80,
        total_alkalinity: 2212.00,
        total_alkalinity_std: 0.53,
        phosphate: 0.42,
        silicate: 3.3,
        nitrite: 0.01,
        nitrate: 2.8,
    },
];

/// Look up a batch of Dickson seawater reference material
///
/// # Examples
///
/// ```
/// let batch = vindta::crm::dickson(171).unwrap();
/// assert_eq!(batch.dissolved_inorganic_carbon, 2029.19);
/// assert!(vindta::crm::dickson(1).is_none());
/// ```
pub fn dickson(batch: u32) -> Option<ReferenceMaterial> {
    DICKSON.iter().find(|crm| crm.batch == batch).copied()
}

#[cfg(test)]
mod tests {
    use super::dickson;

    #[test]
    fn known_batches_carry_their_certificates() {
        let batch = dickson(186).unwrap();
        assert_eq!(batch.batch, 186);
        approx::assert_relative_eq!(batch.salinity, 33.525);
        approx::assert_relative_eq!(batch.total_alkalinity, 2212.0);
    }
}
