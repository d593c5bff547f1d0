//! Compartmental mass-balance model ("digital twin").
//!
//! Absorbed dose per route is the size-weighted uptake of that route's
//! intake. Each route's dose is split across organs by a non-negative
//! partition matrix whose rows sum to at most one, then delivered in
//! `steps` equal pulses with per-organ retention applied after each pulse.
//! Every coefficient lies in `[0, 1]`, so the organ total can never exceed
//! the absorbed total and no burden decreases when an intake grows.

use crate::domain::model::{ExposureProfile, Organ, OrganBurden, OrganBurdenTable, Route, SizeClass};
use crate::utils::error::{Result, TwinError};
use crate::utils::validation::{validate_fraction, validate_positive_number, Validate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const ORGANS: usize = Organ::ALL.len();
const ROUTES: usize = Route::ALL.len();
const SIZE_CLASSES: usize = SizeClass::ALL.len();

/// Relative slack allowed when checking conservation against float rounding.
const CONSERVATION_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompartmentCalibration {
    pub steps: usize,
    /// Fraction of each size class that crosses into circulation.
    pub uptake: BTreeMap<String, f64>,
    /// route -> organ -> partition coefficient. Missing entries are zero.
    pub partition: BTreeMap<String, BTreeMap<String, f64>>,
    /// organ -> fraction kept after each pulse. Missing entries keep everything.
    pub retention: BTreeMap<String, f64>,
}

fn organ_row(values: [f64; ORGANS]) -> BTreeMap<String, f64> {
    Organ::ALL
        .iter()
        .zip(values)
        .map(|(organ, value)| (organ.as_str().to_string(), value))
        .collect()
}

impl Default for CompartmentCalibration {
    fn default() -> Self {
        let uptake = SizeClass::ALL
            .iter()
            .zip([0.9, 0.5, 0.2, 0.05])
            .map(|(class, value)| (class.as_str().to_string(), value))
            .collect();

        let mut partition = BTreeMap::new();
        partition.insert(
            Route::Oral.as_str().to_string(),
            organ_row([0.10, 0.04, 0.02, 0.01, 0.30, 0.005]),
        );
        partition.insert(
            Route::Inhalation.as_str().to_string(),
            organ_row([0.05, 0.02, 0.02, 0.40, 0.05, 0.01]),
        );
        partition.insert(
            Route::Dermal.as_str().to_string(),
            organ_row([0.02, 0.01, 0.005, 0.005, 0.0, 0.002]),
        );

        Self {
            steps: 4,
            uptake,
            partition,
            retention: organ_row([0.95, 0.80, 0.90, 0.85, 0.60, 0.99]),
        }
    }
}

impl CompartmentCalibration {
    /// Single pulse, no clearance: burden is exactly uptake times partition.
    pub fn single_step(mut self) -> Self {
        self.steps = 1;
        self.retention = organ_row([1.0; ORGANS]);
        self
    }
}

fn organ_key(field: &str, name: &str) -> Result<usize> {
    let organ: Organ = name.parse().map_err(|_| TwinError::ConfigValidationError {
        field: field.to_string(),
        message: format!("unknown organ '{}'", name),
    })?;
    Ok(organ_index(organ))
}

fn organ_index(organ: Organ) -> usize {
    Organ::ALL.iter().position(|o| *o == organ).unwrap_or(0)
}

fn route_index(route: Route) -> usize {
    Route::ALL.iter().position(|r| *r == route).unwrap_or(0)
}

fn size_index(class: SizeClass) -> usize {
    SizeClass::ALL.iter().position(|c| *c == class).unwrap_or(0)
}

impl Validate for CompartmentCalibration {
    fn validate(&self) -> Result<()> {
        self.resolve().map(|_| ())
    }
}

impl CompartmentCalibration {
    fn resolve(&self) -> Result<DigitalTwinSimulator> {
        validate_positive_number("twin.steps", self.steps, 1)?;

        let mut uptake = [None; SIZE_CLASSES];
        for (name, value) in &self.uptake {
            let class: SizeClass = name.parse()?;
            validate_fraction(&format!("twin.uptake.{}", name), *value)?;
            uptake[size_index(class)] = Some(*value);
        }
        let mut resolved_uptake = [0.0; SIZE_CLASSES];
        for (slot, class) in SizeClass::ALL.iter().enumerate() {
            resolved_uptake[slot] = uptake[slot].ok_or_else(|| TwinError::MissingConfigError {
                field: format!("twin.uptake.{}", class.as_str()),
            })?;
        }

        let mut partition = [[0.0; ORGANS]; ROUTES];
        for (route_name, row) in &self.partition {
            let route: Route = route_name.parse()?;
            let field = format!("twin.partition.{}", route_name);
            for (organ_name, value) in row {
                validate_fraction(&format!("{}.{}", field, organ_name), *value)?;
                partition[route_index(route)][organ_key(&field, organ_name)?] = *value;
            }

            let row_sum: f64 = partition[route_index(route)].iter().sum();
            if row_sum > 1.0 + CONSERVATION_TOLERANCE {
                return Err(TwinError::ConfigValidationError {
                    field,
                    message: format!("partition row sums to {:.4}, must be at most 1", row_sum),
                });
            }
        }

        let mut retention = [1.0; ORGANS];
        for (organ_name, value) in &self.retention {
            validate_fraction(&format!("twin.retention.{}", organ_name), *value)?;
            retention[organ_key("twin.retention", organ_name)?] = *value;
        }

        Ok(DigitalTwinSimulator {
            steps: self.steps,
            uptake: resolved_uptake,
            partition,
            retention,
        })
    }
}

/// Deterministic organ burden model. Construct once from a validated
/// calibration and reuse for any number of profiles.
#[derive(Debug, Clone, PartialEq)]
pub struct DigitalTwinSimulator {
    steps: usize,
    uptake: [f64; SIZE_CLASSES],
    partition: [[f64; ORGANS]; ROUTES],
    retention: [f64; ORGANS],
}

impl DigitalTwinSimulator {
    pub fn new(calibration: &CompartmentCalibration) -> Result<Self> {
        calibration.resolve()
    }

    /// Absorbed particles per route after size-dependent uptake.
    pub fn absorbed_dose(&self, profile: &ExposureProfile) -> BTreeMap<Route, f64> {
        Route::ALL
            .iter()
            .map(|route| {
                let absorbed = profile
                    .route(*route)
                    .iter()
                    .map(|(class, count)| count * self.uptake[size_index(class)])
                    .sum();
                (*route, absorbed)
            })
            .collect()
    }

    pub fn simulate(&self, profile: &ExposureProfile) -> Result<OrganBurdenTable> {
        Self::check_exposure(profile)?;
        let absorbed = self.absorbed_dose(profile);

        let mut rows = Vec::with_capacity(ORGANS);
        for (slot, organ) in Organ::ALL.iter().enumerate() {
            let inflow: f64 = Route::ALL
                .iter()
                .map(|route| absorbed[route] * self.partition[route_index(*route)][slot])
                .sum();

            let pulse = inflow / self.steps as f64;
            let mut burden = 0.0;
            for _ in 0..self.steps {
                burden = (burden + pulse) * self.retention[slot];
            }

            tracing::debug!("{}: inflow {:.3}, burden {:.3}", organ, inflow, burden);
            rows.push(OrganBurden {
                organ: *organ,
                microplastic_count: burden,
            });
        }

        let table = OrganBurdenTable::new(profile.participant_id, rows);
        self.check_invariants(profile, &table)?;

        tracing::info!(
            "Digital twin for participant {}: {:.1} particles retained of {:.1} exposed",
            profile.participant_id,
            table.total(),
            profile.grand_total()
        );
        Ok(table)
    }

    /// Exposure counts must be finite and non-negative before anything is computed.
    fn check_exposure(profile: &ExposureProfile) -> Result<()> {
        for route in Route::ALL {
            for (class, count) in profile.route(route).iter() {
                if !count.is_finite() || count < 0.0 {
                    let message = format!(
                        "{} {} exposure is {} for participant {}",
                        route,
                        class.as_str(),
                        count,
                        profile.participant_id
                    );
                    tracing::error!("Invariant violation: {}", message);
                    return Err(TwinError::InvariantViolation { message });
                }
            }
        }
        Ok(())
    }

    fn check_invariants(&self, profile: &ExposureProfile, table: &OrganBurdenTable) -> Result<()> {
        for row in table.rows() {
            if !row.microplastic_count.is_finite() || row.microplastic_count < 0.0 {
                let message = format!(
                    "{} burden is {} for participant {}",
                    row.organ, row.microplastic_count, profile.participant_id
                );
                tracing::error!("Invariant violation: {}", message);
                return Err(TwinError::InvariantViolation { message });
            }
        }

        let exposed = profile.grand_total();
        let retained = table.total();
        if retained > exposed * (1.0 + CONSERVATION_TOLERANCE) + f64::EPSILON {
            let message = format!(
                "organ burdens sum to {} but only {} particles were exposed (participant {})",
                retained, exposed, profile.participant_id
            );
            tracing::error!("Invariant violation: {}", message);
            return Err(TwinError::InvariantViolation { message });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::SizeDistribution;

    fn distribution(counts: [f64; 4]) -> SizeDistribution {
        SizeDistribution::new(SizeClass::ALL.iter().copied().zip(counts).collect())
    }

    fn profile(oral: f64, inhalation: f64, dermal: f64) -> ExposureProfile {
        ExposureProfile {
            participant_id: 9,
            oral_total: distribution([oral * 0.05, oral * 0.25, oral * 0.45, oral * 0.25]),
            inhalation_total: distribution([inhalation * 0.15, inhalation * 0.45, inhalation * 0.35, inhalation * 0.05]),
            dermal_total: distribution([dermal * 0.02, dermal * 0.13, dermal * 0.45, dermal * 0.40]),
        }
    }

    #[test]
    fn test_rows_follow_fixed_organ_order() {
        let simulator = DigitalTwinSimulator::new(&CompartmentCalibration::default()).unwrap();
        let table = simulator.simulate(&profile(1000.0, 500.0, 100.0)).unwrap();

        let organs: Vec<Organ> = table.rows().iter().map(|row| row.organ).collect();
        assert_eq!(organs, Organ::ALL.to_vec());
        assert_eq!(table.participant_id(), 9);
    }

    #[test]
    fn test_single_step_matches_partition_formula() {
        let calibration = CompartmentCalibration::default().single_step();
        let simulator = DigitalTwinSimulator::new(&calibration).unwrap();

        let mut uptake_only = CompartmentCalibration::default().single_step();
        uptake_only.uptake.values_mut().for_each(|v| *v = 1.0);
        let full_uptake = DigitalTwinSimulator::new(&uptake_only).unwrap();

        let input = profile(1000.0, 0.0, 0.0);
        let absorbed = simulator.absorbed_dose(&input)[&Route::Oral];
        // 0.05*0.9 + 0.25*0.5 + 0.45*0.2 + 0.25*0.05 = 0.2725
        assert!((absorbed - 272.5).abs() < 1e-9);

        let table = simulator.simulate(&input).unwrap();
        assert!((table.burden_of(Organ::Liver) - 27.25).abs() < 1e-9);
        assert!((table.burden_of(Organ::Gut) - 81.75).abs() < 1e-9);

        let table = full_uptake.simulate(&input).unwrap();
        assert!((table.burden_of(Organ::Liver) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_retention_clears_particles() {
        let simulator = DigitalTwinSimulator::new(&CompartmentCalibration::default()).unwrap();
        let single = DigitalTwinSimulator::new(&CompartmentCalibration::default().single_step()).unwrap();

        let input = profile(2000.0, 800.0, 50.0);
        let cleared = simulator.simulate(&input).unwrap();
        let kept = single.simulate(&input).unwrap();
        for organ in Organ::ALL {
            assert!(cleared.burden_of(organ) <= kept.burden_of(organ));
        }
        assert!(cleared.burden_of(Organ::Gut) < kept.burden_of(Organ::Gut));
    }

    #[test]
    fn test_zero_exposure_gives_zero_burden() {
        let simulator = DigitalTwinSimulator::new(&CompartmentCalibration::default()).unwrap();
        let table = simulator.simulate(&profile(0.0, 0.0, 0.0)).unwrap();
        assert_eq!(table.total(), 0.0);
    }

    #[test]
    fn test_negative_input_fails_loudly() {
        let simulator = DigitalTwinSimulator::new(&CompartmentCalibration::default()).unwrap();
        let result = simulator.simulate(&profile(-100.0, 0.0, 0.0));
        assert!(matches!(result, Err(TwinError::InvariantViolation { .. })));
    }

    #[test]
    fn test_negative_exposure_rejected_even_when_burdens_look_valid() {
        let simulator = DigitalTwinSimulator::new(&CompartmentCalibration::default()).unwrap();
        let mut input = profile(0.0, 1000.0, 0.0);
        input.dermal_total = distribution([0.0, 0.0, 0.0, -10.0]);

        let result = simulator.simulate(&input);
        assert!(matches!(result, Err(TwinError::InvariantViolation { .. })));
    }

    #[test]
    fn test_non_finite_exposure_rejected() {
        let simulator = DigitalTwinSimulator::new(&CompartmentCalibration::default()).unwrap();
        for bad in [f64::NAN, f64::INFINITY] {
            let mut input = profile(100.0, 0.0, 0.0);
            input.oral_total = distribution([1.0, bad, 1.0, 1.0]);
            assert!(matches!(
                simulator.simulate(&input),
                Err(TwinError::InvariantViolation { .. })
            ));
        }
    }

    #[test]
    fn test_conservation_breach_is_reported() {
        let simulator = DigitalTwinSimulator::new(&CompartmentCalibration::default()).unwrap();
        let input = profile(1.0, 0.0, 0.0);
        let rows = Organ::ALL
            .iter()
            .map(|organ| OrganBurden {
                organ: *organ,
                microplastic_count: 10.0,
            })
            .collect();
        let table = OrganBurdenTable::new(input.participant_id, rows);

        assert!(matches!(
            simulator.check_invariants(&input, &table),
            Err(TwinError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn test_calibration_validation() {
        let mut calibration = CompartmentCalibration::default();
        calibration
            .partition
            .get_mut("oral")
            .unwrap()
            .insert("Gut".to_string(), 0.95);
        assert!(DigitalTwinSimulator::new(&calibration).is_err());

        let mut calibration = CompartmentCalibration::default();
        calibration.retention.insert("Heart".to_string(), 0.5);
        assert!(DigitalTwinSimulator::new(&calibration).is_err());

        let mut calibration = CompartmentCalibration::default();
        calibration.uptake.remove("large");
        assert!(matches!(
            DigitalTwinSimulator::new(&calibration),
            Err(TwinError::MissingConfigError { .. })
        ));

        let mut calibration = CompartmentCalibration::default();
        calibration.steps = 0;
        assert!(calibration.validate().is_err());

        let mut calibration = CompartmentCalibration::default();
        calibration
            .partition
            .get_mut("dermal")
            .unwrap()
            .insert("Brain".to_string(), -0.1);
        assert!(calibration.validate().is_err());
    }
}
