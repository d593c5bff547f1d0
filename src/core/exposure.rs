use crate::domain::model::{ExposureProfile, ParticipantRecord, Route, SizeClass, SizeDistribution};
use crate::utils::error::{Result, TwinError};
use crate::utils::validation::{
    validate_non_empty_string, validate_non_negative, validate_proportions, Validate,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Score used when a frequency answer is not one of the five known levels.
pub const DEFAULT_FREQUENCY_SCORE: f64 = 1.0;
/// Score used when a numeric answer cannot be parsed.
pub const DEFAULT_NUMERIC_SCORE: f64 = 0.0;
/// Score used when a yes/no answer is neither.
pub const DEFAULT_FLAG_SCORE: f64 = 0.0;

const FREQUENCY_LEVELS: [(&str, f64); 5] = [
    ("never", 0.0),
    ("rarely", 1.0),
    ("sometimes", 2.0),
    ("often", 3.0),
    ("daily", 4.0),
];

/// How a raw survey answer is turned into a non-negative score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttributeScale {
    /// never / rarely / sometimes / often / daily, scored 0 to 4.
    Frequency,
    /// A number clamped to `[0, max]`.
    Numeric { max: f64 },
    /// yes/no style answers, scored 1 or 0.
    Flag,
    /// Explicit level table; unknown levels score `default`.
    Category {
        levels: BTreeMap<String, f64>,
        default: f64,
    },
}

impl AttributeScale {
    /// Scores `raw`, falling back to the documented default for answers
    /// outside the scale's domain.
    pub fn score(&self, attribute: &str, raw: &str) -> f64 {
        let normalized = raw.trim().to_ascii_lowercase();

        match self {
            AttributeScale::Frequency => {
                if let Some((_, score)) = FREQUENCY_LEVELS
                    .iter()
                    .find(|(level, _)| *level == normalized)
                {
                    return *score;
                }
                match normalized.parse::<f64>() {
                    Ok(value) if (0.0..=4.0).contains(&value) => value,
                    _ => {
                        tracing::warn!(
                            "Unknown frequency '{}' for {}, using default score {}",
                            raw,
                            attribute,
                            DEFAULT_FREQUENCY_SCORE
                        );
                        DEFAULT_FREQUENCY_SCORE
                    }
                }
            }
            AttributeScale::Numeric { max } => match normalized.parse::<f64>() {
                Ok(value) if value.is_finite() => value.clamp(0.0, *max),
                _ => {
                    tracing::warn!(
                        "Non-numeric value '{}' for {}, using default score {}",
                        raw,
                        attribute,
                        DEFAULT_NUMERIC_SCORE
                    );
                    DEFAULT_NUMERIC_SCORE
                }
            },
            AttributeScale::Flag => match normalized.as_str() {
                "yes" | "y" | "true" | "1" => 1.0,
                "no" | "n" | "false" | "0" => 0.0,
                _ => {
                    tracing::warn!(
                        "Unrecognized yes/no answer '{}' for {}, using default score {}",
                        raw,
                        attribute,
                        DEFAULT_FLAG_SCORE
                    );
                    DEFAULT_FLAG_SCORE
                }
            },
            AttributeScale::Category { levels, default } => levels
                .iter()
                .find(|(level, _)| level.eq_ignore_ascii_case(&normalized))
                .map(|(_, score)| *score)
                .unwrap_or_else(|| {
                    tracing::warn!(
                        "Unknown category '{}' for {}, using default score {}",
                        raw,
                        attribute,
                        default
                    );
                    *default
                }),
        }
    }

    fn validate(&self, field: &str) -> Result<()> {
        match self {
            AttributeScale::Frequency | AttributeScale::Flag => Ok(()),
            AttributeScale::Numeric { max } => validate_non_negative(field, *max),
            AttributeScale::Category { levels, default } => {
                validate_non_negative(field, *default)?;
                for score in levels.values() {
                    validate_non_negative(field, *score)?;
                }
                Ok(())
            }
        }
    }
}

/// One additive term: `weight` particles per day per unit of score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeTerm {
    pub attribute: String,
    pub weight: f64,
    pub scale: AttributeScale,
}

impl AttributeTerm {
    pub fn new(attribute: &str, weight: f64, scale: AttributeScale) -> Self {
        Self {
            attribute: attribute.to_string(),
            weight,
            scale,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteWeights {
    /// Particles per day before any survey answer is considered.
    pub baseline: f64,
    /// Share of the route's intake per size class (nano, micro, small, large).
    pub proportions: BTreeMap<String, f64>,
    #[serde(default)]
    pub terms: Vec<AttributeTerm>,
}

impl RouteWeights {
    fn validate(&self, route: Route) -> Result<()> {
        let field = format!("exposure.{}", route);
        validate_non_negative(&format!("{}.baseline", field), self.baseline)?;

        let mut shares = Vec::new();
        for (class, share) in &self.proportions {
            class.parse::<SizeClass>()?;
            shares.push(*share);
        }
        validate_proportions(&format!("{}.proportions", field), &shares)?;

        for term in &self.terms {
            let term_field = format!("{}.terms.{}", field, term.attribute);
            validate_non_empty_string(&term_field, &term.attribute)?;
            validate_non_negative(&format!("{}.weight", term_field), term.weight)?;
            term.scale.validate(&term_field)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureCalibration {
    /// Days of intake summed into each profile.
    pub exposure_days: f64,
    pub oral: RouteWeights,
    pub inhalation: RouteWeights,
    pub dermal: RouteWeights,
}

impl ExposureCalibration {
    pub fn route(&self, route: Route) -> &RouteWeights {
        match route {
            Route::Oral => &self.oral,
            Route::Inhalation => &self.inhalation,
            Route::Dermal => &self.dermal,
        }
    }
}

fn proportions(shares: [f64; 4]) -> BTreeMap<String, f64> {
    SizeClass::ALL
        .iter()
        .zip(shares)
        .map(|(class, share)| (class.as_str().to_string(), share))
        .collect()
}

impl Default for ExposureCalibration {
    fn default() -> Self {
        let water_source = AttributeScale::Category {
            levels: [("bottled", 3.0), ("tap", 1.5), ("filtered", 0.5), ("well", 1.0)]
                .into_iter()
                .map(|(level, score)| (level.to_string(), score))
                .collect(),
            default: 1.0,
        };

        Self {
            exposure_days: 7.0,
            oral: RouteWeights {
                baseline: 20.0,
                proportions: proportions([0.05, 0.25, 0.45, 0.25]),
                terms: vec![
                    AttributeTerm::new("Bottled_Water_Frequency", 40.0, AttributeScale::Frequency),
                    AttributeTerm::new("Packaged_Food_Frequency", 30.0, AttributeScale::Frequency),
                    AttributeTerm::new("Water_Source", 20.0, water_source),
                    AttributeTerm::new("Seafood_Frequency", 15.0, AttributeScale::Frequency),
                    AttributeTerm::new("Microwave_Plastic", 25.0, AttributeScale::Flag),
                ],
            },
            inhalation: RouteWeights {
                baseline: 10.0,
                proportions: proportions([0.15, 0.45, 0.35, 0.05]),
                terms: vec![
                    AttributeTerm::new("Indoor_Hours", 3.0, AttributeScale::Numeric { max: 24.0 }),
                    AttributeTerm::new("Synthetic_Textile_Use", 12.0, AttributeScale::Frequency),
                    AttributeTerm::new("Urban_Residence", 20.0, AttributeScale::Flag),
                    AttributeTerm::new("Occupational_Exposure", 45.0, AttributeScale::Flag),
                ],
            },
            dermal: RouteWeights {
                baseline: 2.0,
                proportions: proportions([0.02, 0.13, 0.45, 0.40]),
                terms: vec![
                    AttributeTerm::new("Cosmetic_Use", 6.0, AttributeScale::Frequency),
                    AttributeTerm::new(
                        "Synthetic_Clothing_Hours",
                        1.5,
                        AttributeScale::Numeric { max: 24.0 },
                    ),
                    AttributeTerm::new(
                        "Hand_Washing_Frequency",
                        0.5,
                        AttributeScale::Numeric { max: 20.0 },
                    ),
                ],
            },
        }
    }
}

impl Validate for ExposureCalibration {
    fn validate(&self) -> Result<()> {
        validate_non_negative("exposure.exposure_days", self.exposure_days)?;
        for route in Route::ALL {
            self.route(route).validate(route)?;
        }
        Ok(())
    }
}

/// Maps survey answers to per-route, per-size-class intake. Holds no state
/// beyond its calibration, so the same record always gives the same profile.
#[derive(Debug, Clone)]
pub struct ExposureModel {
    calibration: ExposureCalibration,
    shares: BTreeMap<Route, Vec<(SizeClass, f64)>>,
}

impl ExposureModel {
    pub fn new(calibration: ExposureCalibration) -> Result<Self> {
        calibration.validate()?;

        let mut shares = BTreeMap::new();
        for route in Route::ALL {
            let mut route_shares = Vec::new();
            for (class, share) in &calibration.route(route).proportions {
                route_shares.push((class.parse::<SizeClass>()?, *share));
            }
            route_shares.sort_by_key(|(class, _)| *class);
            shares.insert(route, route_shares);
        }

        Ok(Self {
            calibration,
            shares,
        })
    }

    pub fn calibration(&self) -> &ExposureCalibration {
        &self.calibration
    }

    /// Daily intake for one route before the size split.
    pub fn daily_intake(&self, record: &ParticipantRecord, route: Route) -> Result<f64> {
        let weights = self.calibration.route(route);
        let mut intake = weights.baseline;

        for term in &weights.terms {
            let raw = record.attribute(&term.attribute).ok_or_else(|| {
                TwinError::MissingAttributeError {
                    participant: record.id(),
                    attribute: term.attribute.clone(),
                }
            })?;
            intake += term.weight * term.scale.score(&term.attribute, raw);
        }

        Ok(intake)
    }

    pub fn assess(&self, record: &ParticipantRecord) -> Result<ExposureProfile> {
        let mut totals = BTreeMap::new();

        for route in Route::ALL {
            let total = self.daily_intake(record, route)? * self.calibration.exposure_days;
            let split = self.shares[&route]
                .iter()
                .map(|(class, share)| (*class, total * share))
                .collect();
            tracing::debug!("Participant {} {} intake: {:.2}", record.id(), route, total);
            totals.insert(route, SizeDistribution::new(split));
        }

        let mut take = |route: Route| totals.remove(&route).unwrap_or_default();
        let profile = ExposureProfile {
            participant_id: record.id(),
            oral_total: take(Route::Oral),
            inhalation_total: take(Route::Inhalation),
            dermal_total: take(Route::Dermal),
        };

        tracing::info!(
            "Exposure for participant {}: oral {:.0}, inhalation {:.0}, dermal {:.0}",
            record.id(),
            profile.route_total(Route::Oral),
            profile.route_total(Route::Inhalation),
            profile.route_total(Route::Dermal)
        );

        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_record(id: i64, overrides: &[(&str, &str)]) -> ParticipantRecord {
        let mut attributes: BTreeMap<String, String> = [
            ("Bottled_Water_Frequency", "sometimes"),
            ("Packaged_Food_Frequency", "sometimes"),
            ("Water_Source", "Tap"),
            ("Seafood_Frequency", "rarely"),
            ("Microwave_Plastic", "no"),
            ("Indoor_Hours", "16"),
            ("Synthetic_Textile_Use", "often"),
            ("Urban_Residence", "yes"),
            ("Occupational_Exposure", "no"),
            ("Cosmetic_Use", "daily"),
            ("Synthetic_Clothing_Hours", "8"),
            ("Hand_Washing_Frequency", "6"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        for (key, value) in overrides {
            attributes.insert(key.to_string(), value.to_string());
        }
        ParticipantRecord::new(id, attributes)
    }

    fn model() -> ExposureModel {
        ExposureModel::new(ExposureCalibration::default()).unwrap()
    }

    #[test]
    fn test_frequency_scale() {
        let scale = AttributeScale::Frequency;
        assert_eq!(scale.score("x", "Never"), 0.0);
        assert_eq!(scale.score("x", " DAILY "), 4.0);
        assert_eq!(scale.score("x", "2.5"), 2.5);
        assert_eq!(scale.score("x", "hourly"), DEFAULT_FREQUENCY_SCORE);
        assert_eq!(scale.score("x", "9"), DEFAULT_FREQUENCY_SCORE);
    }

    #[test]
    fn test_numeric_scale_clamps() {
        let scale = AttributeScale::Numeric { max: 24.0 };
        assert_eq!(scale.score("x", "30"), 24.0);
        assert_eq!(scale.score("x", "-3"), 0.0);
        assert_eq!(scale.score("x", "many"), DEFAULT_NUMERIC_SCORE);
        assert_eq!(scale.score("x", "NaN"), DEFAULT_NUMERIC_SCORE);
    }

    #[test]
    fn test_category_scale_falls_back() {
        let calibration = ExposureCalibration::default();
        let water = &calibration.oral.terms[2];
        assert_eq!(water.scale.score(&water.attribute, "BOTTLED"), 3.0);
        assert_eq!(water.scale.score(&water.attribute, "rainwater"), 1.0);
    }

    #[test]
    fn test_profile_is_deterministic_and_sized() {
        let record = full_record(1, &[]);
        let first = model().assess(&record).unwrap();
        let second = model().assess(&record).unwrap();
        assert_eq!(first, second);

        for route in Route::ALL {
            let distribution = first.route(route);
            assert_eq!(distribution.iter().count(), 4);
            assert!(distribution.iter().all(|(_, count)| count >= 0.0));
        }
    }

    #[test]
    fn test_split_preserves_route_total() {
        let record = full_record(2, &[]);
        let model = model();
        let profile = model.assess(&record).unwrap();

        let expected = model.daily_intake(&record, Route::Oral).unwrap() * 7.0;
        assert!((profile.route_total(Route::Oral) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_known_oral_intake() {
        // 20 + 40*2 + 30*2 + 20*1.5 + 15*1 + 25*0 = 205 per day
        let record = full_record(3, &[]);
        let daily = model().daily_intake(&record, Route::Oral).unwrap();
        assert!((daily - 205.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_attribute_is_named() {
        let mut attributes = full_record(5, &[]).attributes().clone();
        attributes.remove("Indoor_Hours");
        let record = ParticipantRecord::new(5, attributes);

        match model().assess(&record) {
            Err(TwinError::MissingAttributeError {
                participant,
                attribute,
            }) => {
                assert_eq!(participant, 5);
                assert_eq!(attribute, "Indoor_Hours");
            }
            other => panic!("expected missing attribute, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_cell_is_missing() {
        let record = full_record(6, &[("Cosmetic_Use", "")]);
        assert!(matches!(
            model().assess(&record),
            Err(TwinError::MissingAttributeError { .. })
        ));
    }

    #[test]
    fn test_unusual_values_do_not_fail() {
        let record = full_record(
            7,
            &[
                ("Water_Source", "spring"),
                ("Urban_Residence", "maybe"),
                ("Indoor_Hours", "all day"),
            ],
        );
        assert!(model().assess(&record).is_ok());
    }

    #[test]
    fn test_calibration_rejects_bad_tables() {
        let mut calibration = ExposureCalibration::default();
        calibration.oral.terms[0].weight = -1.0;
        assert!(ExposureModel::new(calibration).is_err());

        let mut calibration = ExposureCalibration::default();
        calibration.dermal.proportions.insert("nano".to_string(), 0.5);
        assert!(ExposureModel::new(calibration).is_err());

        let mut calibration = ExposureCalibration::default();
        calibration.inhalation.proportions.insert("huge".to_string(), 0.0);
        assert!(ExposureModel::new(calibration).is_err());
    }
}
