use mp_twin::core::counting::InferenceEngine;
use mp_twin::core::exposure::{ExposureCalibration, ExposureModel};
use mp_twin::core::twin::{CompartmentCalibration, DigitalTwinSimulator};
use mp_twin::domain::model::{ExposureProfile, ParticipantRecord, Route, SizeClass, SizeDistribution};
use mp_twin::{SurveyDataset, TwinConfig, TwinError, TwinPipeline};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::sync::Arc;

fn record(id: i64, overrides: &[(&str, &str)]) -> ParticipantRecord {
    let mut attributes: BTreeMap<String, String> = [
        ("Bottled_Water_Frequency", "sometimes"),
        ("Packaged_Food_Frequency", "sometimes"),
        ("Water_Source", "Tap"),
        ("Seafood_Frequency", "rarely"),
        ("Microwave_Plastic", "no"),
        ("Indoor_Hours", "12"),
        ("Synthetic_Textile_Use", "sometimes"),
        ("Urban_Residence", "no"),
        ("Occupational_Exposure", "no"),
        ("Cosmetic_Use", "rarely"),
        ("Synthetic_Clothing_Hours", "6"),
        ("Hand_Washing_Frequency", "5"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    for (key, value) in overrides {
        attributes.insert(key.to_string(), value.to_string());
    }
    ParticipantRecord::new(id, attributes)
}

fn distribution(counts: [f64; 4]) -> SizeDistribution {
    SizeDistribution::new(SizeClass::ALL.iter().copied().zip(counts).collect())
}

fn profile(oral: [f64; 4], inhalation: [f64; 4], dermal: [f64; 4]) -> ExposureProfile {
    ExposureProfile {
        participant_id: 1,
        oral_total: distribution(oral),
        inhalation_total: distribution(inhalation),
        dermal_total: distribution(dermal),
    }
}

fn calibrations() -> Vec<CompartmentCalibration> {
    vec![
        CompartmentCalibration::default(),
        CompartmentCalibration::default().single_step(),
    ]
}

#[test]
fn test_stages_are_deterministic() {
    let model = ExposureModel::new(ExposureCalibration::default()).unwrap();
    let simulator = DigitalTwinSimulator::new(&CompartmentCalibration::default()).unwrap();
    let participant = record(5, &[("Microwave_Plastic", "yes")]);

    let first = model.assess(&participant).unwrap();
    let second = model.assess(&participant.clone()).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        simulator.simulate(&first).unwrap(),
        simulator.simulate(&second).unwrap()
    );
}

#[test]
fn test_burdens_are_conserved_and_non_negative() {
    let model = ExposureModel::new(ExposureCalibration::default()).unwrap();
    let participants = [
        record(1, &[]),
        record(2, &[("Bottled_Water_Frequency", "daily"), ("Occupational_Exposure", "yes")]),
        record(3, &[("Indoor_Hours", "0"), ("Cosmetic_Use", "never")]),
        record(4, &[("Indoor_Hours", "not sure"), ("Water_Source", "spring")]),
    ];

    for calibration in calibrations() {
        let simulator = DigitalTwinSimulator::new(&calibration).unwrap();
        for participant in &participants {
            let exposure = model.assess(participant).unwrap();
            for route in Route::ALL {
                assert!(exposure.route(route).iter().all(|(_, count)| count >= 0.0));
            }

            let burdens = simulator.simulate(&exposure).unwrap();
            assert!(burdens.rows().iter().all(|row| row.microplastic_count >= 0.0));
            assert!(burdens.total() <= exposure.grand_total());
        }
    }
}

#[test]
fn test_burdens_are_monotonic_in_every_route() {
    let base = profile(
        [10.0, 50.0, 90.0, 50.0],
        [30.0, 90.0, 70.0, 10.0],
        [1.0, 5.0, 20.0, 15.0],
    );
    let bumps = [
        profile([20.0, 50.0, 90.0, 50.0], [30.0, 90.0, 70.0, 10.0], [1.0, 5.0, 20.0, 15.0]),
        profile([10.0, 50.0, 90.0, 50.0], [30.0, 190.0, 70.0, 10.0], [1.0, 5.0, 20.0, 15.0]),
        profile([10.0, 50.0, 90.0, 50.0], [30.0, 90.0, 70.0, 10.0], [1.0, 5.0, 80.0, 15.0]),
    ];

    for calibration in calibrations() {
        let simulator = DigitalTwinSimulator::new(&calibration).unwrap();
        let before = simulator.simulate(&base).unwrap();
        for bumped in &bumps {
            let after = simulator.simulate(bumped).unwrap();
            for (old, new) in before.rows().iter().zip(after.rows()) {
                assert_eq!(old.organ, new.organ);
                assert!(new.microplastic_count >= old.microplastic_count);
            }
        }
    }
}

#[test]
fn test_bottled_water_and_packaged_food_raise_oral_exposure() {
    let model = ExposureModel::new(ExposureCalibration::default()).unwrap();
    let heavy = record(
        1,
        &[("Bottled_Water_Frequency", "daily"), ("Packaged_Food_Frequency", "daily")],
    );
    let light = record(
        2,
        &[("Bottled_Water_Frequency", "never"), ("Packaged_Food_Frequency", "rarely")],
    );

    let heavy = model.assess(&heavy).unwrap();
    let light = model.assess(&light).unwrap();
    assert!(heavy.route_total(Route::Oral) > light.route_total(Route::Oral));
    assert_eq!(
        heavy.route_total(Route::Inhalation),
        light.route_total(Route::Inhalation)
    );
}

#[test]
fn test_missing_attribute_is_reported() {
    let model = ExposureModel::new(ExposureCalibration::default()).unwrap();
    let participant = record(9, &[("Seafood_Frequency", "")]);
    assert!(matches!(
        model.assess(&participant),
        Err(TwinError::MissingAttributeError { participant: 9, .. })
    ));
}

#[test]
fn test_allowlist_is_enforced() {
    let mut config = TwinConfig::default();
    config.selection.allowlist = vec![100, 101];
    let engine = Arc::new(InferenceEngine::from_config(&config.detection).unwrap());
    let pipeline = TwinPipeline::with_engine(&config, engine).unwrap();

    let dataset = SurveyDataset::from_reader("Participant_Index,Water_Source\n1,Tap\n2,Bottled\n".as_bytes())
        .unwrap();
    for seed in 0..5 {
        assert!(matches!(
            pipeline.select_participant(&dataset, &mut StdRng::seed_from_u64(seed)),
            Err(TwinError::NoEligibleParticipantError { .. })
        ));
    }
}
