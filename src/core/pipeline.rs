use crate::config::toml_config::TwinConfig;
use crate::core::comparison::ComparisonPolicy;
use crate::core::counting::InferenceEngine;
use crate::core::exposure::ExposureModel;
use crate::core::histology::{AssetCatalog, HistologyImageSynthesizer};
use crate::core::selector::{ParticipantSelector, SurveyDataset};
use crate::core::twin::DigitalTwinSimulator;
use crate::domain::model::{
    CountResult, ExposureProfile, HistologyImage, ImageKey, Organ, OrganBurdenTable,
    ParticipantRecord,
};
use crate::domain::ports::TissueAssets;
use crate::utils::error::Result;
use crate::utils::validation::Validate;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;

/// The values produced for one participant, passed on by value. Nothing in
/// here changes after `TwinPipeline::run` returns it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineRun {
    participant: ParticipantRecord,
    exposure: ExposureProfile,
    burdens: OrganBurdenTable,
}

impl PipelineRun {
    pub fn participant(&self) -> &ParticipantRecord {
        &self.participant
    }

    pub fn exposure(&self) -> &ExposureProfile {
        &self.exposure
    }

    pub fn burdens(&self) -> &OrganBurdenTable {
        &self.burdens
    }

    /// Key of the image calibrated to this run's burden for `organ`.
    pub fn image_key(&self, organ: Organ) -> ImageKey {
        ImageKey::new(organ, self.burdens.burden_of(organ))
    }
}

/// Wires the five stages together. Each stage is also callable on its own;
/// a failure in one leaves the values already produced usable.
pub struct TwinPipeline<A: TissueAssets = AssetCatalog> {
    selector: ParticipantSelector,
    exposure: ExposureModel,
    simulator: DigitalTwinSimulator,
    synthesizer: HistologyImageSynthesizer<A>,
    engine: Arc<InferenceEngine>,
    policy: ComparisonPolicy,
}

impl TwinPipeline<AssetCatalog> {
    /// Builds every stage from `config`, using the process-wide detection engine.
    pub fn from_config(config: &TwinConfig) -> Result<Self> {
        let engine = InferenceEngine::shared(&config.detection)?;
        Self::with_engine(config, engine)
    }

    /// Same as `from_config` but with a caller-supplied engine.
    pub fn with_engine(config: &TwinConfig, engine: Arc<InferenceEngine>) -> Result<Self> {
        config.validate()?;
        let synthesizer = HistologyImageSynthesizer::from_calibration(&config.histology)?;
        Self::assemble(config, synthesizer, engine)
    }
}

impl<A: TissueAssets> TwinPipeline<A> {
    pub fn assemble(
        config: &TwinConfig,
        synthesizer: HistologyImageSynthesizer<A>,
        engine: Arc<InferenceEngine>,
    ) -> Result<Self> {
        config.comparison.validate()?;
        Ok(Self {
            selector: ParticipantSelector::new(&config.selection)?,
            exposure: ExposureModel::new(config.exposure.clone())?,
            simulator: DigitalTwinSimulator::new(&config.twin)?,
            synthesizer,
            engine,
            policy: config.comparison,
        })
    }

    /// Replaces the close-match policy, e.g. for a stricter classroom round.
    pub fn with_policy(mut self, policy: ComparisonPolicy) -> Result<Self> {
        policy.validate()?;
        self.policy = policy;
        Ok(self)
    }

    pub fn policy(&self) -> &ComparisonPolicy {
        &self.policy
    }

    pub fn engine(&self) -> &Arc<InferenceEngine> {
        &self.engine
    }

    pub fn select_participant<R: Rng + ?Sized>(
        &self,
        dataset: &SurveyDataset,
        rng: &mut R,
    ) -> Result<ParticipantRecord> {
        self.selector.select(dataset, rng)
    }

    pub fn select_participant_by_id(&self, dataset: &SurveyDataset, id: i64) -> Result<ParticipantRecord> {
        self.selector.select_by_id(dataset, id)
    }

    pub fn assess_exposure(&self, participant: &ParticipantRecord) -> Result<ExposureProfile> {
        self.exposure.assess(participant)
    }

    pub fn simulate(&self, exposure: &ExposureProfile) -> Result<OrganBurdenTable> {
        self.simulator.simulate(exposure)
    }

    /// Exposure and twin stages for one participant.
    pub fn run(&self, participant: ParticipantRecord) -> Result<PipelineRun> {
        let exposure = self.assess_exposure(&participant)?;
        let burdens = self.simulate(&exposure)?;
        Ok(PipelineRun {
            participant,
            exposure,
            burdens,
        })
    }

    pub fn synthesize(&self, key: ImageKey) -> Result<HistologyImage> {
        self.synthesizer.synthesize(key)
    }

    /// Image for a named organ of a finished run.
    pub fn image_for(&self, run: &PipelineRun, organ_name: &str) -> Result<HistologyImage> {
        let organ: Organ = organ_name.parse()?;
        self.synthesize(run.image_key(organ))
    }

    pub fn count(&self, image: &HistologyImage) -> Result<u64> {
        self.engine.count(image)
    }

    /// Compares a human count against the detector on an already rendered image.
    pub fn compare_image(&self, human_count: u64, image: &HistologyImage) -> Result<CountResult> {
        let automated = self.count(image)?;
        Ok(self.policy.judge(human_count, automated))
    }

    /// Comparison request: a human count and the key of the image it was made on.
    pub fn compare(&self, human_count: u64, key: ImageKey) -> Result<CountResult> {
        let image = self.synthesize(key)?;
        self.compare_image(human_count, &image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::counting::DetectorWeights;
    use crate::domain::model::Verdict;
    use crate::utils::error::TwinError;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const SURVEY: &str = "\
Participant_Index,Bottled_Water_Frequency,Packaged_Food_Frequency,Water_Source,Seafood_Frequency,Microwave_Plastic,Indoor_Hours,Synthetic_Textile_Use,Urban_Residence,Occupational_Exposure,Cosmetic_Use,Synthetic_Clothing_Hours,Hand_Washing_Frequency
3,daily,often,Bottled,sometimes,yes,18,often,yes,no,daily,10,8
7,rarely,never,Filtered,never,no,10,rarely,no,no,rarely,2,4
12,sometimes,sometimes,Tap,rarely,no,14,sometimes,yes,yes,often,6,5
";

    fn pipeline() -> TwinPipeline {
        let config = TwinConfig::default();
        let engine = Arc::new(InferenceEngine::from_config(&config.detection).unwrap());
        TwinPipeline::with_engine(&config, engine).unwrap()
    }

    #[test]
    fn test_run_produces_consistent_values() {
        let pipeline = pipeline();
        let dataset = SurveyDataset::from_reader(SURVEY.as_bytes()).unwrap();
        let participant = pipeline.select_participant_by_id(&dataset, 3).unwrap();

        let run = pipeline.run(participant.clone()).unwrap();
        assert_eq!(run.participant(), &participant);
        assert_eq!(run.exposure().participant_id, 3);
        assert_eq!(run.burdens().participant_id(), 3);
        assert!(run.burdens().total() <= run.exposure().grand_total());
    }

    #[test]
    fn test_image_for_unknown_organ_keeps_run_usable() {
        let pipeline = pipeline();
        let dataset = SurveyDataset::from_reader(SURVEY.as_bytes()).unwrap();
        let participant = pipeline
            .select_participant(&dataset, &mut StdRng::seed_from_u64(5))
            .unwrap();
        let run = pipeline.run(participant).unwrap();

        assert!(matches!(
            pipeline.image_for(&run, "Heart"),
            Err(TwinError::UnknownOrganError { .. })
        ));
        let image = pipeline.image_for(&run, "liver").unwrap();
        assert_eq!(image.key, run.image_key(Organ::Liver));
    }

    #[test]
    fn test_compare_counts_rendered_particles() {
        let pipeline = pipeline();
        let key = ImageKey::new(Organ::Liver, 42.0);

        let result = pipeline.compare(40, key).unwrap();
        assert_eq!(result.automated_count, 42);
        assert_eq!(result.absolute_difference, 2);
        assert_eq!(result.verdict, Verdict::CloseEnough);

        let strict = pipeline.with_policy(ComparisonPolicy::new(1.0)).unwrap();
        assert_eq!(strict.compare(40, key).unwrap().verdict, Verdict::NotCloseEnough);
    }

    #[test]
    fn test_invalid_policy_rejected() {
        for threshold in [f64::NAN, -1.0, f64::INFINITY] {
            let result = pipeline().with_policy(ComparisonPolicy::new(threshold));
            assert!(matches!(
                result,
                Err(TwinError::InvalidConfigValueError { .. })
            ));
        }
    }

    #[test]
    fn test_alternative_detector_is_substitutable() {
        let config = TwinConfig::default();
        let engine = Arc::new(InferenceEngine::new(
            DetectorWeights::pixel_classifier().build(config.detection.confidence_threshold),
        ));
        let pipeline = TwinPipeline::with_engine(&config, engine).unwrap();
        assert_eq!(pipeline.engine().detector_name(), "pixel_classifier");

        let image = pipeline.synthesize(ImageKey::new(Organ::Lung, 120.0)).unwrap();
        assert_eq!(pipeline.count(&image).unwrap(), 120);
    }
}
