use crate::core::pipeline::TwinPipeline;
use crate::core::selector::SurveyDataset;
use crate::domain::model::{CountResult, HistologyImage, Organ, OrganBurden, Route};
use crate::domain::ports::TissueAssets;
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;

/// What the caller wants out of one end-to-end run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Fixed participant; drawn at random from the allow-list when `None`.
    pub participant: Option<i64>,
    pub organ: String,
    pub human_count: Option<u64>,
}

impl RunRequest {
    pub fn new(organ: impl Into<String>) -> Self {
        Self {
            participant: None,
            organ: organ.into(),
            human_count: None,
        }
    }
}

/// Serializable summary of one run, the values a dashboard would display.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub participant_id: i64,
    pub exposure: BTreeMap<Route, u64>,
    pub burdens: Vec<OrganBurden>,
    pub organ: Organ,
    pub caption: String,
    pub rendered_particles: usize,
    pub detector: String,
    pub comparison: Option<CountResult>,
}

pub struct EngineOutput {
    pub report: RunReport,
    pub image: HistologyImage,
}

/// Drives every stage in order and logs resource use between them.
pub struct TwinEngine<A: TissueAssets> {
    pipeline: TwinPipeline<A>,
    monitor: SystemMonitor,
}

impl<A: TissueAssets> TwinEngine<A> {
    pub fn new(pipeline: TwinPipeline<A>) -> Self {
        Self::new_with_monitoring(pipeline, false)
    }

    pub fn new_with_monitoring(pipeline: TwinPipeline<A>, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub fn pipeline(&self) -> &TwinPipeline<A> {
        &self.pipeline
    }

    pub fn run<R: Rng + ?Sized>(
        &self,
        dataset: &SurveyDataset,
        request: &RunRequest,
        rng: &mut R,
    ) -> Result<EngineOutput> {
        tracing::info!("🚀 Starting MP-Twin run");
        self.monitor.log_stats("Start");

        let participant = match request.participant {
            Some(id) => self.pipeline.select_participant_by_id(dataset, id)?,
            None => self.pipeline.select_participant(dataset, rng)?,
        };
        self.monitor.log_stats("Selection");

        let run = self.pipeline.run(participant)?;
        tracing::info!(
            "Participant {}: exposure {:.0} particles, organ burden {:.1}",
            run.participant().id(),
            run.exposure().grand_total(),
            run.burdens().total()
        );
        self.monitor.log_stats("Twin simulation");

        let image = self.pipeline.image_for(&run, &request.organ)?;
        tracing::info!("{} ({} particles rendered)", image.caption(), image.rendered_particles);
        self.monitor.log_stats("Image synthesis");

        let comparison = match request.human_count {
            Some(human_count) => Some(self.pipeline.compare_image(human_count, &image)?),
            None => None,
        };
        self.monitor.log_stats("Counting");
        self.monitor.log_final_stats();

        let report = RunReport {
            generated_at: Utc::now(),
            participant_id: run.participant().id(),
            exposure: run.exposure().summary(),
            burdens: run.burdens().rows().to_vec(),
            organ: image.key.organ,
            caption: image.caption(),
            rendered_particles: image.rendered_particles,
            detector: self.pipeline.engine().detector_name().to_string(),
            comparison,
        };

        Ok(EngineOutput { report, image })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::toml_config::TwinConfig;
    use crate::core::counting::InferenceEngine;
    use crate::domain::model::Verdict;
    use crate::utils::error::TwinError;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    const SURVEY: &str = "\
Participant_Index,Bottled_Water_Frequency,Packaged_Food_Frequency,Water_Source,Seafood_Frequency,Microwave_Plastic,Indoor_Hours,Synthetic_Textile_Use,Urban_Residence,Occupational_Exposure,Cosmetic_Use,Synthetic_Clothing_Hours,Hand_Washing_Frequency
4,often,daily,Tap,rarely,yes,16,sometimes,yes,no,often,8,6
";

    fn engine() -> TwinEngine<crate::core::histology::AssetCatalog> {
        let config = TwinConfig::default();
        let detector = Arc::new(InferenceEngine::from_config(&config.detection).unwrap());
        TwinEngine::new(TwinPipeline::with_engine(&config, detector).unwrap())
    }

    #[test]
    fn test_engine_report_for_fixed_participant() {
        let dataset = SurveyDataset::from_reader(SURVEY.as_bytes()).unwrap();
        let request = RunRequest {
            participant: Some(4),
            organ: "kidney".to_string(),
            human_count: None,
        };

        let output = engine()
            .run(&dataset, &request, &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(output.report.participant_id, 4);
        assert_eq!(output.report.organ, Organ::Kidney);
        assert_eq!(output.report.burdens.len(), Organ::ALL.len());
        assert_eq!(output.report.rendered_particles, output.image.rendered_particles);
        assert!(output.report.comparison.is_none());

        let json = serde_json::to_value(&output.report).unwrap();
        assert_eq!(json["participant_id"], 4);
        assert_eq!(json["burdens"][0]["Organ"], "Liver");
    }

    #[test]
    fn test_engine_compares_human_count() {
        let dataset = SurveyDataset::from_reader(SURVEY.as_bytes()).unwrap();
        let mut request = RunRequest::new("Liver");
        request.human_count = Some(0);

        let output = engine()
            .run(&dataset, &request, &mut StdRng::seed_from_u64(1))
            .unwrap();
        let comparison = output.report.comparison.unwrap();
        assert_eq!(comparison.automated_count, output.image.rendered_particles as u64);
        assert_eq!(
            comparison.verdict == Verdict::CloseEnough,
            (comparison.absolute_difference as f64) < 5.0
        );
    }

    #[test]
    fn test_engine_surfaces_unknown_organ() {
        let dataset = SurveyDataset::from_reader(SURVEY.as_bytes()).unwrap();
        let result = engine().run(
            &dataset,
            &RunRequest::new("Pancreas"),
            &mut StdRng::seed_from_u64(1),
        );
        assert!(matches!(result, Err(TwinError::UnknownOrganError { .. })));
    }
}
