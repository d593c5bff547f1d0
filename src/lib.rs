pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use config::toml_config::TwinConfig;
pub use core::{
    comparison::ComparisonPolicy,
    counting::InferenceEngine,
    engine::{RunReport, RunRequest, TwinEngine},
    pipeline::{PipelineRun, TwinPipeline},
    selector::SurveyDataset,
};
pub use utils::error::{Result, TwinError};
