pub mod toml_config;

#[cfg(feature = "cli")]
use crate::utils::error::Result;
#[cfg(feature = "cli")]
use crate::utils::validation::{validate_non_empty_string, validate_path, Validate};
#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "mp-twin")]
#[command(about = "Microplastic exposure digital twin: survey to organ burden to counting exercise")]
pub struct CliConfig {
    /// Survey CSV, one row per participant
    #[arg(long)]
    pub data: String,

    /// TOML file with calibration tables and policies
    #[arg(long)]
    pub config: Option<String>,

    /// Seed for participant selection; entropy-seeded when omitted
    #[arg(long)]
    pub seed: Option<u64>,

    /// Run a specific allow-listed participant instead of drawing one
    #[arg(long)]
    pub participant: Option<i64>,

    #[arg(long, default_value = "Liver")]
    pub organ: String,

    /// Human visual count to compare against the detector
    #[arg(long)]
    pub human_count: Option<u64>,

    /// Detector weights JSON, overrides the config file
    #[arg(long)]
    pub weights: Option<String>,

    /// Close-match threshold, overrides the config file
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Write the synthesized image as PNG
    #[arg(long)]
    pub save_image: Option<String>,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Log CPU and memory per stage")]
    pub monitor: bool,

    #[arg(long, help = "Emit logs as JSON lines")]
    pub log_json: bool,
}

#[cfg(feature = "cli")]
impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validate_path("data", &self.data)?;
        validate_non_empty_string("organ", &self.organ)?;
        if let Some(config) = &self.config {
            validate_path("config", config)?;
        }
        if let Some(weights) = &self.weights {
            validate_path("weights", weights)?;
        }
        if let Some(save_image) = &self.save_image {
            validate_path("save_image", save_image)?;
        }
        Ok(())
    }
}
