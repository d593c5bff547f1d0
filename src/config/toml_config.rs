use crate::core::comparison::ComparisonPolicy;
use crate::core::counting::DetectionConfig;
use crate::core::exposure::ExposureCalibration;
use crate::core::histology::HistologyCalibration;
use crate::core::selector::SelectionConfig;
use crate::core::twin::CompartmentCalibration;
use crate::utils::error::{Result, TwinError};
use crate::utils::validation::Validate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Every calibration table and policy of the pipeline. Each section is
/// optional in TOML and falls back to the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwinConfig {
    pub selection: SelectionConfig,
    pub exposure: ExposureCalibration,
    pub twin: CompartmentCalibration,
    pub histology: HistologyCalibration,
    pub detection: DetectionConfig,
    pub comparison: ComparisonPolicy,
}

impl TwinConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(TwinError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| TwinError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the environment value; unknown variables are left as is.
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| TwinError::ConfigValidationError {
            field: "env_substitution".to_string(),
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| TwinError::ConfigValidationError {
            field: "toml_serialization".to_string(),
            message: e.to_string(),
        })
    }

    pub fn close_match_threshold(&self) -> f64 {
        self.comparison.close_match_threshold
    }

    pub fn detection_confidence_threshold(&self) -> f64 {
        self.detection.confidence_threshold
    }
}

impl Validate for TwinConfig {
    fn validate(&self) -> Result<()> {
        self.selection.validate()?;
        self.exposure.validate()?;
        self.twin.validate()?;
        self.histology.validate()?;
        self.detection.validate()?;
        self.comparison.validate()
    }
}
