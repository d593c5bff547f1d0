use thiserror::Error;

#[derive(Error, Debug)]
pub enum TwinError {
    #[error("Invalid dataset: {reason}")]
    InvalidDatasetError { reason: String },

    #[error("No eligible participant among {checked} rows")]
    NoEligibleParticipantError { checked: usize },

    #[error("Participant {id} is not in the allow-list")]
    UnrecognizedParticipantError { id: i64 },

    #[error("Participant {participant} is missing survey attribute '{attribute}'")]
    MissingAttributeError { participant: i64, attribute: String },

    #[error("Unknown organ: {name}")]
    UnknownOrganError { name: String },

    #[error("Invalid burden value: {value}")]
    InvalidBurdenError { value: f64 },

    #[error("No tissue texture available for organ {organ}")]
    OrganAssetMissingError { organ: String },

    #[error("Detection model unavailable ({source_name}): {reason}")]
    ModelUnavailableError { source_name: String, reason: String },

    #[error("Invalid image: {reason}")]
    InvalidImageError { reason: String },

    #[error("Model invariant violated: {message}")]
    InvariantViolation { message: String },

    #[error("Configuration error in {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Image encoding error: {0}")]
    ImageError(#[from] image::ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad survey data, unknown organ, undecodable image.
    Input,
    /// Missing model weights or tissue assets; retry after remediation.
    Resource,
    /// A calibration table produced an impossible result.
    Invariant,
    Config,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl TwinError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            TwinError::InvalidDatasetError { .. }
            | TwinError::NoEligibleParticipantError { .. }
            | TwinError::UnrecognizedParticipantError { .. }
            | TwinError::MissingAttributeError { .. }
            | TwinError::UnknownOrganError { .. }
            | TwinError::InvalidBurdenError { .. }
            | TwinError::InvalidImageError { .. } => ErrorCategory::Input,
            TwinError::OrganAssetMissingError { .. } | TwinError::ModelUnavailableError { .. } => {
                ErrorCategory::Resource
            }
            TwinError::InvariantViolation { .. } => ErrorCategory::Invariant,
            TwinError::ConfigValidationError { .. }
            | TwinError::InvalidConfigValueError { .. }
            | TwinError::MissingConfigError { .. } => ErrorCategory::Config,
            TwinError::CsvError(_)
            | TwinError::IoError(_)
            | TwinError::SerializationError(_)
            | TwinError::ImageError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            TwinError::UnknownOrganError { .. }
            | TwinError::InvalidBurdenError { .. }
            | TwinError::InvalidImageError { .. }
            | TwinError::CsvError(_)
            | TwinError::SerializationError(_) => ErrorSeverity::Medium,
            TwinError::ModelUnavailableError { .. } | TwinError::InvariantViolation { .. } => {
                ErrorSeverity::Critical
            }
            _ => ErrorSeverity::High,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            TwinError::InvalidDatasetError { .. } => {
                "Check that the survey CSV has a header row and a participant identifier column (e.g. Participant_Index)".to_string()
            }
            TwinError::NoEligibleParticipantError { .. } => {
                "Upload a dataset containing at least one allow-listed participant, or extend selection.allowlist".to_string()
            }
            TwinError::UnrecognizedParticipantError { id } => {
                format!("Add participant {} to selection.allowlist or pick another participant", id)
            }
            TwinError::MissingAttributeError { attribute, .. } => {
                format!("Add a '{}' column to the survey data or remove it from the exposure terms", attribute)
            }
            TwinError::UnknownOrganError { .. } => {
                "Use one of: Liver, Kidney, Spleen, Lung, Gut, Brain".to_string()
            }
            TwinError::InvalidBurdenError { .. } => {
                "Request an image for a finite, non-negative burden".to_string()
            }
            TwinError::OrganAssetMissingError { organ } => {
                format!("Register a tissue palette for {} under [histology.assets]", organ)
            }
            TwinError::ModelUnavailableError { .. } => {
                "Check the detector weights file path and JSON contents, then retry".to_string()
            }
            TwinError::InvalidImageError { .. } => {
                "Provide a PNG image produced by the histology synthesizer".to_string()
            }
            TwinError::InvariantViolation { .. } => {
                "Review the partition matrix, uptake and retention tables; this indicates a calibration bug".to_string()
            }
            TwinError::ConfigValidationError { .. }
            | TwinError::InvalidConfigValueError { .. }
            | TwinError::MissingConfigError { .. } => {
                "Fix the configuration file and run again".to_string()
            }
            TwinError::CsvError(_) => "Check that the survey file is valid CSV".to_string(),
            TwinError::IoError(_) => "Check file paths and permissions".to_string(),
            TwinError::SerializationError(_) => "Check JSON formatting".to_string(),
            TwinError::ImageError(_) => "Check the output location for the image".to_string(),
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Input => format!("The input could not be used: {}", self),
            ErrorCategory::Resource => format!("A required resource is missing: {}", self),
            ErrorCategory::Invariant => format!("The simulation produced an invalid result: {}", self),
            ErrorCategory::Config => format!("Configuration problem: {}", self),
            ErrorCategory::System => format!("System error: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, TwinError>;
