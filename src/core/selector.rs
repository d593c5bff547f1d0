use crate::domain::model::ParticipantRecord;
use crate::utils::error::{Result, TwinError};
use crate::utils::validation::{validate_unique_names, Validate};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Read;

/// Survey rows as ingested, one map of column -> raw cell per participant.
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyDataset {
    headers: Vec<String>,
    rows: Vec<BTreeMap<String, String>>,
}

impl SurveyDataset {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()
            .map_err(|e| TwinError::InvalidDatasetError {
                reason: format!("could not read header row: {}", e),
            })?
            .iter()
            .map(|h| h.to_string())
            .collect();

        if headers.iter().all(|h| h.is_empty()) {
            return Err(TwinError::InvalidDatasetError {
                reason: "dataset has no header row".to_string(),
            });
        }
        let mut seen = HashSet::new();
        for header in &headers {
            if header.is_empty() {
                return Err(TwinError::InvalidDatasetError {
                    reason: "dataset has an unnamed column".to_string(),
                });
            }
            if !seen.insert(header.as_str()) {
                return Err(TwinError::InvalidDatasetError {
                    reason: format!("duplicate column '{}'", header),
                });
            }
        }

        let mut rows = Vec::new();
        for (line, record) in csv_reader.records().enumerate() {
            let record = record.map_err(|e| TwinError::InvalidDatasetError {
                reason: format!("row {}: {}", line + 1, e),
            })?;
            let row = headers
                .iter()
                .cloned()
                .zip(record.iter().map(|cell| cell.to_string()))
                .collect();
            rows.push(row);
        }

        tracing::info!("Ingested survey dataset: {} rows, {} columns", rows.len(), headers.len());
        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub allowlist: Vec<i64>,
    /// Accepted names for the identifier column, matched case-insensitively.
    pub id_columns: Vec<String>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            allowlist: (1..=20).collect(),
            id_columns: ["Participant_Index", "Participant_ID", "ID"]
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }
}

impl Validate for SelectionConfig {
    fn validate(&self) -> Result<()> {
        if self.allowlist.is_empty() {
            return Err(TwinError::ConfigValidationError {
                field: "selection.allowlist".to_string(),
                message: "allow-list must name at least one participant".to_string(),
            });
        }
        if self.id_columns.is_empty() {
            return Err(TwinError::MissingConfigError {
                field: "selection.id_columns".to_string(),
            });
        }
        validate_unique_names("selection.id_columns", &self.id_columns)?;
        Ok(())
    }
}

fn parse_identifier(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if let Ok(id) = trimmed.parse::<i64>() {
        return Some(id);
    }
    // spreadsheets often export integer columns as "7.0"
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 => {
            Some(value as i64)
        }
        _ => None,
    }
}

/// Draws one allow-listed participant from a survey dataset.
#[derive(Debug, Clone)]
pub struct ParticipantSelector {
    allowlist: BTreeSet<i64>,
    id_columns: Vec<String>,
}

impl ParticipantSelector {
    pub fn new(config: &SelectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            allowlist: config.allowlist.iter().copied().collect(),
            id_columns: config.id_columns.clone(),
        })
    }

    pub fn allowlist(&self) -> &BTreeSet<i64> {
        &self.allowlist
    }

    /// First header matching one of the identifier aliases.
    pub fn identifier_column<'a>(&self, dataset: &'a SurveyDataset) -> Result<&'a str> {
        self.id_columns
            .iter()
            .find_map(|alias| {
                dataset
                    .headers
                    .iter()
                    .find(|header| header.eq_ignore_ascii_case(alias))
            })
            .map(|header| header.as_str())
            .ok_or_else(|| TwinError::InvalidDatasetError {
                reason: format!(
                    "no participant identifier column (expected one of: {})",
                    self.id_columns.join(", ")
                ),
            })
    }

    /// Every row whose identifier is allow-listed, in dataset order.
    pub fn eligible(&self, dataset: &SurveyDataset) -> Result<Vec<ParticipantRecord>> {
        let id_column = self.identifier_column(dataset)?;
        let mut eligible = Vec::new();

        for (line, row) in dataset.rows.iter().enumerate() {
            let raw = row.get(id_column).map(String::as_str).unwrap_or_default();
            let Some(id) = parse_identifier(raw) else {
                tracing::warn!("Skipping row {}: identifier '{}' is not an integer", line + 1, raw);
                continue;
            };
            if !self.allowlist.contains(&id) {
                continue;
            }

            let attributes = row
                .iter()
                .filter(|(column, _)| column.as_str() != id_column)
                .map(|(column, value)| (column.clone(), value.clone()))
                .collect();
            eligible.push(ParticipantRecord::new(id, attributes));
        }

        tracing::debug!("{} of {} rows are eligible", eligible.len(), dataset.len());
        Ok(eligible)
    }

    /// Uniform draw among eligible rows. Pass a seeded generator for
    /// reproducible selection.
    pub fn select<R: Rng + ?Sized>(
        &self,
        dataset: &SurveyDataset,
        rng: &mut R,
    ) -> Result<ParticipantRecord> {
        let eligible = self.eligible(dataset)?;
        let chosen = eligible
            .choose(rng)
            .cloned()
            .ok_or(TwinError::NoEligibleParticipantError {
                checked: dataset.len(),
            })?;

        tracing::info!("Selected participant {}", chosen.id());
        Ok(chosen)
    }

    /// Deterministic lookup for batch callers.
    pub fn select_by_id(&self, dataset: &SurveyDataset, id: i64) -> Result<ParticipantRecord> {
        if !self.allowlist.contains(&id) {
            return Err(TwinError::UnrecognizedParticipantError { id });
        }
        self.eligible(dataset)?
            .into_iter()
            .find(|record| record.id() == id)
            .ok_or(TwinError::NoEligibleParticipantError {
                checked: dataset.len(),
            })
    }
}
