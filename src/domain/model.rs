use crate::utils::error::{Result, TwinError};
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

/// Pathway by which particles enter the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Oral,
    Inhalation,
    Dermal,
}

impl Route {
    pub const ALL: [Route; 3] = [Route::Oral, Route::Inhalation, Route::Dermal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Oral => "oral",
            Route::Inhalation => "inhalation",
            Route::Dermal => "dermal",
        }
    }
}

impl FromStr for Route {
    type Err = TwinError;

    fn from_str(s: &str) -> Result<Self> {
        Route::ALL
            .into_iter()
            .find(|route| route.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TwinError::InvalidConfigValueError {
                field: "route".to_string(),
                value: s.to_string(),
                reason: "Expected one of oral, inhalation, dermal".to_string(),
            })
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Particle size bands, smallest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    /// below 1 µm
    Nano,
    /// 1 to 10 µm
    Micro,
    /// 10 to 100 µm
    Small,
    /// 100 to 1000 µm
    Large,
}

impl SizeClass {
    pub const ALL: [SizeClass; 4] = [
        SizeClass::Nano,
        SizeClass::Micro,
        SizeClass::Small,
        SizeClass::Large,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeClass::Nano => "nano",
            SizeClass::Micro => "micro",
            SizeClass::Small => "small",
            SizeClass::Large => "large",
        }
    }

    pub fn size_range(&self) -> &'static str {
        match self {
            SizeClass::Nano => "<1um",
            SizeClass::Micro => "1-10um",
            SizeClass::Small => "10-100um",
            SizeClass::Large => "100-1000um",
        }
    }
}

impl FromStr for SizeClass {
    type Err = TwinError;

    fn from_str(s: &str) -> Result<Self> {
        SizeClass::ALL
            .into_iter()
            .find(|class| class.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TwinError::InvalidConfigValueError {
                field: "size_class".to_string(),
                value: s.to_string(),
                reason: "Expected one of nano, micro, small, large".to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Organ {
    Liver,
    Kidney,
    Spleen,
    Lung,
    Gut,
    Brain,
}

impl Organ {
    /// Fixed row order of every burden table.
    pub const ALL: [Organ; 6] = [
        Organ::Liver,
        Organ::Kidney,
        Organ::Spleen,
        Organ::Lung,
        Organ::Gut,
        Organ::Brain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Organ::Liver => "Liver",
            Organ::Kidney => "Kidney",
            Organ::Spleen => "Spleen",
            Organ::Lung => "Lung",
            Organ::Gut => "Gut",
            Organ::Brain => "Brain",
        }
    }
}

impl fmt::Display for Organ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Organ {
    type Err = TwinError;

    fn from_str(s: &str) -> Result<Self> {
        Organ::ALL
            .into_iter()
            .find(|organ| organ.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TwinError::UnknownOrganError {
                name: s.to_string(),
            })
    }
}

/// One survey row drawn from the dataset. Read-only after selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantRecord {
    id: i64,
    attributes: BTreeMap<String, String>,
}

impl ParticipantRecord {
    pub fn new(id: i64, attributes: BTreeMap<String, String>) -> Self {
        Self { id, attributes }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Trimmed attribute value; blank cells count as absent.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }
}

/// Particle counts per size class for one route.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SizeDistribution(BTreeMap<SizeClass, f64>);

impl SizeDistribution {
    pub fn new(counts: BTreeMap<SizeClass, f64>) -> Self {
        Self(counts)
    }

    pub fn get(&self, class: SizeClass) -> f64 {
        self.0.get(&class).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SizeClass, f64)> + '_ {
        self.0.iter().map(|(class, count)| (*class, *count))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureProfile {
    pub participant_id: i64,
    pub oral_total: SizeDistribution,
    pub inhalation_total: SizeDistribution,
    pub dermal_total: SizeDistribution,
}

impl ExposureProfile {
    pub fn route(&self, route: Route) -> &SizeDistribution {
        match route {
            Route::Oral => &self.oral_total,
            Route::Inhalation => &self.inhalation_total,
            Route::Dermal => &self.dermal_total,
        }
    }

    pub fn route_total(&self, route: Route) -> f64 {
        self.route(route).total()
    }

    /// Particles across all routes and size classes.
    pub fn grand_total(&self) -> f64 {
        Route::ALL.iter().map(|route| self.route_total(*route)).sum()
    }

    /// Whole-particle totals per route, as shown in the dashboard metrics.
    pub fn summary(&self) -> BTreeMap<Route, u64> {
        Route::ALL
            .iter()
            .map(|route| (*route, self.route_total(*route).round() as u64))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganBurden {
    #[serde(rename = "Organ")]
    pub organ: Organ,
    #[serde(rename = "Microplastic_Count")]
    pub microplastic_count: f64,
}

/// Predicted burden per organ, in `Organ::ALL` order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrganBurdenTable {
    participant_id: i64,
    rows: Vec<OrganBurden>,
}

impl OrganBurdenTable {
    pub(crate) fn new(participant_id: i64, rows: Vec<OrganBurden>) -> Self {
        Self {
            participant_id,
            rows,
        }
    }

    pub fn participant_id(&self) -> i64 {
        self.participant_id
    }

    pub fn rows(&self) -> &[OrganBurden] {
        &self.rows
    }

    pub fn burden_of(&self, organ: Organ) -> f64 {
        self.rows
            .iter()
            .find(|row| row.organ == organ)
            .map(|row| row.microplastic_count)
            .unwrap_or(0.0)
    }

    /// Lookup by display name, e.g. "liver".
    pub fn burden(&self, organ_name: &str) -> Result<f64> {
        let organ: Organ = organ_name.parse()?;
        Ok(self.burden_of(organ))
    }

    pub fn total(&self) -> f64 {
        self.rows.iter().map(|row| row.microplastic_count).sum()
    }

    /// `Organ,Microplastic_Count` CSV for the display layer.
    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in &self.rows {
            writer.serialize(row)?;
        }
        let bytes = writer.into_inner().map_err(|e| TwinError::IoError(e.into_error()))?;
        csv_text(bytes)
    }
}

fn csv_text(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|e| TwinError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

/// Address of a synthesized image. Nothing outside the synthesizer sees a path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageKey {
    pub organ: Organ,
    pub burden: f64,
}

impl ImageKey {
    pub fn new(organ: Organ, burden: f64) -> Self {
        Self { organ, burden }
    }

    /// Stable seed from the organ name and the exact bits of the burden.
    pub fn seed(&self) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(self.organ.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(format!("{:016x}", self.burden.to_bits()).as_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(bytes)
    }
}

/// RGB colors used to paint one organ's tissue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TissuePalette {
    pub background: [u8; 3],
    pub stroma: [u8; 3],
    pub nuclei: [u8; 3],
    /// Nuclei per 1000 pixels.
    pub nucleus_density: f64,
}

#[derive(Debug, Clone)]
pub struct HistologyImage {
    pub key: ImageKey,
    pub pixels: RgbImage,
    pub rendered_particles: usize,
}

impl HistologyImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn caption(&self) -> String {
        format!("Predicted Burden: {:.1} particles/unit", self.key.burden)
    }

    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.pixels
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }
}

impl PartialEq for HistologyImage {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.rendered_particles == other.rendered_particles
            && self.pixels.dimensions() == other.pixels.dimensions()
            && self.pixels.as_raw() == other.pixels.as_raw()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    CloseEnough,
    NotCloseEnough,
}

impl Verdict {
    pub fn message(&self) -> &'static str {
        match self {
            Verdict::CloseEnough => "Great job! You are as accurate as the AI.",
            Verdict::NotCloseEnough => {
                "The detector found particles that might be too small for the human eye."
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountResult {
    pub human_count: u64,
    pub automated_count: u64,
    pub absolute_difference: u64,
    pub verdict: Verdict,
}
