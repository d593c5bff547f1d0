use crate::domain::model::HistologyImage;
use crate::domain::ports::ParticleCounter;
use crate::utils::error::{Result, TwinError};
use crate::utils::validation::{validate_fraction, validate_positive_number, Validate};
use image::RgbImage;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

static SHARED_ENGINE: OnceCell<(DetectionConfig, Arc<InferenceEngine>)> = OnceCell::new();

/// Fixed parameters of a detector, as stored in a weights file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectorWeights {
    /// Luminance threshold followed by connected components.
    Threshold {
        luminance_threshold: u8,
        min_area: usize,
        max_area: usize,
    },
    /// Per-pixel logistic classifier over (R, G, B).
    PixelClassifier {
        weights: [f64; 3],
        bias: f64,
        min_area: usize,
        max_area: usize,
    },
}

impl Default for DetectorWeights {
    fn default() -> Self {
        DetectorWeights::Threshold {
            luminance_threshold: 180,
            min_area: 3,
            max_area: 16,
        }
    }
}

impl DetectorWeights {
    pub fn pixel_classifier() -> Self {
        DetectorWeights::PixelClassifier {
            weights: [0.03, 0.06, 0.01],
            bias: -18.0,
            min_area: 3,
            max_area: 16,
        }
    }

    /// Reads weights from a JSON file. Any failure means the model is unavailable.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source_name = path.as_ref().display().to_string();
        let unavailable = |reason: String| TwinError::ModelUnavailableError {
            source_name: source_name.clone(),
            reason,
        };

        let content = std::fs::read_to_string(&path).map_err(|e| unavailable(e.to_string()))?;
        let weights: DetectorWeights =
            serde_json::from_str(&content).map_err(|e| unavailable(e.to_string()))?;
        weights.check().map_err(|e| unavailable(e.to_string()))?;

        tracing::info!("Loaded detector weights from {}", source_name);
        Ok(weights)
    }

    fn check(&self) -> Result<()> {
        let (min_area, max_area) = match self {
            DetectorWeights::Threshold {
                min_area, max_area, ..
            } => (*min_area, *max_area),
            DetectorWeights::PixelClassifier {
                weights,
                bias,
                min_area,
                max_area,
            } => {
                if !weights.iter().chain(std::iter::once(bias)).all(|w| w.is_finite()) {
                    return Err(TwinError::InvalidConfigValueError {
                        field: "detection.weights".to_string(),
                        value: format!("{:?} / {}", weights, bias),
                        reason: "Classifier weights must be finite".to_string(),
                    });
                }
                (*min_area, *max_area)
            }
        };

        validate_positive_number("detection.min_area", min_area, 1)?;
        validate_positive_number("detection.max_area", max_area, min_area)
    }

    pub fn build(&self, confidence_threshold: f64) -> Arc<dyn ParticleCounter> {
        match self.clone() {
            DetectorWeights::Threshold {
                luminance_threshold,
                min_area,
                max_area,
            } => Arc::new(ThresholdDetector {
                luminance_threshold,
                min_area,
                max_area,
                confidence_threshold,
            }),
            DetectorWeights::PixelClassifier {
                weights,
                bias,
                min_area,
                max_area,
            } => Arc::new(PixelClassifierDetector {
                weights,
                bias,
                min_area,
                max_area,
                confidence_threshold,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// JSON weights file; built-in `weights` are used when absent.
    pub weights_path: Option<String>,
    pub weights: DetectorWeights,
    pub confidence_threshold: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            weights_path: None,
            weights: DetectorWeights::default(),
            confidence_threshold: 0.3,
        }
    }
}

/// Confidence must lie in (0, 1]. At zero every pixel is foreground and the
/// whole image collapses into one oversized component.
fn validate_confidence(value: f64) -> Result<()> {
    validate_fraction("detection.confidence_threshold", value)?;
    if value <= 0.0 {
        return Err(TwinError::InvalidConfigValueError {
            field: "detection.confidence_threshold".to_string(),
            value: value.to_string(),
            reason: "Value must be greater than 0".to_string(),
        });
    }
    Ok(())
}

impl Validate for DetectionConfig {
    fn validate(&self) -> Result<()> {
        validate_confidence(self.confidence_threshold)?;
        if let Some(path) = &self.weights_path {
            crate::utils::validation::validate_path("detection.weights_path", path)?;
        }
        self.weights.check()
    }
}

fn luma(pixel: &[u8]) -> f64 {
    0.299 * pixel[0] as f64 + 0.587 * pixel[1] as f64 + 0.114 * pixel[2] as f64
}

/// 8-connected components of the `true` cells of `mask`, as pixel index lists.
fn components(mask: &[bool], width: usize, height: usize) -> Vec<Vec<usize>> {
    let mut seen = vec![false; mask.len()];
    let mut found = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..mask.len() {
        if !mask[start] || seen[start] {
            continue;
        }
        seen[start] = true;
        queue.push_back(start);
        let mut members = Vec::new();

        while let Some(index) = queue.pop_front() {
            members.push(index);
            let (x, y) = ((index % width) as i64, (index / width) as i64);
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                        continue;
                    }
                    let neighbour = ny as usize * width + nx as usize;
                    if mask[neighbour] && !seen[neighbour] {
                        seen[neighbour] = true;
                        queue.push_back(neighbour);
                    }
                }
            }
        }
        found.push(members);
    }

    found
}

/// Classical detector: bright blobs of plausible size.
#[derive(Debug, Clone)]
pub struct ThresholdDetector {
    luminance_threshold: u8,
    min_area: usize,
    max_area: usize,
    confidence_threshold: f64,
}

impl ThresholdDetector {
    /// How far a blob's mean luminance sits above the threshold, in [0, 1].
    fn confidence(&self, image: &RgbImage, members: &[usize]) -> f64 {
        let raw = image.as_raw();
        let mean = members
            .iter()
            .map(|index| luma(&raw[index * 3..index * 3 + 3]))
            .sum::<f64>()
            / members.len() as f64;
        let headroom = (255.0 - self.luminance_threshold as f64).max(1.0);
        ((mean - self.luminance_threshold as f64) / headroom).clamp(0.0, 1.0)
    }
}

impl ParticleCounter for ThresholdDetector {
    fn name(&self) -> &str {
        "threshold"
    }

    fn count(&self, image: &RgbImage) -> Result<usize> {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let threshold = self.luminance_threshold as f64;
        let mask: Vec<bool> = image.pixels().map(|p| luma(&p.0) >= threshold).collect();

        let detected = components(&mask, width, height)
            .into_iter()
            .filter(|members| (self.min_area..=self.max_area).contains(&members.len()))
            .filter(|members| self.confidence(image, members) >= self.confidence_threshold)
            .count();
        Ok(detected)
    }
}

/// Fixed-weight logistic classifier applied per pixel.
#[derive(Debug, Clone)]
pub struct PixelClassifierDetector {
    weights: [f64; 3],
    bias: f64,
    min_area: usize,
    max_area: usize,
    confidence_threshold: f64,
}

impl PixelClassifierDetector {
    fn probability(&self, pixel: &[u8]) -> f64 {
        let logit = self
            .weights
            .iter()
            .zip(pixel)
            .map(|(w, channel)| w * *channel as f64)
            .sum::<f64>()
            + self.bias;
        1.0 / (1.0 + (-logit).exp())
    }
}

impl ParticleCounter for PixelClassifierDetector {
    fn name(&self) -> &str {
        "pixel_classifier"
    }

    fn count(&self, image: &RgbImage) -> Result<usize> {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let mask: Vec<bool> = image
            .pixels()
            .map(|p| self.probability(&p.0) >= self.confidence_threshold)
            .collect();

        let detected = components(&mask, width, height)
            .into_iter()
            .filter(|members| (self.min_area..=self.max_area).contains(&members.len()))
            .count();
        Ok(detected)
    }
}

/// Runs one detector over images. Build it once and share it; it is
/// read-only after construction.
pub struct InferenceEngine {
    counter: Arc<dyn ParticleCounter>,
}

impl std::fmt::Debug for InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("detector", &self.counter.name())
            .finish()
    }
}

impl InferenceEngine {
    pub fn new(counter: Arc<dyn ParticleCounter>) -> Self {
        Self { counter }
    }

    /// Loads the configured weights (file first, built-in otherwise).
    pub fn from_config(config: &DetectionConfig) -> Result<Self> {
        validate_confidence(config.confidence_threshold)?;

        let weights = match &config.weights_path {
            Some(path) => DetectorWeights::load(path)?,
            None => {
                config.weights.check()?;
                config.weights.clone()
            }
        };

        let counter = weights.build(config.confidence_threshold);
        tracing::info!(
            "Detection engine ready ({} detector, confidence >= {})",
            counter.name(),
            config.confidence_threshold
        );
        Ok(Self::new(counter))
    }

    /// Process-wide engine. The first successful load wins and later calls
    /// return it unchanged; a failed load leaves nothing behind, so the
    /// caller may fix the weights and call again.
    pub fn shared(config: &DetectionConfig) -> Result<Arc<InferenceEngine>> {
        let (loaded, engine) = SHARED_ENGINE.get_or_try_init(|| {
            let engine = Self::from_config(config)?;
            Ok::<_, TwinError>((config.clone(), Arc::new(engine)))
        })?;
        if loaded != config {
            tracing::warn!(
                "Detection engine already loaded with {:?}; ignoring requested {:?}",
                loaded,
                config
            );
        }
        Ok(Arc::clone(engine))
    }

    /// Configuration the shared engine was loaded with, if it has been loaded.
    pub fn shared_config() -> Option<&'static DetectionConfig> {
        SHARED_ENGINE.get().map(|(config, _)| config)
    }

    pub fn detector_name(&self) -> &str {
        self.counter.name()
    }

    pub fn count_pixels(&self, pixels: &RgbImage) -> Result<u64> {
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(TwinError::InvalidImageError {
                reason: "image has no pixels".to_string(),
            });
        }
        Ok(self.counter.count(pixels)? as u64)
    }

    pub fn count(&self, image: &HistologyImage) -> Result<u64> {
        let count = self.count_pixels(&image.pixels)?;
        tracing::info!(
            "{} detector counted {} particles in {} section (rendered {})",
            self.counter.name(),
            count,
            image.key.organ,
            image.rendered_particles
        );
        Ok(count)
    }

    /// Decodes an encoded image (PNG or any enabled format) and counts it.
    pub fn count_encoded(&self, bytes: &[u8]) -> Result<u64> {
        let decoded = image::load_from_memory(bytes).map_err(|e| TwinError::InvalidImageError {
            reason: e.to_string(),
        })?;
        self.count_pixels(&decoded.to_rgb8())
    }
}
