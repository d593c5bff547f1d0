use crate::domain::model::{HistologyImage, ImageKey, Organ, TissuePalette};
use crate::domain::ports::TissueAssets;
use crate::utils::error::{Result, TwinError};
use crate::utils::validation::{validate_non_negative, validate_positive_number, validate_range, Validate};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Brightest channel value a palette may use. Together with the texture
/// noise this keeps tissue well below any particle.
pub const MAX_TISSUE_CHANNEL: u8 = 140;
const TEXTURE_NOISE: i16 = 8;
/// Smallest cell that fits a 3x3 spot with jitter and a one-pixel gap.
pub const MIN_CELL_SIZE: u32 = 5;

const PARTICLE_BASE: [u8; 3] = [230, 245, 180];
const PARTICLE_JITTER: [u8; 3] = [20, 10, 20];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistologyCalibration {
    pub width: u32,
    pub height: u32,
    pub cell_size: u32,
    /// Rendered dots per predicted particle.
    pub density_scale: f64,
    /// organ name -> palette
    pub assets: BTreeMap<String, TissuePalette>,
}

impl Default for HistologyCalibration {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            cell_size: MIN_CELL_SIZE,
            density_scale: 1.0,
            assets: AssetCatalog::builtin()
                .palettes
                .into_iter()
                .map(|(organ, palette)| (organ.as_str().to_string(), palette))
                .collect(),
        }
    }
}

impl Validate for HistologyCalibration {
    fn validate(&self) -> Result<()> {
        validate_positive_number("histology.width", self.width as usize, 1)?;
        validate_positive_number("histology.height", self.height as usize, 1)?;
        validate_range("histology.cell_size", self.cell_size, MIN_CELL_SIZE, 64)?;
        validate_non_negative("histology.density_scale", self.density_scale)?;
        AssetCatalog::from_config(&self.assets).map(|_| ())
    }
}

/// Built-in palettes keyed by organ.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetCatalog {
    palettes: BTreeMap<Organ, TissuePalette>,
}

impl AssetCatalog {
    pub fn builtin() -> Self {
        let palette = |background, stroma, nuclei, nucleus_density| TissuePalette {
            background,
            stroma,
            nuclei,
            nucleus_density,
        };

        let palettes = [
            (Organ::Liver, palette([70, 28, 34], [104, 44, 50], [38, 22, 72], 4.0)),
            (Organ::Kidney, palette([64, 30, 40], [96, 48, 58], [34, 24, 76], 5.0)),
            (Organ::Spleen, palette([58, 20, 44], [88, 36, 64], [30, 18, 84], 7.0)),
            (Organ::Lung, palette([40, 22, 30], [110, 70, 80], [36, 26, 70], 2.5)),
            (Organ::Gut, palette([72, 40, 36], [108, 62, 54], [40, 26, 74], 6.0)),
            (Organ::Brain, palette([60, 50, 58], [84, 72, 82], [34, 30, 66], 1.5)),
        ]
        .into_iter()
        .collect();

        Self { palettes }
    }

    pub fn from_palettes(palettes: BTreeMap<Organ, TissuePalette>) -> Result<Self> {
        for (organ, palette) in &palettes {
            let field = format!("histology.assets.{}", organ);
            for channel in palette
                .background
                .iter()
                .chain(palette.stroma.iter())
                .chain(palette.nuclei.iter())
            {
                validate_range(&field, *channel, 0, MAX_TISSUE_CHANNEL)?;
            }
            validate_range(&format!("{}.nucleus_density", field), palette.nucleus_density, 0.0, 50.0)?;
        }
        Ok(Self { palettes })
    }

    pub fn from_config(assets: &BTreeMap<String, TissuePalette>) -> Result<Self> {
        let mut palettes = BTreeMap::new();
        for (name, palette) in assets {
            let organ: Organ = name.parse().map_err(|_| TwinError::ConfigValidationError {
                field: "histology.assets".to_string(),
                message: format!("unknown organ '{}'", name),
            })?;
            palettes.insert(organ, palette.clone());
        }
        Self::from_palettes(palettes)
    }
}

impl TissueAssets for AssetCatalog {
    fn palette(&self, organ: Organ) -> Option<&TissuePalette> {
        self.palettes.get(&organ)
    }
}

/// Renders a tissue section with a burden-proportional number of bright
/// particles. Everything random is drawn from a generator seeded by the
/// image key, so a key always maps to the same pixels.
#[derive(Debug, Clone)]
pub struct HistologyImageSynthesizer<A: TissueAssets = AssetCatalog> {
    assets: A,
    width: u32,
    height: u32,
    cell_size: u32,
    density_scale: f64,
}

impl HistologyImageSynthesizer<AssetCatalog> {
    pub fn from_calibration(calibration: &HistologyCalibration) -> Result<Self> {
        calibration.validate()?;
        Ok(Self::new(AssetCatalog::from_config(&calibration.assets)?, calibration))
    }
}

impl<A: TissueAssets> HistologyImageSynthesizer<A> {
    pub fn new(assets: A, calibration: &HistologyCalibration) -> Self {
        Self {
            assets,
            width: calibration.width,
            height: calibration.height,
            cell_size: calibration.cell_size.max(MIN_CELL_SIZE),
            density_scale: calibration.density_scale,
        }
    }

    /// Number of particles that fit without touching.
    pub fn capacity(&self) -> usize {
        (self.width / self.cell_size) as usize * (self.height / self.cell_size) as usize
    }

    /// Dots rendered for a burden: `round(burden * density_scale)`, capped.
    pub fn dot_count(&self, burden: f64) -> usize {
        let dots = (burden * self.density_scale).round();
        if dots >= self.capacity() as f64 {
            self.capacity()
        } else {
            dots as usize
        }
    }

    pub fn synthesize(&self, key: ImageKey) -> Result<HistologyImage> {
        if !key.burden.is_finite() || key.burden < 0.0 {
            return Err(TwinError::InvalidBurdenError { value: key.burden });
        }

        let palette = self
            .assets
            .palette(key.organ)
            .ok_or_else(|| TwinError::OrganAssetMissingError {
                organ: key.organ.to_string(),
            })?;

        let mut rng = StdRng::seed_from_u64(key.seed());
        let mut pixels = self.paint_tissue(palette, &mut rng);

        let dots = self.dot_count(key.burden);
        if dots == self.capacity() && (key.burden * self.density_scale).round() > dots as f64 {
            tracing::warn!(
                "Burden {:.1} exceeds canvas capacity, rendering {} particles",
                key.burden,
                dots
            );
        }
        self.place_particles(&mut pixels, dots, &mut rng);

        tracing::debug!(
            "Synthesized {} section for burden {:.2} with {} particles (seed {:#018x})",
            key.organ,
            key.burden,
            dots,
            key.seed()
        );

        Ok(HistologyImage {
            key,
            pixels,
            rendered_particles: dots,
        })
    }

    fn paint_tissue(&self, palette: &TissuePalette, rng: &mut StdRng) -> RgbImage {
        // fibre bands: a tilted sine pattern with seeded orientation
        let angle = rng.gen_range(0.0..std::f64::consts::PI);
        let frequency = rng.gen_range(0.08..0.2);
        let phase = rng.gen_range(0.0..std::f64::consts::TAU);
        let (fx, fy) = (angle.cos() * frequency, angle.sin() * frequency);

        let mut pixels = RgbImage::new(self.width, self.height);
        for (x, y, pixel) in pixels.enumerate_pixels_mut() {
            let band = (fx * x as f64 + fy * y as f64 + phase).sin();
            let base = if band > 0.55 {
                palette.stroma
            } else {
                palette.background
            };
            let noise = rng.gen_range(-TEXTURE_NOISE..=TEXTURE_NOISE);
            *pixel = Rgb(base.map(|channel| shift(channel, noise)));
        }

        let area = self.width as f64 * self.height as f64;
        let nuclei = (palette.nucleus_density * area / 1000.0).round() as usize;
        for _ in 0..nuclei {
            let cx = rng.gen_range(0..self.width) as i64;
            let cy = rng.gen_range(0..self.height) as i64;
            let radius = rng.gen_range(2..=3i64);
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    if dx * dx + dy * dy > radius * radius {
                        continue;
                    }
                    let (x, y) = (cx + dx, cy + dy);
                    if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
                        continue;
                    }
                    pixels.put_pixel(x as u32, y as u32, Rgb(palette.nuclei));
                }
            }
        }

        pixels
    }

    fn place_particles(&self, pixels: &mut RgbImage, dots: usize, rng: &mut StdRng) {
        let columns = self.width / self.cell_size;
        let mut cells: Vec<u32> = (0..self.capacity() as u32).collect();
        cells.shuffle(rng);

        for cell in cells.into_iter().take(dots) {
            let x0 = (cell % columns) * self.cell_size;
            let y0 = (cell / columns) * self.cell_size;
            let cx = x0 + 1 + rng.gen_range(0..=1);
            let cy = y0 + 1 + rng.gen_range(0..=1);

            let color = Rgb([
                PARTICLE_BASE[0] + rng.gen_range(0..=PARTICLE_JITTER[0]),
                PARTICLE_BASE[1] + rng.gen_range(0..=PARTICLE_JITTER[1]),
                PARTICLE_BASE[2] + rng.gen_range(0..=PARTICLE_JITTER[2]),
            ]);

            for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    let x = (cx as i32 + dx) as u32;
                    let y = (cy as i32 + dy) as u32;
                    if dx != 0 && dy != 0 {
                        // soft corners
                        let under = *pixels.get_pixel(x, y);
                        pixels.put_pixel(x, y, blend(color, under));
                    } else {
                        pixels.put_pixel(x, y, color);
                    }
                }
            }
        }
    }
}

fn shift(channel: u8, noise: i16) -> u8 {
    (channel as i16 + noise).clamp(0, 255) as u8
}

fn blend(a: Rgb<u8>, b: Rgb<u8>) -> Rgb<u8> {
    Rgb([
        ((a[0] as u16 + b[0] as u16) / 2) as u8,
        ((a[1] as u16 + b[1] as u16) / 2) as u8,
        ((a[2] as u16 + b[2] as u16) / 2) as u8,
    ])
}
