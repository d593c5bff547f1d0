use crate::domain::model::{Organ, TissuePalette};
use crate::utils::error::Result;
use image::RgbImage;

/// Counts particles in an image. Implementations carry fixed weights and
/// must return the same count for the same pixels.
pub trait ParticleCounter: Send + Sync {
    fn name(&self) -> &str;

    fn count(&self, image: &RgbImage) -> Result<usize>;
}

/// Source of base tissue textures for the histology synthesizer.
pub trait TissueAssets: Send + Sync {
    fn palette(&self, organ: Organ) -> Option<&TissuePalette>;
}
