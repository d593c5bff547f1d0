pub mod comparison;
pub mod counting;
pub mod engine;
pub mod exposure;
pub mod histology;
pub mod pipeline;
pub mod selector;
pub mod twin;

pub use crate::domain::model::{
    CountResult, ExposureProfile, HistologyImage, ImageKey, Organ, OrganBurdenTable,
    ParticipantRecord,
};
pub use crate::domain::ports::{ParticleCounter, TissueAssets};
pub use crate::utils::error::Result;
