//! wofs: Water Observations from Space
//!
//! Per-pixel water classification of Landsat/Sentinel-2 surface reflectance
//! into bit-packed Water Observation Feature Layers (WOFLs), the filters that
//! flag unreliable observations (no-data, cloud, terrain shadow, slope, sea),
//! and the time-series summary of clear and wet observations.

pub mod core;
pub mod flags;
pub mod types;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    BandStack, Dsm, DsmImage, GeoBox, GeoTransform, Measurement, QualityImage, Reflectance, Resampling, SpectralBand,
    Wofl, WofsError, WofsResult,
};

pub use flags::WoflFlags;

pub use crate::core::{
    classify, combine, fix_nodata_to_single_value, fuse_wofls, summarise, woffles, woffles_ard, woffles_usgs_c2,
    ClassifierConfig, QualityBands, QualityFilter, SolarGeometry, SummaryAccumulator, SummaryConfig, TerrainInputs,
    WaterClassifier, WoflOptions, WoflPipeline, WofsSummary,
};
