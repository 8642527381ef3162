//! Core WOfS processing modules

pub mod classifier;
pub mod combine;
pub mod dsm;
pub mod eo_filter;
pub mod morphology;
pub mod pipeline;
pub mod quality;
pub mod reproject;
pub mod sea_filter;
pub mod solar;
pub mod summary;
pub mod terrain;

// Re-export main types
pub use classifier::{classify, ClassifierConfig, DecisionTree, Feature, Precision, TreeNode, WaterClassifier, WOFS_TREE};
pub use combine::{combine, fix_nodata_to_single_value, fuse_wofls, WoflStatistics};
pub use dsm::{buffer_geobox, resample_to, shadow_halo_pixels, trim_halo};
pub use eo_filter::{EoFilter, NoDataRule};
pub use morphology::{dilate, disk_offsets};
pub use pipeline::{scale_usgs_collection2, woffles, woffles_ard, woffles_usgs_c2, TerrainInputs, WoflOptions, WoflPipeline};
pub use quality::{
    BitPackedQuality, BitTest, CategoricalQuality, CodeTable, QualityBands, QualityClass, QualityDilation,
    QualityFilter, QualityTranslator, TwoStageQuality,
};
pub use reproject::{transform_point, vector_to_crs, Crs, Ellipsoid};
pub use sea_filter::SeaFilter;
pub use solar::{solar_position, SolarGeometry};
pub use summary::{summarise, summarise_stack, SummaryAccumulator, SummaryConfig, WofsSummary};
pub use terrain::{TerrainFilter, TerrainLayers, TerrainParams};

use ndarray::{Array2, ArrayView2, ArrayViewMut1, Axis, Zip};

/// Allocate a raster and fill it row by row with `fill_row(row_index, row)`.
#[cfg(feature = "parallel")]
pub(crate) fn fill_rows<T, F>(shape: (usize, usize), init: T, fill_row: F) -> Array2<T>
where
    T: Clone + Send + Sync,
    F: Fn(usize, ArrayViewMut1<'_, T>) + Send + Sync,
{
    use rayon::prelude::*;

    let mut out = Array2::from_elem(shape, init);
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(r, row)| fill_row(r, row));
    out
}

#[cfg(not(feature = "parallel"))]
pub(crate) fn fill_rows<T, F>(shape: (usize, usize), init: T, fill_row: F) -> Array2<T>
where
    T: Clone + Send + Sync,
    F: Fn(usize, ArrayViewMut1<'_, T>) + Send + Sync,
{
    let mut out = Array2::from_elem(shape, init);
    out.axis_iter_mut(Axis(0))
        .enumerate()
        .for_each(|(r, row)| fill_row(r, row));
    out
}

/// Per-pixel map of one raster into a new one.
#[cfg(feature = "parallel")]
pub(crate) fn map_pixels<A, B, F>(input: ArrayView2<'_, A>, f: F) -> Array2<B>
where
    A: Sync,
    B: Send,
    F: Fn(&A) -> B + Send + Sync,
{
    Zip::from(input).par_map_collect(f)
}

#[cfg(not(feature = "parallel"))]
pub(crate) fn map_pixels<A, B, F>(input: ArrayView2<'_, A>, f: F) -> Array2<B>
where
    A: Sync,
    B: Send,
    F: Fn(&A) -> B + Send + Sync,
{
    Zip::from(input).map_collect(f)
}
