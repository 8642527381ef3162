//! Merging filter masks into one WOFL.

use ndarray::{ArrayBase, DataMut, Ix2, Zip};

use crate::flags::{CLOUD, CLOUD_SHADOW, HIGH_SLOPE, NON_CONTIGUOUS, NO_DATA, SEA, TERRAIN_SHADOW, WATER};
use crate::types::{ensure_shape, Wofl, WofsError, WofsResult};

/// Bitwise OR of all masks, then no-data normalisation
pub fn combine(masks: &[&Wofl]) -> WofsResult<Wofl> {
    let (first, rest) = masks
        .split_first()
        .ok_or_else(|| WofsError::InvalidParameter("combine needs at least one mask".to_string()))?;

    let mut wofl = (*first).clone();
    for (i, mask) in rest.iter().enumerate() {
        ensure_shape(&format!("mask {}", i + 1), wofl.dim(), mask.dim())?;
        Zip::from(&mut wofl).and(*mask).for_each(|w, &m| *w |= m);
    }

    fix_nodata_to_single_value(&mut wofl);
    Ok(wofl)
}

/// Overwrite every pixel carrying the no-data bit with exactly [`NO_DATA`]
pub fn fix_nodata_to_single_value<S>(wofl: &mut ArrayBase<S, Ix2>)
where
    S: DataMut<Elem = u8>,
{
    wofl.mapv_inplace(|v| if v & NO_DATA != 0 { NO_DATA } else { v });
}

/// Merge overlapping WOFLs of the same acquisition date.
///
/// Where the running result is no-data the next tile is taken as is; where
/// both are valid their flags are OR-ed. The result is normalised.
pub fn fuse_wofls(tiles: &[Wofl]) -> WofsResult<Wofl> {
    let (first, rest) = tiles
        .split_first()
        .ok_or_else(|| WofsError::InvalidParameter("fuse_wofls needs at least one tile".to_string()))?;

    let mut fused = first.clone();
    for (i, tile) in rest.iter().enumerate() {
        ensure_shape(&format!("tile {}", i + 1), fused.dim(), tile.dim())?;
        Zip::from(&mut fused).and(tile).for_each(|dest, &src| {
            if *dest & NO_DATA != 0 {
                *dest = src;
            } else if src & NO_DATA == 0 {
                *dest |= src;
            }
        });
    }

    fix_nodata_to_single_value(&mut fused);
    log::debug!("Fused {} WOFL tiles of shape {:?}", tiles.len(), fused.dim());
    Ok(fused)
}

/// Per-flag pixel counts of a WOFL
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WoflStatistics {
    pub total_pixels: usize,
    pub no_data_pixels: usize,
    pub non_contiguous_pixels: usize,
    pub sea_pixels: usize,
    pub terrain_shadow_pixels: usize,
    pub high_slope_pixels: usize,
    pub cloud_shadow_pixels: usize,
    pub cloud_pixels: usize,
    pub wet_pixels: usize,
    /// Pixels equal to 0 or 128
    pub clear_pixels: usize,
    pub clear_wet_pixels: usize,
    pub valid_percentage: f64,
}

impl WoflStatistics {
    pub fn from_wofl(wofl: &Wofl) -> Self {
        let mut stats = WoflStatistics {
            total_pixels: wofl.len(),
            ..Default::default()
        };
        let count = |v: u8, bit: u8| usize::from(v & bit != 0);

        for &v in wofl.iter() {
            if v & NO_DATA != 0 {
                stats.no_data_pixels += 1;
                continue;
            }
            stats.non_contiguous_pixels += count(v, NON_CONTIGUOUS);
            stats.sea_pixels += count(v, SEA);
            stats.terrain_shadow_pixels += count(v, TERRAIN_SHADOW);
            stats.high_slope_pixels += count(v, HIGH_SLOPE);
            stats.cloud_shadow_pixels += count(v, CLOUD_SHADOW);
            stats.cloud_pixels += count(v, CLOUD);
            stats.wet_pixels += count(v, WATER);
            if v & !WATER == 0 {
                stats.clear_pixels += 1;
                stats.clear_wet_pixels += count(v, WATER);
            }
        }

        if stats.total_pixels > 0 {
            let valid = stats.total_pixels - stats.no_data_pixels;
            stats.valid_percentage = 100.0 * valid as f64 / stats.total_pixels as f64;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_combine_or_and_normalise() {
        let eo = arr2(&[[0u8, NO_DATA, 0, 0]]);
        let water = arr2(&[[WATER, WATER, 0, WATER]]);
        let cloud = arr2(&[[0u8, CLOUD, CLOUD, SEA]]);
        let wofl = combine(&[&eo, &water, &cloud]).unwrap();
        assert_eq!(wofl, arr2(&[[WATER, NO_DATA, CLOUD, WATER | SEA]]));
    }

    #[test]
    fn test_combine_shape_mismatch() {
        let a = Wofl::zeros((2, 2));
        let b = Wofl::zeros((2, 3));
        assert!(matches!(combine(&[&a, &b]), Err(WofsError::ShapeMismatch { .. })));
        assert!(combine(&[]).is_err());
    }

    #[test]
    fn test_fix_nodata_in_place() {
        let mut wofl = arr2(&[[1u8, 3, 129, 255], [0, 128, 2, 254]]);
        fix_nodata_to_single_value(&mut wofl);
        assert_eq!(wofl, arr2(&[[1u8, 1, 1, 1], [0, 128, 2, 254]]));

        // Works through views as well
        let mut view_target = arr2(&[[65u8, 64]]);
        fix_nodata_to_single_value(&mut view_target.view_mut());
        assert_eq!(view_target, arr2(&[[1u8, 64]]));
    }

    #[test]
    fn test_fuse_prefers_valid_data() {
        let a = arr2(&[[NO_DATA, WATER, 0, NO_DATA]]);
        let b = arr2(&[[WATER, CLOUD, NO_DATA, NO_DATA | CLOUD]]);
        let fused = fuse_wofls(&[a.clone(), b]).unwrap();
        assert_eq!(fused, arr2(&[[WATER, WATER | CLOUD, 0, NO_DATA]]));
        assert_eq!(fuse_wofls(&[a.clone()]).unwrap(), a);
    }

    #[test]
    fn test_statistics() {
        let wofl = arr2(&[[0u8, WATER, NO_DATA, CLOUD], [WATER | SEA, TERRAIN_SHADOW, 0, CLOUD_SHADOW]]);
        let stats = WoflStatistics::from_wofl(&wofl);
        assert_eq!(stats.total_pixels, 8);
        assert_eq!(stats.no_data_pixels, 1);
        assert_eq!(stats.wet_pixels, 2);
        assert_eq!(stats.clear_pixels, 3);
        assert_eq!(stats.clear_wet_pixels, 1);
        assert_eq!(stats.sea_pixels, 1);
        assert_eq!(stats.cloud_pixels, 1);
        assert!((stats.valid_percentage - 87.5).abs() < 1e-12);
    }
}
