//! Composition of the filters into a complete WOFL for one acquisition.

use serde::{Deserialize, Serialize};

use crate::core::classifier::{ClassifierConfig, WaterClassifier};
use crate::core::combine::{combine, WoflStatistics};
use crate::core::dsm::trim_halo;
use crate::core::eo_filter::{EoFilter, NoDataRule};
use crate::core::quality::{QualityBands, QualityFilter};
use crate::core::sea_filter::SeaFilter;
use crate::core::solar::SolarGeometry;
use crate::core::terrain::{TerrainFilter, TerrainParams};
use crate::flags::DEFAULT_DSM_NO_DATA;
use crate::types::{ensure_shape, BandStack, Dsm, Measurement, Reflectance, Wofl, WofsError, WofsResult};

/// USGS Collection 2 surface reflectance scale factor
pub const USGS_C2_SCALE: f64 = 0.275;
/// USGS Collection 2 surface reflectance offset, in rescaled units
pub const USGS_C2_OFFSET: f64 = -2000.0;
/// Valid range of rescaled reflectance
pub const USGS_C2_VALID_RANGE: (i16, i16) = (0, 10000);
/// No-data value of rescaled reflectance
pub const USGS_C2_NO_DATA: i16 = -999;

/// Options shared by the pipeline entry points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WoflOptions {
    /// DSM value meaning "no elevation"
    pub dsm_no_data: f32,
    /// Report no terrain flags where the DSM is missing instead of no-data
    pub ignore_dsm_no_data: bool,
    pub no_data_rule: NoDataRule,
    pub classifier: ClassifierConfig,
    pub terrain: TerrainParams,
}

impl Default for WoflOptions {
    fn default() -> Self {
        Self {
            dsm_no_data: DEFAULT_DSM_NO_DATA,          // -1000 m
            ignore_dsm_no_data: false,                // missing DSM is no-data
            no_data_rule: NoDataRule::AnyBandMissing, // any missing band is no-data
            classifier: ClassifierConfig::default(),  // single precision
            terrain: TerrainParams::default(),
        }
    }
}

/// DSM and sun position for the terrain filter.
///
/// The DSM may cover the reflectance grid plus a halo of `halo` pixels on
/// every side, so that shadows cast from outside the tile are seen.
#[derive(Debug, Clone, Copy)]
pub struct TerrainInputs<'a> {
    pub dsm: &'a Dsm,
    pub sun: SolarGeometry,
    pub halo: usize,
}

impl<'a> TerrainInputs<'a> {
    pub fn new(dsm: &'a Dsm, sun: SolarGeometry) -> Self {
        Self { dsm, sun, halo: 0 }
    }

    pub fn with_halo(mut self, halo: usize) -> Self {
        self.halo = halo;
        self
    }
}

/// Classifier plus filter cascade
#[derive(Debug)]
pub struct WoflPipeline {
    classifier: WaterClassifier,
    eo_filter: EoFilter,
    quality: QualityFilter,
    sea: Option<SeaFilter>,
    terrain: TerrainFilter,
}

impl WoflPipeline {
    pub fn new(quality: QualityFilter, options: &WoflOptions) -> WofsResult<Self> {
        Ok(Self {
            classifier: WaterClassifier::new(options.classifier.clone())?,
            eo_filter: EoFilter::new(options.no_data_rule),
            quality,
            sea: None,
            terrain: TerrainFilter::new(options.terrain.clone(), options.dsm_no_data, options.ignore_dsm_no_data),
        })
    }

    /// NBAR reflectance with bit-packed PQ25 and its land/sea bit
    pub fn legacy(options: &WoflOptions) -> WofsResult<Self> {
        Ok(Self::new(QualityFilter::pq25(), options)?.with_sea_filter(SeaFilter::pq25_land()))
    }

    /// ARD reflectance with the embedded Fmask band
    pub fn ard(options: &WoflOptions) -> WofsResult<Self> {
        Self::new(QualityFilter::fmask(), options)
    }

    /// USGS Collection 2 reflectance with QA_PIXEL
    pub fn usgs_c2(options: &WoflOptions) -> WofsResult<Self> {
        Self::new(QualityFilter::usgs_c2(), options)
    }

    pub fn with_sea_filter(mut self, sea: SeaFilter) -> Self {
        self.sea = Some(sea);
        self
    }

    pub fn quality_filter(&self) -> &QualityFilter {
        &self.quality
    }

    /// WOFL for one acquisition
    pub fn run<T: Reflectance>(
        &self,
        reflectance: &BandStack<T>,
        quality: &QualityBands<'_>,
        terrain: Option<TerrainInputs<'_>>,
    ) -> WofsResult<Wofl> {
        let shape = reflectance.shape();
        log::info!("Starting WOFL generation for {:?} tile", shape);
        ensure_shape("quality", shape, quality.shape())?;

        log::debug!("Step 1: Classifying water");
        let water = self.classifier.classify(reflectance)?;

        log::debug!("Step 2: EO filter");
        let eo = self.eo_filter.apply(reflectance)?;

        log::debug!("Step 3: Quality filter");
        let cloud = self.quality.apply(quality)?;

        let mut masks = vec![water, eo, cloud];

        if let Some(sea) = &self.sea {
            log::debug!("Step 4: Sea filter");
            masks.push(sea.apply(quality));
        }

        match terrain {
            Some(inputs) => {
                log::debug!("Step 5: Terrain filter");
                masks.push(self.terrain_mask(reflectance, inputs)?);
            }
            None => log::warn!("No DSM supplied; terrain shadow and slope flags will not be calculated"),
        }

        let refs: Vec<&Wofl> = masks.iter().collect();
        let wofl = combine(&refs)?;

        let stats = WoflStatistics::from_wofl(&wofl);
        log::debug!(
            "WOFL: {:.1}% valid, {} clear, {} clear wet, {} cloud, {} cloud shadow",
            stats.valid_percentage,
            stats.clear_pixels,
            stats.clear_wet_pixels,
            stats.cloud_pixels,
            stats.cloud_shadow_pixels
        );
        log::info!("✅ WOFL generation completed");
        Ok(wofl)
    }

    fn terrain_mask<T: Reflectance>(&self, reflectance: &BandStack<T>, inputs: TerrainInputs<'_>) -> WofsResult<Wofl> {
        let expected = reflectance.geobox().buffered(inputs.halo);
        if !inputs.dsm.geobox.is_aligned_with(&expected) {
            return Err(WofsError::DsmNotAligned(format!(
                "DSM grid {:?} in {} does not match {:?} in {} with a {} pixel halo",
                inputs.dsm.geobox.shape(),
                inputs.dsm.geobox.crs,
                expected.shape(),
                expected.crs,
                inputs.halo
            )));
        }

        let mask = self.terrain.apply(inputs.dsm, &inputs.sun)?;
        if inputs.halo == 0 {
            Ok(mask)
        } else {
            trim_halo(&mask, inputs.halo)
        }
    }
}

/// WOFL from legacy NBAR, bit-packed PQ25 and a DSM
pub fn woffles<T: Reflectance>(
    nbar: &BandStack<T>,
    pq: &QualityBands<'_>,
    terrain: TerrainInputs<'_>,
    options: &WoflOptions,
) -> WofsResult<Wofl> {
    WoflPipeline::legacy(options)?.run(nbar, pq, Some(terrain))
}

/// WOFL from ARD (NBART bands and Fmask) with an optional DSM
pub fn woffles_ard<T: Reflectance>(
    ard: &BandStack<T>,
    fmask: &QualityBands<'_>,
    terrain: Option<TerrainInputs<'_>>,
    options: &WoflOptions,
) -> WofsResult<Wofl> {
    WoflPipeline::ard(options)?.run(ard, fmask, terrain)
}

/// WOFL from USGS Collection 2 reflectance (already rescaled) and QA_PIXEL
pub fn woffles_usgs_c2<T: Reflectance>(
    c2: &BandStack<T>,
    qa_pixel: &QualityBands<'_>,
    terrain: Option<TerrainInputs<'_>>,
    options: &WoflOptions,
) -> WofsResult<Wofl> {
    WoflPipeline::usgs_c2(options)?.run(c2, qa_pixel, terrain)
}

/// Rescale raw USGS Collection 2 reflectance onto the 0..=10000 scale the
/// classifier thresholds expect.
///
/// `value * 0.275 - 2000`, truncated toward zero; results outside
/// `0..=10000` and source no-data become -999.
pub fn scale_usgs_collection2(c2: &BandStack<u16>) -> BandStack<i16> {
    let (min, max) = USGS_C2_VALID_RANGE;
    c2.map(|band| {
        let data = band.data.mapv(|v| {
            if band.is_nodata(v) {
                return USGS_C2_NO_DATA;
            }
            let scaled = (v as f64 * USGS_C2_SCALE + USGS_C2_OFFSET) as i16;
            if (min..=max).contains(&scaled) {
                scaled
            } else {
                USGS_C2_NO_DATA
            }
        });
        Measurement::new(data, USGS_C2_NO_DATA)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{CLOUD, NO_DATA, SEA, WATER};
    use crate::types::GeoBox;
    use ndarray::{arr2, Array2};

    const NAMES: [&str; 6] = ["blue", "green", "red", "nir", "swir1", "swir2"];

    fn uniform_stack(shape: (usize, usize), values: [i16; 6]) -> BandStack<i16> {
        let mut stack = BandStack::new(GeoBox::pixel_grid(shape.0, shape.1));
        for (name, v) in NAMES.iter().zip(values) {
            stack.insert(*name, Array2::from_elem(shape, v), -999).unwrap();
        }
        stack
    }

    #[test]
    fn test_legacy_pipeline_without_terrain() {
        let stack = uniform_stack((1, 3), [500, 600, 400, 200, 100, 50]);
        let clear = 0x3FFFu16;
        let pq = arr2(&[[clear, clear & !0x0200, clear & !0x0001]]);
        let pipeline = WoflPipeline::legacy(&WoflOptions::default()).unwrap();
        let wofl = pipeline.run(&stack, &QualityBands::single(&pq), None).unwrap();
        assert_eq!(wofl, arr2(&[[WATER, WATER | SEA, NO_DATA]]));
    }

    #[test]
    fn test_quality_shape_checked() {
        let stack = uniform_stack((2, 2), [500, 600, 400, 200, 100, 50]);
        let fmask = Array2::<u16>::ones((3, 2));
        let result = woffles_ard(&stack, &QualityBands::single(&fmask), None, &WoflOptions::default());
        assert!(matches!(result, Err(WofsError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_misaligned_dsm_rejected() {
        let stack = uniform_stack((4, 4), [500, 600, 400, 200, 100, 50]);
        let fmask = Array2::<u16>::ones((4, 4));
        let dsm = Dsm::new(Array2::zeros((5, 5)), GeoBox::pixel_grid(5, 5)).unwrap();
        let terrain = TerrainInputs::new(&dsm, SolarGeometry::new(45.0, 45.0));
        let result = woffles_ard(&stack, &QualityBands::single(&fmask), Some(terrain), &WoflOptions::default());
        assert!(matches!(result, Err(WofsError::DsmNotAligned(_))));
    }

    #[test]
    fn test_buffered_dsm_is_trimmed() {
        let stack = uniform_stack((4, 4), [500, 600, 400, 200, 100, 50]);
        let fmask = Array2::<u16>::ones((4, 4));
        let buffered = stack.geobox().buffered(2);
        let dsm = Dsm::new(Array2::zeros(buffered.shape()), buffered).unwrap();
        let terrain = TerrainInputs::new(&dsm, SolarGeometry::new(45.0, 45.0)).with_halo(2);
        let wofl = woffles_ard(&stack, &QualityBands::single(&fmask), Some(terrain), &WoflOptions::default()).unwrap();
        assert_eq!(wofl, Array2::from_elem((4, 4), WATER));
    }

    #[test]
    fn test_c2_cloud() {
        let stack = uniform_stack((1, 2), [1200, 1300, 1500, 2500, 3000, 2500]);
        let qa = arr2(&[[0u16, 0x0008]]);
        let wofl = woffles_usgs_c2(&stack, &QualityBands::single(&qa), None, &WoflOptions::default()).unwrap();
        assert_eq!(wofl, arr2(&[[0u8, CLOUD]]));
    }

    #[test]
    fn test_scale_usgs_collection2() {
        let raw = arr2(&[[0u16, 7273, 8000, 43637, 50000, 7272]]);
        let stack = BandStack::new(GeoBox::pixel_grid(1, 6))
            .with_band("nbart_blue", raw, 0)
            .unwrap();
        let scaled = scale_usgs_collection2(&stack);
        let blue = scaled.band("nbart_blue").unwrap();
        assert_eq!(blue.nodata, -999);
        // 7273 -> 0.075, 8000 -> 200, 43637 -> 10000.175, 50000 -> 11750, 7272 -> -0.2
        assert_eq!(blue.data, arr2(&[[-999i16, 0, 200, 10000, -999, 0]]));
    }

    #[test]
    fn test_options_from_json() {
        let options: WoflOptions =
            serde_json::from_str(r#"{"ignore_dsm_no_data": true, "no_data_rule": "all_bands_missing"}"#).unwrap();
        assert!(options.ignore_dsm_no_data);
        assert_eq!(options.no_data_rule, NoDataRule::AllBandsMissing);
        assert_eq!(options.dsm_no_data, -1000.0);
    }
}
