//! Cloud, cloud-shadow and saturation flags from an upstream quality band.
//!
//! Quality products come in two shapes: bit-packed words (Landsat PQ25, USGS
//! Collection 2 `QA_PIXEL`) and categorical class codes (Fmask). Both are
//! expressed through [`QualityTranslator`], picked when the pipeline is built.

use std::collections::BTreeMap;

use ndarray::{ArrayView2, Zip};
use serde::{Deserialize, Serialize};

use crate::core::morphology::dilate_bits;
use crate::flags::{CLOUD, CLOUD_SHADOW, NON_CONTIGUOUS, NO_DATA};
use crate::types::{ensure_shape, QualityImage, Wofl, WofsError, WofsResult};

/// The quality rasters of one acquisition
#[derive(Debug, Clone, Copy)]
pub struct QualityBands<'a> {
    pub primary: ArrayView2<'a, u16>,
    /// Second product carrying saturation flags (e.g. USGS `QA_RADSAT`)
    pub saturation: Option<ArrayView2<'a, u16>>,
}

impl<'a> QualityBands<'a> {
    pub fn single(primary: &'a QualityImage) -> Self {
        Self {
            primary: primary.view(),
            saturation: None,
        }
    }

    pub fn with_saturation(mut self, saturation: &'a QualityImage) -> Self {
        self.saturation = Some(saturation.view());
        self
    }

    pub fn shape(&self) -> (usize, usize) {
        self.primary.dim()
    }
}

/// Translates upstream quality rasters into WOFL bits 0, 1, 5 and 6
pub trait QualityTranslator: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn translate(&self, bands: &QualityBands<'_>) -> WofsResult<Wofl>;
}

/// A flag test over a bit-packed quality word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitTest {
    pub mask: u16,
    /// When set the mask bits are "good" flags and the test fires unless all of them are set
    pub inverted: bool,
}

impl BitTest {
    /// Fires when any bit of `mask` is set
    pub const fn any_set(mask: u16) -> Self {
        Self {
            mask,
            inverted: false,
        }
    }

    /// Fires when any bit of `mask` is clear
    pub const fn any_clear(mask: u16) -> Self {
        Self {
            mask,
            inverted: true,
        }
    }

    #[inline]
    pub fn matches(&self, value: u16) -> bool {
        if self.inverted {
            value & self.mask != self.mask
        } else {
            value & self.mask != 0
        }
    }
}

#[inline]
fn test_flag(test: &Option<BitTest>, value: u16, flag: u8) -> u8 {
    match test {
        Some(t) if t.matches(value) => flag,
        _ => 0,
    }
}

/// Bit-packed quality word
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitPackedQuality {
    pub name: String,
    pub no_data: Option<BitTest>,
    pub saturation: Option<BitTest>,
    pub contiguity: Option<BitTest>,
    pub cloud: Option<BitTest>,
    pub cloud_shadow: Option<BitTest>,
}

impl BitPackedQuality {
    /// Legacy Landsat PQ25: all tests are over "good" bits
    pub fn pq25() -> Self {
        Self {
            name: "pq25".to_string(),
            no_data: None,
            // Bands 1-5 and 7 unsaturated; thermal (bits 5, 6) ignored
            saturation: Some(BitTest::any_clear(0x009F)),
            contiguity: Some(BitTest::any_clear(0x0100)),
            // ACCA and Fmask cloud free
            cloud: Some(BitTest::any_clear(0x0C00)),
            // ACCA and Fmask cloud shadow free
            cloud_shadow: Some(BitTest::any_clear(0x3000)),
        }
    }

    /// USGS Landsat Collection 2 `QA_PIXEL`
    pub fn usgs_c2() -> Self {
        Self {
            name: "usgs_c2_qa_pixel".to_string(),
            no_data: Some(BitTest::any_set(0x0001)),
            saturation: None,
            contiguity: None,
            // Dilated cloud, cirrus, cloud
            cloud: Some(BitTest::any_set(0x0002 | 0x0004 | 0x0008)),
            cloud_shadow: Some(BitTest::any_set(0x0010)),
        }
    }

    #[inline]
    fn flags(&self, q: u16) -> u8 {
        test_flag(&self.no_data, q, NO_DATA)
            | test_flag(&self.saturation, q, NO_DATA)
            | test_flag(&self.contiguity, q, NON_CONTIGUOUS)
            | test_flag(&self.cloud, q, CLOUD)
            | test_flag(&self.cloud_shadow, q, CLOUD_SHADOW)
    }
}

impl QualityTranslator for BitPackedQuality {
    fn name(&self) -> &str {
        &self.name
    }

    fn translate(&self, bands: &QualityBands<'_>) -> WofsResult<Wofl> {
        Ok(super::map_pixels(bands.primary, |&q| self.flags(q)))
    }
}

/// Meaning of one categorical quality code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityClass {
    NoData,
    Clear,
    Cloud,
    CloudShadow,
    Snow,
    Water,
    Saturated,
}

impl QualityClass {
    /// WOFL bits raised by this class
    pub fn flags(self) -> u8 {
        match self {
            QualityClass::NoData | QualityClass::Saturated => NO_DATA,
            QualityClass::Cloud => CLOUD,
            QualityClass::CloudShadow => CLOUD_SHADOW,
            QualityClass::Clear | QualityClass::Snow | QualityClass::Water => 0,
        }
    }
}

/// Code → class table with a dense flag lookup
#[derive(Debug, Clone, PartialEq)]
pub struct CodeTable {
    classes: BTreeMap<u16, QualityClass>,
    lut: Vec<u8>,
}

impl CodeTable {
    /// Build a table; it must name a no-data, a cloud and a cloud-shadow code
    pub fn new(entries: impl IntoIterator<Item = (u16, QualityClass)>) -> WofsResult<Self> {
        let table = Self::from_entries(entries);
        for required in [QualityClass::NoData, QualityClass::Cloud, QualityClass::CloudShadow] {
            if !table.classes.values().any(|&c| c == required) {
                return Err(WofsError::UnsupportedQualityEncoding(format!(
                    "code table has no code for {:?}",
                    required
                )));
            }
        }
        Ok(table)
    }

    fn from_entries(entries: impl IntoIterator<Item = (u16, QualityClass)>) -> Self {
        let classes: BTreeMap<u16, QualityClass> = entries.into_iter().collect();
        let size = classes.keys().next_back().map_or(0, |&max| max as usize + 1);
        let mut lut = vec![0u8; size];
        for (&code, class) in &classes {
            lut[code as usize] = class.flags();
        }
        Self { classes, lut }
    }

    /// Fmask: 0 no data, 1 clear, 2 cloud, 3 cloud shadow, 4 snow, 5 water
    pub fn fmask() -> Self {
        Self::from_entries([
            (0, QualityClass::NoData),
            (1, QualityClass::Clear),
            (2, QualityClass::Cloud),
            (3, QualityClass::CloudShadow),
            (4, QualityClass::Snow),
            (5, QualityClass::Water),
        ])
    }

    pub fn class(&self, code: u16) -> Option<QualityClass> {
        self.classes.get(&code).copied()
    }

    /// Codes assigned to `class`
    pub fn codes_for(&self, class: QualityClass) -> Vec<u16> {
        self.classes
            .iter()
            .filter(|(_, &c)| c == class)
            .map(|(&code, _)| code)
            .collect()
    }

    /// Unknown codes raise no flags
    #[inline]
    pub fn flags(&self, code: u16) -> u8 {
        self.lut.get(code as usize).copied().unwrap_or(0)
    }
}

/// Categorical class mask
#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalQuality {
    pub name: String,
    pub table: CodeTable,
}

impl CategoricalQuality {
    pub fn new(name: impl Into<String>, table: CodeTable) -> Self {
        Self {
            name: name.into(),
            table,
        }
    }

    pub fn fmask() -> Self {
        Self::new("fmask", CodeTable::fmask())
    }
}

impl QualityTranslator for CategoricalQuality {
    fn name(&self) -> &str {
        &self.name
    }

    fn translate(&self, bands: &QualityBands<'_>) -> WofsResult<Wofl> {
        Ok(super::map_pixels(bands.primary, |&q| self.table.flags(q)))
    }
}

/// Categorical mask for cloud and shadow plus a bit-packed saturation product
#[derive(Debug, Clone, PartialEq)]
pub struct TwoStageQuality {
    pub name: String,
    pub mask: CodeTable,
    pub saturation: BitTest,
}

impl TwoStageQuality {
    pub fn new(name: impl Into<String>, mask: CodeTable, saturation: BitTest) -> Self {
        Self {
            name: name.into(),
            mask,
            saturation,
        }
    }

    /// Fmask classes with USGS `QA_RADSAT` (bands 1-7 saturated, terrain occlusion)
    pub fn fmask_radsat() -> Self {
        Self::new("fmask_radsat", CodeTable::fmask(), BitTest::any_set(0x027F))
    }
}

impl QualityTranslator for TwoStageQuality {
    fn name(&self) -> &str {
        &self.name
    }

    fn translate(&self, bands: &QualityBands<'_>) -> WofsResult<Wofl> {
        let saturation = bands
            .saturation
            .ok_or_else(|| WofsError::MissingBand("saturation".to_string()))?;
        ensure_shape("saturation", bands.shape(), saturation.dim())?;

        Ok(Zip::from(bands.primary)
            .and(saturation)
            .map_collect(|&q, &s| {
                let sat = if self.saturation.matches(s) { NO_DATA } else { 0 };
                self.mask.flags(q) | sat
            }))
    }
}

/// Disk radius (pixels) used to buffer cloud and cloud shadow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityDilation {
    pub cloud: usize,
    pub cloud_shadow: usize,
}

/// Quality filter: translation followed by cloud/shadow buffering
#[derive(Debug)]
pub struct QualityFilter {
    translator: Box<dyn QualityTranslator>,
    dilation: QualityDilation,
}

impl QualityFilter {
    pub fn new(translator: Box<dyn QualityTranslator>, dilation: QualityDilation) -> Self {
        Self {
            translator,
            dilation,
        }
    }

    pub fn pq25() -> Self {
        Self::new(
            Box::new(BitPackedQuality::pq25()),
            QualityDilation {
                cloud: 3,
                cloud_shadow: 3,
            },
        )
    }

    pub fn usgs_c2() -> Self {
        Self::new(
            Box::new(BitPackedQuality::usgs_c2()),
            QualityDilation {
                cloud: 0,
                cloud_shadow: 3,
            },
        )
    }

    pub fn fmask() -> Self {
        Self::new(Box::new(CategoricalQuality::fmask()), QualityDilation::default())
    }

    pub fn translator(&self) -> &dyn QualityTranslator {
        self.translator.as_ref()
    }

    pub fn dilation(&self) -> QualityDilation {
        self.dilation
    }

    /// Bits 0, 1, 5 and 6 for the acquisition
    pub fn apply(&self, bands: &QualityBands<'_>) -> WofsResult<Wofl> {
        log::debug!(
            "Translating {:?} quality band with {} (dilation cloud={}, shadow={})",
            bands.shape(),
            self.translator.name(),
            self.dilation.cloud,
            self.dilation.cloud_shadow
        );
        let mut wofl = self.translator.translate(bands)?;

        for (bit, radius) in [
            (CLOUD, self.dilation.cloud),
            (CLOUD_SHADOW, self.dilation.cloud_shadow),
        ] {
            if radius == 0 {
                continue;
            }
            let buffered = dilate_bits(&wofl, bit, radius);
            Zip::from(&mut wofl).and(&buffered).for_each(|w, &b| {
                if b {
                    *w |= bit;
                }
            });
        }
        Ok(wofl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array2};

    #[test]
    fn test_bit_test() {
        assert!(BitTest::any_set(0x0C).matches(0x04));
        assert!(!BitTest::any_set(0x0C).matches(0x03));
        assert!(BitTest::any_clear(0x0C).matches(0x04));
        assert!(!BitTest::any_clear(0x0C).matches(0x0F));
    }

    #[test]
    fn test_pq25_translation() {
        let clear = 0x3FFFu16;
        let pq = arr2(&[[
            clear,
            clear & !0x0001,
            clear & !0x0020,
            clear & !0x0100,
            clear & !0x0400,
            clear & !0x2000,
        ]]);
        let wofl = BitPackedQuality::pq25()
            .translate(&QualityBands::single(&pq))
            .unwrap();
        assert_eq!(
            wofl,
            arr2(&[[0, NO_DATA, 0, NON_CONTIGUOUS, CLOUD, CLOUD_SHADOW]])
        );
    }

    #[test]
    fn test_usgs_c2_translation() {
        let qa = arr2(&[[0x5440u16, 0x0001, 0x0008, 0x0004, 0x0010, 0x0018]]);
        let wofl = BitPackedQuality::usgs_c2()
            .translate(&QualityBands::single(&qa))
            .unwrap();
        assert_eq!(
            wofl,
            arr2(&[[0, NO_DATA, CLOUD, CLOUD, CLOUD_SHADOW, CLOUD | CLOUD_SHADOW]])
        );
    }

    #[test]
    fn test_fmask_translation_ignores_unknown_codes() {
        let fmask = arr2(&[[0u16, 1, 2, 3, 4, 5, 255]]);
        let wofl = CategoricalQuality::fmask()
            .translate(&QualityBands::single(&fmask))
            .unwrap();
        assert_eq!(wofl, arr2(&[[NO_DATA, 0, CLOUD, CLOUD_SHADOW, 0, 0, 0]]));
    }

    #[test]
    fn test_code_table_requires_core_classes() {
        let result = CodeTable::new([(0, QualityClass::NoData), (1, QualityClass::Clear)]);
        assert!(matches!(
            result,
            Err(WofsError::UnsupportedQualityEncoding(_))
        ));
        let table = CodeTable::new([
            (0, QualityClass::NoData),
            (8, QualityClass::Cloud),
            (9, QualityClass::CloudShadow),
        ])
        .unwrap();
        assert_eq!(table.flags(8), CLOUD);
        assert_eq!(table.codes_for(QualityClass::CloudShadow), vec![9]);
    }

    #[test]
    fn test_two_stage_requires_saturation_band() {
        let fmask = Array2::<u16>::ones((2, 2));
        let translator = TwoStageQuality::fmask_radsat();
        match translator.translate(&QualityBands::single(&fmask)) {
            Err(WofsError::MissingBand(name)) => assert_eq!(name, "saturation"),
            other => panic!("expected missing saturation band, got {:?}", other),
        }

        let radsat = arr2(&[[0u16, 0x0004], [0x0800, 0x0200]]);
        let wofl = translator
            .translate(&QualityBands::single(&fmask).with_saturation(&radsat))
            .unwrap();
        assert_eq!(wofl, arr2(&[[0, NO_DATA], [0, NO_DATA]]));
    }

    #[test]
    fn test_quality_filter_dilates_cloud() {
        let mut fmask = Array2::<u16>::ones((9, 9));
        fmask[[4, 4]] = 2;
        fmask[[0, 0]] = 3;
        let filter = QualityFilter::new(
            Box::new(CategoricalQuality::fmask()),
            QualityDilation {
                cloud: 2,
                cloud_shadow: 0,
            },
        );
        let wofl = filter.apply(&QualityBands::single(&fmask)).unwrap();
        // Radius 2 buffer: x² + y² <= 2.5²
        assert_eq!(wofl.iter().filter(|&&v| v & CLOUD != 0).count(), 21);
        assert_eq!(wofl.iter().filter(|&&v| v & CLOUD_SHADOW != 0).count(), 1);
        assert_eq!(wofl[[4, 6]], CLOUD);
        assert_eq!(wofl[[3, 6]], CLOUD);
        assert_eq!(wofl[[2, 6]], 0);
    }
}
