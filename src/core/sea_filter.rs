//! Land/sea flag (bit 2) from the quality band.

use crate::core::quality::{BitTest, QualityBands};
use crate::flags::SEA;
use crate::types::Wofl;

/// How sea pixels are recognised in the quality band
#[derive(Debug, Clone, PartialEq)]
pub enum SeaFilter {
    /// Bit-packed land flag
    Bits(BitTest),
    /// Categorical codes meaning sea
    Codes(Vec<u16>),
}

impl SeaFilter {
    /// PQ25 bit 9 is "land"; sea where it is clear
    pub fn pq25_land() -> Self {
        SeaFilter::Bits(BitTest::any_clear(0x0200))
    }

    pub fn codes(codes: impl IntoIterator<Item = u16>) -> Self {
        SeaFilter::Codes(codes.into_iter().collect())
    }

    #[inline]
    pub fn is_sea(&self, q: u16) -> bool {
        match self {
            SeaFilter::Bits(test) => test.matches(q),
            SeaFilter::Codes(codes) => codes.contains(&q),
        }
    }

    /// Bit 2 where the quality band marks sea
    pub fn apply(&self, bands: &QualityBands<'_>) -> Wofl {
        let wofl = super::map_pixels(bands.primary, |&q| if self.is_sea(q) { SEA } else { 0 });
        log::debug!(
            "Sea filter flagged {} pixels",
            wofl.iter().filter(|&&v| v != 0).count()
        );
        wofl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_pq25_land_bit() {
        let pq = arr2(&[[0x3FFFu16, 0x3FFF & !0x0200]]);
        let wofl = SeaFilter::pq25_land().apply(&QualityBands::single(&pq));
        assert_eq!(wofl, arr2(&[[0, SEA]]));
    }

    #[test]
    fn test_categorical_codes() {
        let classes = arr2(&[[6u16, 1, 6, 0]]);
        let wofl = SeaFilter::codes([6]).apply(&QualityBands::single(&classes));
        assert_eq!(wofl, arr2(&[[SEA, 0, SEA, 0]]));
    }
}
