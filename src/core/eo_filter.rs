//! No-data and contiguity flags from the reflectance bands themselves.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::flags::{NON_CONTIGUOUS, NO_DATA};
use crate::types::{BandStack, Reflectance, Wofl, WofsError, WofsResult};

/// How missing band values map onto bits 0 and 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoDataRule {
    /// Any band missing sets no-data; a partial set of valid bands also sets non-contiguous
    #[default]
    AnyBandMissing,
    /// No-data only when every band is missing; any missing band sets non-contiguous
    AllBandsMissing,
}

/// EO filter over every band of a [`BandStack`]
#[derive(Debug, Clone, Default)]
pub struct EoFilter {
    pub rule: NoDataRule,
}

impl EoFilter {
    pub fn new(rule: NoDataRule) -> Self {
        Self { rule }
    }

    /// Bits 0 and 1 for every pixel
    pub fn apply<T: Reflectance>(&self, stack: &BandStack<T>) -> WofsResult<Wofl> {
        if stack.is_empty() {
            return Err(WofsError::MissingBand(
                "EO filter needs at least one band".to_string(),
            ));
        }
        log::debug!(
            "Computing no-data/contiguity flags over {} bands ({:?})",
            stack.len(),
            self.rule
        );

        let names: Vec<&str> = stack.names().collect();
        let bands = names
            .iter()
            .map(|name| stack.band(name))
            .collect::<WofsResult<Vec<_>>>()?;
        let band_count = bands.len();
        let rule = self.rule;

        Ok(super::fill_rows(stack.shape(), 0u8, |r, mut row| {
            let band_rows: Vec<ArrayView1<'_, T>> = bands.iter().map(|b| b.data.row(r)).collect();
            for c in 0..row.len() {
                let missing = band_rows
                    .iter()
                    .zip(bands.iter())
                    .filter(|(values, band)| band.is_nodata(values[c]))
                    .count();
                row[c] = flags_for(rule, missing, band_count);
            }
        }))
    }
}

#[inline]
fn flags_for(rule: NoDataRule, missing: usize, total: usize) -> u8 {
    match rule {
        NoDataRule::AnyBandMissing => {
            let mut value = 0;
            if missing > 0 {
                value |= NO_DATA;
            }
            if missing > 0 && missing < total {
                value |= NON_CONTIGUOUS;
            }
            value
        }
        NoDataRule::AllBandsMissing => {
            let mut value = 0;
            if missing == total {
                value |= NO_DATA;
            }
            if missing > 0 {
                value |= NON_CONTIGUOUS;
            }
            value
        }
    }
}
