//! Time-series reduction of WOFLs into clear/wet counts and wet frequency.

use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::core::dsm::resample_to;
use crate::core::morphology::dilate_bits;
use crate::flags::{CLOUD, CLOUD_SHADOW, NO_DATA, SEA, WATER};
use crate::types::{ensure_shape, Dsm, GeoBox, Resampling, Wofl, WofsError, WofsResult};

/// Options for the summary reducer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Resampling used when aligning a DSM to the reflectance grid
    pub resampling: Resampling,
    /// Disk radius applied to cloud and cloud shadow before counting (pixels)
    pub dilation: usize,
    /// An observation is clear when none of these bits are set
    pub masked_bits: u8,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            resampling: Resampling::Nearest,
            dilation: 0,                                // no cloud buffer
            masked_bits: NO_DATA | CLOUD_SHADOW | CLOUD, // bits 0, 5 and 6
        }
    }
}

impl SummaryConfig {
    /// Only 0 and 128 count as clear, ignoring the sea bit
    pub fn strict() -> Self {
        Self {
            masked_bits: !(WATER | SEA),
            ..Self::default()
        }
    }

    pub fn with_dilation(mut self, dilation: usize) -> Self {
        self.dilation = dilation;
        self
    }

    /// Align a DSM to `target` with the configured resampling
    pub fn resample_dsm(&self, dsm: &Dsm, target: &GeoBox, no_data: f32) -> WofsResult<Dsm> {
        resample_to(dsm, target, self.resampling, no_data)
    }
}

/// Summary rasters of one tile
#[derive(Debug, Clone)]
pub struct WofsSummary {
    pub clear_count: Array2<u32>,
    pub wet_count: Array2<u32>,
    /// wet / clear, NaN where nothing was clear
    pub frequency: Array2<f32>,
    /// Number of WOFLs reduced
    pub observations: usize,
}

/// Online reducer over the time axis.
///
/// Counts are additive, so accumulators built over disjoint parts of an
/// archive can be merged in any order.
#[derive(Debug, Clone)]
pub struct SummaryAccumulator {
    config: SummaryConfig,
    clear_count: Array2<u32>,
    wet_count: Array2<u32>,
    observations: usize,
}

impl SummaryAccumulator {
    pub fn new(shape: (usize, usize), config: SummaryConfig) -> Self {
        Self {
            config,
            clear_count: Array2::zeros(shape),
            wet_count: Array2::zeros(shape),
            observations: 0,
        }
    }

    pub fn config(&self) -> &SummaryConfig {
        &self.config
    }

    pub fn shape(&self) -> (usize, usize) {
        self.clear_count.dim()
    }

    pub fn observations(&self) -> usize {
        self.observations
    }

    /// Count one WOFL
    pub fn add(&mut self, wofl: &Wofl) -> WofsResult<()> {
        ensure_shape("wofl", self.shape(), wofl.dim())?;
        let masked = self.config.masked_bits;

        if self.config.dilation == 0 {
            Zip::from(&mut self.clear_count)
                .and(&mut self.wet_count)
                .and(wofl)
                .for_each(|clear, wet, &v| count(clear, wet, v, masked, false));
        } else {
            let buffered = dilate_bits(wofl, CLOUD | CLOUD_SHADOW, self.config.dilation);
            Zip::from(&mut self.clear_count)
                .and(&mut self.wet_count)
                .and(wofl)
                .and(&buffered)
                .for_each(|clear, wet, &v, &near_cloud| count(clear, wet, v, masked, near_cloud));
        }

        self.observations += 1;
        Ok(())
    }

    /// Fold another accumulator over the same tile into this one
    pub fn merge(&mut self, other: SummaryAccumulator) -> WofsResult<()> {
        ensure_shape("summary accumulator", self.shape(), other.shape())?;
        if self.config.dilation != other.config.dilation || self.config.masked_bits != other.config.masked_bits {
            return Err(WofsError::InvalidParameter(format!(
                "cannot merge summaries with different settings ({:?} vs {:?})",
                self.config, other.config
            )));
        }
        self.clear_count += &other.clear_count;
        self.wet_count += &other.wet_count;
        self.observations += other.observations;
        Ok(())
    }

    pub fn finish(self) -> WofsSummary {
        let frequency = Zip::from(&self.wet_count)
            .and(&self.clear_count)
            .map_collect(|&wet, &clear| {
                if clear == 0 {
                    f32::NAN
                } else {
                    wet as f32 / clear as f32
                }
            });

        log::debug!(
            "Summarised {} observations; {} pixels never clear",
            self.observations,
            self.clear_count.iter().filter(|&&c| c == 0).count()
        );

        WofsSummary {
            clear_count: self.clear_count,
            wet_count: self.wet_count,
            frequency,
            observations: self.observations,
        }
    }
}

#[inline]
fn count(clear: &mut u32, wet: &mut u32, value: u8, masked: u8, near_cloud: bool) {
    if value & masked != 0 || near_cloud {
        return;
    }
    *clear += 1;
    if value & WATER != 0 {
        *wet += 1;
    }
}

/// Reduce a sequence of WOFLs of one tile
pub fn summarise<'a, I>(shape: (usize, usize), wofls: I, config: &SummaryConfig) -> WofsResult<WofsSummary>
where
    I: IntoIterator<Item = &'a Wofl>,
{
    log::info!("Starting WOfS summary for {:?} tile (dilation {})", shape, config.dilation);
    let mut accumulator = SummaryAccumulator::new(shape, config.clone());
    for wofl in wofls {
        accumulator.add(wofl)?;
    }
    let summary = accumulator.finish();
    log::info!("✅ WOfS summary completed ({} observations)", summary.observations);
    Ok(summary)
}

/// Reduce an in-memory stack, splitting the time axis across threads
#[cfg(feature = "parallel")]
pub fn summarise_stack(shape: (usize, usize), wofls: &[Wofl], config: &SummaryConfig) -> WofsResult<WofsSummary> {
    use rayon::prelude::*;

    log::info!(
        "Starting parallel WOfS summary of {} WOFLs for {:?} tile",
        wofls.len(),
        shape
    );
    let accumulator = wofls
        .par_iter()
        .try_fold(
            || SummaryAccumulator::new(shape, config.clone()),
            |mut acc, wofl| {
                acc.add(wofl)?;
                Ok::<_, WofsError>(acc)
            },
        )
        .try_reduce(
            || SummaryAccumulator::new(shape, config.clone()),
            |mut a, b| {
                a.merge(b)?;
                Ok(a)
            },
        )?;
    Ok(accumulator.finish())
}

#[cfg(not(feature = "parallel"))]
pub fn summarise_stack(shape: (usize, usize), wofls: &[Wofl], config: &SummaryConfig) -> WofsResult<WofsSummary> {
    summarise(shape, wofls, config)
}
