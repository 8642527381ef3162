use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::core::morphology::dilate;
use crate::core::solar::SolarGeometry;
use crate::flags::{
    DEFAULT_DSM_NO_DATA, HIGH_SLOPE, LOW_SOLAR_INCIDENCE_THRESHOLD_DEGREES, NO_DATA, SLOPE_THRESHOLD_DEGREES,
    TERRAIN_SHADOW, TERRAIN_SHADOW_DILATION_PIXELS,
};
use crate::types::{Dsm, Wofl, WofsError, WofsResult};

/// Parameters for the terrain filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainParams {
    /// Slope above which bit 4 is set (degrees)
    pub slope_threshold_deg: f64,
    /// Solar incidence below which bit 3 is set (degrees)
    pub low_solar_incidence_deg: f64,
    /// Disk radius applied to cast shadow (pixels)
    pub shadow_dilation: usize,
    /// Upper bound on the shadow search distance (metres)
    pub max_shadow_distance_m: Option<f64>,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            slope_threshold_deg: SLOPE_THRESHOLD_DEGREES,               // 12 degrees
            low_solar_incidence_deg: LOW_SOLAR_INCIDENCE_THRESHOLD_DEGREES, // 10 degrees
            shadow_dilation: TERRAIN_SHADOW_DILATION_PIXELS,             // 3 pixels
            max_shadow_distance_m: None,                                 // bounded by relief only
        }
    }
}

/// Intermediate terrain rasters
#[derive(Debug, Clone)]
pub struct TerrainLayers {
    /// dz/dx along columns (m/m)
    pub gradient_x: Array2<f32>,
    /// dz/dy along rows (m/m)
    pub gradient_y: Array2<f32>,
    pub slope_deg: Array2<f32>,
    pub incidence_deg: Array2<f32>,
    /// Cast shadow before dilation
    pub shadow: Array2<bool>,
    /// DSM value present
    pub valid: Array2<bool>,
}

/// Terrain filter: high slope, low solar incidence and cast shadow
#[derive(Debug, Clone)]
pub struct TerrainFilter {
    params: TerrainParams,
    dsm_no_data: f32,
    ignore_dsm_no_data: bool,
}

impl TerrainFilter {
    pub fn new(params: TerrainParams, dsm_no_data: f32, ignore_dsm_no_data: bool) -> Self {
        Self {
            params,
            dsm_no_data,
            ignore_dsm_no_data,
        }
    }

    pub fn standard() -> Self {
        Self::new(TerrainParams::default(), DEFAULT_DSM_NO_DATA, false)
    }

    pub fn params(&self) -> &TerrainParams {
        &self.params
    }

    #[inline]
    fn is_valid(&self, z: f32) -> bool {
        z.is_finite() && z != self.dsm_no_data
    }

    fn pixel_size(&self, dsm: &Dsm) -> WofsResult<(f64, f64)> {
        let (dx, dy) = dsm.geobox.transform.pixel_size();
        if !(dx > 0.0 && dy > 0.0) {
            return Err(WofsError::InvalidParameter(format!(
                "DSM pixel size must be positive, got ({}, {})",
                dx, dy
            )));
        }
        Ok((dx, dy))
    }

    /// Horn gradients in metres per metre.
    ///
    /// A neighbour that is missing or outside the tile is extrapolated through
    /// the centre from its opposite neighbour. When both are missing, corners
    /// are rebuilt from the axial neighbours and the rest take the centre value.
    pub fn compute_gradients(&self, dsm: &Dsm) -> WofsResult<(Array2<f32>, Array2<f32>)> {
        let (dx, dy) = self.pixel_size(dsm)?;
        let z = &dsm.elevation;
        let (rows, cols) = z.dim();

        let sample = |r: isize, c: isize| -> Option<f64> {
            if r < 0 || c < 0 || r as usize >= rows || c as usize >= cols {
                return None;
            }
            let v = z[[r as usize, c as usize]];
            if self.is_valid(v) {
                Some(v as f64)
            } else {
                None
            }
        };

        let gradients = super::fill_rows((rows, cols), (0.0f32, 0.0f32), |r, mut row| {
            for c in 0..cols {
                let (ri, ci) = (r as isize, c as isize);
                let z0 = match sample(ri, ci) {
                    Some(v) => v,
                    None => continue,
                };
                let extrapolated = |i: isize, j: isize| -> Option<f64> {
                    sample(ri + i, ci + j)
                        .or_else(|| sample(ri - i, ci - j).map(|opposite| 2.0 * z0 - opposite))
                };
                let n = |i: isize, j: isize| -> f64 {
                    extrapolated(i, j).unwrap_or_else(|| {
                        if i != 0 && j != 0 {
                            // Corner from the two axial neighbours
                            extrapolated(i, 0).unwrap_or(z0) + extrapolated(0, j).unwrap_or(z0) - z0
                        } else {
                            z0
                        }
                    })
                };
                let gx = ((n(-1, 1) + 2.0 * n(0, 1) + n(1, 1)) - (n(-1, -1) + 2.0 * n(0, -1) + n(1, -1))) / (8.0 * dx);
                let gy = ((n(1, -1) + 2.0 * n(1, 0) + n(1, 1)) - (n(-1, -1) + 2.0 * n(-1, 0) + n(-1, 1))) / (8.0 * dy);
                row[c] = (gx as f32, gy as f32);
            }
        });

        Ok((gradients.map(|g| g.0), gradients.map(|g| g.1)))
    }

    /// Slope in degrees
    pub fn compute_slope(gradient_x: &Array2<f32>, gradient_y: &Array2<f32>) -> Array2<f32> {
        Zip::from(gradient_x)
            .and(gradient_y)
            .map_collect(|&gx, &gy| gx.hypot(gy).atan().to_degrees())
    }

    /// Solar incidence angle (sun elevation above the local surface) in degrees
    pub fn compute_solar_incidence(
        gradient_x: &Array2<f32>,
        gradient_y: &Array2<f32>,
        sun: &SolarGeometry,
    ) -> Array2<f32> {
        let [sx, sy, sz] = sun.vector();
        Zip::from(gradient_x).and(gradient_y).map_collect(|&gx, &gy| {
            let (gx, gy) = (gx as f64, gy as f64);
            let norm = (1.0 + gx * gx + gy * gy).sqrt();
            let cos_i = ((sz - gx * sx - gy * sy) / norm).clamp(-1.0, 1.0);
            (90.0 - cos_i.acos().to_degrees()) as f32
        })
    }

    /// Cast shadow by marching from each pixel toward the sun
    pub fn compute_shadows(&self, dsm: &Dsm, sun: &SolarGeometry) -> WofsResult<Array2<bool>> {
        let z = &dsm.elevation;
        let (rows, cols) = z.dim();

        if sun.is_below_horizon() {
            log::debug!("Sun below the horizon, every pixel is in shadow");
            return Ok(z.map(|&v| self.is_valid(v)));
        }

        let (px, py) = self.pixel_size(dsm)?;
        let az = sun.azimuth_deg.to_radians();
        let tan_alt = sun.elevation_deg.to_radians().tan();

        // One pixel per step along the dominant axis
        let (mut dr, mut dc) = (-az.cos() / py, az.sin() / px);
        let norm = dr.abs().max(dc.abs());
        dr /= norm;
        dc /= norm;
        if dr.abs() < 1e-9 {
            dr = 0.0;
        }
        if dc.abs() < 1e-9 {
            dc = 0.0;
        }
        let step_m = (dr * py).hypot(dc * px);

        let max_elevation = z
            .iter()
            .copied()
            .filter(|&v| self.is_valid(v))
            .fold(f32::NEG_INFINITY, f32::max);
        if !max_elevation.is_finite() {
            return Ok(Array2::from_elem((rows, cols), false));
        }
        let max_elevation = max_elevation as f64;
        let last_row = (rows - 1) as f64;
        let last_col = (cols - 1) as f64;

        let bilinear = |fr: f64, fc: f64| -> Option<f64> {
            let r0 = fr.floor();
            let c0 = fc.floor();
            let (wr, wc) = (fr - r0, fc - c0);
            let (r0, c0) = (r0 as usize, c0 as usize);
            let r1 = (r0 + 1).min(rows - 1);
            let c1 = (c0 + 1).min(cols - 1);
            let mut total = 0.0;
            for (r, c, w) in [
                (r0, c0, (1.0 - wr) * (1.0 - wc)),
                (r0, c1, (1.0 - wr) * wc),
                (r1, c0, wr * (1.0 - wc)),
                (r1, c1, wr * wc),
            ] {
                if w <= 0.0 {
                    continue;
                }
                let v = z[[r, c]];
                if !self.is_valid(v) {
                    return None;
                }
                total += w * v as f64;
            }
            Some(total)
        };

        let cap = self.params.max_shadow_distance_m;
        let shadow = super::fill_rows((rows, cols), false, |r, mut row| {
            for c in 0..cols {
                let z0 = z[[r, c]];
                if !self.is_valid(z0) {
                    continue;
                }
                let z0 = z0 as f64;
                let mut reach = (max_elevation - z0) / tan_alt;
                if let Some(limit) = cap {
                    reach = reach.min(limit);
                }
                if reach <= 0.0 {
                    continue;
                }
                let steps = (reach / step_m).floor() as usize;
                for k in 1..=steps {
                    let fr = r as f64 + k as f64 * dr;
                    let fc = c as f64 + k as f64 * dc;
                    if fr < 0.0 || fc < 0.0 || fr > last_row || fc > last_col {
                        break;
                    }
                    if let Some(h) = bilinear(fr, fc) {
                        if h > z0 + k as f64 * step_m * tan_alt {
                            row[c] = true;
                            break;
                        }
                    }
                }
            }
        });
        Ok(shadow)
    }

    /// All intermediate terrain rasters
    pub fn analyse(&self, dsm: &Dsm, sun: &SolarGeometry) -> WofsResult<TerrainLayers> {
        log::debug!("Computing Horn gradients");
        let (gradient_x, gradient_y) = self.compute_gradients(dsm)?;

        log::debug!("Computing slope and solar incidence");
        let slope_deg = Self::compute_slope(&gradient_x, &gradient_y);
        let incidence_deg = Self::compute_solar_incidence(&gradient_x, &gradient_y, sun);

        log::debug!(
            "Casting shadows (azimuth {:.2}, elevation {:.2})",
            sun.azimuth_deg,
            sun.elevation_deg
        );
        let shadow = self.compute_shadows(dsm, sun)?;
        let valid = dsm.elevation.map(|&v| self.is_valid(v));

        Ok(TerrainLayers {
            gradient_x,
            gradient_y,
            slope_deg,
            incidence_deg,
            shadow,
            valid,
        })
    }

    /// Bits 3 and 4, plus bit 0 where the DSM is missing
    pub fn apply(&self, dsm: &Dsm, sun: &SolarGeometry) -> WofsResult<Wofl> {
        log::info!("Starting terrain filter on {:?} DSM", dsm.elevation.dim());
        let layers = self.analyse(dsm, sun)?;
        let shadow = dilate(&layers.shadow, self.params.shadow_dilation);

        let slope_threshold = self.params.slope_threshold_deg as f32;
        let incidence_threshold = self.params.low_solar_incidence_deg as f32;
        let low_sun = sun.elevation_deg < self.params.low_solar_incidence_deg;
        if low_sun {
            log::debug!(
                "Sun elevation {:.2} below {:.2}, flagging the whole tile",
                sun.elevation_deg,
                self.params.low_solar_incidence_deg
            );
        }
        let missing = if self.ignore_dsm_no_data { 0 } else { NO_DATA };

        let mut wofl = Wofl::zeros(dsm.elevation.dim());
        Zip::from(&mut wofl)
            .and(&layers.valid)
            .and(&layers.slope_deg)
            .and(&layers.incidence_deg)
            .and(&shadow)
            .for_each(|w, &valid, &slope, &incidence, &shaded| {
                if !valid {
                    *w = missing;
                    return;
                }
                if slope > slope_threshold {
                    *w |= HIGH_SLOPE;
                }
                if low_sun || incidence < incidence_threshold || shaded {
                    *w |= TERRAIN_SHADOW;
                }
            });

        log::debug!(
            "Terrain flags: {} high slope, {} shadowed, {} missing DSM",
            wofl.iter().filter(|&&v| v & HIGH_SLOPE != 0).count(),
            wofl.iter().filter(|&&v| v & TERRAIN_SHADOW != 0).count(),
            layers.valid.iter().filter(|&&v| !v).count()
        );
        log::info!("✅ Terrain filter completed");
        Ok(wofl)
    }
}
