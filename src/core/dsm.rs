//! Aligning a DSM to the reflectance grid and sizing processing halos.

use ndarray::{s, Array2};

use crate::core::solar::SolarGeometry;
use crate::types::{Dsm, GeoBox, Resampling, WofsError, WofsResult};

/// Resample a DSM onto `target` (same CRS).
///
/// Target pixel centres outside the source, or whose kernel support touches
/// a missing source value, become `no_data`.
pub fn resample_to(dsm: &Dsm, target: &GeoBox, resampling: Resampling, no_data: f32) -> WofsResult<Dsm> {
    if dsm.geobox.crs != target.crs {
        return Err(WofsError::DsmNotAligned(format!(
            "DSM is in {} but the target grid is in {}; reproject it first",
            dsm.geobox.crs, target.crs
        )));
    }
    if dsm.geobox.is_aligned_with(target) {
        return Ok(dsm.clone());
    }

    log::debug!(
        "Resampling DSM {:?} onto {:?} grid ({:?})",
        dsm.geobox.shape(),
        target.shape(),
        resampling
    );

    let source = &dsm.elevation;
    let (src_rows, src_cols) = source.dim();
    let valid = |v: f32| v.is_finite() && v != no_data;

    // Fractional source position of every target pixel centre, centre-based
    let positions = target_positions(dsm, target)?;

    let elevation = super::fill_rows(target.shape(), no_data, |r, mut row| {
        for c in 0..row.len() {
            let (sr, sc) = positions[[r, c]];
            if sr < -0.5 || sc < -0.5 || sr > src_rows as f64 - 0.5 || sc > src_cols as f64 - 0.5 {
                continue;
            }
            let value = match resampling {
                Resampling::Nearest => {
                    let rr = (sr.round().max(0.0) as usize).min(src_rows - 1);
                    let cc = (sc.round().max(0.0) as usize).min(src_cols - 1);
                    let v = source[[rr, cc]];
                    valid(v).then_some(v as f64)
                }
                Resampling::Bilinear => kernel_sample(source, sr, sc, 1, &valid, |t| (1.0 - t.abs()).max(0.0)),
                Resampling::Cubic => kernel_sample(source, sr, sc, 2, &valid, keys_cubic),
            };
            if let Some(v) = value {
                row[c] = v as f32;
            }
        }
    });

    Dsm::new(elevation, target.clone())
}

fn target_positions(dsm: &Dsm, target: &GeoBox) -> WofsResult<Array2<(f64, f64)>> {
    let mut positions = Array2::from_elem(target.shape(), (0.0, 0.0));
    for ((r, c), pos) in positions.indexed_iter_mut() {
        let (x, y) = target.transform.pixel_to_world(r as f64 + 0.5, c as f64 + 0.5);
        let (sr, sc) = dsm.geobox.transform.world_to_pixel(x, y)?;
        *pos = (sr - 0.5, sc - 0.5);
    }
    Ok(positions)
}

/// Separable kernel of half-width `radius`; indices outside the source are clamped
fn kernel_sample<V, K>(source: &Array2<f32>, sr: f64, sc: f64, radius: isize, valid: &V, kernel: K) -> Option<f64>
where
    V: Fn(f32) -> bool,
    K: Fn(f64) -> f64,
{
    let (rows, cols) = source.dim();
    let r0 = sr.floor() as isize;
    let c0 = sc.floor() as isize;
    let mut total = 0.0;
    let mut weight_sum = 0.0;
    for i in (r0 - radius + 1)..=(r0 + radius) {
        let wr = kernel(sr - i as f64);
        if wr == 0.0 {
            continue;
        }
        let rr = i.clamp(0, rows as isize - 1) as usize;
        for j in (c0 - radius + 1)..=(c0 + radius) {
            let wc = kernel(sc - j as f64);
            if wc == 0.0 {
                continue;
            }
            let cc = j.clamp(0, cols as isize - 1) as usize;
            let v = source[[rr, cc]];
            if !valid(v) {
                return None;
            }
            total += wr * wc * v as f64;
            weight_sum += wr * wc;
        }
    }
    if weight_sum == 0.0 {
        return None;
    }
    Some(total / weight_sum)
}

/// Keys cubic convolution kernel, a = -0.5
fn keys_cubic(t: f64) -> f64 {
    const A: f64 = -0.5;
    let t = t.abs();
    if t <= 1.0 {
        (A + 2.0) * t * t * t - (A + 3.0) * t * t + 1.0
    } else if t < 2.0 {
        A * t * t * t - 5.0 * A * t * t + 8.0 * A * t - 4.0 * A
    } else {
        0.0
    }
}

/// Grid enlarged by `halo` pixels on every side
pub fn buffer_geobox(geobox: &GeoBox, halo: usize) -> GeoBox {
    geobox.buffered(halo)
}

/// Remove `halo` pixels from every side of a buffered raster
pub fn trim_halo<T: Clone>(array: &Array2<T>, halo: usize) -> WofsResult<Array2<T>> {
    let (rows, cols) = array.dim();
    if rows < 2 * halo || cols < 2 * halo {
        return Err(WofsError::InvalidParameter(format!(
            "cannot trim a {} pixel halo from a {}x{} raster",
            halo, rows, cols
        )));
    }
    Ok(array.slice(s![halo..rows - halo, halo..cols - halo]).to_owned())
}

/// Halo needed for terrain flags to match an unbuffered run over a larger area.
///
/// One pixel for the slope kernel plus the longest shadow `relief_m` can cast.
/// A sun at or below the horizon shades everything, so only the slope pixel is needed.
pub fn shadow_halo_pixels(relief_m: f64, sun: &SolarGeometry, pixel_size_m: f64) -> usize {
    if sun.is_below_horizon() || relief_m <= 0.0 || pixel_size_m <= 0.0 {
        return 1;
    }
    let distance = relief_m / sun.elevation_deg.to_radians().tan();
    1 + (distance / pixel_size_m).ceil() as usize
}
