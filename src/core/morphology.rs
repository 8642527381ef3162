//! Binary dilation with a disk structuring element.
//!
//! Used to buffer cloud and cloud shadow in the quality filter and the summary
//! reducer, and to widen terrain shadow.

use ndarray::{Array2, ArrayBase, Data, Ix2};

/// (dr, dc) offsets of a disk of `radius` pixels: `dr² + dc² <= (radius + 0.5)²`
pub fn disk_offsets(radius: usize) -> Vec<(isize, isize)> {
    let r = radius as isize;
    // (r + 0.5)² over the integers
    let r2 = r * r + r;
    let mut offsets = Vec::with_capacity((2 * radius + 1).pow(2));
    for dr in -r..=r {
        for dc in -r..=r {
            if dr * dr + dc * dc <= r2 {
                offsets.push((dr, dc));
            }
        }
    }
    offsets
}

/// Dilate a boolean mask by a disk of `radius` pixels.
///
/// Pixels outside the raster count as unset. A radius of 0 returns a copy.
pub fn dilate<S>(mask: &ArrayBase<S, Ix2>, radius: usize) -> Array2<bool>
where
    S: Data<Elem = bool> + Sync,
{
    if radius == 0 || !mask.iter().any(|&v| v) {
        return mask.to_owned();
    }

    let (rows, cols) = mask.dim();
    let offsets = disk_offsets(radius);
    log::debug!(
        "Dilating {}x{} mask with disk radius {} ({} offsets)",
        rows,
        cols,
        radius,
        offsets.len()
    );

    super::fill_rows((rows, cols), false, |r, mut row| {
        for c in 0..cols {
            if mask[[r, c]] {
                row[c] = true;
                continue;
            }
            row[c] = offsets.iter().any(|&(dr, dc)| {
                let rr = r as isize + dr;
                let cc = c as isize + dc;
                rr >= 0
                    && cc >= 0
                    && (rr as usize) < rows
                    && (cc as usize) < cols
                    && mask[[rr as usize, cc as usize]]
            });
        }
    })
}

/// Dilate the pixels of `wofl` carrying any of `bits`
pub fn dilate_bits<S>(wofl: &ArrayBase<S, Ix2>, bits: u8, radius: usize) -> Array2<bool>
where
    S: Data<Elem = u8>,
{
    let mask = wofl.map(|&v| v & bits != 0);
    dilate(&mask, radius)
}
