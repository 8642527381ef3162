use ndarray::{Array2, ArrayView2};
use num_traits::AsPrimitive;
use serde::{Deserialize, Serialize};

use crate::core::reproject::Crs;

/// Water Observation Feature Layer: one bit-packed byte per pixel (see [`crate::flags`])
pub type Wofl = Array2<u8>;

/// Digital surface model elevations in metres
pub type DsmImage = Array2<f32>;

/// Upstream pixel-quality band (bit-packed or categorical)
pub type QualityImage = Array2<u16>;

/// Sample types accepted as surface reflectance.
///
/// Any primitive number that converts to `f32`/`f64` qualifies; integer
/// reflectance below 2^24 converts exactly.
pub trait Reflectance:
    Copy + PartialEq + Send + Sync + std::fmt::Debug + AsPrimitive<f32> + AsPrimitive<f64>
{
}

impl<T> Reflectance for T where
    T: Copy + PartialEq + Send + Sync + std::fmt::Debug + AsPrimitive<f32> + AsPrimitive<f64>
{
}

/// The six spectral bands consumed by the water classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpectralBand {
    Blue,
    Green,
    Red,
    Nir,
    Swir1,
    Swir2,
}

impl SpectralBand {
    /// Classifier band order (Landsat 5/7 bands 1, 2, 3, 4, 5, 7)
    pub const ALL: [SpectralBand; 6] = [
        SpectralBand::Blue,
        SpectralBand::Green,
        SpectralBand::Red,
        SpectralBand::Nir,
        SpectralBand::Swir1,
        SpectralBand::Swir2,
    ];

    /// Canonical band name
    pub fn name(self) -> &'static str {
        self.aliases()[0]
    }

    /// Accepted measurement names (legacy, ARD and NBAR spellings)
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            SpectralBand::Blue => &["blue", "nbart_blue", "nbar_blue"],
            SpectralBand::Green => &["green", "nbart_green", "nbar_green"],
            SpectralBand::Red => &["red", "nbart_red", "nbar_red"],
            SpectralBand::Nir => &["nir", "nbart_nir", "nbar_nir"],
            SpectralBand::Swir1 => &["swir1", "swir_1", "swir16", "nbart_swir_1", "nbar_swir_1"],
            SpectralBand::Swir2 => &["swir2", "swir_2", "swir22", "nbart_swir_2", "nbar_swir_2"],
        }
    }

    /// Whether a measurement name refers to this band
    pub fn matches(self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        self.aliases().iter().any(|alias| *alias == lower)
    }
}

impl std::fmt::Display for SpectralBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Resampling kernels used when aligning a DSM to the reflectance grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    #[default]
    Nearest,
    Bilinear,
    Cubic,
}

/// Geospatial transformation parameters (GDAL affine ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation terms
    pub fn north_up(top_left_x: f64, pixel_width: f64, top_left_y: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height,
        }
    }

    /// Build from a GDAL-style six element array
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// World coordinates of a (fractional) pixel position, corner-based
    pub fn pixel_to_world(&self, row: f64, col: f64) -> (f64, f64) {
        let x = self.top_left_x + col * self.pixel_width + row * self.rotation_x;
        let y = self.top_left_y + col * self.rotation_y + row * self.pixel_height;
        (x, y)
    }

    /// Fractional (row, col) of a world coordinate, corner-based
    pub fn world_to_pixel(&self, x: f64, y: f64) -> WofsResult<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det.abs() < f64::EPSILON {
            return Err(WofsError::InvalidParameter(format!(
                "Geotransform is not invertible: {:?}",
                self.to_gdal()
            )));
        }
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (self.pixel_height * dx - self.rotation_x * dy) / det;
        let row = (-self.rotation_y * dx + self.pixel_width * dy) / det;
        Ok((row, col))
    }

    /// Ground size of one pixel along x and y (always positive)
    pub fn pixel_size(&self) -> (f64, f64) {
        (
            self.pixel_width.hypot(self.rotation_y),
            self.rotation_x.hypot(self.pixel_height),
        )
    }

    /// Equality up to a fraction of a pixel
    pub fn approx_eq(&self, other: &GeoTransform) -> bool {
        let (sx, sy) = self.pixel_size();
        let tol = 1e-6 * sx.max(sy).max(f64::MIN_POSITIVE);
        self.to_gdal()
            .iter()
            .zip(other.to_gdal().iter())
            .all(|(a, b)| (a - b).abs() <= tol)
    }
}

/// A pixel grid: shape, affine transform and coordinate reference system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoBox {
    pub rows: usize,
    pub cols: usize,
    pub transform: GeoTransform,
    pub crs: Crs,
}

impl GeoBox {
    pub fn new(rows: usize, cols: usize, transform: GeoTransform, crs: Crs) -> Self {
        Self {
            rows,
            cols,
            transform,
            crs,
        }
    }

    /// Unit pixel grid without a meaningful location
    pub fn pixel_grid(rows: usize, cols: usize) -> Self {
        Self::new(
            rows,
            cols,
            GeoTransform::north_up(0.0, 1.0, 0.0, -1.0),
            Crs::wgs84(),
        )
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// World coordinates of the centre of the middle pixel
    pub fn center(&self) -> (f64, f64) {
        self.transform
            .pixel_to_world((self.rows / 2) as f64 + 0.5, (self.cols / 2) as f64 + 0.5)
    }

    /// The same grid enlarged by `halo` pixels on every side
    pub fn buffered(&self, halo: usize) -> GeoBox {
        let h = halo as f64;
        let (x, y) = self.transform.pixel_to_world(-h, -h);
        let transform = GeoTransform {
            top_left_x: x,
            top_left_y: y,
            ..self.transform
        };
        GeoBox::new(self.rows + 2 * halo, self.cols + 2 * halo, transform, self.crs)
    }

    pub fn is_aligned_with(&self, other: &GeoBox) -> bool {
        self.shape() == other.shape()
            && self.crs == other.crs
            && self.transform.approx_eq(&other.transform)
    }
}

/// One band: pixel data plus its no-data sentinel
#[derive(Debug, Clone)]
pub struct Measurement<T> {
    pub data: Array2<T>,
    pub nodata: T,
}

impl<T: Reflectance> Measurement<T> {
    pub fn new(data: Array2<T>, nodata: T) -> Self {
        Self { data, nodata }
    }

    #[inline]
    pub fn is_nodata(&self, value: T) -> bool {
        value == self.nodata
    }

    pub fn view(&self) -> ArrayView2<'_, T> {
        self.data.view()
    }
}

/// Pixel-aligned named bands of one acquisition
#[derive(Debug, Clone)]
pub struct BandStack<T> {
    geobox: GeoBox,
    bands: Vec<(String, Measurement<T>)>,
}

impl<T: Reflectance> BandStack<T> {
    pub fn new(geobox: GeoBox) -> Self {
        Self {
            geobox,
            bands: Vec::new(),
        }
    }

    /// Builder form of [`BandStack::insert`]
    pub fn with_band(mut self, name: impl Into<String>, data: Array2<T>, nodata: T) -> WofsResult<Self> {
        self.insert(name, data, nodata)?;
        Ok(self)
    }

    /// Add or replace a band; its shape must match the stack's grid
    pub fn insert(&mut self, name: impl Into<String>, data: Array2<T>, nodata: T) -> WofsResult<()> {
        let name = name.into();
        ensure_shape(&name, self.geobox.shape(), data.dim())?;
        let measurement = Measurement::new(data, nodata);
        match self.bands.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = measurement,
            None => self.bands.push((name, measurement)),
        }
        Ok(())
    }

    pub fn geobox(&self) -> &GeoBox {
        &self.geobox
    }

    pub fn shape(&self) -> (usize, usize) {
        self.geobox.shape()
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bands.iter().map(|(name, _)| name.as_str())
    }

    /// Band by exact name
    pub fn band(&self, name: &str) -> WofsResult<&Measurement<T>> {
        self.bands
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, m)| m)
            .ok_or_else(|| WofsError::MissingBand(name.to_string()))
    }

    /// Spectral band by any of its accepted names
    pub fn spectral(&self, band: SpectralBand) -> WofsResult<&Measurement<T>> {
        self.bands
            .iter()
            .find(|(name, _)| band.matches(name))
            .map(|(_, m)| m)
            .ok_or_else(|| WofsError::MissingBand(band.name().to_string()))
    }

    /// The six classifier bands in [`SpectralBand::ALL`] order
    pub fn spectral_bands(&self) -> WofsResult<[&Measurement<T>; 6]> {
        Ok([
            self.spectral(SpectralBand::Blue)?,
            self.spectral(SpectralBand::Green)?,
            self.spectral(SpectralBand::Red)?,
            self.spectral(SpectralBand::Nir)?,
            self.spectral(SpectralBand::Swir1)?,
            self.spectral(SpectralBand::Swir2)?,
        ])
    }

    /// Apply a per-band conversion, keeping names and grid
    pub fn map<U, F>(&self, f: F) -> BandStack<U>
    where
        U: Reflectance,
        F: Fn(&Measurement<T>) -> Measurement<U>,
    {
        BandStack {
            geobox: self.geobox.clone(),
            bands: self
                .bands
                .iter()
                .map(|(name, m)| (name.clone(), f(m)))
                .collect(),
        }
    }
}

/// Digital surface model tile
#[derive(Debug, Clone)]
pub struct Dsm {
    pub elevation: DsmImage,
    pub geobox: GeoBox,
}

impl Dsm {
    pub fn new(elevation: DsmImage, geobox: GeoBox) -> WofsResult<Self> {
        ensure_shape("dsm", geobox.shape(), elevation.dim())?;
        Ok(Self { elevation, geobox })
    }
}

/// Error types for WOfS processing
#[derive(Debug, thiserror::Error)]
pub enum WofsError {
    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: String,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("DSM is not aligned with the reflectance grid: {0}")]
    DsmNotAligned(String),

    #[error("Missing required band: {0}")]
    MissingBand(String),

    #[error("Unsupported quality encoding: {0}")]
    UnsupportedQualityEncoding(String),

    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

impl From<ndarray::ShapeError> for WofsError {
    fn from(e: ndarray::ShapeError) -> Self {
        WofsError::Processing(format!("Array shape error: {}", e))
    }
}

/// Result type for WOfS operations
pub type WofsResult<T> = Result<T, WofsError>;

/// Fail with [`WofsError::ShapeMismatch`] unless both shapes agree
pub(crate) fn ensure_shape(what: &str, expected: (usize, usize), actual: (usize, usize)) -> WofsResult<()> {
    if expected != actual {
        return Err(WofsError::ShapeMismatch {
            what: what.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}
