//! WOFL bit layout and the thresholds shared by the filters.
//!
//! A WOFL byte is the bitwise OR of every flag raised for a pixel. `0` is a
//! clear dry observation, `128` a clear wet one, and `1` the canonical no-data
//! value (no other bit may accompany bit 0).

/// Bit 0: no data (any band missing, saturated, or DSM missing)
pub const NO_DATA: u8 = 1 << 0;
/// Bit 1: bands are not contiguous
pub const NON_CONTIGUOUS: u8 = 1 << 1;
/// Bit 2: sea
pub const SEA: u8 = 1 << 2;
/// Bit 3: terrain shadow or low solar incidence angle
pub const TERRAIN_SHADOW: u8 = 1 << 3;
/// Bit 4: high slope
pub const HIGH_SLOPE: u8 = 1 << 4;
/// Bit 5: cloud shadow
pub const CLOUD_SHADOW: u8 = 1 << 5;
/// Bit 6: cloud
pub const CLOUD: u8 = 1 << 6;
/// Bit 7: water
pub const WATER: u8 = 1 << 7;

pub const CLEAR_DRY: u8 = 0;
pub const CLEAR_WET: u8 = WATER;

pub const SLOPE_THRESHOLD_DEGREES: f64 = 12.0;
pub const LOW_SOLAR_INCIDENCE_THRESHOLD_DEGREES: f64 = 10.0;
pub const TERRAIN_SHADOW_DILATION_PIXELS: usize = 3;
pub const DEFAULT_DSM_NO_DATA: f32 = -1000.0;

const NAMES: [(u8, &str); 8] = [
    (NO_DATA, "no_data"),
    (NON_CONTIGUOUS, "non_contiguous"),
    (SEA, "sea"),
    (TERRAIN_SHADOW, "terrain_shadow"),
    (HIGH_SLOPE, "high_slope"),
    (CLOUD_SHADOW, "cloud_shadow"),
    (CLOUD, "cloud"),
    (WATER, "water"),
];

/// Decoded view of one WOFL byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct WoflFlags(pub u8);

impl WoflFlags {
    #[inline]
    pub fn contains(self, bits: u8) -> bool {
        self.0 & bits == bits
    }

    pub fn is_no_data(self) -> bool {
        self.contains(NO_DATA)
    }

    pub fn is_wet(self) -> bool {
        self.contains(WATER)
    }

    pub fn is_cloudy(self) -> bool {
        self.0 & (CLOUD | CLOUD_SHADOW) != 0
    }

    /// True for the two unflagged observations, 0 and 128
    pub fn is_clear(self) -> bool {
        self.0 & !WATER == 0
    }

    /// Names of the raised bits, lowest first
    pub fn names(self) -> Vec<&'static str> {
        NAMES
            .iter()
            .filter(|(bit, _)| self.0 & bit != 0)
            .map(|(_, name)| *name)
            .collect()
    }
}

impl From<u8> for WoflFlags {
    fn from(value: u8) -> Self {
        WoflFlags(value)
    }
}

impl std::fmt::Display for WoflFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            CLEAR_DRY => write!(f, "clear_dry"),
            CLEAR_WET => write!(f, "clear_wet"),
            _ => write!(f, "{}", self.names().join("|")),
        }
    }
}
