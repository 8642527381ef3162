//! Sun position for an acquisition, expressed relative to a tile's grid.

use std::f64::consts::PI;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::core::reproject::{vector_to_crs, Crs};
use crate::types::{GeoBox, WofsResult};

/// Sun direction: azimuth clockwise from (grid) north and elevation above the horizon
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolarGeometry {
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
}

impl SolarGeometry {
    pub fn new(azimuth_deg: f64, elevation_deg: f64) -> Self {
        Self {
            azimuth_deg: azimuth_deg.rem_euclid(360.0),
            elevation_deg,
        }
    }

    /// Sun position at the centre of `geobox`, azimuth measured from grid north.
    ///
    /// Assumes a north-up transform.
    pub fn for_tile(geobox: &GeoBox, time: DateTime<Utc>) -> WofsResult<Self> {
        let centre = geobox.center();
        let geographic = Crs::wgs84();

        let (lon, lat, grid_north_deg) = if geobox.crs.is_geographic() {
            (centre.0, centre.1, 0.0)
        } else {
            let ((lon, lat), (dlon, dlat)) = vector_to_crs(centre, (0.0, 100.0), &geobox.crs, &geographic)?;
            let grid_north = (dlon * lat.to_radians().cos()).atan2(dlat).to_degrees();
            (lon, lat, grid_north)
        };

        let sun = solar_position(time, lon, lat);
        log::debug!(
            "Sun at ({:.4}, {:.4}) {}: azimuth {:.2}, elevation {:.2}, grid north offset {:.3}",
            lon,
            lat,
            time,
            sun.azimuth_deg,
            sun.elevation_deg,
            grid_north_deg
        );
        Ok(Self::new(sun.azimuth_deg - grid_north_deg, sun.elevation_deg))
    }

    pub fn is_below_horizon(&self) -> bool {
        self.elevation_deg <= 0.0
    }

    /// Unit vector toward the sun in grid axes (x along columns, y along rows, z up)
    pub fn vector(&self) -> [f64; 3] {
        let az = self.azimuth_deg.to_radians();
        let alt = self.elevation_deg.to_radians();
        [az.sin() * alt.cos(), -az.cos() * alt.cos(), alt.sin()]
    }
}

/// Solar azimuth (clockwise from true north) and elevation at a UTC time.
///
/// Spencer (1971) declination and equation of time; no refraction.
pub fn solar_position(time: DateTime<Utc>, lon_deg: f64, lat_deg: f64) -> SolarGeometry {
    let hour = time.hour() as f64 + time.minute() as f64 / 60.0 + time.second() as f64 / 3600.0;
    let gamma = 2.0 * PI / 365.0 * (time.ordinal() as f64 - 1.0 + (hour - 12.0) / 24.0);

    let declination = 0.006918 - 0.399912 * gamma.cos() + 0.070257 * gamma.sin()
        - 0.006758 * (2.0 * gamma).cos()
        + 0.000907 * (2.0 * gamma).sin()
        - 0.002697 * (3.0 * gamma).cos()
        + 0.00148 * (3.0 * gamma).sin();

    // Minutes
    let equation_of_time = 229.18
        * (0.000075 + 0.001868 * gamma.cos()
            - 0.032077 * gamma.sin()
            - 0.014615 * (2.0 * gamma).cos()
            - 0.040849 * (2.0 * gamma).sin());

    let true_solar_minutes = hour * 60.0 + equation_of_time + 4.0 * lon_deg;
    let hour_angle = (true_solar_minutes / 4.0 - 180.0).to_radians();

    let lat = lat_deg.to_radians();
    let cos_zenith = (lat.sin() * declination.sin() + lat.cos() * declination.cos() * hour_angle.cos())
        .clamp(-1.0, 1.0);
    let elevation = 90.0 - cos_zenith.acos().to_degrees();

    // Azimuth from south, westward positive, shifted to north-clockwise
    let azimuth = hour_angle
        .sin()
        .atan2(hour_angle.cos() * lat.sin() - declination.tan() * lat.cos())
        .to_degrees()
        + 180.0;

    SolarGeometry::new(azimuth, elevation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use chrono::TimeZone;

    fn angle_diff(a: f64, b: f64) -> f64 {
        let d = (a - b).rem_euclid(360.0);
        if d > 180.0 {
            d - 360.0
        } else {
            d
        }
    }

    #[test]
    fn test_winter_noon_canberra() {
        // Solar noon near the June solstice: sun due north, ~31 degrees up
        let time = Utc.with_ymd_and_hms(2021, 6, 21, 2, 3, 0).unwrap();
        let sun = solar_position(time, 149.13, -35.28);
        assert!((sun.elevation_deg - 31.3).abs() < 1.0, "{:?}", sun);
        assert!(angle_diff(sun.azimuth_deg, 0.0).abs() < 5.0, "{:?}", sun);
    }

    #[test]
    fn test_morning_sun_is_east() {
        // ~10:00 local in Western Australia
        let time = Utc.with_ymd_and_hms(2019, 3, 5, 2, 0, 0).unwrap();
        let sun = solar_position(time, 120.0, -25.0);
        assert!(sun.azimuth_deg > 0.0 && sun.azimuth_deg < 180.0, "{:?}", sun);
        assert!(sun.elevation_deg > 30.0 && sun.elevation_deg < 90.0, "{:?}", sun);
    }

    #[test]
    fn test_night() {
        let time = Utc.with_ymd_and_hms(2019, 3, 5, 14, 0, 0).unwrap();
        assert!(solar_position(time, 120.0, -25.0).is_below_horizon());
    }

    #[test]
    fn test_sun_vector() {
        let v = SolarGeometry::new(90.0, 0.0).vector();
        assert!((v[0] - 1.0).abs() < 1e-12);
        assert!(v[1].abs() < 1e-12);
        let v = SolarGeometry::new(0.0, 45.0).vector();
        assert!(v[1] < 0.0 && (v[2] - v[1].abs()).abs() < 1e-12);
    }

    #[test]
    fn test_grid_north_on_central_meridian() {
        let crs = Crs::australian_albers();
        let (x, y) = crs.from_geographic((132.0, -25.0)).unwrap();
        let geobox = GeoBox::new(
            4000,
            4000,
            GeoTransform::north_up(x - 50_000.0, 25.0, y + 50_000.0, -25.0),
            crs,
        );
        let time = Utc.with_ymd_and_hms(2019, 3, 5, 1, 30, 0).unwrap();
        let grid = SolarGeometry::for_tile(&geobox, time).unwrap();
        let (lon, lat) = crs.to_geographic(geobox.center()).unwrap();
        let truth = solar_position(time, lon, lat);
        assert!(angle_diff(grid.azimuth_deg, truth.azimuth_deg).abs() < 1e-3);
        assert_eq!(grid.elevation_deg, truth.elevation_deg);
    }

    #[test]
    fn test_grid_convergence_east_of_central_meridian() {
        let crs = Crs::australian_albers();
        let (x, y) = crs.from_geographic((150.0, -30.0)).unwrap();
        // Single pixel centred on the point
        let geobox = GeoBox::new(1, 1, GeoTransform::north_up(x - 12.5, 25.0, y + 12.5, -25.0), crs);
        let time = Utc.with_ymd_and_hms(2019, 3, 5, 1, 30, 0).unwrap();
        let grid = SolarGeometry::for_tile(&geobox, time).unwrap();
        let truth = solar_position(time, 150.0, -30.0);
        assert!((angle_diff(grid.azimuth_deg, truth.azimuth_deg) - 8.21).abs() < 0.05);
    }
}
