//! Coordinate reference systems used by WOfS tiles.
//!
//! Supports geographic coordinates, the Australian Albers equal-area grid
//! (EPSG:3577) and UTM / MGA zones. Coordinates are `(x, y)` pairs: easting
//! and northing in metres, or longitude and latitude in degrees.
//!
//! Datum shifts between GDA94, GDA2020 and WGS84 are not applied; they are
//! below two metres, far under what solar geometry needs.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::types::{WofsError, WofsResult};

pub type Point = (f64, f64);
pub type Vector = (f64, f64);

/// Reference ellipsoid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipsoid {
    pub a: f64,
    pub inv_f: f64,
}

impl Ellipsoid {
    pub const GRS80: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        inv_f: 298.257_222_101,
    };
    pub const WGS84: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        inv_f: 298.257_223_563,
    };

    pub fn flattening(&self) -> f64 {
        1.0 / self.inv_f
    }

    /// First eccentricity squared
    pub fn e2(&self) -> f64 {
        let f = self.flattening();
        f * (2.0 - f)
    }
}

/// Albers equal-area conic parameters (angles in degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlbersParams {
    pub ellipsoid: Ellipsoid,
    pub lat_1: f64,
    pub lat_2: f64,
    pub lat_0: f64,
    pub lon_0: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

impl AlbersParams {
    /// GDA94 / Australian Albers
    pub const AUSTRALIAN: AlbersParams = AlbersParams {
        ellipsoid: Ellipsoid::GRS80,
        lat_1: -18.0,
        lat_2: -36.0,
        lat_0: 0.0,
        lon_0: 132.0,
        false_easting: 0.0,
        false_northing: 0.0,
    };
}

/// Transverse Mercator parameters (angles in degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransverseMercatorParams {
    pub ellipsoid: Ellipsoid,
    pub lon_0: f64,
    pub scale: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

impl TransverseMercatorParams {
    pub fn utm(zone: u8, south: bool, ellipsoid: Ellipsoid) -> Self {
        Self {
            ellipsoid,
            lon_0: zone as f64 * 6.0 - 183.0,
            scale: 0.9996,
            false_easting: 500_000.0,
            false_northing: if south { 10_000_000.0 } else { 0.0 },
        }
    }
}

/// Coordinate reference system of a tile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Crs {
    Geographic { epsg: u32 },
    Albers { epsg: u32, params: AlbersParams },
    TransverseMercator { epsg: u32, params: TransverseMercatorParams },
}

impl Crs {
    pub fn wgs84() -> Self {
        Crs::Geographic { epsg: 4326 }
    }

    pub fn australian_albers() -> Self {
        Crs::Albers {
            epsg: 3577,
            params: AlbersParams::AUSTRALIAN,
        }
    }

    /// Look up a supported EPSG code
    pub fn from_epsg(code: u32) -> WofsResult<Self> {
        let crs = match code {
            4326 | 4283 | 7844 => Crs::Geographic { epsg: code },
            3577 | 9473 => Crs::Albers {
                epsg: code,
                params: AlbersParams::AUSTRALIAN,
            },
            32601..=32660 => Crs::TransverseMercator {
                epsg: code,
                params: TransverseMercatorParams::utm((code - 32600) as u8, false, Ellipsoid::WGS84),
            },
            32701..=32760 => Crs::TransverseMercator {
                epsg: code,
                params: TransverseMercatorParams::utm((code - 32700) as u8, true, Ellipsoid::WGS84),
            },
            // GDA94 / MGA zones 48-58
            28348..=28358 => Crs::TransverseMercator {
                epsg: code,
                params: TransverseMercatorParams::utm((code - 28300) as u8, true, Ellipsoid::GRS80),
            },
            // GDA2020 / MGA zones 46-59
            7846..=7859 => Crs::TransverseMercator {
                epsg: code,
                params: TransverseMercatorParams::utm((code - 7800) as u8, true, Ellipsoid::GRS80),
            },
            _ => return Err(WofsError::UnsupportedCrs(format!("EPSG:{}", code))),
        };
        Ok(crs)
    }

    pub fn epsg(&self) -> u32 {
        match *self {
            Crs::Geographic { epsg } | Crs::Albers { epsg, .. } | Crs::TransverseMercator { epsg, .. } => epsg,
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Geographic { .. })
    }

    /// Projected (or geographic) coordinates to (lon, lat) degrees
    pub fn to_geographic(&self, point: Point) -> WofsResult<Point> {
        let (x, y) = point;
        if !x.is_finite() || !y.is_finite() {
            return Err(WofsError::Projection(format!("non-finite coordinate ({}, {})", x, y)));
        }
        match self {
            Crs::Geographic { .. } => Ok(point),
            Crs::Albers { params, .. } => albers_inverse(params, x, y),
            Crs::TransverseMercator { params, .. } => tm_inverse(params, x, y),
        }
    }

    /// (lon, lat) degrees to this system's coordinates
    pub fn from_geographic(&self, point: Point) -> WofsResult<Point> {
        let (lon, lat) = point;
        if !lon.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(WofsError::Projection(format!(
                "invalid geographic coordinate ({}, {})",
                lon, lat
            )));
        }
        match self {
            Crs::Geographic { .. } => Ok(point),
            Crs::Albers { params, .. } => albers_forward(params, lon, lat),
            Crs::TransverseMercator { params, .. } => tm_forward(params, lon, lat),
        }
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

/// Map a point between two systems
pub fn transform_point(point: Point, from: &Crs, to: &Crs) -> WofsResult<Point> {
    if from == to {
        return Ok(point);
    }
    to.from_geographic(from.to_geographic(point)?)
}

/// Map a point and a finite displacement from it between two systems.
///
/// The returned vector is the difference of the transformed end points.
pub fn vector_to_crs(point: Point, vector: Vector, from: &Crs, to: &Crs) -> WofsResult<(Point, Vector)> {
    let start = transform_point(point, from, to)?;
    let end = transform_point((point.0 + vector.0, point.1 + vector.1), from, to)?;
    Ok((start, (end.0 - start.0, end.1 - start.1)))
}

fn wrap_longitude(mut dlon: f64) -> f64 {
    while dlon > 180.0 {
        dlon -= 360.0;
    }
    while dlon < -180.0 {
        dlon += 360.0;
    }
    dlon
}

// ---------------------------------------------------------------------------
// Albers equal-area conic (Snyder, USGS PP 1395, ch. 14)
// ---------------------------------------------------------------------------

struct AlbersConstants {
    a: f64,
    e: f64,
    e2: f64,
    n: f64,
    c: f64,
    rho0: f64,
}

fn albers_q(e: f64, e2: f64, sin_phi: f64) -> f64 {
    let es = e * sin_phi;
    (1.0 - e2) * (sin_phi / (1.0 - es * es) - (1.0 / (2.0 * e)) * ((1.0 - es) / (1.0 + es)).ln())
}

fn albers_m(e2: f64, phi: f64) -> f64 {
    let s = phi.sin();
    phi.cos() / (1.0 - e2 * s * s).sqrt()
}

impl AlbersConstants {
    fn new(p: &AlbersParams) -> Self {
        let a = p.ellipsoid.a;
        let e2 = p.ellipsoid.e2();
        let e = e2.sqrt();
        let (phi0, phi1, phi2) = (p.lat_0.to_radians(), p.lat_1.to_radians(), p.lat_2.to_radians());

        let m1 = albers_m(e2, phi1);
        let m2 = albers_m(e2, phi2);
        let q0 = albers_q(e, e2, phi0.sin());
        let q1 = albers_q(e, e2, phi1.sin());
        let q2 = albers_q(e, e2, phi2.sin());

        let n = if (phi1 - phi2).abs() < 1e-12 {
            phi1.sin()
        } else {
            (m1 * m1 - m2 * m2) / (q2 - q1)
        };
        let c = m1 * m1 + n * q1;
        let rho0 = a * (c - n * q0).sqrt() / n;
        Self { a, e, e2, n, c, rho0 }
    }
}

fn albers_forward(p: &AlbersParams, lon: f64, lat: f64) -> WofsResult<Point> {
    let k = AlbersConstants::new(p);
    let q = albers_q(k.e, k.e2, lat.to_radians().sin());
    let radicand = k.c - k.n * q;
    if radicand < 0.0 {
        return Err(WofsError::Projection(format!(
            "latitude {} outside the Albers domain",
            lat
        )));
    }
    let rho = k.a * radicand.sqrt() / k.n;
    let theta = k.n * wrap_longitude(lon - p.lon_0).to_radians();
    let x = rho * theta.sin() + p.false_easting;
    let y = k.rho0 - rho * theta.cos() + p.false_northing;
    Ok((x, y))
}

fn albers_inverse(p: &AlbersParams, x: f64, y: f64) -> WofsResult<Point> {
    let k = AlbersConstants::new(p);
    let dx = x - p.false_easting;
    let dy = k.rho0 - (y - p.false_northing);
    let sign = k.n.signum();
    let rho = sign * dx.hypot(dy);
    let theta = (sign * dx).atan2(sign * dy);
    let q = (k.c - rho * rho * k.n * k.n / (k.a * k.a)) / k.n;

    let mut phi = (q / 2.0).clamp(-1.0, 1.0).asin();
    let mut converged = false;
    for _ in 0..30 {
        let s = phi.sin();
        let es = k.e * s;
        let one = 1.0 - es * es;
        let delta = one * one / (2.0 * phi.cos())
            * (q / (1.0 - k.e2) - s / one + (1.0 / (2.0 * k.e)) * ((1.0 - es) / (1.0 + es)).ln());
        phi += delta;
        if delta.abs() < 1e-14 {
            converged = true;
            break;
        }
    }
    if !converged || !phi.is_finite() {
        return Err(WofsError::Projection(format!(
            "Albers inverse did not converge at ({}, {})",
            x, y
        )));
    }

    let lon = p.lon_0 + (theta / k.n).to_degrees();
    Ok((wrap_longitude(lon), phi.to_degrees()))
}

// ---------------------------------------------------------------------------
// Transverse Mercator, Krüger series to third order in n
// ---------------------------------------------------------------------------

struct KrugerSeries {
    big_a: f64,
    e: f64,
    alpha: [f64; 3],
    beta: [f64; 3],
    delta: [f64; 3],
}

impl KrugerSeries {
    fn new(ellipsoid: &Ellipsoid) -> Self {
        let f = ellipsoid.flattening();
        let n = f / (2.0 - f);
        let n2 = n * n;
        let n3 = n2 * n;
        Self {
            big_a: ellipsoid.a / (1.0 + n) * (1.0 + n2 / 4.0 + n2 * n2 / 64.0),
            e: ellipsoid.e2().sqrt(),
            alpha: [
                n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0,
                13.0 * n2 / 48.0 - 3.0 * n3 / 5.0,
                61.0 * n3 / 240.0,
            ],
            beta: [
                n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0,
                n2 / 48.0 + n3 / 15.0,
                17.0 * n3 / 480.0,
            ],
            delta: [
                2.0 * n - 2.0 * n2 / 3.0 - 2.0 * n3,
                7.0 * n2 / 3.0 - 8.0 * n3 / 5.0,
                56.0 * n3 / 15.0,
            ],
        }
    }
}

fn tm_forward_radians(p: &TransverseMercatorParams, k: &KrugerSeries, lam: f64, phi: f64) -> Point {
    let dl = lam - p.lon_0.to_radians();
    let s = phi.sin();
    let t = (s.atanh() - k.e * (k.e * s).atanh()).sinh();
    let xi_p = t.atan2(dl.cos());
    let eta_p = (dl.sin() / (1.0 + t * t).sqrt()).atanh();

    let mut xi = xi_p;
    let mut eta = eta_p;
    for (j, alpha) in k.alpha.iter().enumerate() {
        let m = 2.0 * (j as f64 + 1.0);
        xi += alpha * (m * xi_p).sin() * (m * eta_p).cosh();
        eta += alpha * (m * xi_p).cos() * (m * eta_p).sinh();
    }

    let scale = p.scale * k.big_a;
    (p.false_easting + scale * eta, p.false_northing + scale * xi)
}

fn tm_forward(p: &TransverseMercatorParams, lon: f64, lat: f64) -> WofsResult<Point> {
    if wrap_longitude(lon - p.lon_0).abs() >= 90.0 {
        return Err(WofsError::Projection(format!(
            "longitude {} is more than 90 degrees from the central meridian {}",
            lon, p.lon_0
        )));
    }
    let k = KrugerSeries::new(&p.ellipsoid);
    let lam = p.lon_0.to_radians() + wrap_longitude(lon - p.lon_0).to_radians();
    let (x, y) = tm_forward_radians(p, &k, lam, lat.to_radians());
    if !x.is_finite() || !y.is_finite() {
        return Err(WofsError::Projection(format!(
            "transverse Mercator undefined at ({}, {})",
            lon, lat
        )));
    }
    Ok((x, y))
}

fn tm_inverse(p: &TransverseMercatorParams, x: f64, y: f64) -> WofsResult<Point> {
    let k = KrugerSeries::new(&p.ellipsoid);
    let scale = p.scale * k.big_a;
    let xi = (y - p.false_northing) / scale;
    let eta = (x - p.false_easting) / scale;

    let mut xi_p = xi;
    let mut eta_p = eta;
    for (j, beta) in k.beta.iter().enumerate() {
        let m = 2.0 * (j as f64 + 1.0);
        xi_p -= beta * (m * xi).sin() * (m * eta).cosh();
        eta_p -= beta * (m * xi).cos() * (m * eta).sinh();
    }
    let chi = (xi_p.sin() / eta_p.cosh()).asin();
    let mut phi = chi;
    for (j, delta) in k.delta.iter().enumerate() {
        phi += delta * (2.0 * (j as f64 + 1.0) * chi).sin();
    }
    let mut lam = p.lon_0.to_radians() + eta_p.sinh().atan2(xi_p.cos());

    // Polish against the forward series so the pair is an exact inverse
    const H: f64 = 1e-8;
    for _ in 0..8 {
        let (fx, fy) = tm_forward_radians(p, &k, lam, phi);
        let (rx, ry) = (x - fx, y - fy);
        if rx.abs() < 1e-9 && ry.abs() < 1e-9 {
            break;
        }
        let (fx_l, fy_l) = tm_forward_radians(p, &k, lam + H, phi);
        let (fx_p, fy_p) = tm_forward_radians(p, &k, lam, phi + H);
        let (j11, j21) = ((fx_l - fx) / H, (fy_l - fy) / H);
        let (j12, j22) = ((fx_p - fx) / H, (fy_p - fy) / H);
        let det = j11 * j22 - j12 * j21;
        if det.abs() < f64::EPSILON {
            break;
        }
        lam += (j22 * rx - j12 * ry) / det;
        phi += (j11 * ry - j21 * rx) / det;
    }

    if !phi.is_finite() || !lam.is_finite() || phi.abs() > PI / 2.0 {
        return Err(WofsError::Projection(format!(
            "transverse Mercator inverse failed at ({}, {})",
            x, y
        )));
    }
    Ok((wrap_longitude(lam.to_degrees()), phi.to_degrees()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_from_epsg() {
        assert!(Crs::from_epsg(4326).unwrap().is_geographic());
        assert_eq!(Crs::from_epsg(3577).unwrap(), Crs::australian_albers());
        match Crs::from_epsg(32755).unwrap() {
            Crs::TransverseMercator { params, .. } => {
                assert_eq!(params.lon_0, 147.0);
                assert_eq!(params.false_northing, 10_000_000.0);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(Crs::from_epsg(2193), Err(WofsError::UnsupportedCrs(_))));
    }

    #[test]
    fn test_albers_origin() {
        // Central meridian on the equator is the projection origin
        let (x, y) = Crs::australian_albers().from_geographic((132.0, 0.0)).unwrap();
        assert_abs_diff_eq!(x, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_albers_known_point() {
        // Canberra, approximately (1549000, -3960000) in EPSG:3577
        let (x, y) = Crs::australian_albers().from_geographic((149.13, -35.28)).unwrap();
        assert!((x - 1_549_000.0).abs() < 5_000.0, "x = {}", x);
        assert!((y - -3_960_000.0).abs() < 10_000.0, "y = {}", y);
    }

    #[test]
    fn test_utm_central_meridian() {
        let crs = Crs::from_epsg(32755).unwrap();
        let (x, y) = crs.from_geographic((147.0, 0.0)).unwrap();
        assert_abs_diff_eq!(x, 500_000.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y, 10_000_000.0, epsilon = 1e-6);
    }

    #[test]
    fn test_albers_round_trip() {
        let crs = Crs::australian_albers();
        for &(x, y) in &[(-1_500_000.0, -2_000_000.0), (0.0, -4_500_000.0), (2_000_000.0, -1_000_000.0)] {
            let geo = crs.to_geographic((x, y)).unwrap();
            let back = crs.from_geographic(geo).unwrap();
            assert_abs_diff_eq!(back.0, x, epsilon = 1e-6);
            assert_abs_diff_eq!(back.1, y, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_vector_between_same_crs() {
        let crs = Crs::australian_albers();
        let (p, v) = vector_to_crs((10.0, 20.0), (0.0, 100.0), &crs, &crs).unwrap();
        assert_eq!(p, (10.0, 20.0));
        assert_eq!(v, (0.0, 100.0));
    }
}
