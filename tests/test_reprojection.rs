use approx::assert_relative_eq;
use chrono::{TimeZone, Utc};
use wofs::core::{transform_point, vector_to_crs, Crs};
use wofs::{GeoBox, GeoTransform, SolarGeometry, WofsError};

fn round_trip(point: (f64, f64), vector: (f64, f64), a: &Crs, b: &Crs) {
    let (p, v) = vector_to_crs(point, vector, a, b).expect("Failed to map into target CRS");
    let (back, v_back) = vector_to_crs(p, v, b, a).expect("Failed to map back");

    assert_relative_eq!(back.0, point.0, epsilon = 1e-6, max_relative = 1e-6);
    assert_relative_eq!(back.1, point.1, epsilon = 1e-6, max_relative = 1e-6);
    assert_relative_eq!(v_back.0, vector.0, epsilon = 1e-6, max_relative = 1e-6);
    assert_relative_eq!(v_back.1, vector.1, epsilon = 1e-6, max_relative = 1e-6);
}

#[test]
fn test_albers_grid_round_trip() {
    let albers = Crs::from_epsg(3577).expect("Failed to build EPSG:3577");
    let wgs84 = Crs::from_epsg(4326).expect("Failed to build EPSG:4326");

    let mut checked = 0;
    for i in 0..=8 {
        for j in 0..=8 {
            let x = -1_500_000.0 + 500_000.0 * i as f64;
            let y = -5_000_000.0 + 500_000.0 * j as f64;
            for vector in [(0.0, 100.0), (100.0, 0.0), (-100.0, 37.5), (25.0, -25.0)] {
                round_trip((x, y), vector, &albers, &wgs84);
                checked += 1;
            }
        }
    }
    println!("Checked {} Albers point/vector round trips", checked);
}

#[test]
fn test_utm_round_trip() {
    let wgs84 = Crs::wgs84();
    for (epsg, lon) in [(32755, 147.0), (32750, 115.5), (28356, 152.9), (7855, 144.96)] {
        let utm = Crs::from_epsg(epsg).expect("Failed to build UTM CRS");
        for lat in [-10.0, -25.0, -37.8, -43.0] {
            let (x, y) = transform_point((lon, lat), &wgs84, &utm).expect("Failed to project");
            round_trip((x, y), (0.0, 100.0), &utm, &wgs84);
            round_trip((x, y), (-60.0, 80.0), &utm, &wgs84);
        }
    }
}

#[test]
fn test_albers_to_utm_round_trip() {
    let albers = Crs::australian_albers();
    let utm = Crs::from_epsg(32755).expect("Failed to build UTM CRS");
    round_trip((1_200_000.0, -4_200_000.0), (100.0, 100.0), &albers, &utm);
}

#[test]
fn test_known_albers_coordinate() {
    // Canberra
    let albers = Crs::australian_albers();
    let (x, y) = transform_point((149.13, -35.28), &Crs::wgs84(), &albers).expect("Failed to project");
    assert!((x - 1_550_570.0).abs() < 50.0, "x = {}", x);
    assert!((y - -3_957_368.0).abs() < 50.0, "y = {}", y);
}

#[test]
fn test_unknown_epsg() {
    assert!(matches!(Crs::from_epsg(2193), Err(WofsError::UnsupportedCrs(_))));
}

#[test]
fn test_tile_sun_follows_grid_north() {
    let _ = env_logger::builder().is_test(true).try_init();
    let time = Utc.with_ymd_and_hms(2020, 1, 15, 0, 30, 0).unwrap();

    // The same ground location on a geographic grid and on an Albers grid east of 132E
    let geographic = GeoBox::new(1, 1, GeoTransform::north_up(149.0, 0.00025, -35.0, -0.00025), Crs::wgs84());
    let centre = geographic.center();
    let albers = Crs::australian_albers();
    let (x, y) = transform_point(centre, &Crs::wgs84(), &albers).expect("Failed to project");
    let projected = GeoBox::new(1, 1, GeoTransform::north_up(x - 12.5, 25.0, y + 12.5, -25.0), albers);

    let sun_geo = SolarGeometry::for_tile(&geographic, time).expect("Failed to compute sun");
    let sun_grid = SolarGeometry::for_tile(&projected, time).expect("Failed to compute sun");

    assert_relative_eq!(sun_geo.elevation_deg, sun_grid.elevation_deg, epsilon = 1e-6);
    // Grid north points west of true north here, so grid azimuths are larger
    let rotation = (sun_grid.azimuth_deg - sun_geo.azimuth_deg).rem_euclid(360.0);
    assert!(rotation > 5.0 && rotation < 15.0, "rotation {}", rotation);
}
