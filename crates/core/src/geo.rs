//! Geographic primitives.
//!
//! Coordinates are WGS84 degrees. Distances use the haversine great-circle
//! formula; area lock keys use geohash cells.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

const GEOHASH_ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Geographic coordinate (longitude, latitude)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Longitude in degrees (-180 to 180)
    pub longitude: f64,
    /// Latitude in degrees (-90 to 90)
    pub latitude: f64,
}

impl Coordinate {
    /// Create a validated coordinate
    ///
    /// # Returns
    /// * `Ok(Coordinate)` - Valid coordinate
    /// * `Err(CoreError::InvalidCoordinate)` - Out of range or not finite
    pub fn new(longitude: f64, latitude: f64) -> Result<Self> {
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(CoreError::InvalidCoordinate(format!(
                "Longitude must be between -180 and 180, got {}",
                longitude
            )));
        }
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(CoreError::InvalidCoordinate(format!(
                "Latitude must be between -90 and 90, got {}",
                latitude
            )));
        }
        Ok(Self {
            longitude,
            latitude,
        })
    }

    /// Great-circle distance to another coordinate in meters
    pub fn haversine_distance(&self, other: &Coordinate) -> f64 {
        let lat1_rad = self.latitude.to_radians();
        let lat2_rad = other.latitude.to_radians();
        let delta_lat = (other.latitude - self.latitude).to_radians();
        let delta_lon = (other.longitude - self.longitude).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);

        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_M * c
    }

    /// Box that contains every point within `radius_m` of this coordinate.
    ///
    /// Derived on the same sphere as [`Coordinate::haversine_distance`], so
    /// the box never cuts off a point the exact check would accept. Used as
    /// a cheap prefilter before that check.
    pub fn bounding_box(&self, radius_m: f64) -> GeoBox {
        let angular = radius_m.max(0.0) / EARTH_RADIUS_M;
        let lat = self.latitude.to_radians();
        let south = (lat - angular).to_degrees();
        let north = (lat + angular).to_degrees();

        // A box reaching a pole spans every meridian
        if north >= 90.0 || south <= -90.0 {
            return GeoBox {
                south: south.max(-90.0),
                north: north.min(90.0),
                west: -180.0,
                east: 180.0,
            };
        }

        let lon_delta = (angular.sin() / lat.cos()).min(1.0).asin().to_degrees();
        GeoBox {
            south,
            north,
            west: wrap_longitude(self.longitude - lon_delta),
            east: wrap_longitude(self.longitude + lon_delta),
        }
    }
}

/// Latitude/longitude box in degrees.
///
/// `west > east` means the box crosses the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBox {
    pub south: f64,
    pub north: f64,
    pub west: f64,
    pub east: f64,
}

impl GeoBox {
    pub fn crosses_antimeridian(&self) -> bool {
        self.west > self.east
    }

    /// Longitude intervals covered by the box, split at the antimeridian
    pub fn longitude_ranges(&self) -> Vec<(f64, f64)> {
        if self.crosses_antimeridian() {
            vec![(self.west, 180.0), (-180.0, self.east)]
        } else {
            vec![(self.west, self.east)]
        }
    }

    pub fn contains(&self, coordinate: &Coordinate) -> bool {
        (self.south..=self.north).contains(&coordinate.latitude)
            && self
                .longitude_ranges()
                .iter()
                .any(|(west, east)| (*west..=*east).contains(&coordinate.longitude))
    }
}

fn wrap_longitude(longitude: f64) -> f64 {
    if longitude < -180.0 {
        longitude + 360.0
    } else if longitude > 180.0 {
        longitude - 360.0
    } else {
        longitude
    }
}

/// Width and height in degrees of a geohash cell of `precision` characters
pub fn geohash_cell_size(precision: usize) -> (f64, f64) {
    let bits = 5 * precision as i32;
    let lon_bits = (bits + 1) / 2;
    let lat_bits = bits / 2;
    (360.0 / 2f64.powi(lon_bits), 180.0 / 2f64.powi(lat_bits))
}

/// Encode a coordinate as a geohash of `precision` characters.
///
/// Precision 8 yields cells of roughly 38m x 19m.
pub fn geohash(coordinate: &Coordinate, precision: usize) -> String {
    let mut lon_range = (-180.0_f64, 180.0_f64);
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut hash = String::with_capacity(precision);
    let mut even_bit = true;
    let mut bits = 0u8;
    let mut bit_count = 0;

    while hash.len() < precision {
        let (range, value) = if even_bit {
            (&mut lon_range, coordinate.longitude)
        } else {
            (&mut lat_range, coordinate.latitude)
        };
        let mid = (range.0 + range.1) / 2.0;
        bits <<= 1;
        if value >= mid {
            bits |= 1;
            range.0 = mid;
        } else {
            range.1 = mid;
        }
        even_bit = !even_bit;
        bit_count += 1;

        if bit_count == 5 {
            hash.push(GEOHASH_ALPHABET[bits as usize] as char);
            bits = 0;
            bit_count = 0;
        }
    }

    hash
}
