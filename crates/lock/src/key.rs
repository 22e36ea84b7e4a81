//! Lock keys.
//!
//! Area keys are geohash cells, marker keys are aggregate identities. The
//! two namespaces are prefixed so a geohash can never collide with an id.

use geomark_core::{geohash, geohash_cell_size, Coordinate};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey(String);

impl LockKey {
    /// Key for the geohash cell containing `coordinate`
    pub fn area(coordinate: &Coordinate, precision: usize) -> Self {
        Self(format!("area:{}", geohash(coordinate, precision)))
    }

    /// Keys for every geohash cell touched by the box around `center`.
    ///
    /// Two writers whose radii overlap share at least one of these keys,
    /// even when their centers fall into neighbouring cells.
    pub fn areas_around(center: &Coordinate, radius_m: f64, precision: usize) -> Vec<Self> {
        let bounds = center.bounding_box(radius_m);
        let (cell_width, cell_height) = geohash_cell_size(precision);
        let latitudes = samples(bounds.south, bounds.north, cell_height);

        let mut keys = Vec::new();
        for (west, east) in bounds.longitude_ranges() {
            for longitude in samples(west, east, cell_width) {
                for latitude in &latitudes {
                    let corner = Coordinate {
                        longitude,
                        latitude: *latitude,
                    };
                    keys.push(Self::area(&corner, precision));
                }
            }
        }
        keys.sort();
        keys.dedup();
        keys
    }

    /// Key for one aggregate
    pub fn marker(id: impl fmt::Display) -> Self {
        Self(format!("marker:{}", id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Points from `from` to `to` spaced one cell apart, `to` included, so
/// every cell the interval crosses holds at least one of them
fn samples(from: f64, to: f64, step: f64) -> Vec<f64> {
    let mut points = Vec::new();
    let mut value = from;
    while value < to {
        points.push(value);
        value += step;
    }
    points.push(to);
    points
}

/// Render a key set for logs and errors
pub(crate) fn describe(keys: &[LockKey]) -> String {
    keys.iter()
        .map(LockKey::as_str)
        .collect::<Vec<_>>()
        .join(",")
}
