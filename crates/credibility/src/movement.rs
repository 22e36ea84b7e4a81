//! Plausibility of movement between two observed positions.

use geomark_core::Coordinate;

const MS_PER_HOUR: f64 = 3_600_000.0;

/// `(distance below km, maximum plausible km/h)`, ascending
const SPEED_BUCKETS: [(f64, f64); 5] = [
    (1.0, 10.0),
    (10.0, 50.0),
    (100.0, 120.0),
    (500.0, 200.0),
    (1_000.0, 700.0),
];

/// Ceiling for anything farther than the last bucket
const LONG_HAUL_KMH: f64 = 900.0;

/// Highest believable average speed for a trip of `distance_km`
pub fn max_plausible_speed_kmh(distance_km: f64) -> f64 {
    SPEED_BUCKETS
        .iter()
        .find(|(limit, _)| distance_km < *limit)
        .map(|(_, speed)| *speed)
        .unwrap_or(LONG_HAUL_KMH)
}

/// Whether getting from `from` at `from_ms` to `to` at `to_ms` is implausible
pub fn is_unrealistic(from: &Coordinate, from_ms: u64, to: &Coordinate, to_ms: u64) -> bool {
    let distance_km = from.haversine_distance(to) / 1_000.0;
    if distance_km == 0.0 {
        return false;
    }
    let elapsed_hours = to_ms.saturating_sub(from_ms) as f64 / MS_PER_HOUR;
    if elapsed_hours == 0.0 {
        return true;
    }
    distance_km / elapsed_hours > max_plausible_speed_kmh(distance_km)
}
