//! # Geographic Utilities
//!
//! Conversions between [`GpsPoint`] and `geo` types, plus the planar distance
//! used by corridor containment.
//!
//! ## Coordinate System
//!
//! All functions expect WGS84 coordinates (latitude/longitude in degrees).
//! `geo` and `rstar` geometry is laid out as `x = longitude`, `y = latitude`.
//!
//! Corridor tolerances are planar distances in degrees, not meters. A degree
//! of longitude shrinks with latitude, so the corridor is narrower east-west
//! than north-south away from the equator. [`approx_meters`] gives the
//! north-south length for display.

use geo::{Coord, Distance, Haversine, Point};
use rstar::AABB;

use crate::GpsPoint;

/// Mean length of one degree of latitude.
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Convert a GPS point into a `geo` coordinate (`x = lng`, `y = lat`).
#[inline]
pub fn to_coord(p: &GpsPoint) -> Coord {
    Coord {
        x: p.longitude,
        y: p.latitude,
    }
}

/// Convert a GPS point into a `geo` point.
#[inline]
pub fn to_point(p: &GpsPoint) -> Point {
    Point::from(to_coord(p))
}

/// Euclidean distance between two coordinates, in degrees.
#[inline]
pub fn planar_distance(a: Coord, b: Coord) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Great-circle distance between two GPS points, in meters.
///
/// ```rust
/// use col_hunter::{GpsPoint, geo_utils};
///
/// let galibier = GpsPoint::new(45.0640, 6.4078);
/// let lautaret = GpsPoint::new(45.0350, 6.4050);
/// let d = geo_utils::haversine_distance(&galibier, &lautaret);
/// assert!(d > 3_000.0 && d < 3_500.0);
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    Haversine::distance(to_point(p1), to_point(p2))
}

/// North-south length of `degrees`, in meters.
#[inline]
pub fn approx_meters(degrees: f64) -> f64 {
    degrees * METERS_PER_DEGREE
}

/// Envelope of the segment `a`-`b`, grown by `margin` degrees on every side.
pub fn segment_envelope(a: Coord, b: Coord, margin: f64) -> AABB<[f64; 2]> {
    AABB::from_corners(
        [a.x.min(b.x) - margin, a.y.min(b.y) - margin],
        [a.x.max(b.x) + margin, a.y.max(b.y) + margin],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_coord_axis_order() {
        let c = to_coord(&GpsPoint::new(45.0, 6.0));
        assert_eq!(c.x, 6.0);
        assert_eq!(c.y, 45.0);
    }

    #[test]
    fn test_planar_distance() {
        let a = Coord { x: 6.0, y: 45.0 };
        let b = Coord { x: 6.0003, y: 45.0004 };
        assert!((planar_distance(a, b) - 0.0005).abs() < 1e-12);
        assert_eq!(planar_distance(a, a), 0.0);
    }

    #[test]
    fn test_segment_envelope_is_padded() {
        let env = segment_envelope(Coord { x: 6.1, y: 45.0 }, Coord { x: 6.0, y: 45.2 }, 0.01);
        assert_eq!(env.lower(), [6.0 - 0.01, 45.0 - 0.01]);
        assert_eq!(env.upper(), [6.1 + 0.01, 45.2 + 0.01]);
    }

    #[test]
    fn test_approx_meters() {
        let m = approx_meters(0.002);
        assert!(m > 220.0 && m < 225.0);
    }
}
