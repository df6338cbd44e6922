//! Buffered ride geometry.
//!
//! A [`Corridor`] is the set of points within `tolerance` degrees of a ride's
//! path: the region a round-capped buffer of the path polyline would cover.
//! Buffering once per ride turns "the path came near the pass" into "the
//! corridor contains the pass", a single predicate that can be pre-filtered
//! with bounding boxes.
//!
//! The buffer is kept analytic (line plus radius) rather than polygonized,
//! so containment is exact and does not depend on arc segmentation.

use geo::{Closest, ClosestPoint, Coord, LineString};
use rstar::AABB;

use crate::geo_utils::{planar_distance, segment_envelope, to_coord, to_point};
use crate::{Bounds, GpsPoint};

/// A ride path buffered by a fixed planar tolerance.
#[derive(Debug, Clone)]
pub struct Corridor {
    line: LineString<f64>,
    tolerance: f64,
    bounds: Bounds,
}

impl Corridor {
    /// Buffer a path by `tolerance` degrees.
    ///
    /// Returns `None` for degenerate paths (fewer than 2 points).
    ///
    /// # Example
    /// ```
    /// use col_hunter::{Corridor, GpsPoint};
    ///
    /// let path = vec![GpsPoint::new(45.0, 6.0), GpsPoint::new(45.0, 6.01)];
    /// let corridor = Corridor::from_path(&path, 0.001).unwrap();
    ///
    /// assert!(corridor.contains(&GpsPoint::new(45.0005, 6.005)));
    /// assert!(!corridor.contains(&GpsPoint::new(45.002, 6.005)));
    /// assert!(Corridor::from_path(&path[..1], 0.001).is_none());
    /// ```
    pub fn from_path(path: &[GpsPoint], tolerance: f64) -> Option<Self> {
        if path.len() < 2 {
            return None;
        }

        let bounds = Bounds::from_points(path)?.expand(tolerance);
        let line: LineString<f64> = path.iter().map(to_coord).collect();

        Some(Self {
            line,
            tolerance,
            bounds,
        })
    }

    /// Buffer radius in degrees.
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Bounding box of the whole corridor (path bounds plus tolerance).
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Planar distance in degrees from `point` to the path.
    pub fn distance_to(&self, point: &GpsPoint) -> f64 {
        let target = to_point(point);
        match self.line.closest_point(&target) {
            Closest::Intersection(p) | Closest::SinglePoint(p) => planar_distance(p.0, target.0),
            // Every segment has zero length: the rider never moved.
            Closest::Indeterminate => self
                .line
                .0
                .first()
                .map(|c| planar_distance(*c, target.0))
                .unwrap_or(f64::INFINITY),
        }
    }

    /// Distance from `point` to the path if the corridor contains it.
    pub fn offset(&self, point: &GpsPoint) -> Option<f64> {
        if !self.bounds.contains(point) {
            return None;
        }
        let distance = self.distance_to(point);
        (distance <= self.tolerance).then_some(distance)
    }

    /// Whether the corridor contains `point`.
    pub fn contains(&self, point: &GpsPoint) -> bool {
        self.offset(point).is_some()
    }

    /// Envelopes of each path segment grown by the tolerance.
    ///
    /// Their union covers the corridor. Querying per segment keeps long rides
    /// from pulling in every pass inside their overall bounding box.
    pub fn segment_envelopes(&self) -> impl Iterator<Item = AABB<[f64; 2]>> + '_ {
        self.line
            .0
            .windows(2)
            .map(move |w: &[Coord]| segment_envelope(w[0], w[1], self.tolerance))
    }
}
