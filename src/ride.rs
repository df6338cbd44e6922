//! Ride normalization.
//!
//! Turns raw activity records (Strava summary-activity JSON) into [`Ride`]s:
//! filters out activities that are not rides, decodes the polyline, checks
//! coordinates and buffers the path into a [`Corridor`].
//!
//! Failures are per-ride. An undecodable polyline or an out-of-range
//! coordinate drops that ride and is tallied in [`NormalizeStats`]; the rest
//! of the batch is unaffected. Degenerate rides (fewer than 2 points) are not
//! failures: they are kept, counted, and simply never match anything.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::corridor::Corridor;
use crate::error::{ColHunterError, Result};
use crate::geo_utils::haversine_distance;
use crate::{GpsPoint, MatchConfig};

/// Activity identifier from the source system.
pub type RideId = u64;

/// Polyline precision used by Strava (1e5).
pub const POLYLINE_PRECISION: u32 = 5;

/// Map block of a raw activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RideMap {
    #[serde(default)]
    pub id: Option<String>,
    /// Reduced-resolution path, present on listed activities
    #[serde(default)]
    pub summary_polyline: Option<String>,
    /// Full-resolution path, present on detailed activities
    #[serde(default)]
    pub polyline: Option<String>,
}

/// An activity as returned by the ride source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRide {
    pub id: RideId,
    #[serde(default)]
    pub name: String,
    /// Distance in meters
    #[serde(default)]
    pub distance: f64,
    /// Elevation gain in meters
    #[serde(default)]
    pub total_elevation_gain: f64,
    /// Activity type (e.g., "Ride", "Run")
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub sport_type: Option<String>,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub start_date_local: Option<String>,
    #[serde(default)]
    pub map: RideMap,
}

impl RawRide {
    /// Encoded path to decode: the detailed polyline when requested and
    /// available, the summary polyline otherwise.
    pub fn encoded_path(&self, detailed: bool) -> &str {
        let detailed_path = if detailed {
            self.map.polyline.as_deref().filter(|s| !s.is_empty())
        } else {
            None
        };
        detailed_path
            .or(self.map.summary_polyline.as_deref())
            .unwrap_or("")
    }
}

/// A normalized ride ready for matching.
#[derive(Debug, Clone)]
pub struct Ride {
    pub id: RideId,
    pub title: String,
    /// Distance in meters
    pub distance: f64,
    /// Elevation gain in meters
    pub elevation_gain: f64,
    pub activity_kind: String,
    /// UTC calendar date of the start
    pub start_date: NaiveDate,
    pub start_year: i32,
    pub path: Vec<GpsPoint>,
    /// `None` for degenerate rides
    pub corridor: Option<Corridor>,
}

impl Ride {
    /// Build a ride directly from a decoded path.
    ///
    /// Distance is the great-circle length of the path; the kind is the
    /// configured tracked kind.
    pub fn from_path(
        id: RideId,
        title: &str,
        start_date: NaiveDate,
        path: Vec<GpsPoint>,
        config: &MatchConfig,
    ) -> Self {
        let distance = path
            .windows(2)
            .map(|w| haversine_distance(&w[0], &w[1]))
            .sum();
        let corridor = Corridor::from_path(&path, config.corridor_tolerance);
        Self {
            id,
            title: title.to_string(),
            distance,
            elevation_gain: 0.0,
            activity_kind: config.tracked_kind.clone(),
            start_date,
            start_year: start_date.year(),
            path,
            corridor,
        }
    }

    /// Whether the ride has no usable geometry.
    pub fn is_degenerate(&self) -> bool {
        self.corridor.is_none()
    }

    /// Re-buffer the stored path with a new tolerance.
    pub fn rebuild_corridor(&mut self, tolerance: f64) {
        self.corridor = Corridor::from_path(&self.path, tolerance);
    }

    /// Public activity page of this ride.
    pub fn url(&self) -> String {
        format!("https://www.strava.com/activities/{}", self.id)
    }
}

/// Per-batch normalization tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeStats {
    /// Raw records received
    pub received: usize,
    /// Activities of another kind, filtered before normalization
    pub skipped_kind: usize,
    /// Rides kept with a corridor
    pub normalized: usize,
    /// Rides kept without geometry (fewer than 2 points)
    pub degenerate: usize,
    /// Rides dropped because their path could not be decoded or validated
    pub failed: usize,
}

/// Output of [`normalize_rides`].
#[derive(Debug, Clone, Default)]
pub struct NormalizedRides {
    pub rides: Vec<Ride>,
    pub stats: NormalizeStats,
}

/// Decode a polyline into `(lat, lng)` points.
///
/// An empty string decodes to an empty path.
pub fn decode_path(encoded: &str) -> std::result::Result<Vec<GpsPoint>, String> {
    if encoded.is_empty() {
        return Ok(Vec::new());
    }
    let line =
        polyline::decode_polyline(encoded, POLYLINE_PRECISION).map_err(|e| e.to_string())?;
    Ok(line.coords().map(|c| GpsPoint::new(c.y, c.x)).collect())
}

/// Reject paths holding coordinates outside the WGS84 range.
pub fn validate_path(ride_id: RideId, path: &[GpsPoint]) -> Result<()> {
    match path.iter().enumerate().find(|(_, p)| !p.is_valid()) {
        Some((index, bad)) => Err(ColHunterError::InvalidCoordinates {
            ride_id,
            message: format!(
                "point {} at ({}, {}) is out of range",
                index, bad.latitude, bad.longitude
            ),
        }),
        None => Ok(()),
    }
}

/// Normalize a single raw ride.
///
/// Does not apply the kind filter; see [`normalize_rides`].
pub fn normalize_ride(raw: &RawRide, config: &MatchConfig) -> Result<Ride> {
    let path = decode_path(raw.encoded_path(config.detailed_paths)).map_err(|message| {
        ColHunterError::PolylineDecode {
            ride_id: raw.id,
            message,
        }
    })?;

    validate_path(raw.id, &path)?;

    let corridor = Corridor::from_path(&path, config.corridor_tolerance);
    let start_date = raw.start_date.date_naive();

    Ok(Ride {
        id: raw.id,
        title: raw.name.clone(),
        distance: raw.distance,
        elevation_gain: raw.total_elevation_gain,
        activity_kind: raw.kind.clone(),
        start_date,
        start_year: start_date.year(),
        path,
        corridor,
    })
}

/// Normalize a batch of raw rides.
///
/// Activities whose kind differs from `config.tracked_kind` are skipped.
/// Rides that fail normalization are dropped and counted; the order of the
/// surviving rides follows the input.
pub fn normalize_rides(raw: &[RawRide], config: &MatchConfig) -> NormalizedRides {
    let mut stats = NormalizeStats {
        received: raw.len(),
        ..NormalizeStats::default()
    };

    let tracked: Vec<&RawRide> = raw
        .iter()
        .filter(|r| r.kind == config.tracked_kind)
        .collect();
    stats.skipped_kind = raw.len() - tracked.len();

    #[cfg(feature = "parallel")]
    let results: Vec<Result<Ride>> = tracked
        .par_iter()
        .map(|r| normalize_ride(r, config))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let results: Vec<Result<Ride>> = tracked
        .iter()
        .map(|r| normalize_ride(r, config))
        .collect();

    let mut rides = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(ride) => {
                if ride.is_degenerate() {
                    debug!(
                        "[Normalizer] Ride {} has {} points, no corridor",
                        ride.id,
                        ride.path.len()
                    );
                    stats.degenerate += 1;
                } else {
                    stats.normalized += 1;
                }
                rides.push(ride);
            }
            Err(e) => {
                warn!("[Normalizer] Dropping ride: {}", e);
                stats.failed += 1;
            }
        }
    }

    info!(
        "[Normalizer] {} received, {} skipped (kind), {} normalized, {} degenerate, {} failed",
        stats.received, stats.skipped_kind, stats.normalized, stats.degenerate, stats.failed
    );

    NormalizedRides { rides, stats }
}
