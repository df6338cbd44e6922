//! # Col Hunter
//!
//! Finds which mountain passes ("cols") a cyclist rode over, given a catalog
//! of pass locations and a history of GPS rides.
//!
//! This library provides:
//! - Catalog loading from CSV with up-front column validation
//! - Ride normalization from encoded polylines into buffered corridors
//! - Pass matching through an R-tree over pass points
//! - Per-pass and per-year aggregation of matches
//! - A memoizing engine that ties the pipeline together for one session
//!
//! ## Features
//!
//! - **`parallel`** - Normalize and match rides in parallel with rayon
//! - **`http`** - Strava OAuth and paginated ride fetching
//! - **`cli`** - The `col-hunter` command-line driver
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use col_hunter::{match_passes, GpsPoint, Pass, Ride, MatchConfig};
//!
//! let pass = Pass {
//!     id: 0,
//!     name: "Col du Galibier".to_string(),
//!     region: "05".to_string(),
//!     reference_link: String::new(),
//!     altitude: Some(2642),
//!     location: GpsPoint::new(45.0640, 6.4078),
//!     eligible: true,
//! };
//! let passes = BTreeMap::from([(pass.id, pass)]);
//!
//! let path = vec![
//!     GpsPoint::new(45.0600, 6.4050),
//!     GpsPoint::new(45.0641, 6.4079),
//!     GpsPoint::new(45.0700, 6.4100),
//! ];
//! let date = chrono::NaiveDate::from_ymd_opt(2023, 7, 14).unwrap();
//! let ride = Ride::from_path(42, "Galibier", date, path, &MatchConfig::default());
//!
//! let matches = match_passes(&passes, &[ride]);
//! assert_eq!(matches.len(), 1);
//! assert_eq!(matches[0].ride_id, 42);
//! ```

use rstar::AABB;
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{ColHunterError, OptionExt, Result};

// Geographic utilities (planar and great-circle distances)
pub mod geo_utils;

// Pass catalog loading
pub mod catalog;
pub use catalog::{load_catalog, load_catalog_from_reader, Pass, PassId};

// Buffered ride geometry
pub mod corridor;
pub use corridor::Corridor;

// Ride normalization (polyline decoding, kind filter, corridor building)
pub mod ride;
pub use ride::{
    decode_path, normalize_ride, normalize_rides, NormalizeStats, NormalizedRides, RawRide,
    Ride, RideId, RideMap,
};

// Pass matching (spatial join)
pub mod matcher;
pub use matcher::{match_passes, PassIndex, PassMatch};

// Aggregated views over matches
pub mod summary;
pub use summary::{
    count_by_year, overview, pass_markers, rides_bounds, summarize_by_pass, HuntOverview,
    PassMarker, PassSummary, YearCount,
};

// Session engine with memoized match sets
pub mod engine;
pub use engine::{EngineStats, HuntEngine};

// Strava OAuth and ride fetching
#[cfg(feature = "http")]
pub mod auth;
#[cfg(feature = "http")]
pub use auth::{StravaAuth, StravaCredentials, TokenSet};

#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::{ProgressCallback, StravaFetcher};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use col_hunter::GpsPoint;
/// let point = GpsPoint::new(45.0640, 6.4078); // Galibier
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }

    /// Grow the box by `margin` degrees on every side.
    pub fn expand(&self, margin: f64) -> Self {
        Self {
            min_lat: self.min_lat - margin,
            max_lat: self.max_lat + margin,
            min_lng: self.min_lng - margin,
            max_lng: self.max_lng + margin,
        }
    }

    /// Smallest box covering both.
    pub fn union(&self, other: &Bounds) -> Self {
        Self {
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
            min_lng: self.min_lng.min(other.min_lng),
            max_lng: self.max_lng.max(other.max_lng),
        }
    }

    pub fn contains(&self, point: &GpsPoint) -> bool {
        point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
            && point.longitude >= self.min_lng
            && point.longitude <= self.max_lng
    }

    /// R-tree envelope in `[lng, lat]` order.
    pub fn envelope(&self) -> AABB<[f64; 2]> {
        AABB::from_corners([self.min_lng, self.min_lat], [self.max_lng, self.max_lat])
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Buffer radius around a ride path, in degrees (~150-220 m at alpine latitudes).
pub const DEFAULT_CORRIDOR_TOLERANCE: f64 = 0.002;

/// Activity type that counts as a ride.
pub const DEFAULT_TRACKED_KIND: &str = "Ride";

/// Configuration for normalization and matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Corridor radius in degrees. A pass matches when its point lies within
    /// this planar distance of the ride path.
    /// Default: 0.002
    pub corridor_tolerance: f64,

    /// Only activities of this type are normalized and matched.
    /// Default: "Ride"
    pub tracked_kind: String,

    /// Drop passes flagged as not reachable by bike when loading the catalog.
    /// Default: true
    pub restrict_to_eligible: bool,

    /// Prefer the full-resolution polyline over the summary one when present.
    /// Default: false
    pub detailed_paths: bool,

    /// Number of memoized match sets kept by the engine.
    /// Default: 8
    pub cache_capacity: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            corridor_tolerance: DEFAULT_CORRIDOR_TOLERANCE,
            tracked_kind: DEFAULT_TRACKED_KIND.to_string(),
            restrict_to_eligible: true,
            detailed_paths: false,
            cache_capacity: 8,
        }
    }
}

impl MatchConfig {
    /// Check that the configuration can drive a session.
    pub fn validate(&self) -> Result<()> {
        if !self.corridor_tolerance.is_finite() || self.corridor_tolerance <= 0.0 {
            return Err(ColHunterError::ConfigError {
                message: format!(
                    "corridor tolerance must be a positive number of degrees, got {}",
                    self.corridor_tolerance
                ),
            });
        }
        if self.corridor_tolerance >= 1.0 {
            return Err(ColHunterError::ConfigError {
                message: format!(
                    "corridor tolerance of {} degrees is wider than any pass approach",
                    self.corridor_tolerance
                ),
            });
        }
        if self.tracked_kind.trim().is_empty() {
            return Err(ColHunterError::ConfigError {
                message: "tracked activity kind is empty".to_string(),
            });
        }
        if self.cache_capacity == 0 {
            return Err(ColHunterError::ConfigError {
                message: "cache capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
