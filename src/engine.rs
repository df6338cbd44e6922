//! # Hunt Engine
//!
//! Stateful session object tying catalog, rides and match results together.
//!
//! ## Architecture
//!
//! The engine owns:
//! - The pass catalog and its spatial index
//! - The normalized rides of the session
//! - A bounded LRU of match sets keyed by a fingerprint of the inputs
//!
//! The index is rebuilt lazily after the catalog changes. Asking for the
//! matches twice without changing anything returns the same shared result
//! without touching the index again.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use lru::LruCache;
use serde::Serialize;

use crate::catalog::{load_catalog, Pass, PassId};
use crate::error::Result;
use crate::matcher::{PassIndex, PassMatch};
use crate::ride::{normalize_rides, NormalizeStats, RawRide, Ride, RideId};
use crate::summary::{
    count_by_year, overview, pass_markers, rides_bounds, summarize_by_pass, HuntOverview,
    PassMarker, PassSummary, YearCount,
};
use crate::{Bounds, MatchConfig};

// ============================================================================
// Hunt Engine
// ============================================================================

/// The session engine.
pub struct HuntEngine {
    // Core state
    passes: BTreeMap<PassId, Pass>,
    rides: Vec<Ride>,

    // Spatial index over eligible passes
    pass_index: PassIndex,
    index_dirty: bool,

    // Memoized match sets
    match_cache: LruCache<u64, Arc<Vec<PassMatch>>>,

    // Rides dropped during ingestion, over the whole session
    failed_rides: usize,

    config: MatchConfig,
}

impl HuntEngine {
    /// Create an engine with default configuration.
    pub fn new() -> Self {
        let config = MatchConfig::default();
        Self {
            passes: BTreeMap::new(),
            rides: Vec::new(),
            pass_index: PassIndex::build(&BTreeMap::new()),
            index_dirty: false,
            match_cache: LruCache::new(cache_size(config.cache_capacity)),
            failed_rides: 0,
            config,
        }
    }

    /// Create an engine with a validated configuration.
    pub fn with_config(config: MatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            match_cache: LruCache::new(cache_size(config.cache_capacity)),
            config,
            ..Self::new()
        })
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    /// Load the catalog from a CSV file, replacing the current one.
    ///
    /// Honors `restrict_to_eligible` from the configuration. Returns the
    /// number of passes loaded.
    pub fn load_catalog<P: AsRef<Path>>(&mut self, path: P) -> Result<usize> {
        let passes = load_catalog(path, self.config.restrict_to_eligible)?;
        let count = passes.len();
        self.set_passes(passes);
        Ok(count)
    }

    /// Replace the catalog.
    pub fn set_passes(&mut self, passes: BTreeMap<PassId, Pass>) {
        self.passes = passes;
        self.index_dirty = true;
    }

    pub fn passes(&self) -> &BTreeMap<PassId, Pass> {
        &self.passes
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    fn ensure_index(&mut self) {
        if !self.index_dirty {
            return;
        }
        self.pass_index = PassIndex::build(&self.passes);
        self.index_dirty = false;
    }

    // ========================================================================
    // Rides
    // ========================================================================

    /// Normalize raw rides and add them to the session.
    ///
    /// A ride whose id is already present replaces the earlier one. Rides
    /// that fail normalization are counted and skipped.
    pub fn ingest_rides(&mut self, raw: &[RawRide]) -> NormalizeStats {
        let normalized = normalize_rides(raw, &self.config);
        self.failed_rides += normalized.stats.failed;
        self.merge_rides(normalized.rides);
        normalized.stats
    }

    /// Replace every ride in the session.
    ///
    /// Corridors are re-buffered with the engine's tolerance when they were
    /// built with another one.
    pub fn set_rides(&mut self, rides: Vec<Ride>) {
        self.rides.clear();
        self.failed_rides = 0;
        self.merge_rides(rides);
    }

    fn merge_rides(&mut self, rides: Vec<Ride>) {
        let mut by_id: BTreeMap<RideId, Ride> =
            self.rides.drain(..).map(|r| (r.id, r)).collect();
        let tolerance = self.config.corridor_tolerance;
        for mut ride in rides {
            if ride.corridor.as_ref().map(|c| c.tolerance()) != Some(tolerance) {
                ride.rebuild_corridor(tolerance);
            }
            by_id.insert(ride.id, ride);
        }
        self.rides = by_id.into_values().collect();
    }

    /// Rides ordered by id.
    pub fn rides(&self) -> &[Ride] {
        &self.rides
    }

    pub fn ride(&self, id: RideId) -> Option<&Ride> {
        self.rides
            .binary_search_by_key(&id, |r| r.id)
            .ok()
            .map(|i| &self.rides[i])
    }

    pub fn ride_count(&self) -> usize {
        self.rides.len()
    }

    /// Clear catalog, rides and cached results.
    pub fn clear(&mut self) {
        self.passes.clear();
        self.rides.clear();
        self.pass_index = PassIndex::build(&self.passes);
        self.index_dirty = false;
        self.match_cache.clear();
        self.failed_rides = 0;
    }

    // ========================================================================
    // Matching
    // ========================================================================

    /// Hash of everything a match set depends on.
    fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.config.corridor_tolerance.to_bits().hash(&mut hasher);

        self.passes.len().hash(&mut hasher);
        for pass in self.passes.values() {
            pass.id.hash(&mut hasher);
            pass.eligible.hash(&mut hasher);
            pass.location.latitude.to_bits().hash(&mut hasher);
            pass.location.longitude.to_bits().hash(&mut hasher);
        }

        self.rides.len().hash(&mut hasher);
        for ride in &self.rides {
            ride.id.hash(&mut hasher);
            ride.path.len().hash(&mut hasher);
            for p in &ride.path {
                p.latitude.to_bits().hash(&mut hasher);
                p.longitude.to_bits().hash(&mut hasher);
            }
        }

        hasher.finish()
    }

    /// Match every ride against the catalog.
    ///
    /// Results are memoized: identical inputs return the cached set.
    pub fn matches(&mut self) -> Arc<Vec<PassMatch>> {
        let key = self.fingerprint();
        if let Some(hit) = self.match_cache.get(&key) {
            debug!("[HuntEngine] Match cache hit {:016x}", key);
            return Arc::clone(hit);
        }

        self.ensure_index();
        let matches = Arc::new(self.pass_index.match_rides(&self.rides));
        self.match_cache.put(key, Arc::clone(&matches));
        info!(
            "[HuntEngine] Computed {} matches ({} cached sets)",
            matches.len(),
            self.match_cache.len()
        );
        matches
    }

    /// Matches for one ride, sorted by pass id.
    pub fn matches_for_ride(&mut self, ride_id: RideId) -> Vec<PassMatch> {
        self.matches()
            .iter()
            .filter(|m| m.ride_id == ride_id)
            .copied()
            .collect()
    }

    // ========================================================================
    // Aggregations
    // ========================================================================

    pub fn pass_summaries(&mut self) -> Vec<PassSummary> {
        let matches = self.matches();
        summarize_by_pass(&self.passes, &self.rides, &matches)
    }

    pub fn year_counts(&mut self) -> Vec<YearCount> {
        let matches = self.matches();
        count_by_year(&self.rides, &matches)
    }

    pub fn overview(&mut self) -> HuntOverview {
        let summaries = self.pass_summaries();
        overview(&self.rides, &summaries)
    }

    pub fn pass_markers(&mut self) -> Vec<PassMarker> {
        let matches = self.matches();
        pass_markers(&self.passes, &matches)
    }

    pub fn ride_bounds(&self) -> Option<Bounds> {
        rides_bounds(&self.rides)
    }

    /// Pass summaries as JSON.
    pub fn summaries_json(&mut self) -> String {
        let summaries = self.pass_summaries();
        serde_json::to_string(&summaries).unwrap_or_else(|_| "[]".to_string())
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Update the configuration.
    ///
    /// A new tolerance re-buffers every ride and drops memoized match sets.
    /// `restrict_to_eligible`, `tracked_kind` and `detailed_paths` only apply
    /// to catalogs and rides loaded afterwards; the current session keeps
    /// what it already loaded.
    pub fn set_match_config(&mut self, config: MatchConfig) -> Result<()> {
        config.validate()?;
        if config.corridor_tolerance != self.config.corridor_tolerance {
            for ride in &mut self.rides {
                ride.rebuild_corridor(config.corridor_tolerance);
            }
            self.match_cache.clear();
            debug!(
                "[HuntEngine] Tolerance {} -> {}, corridors rebuilt",
                self.config.corridor_tolerance, config.corridor_tolerance
            );
        }
        if config.cache_capacity != self.config.cache_capacity {
            self.match_cache.resize(cache_size(config.cache_capacity));
        }
        self.config = config;
        Ok(())
    }

    pub fn match_config(&self) -> &MatchConfig {
        &self.config
    }

    /// Engine statistics for monitoring.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            pass_count: self.passes.len(),
            eligible_pass_count: self.passes.values().filter(|p| p.eligible).count(),
            ride_count: self.rides.len(),
            degenerate_rides: self.rides.iter().filter(|r| r.is_degenerate()).count(),
            failed_rides: self.failed_rides,
            cached_match_sets: self.match_cache.len(),
        }
    }
}

impl Default for HuntEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn cache_size(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

/// Engine statistics for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub pass_count: usize,
    pub eligible_pass_count: usize,
    pub ride_count: usize,
    pub degenerate_rides: usize,
    pub failed_rides: usize,
    pub cached_match_sets: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GpsPoint, DEFAULT_CORRIDOR_TOLERANCE};
    use chrono::NaiveDate;

    fn sample_passes() -> BTreeMap<PassId, Pass> {
        let passes = vec![
            Pass {
                id: 0,
                name: "Col du Lautaret".to_string(),
                region: "05".to_string(),
                reference_link: String::new(),
                altitude: Some(2058),
                location: GpsPoint::new(45.0353, 6.4053),
                eligible: true,
            },
            Pass {
                id: 1,
                name: "Col du Galibier".to_string(),
                region: "05".to_string(),
                reference_link: String::new(),
                altitude: Some(2642),
                location: GpsPoint::new(45.0640, 6.4078),
                eligible: true,
            },
        ];
        passes.into_iter().map(|p| (p.id, p)).collect()
    }

    fn climb(id: RideId, year: i32) -> Ride {
        let path = vec![
            GpsPoint::new(45.0300, 6.4050),
            GpsPoint::new(45.0353, 6.4053),
            GpsPoint::new(45.0640, 6.4078),
            GpsPoint::new(45.0700, 6.4100),
        ];
        let date = NaiveDate::from_ymd_opt(year, 7, 14).unwrap();
        Ride::from_path(id, "Galibier", date, path, &MatchConfig::default())
    }

    fn elsewhere(id: RideId) -> Ride {
        let path = vec![GpsPoint::new(48.85, 2.35), GpsPoint::new(48.86, 2.36)];
        let date = NaiveDate::from_ymd_opt(2022, 3, 1).unwrap();
        Ride::from_path(id, "Paris", date, path, &MatchConfig::default())
    }

    #[test]
    fn test_engine_matches() {
        let mut engine = HuntEngine::new();
        engine.set_passes(sample_passes());
        engine.set_rides(vec![climb(1, 2021), elsewhere(2)]);

        let matches = engine.matches();
        let pairs: Vec<(PassId, RideId)> =
            matches.iter().map(|m| (m.pass_id, m.ride_id)).collect();
        assert_eq!(pairs, vec![(0, 1), (1, 1)]);
    }

    #[test]
    fn test_repeated_matching_is_memoized() {
        let mut engine = HuntEngine::new();
        engine.set_passes(sample_passes());
        engine.set_rides(vec![climb(1, 2021)]);

        let first = engine.matches();
        let second = engine.matches();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.stats().cached_match_sets, 1);
    }

    #[test]
    fn test_changed_inputs_recompute() {
        let mut engine = HuntEngine::new();
        engine.set_passes(sample_passes());
        engine.set_rides(vec![climb(1, 2021)]);
        let before = engine.matches();

        engine.set_rides(vec![climb(1, 2021), climb(2, 2023)]);
        let after = engine.matches();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.len(), 4);
        assert_eq!(engine.stats().cached_match_sets, 2);

        // Back to the first input: served from the cache
        engine.set_rides(vec![climb(1, 2021)]);
        assert!(Arc::ptr_eq(&before, &engine.matches()));
    }

    #[test]
    fn test_aggregations() {
        let mut engine = HuntEngine::new();
        engine.set_passes(sample_passes());
        engine.set_rides(vec![climb(1, 2021), climb(2, 2023), elsewhere(3)]);

        let summaries = engine.pass_summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[1].name, "Col du Galibier");
        assert_eq!(summaries[1].ride_ids, vec![1, 2]);

        let years = engine.year_counts();
        assert_eq!(years.len(), 2);
        assert_eq!(years[0].year, 2021);
        assert_eq!(years[0].passages, 2);

        let o = engine.overview();
        assert_eq!(o.ride_count, 3);
        assert_eq!(o.passes_crossed, 2);
        assert_eq!(o.total_passages, 4);
        assert_eq!(o.highest_altitude, Some(2642));

        let json = engine.summaries_json();
        assert!(json.contains("Col du Galibier"));
    }

    #[test]
    fn test_set_match_config_rebuffers_rides() {
        let mut engine = HuntEngine::new();
        engine.set_passes(sample_passes());
        // Passes 0.003 degrees east of the path
        let path = vec![GpsPoint::new(45.0300, 6.4023), GpsPoint::new(45.0700, 6.4023)];
        let date = NaiveDate::from_ymd_opt(2022, 6, 1).unwrap();
        engine.set_rides(vec![Ride::from_path(
            9,
            "west",
            date,
            path,
            &MatchConfig::default(),
        )]);
        assert!(engine.matches().is_empty());

        let wider = MatchConfig {
            corridor_tolerance: 0.01,
            ..MatchConfig::default()
        };
        engine.set_match_config(wider).unwrap();
        assert_eq!(engine.stats().cached_match_sets, 0);
        assert_eq!(engine.matches().len(), 2);

        let invalid = MatchConfig {
            corridor_tolerance: -1.0,
            ..MatchConfig::default()
        };
        assert!(engine.set_match_config(invalid).is_err());
        assert_eq!(engine.match_config().corridor_tolerance, 0.01);
    }

    #[test]
    fn test_ingest_replaces_same_id() {
        let mut engine = HuntEngine::new();
        engine.set_rides(vec![climb(5, 2021)]);
        engine.set_rides(vec![climb(5, 2022), climb(3, 2020)]);
        assert_eq!(engine.ride_count(), 2);
        assert_eq!(engine.ride(5).unwrap().start_year, 2022);
        assert_eq!(engine.rides()[0].id, 3);
        assert!(engine.ride(4).is_none());
    }

    #[test]
    fn test_stats_and_clear() {
        let mut engine = HuntEngine::new();
        engine.set_passes(sample_passes());
        let date = NaiveDate::from_ymd_opt(2022, 6, 1).unwrap();
        let lone = Ride::from_path(
            7,
            "lone",
            date,
            vec![GpsPoint::new(45.0, 6.0)],
            &MatchConfig::default(),
        );
        engine.set_rides(vec![climb(1, 2021), lone]);

        let stats = engine.stats();
        assert_eq!(stats.pass_count, 2);
        assert_eq!(stats.eligible_pass_count, 2);
        assert_eq!(stats.ride_count, 2);
        assert_eq!(stats.degenerate_rides, 1);

        engine.matches();
        engine.clear();
        let stats = engine.stats();
        assert_eq!(stats.ride_count, 0);
        assert_eq!(stats.cached_match_sets, 0);
        assert!(engine.matches().is_empty());
    }

    #[test]
    fn test_set_rides_uses_engine_tolerance() {
        let mut engine = HuntEngine::new();
        engine.set_passes(sample_passes());
        // Lautaret sits 0.003 degrees east of this path
        let path = vec![GpsPoint::new(45.0300, 6.4023), GpsPoint::new(45.0400, 6.4023)];
        let date = NaiveDate::from_ymd_opt(2022, 6, 1).unwrap();
        let wide = MatchConfig {
            corridor_tolerance: 0.01,
            ..MatchConfig::default()
        };

        engine.set_rides(vec![Ride::from_path(9, "wide", date, path.clone(), &wide)]);
        let corridor_tolerance = engine.ride(9).unwrap().corridor.as_ref().unwrap().tolerance();
        assert_eq!(corridor_tolerance, DEFAULT_CORRIDOR_TOLERANCE);
        assert!(engine.matches().is_empty());

        engine.set_rides(vec![Ride::from_path(
            9,
            "narrow",
            date,
            path,
            &MatchConfig::default(),
        )]);
        assert!(engine.matches().is_empty());
    }

    #[test]
    fn test_load_options_leave_current_session_alone() {
        let mut engine = HuntEngine::new();
        engine.set_passes(sample_passes());
        engine.set_rides(vec![climb(1, 2021)]);

        engine
            .set_match_config(MatchConfig {
                restrict_to_eligible: false,
                detailed_paths: true,
                ..MatchConfig::default()
            })
            .unwrap();
        assert!(!engine.match_config().restrict_to_eligible);
        assert_eq!(engine.pass_count(), 2);
        assert_eq!(engine.ride_count(), 1);
        assert_eq!(engine.matches().len(), 2);
    }

    #[test]
    fn test_ride_bounds_cover_all_rides() {
        let mut engine = HuntEngine::new();
        assert!(engine.ride_bounds().is_none());

        engine.set_rides(vec![climb(1, 2021), elsewhere(2)]);
        let bounds = engine.ride_bounds().unwrap();
        assert_eq!(bounds.min_lat, 45.03);
        assert_eq!(bounds.max_lat, 48.86);
        assert_eq!(bounds.min_lng, 2.35);
        assert_eq!(bounds.max_lng, 6.41);
    }

    #[test]
    fn test_with_config_rejects_invalid() {
        let config = MatchConfig {
            tracked_kind: String::new(),
            ..MatchConfig::default()
        };
        assert!(HuntEngine::with_config(config).is_err());
    }
}
