//! Pass matching: a spatial join of ride corridors against pass points.
//!
//! Pass points go into an R-tree once. Each ride corridor queries it with
//! the padded envelope of every path segment, then confirms each candidate
//! with exact corridor containment. A pass reached through several segments
//! (an out-and-back ride, a loop closing on itself) is collected once per
//! ride.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::catalog::{Pass, PassId};
use crate::ride::{Ride, RideId};
use crate::GpsPoint;

/// A pass crossed by a ride.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PassMatch {
    pub pass_id: PassId,
    pub ride_id: RideId,
    /// Closest approach of the ride path to the pass, in degrees
    pub offset: f64,
}

/// A pass point in the R-tree.
#[derive(Debug, Clone, Copy)]
struct IndexedPass {
    id: PassId,
    location: GpsPoint,
}

impl RTreeObject for IndexedPass {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.location.longitude, self.location.latitude])
    }
}

/// Spatial index over the eligible passes of a catalog.
#[derive(Debug)]
pub struct PassIndex {
    tree: RTree<IndexedPass>,
}

impl PassIndex {
    /// Index every eligible pass. Ineligible passes never match.
    pub fn build(passes: &BTreeMap<PassId, Pass>) -> Self {
        let indexed: Vec<IndexedPass> = passes
            .values()
            .filter(|p| p.eligible)
            .map(|p| IndexedPass {
                id: p.id,
                location: p.location,
            })
            .collect();

        debug!(
            "[Matcher] Indexed {} of {} passes",
            indexed.len(),
            passes.len()
        );

        Self {
            tree: RTree::bulk_load(indexed),
        }
    }

    /// Number of indexed passes.
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Passes whose location lies in `ride`'s corridor.
    ///
    /// Degenerate rides match nothing. Output is sorted by pass id.
    pub fn match_ride(&self, ride: &Ride) -> Vec<PassMatch> {
        let Some(corridor) = ride.corridor.as_ref() else {
            return Vec::new();
        };

        let mut candidates: BTreeMap<PassId, GpsPoint> = BTreeMap::new();
        for envelope in corridor.segment_envelopes() {
            for pass in self.tree.locate_in_envelope(&envelope) {
                candidates.entry(pass.id).or_insert(pass.location);
            }
        }

        candidates
            .into_iter()
            .filter_map(|(pass_id, location)| {
                corridor.offset(&location).map(|offset| PassMatch {
                    pass_id,
                    ride_id: ride.id,
                    offset,
                })
            })
            .collect()
    }

    /// Match every ride against the index.
    ///
    /// Output is sorted by `(pass_id, ride_id)` with at most one match per
    /// pair, so repeated runs over the same inputs are identical.
    pub fn match_rides(&self, rides: &[Ride]) -> Vec<PassMatch> {
        if self.is_empty() || rides.is_empty() {
            return Vec::new();
        }

        #[cfg(feature = "parallel")]
        let per_ride: Vec<Vec<PassMatch>> =
            rides.par_iter().map(|r| self.match_ride(r)).collect();

        #[cfg(not(feature = "parallel"))]
        let per_ride: Vec<Vec<PassMatch>> = rides.iter().map(|r| self.match_ride(r)).collect();

        let mut matches: Vec<PassMatch> = per_ride.into_iter().flatten().collect();
        matches.sort_by(|a, b| {
            (a.pass_id, a.ride_id)
                .cmp(&(b.pass_id, b.ride_id))
                .then(a.offset.total_cmp(&b.offset))
        });
        // Same ride listed twice: keep the closest approach
        matches.dedup_by_key(|m| (m.pass_id, m.ride_id));

        let distinct_passes: BTreeSet<PassId> = matches.iter().map(|m| m.pass_id).collect();
        info!(
            "[Matcher] {} rides x {} passes -> {} matches over {} passes",
            rides.len(),
            self.len(),
            matches.len(),
            distinct_passes.len()
        );

        matches
    }
}

/// Match rides against a pass catalog.
///
/// Builds a [`PassIndex`] and joins every ride corridor against it. Empty
/// inputs produce an empty result.
pub fn match_passes(passes: &BTreeMap<PassId, Pass>, rides: &[Ride]) -> Vec<PassMatch> {
    PassIndex::build(passes).match_rides(rides)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MatchConfig;
    use chrono::NaiveDate;

    fn pass(id: PassId, lat: f64, lng: f64, eligible: bool) -> Pass {
        Pass {
            id,
            name: format!("Col {}", id),
            region: "05".to_string(),
            reference_link: String::new(),
            altitude: Some(2000),
            location: GpsPoint::new(lat, lng),
            eligible,
        }
    }

    fn catalog(passes: Vec<Pass>) -> BTreeMap<PassId, Pass> {
        passes.into_iter().map(|p| (p.id, p)).collect()
    }

    fn ride(id: RideId, points: &[(f64, f64)], tolerance: f64) -> Ride {
        let config = MatchConfig {
            corridor_tolerance: tolerance,
            ..MatchConfig::default()
        };
        let path = points
            .iter()
            .map(|&(lat, lng)| GpsPoint::new(lat, lng))
            .collect();
        let date = NaiveDate::from_ymd_opt(2023, 7, 14).unwrap();
        Ride::from_path(id, "test", date, path, &config)
    }

    #[test]
    fn test_crossing_ride_matches_and_distant_ride_does_not() {
        let passes = catalog(vec![pass(1, 45.000, 6.000, true)]);
        let a = ride(
            10,
            &[(45.0005, 6.0), (45.000, 6.0002), (44.999, 6.0005)],
            0.001,
        );
        let b = ride(11, &[(46.0, 7.0), (46.1, 7.1)], 0.001);

        let matches = match_passes(&passes, &[a, b]);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].pass_id, 1);
        assert_eq!(matches[0].ride_id, 10);
        assert!(matches[0].offset <= 0.001);
    }

    #[test]
    fn test_out_and_back_matches_once() {
        let passes = catalog(vec![pass(1, 45.05, 6.0, true)]);
        let out_and_back = ride(
            10,
            &[(45.0, 6.0), (45.05, 6.0), (45.1, 6.0), (45.05, 6.0), (45.0, 6.0)],
            0.002,
        );
        let matches = match_passes(&passes, &[out_and_back]);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].offset, 0.0);
    }

    #[test]
    fn test_ineligible_pass_never_matches() {
        let passes = catalog(vec![pass(1, 45.0, 6.0, false), pass(2, 45.01, 6.0, true)]);
        let r = ride(10, &[(44.99, 6.0), (45.02, 6.0)], 0.002);
        let matches = match_passes(&passes, &[r]);
        let ids: Vec<PassId> = matches.iter().map(|m| m.pass_id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_degenerate_rides_match_nothing() {
        let passes = catalog(vec![pass(1, 45.0, 6.0, true)]);
        let empty = ride(10, &[], 0.002);
        let single = ride(11, &[(45.0, 6.0)], 0.002);
        assert!(match_passes(&passes, &[empty, single]).is_empty());
    }

    #[test]
    fn test_empty_inputs() {
        let passes = catalog(vec![pass(1, 45.0, 6.0, true)]);
        assert!(match_passes(&passes, &[]).is_empty());

        let r = ride(10, &[(45.0, 6.0), (45.1, 6.0)], 0.002);
        assert!(match_passes(&BTreeMap::new(), &[r]).is_empty());
    }

    #[test]
    fn test_long_ride_only_confirms_nearby_passes() {
        // L-shaped ride: the bounding box covers pass 2, the path does not
        let passes = catalog(vec![pass(1, 45.0, 6.5, true), pass(2, 45.5, 6.5, true)]);
        let r = ride(10, &[(45.0, 6.0), (45.0, 7.0), (46.0, 7.0)], 0.002);
        let index = PassIndex::build(&passes);
        let matches = index.match_ride(&r);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].pass_id, 1);
    }

    #[test]
    fn test_output_sorted_and_deduplicated() {
        let passes = catalog(vec![pass(2, 45.0, 6.0, true), pass(1, 45.1, 6.0, true)]);
        let r1 = ride(20, &[(44.9, 6.0), (45.2, 6.0)], 0.002);
        let r2 = ride(10, &[(44.9, 6.0), (45.2, 6.0)], 0.002);
        let r1_again = r1.clone();

        let matches = match_passes(&passes, &[r1, r2, r1_again]);
        let pairs: Vec<(PassId, RideId)> =
            matches.iter().map(|m| (m.pass_id, m.ride_id)).collect();
        assert_eq!(pairs, vec![(1, 10), (1, 20), (2, 10), (2, 20)]);
    }

    #[test]
    fn test_index_len_counts_eligible_only() {
        let passes = catalog(vec![pass(1, 45.0, 6.0, true), pass(2, 45.1, 6.0, false)]);
        let index = PassIndex::build(&passes);
        assert_eq!(index.len(), 1);
        assert!(!index.is_empty());
    }
}
