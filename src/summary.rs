//! Aggregated views over a match set.
//!
//! These are the read-only outputs handed to presentation: the per-pass
//! table, the per-year histogram, the headline figures and the map data.
//! All of them derive from the same `(pass, ride)` match list.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::catalog::{Pass, PassId};
use crate::matcher::PassMatch;
use crate::ride::{Ride, RideId};
use crate::{Bounds, GpsPoint};

/// One row of the crossed-passes table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassSummary {
    pub pass_id: PassId,
    pub name: String,
    pub region: String,
    pub altitude: Option<i32>,
    pub reference_link: String,
    /// Number of distinct rides that crossed the pass
    pub passages: usize,
    /// Rides that crossed the pass, in ascending id order
    pub ride_ids: Vec<RideId>,
    /// Earliest start date among those rides
    pub first_date: NaiveDate,
}

/// Passages counted for one calendar year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearCount {
    pub year: i32,
    pub passages: usize,
}

/// Headline figures for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HuntOverview {
    /// Rides imported (degenerate ones included)
    pub ride_count: usize,
    /// Distinct passes crossed at least once
    pub passes_crossed: usize,
    /// Total `(pass, ride)` matches
    pub total_passages: usize,
    /// Highest crossed pass; unknown altitudes count as 0
    pub highest_altitude: Option<i32>,
}

/// A catalog pass on the map, flagged by whether any ride crossed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassMarker {
    pub pass_id: PassId,
    pub name: String,
    pub location: GpsPoint,
    pub matched: bool,
}

/// Group matches per pass.
///
/// Only passes with at least one match appear. Matches pointing at a pass or
/// ride missing from the inputs are skipped. Sorted by pass id.
pub fn summarize_by_pass(
    passes: &BTreeMap<PassId, Pass>,
    rides: &[Ride],
    matches: &[PassMatch],
) -> Vec<PassSummary> {
    let rides_by_id: HashMap<RideId, &Ride> = rides.iter().map(|r| (r.id, r)).collect();

    let mut grouped: BTreeMap<PassId, (BTreeSet<RideId>, Option<NaiveDate>)> = BTreeMap::new();
    for m in matches {
        let Some(ride) = rides_by_id.get(&m.ride_id) else {
            debug!("[Summary] Match references unknown ride {}", m.ride_id);
            continue;
        };
        let (ride_ids, first_date) = grouped.entry(m.pass_id).or_default();
        ride_ids.insert(ride.id);
        *first_date = Some(match *first_date {
            Some(d) => d.min(ride.start_date),
            None => ride.start_date,
        });
    }

    grouped
        .into_iter()
        .filter_map(|(pass_id, (ride_ids, first_date))| {
            let Some(pass) = passes.get(&pass_id) else {
                debug!("[Summary] Match references unknown pass {}", pass_id);
                return None;
            };
            Some(PassSummary {
                pass_id,
                name: pass.name.clone(),
                region: pass.region.clone(),
                altitude: pass.altitude,
                reference_link: pass.reference_link.clone(),
                passages: ride_ids.len(),
                ride_ids: ride_ids.into_iter().collect(),
                first_date: first_date?,
            })
        })
        .collect()
}

/// Count distinct `(pass, ride)` matches per ride start year.
pub fn count_by_year(rides: &[Ride], matches: &[PassMatch]) -> Vec<YearCount> {
    let years: HashMap<RideId, i32> = rides.iter().map(|r| (r.id, r.start_year)).collect();
    let distinct: BTreeSet<(PassId, RideId)> =
        matches.iter().map(|m| (m.pass_id, m.ride_id)).collect();

    let mut per_year: BTreeMap<i32, usize> = BTreeMap::new();
    for (_, ride_id) in distinct {
        if let Some(year) = years.get(&ride_id) {
            *per_year.entry(*year).or_default() += 1;
        }
    }

    per_year
        .into_iter()
        .map(|(year, passages)| YearCount { year, passages })
        .collect()
}

/// Headline figures from the ride set and its pass summaries.
pub fn overview(rides: &[Ride], summaries: &[PassSummary]) -> HuntOverview {
    HuntOverview {
        ride_count: rides.len(),
        passes_crossed: summaries.len(),
        total_passages: summaries.iter().map(|s| s.passages).sum(),
        highest_altitude: summaries
            .iter()
            .map(|s| s.altitude.unwrap_or(0))
            .max(),
    }
}

/// Every catalog pass, flagged matched or unmatched.
pub fn pass_markers(passes: &BTreeMap<PassId, Pass>, matches: &[PassMatch]) -> Vec<PassMarker> {
    let matched: BTreeSet<PassId> = matches.iter().map(|m| m.pass_id).collect();
    passes
        .values()
        .map(|p| PassMarker {
            pass_id: p.id,
            name: p.name.clone(),
            location: p.location,
            matched: matched.contains(&p.id),
        })
        .collect()
}

/// Bounds covering every ride path, for fitting a map view.
pub fn rides_bounds(rides: &[Ride]) -> Option<Bounds> {
    rides
        .iter()
        .filter_map(|r| Bounds::from_points(&r.path))
        .reduce(|acc, b| acc.union(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MatchConfig;

    fn pass(id: PassId, altitude: Option<i32>) -> Pass {
        Pass {
            id,
            name: format!("Col {}", id),
            region: "73".to_string(),
            reference_link: format!("https://example.org/{}", id),
            altitude,
            location: GpsPoint::new(45.0 + id as f64 * 0.1, 6.0),
            eligible: true,
        }
    }

    fn ride(id: RideId, date: (i32, u32, u32)) -> Ride {
        let date = NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap();
        let path = vec![GpsPoint::new(45.0, 6.0), GpsPoint::new(45.5, 6.0)];
        Ride::from_path(id, "test", date, path, &MatchConfig::default())
    }

    fn m(pass_id: PassId, ride_id: RideId) -> PassMatch {
        PassMatch {
            pass_id,
            ride_id,
            offset: 0.0,
        }
    }

    #[test]
    fn test_two_rides_over_one_pass() {
        let passes: BTreeMap<PassId, Pass> = [(1, pass(1, Some(2067)))].into();
        let rides = vec![ride(100, (2023, 7, 14)), ride(50, (2021, 6, 2))];
        let matches = vec![m(1, 50), m(1, 100)];

        let summaries = summarize_by_pass(&passes, &rides, &matches);
        assert_eq!(summaries.len(), 1);
        let s = &summaries[0];
        assert_eq!(s.passages, 2);
        assert_eq!(s.ride_ids, vec![50, 100]);
        assert_eq!(s.first_date, NaiveDate::from_ymd_opt(2021, 6, 2).unwrap());
        assert_eq!(s.name, "Col 1");
        assert_eq!(s.altitude, Some(2067));
    }

    #[test]
    fn test_unmatched_passes_are_not_summarized() {
        let passes: BTreeMap<PassId, Pass> =
            [(1, pass(1, None)), (2, pass(2, None))].into();
        let rides = vec![ride(10, (2022, 5, 1))];
        let summaries = summarize_by_pass(&passes, &rides, &[m(2, 10)]);
        let ids: Vec<PassId> = summaries.iter().map(|s| s.pass_id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_dangling_matches_are_skipped() {
        let passes: BTreeMap<PassId, Pass> = [(1, pass(1, None))].into();
        let rides = vec![ride(10, (2022, 5, 1))];
        let summaries = summarize_by_pass(&passes, &rides, &[m(1, 99), m(7, 10)]);
        assert!(summaries.is_empty());
    }

    #[test]
    fn test_count_by_year() {
        let rides = vec![
            ride(1, (2021, 6, 2)),
            ride(2, (2021, 8, 20)),
            ride(3, (2023, 7, 14)),
        ];
        let matches = vec![m(1, 1), m(2, 1), m(1, 2), m(1, 3), m(1, 3)];
        let counts = count_by_year(&rides, &matches);
        assert_eq!(
            counts,
            vec![
                YearCount {
                    year: 2021,
                    passages: 3
                },
                YearCount {
                    year: 2023,
                    passages: 1
                },
            ]
        );
    }

    #[test]
    fn test_overview_highest_altitude() {
        let passes: BTreeMap<PassId, Pass> = [
            (1, pass(1, Some(2067))),
            (2, pass(2, None)),
            (3, pass(3, Some(2642))),
        ]
        .into();
        let rides = vec![ride(10, (2022, 5, 1)), ride(11, (2022, 5, 2))];
        let matches = vec![m(1, 10), m(2, 10), m(2, 11)];

        let summaries = summarize_by_pass(&passes, &rides, &matches);
        let o = overview(&rides, &summaries);
        assert_eq!(o.ride_count, 2);
        assert_eq!(o.passes_crossed, 2);
        assert_eq!(o.total_passages, 3);
        // Pass 3 is higher but was never crossed
        assert_eq!(o.highest_altitude, Some(2067));

        assert_eq!(overview(&rides, &[]).highest_altitude, None);
    }

    #[test]
    fn test_pass_markers_flag_matches() {
        let passes: BTreeMap<PassId, Pass> =
            [(1, pass(1, None)), (2, pass(2, None))].into();
        let markers = pass_markers(&passes, &[m(2, 10)]);
        assert_eq!(markers.len(), 2);
        assert!(!markers[0].matched);
        assert!(markers[1].matched);
    }

    #[test]
    fn test_rides_bounds() {
        let mut rides = vec![ride(1, (2022, 1, 1))];
        rides.push(Ride::from_path(
            2,
            "east",
            NaiveDate::from_ymd_opt(2022, 1, 2).unwrap(),
            vec![GpsPoint::new(44.0, 7.0), GpsPoint::new(44.5, 7.5)],
            &MatchConfig::default(),
        ));
        let b = rides_bounds(&rides).unwrap();
        assert_eq!(b.min_lat, 44.0);
        assert_eq!(b.max_lat, 45.5);
        assert_eq!(b.max_lng, 7.5);
        assert!(rides_bounds(&[]).is_none());
    }
}
