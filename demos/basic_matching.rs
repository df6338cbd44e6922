//! End-to-end matching over an in-memory catalog and two rides.
//!
//! Run with `cargo run --example basic_matching`.

use col_hunter::{load_catalog_from_reader, HuntEngine, MatchConfig, RawRide, Result};
use geo::LineString;
use serde_json::json;

const CATALOG: &str = "\
nom,lat,lng,altitude,departement,liencols,est_cycliste
Col du Lautaret,45.0353,6.4053,2058,05,https://www.cols-cyclisme.com/lautaret,True
Col du Galibier,45.0640,6.4078,2642,05,https://www.cols-cyclisme.com/galibier,True
Col d'Izoard,44.8203,6.7350,2360,05,https://www.cols-cyclisme.com/izoard,True
";

fn encode(points: &[(f64, f64)]) -> String {
    // Polylines are encoded in (lng, lat) coordinate order
    let line: LineString<f64> = points.iter().map(|&(lat, lng)| (lng, lat)).collect();
    polyline::encode_coordinates(line, 5).unwrap_or_default()
}

fn ride(id: u64, name: &str, date: &str, points: &[(f64, f64)]) -> RawRide {
    let value = json!({
        "id": id,
        "name": name,
        "type": "Ride",
        "start_date": date,
        "distance": 42000.0,
        "map": { "summary_polyline": encode(points) },
    });
    serde_json::from_value(value).unwrap_or_else(|e| panic!("bad ride fixture: {}", e))
}

fn main() -> Result<()> {
    env_logger::init();

    let mut engine = HuntEngine::with_config(MatchConfig::default())?;
    engine.set_passes(load_catalog_from_reader(
        CATALOG.as_bytes(),
        "demo catalog",
        true,
    )?);

    let rides = vec![
        ride(
            1,
            "Lautaret and Galibier",
            "2021-07-14T07:30:00Z",
            &[
                (45.0300, 6.4050),
                (45.0353, 6.4054),
                (45.0500, 6.4060),
                (45.0641, 6.4079),
            ],
        ),
        ride(
            2,
            "Back to the Galibier",
            "2023-08-02T06:45:00Z",
            &[(45.0700, 6.4100), (45.0641, 6.4078), (45.0600, 6.4050)],
        ),
    ];
    let stats = engine.ingest_rides(&rides);
    println!(
        "Normalized {} of {} rides ({} degenerate)",
        stats.normalized, stats.received, stats.degenerate
    );

    for summary in engine.pass_summaries() {
        println!(
            "{:<18} {:>5} m  {} passage(s), first on {}",
            summary.name,
            summary.altitude.unwrap_or(0),
            summary.passages,
            summary.first_date
        );
    }

    for year in engine.year_counts() {
        println!("{}: {} passages", year.year, year.passages);
    }

    let overview = engine.overview();
    println!(
        "{} rides, {} passes crossed, highest at {} m",
        overview.ride_count,
        overview.passes_crossed,
        overview.highest_altitude.unwrap_or(0)
    );

    for marker in engine.pass_markers().iter().filter(|m| !m.matched) {
        println!("Still to ride: {}", marker.name);
    }

    Ok(())
}
