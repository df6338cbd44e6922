//! Pass catalog loading.
//!
//! The catalog is a CSV file with one row per pass. Column names are checked
//! once against the header before any row is read, so a missing column fails
//! at startup instead of at first use. Both English headers and the French
//! headers of the stock `cols.csv` export are accepted.
//!
//! Passes without an `id` column get the zero-based row index in the file,
//! counted before the eligibility filter so ids stay stable.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ColHunterError, OptionExt, Result};
use crate::GpsPoint;

/// Stable pass identifier.
pub type PassId = u32;

/// A named mountain pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pass {
    pub id: PassId,
    pub name: String,
    /// Administrative region (French département number in the stock catalog)
    pub region: String,
    /// Link to the pass's reference page
    pub reference_link: String,
    /// Summit altitude in meters, if known
    pub altitude: Option<i32>,
    pub location: GpsPoint,
    /// Reachable by bike
    pub eligible: bool,
}

/// Header aliases per catalog field. The first alias is the canonical name.
const ID_HEADERS: &[&str] = &["id", "col_id"];
const NAME_HEADERS: &[&str] = &["name", "nom"];
const LAT_HEADERS: &[&str] = &["lat", "latitude"];
const LNG_HEADERS: &[&str] = &["lng", "lon", "longitude"];
const ALTITUDE_HEADERS: &[&str] = &["altitude"];
const REGION_HEADERS: &[&str] = &["region", "departement"];
const LINK_HEADERS: &[&str] = &["reference_link", "link", "liencols"];
const ELIGIBLE_HEADERS: &[&str] = &["eligible", "est_cycliste"];

const REQUIRED_COLUMNS: &[&[&str]] = &[
    NAME_HEADERS,
    LAT_HEADERS,
    LNG_HEADERS,
    ALTITUDE_HEADERS,
    REGION_HEADERS,
    LINK_HEADERS,
    ELIGIBLE_HEADERS,
];

/// One catalog row as it appears in the file.
#[derive(Debug, Deserialize)]
struct CatalogRow {
    #[serde(default, alias = "col_id")]
    id: Option<PassId>,
    #[serde(alias = "nom")]
    name: String,
    #[serde(alias = "latitude")]
    lat: f64,
    #[serde(alias = "lon", alias = "longitude")]
    lng: f64,
    #[serde(default, deserialize_with = "deserialize_altitude")]
    altitude: Option<i32>,
    #[serde(default, alias = "departement")]
    region: String,
    #[serde(default, alias = "link", alias = "liencols")]
    reference_link: String,
    #[serde(default, alias = "est_cycliste", deserialize_with = "deserialize_flag")]
    eligible: bool,
}

/// Altitudes come as integers, floats (`2642.0`) or blanks.
fn deserialize_altitude<'de, D>(deserializer: D) -> std::result::Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .as_deref()
        .map(str::trim)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map(|v| v.round() as i32))
}

/// Accepts `True`/`False` (pandas), `1`/`0`, `yes`/`no` and `oui`/`non`.
fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(false);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "false" | "0" | "no" | "non" | "n" => Ok(false),
        "true" | "1" | "yes" | "oui" | "y" => Ok(true),
        other => Err(serde::de::Error::custom(format!(
            "invalid eligibility flag '{}'",
            other
        ))),
    }
}

/// Load the pass catalog from a CSV file.
///
/// With `restrict_to_eligible`, passes not reachable by bike are dropped.
/// Fails with [`ColHunterError::CatalogUnreadable`] if the file is missing,
/// lacks a required column, or holds a malformed row.
pub fn load_catalog<P: AsRef<Path>>(
    path: P,
    restrict_to_eligible: bool,
) -> Result<BTreeMap<PassId, Pass>> {
    let path = path.as_ref();
    let source = path.display().to_string();
    let file = File::open(path).map_err(|e| ColHunterError::CatalogUnreadable {
        path: source.clone(),
        message: e.to_string(),
    })?;
    load_catalog_from_reader(file, &source, restrict_to_eligible)
}

/// Load the pass catalog from any CSV reader.
///
/// `source` names the input in error messages.
pub fn load_catalog_from_reader<R: Read>(
    reader: R,
    source: &str,
    restrict_to_eligible: bool,
) -> Result<BTreeMap<PassId, Pass>> {
    let unreadable = |message: String| ColHunterError::CatalogUnreadable {
        path: source.to_string(),
        message,
    };

    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: csv::StringRecord = csv_reader
        .headers()
        .map_err(|e| unreadable(format!("cannot read header row: {}", e)))?
        .iter()
        .map(|h| h.to_ascii_lowercase())
        .collect();
    validate_headers(&headers, source)?;
    csv_reader.set_headers(headers);

    let mut passes = BTreeMap::new();
    let mut seen_ids = BTreeSet::new();
    let mut dropped = 0usize;

    for (row_index, record) in csv_reader.deserialize::<CatalogRow>().enumerate() {
        let row = record.map_err(|e| unreadable(format!("row {}: {}", row_index + 1, e)))?;

        let location = GpsPoint::new(row.lat, row.lng);
        if !location.is_valid() {
            return Err(unreadable(format!(
                "row {}: coordinates ({}, {}) out of range",
                row_index + 1,
                row.lat,
                row.lng
            )));
        }

        let id = match row.id {
            Some(id) => id,
            None => PassId::try_from(row_index)
                .map_err(|_| unreadable("too many rows for integer ids".to_string()))?,
        };
        // Ids must be unique across the whole file, dropped rows included
        if !seen_ids.insert(id) {
            return Err(unreadable(format!("duplicate pass id {}", id)));
        }

        if restrict_to_eligible && !row.eligible {
            debug!("[Catalog] Skipping ineligible pass {} ({})", id, row.name);
            dropped += 1;
            continue;
        }

        let pass = Pass {
            id,
            name: row.name,
            region: row.region,
            reference_link: row.reference_link,
            altitude: row.altitude,
            location,
            eligible: row.eligible,
        };

        passes.insert(id, pass);
    }

    info!(
        "[Catalog] Loaded {} passes from {} ({} ineligible dropped)",
        passes.len(),
        source,
        dropped
    );

    Ok(passes)
}

fn validate_headers(headers: &csv::StringRecord, source: &str) -> Result<()> {
    let has_column = |aliases: &[&str]| aliases.iter().any(|a| headers.iter().any(|h| h == *a));

    for aliases in REQUIRED_COLUMNS {
        let canonical = aliases.first().ok_or_internal("empty header alias list")?;
        has_column(aliases)
            .then_some(())
            .ok_or_unreadable(source, &format!("missing required column '{}'", canonical))?;
    }

    if !has_column(ID_HEADERS) {
        debug!("[Catalog] No id column in {}, using row positions", source);
    }

    Ok(())
}
