//! Unified error handling for the col-hunter library.
//!
//! Catalog problems are fatal at startup. Ride problems are per-ride: the
//! normalizer drops the offending ride and keeps going. Fetch and auth
//! problems come from the external Strava collaborator.

use thiserror::Error;

use crate::ride::RideId;

/// Unified error type for col-hunter operations.
#[derive(Debug, Clone, Error)]
pub enum ColHunterError {
    /// Pass catalog is missing or malformed
    #[error("Catalog '{path}' is unreadable: {message}")]
    CatalogUnreadable { path: String, message: String },

    /// Ride path holds coordinates outside the WGS84 range
    #[error("Ride {ride_id} has invalid coordinates: {message}")]
    InvalidCoordinates { ride_id: RideId, message: String },

    /// Ride polyline could not be decoded
    #[error("Ride {ride_id} polyline could not be decoded: {message}")]
    PolylineDecode { ride_id: RideId, message: String },

    /// Access token expired and could not be refreshed
    #[error("Access token expired")]
    AuthExpired,

    /// Authorization refused by the provider
    #[error("Authorization denied: {message}")]
    AuthDenied { message: String },

    /// Ride listing failed after retries
    #[error("{}", fetch_failure(.message, .status_code))]
    RideFetchFailed {
        message: String,
        status_code: Option<u16>,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn fetch_failure(message: &str, status_code: &Option<u16>) -> String {
    match status_code {
        Some(code) => format!("Ride fetch failed (HTTP {}): {}", code, message),
        None => format!("Ride fetch failed: {}", message),
    }
}

/// Result type alias for col-hunter operations.
pub type Result<T> = std::result::Result<T, ColHunterError>;

/// Extension trait for converting Option to ColHunterError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a catalog error for `path`.
    fn ok_or_unreadable(self, path: &str, message: &str) -> Result<T>;

    /// Convert Option to Result with generic internal error.
    fn ok_or_internal(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_unreadable(self, path: &str, message: &str) -> Result<T> {
        self.ok_or_else(|| ColHunterError::CatalogUnreadable {
            path: path.to_string(),
            message: message.to_string(),
        })
    }

    fn ok_or_internal(self, message: &str) -> Result<T> {
        self.ok_or_else(|| ColHunterError::Internal {
            message: message.to_string(),
        })
    }
}
