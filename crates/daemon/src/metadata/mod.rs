//! Disc identification and metadata lookup.
//!
//! Identification runs in two stages: a content hash of the disc looked up in
//! a community database ([`DiscLookup`]), then a title search against a movie
//! database ([`TitleSearch`]) using the cleaned volume label.

pub mod arm;
pub mod dvdid;
pub mod tmdb;

pub use arm::ArmClient;
pub use dvdid::{DiscIdError, DvdIdIdentifier};
pub use tmdb::TmdbClient;

use crate::disc::DiscMetadata;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Timeout applied to every metadata request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for metadata services
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response from {service}: {message}")]
    InvalidResponse {
        service: &'static str,
        message: String,
    },
}

/// Looks a disc up by its content identifier.
#[async_trait]
pub trait DiscLookup: Send + Sync {
    /// `Ok(None)` when the service knows nothing about the disc.
    async fn lookup(&self, disc_id: &str) -> Result<Option<DiscMetadata>, MetadataError>;
}

/// Searches for a title by name.
#[async_trait]
pub trait TitleSearch: Send + Sync {
    /// `Ok(None)` when nothing matched or the service is not configured.
    async fn search(
        &self,
        title: &str,
        year: Option<u16>,
    ) -> Result<Option<DiscMetadata>, MetadataError>;
}

/// Computes a content identifier for the disc in a drive.
///
/// Blocking: may read the filesystem and mount the disc. Callers run it on
/// the blocking pool.
pub trait DiscIdentifier: Send + Sync {
    fn compute_disc_id(&self, device: &str) -> Result<String, DiscIdError>;
}

/// Year from a `YYYY-MM-DD` style date.
pub(crate) fn year_from_date(date: Option<&str>) -> Option<u16> {
    date?.get(..4)?.parse().ok()
}

/// Accepts either a JSON number or a numeric string.
pub(crate) fn loose_u64(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn http_client() -> Result<reqwest::Client, MetadataError> {
    Ok(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}
