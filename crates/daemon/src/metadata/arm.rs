//! Client for the Automatic Ripping Machine community disc database.
//!
//! Discs are keyed by their CRC-64 content hash.

use super::{http_client, loose_u64, DiscLookup, MetadataError};
use crate::disc::{DiscMetadata, MediaType};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct ArmSearchResponse {
    #[serde(default)]
    results: Vec<ArmResult>,
}

#[derive(Debug, Deserialize)]
struct ArmResult {
    title: Option<String>,
    #[serde(default)]
    year: serde_json::Value,
    video_type: Option<String>,
    imdb_id: Option<String>,
    #[serde(default)]
    tmdb_id: serde_json::Value,
    poster_url: Option<String>,
}

fn media_type(video_type: Option<&str>) -> MediaType {
    match video_type.map(str::to_lowercase).as_deref() {
        Some("movie") => MediaType::Movie,
        Some("tv") | Some("series") | Some("episode") => MediaType::Tv,
        _ => MediaType::Unknown,
    }
}

impl From<ArmResult> for DiscMetadata {
    fn from(result: ArmResult) -> Self {
        DiscMetadata {
            title: result.title.unwrap_or_else(|| "Unknown".to_string()),
            year: loose_u64(&result.year).and_then(|y| u16::try_from(y).ok()),
            media_type: media_type(result.video_type.as_deref()),
            imdb_id: result.imdb_id.filter(|id| !id.is_empty()),
            tmdb_id: loose_u64(&result.tmdb_id),
            poster_url: result.poster_url.filter(|url| !url.is_empty()),
            ..Default::default()
        }
    }
}

/// ARM database lookup by disc hash.
#[derive(Debug, Clone)]
pub struct ArmClient {
    client: reqwest::Client,
    base_url: String,
}

impl ArmClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, MetadataError> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl DiscLookup for ArmClient {
    async fn lookup(&self, disc_id: &str) -> Result<Option<DiscMetadata>, MetadataError> {
        let url = format!("{}/api/v1/search/{}", self.base_url, disc_id);
        debug!(disc_id, url = %url, "looking up disc in ARM database");

        let resp = self.client.get(&url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!(disc_id, "disc not found in ARM database");
            return Ok(None);
        }

        let body: ArmSearchResponse = resp.error_for_status()?.json().await?;
        let Some(first) = body.results.into_iter().next() else {
            return Ok(None);
        };

        let metadata = DiscMetadata::from(first);
        info!(
            title = %metadata.title,
            year = ?metadata.year,
            media_type = ?metadata.media_type,
            "found disc in ARM database"
        );
        Ok(Some(metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_lookup_maps_first_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/search/5e7c3ad6a2f4b8c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "results": [
                    {
                        "title": "Alien",
                        "year": "1979",
                        "video_type": "Movie",
                        "imdb_id": "tt0078748",
                        "tmdb_id": 348,
                        "poster_url": "https://example.org/alien.jpg"
                    },
                    { "title": "Aliens", "year": 1986, "video_type": "movie" }
                ]
            })))
            .mount(&server)
            .await;

        let client = ArmClient::new(server.uri()).unwrap();
        let meta = client.lookup("5e7c3ad6a2f4b8c1").await.unwrap().unwrap();

        assert_eq!(meta.title, "Alien");
        assert_eq!(meta.year, Some(1979));
        assert_eq!(meta.media_type, MediaType::Movie);
        assert_eq!(meta.imdb_id.as_deref(), Some("tt0078748"));
        assert_eq!(meta.tmdb_id, Some(348));
    }

    #[tokio::test]
    async fn test_not_found_and_empty_results_are_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/search/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/search/empty"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
            .mount(&server)
            .await;

        let client = ArmClient::new(format!("{}/", server.uri())).unwrap();
        assert!(client.lookup("missing").await.unwrap().is_none());
        assert!(client.lookup("empty").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_server_error_is_err() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = ArmClient::new(server.uri()).unwrap();
        assert!(matches!(
            client.lookup("anything").await,
            Err(MetadataError::Http(_))
        ));
    }

    #[test]
    fn test_media_type_mapping() {
        assert_eq!(media_type(Some("series")), MediaType::Tv);
        assert_eq!(media_type(Some("EPISODE")), MediaType::Tv);
        assert_eq!(media_type(Some("documentary")), MediaType::Unknown);
        assert_eq!(media_type(None), MediaType::Unknown);
    }
}
