//! TMDB (The Movie Database) title search.
//!
//! Searches movies first, then TV series, and resolves the IMDb id of the
//! first hit through the external-ids endpoint.

use super::{http_client, year_from_date, MetadataError, TitleSearch};
use crate::disc::{DiscMetadata, MediaType};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

const TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";
const TMDB_IMAGE_BASE: &str = "https://image.tmdb.org/t/p/w500";

#[derive(Debug, Deserialize)]
struct SearchResponse<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct MovieResult {
    id: u64,
    title: Option<String>,
    release_date: Option<String>,
    overview: Option<String>,
    poster_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TvResult {
    id: u64,
    name: Option<String>,
    first_air_date: Option<String>,
    overview: Option<String>,
    poster_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExternalIds {
    imdb_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TvDetails {
    number_of_episodes: Option<u32>,
}

fn poster_url(path: Option<String>) -> Option<String> {
    path.filter(|p| !p.is_empty())
        .map(|p| format!("{}{}", TMDB_IMAGE_BASE, p))
}

/// TMDB v3 client; searches return `Ok(None)` without an API key.
#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl TmdbClient {
    pub fn new(api_key: Option<String>) -> Result<Self, MetadataError> {
        Self::with_base_url(api_key, TMDB_BASE_URL)
    }

    pub fn with_base_url(
        api_key: Option<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, MetadataError> {
        Ok(Self {
            client: http_client()?,
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T, MetadataError> {
        let key = self.api_key.clone().unwrap_or_default();
        let url = format!("{}{}", self.base_url, endpoint);
        let resp = self
            .client
            .get(&url)
            .query(&[("api_key", key)])
            .query(params)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    /// IMDb id for a movie or TV entry; lookup failures are logged and ignored.
    async fn imdb_id(&self, kind: &str, id: u64) -> Option<String> {
        match self
            .get::<ExternalIds>(&format!("/{}/{}/external_ids", kind, id), &[])
            .await
        {
            Ok(ids) => ids.imdb_id.filter(|id| !id.is_empty()),
            Err(e) => {
                warn!(kind, id, error = %e, "TMDB external id lookup failed");
                None
            }
        }
    }

    pub async fn search_movie(
        &self,
        title: &str,
        year: Option<u16>,
    ) -> Result<Option<DiscMetadata>, MetadataError> {
        let mut params = vec![
            ("query", title.to_string()),
            ("include_adult", "false".to_string()),
        ];
        if let Some(year) = year {
            params.push(("year", year.to_string()));
        }

        let resp: SearchResponse<MovieResult> = self.get("/search/movie", &params).await?;
        let Some(movie) = resp.results.into_iter().next() else {
            debug!(title, "no TMDB movie results");
            return Ok(None);
        };

        let metadata = DiscMetadata {
            title: movie.title.unwrap_or_else(|| title.to_string()),
            year: year_from_date(movie.release_date.as_deref()),
            media_type: MediaType::Movie,
            imdb_id: self.imdb_id("movie", movie.id).await,
            tmdb_id: Some(movie.id),
            poster_url: poster_url(movie.poster_path),
            overview: movie.overview,
            ..Default::default()
        };
        info!(title = %metadata.title, year = ?metadata.year, "found movie on TMDB");
        Ok(Some(metadata))
    }

    pub async fn search_tv(
        &self,
        title: &str,
        year: Option<u16>,
    ) -> Result<Option<DiscMetadata>, MetadataError> {
        let mut params = vec![
            ("query", title.to_string()),
            ("include_adult", "false".to_string()),
        ];
        if let Some(year) = year {
            params.push(("first_air_date_year", year.to_string()));
        }

        let resp: SearchResponse<TvResult> = self.get("/search/tv", &params).await?;
        let Some(show) = resp.results.into_iter().next() else {
            debug!(title, "no TMDB TV results");
            return Ok(None);
        };

        let episode_count = self
            .get::<TvDetails>(&format!("/tv/{}", show.id), &[])
            .await
            .ok()
            .and_then(|d| d.number_of_episodes);

        let metadata = DiscMetadata {
            title: show.name.unwrap_or_else(|| title.to_string()),
            year: year_from_date(show.first_air_date.as_deref()),
            media_type: MediaType::Tv,
            imdb_id: self.imdb_id("tv", show.id).await,
            tmdb_id: Some(show.id),
            poster_url: poster_url(show.poster_path),
            overview: show.overview,
            episode_count,
            ..Default::default()
        };
        info!(title = %metadata.title, year = ?metadata.year, "found TV series on TMDB");
        Ok(Some(metadata))
    }
}

#[async_trait]
impl TitleSearch for TmdbClient {
    async fn search(
        &self,
        title: &str,
        year: Option<u16>,
    ) -> Result<Option<DiscMetadata>, MetadataError> {
        if !self.is_configured() {
            debug!("TMDB API key not configured");
            return Ok(None);
        }
        if let Some(movie) = self.search_movie(title, year).await? {
            return Ok(Some(movie));
        }
        self.search_tv(title, year).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_unconfigured_client_returns_none() {
        let client = TmdbClient::with_base_url(Some(String::new()), "http://127.0.0.1:9").unwrap();
        assert!(!client.is_configured());
        assert!(client.search("Alien", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_movie_search_resolves_imdb_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/movie"))
            .and(query_param("query", "Alien"))
            .and(query_param("year", "1979"))
            .and(query_param("api_key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{
                    "id": 348,
                    "title": "Alien",
                    "release_date": "1979-05-25",
                    "overview": "In space no one can hear you scream.",
                    "poster_path": "/alien.jpg"
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/movie/348/external_ids"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "imdb_id": "tt0078748" })),
            )
            .mount(&server)
            .await;

        let client = TmdbClient::with_base_url(Some("secret".to_string()), server.uri()).unwrap();
        let meta = client.search("Alien", Some(1979)).await.unwrap().unwrap();

        assert_eq!(meta.title, "Alien");
        assert_eq!(meta.year, Some(1979));
        assert_eq!(meta.media_type, MediaType::Movie);
        assert_eq!(meta.imdb_id.as_deref(), Some("tt0078748"));
        assert_eq!(meta.tmdb_id, Some(348));
        assert_eq!(
            meta.poster_url.as_deref(),
            Some("https://image.tmdb.org/t/p/w500/alien.jpg")
        );
    }

    #[tokio::test]
    async fn test_falls_back_to_tv_search() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/movie"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search/tv"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{ "id": 1438, "name": "The Wire", "first_air_date": "2002-06-02" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tv/1438"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "number_of_episodes": 60 })),
            )
            .mount(&server)
            .await;
        // external_ids is not mocked; its failure must not fail the search

        let client = TmdbClient::with_base_url(Some("k".to_string()), server.uri()).unwrap();
        let meta = client.search("The Wire", None).await.unwrap().unwrap();

        assert_eq!(meta.media_type, MediaType::Tv);
        assert_eq!(meta.title, "The Wire");
        assert_eq!(meta.year, Some(2002));
        assert_eq!(meta.episode_count, Some(60));
        assert_eq!(meta.imdb_id, None);
        assert_eq!(meta.poster_url, None);
    }

    #[tokio::test]
    async fn test_no_results_anywhere() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
            .mount(&server)
            .await;

        let client = TmdbClient::with_base_url(Some("k".to_string()), server.uri()).unwrap();
        assert!(client.search("Nothing", None).await.unwrap().is_none());
    }
}
