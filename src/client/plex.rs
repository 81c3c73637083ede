//! Plex Media Server API client.
//!
//! Epistemic foundation:
//! - K_i: Plex answers JSON when asked with `Accept: application/json`
//! - K_i: Library listings are paged via X-Plex-Container-Start/Size
//! - B_i: Server will respond within timeout (might fail)
//! - I^B: Server load unknowable → pacing, retry with backoff

use crate::client::RateLimiter;
use crate::models::{Album, Config, PlexApiError, PlexkitError, Result, Track};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, Response};
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Plex metadata type for albums.
const ALBUM_TYPE: &str = "9";

/// Highest rating on the Plex scale (five stars).
pub const MAX_PLEX_RATING: u8 = 10;

/// Request kinds, used to pace each endpoint separately.
const KIND_ALBUMS: &str = "albums";
const KIND_TRACKS: &str = "tracks";
const KIND_RATE: &str = "rate";

/// Longest Retry-After honoured from the server.
const MAX_RETRY_AFTER_SECS: f64 = 300.0;

/// Parse a delay-seconds Retry-After value.
///
/// Negative, non-finite and unparseable values are ignored; huge ones are capped.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs = value.trim().parse::<f64>().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs.min(MAX_RETRY_AFTER_SECS)).ok()
}

/// Envelope around every Plex JSON response.
#[derive(Debug, Deserialize)]
struct PlexResponse {
    #[serde(rename = "MediaContainer")]
    media_container: MediaContainer,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaContainer {
    #[serde(rename = "Metadata", default)]
    metadata: Vec<MetadataItem>,
    #[serde(default)]
    total_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataItem {
    #[serde(deserialize_with = "string_or_number")]
    rating_key: String,
    title: String,
    #[serde(default)]
    parent_title: Option<String>,
    #[serde(default)]
    user_rating: Option<f64>,
    /// Milliseconds
    #[serde(default)]
    duration: Option<u64>,
}

/// ratingKey is a string in current servers, a number in some older ones.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Key {
        Str(String),
        Num(u64),
    }

    Ok(match Key::deserialize(deserializer)? {
        Key::Str(s) => s,
        Key::Num(n) => n.to_string(),
    })
}

impl From<MetadataItem> for Album {
    fn from(item: MetadataItem) -> Self {
        Self {
            key: item.rating_key,
            title: item.title,
            artist: item.parent_title.unwrap_or_default(),
            user_rating: item.user_rating,
        }
    }
}

impl From<MetadataItem> for Track {
    fn from(item: MetadataItem) -> Self {
        Self {
            title: item.title,
            rating: item.user_rating,
            duration_secs: item.duration.unwrap_or(0) / 1000,
        }
    }
}

/// Plex Media Server client scoped to one music library.
///
/// Features:
/// - Paged library listing
/// - Per-endpoint request pacing and 429 backoff
/// - Retry with exponential backoff on network errors and 5xx
pub struct PlexClient {
    client: reqwest::Client,
    base_url: String,
    library_id: String,
    container_size: usize,
    timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
    rate_limiter: Arc<RateLimiter>,
}

impl PlexClient {
    /// Create a new Plex client.
    pub fn new(
        base_url: &str,
        token: &str,
        library_id: &str,
        timeout_secs: Option<u64>,
        max_retries: Option<u32>,
        rate_limiter: Option<Arc<RateLimiter>>,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs.unwrap_or(30));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(Self::headers(token)?)
            .build()
            .map_err(PlexkitError::Network)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            library_id: library_id.to_string(),
            container_size: 2000,
            timeout,
            max_retries: max_retries.unwrap_or(3).max(1),
            retry_backoff: Duration::from_secs(1),
            rate_limiter: rate_limiter.unwrap_or_default(),
        })
    }

    /// Create a client from the loaded configuration.
    pub fn from_config(config: &Config, token: &str) -> Result<Self> {
        let rate_limiter = Arc::new(RateLimiter::new(Duration::from_millis(
            config.album_ratings.request_delay_ms,
        )));

        Ok(Self::new(
            &config.plex.url,
            token,
            &config.plex.music_library_id,
            Some(config.plex.timeout_secs),
            Some(config.plex.max_retries),
            Some(rate_limiter),
        )?
        .with_container_size(config.plex.container_size))
    }

    /// Set the page size for listings.
    pub fn with_container_size(mut self, size: usize) -> Self {
        self.container_size = size.max(1);
        self
    }

    /// Set the base delay of the exponential retry backoff.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Get the rate limiter.
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Headers sent with every request.
    fn headers(token: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let token = HeaderValue::from_str(token).map_err(|_| {
            PlexkitError::InvalidInput("Plex token contains invalid header characters".to_string())
        })?;
        headers.insert("X-Plex-Token", token);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert("X-Plex-Product", HeaderValue::from_static("plexkit"));
        headers.insert(
            "X-Plex-Client-Identifier",
            HeaderValue::from_static("plexkit-cli"),
        );
        Ok(headers)
    }

    /// Send a request, retrying transient failures.
    ///
    /// B_i(server available) → Result
    /// I^B(server busy) → backoff
    async fn send(&self, kind: &str, build: impl Fn() -> RequestBuilder) -> Result<Response> {
        let mut last_error: Option<PlexkitError> = None;

        for attempt in 0..self.max_retries {
            self.rate_limiter.wait_if_needed(kind).await;

            let response = match build().send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(if e.is_timeout() {
                        PlexkitError::Timeout(self.timeout)
                    } else {
                        PlexkitError::Network(e)
                    });
                    self.backoff(attempt, kind, "network error").await;
                    continue;
                }
            };

            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);

            self.rate_limiter.record_request(kind, status, retry_after);

            if response.status().is_success() {
                return Ok(response);
            }

            if status == 429 {
                // The rate limiter holds the next attempt back
                last_error = Some(PlexkitError::RateLimited {
                    retry_after_secs: retry_after.map_or(1.0, |d| d.as_secs_f64()),
                });
                continue;
            }

            let url = response.url().path().to_string();
            let body = response.text().await.unwrap_or_default();
            let error = match status {
                401 => PlexApiError::AuthenticationFailed,
                404 => PlexApiError::NotFound(url),
                _ => PlexApiError::ApiError {
                    status,
                    message: body,
                },
            };
            let error = PlexkitError::PlexApi(error);

            if !error.is_retryable() {
                return Err(error);
            }

            last_error = Some(error);
            self.backoff(attempt, kind, "server error").await;
        }

        Err(last_error.unwrap_or_else(|| {
            PlexkitError::PlexApi(PlexApiError::MaxRetriesExceeded {
                attempts: self.max_retries,
                last_error: "Unknown error".to_string(),
            })
        }))
    }

    async fn backoff(&self, attempt: u32, kind: &str, cause: &str) {
        if attempt + 1 < self.max_retries {
            let backoff = self.retry_backoff * 2u32.pow(attempt);
            debug!(
                attempt = attempt,
                kind = kind,
                backoff_ms = backoff.as_millis() as u64,
                "Retrying after {cause}"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    async fn get_container(
        &self,
        kind: &str,
        url: &str,
        start: Option<usize>,
    ) -> Result<MediaContainer> {
        let response = self
            .send(kind, || {
                let mut request = self
                    .client
                    .get(url)
                    .header("X-Plex-Container-Size", self.container_size.to_string());
                if let Some(start) = start {
                    request = request.header("X-Plex-Container-Start", start.to_string());
                }
                request
            })
            .await?;

        let body: PlexResponse = response
            .json()
            .await
            .map_err(|e| PlexkitError::ParseError(format!("Failed to parse response: {e}")))?;

        Ok(body.media_container)
    }

    /// Fetch every album of the music library.
    pub async fn get_all_albums(&self) -> Result<Vec<Album>> {
        let url = format!(
            "{}/library/sections/{}/albums",
            self.base_url, self.library_id
        );
        let mut albums: Vec<Album> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut start = 0;

        loop {
            let page = self.get_container(KIND_ALBUMS, &url, Some(start)).await?;
            let fetched = page.metadata.len();
            let before = albums.len();
            albums.extend(
                page.metadata
                    .into_iter()
                    .map(Album::from)
                    .filter(|album| seen.insert(album.key.clone())),
            );
            let added = albums.len() - before;
            start += fetched;

            debug!(
                fetched = fetched,
                added = added,
                total = albums.len(),
                total_size = ?page.total_size,
                "Fetched album page"
            );

            // A server ignoring X-Plex-Container-Start repeats the same page
            let last_page = fetched < self.container_size
                || added == 0
                || page.total_size.is_some_and(|total| start >= total);
            if last_page {
                break;
            }
        }

        Ok(albums)
    }

    /// Fetch the tracks of an album.
    pub async fn get_album_tracks(&self, album_key: &str) -> Result<Vec<Track>> {
        let url = format!("{}/library/metadata/{}/children", self.base_url, album_key);
        let container = self.get_container(KIND_TRACKS, &url, None).await?;
        Ok(container.metadata.into_iter().map(Track::from).collect())
    }

    /// Set the user rating of an album, clamped to the Plex scale.
    pub async fn update_album_rating(&self, album_key: &str, rating: u8) -> Result<()> {
        let url = format!("{}/library/sections/{}/all", self.base_url, self.library_id);
        let plex_rating = rating.min(MAX_PLEX_RATING).to_string();

        self.send(KIND_RATE, || {
            self.client.put(&url).query(&[
                ("type", ALBUM_TYPE),
                ("id", album_key),
                ("userRating.value", plex_rating.as_str()),
            ])
        })
        .await?;

        debug!(album_key = album_key, rating = %plex_rating, "Album rating updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> PlexClient {
        PlexClient::new(&server.uri(), "tok", "3", Some(5), Some(3), None)
            .unwrap()
            .with_retry_backoff(Duration::from_millis(1))
    }

    fn album_json(key: &str, title: &str) -> serde_json::Value {
        json!({ "ratingKey": key, "title": title, "parentTitle": "Artist" })
    }

    #[tokio::test]
    async fn test_get_all_albums_maps_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/library/sections/3/albums"))
            .and(header("X-Plex-Token", "tok"))
            .and(header("Accept", "application/json"))
            .and(header("X-Plex-Container-Size", "2000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "MediaContainer": {
                    "size": 2,
                    "Metadata": [
                        { "ratingKey": "101", "title": "Kind of Blue", "parentTitle": "Miles Davis" },
                        { "ratingKey": 102, "title": "Giant Steps", "parentTitle": "John Coltrane", "userRating": 8.0 }
                    ]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let albums = client(&server).get_all_albums().await.unwrap();
        assert_eq!(albums.len(), 2);
        assert_eq!(albums[0].key, "101");
        assert_eq!(albums[0].artist, "Miles Davis");
        assert_eq!(albums[0].user_rating, None);
        assert_eq!(albums[1].key, "102");
        assert_eq!(albums[1].user_rating, Some(8.0));
    }

    #[tokio::test]
    async fn test_get_all_albums_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/library/sections/3/albums"))
            .and(header("X-Plex-Container-Start", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "MediaContainer": {
                    "totalSize": 3,
                    "Metadata": [album_json("1", "A"), album_json("2", "B")]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/library/sections/3/albums"))
            .and(header("X-Plex-Container-Start", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "MediaContainer": { "totalSize": 3, "Metadata": [album_json("3", "C")] }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let albums = client(&server)
            .with_container_size(2)
            .get_all_albums()
            .await
            .unwrap();
        let keys: Vec<&str> = albums.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_empty_library() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/library/sections/3/albums"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "MediaContainer": { "size": 0 } })),
            )
            .mount(&server)
            .await;

        assert!(client(&server).get_all_albums().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_album_tracks_converts_duration() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/library/metadata/101/children"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "MediaContainer": {
                    "Metadata": [
                        { "ratingKey": "1", "title": "So What", "userRating": 10.0, "duration": 562_999 },
                        { "ratingKey": "2", "title": "Freddie Freeloader" }
                    ]
                }
            })))
            .mount(&server)
            .await;

        let tracks = client(&server).get_album_tracks("101").await.unwrap();
        assert_eq!(tracks[0], Track::new("So What", Some(10.0), 562));
        assert_eq!(tracks[1], Track::new("Freddie Freeloader", None, 0));
    }

    #[tokio::test]
    async fn test_update_album_rating_clamps_and_sends_query() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/library/sections/3/all"))
            .and(query_param("type", "9"))
            .and(query_param("id", "101"))
            .and(query_param("userRating.value", "10"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).update_album_rating("101", 11).await.unwrap();
    }

    #[tokio::test]
    async fn test_auth_failure_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).get_all_albums().await.unwrap_err();
        assert!(matches!(
            err,
            PlexkitError::PlexApi(PlexApiError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(" 0.5 "), Some(Duration::from_millis(500)));
        assert_eq!(parse_retry_after("1e30"), Some(Duration::from_secs(300)));
        assert_eq!(parse_retry_after("-1"), None);
        assert_eq!(parse_retry_after("NaN"), None);
        assert_eq!(parse_retry_after("inf"), None);
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[tokio::test]
    async fn test_negative_retry_after_uses_computed_backoff() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "-1"))
            .expect(1)
            .mount(&server)
            .await;

        let client = PlexClient::new(&server.uri(), "tok", "3", Some(5), Some(1), None).unwrap();
        let err = client.get_all_albums().await.unwrap_err();
        assert!(matches!(err, PlexkitError::RateLimited { .. }));
        assert_eq!(client.rate_limiter().stats().total_429s, 1);
    }

    #[tokio::test]
    async fn test_rate_limited_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/library/metadata/9/children"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/library/metadata/9/children"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "MediaContainer": { "Metadata": [
                    { "ratingKey": "1", "title": "Teardrop", "userRating": 9.0, "duration": 330_000 }
                ]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let tracks = client.get_album_tracks("9").await.unwrap();
        assert_eq!(tracks.len(), 1);

        let stats = client.rate_limiter().stats();
        assert_eq!(stats.total_429s, 1);
        assert_eq!(stats.total_requests, 2);
    }

    #[tokio::test]
    async fn test_paging_stops_when_start_is_ignored() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/library/sections/3/albums"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "MediaContainer": { "Metadata": [album_json("1", "A"), album_json("2", "B")] }
            })))
            .expect(2)
            .mount(&server)
            .await;

        let albums = client(&server)
            .with_container_size(2)
            .get_all_albums()
            .await
            .unwrap();
        let keys: Vec<&str> = albums.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_server_error_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/library/metadata/7/children"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/library/metadata/7/children"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "MediaContainer": { "Metadata": [] }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tracks = client(&server).get_album_tracks("7").await.unwrap();
        assert!(tracks.is_empty());
    }

    #[tokio::test]
    async fn test_server_error_gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server).update_album_rating("1", 5).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}
