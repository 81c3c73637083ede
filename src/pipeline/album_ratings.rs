//! Album ratings pipeline.
//!
//! Pipeline flow:
//! Albums → (skip rated) → Tracks → Scoring → (Update: write back) → Results
//!
//! Albums are processed concurrently under a semaphore; results keep the
//! library order.

use crate::client::PlexClient;
use crate::models::{
    Album, AlbumRatingsConfig, AlbumResult, Result, RunMode, RunStats, Status,
};
use crate::rating::{
    RatingOutcome, calculate_album_rating, filter_tracks, round_half_up, track_stats,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Output of a pipeline run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// One row per album, in library order
    pub results: Vec<AlbumResult>,
    pub stats: RunStats,
}

/// Derives album ratings from track ratings for a whole library.
pub struct AlbumRatingPipeline {
    client: Arc<PlexClient>,
    /// Max albums in flight
    concurrency: usize,
    /// Recalculate albums that already have a rating
    rerate: bool,
    show_progress: bool,
}

impl AlbumRatingPipeline {
    /// Create a new pipeline from configuration.
    pub fn new(config: &AlbumRatingsConfig, client: Arc<PlexClient>) -> Self {
        Self {
            client,
            concurrency: config.concurrency.max(1),
            rerate: config.rerate,
            show_progress: true,
        }
    }

    /// Disable the progress bar.
    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");
        pb.set_style(style);
        pb
    }

    /// Process a single album.
    ///
    /// Never fails: problems end up as a `Failed` row with the reason.
    pub async fn process_album(
        client: &PlexClient,
        album: &Album,
        mode: RunMode,
        rerate: bool,
    ) -> AlbumResult {
        if album.user_rating.is_some() && !rerate {
            return AlbumResult::new(album, None, Some("Album already rated".to_string()));
        }

        let tracks = match client.get_album_tracks(&album.key).await {
            Ok(tracks) => tracks,
            Err(e) => {
                warn!(album = %album.title, error = %e, "Fetching tracks failed");
                return AlbumResult::failed(album, format!("Failed to fetch tracks: {e}"));
            }
        };

        let rating = match calculate_album_rating(&tracks) {
            RatingOutcome::Rated(rating) => rating,
            RatingOutcome::Skipped(reason) => {
                debug!(album = %album.title, reason = %reason, "Album skipped");
                return AlbumResult::new(album, None, Some(reason));
            }
        };

        let mut result = AlbumResult::new(album, Some(rating), None);

        if let Some(stats) = track_stats(&filter_tracks(&tracks)) {
            result.rating_adjustment = Some(round_half_up((f64::from(rating) - stats.avg).abs(), 2));
            result.avg_rating = Some(round_half_up(stats.avg, 2));
            result.lowest_track = Some(stats.min);
            result.highest_track = Some(stats.max);
        }

        if mode == RunMode::Update {
            match client.update_album_rating(&album.key, rating).await {
                Ok(()) => result.status = Status::Success,
                Err(e) => {
                    warn!(album = %album.title, error = %e, "Updating rating failed");
                    result.status = Status::Failed;
                    result.reason = Some(format!("Failed to update rating: {e}"));
                }
            }
        }

        result
    }

    /// Rate every album of the library.
    pub async fn run(&self, mode: RunMode) -> Result<RunOutput> {
        let start = Instant::now();

        let albums = self.client.get_all_albums().await?;
        let total = albums.len();

        info!(
            total_albums = total,
            mode = %mode,
            concurrency = self.concurrency,
            "Processing albums"
        );

        let pb = self.progress_bar(total);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(total);

        for album in albums {
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&semaphore);
            let rerate = self.rerate;
            let task_album = album.clone();
            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return AlbumResult::failed(&task_album, "Semaphore closed");
                };
                Self::process_album(&client, &task_album, mode, rerate).await
            });
            handles.push((album, handle));
        }

        let mut stats = RunStats {
            total_albums: total,
            ..Default::default()
        };
        let mut results = Vec::with_capacity(total);

        for (album, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(album = %album.title, error = %e, "Task panicked");
                    AlbumResult::failed(&album, format!("Task failed: {e}"))
                }
            };

            stats.record(result.status);
            results.push(result);

            pb.set_position(stats.completed() as u64);
            pb.set_message(format!(
                "updated: {}, skipped: {}, failed: {}",
                stats.processed(),
                stats.skipped,
                stats.failed
            ));
        }

        pb.finish_with_message(format!(
            "Done! {} rated, {} skipped, {} failed",
            stats.processed(),
            stats.skipped,
            stats.failed
        ));

        stats.runtime_secs = start.elapsed().as_secs_f64();

        info!(
            rated = stats.processed(),
            skipped = stats.skipped,
            failed = stats.failed,
            runtime = format!("{:.1}s", stats.runtime_secs),
            "Album ratings complete"
        );

        Ok(RunOutput { results, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tracks_json(ratings: &[Option<f64>]) -> serde_json::Value {
        let items: Vec<_> = ratings
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let mut item = json!({
                    "ratingKey": format!("t{i}"),
                    "title": format!("Track {}", i + 1),
                    "duration": 240_000
                });
                if let Some(r) = r {
                    item["userRating"] = json!(r);
                }
                item
            })
            .collect();
        json!({ "MediaContainer": { "Metadata": items } })
    }

    async fn library() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/library/sections/3/albums"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "MediaContainer": { "Metadata": [
                    { "ratingKey": "1", "title": "Good", "parentTitle": "Band" },
                    { "ratingKey": "2", "title": "Rated", "parentTitle": "Band", "userRating": 6.0 },
                    { "ratingKey": "3", "title": "Partial", "parentTitle": "Band" },
                    { "ratingKey": "4", "title": "Broken", "parentTitle": "Band" }
                ]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/library/metadata/1/children"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(tracks_json(&[Some(8.0), Some(8.0), Some(8.0)])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/library/metadata/3/children"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(tracks_json(&[Some(8.0), None, Some(6.0)])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/library/metadata/4/children"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        server
    }

    fn pipeline(server: &MockServer, concurrency: usize) -> AlbumRatingPipeline {
        let client = PlexClient::new(&server.uri(), "tok", "3", Some(5), Some(2), None)
            .unwrap()
            .with_retry_backoff(Duration::from_millis(1));
        let config = AlbumRatingsConfig {
            concurrency,
            ..Default::default()
        };
        AlbumRatingPipeline::new(&config, Arc::new(client)).without_progress()
    }

    #[tokio::test]
    async fn test_preview_run_never_writes() {
        let server = library().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let output = pipeline(&server, 2).run(RunMode::Preview).await.unwrap();
        let results = &output.results;
        assert_eq!(results.len(), 4);
        let titles: Vec<&str> = results.iter().map(|r| r.album.as_str()).collect();
        assert_eq!(titles, vec!["Good", "Rated", "Partial", "Broken"]);

        assert_eq!(results[0].status, Status::Preview);
        assert_eq!(results[0].rating, Some(9));
        assert_eq!(results[0].avg_rating, Some(8.0));
        assert_eq!(results[0].rating_adjustment, Some(1.0));
        assert_eq!(results[0].lowest_track, Some(8.0));
        assert_eq!(results[0].highest_track, Some(8.0));

        assert_eq!(results[1].status, Status::Skipped);
        assert_eq!(results[1].reason.as_deref(), Some("Album already rated"));

        assert_eq!(results[2].status, Status::Skipped);
        assert_eq!(
            results[2].reason.as_deref(),
            Some("Has 1 unrated tracks (min: 6.0, avg: 7.0)")
        );

        assert_eq!(results[3].status, Status::Failed);
        assert!(results[3].reason.as_deref().unwrap().starts_with("Failed to fetch tracks"));

        let stats = &output.stats;
        assert_eq!(stats.total_albums, 4);
        assert_eq!(stats.previewed, 1);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_update_run_writes_ratings() {
        let server = library().await;
        Mock::given(method("PUT"))
            .and(path("/library/sections/3/all"))
            .and(query_param("id", "1"))
            .and(query_param("userRating.value", "9"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let output = pipeline(&server, 1).run(RunMode::Update).await.unwrap();
        assert_eq!(output.results[0].status, Status::Success);
        assert_eq!(output.stats.updated, 1);
        assert_eq!(output.stats.previewed, 0);
        assert_eq!(output.stats.processed(), 1);
    }

    #[tokio::test]
    async fn test_failed_update_recorded() {
        let server = library().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(400).set_body_string("nope"))
            .mount(&server)
            .await;

        let output = pipeline(&server, 1).run(RunMode::Update).await.unwrap();
        assert_eq!(output.results[0].status, Status::Failed);
        assert_eq!(output.results[0].rating, Some(9));
        assert!(output.results[0]
            .reason
            .as_deref()
            .unwrap()
            .starts_with("Failed to update rating"));
        assert_eq!(output.stats.failed, 2);
    }

    #[tokio::test]
    async fn test_rerate_processes_rated_albums() {
        let server = library().await;
        Mock::given(method("GET"))
            .and(path("/library/metadata/2/children"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(tracks_json(&[Some(6.0), Some(6.0), Some(6.0)])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = PlexClient::new(&server.uri(), "tok", "3", Some(5), Some(1), None).unwrap();
        let config = AlbumRatingsConfig {
            rerate: true,
            ..Default::default()
        };
        let output = AlbumRatingPipeline::new(&config, Arc::new(client))
            .without_progress()
            .run(RunMode::Preview)
            .await
            .unwrap();
        assert_eq!(output.results[1].status, Status::Preview);
        assert_eq!(output.results[1].rating, Some(6));
    }

    #[tokio::test]
    async fn test_album_listing_failure_aborts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        assert!(pipeline(&server, 1).run(RunMode::Preview).await.is_err());
    }
}
