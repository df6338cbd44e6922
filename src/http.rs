//! HTTP client for the Strava API with rate limiting.
//!
//! This module provides ride fetching with:
//! - Paginated activity listing with a progress callback
//! - Optional per-ride detail requests for full-resolution polylines
//! - Rate limiting (100 req / 15 min, 1000 req / day)
//! - Automatic retry with exponential backoff on 429 and transport errors
//! - Transparent token refresh when OAuth credentials are available

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::auth::{StravaAuth, TokenSet};
use crate::error::{ColHunterError, Result};
use crate::ride::{RawRide, RideMap};

const API_BASE: &str = "https://www.strava.com/api/v3";

// API rate limits
const SHORT_LIMIT: usize = 100; // Max requests per 15 minutes
const SHORT_WINDOW: Duration = Duration::from_secs(15 * 60);
const DAILY_LIMIT: usize = 1000; // Max requests per day
const DAILY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

const MAX_RETRIES: u32 = 3;

/// Largest page the listing endpoint serves.
pub const PER_PAGE: usize = 200;

/// Progress callback: `(fetched, total)`. `total` is 0 while unknown.
pub type ProgressCallback = Arc<dyn Fn(u32, u32) + Send + Sync>;

/// Subset of the detailed activity response.
#[derive(Debug, Deserialize)]
struct DetailedActivity {
    #[serde(default)]
    map: RideMap,
}

/// Rate limiter using two sliding windows
struct RateLimiter {
    request_times: Mutex<VecDeque<Instant>>,
    consecutive_429s: AtomicU32,
    short_limit: usize,
    short_window: Duration,
    daily_limit: usize,
    daily_window: Duration,
}

impl RateLimiter {
    fn new() -> Self {
        Self::with_limits(SHORT_LIMIT, SHORT_WINDOW, DAILY_LIMIT, DAILY_WINDOW)
    }

    fn with_limits(
        short_limit: usize,
        short_window: Duration,
        daily_limit: usize,
        daily_window: Duration,
    ) -> Self {
        Self {
            request_times: Mutex::new(VecDeque::with_capacity(short_limit + 10)),
            consecutive_429s: AtomicU32::new(0),
            short_limit,
            short_window,
            daily_limit,
            daily_window,
        }
    }

    /// Time to wait before the next request may go out, if any.
    fn wait_time(&self, times: &mut VecDeque<Instant>, now: Instant) -> Option<Duration> {
        // Prune requests outside the longest window
        while times
            .front()
            .is_some_and(|&t| now.duration_since(t) >= self.daily_window)
        {
            times.pop_front();
        }

        if times.len() >= self.daily_limit {
            let oldest = *times.front()?;
            return (oldest + self.daily_window).checked_duration_since(now);
        }

        let in_short: Vec<Instant> = times
            .iter()
            .copied()
            .filter(|&t| now.duration_since(t) < self.short_window)
            .collect();
        if in_short.len() >= self.short_limit {
            let oldest = *in_short.first()?;
            return (oldest + self.short_window).checked_duration_since(now);
        }

        None
    }

    async fn wait_if_needed(&self) {
        loop {
            let wait_time = {
                let mut times = self.request_times.lock().await;
                self.wait_time(&mut times, Instant::now())
            };

            match wait_time {
                Some(duration) if !duration.is_zero() => {
                    info!("[StravaFetcher] Rate limit: waiting {:?}", duration);
                    tokio::time::sleep(duration).await;
                }
                _ => break,
            }
        }
    }

    async fn record_request(&self) {
        let mut times = self.request_times.lock().await;
        times.push_back(Instant::now());
    }

    fn record_success(&self) {
        self.consecutive_429s.store(0, Ordering::Relaxed);
    }

    fn record_429(&self) -> Duration {
        let count = self.consecutive_429s.fetch_add(1, Ordering::Relaxed) + 1;
        // Exponential backoff: 2s, 4s, 8s, 16s...
        let backoff_ms = 1000 * (1u64 << count.min(4));
        Duration::from_millis(backoff_ms)
    }
}

/// Strava ride fetcher
pub struct StravaFetcher {
    client: Client,
    tokens: Mutex<TokenSet>,
    auth: Option<StravaAuth>,
    rate_limiter: Arc<RateLimiter>,
}

impl StravaFetcher {
    /// Create a fetcher from a bare access token. It is never refreshed.
    pub fn new(access_token: &str) -> Result<Self> {
        let tokens = TokenSet {
            access_token: access_token.to_string(),
            refresh_token: String::new(),
            expires_at: i64::MAX,
        };
        Self::with_tokens(tokens, None)
    }

    /// Create a fetcher that refreshes `tokens` through `auth` when they
    /// expire.
    pub fn with_tokens(tokens: TokenSet, auth: Option<StravaAuth>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ColHunterError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            tokens: Mutex::new(tokens),
            auth,
            rate_limiter: Arc::new(RateLimiter::new()),
        })
    }

    /// Current token set, including any refresh done by the fetcher.
    pub async fn tokens(&self) -> TokenSet {
        self.tokens.lock().await.clone()
    }

    async fn access_token(&self) -> Result<String> {
        let mut tokens = self.tokens.lock().await;
        if tokens.is_expired_now() {
            match &self.auth {
                Some(auth) => *tokens = auth.refresh(&tokens).await?,
                None => debug!("[StravaFetcher] Token expired and no credentials to refresh it"),
            }
        }
        Ok(tokens.access_token.clone())
    }

    /// List the athlete's activities, newest first.
    ///
    /// Pages through the listing until an empty page or until `limit`
    /// activities were collected. Every activity kind is returned; filtering
    /// happens at normalization.
    pub async fn fetch_rides(
        &self,
        limit: Option<usize>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Vec<RawRide>> {
        let url = format!("{}/athlete/activities", API_BASE);
        let total = limit.unwrap_or(0) as u32;
        let start = Instant::now();
        let mut rides: Vec<RawRide> = Vec::new();
        let mut pager = Pager::new(limit);

        info!("[StravaFetcher] Listing activities (limit: {:?})", limit);

        while let Some(page) = pager.next_page() {
            let batch: Vec<RawRide> = self
                .get_json(&url, &[("page", page), ("per_page", pager.per_page)])
                .await?;
            debug!(
                "[StravaFetcher] Page {} returned {} activities",
                page,
                batch.len()
            );

            pager.record(batch.len());
            rides.extend(batch);
            if let Some(ref cb) = on_progress {
                cb(pager.progress() as u32, total);
            }
        }

        if let Some(limit) = limit {
            rides.truncate(limit);
        }

        info!(
            "[StravaFetcher] Listed {} activities over {} pages in {:.2}s",
            rides.len(),
            pager.pages_requested(),
            start.elapsed().as_secs_f64()
        );
        Ok(rides)
    }

    /// Fill in the full-resolution polyline of each ride that lacks one.
    ///
    /// Requests go out one at a time under the rate limiter. Returns the
    /// number of rides updated.
    pub async fn fetch_details(
        &self,
        rides: &mut [RawRide],
        on_progress: Option<ProgressCallback>,
    ) -> Result<usize> {
        let pending: Vec<usize> = rides
            .iter()
            .enumerate()
            .filter(|(_, r)| r.map.polyline.as_deref().map_or(true, str::is_empty))
            .map(|(i, _)| i)
            .collect();
        let total = pending.len() as u32;

        info!("[StravaFetcher] Fetching details for {} rides", total);

        let mut updated = 0;
        for (done, index) in pending.into_iter().enumerate() {
            let ride = &mut rides[index];
            let url = format!("{}/activities/{}", API_BASE, ride.id);
            let detail: DetailedActivity = self.get_json(&url, &[]).await?;
            if let Some(polyline) = detail.map.polyline.filter(|p| !p.is_empty()) {
                ride.map.polyline = Some(polyline);
                updated += 1;
            }
            if let Some(ref cb) = on_progress {
                cb(done as u32 + 1, total);
            }
        }

        Ok(updated)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, usize)]) -> Result<T> {
        let mut retries = 0;

        loop {
            let token = self.access_token().await?;

            // Wait for rate limit
            self.rate_limiter.wait_if_needed().await;

            let response = self
                .client
                .get(url)
                .bearer_auth(&token)
                .query(query)
                .send()
                .await;

            self.rate_limiter.record_request().await;

            match response {
                Ok(resp) => {
                    let status = resp.status();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        retries = count_retry(retries, Some(status.as_u16()), || {
                            "Max retries exceeded".to_string()
                        })?;

                        let backoff = self.rate_limiter.record_429();
                        warn!(
                            "[StravaFetcher] 429 for {}, retry {} after {:?}",
                            url, retries, backoff
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    if status == StatusCode::UNAUTHORIZED {
                        return Err(ColHunterError::AuthExpired);
                    }

                    if !status.is_success() {
                        return Err(ColHunterError::RideFetchFailed {
                            message: format!("GET {}", url),
                            status_code: Some(status.as_u16()),
                        });
                    }

                    self.rate_limiter.record_success();
                    return resp
                        .json::<T>()
                        .await
                        .map_err(|e| ColHunterError::RideFetchFailed {
                            message: format!("Parse error: {}", e),
                            status_code: None,
                        });
                }
                Err(e) => {
                    retries = count_retry(retries, None, || format!("Request error: {}", e))?;

                    let backoff = Duration::from_millis(500 * (1 << retries));
                    warn!(
                        "[StravaFetcher] Error for {}: {}, retry {} after {:?}",
                        url, e, retries, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// Offset pagination over the activity listing.
///
/// The page size stays fixed because the API offsets pages by `per_page`.
/// Listing ends on an empty or short page, or once `limit` activities are in.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Pager {
    limit: Option<usize>,
    per_page: usize,
    page: usize,
    fetched: usize,
    done: bool,
}

impl Pager {
    fn new(limit: Option<usize>) -> Self {
        let per_page = limit.map_or(PER_PAGE, |l| l.min(PER_PAGE));
        Self {
            limit,
            per_page,
            page: 1,
            fetched: 0,
            done: per_page == 0,
        }
    }

    /// Page number to request next, if any.
    fn next_page(&self) -> Option<usize> {
        (!self.done).then_some(self.page)
    }

    fn record(&mut self, batch_len: usize) {
        self.fetched += batch_len;
        let limit_reached = self.limit.map_or(false, |l| self.fetched >= l);
        if batch_len < self.per_page || limit_reached {
            self.done = true;
        } else {
            self.page += 1;
        }
    }

    /// Activities fetched so far, capped at the limit.
    fn progress(&self) -> usize {
        self.limit.map_or(self.fetched, |l| self.fetched.min(l))
    }

    fn pages_requested(&self) -> usize {
        if self.per_page == 0 {
            0
        } else {
            self.page
        }
    }
}

/// Count one more retry, failing once `MAX_RETRIES` is exceeded.
fn count_retry(
    retries: u32,
    status_code: Option<u16>,
    message: impl FnOnce() -> String,
) -> Result<u32> {
    let retries = retries + 1;
    if retries > MAX_RETRIES {
        return Err(ColHunterError::RideFetchFailed {
            message: message(),
            status_code,
        });
    }
    Ok(retries)
}
