//! Source-data crawler for the TMDB discover API (`reel crawl --year`).
//!
//! Per month: page 1 of `/3/discover/movie` gives `total_pages`; the rest
//! of the pages are fetched with bounded concurrency. Then every movie's
//! detail record is fetched the same way. Results are kept in month → page
//! order (`buffered`, not `buffer_unordered`) so two crawls of the same
//! year produce the same file.

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::StatusCode;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::{Config, CrawlerConfig};
use crate::progress;

/// TMDB serves at most this many discover pages per query.
const MAX_PAGES: u64 = 500;
/// Longest computed wait between 429 retries.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

pub struct TmdbClient {
    client: reqwest::Client,
    host: String,
    token: String,
    image_base: String,
    concurrency: usize,
    max_retries: u32,
    backoff: Duration,
}

impl TmdbClient {
    /// Reads the API read-access token from `TMDB_TOKEN`.
    pub fn from_env(config: &CrawlerConfig) -> Result<Self> {
        let token = std::env::var("TMDB_TOKEN")
            .map_err(|_| anyhow!("TMDB_TOKEN environment variable not set"))?;
        Self::new(config, token)
    }

    pub fn new(config: &CrawlerConfig, token: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("reelvec/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            token,
            image_base: config.image_base.trim_end_matches('/').to_string(),
            concurrency: config.concurrency.max(1),
            max_retries: config.max_retries,
            backoff: Duration::from_secs(1),
        })
    }

    /// Base delay before the first 429 retry; doubles per attempt.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let mut attempt = 0;
        loop {
            let response = self
                .client
                .get(url)
                .bearer_auth(&self.token)
                .header("accept", "application/json")
                .send()
                .await
                .with_context(|| format!("GET {}", url))?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt >= self.max_retries {
                    bail!("GET {}: still rate limited after {} retries", url, attempt);
                }
                let delay = retry_after(&response).unwrap_or_else(|| backoff_delay(self.backoff, attempt));
                tracing::debug!("rate limited on {}, retrying in {:?}", url, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            let response = response
                .error_for_status()
                .with_context(|| format!("GET {}", url))?;
            return response
                .json::<Value>()
                .await
                .with_context(|| format!("GET {}: invalid JSON", url));
        }
    }

    fn discover_url(&self, year: i32, month: u32, page: u64) -> Result<String> {
        let (begin, end) = month_bounds(year, month)?;
        Ok(format!(
            "{}/3/discover/movie?include_adult=false&include_video=false&language=en-US\
             &sort_by=primary_release_date.asc&primary_release_year={}&with_original_language=en\
             &primary_release_date.gte={}&primary_release_date.lte={}&page={}",
            self.host,
            year,
            begin.format("%Y-%m-%d"),
            end.format("%Y-%m-%d"),
            page
        ))
    }

    /// Discover results for one month, in page order.
    pub async fn discover_month(&self, year: i32, month: u32) -> Result<Vec<Value>> {
        let first = self.get_json(&self.discover_url(year, month, 1)?).await?;
        let total_pages = first
            .get("total_pages")
            .and_then(Value::as_u64)
            .unwrap_or(0)
            .min(MAX_PAGES);

        let mut movies = page_results(&first);
        if total_pages > 1 {
            let urls = (2..=total_pages)
                .map(|page| self.discover_url(year, month, page))
                .collect::<Result<Vec<_>>>()?;
            let pages: Vec<Value> = stream::iter(urls)
                .map(|url| async move { self.get_json(&url).await })
                .buffered(self.concurrency)
                .try_collect()
                .await?;
            for page in &pages {
                movies.extend(page_results(page));
            }
        }
        Ok(movies)
    }

    /// Detail records for `movies`, in input order, keeping only those with
    /// an IMDb id and a poster.
    pub async fn details(&self, movies: &[Value]) -> Vec<Value> {
        let ids: Vec<String> = movies
            .iter()
            .filter_map(|m| m.get("id").map(id_string))
            .collect();

        stream::iter(ids)
            .map(|id| async move {
                let url = format!("{}/3/movie/{}", self.host, id);
                match self.get_json(&url).await {
                    Ok(detail) => Some(detail),
                    Err(e) => {
                        tracing::warn!("skipping movie {}: {:#}", id, e);
                        None
                    }
                }
            })
            .buffered(self.concurrency)
            .filter_map(|detail| async move { detail })
            .filter_map(|detail| async move { finish_detail(detail, &self.image_base) })
            .collect()
            .await
    }

    pub async fn crawl_year(&self, year: i32) -> Result<Vec<Value>> {
        let mut year_list = Vec::new();
        for month in 1..=12 {
            let name = month_name(month);
            tracing::info!("Processing month {}", name);
            let listed = self
                .discover_month(year, month)
                .await
                .with_context(|| format!("discover failed for {} {}", name, year))?;
            let movies = self.details(&listed).await;
            tracing::info!("{} has {} records", name, movies.len());
            year_list.extend(movies);
        }
        Ok(year_list)
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// `base × 2^attempt`, capped at [`MAX_BACKOFF`].
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(MAX_BACKOFF)
}

fn page_results(page: &Value) -> Vec<Value> {
    page.get("results")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn id_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// First and last day of `month`.
pub fn month_bounds(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate)> {
    let begin = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| anyhow!("invalid month {}-{}", year, month))?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(|| anyhow!("invalid month {}-{}", year, month))?;
    let end = next
        .pred_opt()
        .ok_or_else(|| anyhow!("invalid month {}-{}", year, month))?;
    Ok((begin, end))
}

fn month_name(month: u32) -> &'static str {
    const NAMES: [&str; 12] = [
        "January", "February", "March", "April", "May", "June", "July", "August",
        "September", "October", "November", "December",
    ];
    NAMES
        .get(month.saturating_sub(1) as usize)
        .copied()
        .unwrap_or("?")
}

/// Drop details without an IMDb id or poster; turn image paths into
/// absolute URLs.
pub fn finish_detail(mut detail: Value, image_base: &str) -> Option<Value> {
    let has = |key: &str| detail.get(key).map(|v| !v.is_null()).unwrap_or(false);
    if !has("imdb_id") || !has("poster_path") {
        return None;
    }
    let obj = detail.as_object_mut()?;
    for key in ["poster_path", "backdrop_path"] {
        if let Some(Value::String(path)) = obj.get(key) {
            let absolute = format!("{}{}", image_base, path);
            obj.insert(key.to_string(), Value::String(absolute));
        }
    }
    Some(detail)
}

/// `movie-data-<year>.json`.
pub fn output_path(dir: &Path, year: i32) -> PathBuf {
    dir.join(format!("movie-data-{}.json", year))
}

/// `reel crawl --year`.
pub async fn run_crawl(config: &Config, year: i32, out_dir: &Path) -> Result<()> {
    let client = TmdbClient::from_env(&config.crawler)?;
    let started = Instant::now();

    let movies = client.crawl_year(year).await?;

    let path = output_path(out_dir, year);
    let json = serde_json::to_string_pretty(&movies)?;
    std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;

    let elapsed = started.elapsed();
    tracing::info!(
        "crawl completed in {} at {:.2} records/sec",
        progress::format_duration(elapsed),
        progress::throughput(movies.len() as u64, elapsed)
    );
    println!("crawl {}", year);
    println!("  records: {}", progress::format_number(movies.len() as u64));
    println!("  output: {}", path.display());
    println!("  duration: {}", progress::format_duration(elapsed));
    println!("ok");
    Ok(())
}
