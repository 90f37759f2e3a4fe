//! Pre-flight record filter.
//!
//! Runs before any network I/O. A rejected record is skipped, never failed.

use thiserror::Error;

use crate::config::IngestConfig;
use crate::models::RawRecord;

/// Why a record was excluded from ingestion. Skips are terminal and are not
/// counted as errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("title contains non-ASCII characters")]
    NonAsciiTitle,
    #[error("no poster image URL")]
    MissingPoster,
    #[error("failed image check: image type {0}")]
    UnsupportedImageFormat(String),
}

#[derive(Debug, Clone)]
pub struct RecordFilter {
    skip_non_ascii_titles: bool,
}

impl Default for RecordFilter {
    fn default() -> Self {
        Self {
            skip_non_ascii_titles: true,
        }
    }
}

impl RecordFilter {
    pub fn new(skip_non_ascii_titles: bool) -> Self {
        Self {
            skip_non_ascii_titles,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(config.skip_non_ascii_titles)
    }

    /// `Ok(())` when the record should be processed.
    pub fn check(&self, record: &RawRecord) -> Result<(), SkipReason> {
        if self.skip_non_ascii_titles && !record.title.is_ascii() {
            return Err(SkipReason::NonAsciiTitle);
        }
        match record.poster_path.as_deref() {
            Some(url) if !url.trim().is_empty() => Ok(()),
            _ => Err(SkipReason::MissingPoster),
        }
    }

    pub fn should_process(&self, record: &RawRecord) -> bool {
        self.check(record).is_ok()
    }
}
