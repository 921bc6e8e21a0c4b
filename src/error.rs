// src/error.rs

use std::fmt;

use log::warn;
use serde::Serialize;

/// Failures raised by the matching core.
///
/// `IndexBuild` is fatal to a run. `Decode` affects a single row and is
/// normally recorded in a [`SkipLog`] instead of being propagated.
/// `RateLimited` and `Network` are per-query fetch failures.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("Index build failed: {0}")]
    IndexBuild(String),

    #[error("Malformed row {row}: {message}")]
    Decode { row: usize, message: String },

    #[error("Rate limited (HTTP {status})")]
    RateLimited { status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Cache store error: {0}")]
    Cache(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MatchError {
    /// Only rate-limit / temporarily-unavailable responses are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MatchError::RateLimited { .. })
    }
}

/// Reason codes for rows skipped while loading catalogs, queries or cache lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    EmptyText,
    UnknownCategory,
    BadId,
    MalformedRow,
    MalformedCacheLine,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyText => "empty_text",
            Self::UnknownCategory => "unknown_category",
            Self::BadId => "bad_id",
            Self::MalformedRow => "malformed_row",
            Self::MalformedCacheLine => "malformed_cache_line",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedRow {
    pub reason: SkipReason,
    pub row: usize,
    pub message: String,
}

/// Collects rows that were skipped so they can be reported at the end of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SkipLog {
    entries: Vec<SkippedRow>,
}

impl SkipLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, reason: SkipReason, row: usize, message: impl Into<String>) {
        let message = message.into();
        warn!("Skipping row {} ({}): {}", row, reason, message);
        self.entries.push(SkippedRow {
            reason,
            row,
            message,
        });
    }

    /// Records a decode failure under the malformed-row reason.
    pub fn record_error(&mut self, err: &MatchError) {
        match err {
            MatchError::Decode { row, message } => {
                self.record(SkipReason::MalformedRow, *row, message.clone())
            }
            other => self.record(SkipReason::MalformedRow, 0, other.to_string()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[SkippedRow] {
        &self.entries
    }

    pub fn count(&self, reason: SkipReason) -> usize {
        self.entries.iter().filter(|e| e.reason == reason).count()
    }

    pub fn extend(&mut self, other: SkipLog) {
        self.entries.extend(other.entries);
    }
}
