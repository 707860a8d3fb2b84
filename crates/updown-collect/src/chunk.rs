//! Splits long fetch ranges into provider-sized chunks.
//!
//! Candle providers cap the number of rows per request, so a range fetch
//! has to be planned as a sequence of bounded sub-ranges up front. The
//! planner is pure; the backfiller owns all I/O.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Errors from chunk planning.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("invalid range: start {start} is not before end {end}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("chunk span is empty: {sample_period_secs}s sample period x {max_points} points")]
    EmptySpan {
        sample_period_secs: i64,
        max_points: usize,
    },
}

/// Half-open `[start, end)` sub-range of a fetch plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeChunk {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeChunk {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl std::fmt::Display for TimeChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Plans contiguous chunks covering `[start, end)` exactly.
///
/// Each chunk spans at most `sample_period * max_points`, so a request
/// for one chunk can never exceed the provider's per-request row cap.
/// Only the final chunk may be shorter.
pub fn plan_chunks(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    sample_period: Duration,
    max_points: usize,
) -> Result<Vec<TimeChunk>, ChunkError> {
    if start >= end {
        return Err(ChunkError::InvalidRange { start, end });
    }

    let span = sample_period * max_points as i32;
    if span <= Duration::zero() {
        return Err(ChunkError::EmptySpan {
            sample_period_secs: sample_period.num_seconds(),
            max_points,
        });
    }

    let mut chunks = Vec::new();
    let mut current = start;
    while current < end {
        let chunk_end = (current + span).min(end);
        chunks.push(TimeChunk {
            start: current,
            end: chunk_end,
        });
        current = chunk_end;
    }

    Ok(chunks)
}
