//! Resampling of irregular odds series onto a fixed grid.
//!
//! The grid is anchored at the first observation and extends through the
//! bucket containing the last one. Buckets average their observations;
//! empty buckets are filled per [`FillPolicy`].

use chrono::Duration;
use rust_decimal::Decimal;
use thiserror::Error;
use updown_common::{FillPolicy, OddsPoint, ResampledPoint};

#[derive(Debug, Error, PartialEq)]
pub enum ResampleError {
    #[error("Invalid grid step: {0} seconds (must be positive)")]
    InvalidGridStep(i64),
}

/// Resamples `points` onto a grid of `grid_step` buckets.
///
/// Observations before the anchor cannot exist when the input is sorted;
/// any that appear (unsorted input) are skipped. Multiple observations
/// in one bucket are averaged. Buckets still empty after filling are
/// omitted from the output rather than extrapolated.
pub fn resample(
    points: &[OddsPoint],
    grid_step: Duration,
    fill: FillPolicy,
) -> Result<Vec<ResampledPoint>, ResampleError> {
    let step_secs = grid_step.num_seconds();
    if step_secs <= 0 {
        return Err(ResampleError::InvalidGridStep(step_secs));
    }
    if points.is_empty() {
        return Ok(Vec::new());
    }

    let anchor = points[0].ts;
    let last = points[points.len() - 1].ts;
    let span_secs = (last - anchor).num_seconds();
    let bucket_count = (span_secs / step_secs) as usize + 1;

    let mut sums = vec![Decimal::ZERO; bucket_count];
    let mut counts = vec![0u32; bucket_count];

    for point in points {
        let offset = (point.ts - anchor).num_seconds();
        if offset < 0 {
            continue;
        }
        let idx = (offset / step_secs) as usize;
        if idx >= bucket_count {
            continue;
        }
        sums[idx] += point.prob;
        counts[idx] += 1;
    }

    let mut values: Vec<Option<Decimal>> = sums
        .into_iter()
        .zip(counts.iter())
        .map(|(sum, &count)| {
            if count > 0 {
                Some(sum / Decimal::from(count))
            } else {
                None
            }
        })
        .collect();

    match fill {
        FillPolicy::Forward => fill_forward(&mut values),
        FillPolicy::Linear => fill_linear(&mut values),
    }

    let out = values
        .into_iter()
        .enumerate()
        .filter_map(|(i, value)| {
            value.map(|prob| ResampledPoint {
                ts: anchor + Duration::seconds(i as i64 * step_secs),
                prob,
                elapsed_hours: (i as i64 * step_secs) as f64 / 3600.0,
            })
        })
        .collect();

    Ok(out)
}

/// Carries the last seen value into empty slots. Leading empties stay
/// empty.
pub fn fill_forward(values: &mut [Option<Decimal>]) {
    let mut last = None;
    for slot in values.iter_mut() {
        match slot {
            Some(v) => last = Some(*v),
            None => *slot = last,
        }
    }
}

/// Linearly interpolates interior gaps between known values. Leading
/// and trailing empties stay empty.
pub fn fill_linear(values: &mut [Option<Decimal>]) {
    let mut prev: Option<usize> = None;
    let mut i = 0;
    while i < values.len() {
        if values[i].is_some() {
            if let Some(p) = prev {
                if i > p + 1 {
                    if let (Some(a), Some(b)) = (values[p], values[i]) {
                        let gap = Decimal::from(i as u64 - p as u64);
                        for k in (p + 1)..i {
                            let frac = Decimal::from(k as u64 - p as u64) / gap;
                            values[k] = Some(a + (b - a) * frac);
                        }
                    }
                }
            }
            prev = Some(i);
        }
        i += 1;
    }
}
