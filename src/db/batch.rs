// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Best-effort batch writes with per-row fallback.
//!
//! Items are written in chunks of `batch_size`. When a chunk fails as a whole,
//! each of its items is retried on its own so one bad row cannot sink the
//! rest of the chunk.

use crate::error::AppError;
use std::future::Future;

/// Per-item results of a batched write.
#[derive(Debug)]
pub struct BatchReport<T, R> {
    /// Items written, with their results, in input order.
    pub succeeded: Vec<(T, R)>,
    /// Items that failed even when retried alone.
    pub failed: Vec<(T, AppError)>,
    /// Number of chunks that fell back to per-row writes.
    pub degraded_batches: usize,
}

impl<T, R> Default for BatchReport<T, R> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
            degraded_batches: 0,
        }
    }
}

/// Write `items` in chunks via `batch`, retrying failed chunks row by row via `single`.
///
/// `batch` must return one result per input item, in order; a length mismatch
/// is treated as a chunk failure.
pub async fn apply_with_row_fallback<T, R, B, BFut, S, SFut>(
    items: Vec<T>,
    batch_size: usize,
    batch: B,
    single: S,
) -> BatchReport<T, R>
where
    T: Clone,
    B: Fn(Vec<T>) -> BFut,
    BFut: Future<Output = Result<Vec<R>, AppError>>,
    S: Fn(T) -> SFut,
    SFut: Future<Output = Result<R, AppError>>,
{
    let mut report = BatchReport::default();
    let batch_size = batch_size.max(1);

    for chunk in items.chunks(batch_size) {
        let chunk = chunk.to_vec();
        let batch_error = match batch(chunk.clone()).await {
            Ok(results) if results.len() == chunk.len() => {
                report.succeeded.extend(chunk.into_iter().zip(results));
                continue;
            }
            Ok(results) => AppError::Database(format!(
                "Batch returned {} results for {} items",
                results.len(),
                chunk.len()
            )),
            Err(e) => e,
        };

        report.degraded_batches += 1;
        tracing::warn!(
            error = %batch_error,
            items = chunk.len(),
            "Batch write failed, retrying rows individually"
        );

        for item in chunk {
            match single(item.clone()).await {
                Ok(result) => report.succeeded.push((item, result)),
                Err(e) => report.failed.push((item, e)),
            }
        }
    }

    report
}
