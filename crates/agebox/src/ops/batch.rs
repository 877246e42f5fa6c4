//! Id resolution and per-secret batch execution shared by every box
//! operation.
//!
//! Units of work never stop the batch: each failure is kept and merged
//! into one `AggregateError` at the end. With more than one worker the
//! units run on scoped threads; every worker keeps its own partial
//! results which are merged after join, so no failure can be lost to a
//! race and the merged output keeps the input order.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::error::{is_cancellation, AggregateError, BoxError, SecretFailure, Stage};
use crate::process::IdProcessor;

/// Canonical ids in scope plus the raw ids that could not be resolved
#[derive(Debug, Default)]
pub struct Resolved {
    pub ids: Vec<String>,
    pub failures: Vec<SecretFailure>,
}

/// Resolve every raw id. Excluded ids are dropped silently, duplicates
/// keep their first position, resolution errors are recorded per id.
pub fn resolve_ids(
    ctx: &CancellationToken,
    processor: &dyn IdProcessor,
    raw_ids: &[String],
) -> Result<Resolved, BoxError> {
    let mut resolved = Resolved::default();
    let mut seen = HashSet::new();

    for raw in raw_ids {
        if ctx.is_cancelled() {
            return Err(BoxError::Cancelled);
        }

        match processor.process_id(ctx, raw) {
            Ok(Some(id)) if !id.is_empty() => {
                if seen.insert(id.clone()) {
                    resolved.ids.push(id);
                }
            }
            Ok(_) => debug!(id = %raw, "secret excluded"),
            Err(e) if is_cancellation(&e) => return Err(BoxError::Cancelled),
            Err(e) => {
                let error = format!("{:#}", e);
                warn!(id = %raw, %error, "could not resolve secret id");
                resolved.failures.push(SecretFailure::new(raw.as_str(), Stage::Resolve, e));
            }
        }
    }

    Ok(resolved)
}

/// What a batch produced
#[derive(Debug)]
pub struct BatchOutcome<T> {
    /// Successful units, in input order
    pub done: Vec<(String, T)>,
    /// Failed units, in input order
    pub failures: Vec<SecretFailure>,
    /// The batch was cancelled before every unit finished
    pub cancelled: bool,
}

impl<T> BatchOutcome<T> {
    /// Fold earlier failures (usually resolution ones) and this batch into
    /// the operation result
    pub fn conclude(self, mut prior: Vec<SecretFailure>) -> Result<Vec<(String, T)>, BoxError> {
        if self.cancelled || self.failures.iter().any(|f| is_cancellation(&f.source)) {
            return Err(BoxError::Cancelled);
        }

        prior.extend(self.failures);
        match AggregateError::from_failures(prior) {
            Some(agg) => Err(agg.into()),
            None => Ok(self.done),
        }
    }
}

type UnitResult<T> = (usize, String, Result<T, SecretFailure>);

/// Run `unit` for every id with at most `workers` in flight.
pub fn run_batch<T, F>(ctx: &CancellationToken, ids: &[String], workers: usize, unit: F) -> BatchOutcome<T>
where
    T: Send,
    F: Fn(&str) -> Result<T, SecretFailure> + Sync,
{
    let workers = workers.clamp(1, ids.len().max(1));
    let cursor = AtomicUsize::new(0);

    let work = || {
        let mut results: Vec<UnitResult<T>> = vec![];
        let mut cancelled = false;
        loop {
            if ctx.is_cancelled() {
                cancelled = cursor.load(Ordering::SeqCst) < ids.len();
                break;
            }
            let i = cursor.fetch_add(1, Ordering::SeqCst);
            let Some(id) = ids.get(i) else { break };

            let result = unit(id.as_str());
            if let Err(failure) = &result {
                let error = format!("{:#}", failure.source);
                warn!(id = %id, stage = %failure.stage, %error, "secret failed");
            }
            results.push((i, id.clone(), result));
        }
        (results, cancelled)
    };

    let partials: Vec<(Vec<UnitResult<T>>, bool)> = if workers == 1 {
        vec![work()]
    } else {
        thread::scope(|s| {
            let handles: Vec<_> = (0..workers).map(|_| s.spawn(&work)).collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        })
    };

    // A unit may observe cancellation after the cursor ran past the end
    let mut cancelled = ctx.is_cancelled();
    let mut merged = vec![];
    for (results, worker_cancelled) in partials {
        cancelled |= worker_cancelled;
        merged.extend(results);
    }
    merged.sort_by_key(|(i, _, _)| *i);

    let mut outcome = BatchOutcome {
        done: vec![],
        failures: vec![],
        cancelled,
    };
    for (_, id, result) in merged {
        match result {
            Ok(value) => outcome.done.push((id, value)),
            Err(failure) => outcome.failures.push(failure),
        }
    }
    outcome
}
