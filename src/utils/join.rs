//! Fan-out helpers
//!
//! Joins a fixed set of fallible futures, keeping the first error observed
//! while still driving every future to completion.

use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;

/// Await every future; return the first error in completion order
///
/// Later errors are logged at debug level and dropped. An empty input
/// resolves immediately with `Ok(())`.
pub async fn join_all_first_error<I, F, E>(operations: I) -> Result<(), E>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let mut pending: FuturesUnordered<F> = operations.into_iter().collect();
    let mut first_error = None;

    while let Some(result) = pending.next().await {
        if let Err(e) = result {
            if first_error.is_none() {
                first_error = Some(e);
            } else {
                tracing::debug!("Dropping additional fan-out error: {}", e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Run fallible operations in order, keeping the first error
///
/// Every operation runs even after a failure.
pub fn run_all_first_error<I, E>(operations: I) -> Result<(), E>
where
    I: IntoIterator<Item = Result<(), E>>,
{
    let mut first_error = None;
    for result in operations {
        if let Err(e) = result {
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
