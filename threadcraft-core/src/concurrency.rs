//! Bounded fan-out over a batch of independent async tasks.
//!
//! Both runners keep at most `concurrency` invocations in flight and return
//! results in input order regardless of completion order. `concurrency` is
//! clamped to at least one.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;

/// Runs `f` over every item with bounded parallelism.
///
/// The first error is returned as soon as it is observed; invocations still
/// in flight and items not yet started are dropped at that point.
pub async fn run_bounded<I, T, E, F, Fut>(items: Vec<I>, concurrency: usize, f: F) -> Result<Vec<T>, E>
where
    F: FnMut(I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    stream::iter(items)
        .map(f)
        .buffered(concurrency.max(1))
        .try_collect()
        .await
}

/// Like [`run_bounded`], but every invocation settles and each slot keeps
/// its own outcome.
pub async fn run_bounded_settled<I, T, E, F, Fut>(
    items: Vec<I>,
    concurrency: usize,
    f: F,
) -> Vec<Result<T, E>>
where
    F: FnMut(I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    stream::iter(items)
        .map(f)
        .buffered(concurrency.max(1))
        .collect()
        .await
}
