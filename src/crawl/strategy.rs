// src/crawl/strategy.rs
// =============================================================================
// Fan-out: run one async job per item and gather all their outputs.
//
// This is the single place where the configured CrawlStrategy turns into an
// actual scheduling decision. Link recursion, image downloads and transform
// application all go through fan_out, so switching the strategy switches it
// everywhere.
//
// - Sequential: await each job before starting the next one
// - Concurrent: keep up to `limit` jobs in flight on the current task
//               (futures' buffer_unordered)
// - Parallel:   spawn every job onto the tokio worker pool (JoinSet)
//
// The first fatal error is returned immediately. For the Parallel strategy
// the JoinSet is dropped on the way out, which aborts the remaining tasks.
// =============================================================================

use std::future::Future;

use futures::stream::{self, StreamExt};
use tokio::task::JoinSet;

use crate::config::CrawlStrategy;
use crate::error::CrawlError;

pub async fn fan_out<T, U, F, Fut>(
    strategy: CrawlStrategy,
    limit: usize,
    items: Vec<T>,
    job: F,
) -> Result<Vec<U>, CrawlError>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send,
    Fut: Future<Output = Result<Vec<U>, CrawlError>> + Send + 'static,
{
    let mut gathered = Vec::new();

    match strategy {
        CrawlStrategy::Sequential => {
            for item in items {
                gathered.extend(job(item).await?);
            }
        }
        CrawlStrategy::Concurrent => {
            let mut results = stream::iter(items).map(job).buffer_unordered(limit.max(1));
            while let Some(result) = results.next().await {
                gathered.extend(result?);
            }
        }
        CrawlStrategy::Parallel => {
            let mut tasks = JoinSet::new();
            for item in items {
                tasks.spawn(job(item));
            }
            while let Some(joined) = tasks.join_next().await {
                gathered.extend(joined??);
            }
        }
    }

    Ok(gathered)
}
