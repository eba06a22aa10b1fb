// src/crawl/traversal.rs
// =============================================================================
// This module implements the recursive page traversal.
//
// How it works:
// 1. Mark the URL as visited. If it already was, stop: nothing to do.
// 2. Fetch the page.
// 3. At the same time:
//    a. send the page's images through the image pipeline
//    b. if depth budget is left, crawl every linked page with depth - 1
// 4. Merge both lists of produced images and hand them back up.
//
// Depth:
//   The root is crawled with the full budget (max_depth). Each link hop
//   spends one unit. At 0 the page's images are still processed but its
//   links are not followed. max_depth = 0 means "just the root page".
//
// Errors:
//   A page that fails to load with a transient error only loses its own
//   branch: we log it and return no images. Fatal errors (e.g. the server
//   refuses our credentials) travel all the way up and end the crawl.
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::try_join;
use tracing::{debug, trace, warn};

use super::strategy::fan_out;
use super::CrawlContext;
use crate::config::CrawlStrategy;
use crate::error::CrawlError;
use crate::imaging::Image;
use crate::page::{ElementKind, Page};

// Crawls one page and everything reachable from it within `depth` hops
//
// Returns a boxed future because the function is recursive: an async fn
// that awaits itself would have an infinitely sized future type.
pub fn crawl_page(
    ctx: Arc<CrawlContext>,
    url: String,
    depth: usize,
) -> BoxFuture<'static, Result<Vec<Arc<Image>>, CrawlError>> {
    async move {
        // insert() returns false if another branch got here first
        if !ctx.visited.insert(url.clone()) {
            trace!(url = %url, "already visited");
            return Ok(Vec::new());
        }

        debug!(url = %url, depth, "crawling page");

        let page = match ctx.fetcher.fetch_page(&url).await {
            Ok(page) => page,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(url = %url, error = %e, "skipping page");
                return Ok(Vec::new());
            }
        };
        ctx.pages_visited.fetch_add(1, Ordering::SeqCst);

        images_on_page_and_links(ctx, page, depth).await
    }
    .boxed()
}

// Processes the page's own images and its linked pages side by side
async fn images_on_page_and_links(
    ctx: Arc<CrawlContext>,
    page: Page,
    depth: usize,
) -> Result<Vec<Arc<Image>>, CrawlError> {
    let on_page = ctx
        .pipeline
        .clone()
        .images_on_page(page.elements_as_strings(ElementKind::Image));
    let on_links = images_on_page_links(ctx.clone(), &page, depth);

    let (mut images, linked) = match ctx.config.strategy {
        CrawlStrategy::Sequential => (on_page.await?, on_links.await?),
        CrawlStrategy::Concurrent | CrawlStrategy::Parallel => try_join!(on_page, on_links)?,
    };

    images.extend(linked);
    Ok(images)
}

// Recursively crawls every in-scope link on the page
async fn images_on_page_links(
    ctx: Arc<CrawlContext>,
    page: &Page,
    depth: usize,
) -> Result<Vec<Arc<Image>>, CrawlError> {
    if depth == 0 {
        return Ok(Vec::new());
    }

    let links: Vec<String> = page
        .elements_as_urls(ElementKind::PageLink)
        .into_iter()
        .filter(|link| ctx.in_scope(link))
        .map(String::from)
        .collect();

    trace!(url = %page.url(), links = links.len(), "following links");

    let strategy = ctx.config.strategy;
    let limit = ctx.config.concurrency;
    fan_out(strategy, limit, links, move |link| {
        crawl_page(ctx.clone(), link, depth - 1)
    })
    .await
}

// -----------------------------------------------------------------------------
// NOTES:
//
// 1. Why is the visited check an insert and not contains() + insert()?
//    - Two branches can reach the same page at the same moment
//    - contains() then insert() leaves a gap where both see "not visited"
//    - DashSet::insert checks and inserts under one lock and tells us
//      whether we were first
//
// 2. Why can an image show up on many pages but be counted once?
//    - The pipeline downloads each URL once and claims each
//      (image, transform) pair once, so a second page that shows the same
//      image gets nothing new back
//
// 3. What does try_join! do?
//    - Polls both futures concurrently on the current task
//    - Returns both results, or the first error
// -----------------------------------------------------------------------------
