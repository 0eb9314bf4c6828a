//! Cursor-driven pagination
//!
//! One walker serves every listing endpoint: subreddit pages, user
//! submissions, user comments, and search. Callers supply a fetch
//! closure (cursor in, raw page out) and a parse function; the walker
//! owns the stop conditions.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::parser::ParseError;
use crate::types::Timestamped;
use crate::upstream::UpstreamError;

use super::ScrapeError;

/// Walk parameters. `limit` follows the gateway convention: `0` means
/// one page at the default size, `-1` means walk to a natural stop,
/// positive means accumulate that many items.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Epoch-seconds cutoff; items older than this stop the walk. 0
    /// disables the filter.
    pub since: i64,
    pub limit: i64,
    /// Page ceiling for the walk, mode-specific.
    pub max_pages: u32,
    /// Soft wall-clock deadline; checked between pages once at least
    /// one item is in hand.
    pub deadline: Duration,
    /// Courtesy sleep between pages; zero in single-page mode.
    pub courtesy_delay: Duration,
    /// Cursor to start from, when the caller has one.
    pub initial_after: Option<String>,
}

/// Walk listing pages until a stop condition fires.
///
/// Stop conditions are evaluated in order after each page: positive
/// limit reached, time cutoff hit, empty page or empty cursor, soft
/// deadline exceeded. Cancellation is observed at the top of every
/// page and inside each fetch and sleep; a cancelled walk returns what
/// it has collected, or the cancellation error if that is nothing.
pub async fn walk_pages<T, F, Fut, P>(
    opts: WalkOptions,
    token: &CancellationToken,
    mut fetch_page: F,
    parse_page: P,
) -> Result<Vec<T>, ScrapeError>
where
    T: Timestamped,
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<u8>, UpstreamError>>,
    P: Fn(&[u8]) -> Result<(Vec<T>, Option<String>), ParseError>,
{
    let start = Instant::now();
    let mut items: Vec<T> = Vec::new();
    let mut after = opts.initial_after.clone().unwrap_or_default();
    let mut page = 0u32;

    while page < opts.max_pages {
        if token.is_cancelled() {
            return finish_cancelled(items);
        }
        page += 1;

        let body = match fetch_page(after.clone()).await {
            Ok(body) => body,
            Err(err) if err.is_cancelled() => return finish_cancelled(items),
            Err(err) => return Err(err.into()),
        };

        let (page_items, next_after) = parse_page(&body)?;

        let mut kept = 0usize;
        let mut hit_cutoff = false;
        let mut limit_reached = false;
        for item in page_items {
            if opts.since > 0 && item.created_at().timestamp() < opts.since {
                hit_cutoff = true;
                continue;
            }
            kept += 1;
            items.push(item);
            if opts.limit > 0 && items.len() as i64 >= opts.limit {
                limit_reached = true;
                break;
            }
        }

        debug!(page, kept, total = items.len(), "listing page processed");

        if limit_reached {
            debug!("requested limit reached, stopping pagination");
            break;
        }
        if hit_cutoff {
            debug!("time cutoff reached, stopping pagination");
            break;
        }
        let next = next_after.unwrap_or_default();
        if next.is_empty() || kept == 0 {
            debug!("no more pages available");
            break;
        }
        if start.elapsed() > opts.deadline && !items.is_empty() {
            debug!(elapsed = ?start.elapsed(), "soft deadline reached, returning collected items");
            break;
        }
        after = next;

        if !opts.courtesy_delay.is_zero() {
            let slept = tokio::select! {
                _ = token.cancelled() => false,
                _ = tokio::time::sleep(opts.courtesy_delay) => true,
            };
            if !slept {
                return finish_cancelled(items);
            }
        }
    }

    if opts.limit > 0 && items.len() as i64 > opts.limit {
        items.truncate(opts.limit as usize);
    }
    Ok(items)
}

fn finish_cancelled<T>(items: Vec<T>) -> Result<Vec<T>, ScrapeError> {
    if items.is_empty() {
        Err(ScrapeError::Cancelled)
    } else {
        Ok(items)
    }
}
