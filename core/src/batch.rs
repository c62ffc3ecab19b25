//! Full-collection drain over a paginated endpoint.
//!
//! # Design
//! The first page is fetched alone to learn the collection's total `size`.
//! The remaining offsets are then fetched by a small pool of workers that
//! claim offsets from a shared cursor, so at most `concurrency_limit` pages
//! are in flight at once and a slow page never stalls the others. Every
//! result is tagged with its offset index and reassembled in ascending
//! offset order, whatever order the network completes in.
//!
//! Everything runs as cooperative futures on the caller's executor; nothing
//! is spawned.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

use crate::types::{BatchResult, ListResponse};

pub const DEFAULT_LIMIT: u64 = 1000;
pub const DEFAULT_EXPAND_LIMIT: u64 = 100;
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 3;

/// Page-size and parallelism policy for `batch_get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BatchConfig {
    /// Page size for plain list requests.
    pub limit: u64,
    /// Page size when the request expands nested entities.
    pub expand_limit: u64,
    /// Maximum number of page requests in flight.
    pub concurrency_limit: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            expand_limit: DEFAULT_EXPAND_LIMIT,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
        }
    }
}

impl BatchConfig {
    pub fn page_size(&self, has_expand: bool) -> u64 {
        let size = if has_expand { self.expand_limit } else { self.limit };
        size.max(1)
    }
}

/// Fetch every row of a paginated collection.
///
/// `page_fetch(limit, offset)` must be safe to call concurrently with
/// different offsets. The returned context is the first page's; later pages
/// are assumed to carry the same one. The first failing page fails the whole
/// drain and no partial rows are returned.
pub async fn batch_get<T, C, E, F, Fut>(
    config: &BatchConfig,
    page_fetch: F,
    has_expand: bool,
) -> Result<BatchResult<T, C>, E>
where
    F: Fn(u64, u64) -> Fut,
    Fut: Future<Output = Result<ListResponse<T, C>, E>>,
{
    let page_size = config.page_size(has_expand);

    let first = page_fetch(page_size, 0).await?;
    let size = first.meta.size;
    let context = first.context;
    let mut rows = first.rows;

    if size <= page_size {
        return Ok(BatchResult { rows, context });
    }

    let offsets: Vec<u64> = (1u64..)
        .map_while(|page| page.checked_mul(page_size))
        .take_while(|offset| *offset < size)
        .collect();
    tracing::debug!(
        page_size,
        size,
        pages = offsets.len() + 1,
        concurrency = config.concurrency_limit,
        "draining remaining pages"
    );

    let pages = for_each_bounded(offsets, config.concurrency_limit, |offset| {
        tracing::trace!(offset, limit = page_size, "fetching page");
        page_fetch(page_size, offset)
    })
    .await?;

    for page in pages {
        rows.extend(page.rows);
    }
    Ok(BatchResult { rows, context })
}

/// Run `f` over every item with at most `limit` calls in flight, returning
/// the outputs in input order.
///
/// Fails with the first error any call produces; calls still in flight at
/// that point are dropped.
pub async fn for_each_bounded<I, R, E, F, Fut>(
    items: Vec<I>,
    limit: usize,
    f: F,
) -> Result<Vec<R>, E>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let cursor = AtomicUsize::new(0);
    let workers = limit.max(1).min(items.len());
    let finished = try_join_all((0..workers).map(|_| worker(&cursor, &items, &f))).await?;

    let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(items.len()).collect();
    for (index, output) in finished.into_iter().flatten() {
        slots[index] = Some(output);
    }
    // Every index below `items.len()` was claimed by exactly one worker, and
    // each worker only stops once the cursor is past the end.
    Ok(slots.into_iter().flatten().collect())
}

async fn worker<I, R, E, F, Fut>(
    cursor: &AtomicUsize,
    items: &[I],
    f: &F,
) -> Result<Vec<(usize, R)>, E>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let mut done = Vec::new();
    loop {
        let index = cursor.fetch_add(1, Ordering::Relaxed);
        let Some(item) = items.get(index) else {
            return Ok(done);
        };
        done.push((index, f(item.clone()).await?));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::types::ListMeta;

    /// Fake collection of `size` sequential integers.
    struct Dataset {
        size: u64,
        calls: AtomicU64,
        seen: Mutex<Vec<(u64, u64)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl Dataset {
        fn new(size: u64) -> Self {
            Self {
                size,
                calls: AtomicU64::new(0),
                seen: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }

        async fn fetch(&self, limit: u64, offset: u64) -> Result<ListResponse<u64, String>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push((limit, offset));
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            // Later offsets finish first.
            let page = offset / limit.max(1);
            tokio::time::sleep(Duration::from_millis(30u64.saturating_sub(page.min(30)))).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let end = (offset + limit).min(self.size);
            Ok(ListResponse {
                context: format!("ctx@{offset}"),
                meta: ListMeta {
                    size: self.size,
                    limit: Some(limit),
                    offset: Some(offset),
                    href: None,
                },
                rows: (offset..end).collect(),
            })
        }
    }

    #[tokio::test]
    async fn drains_with_default_limit() {
        let data = Dataset::new(5555);
        let result = batch_get(&BatchConfig::default(), |l, o| data.fetch(l, o), false)
            .await
            .unwrap();
        assert_eq!(data.calls(), 6);
        assert_eq!(result.rows, (0..5555).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn expand_uses_expand_limit() {
        let data = Dataset::new(5555);
        let result = batch_get(&BatchConfig::default(), |l, o| data.fetch(l, o), true)
            .await
            .unwrap();
        assert_eq!(data.calls(), 56);
        assert_eq!(result.rows.len(), 5555);
        assert!(data.seen.lock().unwrap().iter().all(|(limit, _)| *limit == 100));
    }

    #[tokio::test]
    async fn custom_limit_sets_page_count() {
        let data = Dataset::new(5555);
        let config = BatchConfig {
            limit: 150,
            ..BatchConfig::default()
        };
        let result = batch_get(&config, |l, o| data.fetch(l, o), false).await.unwrap();
        assert_eq!(data.calls(), 5555u64.div_ceil(150));
        assert_eq!(result.rows, (0..5555).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn small_collection_needs_one_call() {
        let data = Dataset::new(5);
        let result = batch_get(&BatchConfig::default(), |l, o| data.fetch(l, o), false)
            .await
            .unwrap();
        assert_eq!(data.calls(), 1);
        assert_eq!(result.rows, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn exact_page_needs_one_call() {
        let data = Dataset::new(1000);
        batch_get(&BatchConfig::default(), |l, o| data.fetch(l, o), false)
            .await
            .unwrap();
        assert_eq!(data.calls(), 1);
    }

    #[tokio::test]
    async fn empty_collection_needs_one_call() {
        let data = Dataset::new(0);
        let result = batch_get(&BatchConfig::default(), |l, o| data.fetch(l, o), false)
            .await
            .unwrap();
        assert_eq!(data.calls(), 1);
        assert!(result.rows.is_empty());
        assert_eq!(result.context, "ctx@0");
    }

    #[tokio::test]
    async fn rows_follow_offsets_not_completion_order() {
        let data = Dataset::new(1000);
        let config = BatchConfig {
            limit: 10,
            concurrency_limit: 8,
            ..BatchConfig::default()
        };
        let result = batch_get(&config, |l, o| data.fetch(l, o), false).await.unwrap();
        assert_eq!(result.rows, (0..1000).collect::<Vec<_>>());
        assert_eq!(result.context, "ctx@0");
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_limit() {
        let data = Dataset::new(2000);
        let config = BatchConfig {
            limit: 50,
            concurrency_limit: 3,
            ..BatchConfig::default()
        };
        batch_get(&config, |l, o| data.fetch(l, o), false).await.unwrap();
        assert_eq!(data.calls(), 40);
        assert!(data.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn zero_concurrency_still_drains() {
        let data = Dataset::new(30);
        let config = BatchConfig {
            limit: 10,
            concurrency_limit: 0,
            ..BatchConfig::default()
        };
        let result = batch_get(&config, |l, o| data.fetch(l, o), false).await.unwrap();
        assert_eq!(result.rows.len(), 30);
        assert_eq!(data.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn first_page_failure_fails_the_drain() {
        let calls = AtomicU64::new(0);
        let result: Result<BatchResult<u64, ()>, String> = batch_get(
            &BatchConfig::default(),
            |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("boom".to_string()) }
            },
            false,
        )
        .await;
        assert_eq!(result.unwrap_err(), "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn later_page_failure_fails_the_drain() {
        let data = Dataset::new(500);
        let config = BatchConfig {
            limit: 100,
            ..BatchConfig::default()
        };
        let result = batch_get(
            &config,
            |limit, offset| {
                let page = data.fetch(limit, offset);
                async move {
                    if offset == 300 {
                        return Err("page 300 failed".to_string());
                    }
                    page.await
                }
            },
            false,
        )
        .await;
        assert_eq!(result.unwrap_err(), "page 300 failed");
    }

    #[tokio::test]
    async fn huge_page_size_stops_before_offset_overflow() {
        let seen = Mutex::new(Vec::new());
        let config = BatchConfig {
            limit: 1 << 63,
            ..BatchConfig::default()
        };
        let result: BatchResult<u64, ()> = batch_get(
            &config,
            |limit, offset| {
                seen.lock().unwrap().push(offset);
                async move {
                    Ok::<_, String>(ListResponse {
                        context: (),
                        meta: ListMeta {
                            size: u64::MAX,
                            limit: Some(limit),
                            offset: Some(offset),
                            href: None,
                        },
                        rows: vec![offset],
                    })
                }
            },
            false,
        )
        .await
        .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1 << 63]);
        assert_eq!(result.rows, vec![0, 1 << 63]);
    }

    #[tokio::test]
    async fn bounded_pool_preserves_input_order() {
        let out = for_each_bounded((0..20u64).collect(), 4, |n| async move {
            tokio::time::sleep(Duration::from_millis(20 - n)).await;
            Ok::<_, ()>(n * 2)
        })
        .await
        .unwrap();
        assert_eq!(out, (0..20u64).map(|n| n * 2).collect::<Vec<_>>());
    }
}
