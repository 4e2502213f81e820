//! Page-granular loader and cache in front of a remote fetch function.
//!
//! Callers ask for index ranges; the source translates them into whole
//! pages, fetches the missing ones one at a time under an async mutex, and
//! keeps them until the backing query is invalidated.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use super::page::Page;
use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::BoxFuture;

/// Backend query that returns up to `take` items starting at `skip`.
///
/// Any `Fn(usize, usize) -> impl Future<Output = anyhow::Result<Vec<T>>>`
/// closure implements this.
pub trait PageFetcher<T>: Send + Sync {
    fn fetch_page(&self, skip: usize, take: usize) -> BoxFuture<anyhow::Result<Vec<T>>>;
}

impl<T, F, Fut> PageFetcher<T> for F
where
    F: Fn(usize, usize) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<T>>> + Send + 'static,
{
    fn fetch_page(&self, skip: usize, take: usize) -> BoxFuture<anyhow::Result<Vec<T>>> {
        Box::pin(self(skip, take))
    }
}

struct PageCache<T> {
    pages: LruCache<usize, Arc<Page<T>>>,
    /// Bumped on every invalidation; fetches started under an older
    /// generation are dropped instead of cached.
    generation: u64,
    /// Page span of the most recent `ensure_pages` request.
    requested: Option<(usize, usize)>,
}

impl<T> PageCache<T> {
    fn new(max_pages: Option<usize>) -> Self {
        let pages = match max_pages.and_then(NonZeroUsize::new) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self {
            pages,
            generation: 0,
            requested: None,
        }
    }

    fn reset(&mut self) {
        self.pages.clear();
        self.generation += 1;
        self.requested = None;
    }
}

/// Decrements the waiting counter even if the waiting future is dropped.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Serves arbitrary index ranges of a remote collection from a page cache.
pub struct PagedItemSource<T> {
    /// Page size is clamped to at least 1 at construction.
    config: SourceConfig,
    /// Swapped wholesale by `replace_query`.
    fetcher: RwLock<Arc<dyn PageFetcher<T>>>,
    /// Item count of the backing query, as last reported by the caller.
    total_count: AtomicUsize,
    /// Cached pages plus the invalidation generation.
    cache: Mutex<PageCache<T>>,
    /// Serializes page loading; only one fetch is in flight per source.
    loader: tokio::sync::Mutex<()>,
    /// Callers currently blocked on `loader`.
    waiting: AtomicUsize,
    disposed: AtomicBool,
}

impl<T> PagedItemSource<T>
where
    T: Send + Sync + 'static,
{
    /// Create a source with the given page size and default settings.
    pub fn new<F>(fetcher: F, total_count: usize, page_size: usize) -> Self
    where
        F: PageFetcher<T> + 'static,
    {
        Self::with_config(
            fetcher,
            total_count,
            SourceConfig::default().with_page_size(page_size),
        )
    }

    pub fn with_config<F>(fetcher: F, total_count: usize, mut config: SourceConfig) -> Self
    where
        F: PageFetcher<T> + 'static,
    {
        config.page_size = config.page_size.max(1);
        let cache = PageCache::new(config.max_cached_pages);
        debug!(
            total_count,
            page_size = config.page_size,
            max_cached_pages = ?config.max_cached_pages,
            "Created paged item source"
        );
        let fetcher: Arc<dyn PageFetcher<T>> = Arc::new(fetcher);
        Self {
            config,
            fetcher: RwLock::new(fetcher),
            total_count: AtomicUsize::new(total_count),
            cache: Mutex::new(cache),
            loader: tokio::sync::Mutex::new(()),
            waiting: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    pub fn total_count(&self) -> usize {
        self.total_count.load(Ordering::SeqCst)
    }

    /// Number of pages needed to cover `total_count` items.
    pub fn total_pages(&self) -> usize {
        self.total_count().div_ceil(self.config.page_size)
    }

    /// Page number holding absolute `index`.
    pub fn page_of(&self, index: usize) -> usize {
        index / self.config.page_size
    }

    pub fn is_cached(&self, page: usize) -> bool {
        self.cache.lock().pages.contains(&page)
    }

    pub fn cached_page_count(&self) -> usize {
        self.cache.lock().pages.len()
    }

    /// Page span of the last `ensure_pages` call since the last invalidation.
    pub fn requested_pages(&self) -> Option<(usize, usize)> {
        self.cache.lock().requested
    }

    /// Cached page `page`, without touching its LRU position.
    pub fn page(&self, page: usize) -> Option<Arc<Page<T>>> {
        self.cache.lock().pages.peek(&page).cloned()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Make sure every page overlapping `first_index..=last_index` is cached.
    ///
    /// Missing pages are fetched in ascending order. Afterwards one neighbour
    /// page on each side is prefetched, unless another caller is already
    /// waiting for the loader. Returns the number of pages fetched.
    ///
    /// A failed fetch is returned as [`SourceError::Fetch`] and nothing is
    /// cached for that page, so the next call tries again.
    pub async fn ensure_pages(
        &self,
        first_index: usize,
        last_index: usize,
    ) -> Result<usize, SourceError> {
        self.check_disposed()?;
        let (first_index, last_index) = if first_index <= last_index {
            (first_index, last_index)
        } else {
            (last_index, first_index)
        };

        let _loading = {
            let _waiting = WaitingGuard::enter(&self.waiting);
            self.loader.lock().await
        };
        self.check_disposed()?;

        let first_page = self.page_of(first_index);
        let last_page = self.page_of(last_index);
        let generation = {
            let mut cache = self.cache.lock();
            cache.requested = Some((first_page, last_page));
            cache.generation
        };

        let mut fetched = 0;
        for page in first_page..=last_page {
            if self.load_page(page, generation).await? {
                fetched += 1;
            }
        }

        if self.config.prefetch_neighbors {
            fetched += self.prefetch_neighbors(first_page, last_page, generation).await;
        }

        trace!(first_page, last_page, fetched, "Pages ensured");
        Ok(fetched)
    }

    async fn prefetch_neighbors(&self, first_page: usize, last_page: usize, generation: u64) -> usize {
        let total_pages = self.total_pages();
        let before = first_page.checked_sub(1).filter(|p| *p < total_pages);
        let after = Some(last_page + 1).filter(|p| *p < total_pages);

        let mut fetched = 0;
        for page in [before, after].into_iter().flatten() {
            if self.waiting.load(Ordering::SeqCst) > 0 {
                trace!(page, "Skipping neighbour prefetch, loaders waiting");
                break;
            }
            if self.would_evict_requested(first_page, last_page) {
                trace!(page, "Skipping neighbour prefetch, cache full");
                break;
            }
            match self.load_page(page, generation).await {
                Ok(true) => fetched += 1,
                Ok(false) => {}
                Err(e) => warn!(page, error = %e, "Neighbour prefetch failed"),
            }
        }
        fetched
    }

    /// The next insert would push out a page from `first_page..=last_page`.
    fn would_evict_requested(&self, first_page: usize, last_page: usize) -> bool {
        let cache = self.cache.lock();
        cache.pages.len() >= cache.pages.cap().get()
            && cache
                .pages
                .peek_lru()
                .is_some_and(|(page, _)| (first_page..=last_page).contains(page))
    }

    /// Fetch and cache `page` unless it is already cached. Returns whether a
    /// fetch was stored.
    async fn load_page(&self, page: usize, generation: u64) -> Result<bool, SourceError> {
        {
            let mut cache = self.cache.lock();
            if cache.generation != generation {
                return Ok(false);
            }
            if cache.pages.get(&page).is_some() {
                trace!(page, "Page already cached");
                return Ok(false);
            }
        }

        let page_size = self.config.page_size;
        let skip = page * page_size;
        let fetcher = Arc::clone(&*self.fetcher.read());

        debug!(page, skip, take = page_size, "Fetching page");
        let mut items = fetcher
            .fetch_page(skip, page_size)
            .await
            .map_err(|source| SourceError::Fetch {
                page,
                skip,
                take: page_size,
                source,
            })?;

        if items.len() > page_size {
            warn!(page, returned = items.len(), take = page_size, "Fetch returned more than requested");
            items.truncate(page_size);
        }

        let mut cache = self.cache.lock();
        if cache.generation != generation {
            debug!(page, "Discarding page fetched before invalidation");
            return Ok(false);
        }
        if let Some((evicted, _)) = cache.pages.push(page, Arc::new(Page::new(page, page_size, items))) {
            if evicted != page {
                trace!(evicted, "Evicted least recently used page");
            }
        }
        Ok(true)
    }

    /// Items for `first_index..=last_index`, `None` where the owning page is
    /// not cached yet.
    pub fn get_items(&self, first_index: usize, last_index: usize) -> Vec<Option<T>>
    where
        T: Clone,
    {
        if first_index > last_index {
            return Vec::new();
        }

        let page_size = self.config.page_size;
        let cache = self.cache.lock();
        let mut items = Vec::with_capacity(last_index - first_index + 1);
        let mut current: Option<&Arc<Page<T>>> = None;

        for index in first_index..=last_index {
            if !current.is_some_and(|page| page.contains(index)) {
                current = cache.pages.peek(&(index / page_size));
            }
            items.push(current.and_then(|page| page.get(index)).cloned());
        }
        items
    }

    /// Single item lookup; `None` while its page is not cached.
    pub fn get(&self, index: usize) -> Option<T>
    where
        T: Clone,
    {
        let cache = self.cache.lock();
        cache
            .pages
            .peek(&self.page_of(index))
            .and_then(|page| page.get(index))
            .cloned()
    }

    /// Drop every cached page. In-flight fetches are discarded when they land.
    pub fn invalidate(&self) {
        let mut cache = self.cache.lock();
        let dropped = cache.pages.len();
        cache.reset();
        debug!(dropped, generation = cache.generation, "Invalidated page cache");
    }

    /// Point the source at a new backing query (e.g. a new filter).
    pub fn replace_query<F>(&self, fetcher: F, total_count: usize)
    where
        F: PageFetcher<T> + 'static,
    {
        let fetcher: Arc<dyn PageFetcher<T>> = Arc::new(fetcher);
        *self.fetcher.write() = fetcher;
        self.total_count.store(total_count, Ordering::SeqCst);
        self.invalidate();
    }

    /// Update the item count without changing the query.
    ///
    /// Pages starting past the new end are dropped, as are short pages whose
    /// contents were truncated by the old end.
    pub fn set_total_count(&self, total_count: usize) {
        let previous = self.total_count.swap(total_count, Ordering::SeqCst);
        if previous == total_count {
            return;
        }

        let mut cache = self.cache.lock();
        let stale: Vec<usize> = cache
            .pages
            .iter()
            .filter(|(_, page)| page.from >= total_count || page.is_short())
            .map(|(index, _)| *index)
            .collect();
        for index in &stale {
            cache.pages.pop(index);
        }
        debug!(previous, total_count, dropped = stale.len(), "Updated total count");
    }

    /// Release every page; later `ensure_pages` calls fail with `Disposed`.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.cache.lock().reset();
        debug!("Disposed paged item source");
    }

    fn check_disposed(&self) -> Result<(), SourceError> {
        if self.is_disposed() {
            Err(SourceError::Disposed)
        } else {
            Ok(())
        }
    }
}
