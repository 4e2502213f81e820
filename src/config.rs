//! Configuration for sources, windows and job queues.

/// Default number of items per fetched page.
pub const DEFAULT_PAGE_SIZE: usize = 250;

/// Default assumed row height in pixels before anything is measured.
pub const DEFAULT_BASE_HEIGHT: f64 = 40.0;

/// Smallest base height accepted; keeps offset-to-index math finite.
pub const MIN_BASE_HEIGHT: f64 = 1.0;

/// Default number of finished job records kept for status queries.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1024;

/// Configuration for a [`PagedItemSource`](crate::paging::PagedItemSource).
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Number of items requested per fetch.
    pub page_size: usize,
    /// Whether to speculatively load the page before and after each
    /// requested range when nobody else is waiting on the loader.
    pub prefetch_neighbors: bool,
    /// Upper bound on cached pages (LRU eviction). `None` keeps every page
    /// until the source is invalidated.
    pub max_cached_pages: Option<usize>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            prefetch_neighbors: true,
            max_cached_pages: None,
        }
    }
}

impl SourceConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_prefetch(mut self, prefetch_neighbors: bool) -> Self {
        self.prefetch_neighbors = prefetch_neighbors;
        self
    }

    pub fn with_max_cached_pages(mut self, max: usize) -> Self {
        self.max_cached_pages = Some(max);
        self
    }
}

/// Configuration for a [`VirtualWindow`](crate::window::VirtualWindow).
#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// Height assumed for every item without a recorded override.
    pub base_height: f64,
    /// Fraction of the visible item count rendered above and below the
    /// viewport (1.0 = one extra screenful on each side).
    pub overscan_factor: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            base_height: DEFAULT_BASE_HEIGHT,
            overscan_factor: 1.0,
        }
    }
}

/// Configuration for a [`JobQueue`](crate::jobs::JobQueue).
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Retries applied to specs that don't set their own.
    pub default_retries: u32,
    /// Number of job records kept for `status`/`attempts` lookups.
    pub history_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_retries: 0,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}
