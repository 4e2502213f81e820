use thiserror::Error;

/// Errors surfaced by a paged item source and the lists built on it.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The backing fetch failed. Nothing was cached for this page.
    #[error("failed to fetch page {page} (skip={skip}, take={take})")]
    Fetch {
        page: usize,
        skip: usize,
        take: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("paged source has been disposed")]
    Disposed,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job queue has been disposed")]
    Disposed,
}
