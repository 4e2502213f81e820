//! Paged, virtualized lists over lazily-fetched collections, plus a
//! sequential background job queue for keeping them in sync.

use std::future::Future;
use std::pin::Pin;

pub mod config;
pub mod error;
pub mod jobs;
pub mod list;
pub mod paging;
pub mod window;

pub use config::{QueueConfig, SourceConfig, WindowConfig};
pub use error::{QueueError, SourceError};
pub use jobs::{JobId, JobOutput, JobPayload, JobQueue, JobQueueBuilder, JobSpec, JobStatus, MergePolicy};
pub use list::{ListEvent, PagedWindowList, RenderWindow};
pub use paging::{Page, PageFetcher, PagedItemSource};
pub use window::{ItemSize, VirtualWindow, WindowState};

/// Boxed, sendable future used at the fetcher and job seams.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;
