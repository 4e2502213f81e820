//! Paged access to a lazily-fetched remote collection.
//!
//! - `Page` - one fixed-size slice addressed by absolute index
//! - `PagedItemSource` - fetches pages on demand, caches them and stitches
//!   arbitrary index ranges together from the cache

pub mod page;
pub mod source;

pub use page::Page;
pub use source::{PageFetcher, PagedItemSource};
