//! Page-aware windowed lists.
//!
//! - `PagedWindowList` - a `VirtualWindow` over a `PagedItemSource`
//! - `ListEvent` - change notifications for the rendering layer

mod events;
pub mod paged_list;

pub use events::ListEvent;
pub use paged_list::{PagedWindowList, RenderWindow};
