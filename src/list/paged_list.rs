//! A virtualized list backed by a paged remote source.
//!
//! Scroll handling is split in two so hosts can render immediately:
//! - `on_scroll` recomputes the window synchronously (spacers and
//!   placeholders are correct right away)
//! - `sync_pages` loads whatever pages the current window needs; afterwards
//!   `render_window` fills the placeholders without moving the range

use std::sync::atomic::{AtomicBool, Ordering};

use flume::Receiver;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::events::{EventBus, ListEvent};
use crate::config::{SourceConfig, WindowConfig};
use crate::error::SourceError;
use crate::paging::{PageFetcher, PagedItemSource};
use crate::window::{ItemSize, VirtualWindow, WindowState};

/// Everything a rendering layer needs for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderWindow<T> {
    pub first_index: usize,
    pub last_index: usize,
    pub pre_spacer_height: f64,
    pub post_spacer_height: f64,
    /// One slot per index in `first_index..=last_index`; `None` while the
    /// owning page is loading.
    pub items: Vec<Option<T>>,
}

impl<T> RenderWindow<T> {
    pub fn loaded_count(&self) -> usize {
        self.items.iter().filter(|item| item.is_some()).count()
    }

    pub fn is_fully_loaded(&self) -> bool {
        self.items.iter().all(Option::is_some)
    }
}

/// Windowed list over a [`PagedItemSource`].
pub struct PagedWindowList<T> {
    source: PagedItemSource<T>,
    window: Mutex<VirtualWindow>,
    events: EventBus<ListEvent>,
    disposed: AtomicBool,
}

impl<T> PagedWindowList<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<F>(
        fetcher: F,
        total_count: usize,
        source_config: SourceConfig,
        window_config: WindowConfig,
    ) -> Self
    where
        F: PageFetcher<T> + 'static,
    {
        Self {
            source: PagedItemSource::with_config(fetcher, total_count, source_config),
            window: Mutex::new(VirtualWindow::new(window_config, total_count)),
            events: EventBus::new(),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn source(&self) -> &PagedItemSource<T> {
        &self.source
    }

    pub fn window_state(&self) -> WindowState {
        self.window.lock().state()
    }

    pub fn total_count(&self) -> usize {
        self.source.total_count()
    }

    /// Receive change notifications for this list.
    pub fn subscribe(&self) -> Receiver<ListEvent> {
        self.events.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }

    /// Run `f` against the window, e.g. for scroll-to-index offsets.
    pub fn with_window<R>(&self, f: impl FnOnce(&VirtualWindow) -> R) -> R {
        f(&self.window.lock())
    }

    /// Feed a scroll event. Returns the new window state when the mounted
    /// range changed; the caller should follow up with [`sync_pages`].
    ///
    /// [`sync_pages`]: Self::sync_pages
    pub fn on_scroll(&self, scroll_top: f64, client_height: f64) -> Option<WindowState> {
        if self.is_disposed() {
            return None;
        }
        let changed = self.window.lock().on_scroll(scroll_top, client_height);
        if let Some(state) = changed {
            trace!(first = state.first_index, last = state.last_index, "Window changed");
            self.events.publish(ListEvent::WindowChanged(state));
        }
        changed
    }

    /// Feed a size report for a rendered item.
    pub fn on_size_changed(&self, index: usize, size: ItemSize) -> Option<WindowState> {
        if self.is_disposed() {
            return None;
        }
        let state = {
            let mut window = self.window.lock();
            window.on_size_changed(index, size).then(|| window.state())
        };
        if let Some(state) = state {
            self.events.publish(ListEvent::WindowChanged(state));
        }
        state
    }

    /// Load the pages covering the current window (plus neighbours).
    ///
    /// The window may move while this is waiting; the `PagesLoaded` event
    /// reports the range current at completion. Returns pages fetched.
    pub async fn sync_pages(&self) -> Result<usize, SourceError> {
        if self.is_disposed() {
            return Err(SourceError::Disposed);
        }
        let state = self.window_state();
        if state.is_empty() {
            return Ok(0);
        }

        let fetched = self
            .source
            .ensure_pages(state.first_index, state.last_index)
            .await?;

        let current = self.window_state();
        self.events.publish(ListEvent::PagesLoaded {
            first_index: current.first_index,
            last_index: current.last_index,
            fetched,
        });
        Ok(fetched)
    }

    /// Items and spacers for the current window, from whatever is cached.
    pub fn render_window(&self) -> RenderWindow<T> {
        let state = self.window_state();
        let items = if state.is_empty() {
            Vec::new()
        } else {
            self.source.get_items(state.first_index, state.last_index)
        };
        RenderWindow {
            first_index: state.first_index,
            last_index: state.last_index,
            pre_spacer_height: state.pre_spacer_height,
            post_spacer_height: state.post_spacer_height,
            items,
        }
    }

    /// `on_scroll`, `sync_pages` and `render_window` in one call.
    pub async fn scroll(&self, scroll_top: f64, client_height: f64) -> Result<RenderWindow<T>, SourceError> {
        self.on_scroll(scroll_top, client_height);
        self.sync_pages().await?;
        Ok(self.render_window())
    }

    /// Swap the backing query. All pages are dropped, height overrides past
    /// the new end are evicted, and subscribers get `Invalidated`.
    pub fn replace_query<F>(&self, fetcher: F, total_count: usize)
    where
        F: PageFetcher<T> + 'static,
    {
        self.source.replace_query(fetcher, total_count);
        let state = self.window.lock().set_total_count(total_count);
        debug!(total_count, "Replaced list query");
        self.events.publish(ListEvent::Invalidated { total_count });
        self.events.publish(ListEvent::WindowChanged(state));
    }

    /// Update the item count while keeping the query.
    pub fn set_total_count(&self, total_count: usize) -> WindowState {
        self.source.set_total_count(total_count);
        let state = self.window.lock().set_total_count(total_count);
        self.events.publish(ListEvent::WindowChanged(state));
        state
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Tear down the list: drop cached pages and detach subscribers.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.source.dispose();
        self.events.publish(ListEvent::Disposed);
        self.events.clear();
        debug!("Disposed paged window list");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn numbers(total: usize) -> impl Fn(usize, usize) -> crate::BoxFuture<anyhow::Result<Vec<usize>>> + Send + Sync {
        move |skip, take| {
            let end = (skip + take).min(total);
            let items: Vec<usize> = (skip.min(end)..end).collect();
            let fut: crate::BoxFuture<anyhow::Result<Vec<usize>>> = Box::pin(async move { Ok(items) });
            fut
        }
    }

    fn list(total: usize, page_size: usize) -> PagedWindowList<usize> {
        PagedWindowList::new(
            numbers(total),
            total,
            SourceConfig::default().with_page_size(page_size),
            WindowConfig {
                base_height: 40.0,
                overscan_factor: 1.0,
            },
        )
    }

    #[tokio::test]
    async fn test_placeholders_then_filled() {
        let list = list(10_000, 50);

        let state = list.on_scroll(40_000.0, 400.0).unwrap();
        let placeholder = list.render_window();
        assert_eq!(placeholder.first_index, state.first_index);
        assert_eq!(placeholder.items.len(), state.rendered_count);
        assert_eq!(placeholder.loaded_count(), 0);

        list.sync_pages().await.unwrap();
        let filled = list.render_window();

        assert_eq!(filled.first_index, placeholder.first_index);
        assert_eq!(filled.last_index, placeholder.last_index);
        assert_eq!(filled.pre_spacer_height, placeholder.pre_spacer_height);
        assert!(filled.is_fully_loaded());
        for (offset, item) in filled.items.iter().enumerate() {
            assert_eq!(*item, Some(filled.first_index + offset));
        }
    }

    #[tokio::test]
    async fn test_scroll_round_trip() {
        let list = list(1000, 250);
        let render = list.scroll(9_600.0, 400.0).await.unwrap();

        // Visible 240..=250, overscan 11 each side.
        assert_eq!(render.first_index, 229);
        assert_eq!(render.last_index, 261);
        assert!(render.is_fully_loaded());
        assert!(list.source().is_cached(0));
        assert!(list.source().is_cached(1));
        assert_eq!(
            render.pre_spacer_height + 33.0 * 40.0 + render.post_spacer_height,
            1000.0 * 40.0
        );
    }

    #[tokio::test]
    async fn test_events_published() {
        let list = list(1000, 100);
        let events = list.subscribe();

        list.scroll(0.0, 400.0).await.unwrap();

        let first = events.try_recv().unwrap();
        assert!(matches!(first, ListEvent::WindowChanged(state) if state.first_index == 0));
        let second = events.try_recv().unwrap();
        assert!(matches!(second, ListEvent::PagesLoaded { first_index: 0, .. }));
        assert!(events.try_recv().is_err());

        list.on_size_changed(3, ItemSize::Measured(90.0)).unwrap();
        assert!(matches!(events.try_recv().unwrap(), ListEvent::WindowChanged(_)));
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_placeholders() {
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&failures);
        let list: PagedWindowList<usize> = PagedWindowList::new(
            move |_skip: usize, _take: usize| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Err::<Vec<usize>, _>(anyhow::anyhow!("offline")) }
            },
            100,
            SourceConfig::default().with_page_size(10),
            WindowConfig::default(),
        );

        list.on_scroll(0.0, 200.0);
        let err = list.sync_pages().await.unwrap_err();

        assert!(matches!(err, SourceError::Fetch { page: 0, .. }));
        assert_eq!(list.render_window().loaded_count(), 0);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_replace_query_resets_pages() {
        let list = list(1000, 100);
        let events = list.subscribe();
        list.scroll(0.0, 400.0).await.unwrap();
        list.on_size_changed(500, ItemSize::Measured(100.0));
        while events.try_recv().is_ok() {}

        list.replace_query(numbers(20), 20);

        assert_eq!(list.total_count(), 20);
        assert_eq!(list.source().cached_page_count(), 0);
        assert!(list.with_window(|window| window.expanded().is_empty()));
        assert_eq!(
            events.try_recv().unwrap(),
            ListEvent::Invalidated { total_count: 20 }
        );
        assert_eq!(list.render_window().loaded_count(), 0);

        let render = list.scroll(0.0, 400.0).await.unwrap();
        assert_eq!(render.last_index, 19);
        assert!(render.is_fully_loaded());
    }

    #[tokio::test]
    async fn test_empty_list_renders_nothing() {
        let list = list(0, 100);
        let render = list.scroll(0.0, 400.0).await.unwrap();
        assert!(render.items.is_empty());
        assert_eq!(render.pre_spacer_height, 0.0);
        assert_eq!(render.post_spacer_height, 0.0);
        assert_eq!(list.source().cached_page_count(), 0);
    }

    #[tokio::test]
    async fn test_dispose() {
        let list = list(1000, 100);
        let events = list.subscribe();
        list.scroll(0.0, 400.0).await.unwrap();
        while events.try_recv().is_ok() {}

        list.dispose();

        assert_eq!(events.try_recv().unwrap(), ListEvent::Disposed);
        assert_eq!(list.subscriber_count(), 0);
        assert!(list.on_scroll(5000.0, 400.0).is_none());
        assert!(matches!(list.sync_pages().await, Err(SourceError::Disposed)));
    }
}
