//! Scroll-driven windowing over a variable-height item list.
//!
//! The window tracks which items should be mounted for the current scroll
//! position (visible range plus overscan) and how tall the spacers above
//! and below them must be. Recomputation is gated by scroll thresholds so
//! it happens roughly once per half viewport of travel, not on every tick.

use tracing::{debug, trace};

use super::heights::{self, HeightOverrides, RangeHeights};
use crate::config::{WindowConfig, MIN_BASE_HEIGHT};

/// Inclusive index range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibleRange {
    pub first: usize,
    pub last: usize,
}

impl VisibleRange {
    pub fn count(&self) -> usize {
        self.last - self.first + 1
    }
}

/// Scroll offsets between which the current window stays valid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollThresholds {
    pub min: f64,
    pub max: f64,
}

impl ScrollThresholds {
    pub fn contains(&self, scroll_top: f64) -> bool {
        self.min <= scroll_top && scroll_top <= self.max
    }
}

/// Rendered window plus the spacer heights standing in for everything else.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowState {
    pub first_index: usize,
    pub last_index: usize,
    /// Number of mounted items; zero for an empty list.
    pub rendered_count: usize,
    pub pre_spacer_height: f64,
    pub post_spacer_height: f64,
    /// `None` when every scroll must recompute (content fits the viewport,
    /// or nothing has been computed yet).
    pub thresholds: Option<ScrollThresholds>,
}

impl WindowState {
    pub fn is_empty(&self) -> bool {
        self.rendered_count == 0
    }

    /// Whether `other` mounts the same items behind the same spacers.
    pub fn same_range(&self, other: &WindowState) -> bool {
        self.first_index == other.first_index
            && self.last_index == other.last_index
            && self.rendered_count == other.rendered_count
            && self.pre_spacer_height == other.pre_spacer_height
            && self.post_spacer_height == other.post_spacer_height
    }
}

/// Size report for a single rendered item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ItemSize {
    /// The item is back at the base height.
    Base,
    /// The item rendered at this height.
    Measured(f64),
}

impl ItemSize {
    /// Height of an item measured as the distance to the next item's offset.
    pub fn between(offset: f64, next_offset: f64) -> Self {
        Self::Measured((next_offset - offset).max(0.0))
    }
}

/// Windowing engine for one list instance.
#[derive(Debug, Clone)]
pub struct VirtualWindow {
    overscan_factor: f64,
    base_height: f64,
    total_count: usize,
    expanded: HeightOverrides,
    state: WindowState,
    scroll_top: f64,
    client_height: f64,
    /// Set when nothing has been computed yet.
    dirty: bool,
}

impl VirtualWindow {
    pub fn new(config: WindowConfig, total_count: usize) -> Self {
        Self {
            overscan_factor: config.overscan_factor.max(0.0),
            base_height: config.base_height.max(MIN_BASE_HEIGHT),
            total_count,
            expanded: HeightOverrides::new(),
            state: WindowState::default(),
            scroll_top: 0.0,
            client_height: 0.0,
            dirty: true,
        }
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn base_height(&self) -> f64 {
        self.base_height
    }

    pub fn expanded(&self) -> &HeightOverrides {
        &self.expanded
    }

    pub fn scroll_top(&self) -> f64 {
        self.scroll_top
    }

    pub fn client_height(&self) -> f64 {
        self.client_height
    }

    /// Height of the list if every item were rendered.
    pub fn total_height(&self) -> f64 {
        heights::total_height(self.total_count, self.base_height, &self.expanded)
    }

    /// Scroll offset of the top edge of item `index`.
    pub fn offset_of(&self, index: usize) -> f64 {
        heights::offset_of(index, self.total_count, self.base_height, &self.expanded)
    }

    /// Items intersecting `scroll_top..scroll_top + client_height`, without
    /// overscan.
    pub fn calc_visible_range(&self, scroll_top: f64, client_height: f64) -> Option<VisibleRange> {
        let first = heights::index_at_offset(
            scroll_top,
            self.total_count,
            self.base_height,
            &self.expanded,
        )?;
        let last = heights::index_at_offset(
            scroll_top + client_height.max(0.0),
            self.total_count,
            self.base_height,
            &self.expanded,
        )?;
        Some(VisibleRange {
            first,
            last: last.max(first),
        })
    }

    /// Grow `range` by `ceil(len * overscan_factor)` items on each side.
    pub fn apply_overscan(&self, range: VisibleRange) -> VisibleRange {
        if self.total_count == 0 {
            return range;
        }
        let extra = (range.count() as f64 * self.overscan_factor).ceil() as usize;
        VisibleRange {
            first: range.first.saturating_sub(extra),
            last: range.last.saturating_add(extra).min(self.total_count - 1),
        }
    }

    /// Pre/mid/post heights for the inclusive window `first..=last`.
    pub fn calc_range_heights(&self, first: usize, last: usize) -> RangeHeights {
        heights::calc_range_heights(first, last, self.total_count, self.base_height, &self.expanded)
    }

    /// Whether a scroll to `scroll_top` invalidates the current window.
    pub fn needs_recompute(&self, scroll_top: f64, client_height: f64) -> bool {
        if self.dirty || client_height != self.client_height {
            return true;
        }
        match self.state.thresholds {
            Some(thresholds) => !thresholds.contains(scroll_top),
            None => true,
        }
    }

    /// Handle a scroll event. Returns the new state when the mounted range or
    /// its spacers changed.
    pub fn on_scroll(&mut self, scroll_top: f64, client_height: f64) -> Option<WindowState> {
        if !self.needs_recompute(scroll_top, client_height) {
            trace!(scroll_top, "Scroll within thresholds");
            self.scroll_top = scroll_top;
            return None;
        }
        let previous = self.state;
        let was_dirty = self.dirty;
        let state = self.recompute(scroll_top, client_height);
        (was_dirty || !state.same_range(&previous)).then_some(state)
    }

    /// Recompute the window for this scroll position unconditionally.
    pub fn recompute(&mut self, scroll_top: f64, client_height: f64) -> WindowState {
        self.scroll_top = scroll_top.max(0.0);
        self.client_height = client_height.max(0.0);
        self.dirty = false;

        let Some(visible) = self.calc_visible_range(self.scroll_top, self.client_height) else {
            self.state = WindowState::default();
            return self.state;
        };
        let window = self.apply_overscan(visible);
        self.state = self.build_state(window);

        debug!(
            scroll_top = self.scroll_top,
            visible_first = visible.first,
            visible_last = visible.last,
            first = self.state.first_index,
            last = self.state.last_index,
            "Recomputed window"
        );
        self.state
    }

    fn build_state(&self, window: VisibleRange) -> WindowState {
        let heights = self.calc_range_heights(window.first, window.last);
        WindowState {
            first_index: window.first,
            last_index: window.last,
            rendered_count: window.count(),
            pre_spacer_height: heights.pre,
            post_spacer_height: heights.post,
            thresholds: self.thresholds_for(window, heights),
        }
    }

    /// Halfway between the window edges and the viewport edges. An edge that
    /// reaches the end of the list never needs to move further that way.
    fn thresholds_for(&self, window: VisibleRange, heights: RangeHeights) -> Option<ScrollThresholds> {
        if self.client_height >= heights.total() {
            return None;
        }
        let window_top = heights.pre;
        let window_bottom = heights.pre + heights.mid;
        let viewport_bottom = self.scroll_top + self.client_height;

        let min = if window.first == 0 {
            0.0
        } else {
            window_top + (self.scroll_top - window_top) / 2.0
        };
        let max = if window.last + 1 >= self.total_count {
            f64::INFINITY
        } else {
            self.scroll_top + (window_bottom - viewport_bottom) / 2.0
        };

        Some(ScrollThresholds {
            min: min.min(self.scroll_top),
            max: max.max(self.scroll_top),
        })
    }

    /// Rebuild spacers and thresholds for the current range after a height
    /// change, without moving the range.
    fn refresh(&mut self) -> WindowState {
        if self.dirty || self.state.is_empty() {
            return self.state;
        }
        let window = VisibleRange {
            first: self.state.first_index,
            last: self.state.last_index,
        };
        self.state = self.build_state(window);
        self.state
    }

    /// Record a size report for item `index`. Returns whether the override
    /// map changed; spacers and thresholds are refreshed when it did.
    pub fn on_size_changed(&mut self, index: usize, size: ItemSize) -> bool {
        if index >= self.total_count {
            trace!(index, total_count = self.total_count, "Ignoring size change past end");
            return false;
        }
        let changed = match size {
            ItemSize::Measured(height) if height != self.base_height => {
                self.expanded.insert(index, height) != Some(height)
            }
            ItemSize::Measured(_) | ItemSize::Base => self.expanded.remove(&index).is_some(),
        };
        if changed {
            trace!(index, ?size, "Item size changed");
            self.refresh();
        }
        changed
    }

    /// Change the assumed base height, keeping every override.
    pub fn set_base_height(&mut self, base_height: f64) -> WindowState {
        let base_height = base_height.max(MIN_BASE_HEIGHT);
        if base_height == self.base_height {
            return self.state;
        }
        self.base_height = base_height;
        self.expanded.retain(|_, height| *height != base_height);
        self.dirty = true;
        self.recompute(self.scroll_top, self.client_height)
    }

    /// Change the item count, evicting overrides past the new end.
    pub fn set_total_count(&mut self, total_count: usize) -> WindowState {
        if total_count < self.total_count {
            let evicted = self.expanded.split_off(&total_count);
            if !evicted.is_empty() {
                debug!(evicted = evicted.len(), total_count, "Evicted height overrides");
            }
        }
        self.total_count = total_count;
        self.dirty = true;
        self.recompute(self.scroll_top, self.client_height)
    }

    /// Forget every measured height.
    pub fn reset_heights(&mut self) -> WindowState {
        self.expanded.clear();
        self.dirty = true;
        self.recompute(self.scroll_top, self.client_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(total: usize, overscan: f64) -> VirtualWindow {
        VirtualWindow::new(
            WindowConfig {
                base_height: 40.0,
                overscan_factor: overscan,
            },
            total,
        )
    }

    fn assert_spacers_cover_total(window: &VirtualWindow) {
        let state = window.state();
        let mid = window
            .calc_range_heights(state.first_index, state.last_index)
            .mid;
        let sum = state.pre_spacer_height + mid + state.post_spacer_height;
        assert_eq!(sum, window.total_height());
    }

    #[test]
    fn test_visible_range_uniform() {
        let window = window(1000, 0.0);
        let range = window.calc_visible_range(400.0, 400.0).unwrap();
        assert_eq!(range.first, 10);
        assert_eq!(range.last, 20);
    }

    #[test]
    fn test_visible_range_with_expanded_item() {
        let mut window = window(1000, 0.0);
        window.on_size_changed(2, ItemSize::Measured(400.0));
        // Items 0-1 cover 0..80, item 2 covers 80..480.
        let range = window.calc_visible_range(100.0, 300.0).unwrap();
        assert_eq!(range.first, 2);
        assert_eq!(range.last, 2);
        let range = window.calc_visible_range(480.0, 40.0).unwrap();
        assert_eq!(range.first, 3);
    }

    #[test]
    fn test_overscan_expands_and_clamps() {
        let window = window(100, 1.0);
        let expanded = window.apply_overscan(VisibleRange { first: 5, last: 14 });
        assert_eq!(expanded.first, 0);
        assert_eq!(expanded.last, 24);

        let expanded = window.apply_overscan(VisibleRange { first: 90, last: 95 });
        assert_eq!(expanded.first, 84);
        assert_eq!(expanded.last, 99);
    }

    #[test]
    fn test_recompute_state() {
        let mut window = window(1000, 1.0);
        let state = window.on_scroll(4000.0, 400.0).unwrap();

        // Visible 100..=110 (11 items), overscan 11 on each side.
        assert_eq!(state.first_index, 89);
        assert_eq!(state.last_index, 121);
        assert_eq!(state.rendered_count, 33);
        assert_eq!(state.pre_spacer_height, 89.0 * 40.0);
        assert_eq!(state.post_spacer_height, (1000.0 - 122.0) * 40.0);
        assert_spacers_cover_total(&window);
    }

    #[test]
    fn test_spacer_invariant_with_overrides() {
        let mut window = window(500, 0.5);
        window.on_scroll(0.0, 300.0);
        for (index, height) in [(0, 80.0), (3, 12.0), (120, 300.0), (250, 41.0), (499, 90.0)] {
            window.on_size_changed(index, ItemSize::Measured(height));
        }
        for scroll_top in [0.0, 123.0, 4000.0, 9999.0, 20_000.0, 1e7] {
            window.recompute(scroll_top, 300.0);
            assert_spacers_cover_total(&window);
        }
    }

    #[test]
    fn test_scroll_within_thresholds_skips_recompute() {
        let mut window = window(1000, 1.0);
        let state = window.on_scroll(4000.0, 400.0).unwrap();
        let thresholds = state.thresholds.unwrap();
        assert!(thresholds.min < 4000.0 && thresholds.max > 4000.0);

        assert!(!window.needs_recompute(4010.0, 400.0));
        assert!(window.on_scroll(4010.0, 400.0).is_none());
        assert_eq!(window.scroll_top(), 4010.0);

        assert!(window.needs_recompute(thresholds.max + 1.0, 400.0));
        assert!(window.needs_recompute(thresholds.min - 1.0, 400.0));
        // A resized viewport always recomputes.
        assert!(window.needs_recompute(4010.0, 500.0));
    }

    #[test]
    fn test_thresholds_are_halfway() {
        let mut window = window(1000, 1.0);
        let state = window.on_scroll(4000.0, 400.0).unwrap();
        let thresholds = state.thresholds.unwrap();

        let window_top = 89.0 * 40.0;
        let window_bottom = 122.0 * 40.0;
        assert_eq!(thresholds.min, window_top + (4000.0 - window_top) / 2.0);
        assert_eq!(thresholds.max, 4000.0 + (window_bottom - 4400.0) / 2.0);
    }

    #[test]
    fn test_thresholds_open_at_list_edges() {
        let mut window = window(1000, 1.0);
        let state = window.on_scroll(0.0, 400.0).unwrap();
        assert_eq!(state.first_index, 0);
        assert_eq!(state.thresholds.unwrap().min, 0.0);

        let end = window.total_height() - 400.0;
        let state = window.on_scroll(end, 400.0).unwrap();
        assert_eq!(state.last_index, 999);
        assert_eq!(state.thresholds.unwrap().max, f64::INFINITY);
    }

    #[test]
    fn test_content_fits_viewport_collapses_thresholds() {
        let mut window = window(5, 1.0);
        let state = window.on_scroll(0.0, 1000.0).unwrap();
        assert_eq!(state.first_index, 0);
        assert_eq!(state.last_index, 4);
        assert!(state.thresholds.is_none());
        assert!(window.needs_recompute(0.0, 1000.0));
        // Recomputes but nothing moved.
        assert!(window.on_scroll(0.0, 1000.0).is_none());
    }

    #[test]
    fn test_empty_list() {
        let mut window = window(0, 1.0);
        assert!(window.calc_visible_range(0.0, 400.0).is_none());
        let state = window.on_scroll(0.0, 400.0).unwrap();
        assert!(state.is_empty());
        assert_eq!(state.pre_spacer_height, 0.0);
        assert_eq!(state.post_spacer_height, 0.0);
    }

    #[test]
    fn test_size_changed_records_and_deletes() {
        let mut window = window(100, 1.0);
        window.on_scroll(0.0, 400.0);

        assert!(window.on_size_changed(5, ItemSize::Measured(120.0)));
        assert_eq!(window.expanded().get(&5), Some(&120.0));
        assert!(!window.on_size_changed(5, ItemSize::Measured(120.0)));

        // Back at base size: the entry is removed, not stored as 40.
        assert!(window.on_size_changed(5, ItemSize::Measured(40.0)));
        assert!(window.expanded().is_empty());

        window.on_size_changed(6, ItemSize::between(240.0, 400.0));
        assert_eq!(window.expanded().get(&6), Some(&160.0));
        assert!(window.on_size_changed(6, ItemSize::Base));
        assert!(!window.on_size_changed(6, ItemSize::Base));
        assert!(!window.on_size_changed(500, ItemSize::Measured(10.0)));
    }

    #[test]
    fn test_size_change_refreshes_spacers() {
        let mut window = window(1000, 0.0);
        let before = window.on_scroll(4000.0, 400.0).unwrap();

        window.on_size_changed(10, ItemSize::Measured(140.0));
        let after = window.state();

        assert_eq!(after.first_index, before.first_index);
        assert_eq!(after.pre_spacer_height, before.pre_spacer_height + 100.0);
        assert_eq!(after.post_spacer_height, before.post_spacer_height);
        assert_spacers_cover_total(&window);
    }

    #[test]
    fn test_set_total_count_evicts_overrides() {
        let mut window = window(100, 1.0);
        window.on_scroll(0.0, 400.0);
        window.on_size_changed(10, ItemSize::Measured(100.0));
        window.on_size_changed(80, ItemSize::Measured(100.0));

        let state = window.set_total_count(50);

        assert_eq!(window.expanded().len(), 1);
        assert!(state.last_index < 50);
        assert_eq!(window.total_height(), 49.0 * 40.0 + 100.0);
        assert_spacers_cover_total(&window);
    }

    #[test]
    fn test_set_base_height_drops_matching_overrides() {
        let mut window = window(100, 1.0);
        window.on_scroll(0.0, 400.0);
        window.on_size_changed(1, ItemSize::Measured(60.0));
        window.on_size_changed(2, ItemSize::Measured(90.0));

        window.set_base_height(60.0);

        assert_eq!(window.base_height(), 60.0);
        assert_eq!(window.expanded().len(), 1);
        assert_eq!(window.total_height(), 99.0 * 60.0 + 90.0);
    }

    #[test]
    fn test_offset_of_for_scroll_to_index() {
        let mut window = window(100, 1.0);
        window.on_scroll(0.0, 400.0);
        window.on_size_changed(3, ItemSize::Measured(100.0));
        assert_eq!(window.offset_of(5), 4.0 * 40.0 + 100.0);
        let range = window.calc_visible_range(window.offset_of(5), 40.0).unwrap();
        assert_eq!(range.first, 5);
    }
}
