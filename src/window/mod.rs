//! Virtualized windowing: which items to mount for a scroll position and
//! how tall the spacers around them must be.

pub mod heights;
pub mod virtual_window;

pub use heights::{calc_range_heights, HeightOverrides, RangeHeights};
pub use virtual_window::{ItemSize, ScrollThresholds, VirtualWindow, VisibleRange, WindowState};
