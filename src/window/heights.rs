//! Height arithmetic over a base row height plus sparse per-index overrides.
//!
//! Every function here treats indices `>= total_count` in the override map
//! as absent, so a shrunk list never counts stale measurements.

use std::collections::BTreeMap;
use std::ops::RangeBounds;

/// Recorded heights that differ from the base height, keyed by absolute index.
pub type HeightOverrides = BTreeMap<usize, f64>;

/// Heights of the three regions around a rendered window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RangeHeights {
    /// Everything above `first`.
    pub pre: f64,
    /// `first..=last`.
    pub mid: f64,
    /// Everything below `last`.
    pub post: f64,
}

impl RangeHeights {
    pub fn total(&self) -> f64 {
        self.pre + self.mid + self.post
    }
}

/// Height of `count` consecutive items covering `range`.
fn region_height<R>(expanded: &HeightOverrides, range: R, count: usize, base_height: f64) -> f64
where
    R: RangeBounds<usize>,
{
    let (overridden, sum) = expanded
        .range(range)
        .fold((0usize, 0.0), |(n, sum), (_, height)| (n + 1, sum + height));
    (count - overridden) as f64 * base_height + sum
}

/// Split a list of `total_count` items into pre/mid/post heights around the
/// inclusive window `first..=last`.
///
/// `pre + mid + post` always equals [`total_height`], which is what keeps
/// the scrollbar honest while only the window is mounted.
pub fn calc_range_heights(
    first: usize,
    last: usize,
    total_count: usize,
    base_height: f64,
    expanded: &HeightOverrides,
) -> RangeHeights {
    if total_count == 0 {
        return RangeHeights::default();
    }
    let last = last.min(total_count - 1);
    let first = first.min(last);

    RangeHeights {
        pre: region_height(expanded, ..first, first, base_height),
        mid: region_height(expanded, first..=last, last - first + 1, base_height),
        post: region_height(
            expanded,
            last + 1..total_count,
            total_count - last - 1,
            base_height,
        ),
    }
}

/// Height of the fully rendered list.
pub fn total_height(total_count: usize, base_height: f64, expanded: &HeightOverrides) -> f64 {
    region_height(expanded, ..total_count, total_count, base_height)
}

/// Offset of the top edge of item `index`.
pub fn offset_of(index: usize, total_count: usize, base_height: f64, expanded: &HeightOverrides) -> f64 {
    let index = index.min(total_count);
    region_height(expanded, ..index, index, base_height)
}

/// Index of the item whose extent contains `offset`.
///
/// Equivalent to walking items from 0 and stopping at the first one whose
/// bottom edge lies past `offset`, but runs of base-height items between
/// overrides are skipped arithmetically. Offsets past the end resolve to
/// the last item. Returns `None` for an empty list.
pub fn index_at_offset(
    offset: f64,
    total_count: usize,
    base_height: f64,
    expanded: &HeightOverrides,
) -> Option<usize> {
    if total_count == 0 {
        return None;
    }
    let offset = offset.max(0.0);
    let mut index = 0usize;
    let mut top = 0.0;

    for (&overridden, &height) in expanded.range(..total_count) {
        if overridden > index {
            let run = (overridden - index) as f64 * base_height;
            if offset < top + run {
                let step = ((offset - top) / base_height) as usize;
                return Some((index + step).min(overridden - 1));
            }
            top += run;
        }
        if offset < top + height {
            return Some(overridden);
        }
        top += height;
        index = overridden + 1;
    }

    let step = ((offset - top).max(0.0) / base_height) as usize;
    Some(index.saturating_add(step).min(total_count - 1))
}
