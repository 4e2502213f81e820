/// One fixed-size slice of a remote collection, addressed by absolute index.
///
/// `from..=to` always spans a full page; only the last page of a collection
/// may hold fewer items than that (a short read marks the end of the data).
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// Page number (`from / page_size`).
    pub index: usize,
    /// First absolute index covered by this page (inclusive).
    pub from: usize,
    /// Last absolute index covered by this page (inclusive).
    pub to: usize,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(index: usize, page_size: usize, items: Vec<T>) -> Self {
        let page_size = page_size.max(1);
        let from = index * page_size;
        Self {
            index,
            from,
            to: from + page_size - 1,
            items,
        }
    }

    /// Whether `index` falls inside this page's bounds.
    pub fn contains(&self, index: usize) -> bool {
        self.from <= index && index <= self.to
    }

    /// Item at absolute `index`, if this page covers it and it was returned
    /// by the fetch.
    pub fn get(&self, index: usize) -> Option<&T> {
        if !self.contains(index) {
            return None;
        }
        self.items.get(index - self.from)
    }

    /// True when the fetch returned fewer items than the page spans.
    pub fn is_short(&self) -> bool {
        self.items.len() < self.to - self.from + 1
    }
}
