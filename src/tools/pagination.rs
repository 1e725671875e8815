//! Paged reads with a conditional count.
//!
//! A count query is issued only when the page came back full, i.e. when more
//! rows might exist. The count is a second, separate read: a concurrent write
//! or unstable store ordering can make it disagree with the page, so it is an
//! approximation. It is clamped to never trail `offset + page length`.

use tracing::{debug, info};

use super::ToolArguments;
use crate::error::StoreError;
use crate::store::{self, QueryParams, RecordStore, Resource, Row, resource_uri};

pub const DEFAULT_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Window {
    fn default() -> Self {
        Self { limit: DEFAULT_LIMIT, offset: 0 }
    }
}

impl Window {
    /// Non-positive limits and negative offsets fall back to the defaults.
    pub fn from_args(args: &ToolArguments) -> Self {
        let limit = args
            .int("limit")
            .filter(|l| *l > 0)
            .and_then(|l| u32::try_from(l).ok())
            .unwrap_or(DEFAULT_LIMIT);
        let offset = args
            .int("offset")
            .filter(|o| *o >= 0)
            .and_then(|o| u32::try_from(o).ok())
            .unwrap_or(0);
        Self { limit, offset }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: Option<u64>,
    pub window: Window,
}

impl<T> Page<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn end(&self) -> u64 {
        u64::from(self.window.offset) + self.items.len() as u64
    }

    /// `Showing 1-2 of 5 total chats` or `Showing 1 chat (page complete)`.
    pub fn summary_line(&self, noun: &str) -> String {
        match self.total {
            Some(total) => format!(
                "Showing {}-{} of {} total {}s",
                u64::from(self.window.offset) + 1,
                self.end(),
                total,
                noun
            ),
            None => format!(
                "Showing {} {}{} (page complete)",
                self.len(),
                noun,
                crate::format::plural(self.len())
            ),
        }
    }

    pub fn next_page_hint(&self) -> Option<String> {
        match self.total {
            Some(total) if self.end() < total => Some(format!("Use offset={} to get the next page", self.end())),
            _ => None,
        }
    }

    pub fn empty_page_hint(&self) -> Option<&'static str> {
        (self.is_empty() && self.window.offset > 0).then_some("This page is empty - try a smaller offset value.")
    }
}

/// Runs the paged query and, when the page is full, the count query with the same filters.
pub fn fetch_page<T>(
    store: &dyn RecordStore,
    resource: Resource,
    filters: &QueryParams,
    window: Window,
    map: impl Fn(&Row) -> T,
) -> Result<Page<T>, StoreError> {
    let page_params = filters.windowed(window.limit, window.offset);
    debug!(uri = %resource_uri(resource.path(), &page_params), "page query");
    let items: Vec<T> = store.query(resource.path(), &page_params)?.map(|row| map(&row)).collect();

    let total = if items.len() == window.limit as usize {
        let counted = store::count(store, resource, filters)?;
        info!(resource = resource.path(), total = counted, "total count fetched");
        Some(counted.max(u64::from(window.offset) + items.len() as u64))
    } else {
        None
    };
    Ok(Page { items, total, window })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Chat;
    use crate::tools::testing::{RecordingStore, five_chats};
    use serde_json::json;

    fn window(limit: u32, offset: u32) -> Window {
        Window { limit, offset }
    }

    #[test]
    fn short_page_carries_no_total() {
        let store = RecordingStore::new(five_chats());
        for (limit, offset) in [(10, 0), (6, 0), (2, 4), (3, 3), (1, 9)] {
            let page = fetch_page(&store, Resource::Chats, &QueryParams::new(), window(limit, offset), Chat::from_row)
                .unwrap();
            assert!(page.len() < limit as usize);
            assert_eq!(page.total, None);
        }
        assert!(store.calls().iter().all(|c| c == "query chats"));
    }

    #[test]
    fn full_page_total_covers_page() {
        let store = RecordingStore::new(five_chats());
        for (limit, offset) in [(1, 0), (2, 0), (2, 3), (5, 0)] {
            let page = fetch_page(&store, Resource::Chats, &QueryParams::new(), window(limit, offset), Chat::from_row)
                .unwrap();
            assert_eq!(page.len(), limit as usize);
            let total = page.total.expect("full page counts");
            assert!(total >= u64::from(offset + limit));
        }
        assert_eq!(store.calls().iter().filter(|c| *c == "query chats/count").count(), 4);
    }

    #[test]
    fn footer_lines() {
        let full = Page { items: vec![1, 2], total: Some(5), window: window(2, 0) };
        assert_eq!(full.summary_line("chat"), "Showing 1-2 of 5 total chats");
        assert_eq!(full.next_page_hint().as_deref(), Some("Use offset=2 to get the next page"));

        let last = Page { items: vec![1, 2], total: Some(4), window: window(2, 2) };
        assert_eq!(last.next_page_hint(), None);

        let tail = Page { items: vec![1], total: None, window: window(2, 4) };
        assert_eq!(tail.summary_line("chat"), "Showing 1 chat (page complete)");

        let empty: Page<i32> = Page { items: vec![], total: None, window: window(2, 8) };
        assert!(empty.empty_page_hint().is_some());
    }

    #[test]
    fn malformed_window_arguments_fall_back() {
        let w = Window::from_args(&json!({"limit": "ten", "offset": -4}).into());
        assert_eq!(w, Window::default());
        let w = Window::from_args(&json!({"limit": 0}).into());
        assert_eq!(w.limit, DEFAULT_LIMIT);
        let w = Window::from_args(&json!({"limit": "5", "offset": "10"}).into());
        assert_eq!(w, window(5, 10));
    }
}
