use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DEFAULT_PAGE: u32 = 20;
const MAX_PAGE: u32 = 100;

/// Keyset pagination over time-ordered ids: pages run newest first and the
/// cursor is the last id handed out.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    #[serde(default = "default_num_items")]
    pub num_items: u32,
    pub cursor: Option<Uuid>,
}

fn default_num_items() -> u32 {
    DEFAULT_PAGE
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { num_items: DEFAULT_PAGE, cursor: None }
    }
}

impl PageRequest {
    pub fn first(num_items: u32) -> Self {
        Self { num_items, cursor: None }
    }

    pub fn after(num_items: u32, cursor: Uuid) -> Self {
        Self { num_items, cursor: Some(cursor) }
    }

    pub fn limit(&self) -> u32 {
        self.num_items.clamp(1, MAX_PAGE)
    }

    /// Rows to fetch: one extra tells whether another page exists.
    pub fn fetch_limit(&self) -> i64 {
        i64::from(self.limit()) + 1
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub page: Vec<T>,
    pub is_done: bool,
    pub continue_cursor: Option<Uuid>,
}

impl<T> Page<T> {
    pub fn from_rows(mut rows: Vec<T>, req: &PageRequest, id_of: impl Fn(&T) -> Uuid) -> Self {
        let limit = req.limit() as usize;
        let is_done = rows.len() <= limit;
        rows.truncate(limit);
        let continue_cursor = if is_done { None } else { rows.last().map(id_of) };
        Page { page: rows, is_done, continue_cursor }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            page: self.page.into_iter().map(f).collect(),
            is_done: self.is_done,
            continue_cursor: self.continue_cursor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_row_means_more_pages() {
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::now_v7()).collect();
        let page = Page::from_rows(ids.clone(), &PageRequest::first(3), |id| *id);
        assert!(!page.is_done);
        assert_eq!(page.page.len(), 3);
        assert_eq!(page.continue_cursor, Some(ids[2]));

        let page = Page::from_rows(ids[..2].to_vec(), &PageRequest::first(3), |id| *id);
        assert!(page.is_done);
        assert_eq!(page.continue_cursor, None);
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(PageRequest::first(0).limit(), 1);
        assert_eq!(PageRequest::first(5000).limit(), MAX_PAGE);
    }
}
