use crate::error::AdminResult;
use crate::models::EventRecord;
use crate::store::{EventStore, Filter, Ordering, SelectQuery};

pub const FIRST_PAGE_LIMIT: usize = 1000;
pub const LOAD_MORE_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: usize,
    pub limit: usize,
}

/// Page 0 is the large initial load; every later page is a smaller "load more".
pub fn window(page: usize) -> Window {
    match page {
        0 => Window {
            offset: 0,
            limit: FIRST_PAGE_LIMIT,
        },
        n => Window {
            offset: FIRST_PAGE_LIMIT + (n - 1) * LOAD_MORE_LIMIT,
            limit: LOAD_MORE_LIMIT,
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub number: usize,
    pub events: Vec<EventRecord>,
    pub has_more: bool,
}

pub fn fetch_page(store: &dyn EventStore, page: usize, ordering: Ordering) -> AdminResult<Page> {
    let Window { offset, limit } = window(page);
    let query = SelectQuery::events(Filter::All)
        .ordered(ordering)
        .range(offset, limit);
    let events = store.select(&query)?;
    let has_more = events.len() == limit;
    tracing::debug!(page, offset, returned = events.len(), has_more, "fetched page");
    Ok(Page {
        number: page,
        events,
        has_more,
    })
}
