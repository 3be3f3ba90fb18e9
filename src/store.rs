use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;

use crate::error::{AdminError, AdminResult};
use crate::models::EventRecord;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Table {
    Events,
    Archive,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Events => "events",
            Table::Archive => "old_events",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    CreatedAt,
    StartDate,
    EndDate,
    Title,
}

impl SortField {
    pub fn column(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::StartDate => "start_date",
            SortField::EndDate => "end_date",
            SortField::Title => "title",
        }
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim() {
            "created_at" | "created" => Ok(SortField::CreatedAt),
            "start_date" | "start" => Ok(SortField::StartDate),
            "end_date" | "end" => Ok(SortField::EndDate),
            "title" => Ok(SortField::Title),
            other => Err(format!("cannot sort by {other}")),
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ordering {
    pub field: SortField,
    pub ascending: bool,
}

impl Default for Ordering {
    fn default() -> Self {
        Self {
            field: SortField::CreatedAt,
            ascending: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    All,
    IdEquals(String),
    EndDateOnOrBefore(NaiveDate),
    /// Case-insensitive substring over title, description, address and website.
    Matches(String),
}

pub const SEARCH_COLUMNS: [&str; 4] = ["title", "description", "address", "website"];

#[derive(Clone, Debug, PartialEq)]
pub struct SelectQuery {
    pub table: Table,
    pub filter: Filter,
    pub ordering: Ordering,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl SelectQuery {
    pub fn events(filter: Filter) -> Self {
        Self {
            table: Table::Events,
            filter,
            ordering: Ordering::default(),
            offset: None,
            limit: None,
        }
    }

    pub fn ordered(mut self, ordering: Ordering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn range(mut self, offset: usize, limit: usize) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Row-level operations the admin needs from a backing store.
pub trait EventStore {
    /// Inserts rows and returns them as stored, with ids and timestamps filled in.
    fn insert(&self, table: Table, rows: &[EventRecord]) -> AdminResult<Vec<EventRecord>>;

    fn update(&self, id: &str, record: &EventRecord) -> AdminResult<()>;

    fn delete(&self, id: &str) -> AdminResult<()>;

    fn delete_many(&self, table: Table, ids: &[String]) -> AdminResult<()>;

    fn select(&self, query: &SelectQuery) -> AdminResult<Vec<EventRecord>>;

    fn get(&self, id: &str) -> AdminResult<Option<EventRecord>> {
        let query = SelectQuery::events(Filter::IdEquals(id.to_string())).limit(1);
        Ok(self.select(&query)?.into_iter().next())
    }

    /// Copies `rows` into the archive table, then removes them from the live table.
    /// A failed removal after a successful copy is reported as a partial archive.
    fn move_to_archive(&self, rows: &[EventRecord]) -> AdminResult<()> {
        self.insert(Table::Archive, rows)?;
        let ids: Vec<String> = rows.iter().filter_map(|row| row.id.clone()).collect();
        self.delete_many(Table::Events, &ids)
            .map_err(|err| AdminError::PartialArchive {
                copied: rows.len(),
                message: err.to_string(),
            })
    }
}
