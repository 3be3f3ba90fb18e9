use std::path::Path;

use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, Row};

use crate::error::{AdminError, AdminResult};
use crate::models::EventRecord;
use crate::store::{EventStore, Filter, SelectQuery, Table};
use crate::config::data_root;

const DATABASE_FILE: &str = "events.sqlite";

/// SQLite-backed store used when no hosted backend is configured.
pub struct LocalStore {
    conn: Connection,
}

impl LocalStore {
    pub fn open_default() -> AdminResult<Self> {
        let root = data_root();
        std::fs::create_dir_all(&root).map_err(|err| {
            AdminError::Config(format!("cannot create {}: {err}", root.display()))
        })?;
        Self::open(&root.join(DATABASE_FILE))
    }

    pub fn open(path: &Path) -> AdminResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> AdminResult<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        for table in [Table::Events, Table::Archive] {
            let name = table.name();
            self.conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {name}(
                    id TEXT PRIMARY KEY,
                    payload TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    start_date TEXT,
                    end_date TEXT,
                    title TEXT
                );
                CREATE INDEX IF NOT EXISTS {name}_end_date ON {name}(end_date);"
            ))?;
        }
        Ok(())
    }

    fn insert_rows(
        conn: &Connection,
        table: Table,
        rows: &[EventRecord],
    ) -> AdminResult<Vec<EventRecord>> {
        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            let mut row = row.clone();
            let id = row
                .id
                .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
                .clone();
            let created_at = *row.created_at.get_or_insert_with(Utc::now);
            let payload = serde_json::to_string(&row)?;
            conn.execute(
                &format!(
                    "INSERT INTO {} (id, payload, created_at, start_date, end_date, title)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(id) DO UPDATE SET
                       payload = excluded.payload,
                       start_date = excluded.start_date,
                       end_date = excluded.end_date,
                       title = excluded.title",
                    table.name()
                ),
                params![
                    id,
                    payload,
                    created_at.to_rfc3339(),
                    row.start_date.map(|d| d.to_string()),
                    row.end_date.map(|d| d.to_string()),
                    row.title,
                ],
            )?;
            stored.push(row);
        }
        Ok(stored)
    }

    fn delete_rows(conn: &Connection, table: Table, ids: &[String]) -> AdminResult<()> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", table.name());
        let mut stmt = conn.prepare(&sql)?;
        for id in ids {
            stmt.execute(params![id])?;
        }
        Ok(())
    }
}

fn decode(row: &Row<'_>) -> rusqlite::Result<EventRecord> {
    let payload: String = row.get(0)?;
    serde_json::from_str(&payload).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            payload.len(),
            rusqlite::types::Type::Text,
            Box::new(err),
        )
    })
}

fn matches(record: &EventRecord, needle: &str) -> bool {
    let fields = [
        &record.title,
        &record.description,
        &record.address,
        &record.website,
    ];
    fields
        .iter()
        .filter_map(|field| field.as_deref())
        .any(|value| value.to_lowercase().contains(needle))
}

impl EventStore for LocalStore {
    fn insert(&self, table: Table, rows: &[EventRecord]) -> AdminResult<Vec<EventRecord>> {
        Self::insert_rows(&self.conn, table, rows)
    }

    fn update(&self, id: &str, record: &EventRecord) -> AdminResult<()> {
        let existing = match self.get(id)? {
            Some(existing) => existing,
            None => return Err(AdminError::NotFound(id.to_string())),
        };
        let updated = EventRecord {
            id: existing.id,
            created_at: existing.created_at,
            user_email: existing.user_email,
            ..record.clone()
        };
        Self::insert_rows(&self.conn, Table::Events, &[updated])?;
        Ok(())
    }

    fn delete(&self, id: &str) -> AdminResult<()> {
        Self::delete_rows(&self.conn, Table::Events, &[id.to_string()])
    }

    fn delete_many(&self, table: Table, ids: &[String]) -> AdminResult<()> {
        Self::delete_rows(&self.conn, table, ids)
    }

    fn select(&self, query: &SelectQuery) -> AdminResult<Vec<EventRecord>> {
        let mut sql = format!("SELECT payload FROM {}", query.table.name());
        let mut args: Vec<String> = Vec::new();
        match &query.filter {
            Filter::All | Filter::Matches(_) => {}
            Filter::IdEquals(id) => {
                sql.push_str(" WHERE id = ?1");
                args.push(id.clone());
            }
            Filter::EndDateOnOrBefore(cutoff) => {
                sql.push_str(" WHERE end_date IS NOT NULL AND end_date <= ?1");
                args.push(cutoff.to_string());
            }
        }

        let direction = if query.ordering.ascending { "ASC" } else { "DESC" };
        let column = query.ordering.field.column();
        sql.push_str(&format!(" ORDER BY {column} IS NULL, {column} {direction}"));

        // Unicode-aware matching happens in Rust, so paging has to wait until after it.
        let page_in_sql = !matches!(query.filter, Filter::Matches(_));
        if page_in_sql {
            if let Some(limit) = query.limit {
                sql.push_str(&format!(" LIMIT {limit}"));
                if let Some(offset) = query.offset {
                    sql.push_str(&format!(" OFFSET {offset}"));
                }
            } else if let Some(offset) = query.offset {
                sql.push_str(&format!(" LIMIT -1 OFFSET {offset}"));
            }
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), decode)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }

        if let Filter::Matches(needle) = &query.filter {
            let needle = needle.to_lowercase();
            out = out
                .into_iter()
                .filter(|record| matches(record, &needle))
                .skip(query.offset.unwrap_or(0))
                .take(query.limit.unwrap_or(usize::MAX))
                .collect();
        }

        Ok(out)
    }

    fn move_to_archive(&self, rows: &[EventRecord]) -> AdminResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        Self::insert_rows(&tx, Table::Archive, rows)?;
        let ids: Vec<String> = rows.iter().filter_map(|row| row.id.clone()).collect();
        Self::delete_rows(&tx, Table::Events, &ids)?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::store::{Ordering, SortField};

    fn record(title: &str, end: (i32, u32, u32)) -> EventRecord {
        let end = NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap();
        EventRecord {
            title: Some(title.to_string()),
            start_date: Some(end),
            end_date: Some(end),
            ..EventRecord::default()
        }
    }

    #[test]
    fn insert_assigns_ids_and_timestamps() {
        let store = LocalStore::open_in_memory().unwrap();
        let stored = store
            .insert(Table::Events, &[record("A", (2024, 1, 1))])
            .unwrap();
        let id = stored[0].id.clone().unwrap();
        assert!(stored[0].created_at.is_some());
        assert_eq!(store.get(&id).unwrap().unwrap().title.as_deref(), Some("A"));
    }

    #[test]
    fn update_overwrites_fields_but_keeps_identity() {
        let store = LocalStore::open_in_memory().unwrap();
        let mut original = record("A", (2024, 1, 1));
        original.user_email = Some("owner@example.com".to_string());
        let stored = store.insert(Table::Events, &[original]).unwrap();
        let id = stored[0].id.clone().unwrap();

        let edited = EventRecord {
            description: Some("new".to_string()),
            ..record("B", (2024, 2, 1))
        };
        store.update(&id, &edited).unwrap();

        let reloaded = store.get(&id).unwrap().unwrap();
        assert_eq!(reloaded.title.as_deref(), Some("B"));
        assert_eq!(reloaded.description.as_deref(), Some("new"));
        assert_eq!(reloaded.created_at, stored[0].created_at);
        assert_eq!(reloaded.user_email.as_deref(), Some("owner@example.com"));
    }

    #[test]
    fn select_orders_and_pages() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .insert(
                Table::Events,
                &[
                    record("b", (2024, 1, 2)),
                    record("c", (2024, 1, 3)),
                    record("a", (2024, 1, 1)),
                ],
            )
            .unwrap();
        let query = SelectQuery::events(Filter::All)
            .ordered(Ordering {
                field: SortField::Title,
                ascending: true,
            })
            .range(1, 5);
        let titles: Vec<_> = store
            .select(&query)
            .unwrap()
            .into_iter()
            .map(|r| r.title.unwrap())
            .collect();
        assert_eq!(titles, vec!["b", "c"]);
    }

    #[test]
    fn matching_is_case_insensitive_for_cyrillic() {
        let store = LocalStore::open_in_memory().unwrap();
        let mut row = record("Концерт в парке", (2024, 1, 1));
        row.address = Some("Bahnhofstrasse 1, Zürich".to_string());
        store
            .insert(Table::Events, &[row, record("Other", (2024, 1, 1))])
            .unwrap();

        let hits = store
            .select(&SelectQuery::events(Filter::Matches("концерт".to_string())))
            .unwrap();
        assert_eq!(hits.len(), 1);

        let hits = store
            .select(&SelectQuery::events(Filter::Matches("ZÜRICH".to_string())))
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn archive_moves_rows_in_one_transaction() {
        let store = LocalStore::open_in_memory().unwrap();
        let stored = store
            .insert(Table::Events, &[record("old", (2024, 1, 1))])
            .unwrap();
        store.move_to_archive(&stored).unwrap();

        assert!(store.select(&SelectQuery::events(Filter::All)).unwrap().is_empty());
        let archived = store
            .select(&SelectQuery {
                table: Table::Archive,
                ..SelectQuery::events(Filter::All)
            })
            .unwrap();
        assert_eq!(archived, stored);
    }
}
