use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;

use crate::error::{AdminError, AdminResult};
use crate::models::parse_date;
use crate::store::{EventStore, Filter, SelectQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    NothingToArchive,
    Archived(usize),
}

/// Moves every live event ending on or before `cutoff` into the archive table.
pub fn archive_through(store: &dyn EventStore, cutoff: NaiveDate) -> AdminResult<ArchiveOutcome> {
    let rows = store.select(&SelectQuery::events(Filter::EndDateOnOrBefore(cutoff)))?;
    if rows.is_empty() {
        tracing::info!(%cutoff, "nothing to archive");
        return Ok(ArchiveOutcome::NothingToArchive);
    }

    match store.move_to_archive(&rows) {
        Ok(()) => {
            tracing::info!(%cutoff, archived = rows.len(), "archived events");
            Ok(ArchiveOutcome::Archived(rows.len()))
        }
        Err(err @ AdminError::PartialArchive { .. }) => {
            tracing::error!(%cutoff, error = %err, "archive left duplicated rows");
            Err(err)
        }
        Err(err) => {
            tracing::error!(%cutoff, error = %err, "archive copy failed");
            Err(err)
        }
    }
}

/// Accepts `YYYY-MM-DD` or `today`, the latter resolved in `tz`.
pub fn parse_cutoff(input: &str, tz: Tz) -> AdminResult<NaiveDate> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AdminError::Validation("choose an archive date".to_string()));
    }
    if input.eq_ignore_ascii_case("today") {
        return Ok(Utc::now().with_timezone(&tz).date_naive());
    }
    parse_date("archive date", input)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::db::LocalStore;
    use crate::models::EventRecord;
    use crate::store::Table;

    fn ending(y: i32, m: u32, d: u32) -> EventRecord {
        let date = NaiveDate::from_ymd_opt(y, m, d);
        EventRecord {
            start_date: date,
            end_date: date,
            ..EventRecord::default()
        }
    }

    fn archive_table() -> SelectQuery {
        SelectQuery {
            table: Table::Archive,
            ..SelectQuery::events(Filter::All)
        }
    }

    #[test]
    fn rows_on_or_before_cutoff_move_and_later_rows_stay() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .insert(
                Table::Events,
                &[ending(2024, 1, 31), ending(2024, 2, 1), ending(2024, 2, 2)],
            )
            .unwrap();
        let cutoff = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();

        assert_eq!(
            archive_through(&store, cutoff).unwrap(),
            ArchiveOutcome::Archived(2)
        );

        let live = store.select(&SelectQuery::events(Filter::All)).unwrap();
        assert_eq!(live.len(), 1);
        assert!(live[0].end_date.unwrap() > cutoff);
        assert_eq!(store.select(&archive_table()).unwrap().len(), 2);
    }

    #[test]
    fn empty_selection_reports_nothing_to_archive() {
        let store = LocalStore::open_in_memory().unwrap();
        let cutoff = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        assert_eq!(
            archive_through(&store, cutoff).unwrap(),
            ArchiveOutcome::NothingToArchive
        );
    }

    /// Copies succeed but the live-table delete fails.
    struct FailingDelete {
        inner: LocalStore,
        deletes: Cell<usize>,
    }

    impl EventStore for FailingDelete {
        fn insert(&self, table: Table, rows: &[EventRecord]) -> AdminResult<Vec<EventRecord>> {
            self.inner.insert(table, rows)
        }
        fn update(&self, id: &str, record: &EventRecord) -> AdminResult<()> {
            self.inner.update(id, record)
        }
        fn delete(&self, id: &str) -> AdminResult<()> {
            self.inner.delete(id)
        }
        fn delete_many(&self, _table: Table, _ids: &[String]) -> AdminResult<()> {
            self.deletes.set(self.deletes.get() + 1);
            Err(AdminError::Remote("permission denied".to_string()))
        }
        fn select(&self, query: &SelectQuery) -> AdminResult<Vec<EventRecord>> {
            self.inner.select(query)
        }
    }

    #[test]
    fn failed_delete_after_copy_is_partial() {
        let store = FailingDelete {
            inner: LocalStore::open_in_memory().unwrap(),
            deletes: Cell::new(0),
        };
        store.insert(Table::Events, &[ending(2024, 1, 1)]).unwrap();

        let err = archive_through(&store, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .unwrap_err();
        assert!(matches!(err, AdminError::PartialArchive { copied: 1, .. }));
        assert_eq!(store.deletes.get(), 1);
        // Duplicated, not lost.
        assert_eq!(store.select(&SelectQuery::events(Filter::All)).unwrap().len(), 1);
        assert_eq!(store.select(&archive_table()).unwrap().len(), 1);
    }

    #[test]
    fn cutoff_accepts_iso_dates_and_today() {
        let tz = chrono_tz::Europe::Zurich;
        assert_eq!(
            parse_cutoff("2024-02-01", tz).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
        );
        assert!(parse_cutoff("today", tz).is_ok());
        assert!(matches!(parse_cutoff("", tz), Err(AdminError::Validation(_))));
    }
}
