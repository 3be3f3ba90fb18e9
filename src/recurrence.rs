//! Materializes a draft plus repeat rule into the concrete rows to persist.

use chrono::{Datelike, Duration, NaiveDate};

use crate::error::{AdminError, AdminResult};
use crate::models::{EventDraft, EventRecord, RepeatMode};

pub const DEFAULT_MAX_OCCURRENCES: usize = 260;

/// What a save should do against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum SavePlan {
    Insert(Vec<EventRecord>),
    /// Remove the edited row and insert a freshly expanded series in its place.
    ReplaceSeries { id: String, rows: Vec<EventRecord> },
    UpdateInPlace { id: String, record: EventRecord },
}

pub fn plan_save(
    draft: &EventDraft,
    editing_id: Option<&str>,
    max_occurrences: usize,
) -> AdminResult<SavePlan> {
    match editing_id {
        None => expand(
            &draft.record,
            draft.repeat,
            draft.repeat_until,
            max_occurrences,
        )
        .map(SavePlan::Insert),
        Some(id) if draft.repeat.is_recurring() => {
            let rows = expand(
                &draft.record,
                draft.repeat,
                draft.repeat_until,
                max_occurrences,
            )?;
            Ok(SavePlan::ReplaceSeries {
                id: id.to_string(),
                rows,
            })
        }
        Some(id) => {
            if draft.record.start_date.is_none() {
                return Err(AdminError::Validation(
                    "start date is required".to_string(),
                ));
            }
            Ok(SavePlan::UpdateInPlace {
                id: id.to_string(),
                record: draft.record.clone(),
            })
        }
    }
}

/// Expands `draft` into one row per occurrence. Only the start and end dates differ
/// between rows; the end date moves in step with the start date.
pub fn expand(
    draft: &EventRecord,
    mode: RepeatMode,
    until: Option<NaiveDate>,
    max_occurrences: usize,
) -> AdminResult<Vec<EventRecord>> {
    let mut start = draft
        .start_date
        .ok_or_else(|| AdminError::Validation("start date is required".to_string()))?;
    let mut end = draft.end_date;

    if !mode.is_recurring() {
        return Ok(vec![occurrence(draft, start, end)]);
    }

    let cap = max_occurrences.max(1);
    let mut rows = Vec::new();
    loop {
        if rows.len() == cap {
            match until {
                None => {
                    tracing::warn!(
                        cap,
                        first = %draft.start_date.unwrap_or(start),
                        "open-ended series truncated"
                    );
                    break;
                }
                Some(limit) => {
                    return Err(AdminError::Validation(format!(
                        "series through {limit} needs more than {cap} occurrences"
                    )))
                }
            }
        }

        rows.push(occurrence(draft, start, end));

        start = step(start, mode)?;
        end = end.map(|date| step(date, mode)).transpose()?;

        if until.is_some_and(|limit| start > limit) {
            break;
        }
    }

    tracing::debug!(occurrences = rows.len(), ?mode, "expanded series");
    Ok(rows)
}

fn occurrence(draft: &EventRecord, start: NaiveDate, end: Option<NaiveDate>) -> EventRecord {
    EventRecord {
        start_date: Some(start),
        end_date: Some(end.unwrap_or(start)),
        ..draft.clone()
    }
}

fn step(date: NaiveDate, mode: RepeatMode) -> AdminResult<NaiveDate> {
    let next = match mode {
        RepeatMode::None => Some(date),
        RepeatMode::Weekly => date.checked_add_signed(Duration::days(7)),
        RepeatMode::Monthly => add_month_rolling(date),
    };
    next.ok_or_else(|| AdminError::Validation(format!("date out of range after {date}")))
}

/// Same day number one month later. Days past the end of the target month roll into
/// the following month: Jan 31 becomes Mar 3 (Mar 2 in leap years).
fn add_month_rolling(date: NaiveDate) -> Option<NaiveDate> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    first.checked_add_signed(Duration::days(i64::from(date.day()) - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn draft(start: NaiveDate, end: Option<NaiveDate>) -> EventRecord {
        EventRecord {
            title: Some("Yoga in the park".to_string()),
            user_id: Some("user-1".to_string()),
            user_email: Some("admin@example.com".to_string()),
            start_date: Some(start),
            end_date: end,
            ..EventRecord::default()
        }
    }

    #[test]
    fn no_repeat_emits_the_draft_once() {
        let base = draft(date(2024, 5, 3), Some(date(2024, 5, 4)));
        let rows = expand(&base, RepeatMode::None, Some(date(2025, 1, 1)), 10).unwrap();
        assert_eq!(rows, vec![base]);
    }

    #[test]
    fn weekly_through_three_weeks_gives_four_rows() {
        let start = date(2024, 5, 3);
        let until = start + Duration::days(21);
        let rows = expand(&draft(start, None), RepeatMode::Weekly, Some(until), 100).unwrap();
        let starts: Vec<_> = rows.iter().map(|r| r.start_date.unwrap()).collect();
        assert_eq!(
            starts,
            vec![
                date(2024, 5, 3),
                date(2024, 5, 10),
                date(2024, 5, 17),
                date(2024, 5, 24)
            ]
        );
        assert!(starts.iter().all(|s| *s <= until));
    }

    #[test]
    fn every_row_keeps_owner_and_content() {
        let base = draft(date(2024, 5, 3), None);
        let rows = expand(&base, RepeatMode::Weekly, Some(date(2024, 5, 20)), 100).unwrap();
        for row in rows {
            assert_eq!(row.title, base.title);
            assert_eq!(row.user_id, base.user_id);
            assert_eq!(row.user_email, base.user_email);
        }
    }

    #[test]
    fn blank_end_date_tracks_each_occurrence() {
        let rows = expand(
            &draft(date(2024, 1, 10), None),
            RepeatMode::Monthly,
            Some(date(2024, 4, 10)),
            100,
        )
        .unwrap();
        assert_eq!(rows.len(), 4);
        for row in rows {
            assert_eq!(row.end_date, row.start_date);
        }
    }

    #[test]
    fn end_date_advances_with_start_date() {
        let rows = expand(
            &draft(date(2024, 5, 3), Some(date(2024, 5, 5))),
            RepeatMode::Weekly,
            Some(date(2024, 5, 10)),
            100,
        )
        .unwrap();
        assert_eq!(rows[1].start_date, Some(date(2024, 5, 10)));
        assert_eq!(rows[1].end_date, Some(date(2024, 5, 12)));
    }

    #[test]
    fn open_ended_series_is_capped() {
        let rows = expand(&draft(date(2024, 1, 1), None), RepeatMode::Monthly, None, 12).unwrap();
        assert_eq!(rows.len(), 12);
        assert_eq!(rows[11].start_date, Some(date(2024, 12, 1)));
    }

    #[test]
    fn bounded_series_over_the_cap_is_rejected() {
        let result = expand(
            &draft(date(2024, 1, 1), None),
            RepeatMode::Weekly,
            Some(date(2030, 1, 1)),
            52,
        );
        assert!(matches!(result, Err(AdminError::Validation(_))));
    }

    #[test]
    fn first_occurrence_is_emitted_even_when_until_precedes_start() {
        let rows = expand(
            &draft(date(2024, 5, 3), None),
            RepeatMode::Weekly,
            Some(date(2024, 5, 1)),
            100,
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
    }

    // Day-of-month overflow rolls into the next month and the series keeps stepping
    // from the rolled date.
    #[test]
    fn monthly_overflow_rolls_forward() {
        let rows = expand(
            &draft(date(2023, 1, 31), None),
            RepeatMode::Monthly,
            Some(date(2023, 4, 30)),
            100,
        )
        .unwrap();
        let starts: Vec<_> = rows.iter().map(|r| r.start_date.unwrap()).collect();
        assert_eq!(
            starts,
            vec![date(2023, 1, 31), date(2023, 3, 3), date(2023, 4, 3)]
        );
        assert_eq!(add_month_rolling(date(2024, 1, 31)), Some(date(2024, 3, 2)));
        assert_eq!(add_month_rolling(date(2024, 12, 15)), Some(date(2025, 1, 15)));
    }

    #[test]
    fn missing_start_date_is_a_validation_error() {
        let mut base = draft(date(2024, 1, 1), None);
        base.start_date = None;
        assert!(matches!(
            expand(&base, RepeatMode::None, None, 10),
            Err(AdminError::Validation(_))
        ));
    }

    #[test]
    fn edits_replace_series_only_when_recurring() {
        let mut series = EventDraft {
            record: draft(date(2024, 5, 3), None),
            repeat: RepeatMode::None,
            repeat_until: None,
        };
        assert!(matches!(
            plan_save(&series, Some("ev-1"), 10).unwrap(),
            SavePlan::UpdateInPlace { ref id, .. } if id == "ev-1"
        ));

        series.repeat = RepeatMode::Weekly;
        series.repeat_until = Some(date(2024, 5, 17));
        match plan_save(&series, Some("ev-1"), 10).unwrap() {
            SavePlan::ReplaceSeries { id, rows } => {
                assert_eq!(id, "ev-1");
                assert_eq!(rows.len(), 3);
            }
            other => panic!("unexpected plan: {other:?}"),
        }

        assert!(matches!(
            plan_save(&series, None, 10).unwrap(),
            SavePlan::Insert(rows) if rows.len() == 3
        ));
    }
}
