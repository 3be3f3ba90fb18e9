use crate::config::CurrentUser;
use crate::error::{AdminError, AdminResult};
use crate::models::{EventForm, EventRecord};
use crate::recurrence::{plan_save, SavePlan};
use crate::store::{EventStore, Table};

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Created(Vec<EventRecord>),
    Replaced { removed: String, rows: Vec<EventRecord> },
    Updated(String),
}

/// Form actions performed on behalf of the signed-in user.
pub struct EventAdmin<'a> {
    store: &'a dyn EventStore,
    user: Option<CurrentUser>,
    max_occurrences: usize,
}

impl<'a> EventAdmin<'a> {
    pub fn new(store: &'a dyn EventStore, user: Option<CurrentUser>, max_occurrences: usize) -> Self {
        Self {
            store,
            user,
            max_occurrences,
        }
    }

    fn user(&self) -> AdminResult<&CurrentUser> {
        self.user.as_ref().ok_or(AdminError::NotSignedIn)
    }

    pub fn get(&self, id: &str) -> AdminResult<EventRecord> {
        self.store
            .get(id)?
            .ok_or_else(|| AdminError::NotFound(id.to_string()))
    }

    pub fn save(&self, form: &EventForm, editing_id: Option<&str>) -> AdminResult<SaveOutcome> {
        let user = self.user()?;
        let mut draft = form.normalize()?;
        draft.record.user_id = Some(user.id.clone());
        draft.record.user_email = user.email.clone();

        match plan_save(&draft, editing_id, self.max_occurrences)? {
            SavePlan::Insert(rows) => {
                let stored = self.store.insert(Table::Events, &rows)?;
                tracing::info!(created = stored.len(), "saved new event");
                Ok(SaveOutcome::Created(stored))
            }
            SavePlan::ReplaceSeries { id, rows } => {
                // Insert first so a failed insert leaves the old row in place.
                let stored = self.store.insert(Table::Events, &rows)?;
                self.store.delete(&id)?;
                tracing::info!(%id, created = stored.len(), "replaced event with series");
                Ok(SaveOutcome::Replaced {
                    removed: id,
                    rows: stored,
                })
            }
            SavePlan::UpdateInPlace { id, record } => {
                self.store.update(&id, &record)?;
                tracing::info!(%id, "updated event");
                Ok(SaveOutcome::Updated(id))
            }
        }
    }

    pub fn delete(&self, id: &str) -> AdminResult<()> {
        if id.trim().is_empty() {
            return Err(AdminError::Validation("no id to delete".to_string()));
        }
        self.store.delete(id)?;
        tracing::info!(%id, "deleted event");
        Ok(())
    }

    /// Duplicates a row under the current user and returns the new id.
    pub fn copy(&self, id: &str) -> AdminResult<String> {
        let user = self.user()?;
        let source = self.get(id)?;
        let stored = self
            .store
            .insert(Table::Events, &[source.duplicate_for(&user.id)])?;
        let new_id = stored
            .into_iter()
            .next()
            .and_then(|row| row.id)
            .ok_or_else(|| AdminError::Remote("store did not return the copied row".to_string()))?;
        tracing::info!(source = %id, copy = %new_id, "copied event");
        Ok(new_id)
    }
}
