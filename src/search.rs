use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::error::AdminResult;
use crate::pagination::{fetch_page, Page};
use crate::store::{EventStore, Filter, Ordering, SelectQuery};

pub const SEARCH_LIMIT: usize = 200;

/// Substring search over title, description, address and website. A blank query
/// falls back to the first listing page.
pub fn search(store: &dyn EventStore, query: &str, ordering: Ordering) -> AdminResult<Page> {
    let query = query.trim();
    if query.is_empty() {
        return fetch_page(store, 0, ordering);
    }
    let select = SelectQuery::events(Filter::Matches(query.to_string()))
        .ordered(ordering)
        .limit(SEARCH_LIMIT);
    let events = store.select(&select)?;
    tracing::debug!(query, hits = events.len(), "search finished");
    Ok(Page {
        number: 0,
        events,
        has_more: false,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SearchTicket(u64);

/// Hands out increasing tickets so only the most recently issued search gets applied.
#[derive(Debug, Default)]
pub struct SearchSequencer {
    latest: AtomicU64,
}

impl SearchSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> SearchTicket {
        SearchTicket(self.latest.fetch_add(1, AtomicOrdering::SeqCst) + 1)
    }

    pub fn is_current(&self, ticket: SearchTicket) -> bool {
        self.latest.load(AtomicOrdering::SeqCst) == ticket.0
    }

    /// Returns the response only if no newer search was issued since `ticket`.
    pub fn accept<T>(&self, ticket: SearchTicket, response: T) -> Option<T> {
        if self.is_current(ticket) {
            Some(response)
        } else {
            tracing::debug!(ticket = ticket.0, "discarding stale search response");
            None
        }
    }
}

/// Forwards an input only once it has been quiet for `delay`; a newer input restarts
/// the wait. Pending input is flushed when the sender side closes.
pub async fn debounce(
    mut input: mpsc::Receiver<String>,
    output: mpsc::Sender<String>,
    delay: Duration,
) {
    let mut pending: Option<String> = None;
    loop {
        let next = match pending {
            Some(_) => timeout(delay, input.recv()).await,
            None => Ok(input.recv().await),
        };
        match next {
            Ok(Some(value)) => pending = Some(value),
            Ok(None) => {
                if let Some(value) = pending.take() {
                    let _ = output.send(value).await;
                }
                break;
            }
            Err(_) => {
                if let Some(value) = pending.take() {
                    if output.send(value).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Runs a search for every query and forwards its result only if no newer query was
/// issued in the meantime. Finished searches are reaped while new queries arrive.
pub async fn run_latest<T, F, Fut>(
    mut queries: mpsc::Receiver<String>,
    results: mpsc::UnboundedSender<(String, T)>,
    run: F,
) -> AdminResult<()>
where
    T: Send + 'static,
    F: Fn(String) -> Fut,
    Fut: Future<Output = AdminResult<T>> + Send + 'static,
{
    let sequencer = Arc::new(SearchSequencer::new());
    let mut in_flight = JoinSet::new();
    loop {
        tokio::select! {
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => joined?,
            next = queries.recv() => {
                let Some(query) = next else { break };
                let ticket = sequencer.issue();
                let sequencer = Arc::clone(&sequencer);
                let results = results.clone();
                let search = run(query.clone());
                in_flight.spawn(async move {
                    match search.await {
                        Ok(found) => {
                            if let Some(found) = sequencer.accept(ticket, found) {
                                let _ = results.send((query, found));
                            }
                        }
                        Err(err) => tracing::error!(%query, error = %err, "search failed"),
                    }
                });
            }
        }
    }
    while let Some(joined) = in_flight.join_next().await {
        joined?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::db::LocalStore;
    use crate::models::EventRecord;
    use crate::store::Table;

    #[test]
    fn newer_ticket_makes_older_response_stale() {
        let sequencer = SearchSequencer::new();
        let first = sequencer.issue();
        let second = sequencer.issue();
        assert_eq!(sequencer.accept(first, "old"), None);
        assert_eq!(sequencer.accept(second, "new"), Some("new"));
        assert!(first < second);
    }

    #[test]
    fn blank_query_lists_the_first_page() {
        let store = LocalStore::open_in_memory().unwrap();
        store.insert(Table::Events, &[EventRecord::default()]).unwrap();
        let page = search(&store, "   ", Ordering::default()).unwrap();
        assert_eq!(page.events.len(), 1);
    }

    #[test]
    fn query_matches_any_text_column() {
        let store = LocalStore::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 1);
        store
            .insert(
                Table::Events,
                &[
                    EventRecord {
                        title: Some("Flea market".to_string()),
                        end_date: date,
                        ..EventRecord::default()
                    },
                    EventRecord {
                        website: Some("https://market.example.ch".to_string()),
                        end_date: date,
                        ..EventRecord::default()
                    },
                    EventRecord {
                        title: Some("Concert".to_string()),
                        end_date: date,
                        ..EventRecord::default()
                    },
                ],
            )
            .unwrap();
        let page = search(&store, "MARKET", Ordering::default()).unwrap();
        assert_eq!(page.events.len(), 2);
        assert!(!page.has_more);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_emits_only_the_settled_value() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let delay = Duration::from_millis(400);
        let task = tokio::spawn(debounce(in_rx, out_tx, delay));

        in_tx.send("j".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        in_tx.send("ja".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        in_tx.send("jazz".to_string()).await.unwrap();

        assert_eq!(out_rx.recv().await.as_deref(), Some("jazz"));

        in_tx.send("rock".to_string()).await.unwrap();
        drop(in_tx);
        assert_eq!(out_rx.recv().await.as_deref(), Some("rock"));
        assert_eq!(out_rx.recv().await, None);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_older_search_is_never_applied() {
        let (query_tx, query_rx) = mpsc::channel(8);
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_latest(query_rx, result_tx, |query: String| async move {
            let wait = if query == "ja" { 500 } else { 10 };
            tokio::time::sleep(Duration::from_millis(wait)).await;
            Ok::<usize, crate::error::AdminError>(query.len())
        }));

        query_tx.send("ja".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        query_tx.send("jazz".to_string()).await.unwrap();
        drop(query_tx);

        assert_eq!(result_rx.recv().await, Some(("jazz".to_string(), 4)));
        assert_eq!(result_rx.recv().await, None);
        task.await.unwrap().unwrap();
    }
}
