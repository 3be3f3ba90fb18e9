//! PostgREST client for the hosted `events` and `old_events` tables.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use serde::Deserialize;

use crate::config::AppConfig;
use crate::error::{AdminError, AdminResult};
use crate::models::EventRecord;
use crate::store::{EventStore, Filter, SelectQuery, Table, SEARCH_COLUMNS};

const DELETE_CHUNK: usize = 100;

pub struct SupabaseStore {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct PostgrestError {
    message: Option<String>,
    details: Option<String>,
}

impl SupabaseStore {
    pub fn from_config(config: &AppConfig) -> AdminResult<Self> {
        let (url, anon_key) = config.supabase_credentials()?;
        let token = config
            .session
            .as_ref()
            .map(|session| session.access_token.as_str())
            .unwrap_or(anon_key);
        Self::new(url, anon_key, token)
    }

    pub fn new(base_url: &str, anon_key: &str, token: &str) -> AdminResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", header_value(anon_key)?);
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {token}"))?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn table_url(&self, table: Table) -> AdminResult<Url> {
        Url::parse(&format!("{}/rest/v1/{}", self.base_url, table.name()))
            .map_err(|err| AdminError::Config(format!("invalid supabase url: {err}")))
    }

    pub(crate) fn select_url(&self, query: &SelectQuery) -> AdminResult<Url> {
        let mut url = self.table_url(query.table)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("select", "*");
            match &query.filter {
                Filter::All => {}
                Filter::IdEquals(id) => {
                    pairs.append_pair("id", &format!("eq.{id}"));
                }
                Filter::EndDateOnOrBefore(cutoff) => {
                    pairs.append_pair("end_date", &format!("lte.{cutoff}"));
                }
                Filter::Matches(needle) => {
                    pairs.append_pair("or", &match_expression(needle));
                }
            }
            let direction = if query.ordering.ascending { "asc" } else { "desc" };
            pairs.append_pair(
                "order",
                &format!("{}.{direction}", query.ordering.field.column()),
            );
            if let Some(offset) = query.offset {
                pairs.append_pair("offset", &offset.to_string());
            }
            if let Some(limit) = query.limit {
                pairs.append_pair("limit", &limit.to_string());
            }
        }
        Ok(url)
    }

    pub(crate) fn id_filter_url(&self, table: Table, ids: &[String]) -> AdminResult<Url> {
        let mut url = self.table_url(table)?;
        let quoted = ids.iter().map(|id| quote(id)).collect::<Vec<_>>().join(",");
        url.query_pairs_mut()
            .append_pair("id", &format!("in.({quoted})"));
        Ok(url)
    }

    fn send(&self, request: RequestBuilder, action: &str) -> AdminResult<Response> {
        let response = request
            .send()
            .map_err(|err| AdminError::Remote(format!("{action}: {err}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(AdminError::Remote(format!(
            "{action}: {}",
            error_message(status.as_u16(), &body)
        )))
    }
}

/// PostgREST answers a PATCH that matched no row with an empty array.
fn updated_nothing(body: &str) -> bool {
    serde_json::from_str::<Vec<serde_json::Value>>(body).is_ok_and(|rows| rows.is_empty())
}

fn header_value(value: &str) -> AdminResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|err| AdminError::Config(format!("invalid header value: {err}")))
}

/// Double-quotes a filter value so commas, dots and parentheses survive PostgREST parsing.
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

pub(crate) fn match_expression(needle: &str) -> String {
    let pattern = quote(&format!("*{}*", needle.trim()));
    let clauses = SEARCH_COLUMNS
        .iter()
        .map(|column| format!("{column}.ilike.{pattern}"))
        .collect::<Vec<_>>()
        .join(",");
    format!("({clauses})")
}

pub(crate) fn error_message(status: u16, body: &str) -> String {
    match serde_json::from_str::<PostgrestError>(body) {
        Ok(PostgrestError {
            message: Some(message),
            details,
        }) => match details.filter(|d| !d.trim().is_empty()) {
            Some(details) => format!("{message} ({details})"),
            None => message,
        },
        _ if body.trim().is_empty() => format!("HTTP {status}"),
        _ => format!("HTTP {status}: {body}"),
    }
}

impl EventStore for SupabaseStore {
    fn insert(&self, table: Table, rows: &[EventRecord]) -> AdminResult<Vec<EventRecord>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let prefer = match table {
            // Archive copies keep their ids; merging makes a retried copy a no-op.
            Table::Archive => "return=representation,resolution=merge-duplicates",
            Table::Events => "return=representation",
        };
        let request = self
            .client
            .post(self.table_url(table)?)
            .header("Prefer", prefer)
            .json(rows);
        let response = self.send(request, &format!("insert into {}", table.name()))?;
        let stored: Vec<EventRecord> = response.json()?;
        tracing::debug!(table = table.name(), rows = stored.len(), "inserted rows");
        Ok(stored)
    }

    fn update(&self, id: &str, record: &EventRecord) -> AdminResult<()> {
        let mut url = self.table_url(Table::Events)?;
        url.query_pairs_mut().append_pair("id", &format!("eq.{id}"));
        let request = self
            .client
            .patch(url)
            .header("Prefer", "return=representation")
            .json(&record.update_patch()?);
        let body = self.send(request, "update event")?.text()?;
        if updated_nothing(&body) {
            return Err(AdminError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> AdminResult<()> {
        let mut url = self.table_url(Table::Events)?;
        url.query_pairs_mut().append_pair("id", &format!("eq.{id}"));
        self.send(self.client.delete(url), "delete event")?;
        Ok(())
    }

    fn delete_many(&self, table: Table, ids: &[String]) -> AdminResult<()> {
        for chunk in ids.chunks(DELETE_CHUNK) {
            let url = self.id_filter_url(table, chunk)?;
            self.send(
                self.client.delete(url),
                &format!("delete from {}", table.name()),
            )?;
        }
        Ok(())
    }

    fn select(&self, query: &SelectQuery) -> AdminResult<Vec<EventRecord>> {
        let url = self.select_url(query)?;
        let response = self.send(
            self.client.get(url),
            &format!("select from {}", query.table.name()),
        )?;
        Ok(response.json()?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::store::{Ordering, SortField};

    fn store() -> SupabaseStore {
        SupabaseStore::new("https://demo.supabase.co/", "anon", "anon").unwrap()
    }

    fn decoded_query(url: &Url) -> Vec<(String, String)> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn empty_patch_response_means_no_row_matched() {
        assert!(updated_nothing("[]"));
        assert!(!updated_nothing(r#"[{"id":"e-1"}]"#));
        assert!(!updated_nothing(""));
    }

    #[test]
    fn listing_url_carries_order_and_range() {
        let query = SelectQuery::events(Filter::All)
            .ordered(Ordering {
                field: SortField::StartDate,
                ascending: true,
            })
            .range(1000, 100);
        let url = store().select_url(&query).unwrap();
        assert_eq!(url.path(), "/rest/v1/events");
        assert_eq!(
            decoded_query(&url),
            vec![
                ("select".to_string(), "*".to_string()),
                ("order".to_string(), "start_date.asc".to_string()),
                ("offset".to_string(), "1000".to_string()),
                ("limit".to_string(), "100".to_string()),
            ]
        );
    }

    #[test]
    fn archive_cutoff_uses_lte() {
        let cutoff = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        let url = store()
            .select_url(&SelectQuery::events(Filter::EndDateOnOrBefore(cutoff)))
            .unwrap();
        assert!(decoded_query(&url).contains(&("end_date".to_string(), "lte.2024-06-30".to_string())));
    }

    #[test]
    fn search_value_is_quoted_across_columns() {
        assert_eq!(
            match_expression(" a,b "),
            "(title.ilike.\"*a,b*\",description.ilike.\"*a,b*\",address.ilike.\"*a,b*\",website.ilike.\"*a,b*\")"
        );
        assert_eq!(quote("say \"hi\""), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn id_sets_are_quoted() {
        let url = store()
            .id_filter_url(Table::Events, &["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(
            decoded_query(&url),
            vec![("id".to_string(), "in.(\"a\",\"b\")".to_string())]
        );
    }

    #[test]
    fn postgrest_errors_surface_their_message() {
        let body = r#"{"code":"23502","message":"null value in column \"title\"","details":null}"#;
        assert_eq!(error_message(400, body), "null value in column \"title\"");
        assert_eq!(error_message(502, ""), "HTTP 502");
        assert_eq!(error_message(500, "boom"), "HTTP 500: boom");
    }
}
