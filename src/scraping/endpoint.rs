use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;

use super::base;
use super::{PageScraper, ScrapedEvent};

/// Delegates scraping to a hosted service that answers `{ ok, data, error }`.
pub struct EndpointScraper {
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct EndpointResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    data: Option<EndpointData>,
    error: Option<String>,
}

// Everything arrives as text; dates and times are parsed leniently.
#[derive(Debug, Default, Deserialize)]
struct EndpointData {
    title: Option<String>,
    description: Option<String>,
    start_date: Option<String>,
    start_time: Option<String>,
    end_date: Option<String>,
    end_time: Option<String>,
    address: Option<String>,
}

impl EndpointScraper {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim().to_string(),
        }
    }
}

impl PageScraper for EndpointScraper {
    fn name(&self) -> &'static str {
        "endpoint"
    }

    fn scrape(&self, url: &str) -> Result<ScrapedEvent> {
        let response = base::CLIENT
            .post(&self.endpoint)
            .json(&json!({ "url": url }))
            .send()
            .with_context(|| format!("request to {} failed", self.endpoint))?;
        let status = response.status();
        let body = response
            .text()
            .with_context(|| format!("unable to read response from {}", self.endpoint))?;
        parse_response(status.is_success(), &body)
    }
}

fn parse_response(success: bool, body: &str) -> Result<ScrapedEvent> {
    let response: EndpointResponse =
        serde_json::from_str(body).context("scrape endpoint returned invalid JSON")?;
    if !success || !response.ok {
        return Err(anyhow!(response
            .error
            .unwrap_or_else(|| "could not fetch event details".to_string())));
    }
    let data = response.data.unwrap_or_default();
    Ok(ScrapedEvent {
        title: data.title.and_then(base::non_empty),
        description: data.description.and_then(base::non_empty),
        start_date: data.start_date.as_deref().and_then(base::parse_loose_date),
        start_time: data.start_time.as_deref().and_then(base::find_first_time),
        end_date: data.end_date.as_deref().and_then(base::parse_loose_date),
        end_time: data.end_time.as_deref().and_then(base::find_first_time),
        address: data.address.and_then(base::non_empty),
    })
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use super::*;

    #[test]
    fn data_fields_are_parsed() {
        let body = r#"{
            "ok": true,
            "data": {
                "title": "Lesung",
                "start_date": "2024-10-02",
                "start_time": "19:30",
                "end_time": "",
                "address": "Limmatquai 1, Zürich"
            }
        }"#;
        let scraped = parse_response(true, body).unwrap();
        assert_eq!(scraped.title.as_deref(), Some("Lesung"));
        assert_eq!(scraped.start_date, NaiveDate::from_ymd_opt(2024, 10, 2));
        assert_eq!(scraped.start_time, NaiveTime::from_hms_opt(19, 30, 0));
        assert_eq!(scraped.end_time, None);
        assert_eq!(scraped.description, None);
    }

    #[test]
    fn endpoint_error_message_is_surfaced() {
        let err = parse_response(false, r#"{"ok":false,"error":"page not reachable"}"#)
            .unwrap_err();
        assert_eq!(err.to_string(), "page not reachable");

        let err = parse_response(true, r#"{"ok":false}"#).unwrap_err();
        assert_eq!(err.to_string(), "could not fetch event details");
    }
}
