use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use scraper::{ElementRef, Html, Selector};

static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:[:.](\d{2}))?\s*(am|pm|uhr|h)?\b").expect("valid time regex")
});

pub(crate) static CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(20))
        .user_agent("EventAdmin/0.1 (+https://github.com/event-admin/event-admin)")
        .build()
        .unwrap_or_else(|err| {
            tracing::warn!(%err, "falling back to default http client");
            Client::new()
        })
});

pub fn clean_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn non_empty(text: String) -> Option<String> {
    let cleaned = clean_text(&text);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

pub fn inner_text(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

pub fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .map(inner_text)
        .find(|text| !text.is_empty())
}

pub fn first_attr(document: &Html, selector: &Selector, attr: &str) -> Option<String> {
    document
        .select(selector)
        .filter_map(|el| el.value().attr(attr))
        .map(clean_text)
        .find(|text| !text.is_empty())
}

pub fn fetch_html(url: &str) -> Result<String> {
    let response = CLIENT
        .get(url)
        .send()
        .with_context(|| format!("request failed for {url}"))?;
    let response = response
        .error_for_status()
        .with_context(|| format!("non-success status for {url}"))?;
    response
        .text()
        .with_context(|| format!("unable to read response body for {url}"))
}

/// First clock time in free text: `19:30`, `7.30 pm`, `20 Uhr`, `8pm`.
pub fn find_first_time(text: &str) -> Option<NaiveTime> {
    TIME_RE.captures_iter(text).find_map(|caps| {
        let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
        let minute: u32 = caps
            .get(2)
            .map(|m| m.as_str().parse().unwrap_or(0))
            .unwrap_or(0);
        let suffix = caps.get(3).map(|m| m.as_str().to_lowercase());
        // A bare number is not a time.
        if caps.get(2).is_none() && suffix.is_none() {
            return None;
        }
        let hour = match suffix.as_deref() {
            Some("pm") if hour < 12 => hour + 12,
            Some("am") if hour == 12 => 0,
            _ => hour,
        };
        NaiveTime::from_hms_opt(hour, minute, 0)
    })
}

/// Calendar dates as they tend to appear on event pages.
pub fn parse_loose_date(input: &str) -> Option<NaiveDate> {
    let cleaned = clean_text(input);
    let formats = [
        "%Y-%m-%d",
        "%d.%m.%Y",
        "%d/%m/%Y",
        "%B %d, %Y",
        "%b %d, %Y",
        "%d %B %Y",
        "%d %b %Y",
        "%A, %B %d, %Y",
    ];
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
}

/// Parses schema.org style timestamps. Values with an offset are converted into `tz`;
/// a date without a time yields no time.
pub fn parse_timestamp(input: &str, tz: Tz) -> Option<(NaiveDate, Option<NaiveTime>)> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        let local = dt.with_timezone(&tz);
        return Some((local.date_naive(), Some(local.time())));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%dT%H:%M%z"] {
        if let Ok(dt) = DateTime::parse_from_str(input, fmt) {
            let local = dt.with_timezone(&tz);
            return Some((local.date_naive(), Some(local.time())));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, fmt) {
            return Some((naive.date(), Some(naive.time())));
        }
    }
    parse_loose_date(input).map(|date| (date, None))
}
