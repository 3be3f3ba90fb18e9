use anyhow::Result;
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::Value;

use super::base;
use super::{PageScraper, ScrapedEvent};

static JSON_LD_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"script[type="application/ld+json"]"#).expect("json-ld selector")
});
static OG_TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:title"]"#).expect("og:title selector"));
static OG_DESCRIPTION_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[property="og:description"], meta[name="description"]"#)
        .expect("description selector")
});
static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("title, h1").expect("title selector"));
static TIME_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("time[datetime]").expect("time selector"));
static ADDRESS_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"[itemprop="address"], address"#).expect("address selector")
});

const EVENT_TYPES: [&str; 8] = [
    "Event",
    "MusicEvent",
    "TheaterEvent",
    "ExhibitionEvent",
    "Festival",
    "EducationEvent",
    "SportsEvent",
    "ChildrensEvent",
];

/// Fetches a page and reads schema.org event data, falling back to meta tags.
pub struct HtmlScraper {
    timezone: Tz,
}

impl HtmlScraper {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    pub(crate) fn parse_document(&self, html: &str) -> ScrapedEvent {
        let document = Html::parse_document(html);
        let mut scraped = document
            .select(&JSON_LD_SELECTOR)
            .filter_map(|script| serde_json::from_str::<Value>(&script.inner_html()).ok())
            .find_map(|value| find_event(&value).map(|event| self.read_json_ld(event)))
            .unwrap_or_default();

        if scraped.title.is_none() {
            scraped.title = base::first_attr(&document, &OG_TITLE_SELECTOR, "content")
                .or_else(|| base::first_text(&document, &TITLE_SELECTOR));
        }
        if scraped.description.is_none() {
            scraped.description =
                base::first_attr(&document, &OG_DESCRIPTION_SELECTOR, "content");
        }
        if scraped.start_date.is_none() {
            let mut times = document
                .select(&TIME_SELECTOR)
                .filter_map(|el| el.value().attr("datetime"))
                .filter_map(|value| base::parse_timestamp(value, self.timezone));
            if let Some((date, time)) = times.next() {
                scraped.start_date = Some(date);
                scraped.start_time = scraped.start_time.or(time);
            }
            if let Some((date, time)) = times.next() {
                scraped.end_date = scraped.end_date.or(Some(date));
                scraped.end_time = scraped.end_time.or(time);
            }
        }
        if scraped.address.is_none() {
            scraped.address = base::first_text(&document, &ADDRESS_SELECTOR);
        }
        scraped
    }

    fn read_json_ld(&self, event: &Value) -> ScrapedEvent {
        let mut scraped = ScrapedEvent {
            title: text_field(event, "name"),
            description: text_field(event, "description"),
            address: event.get("location").and_then(location_address),
            ..ScrapedEvent::default()
        };
        if let Some((date, time)) = text_field(event, "startDate")
            .and_then(|value| base::parse_timestamp(&value, self.timezone))
        {
            scraped.start_date = Some(date);
            scraped.start_time = time;
        }
        if let Some((date, time)) = text_field(event, "endDate")
            .and_then(|value| base::parse_timestamp(&value, self.timezone))
        {
            scraped.end_date = Some(date);
            scraped.end_time = time;
        }
        scraped
    }
}

impl PageScraper for HtmlScraper {
    fn name(&self) -> &'static str {
        "html"
    }

    fn scrape(&self, url: &str) -> Result<ScrapedEvent> {
        let html = base::fetch_html(url)?;
        let scraped = self.parse_document(&html);
        if scraped.is_empty() {
            anyhow::bail!("no event details found at {url}");
        }
        Ok(scraped)
    }
}

fn is_event(value: &Value) -> bool {
    match value.get("@type") {
        Some(Value::String(kind)) => EVENT_TYPES.contains(&kind.as_str()),
        Some(Value::Array(kinds)) => kinds
            .iter()
            .filter_map(Value::as_str)
            .any(|kind| EVENT_TYPES.contains(&kind)),
        _ => false,
    }
}

/// Finds the first event object in a JSON-LD block, looking through arrays and `@graph`.
fn find_event(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_event),
        Value::Object(map) => {
            if is_event(value) {
                return Some(value);
            }
            map.get("@graph").and_then(find_event)
        }
        _ => None,
    }
}

fn text_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|text| base::non_empty(text.to_string()))
}

fn location_address(location: &Value) -> Option<String> {
    match location {
        Value::String(text) => base::non_empty(text.clone()),
        Value::Array(items) => items.iter().find_map(location_address),
        Value::Object(_) => {
            let address = match location.get("address") {
                Some(Value::String(text)) => base::non_empty(text.clone()),
                Some(postal @ Value::Object(_)) => postal_address(postal),
                _ => None,
            };
            address.or_else(|| text_field(location, "name"))
        }
        _ => None,
    }
}

fn postal_address(postal: &Value) -> Option<String> {
    let street = text_field(postal, "streetAddress");
    let locality = [
        text_field(postal, "postalCode"),
        text_field(postal, "addressLocality"),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ");
    let country = match postal.get("addressCountry") {
        Some(Value::Object(_)) => postal.get("addressCountry").and_then(|c| text_field(c, "name")),
        _ => text_field(postal, "addressCountry"),
    };
    let parts: Vec<String> = [street, base::non_empty(locality), country]
        .into_iter()
        .flatten()
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}
