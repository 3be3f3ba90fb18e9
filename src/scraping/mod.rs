pub mod base;
pub mod endpoint;
pub mod html;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::{AdminError, AdminResult};
use crate::models::EventForm;

/// Best-effort event details pulled from an event's web page.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ScrapedEvent {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_date: Option<NaiveDate>,
    pub end_time: Option<NaiveTime>,
    pub address: Option<String>,
}

impl ScrapedEvent {
    pub fn is_empty(&self) -> bool {
        self == &ScrapedEvent::default()
    }

    /// Copies only the fields that were found into `form`; returns how many were filled.
    pub fn apply_to(&self, form: &mut EventForm) -> usize {
        let mut filled = 0;
        let mut set = |slot: &mut Option<String>, value: Option<String>| {
            if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                *slot = Some(value);
                filled += 1;
            }
        };
        set(&mut form.title, self.title.clone());
        set(&mut form.description, self.description.clone());
        set(
            &mut form.start_date,
            self.start_date.map(|d| d.format("%Y-%m-%d").to_string()),
        );
        set(
            &mut form.start_time,
            self.start_time.map(|t| t.format("%H:%M").to_string()),
        );
        set(
            &mut form.end_date,
            self.end_date.map(|d| d.format("%Y-%m-%d").to_string()),
        );
        set(
            &mut form.end_time,
            self.end_time.map(|t| t.format("%H:%M").to_string()),
        );
        set(&mut form.address, self.address.clone());
        filled
    }
}

pub trait PageScraper: Send + Sync {
    fn name(&self) -> &'static str;
    fn scrape(&self, url: &str) -> anyhow::Result<ScrapedEvent>;
}

/// The configured scraping endpoint when there is one, otherwise the built-in HTML scraper.
pub fn scraper_for(config: &AppConfig) -> Box<dyn PageScraper> {
    match config
        .scrape_endpoint
        .as_deref()
        .filter(|url| !url.trim().is_empty())
    {
        Some(url) => Box::new(endpoint::EndpointScraper::new(url)),
        None => Box::new(html::HtmlScraper::new(config.timezone())),
    }
}

/// Scrapes the form's website and fills whatever was found.
pub fn auto_fill(scraper: &dyn PageScraper, form: &mut EventForm) -> AdminResult<usize> {
    let url = form
        .website
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| AdminError::Validation("set the website first".to_string()))?
        .to_string();

    let scraped = scraper
        .scrape(&url)
        .map_err(|err| AdminError::Remote(format!("auto-fill failed: {err:#}")))?;
    let filled = scraped.apply_to(form);
    tracing::info!(scraper = scraper.name(), %url, filled, "auto-filled form from website");
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(ScrapedEvent);

    impl PageScraper for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn scrape(&self, _url: &str) -> anyhow::Result<ScrapedEvent> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn only_found_fields_overwrite_the_form() {
        let mut form = EventForm {
            title: Some("Typed by hand".to_string()),
            address: Some("Somewhere".to_string()),
            website: Some("https://example.com/event".to_string()),
            ..EventForm::default()
        };
        let scraped = ScrapedEvent {
            description: Some("From the page".to_string()),
            start_date: NaiveDate::from_ymd_opt(2024, 9, 14),
            start_time: NaiveTime::from_hms_opt(18, 0, 0),
            ..ScrapedEvent::default()
        };

        let filled = auto_fill(&Fixed(scraped), &mut form).unwrap();
        assert_eq!(filled, 3);
        assert_eq!(form.title.as_deref(), Some("Typed by hand"));
        assert_eq!(form.address.as_deref(), Some("Somewhere"));
        assert_eq!(form.description.as_deref(), Some("From the page"));
        assert_eq!(form.start_date.as_deref(), Some("2024-09-14"));
        assert_eq!(form.start_time.as_deref(), Some("18:00"));
    }

    #[test]
    fn blank_website_is_rejected_before_scraping() {
        let mut form = EventForm {
            website: Some("  ".to_string()),
            ..EventForm::default()
        };
        assert!(matches!(
            auto_fill(&Fixed(ScrapedEvent::default()), &mut form),
            Err(AdminError::Validation(_))
        ));
    }
}
