use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

use crate::models::{EventRecord, Language};

const DEFAULT_ENDPOINT: &str = "https://translation.googleapis.com/language/translate/v2";

#[derive(Debug, Error)]
enum TranslateError {
    #[error("api key missing")]
    MissingKey,
    #[error("http error: {0}")]
    Http(String),
    #[error("translate api error: {0}")]
    Api(String),
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    data: TranslateData,
}

#[derive(Debug, Deserialize)]
struct TranslateData {
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Translation {
    translated_text: String,
}

pub struct Translator {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
}

impl Translator {
    pub fn new(api_key: Option<&str>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string),
            client: Client::new(),
        }
    }

    /// Translates `text`; any failure is logged and the original text is returned.
    pub async fn translate(&self, text: &str, target: Language, source: Language) -> String {
        if text.trim().is_empty() {
            return String::new();
        }
        match self.request(text, target, source).await {
            Ok(translated) => translated,
            Err(err) => {
                tracing::error!(error = %err, target = target.code(), "translation failed");
                text.to_string()
            }
        }
    }

    async fn request(
        &self,
        text: &str,
        target: Language,
        source: Language,
    ) -> Result<String, TranslateError> {
        let key = self.api_key.as_deref().ok_or(TranslateError::MissingKey)?;
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[
                ("q", text),
                ("target", target.code()),
                ("source", source.code()),
                ("format", "text"),
                ("key", key),
            ])
            .send()
            .await
            .map_err(|err| TranslateError::Http(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| TranslateError::Http(err.to_string()))?;
        if !status.is_success() {
            return Err(TranslateError::Api(format!("HTTP {status}: {body}")));
        }
        parse_translation(&body)
    }

    /// Fills every empty `description_<lang>` other than `source` from the source text.
    /// Returns the languages that were filled.
    pub async fn fill_translations(
        &self,
        record: &mut EventRecord,
        source: Language,
    ) -> Vec<Language> {
        let text = match source_text(record, source) {
            Some(text) => text,
            None => return Vec::new(),
        };

        let mut filled = Vec::new();
        for target in missing_targets(record, source) {
            let translated = self.translate(&text, target, source).await;
            if translated != text {
                record.set_description_for(target, Some(translated));
                filled.push(target);
            }
        }
        filled
    }
}

/// The source-language column, or the untagged description when that is blank.
fn source_text(record: &EventRecord, source: Language) -> Option<String> {
    let filled_in = |text: &&String| !text.trim().is_empty();
    record
        .description_for(source)
        .filter(filled_in)
        .or(record.description.as_ref().filter(filled_in))
        .cloned()
}

fn missing_targets(record: &EventRecord, source: Language) -> Vec<Language> {
    Language::ALL
        .into_iter()
        .filter(|lang| *lang != source)
        .filter(|lang| {
            record
                .description_for(*lang)
                .map_or(true, |text| text.trim().is_empty())
        })
        .collect()
}

fn parse_translation(body: &str) -> Result<String, TranslateError> {
    let response: TranslateResponse =
        serde_json::from_str(body).map_err(|err| TranslateError::Api(err.to_string()))?;
    response
        .data
        .translations
        .into_iter()
        .next()
        .map(|t| t.translated_text)
        .ok_or_else(|| TranslateError::Api("response has no translations".to_string()))
}
