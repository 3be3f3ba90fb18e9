use reqwest::{Client, Url};
use serde::Deserialize;
use thiserror::Error;

use crate::models::EventForm;

const FIND_PLACE_URL: &str = "https://maps.googleapis.com/maps/api/place/findplacefromtext/json";

#[derive(Debug, Error)]
pub enum PlacesError {
    #[error("google api key is not configured")]
    MissingKey,
    #[error("http error: {0}")]
    Http(String),
    #[error("places api error: {0}")]
    Api(String),
    #[error("no place found for {0:?}")]
    NotFound(String),
}

impl From<PlacesError> for crate::error::AdminError {
    fn from(err: PlacesError) -> Self {
        match err {
            PlacesError::MissingKey => crate::error::AdminError::Config(err.to_string()),
            other => crate::error::AdminError::Remote(other.to_string()),
        }
    }
}

/// The parts of a place lookup the event form keeps.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceSelection {
    pub formatted_address: String,
    pub lat: f64,
    pub lng: f64,
}

impl PlaceSelection {
    pub fn apply(&self, form: &mut EventForm) {
        form.address = Some(self.formatted_address.clone());
        form.lat = Some(self.lat);
        form.lng = Some(self.lng);
    }
}

pub fn clear_place(form: &mut EventForm) {
    form.address = None;
    form.lat = None;
    form.lng = None;
}

#[derive(Debug, Deserialize)]
struct FindPlaceResponse {
    status: String,
    #[serde(default)]
    candidates: Vec<Candidate>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    formatted_address: Option<String>,
    geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

pub struct GooglePlaces {
    api_key: String,
    language: Option<String>,
    client: Client,
}

impl GooglePlaces {
    pub fn new(api_key: Option<&str>) -> Result<Self, PlacesError> {
        let api_key = api_key
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(PlacesError::MissingKey)?
            .to_string();
        Ok(Self {
            api_key,
            language: None,
            client: Client::new(),
        })
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    fn find_place_url(&self, input: &str) -> Result<Url, PlacesError> {
        let mut url = Url::parse(FIND_PLACE_URL).map_err(|err| PlacesError::Api(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("input", input)
            .append_pair("inputtype", "textquery")
            .append_pair("fields", "formatted_address,geometry")
            .append_pair("key", &self.api_key);
        if let Some(language) = &self.language {
            url.query_pairs_mut().append_pair("language", language);
        }
        Ok(url)
    }

    pub async fn find_place(&self, input: &str) -> Result<PlaceSelection, PlacesError> {
        let input = input.trim();
        let url = self.find_place_url(input)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| PlacesError::Http(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| PlacesError::Http(err.to_string()))?;
        if !status.is_success() {
            return Err(PlacesError::Api(format!("HTTP {status}: {body}")));
        }
        parse_find_place(input, &body)
    }
}

fn parse_find_place(input: &str, body: &str) -> Result<PlaceSelection, PlacesError> {
    let response: FindPlaceResponse =
        serde_json::from_str(body).map_err(|err| PlacesError::Api(err.to_string()))?;
    match response.status.as_str() {
        "OK" => {}
        "ZERO_RESULTS" => return Err(PlacesError::NotFound(input.to_string())),
        other => {
            let detail = response.error_message.unwrap_or_default();
            return Err(PlacesError::Api(format!("{other} {detail}").trim().to_string()));
        }
    }
    response
        .candidates
        .into_iter()
        .find_map(|candidate| {
            let location = candidate.geometry?.location;
            Some(PlaceSelection {
                formatted_address: candidate.formatted_address.unwrap_or_default(),
                lat: location.lat,
                lng: location.lng,
            })
        })
        .ok_or_else(|| PlacesError::NotFound(input.to_string()))
}
