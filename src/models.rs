use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AdminError, AdminResult};

pub const DEFAULT_START_TIME: &str = "00:00";
pub const DEFAULT_END_TIME: &str = "23:59";

macro_rules! vocabulary {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum $name {
            $(
                #[serde(rename = $value)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $value,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            // Accepts either the stored value or the variant name, so `музыка` and `music` both work.
            fn from_str(input: &str) -> Result<Self, Self::Err> {
                let input = input.trim();
                $(
                    if input == $value || input.eq_ignore_ascii_case(stringify!($variant)) {
                        return Ok($name::$variant);
                    }
                )+
                Err(format!("unknown {}: {input}", stringify!($name)))
            }
        }
    };
}

vocabulary!(
    /// Event category tags, stored under the `type` column.
    Category {
        Culture => "культура",
        Exhibition => "выставка",
        Performance => "спектакль",
        Painting => "живопись",
        Science => "наука",
        Sport => "спорт",
        Nature => "природа",
        Health => "здоровье",
        Dance => "танцы",
        Music => "музыка",
        Technology => "технологии",
        Socializing => "общение",
        Education => "обучение",
        Books => "книги",
        Lecture => "лекция",
        Quest => "квест",
        Workshop => "мастеркласс",
        Entertainment => "развлечение",
        Game => "игра",
        Kids => "детское",
        Cinema => "кино",
        EntertainmentCenters => "развлекательные центры",
        Nightlife => "клубы и ночная жизнь",
        Fair => "ярмарка",
        Food => "еда",
        Festival => "фестиваль",
        Cars => "автомобили",
        Religion => "религия",
        Other => "другое",
    }
);

vocabulary!(
    AgeGroup {
        Toddlers => "0-2",
        Preschool => "3-5",
        Early => "6-8",
        Middle => "9-12",
        Teens => "13-17",
        Adults => "18+",
        Any => "any",
    }
);

vocabulary!(
    Format {
        Any => "any",
        Children => "children",
        Adults => "adults",
    }
);

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    None,
    Weekly,
    Monthly,
}

impl FromStr for RepeatMode {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "" | "none" => Ok(RepeatMode::None),
            "weekly" => Ok(RepeatMode::Weekly),
            "monthly" => Ok(RepeatMode::Monthly),
            other => Err(format!("unknown repeat mode: {other}")),
        }
    }
}

impl RepeatMode {
    pub fn is_recurring(&self) -> bool {
        !matches!(self, RepeatMode::None)
    }
}

/// One row of the `events` (or `old_events`) table.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct EventRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub description_en: Option<String>,
    #[serde(default)]
    pub description_de: Option<String>,
    #[serde(default)]
    pub description_fr: Option<String>,
    #[serde(default)]
    pub description_it: Option<String>,
    #[serde(default)]
    pub description_ru: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default, rename = "type")]
    pub categories: Option<Vec<Category>>,
    #[serde(default, rename = "age_group")]
    pub age_groups: Option<Vec<AgeGroup>>,
    #[serde(default)]
    pub format: Option<Format>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default, with = "time_of_day")]
    pub start_time: Option<NaiveTime>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default, with = "time_of_day")]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
}

impl EventRecord {
    pub fn title(&self) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| "Untitled Event".to_string())
    }

    /// Body for an in-place update: every form column plus `user_id`, never the owner email.
    pub fn update_patch(&self) -> AdminResult<serde_json::Value> {
        let mut value = serde_json::to_value(self)?;
        if let Some(object) = value.as_object_mut() {
            object.remove("id");
            object.remove("created_at");
            object.remove("user_email");
        }
        Ok(value)
    }

    /// A fresh row with the same content, ready to insert under `owner_id`.
    pub fn duplicate_for(&self, owner_id: &str) -> EventRecord {
        EventRecord {
            id: None,
            created_at: None,
            user_id: Some(owner_id.to_string()),
            ..self.clone()
        }
    }

    pub fn description_for(&self, lang: Language) -> Option<&String> {
        match lang {
            Language::En => self.description_en.as_ref(),
            Language::De => self.description_de.as_ref(),
            Language::Fr => self.description_fr.as_ref(),
            Language::It => self.description_it.as_ref(),
            Language::Ru => self.description_ru.as_ref(),
        }
    }

    pub fn set_description_for(&mut self, lang: Language, text: Option<String>) {
        let slot = match lang {
            Language::En => &mut self.description_en,
            Language::De => &mut self.description_de,
            Language::Fr => &mut self.description_fr,
            Language::It => &mut self.description_it,
            Language::Ru => &mut self.description_ru,
        };
        *slot = text;
    }
}

/// Languages with a dedicated `description_<lang>` column.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    De,
    Fr,
    It,
    Ru,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::En,
        Language::De,
        Language::Fr,
        Language::It,
        Language::Ru,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::De => "de",
            Language::Fr => "fr",
            Language::It => "it",
            Language::Ru => "ru",
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|lang| lang.code().eq_ignore_ascii_case(input.trim()))
            .ok_or_else(|| format!("unsupported language: {input}"))
    }
}

/// Raw input for one create or edit, before validation.
#[derive(Clone, Debug, PartialEq)]
pub struct EventForm {
    pub title: Option<String>,
    pub description: Option<String>,
    pub description_en: Option<String>,
    pub description_de: Option<String>,
    pub description_fr: Option<String>,
    pub description_it: Option<String>,
    pub description_ru: Option<String>,
    pub address: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub website: Option<String>,
    pub categories: Vec<Category>,
    pub age_groups: Vec<AgeGroup>,
    pub format: Option<Format>,
    pub start_date: Option<String>,
    pub start_time: Option<String>,
    pub end_date: Option<String>,
    pub end_time: Option<String>,
    pub repeat: RepeatMode,
    pub repeat_until: Option<String>,
}

impl Default for EventForm {
    fn default() -> Self {
        Self {
            title: None,
            description: None,
            description_en: None,
            description_de: None,
            description_fr: None,
            description_it: None,
            description_ru: None,
            address: None,
            lat: None,
            lng: None,
            website: None,
            categories: Vec::new(),
            age_groups: Vec::new(),
            format: None,
            start_date: None,
            start_time: Some(DEFAULT_START_TIME.to_string()),
            end_date: None,
            end_time: Some(DEFAULT_END_TIME.to_string()),
            repeat: RepeatMode::None,
            repeat_until: None,
        }
    }
}

/// A validated form: the record to persist plus its transient repeat rule.
#[derive(Clone, Debug, PartialEq)]
pub struct EventDraft {
    pub record: EventRecord,
    pub repeat: RepeatMode,
    pub repeat_until: Option<NaiveDate>,
}

impl EventForm {
    /// Loads an existing row for editing. Repeat rules are not stored on rows, so the
    /// form always comes back as non-recurring.
    pub fn from_record(record: &EventRecord) -> Self {
        Self {
            title: record.title.clone(),
            description: record.description.clone(),
            description_en: record.description_en.clone(),
            description_de: record.description_de.clone(),
            description_fr: record.description_fr.clone(),
            description_it: record.description_it.clone(),
            description_ru: record.description_ru.clone(),
            address: record.address.clone(),
            lat: record.lat,
            lng: record.lng,
            website: record.website.clone(),
            categories: record.categories.clone().unwrap_or_default(),
            age_groups: record.age_groups.clone().unwrap_or_default(),
            format: record.format,
            start_date: record.start_date.map(|d| d.format(DATE_FORMAT).to_string()),
            start_time: record.start_time.map(|t| t.format(TIME_FORMAT).to_string()),
            end_date: record.end_date.map(|d| d.format(DATE_FORMAT).to_string()),
            end_time: record.end_time.map(|t| t.format(TIME_FORMAT).to_string()),
            repeat: RepeatMode::None,
            repeat_until: None,
        }
    }

    pub fn normalize(&self) -> AdminResult<EventDraft> {
        let start_date = match non_empty(&self.start_date) {
            Some(text) => parse_date("start date", &text)?,
            None => {
                return Err(AdminError::Validation(
                    "start date is required".to_string(),
                ))
            }
        };
        let end_date = match non_empty(&self.end_date) {
            Some(text) => parse_date("end date", &text)?,
            None => start_date,
        };

        let repeat_until = if self.repeat.is_recurring() {
            non_empty(&self.repeat_until)
                .map(|text| parse_date("repeat-until date", &text))
                .transpose()?
        } else {
            None
        };

        let start_time = non_empty(&self.start_time)
            .map(|text| parse_time("start time", &text))
            .transpose()?;
        let end_time = non_empty(&self.end_time)
            .map(|text| parse_time("end time", &text))
            .transpose()?;

        for (field, value) in [("latitude", self.lat), ("longitude", self.lng)] {
            if value.is_some_and(|v| !v.is_finite()) {
                return Err(AdminError::Validation(format!("{field} must be a number")));
            }
        }

        let record = EventRecord {
            id: None,
            created_at: None,
            title: non_empty(&self.title),
            description: non_empty(&self.description),
            description_en: non_empty(&self.description_en),
            description_de: non_empty(&self.description_de),
            description_fr: non_empty(&self.description_fr),
            description_it: non_empty(&self.description_it),
            description_ru: non_empty(&self.description_ru),
            address: non_empty(&self.address),
            lat: self.lat,
            lng: self.lng,
            website: non_empty(&self.website),
            categories: normalize_selection(&self.categories, Category::ALL),
            age_groups: normalize_age_groups(&self.age_groups),
            format: self.format,
            start_date: Some(start_date),
            start_time,
            end_date: Some(end_date),
            end_time,
            user_id: None,
            user_email: None,
        };

        Ok(EventDraft {
            record,
            repeat: self.repeat,
            repeat_until,
        })
    }
}

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

pub fn parse_date(field: &str, text: &str) -> AdminResult<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)
        .map_err(|_| AdminError::Validation(format!("invalid {field}: {text}")))
}

pub fn parse_time(field: &str, text: &str) -> AdminResult<NaiveTime> {
    let text = text.trim();
    NaiveTime::parse_from_str(text, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(text, TIME_FORMAT))
        .map_err(|_| AdminError::Validation(format!("invalid {field}: {text}")))
}

/// Distinct values in vocabulary order; an empty selection is stored as null.
fn normalize_selection<T: Copy + PartialEq>(selected: &[T], vocabulary: &[T]) -> Option<Vec<T>> {
    let values: Vec<T> = vocabulary
        .iter()
        .copied()
        .filter(|value| selected.contains(value))
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

fn normalize_age_groups(selected: &[AgeGroup]) -> Option<Vec<AgeGroup>> {
    if selected.contains(&AgeGroup::Any) {
        return Some(AgeGroup::ALL.to_vec());
    }
    normalize_selection(selected, AgeGroup::ALL)
}

/// Whether a form field counts as filled in.
pub trait Filled {
    fn is_filled(&self) -> bool;
}

impl Filled for str {
    fn is_filled(&self) -> bool {
        !self.trim().is_empty()
    }
}

impl Filled for String {
    fn is_filled(&self) -> bool {
        self.as_str().is_filled()
    }
}

impl<T> Filled for Vec<T> {
    fn is_filled(&self) -> bool {
        !self.is_empty()
    }
}

impl<T: Filled> Filled for Option<T> {
    fn is_filled(&self) -> bool {
        self.as_ref().is_some_and(Filled::is_filled)
    }
}

macro_rules! always_filled {
    ($($ty:ty),+) => {
        $(impl Filled for $ty {
            fn is_filled(&self) -> bool {
                true
            }
        })+
    };
}

always_filled!(NaiveDate, NaiveTime, Format);

// A zero coordinate counts as unset.
impl Filled for f64 {
    fn is_filled(&self) -> bool {
        *self != 0.0 && !self.is_nan()
    }
}

pub fn marker<T: Filled + ?Sized>(value: &T) -> &'static str {
    if value.is_filled() {
        "✅"
    } else {
        "❌"
    }
}

/// `2024-03-09` as `09.03.2024`; empty when there is no date.
pub fn display_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%d.%m.%Y").to_string())
        .unwrap_or_default()
}

fn join<T: fmt::Display>(values: &Option<Vec<T>>) -> String {
    values
        .as_ref()
        .map(|items| {
            items
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

/// Field-by-field view of a record with a filled/empty marker per field.
pub fn checklist(record: &EventRecord) -> Vec<(&'static str, &'static str, String)> {
    let time = |t: Option<NaiveTime>| t.map(|t| t.format(TIME_FORMAT).to_string()).unwrap_or_default();
    let coord = |c: Option<f64>| c.map(|c| c.to_string()).unwrap_or_default();
    vec![
        ("title", marker(&record.title), text(&record.title)),
        ("description", marker(&record.description), text(&record.description)),
        ("description_en", marker(&record.description_en), text(&record.description_en)),
        ("description_de", marker(&record.description_de), text(&record.description_de)),
        ("description_fr", marker(&record.description_fr), text(&record.description_fr)),
        ("description_it", marker(&record.description_it), text(&record.description_it)),
        ("description_ru", marker(&record.description_ru), text(&record.description_ru)),
        ("address", marker(&record.address), text(&record.address)),
        ("lat", marker(&record.lat), coord(record.lat)),
        ("lng", marker(&record.lng), coord(record.lng)),
        ("website", marker(&record.website), text(&record.website)),
        ("type", marker(&record.categories), join(&record.categories)),
        ("age_group", marker(&record.age_groups), join(&record.age_groups)),
        (
            "format",
            marker(&record.format),
            record.format.map(|f| f.to_string()).unwrap_or_default(),
        ),
        ("start_date", marker(&record.start_date), display_date(record.start_date)),
        ("start_time", marker(&record.start_time), time(record.start_time)),
        ("end_date", marker(&record.end_date), display_date(record.end_date)),
        ("end_time", marker(&record.end_time), time(record.end_time)),
    ]
}

/// `HH:MM` on the way out; `HH:MM` or `HH:MM:SS` on the way in.
mod time_of_day {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(time) => serializer.serialize_str(&time.format(super::TIME_FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => super::parse_time("time", text)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> EventForm {
        EventForm {
            title: Some("  Jazz night ".to_string()),
            start_date: Some("2024-05-03".to_string()),
            ..EventForm::default()
        }
    }

    #[test]
    fn zero_coordinates_are_marked_empty() {
        assert_eq!(marker(&Some(0.0_f64)), "❌");
        assert_eq!(marker(&Some(f64::NAN)), "❌");
        assert_eq!(marker(&None::<f64>), "❌");
        assert_eq!(marker(&Some(-33.87_f64)), "✅");
    }

    #[test]
    fn blank_text_becomes_null() {
        let mut input = form();
        input.description = Some("   ".to_string());
        input.website = Some(String::new());
        let draft = input.normalize().unwrap();
        assert_eq!(draft.record.title.as_deref(), Some("Jazz night"));
        assert_eq!(draft.record.description, None);
        assert_eq!(draft.record.website, None);
    }

    #[test]
    fn empty_selections_become_null() {
        let draft = form().normalize().unwrap();
        assert_eq!(draft.record.categories, None);
        assert_eq!(draft.record.age_groups, None);
    }

    #[test]
    fn selections_are_deduplicated_in_vocabulary_order() {
        let mut input = form();
        input.categories = vec![Category::Music, Category::Culture, Category::Music];
        let draft = input.normalize().unwrap();
        assert_eq!(
            draft.record.categories,
            Some(vec![Category::Culture, Category::Music])
        );
    }

    #[test]
    fn any_age_group_selects_every_group() {
        let mut input = form();
        input.age_groups = vec![AgeGroup::Teens, AgeGroup::Any];
        let draft = input.normalize().unwrap();
        assert_eq!(draft.record.age_groups, Some(AgeGroup::ALL.to_vec()));
    }

    #[test]
    fn repeat_until_is_dropped_without_repeat() {
        let mut input = form();
        input.repeat_until = Some("2024-06-01".to_string());
        let draft = input.normalize().unwrap();
        assert_eq!(draft.repeat_until, None);

        input.repeat = RepeatMode::Weekly;
        let draft = input.normalize().unwrap();
        assert_eq!(draft.repeat_until, NaiveDate::from_ymd_opt(2024, 6, 1));
    }

    #[test]
    fn missing_or_bad_start_date_is_rejected() {
        let mut input = form();
        input.start_date = Some(" ".to_string());
        assert!(matches!(input.normalize(), Err(AdminError::Validation(_))));
        input.start_date = Some("03.05.2024".to_string());
        assert!(matches!(input.normalize(), Err(AdminError::Validation(_))));
    }

    #[test]
    fn blank_end_date_defaults_to_start_date() {
        let draft = form().normalize().unwrap();
        assert_eq!(draft.record.end_date, draft.record.start_date);
    }

    #[test]
    fn default_times_are_applied_to_new_forms() {
        let draft = form().normalize().unwrap();
        assert_eq!(draft.record.start_time, NaiveTime::from_hms_opt(0, 0, 0));
        assert_eq!(draft.record.end_time, NaiveTime::from_hms_opt(23, 59, 0));
    }

    #[test]
    fn categories_serialize_under_type_column() {
        let record = EventRecord {
            categories: Some(vec![Category::Music]),
            start_time: NaiveTime::from_hms_opt(19, 30, 0),
            ..EventRecord::default()
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], serde_json::json!(["музыка"]));
        assert_eq!(value["start_time"], "19:30");
        assert!(value.get("id").is_none());
    }

    #[test]
    fn store_times_with_seconds_are_accepted() {
        let record: EventRecord = serde_json::from_value(serde_json::json!({
            "id": "a1",
            "start_time": "10:15:00",
            "end_time": null,
            "age_group": ["18+"],
        }))
        .unwrap();
        assert_eq!(record.start_time, NaiveTime::from_hms_opt(10, 15, 0));
        assert_eq!(record.end_time, None);
        assert_eq!(record.age_groups, Some(vec![AgeGroup::Adults]));
    }

    #[test]
    fn update_patch_keeps_nulls_but_not_owner_email() {
        let record = EventRecord {
            id: Some("a1".to_string()),
            user_id: Some("u1".to_string()),
            user_email: Some("owner@example.com".to_string()),
            ..EventRecord::default()
        };
        let patch = record.update_patch().unwrap();
        assert!(patch.get("id").is_none());
        assert!(patch.get("user_email").is_none());
        assert_eq!(patch["user_id"], "u1");
        assert!(patch["title"].is_null());
    }

    #[test]
    fn markers_follow_field_emptiness() {
        assert_eq!(marker(&Some("x".to_string())), "✅");
        assert_eq!(marker(&Some("  ".to_string())), "❌");
        assert_eq!(marker(&None::<String>), "❌");
        assert_eq!(marker(&Some(Vec::<Category>::new())), "❌");
        assert_eq!(marker(&Some(vec![Category::Food])), "✅");
        assert_eq!(marker(&Some(8.54_f64)), "✅");
    }

    #[test]
    fn dates_display_day_first() {
        assert_eq!(display_date(NaiveDate::from_ymd_opt(2024, 3, 9)), "09.03.2024");
        assert_eq!(display_date(None), "");
    }

    #[test]
    fn vocabularies_parse_stored_and_english_names() {
        assert_eq!("музыка".parse::<Category>(), Ok(Category::Music));
        assert_eq!("nightlife".parse::<Category>(), Ok(Category::Nightlife));
        assert_eq!("18+".parse::<AgeGroup>(), Ok(AgeGroup::Adults));
        assert!("opera".parse::<Format>().is_err());
    }

    #[test]
    fn edit_form_round_trips_a_record() {
        let draft = form().normalize().unwrap();
        let reloaded = EventForm::from_record(&draft.record).normalize().unwrap();
        assert_eq!(reloaded.record, draft.record);
        assert_eq!(reloaded.repeat, RepeatMode::None);
    }
}
