use std::{fs, path::Path, path::PathBuf, sync::Mutex};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{AdminError, AdminResult};
use crate::recurrence::DEFAULT_MAX_OCCURRENCES;

const DEFAULT_TIMEZONE: &str = "Europe/Zurich";
const DEFAULT_DEBOUNCE_MS: u64 = 400;
const CONFIG_FILE: &str = "config.json";

/// `<platform data dir>/event-admin`. Holds the config file and the local database.
pub(crate) fn data_root() -> PathBuf {
    dirs::data_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
        .join("event-admin")
}

fn create_parent(path: &Path) -> AdminResult<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent)
            .map_err(|err| AdminError::Config(format!("cannot create {}: {err}", parent.display()))),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Supabase,
    Local,
}

/// Signed-in identity as returned by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<String>,
    pub user: CurrentUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: Option<Backend>,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub google_api_key: Option<String>,
    /// Language for formatted addresses, e.g. `de`.
    pub places_language: Option<String>,
    pub scrape_endpoint: Option<String>,
    pub redirect_url: Option<String>,
    pub timezone: String,
    pub max_occurrences: usize,
    pub search_debounce_ms: u64,
    pub log_level: Option<String>,
    pub session: Option<Session>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: None,
            supabase_url: None,
            supabase_anon_key: None,
            google_api_key: None,
            places_language: None,
            scrape_endpoint: None,
            redirect_url: None,
            timezone: DEFAULT_TIMEZONE.to_string(),
            max_occurrences: DEFAULT_MAX_OCCURRENCES,
            search_debounce_ms: DEFAULT_DEBOUNCE_MS,
            log_level: None,
            session: None,
        }
    }
}

impl AppConfig {
    /// Applies `EVENT_ADMIN_*` environment overrides on top of the file values.
    pub fn with_env_overrides(mut self) -> Self {
        let var = |name: &str| {
            std::env::var(format!("EVENT_ADMIN_{name}"))
                .ok()
                .filter(|value| !value.trim().is_empty())
        };
        if let Some(value) = var("SUPABASE_URL") {
            self.supabase_url = Some(value);
        }
        if let Some(value) = var("SUPABASE_ANON_KEY") {
            self.supabase_anon_key = Some(value);
        }
        if let Some(value) = var("GOOGLE_API_KEY") {
            self.google_api_key = Some(value);
        }
        if let Some(value) = var("PLACES_LANGUAGE") {
            self.places_language = Some(value);
        }
        if let Some(value) = var("SCRAPE_ENDPOINT") {
            self.scrape_endpoint = Some(value);
        }
        if let Some(value) = var("BACKEND") {
            match value.to_lowercase().as_str() {
                "supabase" => self.backend = Some(Backend::Supabase),
                "local" => self.backend = Some(Backend::Local),
                other => tracing::warn!(backend = other, "ignoring unknown backend override"),
            }
        }
        if let Some(value) = var("TIMEZONE") {
            self.timezone = value;
        }
        if let Some(value) = var("MAX_OCCURRENCES").and_then(|s| s.parse().ok()) {
            self.max_occurrences = value;
        }
        if let Some(value) = var("SEARCH_DEBOUNCE_MS").and_then(|s| s.parse().ok()) {
            self.search_debounce_ms = value;
        }
        if let Some(value) = var("LOG_LEVEL") {
            self.log_level = Some(value);
        }
        self
    }

    pub fn backend(&self) -> Backend {
        match self.backend {
            Some(backend) => backend,
            None if self.supabase_url.is_some() && self.supabase_anon_key.is_some() => {
                Backend::Supabase
            }
            None => Backend::Local,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone.parse().unwrap_or_else(|_| {
            tracing::warn!(timezone = %self.timezone, "unknown timezone, using {DEFAULT_TIMEZONE}");
            chrono_tz::Europe::Zurich
        })
    }

    pub fn supabase_credentials(&self) -> AdminResult<(&str, &str)> {
        let url = self
            .supabase_url
            .as_deref()
            .ok_or_else(|| AdminError::Config("supabase_url is not set".to_string()))?;
        let key = self
            .supabase_anon_key
            .as_deref()
            .ok_or_else(|| AdminError::Config("supabase_anon_key is not set".to_string()))?;
        Ok((url.trim_end_matches('/'), key))
    }

    /// The user new rows are attributed to. The local backend falls back to a fixed
    /// `local` identity so it works without signing in.
    pub fn current_user(&self) -> Option<CurrentUser> {
        match (&self.session, self.backend()) {
            (Some(session), _) => Some(session.user.clone()),
            (None, Backend::Local) => Some(CurrentUser {
                id: "local".to_string(),
                email: None,
            }),
            (None, Backend::Supabase) => None,
        }
    }
}

pub struct ConfigStore {
    path: PathBuf,
    data: Mutex<AppConfig>,
}

impl ConfigStore {
    pub fn load() -> Self {
        Self::load_from(data_root().join(CONFIG_FILE))
    }

    pub fn load_from(path: PathBuf) -> Self {
        let data = read_config(&path).unwrap_or_else(|err| {
            tracing::warn!(path = ?path, %err, "unreadable config, using defaults");
            AppConfig::default()
        });
        Self {
            path,
            data: Mutex::new(data),
        }
    }

    /// File values with environment overrides applied.
    pub fn read(&self) -> AppConfig {
        self.stored().with_env_overrides()
    }

    fn stored(&self) -> AppConfig {
        self.data
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn update<F>(&self, transform: F) -> AdminResult<AppConfig>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut guard = self
            .data
            .lock()
            .map_err(|_| AdminError::Config("config mutex poisoned".to_string()))?;
        transform(&mut guard);
        write_config(&self.path, &guard)?;
        Ok(guard.clone().with_env_overrides())
    }
}

fn read_config(path: &Path) -> AdminResult<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|err| AdminError::Config(err.to_string()))?;
    Ok(serde_json::from_str(&contents)?)
}

fn write_config(path: &Path, config: &AppConfig) -> AdminResult<()> {
    create_parent(path)?;
    let contents = serde_json::to_string_pretty(config)?;
    fs::write(path, contents).map_err(|err| AdminError::Config(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"supabase_url": "https://x.supabase.co"}"#).unwrap();
        assert_eq!(config.timezone, DEFAULT_TIMEZONE);
        assert_eq!(config.max_occurrences, DEFAULT_MAX_OCCURRENCES);
        assert_eq!(config.search_debounce_ms, DEFAULT_DEBOUNCE_MS);
        assert_eq!(config.backend(), Backend::Local);
    }

    #[test]
    fn supabase_is_chosen_when_credentials_exist() {
        let config = AppConfig {
            supabase_url: Some("https://x.supabase.co/".to_string()),
            supabase_anon_key: Some("anon".to_string()),
            ..AppConfig::default()
        };
        assert_eq!(config.backend(), Backend::Supabase);
        assert_eq!(
            config.supabase_credentials().unwrap(),
            ("https://x.supabase.co", "anon")
        );
        assert_eq!(config.current_user(), None);
    }

    #[test]
    fn local_backend_has_a_default_user() {
        let config = AppConfig {
            backend: Some(Backend::Local),
            ..AppConfig::default()
        };
        assert_eq!(config.current_user().map(|u| u.id), Some("local".to_string()));
    }

    #[test]
    fn updates_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let store = ConfigStore::load_from(path.clone());
        store
            .update(|config| config.google_api_key = Some("key".to_string()))
            .unwrap();

        let reloaded = ConfigStore::load_from(path);
        assert_eq!(reloaded.stored().google_api_key.as_deref(), Some("key"));
    }

    #[test]
    fn unknown_timezone_falls_back_to_zurich() {
        let config = AppConfig {
            timezone: "Mars/Olympus".to_string(),
            ..AppConfig::default()
        };
        assert_eq!(config.timezone(), chrono_tz::Europe::Zurich);
    }
}
