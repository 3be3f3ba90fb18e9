pub mod admin;
pub mod archive;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod pagination;
pub mod places;
pub mod recurrence;
pub mod scraping;
pub mod search;
pub mod store;
pub mod supabase;
pub mod translate;

use std::time::Duration;

use chrono::NaiveDate;
use reqwest::Url;
use tokio::sync::mpsc;

use admin::{EventAdmin, SaveOutcome};
use archive::ArchiveOutcome;
use auth::{AuthError, SupabaseAuth};
use config::{AppConfig, Backend, ConfigStore, CurrentUser, Session};
use db::LocalStore;
use error::{AdminError, AdminResult};
use models::{EventForm, EventRecord, Language};
use pagination::Page;
use places::{GooglePlaces, PlaceSelection};
use store::{EventStore, Ordering};
use supabase::SupabaseStore;
use translate::Translator;

/// Opens the backend the configuration points at.
pub fn open_store(config: &AppConfig) -> AdminResult<Box<dyn EventStore>> {
    match config.backend() {
        Backend::Local => Ok(Box::new(LocalStore::open_default()?)),
        Backend::Supabase => Ok(Box::new(SupabaseStore::from_config(config)?)),
    }
}

// Both stores block, so every store call runs on the blocking pool.
async fn with_store<T, F>(config: AppConfig, action: F) -> AdminResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn EventStore, &AppConfig) -> AdminResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let store = open_store(&config)?;
        action(store.as_ref(), &config)
    })
    .await?
}

pub async fn list_events(
    config_store: &ConfigStore,
    page: usize,
    ordering: Ordering,
) -> AdminResult<Page> {
    with_store(config_store.read(), move |store, _| {
        pagination::fetch_page(store, page, ordering)
    })
    .await
}

pub async fn search_events(
    config_store: &ConfigStore,
    query: String,
    ordering: Ordering,
) -> AdminResult<Page> {
    with_store(config_store.read(), move |store, _| {
        search::search(store, &query, ordering)
    })
    .await
}

pub async fn get_event(config_store: &ConfigStore, id: String) -> AdminResult<EventRecord> {
    with_store(config_store.read(), move |store, config| {
        EventAdmin::new(store, config.current_user(), config.max_occurrences).get(&id)
    })
    .await
}

pub async fn save_event(
    config_store: &ConfigStore,
    form: EventForm,
    editing_id: Option<String>,
) -> AdminResult<SaveOutcome> {
    with_store(config_store.read(), move |store, config| {
        EventAdmin::new(store, config.current_user(), config.max_occurrences)
            .save(&form, editing_id.as_deref())
    })
    .await
}

pub async fn delete_event(config_store: &ConfigStore, id: String) -> AdminResult<()> {
    with_store(config_store.read(), move |store, config| {
        EventAdmin::new(store, config.current_user(), config.max_occurrences).delete(&id)
    })
    .await
}

pub async fn copy_event(config_store: &ConfigStore, id: String) -> AdminResult<String> {
    with_store(config_store.read(), move |store, config| {
        EventAdmin::new(store, config.current_user(), config.max_occurrences).copy(&id)
    })
    .await
}

pub async fn archive_events(
    config_store: &ConfigStore,
    cutoff: NaiveDate,
) -> AdminResult<ArchiveOutcome> {
    with_store(config_store.read(), move |store, _| {
        archive::archive_through(store, cutoff)
    })
    .await
}

/// Scrapes `form.website` and returns the form with whatever was found filled in.
pub async fn auto_fill_form(
    config_store: &ConfigStore,
    mut form: EventForm,
) -> AdminResult<(EventForm, usize)> {
    let config = config_store.read();
    tokio::task::spawn_blocking(move || {
        let scraper = scraping::scraper_for(&config);
        let filled = scraping::auto_fill(scraper.as_ref(), &mut form)?;
        Ok((form, filled))
    })
    .await?
}

pub async fn lookup_place(config_store: &ConfigStore, query: &str) -> AdminResult<PlaceSelection> {
    let config = config_store.read();
    let mut places = GooglePlaces::new(config.google_api_key.as_deref())?;
    if let Some(language) = config.places_language.as_deref() {
        places = places.with_language(language);
    }
    Ok(places.find_place(query).await?)
}

/// Fills the empty description translations of one event and saves them.
pub async fn translate_event(
    config_store: &ConfigStore,
    id: String,
    source: Language,
) -> AdminResult<Vec<Language>> {
    let config = config_store.read();
    if config.current_user().is_none() {
        return Err(AdminError::NotSignedIn);
    }
    let mut record = get_event(config_store, id.clone()).await?;
    let translator = Translator::new(config.google_api_key.as_deref());
    let filled = translator.fill_translations(&mut record, source).await;
    if filled.is_empty() {
        return Ok(filled);
    }

    with_store(config, move |store, _| store.update(&id, &record)).await?;
    Ok(filled)
}

/// Runs debounced searches over `queries` and forwards only the newest result.
pub async fn watch_search(
    config_store: &ConfigStore,
    queries: mpsc::Receiver<String>,
    results: mpsc::UnboundedSender<(String, Page)>,
    ordering: Ordering,
) -> AdminResult<()> {
    let config = config_store.read();
    let delay = Duration::from_millis(config.search_debounce_ms);
    let (settled_tx, settled_rx) = mpsc::channel(16);
    let debouncer = tokio::spawn(search::debounce(queries, settled_tx, delay));

    search::run_latest(settled_rx, results, move |query| {
        let config = config.clone();
        async move {
            with_store(config, move |store, _| search::search(store, &query, ordering)).await
        }
    })
    .await?;
    debouncer.await?;
    Ok(())
}

pub fn login_url(config_store: &ConfigStore, provider: &str) -> AdminResult<Url> {
    let config = config_store.read();
    let auth = SupabaseAuth::from_config(&config)?;
    Ok(auth.oauth_url(provider, config.redirect_url.as_deref())?)
}

pub async fn send_login_email(config_store: &ConfigStore, email: &str) -> AdminResult<()> {
    let config = config_store.read();
    let auth = SupabaseAuth::from_config(&config)?;
    auth.send_magic_link(email, config.redirect_url.as_deref())
        .await?;
    tracing::info!(email, "sign-in email sent");
    Ok(())
}

pub async fn verify_login_code(
    config_store: &ConfigStore,
    email: &str,
    code: &str,
) -> AdminResult<CurrentUser> {
    let auth = SupabaseAuth::from_config(&config_store.read())?;
    let session = auth.verify_otp(email, code).await?;
    remember_session(config_store, session)
}

pub async fn complete_login(config_store: &ConfigStore, redirect: &str) -> AdminResult<CurrentUser> {
    let auth = SupabaseAuth::from_config(&config_store.read())?;
    let session = auth.session_from_redirect(redirect).await?;
    remember_session(config_store, session)
}

fn remember_session(config_store: &ConfigStore, session: Session) -> AdminResult<CurrentUser> {
    let user = session.user.clone();
    config_store.update(|config| config.session = Some(session))?;
    tracing::info!(user = %user.id, "signed in");
    Ok(user)
}

/// The signed-in user. A stored hosted session is checked against the identity
/// provider and dropped when it is no longer accepted.
pub async fn whoami(config_store: &ConfigStore) -> AdminResult<Option<CurrentUser>> {
    let config = config_store.read();
    let session = match (&config.session, config.backend()) {
        (Some(session), Backend::Supabase) => session.clone(),
        _ => return Ok(config.current_user()),
    };

    let auth = SupabaseAuth::from_config(&config)?;
    match auth.current_user(&session.access_token).await {
        Ok(user) => Ok(Some(user)),
        Err(AuthError::Api(message)) => {
            tracing::warn!(%message, "stored session rejected, signing out");
            config_store.update(|config| config.session = None)?;
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn logout(config_store: &ConfigStore) -> AdminResult<()> {
    let config = config_store.read();
    if let Some(session) = &config.session {
        match SupabaseAuth::from_config(&config) {
            Ok(auth) => {
                if let Err(err) = auth.sign_out(&session.access_token).await {
                    tracing::warn!(error = %err, "remote sign out failed");
                }
            }
            Err(err) => tracing::debug!(error = %err, "no identity provider to notify"),
        }
    }
    config_store.update(|config| config.session = None)?;
    Ok(())
}
