use std::io::BufRead;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

use event_admin_lib::admin::SaveOutcome;
use event_admin_lib::archive::{self, ArchiveOutcome};
use event_admin_lib::config::ConfigStore;
use event_admin_lib::models::{
    checklist, display_date, AgeGroup, Category, EventForm, EventRecord, Format, Language,
    RepeatMode,
};
use event_admin_lib::pagination::Page;
use event_admin_lib::places::clear_place;
use event_admin_lib::store::{Ordering, SortField};

#[derive(Parser)]
#[command(name = "event-admin")]
#[command(about = "Create, edit, search, and archive event listings")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with the hosted identity provider
    Login {
        #[command(subcommand)]
        method: LoginMethod,
    },
    Whoami,
    Logout,
    /// Create an event, or a series when --repeat is set
    Add {
        #[command(flatten)]
        form: FormArgs,
    },
    /// Edit an event; with --repeat the row is replaced by a new series
    Edit {
        id: String,
        #[command(flatten)]
        form: FormArgs,
    },
    Delete {
        id: String,
    },
    /// Duplicate an event under the current user
    Copy {
        id: String,
    },
    /// Show every field of an event with a filled/empty marker
    Show {
        id: String,
    },
    List {
        /// 0 is the first load; each later page is one "load more"
        #[arg(long, default_value_t = 0)]
        page: usize,
        #[command(flatten)]
        sort: SortArgs,
    },
    Search {
        query: String,
        #[command(flatten)]
        sort: SortArgs,
    },
    /// Read queries line by line from stdin and search as you type
    WatchSearch {
        #[command(flatten)]
        sort: SortArgs,
    },
    /// Move every event ending on or before DATE (YYYY-MM-DD or "today") to the archive
    Archive {
        date: String,
    },
    /// Show what auto-fill would take from a web page
    Scrape {
        url: String,
    },
    /// Look up an address and its coordinates
    Place {
        query: String,
    },
    /// Fill the empty description translations of an event
    Translate {
        id: String,
        /// Language the existing description is written in
        #[arg(long, default_value = "ru")]
        from: Language,
    },
}

#[derive(Subcommand)]
enum LoginMethod {
    /// Print the Google sign-in URL
    Google,
    /// Send a sign-in email
    Email { email: String },
    /// Sign in with the code from the sign-in email
    Verify { email: String, code: String },
    /// Finish a browser sign-in from the URL it redirected to
    Complete { redirect_url: String },
}

#[derive(Args)]
struct SortArgs {
    /// created_at, start_date, end_date or title
    #[arg(long, default_value = "created_at")]
    sort: SortField,
    #[arg(long)]
    asc: bool,
}

impl SortArgs {
    fn ordering(&self) -> Ordering {
        Ordering {
            field: self.sort,
            ascending: self.asc,
        }
    }
}

#[derive(Args)]
struct FormArgs {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    description_en: Option<String>,
    #[arg(long)]
    description_de: Option<String>,
    #[arg(long)]
    description_fr: Option<String>,
    #[arg(long)]
    description_it: Option<String>,
    #[arg(long)]
    description_ru: Option<String>,
    #[arg(long)]
    address: Option<String>,
    #[arg(long, allow_negative_numbers = true)]
    lat: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    lng: Option<f64>,
    #[arg(long)]
    website: Option<String>,
    /// Repeatable; replaces the stored categories when given
    #[arg(long = "category")]
    categories: Vec<Category>,
    /// Repeatable; "any" selects every age group
    #[arg(long = "age")]
    age_groups: Vec<AgeGroup>,
    #[arg(long)]
    format: Option<Format>,
    /// YYYY-MM-DD
    #[arg(long)]
    start_date: Option<String>,
    /// HH:MM
    #[arg(long)]
    start_time: Option<String>,
    #[arg(long)]
    end_date: Option<String>,
    #[arg(long)]
    end_time: Option<String>,
    /// none, weekly or monthly
    #[arg(long)]
    repeat: Option<RepeatMode>,
    #[arg(long)]
    repeat_until: Option<String>,
    /// Look up the address and coordinates for this text
    #[arg(long)]
    place: Option<String>,
    /// Remove address and coordinates
    #[arg(long, conflicts_with = "place")]
    clear_place: bool,
    /// Fill fields from the event's website before saving
    #[arg(long)]
    from_website: bool,
}

impl FormArgs {
    fn apply(self, form: &mut EventForm) {
        let set = |slot: &mut Option<String>, value: Option<String>| {
            if value.is_some() {
                *slot = value;
            }
        };
        set(&mut form.title, self.title);
        set(&mut form.description, self.description);
        set(&mut form.description_en, self.description_en);
        set(&mut form.description_de, self.description_de);
        set(&mut form.description_fr, self.description_fr);
        set(&mut form.description_it, self.description_it);
        set(&mut form.description_ru, self.description_ru);
        set(&mut form.address, self.address);
        set(&mut form.website, self.website);
        set(&mut form.start_date, self.start_date);
        set(&mut form.start_time, self.start_time);
        set(&mut form.end_date, self.end_date);
        set(&mut form.end_time, self.end_time);
        set(&mut form.repeat_until, self.repeat_until);
        if self.lat.is_some() {
            form.lat = self.lat;
        }
        if self.lng.is_some() {
            form.lng = self.lng;
        }
        if !self.categories.is_empty() {
            form.categories = self.categories;
        }
        if !self.age_groups.is_empty() {
            form.age_groups = self.age_groups;
        }
        if self.format.is_some() {
            form.format = self.format;
        }
        if let Some(repeat) = self.repeat {
            form.repeat = repeat;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let default_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, filter_handle) = reload::Layer::new(default_filter);
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();

    let cli = Cli::parse();
    let config_store = ConfigStore::load();

    if std::env::var_os("RUST_LOG").is_none() {
        if let Some(level) = config_store.read().log_level {
            match EnvFilter::try_new(&level) {
                Ok(filter) => {
                    if let Err(err) = filter_handle.modify(|current| *current = filter) {
                        tracing::warn!(error = %err, "failed to apply log level from config");
                    }
                }
                Err(_) => tracing::warn!(%level, "invalid log level in config"),
            }
        }
    }

    match cli.command {
        Commands::Login { method } => cmd_login(&config_store, method).await,
        Commands::Whoami => cmd_whoami(&config_store).await,
        Commands::Logout => {
            event_admin_lib::logout(&config_store).await?;
            println!("Signed out");
            Ok(())
        }
        Commands::Add { form } => cmd_save(&config_store, None, form).await,
        Commands::Edit { id, form } => cmd_save(&config_store, Some(id), form).await,
        Commands::Delete { id } => {
            event_admin_lib::delete_event(&config_store, id.clone()).await?;
            println!("Deleted {id}");
            Ok(())
        }
        Commands::Copy { id } => {
            let new_id = event_admin_lib::copy_event(&config_store, id).await?;
            println!("Copied as {new_id}");
            Ok(())
        }
        Commands::Show { id } => {
            let record = event_admin_lib::get_event(&config_store, id).await?;
            print_checklist(&record);
            Ok(())
        }
        Commands::List { page, sort } => {
            let page = event_admin_lib::list_events(&config_store, page, sort.ordering()).await?;
            print_page(&page);
            Ok(())
        }
        Commands::Search { query, sort } => {
            let page =
                event_admin_lib::search_events(&config_store, query, sort.ordering()).await?;
            print_page(&page);
            Ok(())
        }
        Commands::WatchSearch { sort } => cmd_watch_search(&config_store, sort.ordering()).await,
        Commands::Archive { date } => cmd_archive(&config_store, &date).await,
        Commands::Scrape { url } => cmd_scrape(&config_store, url).await,
        Commands::Place { query } => {
            let place = event_admin_lib::lookup_place(&config_store, &query).await?;
            println!("{}", place.formatted_address);
            println!("{}, {}", place.lat, place.lng);
            Ok(())
        }
        Commands::Translate { id, from } => {
            let filled = event_admin_lib::translate_event(&config_store, id, from).await?;
            if filled.is_empty() {
                println!("Nothing to translate");
            } else {
                let codes: Vec<&str> = filled.iter().map(Language::code).collect();
                println!("Filled: {}", codes.join(", "));
            }
            Ok(())
        }
    }
}

async fn cmd_login(config_store: &ConfigStore, method: LoginMethod) -> Result<()> {
    match method {
        LoginMethod::Google => {
            let url = event_admin_lib::login_url(config_store, "google")?;
            println!("Open this URL to sign in, then run `event-admin login complete <url>`");
            println!("with the address the browser lands on:\n\n{url}");
        }
        LoginMethod::Email { email } => {
            event_admin_lib::send_login_email(config_store, &email).await?;
            println!("Check {email} for a sign-in link or code.");
        }
        LoginMethod::Verify { email, code } => {
            let user = event_admin_lib::verify_login_code(config_store, &email, &code).await?;
            print_user(user.email.as_deref().unwrap_or(&user.id));
        }
        LoginMethod::Complete { redirect_url } => {
            let user = event_admin_lib::complete_login(config_store, &redirect_url).await?;
            print_user(user.email.as_deref().unwrap_or(&user.id));
        }
    }
    Ok(())
}

async fn cmd_whoami(config_store: &ConfigStore) -> Result<()> {
    match event_admin_lib::whoami(config_store).await? {
        Some(user) => print_user(user.email.as_deref().unwrap_or(&user.id)),
        None => println!("Not signed in"),
    }
    Ok(())
}

async fn cmd_save(config_store: &ConfigStore, id: Option<String>, args: FormArgs) -> Result<()> {
    let mut form = match &id {
        Some(id) => EventForm::from_record(&event_admin_lib::get_event(config_store, id.clone()).await?),
        None => EventForm::default(),
    };
    let place = args.place.clone();
    let wipe_place = args.clear_place;
    let from_website = args.from_website;
    args.apply(&mut form);

    if wipe_place {
        clear_place(&mut form);
    }
    if let Some(query) = place {
        let selection = event_admin_lib::lookup_place(config_store, &query).await?;
        selection.apply(&mut form);
    }
    if from_website {
        let (filled_form, filled) = event_admin_lib::auto_fill_form(config_store, form).await?;
        form = filled_form;
        println!("Auto-filled {filled} fields");
    }

    match event_admin_lib::save_event(config_store, form, id).await? {
        SaveOutcome::Created(rows) => {
            println!("Created {} event(s)", rows.len());
            print_rows(&rows);
        }
        SaveOutcome::Replaced { removed, rows } => {
            println!("Replaced {removed} with {} event(s)", rows.len());
            print_rows(&rows);
        }
        SaveOutcome::Updated(id) => println!("Updated {id}"),
    }
    Ok(())
}

async fn cmd_archive(config_store: &ConfigStore, date: &str) -> Result<()> {
    let cutoff = archive::parse_cutoff(date, config_store.read().timezone())?;
    match event_admin_lib::archive_events(config_store, cutoff).await? {
        ArchiveOutcome::NothingToArchive => println!("No events to archive"),
        ArchiveOutcome::Archived(count) => {
            println!("Archived {count} event(s) ending on or before {}", display_date(Some(cutoff)))
        }
    }
    Ok(())
}

async fn cmd_scrape(config_store: &ConfigStore, url: String) -> Result<()> {
    let form = EventForm {
        website: Some(url),
        ..EventForm::default()
    };
    let (form, filled) = event_admin_lib::auto_fill_form(config_store, form).await?;
    println!("Found {filled} field(s)");
    let fields = [
        ("title", &form.title),
        ("description", &form.description),
        ("start_date", &form.start_date),
        ("start_time", &form.start_time),
        ("end_date", &form.end_date),
        ("end_time", &form.end_time),
        ("address", &form.address),
    ];
    for (name, value) in fields {
        if let Some(value) = value {
            println!("{name}: {value}");
        }
    }
    Ok(())
}

async fn cmd_watch_search(config_store: &ConfigStore, ordering: Ordering) -> Result<()> {
    let (query_tx, query_rx) = mpsc::channel(64);
    let (result_tx, mut result_rx) = mpsc::unbounded_channel::<(String, Page)>();

    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if query_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    let printer = tokio::spawn(async move {
        while let Some((query, page)) = result_rx.recv().await {
            println!("== {query:?}: {} result(s)", page.events.len());
            print_page(&page);
        }
    });

    event_admin_lib::watch_search(config_store, query_rx, result_tx, ordering).await?;
    printer.await.context("result printer stopped")?;
    Ok(())
}

fn print_user(name: &str) {
    println!("Signed in as {name}");
}

fn print_rows(rows: &[EventRecord]) {
    for row in rows {
        println!(
            "{:<38} {:<10} {}",
            row.id.as_deref().unwrap_or("-"),
            display_date(row.start_date),
            row.title()
        );
    }
}

fn print_page(page: &Page) {
    print_rows(&page.events);
    if page.has_more {
        println!("-- more: --page {}", page.number + 1);
    }
}

fn print_checklist(record: &EventRecord) {
    if let Some(id) = &record.id {
        println!("id: {id}");
    }
    for (name, marker, value) in checklist(record) {
        println!("{marker} {name}: {value}");
    }
}
