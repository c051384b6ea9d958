use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use std::{sync::Arc, time::Duration};
use weather_sync::{
    CacheStore, Config, Coordinates, FileStorage, ProviderId, SyncController, WeatherFetcher,
    provider,
};

use crate::render;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather", version, about = "Weather CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name, e.g. "openweather" or "weatherapi".
        provider: String,

        /// Also make this provider the default one.
        #[arg(long)]
        default: bool,
    },

    /// Fetch once (showing cached data first, if any) and print the result.
    Show {
        #[command(flatten)]
        location: LocationArgs,

        /// Print the state as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Keep the weather fresh in the background, printing every change until Ctrl-C.
    Watch {
        #[command(flatten)]
        location: LocationArgs,

        /// Override the background refresh interval.
        #[arg(long)]
        interval_secs: Option<u64>,
    },

    /// Inspect or clear the persisted weather cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Debug, Args)]
pub struct LocationArgs {
    /// Latitude in decimal degrees.
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,

    /// Longitude in decimal degrees.
    #[arg(long, allow_negative_numbers = true)]
    pub lon: f64,
}

impl LocationArgs {
    fn coordinates(&self) -> anyhow::Result<Coordinates> {
        if !(-90.0..=90.0).contains(&self.lat) {
            bail!("Latitude must be between -90 and 90, got {}", self.lat);
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            bail!("Longitude must be between -180 and 180, got {}", self.lon);
        }
        Ok(Coordinates::new(self.lat, self.lon))
    }
}

#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show how old the cached snapshot is.
    Status,
    /// Delete the cached snapshot.
    Clear,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure { provider, default } => configure(&provider, default),
            Command::Show { location, json } => show(location.coordinates()?, json).await,
            Command::Watch {
                location,
                interval_secs,
            } => watch(location.coordinates()?, interval_secs).await,
            Command::Cache { action } => cache(action),
        }
    }
}

fn configure(provider: &str, make_default: bool) -> anyhow::Result<()> {
    let id = ProviderId::try_from(provider)?;
    let mut config = Config::load()?;

    if config.is_provider_configured(id) {
        println!("{id} already has an API key; entering a new one replaces it.");
    }
    let api_key = inquire::Password::new(&format!("API key for {id}:"))
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;

    apply_credentials(&mut config, id, &api_key, make_default)?;
    config.save()?;

    println!("Saved credentials for {id}.");
    if config.default_provider_id().ok() == Some(id) {
        println!("{id} is the default provider.");
    }
    Ok(())
}

fn apply_credentials(
    config: &mut Config,
    id: ProviderId,
    api_key: &str,
    make_default: bool,
) -> anyhow::Result<()> {
    let api_key = api_key.trim();
    if api_key.is_empty() {
        bail!("API key must not be empty");
    }

    config.upsert_provider_api_key(id, api_key.to_string());
    if make_default {
        config.set_default_provider(id);
    }
    Ok(())
}

fn cache_store(config: &Config) -> anyhow::Result<CacheStore> {
    let storage = FileStorage::new(Config::cache_dir()?);
    Ok(CacheStore::new(Arc::new(storage)).with_proximity_threshold(config.sync.proximity_threshold_deg))
}

fn build_controller(config: &Config, interval: Option<Duration>) -> anyhow::Result<SyncController> {
    let fetcher: Arc<dyn WeatherFetcher> = Arc::new(provider::default_fetcher_from_config(config)?);

    let mut options = config.sync.options();
    if let Some(interval) = interval {
        options.refresh_interval = interval;
    }

    Ok(SyncController::new(cache_store(config)?, fetcher, options)?)
}

async fn show(coords: Coordinates, json: bool) -> anyhow::Result<()> {
    let config = Config::load()?;
    let controller = build_controller(&config, None)?;
    let mut rx = controller.watch();

    controller.start(coords);

    let cached = controller.state();
    if !json && cached.data.is_some() {
        println!("{}", render::state(&cached, controller.cache_age()));
    }

    // backstop over the HTTP client timeout
    let limit = Duration::from_millis(config.sync.request_timeout_ms) + Duration::from_secs(5);
    let state = tokio::time::timeout(limit, rx.wait_for(|s| !s.is_busy()))
        .await
        .context("Timed out waiting for the weather service")?
        .context("Weather session ended unexpectedly")?
        .clone();
    controller.teardown();

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        println!("{}", render::state(&state, controller.cache_age()));
        if let Some(failure) = controller.last_failure() {
            println!("{}", render::retry_hint(&failure));
        }
    }

    if state.data.is_none() && state.error.is_some() {
        bail!("No weather data available");
    }
    Ok(())
}

async fn watch(coords: Coordinates, interval_secs: Option<u64>) -> anyhow::Result<()> {
    let config = Config::load()?;
    let controller = build_controller(&config, interval_secs.map(Duration::from_secs))?;

    let _subscription = controller.subscribe(|state| {
        println!("[{}] {}", chrono::Local::now().format("%H:%M:%S"), render::summary(state));
    });

    tracing::info!("Watching weather for {}", coords);
    controller.start(coords);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    controller.teardown();
    println!("Stopped.");
    Ok(())
}

fn cache(action: CacheAction) -> anyhow::Result<()> {
    let config = Config::load()?;
    let store = cache_store(&config)?;

    match action {
        CacheAction::Status => match (store.age(), store.saved_at()) {
            (Some(age), Some(saved_at)) => println!(
                "Cached snapshot is {} old (saved {}).",
                render::age(age),
                saved_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
            ),
            _ => println!("No cached data."),
        },
        CacheAction::Clear => {
            store.clear();
            println!("Weather cache cleared.");
        }
    }
    Ok(())
}
