use crate::{
    Config,
    error::FetchError,
    model::{Coordinates, WeatherSnapshot},
    provider::http::HttpFetcher,
};
use async_trait::async_trait;
use std::{convert::TryFrom, fmt::Debug, time::Duration};

pub mod http;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    OpenWeather,
    WeatherApi,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "openweather",
            ProviderId::WeatherApi => "weatherapi",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::OpenWeather, ProviderId::WeatherApi]
    }

    /// Current-conditions endpoint used when the config does not override it.
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "https://api.openweathermap.org/data/2.5/weather",
            ProviderId::WeatherApi => "https://api.weatherapi.com/v1/current.json",
        }
    }

    /// Query string pairs carrying the coordinates and credentials.
    pub fn query(&self, coords: Coordinates, api_key: &str) -> Vec<(&'static str, String)> {
        match self {
            ProviderId::OpenWeather => vec![
                ("lat", coords.latitude.to_string()),
                ("lon", coords.longitude.to_string()),
                ("appid", api_key.to_string()),
                ("units", "metric".to_string()),
            ],
            ProviderId::WeatherApi => vec![
                ("key", api_key.to_string()),
                ("q", format!("{},{}", coords.latitude, coords.longitude)),
            ],
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "openweather" => Ok(ProviderId::OpenWeather),
            "weatherapi" => Ok(ProviderId::WeatherApi),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: openweather, weatherapi."
            )),
        }
    }
}

/// Produces a snapshot for a location. Implementations own the wire format.
#[async_trait]
pub trait WeatherFetcher: Send + Sync + Debug {
    async fn fetch(&self, coords: Coordinates) -> Result<WeatherSnapshot, FetchError>;
}

/// Construct a fetcher from config and explicit ProviderId.
pub fn fetcher_from_config(id: ProviderId, config: &Config) -> anyhow::Result<HttpFetcher> {
    let provider = config.provider_config(id).ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured for provider '{id}'.\n\
                 Hint: run `weather configure {id}` and enter your API key."
        )
    })?;

    let endpoint = provider
        .base_url
        .clone()
        .unwrap_or_else(|| id.default_endpoint().to_string());
    let timeout = Duration::from_millis(config.sync.request_timeout_ms);

    HttpFetcher::new(id, provider.api_key.clone(), endpoint, timeout)
}

/// Construct the default fetcher from config, using `default_provider` field.
pub fn default_fetcher_from_config(config: &Config) -> anyhow::Result<HttpFetcher> {
    let id = config.default_provider_id()?;
    fetcher_from_config(id, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn provider_id_as_str_roundtrip() {
        for id in ProviderId::all() {
            let s = id.as_str();
            let parsed = ProviderId::try_from(s).expect("roundtrip should succeed");
            assert_eq!(*id, parsed);
        }
    }

    #[test]
    fn unknown_provider_error() {
        let err = ProviderId::try_from("doesnotexist").unwrap_err();
        assert!(err.to_string().contains("Unknown provider"));
    }

    #[test]
    fn query_carries_coordinates() {
        let coords = Coordinates::new(40.71, -74.0);

        let ow = ProviderId::OpenWeather.query(coords, "K");
        assert!(ow.contains(&("lat", "40.71".to_string())));
        assert!(ow.contains(&("lon", "-74".to_string())));
        assert!(ow.contains(&("appid", "K".to_string())));

        let wa = ProviderId::WeatherApi.query(coords, "K");
        assert!(wa.contains(&("q", "40.71,-74".to_string())));
        assert!(wa.contains(&("key", "K".to_string())));
    }

    #[test]
    fn fetcher_from_config_errors_when_missing_api_key() {
        let cfg = Config::default();
        let err = fetcher_from_config(ProviderId::OpenWeather, &cfg).unwrap_err();
        assert!(err.to_string().contains("No API key configured for provider"));
    }

    #[test]
    fn default_fetcher_from_config_errors_when_not_set() {
        let cfg = Config::default();
        let err = default_fetcher_from_config(&cfg).unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("No default provider configured"));
        assert!(msg.contains("Hint: run `weather configure"));
    }

    #[test]
    fn default_fetcher_from_config_works_when_set_and_configured() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::OpenWeather, "KEY".to_string());

        let fetcher = default_fetcher_from_config(&cfg).expect("fetcher");
        assert_eq!(fetcher.provider(), ProviderId::OpenWeather);
        assert_eq!(fetcher.endpoint(), ProviderId::OpenWeather.default_endpoint());
    }

    #[test]
    fn base_url_override_is_used() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "KEY".to_string());
        cfg.set_provider_base_url(ProviderId::WeatherApi, "http://localhost:9999/current".into());

        let fetcher = fetcher_from_config(ProviderId::WeatherApi, &cfg).expect("fetcher");
        assert_eq!(fetcher.endpoint(), "http://localhost:9999/current");
    }
}
