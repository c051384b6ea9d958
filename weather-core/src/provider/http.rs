use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::{
    error::FetchError,
    model::{Coordinates, WeatherSnapshot},
};

use super::{ProviderId, WeatherFetcher};

/// Fetches the provider's JSON body as-is and hands it back as a snapshot.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    provider: ProviderId,
    api_key: String,
    endpoint: String,
    http: Client,
}

impl HttpFetcher {
    pub fn new(
        provider: ProviderId,
        api_key: String,
        endpoint: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            provider,
            api_key,
            endpoint,
            http,
        })
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl WeatherFetcher for HttpFetcher {
    async fn fetch(&self, coords: Coordinates) -> Result<WeatherSnapshot, FetchError> {
        tracing::debug!("Requesting weather from {} for {}", self.provider, coords);

        let res = self
            .http
            .get(&self.endpoint)
            .query(&self.provider.query(coords, &self.api_key))
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let value: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            FetchError::Malformed(format!("{} returned invalid JSON: {e}", self.provider))
        })?;

        if !value.is_object() {
            return Err(FetchError::Malformed(format!(
                "{} returned a non-object JSON body",
                self.provider
            )));
        }

        Ok(WeatherSnapshot::new(value))
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(server: &MockServer, provider: ProviderId) -> HttpFetcher {
        HttpFetcher::new(
            provider,
            "TEST_KEY".to_string(),
            format!("{}/current", server.uri()),
            Duration::from_secs(5),
        )
        .expect("client builds")
    }

    #[tokio::test]
    async fn returns_body_as_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/current"))
            .and(query_param("lat", "40.71"))
            .and(query_param("lon", "-74"))
            .and(query_param("appid", "TEST_KEY"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "main": { "temp": 22.5 },
                "name": "New York"
            })))
            .mount(&server)
            .await;

        let snapshot = fetcher(&server, ProviderId::OpenWeather)
            .fetch(Coordinates::new(40.71, -74.0))
            .await
            .expect("fetch succeeds");

        assert_eq!(snapshot.as_json()["name"], "New York");
        assert_eq!(snapshot.as_json()["main"]["temp"], 22.5);
    }

    #[tokio::test]
    async fn weatherapi_sends_coordinates_as_single_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/current"))
            .and(query_param("q", "51.5,-0.12"))
            .and(query_param("key", "TEST_KEY"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "current": { "temp_c": 14.0 }
            })))
            .mount(&server)
            .await;

        let snapshot = fetcher(&server, ProviderId::WeatherApi)
            .fetch(Coordinates::new(51.5, -0.12))
            .await
            .expect("fetch succeeds");

        assert_eq!(snapshot.as_json()["current"]["temp_c"], 14.0);
    }

    #[tokio::test]
    async fn non_success_status_becomes_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("x".repeat(500)))
            .mount(&server)
            .await;

        let err = fetcher(&server, ProviderId::OpenWeather)
            .fetch(Coordinates::new(0.0, 0.0))
            .await
            .unwrap_err();

        match err {
            FetchError::Status { status, body } => {
                assert_eq!(status, 503);
                assert!(body.len() <= 203);
                assert!(body.ends_with("..."));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_json_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = fetcher(&server, ProviderId::OpenWeather)
            .fetch(Coordinates::new(0.0, 0.0))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[tokio::test]
    async fn non_object_json_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[1, 2, 3]"))
            .mount(&server)
            .await;

        let err = fetcher(&server, ProviderId::OpenWeather)
            .fetch(Coordinates::new(0.0, 0.0))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(
            ProviderId::OpenWeather,
            "TEST_KEY".to_string(),
            server.uri(),
            Duration::from_millis(100),
        )
        .expect("client builds");

        let err = fetcher.fetch(Coordinates::new(0.0, 0.0)).await.unwrap_err();
        assert_eq!(err, FetchError::Timeout);
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_failure() {
        let fetcher = HttpFetcher::new(
            ProviderId::OpenWeather,
            "TEST_KEY".to_string(),
            "http://127.0.0.1:1/current".to_string(),
            Duration::from_secs(2),
        )
        .expect("client builds");

        let err = fetcher.fetch(Coordinates::new(0.0, 0.0)).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)), "{err:?}");
    }

    #[tokio::test]
    async fn transport_errors_do_not_carry_the_api_key() {
        let fetcher = HttpFetcher::new(
            ProviderId::OpenWeather,
            "SECRET_KEY_123".to_string(),
            "http://127.0.0.1:1/current".to_string(),
            Duration::from_secs(2),
        )
        .expect("client builds");

        let err = fetcher.fetch(Coordinates::new(0.0, 0.0)).await.unwrap_err();
        assert!(!err.to_string().contains("SECRET_KEY_123"), "{err}");
        assert!(!format!("{err:?}").contains("SECRET_KEY_123"), "{err:?}");
    }

    #[tokio::test]
    async fn timeout_errors_do_not_carry_the_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(
            ProviderId::WeatherApi,
            "SECRET_KEY_123".to_string(),
            server.uri(),
            Duration::from_millis(100),
        )
        .expect("client builds");

        let err = fetcher.fetch(Coordinates::new(0.0, 0.0)).await.unwrap_err();
        assert!(!format!("{err} {err:?}").contains("SECRET_KEY_123"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let body = "é".repeat(150);
        let truncated = truncate_body(&body);
        assert!(truncated.ends_with("..."));
    }
}
