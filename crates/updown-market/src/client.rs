//! Gamma REST client: series listings and per-event hydration.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};
use updown_common::RateGate;

use crate::types::{GammaEvent, GammaSeries};

/// Errors from the Gamma API client.
#[derive(Debug, Error)]
pub enum GammaError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gamma API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    #[error("Malformed payload: {0}")]
    Malformed(String),
}

/// Configuration for the Gamma client.
#[derive(Debug, Clone)]
pub struct GammaConfig {
    /// Base URL of the Gamma API.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Number of retries on transport failure.
    pub max_retries: u32,
    /// Initial backoff duration for retries.
    pub initial_backoff: Duration,
}

impl Default for GammaConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gamma-api.polymarket.com".to_string(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

/// Read access to series events, abstracted so capture loops can run
/// against scripted sources in tests.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Event stubs for one series.
    async fn series_events(&self, series_id: u64) -> Result<Vec<GammaEvent>, GammaError>;

    /// One hydrated event (markets embedded) by slug.
    async fn event_by_slug(&self, slug: &str) -> Result<GammaEvent, GammaError>;
}

/// Gamma REST client.
pub struct GammaClient {
    client: Client,
    config: GammaConfig,
    gate: Arc<RateGate>,
}

impl GammaClient {
    pub fn new(config: GammaConfig, gate: Arc<RateGate>) -> Result<Self, GammaError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config,
            gate,
        })
    }

    /// Makes a GET request with retry and exponential backoff, honoring
    /// 429 Retry-After.
    async fn get_json(&self, url: &str) -> Result<serde_json::Value, GammaError> {
        let mut backoff = self.config.initial_backoff;

        for attempt in 0..=self.config.max_retries {
            self.gate.acquire().await;

            match self.client.get(url).send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        return response.json().await.map_err(GammaError::Http);
                    } else if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = response
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(60);

                        if attempt < self.config.max_retries {
                            warn!(
                                "Gamma rate limited, waiting {} seconds (attempt {}/{})",
                                retry_after,
                                attempt + 1,
                                self.config.max_retries
                            );
                            tokio::time::sleep(Duration::from_secs(retry_after)).await;
                            continue;
                        } else {
                            return Err(GammaError::RateLimited(retry_after));
                        }
                    } else {
                        let status = response.status().as_u16();
                        let body = response.text().await.unwrap_or_default();
                        return Err(GammaError::Api { status, body });
                    }
                }
                Err(e) if attempt < self.config.max_retries => {
                    warn!(
                        "Gamma request failed: {} (attempt {}/{}), retrying in {:?}",
                        e,
                        attempt + 1,
                        self.config.max_retries,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(GammaError::Http(e)),
            }
        }

        unreachable!()
    }
}

#[async_trait]
impl EventSource for GammaClient {
    async fn series_events(&self, series_id: u64) -> Result<Vec<GammaEvent>, GammaError> {
        let url = format!("{}/series/{}", self.config.base_url, series_id);
        debug!("Fetching series: {}", url);

        let value = self.get_json(&url).await?;
        let series: GammaSeries = serde_json::from_value(value)
            .map_err(|e| GammaError::Malformed(format!("series payload: {}", e)))?;

        Ok(series.events.unwrap_or_default())
    }

    async fn event_by_slug(&self, slug: &str) -> Result<GammaEvent, GammaError> {
        let url = format!("{}/events/slug/{}", self.config.base_url, slug);
        debug!("Fetching event: {}", url);

        // The endpoint returns a single object, but some deployments wrap
        // it in a one-element array.
        let mut value = self.get_json(&url).await?;
        if let serde_json::Value::Array(items) = value {
            value = items.into_iter().next().ok_or_else(|| {
                GammaError::Malformed(format!("empty event response for slug {}", slug))
            })?;
        }

        serde_json::from_value(value)
            .map_err(|e| GammaError::Malformed(format!("event payload: {}", e)))
    }
}

/// Loads a series and hydrates each event by slug. Events whose detail
/// fetch fails fall back to their stub so one bad slug never hides the
/// rest of the series.
pub async fn hydrate_series(
    source: &dyn EventSource,
    series_id: u64,
) -> Result<Vec<GammaEvent>, GammaError> {
    let stubs = source.series_events(series_id).await?;
    let mut hydrated = Vec::with_capacity(stubs.len());

    for stub in stubs {
        let slug = match stub.slug.clone() {
            Some(slug) => slug,
            None => {
                hydrated.push(stub);
                continue;
            }
        };

        match source.event_by_slug(&slug).await {
            Ok(event) => hydrated.push(event),
            Err(e) => {
                warn!("Failed to hydrate event {}: {}, keeping stub", slug, e);
                hydrated.push(stub);
            }
        }
    }

    Ok(hydrated)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedSource {
        stubs: Vec<GammaEvent>,
        fail_slugs: Vec<String>,
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn series_events(&self, _series_id: u64) -> Result<Vec<GammaEvent>, GammaError> {
            Ok(self.stubs.clone())
        }

        async fn event_by_slug(&self, slug: &str) -> Result<GammaEvent, GammaError> {
            if self.fail_slugs.iter().any(|s| s == slug) {
                return Err(GammaError::Api {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            Ok(GammaEvent {
                slug: Some(slug.to_string()),
                title: Some(format!("hydrated {}", slug)),
                ..GammaEvent::default()
            })
        }
    }

    fn stub(slug: Option<&str>) -> GammaEvent {
        GammaEvent {
            slug: slug.map(|s| s.to_string()),
            ..GammaEvent::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = GammaConfig::default();
        assert_eq!(config.base_url, "https://gamma-api.polymarket.com");
        assert_eq!(config.max_retries, 3);
    }

    #[tokio::test]
    async fn test_hydrate_series_replaces_stubs() {
        let source = ScriptedSource {
            stubs: vec![stub(Some("a")), stub(Some("b"))],
            fail_slugs: vec![],
        };

        let events = hydrate_series(&source, 41).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].title.as_deref(), Some("hydrated a"));
        assert_eq!(events[1].title.as_deref(), Some("hydrated b"));
    }

    #[tokio::test]
    async fn test_hydrate_series_keeps_stub_on_failure() {
        let source = ScriptedSource {
            stubs: vec![stub(Some("a")), stub(Some("bad")), stub(None)],
            fail_slugs: vec!["bad".to_string()],
        };

        let events = hydrate_series(&source, 41).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].title.as_deref(), Some("hydrated a"));
        // Failed hydration keeps the stub rather than dropping the event.
        assert_eq!(events[1].title, None);
        assert_eq!(events[1].slug.as_deref(), Some("bad"));
        // Slugless stub passes through untouched.
        assert_eq!(events[2].slug, None);
    }
}
