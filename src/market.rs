use crate::http::{build_client, snippet};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("missing market data endpoint")]
    MissingEndpoint,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Aggregated search signal. An empty signal is a normal outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MarketSignal {
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl MarketSignal {
    pub fn is_empty(&self) -> bool {
        self.features.is_empty() && self.metadata.is_empty()
    }
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn search(&self, term: &str) -> Result<MarketSignal, MarketDataError>;
}

pub struct HttpMarketData {
    http: Client,
    url: String,
    api_key: Option<String>,
}

impl HttpMarketData {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: build_client(),
            url: url.into(),
            api_key,
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var("MARKET_DATA_URL").unwrap_or_default(),
            std::env::var("MARKET_DATA_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
        )
    }
}

#[async_trait]
impl MarketDataProvider for HttpMarketData {
    async fn search(&self, term: &str) -> Result<MarketSignal, MarketDataError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(MarketDataError::MissingEndpoint);
        }

        let mut request = self.http.get(url).query(&[("q", term)]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|err| MarketDataError::Http(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::NO_CONTENT {
            debug!(target = "catalyst.market", term = term, "market_search_empty");
            return Ok(MarketSignal::default());
        }
        let body = response
            .text()
            .await
            .map_err(|err| MarketDataError::Http(err.to_string()))?;
        if !status.is_success() {
            return Err(MarketDataError::Http(format!(
                "HTTP {status}: {}",
                snippet(&body)
            )));
        }
        if body.trim().is_empty() {
            return Ok(MarketSignal::default());
        }

        let signal: MarketSignal = serde_json::from_str(&body)
            .map_err(|err| MarketDataError::InvalidResponse(err.to_string()))?;
        debug!(
            target = "catalyst.market",
            term = term,
            features = signal.features.len(),
            "market_search_complete"
        );
        Ok(signal)
    }
}
