use crate::ledger::{JobLedger, MemoryStore, SqliteStore, Store, StoreError};
use crate::llm::{ChatCompletionsClient, LlmConfig};
use crate::market::HttpMarketData;
use crate::pipeline::Pipeline;
use crate::social::config::{LinkedinSettings, MediumSettings, MetaSettings};
use crate::social::{
    CredentialStore, LinkedinPublisher, MediumPublisher, MemoryCredentialStore, MetaPublisher,
    Platform, PlatformPublisher, PublishingGateway,
};
use crate::stages::{ExecutorMode, FixtureExecutor, LiveExecutor, StageExecutor};
use std::{path::PathBuf, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}")]
    Invalid { key: &'static str, value: String },
    #[error("live stage executor requires {0}")]
    MissingProvider(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Service settings read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub port: u16,
    pub database_path: Option<PathBuf>,
    pub executor: ExecutorMode,
    pub publish_platforms: Vec<Platform>,
    pub queue_capacity: usize,
    /// How long finished background runs stay readable at `/jobs/{id}`.
    pub run_retention: Duration,
    pub request_max_bytes: usize,
    pub metrics_key: Option<String>,
    pub openapi_key: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match get("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid { key: "PORT", value: raw })?,
            None => 8000,
        };

        let executor = match get("STAGE_EXECUTOR") {
            Some(raw) => raw.parse::<ExecutorMode>().map_err(|_| ConfigError::Invalid {
                key: "STAGE_EXECUTOR",
                value: raw,
            })?,
            None => ExecutorMode::Live,
        };
        if executor == ExecutorMode::Live {
            if get("LLM_BASE_URL").is_none() {
                return Err(ConfigError::MissingProvider("LLM_BASE_URL"));
            }
            if get("MARKET_DATA_URL").is_none() {
                return Err(ConfigError::MissingProvider("MARKET_DATA_URL"));
            }
        }

        let publish_platforms = match get("PUBLISH_PLATFORMS") {
            Some(raw) => parse_platforms(&raw)?,
            None => vec![Platform::Linkedin],
        };

        Ok(Self {
            port,
            database_path: get("DATABASE_PATH").map(PathBuf::from),
            executor,
            publish_platforms,
            queue_capacity: positive(get("QUEUE_CAPACITY"), 64),
            run_retention: Duration::from_secs(positive(get("RUN_RETENTION_SECS"), 3600) as u64),
            request_max_bytes: positive(get("REQUEST_MAX_BYTES"), 256 * 1024),
            metrics_key: get("METRICS_KEY"),
            openapi_key: get("OPENAPI_KEY"),
        })
    }

    /// Wires store, executor and publishers into a ready pipeline.
    pub fn build_pipeline(&self) -> Result<Pipeline, ConfigError> {
        let store: Arc<dyn Store> = match &self.database_path {
            Some(path) => {
                info!(target = "catalyst.api", path = %path.display(), "using sqlite store");
                Arc::new(SqliteStore::open(path)?)
            }
            None => {
                warn!(
                    target = "catalyst.api",
                    "DATABASE_PATH not set; projects live in memory only"
                );
                Arc::new(MemoryStore::new())
            }
        };

        let executor: Arc<dyn StageExecutor> = match self.executor {
            ExecutorMode::Live => Arc::new(LiveExecutor::new(
                Arc::new(ChatCompletionsClient::new(LlmConfig::from_env())),
                Arc::new(HttpMarketData::from_env()),
            )),
            ExecutorMode::Fixture => Arc::new(FixtureExecutor::new()),
        };

        Ok(Pipeline::new(
            JobLedger::new(store),
            executor,
            self.gateway(),
        ))
    }

    fn gateway(&self) -> PublishingGateway {
        let credentials: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::from_env());
        let mut gateway = PublishingGateway::new(self.publish_platforms.clone());
        for platform in &self.publish_platforms {
            let publisher: Arc<dyn PlatformPublisher> = match platform {
                Platform::Linkedin => Arc::new(LinkedinPublisher::new(
                    LinkedinSettings::from_env(),
                    credentials.clone(),
                )),
                Platform::Meta => Arc::new(MetaPublisher::new(
                    MetaSettings::from_env(),
                    credentials.clone(),
                )),
                Platform::Medium => Arc::new(MediumPublisher::new(
                    MediumSettings::from_env(),
                    credentials.clone(),
                )),
            };
            gateway = gateway.register(publisher);
        }
        gateway
    }
}

fn parse_platforms(raw: &str) -> Result<Vec<Platform>, ConfigError> {
    let mut platforms = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let platform = name.parse::<Platform>().map_err(|_| ConfigError::Invalid {
            key: "PUBLISH_PLATFORMS",
            value: name.to_string(),
        })?;
        if !platforms.contains(&platform) {
            platforms.push(platform);
        }
    }
    Ok(platforms)
}

fn positive(raw: Option<String>, default: usize) -> usize {
    raw.and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
