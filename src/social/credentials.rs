use super::Platform;
use super::config::env_tokens;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Error)]
#[error("unable to persist {platform} credentials: {message}")]
pub struct CredentialError {
    pub platform: Platform,
    pub message: String,
}

/// Where publishers read tokens from and write refreshed grants back to.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, platform: Platform) -> Credentials;

    async fn persist(
        &self,
        platform: Platform,
        credentials: Credentials,
    ) -> Result<(), CredentialError>;
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: RwLock<HashMap<Platform, Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, platform: Platform, credentials: Credentials) -> Self {
        self.inner.get_mut().insert(platform, credentials);
        self
    }

    pub fn from_env() -> Self {
        let (access, refresh) = env_tokens("LINKEDIN_ACCESS_TOKEN", Some("LINKEDIN_REFRESH_TOKEN"));
        let (meta, _) = env_tokens("META_ACCESS_TOKEN", None);
        let (medium, _) = env_tokens("MEDIUM_INTEGRATION_TOKEN", None);
        Self::new()
            .with(
                Platform::Linkedin,
                Credentials {
                    access_token: access,
                    refresh_token: refresh,
                },
            )
            .with(
                Platform::Meta,
                Credentials {
                    access_token: meta,
                    refresh_token: None,
                },
            )
            .with(
                Platform::Medium,
                Credentials {
                    access_token: medium,
                    refresh_token: None,
                },
            )
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, platform: Platform) -> Credentials {
        self.inner
            .read()
            .await
            .get(&platform)
            .cloned()
            .unwrap_or_default()
    }

    async fn persist(
        &self,
        platform: Platform,
        credentials: Credentials,
    ) -> Result<(), CredentialError> {
        self.inner.write().await.insert(platform, credentials);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn persist_replaces_tokens() {
        let store = MemoryCredentialStore::new().with(
            Platform::Linkedin,
            Credentials {
                access_token: Some("old".into()),
                refresh_token: Some("refresh".into()),
            },
        );
        store
            .persist(
                Platform::Linkedin,
                Credentials {
                    access_token: Some("new".into()),
                    refresh_token: Some("refresh".into()),
                },
            )
            .await
            .unwrap();
        let creds = store.get(Platform::Linkedin).await;
        assert_eq!(creds.access_token.as_deref(), Some("new"));
        assert_eq!(store.get(Platform::Meta).await, Credentials::default());
    }
}
