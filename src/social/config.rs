use once_cell::sync::Lazy;
use std::env;

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub static LINKEDIN_API_ROOT: Lazy<String> =
    Lazy::new(|| env_or("LINKEDIN_API_ROOT", "https://api.linkedin.com"));

pub static LINKEDIN_OAUTH_URL: Lazy<String> = Lazy::new(|| {
    env_or(
        "LINKEDIN_OAUTH_URL",
        "https://www.linkedin.com/oauth/v2/accessToken",
    )
});

pub static META_API_ROOT: Lazy<String> =
    Lazy::new(|| env_or("META_API_ROOT", "https://graph.instagram.com"));

pub static MEDIUM_API_ROOT: Lazy<String> =
    Lazy::new(|| env_or("MEDIUM_API_ROOT", "https://api.medium.com"));

#[derive(Debug, Clone, Default)]
pub struct LinkedinSettings {
    pub api_root: String,
    pub oauth_url: String,
    pub organization_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl LinkedinSettings {
    pub fn from_env() -> Self {
        Self {
            api_root: LINKEDIN_API_ROOT.clone(),
            oauth_url: LINKEDIN_OAUTH_URL.clone(),
            organization_id: env_opt("LINKEDIN_ORGANIZATION_ID"),
            client_id: env_opt("LINKEDIN_CLIENT_ID"),
            client_secret: env_opt("LINKEDIN_CLIENT_SECRET"),
        }
    }

    pub fn author_urn(&self) -> Option<String> {
        self.organization_id
            .as_deref()
            .map(|org| format!("urn:li:organization:{org}"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetaSettings {
    pub api_root: String,
    pub page_id: Option<String>,
}

impl MetaSettings {
    pub fn from_env() -> Self {
        Self {
            api_root: META_API_ROOT.clone(),
            page_id: env_opt("META_PAGE_ID"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MediumSettings {
    pub api_root: String,
    pub user_id: Option<String>,
}

impl MediumSettings {
    pub fn from_env() -> Self {
        Self {
            api_root: MEDIUM_API_ROOT.clone(),
            user_id: env_opt("MEDIUM_USER_ID"),
        }
    }
}

/// Access and refresh tokens as supplied by the environment.
pub(crate) fn env_tokens(access_key: &str, refresh_key: Option<&str>) -> (Option<String>, Option<String>) {
    (env_opt(access_key), refresh_key.and_then(env_opt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_urn_uses_organization() {
        let settings = LinkedinSettings {
            organization_id: Some("4242".into()),
            ..LinkedinSettings::default()
        };
        assert_eq!(
            settings.author_urn().as_deref(),
            Some("urn:li:organization:4242")
        );
        assert!(LinkedinSettings::default().author_urn().is_none());
    }
}
