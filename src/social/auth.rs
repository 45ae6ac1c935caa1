use super::SocialError;
use crate::http::snippet;
use reqwest::Client;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// OAuth 2.0 `refresh_token` grant against `token_url`.
pub async fn refresh_access_token(
    http: &Client,
    token_url: &str,
    refresh_token: &str,
    client_id: Option<&str>,
    client_secret: Option<&str>,
) -> Result<TokenGrant, SocialError> {
    let mut params = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
    ];
    if let Some(id) = client_id {
        params.push(("client_id", id));
    }
    if let Some(secret) = client_secret {
        params.push(("client_secret", secret));
    }
    request_token(http, token_url, &params).await
}

async fn request_token(
    http: &Client,
    token_url: &str,
    params: &[(&str, &str)],
) -> Result<TokenGrant, SocialError> {
    let response = http
        .post(token_url)
        .form(params)
        .send()
        .await
        .map_err(|err| SocialError::Network(err.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SocialError::Refresh(format!(
            "HTTP {status}: {}",
            snippet(&body)
        )));
    }

    let grant: TokenGrant = response
        .json()
        .await
        .map_err(|err| SocialError::Refresh(err.to_string()))?;
    if grant.access_token.trim().is_empty() {
        return Err(SocialError::Refresh("empty access_token in grant".into()));
    }
    Ok(grant)
}
