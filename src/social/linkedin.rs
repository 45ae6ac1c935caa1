use super::auth::refresh_access_token;
use super::config::LinkedinSettings;
use super::credentials::{CredentialStore, Credentials};
use super::media::MediaRef;
use super::{
    Platform, PlatformPublisher, PublishRequest, PublishResult, SocialError, ascii_text,
    compose_text,
};
use crate::http::{build_client, snippet};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

const RESTLI_VERSION: &str = "2.0.0";
const UPLOAD_MECHANISM: &str = "com.linkedin.digitalmedia.uploading.MediaUploadHttpRequest";

pub struct LinkedinPublisher {
    http: Client,
    settings: LinkedinSettings,
    credentials: Arc<dyn CredentialStore>,
}

#[derive(Debug, Serialize)]
struct UgcPost {
    author: String,
    #[serde(rename = "lifecycleState")]
    lifecycle_state: &'static str,
    #[serde(rename = "specificContent")]
    specific_content: SpecificContent,
    visibility: Visibility,
}

#[derive(Debug, Serialize)]
struct SpecificContent {
    #[serde(rename = "com.linkedin.ugc.ShareContent")]
    share_content: ShareContent,
}

#[derive(Debug, Serialize)]
struct ShareContent {
    #[serde(rename = "shareCommentary")]
    share_commentary: Commentary,
    #[serde(rename = "shareMediaCategory")]
    share_media_category: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    media: Vec<ShareMedia>,
}

#[derive(Debug, Serialize)]
struct Commentary {
    text: String,
}

#[derive(Debug, Serialize)]
struct ShareMedia {
    status: &'static str,
    media: String,
}

#[derive(Debug, Serialize)]
struct Visibility {
    #[serde(rename = "com.linkedin.ugc.MemberNetworkVisibility")]
    visibility: &'static str,
}

/// Outcome of one POST to `ugcPosts`.
struct Attempt {
    status: StatusCode,
    post_id: Option<String>,
    body: String,
}

impl LinkedinPublisher {
    pub fn new(settings: LinkedinSettings, credentials: Arc<dyn CredentialStore>) -> Self {
        Self::with_client(build_client(), settings, credentials)
    }

    pub fn with_client(
        http: Client,
        settings: LinkedinSettings,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            http,
            settings,
            credentials,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.settings.api_root.trim_end_matches('/'))
    }

    async fn send(&self, token: &str, post: &UgcPost) -> Result<Attempt, SocialError> {
        let response = self
            .http
            .post(self.url("v2/ugcPosts"))
            .bearer_auth(token)
            .header("X-Restli-Protocol-Version", RESTLI_VERSION)
            .json(post)
            .send()
            .await
            .map_err(|err| SocialError::Network(err.to_string()))?;
        let status = response.status();
        let post_id = response
            .headers()
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        Ok(Attempt {
            status,
            post_id,
            body,
        })
    }

    /// Exchanges the stored refresh token and persists the new grant.
    async fn refresh(&self, credentials: &Credentials, refresh_token: &str) -> Result<String, SocialError> {
        let grant = refresh_access_token(
            &self.http,
            &self.settings.oauth_url,
            refresh_token,
            self.settings.client_id.as_deref(),
            self.settings.client_secret.as_deref(),
        )
        .await?;

        let updated = Credentials {
            access_token: Some(grant.access_token.clone()),
            refresh_token: grant
                .refresh_token
                .clone()
                .or_else(|| credentials.refresh_token.clone()),
        };
        if let Err(err) = self.credentials.persist(Platform::Linkedin, updated).await {
            warn!(target = "catalyst.social", error = %err, "linkedin_token_persist_failed");
        }
        Ok(grant.access_token)
    }

    /// Register, transfer, then hand back the asset URN.
    async fn upload_image(
        &self,
        token: &str,
        owner: &str,
        media: &MediaRef,
    ) -> Result<String, SocialError> {
        let payload = media
            .load(&self.http)
            .await
            .map_err(|err| SocialError::Upload(err.to_string()))?;

        let register = json!({
            "registerUploadRequest": {
                "recipes": ["urn:li:digitalmediaRecipe:feedshare-image"],
                "owner": owner,
                "serviceRelationships": [{
                    "relationshipType": "OWNER",
                    "identifier": "urn:li:userGeneratedContent"
                }]
            }
        });
        let response = self
            .http
            .post(self.url("v2/assets?action=registerUpload"))
            .bearer_auth(token)
            .header("X-Restli-Protocol-Version", RESTLI_VERSION)
            .json(&register)
            .send()
            .await
            .map_err(|err| SocialError::Upload(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SocialError::Upload(format!(
                "register HTTP {status}: {}",
                snippet(&body)
            )));
        }
        let registered: Value = response
            .json()
            .await
            .map_err(|err| SocialError::Upload(err.to_string()))?;
        let (upload_url, asset) = upload_target(&registered)
            .ok_or_else(|| SocialError::Upload("register response lacks upload url or asset".into()))?;

        let response = self
            .http
            .put(&upload_url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, payload.mime.as_str())
            .body(payload.bytes)
            .send()
            .await
            .map_err(|err| SocialError::Upload(err.to_string()))?;
        let status = response.status();
        if !(status == StatusCode::OK || status == StatusCode::CREATED) {
            let body = response.text().await.unwrap_or_default();
            return Err(SocialError::Upload(format!(
                "transfer HTTP {status}: {}",
                snippet(&body)
            )));
        }
        Ok(asset)
    }
}

/// Pulls `(uploadUrl, asset)` out of a registerUpload response. Falls back to
/// the first mechanism carrying an `uploadUrl`.
fn upload_target(registered: &Value) -> Option<(String, String)> {
    let value = registered.get("value")?;
    let asset = value.get("asset")?.as_str()?.to_string();
    let mechanisms = value.get("uploadMechanism")?.as_object()?;
    let url = mechanisms
        .get(UPLOAD_MECHANISM)
        .and_then(|m| m.get("uploadUrl"))
        .or_else(|| mechanisms.values().find_map(|m| m.get("uploadUrl")))?
        .as_str()?
        .to_string();
    Some((url, asset))
}

#[async_trait]
impl PlatformPublisher for LinkedinPublisher {
    fn platform(&self) -> Platform {
        Platform::Linkedin
    }

    async fn publish(&self, request: &PublishRequest) -> PublishResult {
        let platform = Platform::Linkedin;
        let credentials = self.credentials.get(platform).await;
        let Some(token) = credentials.access_token.clone() else {
            return PublishResult::error(platform, "LinkedIn token not configured");
        };
        let Some(author) = self.settings.author_urn() else {
            return PublishResult::error(platform, "LinkedIn organization id not configured");
        };

        let text = ascii_text(&compose_text(
            request.title.as_deref(),
            &request.body,
            &request.hashtags,
        ));

        let mut media = Vec::new();
        if let Some(reference) = request.media.as_deref() {
            match self
                .upload_image(&token, &author, &MediaRef::parse(reference))
                .await
            {
                Ok(asset) => media.push(ShareMedia {
                    status: "READY",
                    media: asset,
                }),
                Err(err) => warn!(
                    target = "catalyst.social",
                    error = %err,
                    "linkedin_media_upload_failed; posting text only"
                ),
            }
        }
        let media_attached = !media.is_empty();

        let post = UgcPost {
            author,
            lifecycle_state: "PUBLISHED",
            specific_content: SpecificContent {
                share_content: ShareContent {
                    share_commentary: Commentary { text },
                    share_media_category: if media_attached { "IMAGE" } else { "NONE" },
                    media,
                },
            },
            visibility: Visibility {
                visibility: "PUBLIC",
            },
        };

        let mut refresh_attempts = 0;
        let mut attempt = self.send(&token, &post).await;

        if let Ok(first) = &attempt
            && first.status == StatusCode::UNAUTHORIZED
        {
            let Some(refresh_token) = credentials.refresh_token.as_deref() else {
                let mut result = PublishResult::error(
                    platform,
                    "LinkedIn API error: 401 (access token expired and no refresh token is configured)",
                )
                .with_details(snippet(&first.body));
                result.media_attached = media_attached;
                return result;
            };

            refresh_attempts = 1;
            match self.refresh(&credentials, refresh_token).await {
                Ok(fresh) => {
                    debug!(target = "catalyst.social", "linkedin_token_refreshed; retrying post");
                    attempt = self.send(&fresh, &post).await;
                }
                Err(err) => {
                    warn!(target = "catalyst.social", error = %err, "linkedin_token_refresh_failed");
                }
            }
        }

        let mut result = match attempt {
            Err(err) => PublishResult::error(platform, format!("LinkedIn posting error: {err}")),
            Ok(done) if done.status == StatusCode::OK || done.status == StatusCode::CREATED => {
                PublishResult::success(
                    platform,
                    Some(done.post_id.unwrap_or_else(|| "unknown".into())),
                )
            }
            Ok(done) => PublishResult::error(
                platform,
                format!("LinkedIn API error: {}", done.status.as_u16()),
            )
            .with_details(snippet(&done.body)),
        };
        result.refresh_attempts = refresh_attempts;
        result.media_attached = media_attached;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::serve;
    use crate::social::PublishStatus;
    use crate::social::credentials::MemoryCredentialStore;
    use axum::{
        Json, Router,
        body::Bytes,
        extract::State,
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::{post, put},
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct Mock {
        posts: Arc<AtomicUsize>,
        refreshes: Arc<AtomicUsize>,
        uploads: Arc<AtomicUsize>,
        last_post: Arc<tokio::sync::Mutex<Option<Value>>>,
    }

    fn bearer(headers: &HeaderMap) -> String {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .trim_start_matches("Bearer ")
            .to_string()
    }

    async fn ugc(
        State(mock): State<Mock>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        mock.posts.fetch_add(1, Ordering::SeqCst);
        *mock.last_post.lock().await = Some(body);
        if bearer(&headers) == "fresh-token" || bearer(&headers) == "valid-token" {
            (
                StatusCode::CREATED,
                [("x-restli-id", "urn:li:share:777")],
                String::new(),
            )
                .into_response()
        } else {
            (StatusCode::UNAUTHORIZED, "{\"message\":\"Expired token\"}").into_response()
        }
    }

    async fn token(State(mock): State<Mock>) -> impl IntoResponse {
        mock.refreshes.fetch_add(1, Ordering::SeqCst);
        Json(json!({"access_token": "fresh-token", "expires_in": 5184000}))
    }

    async fn rejecting_token(State(mock): State<Mock>) -> impl IntoResponse {
        mock.refreshes.fetch_add(1, Ordering::SeqCst);
        (StatusCode::BAD_REQUEST, "{\"error\":\"invalid_grant\"}")
    }

    async fn stale_token(State(mock): State<Mock>) -> impl IntoResponse {
        mock.refreshes.fetch_add(1, Ordering::SeqCst);
        Json(json!({"access_token": "still-stale"}))
    }

    async fn register(headers: HeaderMap) -> impl IntoResponse {
        let host = headers
            .get("host")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Json(json!({
            "value": {
                "asset": "urn:li:digitalmediaAsset:C4D",
                "uploadMechanism": {
                    (UPLOAD_MECHANISM): {"uploadUrl": format!("http://{host}/upload/C4D")}
                }
            }
        }))
    }

    async fn upload(State(mock): State<Mock>, body: Bytes) -> impl IntoResponse {
        mock.uploads.fetch_add(1, Ordering::SeqCst);
        if body.is_empty() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::CREATED
        }
    }

    async fn failing_register() -> impl IntoResponse {
        (StatusCode::INTERNAL_SERVER_ERROR, "register down")
    }

    async fn mock_server(mock: Mock, refresh_ok: bool, upload_ok: bool) -> String {
        let router = Router::new().route("/v2/ugcPosts", post(ugc));
        let router = if refresh_ok {
            router.route("/oauth/token", post(token))
        } else {
            router.route("/oauth/token", post(rejecting_token))
        };
        let router = if upload_ok {
            router.route("/v2/assets", post(register))
        } else {
            router.route("/v2/assets", post(failing_register))
        };
        let router = router
            .route("/oauth/stale", post(stale_token))
            .route("/upload/C4D", put(upload))
            .with_state(mock);
        serve(router).await
    }

    fn settings(base: &str) -> LinkedinSettings {
        LinkedinSettings {
            api_root: base.to_string(),
            oauth_url: format!("{base}/oauth/token"),
            organization_id: Some("4242".into()),
            client_id: Some("cid".into()),
            client_secret: Some("secret".into()),
        }
    }

    fn store(access: &str, refresh: Option<&str>) -> Arc<MemoryCredentialStore> {
        Arc::new(MemoryCredentialStore::new().with(
            Platform::Linkedin,
            Credentials {
                access_token: Some(access.into()),
                refresh_token: refresh.map(str::to_string),
            },
        ))
    }

    fn request(media: Option<&str>) -> PublishRequest {
        PublishRequest {
            title: Some("Meet \u{201C}Trail\u{201D}".into()),
            body: "Built for mountains \u{1F3D4}".into(),
            hashtags: vec!["#trail".into(), "running".into()],
            media: media.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_once_and_retried() {
        let mock = Mock::default();
        let base = mock_server(mock.clone(), true, true).await;
        let credentials = store("expired-token", Some("refresh-1"));
        let publisher = LinkedinPublisher::new(settings(&base), credentials.clone());

        let result = publisher.publish(&request(None)).await;
        assert_eq!(result.status, PublishStatus::Success, "{result:?}");
        assert_eq!(result.post_id.as_deref(), Some("urn:li:share:777"));
        assert_eq!(result.refresh_attempts, 1);
        assert_eq!(mock.posts.load(Ordering::SeqCst), 2);
        assert_eq!(mock.refreshes.load(Ordering::SeqCst), 1);

        let stored = credentials.get(Platform::Linkedin).await;
        assert_eq!(stored.access_token.as_deref(), Some("fresh-token"));
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));

        let body = mock.last_post.lock().await.clone().unwrap();
        let text = body["specificContent"]["com.linkedin.ugc.ShareContent"]["shareCommentary"]
            ["text"]
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(text, "Meet \"Trail\"\n\nBuilt for mountains \n\n#trail #running");
        assert_eq!(body["author"], "urn:li:organization:4242");
    }

    #[tokio::test]
    async fn missing_refresh_token_surfaces_without_retry() {
        let mock = Mock::default();
        let base = mock_server(mock.clone(), true, true).await;
        let publisher = LinkedinPublisher::new(settings(&base), store("expired-token", None));

        let result = publisher.publish(&request(None)).await;
        assert_eq!(result.status, PublishStatus::Error);
        assert!(result.message.contains("no refresh token"));
        assert_eq!(result.refresh_attempts, 0);
        assert_eq!(mock.posts.load(Ordering::SeqCst), 1);
        assert_eq!(mock.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_refresh_surfaces_original_401() {
        let mock = Mock::default();
        let base = mock_server(mock.clone(), false, true).await;
        let publisher =
            LinkedinPublisher::new(settings(&base), store("expired-token", Some("revoked")));

        let result = publisher.publish(&request(None)).await;
        assert_eq!(result.status, PublishStatus::Error);
        assert_eq!(result.message, "LinkedIn API error: 401");
        assert!(result.details.as_deref().unwrap_or_default().contains("Expired token"));
        assert_eq!(result.refresh_attempts, 1);
        assert_eq!(mock.posts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_401_after_refresh_is_not_retried() {
        let mock = Mock::default();
        let base = mock_server(mock.clone(), true, true).await;
        let mut cfg = settings(&base);
        cfg.oauth_url = format!("{base}/oauth/stale");
        let publisher = LinkedinPublisher::new(cfg, store("expired-token", Some("refresh-1")));

        let result = publisher.publish(&request(None)).await;
        assert_eq!(result.status, PublishStatus::Error);
        assert_eq!(result.message, "LinkedIn API error: 401");
        assert_eq!(result.refresh_attempts, 1);
        assert_eq!(mock.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(mock.posts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn image_is_uploaded_and_referenced() {
        let mock = Mock::default();
        let base = mock_server(mock.clone(), true, true).await;
        let publisher = LinkedinPublisher::new(settings(&base), store("valid-token", None));

        let result = publisher
            .publish(&request(Some("data:image/jpeg;base64,/9j/4AAQ")))
            .await;
        assert!(result.is_success(), "{result:?}");
        assert!(result.media_attached);
        assert_eq!(mock.uploads.load(Ordering::SeqCst), 1);

        let body = mock.last_post.lock().await.clone().unwrap();
        let share = &body["specificContent"]["com.linkedin.ugc.ShareContent"];
        assert_eq!(share["shareMediaCategory"], "IMAGE");
        assert_eq!(share["media"][0]["media"], "urn:li:digitalmediaAsset:C4D");
    }

    #[tokio::test]
    async fn failed_upload_degrades_to_text_post() {
        let mock = Mock::default();
        let base = mock_server(mock.clone(), true, false).await;
        let publisher = LinkedinPublisher::new(settings(&base), store("valid-token", None));

        let result = publisher
            .publish(&request(Some("data:image/jpeg;base64,/9j/4AAQ")))
            .await;
        assert!(result.is_success());
        assert!(!result.media_attached);

        let body = mock.last_post.lock().await.clone().unwrap();
        let share = &body["specificContent"]["com.linkedin.ugc.ShareContent"];
        assert_eq!(share["shareMediaCategory"], "NONE");
        assert!(share.get("media").is_none());
    }

    #[tokio::test]
    async fn missing_configuration_skips_the_call() {
        let publisher = LinkedinPublisher::new(
            settings("http://127.0.0.1:9"),
            Arc::new(MemoryCredentialStore::new()),
        );
        let result = publisher.publish(&request(None)).await;
        assert_eq!(result.message, "LinkedIn token not configured");

        let mut cfg = settings("http://127.0.0.1:9");
        cfg.organization_id = None;
        let publisher = LinkedinPublisher::new(cfg, store("valid-token", None));
        let result = publisher.publish(&request(None)).await;
        assert!(result.message.contains("organization id"));
    }

    #[tokio::test]
    async fn network_failure_is_folded_into_result() {
        let publisher =
            LinkedinPublisher::new(settings("http://127.0.0.1:9"), store("valid-token", None));
        let result = publisher.publish(&request(None)).await;
        assert_eq!(result.status, PublishStatus::Error);
        assert!(result.message.starts_with("LinkedIn posting error"));
    }
}
