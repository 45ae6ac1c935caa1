use crate::http::snippet;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::Client;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("unable to read media file {path}: {message}")]
    Io { path: String, message: String },
    #[error("malformed data uri: {0}")]
    Malformed(String),
    #[error("media download failed: {0}")]
    Download(String),
}

/// Where a piece of media lives. Accepts local paths, `data:` URIs and
/// http(s) URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRef {
    Path(PathBuf),
    DataUri(String),
    Url(String),
}

#[derive(Debug, Clone)]
pub struct MediaBytes {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl MediaRef {
    pub fn parse(reference: &str) -> Self {
        let trimmed = reference.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("data:") {
            MediaRef::DataUri(trimmed.to_string())
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            MediaRef::Url(trimmed.to_string())
        } else {
            MediaRef::Path(PathBuf::from(trimmed))
        }
    }

    /// A URL a remote service can fetch itself, if there is one.
    pub fn public_url(&self) -> Option<&str> {
        match self {
            MediaRef::Url(url) => Some(url),
            _ => None,
        }
    }

    /// URL or `data:` URI suitable for inline image fields.
    pub async fn inline_url(&self) -> Result<String, MediaError> {
        match self {
            MediaRef::Url(url) | MediaRef::DataUri(url) => Ok(url.clone()),
            MediaRef::Path(path) => {
                let media = read_file(path).await?;
                Ok(format!(
                    "data:{};base64,{}",
                    media.mime,
                    BASE64.encode(&media.bytes)
                ))
            }
        }
    }

    pub async fn load(&self, http: &Client) -> Result<MediaBytes, MediaError> {
        match self {
            MediaRef::Path(path) => read_file(path).await,
            MediaRef::DataUri(uri) => decode_data_uri(uri),
            MediaRef::Url(url) => {
                let response = http
                    .get(url)
                    .send()
                    .await
                    .map_err(|err| MediaError::Download(err.to_string()))?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(MediaError::Download(format!(
                        "HTTP {status}: {}",
                        snippet(&body)
                    )));
                }
                let mime = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .unwrap_or_else(|| mime_for_path(Path::new(url)).to_string());
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|err| MediaError::Download(err.to_string()))?;
                Ok(MediaBytes {
                    mime,
                    bytes: bytes.to_vec(),
                })
            }
        }
    }
}

async fn read_file(path: &Path) -> Result<MediaBytes, MediaError> {
    let bytes = tokio::fs::read(path).await.map_err(|err| MediaError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    Ok(MediaBytes {
        mime: mime_for_path(path).to_string(),
        bytes,
    })
}

fn decode_data_uri(uri: &str) -> Result<MediaBytes, MediaError> {
    let rest = uri.get("data:".len()..).unwrap_or_default();
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| MediaError::Malformed("missing ',' separator".into()))?;
    let Some(mime) = header.strip_suffix(";base64") else {
        return Err(MediaError::Malformed("only base64 payloads are supported".into()));
    };
    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|err| MediaError::Malformed(err.to_string()))?;
    Ok(MediaBytes {
        mime: if mime.is_empty() {
            "application/octet-stream".to_string()
        } else {
            mime.to_string()
        },
        bytes,
    })
}

fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_classifies_references() {
        assert_eq!(
            MediaRef::parse(" https://cdn.example/p.png "),
            MediaRef::Url("https://cdn.example/p.png".into())
        );
        assert!(matches!(
            MediaRef::parse("data:image/png;base64,AAAA"),
            MediaRef::DataUri(_)
        ));
        assert_eq!(
            MediaRef::parse("uploads/p.jpg"),
            MediaRef::Path(PathBuf::from("uploads/p.jpg"))
        );
    }

    #[tokio::test]
    async fn data_uri_decodes_without_network() {
        let media = MediaRef::parse("data:image/png;base64,QUJD")
            .load(&Client::new())
            .await
            .unwrap();
        assert_eq!(media.mime, "image/png");
        assert_eq!(media.bytes, b"ABC");

        let err = MediaRef::parse("data:text/plain,hello")
            .load(&Client::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Malformed(_)));
    }

    #[tokio::test]
    async fn local_file_becomes_inline_data_uri() {
        let path = std::env::temp_dir().join(format!("catalyst-media-{}.jpg", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, b"jpegbytes").await.unwrap();

        let inline = MediaRef::Path(path.clone()).inline_url().await.unwrap();
        assert_eq!(inline, format!("data:image/jpeg;base64,{}", BASE64.encode(b"jpegbytes")));

        let _ = tokio::fs::remove_file(&path).await;
        let err = MediaRef::Path(path).inline_url().await.unwrap_err();
        assert!(matches!(err, MediaError::Io { .. }));
    }
}
