use crate::constants::UPLOAD_PUSH_ID;
use crate::transport::{CookieSet, HttpTransport};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use std::path::PathBuf;
use tracing::debug;

/// A file attached to a prompt.
#[derive(Debug, Clone)]
pub enum FileInput {
    Path(PathBuf),
    Bytes { name: String, data: Bytes },
}

impl FileInput {
    pub fn bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        FileInput::Bytes {
            name: name.into(),
            data: data.into(),
        }
    }

    /// File name sent alongside the upload.
    pub fn file_name(&self) -> String {
        match self {
            FileInput::Path(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string()),
            FileInput::Bytes { name, .. } if !name.is_empty() => name.clone(),
            FileInput::Bytes { .. } => format!("input_{}.txt", uuid::Uuid::new_v4().simple()),
        }
    }

    pub async fn read(&self) -> Result<Bytes> {
        match self {
            FileInput::Path(p) => Ok(Bytes::from(tokio::fs::read(p).await?)),
            FileInput::Bytes { data, .. } => Ok(data.clone()),
        }
    }
}

impl From<PathBuf> for FileInput {
    fn from(p: PathBuf) -> Self {
        FileInput::Path(p)
    }
}

impl From<&str> for FileInput {
    fn from(p: &str) -> Self {
        FileInput::Path(PathBuf::from(p))
    }
}

/// Service-side reference to an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub id: String,
    pub name: String,
}

/// Where attachments go before a generate request references them.
#[async_trait]
pub trait FileUploader: Send + Sync {
    async fn upload(
        &self,
        transport: &HttpTransport,
        cookies: &CookieSet,
        file: &FileInput,
    ) -> Result<UploadedFile>;
}

/// Multipart upload to the content-push endpoint.
#[derive(Debug, Clone)]
pub struct ContentPushUploader {
    url: String,
}

impl ContentPushUploader {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl FileUploader for ContentPushUploader {
    async fn upload(
        &self,
        transport: &HttpTransport,
        cookies: &CookieSet,
        file: &FileInput,
    ) -> Result<UploadedFile> {
        let name = file.file_name();
        let data = file.read().await?;
        let size = data.len();
        let form = Form::new().part("file", Part::bytes(data.to_vec()).file_name(name.clone()));

        let req = transport
            .request(Method::POST, &self.url, cookies, false)
            .header(UPLOAD_PUSH_ID.0, UPLOAD_PUSH_ID.1)
            .multipart(form);
        let resp = transport.send(req).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::from_status(status.as_u16(), "file upload").with_source("upload"));
        }
        let id = resp.text().await?.trim().to_string();
        if id.is_empty() {
            return Err(Error::protocol("upload returned an empty file id").with_source("upload"));
        }
        debug!(file = %name, bytes = size, "file uploaded");
        Ok(UploadedFile { id, name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_file_names() {
        assert_eq!(FileInput::from("/tmp/a/cat.png").file_name(), "cat.png");
        assert_eq!(FileInput::bytes("notes.md", "x").file_name(), "notes.md");
        assert!(FileInput::bytes("", "x").file_name().starts_with("input_"));
    }

    #[tokio::test]
    async fn test_upload_returns_file_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/upload")
            .match_header("push-id", "feeds/mcudyrk2a4khkz")
            .with_body("/contrib_service/ttl_1d/abc\n")
            .create_async()
            .await;

        let transport = HttpTransport::new(Some(Duration::from_secs(5)), None).unwrap();
        let uploader = ContentPushUploader::new(format!("{}/upload", server.url()));
        let out = uploader
            .upload(&transport, &CookieSet::new(), &FileInput::bytes("a.txt", "hello"))
            .await
            .unwrap();
        assert_eq!(out.id, "/contrib_service/ttl_1d/abc");
        assert_eq!(out.name, "a.txt");
        mock.assert_async().await;
    }
}
