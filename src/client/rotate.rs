//! Secondary-token rotation and its on-disk cache.
//!
//! The cache holds the last rotated secondary token per primary credential,
//! keyed by the credential fingerprint, so a restart can reuse it and calls
//! within [`ROTATION_MIN_INTERVAL`] skip the network.

use crate::constants::{COOKIE_SECONDARY, ROTATE_COOKIES_BODY};
use crate::transport::cookies::find_set_cookie;
use crate::transport::{CookieSet, Credential, Endpoints, HttpTransport};
use crate::{Error, Result};
use reqwest::Method;
use std::env;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;

pub const ROTATION_MIN_INTERVAL: Duration = Duration::from_secs(60);

/// `GEMINI_COOKIE_PATH`, or a `gemini_webapi` directory under the system temp dir.
pub fn default_cache_dir() -> PathBuf {
    env::var("GEMINI_COOKIE_PATH")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| env::temp_dir().join("gemini_webapi"))
}

pub fn cache_path(dir: &Path, credential: &Credential) -> PathBuf {
    dir.join(format!(".cached_1psidts_{}.txt", credential.fingerprint()))
}

/// Cached secondary token for `credential`, if any.
pub async fn read_cached_secondary(dir: &Path, credential: &Credential) -> Option<String> {
    let text = tokio::fs::read_to_string(cache_path(dir, credential)).await.ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

async fn cache_is_fresh(path: &Path) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    meta.modified()
        .ok()
        .and_then(|m| SystemTime::now().duration_since(m).ok())
        .map(|age| age < ROTATION_MIN_INTERVAL)
        .unwrap_or(false)
}

/// Ask the service for a fresh secondary token.
///
/// Returns `Ok(None)` when the cache was refreshed less than a minute ago or
/// the response carried no new token. A 401 means the primary credential is
/// no longer valid.
pub async fn rotate_secondary(
    transport: &HttpTransport,
    endpoints: &Endpoints,
    cookies: &CookieSet,
    credential: &Credential,
    cache_dir: &Path,
) -> Result<Option<String>> {
    let path = cache_path(cache_dir, credential);
    if cache_is_fresh(&path).await {
        debug!(credential = %credential.redacted(), "rotation skipped, cache is fresh");
        return Ok(None);
    }

    let req = transport
        .request(Method::POST, &endpoints.rotate_cookies, cookies, false)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(ROTATE_COOKIES_BODY);
    let resp = transport.send(req).await?;
    let status = resp.status();
    if status.as_u16() == 401 {
        return Err(Error::auth("secondary token rotation was rejected")
            .with_status_code(401)
            .with_source("cookie_rotation"));
    }
    if !status.is_success() {
        return Err(Error::from_status(status.as_u16(), "cookie rotation")
            .with_source("cookie_rotation"));
    }

    let Some(token) = find_set_cookie(resp.headers(), COOKIE_SECONDARY) else {
        return Ok(None);
    };
    tokio::fs::create_dir_all(cache_dir).await?;
    tokio::fs::write(&path, &token).await?;
    debug!(credential = %credential.redacted(), "secondary token rotated");
    Ok(Some(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        env::temp_dir().join(format!("gemini-rotate-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_rotation_writes_cache_then_skips() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/RotateCookies")
            .match_body(ROTATE_COOKIES_BODY)
            .with_header("set-cookie", "__Secure-1PSIDTS=fresh; Path=/; Secure")
            .expect(1)
            .create_async()
            .await;

        let dir = scratch_dir();
        let endpoints = Endpoints::with_base(&server.url());
        let transport = HttpTransport::new(Some(Duration::from_secs(5)), None).unwrap();
        let cred = Credential::new("psid", Some("old".into()));
        let cookies = CookieSet::from_credential(&cred);

        let first = rotate_secondary(&transport, &endpoints, &cookies, &cred, &dir)
            .await
            .unwrap();
        assert_eq!(first.as_deref(), Some("fresh"));
        assert_eq!(read_cached_secondary(&dir, &cred).await.as_deref(), Some("fresh"));

        let second = rotate_secondary(&transport, &endpoints, &cookies, &cred, &dir)
            .await
            .unwrap();
        assert!(second.is_none());
        mock.assert_async().await;
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_rotation_401_is_auth_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/RotateCookies")
            .with_status(401)
            .create_async()
            .await;

        let endpoints = Endpoints::with_base(&server.url());
        let transport = HttpTransport::new(Some(Duration::from_secs(5)), None).unwrap();
        let cred = Credential::new("psid-401", None);
        let err = rotate_secondary(
            &transport,
            &endpoints,
            &CookieSet::from_credential(&cred),
            &cred,
            &scratch_dir(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Auth { .. }));
    }

    #[test]
    fn test_cache_path_hides_credential() {
        let cred = Credential::new("very-secret-psid", None);
        let path = cache_path(Path::new("/tmp/x"), &cred);
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(".cached_1psidts_"));
        assert!(!name.contains("very-secret-psid"));
    }
}
