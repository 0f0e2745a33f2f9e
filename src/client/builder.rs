use crate::client::auth::CredentialSource;
use crate::client::core::CredentialedSession;
use crate::client::rotate::default_cache_dir;
use crate::client::upload::{ContentPushUploader, FileUploader};
use crate::pipeline::RetryPolicy;
use crate::transport::{Credential, Endpoints, HttpTransport};
use crate::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle and transport knobs of one session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Connect timeout, per-call timeout, and per-chunk idle timeout while streaming
    pub timeout: Duration,
    /// Close the session after `close_delay` without requests
    pub auto_close: bool,
    pub close_delay: Duration,
    /// Rotate the secondary token in the background every `refresh_interval`
    pub auto_refresh: bool,
    pub refresh_interval: Duration,
    pub retry: RetryPolicy,
    pub proxy: Option<String>,
    pub endpoints: Endpoints,
    pub cookie_cache_dir: PathBuf,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::transport::http::DEFAULT_TIMEOUT_SECS),
            auto_close: false,
            close_delay: Duration::from_secs(300),
            auto_refresh: true,
            refresh_interval: Duration::from_secs(540),
            retry: RetryPolicy::default(),
            proxy: None,
            endpoints: Endpoints::default(),
            cookie_cache_dir: default_cache_dir(),
        }
    }
}

/// Builder for [`CredentialedSession`].
///
/// ```no_run
/// use gemini_web_core::client::CredentialedSessionBuilder;
/// use gemini_web_core::transport::Credential;
/// use std::time::Duration;
///
/// # async fn demo() -> gemini_web_core::Result<()> {
/// let session = CredentialedSessionBuilder::new(Credential::new("psid", Some("psidts".into())))
///     .auto_close(true)
///     .close_delay(Duration::from_secs(120))
///     .build()?;
/// session.init().await?;
/// # Ok(())
/// # }
/// ```
pub struct CredentialedSessionBuilder {
    credential: Credential,
    account_id: Option<String>,
    options: SessionOptions,
    uploader: Option<Arc<dyn FileUploader>>,
    source: Option<Arc<dyn CredentialSource>>,
}

impl CredentialedSessionBuilder {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential,
            account_id: None,
            options: SessionOptions::default(),
            uploader: None,
            source: None,
        }
    }

    /// Pool account this session belongs to; attached to its errors and logs.
    pub fn account_id(mut self, id: impl Into<String>) -> Self {
        self.account_id = Some(id.into());
        self
    }

    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = timeout;
        self
    }

    pub fn auto_close(mut self, enable: bool) -> Self {
        self.options.auto_close = enable;
        self
    }

    pub fn close_delay(mut self, delay: Duration) -> Self {
        self.options.close_delay = delay;
        self
    }

    pub fn auto_refresh(mut self, enable: bool) -> Self {
        self.options.auto_refresh = enable;
        self
    }

    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.options.refresh_interval = interval;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.options.retry = policy;
        self
    }

    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.options.proxy = Some(proxy.into());
        self
    }

    /// Point every endpoint at `base_url` (primarily for testing with mock servers).
    pub fn base_url_override(mut self, base_url: &str) -> Self {
        self.options.endpoints = Endpoints::with_base(base_url);
        self
    }

    pub fn cookie_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.cookie_cache_dir = dir.into();
        self
    }

    /// Replace the default content-push uploader.
    pub fn uploader(mut self, uploader: Arc<dyn FileUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Additional cookie sets probed during init.
    pub fn credential_source(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Build an idle session; nothing touches the network until `init`.
    pub fn build(self) -> Result<CredentialedSession> {
        let transport = HttpTransport::new(Some(self.options.timeout), self.options.proxy.as_deref())?;
        let uploader = self.uploader.unwrap_or_else(|| {
            Arc::new(ContentPushUploader::new(self.options.endpoints.upload.clone()))
        });
        Ok(CredentialedSession::from_parts(
            self.credential,
            self.account_id,
            self.options,
            transport,
            uploader,
            self.source,
        ))
    }
}
