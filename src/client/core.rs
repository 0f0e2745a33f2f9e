use crate::client::auth::{acquire_access_token, AuthContext, CredentialSource, ProbeRequest};
use crate::client::builder::SessionOptions;
use crate::client::rotate::rotate_secondary;
use crate::client::upload::FileUploader;
use crate::constants::COOKIE_SECONDARY;
use crate::transport::{CookieSet, Credential, HttpTransport};
use crate::{Error, Result};
use arc_swap::ArcSwapOption;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle state of a [`CredentialedSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Initializing,
    Running,
    /// Terminal until the next `init`.
    Closed,
}

#[derive(Default)]
struct BackgroundTasks {
    idle_close: Option<JoinHandle<()>>,
    rotation: Option<CancellationToken>,
}

pub(crate) struct SessionInner {
    pub(crate) credential: Credential,
    pub(crate) account_id: Option<String>,
    pub(crate) options: SessionOptions,
    pub(crate) transport: HttpTransport,
    pub(crate) uploader: Arc<dyn FileUploader>,
    source: Option<Arc<dyn CredentialSource>>,
    state: Mutex<SessionState>,
    /// Held for writing by init, close and rotation; generate holds it for
    /// reading only while taking an auth snapshot.
    gate: RwLock<()>,
    auth: ArcSwapOption<AuthContext>,
    known_cookies: Mutex<Option<CookieSet>>,
    reqid: AtomicU64,
    tasks: Mutex<BackgroundTasks>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SessionInner {
    fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn set_state(&self, next: SessionState) -> SessionState {
        std::mem::replace(&mut *lock(&self.state), next)
    }

    pub(crate) fn tag(&self, err: Error) -> Error {
        match &self.account_id {
            Some(id) => err.with_account_id(id.clone()),
            None => err,
        }
    }

    /// Drop the channel and stop background work. The idle-close task passes
    /// `abort_idle = false` so it does not cancel itself.
    fn shutdown(&self, abort_idle: bool) {
        {
            let mut tasks = lock(&self.tasks);
            if let Some(token) = tasks.rotation.take() {
                token.cancel();
            }
            if let Some(handle) = tasks.idle_close.take() {
                if abort_idle {
                    handle.abort();
                }
            }
        }
        self.auth.store(None);
        let was = self.set_state(SessionState::Closed);
        if was != SessionState::Closed {
            info!(
                account_id = self.account_id.as_deref().unwrap_or("-"),
                credential = %self.credential.redacted(),
                "session closed"
            );
        }
    }

    /// One rotation round. `Ok(true)` when a new secondary token was stored.
    async fn rotate(&self) -> Result<bool> {
        let _gate = self.gate.write().await;
        let Some(auth) = self.auth.load_full() else {
            return Ok(false);
        };
        let rotated = rotate_secondary(
            &self.transport,
            &self.options.endpoints,
            &auth.cookies,
            &self.credential,
            &self.options.cookie_cache_dir,
        )
        .await
        .map_err(|e| self.tag(e))?;

        let Some(token) = rotated else {
            return Ok(false);
        };
        let mut next = (*auth).clone();
        next.cookies.insert(COOKIE_SECONDARY, token);
        *lock(&self.known_cookies) = Some(next.cookies.clone());
        self.auth.store(Some(Arc::new(next)));
        Ok(true)
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let tasks = lock(&self.tasks);
        if let Some(token) = &tasks.rotation {
            token.cancel();
        }
        if let Some(handle) = &tasks.idle_close {
            handle.abort();
        }
    }
}

async fn rotation_loop(inner: Weak<SessionInner>, token: CancellationToken, interval: Duration) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match inner.rotate().await {
            Ok(true) => debug!(credential = %inner.credential.redacted(), "secondary token refreshed"),
            Ok(false) => {}
            Err(e @ Error::Auth { .. }) => {
                // The next request re-initializes from scratch.
                warn!(error = %e, "credential rotation rejected, session marked for re-init");
                let _gate = inner.gate.write().await;
                inner.shutdown(true);
                break;
            }
            Err(e) => warn!(error = %e, "credential rotation failed, will retry next interval"),
        }
    }
}

/// One authenticated channel to the service.
///
/// Cloning is cheap and every clone drives the same session. Requests on a
/// session that is not running re-initialize it first.
#[derive(Clone)]
pub struct CredentialedSession {
    pub(crate) inner: Arc<SessionInner>,
}

impl fmt::Debug for CredentialedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialedSession")
            .field("account_id", &self.inner.account_id)
            .field("credential", &self.inner.credential)
            .field("state", &self.state())
            .finish()
    }
}

impl CredentialedSession {
    pub(crate) fn from_parts(
        credential: Credential,
        account_id: Option<String>,
        options: SessionOptions,
        transport: HttpTransport,
        uploader: Arc<dyn FileUploader>,
        source: Option<Arc<dyn CredentialSource>>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                credential,
                account_id,
                options,
                transport,
                uploader,
                source,
                state: Mutex::new(SessionState::Idle),
                gate: RwLock::new(()),
                auth: ArcSwapOption::empty(),
                known_cookies: Mutex::new(None),
                reqid: AtomicU64::new(initial_reqid()),
                tasks: Mutex::new(BackgroundTasks::default()),
            }),
        }
    }

    pub fn account_id(&self) -> Option<&str> {
        self.inner.account_id.as_deref()
    }

    pub fn credential(&self) -> &Credential {
        &self.inner.credential
    }

    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Acquire an access token and start background tasks.
    ///
    /// No-op on a running session. On failure the session is left `Closed`
    /// and the error is an `Auth` failure.
    pub async fn init(&self) -> Result<()> {
        let _gate = self.inner.gate.write().await;
        if self.is_running() {
            return Ok(());
        }
        self.inner.set_state(SessionState::Initializing);

        let previous = lock(&self.inner.known_cookies).clone();
        let probe = ProbeRequest {
            transport: &self.inner.transport,
            endpoints: &self.inner.options.endpoints,
            credential: &self.inner.credential,
            cache_dir: &self.inner.options.cookie_cache_dir,
            previous: previous.as_ref(),
            source: self.inner.source.as_deref(),
        };
        match acquire_access_token(probe).await {
            Ok(ctx) => {
                *lock(&self.inner.known_cookies) = Some(ctx.cookies.clone());
                self.inner.auth.store(Some(Arc::new(ctx)));
                self.inner.set_state(SessionState::Running);
                self.start_rotation();
                self.reset_idle_timer();
                info!(
                    account_id = self.account_id().unwrap_or("-"),
                    credential = %self.inner.credential.redacted(),
                    "session initialized"
                );
                Ok(())
            }
            Err(e) => {
                self.inner.set_state(SessionState::Closed);
                Err(self.inner.tag(e))
            }
        }
    }

    /// Re-initialize when not running.
    pub async fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        self.init().await
    }

    /// Close after `delay`, cancelling the idle-close and rotation tasks.
    /// Closing twice is harmless.
    pub async fn close(&self, delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let _gate = self.inner.gate.write().await;
        self.inner.shutdown(true);
    }

    /// Close immediately without waiting for in-progress init or rotation.
    pub(crate) fn close_now(&self) {
        self.inner.shutdown(true);
    }

    /// Rotate the secondary token now instead of waiting for the background task.
    pub async fn rotate_credentials(&self) -> Result<bool> {
        self.inner.rotate().await
    }

    /// Snapshot of the current auth state; re-initializes when needed.
    pub(crate) async fn auth_snapshot(&self) -> Result<Arc<AuthContext>> {
        self.ensure_running().await?;
        let _gate = self.inner.gate.read().await;
        self.inner.auth.load_full().ok_or_else(|| {
            self.inner
                .tag(Error::transient("session closed while preparing request").with_source("session"))
        })
    }

    pub(crate) fn next_reqid(&self) -> u64 {
        self.inner.reqid.fetch_add(100_000, Ordering::Relaxed)
    }

    /// Restart the idle-close countdown (no-op unless `auto_close`).
    pub(crate) fn reset_idle_timer(&self) {
        if !self.inner.options.auto_close {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.options.close_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                let _gate = inner.gate.write().await;
                debug!(idle_secs = delay.as_secs(), "closing idle session");
                inner.shutdown(false);
            }
        });
        if let Some(old) = lock(&self.inner.tasks).idle_close.replace(handle) {
            old.abort();
        }
    }

    fn start_rotation(&self) {
        if !self.inner.options.auto_refresh {
            return;
        }
        let token = CancellationToken::new();
        if let Some(old) = lock(&self.inner.tasks).rotation.replace(token.clone()) {
            old.cancel();
        }
        tokio::spawn(rotation_loop(
            Arc::downgrade(&self.inner),
            token,
            self.inner.options.refresh_interval,
        ));
    }
}

/// Random five-digit starting request id.
fn initial_reqid() -> u64 {
    let n = uuid::Uuid::new_v4().as_u128();
    10_000 + (n % 90_000) as u64
}
