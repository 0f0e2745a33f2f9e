//! 会话池：多账号轮询、健康度跟踪与故障转移。
//!
//! Multi-account session pool.
//!
//! Requests go round-robin over accounts whose cooldown is not active; a
//! failed attempt moves on to the next account until each has been tried
//! once. An explicitly selected account gets no failover.

pub mod config;

pub use config::{AccountConfig, PoolConfig, PoolSettings};

use crate::client::{CredentialedSession, CredentialedSessionBuilder, GenerateRequest, SessionOptions};
use crate::resilience::AccountHealth;
use crate::transport::Credential;
use crate::types::ModelOutput;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What the pool needs from one account's session.
#[async_trait]
pub trait AccountSession: Send + Sync {
    async fn init(&self) -> Result<()>;

    async fn generate(&self, request: GenerateRequest) -> Result<ModelOutput>;

    async fn close(&self);

    fn is_running(&self) -> bool;
}

#[async_trait]
impl AccountSession for CredentialedSession {
    async fn init(&self) -> Result<()> {
        CredentialedSession::init(self).await
    }

    async fn generate(&self, request: GenerateRequest) -> Result<ModelOutput> {
        CredentialedSession::generate(self, request).await
    }

    async fn close(&self) {
        CredentialedSession::close(self, Duration::ZERO).await
    }

    fn is_running(&self) -> bool {
        CredentialedSession::is_running(self)
    }
}

/// Builds the session of one account.
pub type SessionFactory =
    Arc<dyn Fn(&AccountConfig) -> Result<Arc<dyn AccountSession>> + Send + Sync>;

/// Factory producing [`CredentialedSession`]s that share `options`, with
/// each account's own proxy.
pub fn credentialed_factory(options: SessionOptions) -> SessionFactory {
    Arc::new(move |account: &AccountConfig| -> Result<Arc<dyn AccountSession>> {
        let mut opts = options.clone();
        if account.proxy.is_some() {
            opts.proxy = account.proxy.clone();
        }
        let session = CredentialedSessionBuilder::new(account.credential.clone())
            .account_id(account.id.clone())
            .options(opts)
            .build()?;
        Ok(Arc::new(session) as Arc<dyn AccountSession>)
    })
}

struct AccountEntry {
    config: AccountConfig,
    session: Arc<dyn AccountSession>,
    health: AccountHealth,
    requests_served: u64,
    last_used: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

struct PoolState {
    accounts: Vec<AccountEntry>,
    cursor: usize,
}

impl PoolState {
    fn entry_mut(&mut self, id: &str) -> Option<&mut AccountEntry> {
        self.accounts.iter_mut().find(|a| a.config.id == id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountSnapshot {
    pub id: String,
    pub name: String,
    pub healthy: bool,
    pub running: bool,
    pub consecutive_failures: u32,
    pub cooldown_remaining_ms: Option<u64>,
    pub requests_served: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub accounts: Vec<AccountSnapshot>,
}

/// Sessions of several accounts behind one `execute` call.
pub struct SessionPool {
    settings: PoolSettings,
    factory: SessionFactory,
    /// Every read-modify-write of account state goes through this lock; it is
    /// never held while a request is in flight.
    state: Mutex<PoolState>,
}

impl SessionPool {
    /// Pool of [`CredentialedSession`]s with default session options.
    pub fn new(config: PoolConfig) -> Result<Self> {
        Self::with_options(config, SessionOptions::default())
    }

    pub fn with_options(config: PoolConfig, options: SessionOptions) -> Result<Self> {
        Self::with_factory(config, credentialed_factory(options))
    }

    pub fn with_factory(config: PoolConfig, factory: SessionFactory) -> Result<Self> {
        config.validate()?;
        let health = config.settings.health_config();
        let mut accounts = Vec::with_capacity(config.accounts.len());
        for account in config.accounts {
            let session = factory(&account)?;
            accounts.push(AccountEntry {
                config: account,
                session,
                health: AccountHealth::new(health),
                requests_served: 0,
                last_used: None,
                last_error: None,
            });
        }
        Ok(Self {
            settings: config.settings,
            factory,
            state: Mutex::new(PoolState {
                accounts,
                cursor: 0,
            }),
        })
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub async fn account_ids(&self) -> Vec<String> {
        let st = self.state.lock().await;
        st.accounts.iter().map(|a| a.config.id.clone()).collect()
    }

    pub async fn add_account(&self, config: AccountConfig) -> Result<()> {
        config.validate()?;
        let mut st = self.state.lock().await;
        if st.accounts.iter().any(|a| a.config.id == config.id) {
            return Err(Error::Validation(format!(
                "account '{}' already exists",
                config.id
            )));
        }
        let session = (self.factory)(&config)?;
        info!(account_id = %config.id, credential = %config.credential.redacted(), "account added");
        st.accounts.push(AccountEntry {
            config,
            session,
            health: AccountHealth::new(self.settings.health_config()),
            requests_served: 0,
            last_used: None,
            last_error: None,
        });
        Ok(())
    }

    /// Initialize every session concurrently. Accounts that fail are benched
    /// for the cooldown. Returns the number initialized.
    pub async fn init_all(&self) -> usize {
        let sessions: Vec<(String, Arc<dyn AccountSession>)> = {
            let st = self.state.lock().await;
            st.accounts
                .iter()
                .map(|a| (a.config.id.clone(), a.session.clone()))
                .collect()
        };
        let results = join_all(sessions.iter().map(|(_, s)| s.init())).await;

        let mut ok = 0;
        let mut st = self.state.lock().await;
        for ((id, _), result) in sessions.iter().zip(results) {
            let Some(entry) = st.entry_mut(id) else {
                continue;
            };
            match result {
                Ok(()) => {
                    ok += 1;
                    entry.health.reset();
                }
                Err(e) => {
                    warn!(account_id = %id, error = %e, "account failed to initialize");
                    entry.health.mark_unhealthy();
                    entry.last_error = Some(e.to_string());
                }
            }
        }
        info!(initialized = ok, total = sessions.len(), "pool initialized");
        ok
    }

    pub async fn close_all(&self) {
        let sessions: Vec<Arc<dyn AccountSession>> = {
            let st = self.state.lock().await;
            st.accounts.iter().map(|a| a.session.clone()).collect()
        };
        join_all(sessions.iter().map(|s| s.close())).await;
        debug!(count = sessions.len(), "pool closed");
    }

    /// Generate on the given account, or round-robin with failover.
    pub async fn execute(&self, request: GenerateRequest, account_id: Option<&str>) -> Result<ModelOutput> {
        match account_id {
            Some(id) => self.execute_on(request, id).await,
            None => self.execute_round_robin(request).await,
        }
    }

    async fn execute_on(&self, request: GenerateRequest, id: &str) -> Result<ModelOutput> {
        let session = {
            let mut st = self.state.lock().await;
            let unavailable = |reason: &str| Error::AccountUnavailable {
                account_id: id.to_string(),
                reason: reason.to_string(),
            };
            let entry = st.entry_mut(id).ok_or_else(|| unavailable("unknown account"))?;
            if !entry.health.check() {
                return Err(unavailable("account is cooling down"));
            }
            if !entry.session.is_running() {
                return Err(unavailable("session is not running"));
            }
            entry.session.clone()
        };
        let result = session.generate(request).await;
        self.record(id, &result).await;
        result.map_err(|e| e.with_account_id(id))
    }

    async fn execute_round_robin(&self, request: GenerateRequest) -> Result<ModelOutput> {
        let total = self.state.lock().await.accounts.len();
        if total == 0 {
            return Err(Error::configuration("session pool has no accounts").with_source("pool"));
        }

        let mut attempted = 0;
        let mut last_error = None;
        for _ in 0..total {
            let picked = {
                let mut st = self.state.lock().await;
                let len = st.accounts.len();
                if len == 0 {
                    break;
                }
                let idx = st.cursor % len;
                st.cursor = (idx + 1) % len;
                let entry = &mut st.accounts[idx];
                if entry.health.check() {
                    Some((entry.config.id.clone(), entry.session.clone()))
                } else {
                    debug!(account_id = %entry.config.id, "skipping account in cooldown");
                    None
                }
            };
            let Some((id, session)) = picked else {
                continue;
            };

            attempted += 1;
            let result = session.generate(request.clone()).await;
            self.record(&id, &result).await;
            match result {
                Ok(output) => return Ok(output),
                Err(e) => {
                    warn!(account_id = %id, error = %e, "account failed, trying next");
                    last_error = Some(e.with_account_id(id));
                }
            }
        }

        let last = last_error.unwrap_or_else(|| {
            Error::transient("no healthy account available").with_source("pool")
        });
        Err(Error::PoolExhausted {
            attempted,
            last: Box::new(last),
        })
    }

    async fn record(&self, id: &str, result: &Result<ModelOutput>) {
        let mut st = self.state.lock().await;
        let Some(entry) = st.entry_mut(id) else {
            return;
        };
        match result {
            Ok(_) => {
                entry.health.on_success();
                entry.requests_served += 1;
                entry.last_used = Some(Utc::now());
                entry.last_error = None;
            }
            Err(e) => {
                if entry.health.on_failure(e.triggers_cooldown()) {
                    warn!(
                        account_id = %id,
                        failures = entry.health.consecutive_failures(),
                        cooldown_secs = self.settings.unhealthy_cooldown_seconds,
                        "account marked unhealthy"
                    );
                }
                entry.last_error = Some(e.to_string());
            }
        }
    }

    /// Counts plus one snapshot per account. Elapsed cooldowns are cleared.
    pub async fn get_health_status(&self) -> HealthStatus {
        let mut st = self.state.lock().await;
        let accounts: Vec<AccountSnapshot> = st
            .accounts
            .iter_mut()
            .map(|a| {
                a.health.check();
                let h = a.health.snapshot();
                AccountSnapshot {
                    id: a.config.id.clone(),
                    name: a.config.display_name().to_string(),
                    healthy: h.healthy,
                    running: a.session.is_running(),
                    consecutive_failures: h.consecutive_failures,
                    cooldown_remaining_ms: h.cooldown_remaining_ms,
                    requests_served: a.requests_served,
                    last_used: a.last_used,
                    last_error: a.last_error.clone(),
                }
            })
            .collect();
        let healthy = accounts.iter().filter(|a| a.healthy).count();
        HealthStatus {
            total: accounts.len(),
            healthy,
            unhealthy: accounts.len() - healthy,
            accounts,
        }
    }

    /// Replace an account's session, optionally with a new credential.
    ///
    /// Returns `false` for an unknown id or when the new session fails to
    /// initialize; the account then keeps its old configuration.
    pub async fn reload_account(&self, id: &str, credential: Option<Credential>) -> bool {
        let (old, mut config) = {
            let st = self.state.lock().await;
            match st.accounts.iter().find(|a| a.config.id == id) {
                Some(a) => (a.session.clone(), a.config.clone()),
                None => return false,
            }
        };
        if let Some(credential) = credential {
            config.credential = credential;
        }

        old.close().await;
        let session = match (self.factory)(&config) {
            Ok(s) => s,
            Err(e) => {
                warn!(account_id = %id, error = %e, "failed to build session on reload");
                return false;
            }
        };
        if let Err(e) = session.init().await {
            warn!(account_id = %id, error = %e, "reloaded session failed to initialize");
            if let Some(entry) = self.state.lock().await.entry_mut(id) {
                entry.last_error = Some(e.to_string());
            }
            return false;
        }

        let mut st = self.state.lock().await;
        let Some(entry) = st.entry_mut(id) else {
            return false;
        };
        entry.config = config;
        entry.session = session;
        entry.health.reset();
        entry.last_error = None;
        info!(account_id = %id, credential = %entry.config.credential.redacted(), "account reloaded");
        true
    }
}
