use async_trait::async_trait;
use gemini_web_core::client::GenerateRequest;
use gemini_web_core::pool::{AccountConfig, AccountSession, PoolConfig, PoolSettings, SessionFactory, SessionPool};
use gemini_web_core::types::{Candidate, ModelOutput};
use gemini_web_core::{Credential, Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Per-account behavior shared by every mock session the factory builds.
#[derive(Default)]
struct Control {
    calls: HashMap<String, usize>,
    builds: HashMap<String, usize>,
    failures: HashMap<String, fn() -> Error>,
    init_failures: Vec<String>,
}

type Shared = Arc<Mutex<Control>>;

struct MockSession {
    id: String,
    control: Shared,
    running: AtomicBool,
}

#[async_trait]
impl AccountSession for MockSession {
    async fn init(&self) -> Result<()> {
        if self.control.lock().unwrap().init_failures.contains(&self.id) {
            return Err(Error::auth("token probe failed"));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn generate(&self, _request: GenerateRequest) -> Result<ModelOutput> {
        let failure = {
            let mut ctl = self.control.lock().unwrap();
            *ctl.calls.entry(self.id.clone()).or_default() += 1;
            ctl.failures.get(&self.id).copied()
        };
        match failure {
            Some(make) => Err(make()),
            None => Ok(ModelOutput {
                candidates: vec![Candidate::new("rc_1", format!("from {}", self.id))],
                ..ModelOutput::default()
            }),
        }
    }

    async fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn rate_limited() -> Error {
    Error::rate_limited("usage limit exceeded")
}

fn transient() -> Error {
    Error::transient("temporary error")
}

fn config(ids: &[&str]) -> PoolConfig {
    PoolConfig {
        settings: PoolSettings::default(),
        accounts: ids
            .iter()
            .map(|id| AccountConfig::new(*id, Credential::new(format!("psid-{}", id), None)))
            .collect(),
    }
}

fn pool(ids: &[&str]) -> (SessionPool, Shared) {
    let control: Shared = Arc::new(Mutex::new(Control::default()));
    let shared = control.clone();
    let factory: SessionFactory = Arc::new(move |account: &AccountConfig| -> Result<Arc<dyn AccountSession>> {
        *shared
            .lock()
            .unwrap()
            .builds
            .entry(account.id.clone())
            .or_default() += 1;
        Ok(Arc::new(MockSession {
            id: account.id.clone(),
            control: shared.clone(),
            running: AtomicBool::new(false),
        }))
    });
    (SessionPool::with_factory(config(ids), factory).unwrap(), control)
}

fn calls(control: &Shared, id: &str) -> usize {
    control.lock().unwrap().calls.get(id).copied().unwrap_or(0)
}

#[tokio::test]
async fn test_round_robin_visits_each_account() {
    let (pool, control) = pool(&["a", "b", "c"]);
    assert_eq!(pool.init_all().await, 3);

    let mut texts = Vec::new();
    for _ in 0..3 {
        let out = pool.execute(GenerateRequest::new("hi"), None).await.unwrap();
        texts.push(out.text().to_string());
    }
    assert_eq!(texts, vec!["from a", "from b", "from c"]);
    for id in ["a", "b", "c"] {
        assert_eq!(calls(&control, id), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_account_is_benched_until_cooldown() {
    let (pool, control) = pool(&["a", "b", "c"]);
    pool.init_all().await;
    control
        .lock()
        .unwrap()
        .failures
        .insert("b".to_string(), rate_limited);

    for _ in 0..6 {
        pool.execute(GenerateRequest::new("hi"), None).await.unwrap();
    }
    assert_eq!(calls(&control, "b"), 3);

    for _ in 0..6 {
        pool.execute(GenerateRequest::new("hi"), None).await.unwrap();
    }
    assert_eq!(calls(&control, "b"), 3, "benched account must be skipped");

    let status = pool.get_health_status().await;
    assert_eq!((status.total, status.healthy, status.unhealthy), (3, 2, 1));
    let b = status.accounts.iter().find(|a| a.id == "b").unwrap();
    assert!(!b.healthy);
    assert_eq!(b.consecutive_failures, 3);
    assert!(b.cooldown_remaining_ms.is_some());
    assert!(b.last_error.is_some());
    let a = status.accounts.iter().find(|a| a.id == "a").unwrap();
    assert!(a.requests_served >= 4);
    assert!(a.last_used.is_some());

    tokio::time::advance(Duration::from_secs(301)).await;
    for _ in 0..3 {
        pool.execute(GenerateRequest::new("hi"), None).await.unwrap();
    }
    assert_eq!(calls(&control, "b"), 4);
    assert_eq!(pool.get_health_status().await.healthy, 3);
}

#[tokio::test]
async fn test_transient_failures_do_not_bench() {
    let (pool, control) = pool(&["a", "b"]);
    pool.init_all().await;
    control.lock().unwrap().failures.insert("a".to_string(), transient);

    for _ in 0..8 {
        let out = pool.execute(GenerateRequest::new("hi"), None).await.unwrap();
        assert_eq!(out.text(), "from b");
    }
    let status = pool.get_health_status().await;
    assert_eq!(status.healthy, 2);
    let a = status.accounts.iter().find(|a| a.id == "a").unwrap();
    assert!(a.consecutive_failures >= 3);
}

#[tokio::test]
async fn test_all_accounts_failing_exhausts_pool() {
    let (pool, control) = pool(&["a", "b", "c"]);
    pool.init_all().await;
    {
        let mut ctl = control.lock().unwrap();
        for id in ["a", "b", "c"] {
            ctl.failures.insert(id.to_string(), rate_limited);
        }
    }

    let err = pool.execute(GenerateRequest::new("hi"), None).await.unwrap_err();
    match err {
        Error::PoolExhausted { attempted, last } => {
            assert_eq!(attempted, 3);
            assert!(matches!(*last, Error::RateLimitExceeded { .. }));
        }
        other => panic!("expected PoolExhausted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_explicit_account_has_no_failover() {
    let (pool, control) = pool(&["a", "b"]);
    pool.init_all().await;

    let out = pool.execute(GenerateRequest::new("hi"), Some("b")).await.unwrap();
    assert_eq!(out.text(), "from b");

    let unknown = pool.execute(GenerateRequest::new("hi"), Some("zzz")).await;
    assert!(matches!(unknown, Err(Error::AccountUnavailable { .. })));

    control.lock().unwrap().failures.insert("b".to_string(), rate_limited);
    for _ in 0..3 {
        let err = pool.execute(GenerateRequest::new("hi"), Some("b")).await.unwrap_err();
        assert!(matches!(err, Error::RateLimitExceeded { .. }));
    }
    assert_eq!(calls(&control, "a"), 0);

    match pool.execute(GenerateRequest::new("hi"), Some("b")).await {
        Err(Error::AccountUnavailable { account_id, reason }) => {
            assert_eq!(account_id, "b");
            assert!(reason.contains("cooling down"));
        }
        other => panic!("expected AccountUnavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_explicit_account_must_be_running() {
    let (pool, control) = pool(&["a", "b"]);
    control.lock().unwrap().init_failures.push("b".to_string());
    assert_eq!(pool.init_all().await, 1);

    // A failed init benches the account; explicit selection reports it.
    let err = pool.execute(GenerateRequest::new("hi"), Some("b")).await.unwrap_err();
    assert!(matches!(err, Error::AccountUnavailable { .. }));

    pool.close_all().await;
    match pool.execute(GenerateRequest::new("hi"), Some("a")).await {
        Err(Error::AccountUnavailable { reason, .. }) => assert!(reason.contains("not running")),
        other => panic!("expected AccountUnavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_reload_account() {
    let (pool, control) = pool(&["a"]);
    pool.init_all().await;

    assert!(!pool.reload_account("zzz", None).await);
    assert!(pool
        .reload_account("a", Some(Credential::new("psid-new", None)))
        .await);
    assert_eq!(control.lock().unwrap().builds.get("a"), Some(&2));
    assert!(pool.execute(GenerateRequest::new("hi"), Some("a")).await.is_ok());

    control.lock().unwrap().init_failures.push("a".to_string());
    assert!(!pool.reload_account("a", None).await);
    let status = pool.get_health_status().await;
    assert!(status.accounts[0].last_error.is_some());
}

#[tokio::test]
async fn test_empty_pool_is_a_configuration_error() {
    let (pool, _) = pool(&[]);
    let err = pool.execute(GenerateRequest::new("hi"), None).await.unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
}

#[tokio::test]
async fn test_add_account_rejects_duplicates() {
    let (pool, _) = pool(&["a"]);
    let dup = AccountConfig::new("a", Credential::new("psid-x", None));
    assert!(matches!(pool.add_account(dup).await, Err(Error::Validation(_))));

    pool.add_account(AccountConfig::new("b", Credential::new("psid-b", None)))
        .await
        .unwrap();
    assert_eq!(pool.account_ids().await, vec!["a", "b"]);
}
