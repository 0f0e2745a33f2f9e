//! Mock HTTP server setup for integration tests

use gemini_web_core::client::CredentialedSessionBuilder;
use gemini_web_core::pipeline::RetryPolicy;
use gemini_web_core::{CredentialedSession, Credential};
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub const GENERATE_PATH: &str = r"^/_/BardChatUi/data/assistant\.lamda\.BardFrontendService/StreamGenerate";
pub const BATCH_PATH: &str = r"^/_/BardChatUi/data/batchexecute";

pub const LANDING_PAGE: &str = r#"<html><script>WIZ_global_data = {"cfb2h":"boq_test_bl","SNlM0e":"tok-123","FdrFJe":"-77"};</script></html>"#;

/// Test fixture that manages a mock server
pub struct MockServerFixture {
    pub server: Arc<Mutex<ServerGuard>>,
    pub base_url: String,
    pub cache_dir: PathBuf,
}

impl MockServerFixture {
    pub async fn new() -> Self {
        // RUST_LOG=gemini_web_core=debug shows the session's logs.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let server = Server::new_async().await;
        let base_url = server.url();
        Self {
            server: Arc::new(Mutex::new(server)),
            base_url,
            cache_dir: std::env::temp_dir().join(format!("gemini-it-{}", uuid::Uuid::new_v4())),
        }
    }

    /// Session pointed at the mock server, without background rotation and
    /// without retries so every failure surfaces on the first attempt.
    pub fn session(&self) -> CredentialedSession {
        self.session_with_retry(RetryPolicy::none())
    }

    pub fn session_with_retry(&self, retry: RetryPolicy) -> CredentialedSession {
        CredentialedSessionBuilder::new(Credential::new("psid-test", Some("psidts-test".into())))
            .account_id("acc-1")
            .base_url_override(&self.base_url)
            .cookie_cache_dir(self.cache_dir.clone())
            .timeout(Duration::from_secs(5))
            .auto_refresh(false)
            .retry(retry)
            .build()
            .unwrap()
    }

    /// Root probe plus a landing page carrying the access token.
    pub async fn mock_landing_page(&self, body: &str) -> Vec<Mock> {
        let mut server = self.server.lock().await;
        let root = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("set-cookie", "NID=extra; Path=/")
            .create_async()
            .await;
        let app = server
            .mock("GET", "/app")
            .match_header("cookie", Matcher::Regex("__Secure-1PSID=psid-test".to_string()))
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(body)
            .create_async()
            .await;
        vec![root, app]
    }

    /// Create a mock for a streamed generate response made of the given envelopes
    pub async fn mock_generate(&self, frames: &[Value]) -> Mock {
        let mut server = self.server.lock().await;
        server
            .mock("POST", Matcher::Regex(GENERATE_PATH.to_string()))
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("bl".into(), "boq_test_bl".into()),
                Matcher::UrlEncoded("f.sid".into(), "-77".into()),
                Matcher::UrlEncoded("rt".into(), "c".into()),
            ]))
            .match_body(Matcher::UrlEncoded("at".into(), "tok-123".into()))
            .with_status(200)
            .with_header("content-type", "application/x-protobuf")
            .with_body(wire(frames))
            .create_async()
            .await
    }

    /// Generate mock answering the n-th request with the n-th response (the
    /// last one repeats). Returns the form bodies it received, in order.
    pub async fn mock_generate_sequence(&self, responses: Vec<Vec<Value>>) -> (Mock, Arc<StdMutex<Vec<String>>>) {
        let bodies = Arc::new(StdMutex::new(Vec::<String>::new()));
        let seen = bodies.clone();
        let wires: Vec<String> = responses.iter().map(|frames| wire(frames)).collect();
        let mut server = self.server.lock().await;
        let mock = server
            .mock("POST", Matcher::Regex(GENERATE_PATH.to_string()))
            .with_status(200)
            .with_header("content-type", "application/x-protobuf")
            .with_body_from_request(move |request| {
                let mut seen = seen.lock().unwrap();
                seen.push(request.utf8_lossy_body().unwrap_or_default().into_owned());
                let index = (seen.len() - 1).min(wires.len() - 1);
                wires[index].clone().into_bytes()
            })
            .create_async()
            .await;
        (mock, bodies)
    }

    /// Create a mock for an error response
    pub async fn mock_error_response(&self, path: &str, status: u16) -> Mock {
        let mut server = self.server.lock().await;
        server
            .mock("POST", Matcher::Regex(path.to_string()))
            .with_status(usize::from(status))
            .with_body("")
            .create_async()
            .await
    }

    pub async fn mock_batch(&self, rpcid: &str, frames: &[Value]) -> Mock {
        let mut server = self.server.lock().await;
        server
            .mock("POST", Matcher::Regex(BATCH_PATH.to_string()))
            .match_query(Matcher::UrlEncoded("rpcids".into(), rpcid.into()))
            .with_status(200)
            .with_body(wire(frames))
            .create_async()
            .await
    }
}

impl Drop for MockServerFixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.cache_dir);
    }
}

/// Length-prefixed frames behind the anti-XSSI prefix.
pub fn wire(frames: &[Value]) -> String {
    let mut out = String::from(")]}'\n\n");
    for frame in frames {
        let text = frame.to_string();
        out.push_str(&format!("{}\n{}\n", text.encode_utf16().count() + 1, text));
    }
    out
}

/// A content envelope that opens a thread but carries no candidate yet.
pub fn busy_frame(thread: &str, reply: &str) -> Value {
    let inner = json!([null, [thread, reply], null, null, []]);
    json!([["wrb.fr", null, inner.to_string()]])
}

/// One frame holding a single content envelope.
pub fn content_frame(thread: &str, reply: &str, rcid: &str, text: &str, is_final: bool) -> Value {
    let mut candidate = vec![Value::Null; 9];
    candidate[0] = json!(rcid);
    candidate[1] = json!([text]);
    if is_final {
        candidate[8] = json!([2]);
    }
    let inner = json!([null, [thread, reply], null, null, [candidate]]);
    json!([["wrb.fr", null, inner.to_string()]])
}
