use crate::constants::{
    ENDPOINT_BATCH_EXEC, ENDPOINT_GENERATE, ENDPOINT_GOOGLE, ENDPOINT_INIT,
    ENDPOINT_ROTATE_COOKIES, ENDPOINT_UPLOAD, USER_AGENT,
};
use crate::transport::cookies::CookieSet;
use crate::{BoxStream, Error, Result};
use bytes::Bytes;
use futures::{stream, StreamExt};
use reqwest::header::COOKIE;
use reqwest::{Method, Proxy};
use std::env;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// URLs of every service endpoint, overridable as a whole for mock servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub google: String,
    pub init: String,
    pub generate: String,
    pub rotate_cookies: String,
    pub upload: String,
    pub batch_exec: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            google: ENDPOINT_GOOGLE.to_string(),
            init: ENDPOINT_INIT.to_string(),
            generate: ENDPOINT_GENERATE.to_string(),
            rotate_cookies: ENDPOINT_ROTATE_COOKIES.to_string(),
            upload: ENDPOINT_UPLOAD.to_string(),
            batch_exec: ENDPOINT_BATCH_EXEC.to_string(),
        }
    }
}

impl Endpoints {
    /// Every endpoint under one base URL, keeping the real paths.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            google: format!("{}/", base),
            init: format!("{}/app", base),
            generate: format!(
                "{}/_/BardChatUi/data/assistant.lamda.BardFrontendService/StreamGenerate",
                base
            ),
            rotate_cookies: format!("{}/RotateCookies", base),
            upload: format!("{}/upload", base),
            batch_exec: format!("{}/_/BardChatUi/data/batchexecute", base),
        }
    }
}

/// Thin wrapper over `reqwest::Client` with per-call cookies.
///
/// `timeout` bounds connecting and every non-streaming call; streaming reads
/// are bounded per chunk instead, so long generations are not cut off.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a transport. Explicit arguments win over the env overrides
    /// `GEMINI_HTTP_TIMEOUT_SECS` and `GEMINI_PROXY_URL`.
    pub fn new(timeout: Option<Duration>, proxy: Option<&str>) -> Result<Self> {
        let timeout = timeout.unwrap_or_else(|| {
            Duration::from_secs(
                env::var("GEMINI_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            )
        });

        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .http2_adaptive_window(true);

        match proxy {
            Some(url) => {
                let proxy = Proxy::all(url).map_err(|e| {
                    Error::configuration(format!("invalid proxy url: {}", e))
                        .with_source("http_transport")
                })?;
                builder = builder.proxy(proxy);
            }
            None => {
                if let Ok(proxy_url) = env::var("GEMINI_PROXY_URL") {
                    if let Ok(proxy) = Proxy::all(&proxy_url) {
                        builder = builder.proxy(proxy);
                    }
                }
            }
        }

        let client = builder.build()?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Request builder carrying `cookies`. Set `streaming` for calls whose body
    /// is consumed through [`byte_stream`](Self::byte_stream).
    pub fn request(
        &self,
        method: Method,
        url: &str,
        cookies: &CookieSet,
        streaming: bool,
    ) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, url);
        if !streaming {
            req = req.timeout(self.timeout);
        }
        if !cookies.is_empty() {
            req = req.header(COOKIE, cookies.header_value());
        }
        req
    }

    pub async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        req.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::transient(format!("request timed out: {}", e)).with_source("http_transport")
            } else {
                Error::Transport(e)
            }
        })
    }

    /// Response body as a byte stream; waiting longer than the transport
    /// timeout for the next chunk ends the stream with a transient error.
    pub fn byte_stream(&self, resp: reqwest::Response) -> BoxStream<'static, Bytes> {
        let idle = self.timeout;
        let body = resp.bytes_stream();
        let stream = stream::unfold(Some(Box::pin(body)), move |state| async move {
            let mut body = state?;
            match tokio::time::timeout(idle, body.next()).await {
                Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(body))),
                Ok(Some(Err(e))) => Some((Err(Error::Transport(e)), None)),
                Ok(None) => None,
                Err(_) => Some((
                    Err(Error::transient(format!(
                        "no response data for {}s",
                        idle.as_secs()
                    ))
                    .with_source("http_transport")),
                    None,
                )),
            }
        });
        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_with_base() {
        let e = Endpoints::with_base("http://127.0.0.1:1234/");
        assert_eq!(e.init, "http://127.0.0.1:1234/app");
        assert!(e.generate.ends_with("/StreamGenerate"));
        assert_eq!(e.rotate_cookies, "http://127.0.0.1:1234/RotateCookies");
    }

    #[test]
    fn test_invalid_proxy_is_configuration_error() {
        let err = HttpTransport::new(Some(Duration::from_secs(1)), Some("::not a url::")).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_request_sends_cookie_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/app")
            .match_header("cookie", "__Secure-1PSID=abc")
            .with_body("ok")
            .create_async()
            .await;

        let transport = HttpTransport::new(Some(Duration::from_secs(5)), None).unwrap();
        let mut cookies = CookieSet::new();
        cookies.insert("__Secure-1PSID", "abc");
        let url = format!("{}/app", server.url());
        let resp = transport
            .send(transport.request(Method::GET, &url, &cookies, false))
            .await
            .unwrap();
        assert_eq!(resp.text().await.unwrap(), "ok");
        mock.assert_async().await;
    }
}
