//! Access-token acquisition.
//!
//! The landing page embeds the per-session access token plus the build label
//! and session id that later requests echo back. Every available cookie set is
//! probed concurrently and the first page that yields a token wins.

use crate::client::rotate;
use crate::constants::{gemini_headers, COOKIE_PRIMARY, COOKIE_SECONDARY};
use crate::transport::{CookieSet, Credential, Endpoints, HttpTransport};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::future::{select_ok, BoxFuture};
use futures::FutureExt;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Method;
use std::path::Path;
use tracing::{debug, info, warn};

static ACCESS_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""SNlM0e":\s*"(.*?)""#).expect("access token regex must compile"));
static BUILD_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""cfb2h":\s*"(.*?)""#).expect("build label regex must compile"));
static SESSION_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""FdrFJe":\s*"(.*?)""#).expect("session id regex must compile"));

/// Everything a running session needs to issue requests.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub access_token: String,
    /// `bl` query parameter
    pub build_label: Option<String>,
    /// `f.sid` query parameter
    pub session_id: Option<String>,
    /// Cookies of the probe that succeeded, including any the server set.
    pub cookies: CookieSet,
}

/// Extra cookie sets to try during init, e.g. cookies exported from a browser.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self) -> Result<Vec<CookieSet>>;
}

/// Token fields found in a landing page body.
pub fn parse_landing_page(body: &str) -> Option<(String, Option<String>, Option<String>)> {
    let capture = |re: &Regex| {
        re.captures(body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    };
    let token = capture(&ACCESS_TOKEN)?;
    Some((token, capture(&BUILD_LABEL), capture(&SESSION_ID)))
}

/// Inputs of one token probe round.
pub(crate) struct ProbeRequest<'a> {
    pub transport: &'a HttpTransport,
    pub endpoints: &'a Endpoints,
    pub credential: &'a Credential,
    pub cache_dir: &'a Path,
    /// Cookies that worked for an earlier init of the same session.
    pub previous: Option<&'a CookieSet>,
    pub source: Option<&'a dyn CredentialSource>,
}

async fn collect_extra_cookies(transport: &HttpTransport, endpoints: &Endpoints) -> CookieSet {
    let mut extra = CookieSet::new();
    let req = transport.request(Method::GET, &endpoints.google, &CookieSet::new(), false);
    match transport.send(req).await {
        Ok(resp) if resp.status().is_success() => {
            extra.absorb_set_cookie(resp.headers());
        }
        Ok(resp) => debug!(status = resp.status().as_u16(), "root domain probe returned no cookies"),
        Err(e) => debug!(error = %e, "root domain probe failed"),
    }
    extra
}

async fn probe(
    transport: HttpTransport,
    url: String,
    label: String,
    mut cookies: CookieSet,
) -> Result<AuthContext> {
    let mut req = transport.request(Method::GET, &url, &cookies, false);
    for (k, v) in gemini_headers() {
        req = req.header(k, v);
    }
    let resp = transport.send(req).await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::from_status(status.as_u16(), "token probe").with_details(label));
    }
    cookies.absorb_set_cookie(resp.headers());
    let body = resp.text().await?;
    let (access_token, build_label, session_id) = parse_landing_page(&body).ok_or_else(|| {
        Error::auth("access token not found in landing page")
            .with_source("session_init")
            .with_details(label.clone())
    })?;
    debug!(source = %label, "token probe succeeded");
    Ok(AuthContext {
        access_token,
        build_label,
        session_id,
        cookies,
    })
}

/// Probe every credential source concurrently; the first token wins.
pub(crate) async fn acquire_access_token(req: ProbeRequest<'_>) -> Result<AuthContext> {
    let extra = collect_extra_cookies(req.transport, req.endpoints).await;

    let mut candidates: Vec<(String, CookieSet)> = Vec::new();
    let with_extra = |mut set: CookieSet| {
        set.fill_from(&extra);
        set
    };

    if !req.credential.is_empty() {
        candidates.push((
            "provided".to_string(),
            with_extra(CookieSet::from_credential(req.credential)),
        ));
        if let Some(cached) = rotate::read_cached_secondary(req.cache_dir, req.credential).await {
            if req.credential.secondary.as_deref() != Some(cached.as_str()) {
                let mut set = CookieSet::from_credential(req.credential);
                set.insert(COOKIE_SECONDARY, cached);
                candidates.push(("cache".to_string(), with_extra(set)));
            }
        }
    }
    if let Some(previous) = req.previous {
        if previous.get(COOKIE_PRIMARY) == Some(req.credential.primary.as_str()) {
            candidates.push(("previous".to_string(), with_extra(previous.clone())));
        }
    }
    if let Some(source) = req.source {
        match source.load().await {
            Ok(sets) => {
                for set in sets {
                    // A foreign account's cookies must not stand in for this one.
                    if !req.credential.is_empty()
                        && set.get(COOKIE_PRIMARY) != Some(req.credential.primary.as_str())
                    {
                        continue;
                    }
                    candidates.push((source.name().to_string(), with_extra(set)));
                }
            }
            Err(e) => warn!(source = source.name(), error = %e, "credential source failed to load"),
        }
    }

    if candidates.is_empty() {
        return Err(Error::auth("no credential available for initialization")
            .with_source("session_init"));
    }

    let attempts = candidates.len();
    let probes: Vec<BoxFuture<'static, Result<AuthContext>>> = candidates
        .into_iter()
        .map(|(label, cookies)| {
            probe(
                req.transport.clone(),
                req.endpoints.init.clone(),
                label,
                cookies,
            )
            .boxed()
        })
        .collect();

    match select_ok(probes).await {
        Ok((ctx, _rest)) => {
            info!(
                credential = %req.credential.redacted(),
                sources = attempts,
                "access token acquired"
            );
            Ok(ctx)
        }
        Err(last) => {
            warn!(
                credential = %req.credential.redacted(),
                sources = attempts,
                error = %last,
                "every credential source failed"
            );
            Err(match last {
                e @ Error::Auth { .. } => e,
                other => Error::auth(format!(
                    "failed to initialize with {} credential source(s): {}",
                    attempts, other
                ))
                .with_source("session_init"),
            })
        }
    }
}
