use crate::pipeline::PipelineError;
use thiserror::Error;

/// Structured error context for observability.
///
/// Carries enough to correlate a failure with an account and a request without
/// ever holding credential material.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Pool account the failure belongs to, if any
    pub account_id: Option<String>,
    /// Transport status code, when the failure came from an HTTP response
    pub status_code: Option<u16>,
    /// Component that raised the error (e.g. "session_init", "reconciler")
    pub source: Option<String>,
    /// Free-form details (never credential values)
    pub details: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account_id(mut self, id: impl Into<String>) -> Self {
        self.account_id = Some(id.into());
        self
    }

    pub fn with_status_code(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Unified error type for the client core.
///
/// Variants map one-to-one onto the recovery strategy the caller should use:
/// session-level retry, pool-level failover, or surfacing to the user.
#[derive(Debug, Error)]
pub enum Error {
    /// Credentials invalid or expired. Not retried in place.
    #[error("Authentication failed: {message}{}", format_context(.context))]
    Auth {
        message: String,
        context: ErrorContext,
    },

    /// Frame or envelope structurally unexpected. The session is closed and the call retried.
    #[error("Protocol error: {message}{}", format_context(.context))]
    Protocol {
        message: String,
        context: ErrorContext,
    },

    /// Non-success status, timeout, or the service still queueing with no output yet.
    #[error("Transient service error: {message}{}", format_context(.context))]
    TransientService {
        message: String,
        context: ErrorContext,
    },

    #[error("Usage limit exceeded: {message}{}", format_context(.context))]
    RateLimitExceeded {
        message: String,
        context: ErrorContext,
    },

    #[error("Model unavailable: {message}{}", format_context(.context))]
    ModelUnavailable {
        message: String,
        context: ErrorContext,
    },

    #[error("Temporarily blocked: {message}{}", format_context(.context))]
    TemporarilyBlocked {
        message: String,
        context: ErrorContext,
    },

    /// Explicitly selected account is unknown, cooling down, or not running.
    #[error("Account '{account_id}' unavailable: {reason}")]
    AccountUnavailable { account_id: String, reason: String },

    /// Every pool account was tried once and none succeeded.
    #[error("All accounts exhausted after {attempted} attempt(s). Last error: {last}")]
    PoolExhausted { attempted: usize, last: Box<Error> },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref account) = ctx.account_id {
        parts.push(format!("account: {}", account));
    }
    if let Some(status) = ctx.status_code {
        parts.push(format!("status: {}", status));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl From<PipelineError> for Error {
    fn from(err: PipelineError) -> Self {
        Error::protocol(err.to_string()).with_source("pipeline")
    }
}

impl Error {
    pub fn auth(msg: impl Into<String>) -> Self {
        Error::Auth {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Error::TransientService {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Error::RateLimitExceeded {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn model_unavailable(msg: impl Into<String>) -> Self {
        Error::ModelUnavailable {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn temporarily_blocked(msg: impl Into<String>) -> Self {
        Error::TemporarilyBlocked {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    /// Map a non-success transport status onto the taxonomy.
    pub fn from_status(status: u16, what: &str) -> Self {
        let message = format!("{} failed with status code {}", what, status);
        let err = match status {
            401 | 403 => Error::auth(message),
            429 => Error::rate_limited(message),
            _ => Error::transient(message),
        };
        err.with_status_code(status)
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Auth { context, .. }
            | Error::Protocol { context, .. }
            | Error::TransientService { context, .. }
            | Error::RateLimitExceeded { context, .. }
            | Error::ModelUnavailable { context, .. }
            | Error::TemporarilyBlocked { context, .. }
            | Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    fn context_mut(&mut self) -> Option<&mut ErrorContext> {
        match self {
            Error::Auth { context, .. }
            | Error::Protocol { context, .. }
            | Error::TransientService { context, .. }
            | Error::RateLimitExceeded { context, .. }
            | Error::ModelUnavailable { context, .. }
            | Error::TemporarilyBlocked { context, .. }
            | Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Attach the owning account id (no-op for variants without context).
    pub fn with_account_id(mut self, id: impl Into<String>) -> Self {
        if let Some(ctx) = self.context_mut() {
            if ctx.account_id.is_none() {
                ctx.account_id = Some(id.into());
            }
        }
        self
    }

    pub fn with_status_code(mut self, status: u16) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.status_code = Some(status);
        }
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.source = Some(source.into());
        }
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.details = Some(details.into());
        }
        self
    }

    /// Whether the session-level retry wrapper should try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Protocol { .. } | Error::TransientService { .. } => true,
            Error::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Whether the pool should count this failure towards the account's cooldown threshold.
    pub fn triggers_cooldown(&self) -> bool {
        matches!(self, Error::Auth { .. } | Error::RateLimitExceeded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = Error::auth("cookie expired")
            .with_account_id("acc-1")
            .with_status_code(401);
        let s = err.to_string();
        assert!(s.contains("cookie expired"));
        assert!(s.contains("account: acc-1"));
        assert!(s.contains("status: 401"));
    }

    #[test]
    fn test_account_id_is_not_overwritten() {
        let err = Error::transient("x").with_account_id("a").with_account_id("b");
        assert_eq!(err.context().unwrap().account_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_from_status_mapping() {
        assert!(matches!(Error::from_status(401, "init"), Error::Auth { .. }));
        assert!(matches!(
            Error::from_status(429, "generate"),
            Error::RateLimitExceeded { .. }
        ));
        assert!(matches!(
            Error::from_status(500, "generate"),
            Error::TransientService { .. }
        ));
    }

    #[test]
    fn test_classification() {
        assert!(Error::protocol("bad frame").is_retryable());
        assert!(Error::transient("busy").is_retryable());
        assert!(!Error::auth("nope").is_retryable());
        assert!(!Error::rate_limited("quota").is_retryable());

        assert!(Error::auth("nope").triggers_cooldown());
        assert!(Error::rate_limited("quota").triggers_cooldown());
        assert!(!Error::transient("busy").triggers_cooldown());
        assert!(!Error::model_unavailable("m").triggers_cooldown());
    }

    #[test]
    fn test_pool_exhausted_keeps_last_error() {
        let err = Error::PoolExhausted {
            attempted: 3,
            last: Box::new(Error::rate_limited("quota").with_account_id("c")),
        };
        let s = err.to_string();
        assert!(s.contains("3 attempt"));
        assert!(s.contains("account: c"));
    }
}
