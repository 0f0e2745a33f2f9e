//! Service endpoints, headers, RPC ids, error codes and model selectors.

use serde::{Deserialize, Serialize};

pub const ENDPOINT_GOOGLE: &str = "https://www.google.com";
pub const ENDPOINT_INIT: &str = "https://gemini.google.com/app";
pub const ENDPOINT_GENERATE: &str =
    "https://gemini.google.com/_/BardChatUi/data/assistant.lamda.BardFrontendService/StreamGenerate";
pub const ENDPOINT_ROTATE_COOKIES: &str = "https://accounts.google.com/RotateCookies";
pub const ENDPOINT_UPLOAD: &str = "https://content-push.googleapis.com/upload";
pub const ENDPOINT_BATCH_EXEC: &str = "https://gemini.google.com/_/BardChatUi/data/batchexecute";

/// Cookie names making up one account's credential.
pub const COOKIE_PRIMARY: &str = "__Secure-1PSID";
pub const COOKIE_SECONDARY: &str = "__Secure-1PSIDTS";

/// Anti-JSON-hijacking prefix sent before the first frame.
pub const XSSI_PREFIX: &str = ")]}'";

/// Body the rotation endpoint expects.
pub const ROTATE_COOKIES_BODY: &str = r#"[000,"-0000000000000000000"]"#;

pub const HEADER_MODEL: &str = "x-goog-ext-525001261-jspb";

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/144.0.0.0 Safari/537.36";

/// Default headers for every request against the chat frontend.
pub fn gemini_headers() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "Content-Type",
            "application/x-www-form-urlencoded;charset=utf-8",
        ),
        ("Origin", "https://gemini.google.com"),
        ("Referer", "https://gemini.google.com/"),
        ("User-Agent", USER_AGENT),
        ("X-Same-Domain", "1"),
    ]
}

pub const UPLOAD_PUSH_ID: (&str, &str) = ("Push-ID", "feeds/mcudyrk2a4khkz");

/// Batch-execute RPC identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrpcId {
    ListChats,
    ReadChat,
    DeleteChat,
    ListGems,
    CreateGem,
    UpdateGem,
    DeleteGem,
    BardActivity,
}

impl GrpcId {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrpcId::ListChats => "MaZiqc",
            GrpcId::ReadChat => "hNvQHb",
            GrpcId::DeleteChat => "GzXR5e",
            GrpcId::ListGems => "CNgdBe",
            GrpcId::CreateGem => "oMH3Zd",
            GrpcId::UpdateGem => "kHv0Vd",
            GrpcId::DeleteGem => "UXcSJb",
            GrpcId::BardActivity => "ESY5D",
        }
    }
}

/// Numeric error codes the service embeds in the first envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorCode {
    TemporaryError,
    UsageLimitExceeded,
    ModelInconsistent,
    ModelHeaderInvalid,
    IpTemporarilyBlocked,
}

impl ServiceErrorCode {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1013 => Some(ServiceErrorCode::TemporaryError),
            1037 => Some(ServiceErrorCode::UsageLimitExceeded),
            1050 => Some(ServiceErrorCode::ModelInconsistent),
            1052 => Some(ServiceErrorCode::ModelHeaderInvalid),
            1060 => Some(ServiceErrorCode::IpTemporarilyBlocked),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            ServiceErrorCode::TemporaryError => 1013,
            ServiceErrorCode::UsageLimitExceeded => 1037,
            ServiceErrorCode::ModelInconsistent => 1050,
            ServiceErrorCode::ModelHeaderInvalid => 1052,
            ServiceErrorCode::IpTemporarilyBlocked => 1060,
        }
    }

    /// Typed failure for this code.
    pub fn into_error(self) -> crate::Error {
        let code = self.code();
        let err = match self {
            ServiceErrorCode::TemporaryError => crate::Error::transient(
                "the service reported a temporary error, try again shortly",
            ),
            ServiceErrorCode::UsageLimitExceeded => crate::Error::rate_limited(
                "usage limit of the selected model exceeded for this account",
            ),
            ServiceErrorCode::ModelInconsistent => crate::Error::model_unavailable(
                "selected model is inconsistent with the conversation history",
            ),
            ServiceErrorCode::ModelHeaderInvalid => crate::Error::model_unavailable(
                "selected model is unavailable or its request header is outdated",
            ),
            ServiceErrorCode::IpTemporarilyBlocked => crate::Error::temporarily_blocked(
                "requests from this network are temporarily blocked",
            ),
        };
        err.with_source("service_error_code")
            .with_details(format!("code {}", code))
    }
}

/// Model selection for a generate request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSelector {
    #[default]
    Unspecified,
    Gemini30Pro,
    Gemini30Flash,
    Gemini30FlashThinking,
    /// A model not known to this crate: name plus the raw model header value.
    Custom { name: String, header: String },
}

impl ModelSelector {
    pub const KNOWN: [ModelSelector; 4] = [
        ModelSelector::Unspecified,
        ModelSelector::Gemini30Pro,
        ModelSelector::Gemini30Flash,
        ModelSelector::Gemini30FlashThinking,
    ];

    pub fn name(&self) -> &str {
        match self {
            ModelSelector::Unspecified => "unspecified",
            ModelSelector::Gemini30Pro => "gemini-3.0-pro",
            ModelSelector::Gemini30Flash => "gemini-3.0-flash",
            ModelSelector::Gemini30FlashThinking => "gemini-3.0-flash-thinking",
            ModelSelector::Custom { name, .. } => name,
        }
    }

    /// Value of the model-selection header, `None` for the service default.
    pub fn header_value(&self) -> Option<String> {
        let id = match self {
            ModelSelector::Unspecified => return None,
            ModelSelector::Gemini30Pro => "9d8ca3786ebdfbea",
            ModelSelector::Gemini30Flash => "fbb127bbb056c959",
            ModelSelector::Gemini30FlashThinking => "5bf011840784117a",
            ModelSelector::Custom { header, .. } => return Some(header.clone()),
        };
        Some(format!(
            "[1,null,null,null,\"{}\",null,null,0,[4],null,null,1]",
            id
        ))
    }

    pub fn from_name(name: &str) -> crate::Result<Self> {
        Self::KNOWN
            .iter()
            .find(|m| m.name() == name)
            .cloned()
            .ok_or_else(|| {
                let available: Vec<&str> = Self::KNOWN.iter().map(|m| m.name()).collect();
                crate::Error::Validation(format!(
                    "Unknown model name: {}. Available models: {}",
                    name,
                    available.join(", ")
                ))
            })
    }
}
