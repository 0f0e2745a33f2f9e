//! 传输层：HTTP 客户端与 Cookie 凭据。

pub mod cookies;
pub mod http;

pub use cookies::{CookieSet, Credential};
pub use http::{Endpoints, HttpTransport};
