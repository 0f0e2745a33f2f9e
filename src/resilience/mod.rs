//! 弹性模块：账号健康度与冷却期跟踪。
//!
//! # Resilience Module
//!
//! Per-account failure tracking used by the session pool to decide which
//! accounts may take requests.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`health`] | Consecutive-failure threshold with a cooldown window |
//!
//! An account is benched once its consecutive cooldown-triggering failures
//! (auth failures and usage limits) reach the threshold, and becomes eligible
//! again as soon as the cooldown has elapsed:
//!
//! ```rust
//! use gemini_web_core::resilience::health::{AccountHealth, HealthConfig};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut health = AccountHealth::new(
//!     HealthConfig::new()
//!         .with_failure_threshold(2)
//!         .with_cooldown(Duration::from_secs(60)),
//! );
//! health.on_failure(true);
//! health.on_failure(true);
//! assert!(!health.check());
//! # }
//! ```

pub mod health;

pub use health::{AccountHealth, HealthConfig, HealthSnapshot};
