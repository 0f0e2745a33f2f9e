//! # gemini-web-core
//!
//! 面向 Gemini 网页聊天服务的客户端核心：帧解码、流式增量合并、凭据会话与多账号池。
//!
//! Resilient client core for a browser-session-authenticated chat web service
//! that exposes no public API.
//!
//! ## Overview
//!
//! Three pieces do the work:
//!
//! - **Frame decoding**: the service streams length-prefixed JSON frames whose
//!   lengths count UTF-16 units; [`pipeline::FrameDecoder`] reassembles them
//!   from arbitrarily split input.
//! - **Reconciliation**: [`pipeline::ResponseReconciler`] turns cumulative,
//!   multi-candidate envelopes into partial outputs with text and thought deltas.
//! - **Sessions and pooling**: [`CredentialedSession`] owns one authenticated
//!   channel (token probe, idle close, credential rotation) and
//!   [`SessionPool`] spreads requests over several accounts with cooldowns.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gemini_web_core::client::{CredentialedSessionBuilder, GenerateRequest};
//! use gemini_web_core::transport::Credential;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> gemini_web_core::Result<()> {
//!     let session = CredentialedSessionBuilder::new(Credential::new("psid", Some("psidts".into())))
//!         .build()?;
//!     session.init().await?;
//!
//!     let mut stream = session.generate_stream(GenerateRequest::new("Hello!"));
//!     while let Some(partial) = stream.next().await {
//!         print!("{}", partial?.text_delta());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`pipeline`] | Frame decoding, delta computation, reconciliation, retry |
//! | [`client`] | Credentialed session, generate, gems, uploads |
//! | [`pool`] | Multi-account pool with failover |
//! | [`resilience`] | Account health and cooldown tracking |
//! | [`transport`] | HTTP transport and cookie credentials |
//! | [`types`] | Conversation state, outputs, gems, RPC payloads |
//! | [`constants`] | Endpoints, headers, RPC ids, error codes, models |

pub mod client;
pub mod constants;
pub mod pipeline;
pub mod pool;
pub mod resilience;
pub mod transport;
pub mod types;
pub mod utils;

// Re-export main types for convenience
pub use client::{CredentialedSession, CredentialedSessionBuilder, GenerateRequest, SessionOptions};
pub use constants::ModelSelector;
pub use pool::{PoolConfig, SessionPool};
pub use transport::Credential;
pub use types::{ConversationHandle, ConversationState, ModelOutput, PartialModelOutput};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream that emits `Result<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
