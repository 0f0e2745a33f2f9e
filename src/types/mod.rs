//! 类型模块：会话状态、模型输出与 Gem 等核心数据类型。
//!
//! # Types Module
//!
//! Strongly-typed views over the service's positional wire data.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ConversationState`] | Continuation ids with monotonic updates |
//! | [`ConversationHandle`] | Shared handle updated while a stream is consumed |
//! | [`ModelOutput`] | Candidates of one reply plus the chosen index |
//! | [`PartialModelOutput`] | Streaming item: cumulative output and deltas |
//! | [`Gem`] / [`GemJar`] | Reusable system prompts |
//! | [`RpcData`] | One batch-execute call |
//!
//! ## Example
//!
//! ```rust
//! use gemini_web_core::types::ConversationState;
//!
//! let mut state = ConversationState::from_ids("c_1", "r_1", "rc_1");
//! state.merge_slots(&[serde_json::Value::Null, serde_json::json!("r_2")]);
//! assert_eq!(state.thread_id(), Some("c_1"));
//! assert_eq!(state.reply_id(), Some("r_2"));
//! ```

pub mod conversation;
pub mod gem;
pub mod output;
pub mod rpc;

pub use conversation::{ConversationHandle, ConversationState};
pub use gem::{Gem, GemJar, GemRef};
pub use output::{
    Candidate, CandidateDelta, GeneratedImage, ModelOutput, PartialModelOutput, WebImage,
};
pub use rpc::RpcData;
