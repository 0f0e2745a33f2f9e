//! 流水线模块：帧解码、增量对账与重试。
//!
//! # Response Pipeline
//!
//! Turns the raw body of a streaming generate call into reconciled model output.
//!
//! ```text
//! Raw Bytes → LengthFrameDecoder → Frames → Envelopes → ResponseReconciler → PartialModelOutput
//!     │              │                           │                │
//!   HTTP      UTF-16 length markers        list splicing     text/thought deltas,
//!                                                             conversation updates
//! ```
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`decode`] | Length-prefixed frame decoding, one-shot fallbacks |
//! | [`delta`] | Text cleaning and delta computation over cumulative text |
//! | [`reconcile`] | Envelope interpretation and candidate tracking |
//! | [`retry`] | Backoff wrapper for futures and streams |

pub mod decode;
pub mod delta;
pub mod reconcile;
pub mod retry;


pub use decode::{decode_envelopes, extract_json, Frame, FrameDecoder, LengthFrameDecoder};
pub use reconcile::{collect, ResponseReconciler};
pub use retry::{retry_stream, with_retry, RetryPolicy};

/// Decoder-level failures. Converted into `Error::Protocol` at the crate boundary.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("No valid JSON found in response{}", .hint.as_ref().map(|h| format!(" (hint: {})", h)).unwrap_or_default())]
    NoJson { hint: Option<String> },

    #[error("Unexpected envelope structure: {0}")]
    Envelope(String),

    #[error("I/O error while reading stream: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Attach a hint, e.g. a truncated excerpt of the offending body.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        let hint_val = Some(hint.into());
        if let PipelineError::NoJson { ref mut hint } = self {
            *hint = hint_val;
        }
        self
    }
}
