//! Reconciled model output.

use crate::types::conversation::ConversationState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Image found by the model on the web.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebImage {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub alt: String,
}

/// Image generated by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub alt: String,
}

impl GeneratedImage {
    /// URL of the full-size rendition (the plain URL serves a preview).
    pub fn full_size_url(&self) -> String {
        format!("{}=s2048", self.url)
    }
}

/// One alternative reply. Cumulative fields only grow during a stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub rcid: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<String>,
    #[serde(default)]
    pub web_images: Vec<WebImage>,
    #[serde(default)]
    pub generated_images: Vec<GeneratedImage>,
}

impl Candidate {
    pub fn new(rcid: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            rcid: rcid.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn image_count(&self) -> usize {
        self.web_images.len() + self.generated_images.len()
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Output of one generate call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    pub conversation: ConversationState,
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub chosen: usize,
}

impl ModelOutput {
    pub fn chosen_candidate(&self) -> Option<&Candidate> {
        self.candidates.get(self.chosen)
    }

    pub fn text(&self) -> &str {
        self.chosen_candidate().map(|c| c.text.as_str()).unwrap_or("")
    }

    pub fn thoughts(&self) -> Option<&str> {
        self.chosen_candidate().and_then(|c| c.thoughts.as_deref())
    }

    pub fn rcid(&self) -> Option<&str> {
        self.chosen_candidate().map(|c| c.rcid.as_str())
    }

    pub fn web_images(&self) -> &[WebImage] {
        self.chosen_candidate()
            .map(|c| c.web_images.as_slice())
            .unwrap_or(&[])
    }

    pub fn generated_images(&self) -> &[GeneratedImage] {
        self.chosen_candidate()
            .map(|c| c.generated_images.as_slice())
            .unwrap_or(&[])
    }
}

impl fmt::Display for ModelOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// What changed for one candidate since the previous partial output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateDelta {
    pub index: usize,
    pub rcid: String,
    pub text: String,
    pub thoughts: String,
    pub new_web_images: Vec<WebImage>,
    pub new_generated_images: Vec<GeneratedImage>,
}

impl CandidateDelta {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
            && self.thoughts.is_empty()
            && self.new_web_images.is_empty()
            && self.new_generated_images.is_empty()
    }
}

/// Streaming item: the cumulative output so far plus the per-candidate deltas
/// that produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialModelOutput {
    pub output: ModelOutput,
    pub deltas: Vec<CandidateDelta>,
}

impl PartialModelOutput {
    /// Text delta of the chosen candidate, empty when it did not change.
    pub fn text_delta(&self) -> &str {
        self.chosen_delta().map(|d| d.text.as_str()).unwrap_or("")
    }

    pub fn thoughts_delta(&self) -> &str {
        self.chosen_delta().map(|d| d.thoughts.as_str()).unwrap_or("")
    }

    fn chosen_delta(&self) -> Option<&CandidateDelta> {
        self.deltas.iter().find(|d| d.index == self.output.chosen)
    }
}
