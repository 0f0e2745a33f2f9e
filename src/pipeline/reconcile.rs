//! Envelope interpretation and candidate reconciliation.
//!
//! Envelope shape: `["wrb.fr", null, "<inner json>", ...]`. The inner body is
//! positional:
//!
//! | Path | Meaning |
//! |------|---------|
//! | `[1]` | conversation slots (thread id, reply id, ...) |
//! | `[4]` | candidate list |
//! | `[25]` | context token |
//!
//! and each candidate `[0]` = reply candidate id, `[1][0]` = text,
//! `[37][0][0]` = thoughts, `[12]` = images, `[2]`/`[8][0]` = completion status.

use crate::constants::ServiceErrorCode;
use crate::pipeline::delta::compute_delta;
use crate::types::conversation::SLOT_CONTEXT_TOKEN;
use crate::types::{
    Candidate, CandidateDelta, ConversationHandle, ConversationState, GeneratedImage, ModelOutput,
    PartialModelOutput, WebImage,
};
use crate::utils::{html, NestedPath};
use crate::{BoxStream, Error, Result};
use futures::{stream, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

const ENVELOPE_TAG: &str = "wrb.fr";
const ERROR_CODE_PATH: [i64; 5] = [5, 2, 0, 1, 0];

/// Placeholder text the service sends for deferred "card" content.
static CARD_CONTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^http://googleusercontent\.com/card_content/\d+").expect("card regex must compile")
});

/// Fields extracted from one candidate entry of one envelope.
struct CandidateUpdate {
    rcid: String,
    text: String,
    thoughts: Option<String>,
    web_images: Vec<WebImage>,
    generated_images: Vec<GeneratedImage>,
    is_final: bool,
}

fn parse_web_images(candidate: &Value) -> Vec<WebImage> {
    NestedPath::get_array(candidate, &[12, 1])
        .map(|images| {
            images
                .iter()
                .filter_map(|img| {
                    let url = NestedPath::get_non_empty_str(img, &[0, 0, 0])?;
                    Some(WebImage {
                        url: url.to_string(),
                        title: NestedPath::get_str(img, &[7, 0]).unwrap_or_default().to_string(),
                        alt: NestedPath::get_str(img, &[0, 4]).unwrap_or_default().to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_generated_images(candidate: &Value) -> Vec<GeneratedImage> {
    NestedPath::get_array(candidate, &[12, 7, 0])
        .map(|images| {
            images
                .iter()
                .enumerate()
                .filter_map(|(i, img)| {
                    let url = NestedPath::get_non_empty_str(img, &[0, 3, 3])?;
                    let title = match NestedPath::get_i64(img, &[3, 6]) {
                        Some(n) => format!("[Generated Image {}]", n),
                        None => "[Generated Image]".to_string(),
                    };
                    let alt = NestedPath::get_str(img, &[3, 5, i as i64])
                        .or_else(|| NestedPath::get_str(img, &[3, 5, 0]))
                        .unwrap_or_default();
                    Some(GeneratedImage {
                        url: url.to_string(),
                        title,
                        alt: alt.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_candidate(candidate: &Value) -> Option<CandidateUpdate> {
    let rcid = NestedPath::get_non_empty_str(candidate, &[0])?;

    let mut text = NestedPath::get_str(candidate, &[1, 0]).unwrap_or_default();
    if CARD_CONTENT.is_match(text) {
        if let Some(alt) = NestedPath::get_str(candidate, &[22, 0]) {
            text = alt;
        }
    }
    let thoughts = NestedPath::get_str(candidate, &[37, 0, 0]).map(|t| html::unescape(t).into_owned());

    let is_final = NestedPath::get_array(candidate, &[2]).is_some()
        || NestedPath::get_i64(candidate, &[8, 0]) == Some(2);

    Some(CandidateUpdate {
        rcid: rcid.to_string(),
        text: html::unescape(text).into_owned(),
        thoughts,
        web_images: parse_web_images(candidate),
        generated_images: parse_generated_images(candidate),
        is_final,
    })
}

/// Items of `incoming` whose url is not already in `known`.
fn new_by_url<T: Clone>(known: &[T], incoming: &[T], url: impl Fn(&T) -> &str) -> Vec<T> {
    incoming
        .iter()
        .filter(|img| !known.iter().any(|k| url(k) == url(img)))
        .cloned()
        .collect()
}

/// Stateful interpreter of one response's envelopes.
///
/// Keeps the cumulative state of every candidate (by index) and the text last
/// sent per candidate, keyed both by candidate id and by index.
#[derive(Debug, Default)]
pub struct ResponseReconciler {
    conversation: ConversationState,
    candidates: Vec<Candidate>,
    last_text: HashMap<String, String>,
    last_thoughts: HashMap<String, String>,
    busy_seen: bool,
    handle: Option<ConversationHandle>,
}

impl ResponseReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile into an existing conversation; state updates are written
    /// through to `handle` as envelopes arrive.
    pub fn with_conversation(handle: ConversationHandle) -> Self {
        Self {
            conversation: handle.state(),
            handle: Some(handle),
            ..Self::default()
        }
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    pub fn busy_seen(&self) -> bool {
        self.busy_seen
    }

    /// Cumulative output so far.
    pub fn snapshot(&self) -> ModelOutput {
        ModelOutput {
            conversation: self.conversation.clone(),
            candidates: self.candidates.clone(),
            chosen: 0,
        }
    }

    /// Interpret one envelope.
    ///
    /// Returns a partial output only when some candidate changed. Known
    /// service error codes abort with the matching typed error.
    pub fn process(&mut self, envelope: &Value) -> Result<Option<PartialModelOutput>> {
        if let Some(code) = NestedPath::get_i64(envelope, &ERROR_CODE_PATH) {
            match ServiceErrorCode::from_code(code) {
                Some(known) => return Err(known.into_error()),
                None => warn!(code, "unknown service error code in envelope"),
            }
        }

        if NestedPath::get_str(envelope, &[0]) != Some(ENVELOPE_TAG) {
            debug!(tag = ?NestedPath::get(envelope, &[0]), "ignoring non-content envelope");
            return Ok(None);
        }

        let Some(inner_raw) = NestedPath::get_str(envelope, &[2]) else {
            self.busy_seen = true;
            return Ok(None);
        };
        let inner: Value = match serde_json::from_str(inner_raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "skipping envelope with malformed inner body");
                return Ok(None);
            }
        };

        self.apply_conversation(&inner);

        let entries = match NestedPath::get_array(&inner, &[4]) {
            Some(list) if !list.is_empty() => list,
            _ => {
                self.busy_seen = true;
                return Ok(None);
            }
        };

        let mut deltas = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            let Some(update) = parse_candidate(entry) else {
                continue;
            };
            let delta = self.apply_candidate(index, update);
            if !delta.is_empty() {
                deltas.push(delta);
            }
        }

        // Continuation points at the first candidate until a choice is made.
        if let Some(first) = self.candidates.first().filter(|c| !c.rcid.is_empty()) {
            let rcid = first.rcid.clone();
            if self.conversation.set_reply_candidate_id(&rcid) {
                self.write_through();
            }
        }

        if deltas.is_empty() {
            return Ok(None);
        }
        Ok(Some(PartialModelOutput {
            output: self.snapshot(),
            deltas,
        }))
    }

    fn apply_conversation(&mut self, inner: &Value) {
        let mut changed = false;
        if let Some(slots) = NestedPath::get_array(inner, &[1]) {
            changed |= self.conversation.merge_slots(slots);
        }
        if let Some(token) = NestedPath::get(inner, &[25]) {
            changed |= self.conversation.update_slot(SLOT_CONTEXT_TOKEN, token);
        }
        if changed {
            self.write_through();
        }
    }

    fn write_through(&self) {
        if let Some(handle) = &self.handle {
            handle.merge_state(&self.conversation);
        }
    }

    fn last_sent<'a>(map: &'a HashMap<String, String>, rcid: &str, index_key: &str) -> &'a str {
        map.get(rcid)
            .filter(|s| !s.is_empty())
            .or_else(|| map.get(index_key))
            .map(String::as_str)
            .unwrap_or("")
    }

    fn apply_candidate(&mut self, index: usize, update: CandidateUpdate) -> CandidateDelta {
        let index_key = format!("idx_{}", index);

        let text = compute_delta(
            &update.text,
            Self::last_sent(&self.last_text, &update.rcid, &index_key),
            update.is_final,
        );
        self.last_text.insert(update.rcid.clone(), text.full.clone());
        self.last_text.insert(index_key.clone(), text.full.clone());

        let thoughts = update.thoughts.as_deref().map(|t| {
            compute_delta(
                t,
                Self::last_sent(&self.last_thoughts, &update.rcid, &index_key),
                update.is_final,
            )
        });
        if let Some(t) = &thoughts {
            self.last_thoughts.insert(update.rcid.clone(), t.full.clone());
            self.last_thoughts.insert(index_key, t.full.clone());
        }

        if index >= self.candidates.len() {
            self.candidates.resize_with(index + 1, Candidate::default);
        }
        let slot = &mut self.candidates[index];
        if !slot.rcid.is_empty() && slot.rcid != update.rcid {
            // Images are correlated by index; a reordering would misattribute them.
            warn!(
                index,
                previous = %slot.rcid,
                current = %update.rcid,
                "candidate id changed at index between envelopes"
            );
        }

        let new_web = new_by_url(&slot.web_images, &update.web_images, |i| i.url.as_str());
        let new_generated = new_by_url(&slot.generated_images, &update.generated_images, |i| {
            i.url.as_str()
        });

        slot.rcid = update.rcid.clone();
        slot.text = text.full;
        if let Some(t) = &thoughts {
            slot.thoughts = Some(t.full.clone());
        }
        slot.web_images.extend(new_web.iter().cloned());
        slot.generated_images.extend(new_generated.iter().cloned());

        CandidateDelta {
            index,
            rcid: update.rcid,
            text: text.delta,
            thoughts: thoughts.map(|t| t.delta).unwrap_or_default(),
            new_web_images: new_web,
            new_generated_images: new_generated,
        }
    }

    /// Final aggregation once the envelope stream has ended.
    ///
    /// A response that never produced a candidate is a transient failure when
    /// the service signalled it was still busy, and a protocol error otherwise.
    pub fn finish(self) -> Result<ModelOutput> {
        if self.candidates.iter().all(|c| c.rcid.is_empty()) {
            return Err(if self.busy_seen {
                Error::transient("service was busy and produced no output").with_source("reconciler")
            } else {
                Error::protocol("no candidate found in response").with_source("reconciler")
            });
        }
        let mut output = self.snapshot();
        output.candidates.retain(|c| !c.rcid.is_empty());
        if let Some(handle) = &self.handle {
            handle.record_output(&output);
        }
        Ok(output)
    }
}

struct ReconcileState {
    envelopes: BoxStream<'static, Value>,
    reconciler: Option<ResponseReconciler>,
}

/// Drive envelopes through a reconciler, yielding partial outputs lazily.
///
/// The stream ends with an error item when no candidate was ever produced or
/// when the service reported an error code.
pub fn reconcile_stream(
    envelopes: BoxStream<'static, Value>,
    reconciler: ResponseReconciler,
) -> BoxStream<'static, PartialModelOutput> {
    let state = ReconcileState {
        envelopes,
        reconciler: Some(reconciler),
    };
    let stream = stream::unfold(state, |mut st| async move {
        loop {
            let reconciler = st.reconciler.as_mut()?;
            match st.envelopes.next().await {
                Some(Ok(envelope)) => match reconciler.process(&envelope) {
                    Ok(Some(partial)) => return Some((Ok(partial), st)),
                    Ok(None) => continue,
                    Err(e) => {
                        st.reconciler = None;
                        return Some((Err(e), st));
                    }
                },
                Some(Err(e)) => {
                    st.reconciler = None;
                    return Some((Err(e), st));
                }
                None => {
                    let reconciler = st.reconciler.take()?;
                    match reconciler.finish() {
                        Ok(_) => return None,
                        Err(e) => return Some((Err(e), st)),
                    }
                }
            }
        }
    });
    Box::pin(stream)
}

/// Reduce a stream of partial outputs to one output, taking the last
/// cumulative state per candidate.
pub async fn collect(mut partials: BoxStream<'static, PartialModelOutput>) -> Result<ModelOutput> {
    let mut result: Option<ModelOutput> = None;
    while let Some(item) = partials.next().await {
        let partial = item?;
        match result.as_mut() {
            None => result = Some(partial.output),
            Some(acc) => {
                acc.conversation.merge(&partial.output.conversation);
                for (i, cand) in partial.output.candidates.into_iter().enumerate() {
                    if i < acc.candidates.len() {
                        acc.candidates[i] = cand;
                    } else {
                        acc.candidates.push(cand);
                    }
                }
            }
        }
    }
    if let Some(out) = result.as_mut() {
        out.candidates.retain(|c| !c.rcid.is_empty());
    }
    result.ok_or_else(|| Error::protocol("response stream produced no output").with_source("collect"))
}
