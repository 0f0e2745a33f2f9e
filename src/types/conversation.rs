//! Multi-turn continuation state.
//!
//! The service identifies a conversation position with a positional array that
//! has grown from three slots (thread, reply, reply candidate) to ten or more.
//! Known slots get named fields; everything else is carried through as opaque
//! JSON so newer revisions round-trip untouched.

use crate::types::output::ModelOutput;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub const SLOT_THREAD_ID: usize = 0;
pub const SLOT_REPLY_ID: usize = 1;
pub const SLOT_REPLY_CANDIDATE_ID: usize = 2;
pub const SLOT_CONTEXT_TOKEN: usize = 9;

/// Minimum number of slots sent back to the service.
pub const CONVERSATION_SLOTS: usize = 10;

/// Continuation identifiers for one conversation.
///
/// Updates are monotonic: a slot that holds a value is never reset to
/// null/empty by a later update, only replaced by another concrete value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    thread_id: Option<String>,
    reply_id: Option<String>,
    reply_candidate_id: Option<String>,
    context_token: Option<String>,
    /// Slots without a known meaning, keyed by position.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    opaque: BTreeMap<usize, Value>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume a conversation from previously saved ids.
    pub fn from_ids(thread_id: &str, reply_id: &str, reply_candidate_id: &str) -> Self {
        let mut state = Self::new();
        state.set_thread_id(thread_id);
        state.set_reply_id(reply_id);
        state.set_reply_candidate_id(reply_candidate_id);
        state
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn reply_id(&self) -> Option<&str> {
        self.reply_id.as_deref()
    }

    pub fn reply_candidate_id(&self) -> Option<&str> {
        self.reply_candidate_id.as_deref()
    }

    pub fn context_token(&self) -> Option<&str> {
        self.context_token.as_deref()
    }

    pub fn opaque_slot(&self, index: usize) -> Option<&Value> {
        self.opaque.get(&index)
    }

    pub fn is_empty(&self) -> bool {
        self.thread_id.is_none()
            && self.reply_id.is_none()
            && self.reply_candidate_id.is_none()
            && self.context_token.is_none()
            && self.opaque.is_empty()
    }

    /// The single write path for every slot. Returns whether anything changed.
    ///
    /// `null`, empty strings and empty arrays count as "unknown" and are ignored.
    pub fn update_slot(&mut self, index: usize, value: &Value) -> bool {
        if is_unknown(value) {
            return false;
        }
        let named = match index {
            SLOT_THREAD_ID => Some(&mut self.thread_id),
            SLOT_REPLY_ID => Some(&mut self.reply_id),
            SLOT_REPLY_CANDIDATE_ID => Some(&mut self.reply_candidate_id),
            SLOT_CONTEXT_TOKEN => Some(&mut self.context_token),
            _ => None,
        };
        match named {
            Some(field) => {
                let Some(s) = value.as_str() else {
                    return false;
                };
                if field.as_deref() == Some(s) {
                    return false;
                }
                *field = Some(s.to_string());
                true
            }
            None => {
                if self.opaque.get(&index) == Some(value) {
                    return false;
                }
                self.opaque.insert(index, value.clone());
                true
            }
        }
    }

    pub fn set_thread_id(&mut self, id: &str) -> bool {
        self.update_slot(SLOT_THREAD_ID, &Value::from(id))
    }

    pub fn set_reply_id(&mut self, id: &str) -> bool {
        self.update_slot(SLOT_REPLY_ID, &Value::from(id))
    }

    pub fn set_reply_candidate_id(&mut self, id: &str) -> bool {
        self.update_slot(SLOT_REPLY_CANDIDATE_ID, &Value::from(id))
    }

    pub fn set_context_token(&mut self, token: &str) -> bool {
        self.update_slot(SLOT_CONTEXT_TOKEN, &Value::from(token))
    }

    /// Apply a positional update, slot by slot.
    pub fn merge_slots(&mut self, slots: &[Value]) -> bool {
        let mut changed = false;
        for (index, value) in slots.iter().enumerate() {
            changed |= self.update_slot(index, value);
        }
        changed
    }

    /// Apply every known slot of `other` on top of this state.
    pub fn merge(&mut self, other: &ConversationState) -> bool {
        let other_slots = other.to_slots();
        let values: Vec<Value> = other_slots
            .into_iter()
            .map(|v| v.unwrap_or(Value::Null))
            .collect();
        self.merge_slots(&values)
    }

    /// Positional view, padded to at least [`CONVERSATION_SLOTS`].
    pub fn to_slots(&self) -> Vec<Option<Value>> {
        let len = self
            .opaque
            .keys()
            .next_back()
            .map(|k| k + 1)
            .unwrap_or(0)
            .max(CONVERSATION_SLOTS);
        let mut slots: Vec<Option<Value>> = vec![None; len];
        slots[SLOT_THREAD_ID] = self.thread_id.clone().map(Value::from);
        slots[SLOT_REPLY_ID] = self.reply_id.clone().map(Value::from);
        slots[SLOT_REPLY_CANDIDATE_ID] = self.reply_candidate_id.clone().map(Value::from);
        slots[SLOT_CONTEXT_TOKEN] = self.context_token.clone().map(Value::from);
        for (index, value) in &self.opaque {
            slots[*index] = Some(value.clone());
        }
        slots
    }

    /// Array placed in the generate request.
    ///
    /// A fresh conversation is sent as empty strings in the id slots and nulls elsewhere.
    pub fn to_request_value(&self) -> Value {
        if self.is_empty() {
            let mut slots = vec![Value::Null; CONVERSATION_SLOTS];
            for idx in [
                SLOT_THREAD_ID,
                SLOT_REPLY_ID,
                SLOT_REPLY_CANDIDATE_ID,
                SLOT_CONTEXT_TOKEN,
            ] {
                slots[idx] = Value::from("");
            }
            return Value::Array(slots);
        }
        Value::Array(
            self.to_slots()
                .into_iter()
                .map(|v| v.unwrap_or(Value::Null))
                .collect(),
        )
    }
}

fn is_unknown(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

#[derive(Debug, Default)]
struct HandleInner {
    state: ConversationState,
    last_output: Option<ModelOutput>,
}

/// Shared, cloneable handle to one conversation.
///
/// The streaming path writes into the handle as envelopes arrive, so a caller
/// that drops a stream midway still holds usable continuation state.
#[derive(Debug, Clone, Default)]
pub struct ConversationHandle {
    inner: Arc<Mutex<HandleInner>>,
}

impl ConversationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: ConversationState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HandleInner {
                state,
                last_output: None,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HandleInner> {
        // The guarded data is plain values; a poisoned lock still holds a consistent state.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> ConversationState {
        self.lock().state.clone()
    }

    pub fn last_output(&self) -> Option<ModelOutput> {
        self.lock().last_output.clone()
    }

    pub(crate) fn merge_state(&self, update: &ConversationState) -> bool {
        self.lock().state.merge(update)
    }

    /// Take over another handle's state and last output. Used to commit one
    /// generate attempt's private handle into the caller's.
    pub(crate) fn absorb(&self, other: &ConversationHandle) {
        let (state, output) = {
            let other = other.lock();
            (other.state.clone(), other.last_output.clone())
        };
        let mut inner = self.lock();
        inner.state.merge(&state);
        if output.is_some() {
            inner.last_output = output;
        }
    }

    /// Record a completed turn and point the continuation at its chosen candidate.
    pub(crate) fn record_output(&self, output: &ModelOutput) {
        let mut inner = self.lock();
        inner.state.merge(&output.conversation);
        if let Some(rcid) = output.chosen_candidate().map(|c| c.rcid.clone()) {
            inner.state.set_reply_candidate_id(&rcid);
        }
        inner.last_output = Some(output.clone());
    }

    /// Continue the conversation from an alternate candidate of the last reply.
    pub fn choose_candidate(&self, index: usize) -> Result<ModelOutput> {
        let mut inner = self.lock();
        let HandleInner { state, last_output } = &mut *inner;
        let output = last_output.as_mut().ok_or_else(|| {
            Error::Validation("No previous output found in this conversation".to_string())
        })?;
        if index >= output.candidates.len() {
            return Err(Error::Validation(format!(
                "Index {} exceeds the number of candidates in last output ({})",
                index,
                output.candidates.len()
            )));
        }
        output.chosen = index;
        let rcid = output.candidates[index].rcid.clone();
        state.set_reply_candidate_id(&rcid);
        Ok(output.clone())
    }
}
