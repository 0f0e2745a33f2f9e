//! Length-prefixed frame decoding (Bytes -> Frame -> envelope `Value`s)
//!
//! The service streams `<decimal length>\n<payload>` units, where the length is
//! counted in UTF-16 code units of the text following the marker's line break.
//! An anti-hijacking prefix (`)]}'`) precedes the first frame.

use crate::constants::XSSI_PREFIX;
use crate::pipeline::PipelineError;
use crate::BoxStream;
use bytes::{Buf, Bytes, BytesMut};
use futures::{stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use tokio_util::codec::Decoder;

/// Longest excerpt of an undecodable body placed in error hints.
const HINT_EXCERPT_CHARS: usize = 120;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Length announced by the marker, in UTF-16 units.
    pub declared_len: usize,
    pub payload: Value,
}

impl Frame {
    /// Envelopes carried by this frame. The service batches several logical
    /// envelopes into one list payload; those are spliced out here.
    pub fn into_envelopes(self) -> Vec<Value> {
        match self.payload {
            Value::Array(items) => items,
            other => vec![other],
        }
    }
}

/// Byte length of the longest prefix of `s` spanning exactly `units` UTF-16 units.
///
/// `None` means `s` is too short. A surrogate pair straddling the boundary ends
/// the prefix before the pair.
fn utf16_prefix_len(s: &str, units: usize) -> Option<usize> {
    let mut seen = 0usize;
    for (idx, ch) in s.char_indices() {
        if seen == units {
            return Some(idx);
        }
        let width = ch.len_utf16();
        if seen + width > units {
            tracing::debug!(units, "frame length splits a surrogate pair");
            return Some(idx);
        }
        seen += width;
    }
    (seen == units).then_some(s.len())
}

/// Parse as many complete frames from `buf` as possible.
///
/// Returns the frames and the byte offset where the unconsumed remainder starts.
/// Scanning stops at an incomplete frame or at text that is not a length marker;
/// a complete frame with an unparseable payload is logged and skipped.
pub fn parse_frames(buf: &str) -> (Vec<Frame>, usize) {
    let mut frames = Vec::new();
    let mut pos = 0usize;

    loop {
        let rest = &buf[pos..];
        let trimmed = rest.trim_start();
        let start = pos + (rest.len() - trimmed.len());
        if trimmed.is_empty() {
            pos = start;
            break;
        }

        let digits = trimmed.bytes().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 || trimmed.as_bytes().get(digits) != Some(&b'\n') {
            // Not a marker, or the marker's line break has not arrived yet.
            break;
        }
        let Ok(declared) = trimmed[..digits].parse::<usize>() else {
            break;
        };

        let body_start = start + digits + 1;
        let Some(body_len) = utf16_prefix_len(&buf[body_start..], declared) else {
            break;
        };
        let body_end = body_start + body_len;
        pos = body_end;

        let chunk = buf[body_start..body_end].trim();
        if chunk.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(chunk) {
            Ok(payload) => frames.push(Frame {
                declared_len: declared,
                payload,
            }),
            Err(e) => {
                tracing::warn!(declared, error = %e, "skipping malformed frame payload");
            }
        }
    }

    (frames, pos)
}

/// Whole-buffer JSON, then newline-delimited JSON.
fn fallback_values(text: &str) -> Option<Vec<Value>> {
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Some(vec![v]);
    }

    let values: Vec<Value> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|l| serde_json::from_str::<Value>(l).ok())
        // Bare numbers on their own line are length markers, not content.
        .filter(|v| v.is_array() || v.is_object())
        .collect();
    (!values.is_empty()).then_some(values)
}

/// Trailing frame whose declared length runs past the end of input, typically
/// by the line break that would have followed the payload.
fn lenient_trailing_frame(text: &str) -> Option<Frame> {
    let (marker, body) = text.split_once('\n')?;
    let declared = marker.trim().parse::<usize>().ok()?;
    let payload = serde_json::from_str::<Value>(body.trim()).ok()?;
    Some(Frame {
        declared_len: declared,
        payload,
    })
}

fn excerpt(text: &str) -> String {
    let mut out: String = text.chars().take(HINT_EXCERPT_CHARS).collect();
    if text.chars().count() > HINT_EXCERPT_CHARS {
        out.push('…');
    }
    out
}

/// Strip the anti-hijacking prefix (and stray quotes after it).
fn strip_xssi(text: &str) -> &str {
    let trimmed = text.trim_start();
    match trimmed.strip_prefix(XSSI_PREFIX) {
        Some(rest) => rest.trim_start_matches(|c| c == '\'' || c == '"'),
        None => trimmed,
    }
}

/// Incremental frame decoder over text.
///
/// Feed arriving text with [`feed`](Self::feed); every call returns the frames
/// completed so far and keeps the unconsumed remainder for the next call.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
    prefix_checked: bool,
    frames_seen: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` while the buffer could still be the start of the prefix.
    fn check_prefix(&mut self) -> bool {
        if self.prefix_checked {
            return true;
        }
        let trimmed = self.buffer.trim_start();
        if trimmed.len() < XSSI_PREFIX.len() && XSSI_PREFIX.starts_with(trimmed) {
            return false;
        }
        if trimmed.starts_with(XSSI_PREFIX) {
            self.buffer = strip_xssi(&self.buffer).to_string();
        }
        self.prefix_checked = true;
        true
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<Frame> {
        self.buffer.push_str(chunk);
        if !self.check_prefix() {
            return Vec::new();
        }
        let (frames, consumed) = parse_frames(&self.buffer);
        self.buffer.drain(..consumed);
        self.frames_seen += frames.len();
        frames
    }

    /// Like [`feed`](Self::feed), with list payloads spliced into envelopes.
    pub fn feed_envelopes(&mut self, chunk: &str) -> Vec<Value> {
        self.feed(chunk)
            .into_iter()
            .flat_map(Frame::into_envelopes)
            .collect()
    }

    /// Text received but not yet part of a complete frame.
    pub fn remainder(&self) -> &str {
        &self.buffer
    }

    pub fn frames_seen(&self) -> usize {
        self.frames_seen
    }

    /// End of input: decode whatever is left using the one-shot fallbacks.
    ///
    /// Fails only when the whole input produced no frame at all.
    pub fn finish(&mut self) -> Result<Vec<Frame>, PipelineError> {
        self.prefix_checked = true;
        let rest = std::mem::take(&mut self.buffer);
        let text = strip_xssi(&rest).trim();

        if text.is_empty() {
            if self.frames_seen > 0 {
                return Ok(Vec::new());
            }
            return Err(PipelineError::NoJson { hint: None }.with_hint("empty response body"));
        }

        let frames: Vec<Frame> = if let Some(frame) = lenient_trailing_frame(text) {
            vec![frame]
        } else if let Some(values) = fallback_values(text) {
            values
                .into_iter()
                .map(|payload| Frame {
                    declared_len: 0,
                    payload,
                })
                .collect()
        } else if self.frames_seen > 0 {
            tracing::warn!(
                remainder = %excerpt(text),
                "discarding undecodable trailing data"
            );
            Vec::new()
        } else {
            return Err(PipelineError::NoJson { hint: None }.with_hint(excerpt(text)));
        };

        self.frames_seen += frames.len();
        Ok(frames)
    }
}

/// One-shot decoding of a complete response body into envelopes.
///
/// Tries length markers first, then the whole body as one JSON value, then
/// newline-delimited JSON.
pub fn extract_json(text: &str) -> Result<Vec<Value>, PipelineError> {
    let body = strip_xssi(text);
    let (frames, consumed) = parse_frames(body);
    if !frames.is_empty() {
        let mut envelopes: Vec<Value> = frames.into_iter().flat_map(Frame::into_envelopes).collect();
        if let Some(trailing) = lenient_trailing_frame(body[consumed..].trim()) {
            envelopes.extend(trailing.into_envelopes());
        }
        return Ok(envelopes);
    }

    let trimmed = body.trim();
    if let Some(frame) = lenient_trailing_frame(trimmed) {
        return Ok(frame.into_envelopes());
    }
    match fallback_values(trimmed) {
        Some(values) => Ok(values
            .into_iter()
            .flat_map(|v| match v {
                Value::Array(items) => items,
                other => vec![other],
            })
            .collect()),
        None => Err(PipelineError::NoJson { hint: None }.with_hint(excerpt(trimmed))),
    }
}

/// `tokio_util` codec adapter over [`FrameDecoder`] for byte input.
///
/// Incomplete UTF-8 sequences at the end of a read stay in the byte buffer
/// until the rest of the character arrives.
#[derive(Debug, Default)]
pub struct LengthFrameDecoder {
    inner: FrameDecoder,
    pending: VecDeque<Frame>,
    finished: bool,
}

impl LengthFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn absorb(&mut self, src: &mut BytesMut) {
        loop {
            match std::str::from_utf8(src) {
                Ok(text) => {
                    let frames = self.inner.feed(text);
                    self.pending.extend(frames);
                    src.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    let frames = self.inner.feed(&String::from_utf8_lossy(&src[..valid]));
                    self.pending.extend(frames);
                    match e.error_len() {
                        None => {
                            src.advance(valid);
                            return;
                        }
                        Some(bad) => {
                            tracing::debug!(bad, "replacing invalid UTF-8 in response body");
                            let frames = self.inner.feed("\u{FFFD}");
                            self.pending.extend(frames);
                            src.advance(valid + bad);
                        }
                    }
                }
            }
        }
    }
}

impl Decoder for LengthFrameDecoder {
    type Item = Frame;
    type Error = PipelineError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, PipelineError> {
        if !src.is_empty() {
            self.absorb(src);
        }
        Ok(self.pending.pop_front())
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, PipelineError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !self.finished {
            self.finished = true;
            if !src.is_empty() {
                let frames = self.inner.feed(&String::from_utf8_lossy(src));
                self.pending.extend(frames);
                src.clear();
            }
            let frames = self.inner.finish()?;
            self.pending.extend(frames);
        }
        Ok(self.pending.pop_front())
    }
}

struct EnvelopeState {
    input: BoxStream<'static, Bytes>,
    buf: BytesMut,
    codec: LengthFrameDecoder,
    ready: VecDeque<Value>,
    eof: bool,
    done: bool,
}

/// Decode a response byte stream into envelopes, lazily.
pub fn decode_envelopes(input: BoxStream<'static, Bytes>) -> BoxStream<'static, Value> {
    let state = EnvelopeState {
        input,
        buf: BytesMut::new(),
        codec: LengthFrameDecoder::new(),
        ready: VecDeque::new(),
        eof: false,
        done: false,
    };

    let stream = stream::unfold(state, |mut st| async move {
        loop {
            if let Some(v) = st.ready.pop_front() {
                return Some((Ok(v), st));
            }
            if st.done {
                return None;
            }

            let next = if st.eof {
                st.codec.decode_eof(&mut st.buf)
            } else {
                st.codec.decode(&mut st.buf)
            };
            match next {
                Ok(Some(frame)) => {
                    st.ready.extend(frame.into_envelopes());
                    continue;
                }
                Ok(None) if st.eof => {
                    st.done = true;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    st.done = true;
                    return Some((Err(crate::Error::from(e)), st));
                }
            }

            match st.input.next().await {
                Some(Ok(bytes)) => st.buf.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => st.eof = true,
            }
        }
    });

    Box::pin(stream)
}
