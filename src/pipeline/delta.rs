//! Delta computation over cumulative text.
//!
//! The service resends the whole candidate text in every envelope. Near the
//! streaming edge it sometimes rewrites the tail (closing code fences,
//! backslash-escaping markdown markers), so the previously sent text is not
//! always a prefix of the new one. Deltas are then anchored on the count of
//! non-volatile characters (anything but whitespace and ASCII punctuation).

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

/// Trailing run of escaped markdown markers that flickers while streaming.
static FLICKER_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\+[`*_~].*$").expect("flicker regex must compile"));

const OPEN_FENCE_TAIL: &str = "\n```";

fn is_volatile(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r') || c.is_ascii_punctuation()
}

/// Strip the unstable tail of a non-final cumulative text.
pub fn clean_text(text: &str) -> Cow<'_, str> {
    let text = text.strip_suffix(OPEN_FENCE_TAIL).unwrap_or(text);
    FLICKER_ESCAPE.replace(text, "")
}

/// Result of one delta step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    /// Newly visible suffix.
    pub delta: String,
    /// Text to remember as "last sent" and expose as the cumulative value.
    pub full: String,
}

/// Compute the delta between the last sent text and a new cumulative value.
///
/// Non-final values are cleaned first; final values are used as-is. A new
/// value that is a truncation of `last_sent` keeps `last_sent` as `full`. A
/// value that diverges from it (the service rewrote earlier text) replaces it,
/// so `full` may then be shorter than `last_sent`.
pub fn compute_delta(new_raw: &str, last_sent: &str, is_final: bool) -> Delta {
    let new_text: Cow<'_, str> = if is_final {
        Cow::Borrowed(new_raw)
    } else {
        clean_text(new_raw)
    };

    if let Some(rest) = new_text.strip_prefix(last_sent) {
        return Delta {
            delta: rest.to_string(),
            full: new_text.into_owned(),
        };
    }
    if last_sent.starts_with(new_text.as_ref()) {
        // The new value is a truncation of what was already sent.
        return Delta {
            delta: String::new(),
            full: last_sent.to_string(),
        };
    }

    let last: Vec<char> = last_sent.chars().collect();
    let new: Vec<char> = new_text.chars().collect();

    let target = last.iter().filter(|c| !is_volatile(**c)).count();
    let mut anchor = 0usize;
    if target > 0 {
        let mut seen = 0usize;
        let mut found = None;
        for (i, c) in new.iter().enumerate() {
            if !is_volatile(*c) {
                seen += 1;
            }
            if seen == target {
                found = Some(i + 1);
                break;
            }
        }
        match found {
            Some(i) => anchor = i,
            None => {
                let common = last.iter().zip(&new).take_while(|(a, b)| a == b).count();
                tracing::debug!(common, "delta fell back to common prefix");
                return Delta {
                    delta: new[common..].iter().collect(),
                    full: new_text.into_owned(),
                };
            }
        }
    }

    // Volatile tail of the last text, to be matched against the new text
    // after the anchor while tolerating added or removed escapes.
    let tail_start = last
        .iter()
        .rposition(|c| !is_volatile(*c))
        .map(|i| i + 1)
        .unwrap_or(0);
    let tail = &last[tail_start..];

    let (mut i, mut j) = (0usize, 0usize);
    while i < tail.len() && anchor + j < new.len() {
        let s = tail[i];
        let n = new[anchor + j];
        if s == n {
            i += 1;
            j += 1;
        } else if n == '\\' && new.get(anchor + j + 1) == Some(&s) {
            i += 1;
            j += 2;
        } else if s == '\\' && tail.get(i + 1) == Some(&n) {
            i += 2;
            j += 1;
        } else {
            break;
        }
    }

    Delta {
        delta: new[anchor + j..].iter().collect(),
        full: new_text.into_owned(),
    }
}
