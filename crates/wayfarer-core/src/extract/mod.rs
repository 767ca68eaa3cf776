//! Structured output extraction
//!
//! Text generators wrap the records they are asked for in commentary, code
//! fences and comments, or cut them short. `extract` recovers a single JSON
//! object through an ordered list of layers; the first layer that yields a
//! well-formed object wins. Each layer targets one malformation:
//!
//! 1. `Direct`: the trimmed text already is one object.
//! 2. `Fence`: one leading/trailing fence line (```` ```json ````) around the body.
//! 3. `Prefix`: a short lead-in ("Sure, here it is:") before the opening brace.
//! 4. `Balanced`: a valid leading object followed by prose or a second object.
//! 5. `Comments`: `//` and `/* */` comments inside the object.
//!
//! Extraction never fails; when nothing is recovered the raw text comes back
//! as `ExtractionResult::Unstructured`.

use serde_json::Value;

/// Longest lead-in (in chars) dropped before the opening brace.
pub const MAX_PREFIX_CHARS: usize = 80;

const FENCE: &str = "```";

/// Result of structured output extraction
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionResult {
    /// A single well-formed JSON object
    Structured(Value),
    /// Raw text, returned untouched
    Unstructured(String),
}

impl ExtractionResult {
    pub fn is_structured(&self) -> bool {
        matches!(self, ExtractionResult::Structured(_))
    }

    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            ExtractionResult::Structured(value) => Some(value),
            ExtractionResult::Unstructured(_) => None,
        }
    }

    pub fn into_structured(self) -> Option<Value> {
        match self {
            ExtractionResult::Structured(value) => Some(value),
            ExtractionResult::Unstructured(_) => None,
        }
    }
}

/// Layer that recovered the object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryLayer {
    Direct,
    Fence,
    Prefix,
    Balanced,
    Comments,
}

impl RecoveryLayer {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryLayer::Direct => "direct",
            RecoveryLayer::Fence => "fence",
            RecoveryLayer::Prefix => "prefix",
            RecoveryLayer::Balanced => "balanced",
            RecoveryLayer::Comments => "comments",
        }
    }
}

/// Recover a structured object from generated text.
pub fn extract(raw: &str) -> ExtractionResult {
    extract_traced(raw).0
}

/// Same as [`extract`], also reporting which layer succeeded.
pub fn extract_traced(raw: &str) -> (ExtractionResult, Option<RecoveryLayer>) {
    let trimmed = raw.trim();

    if let Some(value) = parse_object(trimmed) {
        return (ExtractionResult::Structured(value), Some(RecoveryLayer::Direct));
    }

    let unfenced = strip_fence(trimmed);
    if let Some(body) = unfenced {
        if let Some(value) = parse_object(body) {
            return (ExtractionResult::Structured(value), Some(RecoveryLayer::Fence));
        }
    }
    let body = unfenced.unwrap_or(trimmed);

    if let Some(candidate) = strip_short_prefix(body) {
        if let Some(value) = parse_object(candidate) {
            return (ExtractionResult::Structured(value), Some(RecoveryLayer::Prefix));
        }
        if let Some(object) = scan_balanced_object(candidate) {
            if let Some(value) = parse_object(object) {
                return (
                    ExtractionResult::Structured(value),
                    Some(RecoveryLayer::Balanced),
                );
            }
        }
    }

    let uncommented = strip_comments(body);
    if let Some(value) = parse_object(uncommented.trim()) {
        return (
            ExtractionResult::Structured(value),
            Some(RecoveryLayer::Comments),
        );
    }

    (ExtractionResult::Unstructured(raw.to_string()), None)
}

/// Parse `text` as exactly one JSON object, nothing before or after it.
pub fn parse_object(text: &str) -> Option<Value> {
    if !text.starts_with('{') {
        return None;
    }
    match serde_json::from_str::<Value>(text) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Remove one fence line before the body and one after it.
///
/// Returns `None` when the text does not open with a fence.
pub fn strip_fence(text: &str) -> Option<&str> {
    if !text.starts_with(FENCE) {
        return None;
    }
    let body = match text.find('\n') {
        Some(newline) => &text[newline + 1..],
        None => return None,
    };
    let body = body.trim_end();
    let body = match body.rfind('\n') {
        Some(newline) if body[newline + 1..].trim_start().starts_with(FENCE) => &body[..newline],
        None if body.starts_with(FENCE) => "",
        _ => body.strip_suffix(FENCE).unwrap_or(body),
    };
    Some(body.trim())
}

/// Slice starting at the first opening brace, when the lead-in before it is short.
///
/// Returns the text itself when it already opens with a brace and `None` when
/// there is no brace or the lead-in is too long to be throwaway commentary.
pub fn strip_short_prefix(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    if text[..start].chars().count() > MAX_PREFIX_CHARS {
        return None;
    }
    Some(&text[start..])
}

/// Slice of the first balanced object at the start of `text`.
///
/// Single pass over the bytes; braces inside string literals, including
/// escaped quotes, never change the depth. Returns `None` when `text` does not
/// open with a brace or the object is never closed.
pub fn scan_balanced_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.first() != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (idx, &byte) in bytes.iter().enumerate() {
        if in_string {
            if escape {
                escape = false;
            } else if byte == b'\\' {
                escape = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=idx]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Drop `//` line comments and `/* */` block comments outside string literals.
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escape = false;

    while let Some(ch) = chars.next() {
        if in_string {
            out.push(ch);
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match (ch, chars.peek().copied()) {
            ('"', _) => {
                in_string = true;
                out.push(ch);
            }
            ('/', Some('/')) => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
                out.push(' ');
            }
            _ => out.push(ch),
        }
    }

    out
}
