//! Structured-output extraction from model completions
//!
//! Small on-device models rarely emit clean JSON even when asked to. This
//! module recovers a JSON value from whatever the model produced, using four
//! strategies tried in fixed priority order, each strictly less trusting
//! than the last:
//!
//! 1. **Direct parse**: the whole trimmed completion is a JSON document.
//! 2. **Markdown extraction**: the document is inside a ```json fence, a
//!    generic fence, or an inline backtick span.
//! 3. **Balanced scan**: the document is embedded in prose; scan from the
//!    earliest bracket to its matching close, skipping string contents.
//! 4. **Repair**: the document is malformed; fix trailing commas, single
//!    quotes, and bare keys, then reparse.
//!
//! The ordering is a contract: text that parses under an earlier strategy
//! must never reach a later one, because the repair passes are lossy and
//! could corrupt an already-valid document.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, trace};

/// Which strategy produced an extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The whole completion parsed as-is
    Direct,

    /// Recovered from a markdown fence or inline code span
    Markdown,

    /// Recovered by balanced-bracket scanning inside prose
    Balanced,

    /// Recovered after repair rewrites
    Repaired,
}

impl Strategy {
    /// Short name recorded on successful extractions
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Markdown => "markdown",
            Self::Balanced => "balanced",
            Self::Repaired => "repaired",
        }
    }

    /// Label appended to the attempt log when this strategy fails
    fn failure_label(&self) -> &'static str {
        match self {
            Self::Direct => "direct_parse_failed",
            Self::Markdown => "markdown_extraction_failed",
            Self::Balanced => "balanced_extraction_failed",
            Self::Repaired => "repair_failed",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an extraction attempt
///
/// Extraction failure is never fatal: `NotFound` carries the attempt log so
/// the calling node can decide how to recover (retry with a stricter
/// prompt, or fall back to a plain-text answer).
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// A JSON object was recovered
    ObjectFound(Value, Strategy),

    /// A JSON array was recovered
    ArrayFound(Value, Strategy),

    /// No strategy succeeded; the log lists each failure in order
    NotFound(Vec<String>),
}

impl Extraction {
    /// The recovered value, if any
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::ObjectFound(v, _) | Self::ArrayFound(v, _) => Some(v),
            Self::NotFound(_) => None,
        }
    }
}

/// Recover a JSON value from a model completion
pub fn extract_structured(text: &str) -> Extraction {
    let trimmed = text.trim();
    let mut attempts = Vec::new();

    if let Some(value) = try_direct(trimmed) {
        trace!(strategy = "direct", "extraction succeeded");
        return found(value, Strategy::Direct);
    }
    attempts.push(Strategy::Direct.failure_label().to_string());

    if let Some(value) = try_markdown(trimmed) {
        trace!(strategy = "markdown", "extraction succeeded");
        return found(value, Strategy::Markdown);
    }
    attempts.push(Strategy::Markdown.failure_label().to_string());

    if let Some(value) = try_balanced(trimmed) {
        trace!(strategy = "balanced", "extraction succeeded");
        return found(value, Strategy::Balanced);
    }
    attempts.push(Strategy::Balanced.failure_label().to_string());

    if let Some(value) = try_repair(trimmed) {
        trace!(strategy = "repaired", "extraction succeeded");
        return found(value, Strategy::Repaired);
    }
    attempts.push(Strategy::Repaired.failure_label().to_string());

    debug!(attempts = ?attempts, "no structure recovered from completion");
    Extraction::NotFound(attempts)
}

fn found(value: Value, strategy: Strategy) -> Extraction {
    if value.is_array() {
        Extraction::ArrayFound(value, strategy)
    } else {
        Extraction::ObjectFound(value, strategy)
    }
}

/// Strategy 1: the entire trimmed text is the document
fn try_direct(trimmed: &str) -> Option<Value> {
    let whole = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if !whole {
        return None;
    }
    parse_structure(trimmed)
}

/// Strategy 2: fenced blocks and inline code spans, in that order
fn try_markdown(text: &str) -> Option<Value> {
    let candidate = fenced_block(text, "```json")
        .or_else(|| fenced_block(text, "```"))
        .or_else(|| inline_span(text))?;

    parse_structure(candidate.trim())
}

/// Extract the body of the first fence opened by `opening`
///
/// Tolerates trailing prose after the closing fence. Returns `None` when no
/// such fence exists or its body does not look like a JSON document.
fn fenced_block<'a>(text: &'a str, opening: &str) -> Option<&'a str> {
    let start = text.find(opening)?;
    let after_opening = &text[start + opening.len()..];

    // Skip to the end of the opening line (drops a language tag if present)
    let body_start = after_opening.find('\n')? + 1;
    let body = &after_opening[body_start..];

    let body_end = body.find("```")?;
    let content = body[..body_end].trim();

    if content.starts_with('{') || content.starts_with('[') {
        Some(content)
    } else {
        None
    }
}

/// Extract the first inline `...` span that looks like a JSON document
fn inline_span(text: &str) -> Option<&str> {
    let start = text.find('`')?;
    let rest = &text[start + 1..];
    let end = rest.find('`')?;
    let content = rest[..end].trim();

    if content.starts_with('{') || content.starts_with('[') {
        Some(content)
    } else {
        None
    }
}

/// Strategy 3: balanced scan from the earliest bracket
///
/// Counts bracket depth, respecting double-quoted string literals and
/// backslash escapes, to find the close that returns depth to zero.
fn try_balanced(text: &str) -> Option<Value> {
    let start = text.find(['{', '['])?;
    let candidate = &text[start..];

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in candidate.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return parse_structure(&candidate[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Strategy 4: bound the document loosely, repair it, reparse
///
/// The slice runs from the first opening bracket to the *last* closing
/// bracket of the same kind, which tolerates unbalanced interiors that the
/// balanced scan gave up on.
fn try_repair(text: &str) -> Option<Value> {
    let start = text.find(['{', '['])?;
    let closer = if text.as_bytes()[start] == b'{' { '}' } else { ']' };
    let end = text.rfind(closer)?;
    if end <= start {
        return None;
    }

    let repaired = repair(&text[start..=end]);
    parse_structure(&repaired)
}

/// Apply the repair rewrites in order
///
/// 1. Strip trailing commas before `}` / `]` (string-aware).
/// 2. If the text has no double quotes but does have single quotes, swap
///    every single quote for a double quote.
/// 3. Quote bare identifiers used as keys.
///
/// Idempotent: repairing already-repaired text changes nothing.
fn repair(text: &str) -> String {
    let without_trailing_commas = strip_trailing_commas(text);

    let quoted = if !without_trailing_commas.contains('"')
        && without_trailing_commas.contains('\'')
    {
        without_trailing_commas.replace('\'', "\"")
    } else {
        without_trailing_commas
    };

    quote_bare_keys(&quoted)
}

/// Remove commas that directly precede a closing bracket
fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escape_next = false;

    for ch in text.chars() {
        if escape_next {
            escape_next = false;
            out.push(ch);
            continue;
        }
        match ch {
            '\\' if in_string => {
                escape_next = true;
                out.push(ch);
            }
            '"' => {
                in_string = !in_string;
                out.push(ch);
            }
            '}' | ']' if !in_string => {
                // Drop a comma (and any whitespace after it) left dangling
                // before this close
                while let Some(last) = out.chars().last() {
                    if last.is_whitespace() {
                        out.pop();
                    } else if last == ',' {
                        out.pop();
                        break;
                    } else {
                        break;
                    }
                }
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Wrap bare identifiers immediately followed by `:` in double quotes
///
/// Only identifiers preceded by `{` or `,` are touched, which keeps colons
/// inside values (URLs, times) intact.
fn quote_bare_keys(text: &str) -> String {
    static BARE_KEY: OnceLock<Regex> = OnceLock::new();
    let re = BARE_KEY.get_or_init(|| {
        Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:"#).expect("bare key pattern is valid")
    });
    re.replace_all(text, "$1\"$2\":").into_owned()
}

/// Parse text that must be a JSON object or array
fn parse_structure(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(v) if v.is_object() || v.is_array() => Some(v),
        _ => None,
    }
}
