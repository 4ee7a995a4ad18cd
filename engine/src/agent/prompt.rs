//! Prompt building and input hygiene
//!
//! Everything that reaches the model goes through here: user queries are
//! sanitized and length-capped, screen context is truncated, and known
//! prompt-injection phrasings are screened before a prompt is assembled.

use std::fmt::Write;

/// Maximum user-query length in characters
pub const MAX_QUERY_CHARS: usize = 4096;

/// Maximum screen-context length in characters
pub const MAX_SCREEN_CHARS: usize = 16000;

/// Phrasings that indicate an attempt to override the system prompt
const INJECTION_PATTERNS: &[&str] = &[
    "ignore previous",
    "ignore all",
    "disregard",
    "forget everything",
    "new instructions",
    "system prompt",
    "you are now",
    "act as",
    "pretend to be",
    "jailbreak",
    "dan mode",
    "developer mode",
];

/// System prompt framing every turn
const SYSTEM_PROMPT: &str = "You are Sentinel, an on-device assistant agent. \
Output ONLY valid JSON.\n\
RULES:\n\
1. Output ONLY JSON, nothing else\n\
2. Actions: tap, scroll, type, back, home, wait, none\n\
3. Targets must match exact text from the screen\n\
4. If unsure: {\"action\":\"none\"}";

/// Sanitize raw user input
///
/// Drops control characters (keeping newlines and tabs), collapses runs of
/// spaces and tabs to a single space, caps the length at `max_chars`, and
/// trims surrounding whitespace.
pub fn sanitize(input: &str, max_chars: usize) -> String {
    let mut result = String::with_capacity(input.len().min(max_chars));
    let mut last_space = false;

    for c in input.chars().take(max_chars) {
        if (c as u32) < 32 && c != '\n' && c != '\t' {
            continue;
        }
        let is_space = c == ' ' || c == '\t';
        if is_space && last_space {
            continue;
        }
        result.push(if is_space { ' ' } else { c });
        last_space = is_space;
    }

    result.trim().to_string()
}

/// Screen user input for known injection phrasings, case-insensitively
pub fn contains_injection(input: &str) -> bool {
    let lower = input.to_lowercase();
    INJECTION_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}

/// Truncate screen context to its character budget
pub fn truncate_screen(screen: &str) -> &str {
    match screen.char_indices().nth(MAX_SCREEN_CHARS) {
        Some((idx, _)) => &screen[..idx],
        None => screen,
    }
}

/// Assemble the tagged prompt layout the model was tuned on
///
/// Sections appear in a fixed order: system rules, optional task
/// instructions, screen context, then the user query.
pub fn build_prompt(task: Option<&str>, screen: &str, query: &str) -> String {
    let screen = truncate_screen(screen);
    let mut prompt = String::with_capacity(screen.len() + query.len() + 512);

    prompt.push_str("<|system|>\n");
    prompt.push_str(SYSTEM_PROMPT);
    if let Some(task) = task {
        prompt.push('\n');
        prompt.push_str(task);
    }
    let _ = write!(
        prompt,
        "\n</|system|>\n\n<|screen|>\n{screen}\n</|screen|>\n\n<|user|>\n{query}\n</|user|>\n\n<|assistant|>\n"
    );

    prompt
}
