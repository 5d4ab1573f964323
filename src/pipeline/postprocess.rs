//! Post-processing: deterministic cleanup of extracted text and model output.
//!
//! ## Why is post-processing necessary?
//!
//! Both ends of the pipeline produce text with *structural* noise that has
//! nothing to do with its content:
//!
//! - Format readers emit CRLF line endings, runs of spaces from PDF glyph
//!   positioning, zero-width characters and stray control bytes
//! - Well-prompted models still wrap JSON in ` ```json ... ``` ` fences,
//!   prepend "Here is the JSON:" or append a closing remark
//!
//! Fixing these with cheap regex/string rules keeps the prompt focused on
//! *what to produce* and keeps the format readers focused on *where the text
//! lives*. Each rule is a pure `&str → String` function and independently
//! testable.
//!
//! ## Rule Order
//!
//! For extracted text: normalise line endings before trimming lines, strip
//! invisible characters before collapsing spaces so a zero-width joiner does
//! not keep two spaces apart, and collapse blank lines last.

use once_cell::sync::Lazy;
use regex::Regex;

/// Normalise text produced by a format reader.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF / CR → LF)
/// 2. Strip invisible Unicode and control characters (keeps `\n` and `\t`)
/// 3. Collapse runs of spaces and tabs inside a line to one space
/// 4. Trim trailing whitespace per line
/// 5. Collapse 3+ consecutive newlines to a single blank line
/// 6. Trim the whole text
pub fn clean_extracted_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = collapse_inline_spaces(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

/// Isolate the JSON object in a raw model response.
///
/// Strips a BOM, outer markdown fences and any prose around the outermost
/// `{ ... }`. Returns the input trimmed when no braces are found, so the
/// parser reports the real problem.
pub fn extract_json_payload(raw: &str) -> &str {
    let s = raw.trim_start_matches('\u{FEFF}').trim();
    let s = strip_json_fences(s);
    match (s.find('{'), s.rfind('}')) {
        (Some(start), Some(end)) if start < end => &s[start..=end],
        _ => s,
    }
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode and control characters ─────────────────

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|&c| {
            !matches!(
                c,
                '\u{200B}' | '\u{FEFF}' | '\u{00AD}' | '\u{200C}' | '\u{200D}' | '\u{2060}'
            ) && (!c.is_control() || c == '\n' || c == '\t')
        })
        .collect()
}

// ── Rule 3: Collapse inline whitespace runs ──────────────────────────────────

static RE_INLINE_SPACES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t\u{00A0}]{2,}|\t").unwrap());

fn collapse_inline_spaces(input: &str) -> String {
    RE_INLINE_SPACES.replace_all(input, " ").to_string()
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Model output: strip outer fences ─────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*\n(.*?)\n?```\s*$").unwrap());

fn strip_json_fences(input: &str) -> &str {
    match RE_OUTER_FENCES.captures(input).and_then(|c| c.get(1)) {
        Some(m) => &input[m.start()..m.end()],
        None => input,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
