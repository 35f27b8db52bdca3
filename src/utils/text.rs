use regex::Regex;
use std::sync::OnceLock;

const SAFE_TITLE_PUNCTUATION: &[char] = &['-', '_', '.', ',', '(', ')', '\''];

/// Keeps characters that are safe in a file name and in an identifier.
pub fn sanitize_identifier(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// Derives a file stem from a title: alphanumerics, spaces and a few safe
/// punctuation marks survive, spaces become underscores.
pub fn sanitize_file_stem(title: &str, fallback: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || SAFE_TITLE_PUNCTUATION.contains(c))
        .collect();
    let stem = kept.trim().replace(' ', "_");
    // "." and ".." are not usable names
    if stem.is_empty() || stem.chars().all(|c| c == '.') {
        fallback.to_string()
    } else {
        stem
    }
}

pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", s[..idx].trim_end()),
        None => s.to_string(),
    }
}

fn think_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("invalid think regex"))
}

/// Strips reasoning blocks and code fences some local models wrap replies in.
pub fn clean_response(s: &str) -> String {
    let s = think_regex().replace_all(s, "");
    let s = s.trim();
    let s = if s.starts_with("```") {
        let body = s.trim_start_matches('`');
        // drop a language tag on the fence line
        let body = match body.find('\n') {
            Some(idx) if !body[..idx].contains(' ') => &body[idx + 1..],
            _ => body,
        };
        body.trim_end_matches('`')
    } else {
        s
    };
    s.trim().to_string()
}

/// Strips surrounding quotes and Markdown emphasis from a one-line answer.
pub fn strip_decoration(s: &str) -> String {
    s.trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '*' | '#' | '`' | '_' | '“' | '”'))
        .trim()
        .to_string()
}
