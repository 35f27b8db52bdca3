//! Pulling structure out of free-form model output: character names,
//! chapter lists and per-chapter events.
//!
//! Parsing is lossy. Lines that do not fit the requested shape are dropped and
//! only counted in the debug log.

use indexmap::IndexMap;
use log::{debug, warn};
use rand::seq::IndexedRandom;
use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;

use crate::utils::text::{sanitize_identifier, truncate_chars};

const FALLBACK_EVENT_CHARS: usize = 80;
const FALLBACK_BASE_NAME: &str = "Character";

fn name_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?im)^[ \t>*#\-]*name[ \t]*\**[ \t]*:[ \t]*\**[ \t]*(.*)$").expect("invalid name regex")
    })
}

fn list_marker_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^(?:[-*•]+|\d+[.)])\s+").expect("invalid list marker regex"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameOutcome {
    Extracted,
    /// The model picked a blocked name; `original` was replaced.
    Substituted { original: String },
    /// No usable `Name:` line.
    Fallback,
}

#[derive(Debug, Clone)]
pub struct ExtractedName {
    pub name: String,
    /// The profile text, with a substituted name replaced throughout.
    pub text: String,
    pub outcome: NameOutcome,
}

#[derive(Debug, Clone)]
pub struct NameRules {
    disallowed: Vec<String>,
    alternatives: Vec<String>,
}

impl NameRules {
    pub fn new(disallowed: Vec<String>, alternatives: Vec<String>) -> Self {
        Self {
            disallowed,
            alternatives,
        }
    }

    pub fn is_disallowed(&self, name: &str, used: &[String]) -> bool {
        self.disallowed
            .iter()
            .chain(used.iter())
            .any(|d| d.eq_ignore_ascii_case(name))
    }

    /// Finds the first token after a `Name:` label. Names on the disallowed
    /// list or in `used` are swapped for an alternative.
    pub fn extract<R: Rng + ?Sized>(&self, text: &str, used: &[String], rng: &mut R) -> ExtractedName {
        let candidate = name_regex()
            .captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().split_whitespace().next())
            .map(sanitize_identifier)
            .filter(|n| n.chars().any(char::is_alphanumeric));

        let Some(original) = candidate else {
            let name = self.fallback_name(rng);
            warn!("No Name: label found, using {}", name);
            return ExtractedName {
                name,
                text: text.to_string(),
                outcome: NameOutcome::Fallback,
            };
        };

        if !self.is_disallowed(&original, used) {
            return ExtractedName {
                name: original,
                text: text.to_string(),
                outcome: NameOutcome::Extracted,
            };
        }

        match self.alternative_for(&original, used, rng) {
            Some(name) => {
                warn!("Replacing disallowed name {} with {}", original, name);
                ExtractedName {
                    text: replace_word(text, &original, &name),
                    name,
                    outcome: NameOutcome::Substituted { original },
                }
            }
            None => {
                let name = self.fallback_name(rng);
                warn!("No alternative left for {}, using {}", original, name);
                ExtractedName {
                    text: replace_word(text, &original, &name),
                    name,
                    outcome: NameOutcome::Substituted { original },
                }
            }
        }
    }

    fn alternative_for<R: Rng + ?Sized>(&self, original: &str, used: &[String], rng: &mut R) -> Option<String> {
        let differs = |a: &&String| !a.eq_ignore_ascii_case(original);
        let fresh: Vec<&String> = self
            .alternatives
            .iter()
            .filter(differs)
            .filter(|a| !self.is_disallowed(a, used))
            .collect();
        let pool: Vec<&String> = if fresh.is_empty() {
            self.alternatives.iter().filter(differs).collect()
        } else {
            fresh
        };
        pool.choose(rng).map(|s| s.to_string())
    }

    fn fallback_name<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        let base = self
            .alternatives
            .choose(rng)
            .map(|s| sanitize_identifier(s))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| FALLBACK_BASE_NAME.to_string());
        format!("{}_{}", base, rng.random_range(1000..10000))
    }
}

fn replace_word(text: &str, word: &str, replacement: &str) -> String {
    match Regex::new(&format!(r"\b{}\b", regex::escape(word))) {
        Ok(re) => re.replace_all(text, replacement).into_owned(),
        Err(_) => text.to_string(),
    }
}

/// Parses `<Label>: <summary>` lines into an ordered map.
pub fn parse_chapter_list(text: &str) -> IndexMap<String, String> {
    let mut chapters = IndexMap::new();
    let mut dropped = 0usize;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((label, summary)) = line.split_once(':') else {
            dropped += 1;
            continue;
        };
        let label = label
            .trim()
            .trim_matches(|c: char| matches!(c, '*' | '#' | '-' | '`') || c.is_whitespace());
        let summary = summary
            .trim()
            .trim_start_matches(|c: char| c == '*' || c.is_whitespace())
            .trim();
        if label.is_empty() || summary.is_empty() {
            dropped += 1;
            continue;
        }
        chapters.insert(label.to_string(), summary.to_string());
    }

    if dropped > 0 {
        debug!("Dropped {} malformed chapter line(s)", dropped);
    }
    chapters
}

/// Renders a chapter map back into the `<Label>: <summary>` form.
pub fn format_chapter_list(chapters: &IndexMap<String, String>) -> String {
    chapters
        .iter()
        .map(|(label, summary)| format!("{}: {}\n", label, summary))
        .collect()
}

/// One event per line. Never returns an empty list: an empty reply becomes a
/// single event drawn from the chapter summary.
pub fn parse_events(text: &str, chapter_summary: &str) -> Vec<String> {
    let events: Vec<String> = text
        .lines()
        .map(|l| list_marker_regex().replace(l.trim(), "").trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();

    if events.is_empty() {
        vec![fallback_event(chapter_summary)]
    } else {
        events
    }
}

pub fn fallback_event(chapter_summary: &str) -> String {
    let summary = chapter_summary.trim();
    if summary.is_empty() {
        "The story continues.".to_string()
    } else {
        truncate_chars(summary, FALLBACK_EVENT_CHARS)
    }
}
