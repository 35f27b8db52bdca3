use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::services::extract::NameOutcome;

/// Chapter label → ordered paragraph blocks.
pub type Book = IndexMap<String, Vec<String>>;

#[derive(Debug, Clone)]
pub struct CharacterRecord {
    pub name: String,
    pub profile: String,
    pub outcome: NameOutcome,
}

/// Everything the planning stages have produced so far. Each stage returns a
/// new value with one more field filled in.
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct NovelContext {
    pub subject: String,
    pub genre: String,
    pub author: String,
    pub profile: String,
    pub title: String,
    pub plot: String,
    pub chapters: IndexMap<String, String>,
    pub events: IndexMap<String, Vec<String>>,
}

impl NovelContext {
    pub fn new(subject: &str, genre: &str, author: &str) -> Self {
        Self {
            subject: subject.to_string(),
            genre: genre.to_string(),
            author: author.to_string(),
            ..Default::default()
        }
    }

    pub fn with_profile(self, profile: String) -> Self {
        Self { profile, ..self }
    }

    pub fn with_title(self, title: String) -> Self {
        Self { title, ..self }
    }

    pub fn with_plot(self, plot: String) -> Self {
        Self { plot, ..self }
    }

    pub fn with_chapters(self, chapters: IndexMap<String, String>) -> Self {
        Self { chapters, ..self }
    }

    pub fn with_events(self, events: IndexMap<String, Vec<String>>) -> Self {
        Self { events, ..self }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarratedEvent {
    pub chapter: String,
    pub event: String,
}

/// Rolling history for prose generation. Steps never mutate a state in place;
/// they return the next one.
#[derive(Debug, Clone, Default)]
pub struct NarrationState {
    narrated: Vec<NarratedEvent>,
    chapter_paragraphs: Vec<String>,
}

impl NarrationState {
    pub fn narrated(&self) -> &[NarratedEvent] {
        &self.narrated
    }

    pub fn chapter_paragraphs(&self) -> &[String] {
        &self.chapter_paragraphs
    }

    /// One narrated event per line, tagged with its chapter.
    pub fn narrated_text(&self) -> String {
        self.narrated
            .iter()
            .map(|n| format!("[{}] {}", n.chapter, n.event))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn previous_paragraphs(&self) -> String {
        self.chapter_paragraphs.join("\n\n")
    }

    /// Clears the per-chapter paragraphs, keeping the narrated history.
    pub fn begin_chapter(&self) -> Self {
        Self {
            narrated: self.narrated.clone(),
            chapter_paragraphs: Vec::new(),
        }
    }

    pub fn record(&self, chapter: &str, event: &str, paragraph: &str) -> Self {
        let mut narrated = self.narrated.clone();
        narrated.push(NarratedEvent {
            chapter: chapter.to_string(),
            event: event.to_string(),
        });
        let mut chapter_paragraphs = self.chapter_paragraphs.clone();
        chapter_paragraphs.push(paragraph.to_string());
        Self {
            narrated,
            chapter_paragraphs,
        }
    }
}
