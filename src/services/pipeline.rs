use anyhow::{Context, Result};
use indicatif::ProgressBar;
use log::info;
use std::time::Duration;

use crate::core::state::{Book, NarrationState, NovelContext};
use crate::services::extract::fallback_event;
use crate::services::generators::{prose_request, Generators};

/// Narrates every event of every chapter in order. Each call sees all events
/// narrated so far and the paragraphs already written for its chapter.
pub async fn write_book(
    gens: &Generators<'_>,
    ctx: &NovelContext,
    temperature: f32,
    delay: Duration,
    progress: &ProgressBar,
) -> Result<Book> {
    let mut book = Book::new();
    let mut state = NarrationState::default();
    let mut first_call = true;

    for (label, summary) in &ctx.chapters {
        let events = match ctx.events.get(label) {
            Some(events) if !events.is_empty() => events.clone(),
            _ => vec![fallback_event(summary)],
        };
        info!("Writing {} ({} events)", label, events.len());
        progress.set_message(label.clone());

        state = state.begin_chapter();
        for event in &events {
            if !first_call && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            first_call = false;

            let req = prose_request(ctx, &state, label, summary, event);
            let paragraph = gens
                .prose(&req, temperature)
                .await
                .with_context(|| format!("Failed to narrate `{}` in {}", event, label))?;
            state = state.record(label, event, &paragraph);
            progress.inc(1);
        }
        book.insert(label.clone(), state.chapter_paragraphs().to_vec());
    }

    info!("Narrated {} event(s) across {} chapter(s)", state.narrated().len(), book.len());
    Ok(book)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PromptTemplates;
    use crate::services::llm::{GenerationError, LlmClient};
    use async_trait::async_trait;
    use indexmap::IndexMap;
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    struct CountingLlm {
        prompts: Arc<Mutex<Vec<String>>>,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl LlmClient for CountingLlm {
        async fn generate(&self, prompt: &str, _: f32) -> Result<String, GenerationError> {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            if Some(prompts.len()) == self.fail_on {
                return Err(GenerationError::Empty);
            }
            Ok(format!("para-{}", prompts.len()))
        }
    }

    fn context(chapters: &[(&str, &str, Vec<&str>)]) -> NovelContext {
        let mut summaries = IndexMap::new();
        let mut events = IndexMap::new();
        for (label, summary, evs) in chapters {
            summaries.insert(label.to_string(), summary.to_string());
            events.insert(
                label.to_string(),
                evs.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
            );
        }
        NovelContext::new("s", "g", "a")
            .with_chapters(summaries)
            .with_events(events)
    }

    fn prompts(prose: &str) -> PromptTemplates {
        PromptTemplates {
            prose: prose.to_string(),
            ..PromptTemplates::default()
        }
    }

    #[tokio::test]
    async fn test_single_chapter_two_events() -> Result<()> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let llm = CountingLlm {
            prompts: seen.clone(),
            fail_on: None,
        };
        let templates = prompts("PREV[{previous_paragraphs}]");
        let gens = Generators::new(&llm, &templates);
        let ctx = context(&[("Chapter 1", "It begins.", vec!["first", "second"])]);

        let book = write_book(&gens, &ctx, 0.9, Duration::ZERO, &ProgressBar::hidden()).await?;

        assert_eq!(book["Chapter 1"], vec!["para-1", "para-2"]);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], "PREV[]");
        assert_eq!(seen[1], "PREV[para-1]");
        Ok(())
    }

    #[tokio::test]
    async fn test_history_spans_chapters_and_paragraphs_reset() -> Result<()> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let llm = CountingLlm {
            prompts: seen.clone(),
            fail_on: None,
        };
        let templates = prompts("{chapter}|{event}|{narrated_events}|{previous_paragraphs}");
        let gens = Generators::new(&llm, &templates);
        let ctx = context(&[
            ("Prologue", "A signal arrives.", vec!["ping"]),
            ("Chapter 1", "The crew investigates.", vec!["dock", "board"]),
        ]);

        let book = write_book(&gens, &ctx, 0.9, Duration::ZERO, &ProgressBar::hidden()).await?;

        assert_eq!(book.keys().collect::<Vec<_>>(), vec!["Prologue", "Chapter 1"]);
        assert_eq!(book["Prologue"], vec!["para-1"]);
        assert_eq!(book["Chapter 1"], vec!["para-2", "para-3"]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], "Prologue|ping||");
        assert_eq!(seen[1], "Chapter 1|dock|[Prologue] ping|");
        assert_eq!(seen[2], "Chapter 1|board|[Prologue] ping\n[Chapter 1] dock|para-2");
        Ok(())
    }

    #[tokio::test]
    async fn test_chapter_without_events_gets_fallback_event() -> Result<()> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let llm = CountingLlm {
            prompts: seen.clone(),
            fail_on: None,
        };
        let templates = prompts("{event}");
        let gens = Generators::new(&llm, &templates);
        let ctx = context(&[("Epilogue", "Home again.", vec![])]);

        let book = write_book(&gens, &ctx, 0.9, Duration::ZERO, &ProgressBar::hidden()).await?;
        assert_eq!(book["Epilogue"].len(), 1);
        assert_eq!(seen.lock().unwrap()[0], "Home again.");
        Ok(())
    }

    #[tokio::test]
    async fn test_generation_failure_aborts() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let llm = CountingLlm {
            prompts: seen.clone(),
            fail_on: Some(2),
        };
        let templates = prompts("{event}");
        let gens = Generators::new(&llm, &templates);
        let ctx = context(&[("Chapter 1", "x", vec!["a", "b", "c"])]);

        let err = write_book(&gens, &ctx, 0.9, Duration::ZERO, &ProgressBar::hidden())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to narrate `b`"));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
