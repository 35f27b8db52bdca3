use anyhow::{Context, Result};
use log::debug;

use crate::core::config::PromptTemplates;
use crate::core::state::{NarrationState, NovelContext};
use crate::core::template::{fill, request, GenerationRequest};
use crate::services::extract::format_chapter_list;
use crate::services::llm::LlmClient;
use crate::utils::text::clean_response;

/// One method per artifact kind. Each fills its template and asks the model.
pub struct Generators<'a> {
    llm: &'a dyn LlmClient,
    prompts: &'a PromptTemplates,
}

impl<'a> Generators<'a> {
    pub fn new(llm: &'a dyn LlmClient, prompts: &'a PromptTemplates) -> Self {
        Self { llm, prompts }
    }

    async fn run(&self, name: &str, template: &str, req: &GenerationRequest, temperature: f32) -> Result<String> {
        let prompt = fill(name, template, req)?;
        debug!("Generating {} ({} chars of prompt)", name, prompt.len());
        let raw = self
            .llm
            .generate(&prompt, temperature)
            .await
            .with_context(|| format!("{} generation failed", name))?;
        Ok(clean_response(&raw))
    }

    pub async fn character(&self, source: &str, avoid_names: &[String], temperature: f32) -> Result<String> {
        let source = if source.trim().is_empty() {
            "(none)"
        } else {
            source
        };
        let req = request([
            ("source", source.to_string()),
            ("avoid_names", avoid_names.join(", ")),
        ]);
        self.run("character", &self.prompts.character, &req, temperature)
            .await
    }

    pub async fn subject_line(&self, sample: &str, temperature: f32) -> Result<String> {
        let req = request([("sample", sample)]);
        self.run("subject", &self.prompts.subject, &req, temperature)
            .await
    }

    pub async fn profile(&self, ctx: &NovelContext, temperature: f32) -> Result<String> {
        self.run("profile", &self.prompts.profile, &context_request(ctx), temperature)
            .await
    }

    pub async fn title(&self, ctx: &NovelContext, temperature: f32) -> Result<String> {
        self.run("title", &self.prompts.title, &context_request(ctx), temperature)
            .await
    }

    pub async fn plot(&self, ctx: &NovelContext, temperature: f32) -> Result<String> {
        self.run("plot", &self.prompts.plot, &context_request(ctx), temperature)
            .await
    }

    pub async fn chapters(&self, ctx: &NovelContext, temperature: f32) -> Result<String> {
        self.run("chapters", &self.prompts.chapters, &context_request(ctx), temperature)
            .await
    }

    pub async fn chapter_flow(&self, ctx: &NovelContext, temperature: f32) -> Result<String> {
        self.run("chapter_flow", &self.prompts.chapter_flow, &context_request(ctx), temperature)
            .await
    }

    pub async fn revise_chapters(&self, ctx: &NovelContext, critique: &str, temperature: f32) -> Result<String> {
        let mut req = context_request(ctx);
        req.insert("critique".to_string(), critique.to_string());
        self.run("revise_chapters", &self.prompts.revise_chapters, &req, temperature)
            .await
    }

    pub async fn events(&self, ctx: &NovelContext, chapter: &str, summary: &str, temperature: f32) -> Result<String> {
        let mut req = context_request(ctx);
        req.insert("chapter".to_string(), chapter.to_string());
        req.insert("summary".to_string(), summary.to_string());
        self.run("events", &self.prompts.events, &req, temperature)
            .await
    }

    pub async fn prose(&self, req: &GenerationRequest, temperature: f32) -> Result<String> {
        self.run("prose", &self.prompts.prose, req, temperature).await
    }
}

/// Global novel fields every planning prompt may reference.
pub fn context_request(ctx: &NovelContext) -> GenerationRequest {
    request([
        ("subject", ctx.subject.clone()),
        ("genre", ctx.genre.clone()),
        ("author", ctx.author.clone()),
        ("profile", ctx.profile.clone()),
        ("title", ctx.title.clone()),
        ("plot", ctx.plot.clone()),
        ("chapters", format_chapter_list(&ctx.chapters)),
    ])
}

/// Request for narrating one event: global context, the chapter, every event
/// narrated so far and this chapter's paragraphs.
pub fn prose_request(
    ctx: &NovelContext,
    state: &NarrationState,
    chapter: &str,
    summary: &str,
    event: &str,
) -> GenerationRequest {
    let mut req = context_request(ctx);
    req.insert("chapter".to_string(), chapter.to_string());
    req.insert("summary".to_string(), summary.to_string());
    req.insert("event".to_string(), event.to_string());
    req.insert("narrated_events".to_string(), state.narrated_text());
    req.insert("previous_paragraphs".to_string(), state.previous_paragraphs());
    req
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm::GenerationError;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    struct EchoLlm {
        prompts: Arc<Mutex<Vec<(String, f32)>>>,
    }

    #[async_trait]
    impl LlmClient for EchoLlm {
        async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, GenerationError> {
            self.prompts
                .lock()
                .unwrap()
                .push((prompt.to_string(), temperature));
            Ok(format!("<think>planning</think>\n{}", prompt))
        }
    }

    #[tokio::test]
    async fn test_title_prompt_is_filled_from_context() -> Result<()> {
        let prompts = PromptTemplates {
            title: "T[{genre}|{author}|{profile}]".to_string(),
            ..PromptTemplates::default()
        };
        let seen = Arc::new(Mutex::new(Vec::new()));
        let llm = EchoLlm {
            prompts: seen.clone(),
        };
        let gens = Generators::new(&llm, &prompts);

        let ctx = NovelContext::new("probe", "noir", "Chandler").with_profile("P".to_string());
        let title = gens.title(&ctx, 0.3).await?;

        assert_eq!(title, "T[noir|Chandler|P]");
        assert_eq!(seen.lock().unwrap()[0], ("T[noir|Chandler|P]".to_string(), 0.3));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_placeholder_fails_before_calling_model() {
        let prompts = PromptTemplates {
            subject: "{sample} {nonexistent}".to_string(),
            ..PromptTemplates::default()
        };
        let seen = Arc::new(Mutex::new(Vec::new()));
        let llm = EchoLlm {
            prompts: seen.clone(),
        };
        let gens = Generators::new(&llm, &prompts);

        assert!(gens.subject_line("text", 0.5).await.is_err());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_default_templates_fill_without_missing_values() -> Result<()> {
        let prompts = PromptTemplates::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let llm = EchoLlm {
            prompts: seen.clone(),
        };
        let gens = Generators::new(&llm, &prompts);
        let ctx = NovelContext::new("s", "g", "a");

        gens.character("", &["Silas".to_string()], 0.9).await?;
        gens.subject_line("sample", 0.7).await?;
        gens.profile(&ctx, 0.8).await?;
        gens.title(&ctx, 0.8).await?;
        gens.plot(&ctx, 0.8).await?;
        gens.chapters(&ctx, 0.8).await?;
        gens.chapter_flow(&ctx, 0.8).await?;
        gens.revise_chapters(&ctx, "tighter", 0.8).await?;
        gens.events(&ctx, "Chapter 1", "start", 0.8).await?;
        let req = prose_request(&ctx, &NarrationState::default(), "Chapter 1", "start", "e");
        gens.prose(&req, 0.9).await?;

        assert_eq!(seen.lock().unwrap().len(), 10);
        Ok(())
    }
}
