use crate::core::config::{Config, Mode};
use crate::core::io::Storage;
use crate::core::state::{CharacterRecord, NovelContext};
use crate::services::export::{export_character, export_novel};
use crate::services::extract::{format_chapter_list, parse_chapter_list, parse_events, NameOutcome, NameRules};
use crate::services::generators::Generators;
use crate::services::llm::LlmClient;
use crate::services::pipeline::write_book;
use crate::utils::documents::{join_documents, load_source_documents};
use crate::utils::text::strip_decoration;
use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const UNTITLED: &str = "Untitled";

#[derive(Debug, Default)]
pub struct BatchReport {
    pub written: Vec<PathBuf>,
    pub substituted: usize,
    pub failed: usize,
}

pub struct WorkflowManager {
    config: Config,
    llm: Box<dyn LlmClient>,
    storage: Arc<dyn Storage>,
    rng: StdRng,
}

impl WorkflowManager {
    pub fn new(config: Config, llm: Box<dyn LlmClient>, storage: Arc<dyn Storage>) -> Self {
        Self {
            config,
            llm,
            storage,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Fixes the random source used for name fallbacks.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub async fn run(&mut self, mode: Mode) -> Result<()> {
        match mode {
            Mode::Characters => {
                let report = self.run_characters().await?;
                println!(
                    "Generated {} character(s), {} failed, {} renamed.",
                    report.written.len(),
                    report.failed,
                    report.substituted
                );
            }
            Mode::Subject => {
                let (subject, path) = self.run_subject().await?;
                println!("Subject: {}\nSaved to {:?}", subject, path);
            }
            Mode::Novel => {
                let path = self.run_novel().await?;
                println!("Novel complete: {:?}", path);
            }
        }
        Ok(())
    }

    fn output_path(&self, name: &str) -> PathBuf {
        Path::new(&self.config.output_folder).join(name)
    }

    async fn pace(&self) {
        let delay = Duration::from_millis(self.config.llm.request_delay_ms);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    async fn load_used_names(&self, path: &Path) -> Result<Vec<String>> {
        if !self.storage.exists(path).await? {
            return Ok(Vec::new());
        }
        let content = self.storage.read_to_string(path).await?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Generates `characters.count` dossiers. A failed or too-short item is
    /// counted and skipped; the batch carries on.
    pub async fn run_characters(&mut self) -> Result<BatchReport> {
        let cfg = self.config.characters.clone();
        let input_dir = Path::new(&self.config.input_folder);
        // the story sample lives next to the character sources
        let sample_path = input_dir.join(&self.config.subject.sample_file);
        let docs: Vec<_> = load_source_documents(input_dir)?
            .into_iter()
            .filter(|d| d.path != sample_path)
            .collect();
        let source = join_documents(&docs);
        info!("Using {} source document(s)", docs.len());

        let used_path = self.output_path(&cfg.used_names_file);
        let mut used = self.load_used_names(&used_path).await?;
        let rules = NameRules::new(cfg.disallowed_names.clone(), cfg.alternative_names.clone());
        let characters_dir = self.output_path("characters");

        let pb = ProgressBar::new(cfg.count as u64);
        pb.set_style(ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"));

        let mut report = BatchReport::default();
        let gens = Generators::new(self.llm.as_ref(), &self.config.prompts);

        for i in 0..cfg.count {
            if i > 0 {
                self.pace().await;
            }
            let avoid: Vec<String> = cfg.disallowed_names.iter().chain(used.iter()).cloned().collect();

            let profile = match gens.character(&source, &avoid, cfg.temperature).await {
                Ok(profile) if profile.chars().count() >= cfg.min_profile_chars => profile,
                Ok(profile) => {
                    warn!(
                        "Character {} too short ({} chars), skipping",
                        i + 1,
                        profile.chars().count()
                    );
                    report.failed += 1;
                    pb.inc(1);
                    tokio::time::sleep(Duration::from_secs(cfg.failure_pause_seconds)).await;
                    continue;
                }
                Err(e) => {
                    warn!("Character {} failed: {:#}", i + 1, e);
                    report.failed += 1;
                    pb.inc(1);
                    tokio::time::sleep(Duration::from_secs(cfg.failure_pause_seconds)).await;
                    continue;
                }
            };

            let extracted = rules.extract(&profile, &used, &mut self.rng);
            if matches!(extracted.outcome, NameOutcome::Substituted { .. }) {
                report.substituted += 1;
            }
            let record = CharacterRecord {
                name: extracted.name,
                profile: extracted.text,
                outcome: extracted.outcome,
            };

            let path = export_character(self.storage.as_ref(), &characters_dir, &record).await?;
            self.storage.append_line(&used_path, &record.name).await?;
            info!("Saved {} to {:?}", record.name, path);
            used.push(record.name);
            report.written.push(path);
            pb.inc(1);
        }
        pb.finish();

        Ok(report)
    }

    /// Asks for a one-line subject of the configured sample text.
    pub async fn derive_subject(&self) -> Result<String> {
        let sample_path = Path::new(&self.config.input_folder).join(&self.config.subject.sample_file);
        if !self.storage.exists(&sample_path).await? {
            bail!(
                "Sample text {:?} not found. Put a text file there or set novel.subject in config.yml.",
                sample_path
            );
        }
        let sample = self.storage.read_to_string(&sample_path).await?;

        let gens = Generators::new(self.llm.as_ref(), &self.config.prompts);
        let raw = gens
            .subject_line(&sample, self.config.subject.temperature)
            .await
            .context("Failed to extract a subject")?;
        let subject = raw
            .lines()
            .map(strip_decoration)
            .find(|l| !l.is_empty())
            .unwrap_or_default();
        if subject.is_empty() {
            bail!("The model returned no subject for {:?}", sample_path);
        }
        Ok(subject)
    }

    pub async fn run_subject(&mut self) -> Result<(String, PathBuf)> {
        let subject = self.derive_subject().await?;
        let path = self.output_path(&self.config.subject.output_file);
        self.storage
            .write(&path, format!("{}\n", subject).as_bytes())
            .await?;
        Ok((subject, path))
    }

    /// Runs the planning stages in order. Every stage needs the previous
    /// one's output, so a generation failure aborts the run.
    pub async fn plan_novel(&self, subject: &str) -> Result<NovelContext> {
        let cfg = &self.config.novel;
        let temp = cfg.temperature;
        let gens = Generators::new(self.llm.as_ref(), &self.config.prompts);
        let ctx = NovelContext::new(subject, &cfg.genre, &cfg.author);

        println!("Generating profile...");
        let profile = gens.profile(&ctx, temp).await?;
        let ctx = ctx.with_profile(or_placeholder(profile, "profile"));
        self.pace().await;

        println!("Generating title...");
        let title = gens.title(&ctx, temp).await?;
        let title = title
            .lines()
            .map(strip_decoration)
            .find(|l| !l.is_empty())
            .unwrap_or_else(|| {
                warn!("Empty title, using {}", UNTITLED);
                UNTITLED.to_string()
            });
        let ctx = ctx.with_title(title);
        self.pace().await;

        println!("Generating plot for \"{}\"...", ctx.title);
        let plot = gens.plot(&ctx, temp).await?;
        let ctx = ctx.with_plot(or_placeholder(plot, "plot"));
        self.pace().await;

        println!("Generating chapters...");
        let chapters = parse_chapter_list(&gens.chapters(&ctx, temp).await?);
        if chapters.is_empty() {
            bail!("The chapter list could not be parsed; nothing to write");
        }
        let ctx = ctx.with_chapters(chapters);

        let ctx = if cfg.revise_chapters {
            self.pace().await;
            println!("Reviewing chapter flow...");
            let critique = gens.chapter_flow(&ctx, temp).await?;
            self.pace().await;
            let revised = parse_chapter_list(&gens.revise_chapters(&ctx, &critique, temp).await?);
            if revised.is_empty() {
                warn!("Revised chapter list was unparseable, keeping the original");
                ctx
            } else {
                ctx.with_chapters(revised)
            }
        } else {
            ctx
        };
        info!("Chapters:\n{}", format_chapter_list(&ctx.chapters));

        let mut events = IndexMap::new();
        for (label, summary) in &ctx.chapters {
            self.pace().await;
            println!("Listing events for {}...", label);
            let raw = gens.events(&ctx, label, summary, temp).await?;
            events.insert(label.clone(), parse_events(&raw, summary));
        }

        Ok(ctx.with_events(events))
    }

    pub async fn run_novel(&mut self) -> Result<PathBuf> {
        let subject = match self.config.novel.subject.clone().filter(|s| !s.trim().is_empty()) {
            Some(subject) => subject,
            None => {
                println!("No subject configured, deriving one from the sample text...");
                self.derive_subject().await?
            }
        };

        let ctx = self.plan_novel(&subject).await?;

        let total: usize = ctx.events.values().map(|e| e.len().max(1)).sum();
        let pb = ProgressBar::new(total as u64);
        pb.set_style(ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"));

        println!("Writing \"{}\"...", ctx.title);
        let gens = Generators::new(self.llm.as_ref(), &self.config.prompts);
        let book = write_book(
            &gens,
            &ctx,
            self.config.novel.prose_temperature,
            Duration::from_millis(self.config.llm.request_delay_ms),
            &pb,
        )
        .await?;
        pb.finish();

        let output_dir = Path::new(&self.config.output_folder).join("novels");
        export_novel(self.storage.as_ref(), &output_dir, &ctx.title, &ctx.chapters, &book).await
    }
}

fn or_placeholder(text: String, what: &str) -> String {
    if text.trim().is_empty() {
        warn!("Empty {}, substituting a placeholder", what);
        format!("[placeholder: no {} was generated]", what)
    } else {
        text
    }
}
