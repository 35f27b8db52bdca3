use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::core::template::{Template, TemplateError};
use crate::services::llm::LlmConfig;

pub const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_input")]
    pub input_folder: String,

    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default)]
    pub unattended: bool,

    /// Which use case to run. Prompted interactively when absent.
    #[serde(default)]
    pub mode: Option<Mode>,

    pub llm: LlmConfig,

    #[serde(default)]
    pub characters: CharacterConfig,

    #[serde(default)]
    pub subject: SubjectConfig,

    #[serde(default)]
    pub novel: NovelConfig,

    #[serde(default)]
    pub prompts: PromptTemplates,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Characters,
    Subject,
    Novel,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Characters, Mode::Subject, Mode::Novel];
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Mode::Characters => "Generate character dossiers",
            Mode::Subject => "Extract a subject logline from a sample text",
            Mode::Novel => "Write a novel",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CharacterConfig {
    #[serde(default = "default_character_count")]
    pub count: usize,
    #[serde(default = "default_character_temperature")]
    pub temperature: f32,
    /// Dossiers shorter than this are counted as failed items.
    #[serde(default = "default_min_profile_chars")]
    pub min_profile_chars: usize,
    #[serde(default = "default_disallowed_names")]
    pub disallowed_names: Vec<String>,
    #[serde(default = "default_alternative_names")]
    pub alternative_names: Vec<String>,
    #[serde(default = "default_used_names_file")]
    pub used_names_file: String,
    #[serde(default = "default_failure_pause")]
    pub failure_pause_seconds: u64,
}

impl Default for CharacterConfig {
    fn default() -> Self {
        Self {
            count: default_character_count(),
            temperature: default_character_temperature(),
            min_profile_chars: default_min_profile_chars(),
            disallowed_names: default_disallowed_names(),
            alternative_names: default_alternative_names(),
            used_names_file: default_used_names_file(),
            failure_pause_seconds: default_failure_pause(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubjectConfig {
    #[serde(default = "default_sample_file")]
    pub sample_file: String,
    #[serde(default = "default_subject_file")]
    pub output_file: String,
    #[serde(default = "default_subject_temperature")]
    pub temperature: f32,
}

impl Default for SubjectConfig {
    fn default() -> Self {
        Self {
            sample_file: default_sample_file(),
            output_file: default_subject_file(),
            temperature: default_subject_temperature(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NovelConfig {
    /// When absent the subject is extracted from the sample text first.
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default = "default_genre")]
    pub genre: String,
    #[serde(default = "default_author")]
    pub author: String,
    #[serde(default = "default_planning_temperature")]
    pub temperature: f32,
    #[serde(default = "default_prose_temperature")]
    pub prose_temperature: f32,
    #[serde(default = "default_true")]
    pub revise_chapters: bool,
}

impl Default for NovelConfig {
    fn default() -> Self {
        Self {
            subject: None,
            genre: default_genre(),
            author: default_author(),
            temperature: default_planning_temperature(),
            prose_temperature: default_prose_temperature(),
            revise_chapters: true,
        }
    }
}

/// Prompt text for every generator. Placeholders are `{name}`; see each
/// default for the names it is filled with.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PromptTemplates {
    pub character: String,
    pub subject: String,
    pub profile: String,
    pub title: String,
    pub plot: String,
    pub chapters: String,
    pub chapter_flow: String,
    pub revise_chapters: String,
    pub events: String,
    pub prose: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            character: CHARACTER_PROMPT.to_string(),
            subject: SUBJECT_PROMPT.to_string(),
            profile: PROFILE_PROMPT.to_string(),
            title: TITLE_PROMPT.to_string(),
            plot: PLOT_PROMPT.to_string(),
            chapters: CHAPTERS_PROMPT.to_string(),
            chapter_flow: CHAPTER_FLOW_PROMPT.to_string(),
            revise_chapters: REVISE_CHAPTERS_PROMPT.to_string(),
            events: EVENTS_PROMPT.to_string(),
            prose: PROSE_PROMPT.to_string(),
        }
    }
}

const CHARACTER_PROMPT: &str = "Create a detailed dossier for an original fictional character.\n\
Structure it in numbered sections, starting with:\n\
**1. Basic Information:**\n- Name: <first and last name>\n- Age:\n- Occupation:\n\
Then cover appearance, personality, background, relationships and motivations.\n\
Do not use any of these first names: {avoid_names}.\n\
Draw inspiration from the following source material if any is given:\n{source}";

const SUBJECT_PROMPT: &str = "Read the following text and state its narrative subject \
as a single logline sentence. Reply with the logline only.\n\nText:\n{sample}";

const PROFILE_PROMPT: &str = "You are planning a {genre} novel written in the style of {author}.\n\
Subject: {subject}\n\
Write a profile of the novel: its central characters, setting, themes and tone.";

const TITLE_PROMPT: &str = "Propose a title for a {genre} novel in the style of {author}.\n\
Subject: {subject}\nProfile:\n{profile}\n\
Reply with the title only, without quotes.";

const PLOT_PROMPT: &str = "Write the complete plot of the {genre} novel \"{title}\" \
in the style of {author}.\nProfile:\n{profile}";

const CHAPTERS_PROMPT: &str = "Split the plot of the {genre} novel \"{title}\" into chapters.\n\
Plot:\n{plot}\n\
Reply with one line per chapter in the form `<Chapter label>: <one-sentence summary>` \
and nothing else.";

const CHAPTER_FLOW_PROMPT: &str = "Critique the flow of these chapters for the novel \"{title}\". \
Point out pacing problems, gaps and redundant chapters.\nPlot:\n{plot}\nChapters:\n{chapters}";

const REVISE_CHAPTERS_PROMPT: &str = "Revise the chapter list of \"{title}\" using the critique.\n\
Plot:\n{plot}\nChapters:\n{chapters}\nCritique:\n{critique}\n\
Reply with one line per chapter in the form `<Chapter label>: <one-sentence summary>` \
and nothing else.";

const EVENTS_PROMPT: &str = "List the key events of {chapter} of the {genre} novel \"{title}\".\n\
Plot:\n{plot}\nAll chapters:\n{chapters}\nThis chapter: {summary}\n\
Reply with one event per line and nothing else.";

const PROSE_PROMPT: &str = "You are writing the {genre} novel \"{title}\" in the style of {author}.\n\
Profile:\n{profile}\nPlot:\n{plot}\n\
Current chapter: {chapter}: {summary}\n\
Events already narrated:\n{narrated_events}\n\
Paragraphs already written for this chapter:\n{previous_paragraphs}\n\
Narrate the next event in prose, continuing seamlessly: {event}";

fn default_input() -> String {
    "input".to_string()
}
fn default_output() -> String {
    "output".to_string()
}
fn default_character_count() -> usize {
    5
}
fn default_character_temperature() -> f32 {
    0.9
}
fn default_min_profile_chars() -> usize {
    200
}
fn default_disallowed_names() -> Vec<String> {
    ["Silas", "Elara", "Thorne", "Lyra", "Kael", "Seraphina", "Aria", "Zephyr"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_alternative_names() -> Vec<String> {
    [
        "Marcus", "Nadia", "Tobias", "Ingrid", "Rafael", "Yusuf", "Beatrix", "Dmitri", "Harriet",
        "Kenji",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_used_names_file() -> String {
    "used_names.txt".to_string()
}
fn default_failure_pause() -> u64 {
    5
}
fn default_sample_file() -> String {
    "sample.txt".to_string()
}
fn default_subject_file() -> String {
    "subject.txt".to_string()
}
fn default_subject_temperature() -> f32 {
    0.7
}
fn default_genre() -> String {
    "science fiction".to_string()
}
fn default_author() -> String {
    "Ursula K. Le Guin".to_string()
}
fn default_planning_temperature() -> f32 {
    0.8
}
const CONTEXT_KEYS: &[&str] = &["subject", "genre", "author", "profile", "title", "plot", "chapters"];

impl PromptTemplates {
    /// Checks every template parses and only names placeholders its
    /// generator fills.
    pub fn validate(&self) -> Result<(), TemplateError> {
        let with_context = |extra: &[&'static str]| -> Vec<&'static str> {
            CONTEXT_KEYS.iter().chain(extra).copied().collect()
        };
        let checks: [(&str, &str, Vec<&str>); 10] = [
            ("character", self.character.as_str(), vec!["source", "avoid_names"]),
            ("subject", self.subject.as_str(), vec!["sample"]),
            ("profile", self.profile.as_str(), with_context(&[])),
            ("title", self.title.as_str(), with_context(&[])),
            ("plot", self.plot.as_str(), with_context(&[])),
            ("chapters", self.chapters.as_str(), with_context(&[])),
            ("chapter_flow", self.chapter_flow.as_str(), with_context(&[])),
            ("revise_chapters", self.revise_chapters.as_str(), with_context(&["critique"])),
            ("events", self.events.as_str(), with_context(&["chapter", "summary"])),
            (
                "prose",
                self.prose.as_str(),
                with_context(&["chapter", "summary", "event", "narrated_events", "previous_paragraphs"]),
            ),
        ];
        for (name, source, known) in &checks {
            Template::parse(name, source)?.check_placeholders(known)?;
        }
        Ok(())
    }
}

fn default_prose_temperature() -> f32 {
    0.9
}
fn default_true() -> bool {
    true
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(content)?;
        config.prompts.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(CONFIG_FILE, content).context("Failed to write config.yml")?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.input_folder)?;
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = Config::from_yaml("llm:\n  model: llama3\n").unwrap();
        assert_eq!(cfg.input_folder, "input");
        assert_eq!(cfg.output_folder, "output");
        assert_eq!(cfg.mode, None);
        assert_eq!(cfg.characters.alternative_names.len(), 10);
        assert!(cfg.characters.disallowed_names.contains(&"Silas".to_string()));
        assert!(cfg.prompts.prose.contains("{previous_paragraphs}"));
        assert!(cfg.novel.revise_chapters);
    }

    #[test]
    fn test_prompt_override_keeps_other_defaults() {
        let yaml = "mode: novel\nllm:\n  model: mistral\nprompts:\n  title: \"Title for {profile}\"\n";
        let cfg = Config::from_yaml(yaml).unwrap();
        assert_eq!(cfg.mode, Some(Mode::Novel));
        assert_eq!(cfg.prompts.title, "Title for {profile}");
        assert_eq!(cfg.prompts.plot, PLOT_PROMPT);
    }

    #[test]
    fn test_default_prompts_validate() {
        assert!(PromptTemplates::default().validate().is_ok());
    }

    #[test]
    fn test_prompt_override_with_unknown_placeholder_fails() {
        let yaml = "llm:\n  model: m\nprompts:\n  events: \"Events of {chapter_name}\"\n";
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("chapter_name"));

        let yaml = "llm:\n  model: m\nprompts:\n  subject: \"Summarise {sample\"\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("config.yml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
