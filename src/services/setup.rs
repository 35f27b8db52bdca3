use crate::core::config::{Config, Mode};
use crate::services::llm::GenerationError;
use anyhow::{anyhow, Result};
use inquire::{Confirm, Select, Text};
use std::path::Path;

/// Resolves the use case and fills in anything the run cannot proceed
/// without, asking the user unless running unattended.
pub fn run_setup(config: &mut Config) -> Result<Mode> {
    let mut needs_save = false;

    let mode = match config.mode {
        Some(mode) => mode,
        None if config.unattended => {
            return Err(anyhow!(
                "No mode set. Add `mode: characters|subject|novel` to config.yml for unattended runs."
            ))
        }
        None => {
            let mode = Select::new("What should be generated?", Mode::ALL.to_vec()).prompt()?;
            if Confirm::new("Remember this choice in config.yml?")
                .with_default(false)
                .prompt()?
            {
                config.mode = Some(mode);
                needs_save = true;
            }
            mode
        }
    };

    if mode == Mode::Novel && !config.unattended && needs_subject(config) {
        let subject = Text::new("Subject of the novel:")
            .with_help_message("No subject in config.yml and no sample text to derive one from")
            .prompt()?;
        if !subject.trim().is_empty() {
            config.novel.subject = Some(subject.trim().to_string());
            needs_save = true;
        }
    }

    if needs_save {
        config.save()?;
        println!("Configuration saved.");
    }

    Ok(mode)
}

fn needs_subject(config: &Config) -> bool {
    let configured = config
        .novel
        .subject
        .as_deref()
        .is_some_and(|s| !s.trim().is_empty());
    let sample = Path::new(&config.input_folder).join(&config.subject.sample_file);
    !configured && !sample.exists()
}

/// Startup message for a service that is down or lacks the model.
pub fn readiness_diagnostic(config: &Config, err: &GenerationError) -> String {
    match err {
        GenerationError::ModelMissing { .. } => format!("{}", err),
        GenerationError::Unavailable { base_url, .. } => format!(
            "Cannot reach the generation service at {}. Start it (for Ollama: `ollama serve`) \
             or point {} / llm.base_url at the right address.",
            base_url,
            config.llm.env_var()
        ),
        other => format!("The generation service is not ready: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> Config {
        Config::from_yaml(yaml).unwrap()
    }

    #[test]
    fn test_configured_mode_skips_prompt() -> Result<()> {
        let mut cfg = config("mode: subject\nunattended: true\nllm:\n  model: m\n");
        assert_eq!(run_setup(&mut cfg)?, Mode::Subject);
        Ok(())
    }

    #[test]
    fn test_unattended_without_mode_fails() {
        let mut cfg = config("unattended: true\nllm:\n  model: m\n");
        let err = run_setup(&mut cfg).unwrap_err();
        assert!(err.to_string().contains("No mode set"));
    }

    #[test]
    fn test_model_missing_diagnostic_mentions_pull() {
        let cfg = config("llm:\n  model: llama3\n");
        let err = GenerationError::ModelMissing {
            model: "llama3".to_string(),
            hint: "Provision it with `ollama pull llama3`.".to_string(),
        };
        assert!(readiness_diagnostic(&cfg, &err).contains("ollama pull llama3"));
    }
}
