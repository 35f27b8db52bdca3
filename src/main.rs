use anyhow::Result;
use std::sync::Arc;

use storyloom::core::config::Config;
use storyloom::core::io::NativeStorage;
use storyloom::services::llm::create_llm;
use storyloom::services::setup::{readiness_diagnostic, run_setup};
use storyloom::services::workflow::WorkflowManager;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // 1. Load config
    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please ensure 'config.yml' exists with at least `llm.model` set.");
            return Err(e);
        }
    };

    config.ensure_directories()?;

    // 2. Pick the use case
    let mode = run_setup(&mut config)?;

    // 3. Model client, checked before any work starts
    let llm = create_llm(&config.llm)?;
    if let Err(e) = llm.ensure_ready().await {
        eprintln!("{}", readiness_diagnostic(&config, &e));
        return Err(e.into());
    }

    // 4. Run
    let mut manager = WorkflowManager::new(config, llm, Arc::new(NativeStorage::new()));
    manager.run(mode).await?;

    Ok(())
}
