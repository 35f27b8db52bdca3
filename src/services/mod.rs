pub mod export;
pub mod extract;
pub mod generators;
pub mod llm;
pub mod pipeline;
pub mod setup;
pub mod workflow;
