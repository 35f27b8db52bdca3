use anyhow::Result;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

use crate::core::io::Storage;
use crate::core::state::{Book, CharacterRecord};
use crate::utils::text::sanitize_file_stem;

pub const DEFAULT_NOVEL_STEM: &str = "novel";

/// `# title`, then a `## label` section per chapter in book order.
pub fn render_novel(title: &str, summaries: &IndexMap<String, String>, book: &Book) -> String {
    let mut doc = format!("# {}\n", title.trim());
    for (label, paragraphs) in book {
        doc.push_str(&format!("\n## {}\n\n", label));
        if let Some(summary) = summaries.get(label) {
            doc.push_str(&format!("*{}*\n\n", summary.trim()));
        }
        let body = paragraphs
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        doc.push_str(&body);
        doc.push('\n');
    }
    doc
}

pub fn novel_file_stem(title: &str) -> String {
    sanitize_file_stem(title, DEFAULT_NOVEL_STEM)
}

pub async fn export_novel(
    storage: &dyn Storage,
    output_dir: &Path,
    title: &str,
    summaries: &IndexMap<String, String>,
    book: &Book,
) -> Result<PathBuf> {
    let path = storage
        .unique_path(output_dir, &novel_file_stem(title), "md")
        .await?;
    storage
        .write(&path, render_novel(title, summaries, book).as_bytes())
        .await?;
    Ok(path)
}

pub async fn export_character(storage: &dyn Storage, dir: &Path, record: &CharacterRecord) -> Result<PathBuf> {
    let stem = sanitize_file_stem(&record.name, "character");
    let path = storage.unique_path(dir, &stem, "txt").await?;
    let mut content = record.profile.trim().to_string();
    content.push('\n');
    storage.write(&path, content.as_bytes()).await?;
    Ok(path)
}
