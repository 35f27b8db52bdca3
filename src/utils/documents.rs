use anyhow::{anyhow, Context, Result};
use epub::doc::EpubDoc;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

const HTML_WIDTH: usize = 500;

#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub text: String,
}

/// Reads every supported document in `dir`, sorted by path. A missing
/// directory yields nothing.
pub fn load_source_documents(dir: &Path) -> Result<Vec<SourceDocument>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    let mut docs = Vec::new();
    for path in paths {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let text = match ext.as_str() {
            "txt" | "md" => fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
            "html" | "htm" => {
                let raw = fs::read(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                html_to_text(&raw)?
            }
            "epub" => epub_to_text(&path)?,
            _ => {
                debug!("Skipping unsupported input {}", path.display());
                continue;
            }
        };
        if text.trim().is_empty() {
            continue;
        }
        info!("Loaded source document {}", path.display());
        docs.push(SourceDocument { path, text });
    }
    Ok(docs)
}

/// Joins documents with blank lines.
pub fn join_documents(docs: &[SourceDocument]) -> String {
    docs.iter()
        .map(|d| d.text.trim())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn html_to_text(raw: &[u8]) -> Result<String> {
    html2text::from_read(raw, HTML_WIDTH).map_err(|e| anyhow!("Failed to convert html: {}", e))
}

fn epub_to_text(path: &Path) -> Result<String> {
    let mut doc = EpubDoc::new(path)
        .map_err(|e| anyhow!("Failed to open epub {}: {:?}", path.display(), e))?;

    let mut parts = Vec::new();
    loop {
        if let Some((content, mimetype)) = doc.get_current_str() {
            if mimetype == "application/xhtml+xml" || mimetype == "text/html" {
                let text = html_to_text(content.as_bytes())?;
                if !text.trim().is_empty() {
                    parts.push(text.trim().to_string());
                }
            }
        }
        if !doc.go_next() {
            break;
        }
    }
    Ok(parts.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_directory_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let docs = load_source_documents(&dir.path().join("nope")).unwrap();
        assert!(docs.is_empty());
    }

    #[test]
    fn test_loads_text_and_html_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b_resume.html"), "<html><body><p>Worked as a lighthouse keeper.</p></body></html>").unwrap();
        fs::write(dir.path().join("a_notes.txt"), "Grew up by the sea.").unwrap();
        fs::write(dir.path().join("c_empty.md"), "   ").unwrap();
        fs::write(dir.path().join("d_image.png"), [0u8, 1, 2]).unwrap();

        let docs = load_source_documents(dir.path()).unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs[0].path.ends_with("a_notes.txt"));
        assert!(docs[1].text.contains("lighthouse keeper"));

        let joined = join_documents(&docs);
        assert!(joined.starts_with("Grew up by the sea.\n\n"));
    }
}
