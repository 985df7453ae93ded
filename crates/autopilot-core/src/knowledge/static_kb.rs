//! In-memory knowledge base over a fixed document set.
//!
//! Documents are split into paragraphs; a query ranks paragraphs by the share
//! of distinct query terms they contain.

use super::{KnowledgeBase, Snippet};
use crate::error::KnowledgeError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Terms shorter than this carry no signal ("a", "is", "to").
const MIN_TERM_LEN: usize = 3;

#[derive(Debug, Clone)]
struct Paragraph {
    source: String,
    text: String,
    terms: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StaticKnowledgeBase {
    paragraphs: Vec<Paragraph>,
}

impl StaticKnowledgeBase {
    /// Build from `(source, text)` pairs.
    pub fn from_documents<I, S, T>(docs: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: AsRef<str>,
    {
        let mut kb = Self::default();
        for (source, text) in docs {
            kb.add_document(source, text.as_ref());
        }
        kb
    }

    /// Load every `.txt` and `.md` file directly inside `dir`.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, KnowledgeError> {
        let dir = dir.as_ref();
        let mut files: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && matches!(
                        p.extension().and_then(|e| e.to_str()),
                        Some("txt") | Some("md")
                    )
            })
            .collect();
        files.sort();

        let mut kb = Self::default();
        for path in files {
            let text = std::fs::read_to_string(&path)?;
            let source = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            kb.add_document(source, &text);
        }
        info!(
            target: "autopilot::knowledge",
            dir = %dir.display(),
            paragraphs = kb.paragraphs.len(),
            "knowledge base loaded"
        );
        Ok(kb)
    }

    pub fn add_document(&mut self, source: impl Into<String>, text: &str) {
        let source = source.into();
        for para in split_paragraphs(text) {
            self.paragraphs.push(Paragraph {
                source: source.clone(),
                terms: terms(&para),
                text: para,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.paragraphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paragraphs.is_empty()
    }

    fn rank(&self, text: &str, k: usize) -> Vec<Snippet> {
        let query = terms(text);
        if query.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = self
            .paragraphs
            .iter()
            .enumerate()
            .filter_map(|(i, p)| {
                let hits = query.iter().filter(|t| p.terms.contains(*t)).count();
                (hits > 0).then(|| (i, hits as f32 / query.len() as f32))
            })
            .collect();
        // Stable sort keeps document order among equal scores.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(i, score)| Snippet {
                content: self.paragraphs[i].text.clone(),
                score,
                source: self.paragraphs[i].source.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl KnowledgeBase for StaticKnowledgeBase {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<Snippet>, KnowledgeError> {
        let snippets = self.rank(text, k);
        debug!(target: "autopilot::knowledge", k, found = snippets.len(), "query");
        Ok(snippets)
    }
}

fn split_paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line.trim());
        }
    }
    if !current.is_empty() {
        out.push(current.join(" "));
    }
    out
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_TERM_LEN)
        .map(|w| w.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kb() -> StaticKnowledgeBase {
        StaticKnowledgeBase::from_documents([
            (
                "hours.md",
                "We open at 11am every day.\nKitchen closes at 10pm.\n\nParking is free after 6pm.",
            ),
            ("menu.txt", "Unlimited soup, salad and breadsticks with every entree."),
        ])
    }

    #[test]
    fn paragraphs_are_split_on_blank_lines() {
        assert_eq!(kb().len(), 3);
    }

    #[tokio::test]
    async fn best_match_comes_first() {
        let hits = kb().query("When does the kitchen open?", 3).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].source, "hours.md");
        assert!(hits[0].content.starts_with("We open at 11am"));
    }

    #[tokio::test]
    async fn results_are_capped_at_k_and_positive() {
        let hits = kb().query("every soup parking", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.0);

        let none = kb().query("xylophone", 3).await.unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn load_dir_reads_text_and_markdown_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "Reservations for parties of six.").unwrap();
        std::fs::write(dir.path().join("b.md"), "Gift cards at the host stand.").unwrap();
        std::fs::write(dir.path().join("c.json"), "{\"ignored\": true}").unwrap();

        let kb = StaticKnowledgeBase::load_dir(dir.path()).unwrap();
        assert_eq!(kb.len(), 2);
    }

    #[test]
    fn missing_dir_is_an_io_error() {
        let err = StaticKnowledgeBase::load_dir("/definitely/not/here").unwrap_err();
        assert!(matches!(err, KnowledgeError::Io(_)));
    }
}
