//! Prompt templates with inline fallback.
//!
//! Templates are plain text files with `{{key}}` placeholders, looked up in
//! an optional directory. A missing directory, missing file, or unresolved
//! placeholder is a recovered error: the caller falls back to its inline
//! prompt and the run continues.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use tracing::debug;

/// Loads and renders prompt template files.
pub struct PromptLibrary {
    dir: Option<PathBuf>,
}

impl PromptLibrary {
    pub fn new(dir: Option<PathBuf>) -> Self {
        PromptLibrary { dir }
    }

    /// Render `<dir>/<name>.md` with `{{key}}` substitution.
    pub fn render(&self, name: &str, vars: &HashMap<&str, String>) -> anyhow::Result<String> {
        let dir = self
            .dir
            .as_ref()
            .ok_or_else(|| anyhow!("no prompt template directory configured"))?;
        let path = dir.join(format!("{name}.md"));
        let template = std::fs::read_to_string(&path)
            .with_context(|| format!("template not found: {}", path.display()))?;

        let mut rendered = template;
        for (key, value) in vars {
            rendered = rendered.replace(&format!("{{{{{key}}}}}"), value);
        }
        if rendered.contains("{{") {
            return Err(anyhow!("template '{name}' has unresolved placeholders"));
        }
        debug!(template = name, "rendered prompt template");
        Ok(rendered)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("answer_question.md"),
            "You are {{agent}}. Answer: {{question}}",
        )
        .unwrap();

        let lib = PromptLibrary::new(Some(dir.path().to_path_buf()));
        let mut vars = HashMap::new();
        vars.insert("agent", "Design Agent".to_string());
        vars.insert("question", "what ports?".to_string());

        let out = lib.render("answer_question", &vars).unwrap();
        assert_eq!(out, "You are Design Agent. Answer: what ports?");
    }

    #[test]
    fn test_missing_dir_is_recoverable_error() {
        let lib = PromptLibrary::new(None);
        assert!(lib.render("anything", &HashMap::new()).is_err());
    }

    #[test]
    fn test_missing_template_is_recoverable_error() {
        let dir = tempfile::tempdir().unwrap();
        let lib = PromptLibrary::new(Some(dir.path().to_path_buf()));
        assert!(lib.render("nope", &HashMap::new()).is_err());
    }

    #[test]
    fn test_unresolved_placeholder_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t.md"), "hello {{who}}").unwrap();
        let lib = PromptLibrary::new(Some(dir.path().to_path_buf()));
        assert!(lib.render("t", &HashMap::new()).is_err());
    }
}
