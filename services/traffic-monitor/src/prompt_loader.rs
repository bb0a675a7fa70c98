use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Name of the prompt file (without `.md`) used as the system instruction.
pub const INSTRUCTIONS_PROMPT: &str = "traffic_monitor";

/// Loads every `.md` file in `dir_path`, keyed by file stem.
pub fn load_prompts(dir_path: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();

    for entry in fs::read_dir(dir_path)
        .with_context(|| format!("Failed to read prompts directory: {}", dir_path.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem for prompt file")?
                .to_string();

            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;

            prompts.insert(prompt_key, content);
        }
    }

    Ok(prompts)
}

/// The system instruction from `path`: either a single file, or a prompts
/// directory holding `traffic_monitor.md`.
pub fn load_instructions(path: &Path) -> Result<String> {
    let text = if path.is_dir() {
        let mut prompts = load_prompts(path)?;
        prompts.remove(INSTRUCTIONS_PROMPT).with_context(|| {
            format!(
                "{} has no {INSTRUCTIONS_PROMPT}.md prompt",
                path.display()
            )
        })?
    } else {
        fs::read_to_string(path)
            .with_context(|| format!("Failed to read instructions file: {}", path.display()))?
    };
    let text = text.trim().to_string();
    anyhow::ensure!(!text.is_empty(), "instructions in {} are empty", path.display());
    Ok(text)
}
