//! Result materializer: fence stripping, template substitution, report file.

use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::prompt::project_name;

const FENCE: &str = "```";

/// Drop a leading and/or trailing markdown fence line.
///
/// Only the first and last lines of the trimmed text are inspected; interior
/// lines are kept as they are. Text with no fence line comes back unchanged.
pub fn strip_fences(text: &str) -> String {
    let mut lines: Vec<&str> = text.trim().lines().collect();
    let mut stripped = false;

    if lines.first().is_some_and(|l| l.trim_start().starts_with(FENCE)) {
        lines.remove(0);
        stripped = true;
    }
    if lines.last().is_some_and(|l| l.trim_start().starts_with(FENCE)) {
        lines.pop();
        stripped = true;
    }

    if stripped {
        lines.join("\n")
    } else {
        text.to_string()
    }
}

/// HTML template with a single substitution token.
#[derive(Debug, Clone)]
pub struct Template {
    html: String,
    placeholder: String,
}

impl Template {
    pub fn load(path: &Path, placeholder: &str) -> Result<Self, PipelineError> {
        let html = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::io(format!("reading template {}", path.display()), e)
        })?;
        Self::from_string(html, placeholder)
            .map_err(|e| match e {
                PipelineError::Template(msg) => {
                    PipelineError::Template(format!("{}: {}", path.display(), msg))
                }
                other => other,
            })
    }

    pub fn from_string(html: String, placeholder: &str) -> Result<Self, PipelineError> {
        match html.matches(placeholder).count() {
            1 => Ok(Self {
                html,
                placeholder: placeholder.to_string(),
            }),
            0 => Err(PipelineError::Template(format!(
                "placeholder {} not found",
                placeholder
            ))),
            n => Err(PipelineError::Template(format!(
                "placeholder {} occurs {} times, expected once",
                placeholder, n
            ))),
        }
    }

    /// Substitute `rows` for the token. Nothing else changes.
    pub fn render(&self, rows: &str) -> String {
        self.html.replacen(&self.placeholder, rows, 1)
    }
}

/// `<output_dir>/<folder base name>_components.html`
///
/// Always a file inside `output_dir`, even when the folder is a root.
pub fn report_path(output_dir: &Path, folder: &Path) -> PathBuf {
    let name = project_name(folder);
    let name = name.trim_matches(&['/', '\\'][..]);
    output_dir.join(format!("{}_components.html", name))
}

pub fn write_report(path: &Path, html: &str) -> Result<(), PipelineError> {
    let result = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir),
        _ => Ok(()),
    }
    .and_then(|_| std::fs::write(path, html));

    result.map_err(|source| PipelineError::OutputWrite {
        path: path.to_path_buf(),
        source,
    })
}
