//! Single-file question.
//!
//! Normalizes one file, sends it (uploaded, or inline as base64) together
//! with a free-form question, and returns the model's answer.

use std::path::Path;

use crate::config::Config;
use crate::error::PipelineError;
use crate::models::{PromptDocument, PromptSegment, ScannedFile};
use crate::normalize::Normalizer;
use crate::prompt::label;
use crate::service::{with_retry, AiService, RetryPolicy};

/// generateContent rejects requests above 20 MB; leave room for the text.
const INLINE_LIMIT: u64 = 19 * 1024 * 1024;

pub async fn ask_file(
    config: &Config,
    path: &Path,
    question: &str,
    inline: bool,
    service: &dyn AiService,
) -> Result<String, PipelineError> {
    if !path.is_file() {
        return Err(PipelineError::InvalidInput(format!(
            "not a file: {}",
            path.display()
        )));
    }
    let file = ScannedFile {
        relative_path: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string()),
        absolute_path: path.to_path_buf(),
        extension: path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default(),
    };

    let artifact = Normalizer::from_config(config).normalize_one(file).await;
    let (Some(local), Some(mime)) = (&artifact.local_path, artifact.canonical_form.mime_type())
    else {
        return Err(PipelineError::InvalidInput(format!(
            "{}: {}",
            artifact.source.relative_path,
            artifact.failure.as_deref().unwrap_or("cannot be prepared for upload")
        )));
    };

    let retry = RetryPolicy::from_config(&config.retry);
    let mut prompt = PromptDocument::default();
    prompt.push_text(label(&artifact.source.relative_path, artifact.source.is_cad_model()));

    if inline {
        let size = std::fs::metadata(local)
            .map_err(|e| PipelineError::io(format!("reading {}", local.display()), e))?
            .len();
        if size > INLINE_LIMIT {
            return Err(PipelineError::InvalidInput(format!(
                "{} is {} bytes, too large to send inline; drop --inline to upload it",
                artifact.source.relative_path, size
            )));
        }
        let data = std::fs::read(local)
            .map_err(|e| PipelineError::io(format!("reading {}", local.display()), e))?;
        prompt.segments.push(PromptSegment::Inline {
            mime_type: mime.to_string(),
            data,
        });
    } else {
        let name = artifact.source.relative_path.as_str();
        let handle = with_retry(&retry, name, move || service.upload(local, mime, name))
            .await
            .map_err(PipelineError::Upstream)?;
        prompt.push_file(handle);
    }
    prompt.push_text(question);

    let prompt = &prompt;
    with_retry(&retry, "completion", move || service.complete(prompt))
        .await
        .map(|answer| answer.trim().to_string())
        .map_err(PipelineError::Upstream)
}
