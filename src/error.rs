//! Error taxonomy for the report pipeline.
//!
//! Failures scoped to one input file ([`ConversionError`], upload
//! [`ServiceError`]s) are absorbed by their stage and surface only as a
//! placeholder in the prompt. Failures in shared, single-occurrence steps
//! are [`PipelineError`]s and abort the run before a report is written.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal, run-level errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad root directory, missing credential, unusable configuration.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The completion call failed after all retries.
    #[error("upstream service error: {0}")]
    Upstream(#[source] ServiceError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Template loaded but unusable (placeholder missing or repeated).
    #[error("template error: {0}")]
    Template(String),

    #[error("failed to write report {}: {source}", path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Per-file conversion failure. Never aborts the batch.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("{program} failed: {detail}")]
    Process { program: String, detail: String },

    #[error("conversion timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("expected output not produced: {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("spreadsheet read failed: {0}")]
    Spreadsheet(String),

    #[error("mesh read failed: {0}")]
    Mesh(String),

    #[error("render failed: {0}")]
    Render(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the hosted model service (uploads and completions).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The service answered but the payload was not what the protocol promises.
    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Rate limits, server errors, and transport failures are worth retrying;
    /// other client errors and malformed responses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Http(e) => !e.is_builder() && !e.is_decode(),
            ServiceError::Status { status, .. } => *status == 429 || *status >= 500,
            ServiceError::Protocol(_) | ServiceError::Io(_) => false,
        }
    }
}
