//! Report pipeline orchestration.
//!
//! Coordinates the full run: scan → normalize → upload → assemble →
//! complete → materialize. Stages run strictly in order; work inside the
//! normalize and upload stages is concurrent. Per-file failures stay inside
//! their stage; anything else aborts the run before a report is written.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::PipelineError;
use crate::models::{RemoteHandle, UploadMap, UploadedHandle};
use crate::normalize::Normalizer;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::prompt::{PromptAssembler, ReportSchema};
use crate::report::{report_path, strip_fences, write_report, Template};
use crate::scanner::scan_folder;
use crate::service::{with_retry, AiService, RetryPolicy};
use crate::upload::upload_all;

/// Counts from a completed run.
#[derive(Debug, Clone)]
pub struct ReportOutcome {
    pub discovered: usize,
    /// Artifacts with an upload-ready local file.
    pub converted: usize,
    pub uploaded: usize,
    /// Files shown to the model as unavailable.
    pub unavailable: Vec<(String, String)>,
    pub report_path: PathBuf,
}

impl ReportOutcome {
    pub fn print_summary(&self, folder: &Path) {
        println!("run {}", folder.display());
        println!("  discovered: {} files", self.discovered);
        println!("  converted: {}", self.converted);
        println!("  uploaded: {}", self.uploaded);
        println!("  unavailable: {}", self.unavailable.len());
        for (path, reason) in &self.unavailable {
            println!("    {}  ({})", path, reason);
        }
        println!("  report: {}", self.report_path.display());
        println!("ok");
    }
}

/// Result of a dry run: what would be sent, without contacting the service.
#[derive(Debug, Clone)]
pub struct DryRun {
    /// `(relative path, canonical form, failure)` per discovered file.
    pub files: Vec<(String, &'static str, Option<String>)>,
    pub outline: String,
    pub report_path: PathBuf,
}

impl DryRun {
    pub fn print_summary(&self, folder: &Path) {
        println!("run {} (dry-run)", folder.display());
        println!("  files found: {}", self.files.len());
        for (path, form, failure) in &self.files {
            match failure {
                Some(reason) => println!("    {:<12} {}  ({})", form, path, reason),
                None => println!("    {:<12} {}", form, path),
            }
        }
        println!("  report would be written to: {}", self.report_path.display());
        println!();
        print!("{}", self.outline);
    }
}

/// Run the whole pipeline for `folder` and write the report.
pub async fn run_report(
    config: &Config,
    folder: &Path,
    service: &dyn AiService,
    progress: &dyn ProgressReporter,
) -> Result<ReportOutcome, PipelineError> {
    // Template and schema first: a broken template must fail before any upload.
    let template = Template::load(&config.report.template, &config.report.placeholder)?;
    let schema = ReportSchema::from_config(&config.report)?;

    progress.report(ProgressEvent::Scanning {
        root: folder.display().to_string(),
    });
    let files = scan_folder(folder)?;
    if files.is_empty() {
        return Err(PipelineError::InvalidInput(format!(
            "no files found under {}",
            folder.display()
        )));
    }
    let discovered = files.len();
    tracing::info!(folder = %folder.display(), files = discovered, "scanned");

    let workers = config.pipeline.workers;
    let run_config = Config {
        cad: config.cad_for_run(),
        ..config.clone()
    };
    let normalizer = Normalizer::from_config(&run_config);
    let artifacts = normalizer.normalize_all(&files, workers, progress).await;
    let converted = artifacts.iter().filter(|a| a.is_available()).count();

    let retry = RetryPolicy::from_config(&config.retry);
    let uploads = upload_all(service, artifacts, &retry, workers, progress).await;
    let uploaded = uploads.values().filter(|u| u.remote_handle.is_some()).count();

    let prompt = PromptAssembler::for_folder(folder, schema).build(&uploads);

    progress.report(ProgressEvent::Completing {
        model: service.model().to_string(),
    });
    tracing::info!(
        model = service.model(),
        segments = prompt.segments.len(),
        labels = prompt.label_count(),
        "requesting completion"
    );
    let prompt = &prompt;
    let raw = with_retry(&retry, "completion", move || service.complete(prompt))
        .await
        .map_err(PipelineError::Upstream)?;

    let html = template.render(&strip_fences(&raw));
    let path = report_path(&config.report.output_dir, folder);
    write_report(&path, &html)?;
    tracing::info!(path = %path.display(), "report written");

    Ok(ReportOutcome {
        discovered,
        converted,
        uploaded,
        unavailable: unavailable(&uploads),
        report_path: path,
    })
}

/// Scan and normalize, then assemble the prompt against placeholder
/// handles. Nothing is uploaded and no credential is needed.
pub async fn preview(
    config: &Config,
    folder: &Path,
    progress: &dyn ProgressReporter,
) -> Result<DryRun, PipelineError> {
    Template::load(&config.report.template, &config.report.placeholder)?;
    let schema = ReportSchema::from_config(&config.report)?;

    progress.report(ProgressEvent::Scanning {
        root: folder.display().to_string(),
    });
    let files = scan_folder(folder)?;
    let normalizer = Normalizer::from_config(config);
    let artifacts = normalizer
        .normalize_all(&files, config.pipeline.workers, progress)
        .await;

    let uploads: UploadMap = artifacts
        .into_iter()
        .map(|a| {
            let remote_handle = match (&a.local_path, a.canonical_form.mime_type()) {
                (Some(_), Some(mime)) => Some(RemoteHandle {
                    name: "pending".to_string(),
                    uri: format!("pending://{}", a.source.relative_path),
                    mime_type: mime.to_string(),
                }),
                _ => None,
            };
            let handle = UploadedHandle {
                source: a.source.clone(),
                canonical_form: a.canonical_form,
                remote_handle,
                failure: a.failure.clone(),
            };
            (a.source.absolute_path.clone(), handle)
        })
        .collect();

    let outline = PromptAssembler::for_folder(folder, schema)
        .build(&uploads)
        .outline();

    Ok(DryRun {
        files: uploads
            .values()
            .map(|u| {
                (
                    u.source.relative_path.clone(),
                    u.canonical_form.label(),
                    u.failure.clone(),
                )
            })
            .collect(),
        outline,
        report_path: report_path(&config.report.output_dir, folder),
    })
}

fn unavailable(uploads: &UploadMap) -> Vec<(String, String)> {
    uploads
        .values()
        .filter(|u| u.remote_handle.is_none())
        .map(|u| {
            (
                u.source.relative_path.clone(),
                u.failure.clone().unwrap_or_else(|| "not uploaded".to_string()),
            )
        })
        .collect()
}
