//! Format normalizer.
//!
//! Maps every scanned file to one upload-ready artifact. Routing is purely by
//! extension:
//!
//! | Extension       | Form        | Route                      |
//! |-----------------|-------------|----------------------------|
//! | `.pdf`          | PDF         | pass through               |
//! | `.xlsx`         | CSV         | native spreadsheet reader  |
//! | `.xls`          | CSV         | office suite               |
//! | `.pptx`         | PDF         | office suite               |
//! | `.stp`, `.step` | PNG         | CAD mesh + render          |
//! | anything else   | UNSUPPORTED | none                       |
//!
//! A conversion failure (error exit, missing output, timeout) is recorded on
//! that file's artifact and the batch continues.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::config::Config;
use crate::convert::{
    CadConverter, Converter, OfficeConverter, OfficeTarget, SpreadsheetConverter,
};
use crate::error::ConversionError;
use crate::models::{CanonicalForm, NormalizedArtifact, ScannedFile};
use crate::progress::{ProgressEvent, ProgressReporter};

/// Canonical form for a lowercased extension (with dot).
pub fn canonical_form_for(extension: &str) -> CanonicalForm {
    match extension {
        ".pdf" | ".pptx" => CanonicalForm::Pdf,
        ".xlsx" | ".xls" => CanonicalForm::Csv,
        ".stp" | ".step" => CanonicalForm::Png,
        _ => CanonicalForm::Unsupported,
    }
}

pub struct Normalizer {
    spreadsheet: Box<dyn Converter>,
    legacy_spreadsheet: Box<dyn Converter>,
    slides: Box<dyn Converter>,
    cad: Box<dyn Converter>,
    timeout: Duration,
}

impl Normalizer {
    pub fn from_config(config: &Config) -> Self {
        Self::with_converters(
            Box::new(SpreadsheetConverter),
            Box::new(OfficeConverter::new(&config.office.command, OfficeTarget::Csv)),
            Box::new(OfficeConverter::new(&config.office.command, OfficeTarget::Pdf)),
            Box::new(CadConverter::from_config(&config.cad)),
            Duration::from_secs(config.pipeline.conversion_timeout_secs),
        )
    }

    pub fn with_converters(
        spreadsheet: Box<dyn Converter>,
        legacy_spreadsheet: Box<dyn Converter>,
        slides: Box<dyn Converter>,
        cad: Box<dyn Converter>,
        timeout: Duration,
    ) -> Self {
        Self {
            spreadsheet,
            legacy_spreadsheet,
            slides,
            cad,
            timeout,
        }
    }

    fn converter_for(&self, extension: &str) -> Option<&dyn Converter> {
        match extension {
            ".xlsx" => Some(self.spreadsheet.as_ref()),
            ".xls" => Some(self.legacy_spreadsheet.as_ref()),
            ".pptx" => Some(self.slides.as_ref()),
            ".stp" | ".step" => Some(self.cad.as_ref()),
            _ => None,
        }
    }

    /// Normalize a single file. Never fails; problems end up in
    /// [`NormalizedArtifact::failure`].
    pub async fn normalize_one(&self, file: ScannedFile) -> NormalizedArtifact {
        let form = canonical_form_for(&file.extension);
        if form == CanonicalForm::Unsupported {
            tracing::debug!(file = %file.relative_path, "unsupported, skipping conversion");
            return NormalizedArtifact::unsupported(file);
        }
        let Some(converter) = self.converter_for(&file.extension) else {
            return NormalizedArtifact::passthrough(file, form);
        };

        let scratch = match tempfile::Builder::new().prefix("bom-").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                tracing::warn!(
                    file = %file.relative_path,
                    error = %e,
                    "could not create scratch directory"
                );
                return NormalizedArtifact::failed(file, form, e.to_string());
            }
        };

        let conversion = converter.convert(&file, scratch.path());
        let result = match tokio::time::timeout(self.timeout, conversion).await {
            Ok(result) => result,
            Err(_) => Err(ConversionError::Timeout {
                secs: self.timeout.as_secs(),
            }),
        };

        match result {
            Ok(path) => {
                tracing::debug!(
                    file = %file.relative_path,
                    converter = converter.name(),
                    form = form.label(),
                    "converted"
                );
                NormalizedArtifact::converted(file, form, path, scratch)
            }
            Err(e) => {
                tracing::warn!(
                    file = %file.relative_path,
                    converter = converter.name(),
                    error = %e,
                    "conversion failed"
                );
                // scratch is dropped here, removing partial output
                NormalizedArtifact::failed(file, form, e.to_string())
            }
        }
    }

    /// Normalize every file with at most `workers` conversions in flight.
    /// The result has one artifact per input, in input order.
    pub async fn normalize_all(
        &self,
        files: &[ScannedFile],
        workers: usize,
        progress: &dyn ProgressReporter,
    ) -> Vec<NormalizedArtifact> {
        let total = files.len() as u64;
        let done = AtomicU64::new(0);
        let done = &done;

        stream::iter(files.iter().cloned())
            .map(|file| async move {
                let artifact = self.normalize_one(file).await;
                let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                progress.report(ProgressEvent::Normalizing { n, total });
                artifact
            })
            .buffered(workers.max(1))
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Writes `<stem>.out` into scratch, optionally failing afterwards.
    struct FakeConverter {
        fail: bool,
        delay: Duration,
        scratch_seen: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl FakeConverter {
        fn ok() -> Self {
            Self {
                fail: false,
                delay: Duration::ZERO,
                scratch_seen: Arc::default(),
            }
        }
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::ok()
            }
        }
        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::ok()
            }
        }
    }

    #[async_trait]
    impl Converter for FakeConverter {
        fn name(&self) -> &str {
            "fake"
        }

        async fn convert(
        &self,
        file: &ScannedFile,
        scratch: &Path,
    ) -> Result<PathBuf, ConversionError> {
            self.scratch_seen.lock().unwrap().push(scratch.to_path_buf());
            tokio::time::sleep(self.delay).await;
            let out = scratch.join(format!("{}.out", file.flat_stem()));
            std::fs::write(&out, b"converted")?;
            if self.fail {
                return Err(ConversionError::Process {
                    program: "fake".into(),
                    detail: "exit status 1".into(),
                });
            }
            Ok(out)
        }
    }

    fn normalizer(spreadsheet: FakeConverter, cad: FakeConverter, timeout: Duration) -> Normalizer {
        Normalizer::with_converters(
            Box::new(spreadsheet),
            Box::new(FakeConverter::ok()),
            Box::new(FakeConverter::ok()),
            Box::new(cad),
            timeout,
        )
    }

    fn scanned(root: &Path, rel: &str) -> ScannedFile {
        let absolute_path = root.join(rel);
        std::fs::write(&absolute_path, b"x").unwrap();
        let extension = Path::new(rel)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        ScannedFile {
            relative_path: rel.to_string(),
            absolute_path,
            extension,
        }
    }

    #[test]
    fn routing_table() {
        assert_eq!(canonical_form_for(".pdf"), CanonicalForm::Pdf);
        assert_eq!(canonical_form_for(".pptx"), CanonicalForm::Pdf);
        assert_eq!(canonical_form_for(".xlsx"), CanonicalForm::Csv);
        assert_eq!(canonical_form_for(".xls"), CanonicalForm::Csv);
        assert_eq!(canonical_form_for(".stp"), CanonicalForm::Png);
        assert_eq!(canonical_form_for(".step"), CanonicalForm::Png);
        assert_eq!(canonical_form_for(".dwg"), CanonicalForm::Unsupported);
        assert_eq!(canonical_form_for(""), CanonicalForm::Unsupported);
    }

    #[tokio::test]
    async fn one_artifact_per_file_in_order() {
        let tmp = TempDir::new().unwrap();
        let files = vec![
            scanned(tmp.path(), "a.pdf"),
            scanned(tmp.path(), "b.xlsx"),
            scanned(tmp.path(), "c.txt"),
        ];
        let n = normalizer(FakeConverter::ok(), FakeConverter::ok(), Duration::from_secs(5));

        let artifacts = n.normalize_all(&files, 2, &NoProgress).await;
        let forms: Vec<CanonicalForm> = artifacts.iter().map(|a| a.canonical_form).collect();
        assert_eq!(
            forms,
            vec![CanonicalForm::Pdf, CanonicalForm::Csv, CanonicalForm::Unsupported]
        );
        assert_eq!(artifacts[0].local_path.as_deref(), Some(files[0].absolute_path.as_path()));
        assert!(artifacts[1].local_path.as_ref().unwrap().ends_with("b.out"));
        assert!(artifacts[2].local_path.is_none());
    }

    #[tokio::test]
    async fn failed_conversion_does_not_abort_batch_and_cleans_scratch() {
        let tmp = TempDir::new().unwrap();
        let files = vec![scanned(tmp.path(), "bom.xlsx"), scanned(tmp.path(), "part.stp")];
        let failing = FakeConverter::failing();
        let failed_scratch = Arc::clone(&failing.scratch_seen);
        let n = normalizer(failing, FakeConverter::ok(), Duration::from_secs(5));

        let artifacts = n.normalize_all(&files, 4, &NoProgress).await;
        assert_eq!(artifacts.len(), 2);
        assert!(artifacts[0].local_path.is_none());
        assert!(artifacts[0].failure.as_ref().unwrap().contains("exit status 1"));
        assert!(artifacts[1].is_available());

        let seen: Vec<PathBuf> = artifacts
            .iter()
            .filter_map(|a| a.scratch_path().map(Path::to_path_buf))
            .collect();
        assert_eq!(seen.len(), 1, "only the successful conversion keeps scratch");

        let failed_scratch = failed_scratch.lock().unwrap();
        assert_eq!(failed_scratch.len(), 1);
        assert!(!failed_scratch[0].exists());
    }

    #[tokio::test]
    async fn scratch_lives_until_artifact_is_dropped() {
        let tmp = TempDir::new().unwrap();
        let n = normalizer(FakeConverter::ok(), FakeConverter::ok(), Duration::from_secs(5));

        let artifact = n.normalize_one(scanned(tmp.path(), "bom.xlsx")).await;
        let scratch = artifact.scratch_path().unwrap().to_path_buf();
        assert!(artifact.local_path.as_ref().unwrap().is_file());
        drop(artifact);
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn slow_conversion_times_out() {
        let tmp = TempDir::new().unwrap();
        let n = normalizer(
            FakeConverter::ok(),
            FakeConverter::slow(Duration::from_secs(30)),
            Duration::from_millis(50),
        );

        let artifact = n.normalize_one(scanned(tmp.path(), "model.step")).await;
        assert_eq!(artifact.canonical_form, CanonicalForm::Png);
        assert!(artifact.local_path.is_none());
        assert!(artifact.failure.unwrap().contains("timed out"));
    }
}
