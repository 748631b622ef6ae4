use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{expect_output, file_stem, run_process, Converter};
use crate::error::ConversionError;
use crate::models::ScannedFile;

/// Output format requested from the office suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfficeTarget {
    /// Slide decks.
    Pdf,
    /// Legacy `.xls` workbooks; LibreOffice exports the first sheet.
    Csv,
}

impl OfficeTarget {
    fn format(&self) -> &'static str {
        match self {
            OfficeTarget::Pdf => "pdf",
            OfficeTarget::Csv => "csv",
        }
    }
}

/// Headless LibreOffice conversion.
///
/// Each invocation gets its own user profile inside the scratch directory;
/// concurrent `soffice` processes sharing one profile refuse to start.
pub struct OfficeConverter {
    command: String,
    target: OfficeTarget,
}

impl OfficeConverter {
    pub fn new(command: impl Into<String>, target: OfficeTarget) -> Self {
        Self {
            command: command.into(),
            target,
        }
    }

    fn arguments(&self, input: &Path, outdir: &Path, profile: &Path) -> Vec<OsString> {
        vec![
            OsString::from(format!("-env:UserInstallation=file://{}", profile.display())),
            OsString::from("--headless"),
            OsString::from("--convert-to"),
            OsString::from(self.target.format()),
            OsString::from("--outdir"),
            outdir.as_os_str().to_owned(),
            input.as_os_str().to_owned(),
        ]
    }
}

#[async_trait]
impl Converter for OfficeConverter {
    fn name(&self) -> &str {
        &self.command
    }

    async fn convert(
        &self,
        file: &ScannedFile,
        scratch: &Path,
    ) -> Result<PathBuf, ConversionError> {
        let outdir = scratch.join("out");
        let profile = scratch.join("profile");
        tokio::fs::create_dir_all(&outdir).await?;

        let args = self.arguments(&file.absolute_path, &outdir, &profile);
        run_process(&self.command, &args).await?;

        let expected = outdir.join(format!(
            "{}.{}",
            file_stem(&file.absolute_path),
            self.target.format()
        ));
        expect_output(&expected)?;
        Ok(expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_headless_invocation() {
        let conv = OfficeConverter::new("soffice", OfficeTarget::Pdf);
        let args = conv.arguments(
            Path::new("/jobs/deck.pptx"),
            Path::new("/tmp/s/out"),
            Path::new("/tmp/s/profile"),
        );
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(
            args,
            vec![
                "-env:UserInstallation=file:///tmp/s/profile",
                "--headless",
                "--convert-to",
                "pdf",
                "--outdir",
                "/tmp/s/out",
                "/jobs/deck.pptx",
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn zero_exit_without_output_is_missing_output() {
        // `true` ignores its arguments and writes nothing.
        let conv = OfficeConverter::new("true", OfficeTarget::Pdf);
        let tmp = tempfile::TempDir::new().unwrap();
        let file = ScannedFile {
            relative_path: "deck.pptx".into(),
            absolute_path: tmp.path().join("deck.pptx"),
            extension: ".pptx".into(),
        };
        let err = conv.convert(&file, tmp.path()).await.unwrap_err();
        assert!(matches!(err, ConversionError::MissingOutput(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_a_process_error() {
        let conv = OfficeConverter::new("false", OfficeTarget::Csv);
        let tmp = tempfile::TempDir::new().unwrap();
        let file = ScannedFile {
            relative_path: "old.xls".into(),
            absolute_path: tmp.path().join("old.xls"),
            extension: ".xls".into(),
        };
        let err = conv.convert(&file, tmp.path()).await.unwrap_err();
        assert!(matches!(err, ConversionError::Process { .. }));
    }
}
