//! Converter capability.
//!
//! A [`Converter`] turns one scanned file into an upload-ready file inside a
//! scratch directory. Backends are either native library calls
//! ([`SpreadsheetConverter`], the built-in mesh renderer) or external
//! processes ([`OfficeConverter`], CAD mesh/render commands). The normalizer
//! applies the same timeout and failure handling to all of them.
//!
//! External processes are spawned with `kill_on_drop`, so dropping a
//! conversion future (timeout) also terminates the child.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::ConversionError;
use crate::models::ScannedFile;

mod cad;
mod office;

pub use cad::CadConverter;
pub use office::{OfficeConverter, OfficeTarget};

/// Converts one file into its canonical form.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Short backend name for logs (e.g. `"libreoffice"`).
    fn name(&self) -> &str;

    /// Convert `file`, writing the result under `scratch`.
    ///
    /// Returns the path of the converted file. Anything written to
    /// `scratch` is removed by the caller.
    async fn convert(
        &self,
        file: &ScannedFile,
        scratch: &Path,
    ) -> Result<PathBuf, ConversionError>;
}

/// `.xlsx` → CSV through the native reader.
pub struct SpreadsheetConverter;

#[async_trait]
impl Converter for SpreadsheetConverter {
    fn name(&self) -> &str {
        "xlsx"
    }

    async fn convert(
        &self,
        file: &ScannedFile,
        scratch: &Path,
    ) -> Result<PathBuf, ConversionError> {
        let input = file.absolute_path.clone();
        let output = scratch.join(format!("{}.csv", file_stem(&input)));
        let target = output.clone();
        let rows = tokio::task::spawn_blocking(move || crate::xlsx::xlsx_to_csv(&input, &target))
            .await
            .map_err(|e| ConversionError::Spreadsheet(format!("worker panicked: {}", e)))??;
        tracing::debug!(file = %file.relative_path, rows, "spreadsheet converted");
        Ok(output)
    }
}

pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string())
}

/// Substitute `{input}` and `{output}` in a command template.
pub(crate) fn expand_command(
    template: &[String],
    input: &Path,
    output: &Path,
) -> Result<(String, Vec<OsString>), ConversionError> {
    let (program, rest) = template
        .split_first()
        .ok_or(ConversionError::NotConfigured("command"))?;
    let input = input.to_string_lossy();
    let output = output.to_string_lossy();
    let args = rest
        .iter()
        .map(|arg| OsString::from(arg.replace("{input}", &input).replace("{output}", &output)))
        .collect();
    Ok((program.clone(), args))
}

/// Run an external program to completion. Non-zero exit is an error carrying
/// the tail of stderr.
pub(crate) async fn run_process(program: &str, args: &[OsString]) -> Result<(), ConversionError> {
    tracing::debug!(program, ?args, "spawning converter");
    let output = tokio::process::Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ConversionError::Process {
            program: program.to_string(),
            detail: if e.kind() == std::io::ErrorKind::NotFound {
                "executable not found on PATH".to_string()
            } else {
                e.to_string()
            },
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ConversionError::Process {
            program: program.to_string(),
            detail: format!("exit status {}: {}", output.status, tail(&stderr, 400)),
        });
    }
    Ok(())
}

fn tail(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        trimmed.to_string()
    } else {
        let skip = count - max_chars;
        format!("...{}", trimmed.chars().skip(skip).collect::<String>())
    }
}

/// Require that a converter actually produced its output.
pub(crate) fn expect_output(path: &Path) -> Result<(), ConversionError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ConversionError::MissingOutput(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_placeholders_inside_arguments() {
        let template = vec![
            "python3".to_string(),
            "-c".to_string(),
            "convert('{input}', '{output}')".to_string(),
        ];
        let (program, args) =
            expand_command(&template, Path::new("/in/a.stp"), Path::new("/tmp/a.stl")).unwrap();
        assert_eq!(program, "python3");
        assert_eq!(args[1], OsString::from("convert('/in/a.stp', '/tmp/a.stl')"));
    }

    #[test]
    fn empty_template_is_not_configured() {
        let err = expand_command(&[], Path::new("a"), Path::new("b")).unwrap_err();
        assert!(matches!(err, ConversionError::NotConfigured(_)));
    }

    #[test]
    fn tail_keeps_the_end() {
        assert_eq!(tail("  short \n", 10), "short");
        assert_eq!(tail("abcdefghij", 3), "...hij");
    }

    #[tokio::test]
    async fn missing_program_is_a_process_error() {
        let err = run_process("bom-harness-no-such-program", &[]).await.unwrap_err();
        match err {
            ConversionError::Process { detail, .. } => assert!(detail.contains("not found")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn spreadsheet_converter_writes_csv_into_scratch() {
        let tmp = tempfile::TempDir::new().unwrap();
        let input = tmp.path().join("Parts List.xlsx");
        let sheet = r#"<row r="1"><c r="A1" t="s"><v>0</v></c></row>"#;
        std::fs::write(&input, crate::xlsx::tests::workbook(&["Part"], sheet)).unwrap();
        let scratch = tmp.path().join("scratch");
        std::fs::create_dir(&scratch).unwrap();
        let file = ScannedFile {
            relative_path: "Parts List.xlsx".into(),
            absolute_path: input,
            extension: ".xlsx".into(),
        };

        let out = SpreadsheetConverter.convert(&file, &scratch).await.unwrap();
        assert_eq!(out, scratch.join("Parts List.csv"));
        assert_eq!(std::fs::read_to_string(out).unwrap(), "Part\n");
    }
}
