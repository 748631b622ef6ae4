//! Core data models used throughout BOM Harness.
//!
//! Each stage of the pipeline produces exactly one of these and hands it to
//! the next stage by value: [`ScannedFile`] → [`NormalizedArtifact`] →
//! [`UploadedHandle`] → [`PromptDocument`].

use std::path::PathBuf;

use indexmap::IndexMap;
use tempfile::TempDir;

/// A file discovered under the scanned folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Path relative to the scan root, `/`-separated.
    pub relative_path: String,
    pub absolute_path: PathBuf,
    /// Lowercased extension including the dot, or `""`.
    pub extension: String,
}

impl ScannedFile {
    /// STEP models are rendered to images before upload.
    pub fn is_cad_model(&self) -> bool {
        matches!(self.extension.as_str(), ".stp" | ".step")
    }

    /// Relative path without extension, directory separators replaced by `__`.
    ///
    /// Used to name retained previews so files from different folders with
    /// the same base name do not collide.
    pub fn flat_stem(&self) -> String {
        let cut = self.relative_path.len().saturating_sub(self.extension.len());
        let without_ext = match self.relative_path.get(..cut) {
            Some(stem) if !self.extension.is_empty() => stem,
            _ => &self.relative_path,
        };
        without_ext.replace('/', "__")
    }
}

/// Upload-ready format an input is normalized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalForm {
    Pdf,
    Csv,
    Png,
    Unsupported,
}

impl CanonicalForm {
    /// MIME type sent with the upload. `None` for unsupported files.
    pub fn mime_type(&self) -> Option<&'static str> {
        match self {
            CanonicalForm::Pdf => Some("application/pdf"),
            CanonicalForm::Csv => Some("text/csv"),
            CanonicalForm::Png => Some("image/png"),
            CanonicalForm::Unsupported => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CanonicalForm::Pdf => "PDF",
            CanonicalForm::Csv => "CSV",
            CanonicalForm::Png => "PNG",
            CanonicalForm::Unsupported => "UNSUPPORTED",
        }
    }
}

/// Output of the normalizer for one scanned file.
///
/// `local_path` is `None` when the type is unsupported or conversion failed.
/// Converted files live in a scratch directory owned by the artifact and
/// removed when the artifact is dropped.
#[derive(Debug)]
pub struct NormalizedArtifact {
    pub source: ScannedFile,
    pub canonical_form: CanonicalForm,
    pub local_path: Option<PathBuf>,
    /// Why `local_path` is absent, for logs and the run summary.
    pub failure: Option<String>,
    scratch: Option<TempDir>,
}

impl NormalizedArtifact {
    pub fn passthrough(source: ScannedFile, form: CanonicalForm) -> Self {
        let local_path = Some(source.absolute_path.clone());
        Self {
            source,
            canonical_form: form,
            local_path,
            failure: None,
            scratch: None,
        }
    }

    pub fn converted(
        source: ScannedFile,
        form: CanonicalForm,
        local_path: PathBuf,
        scratch: TempDir,
    ) -> Self {
        Self {
            source,
            canonical_form: form,
            local_path: Some(local_path),
            failure: None,
            scratch: Some(scratch),
        }
    }

    pub fn failed(source: ScannedFile, form: CanonicalForm, reason: impl Into<String>) -> Self {
        Self {
            source,
            canonical_form: form,
            local_path: None,
            failure: Some(reason.into()),
            scratch: None,
        }
    }

    pub fn unsupported(source: ScannedFile) -> Self {
        let reason = format!("unsupported file type '{}'", source.extension);
        Self::failed(source, CanonicalForm::Unsupported, reason)
    }

    pub fn is_available(&self) -> bool {
        self.local_path.is_some()
    }

    /// Scratch directory holding the converted file, if any.
    pub fn scratch_path(&self) -> Option<&std::path::Path> {
        self.scratch.as_ref().map(|d| d.path())
    }
}

/// Opaque reference to a file accepted by the model service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHandle {
    /// Service-side resource name (e.g. `files/abc123`).
    pub name: String,
    /// URI used to reference the file in a completion request.
    pub uri: String,
    pub mime_type: String,
}

/// Upload outcome for one scanned file. The scratch files are gone by now.
#[derive(Debug, Clone)]
pub struct UploadedHandle {
    pub source: ScannedFile,
    pub canonical_form: CanonicalForm,
    pub remote_handle: Option<RemoteHandle>,
    /// Conversion or upload failure, when `remote_handle` is absent.
    pub failure: Option<String>,
}

/// Absolute path → upload outcome, in discovery order.
///
/// Keyed by the real path rather than the `/`-joined display path: two
/// distinct names can share a lossy rendering, and each must keep its entry.
pub type UploadMap = IndexMap<PathBuf, UploadedHandle>;

/// One element of the prompt sent to the completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSegment {
    Text(String),
    File(RemoteHandle),
    /// File bytes sent inline (base64), without a prior upload.
    Inline { mime_type: String, data: Vec<u8> },
}

/// Ordered prompt, built deterministically from an [`UploadMap`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptDocument {
    pub segments: Vec<PromptSegment>,
}

impl PromptDocument {
    pub fn push_text(&mut self, text: impl Into<String>) {
        self.segments.push(PromptSegment::Text(text.into()));
    }

    pub fn push_file(&mut self, handle: RemoteHandle) {
        self.segments.push(PromptSegment::File(handle));
    }

    /// Number of `--- FILE: ... ---` label segments.
    pub fn label_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| {
                matches!(s, PromptSegment::Text(t) if t.starts_with(crate::prompt::LABEL_PREFIX))
            })
            .count()
    }

    /// Human-readable rendering; file segments become `<file: uri>`.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                PromptSegment::Text(t) => out.push_str(t),
                PromptSegment::File(h) => {
                    out.push_str(&format!("<file: {} ({})>", h.uri, h.mime_type))
                }
                PromptSegment::Inline { mime_type, data } => {
                    out.push_str(&format!("<inline: {} bytes ({})>", data.len(), mime_type))
                }
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanned(rel: &str, ext: &str) -> ScannedFile {
        ScannedFile {
            relative_path: rel.to_string(),
            absolute_path: PathBuf::from("/in").join(rel),
            extension: ext.to_string(),
        }
    }

    #[test]
    fn flat_stem_keeps_original_case() {
        assert_eq!(scanned("asm/Bracket-01.STP", ".stp").flat_stem(), "asm__Bracket-01");
        assert_eq!(scanned("plate.step", ".step").flat_stem(), "plate");
        assert_eq!(scanned("Makefile", "").flat_stem(), "Makefile");
    }

    #[test]
    fn mime_types_follow_canonical_form() {
        assert_eq!(CanonicalForm::Pdf.mime_type(), Some("application/pdf"));
        assert_eq!(CanonicalForm::Csv.mime_type(), Some("text/csv"));
        assert_eq!(CanonicalForm::Png.mime_type(), Some("image/png"));
        assert_eq!(CanonicalForm::Unsupported.mime_type(), None);
    }

    #[test]
    fn unsupported_artifact_has_no_local_path() {
        let a = NormalizedArtifact::unsupported(scanned("notes.txt", ".txt"));
        assert_eq!(a.canonical_form, CanonicalForm::Unsupported);
        assert!(!a.is_available());
        assert!(a.failure.unwrap().contains(".txt"));
    }
}
