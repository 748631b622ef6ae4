//! Prompt assembly.
//!
//! Builds the ordered [`PromptDocument`] for one completion: the directory
//! map, one labelled entry per scanned file (uploaded handle or an
//! unavailability marker), and the table instruction last.

use std::path::{Component, Path, PathBuf};

use crate::config::ReportConfig;
use crate::error::PipelineError;
use crate::models::{PromptDocument, ScannedFile, UploadMap};
use crate::scanner::directory_map;

/// Every per-file label starts with this.
pub const LABEL_PREFIX: &str = "--- FILE: ";
/// Stands in for a file that could not be converted or uploaded.
pub const UNAVAILABLE_MARKER: &str = "[preview unavailable]";
const STEP_ANNOTATION: &str = " (3D model rendered to PNG)";

const ROWS_ONLY: &str = "\
Output ONLY table rows (<tr>...</tr>), one row per component, with exactly the \
columns listed above and in that order. Do not output explanations, headings, \
<table> or <thead> tags, or ``` code fences.";

/// Columns the model is asked to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportSchema {
    /// Component name, material, quantity, surface finish.
    Basic,
    /// Full manufacturing sheet (13 columns).
    Extended,
    /// Name, preview image, material, quantity, spec.
    Preview,
    /// Caller-supplied instruction text, used verbatim.
    Custom(String),
}

impl ReportSchema {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "basic" => Some(ReportSchema::Basic),
            "extended" => Some(ReportSchema::Extended),
            "preview" => Some(ReportSchema::Preview),
            _ => None,
        }
    }

    /// Schema from `[report]`: `instruction_file` wins over `schema`.
    pub fn from_config(config: &ReportConfig) -> Result<Self, PipelineError> {
        if let Some(path) = &config.instruction_file {
            let text = std::fs::read_to_string(path).map_err(|e| {
                PipelineError::io(format!("reading instruction file {}", path.display()), e)
            })?;
            return Ok(ReportSchema::Custom(text));
        }
        Self::from_name(&config.schema).ok_or_else(|| {
            PipelineError::InvalidInput(format!("unknown report schema '{}'", config.schema))
        })
    }

    pub fn instruction(&self) -> String {
        let columns = match self {
            ReportSchema::Custom(text) => return text.clone(),
            ReportSchema::Basic => "\
From the customer's files, identify every individual component and infer its \
material, quantity and surface finish.

Columns:
<tr><td>Component name</td><td>Material</td><td>Quantity</td><td>Surface finish</td></tr>"
                .to_string(),
            ReportSchema::Extended => "\
From the customer's files, identify every individual component and prepare a \
manufacturing bill of materials for CNC machining. Where a value cannot be read \
from the files, give your best engineering estimate and mark it with (est.).

Columns:
<tr><td>Part number</td><td>Component name</td><td>Source file</td><td>Material</td>\
<td>Blank size</td><td>Quantity</td><td>Surface finish</td><td>Heat treatment</td>\
<td>Critical tolerances</td><td>Machining operations</td><td>Machine type</td>\
<td>Estimated cycle time</td><td>Notes</td></tr>"
                .to_string(),
            ReportSchema::Preview => "\
From the customer's files, identify every individual component and infer its \
material, quantity and surface finish specification.

Columns:
<tr><td>Component name</td><td>Image</td><td>Material</td><td>Quantity</td><td>Spec</td></tr>

- Component name = the STEP file name without its extension
- Each STEP file label names its preview image. The image file is the STEP \
file's relative path without its extension, with every / replaced by __, plus \
.png (models/bracket.stp becomes models__bracket.png)
- The Image cell embeds <img src=\"<preview image>\" width=\"160\">"
                .to_string(),
        };
        format!("{}\n\n{}", columns, ROWS_ONLY)
    }
}

pub struct PromptAssembler {
    project: String,
    schema: ReportSchema,
}

impl PromptAssembler {
    pub fn new(project: impl Into<String>, schema: ReportSchema) -> Self {
        Self {
            project: project.into(),
            schema,
        }
    }

    /// Project name from the scanned folder's base name.
    pub fn for_folder(folder: &Path, schema: ReportSchema) -> Self {
        Self::new(project_name(folder), schema)
    }

    /// Assemble the prompt. Pure: the same map always yields the same
    /// document, with exactly one label per entry.
    pub fn build(&self, uploads: &UploadMap) -> PromptDocument {
        let files: Vec<ScannedFile> = uploads.values().map(|u| u.source.clone()).collect();

        let mut doc = PromptDocument::default();
        doc.push_text(directory_map(&self.project, &files));

        for upload in uploads.values() {
            let source = &upload.source;
            let text = if self.schema == ReportSchema::Preview && source.is_cad_model() {
                preview_label(source)
            } else {
                label(&source.relative_path, source.is_cad_model())
            };
            doc.push_text(text);
            match &upload.remote_handle {
                Some(handle) => doc.push_file(handle.clone()),
                None => doc.push_text(UNAVAILABLE_MARKER),
            }
        }

        doc.push_text(self.schema.instruction());
        doc
    }
}

pub fn label(relative_path: &str, is_cad_model: bool) -> String {
    let annotation = if is_cad_model { STEP_ANNOTATION } else { "" };
    format!("{}{}{} ---", LABEL_PREFIX, relative_path, annotation)
}

/// STEP label naming the PNG that is retained next to the report.
fn preview_label(source: &ScannedFile) -> String {
    format!(
        "{}{}{}, image {}) ---",
        LABEL_PREFIX,
        source.relative_path,
        STEP_ANNOTATION.trim_end_matches(')'),
        preview_image_name(source)
    )
}

/// File name of the retained preview for a STEP model.
pub fn preview_image_name(source: &ScannedFile) -> String {
    format!("{}.png", source.flat_stem())
}

/// Base name of the folder after resolving `.` and `..`.
///
/// Relative paths are made absolute against the working directory first, so
/// `.` names the current directory. Roots fall back to the full path.
pub fn project_name(folder: &Path) -> String {
    let resolved = resolve(folder);
    resolved
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| resolved.display().to_string())
}

fn resolve(folder: &Path) -> PathBuf {
    let absolute = std::path::absolute(folder).unwrap_or_else(|_| folder.to_path_buf());
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CanonicalForm, PromptSegment, RemoteHandle, UploadedHandle};
    use std::path::PathBuf;

    fn entry(
        rel: &str,
        ext: &str,
        form: CanonicalForm,
        uploaded: bool,
    ) -> (PathBuf, UploadedHandle) {
        let remote_handle = uploaded.then(|| RemoteHandle {
            name: format!("files/{}", rel),
            uri: format!("fake://{}", rel),
            mime_type: form.mime_type().unwrap_or("application/octet-stream").to_string(),
        });
        let absolute_path = PathBuf::from("/job").join(rel);
        (
            absolute_path.clone(),
            UploadedHandle {
                source: ScannedFile {
                    relative_path: rel.to_string(),
                    absolute_path,
                    extension: ext.to_string(),
                },
                canonical_form: form,
                remote_handle,
                failure: None,
            },
        )
    }

    fn sample() -> UploadMap {
        [
            entry("drawing.pdf", ".pdf", CanonicalForm::Pdf, true),
            entry("models/bracket.stp", ".stp", CanonicalForm::Png, false),
            entry("notes.txt", ".txt", CanonicalForm::Unsupported, false),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn one_label_per_scanned_file() {
        let uploads = sample();
        let doc = PromptAssembler::new("job-7", ReportSchema::Basic).build(&uploads);
        assert_eq!(doc.label_count(), uploads.len());
    }

    #[test]
    fn segments_follow_map_then_files_then_instruction() {
        let doc = PromptAssembler::new("job-7", ReportSchema::Basic).build(&sample());
        let s = &doc.segments;
        assert_eq!(s.len(), 1 + 3 * 2 + 1);

        match &s[0] {
            PromptSegment::Text(t) => {
                assert!(t.starts_with("Project: job-7\n"));
                assert!(t.contains("models/\n  bracket.stp\n"));
            }
            other => panic!("expected directory map, got {:?}", other),
        }
        assert_eq!(s[1], PromptSegment::Text("--- FILE: drawing.pdf ---".into()));
        assert!(matches!(&s[2], PromptSegment::File(h) if h.uri == "fake://drawing.pdf"));
        let step = "--- FILE: models/bracket.stp (3D model rendered to PNG) ---";
        assert_eq!(s[3], PromptSegment::Text(step.into()));
        assert_eq!(s[4], PromptSegment::Text(UNAVAILABLE_MARKER.into()));
        assert_eq!(s[6], PromptSegment::Text(UNAVAILABLE_MARKER.into()));
        assert!(matches!(&s[7], PromptSegment::Text(t) if t.contains("Surface finish")));
    }

    #[test]
    fn assembly_is_deterministic() {
        let uploads = sample();
        let a = PromptAssembler::new("p", ReportSchema::Extended);
        assert_eq!(a.build(&uploads), a.build(&uploads));
    }

    #[test]
    fn empty_map_still_has_header_and_instruction() {
        let doc = PromptAssembler::new("empty", ReportSchema::Basic).build(&UploadMap::new());
        assert_eq!(doc.segments.len(), 2);
        assert_eq!(doc.label_count(), 0);
    }

    #[test]
    fn built_in_schemas_demand_rows_only() {
        for schema in [ReportSchema::Basic, ReportSchema::Extended, ReportSchema::Preview] {
            let text = schema.instruction();
            assert!(text.contains("ONLY table rows"));
            assert!(text.contains("code fences"));
        }
        assert!(ReportSchema::Extended.instruction().contains("Estimated cycle time"));
        assert!(ReportSchema::Preview.instruction().contains("<img src="));
        assert_eq!(ReportSchema::Custom("mine".into()).instruction(), "mine");
    }

    #[test]
    fn instruction_file_overrides_schema() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("instr.txt");
        std::fs::write(&path, "List fasteners only.").unwrap();
        let config = ReportConfig {
            instruction_file: Some(path),
            ..ReportConfig::default()
        };
        assert_eq!(
            ReportSchema::from_config(&config).unwrap(),
            ReportSchema::Custom("List fasteners only.".into())
        );
    }

    #[test]
    fn labels_share_a_display_path_without_merging() {
        let mut first = entry("a\u{fffd}.pdf", ".pdf", CanonicalForm::Pdf, true);
        first.0 = PathBuf::from("/job/first");
        let mut second = entry("a\u{fffd}.pdf", ".pdf", CanonicalForm::Pdf, true);
        second.0 = PathBuf::from("/job/second");
        let uploads: UploadMap = [first, second].into_iter().collect();

        let doc = PromptAssembler::new("p", ReportSchema::Basic).build(&uploads);
        assert_eq!(doc.label_count(), 2);
    }

    #[test]
    fn preview_schema_names_each_step_image() {
        let doc = PromptAssembler::new("job-7", ReportSchema::Preview).build(&sample());
        let expected = "--- FILE: models/bracket.stp (3D model rendered to PNG, \
                        image models__bracket.png) ---";
        assert_eq!(doc.segments[3], PromptSegment::Text(expected.into()));
        assert_eq!(doc.segments[1], PromptSegment::Text("--- FILE: drawing.pdf ---".into()));
        assert_eq!(doc.label_count(), 3);
        assert!(ReportSchema::Preview.instruction().contains("models__bracket.png"));
    }

    #[test]
    fn project_name_is_folder_base_name() {
        assert_eq!(project_name(Path::new("/data/Job 12")), "Job 12");
        assert_eq!(project_name(Path::new("/data/Job 12/")), "Job 12");
        assert_eq!(project_name(Path::new("/")), "/");
    }

    #[test]
    fn project_name_resolves_dot_segments() {
        let cwd = std::env::current_dir().unwrap();
        let base = cwd.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(project_name(Path::new(".")), base);
        assert_eq!(project_name(Path::new("./")), base);
        assert_eq!(project_name(Path::new("/data/Job 12/./drawings/..")), "Job 12");
    }
}
