//! Folder scanner.
//!
//! Lists every file under the scan root. Nothing is filtered here: files the
//! normalizer cannot handle still belong in the directory map so the model's
//! component list can be checked against the real inventory.

use std::path::Path;

use indexmap::IndexMap;
use walkdir::WalkDir;

use crate::error::PipelineError;
use crate::models::ScannedFile;

pub fn scan_folder(root: &Path) -> Result<Vec<ScannedFile>, PipelineError> {
    if !root.is_dir() {
        return Err(PipelineError::InvalidInput(format!(
            "not a directory: {}",
            root.display()
        )));
    }

    let mut files = Vec::new();

    let walker = WalkDir::new(root).sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                // An unreadable subdirectory should not hide its siblings.
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let relative_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();

        files.push(ScannedFile {
            relative_path,
            absolute_path: path.to_path_buf(),
            extension,
        });
    }

    tracing::debug!(root = %root.display(), files = files.len(), "scan complete");
    Ok(files)
}

/// Text tree of the scanned files: one line per directory, files indented
/// beneath it, directories in order of first appearance.
pub fn directory_map(project: &str, files: &[ScannedFile]) -> String {
    let mut dirs: IndexMap<String, Vec<&str>> = IndexMap::new();
    for file in files {
        let (dir, name) = match file.relative_path.rsplit_once('/') {
            Some((dir, name)) => (format!("{}/", dir), name),
            None => ("./".to_string(), file.relative_path.as_str()),
        };
        dirs.entry(dir).or_default().push(name);
    }

    let mut out = format!("Project: {}\n", project);
    if dirs.is_empty() {
        out.push_str("(no files)\n");
    }
    for (dir, names) in &dirs {
        out.push_str(dir);
        out.push('\n');
        for name in names {
            out.push_str("  ");
            out.push_str(name);
            out.push('\n');
        }
    }
    out
}

/// Write the relative paths of files whose extension is in `extensions`,
/// one per line. An empty allow-list writes every file.
pub fn write_file_list(
    files: &[ScannedFile],
    path: &Path,
    extensions: &[String],
) -> std::io::Result<usize> {
    let wanted: Vec<String> = extensions.iter().map(|e| normalize_ext(e)).collect();
    let selected: Vec<&str> = files
        .iter()
        .filter(|f| wanted.is_empty() || wanted.contains(&f.extension))
        .map(|f| f.relative_path.as_str())
        .collect();

    let mut body = selected.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    std::fs::write(path, body)?;
    Ok(selected.len())
}

fn normalize_ext(ext: &str) -> String {
    let lower = ext.trim().to_lowercase();
    if lower.is_empty() || lower.starts_with('.') {
        lower
    } else {
        format!(".{}", lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("drawings/sub")).unwrap();
        fs::write(root.join("BOM.XLSX"), b"x").unwrap();
        fs::write(root.join("drawings/a.pdf"), b"x").unwrap();
        fs::write(root.join("drawings/sub/part.stp"), b"x").unwrap();
        fs::write(root.join("readme"), b"x").unwrap();
        tmp
    }

    #[test]
    fn scans_recursively_with_lowercase_extensions() {
        let tmp = fixture();
        let mut files = scan_folder(tmp.path()).unwrap();
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        let rels: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(
            rels,
            vec!["BOM.XLSX", "drawings/a.pdf", "drawings/sub/part.stp", "readme"]
        );
        assert_eq!(files[0].extension, ".xlsx");
        assert_eq!(files[3].extension, "");
        assert!(files[2].absolute_path.ends_with("drawings/sub/part.stp"));
    }

    #[test]
    fn rejects_non_directory_root() {
        let tmp = fixture();
        let err = scan_folder(&tmp.path().join("readme")).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));

        let err = scan_folder(&tmp.path().join("missing")).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn empty_folder_scans_to_nothing() {
        let tmp = TempDir::new().unwrap();
        assert!(scan_folder(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn directory_map_groups_files_under_their_directory() {
        let files = vec![
            ScannedFile {
                relative_path: "bom.xlsx".into(),
                absolute_path: "/in/bom.xlsx".into(),
                extension: ".xlsx".into(),
            },
            ScannedFile {
                relative_path: "drawings/a.pdf".into(),
                absolute_path: "/in/drawings/a.pdf".into(),
                extension: ".pdf".into(),
            },
            ScannedFile {
                relative_path: "drawings/b.pdf".into(),
                absolute_path: "/in/drawings/b.pdf".into(),
                extension: ".pdf".into(),
            },
        ];
        let map = directory_map("job-42", &files);
        assert_eq!(
            map,
            "Project: job-42\n./\n  bom.xlsx\ndrawings/\n  a.pdf\n  b.pdf\n"
        );
    }

    #[test]
    fn file_list_filters_by_extension() {
        let tmp = fixture();
        let files = scan_folder(tmp.path()).unwrap();
        let out = tmp.path().join("file_list.txt");
        let written =
            write_file_list(&files, &out, &["pdf".to_string(), ".STP".to_string()]).unwrap();
        assert_eq!(written, 2);
        let body = fs::read_to_string(&out).unwrap();
        assert!(body.contains("drawings/a.pdf\n"));
        assert!(body.contains("drawings/sub/part.stp\n"));
        assert!(!body.contains("readme"));
    }
}
