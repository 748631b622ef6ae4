#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Single-sheet workbook with inline strings, no shared strings part.
pub fn write_xlsx(path: &Path, rows: &[&[&str]]) {
    let mut sheet_data = String::new();
    for (r, row) in rows.iter().enumerate() {
        sheet_data.push_str(&format!("<row r=\"{}\">", r + 1));
        for (c, value) in row.iter().enumerate() {
            let col = (b'A' + c as u8) as char;
            sheet_data.push_str(&format!(
                "<c r=\"{}{}\" t=\"inlineStr\"><is><t>{}</t></is></c>",
                col,
                r + 1,
                value
            ));
        }
        sheet_data.push_str("</row>");
    }

    let file = fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    zip.start_file("xl/worksheets/sheet1.xml", options).unwrap();
    let xml = format!(
        "<worksheet xmlns=\"{}\"><sheetData>{}</sheetData></worksheet>",
        "http://schemas.openxmlformats.org/spreadsheetml/2006/main", sheet_data
    );
    zip.write_all(xml.as_bytes()).unwrap();
    zip.finish().unwrap();
}

/// Customer job folder: a drawing, a BOM workbook, a STEP model, a note.
pub fn write_job(root: &Path) -> PathBuf {
    let job = root.join("Acme Pump");
    fs::create_dir_all(job.join("models")).unwrap();
    fs::write(job.join("drawing.pdf"), b"%PDF-1.4\n%%EOF\n").unwrap();
    write_xlsx(
        &job.join("parts.xlsx"),
        &[&["Part", "Qty"], &["Shaft", "2"], &["Housing", "1"]],
    );
    fs::write(
        job.join("models/impeller.stp"),
        b"ISO-10303-21;\nEND-ISO-10303-21;\n",
    )
    .unwrap();
    fs::write(job.join("notes.txt"), b"call customer").unwrap();
    job
}

pub const TEMPLATE: &str =
    "<html><body><table><tbody>\n{{TABLE_BODY}}\n</tbody></table></body></html>\n";

pub fn write_template(root: &Path) -> PathBuf {
    let path = root.join("report.html");
    fs::write(&path, TEMPLATE).unwrap();
    path
}

/// Tetrahedron mesh, the output of a stand-in STEP kernel.
pub const TETRA_STL: &str = "\
solid tetra
  facet normal 0 0 -1
    outer loop
      vertex 0 0 0
      vertex 1 0 0
      vertex 0 1 0
    endloop
  endfacet
  facet normal 0 -1 0
    outer loop
      vertex 0 0 0
      vertex 1 0 0
      vertex 0 0 1
    endloop
  endfacet
  facet normal -1 0 0
    outer loop
      vertex 0 0 0
      vertex 0 1 0
      vertex 0 0 1
    endloop
  endfacet
  facet normal 1 1 1
    outer loop
      vertex 1 0 0
      vertex 0 1 0
      vertex 0 0 1
    endloop
  endfacet
endsolid tetra
";
