//! Environment check (`bom check`).
//!
//! Reports whether each external piece a run depends on is in place, in the
//! same table shape as a connector listing.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::convert::CadConverter;
use crate::report::Template;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRow {
    pub component: &'static str,
    pub status: String,
    pub healthy: bool,
}

impl CheckRow {
    fn new(component: &'static str, status: impl Into<String>, healthy: bool) -> Self {
        Self {
            component,
            status: status.into(),
            healthy,
        }
    }
}

pub fn run_checks(config: &Config) -> Vec<CheckRow> {
    let _ = dotenvy::dotenv();
    let mut rows = Vec::new();

    rows.push(match find_program(&config.office.command) {
        Some(path) => CheckRow::new("office", format!("OK ({})", path.display()), true),
        None => CheckRow::new(
            "office",
            format!("NOT FOUND ({}); .pptx/.xls unavailable", config.office.command),
            false,
        ),
    });

    rows.push(match config.cad.mesh_command.as_deref().and_then(|c| c.first()) {
        None => CheckRow::new("cad mesh", "NOT CONFIGURED; STEP previews unavailable", false),
        Some(program) => program_row("cad mesh", program),
    });

    rows.push(match config.cad.render_command.as_deref().and_then(|c| c.first()) {
        None => CheckRow::new(
            "cad render",
            format!("OK ({})", CadConverter::from_config(&config.cad).renderer()),
            true,
        ),
        Some(program) => program_row("cad render", program),
    });

    let key = &config.service.api_key_env;
    rows.push(match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => CheckRow::new("credential", format!("OK ({})", key), true),
        _ => CheckRow::new("credential", format!("MISSING ({})", key), false),
    });

    rows.push(
        match Template::load(&config.report.template, &config.report.placeholder) {
            Ok(_) => CheckRow::new(
                "template",
                format!("OK ({})", config.report.template.display()),
                true,
            ),
            Err(e) => CheckRow::new("template", format!("ERROR: {}", e), false),
        },
    );

    rows
}

pub fn print_checks(rows: &[CheckRow]) {
    println!("{:<12} {:<7} STATUS", "COMPONENT", "HEALTHY");
    for row in rows {
        println!("{:<12} {:<7} {}", row.component, row.healthy, row.status);
    }
}

fn program_row(component: &'static str, program: &str) -> CheckRow {
    match find_program(program) {
        Some(path) => CheckRow::new(component, format!("OK ({})", path.display()), true),
        None => CheckRow::new(component, format!("NOT FOUND ({})", program), false),
    }
}

/// Resolve `program` the way a spawn would: paths as given, bare names
/// through `PATH`.
pub fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).find_map(|dir| {
        let full = dir.join(program);
        if full.is_file() {
            return Some(full);
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{}.exe", program));
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}
