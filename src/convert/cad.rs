use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{expand_command, expect_output, run_process, Converter};
use crate::config::CadConfig;
use crate::error::ConversionError;
use crate::models::ScannedFile;

/// STEP → STL → PNG.
///
/// The STEP-to-mesh step always runs an external geometry kernel through
/// `mesh_command`. The mesh is drawn by `render_command` when configured,
/// otherwise by the built-in isometric renderer. Meshes and previews are
/// copied to `stl_dir` / `png_dir` when those are set.
pub struct CadConverter {
    mesh_command: Option<Vec<String>>,
    render_command: Option<Vec<String>>,
    width: u32,
    height: u32,
    png_dir: Option<PathBuf>,
    stl_dir: Option<PathBuf>,
}

impl CadConverter {
    pub fn from_config(config: &CadConfig) -> Self {
        Self {
            mesh_command: config.mesh_command.clone(),
            render_command: config.render_command.clone(),
            width: config.width,
            height: config.height,
            png_dir: config.png_dir.clone(),
            stl_dir: config.stl_dir.clone(),
        }
    }

    /// Renderer label for status output.
    pub fn renderer(&self) -> String {
        match &self.render_command {
            Some(cmd) => format!("external ({})", cmd.first().map(String::as_str).unwrap_or("?")),
            None => format!("built-in {}x{}", self.width, self.height),
        }
    }

    async fn mesh(&self, input: &Path, stl: &Path) -> Result<(), ConversionError> {
        let template = self
            .mesh_command
            .as_ref()
            .ok_or(ConversionError::NotConfigured("cad.mesh_command"))?;
        let (program, args) = expand_command(template, input, stl)?;
        run_process(&program, &args).await?;
        expect_output(stl)
    }

    async fn draw(&self, stl: &Path, png: &Path) -> Result<(), ConversionError> {
        match &self.render_command {
            Some(template) => {
                let (program, args) = expand_command(template, stl, png)?;
                run_process(&program, &args).await?;
            }
            None => {
                let (stl, png) = (stl.to_path_buf(), png.to_path_buf());
                let (width, height) = (self.width, self.height);
                tokio::task::spawn_blocking(move || {
                    crate::render::render_stl_to_png(&stl, &png, width, height)
                })
                .await
                .map_err(|e| ConversionError::Render(format!("worker panicked: {}", e)))??;
            }
        }
        expect_output(png)
    }

    /// Copy a side artifact into its permanent directory. Failure here does
    /// not fail the conversion.
    async fn retain(&self, file: &Path, dir: Option<&Path>, rel: &str) {
        let Some(dir) = dir else {
            return;
        };
        let Some(name) = file.file_name() else {
            return;
        };
        let dest = dir.join(name);
        let result = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::copy(file, &dest).await
        }
        .await;
        match result {
            Ok(_) => tracing::debug!(file = %rel, dest = %dest.display(), "retained"),
            Err(e) => {
                tracing::warn!(file = %rel, dest = %dest.display(), error = %e, "could not retain")
            }
        }
    }

    /// Render a single STEP file to `output` (used by `bom render`).
    pub async fn render_file(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
        let scratch = tempfile::Builder::new().prefix("bom-render-").tempdir()?;
        let file = ScannedFile {
            relative_path: input
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "model.stp".to_string()),
            absolute_path: input.to_path_buf(),
            extension: input
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
                .unwrap_or_default(),
        };
        let png = self.convert(&file, scratch.path()).await?;
        tokio::fs::copy(&png, output).await?;
        Ok(())
    }
}

#[async_trait]
impl Converter for CadConverter {
    fn name(&self) -> &str {
        "cad"
    }

    async fn convert(
        &self,
        file: &ScannedFile,
        scratch: &Path,
    ) -> Result<PathBuf, ConversionError> {
        let stem = file.flat_stem();
        let stl = scratch.join(format!("{}.stl", stem));
        let png = scratch.join(format!("{}.png", stem));

        self.mesh(&file.absolute_path, &stl).await?;
        self.draw(&stl, &png).await?;

        self.retain(&stl, self.stl_dir.as_deref(), &file.relative_path).await;
        self.retain(&png, self.png_dir.as_deref(), &file.relative_path).await;
        Ok(png)
    }
}
