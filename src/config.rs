use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub office: OfficeConfig,
    #[serde(default)]
    pub cad: CadConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

impl Config {
    /// CAD settings as used for a report run.
    ///
    /// The `preview` schema embeds `<img>` tags that resolve relative to the
    /// report, so rendered PNGs land in `report.output_dir` unless `png_dir`
    /// says otherwise.
    pub fn cad_for_run(&self) -> CadConfig {
        let mut cad = self.cad.clone();
        if cad.png_dir.is_none()
            && self.report.instruction_file.is_none()
            && self.report.schema == "preview"
        {
            cad.png_dir = Some(self.report.output_dir.clone());
        }
        cad
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_service_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            timeout_secs: default_service_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_api_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_service_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    32_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Concurrent conversions / uploads.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_conversion_timeout_secs")]
    pub conversion_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            conversion_timeout_secs: default_conversion_timeout_secs(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_conversion_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct OfficeConfig {
    /// LibreOffice executable (`libreoffice` or `soffice`).
    #[serde(default = "default_office_command")]
    pub command: String,
}

impl Default for OfficeConfig {
    fn default() -> Self {
        Self {
            command: default_office_command(),
        }
    }
}

fn default_office_command() -> String {
    "libreoffice".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CadConfig {
    /// STEP → STL command; `{input}` and `{output}` are substituted.
    #[serde(default)]
    pub mesh_command: Option<Vec<String>>,
    /// STL → PNG command. The built-in renderer is used when unset.
    #[serde(default)]
    pub render_command: Option<Vec<String>>,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Keep rendered previews here.
    #[serde(default)]
    pub png_dir: Option<PathBuf>,
    /// Keep intermediate meshes here.
    #[serde(default)]
    pub stl_dir: Option<PathBuf>,
}

impl Default for CadConfig {
    fn default() -> Self {
        Self {
            mesh_command: None,
            render_command: None,
            width: default_width(),
            height: default_height(),
            png_dir: None,
            stl_dir: None,
        }
    }
}

fn default_width() -> u32 {
    1920
}
fn default_height() -> u32 {
    1080
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    #[serde(default = "default_template")]
    pub template: PathBuf,
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// `basic`, `extended`, or `preview`.
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Replaces the built-in instruction for `schema`.
    #[serde(default)]
    pub instruction_file: Option<PathBuf>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            template: default_template(),
            placeholder: default_placeholder(),
            output_dir: default_output_dir(),
            schema: default_schema(),
            instruction_file: None,
        }
    }
}

fn default_template() -> PathBuf {
    PathBuf::from("templates/report.html")
}
fn default_placeholder() -> String {
    "{{TABLE_BODY}}".to_string()
}
fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_schema() -> String {
    "basic".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::default())
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.service.provider != "gemini" {
        bail!(
            "Unknown service provider: '{}'. Must be gemini.",
            config.service.provider
        );
    }
    if config.service.model.trim().is_empty() {
        bail!("service.model must not be empty");
    }
    if config.service.timeout_secs == 0 {
        bail!("service.timeout_secs must be > 0");
    }

    if config.pipeline.workers == 0 {
        bail!("pipeline.workers must be >= 1");
    }
    if config.pipeline.conversion_timeout_secs == 0 {
        bail!("pipeline.conversion_timeout_secs must be > 0");
    }

    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        bail!("retry.base_delay_ms must not exceed retry.max_delay_ms");
    }

    for (key, cmd) in [
        ("cad.mesh_command", &config.cad.mesh_command),
        ("cad.render_command", &config.cad.render_command),
    ] {
        if let Some(cmd) = cmd {
            if cmd.is_empty() {
                bail!("{} must name a program", key);
            }
            let joined = cmd.join(" ");
            if !joined.contains("{input}") || !joined.contains("{output}") {
                bail!("{} must contain {{input}} and {{output}} placeholders", key);
            }
        }
    }
    if config.cad.width == 0 || config.cad.height == 0 {
        bail!("cad.width and cad.height must be > 0");
    }

    if config.report.placeholder.is_empty() {
        bail!("report.placeholder must not be empty");
    }
    match config.report.schema.as_str() {
        "basic" | "extended" | "preview" => {}
        other => bail!(
            "Unknown report schema: '{}'. Must be basic, extended, or preview.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.service.model, "gemini-2.5-flash");
        assert_eq!(config.service.api_key_env, "GOOGLE_API_KEY");
        assert_eq!(config.pipeline.workers, 4);
        assert_eq!(config.report.placeholder, "{{TABLE_BODY}}");
        assert!(config.cad.mesh_command.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
[retry]
max_retries = 0

[cad]
mesh_command = ["step2stl", "{input}", "{output}"]
png_dir = "generated_pngs"
"#,
        )
        .unwrap();
        validate(&config).unwrap();
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.cad.width, 1920);
        assert_eq!(config.cad.png_dir, Some(PathBuf::from("generated_pngs")));
    }

    #[test]
    fn preview_schema_keeps_pngs_next_to_the_report() {
        let config: Config =
            toml::from_str("[report]\nschema = \"preview\"\noutput_dir = \"reports\"\n").unwrap();
        assert_eq!(config.cad_for_run().png_dir, Some(PathBuf::from("reports")));

        let explicit: Config = toml::from_str(
            "[report]\nschema = \"preview\"\n[cad]\npng_dir = \"previews\"\n",
        )
        .unwrap();
        assert_eq!(explicit.cad_for_run().png_dir, Some(PathBuf::from("previews")));

        assert!(Config::default().cad_for_run().png_dir.is_none());
    }

    #[test]
    fn rejects_unknown_schema() {
        let config: Config = toml::from_str("[report]\nschema = \"wide\"\n").unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("wide"));
    }

    #[test]
    fn rejects_command_without_placeholders() {
        let config: Config =
            toml::from_str("[cad]\nmesh_command = [\"step2stl\", \"in.stp\"]\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_zero_workers() {
        let config: Config = toml::from_str("[pipeline]\nworkers = 0\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = load_or_default(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.service.provider, "gemini");
    }
}
