//! # BOM Harness CLI (`bom`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bom run [FOLDER]` | Build the component report for a folder |
//! | `bom scan FOLDER` | Print the directory map, optionally write a file list |
//! | `bom render STEP` | Render one STEP model to PNG |
//! | `bom xlsx2csv IN OUT` | Convert the first sheet of a workbook to CSV |
//! | `bom ask FILE QUESTION` | Ask the model about a single file |
//! | `bom check` | Verify converters, credential and template |

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use bom_harness::config::{self, Config};
use bom_harness::convert::CadConverter;
use bom_harness::progress::ProgressMode;
use bom_harness::service::GeminiClient;
use bom_harness::{ask, check, pipeline, scanner, xlsx};

const DEFAULT_CONFIG: &str = "./config/bom.toml";

/// BOM Harness: manufacturing bills of materials from customer engineering files.
///
/// All commands accept `--config`. A missing file at the default path means
/// built-in defaults; see `config/bom.example.toml`.
#[derive(Parser)]
#[command(name = "bom", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Progress on stderr. Defaults to `human` on a terminal, `off` otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressArg>,

    /// Debug logging (`RUST_LOG` overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Human,
    Json,
    Off,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the component report for a folder.
    ///
    /// Prompts for the folder on stdin when it is omitted.
    Run {
        folder: Option<PathBuf>,

        /// Scan and convert, print the prompt outline, upload nothing.
        #[arg(long)]
        dry_run: bool,

        /// Report columns: `basic`, `extended`, or `preview`.
        #[arg(long)]
        schema: Option<String>,

        /// Directory for `<folder>_components.html`.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Print the directory map of a folder.
    Scan {
        folder: PathBuf,

        /// Also write matching relative paths to this file.
        #[arg(long)]
        list_file: Option<PathBuf>,

        /// Extensions for `--list-file`.
        #[arg(long = "ext", num_args = 1.., default_values = [".stp", ".dwg", ".pdf", ".xlsx"])]
        extensions: Vec<String>,
    },

    /// Render a STEP model to PNG from the isometric viewpoint.
    Render {
        input: PathBuf,

        /// Defaults to the input name with `.png`.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Convert the first sheet of an `.xlsx` workbook to CSV.
    Xlsx2csv { input: PathBuf, output: PathBuf },

    /// Ask the model a question about one file.
    Ask {
        file: PathBuf,
        question: String,

        /// Send the file inline instead of uploading it.
        #[arg(long)]
        inline: bool,
    },

    /// Check converters, credential and template.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Commands that don't require config
    match &cli.command {
        Commands::Scan {
            folder,
            list_file,
            extensions,
        } => {
            let files = scanner::scan_folder(folder)?;
            let project = bom_harness::prompt::project_name(folder);
            print!("{}", scanner::directory_map(&project, &files));
            if let Some(list_file) = list_file {
                let written = scanner::write_file_list(&files, list_file, extensions)
                    .with_context(|| format!("Failed to write {}", list_file.display()))?;
                println!("wrote {} paths to {}", written, list_file.display());
            }
            return Ok(());
        }
        Commands::Xlsx2csv { input, output } => {
            let rows = xlsx::xlsx_to_csv(input, output)
                .with_context(|| format!("Failed to convert {}", input.display()))?;
            println!("wrote {} rows to {}", rows, output.display());
            return Ok(());
        }
        _ => {}
    }

    let mut cfg = load_config(&cli.config)?;
    let progress = match cli.progress {
        Some(ProgressArg::Human) => ProgressMode::Human,
        Some(ProgressArg::Json) => ProgressMode::Json,
        Some(ProgressArg::Off) => ProgressMode::Off,
        None => ProgressMode::default_for_tty(),
    }
    .reporter();

    match cli.command {
        Commands::Run {
            folder,
            dry_run,
            schema,
            output_dir,
        } => {
            if let Some(schema) = schema {
                cfg.report.schema = schema;
            }
            if let Some(dir) = output_dir {
                cfg.report.output_dir = dir;
            }
            config::validate(&cfg)?;

            let folder = match folder {
                Some(folder) => folder,
                None => prompt_for_folder()?,
            };

            if dry_run {
                let preview = pipeline::preview(&cfg, &folder, progress.as_ref()).await?;
                preview.print_summary(&folder);
            } else {
                let client = GeminiClient::new(&cfg.service)?;
                let outcome =
                    pipeline::run_report(&cfg, &folder, &client, progress.as_ref()).await?;
                outcome.print_summary(&folder);
            }
        }
        Commands::Render { input, output } => {
            let output = output.unwrap_or_else(|| input.with_extension("png"));
            CadConverter::from_config(&cfg.cad)
                .render_file(&input, &output)
                .await
                .with_context(|| format!("Failed to render {}", input.display()))?;
            println!("wrote {}", output.display());
        }
        Commands::Ask {
            file,
            question,
            inline,
        } => {
            let client = GeminiClient::new(&cfg.service)?;
            let answer = ask::ask_file(&cfg, &file, &question, inline, &client).await?;
            println!("{}", answer);
        }
        Commands::Check => {
            let rows = check::run_checks(&cfg);
            check::print_checks(&rows);
        }
        Commands::Scan { .. } | Commands::Xlsx2csv { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

/// An explicit `--config` must exist; the default path may be absent.
fn load_config(path: &Path) -> Result<Config> {
    if path == Path::new(DEFAULT_CONFIG) {
        config::load_or_default(path)
    } else {
        config::load_config(path)
    }
}

fn prompt_for_folder() -> Result<PathBuf> {
    print!("Folder to scan: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let folder = line.trim().trim_matches(|c| c == '"' || c == '\'');
    if folder.is_empty() {
        bail!("no folder given");
    }
    Ok(PathBuf::from(folder))
}
