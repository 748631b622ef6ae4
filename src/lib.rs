//! # BOM Harness
//!
//! Turns a folder of customer engineering files into a manufacturing bill of
//! materials, using a hosted multimodal model to read the drawings.
//!
//! Every file in the folder is normalized to a form the model accepts (PDF,
//! CSV or PNG), uploaded, and listed in one prompt that asks for the BOM as
//! HTML table rows. The rows are merged into an HTML template.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌───────────┐   ┌────────┐   ┌────────┐   ┌──────────┐   ┌────────┐
//! │ Scanner │──▶│ Normalizer│──▶│ Upload │──▶│ Prompt │──▶│Completion│──▶│ Report │
//! │ walkdir │   │ xlsx/LO/  │   │ Files  │   │assembly│   │ Gemini   │   │  HTML  │
//! └─────────┘   │ CAD       │   │ API    │   └────────┘   └──────────┘   └────────┘
//!               └───────────┘   └────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! bom check                     # verify converters, credential, template
//! bom run ./customer-job --dry-run
//! bom run ./customer-job        # writes customer-job_components.html
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Data passed between stages |
//! | [`scanner`] | Folder walk, directory map, file lists |
//! | [`xlsx`] | Native `.xlsx` → CSV |
//! | [`render`] | Built-in STL → PNG renderer |
//! | [`convert`] | Converter backends |
//! | [`normalize`] | Extension routing, timeouts, scratch dirs |
//! | [`service`] | Model service trait, Gemini client, retry |
//! | [`upload`] | Upload adapter |
//! | [`prompt`] | Prompt assembly and report schemas |
//! | [`report`] | Fence stripping and template output |
//! | [`pipeline`] | End-to-end run and dry run |
//! | [`ask`] | Single-file questions |
//! | [`check`] | Environment check |

pub mod ask;
pub mod check;
pub mod config;
pub mod convert;
pub mod error;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod prompt;
pub mod render;
pub mod report;
pub mod scanner;
pub mod service;
pub mod upload;
pub mod xlsx;
