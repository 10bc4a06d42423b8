//! Client for template-driven image generation jobs.
//!
//! Modules:
//! - `workflow`: HTTP client plus the upload, template, binding, job and
//!   download stages.
//! - `pipeline`: the end-to-end run built from those stages.
//! - `presets`: jobs with fixed inputs (portrait upscale).
//! - `preprocess`: optional face detection and crop before upload.
//! - `interactive`: the terminal question-and-answer flow.
//! - `config`: Env-driven configuration loader.
//! - `error`: Common error type and alias.
//!
//! Re-exports are provided for common types: `Config`, `ApiClient`,
//! `AppError` and `RunInputs`.
pub mod config;
pub mod error;
pub mod interactive;
pub mod pipeline;
pub mod preprocess;
pub mod presets;
pub mod workflow;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use pipeline::RunInputs;
pub use workflow::client::ApiClient;
