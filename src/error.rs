//! Common error type and result alias.
//!
//! Each pipeline stage has its own variant. Transport failures (DNS, timeouts,
//! connection resets) are folded into the variant of the stage they happened
//! in, so callers only ever match on what failed, not on how.
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("upload failed{}: {message}", status_suffix(.status))]
    UploadFailed { status: Option<u16>, message: String },

    #[error("template fetch failed{}: {message}", status_suffix(.status))]
    FetchFailed { status: Option<u16>, message: String },

    #[error("job submission failed{}: {message}", status_suffix(.status))]
    SubmissionFailed { status: Option<u16>, message: String },

    #[error("polling job {job_id} failed{}: {message}", status_suffix(.status))]
    PollFailed {
        job_id: String,
        status: Option<u16>,
        message: String,
    },

    #[error("job {job_id} finished with status {status}")]
    JobFailed { job_id: String, status: String },

    #[error("job {job_id} still running after {elapsed:?} ({attempts} status checks)")]
    Timeout {
        job_id: String,
        elapsed: Duration,
        attempts: u32,
    },

    #[error("download failed{}: {message}", status_suffix(.status))]
    DownloadFailed { status: Option<u16>, message: String },

    #[error("unexpected {context} response: {message}")]
    Decode {
        context: &'static str,
        message: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid field override: {0}")]
    InvalidOverride(String),

    #[error("invalid face box: {0}")]
    InvalidFaceBox(String),

    #[error("face detection failed: {0}")]
    FaceDetection(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// True when the remote job actually ran and reported `FAILED`, as opposed
    /// to the client failing to talk to the service.
    pub fn is_terminal_job_state(&self) -> bool {
        matches!(self, AppError::JobFailed { .. })
    }

    pub(crate) fn decode(context: &'static str, err: impl std::fmt::Display) -> Self {
        AppError::Decode {
            context,
            message: err.to_string(),
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {})", code),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_http_status_when_known() {
        let err = AppError::UploadFailed {
            status: Some(403),
            message: "signature expired".into(),
        };
        assert_eq!(err.to_string(), "upload failed (HTTP 403): signature expired");

        let err = AppError::FetchFailed {
            status: None,
            message: "connection refused".into(),
        };
        assert_eq!(err.to_string(), "template fetch failed: connection refused");
    }

    #[test]
    fn only_job_failed_is_terminal_job_state() {
        assert!(AppError::JobFailed {
            job_id: "j1".into(),
            status: "FAILED".into()
        }
        .is_terminal_job_state());
        assert!(!AppError::Timeout {
            job_id: "j1".into(),
            elapsed: Duration::from_secs(5),
            attempts: 5
        }
        .is_terminal_job_state());
        assert!(!AppError::InputNotFound(PathBuf::from("x.png")).is_terminal_job_state());
    }
}
