use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use crate::pipeline::StepKind;

/// Errors raised while running the build pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{step} step could not start {}: {source}", .tool.display())]
    Spawn {
        step: StepKind,
        tool: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{step} step could not echo its command line: {source}")]
    Echo {
        step: StepKind,
        #[source]
        source: std::io::Error,
    },

    #[error("{step} step failed: {} exited with {status}{}", .tool.display(), stderr_suffix(.stderr))]
    StepFailed {
        step: StepKind,
        tool: PathBuf,
        status: ExitStatus,
        stderr: String,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n\n{trimmed}")
    }
}
