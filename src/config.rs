use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Whether the pipeline stops at the first tool that exits non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop at the first failing step and report it.
    #[default]
    Abort,
    /// Ignore exit codes and run every step, as the legacy driver did.
    Continue,
}

/// Resolved tool locations and run options. Built once at startup and only
/// read afterwards.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub cxx: PathBuf,
    pub onnf: PathBuf,
    pub llc: PathBuf,
    /// Holds `libcruntime`; used as the linker search path and appended to
    /// `PYTHONPATH` for child processes.
    pub runtime_dir: PathBuf,
    pub echo_commands: bool,
    pub failure_policy: FailurePolicy,
}

impl DriverConfig {
    /// Derive tool paths from the onnf and LLVM build trees.
    pub fn from_build_dirs(cxx: &Path, onnf_build: &Path, llvm_build: &Path) -> Self {
        Self {
            cxx: cxx.to_path_buf(),
            onnf: onnf_build.join("bin").join("onnf"),
            llc: llvm_build.join("bin").join("llc"),
            runtime_dir: onnf_build.join("lib"),
            echo_commands: true,
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo_commands = echo;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// `PYTHONPATH` for child processes: the inherited value with the
    /// runtime directory appended.
    pub fn python_path(&self) -> Result<OsString> {
        let mut entries: Vec<PathBuf> = std::env::var_os("PYTHONPATH")
            .map(|existing| std::env::split_paths(&existing).collect())
            .unwrap_or_default();
        if !entries.iter().any(|p| p == &self.runtime_dir) {
            entries.push(self.runtime_dir.clone());
        }
        std::env::join_paths(entries).with_context(|| {
            format!(
                "runtime dir {} cannot be added to PYTHONPATH",
                self.runtime_dir.display()
            )
        })
    }
}
