use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use tracing::{info, warn};

use crate::config::{DriverConfig, FailurePolicy};
use crate::error::PipelineError;
use crate::executor::{CommandRunner, ExecuteError, Invocation, SystemRunner, execute};
use crate::paths::{artifact_path, base_path};

/// Extension of the bitcode file written by onnf.
pub const BITCODE_EXT: &str = "bc";
pub const OBJECT_EXT: &str = "o";
pub const SHARED_LIB_EXT: &str = "so";
/// Runtime library every model is linked against.
pub const RUNTIME_LIB: &str = "cruntime";

/// The three build steps, in the only order they may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Compile,
    CodeGen,
    Link,
}

impl StepKind {
    /// State the pipeline is in once this step has run.
    pub fn reached_state(self) -> &'static str {
        match self {
            StepKind::Compile => "Compiled",
            StepKind::CodeGen => "CodeGenerated",
            StepKind::Link => "Linked",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepKind::Compile => "compile",
            StepKind::CodeGen => "codegen",
            StepKind::Link => "link",
        };
        f.write_str(name)
    }
}

/// A step descriptor: which tool to run, how, and what it should produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub kind: StepKind,
    pub invocation: Invocation,
    pub output: PathBuf,
}

/// Build the ordered step list for `input`.
pub fn plan(config: &DriverConfig, input: &Path) -> Vec<Step> {
    let base = base_path(input);
    let bitcode = artifact_path(&base, BITCODE_EXT);
    let object = artifact_path(&base, OBJECT_EXT);
    let shared_lib = artifact_path(&base, SHARED_LIB_EXT);

    let mut search_path = std::ffi::OsString::from("-L");
    search_path.push(config.runtime_dir.as_os_str());

    vec![
        Step {
            kind: StepKind::Compile,
            invocation: Invocation::new(&config.onnf).arg(input),
            output: bitcode.clone(),
        },
        Step {
            kind: StepKind::CodeGen,
            invocation: Invocation::new(&config.llc)
                .arg("-filetype=obj")
                .arg("-relocation-model=pic")
                .arg(&bitcode),
            output: object.clone(),
        },
        Step {
            kind: StepKind::Link,
            invocation: Invocation::new(&config.cxx)
                .arg("-shared")
                .arg("-fPIC")
                .arg(&object)
                .arg("-o")
                .arg(&shared_lib)
                .arg(search_path)
                .arg(format!("-l{RUNTIME_LIB}")),
            output: shared_lib,
        },
    ]
}

/// How one step ended.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub kind: StepKind,
    pub tool: PathBuf,
    pub output: PathBuf,
    pub status: ExitStatus,
}

/// Result of a pipeline run that got through every step it attempted.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub steps: Vec<StepOutcome>,
    pub shared_library: PathBuf,
}

impl BuildReport {
    /// True when every step exited zero.
    pub fn succeeded(&self) -> bool {
        self.steps.iter().all(|s| s.status.success())
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|s| !s.status.success())
    }
}

/// Runs compile, codegen and link for one model file.
pub struct Pipeline<R: CommandRunner = SystemRunner> {
    config: DriverConfig,
    runner: R,
}

impl Pipeline<SystemRunner> {
    pub fn new(config: DriverConfig) -> Self {
        Self::with_runner(config, SystemRunner)
    }
}

impl<R: CommandRunner> Pipeline<R> {
    pub fn with_runner(config: DriverConfig, runner: R) -> Self {
        Self { config, runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run the pipeline, echoing command lines to stdout when configured.
    pub fn run(&self, input: &Path) -> Result<BuildReport, PipelineError> {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        self.run_with_echo(input, &mut lock)
    }

    /// Run the pipeline with command lines echoed to `echo`.
    pub fn run_with_echo<W: Write + ?Sized>(
        &self,
        input: &Path,
        echo: &mut W,
    ) -> Result<BuildReport, PipelineError> {
        let python_path = match self.config.python_path() {
            Ok(pp) => Some(pp),
            Err(e) => {
                warn!(err = %e, "leaving PYTHONPATH untouched");
                None
            }
        };
        let steps = plan(&self.config, input);
        let shared_library = artifact_path(&base_path(input), SHARED_LIB_EXT);

        info!(
            input = %input.display(),
            policy = ?self.config.failure_policy,
            "starting build pipeline"
        );

        let mut outcomes = Vec::with_capacity(steps.len());
        for step in steps {
            let mut invocation = step.invocation;
            if let Some(pp) = &python_path {
                invocation = invocation.env("PYTHONPATH", pp);
            }
            let tool = invocation.program.clone();

            let sink = if self.config.echo_commands {
                Some(&mut *echo)
            } else {
                None
            };
            let output = execute(&self.runner, &invocation, sink).map_err(|e| match e {
                ExecuteError::Echo(source) => PipelineError::Echo {
                    step: step.kind,
                    source,
                },
                ExecuteError::Spawn(source) => PipelineError::Spawn {
                    step: step.kind,
                    tool: tool.clone(),
                    source,
                },
            })?;

            if output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    warn!(
                        step = %step.kind,
                        tool = %tool.display(),
                        stderr = %stderr.trim(),
                        "tool reported diagnostics"
                    );
                }
                info!(
                    step = %step.kind,
                    state = step.kind.reached_state(),
                    output = %step.output.display(),
                    "step completed"
                );
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                match self.config.failure_policy {
                    FailurePolicy::Abort => {
                        warn!(
                            step = %step.kind,
                            tool = %tool.display(),
                            status = %output.status,
                            "step failed; aborting pipeline"
                        );
                        return Err(PipelineError::StepFailed {
                            step: step.kind,
                            tool,
                            status: output.status,
                            stderr,
                        });
                    }
                    FailurePolicy::Continue => {
                        warn!(
                            step = %step.kind,
                            tool = %tool.display(),
                            status = %output.status,
                            stderr = %stderr.trim(),
                            "step failed; continuing with next step"
                        );
                    }
                }
            }

            outcomes.push(StepOutcome {
                kind: step.kind,
                tool,
                output: step.output,
                status: output.status,
            });
        }

        let report = BuildReport {
            steps: outcomes,
            shared_library,
        };
        info!(
            shared_library = %report.shared_library.display(),
            succeeded = report.succeeded(),
            "build pipeline finished"
        );
        Ok(report)
    }
}
