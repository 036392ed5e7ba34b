//! Pipeline orchestration tests driven by a recording runner.
//!
//! No external tools are spawned: the runner records each invocation and
//! replies with a scripted exit code, so these check ordering, argument
//! lists, echo behavior and failure policy.
#![cfg(unix)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use onnf_run::config::{DriverConfig, FailurePolicy};
use onnf_run::error::PipelineError;
use onnf_run::executor::{CommandOutput, CommandRunner, Invocation};
use onnf_run::pipeline::{Pipeline, StepKind};

#[derive(Default)]
struct RecordingRunner {
    calls: RefCell<Vec<Invocation>>,
    exit_codes: HashMap<PathBuf, i32>,
    missing: Option<PathBuf>,
}

impl RecordingRunner {
    fn failing(tool: &str, code: i32) -> Self {
        let mut exit_codes = HashMap::new();
        exit_codes.insert(PathBuf::from(tool), code);
        Self {
            exit_codes,
            ..Self::default()
        }
    }

    fn tokens(&self) -> Vec<Vec<String>> {
        self.calls.borrow().iter().map(Invocation::tokens).collect()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        self.calls.borrow_mut().push(invocation.clone());
        if self.missing.as_deref() == Some(invocation.program.as_path()) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such tool"));
        }
        let code = self.exit_codes.get(&invocation.program).copied().unwrap_or(0);
        Ok(CommandOutput {
            status: ExitStatus::from_raw(code << 8),
            stdout: b"tool chatter".to_vec(),
            stderr: if code == 0 {
                Vec::new()
            } else {
                b"error: bad model".to_vec()
            },
        })
    }
}

const ONNF: &str = "/onnf/build/bin/onnf";
const LLC: &str = "/llvm/build/bin/llc";
const CXX: &str = "/usr/bin/c++";

fn config() -> DriverConfig {
    DriverConfig::from_build_dirs(
        Path::new(CXX),
        Path::new("/onnf/build"),
        Path::new("/llvm/build"),
    )
}

fn expected_tokens() -> Vec<Vec<String>> {
    [
        vec![ONNF, "model.onnx"],
        vec![LLC, "-filetype=obj", "-relocation-model=pic", "model.bc"],
        vec![
            CXX,
            "-shared",
            "-fPIC",
            "model.o",
            "-o",
            "model.so",
            "-L/onnf/build/lib",
            "-lcruntime",
        ],
    ]
    .into_iter()
    .map(|v| v.into_iter().map(String::from).collect())
    .collect()
}

// ── ordering and arguments ──────────────────────────────────────────────────

#[test]
fn issues_three_invocations_in_order() {
    let pipeline = Pipeline::with_runner(config(), RecordingRunner::default());
    let mut echo = Vec::new();
    let report = pipeline
        .run_with_echo(Path::new("model.onnx"), &mut echo)
        .expect("pipeline should succeed");

    assert_eq!(pipeline.runner().tokens(), expected_tokens());
    assert!(report.succeeded());
    assert_eq!(report.shared_library, PathBuf::from("model.so"));
    let kinds: Vec<StepKind> = report.steps.iter().map(|s| s.kind).collect();
    assert_eq!(kinds, [StepKind::Compile, StepKind::CodeGen, StepKind::Link]);
}

#[test]
fn children_see_runtime_dir_on_python_path() {
    let pipeline = Pipeline::with_runner(config(), RecordingRunner::default());
    pipeline
        .run_with_echo(Path::new("model.onnx"), &mut Vec::new())
        .unwrap();

    for call in pipeline.runner().calls.borrow().iter() {
        let (_, value) = call
            .envs
            .iter()
            .find(|(k, _)| k == "PYTHONPATH")
            .expect("PYTHONPATH set for child");
        assert!(std::env::split_paths(value).any(|p| p == Path::new("/onnf/build/lib")));
    }
}

// ── echo ────────────────────────────────────────────────────────────────────

#[test]
fn echo_on_prints_each_command_line() {
    let pipeline = Pipeline::with_runner(config(), RecordingRunner::default());
    let mut echo = Vec::new();
    pipeline
        .run_with_echo(Path::new("model.onnx"), &mut echo)
        .unwrap();

    let printed = String::from_utf8(echo).unwrap();
    let expected: Vec<String> = expected_tokens().iter().map(|t| t.join(" ")).collect();
    assert_eq!(printed.lines().collect::<Vec<_>>(), expected);
    assert!(
        !printed.contains("tool chatter"),
        "child stdout must not be forwarded"
    );
}

#[test]
fn echo_off_prints_nothing() {
    let pipeline = Pipeline::with_runner(config().with_echo(false), RecordingRunner::default());
    let mut echo = Vec::new();
    pipeline
        .run_with_echo(Path::new("model.onnx"), &mut echo)
        .unwrap();

    assert!(echo.is_empty());
    assert_eq!(pipeline.runner().calls.borrow().len(), 3);
}

// ── failure policy ──────────────────────────────────────────────────────────

#[test]
fn keep_going_still_runs_later_steps_after_compile_failure() {
    let pipeline = Pipeline::with_runner(
        config().with_failure_policy(FailurePolicy::Continue),
        RecordingRunner::failing(ONNF, 1),
    );
    let report = pipeline
        .run_with_echo(Path::new("model.onnx"), &mut Vec::new())
        .expect("continue policy never returns StepFailed");

    assert_eq!(pipeline.runner().tokens(), expected_tokens());
    assert!(!report.succeeded());
    let failed: Vec<StepKind> = report.failed_steps().map(|s| s.kind).collect();
    assert_eq!(failed, [StepKind::Compile]);
    let outputs: Vec<&Path> = report.steps.iter().map(|s| s.output.as_path()).collect();
    assert_eq!(
        outputs,
        [Path::new("model.bc"), Path::new("model.o"), Path::new("model.so")]
    );
}

#[test]
fn abort_stops_at_first_failure_and_names_the_tool() {
    let pipeline = Pipeline::with_runner(config(), RecordingRunner::failing(LLC, 2));
    let err = pipeline
        .run_with_echo(Path::new("model.onnx"), &mut Vec::new())
        .unwrap_err();

    assert_eq!(pipeline.runner().calls.borrow().len(), 2, "link must not run");
    match &err {
        PipelineError::StepFailed {
            step,
            tool,
            status,
            stderr,
        } => {
            assert_eq!(*step, StepKind::CodeGen);
            assert_eq!(tool, Path::new(LLC));
            assert_eq!(status.code(), Some(2));
            assert_eq!(stderr, "error: bad model");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let msg = err.to_string();
    assert!(msg.contains("codegen step failed"), "{msg}");
    assert!(msg.contains(LLC), "{msg}");
}

#[test]
fn missing_tool_ends_run_even_when_keeping_going() {
    let runner = RecordingRunner {
        missing: Some(PathBuf::from(ONNF)),
        ..RecordingRunner::default()
    };
    let pipeline = Pipeline::with_runner(
        config().with_failure_policy(FailurePolicy::Continue),
        runner,
    );
    let err = pipeline
        .run_with_echo(Path::new("model.onnx"), &mut Vec::new())
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Spawn {
            step: StepKind::Compile,
            ..
        }
    ));
    assert_eq!(pipeline.runner().calls.borrow().len(), 1);
}

struct ClosedPipe;

impl Write for ClosedPipe {
    fn write(&mut self, _: &[u8]) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn echo_write_failure_is_reported_as_echo_not_spawn() {
    let pipeline = Pipeline::with_runner(config(), RecordingRunner::default());
    let err = pipeline
        .run_with_echo(Path::new("model.onnx"), &mut ClosedPipe)
        .unwrap_err();

    assert!(
        matches!(
            err,
            PipelineError::Echo {
                step: StepKind::Compile,
                ..
            }
        ),
        "unexpected error: {err:?}"
    );
    assert!(pipeline.runner().calls.borrow().is_empty(), "no tool may run");
    let msg = err.to_string();
    assert!(msg.contains("could not echo"), "{msg}");
    assert!(!msg.contains("could not start"), "{msg}");
}
