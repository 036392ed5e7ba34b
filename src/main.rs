use std::path::PathBuf;

use onnf_run::config::{DriverConfig, FailurePolicy};
use onnf_run::pipeline::{self, Pipeline};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "onnf-run",
    about = "Compile an ONNX model into a shared library with onnf, llc and the system linker",
    version
)]
struct Args {
    /// Path to the model file to compile
    model: PathBuf,
    /// C++ compiler driver used to link the shared library
    #[arg(long, env = "ONNF_CXX_PATH", default_value = "c++")]
    cxx: PathBuf,
    /// onnf build directory (containing bin/onnf and lib/)
    #[arg(long, env = "ONNF_BUILD_PATH", value_name = "DIR")]
    onnf_build: PathBuf,
    /// llvm-project build directory (containing bin/llc)
    #[arg(long, env = "LLVM_PROJ_BUILD_PATH", value_name = "DIR")]
    llvm_build: PathBuf,
    /// Do not echo tool command lines before running them
    #[arg(short, long, default_value_t = false)]
    quiet: bool,
    /// Ignore tool exit codes and run every step anyway
    #[arg(long, default_value_t = false)]
    keep_going: bool,
    /// Print planned commands without executing
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let policy = if args.keep_going {
        FailurePolicy::Continue
    } else {
        FailurePolicy::Abort
    };
    let config = DriverConfig::from_build_dirs(&args.cxx, &args.onnf_build, &args.llvm_build)
        .with_echo(!args.quiet)
        .with_failure_policy(policy);

    info!(
        model = %args.model.display(),
        onnf = %config.onnf.display(),
        llc = %config.llc.display(),
        cxx = %config.cxx.display(),
        runtime_dir = %config.runtime_dir.display(),
        dry_run = args.dry_run,
        "resolved driver configuration"
    );

    if args.dry_run {
        for step in pipeline::plan(&config, &args.model) {
            println!("{}", step.invocation.command_line());
        }
        info!("dry-run completed; no tools executed");
        return Ok(());
    }

    let report = Pipeline::new(config)
        .run(&args.model)
        .with_context(|| format!("failed to build {}", args.model.display()))?;

    if !report.succeeded() {
        for failed in report.failed_steps() {
            warn!(
                step = %failed.kind,
                tool = %failed.tool.display(),
                status = %failed.status,
                output = %failed.output.display(),
                "step reported failure; output may be stale or missing"
            );
        }
        bail!(
            "{} may be stale or missing: {} step(s) failed",
            report.shared_library.display(),
            report.failed_steps().count()
        );
    }

    info!(
        shared_library = %report.shared_library.display(),
        "model compiled"
    );
    Ok(())
}
