/// onnf-run library crate.
///
/// Exposes the build pipeline modules so that integration tests in tests/
/// can drive them via `onnf_run::`.
///
/// The binary entry point (src/main.rs) uses these same modules.
pub mod config;
pub mod error;
pub mod executor;
pub mod paths;
pub mod pipeline;
