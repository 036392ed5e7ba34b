use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Strip the final extension from `input`, keeping its directory.
///
/// `model.onnx` becomes `model`, `dir/a.b.onnx` becomes `dir/a.b`. A path
/// without an extension is returned unchanged. Leading dots of the file name
/// never start an extension, so `.hidden` and `..onnx` stay as they are.
pub fn base_path(input: &Path) -> PathBuf {
    let has_extension = input.file_name().is_some_and(|name| {
        name.to_string_lossy()
            .trim_start_matches('.')
            .contains('.')
    });
    if !has_extension || input.extension().is_none() {
        return input.to_path_buf();
    }
    input.with_extension("")
}

/// Name an artifact as `<base>.<ext>`.
///
/// The extension is appended rather than substituted, so a base that still
/// contains a dot (`a.tar`) keeps it.
pub fn artifact_path(base: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}
