use crate::command::ExitCode;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

/// Extensions tried, in order, after the bare name.
pub const EXECUTABLE_EXTENSIONS: [&str; 4] = [".exe", ".bat", ".cmd", ".com"];

/// Resolve a command name to an executable file.
///
/// First match wins:
/// - the name as given, if it is an existing file (relative names are taken
///   relative to the process working directory);
/// - the name under `current_dir`;
/// - the name with each of [`EXECUTABLE_EXTENSIONS`], as given and under `current_dir`;
/// - each directory of `search_paths` (a `PATH`-style list), bare and with each extension.
///
/// An empty name never resolves.
pub fn resolve_executable(
    command: &str,
    current_dir: &Path,
    search_paths: Option<&str>,
) -> Option<PathBuf> {
    if command.is_empty() {
        return None;
    }
    let path = Path::new(command);

    if let Some(found) = find_by_path(path) {
        return Some(found.to_path_buf());
    }
    if path.is_relative() {
        if let Some(found) = find_by_path(current_dir.join(path)) {
            return Some(found);
        }
    }
    for ext in EXECUTABLE_EXTENSIONS {
        let with_ext = PathBuf::from(format!("{command}{ext}"));
        if let Some(found) = find_by_path(&with_ext) {
            return Some(found.to_path_buf());
        }
        if with_ext.is_relative() {
            if let Some(found) = find_by_path(current_dir.join(&with_ext)) {
                return Some(found);
            }
        }
    }
    search_paths.and_then(|paths| find_in_path(paths, command))
}

fn find_in_path(search_paths: &str, command: &str) -> Option<PathBuf> {
    for dir in std::env::split_paths(search_paths) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        if let Some(found) = find_by_path(dir.join(command)) {
            return Some(found);
        }
        for ext in EXECUTABLE_EXTENSIONS {
            if let Some(found) = find_by_path(dir.join(format!("{command}{ext}"))) {
                return Some(found);
            }
        }
    }
    None
}

fn find_by_path<P: AsRef<Path>>(path: P) -> Option<P> {
    if path.as_ref().is_file() { Some(path) } else { None }
}

/// Exit code of a finished child. A signal death reports `128 + signal`.
pub(crate) fn exit_code_of(status: ExitStatus) -> ExitCode {
    match status.code() {
        Some(code) => code,
        None => terminated_by_signal(status),
    }
}

#[cfg(unix)]
fn terminated_by_signal(exit_status: ExitStatus) -> ExitCode {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = ExitStatusExt::signal(&exit_status) {
        128 + signal
    } else if ExitStatusExt::core_dumped(&exit_status) {
        255
    } else {
        -1
    }
}

#[cfg(not(unix))]
fn terminated_by_signal(_exit_status: ExitStatus) -> ExitCode {
    -1
}
