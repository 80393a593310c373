use std::path::{Path, PathBuf};

use crate::error::{CommandError, CommandResult, ErrorCode};

#[cfg(windows)]
pub const EXECUTABLE_EXTENSIONS: &[&str] = &["exe"];
#[cfg(not(windows))]
pub const EXECUTABLE_EXTENSIONS: &[&str] = &["exe", "sh", "appimage", "x86_64"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchPolicy {
    pub allow_network_paths: bool,
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn starts_with_double_separator(path: &str) -> bool {
    let mut chars = path.chars();
    matches!((chars.next(), chars.next()), (Some(a), Some(b)) if is_separator(a) && is_separator(b))
}

fn is_windows_style(path: &str) -> bool {
    has_drive_prefix(path) || starts_with_double_separator(path) || path.contains('\\')
}

/// Resolves `.` and `..` segments. `floor` components can never be popped.
fn collapse<'a>(parts: impl Iterator<Item = &'a str>, rooted: bool, floor: usize) -> Vec<&'a str> {
    let mut out: Vec<&str> = Vec::new();
    for part in parts {
        match part {
            "" | "." => {}
            ".." => {
                if out.len() > floor && out.last() != Some(&"..") {
                    out.pop();
                } else if !rooted {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn normalize_windows(path: &str) -> String {
    let unified = path.replace('/', "\\");
    if starts_with_double_separator(&unified) {
        let rest = unified.trim_start_matches('\\');
        let parts = collapse(rest.split('\\'), true, 2);
        return format!("\\\\{}", parts.join("\\"));
    }
    if has_drive_prefix(&unified) {
        let (drive, rest) = unified.split_at(2);
        let rooted = rest.starts_with('\\');
        let body = collapse(rest.split('\\'), rooted, 0).join("\\");
        return if rooted {
            format!("{drive}\\{body}")
        } else {
            format!("{drive}{body}")
        };
    }
    let rooted = unified.starts_with('\\');
    let body = collapse(unified.split('\\'), rooted, 0).join("\\");
    if rooted {
        format!("\\{body}")
    } else if body.is_empty() {
        ".".to_string()
    } else {
        body
    }
}

fn normalize_posix(path: &str) -> String {
    let rooted = path.starts_with('/');
    let body = collapse(path.split('/'), rooted, 0).join("/");
    if rooted {
        format!("/{body}")
    } else if body.is_empty() {
        ".".to_string()
    } else {
        body
    }
}

/// Trims and lexically normalizes a path. Drive letters, UNC shares and
/// backslashes are understood on every host. Blank input stays blank.
pub fn normalize_path(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if is_windows_style(trimmed) {
        normalize_windows(trimmed)
    } else {
        normalize_posix(trimmed)
    }
}

pub fn is_absolute(path: &str) -> bool {
    (has_drive_prefix(path) && path[2..].starts_with('\\'))
        || path.starts_with('\\')
        || path.starts_with('/')
}

pub fn is_network_path(path: &str) -> bool {
    starts_with_double_separator(path)
}

pub fn file_name(path: &str) -> &str {
    path.rsplit(is_separator).next().unwrap_or(path)
}

pub fn has_executable_extension(path: &str) -> bool {
    match file_name(path).rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => EXECUTABLE_EXTENSIONS
            .iter()
            .any(|candidate| ext.eq_ignore_ascii_case(candidate)),
        _ => false,
    }
}

/// Containing directory of a normalized path, keeping roots intact.
pub fn parent_dir(path: &str) -> Option<String> {
    let idx = path.rfind(is_separator)?;
    let parent = &path[..idx];
    if parent.is_empty() {
        return Some(path[..1].to_string());
    }
    if parent.len() == 2 && has_drive_prefix(parent) {
        return Some(format!("{parent}\\"));
    }
    Some(parent.to_string())
}

pub fn same_path(a: &str, b: &str) -> bool {
    normalize_path(a).to_lowercase() == normalize_path(b).to_lowercase()
}

pub fn is_valid_executable_path(raw: &str, policy: LaunchPolicy) -> bool {
    let path = normalize_path(raw);
    if path.is_empty() || !is_absolute(&path) {
        return false;
    }
    if !has_executable_extension(&path) {
        return false;
    }
    if !policy.allow_network_paths && is_network_path(&path) {
        return false;
    }
    true
}

/// Validates a launch target and confirms it exists right now.
///
/// The existence check and the later spawn are not atomic.
pub fn check_launch_target(raw: &str, policy: LaunchPolicy) -> CommandResult<PathBuf> {
    let path = normalize_path(raw);
    if !is_valid_executable_path(&path, policy) {
        return Err(CommandError::new(ErrorCode::BlockedPath)
            .with_context("validate")
            .with_details(&path));
    }
    let target = PathBuf::from(&path);
    if !target.is_file() {
        return Err(CommandError::new(ErrorCode::ExeNotFound)
            .with_context("validate")
            .with_details(&path));
    }
    Ok(target)
}

pub fn is_allowed_launch_target(raw: &str, policy: LaunchPolicy) -> bool {
    check_launch_target(raw, policy).is_ok()
}

/// Picks the configured working directory when usable, otherwise the
/// executable's own directory.
pub fn resolve_working_dir(working_dir: &str, executable: &str) -> CommandResult<PathBuf> {
    let requested = normalize_path(working_dir);
    if !requested.is_empty() && is_absolute(&requested) && Path::new(&requested).is_dir() {
        return Ok(PathBuf::from(requested));
    }
    let fallback = parent_dir(&normalize_path(executable))
        .ok_or_else(|| CommandError::new(ErrorCode::WorkingDirNotFound).with_details(executable))?;
    if Path::new(&fallback).is_dir() {
        Ok(PathBuf::from(fallback))
    } else {
        Err(CommandError::new(ErrorCode::WorkingDirNotFound).with_details(fallback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const DEFAULT: LaunchPolicy = LaunchPolicy {
        allow_network_paths: false,
    };

    #[test]
    fn accepts_local_absolute_executable() {
        assert!(is_valid_executable_path(r"C:\Games\App.exe", DEFAULT));
        assert!(is_valid_executable_path(r"c:/games/app.EXE", DEFAULT));
    }

    #[test]
    fn rejects_network_share_unless_allowed() {
        assert!(!is_valid_executable_path(r"\\server\share\game.exe", DEFAULT));
        assert!(!is_valid_executable_path("//server/share/game.exe", DEFAULT));
        let permissive = LaunchPolicy {
            allow_network_paths: true,
        };
        assert!(is_valid_executable_path(r"\\server\share\game.exe", permissive));
    }

    #[test]
    fn rejects_relative_paths_regardless_of_extension() {
        assert!(!is_valid_executable_path(r"Games\App.exe", DEFAULT));
        assert!(!is_valid_executable_path("./app.exe", DEFAULT));
        assert!(!is_valid_executable_path("app.exe", DEFAULT));
        assert!(!is_valid_executable_path(r"C:App.exe", DEFAULT));
    }

    #[test]
    fn rejects_wrong_extension_and_blank() {
        assert!(!is_valid_executable_path(r"C:\Games\readme.txt", DEFAULT));
        assert!(!is_valid_executable_path(r"C:\Games\.exe", DEFAULT));
        assert!(!is_valid_executable_path("   ", DEFAULT));
    }

    #[test]
    fn normalizes_windows_paths() {
        assert_eq!(normalize_path(r" C:/Games/../Games/./App.exe "), r"C:\Games\App.exe");
        assert_eq!(normalize_path(r"C:\..\App.exe"), r"C:\App.exe");
        assert_eq!(normalize_path(r"\\server\share\..\..\x.exe"), r"\\server\share\x.exe");
        assert_eq!(normalize_path(r"a\..\..\b"), r"..\b");
    }

    #[test]
    fn normalizes_posix_paths() {
        assert_eq!(normalize_path("/opt/games//x/../run.sh"), "/opt/games/run.sh");
        assert_eq!(normalize_path("a/.."), ".");
        assert_eq!(normalize_path(""), "");
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in [
            r"C:/Games/../Games/./App.exe",
            r"\\server\\share\\x",
            "//a//b/../c",
            r"C:",
            r"\",
            "../../x",
            "/",
            ".",
        ] {
            let once = normalize_path(raw);
            assert_eq!(normalize_path(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn parent_dir_keeps_roots() {
        assert_eq!(parent_dir(r"C:\App.exe").as_deref(), Some(r"C:\"));
        assert_eq!(parent_dir(r"C:\Games\App.exe").as_deref(), Some(r"C:\Games"));
        assert_eq!(parent_dir("/run.sh").as_deref(), Some("/"));
        assert_eq!(parent_dir("run.sh"), None);
    }

    #[test]
    fn same_path_ignores_case_and_separators() {
        assert!(same_path(r"C:\Games\App.exe", "c:/games/app.exe"));
        assert!(!same_path(r"C:\Games\App.exe", r"C:\Games\Other.exe"));
    }

    #[test]
    fn launch_target_must_exist() {
        let dir = tempdir().unwrap();
        let exe = dir.path().join("game.exe");
        let missing = dir.path().join("missing.exe");
        fs::write(&exe, b"bin").unwrap();

        assert!(is_allowed_launch_target(exe.to_str().unwrap(), DEFAULT));
        let err = check_launch_target(missing.to_str().unwrap(), DEFAULT).unwrap_err();
        assert_eq!(err.code, ErrorCode::ExeNotFound);
        let err = check_launch_target("game.exe", DEFAULT).unwrap_err();
        assert_eq!(err.code, ErrorCode::BlockedPath);
    }

    #[test]
    fn working_dir_falls_back_to_executable_parent() {
        let dir = tempdir().unwrap();
        let exe = dir.path().join("game.exe");
        fs::write(&exe, b"bin").unwrap();
        let exe = exe.to_str().unwrap();
        let parent = normalize_path(dir.path().to_str().unwrap());

        let resolved = resolve_working_dir("", exe).unwrap();
        assert_eq!(resolved, PathBuf::from(&parent));
        let resolved = resolve_working_dir("relative/dir", exe).unwrap();
        assert_eq!(resolved, PathBuf::from(&parent));
        let resolved = resolve_working_dir("/definitely/not/here", exe).unwrap();
        assert_eq!(resolved, PathBuf::from(&parent));

        let custom = dir.path().join("data");
        fs::create_dir(&custom).unwrap();
        let resolved = resolve_working_dir(custom.to_str().unwrap(), exe).unwrap();
        assert_eq!(resolved, PathBuf::from(normalize_path(custom.to_str().unwrap())));
    }
}
