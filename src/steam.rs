//! Steam library detection. Produces import candidates only; they reach the
//! library through the same sanitizer as any other import.

use std::{
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
};

use directories::BaseDirs;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::paths::{has_executable_extension, normalize_path, parent_dir};
use crate::schema::FALLBACK_CATEGORY;

const NESTED_DIR_LIMIT: usize = 10;

static LIBRARY_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""path"\s+"([^"]+)""#).expect("library path pattern"));
static MANIFEST_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^appmanifest_(\d+)\.acf$").expect("manifest name pattern"));
static HELPER_EXECUTABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)unins|crash|setup|launcherinstaller|redist").expect("helper pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SteamCandidate {
    pub name: String,
    pub path: String,
    pub working_dir: String,
    pub category: String,
    pub steam_app_id: Option<u64>,
}

/// Steam installation roots that exist on this machine.
pub fn steam_roots() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    for var in ["ProgramFiles(x86)", "ProgramFiles"] {
        if let Ok(base) = env::var(var) {
            candidates.push(PathBuf::from(base).join("Steam"));
        }
    }
    if let Ok(local) = env::var("LOCALAPPDATA") {
        candidates.push(PathBuf::from(local).join("Programs").join("Steam"));
    }
    if let Some(base) = BaseDirs::new() {
        let home = base.home_dir();
        candidates.push(home.join(".steam/steam"));
        candidates.push(home.join(".local/share/Steam"));
    }

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|path| path.is_dir())
        .filter(|path| seen.insert(fs::canonicalize(path).unwrap_or_else(|_| path.clone())))
        .collect()
}

/// Extra library folders listed in `libraryfolders.vdf`.
pub fn parse_library_folders(content: &str) -> Vec<PathBuf> {
    LIBRARY_PATH
        .captures_iter(content)
        .map(|caps| PathBuf::from(caps[1].replace(r"\\", r"\")))
        .collect()
}

pub fn manifest_value(content: &str, key: &str) -> Option<String> {
    let pattern = Regex::new(&format!(r#""{}"\s+"([^"]+)""#, regex::escape(key))).ok()?;
    pattern
        .captures(content)
        .map(|caps| caps[1].to_string())
}

fn executables_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            has_executable_extension(name) && !HELPER_EXECUTABLE.is_match(name)
        })
        .collect();
    found.sort();
    found
}

/// Best guess at a game's main executable: top level first, then one level
/// of subdirectories.
pub fn find_likely_executable(game_dir: &Path) -> Option<PathBuf> {
    if let Some(direct) = executables_in(game_dir).into_iter().next() {
        return Some(direct);
    }
    let mut dirs: Vec<PathBuf> = fs::read_dir(game_dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    dirs.into_iter()
        .take(NESTED_DIR_LIMIT)
        .find_map(|dir| executables_in(&dir).into_iter().next())
}

/// Scans every library under `roots`, skipping executables whose normalized,
/// lower-cased path is already in `known_paths`.
pub fn detect_games(roots: &[PathBuf], known_paths: &HashSet<String>) -> Vec<SteamCandidate> {
    let mut seen = known_paths.clone();
    let mut found = Vec::new();

    for root in roots {
        let mut libraries = vec![root.clone()];
        let vdf = root.join("steamapps").join("libraryfolders.vdf");
        if let Ok(content) = fs::read_to_string(&vdf) {
            libraries.extend(parse_library_folders(&content));
        }
        libraries.dedup();

        for library in libraries {
            let steamapps = library.join("steamapps");
            let Ok(entries) = fs::read_dir(&steamapps) else {
                continue;
            };
            let mut manifests: Vec<(PathBuf, Option<u64>)> = entries
                .flatten()
                .filter_map(|entry| {
                    let name = entry.file_name().to_string_lossy().to_string();
                    let caps = MANIFEST_NAME.captures(&name)?;
                    Some((entry.path(), caps[1].parse().ok()))
                })
                .collect();
            manifests.sort();

            for (manifest, app_id) in manifests {
                let Ok(content) = fs::read_to_string(&manifest) else {
                    debug!("Skipping unreadable manifest {}", manifest.display());
                    continue;
                };
                let (Some(name), Some(install_dir)) =
                    (manifest_value(&content, "name"), manifest_value(&content, "installdir"))
                else {
                    continue;
                };
                let game_dir = steamapps.join("common").join(install_dir);
                let Some(exe) = find_likely_executable(&game_dir) else {
                    continue;
                };
                let path = normalize_path(&exe.to_string_lossy());
                if !seen.insert(path.to_lowercase()) {
                    continue;
                }
                found.push(SteamCandidate {
                    name,
                    working_dir: parent_dir(&path).unwrap_or_default(),
                    path,
                    category: FALLBACK_CATEGORY.to_string(),
                    steam_app_id: app_id,
                });
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_library_folders() {
        let vdf = r#"
"libraryfolders"
{
    "0" { "path"    "C:\\Program Files (x86)\\Steam" }
    "1" { "path"    "D:\\SteamLibrary" }
}"#;
        assert_eq!(
            parse_library_folders(vdf),
            vec![
                PathBuf::from(r"C:\Program Files (x86)\Steam"),
                PathBuf::from(r"D:\SteamLibrary"),
            ]
        );
    }

    #[test]
    fn reads_manifest_values() {
        let acf = r#""AppState" { "appid" "570" "name" "Dota 2" "installdir" "dota 2 beta" }"#;
        assert_eq!(manifest_value(acf, "name").as_deref(), Some("Dota 2"));
        assert_eq!(manifest_value(acf, "installdir").as_deref(), Some("dota 2 beta"));
        assert_eq!(manifest_value(acf, "missing"), None);
    }

    #[test]
    fn detects_games_and_skips_known_paths() {
        let root = tempdir().unwrap();
        let steamapps = root.path().join("steamapps");
        let common = steamapps.join("common");
        for (id, name, dir, exe) in [
            (10, "Alpha", "alpha", "alpha.exe"),
            (20, "Beta", "beta", "beta.exe"),
        ] {
            fs::create_dir_all(common.join(dir).join("bin")).unwrap();
            fs::write(common.join(dir).join("unins000.exe"), b"x").unwrap();
            fs::write(common.join(dir).join("bin").join(exe), b"x").unwrap();
            fs::write(
                steamapps.join(format!("appmanifest_{id}.acf")),
                format!(r#""AppState" {{ "name" "{name}" "installdir" "{dir}" }}"#),
            )
            .unwrap();
        }

        let beta = normalize_path(&common.join("beta").join("bin").join("beta.exe").to_string_lossy());
        let known = HashSet::from([beta.to_lowercase()]);
        let found = detect_games(&[root.path().to_path_buf()], &known);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Alpha");
        assert_eq!(found[0].steam_app_id, Some(10));
        assert!(found[0].path.ends_with("alpha.exe"));
        assert_eq!(
            found[0].working_dir,
            normalize_path(&common.join("alpha").join("bin").to_string_lossy())
        );
    }
}
