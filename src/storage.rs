use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::schema::{sanitize_document_at, AppDocument};

pub const DATA_FILE_NAME: &str = "gamedock.json";

/// Durable home of the [`AppDocument`].
///
/// Every write goes to a sibling temp file first and is then renamed over the
/// real file, so the previous document stays intact until the new one is
/// complete on disk.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    path: PathBuf,
}

/// What [`DocumentStore::load_checked`] found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Missing,
    Loaded,
    Quarantined,
    /// The file exists but could not be read or moved aside.
    Unreadable,
}

impl LoadOutcome {
    pub fn may_overwrite(self) -> bool {
        self != LoadOutcome::Unreadable
    }
}

/// A fully written temp file that has not replaced its target yet.
#[derive(Debug)]
pub struct StagedWrite {
    temp: PathBuf,
    target: PathBuf,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        &self.temp
    }
}

impl DocumentStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        Ok(Self {
            path: data_dir.join(DATA_FILE_NAME),
        })
    }

    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads and sanitizes the document. Never fails: absent or empty files
    /// give defaults, unparsable ones are quarantined first.
    pub fn load(&self) -> AppDocument {
        self.load_at(SystemClock.now_ms())
    }

    pub fn load_at(&self, now_ms: i64) -> AppDocument {
        self.load_checked(now_ms).0
    }

    /// Like [`DocumentStore::load_at`], but also reports whether the file on
    /// disk may be replaced by the returned document.
    pub fn load_checked(&self, now_ms: i64) -> (AppDocument, LoadOutcome) {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return (AppDocument::default(), LoadOutcome::Missing);
            }
            Err(err) => {
                error!(
                    "Failed to read {}: {err}; using defaults and leaving the file alone",
                    self.path.display()
                );
                return (AppDocument::default(), LoadOutcome::Unreadable);
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return (AppDocument::default(), LoadOutcome::Missing);
        }

        let reason = match serde_json::from_slice::<Value>(&bytes) {
            Ok(raw) if raw.is_object() => {
                return (sanitize_document_at(&raw, now_ms), LoadOutcome::Loaded);
            }
            Ok(_) => "top-level value is not an object".to_string(),
            Err(err) => err.to_string(),
        };
        let outcome = if self.quarantine(&reason) {
            LoadOutcome::Quarantined
        } else {
            LoadOutcome::Unreadable
        };
        (AppDocument::default(), outcome)
    }

    fn quarantine(&self, reason: &str) -> bool {
        let stamp = Local::now().format("%Y%m%d-%H%M%S%3f");
        let backup = self.path.with_file_name(format!("{DATA_FILE_NAME}.corrupt-{stamp}"));
        match fs::rename(&self.path, &backup) {
            Ok(()) => {
                warn!(
                    "Corrupt store file ({reason}); moved to {} and continuing with defaults",
                    backup.display()
                );
                true
            }
            Err(err) => {
                error!(
                    "Corrupt store file ({reason}) could not be quarantined to {}: {err}",
                    backup.display()
                );
                false
            }
        }
    }

    /// Sanitizes and persists. Failures are logged and reported as `false`;
    /// the existing file is left untouched.
    pub fn save(&self, document: &AppDocument) -> bool {
        match self.try_save(document) {
            Ok(()) => true,
            Err(err) => {
                error!("Failed to save {}: {err:#}", self.path.display());
                false
            }
        }
    }

    pub fn try_save(&self, document: &AppDocument) -> Result<()> {
        let staged = self.stage(document)?;
        commit(staged)
    }

    /// First half of a save: writes the sanitized document to a temp file.
    pub fn stage(&self, document: &AppDocument) -> Result<StagedWrite> {
        let safe = document.resanitized(SystemClock.now_ms());
        let payload = serde_json::to_vec_pretty(&safe).context("Failed to serialize document")?;
        stage_bytes(&self.path, &payload)
    }

    /// Writes a pretty-printed, sanitized copy of the document to `target`.
    pub fn export_to(&self, document: &AppDocument, target: &Path) -> Result<()> {
        let safe = document.resanitized(SystemClock.now_ms());
        let payload = serde_json::to_vec_pretty(&safe).context("Failed to serialize document")?;
        commit(stage_bytes(target, &payload)?)
    }

    /// Reads and sanitizes a backup file. Unlike [`DocumentStore::load`], a
    /// parse failure is an error.
    pub fn import_from(&self, source: &Path) -> Result<AppDocument> {
        let raw = fs::read_to_string(source)
            .with_context(|| format!("Failed to read {}", source.display()))?;
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", source.display()))?;
        if !value.is_object() {
            anyhow::bail!("{} does not contain a library document", source.display());
        }
        Ok(sanitize_document_at(&value, SystemClock.now_ms()))
    }
}

fn stage_bytes(target: &Path, payload: &[u8]) -> Result<StagedWrite> {
    let file_name = target
        .file_name()
        .and_then(|name| name.to_str())
        .context("Target path has no file name")?;
    let temp = target.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

    let written = (|| -> io::Result<()> {
        let mut file = fs::File::create(&temp)?;
        file.write_all(payload)?;
        file.sync_all()
    })();
    if let Err(err) = written {
        let _ = fs::remove_file(&temp);
        return Err(err).with_context(|| format!("Failed to write {}", temp.display()));
    }
    Ok(StagedWrite {
        temp,
        target: target.to_path_buf(),
    })
}

/// Second half of a save: replaces the target with the staged file, falling
/// back to copy-then-delete where rename cannot replace.
pub fn commit(staged: StagedWrite) -> Result<()> {
    if fs::rename(&staged.temp, &staged.target).is_ok() {
        return Ok(());
    }
    let copied = fs::copy(&staged.temp, &staged.target);
    let _ = fs::remove_file(&staged.temp);
    copied
        .map(|_| ())
        .with_context(|| format!("Failed to replace {}", staged.target.display()))
}

pub fn default_export_file_name(date: NaiveDate) -> String {
    format!("gamedock-backup-{}.json", date.format("%Y-%m-%d"))
}

/// Removes temp files a crash left behind next to the store file.
pub fn sweep_stale_temp_files(store: &DocumentStore) {
    let Some(dir) = store.path().parent() else {
        return;
    };
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let prefix = format!(".{DATA_FILE_NAME}.");
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&prefix) && name.ends_with(".tmp") {
            match fs::remove_file(entry.path()) {
                Ok(()) => info!("Removed stale temp file {name}"),
                Err(err) => warn!("Failed to remove stale temp file {name}: {err}"),
            }
        }
    }
}
