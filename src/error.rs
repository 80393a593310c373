use std::{collections::BTreeMap, io};

use serde::Serialize;

/// Classified failure kinds surfaced across the process boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "ERR_EXE_NOT_FOUND")]
    ExeNotFound,
    #[serde(rename = "ERR_PERMISSION_DENIED")]
    PermissionDenied,
    #[serde(rename = "ERR_BLOCKED_PATH")]
    BlockedPath,
    #[serde(rename = "ERR_WORKING_DIR_NOT_FOUND")]
    WorkingDirNotFound,
    #[serde(rename = "ERR_GAME_NOT_FOUND")]
    GameNotFound,
    #[serde(rename = "ERR_INVALID_LAUNCH")]
    InvalidLaunch,
    #[serde(rename = "ERR_PATH_MISMATCH")]
    PathMismatch,
    #[serde(rename = "ERR_EXPORT_FAIL")]
    ExportFail,
    #[serde(rename = "ERR_IMPORT_FAIL")]
    ImportFail,
    #[serde(rename = "ERR_RAWG_API_FAIL")]
    CatalogUnavailable,
    #[serde(rename = "ERR_NEWS_API_FAIL")]
    NewsUnavailable,
    #[serde(rename = "ERR_STEAM_DETECT_FAIL")]
    SteamDetectFail,
    #[serde(rename = "ERR_STEAMGRIDDB_FAIL")]
    ArtworkLookupFail,
    #[serde(rename = "ERR_IMAGE_DOWNLOAD_FAIL")]
    ImageDownloadFail,
    #[serde(rename = "ERR_IMAGE_INVALID")]
    ImageInvalid,
    #[serde(rename = "ERR_UNKNOWN")]
    Unknown,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 16] = [
        ErrorCode::ExeNotFound,
        ErrorCode::PermissionDenied,
        ErrorCode::BlockedPath,
        ErrorCode::WorkingDirNotFound,
        ErrorCode::GameNotFound,
        ErrorCode::InvalidLaunch,
        ErrorCode::PathMismatch,
        ErrorCode::ExportFail,
        ErrorCode::ImportFail,
        ErrorCode::CatalogUnavailable,
        ErrorCode::NewsUnavailable,
        ErrorCode::SteamDetectFail,
        ErrorCode::ArtworkLookupFail,
        ErrorCode::ImageDownloadFail,
        ErrorCode::ImageInvalid,
        ErrorCode::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ExeNotFound => "ERR_EXE_NOT_FOUND",
            ErrorCode::PermissionDenied => "ERR_PERMISSION_DENIED",
            ErrorCode::BlockedPath => "ERR_BLOCKED_PATH",
            ErrorCode::WorkingDirNotFound => "ERR_WORKING_DIR_NOT_FOUND",
            ErrorCode::GameNotFound => "ERR_GAME_NOT_FOUND",
            ErrorCode::InvalidLaunch => "ERR_INVALID_LAUNCH",
            ErrorCode::PathMismatch => "ERR_PATH_MISMATCH",
            ErrorCode::ExportFail => "ERR_EXPORT_FAIL",
            ErrorCode::ImportFail => "ERR_IMPORT_FAIL",
            ErrorCode::CatalogUnavailable => "ERR_RAWG_API_FAIL",
            ErrorCode::NewsUnavailable => "ERR_NEWS_API_FAIL",
            ErrorCode::SteamDetectFail => "ERR_STEAM_DETECT_FAIL",
            ErrorCode::ArtworkLookupFail => "ERR_STEAMGRIDDB_FAIL",
            ErrorCode::ImageDownloadFail => "ERR_IMAGE_DOWNLOAD_FAIL",
            ErrorCode::ImageInvalid => "ERR_IMAGE_INVALID",
            ErrorCode::Unknown => "ERR_UNKNOWN",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::ExeNotFound => "Game executable was not found.",
            ErrorCode::PermissionDenied => "Permission denied while starting the game.",
            ErrorCode::BlockedPath => "This path is blocked by the launch policy.",
            ErrorCode::WorkingDirNotFound => "Working directory does not exist.",
            ErrorCode::GameNotFound => "Game entry could not be found.",
            ErrorCode::InvalidLaunch => "Launch request is invalid.",
            ErrorCode::PathMismatch => "Launch blocked: path does not match the stored entry.",
            ErrorCode::ExportFail => "Backup export failed.",
            ErrorCode::ImportFail => "Backup import failed.",
            ErrorCode::CatalogUnavailable => "Discovery service is unavailable.",
            ErrorCode::NewsUnavailable => "News feed could not be loaded.",
            ErrorCode::SteamDetectFail => "Steam library scan failed.",
            ErrorCode::ArtworkLookupFail => "Artwork lookup failed.",
            ErrorCode::ImageDownloadFail => "Could not download the selected image.",
            ErrorCode::ImageInvalid => "Invalid image file.",
            ErrorCode::Unknown => "An unexpected error occurred.",
        }
    }

    pub fn troubleshooting(self) -> &'static str {
        match self {
            ErrorCode::ExeNotFound => "Edit the game and point it at an existing executable.",
            ErrorCode::PermissionDenied => {
                "Check the permissions of the game folder or run the launcher elevated."
            }
            ErrorCode::BlockedPath => "Use a local absolute executable path. Network shares are refused.",
            ErrorCode::WorkingDirNotFound => "Edit the game and choose an existing working directory.",
            ErrorCode::GameNotFound => "Refresh the library and try again.",
            ErrorCode::InvalidLaunch => "Remove and re-add the game if this keeps happening.",
            ErrorCode::PathMismatch => "Edit the game entry and confirm the executable path.",
            ErrorCode::ExportFail => "Check write permissions for the target folder.",
            ErrorCode::ImportFail => "Verify the file is a valid GameDock JSON backup.",
            ErrorCode::CatalogUnavailable => "Verify RAWG_API_KEY and your network connection.",
            ErrorCode::NewsUnavailable => "Verify NEWS_API_KEY and try again later.",
            ErrorCode::SteamDetectFail => "Make sure Steam is installed and its libraries are readable.",
            ErrorCode::ArtworkLookupFail => "Import can continue without artwork.",
            ErrorCode::ImageDownloadFail => "Confirm the URL is reachable and serves a PNG, JPG or WebP image.",
            ErrorCode::ImageInvalid => "Use a valid PNG, JPG or WebP image.",
            ErrorCode::Unknown => "Try again. Restart the launcher if this persists.",
        }
    }

    pub fn retryable(self) -> bool {
        !matches!(
            self,
            ErrorCode::ExeNotFound
                | ErrorCode::BlockedPath
                | ErrorCode::WorkingDirNotFound
                | ErrorCode::InvalidLaunch
                | ErrorCode::PathMismatch
                | ErrorCode::ImageInvalid
        )
    }
}

/// A structured, non-fatal failure returned by boundary operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[error("{message}")]
pub struct CommandError {
    pub code: ErrorCode,
    pub message: String,
    pub troubleshooting: String,
    pub retryable: bool,
    pub context: String,
    pub details: String,
}

pub type CommandResult<T> = Result<T, CommandError>;

impl CommandError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.message().to_string(),
            troubleshooting: code.troubleshooting().to_string(),
            retryable: code.retryable(),
            context: String::new(),
            details: String::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_details(mut self, details: impl ToString) -> Self {
        self.details = details.to_string();
        self
    }

    /// Maps an OS spawn failure onto the launch taxonomy.
    pub fn from_spawn(err: &io::Error) -> Self {
        let code = match err.kind() {
            io::ErrorKind::NotFound => ErrorCode::ExeNotFound,
            io::ErrorKind::PermissionDenied => ErrorCode::PermissionDenied,
            _ => ErrorCode::Unknown,
        };
        Self::new(code).with_context("spawn").with_details(err)
    }
}

impl From<ErrorCode> for CommandError {
    fn from(code: ErrorCode) -> Self {
        CommandError::new(code)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDefinition {
    pub message: &'static str,
    pub troubleshooting: &'static str,
    pub retryable: bool,
}

/// The full error table, keyed by wire code, for UI retry affordances.
pub fn error_map() -> BTreeMap<&'static str, ErrorDefinition> {
    ErrorCode::ALL
        .iter()
        .map(|code| {
            (
                code.as_str(),
                ErrorDefinition {
                    message: code.message(),
                    troubleshooting: code.troubleshooting(),
                    retryable: code.retryable(),
                },
            )
        })
        .collect()
}
