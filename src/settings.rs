use std::env;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::journal::SessionJournal;
use crate::schema::{clamp_int, coerce_string, truthy};
use crate::startup;

pub const DEFAULT_ACCENT_COLOR: &str = "#8b5cf6";
pub const DEFAULT_OPACITY: u8 = 95;
const MIN_OPACITY: i64 = 30;
const MAX_OPACITY: i64 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    #[default]
    Dark,
    Light,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub auto_start: bool,
    pub minimize_to_tray: bool,
    pub always_on_top: bool,
    pub launch_notifications: bool,
    pub simplified_library_cards: bool,
    pub accent_color: String,
    pub theme_mode: ThemeMode,
    // Retired booster feature; kept so older readers find the keys, always inert.
    pub booster_enabled: bool,
    pub booster_targets: Vec<String>,
    pub booster_force_kill: bool,
    pub booster_restore_on_exit: bool,
    pub opacity: u8,
    pub active_sessions: SessionJournal,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_start: false,
            minimize_to_tray: true,
            always_on_top: false,
            launch_notifications: true,
            simplified_library_cards: false,
            accent_color: DEFAULT_ACCENT_COLOR.to_string(),
            theme_mode: ThemeMode::Dark,
            booster_enabled: false,
            booster_targets: Vec::new(),
            booster_force_kill: false,
            booster_restore_on_exit: true,
            opacity: DEFAULT_OPACITY,
            active_sessions: SessionJournal::default(),
        }
    }
}

fn sanitize_accent_color(value: Option<&Value>) -> String {
    let color = coerce_string(value).trim().to_lowercase();
    let valid = color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit());
    if valid {
        color
    } else {
        DEFAULT_ACCENT_COLOR.to_string()
    }
}

fn sanitize_theme_mode(value: Option<&Value>) -> ThemeMode {
    match coerce_string(value).trim().to_lowercase().as_str() {
        "light" => ThemeMode::Light,
        _ => ThemeMode::Dark,
    }
}

pub fn sanitize_settings(raw: Option<&Value>) -> Settings {
    let field = |key: &str| raw.and_then(|settings| settings.get(key));
    let defaults = Settings::default();
    Settings {
        auto_start: truthy(field("autoStart"), defaults.auto_start),
        minimize_to_tray: truthy(field("minimizeToTray"), defaults.minimize_to_tray),
        always_on_top: truthy(field("alwaysOnTop"), defaults.always_on_top),
        launch_notifications: truthy(field("launchNotifications"), defaults.launch_notifications),
        simplified_library_cards: truthy(field("simplifiedLibraryCards"), defaults.simplified_library_cards),
        accent_color: sanitize_accent_color(field("accentColor")),
        theme_mode: sanitize_theme_mode(field("themeMode")),
        opacity: clamp_int(field("opacity"), DEFAULT_OPACITY as i64, MIN_OPACITY, MAX_OPACITY) as u8,
        active_sessions: field("activeSessions")
            .map(SessionJournal::from_value)
            .unwrap_or_default(),
        ..defaults
    }
}

/// Brings the login auto-start registration in line with the setting.
/// Only Windows has a registration; elsewhere this is a no-op.
pub fn sync_autostart(enabled: bool) -> Result<()> {
    if !cfg!(windows) {
        return Ok(());
    }
    if enabled {
        let exe = env::current_exe().context("Unable to resolve launcher executable")?;
        startup::install(&exe, "")?;
    } else {
        startup::uninstall()?;
    }
    info!(enabled, "Auto-start registration updated");
    Ok(())
}

/// Describes a mismatch between the `autoStart` setting and the login
/// registration actually present.
pub fn autostart_drift(enabled: bool, registered: bool) -> Option<&'static str> {
    match (enabled, registered) {
        (true, false) => Some("auto-start is enabled but no login entry is registered"),
        (false, true) => Some("auto-start is disabled but a login entry is still registered"),
        _ => None,
    }
}

/// Best-effort wrapper used on the save path.
pub fn apply_autostart_change(previous: bool, next: bool) {
    if previous == next {
        return;
    }
    if let Err(err) = sync_autostart(next) {
        warn!("Failed to update auto-start registration: {err:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn autostart_drift_is_reported_both_ways() {
        assert_eq!(autostart_drift(true, true), None);
        assert_eq!(autostart_drift(false, false), None);
        assert!(autostart_drift(true, false).unwrap().contains("no login entry"));
        assert!(autostart_drift(false, true).unwrap().contains("still registered"));
    }

    #[test]
    fn defaults_when_missing() {
        assert_eq!(sanitize_settings(None), Settings::default());
        assert_eq!(sanitize_settings(Some(&json!("junk"))), Settings::default());
    }

    #[test]
    fn coerces_values() {
        let settings = sanitize_settings(Some(&json!({
            "autoStart": 1,
            "minimizeToTray": false,
            "opacity": 5,
            "accentColor": " #A1B2C3 ",
            "themeMode": "Light",
            "boosterEnabled": true,
            "boosterTargets": ["x.exe"],
        })));
        assert!(settings.auto_start);
        assert!(!settings.minimize_to_tray);
        assert!(settings.launch_notifications);
        assert_eq!(settings.opacity, 30);
        assert_eq!(settings.accent_color, "#a1b2c3");
        assert_eq!(settings.theme_mode, ThemeMode::Light);
        assert!(!settings.booster_enabled);
        assert!(settings.booster_targets.is_empty());
    }

    #[test]
    fn rejects_bad_accent() {
        let settings = sanitize_settings(Some(&json!({ "accentColor": "red", "opacity": "abc" })));
        assert_eq!(settings.accent_color, DEFAULT_ACCENT_COLOR);
        assert_eq!(settings.opacity, DEFAULT_OPACITY);
    }
}
