use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{ser::SerializeMap, Serialize, Serializer};
use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::paths::normalize_path;
use crate::settings::{sanitize_settings, Settings};

pub const MAX_SESSION_HISTORY: usize = 120;
pub const MAX_NAME_CHARS: usize = 120;
pub const MAX_LAUNCH_ARGS_CHARS: usize = 300;
pub const MAX_LAUNCH_ARGS: usize = 20;
pub const MAX_ASSET_PATH_CHARS: usize = 500;
pub const MAX_CATEGORY_CHARS: usize = 32;
pub const UNKNOWN_GAME_NAME: &str = "Unknown Game";
pub const FALLBACK_CATEGORY: &str = "Other";
pub const DEFAULT_CATEGORIES: [&str; 4] = ["FPS", "MOBA", "RPG", FALLBACK_CATEGORY];

/// Largest integer a JSON consumer can represent exactly.
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;
pub const UNSORTED: i64 = MAX_SAFE_INTEGER;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitReason {
    #[default]
    Normal,
    Forced,
    Recovered,
}

impl ExitReason {
    fn from_value(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str).map(|s| s.trim().to_ascii_lowercase()) {
            Some(reason) if reason == "forced" => ExitReason::Forced,
            Some(reason) if reason == "recovered" => ExitReason::Recovered,
            _ => ExitReason::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub started_at: i64,
    pub ended_at: i64,
    pub duration_minutes: u64,
    pub pid: Option<u32>,
    pub exit_reason: ExitReason,
}

/// Accumulated minutes, written under both `totalPlayTime` and the older
/// `playtimeMinutes` key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Playtime(pub u64);

impl Serialize for Playtime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("playtimeMinutes", &self.0)?;
        map.serialize_entry("totalPlayTime", &self.0)?;
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRecord {
    pub id: u64,
    pub name: String,
    pub path: String,
    pub category: String,
    pub icon: Option<String>,
    pub added_at: i64,
    pub last_played: Option<i64>,
    #[serde(flatten)]
    pub playtime: Playtime,
    pub session_history: Vec<SessionEntry>,
    pub launch_count: u64,
    pub favorite: bool,
    pub pin_order: u64,
    pub sort_order: i64,
    pub launch_args: String,
    pub working_dir: String,
    pub cover_path: Option<String>,
    pub logo_path: Option<String>,
    pub steam_app_id: Option<u64>,
}

impl GameRecord {
    pub fn total_play_time(&self) -> u64 {
        self.playtime.0
    }

    /// Appends to history, evicting the oldest entries beyond the cap.
    pub fn append_session(&mut self, entry: SessionEntry) {
        self.session_history.push(entry);
        if self.session_history.len() > MAX_SESSION_HISTORY {
            let excess = self.session_history.len() - MAX_SESSION_HISTORY;
            self.session_history.drain(..excess);
        }
    }

    pub fn launch_argv(&self) -> Vec<String> {
        split_launch_args(&self.launch_args)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppDocument {
    pub games: Vec<GameRecord>,
    pub categories: Vec<String>,
    pub settings: Settings,
}

impl Default for AppDocument {
    fn default() -> Self {
        Self {
            games: Vec::new(),
            categories: DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
            settings: Settings::default(),
        }
    }
}

impl AppDocument {
    pub fn game(&self, id: u64) -> Option<&GameRecord> {
        self.games.iter().find(|game| game.id == id)
    }

    pub fn game_mut(&mut self, id: u64) -> Option<&mut GameRecord> {
        self.games.iter_mut().find(|game| game.id == id)
    }

    /// A fresh id: timestamp-derived, but always above every id in use.
    pub fn next_game_id(&self, now_ms: i64) -> u64 {
        let used: HashSet<u64> = self.games.iter().map(|game| game.id).collect();
        let highest = used.iter().max().copied().unwrap_or(0);
        fresh_id(highest.max(now_ms.max(1) as u64 - 1), &used)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn resanitized(&self, now_ms: i64) -> AppDocument {
        sanitize_document_at(&self.to_value(), now_ms)
    }
}

pub(crate) fn to_number(value: Option<&Value>) -> Option<f64> {
    let number = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => return None,
    };
    number.is_finite().then_some(number)
}

/// Truncates and clamps into `min..=max`; anything non-numeric takes `fallback`.
pub(crate) fn clamp_int(value: Option<&Value>, fallback: i64, min: i64, max: i64) -> i64 {
    match to_number(value) {
        Some(number) => (number.trunc() as i64).clamp(min, max),
        None => fallback,
    }
}

pub(crate) fn positive_int(number: f64) -> Option<u64> {
    (number.is_finite() && number >= 1.0).then(|| (number.trunc() as i64).min(MAX_SAFE_INTEGER) as u64)
}

pub(crate) fn optional_pid(value: Option<&Value>) -> Option<u32> {
    let number = to_number(value)?;
    (0.0..=u32::MAX as f64).contains(&number).then(|| number.trunc() as u32)
}

/// Loose truthiness; legacy documents store flags as numbers or strings.
pub(crate) fn truthy(value: Option<&Value>, default: bool) -> bool {
    match value {
        None | Some(Value::Null) => default,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

pub(crate) fn coerce_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(true)) => "true".to_string(),
        _ => String::new(),
    }
}

pub(crate) fn clip(value: &str, max_chars: usize) -> String {
    let capped: String = value.trim().chars().take(max_chars).collect();
    capped.trim_end().to_string()
}

fn optional_text(value: Option<&Value>, max_chars: usize) -> Option<String> {
    let text = clip(value.and_then(Value::as_str)?, max_chars);
    (!text.is_empty()).then_some(text)
}

pub fn sanitize_categories(raw: Option<&Value>) -> Vec<String> {
    let source: Vec<String> = match raw.and_then(Value::as_array) {
        Some(items) => items.iter().map(|item| coerce_string(Some(item))).collect(),
        None => DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
    };

    let mut seen = HashSet::new();
    let mut categories = Vec::new();
    for item in source {
        let collapsed = item.split_whitespace().collect::<Vec<_>>().join(" ");
        let value = clip(&collapsed, MAX_CATEGORY_CHARS);
        if value.is_empty() {
            continue;
        }
        let key = value.to_lowercase();
        if key == "all" || key == "rts" || !seen.insert(key) {
            continue;
        }
        categories.push(value);
    }
    if !seen.contains("other") {
        categories.push(FALLBACK_CATEGORY.to_string());
    }
    categories
}

fn sanitize_category(raw: Option<&Value>, allowed: &[String]) -> String {
    let wanted = coerce_string(raw).trim().to_string();
    let key = wanted.to_lowercase();
    if !wanted.is_empty() && allowed.iter().any(|candidate| candidate.to_lowercase() == key) {
        wanted
    } else {
        FALLBACK_CATEGORY.to_string()
    }
}

fn sanitize_history(raw: Option<&Value>) -> Vec<SessionEntry> {
    let Some(items) = raw.and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut entries: Vec<SessionEntry> = items
        .iter()
        .filter_map(|item| {
            let entry = item.as_object()?;
            let started_at = clamp_int(entry.get("startedAt"), 0, 0, MAX_SAFE_INTEGER);
            let ended_at = clamp_int(entry.get("endedAt"), 0, 0, MAX_SAFE_INTEGER);
            if started_at == 0 || ended_at == 0 || ended_at < started_at {
                return None;
            }
            Some(SessionEntry {
                started_at,
                ended_at,
                duration_minutes: clamp_int(entry.get("durationMinutes"), 0, 0, MAX_SAFE_INTEGER) as u64,
                pid: optional_pid(entry.get("pid")),
                exit_reason: ExitReason::from_value(entry.get("exitReason")),
            })
        })
        .collect();
    if entries.len() > MAX_SESSION_HISTORY {
        let excess = entries.len() - MAX_SESSION_HISTORY;
        entries.drain(..excess);
    }
    entries
}

/// First unused id above `after`, wrapping to the low range once the JSON
/// safe-integer ceiling is reached.
fn fresh_id(after: u64, used: &HashSet<u64>) -> u64 {
    let ceiling = MAX_SAFE_INTEGER as u64;
    (after.saturating_add(1)..=ceiling)
        .chain(1..=ceiling)
        .find(|id| !used.contains(id))
        .unwrap_or(ceiling)
}

/// Field-level coercion. A missing id comes back as 0 for the caller to fill.
fn sanitize_game_fields(raw: &Value, allowed: &[String], now_ms: i64) -> GameRecord {
    let field = |key: &str| raw.get(key);
    let favorite = truthy(field("favorite"), false);
    let playtime_source = match field("totalPlayTime") {
        None | Some(Value::Null) => field("playtimeMinutes"),
        present => present,
    };
    let name = clip(&coerce_string(field("name")), MAX_NAME_CHARS);
    let icon = field("icon")
        .and_then(Value::as_str)
        .filter(|icon| icon.starts_with("data:image/"))
        .map(str::to_string);

    GameRecord {
        id: to_number(field("id")).and_then(positive_int).unwrap_or(0),
        name: if name.is_empty() {
            UNKNOWN_GAME_NAME.to_string()
        } else {
            name
        },
        path: normalize_path(&coerce_string(field("path"))),
        category: sanitize_category(field("category"), allowed),
        icon,
        added_at: clamp_int(field("addedAt"), now_ms.max(0), 0, MAX_SAFE_INTEGER),
        last_played: to_number(field("lastPlayed"))
            .filter(|n| *n > 0.0)
            .map(|n| (n.trunc() as i64).min(MAX_SAFE_INTEGER)),
        playtime: Playtime(clamp_int(playtime_source, 0, 0, MAX_SAFE_INTEGER) as u64),
        session_history: sanitize_history(field("sessionHistory")),
        launch_count: clamp_int(field("launchCount"), 0, 0, MAX_SAFE_INTEGER) as u64,
        favorite,
        pin_order: if favorite {
            clamp_int(field("pinOrder"), 0, 0, MAX_SAFE_INTEGER) as u64
        } else {
            0
        },
        sort_order: clamp_int(field("sortOrder"), UNSORTED, 0, UNSORTED),
        launch_args: clip(&coerce_string(field("launchArgs")), MAX_LAUNCH_ARGS_CHARS),
        working_dir: normalize_path(&coerce_string(field("workingDir"))),
        cover_path: optional_text(field("coverPath"), MAX_ASSET_PATH_CHARS),
        logo_path: optional_text(field("logoPath"), MAX_ASSET_PATH_CHARS),
        steam_app_id: to_number(field("steamAppId")).and_then(positive_int),
    }
}

pub fn sanitize_game(raw: &Value, allowed: &[String], now_ms: i64) -> GameRecord {
    let mut game = sanitize_game_fields(raw, allowed, now_ms);
    if game.id == 0 {
        game.id = now_ms.max(1) as u64;
    }
    game
}

pub fn sanitize_document_at(raw: &Value, now_ms: i64) -> AppDocument {
    let categories = sanitize_categories(raw.get("categories"));
    let mut games: Vec<GameRecord> = raw
        .get("games")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| sanitize_game_fields(item, &categories, now_ms))
                .collect()
        })
        .unwrap_or_default();

    let mut used: HashSet<u64> = games.iter().map(|game| game.id).filter(|id| *id > 0).collect();
    let mut next_id = used.iter().max().copied().unwrap_or(0).max(now_ms.max(0) as u64);
    for game in games.iter_mut().filter(|game| game.id == 0) {
        next_id = fresh_id(next_id, &used);
        used.insert(next_id);
        game.id = next_id;
    }

    let mut seen = HashSet::new();
    games.retain(|game| seen.insert(game.id));

    AppDocument {
        games,
        categories,
        settings: sanitize_settings(raw.get("settings")),
    }
}

pub fn sanitize_document(raw: &Value) -> AppDocument {
    sanitize_document_at(raw, SystemClock.now_ms())
}

static LAUNCH_ARG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"]*)"|'([^']*)'|\S+"#).expect("launch argument pattern"));

/// Splits a launch argument string into argv entries, honoring single and
/// double quotes.
pub fn split_launch_args(args: &str) -> Vec<String> {
    LAUNCH_ARG_PATTERN
        .captures_iter(args.trim())
        .take(MAX_LAUNCH_ARGS)
        .filter_map(|caps| {
            // An empty quoted group falls back to the literal quotes.
            [1, 2, 0]
                .into_iter()
                .filter_map(|group| caps.get(group))
                .find(|m| !m.as_str().is_empty())
                .map(|m| m.as_str().to_string())
        })
        .collect()
}
