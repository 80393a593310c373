use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone};

use crate::schema::{AppDocument, ExitReason};

#[derive(Debug, Clone, PartialEq)]
pub struct GameTotal {
    pub game_id: u64,
    pub name: String,
    pub minutes: u64,
    pub launch_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecentSession {
    pub game_id: u64,
    pub name: String,
    pub started_at: DateTime<Local>,
    pub duration_minutes: u64,
    pub exit_reason: ExitReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Analytics {
    pub total_games: usize,
    pub total_sessions: usize,
    /// Sum of every game's credited playtime, history eviction included.
    pub total_minutes: u64,
    pub average_session_minutes: f64,
    pub median_session_minutes: f64,
    pub minutes_last_7: u64,
    pub minutes_last_30: u64,
    pub top_games: Vec<GameTotal>,
    pub top_days: Vec<(NaiveDate, u64)>,
    pub recent_sessions: Vec<RecentSession>,
    pub first_day: Option<NaiveDate>,
    pub last_day: Option<NaiveDate>,
}

pub fn format_duration(minutes: u64) -> String {
    let hours = minutes / 60;
    let mins = minutes % 60;
    match (hours, mins) {
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}m"),
    }
}

fn saturating_sum(values: impl Iterator<Item = u64>) -> u64 {
    values.fold(0, u64::saturating_add)
}

fn local_time(ms: i64) -> Option<DateTime<Local>> {
    Local.timestamp_millis_opt(ms).single()
}

/// Library-wide summary of the retained session history, relative to `now`.
pub fn compute_analytics(document: &AppDocument, now: DateTime<Local>) -> Analytics {
    let mut sessions = Vec::new();
    for game in &document.games {
        for entry in &game.session_history {
            let Some(started_at) = local_time(entry.started_at) else {
                continue;
            };
            sessions.push(RecentSession {
                game_id: game.id,
                name: game.name.clone(),
                started_at,
                duration_minutes: entry.duration_minutes,
                exit_reason: entry.exit_reason,
            });
        }
    }

    let total_sessions = sessions.len();
    let average_session_minutes = if total_sessions == 0 {
        0.0
    } else {
        let history_minutes: f64 = sessions.iter().map(|s| s.duration_minutes as f64).sum();
        history_minutes / total_sessions as f64
    };

    let mut durations: Vec<u64> = sessions.iter().map(|s| s.duration_minutes).collect();
    durations.sort_unstable();
    let median_session_minutes = if durations.is_empty() {
        0.0
    } else {
        let mid = durations.len() / 2;
        if durations.len() % 2 == 0 {
            (durations[mid - 1] as f64 + durations[mid] as f64) / 2.0
        } else {
            durations[mid] as f64
        }
    };

    let mut daily_totals: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for session in &sessions {
        let total = daily_totals.entry(session.started_at.date_naive()).or_default();
        *total = total.saturating_add(session.duration_minutes);
    }

    let today = now.date_naive();
    let since = |days: i64| -> u64 {
        saturating_sum(
            daily_totals
                .iter()
                .filter(|(day, _)| **day >= today - Duration::days(days))
                .map(|(_, minutes)| *minutes),
        )
    };
    let minutes_last_7 = since(6);
    let minutes_last_30 = since(29);

    let mut top_days: Vec<(NaiveDate, u64)> =
        daily_totals.iter().map(|(day, minutes)| (*day, *minutes)).collect();
    top_days.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    top_days.truncate(5);

    let mut top_games: Vec<GameTotal> = document
        .games
        .iter()
        .filter(|game| game.total_play_time() > 0)
        .map(|game| GameTotal {
            game_id: game.id,
            name: game.name.clone(),
            minutes: game.total_play_time(),
            launch_count: game.launch_count,
        })
        .collect();
    top_games.sort_by(|a, b| b.minutes.cmp(&a.minutes).then(a.name.cmp(&b.name)));
    top_games.truncate(5);

    sessions.sort_by_key(|s| std::cmp::Reverse(s.started_at));
    sessions.truncate(20);

    Analytics {
        total_games: document.games.len(),
        total_sessions,
        total_minutes: saturating_sum(document.games.iter().map(|g| g.total_play_time())),
        average_session_minutes,
        median_session_minutes,
        minutes_last_7,
        minutes_last_30,
        top_games,
        top_days,
        recent_sessions: sessions,
        first_day: daily_totals.keys().next().copied(),
        last_day: daily_totals.keys().next_back().copied(),
    }
}
