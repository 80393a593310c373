//! Write-ahead log of in-flight game sessions.
//!
//! An entry is written when a game is spawned and cleared when its session is
//! folded into history. Whatever survives in the persisted copy at startup
//! belongs to a run that never finalized.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::schema::{clamp_int, optional_pid, positive_int, MAX_SAFE_INTEGER};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
    pub pid: Option<u32>,
    pub started_at: i64,
    pub last_seen_at: i64,
}

impl ActiveSession {
    pub fn new(pid: Option<u32>, started_at: i64) -> Self {
        Self {
            pid,
            started_at,
            last_seen_at: started_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SessionJournal {
    entries: BTreeMap<u64, ActiveSession>,
}

impl SessionJournal {
    /// Coerces a persisted `activeSessions` object. Entries without a numeric
    /// key or a start time are dropped.
    pub fn from_value(value: &Value) -> Self {
        let mut entries = BTreeMap::new();
        let Some(raw) = value.as_object() else {
            return Self { entries };
        };
        for (key, entry) in raw {
            let Some(game_id) = key.trim().parse::<f64>().ok().and_then(|n| positive_int(n)) else {
                continue;
            };
            let started_at = clamp_int(entry.get("startedAt"), 0, 0, MAX_SAFE_INTEGER);
            if started_at == 0 {
                continue;
            }
            let last_seen_at = clamp_int(entry.get("lastSeenAt"), started_at, started_at, MAX_SAFE_INTEGER);
            entries.insert(
                game_id,
                ActiveSession {
                    pid: optional_pid(entry.get("pid")),
                    started_at,
                    last_seen_at,
                },
            );
        }
        Self { entries }
    }

    pub fn record(&mut self, game_id: u64, session: ActiveSession) {
        self.entries.insert(game_id, session);
    }

    pub fn touch(&mut self, game_id: u64, now: i64) {
        if let Some(entry) = self.entries.get_mut(&game_id) {
            entry.last_seen_at = now.max(entry.started_at);
        }
    }

    pub fn clear(&mut self, game_id: u64) -> Option<ActiveSession> {
        self.entries.remove(&game_id)
    }

    pub fn get(&self, game_id: u64) -> Option<&ActiveSession> {
        self.entries.get(&game_id)
    }

    pub fn contains(&self, game_id: u64) -> bool {
        self.entries.contains_key(&game_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Removes every entry, oldest game id first.
    pub fn drain(&mut self) -> Vec<(u64, ActiveSession)> {
        std::mem::take(&mut self.entries).into_iter().collect()
    }
}
