use std::{
    collections::BTreeMap,
    io,
    path::PathBuf,
    process::Stdio,
};

use serde_json::Value;
use sysinfo::{Pid, ProcessStatus, System};
use tracing::{debug, info};

use crate::clock::MINUTE_MS;
use crate::error::{CommandError, CommandResult, ErrorCode};
use crate::journal::ActiveSession;
use crate::paths::{check_launch_target, resolve_working_dir, same_path, LaunchPolicy};
use crate::schema::{
    coerce_string, positive_int, to_number, AppDocument, ExitReason, GameRecord, SessionEntry,
};

/// Credited minutes for a session: rounded up, never below one.
pub fn session_duration_minutes(started_at: i64, ended_at: i64) -> u64 {
    let elapsed = (ended_at - started_at).max(0);
    let minutes = (elapsed + MINUTE_MS - 1) / MINUTE_MS;
    minutes.max(1) as u64
}

pub fn fold_session(
    record: &mut GameRecord,
    session: &ActiveSession,
    ended_at: i64,
    exit_reason: ExitReason,
) -> SessionEntry {
    let ended_at = ended_at.max(session.started_at);
    let entry = SessionEntry {
        started_at: session.started_at,
        ended_at,
        duration_minutes: session_duration_minutes(session.started_at, ended_at),
        pid: session.pid,
        exit_reason,
    };
    record.append_session(entry);
    record.playtime.0 = record.playtime.0.saturating_add(entry.duration_minutes);
    record.last_played = Some(ended_at);
    entry
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub id: u64,
    pub path: String,
}

impl LaunchRequest {
    pub fn from_value(value: &Value) -> CommandResult<Self> {
        let invalid = || CommandError::new(ErrorCode::InvalidLaunch).with_context("request");
        if !value.is_object() {
            return Err(invalid());
        }
        let id = to_number(value.get("id"))
            .and_then(positive_int)
            .ok_or_else(invalid)?;
        Ok(Self {
            id,
            path: coerce_string(value.get("path")),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub game_id: u64,
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

pub struct SpawnedGame {
    pub pid: u32,
    pub child: Option<tokio::process::Child>,
}

pub trait Spawner: Send {
    fn spawn(&mut self, plan: &LaunchPlan) -> io::Result<SpawnedGame>;
}

#[derive(Debug, Default)]
pub struct ProcessSpawner;

impl Spawner for ProcessSpawner {
    fn spawn(&mut self, plan: &LaunchPlan) -> io::Result<SpawnedGame> {
        let mut command = std::process::Command::new(&plan.executable);
        command
            .args(&plan.args)
            .current_dir(&plan.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        detach(&mut command);

        let child = tokio::process::Command::from(command).spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("spawned process exited before reporting a pid"))?;
        Ok(SpawnedGame {
            pid,
            child: Some(child),
        })
    }
}

#[cfg(unix)]
fn detach(command: &mut std::process::Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(windows)]
fn detach(command: &mut std::process::Command) {
    use std::os::windows::process::CommandExt;
    use windows_sys::Win32::System::Threading::{CREATE_NEW_PROCESS_GROUP, DETACHED_PROCESS};
    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut std::process::Command) {}

pub trait LivenessProbe: Send {
    fn is_alive(&mut self, pid: u32) -> bool;
}

/// Liveness through the OS process table. A process we may not signal is
/// still listed, so it counts as alive.
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessProbe for SysinfoProbe {
    fn is_alive(&mut self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        if !self.system.refresh_process(pid) {
            return false;
        }
        self.system
            .process(pid)
            .map(|process| !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizedSession {
    pub game_id: u64,
    pub entry: SessionEntry,
}

#[derive(Debug)]
pub struct SessionTracker {
    policy: LaunchPolicy,
    active: BTreeMap<u64, ActiveSession>,
}

impl SessionTracker {
    pub fn new(policy: LaunchPolicy) -> Self {
        Self {
            policy,
            active: BTreeMap::new(),
        }
    }

    pub fn policy(&self) -> LaunchPolicy {
        self.policy
    }

    pub fn is_active(&self, game_id: u64) -> bool {
        self.active.contains_key(&game_id)
    }

    pub fn active(&self, game_id: u64) -> Option<&ActiveSession> {
        self.active.get(&game_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn prepare_launch(
        &self,
        document: &AppDocument,
        request: &LaunchRequest,
    ) -> CommandResult<LaunchPlan> {
        let record = document
            .game(request.id)
            .ok_or_else(|| CommandError::new(ErrorCode::GameNotFound).with_details(request.id))?;
        if !same_path(&request.path, &record.path) {
            return Err(CommandError::new(ErrorCode::PathMismatch).with_details(&request.path));
        }
        if self.is_active(record.id) {
            return Err(CommandError::new(ErrorCode::InvalidLaunch)
                .with_context("already running")
                .with_details(&record.name));
        }
        let executable = check_launch_target(&record.path, self.policy)?;
        let working_dir = resolve_working_dir(&record.working_dir, &record.path)?;
        Ok(LaunchPlan {
            game_id: record.id,
            executable,
            args: record.launch_argv(),
            working_dir,
        })
    }

    /// Launching -> Active: registers the session, bumps launch stats and
    /// writes the journal entry. The caller persists afterwards.
    pub fn register_spawn(
        &mut self,
        document: &mut AppDocument,
        game_id: u64,
        pid: u32,
        now: i64,
    ) -> Option<ActiveSession> {
        let record = document.game_mut(game_id)?;
        let session = ActiveSession::new(Some(pid), now);
        record.launch_count = record.launch_count.saturating_add(1);
        record.last_played = Some(now);
        self.active.insert(game_id, session);
        document.settings.active_sessions.record(game_id, session);
        info!(game_id, pid, "Session started");
        Some(session)
    }

    /// Active -> Finalizing -> Idle. A no-op for ids without an active
    /// session, so exit notification and poll can race safely.
    pub fn finalize(
        &mut self,
        document: &mut AppDocument,
        game_id: u64,
        now: i64,
        exit_reason: ExitReason,
    ) -> Option<FinalizedSession> {
        let session = self.active.remove(&game_id)?;
        document.settings.active_sessions.clear(game_id);
        let Some(record) = document.game_mut(game_id) else {
            debug!(game_id, "Finalized session for a game that no longer exists");
            return None;
        };
        let entry = fold_session(record, &session, now, exit_reason);
        info!(
            game_id,
            minutes = entry.duration_minutes,
            reason = ?exit_reason,
            "Session finalized"
        );
        Some(FinalizedSession { game_id, entry })
    }

    /// Finalizes only if the exiting pid still owns the session.
    pub fn finalize_exited(
        &mut self,
        document: &mut AppDocument,
        game_id: u64,
        pid: u32,
        now: i64,
    ) -> Option<FinalizedSession> {
        if self.active.get(&game_id)?.pid != Some(pid) {
            return None;
        }
        self.finalize(document, game_id, now, ExitReason::Normal)
    }

    pub fn poll(
        &mut self,
        document: &mut AppDocument,
        probe: &mut dyn LivenessProbe,
        now: i64,
    ) -> Vec<FinalizedSession> {
        let mut dead = Vec::new();
        for (game_id, session) in self.active.iter_mut() {
            let alive = session.pid.map(|pid| probe.is_alive(pid)).unwrap_or(false);
            if alive {
                session.last_seen_at = now.max(session.started_at);
                document.settings.active_sessions.touch(*game_id, now);
            } else {
                dead.push(*game_id);
            }
        }
        dead.into_iter()
            .filter_map(|game_id| self.finalize(document, game_id, now, ExitReason::Normal))
            .collect()
    }

    /// Credits every orphan left in the persisted journal by a run that
    /// never finalized, up to `now`. The journal is empty afterwards.
    pub fn recover_orphans(&mut self, document: &mut AppDocument, now: i64) -> Vec<FinalizedSession> {
        let orphans = document.settings.active_sessions.drain();
        let mut recovered = Vec::new();
        for (game_id, session) in orphans {
            if self.active.contains_key(&game_id) {
                continue;
            }
            let Some(record) = document.game_mut(game_id) else {
                debug!(game_id, "Dropping orphaned session for a deleted game");
                continue;
            };
            let entry = fold_session(record, &session, now, ExitReason::Recovered);
            info!(
                game_id,
                minutes = entry.duration_minutes,
                "Recovered orphaned session"
            );
            recovered.push(FinalizedSession { game_id, entry });
        }
        // In-flight sessions of this run stay journaled.
        for (game_id, session) in &self.active {
            document.settings.active_sessions.record(*game_id, *session);
        }
        recovered
    }

    pub fn finalize_all(
        &mut self,
        document: &mut AppDocument,
        now: i64,
        exit_reason: ExitReason,
    ) -> Vec<FinalizedSession> {
        let ids: Vec<u64> = self.active.keys().copied().collect();
        ids.into_iter()
            .filter_map(|game_id| self.finalize(document, game_id, now, exit_reason))
            .collect()
    }

    /// Drops a session without crediting it, e.g. when its game is deleted.
    pub fn forget(&mut self, document: &mut AppDocument, game_id: u64) {
        self.active.remove(&game_id);
        document.settings.active_sessions.clear(game_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::sanitize_document_at;
    use serde_json::json;
    use std::collections::HashSet;

    const T0: i64 = 1_700_000_000_000;

    struct FakeProbe(HashSet<u32>);

    impl LivenessProbe for FakeProbe {
        fn is_alive(&mut self, pid: u32) -> bool {
            self.0.contains(&pid)
        }
    }

    fn document() -> AppDocument {
        sanitize_document_at(
            &json!({ "games": [
                { "id": 1, "name": "One", "path": "C:/Games/one.exe" },
                { "id": 2, "name": "Two", "path": "C:/Games/two.exe", "totalPlayTime": 10 },
            ]}),
            T0,
        )
    }

    #[test]
    fn duration_rounds_up_with_one_minute_floor() {
        assert_eq!(session_duration_minutes(T0, T0), 1);
        assert_eq!(session_duration_minutes(T0, T0 + 1), 1);
        assert_eq!(session_duration_minutes(T0, T0 + MINUTE_MS), 1);
        assert_eq!(session_duration_minutes(T0, T0 + MINUTE_MS + 1), 2);
        assert_eq!(session_duration_minutes(T0, T0 - 5), 1);
    }

    #[test]
    fn launch_request_needs_object_with_id() {
        assert!(LaunchRequest::from_value(&json!(null)).is_err());
        assert!(LaunchRequest::from_value(&json!({ "path": "x" })).is_err());
        let request = LaunchRequest::from_value(&json!({ "id": "4", "path": "C:/a.exe" })).unwrap();
        assert_eq!(request.id, 4);
    }

    #[test]
    fn prepare_rejects_mismatch_and_unknown_ids() {
        let tracker = SessionTracker::new(LaunchPolicy::default());
        let doc = document();
        let err = tracker
            .prepare_launch(&doc, &LaunchRequest { id: 9, path: String::new() })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::GameNotFound);
        let err = tracker
            .prepare_launch(&doc, &LaunchRequest { id: 1, path: "C:/Games/evil.exe".into() })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PathMismatch);
    }

    #[test]
    fn register_and_finalize_update_record_and_journal() {
        let mut tracker = SessionTracker::new(LaunchPolicy::default());
        let mut doc = document();
        tracker.register_spawn(&mut doc, 2, 4242, T0).unwrap();
        assert!(doc.settings.active_sessions.contains(2));
        assert_eq!(doc.game(2).unwrap().launch_count, 1);
        assert_eq!(doc.game(2).unwrap().last_played, Some(T0));

        let done = tracker
            .finalize(&mut doc, 2, T0 + 5 * MINUTE_MS, ExitReason::Normal)
            .unwrap();
        assert_eq!(done.entry.duration_minutes, 5);
        let game = doc.game(2).unwrap();
        assert_eq!(game.total_play_time(), 15);
        assert_eq!(game.last_played, Some(T0 + 5 * MINUTE_MS));
        assert_eq!(game.session_history.len(), 1);
        assert!(doc.settings.active_sessions.is_empty());
        assert!(tracker.finalize(&mut doc, 2, T0, ExitReason::Normal).is_none());
    }

    #[test]
    fn stale_exit_notification_is_ignored() {
        let mut tracker = SessionTracker::new(LaunchPolicy::default());
        let mut doc = document();
        tracker.register_spawn(&mut doc, 1, 100, T0).unwrap();
        assert!(tracker.finalize_exited(&mut doc, 1, 99, T0 + 1).is_none());
        assert!(tracker.is_active(1));
        assert!(tracker.finalize_exited(&mut doc, 1, 100, T0 + 1).is_some());
    }

    #[test]
    fn poll_finalizes_only_dead_processes() {
        let mut tracker = SessionTracker::new(LaunchPolicy::default());
        let mut doc = document();
        tracker.register_spawn(&mut doc, 1, 100, T0).unwrap();
        tracker.register_spawn(&mut doc, 2, 200, T0).unwrap();
        let mut probe = FakeProbe(HashSet::from([100]));

        let done = tracker.poll(&mut doc, &mut probe, T0 + 3 * MINUTE_MS);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].game_id, 2);
        assert_eq!(tracker.active(1).unwrap().last_seen_at, T0 + 3 * MINUTE_MS);
        assert_eq!(
            doc.settings.active_sessions.get(1).unwrap().last_seen_at,
            T0 + 3 * MINUTE_MS
        );
        assert!(!doc.settings.active_sessions.contains(2));
    }

    #[test]
    fn recovery_credits_orphans_and_clears_journal() {
        let mut tracker = SessionTracker::new(LaunchPolicy::default());
        let mut doc = document();
        doc.settings.active_sessions.record(1, ActiveSession::new(Some(5), T0));
        doc.settings.active_sessions.record(77, ActiveSession::new(Some(6), T0));

        let recovered = tracker.recover_orphans(&mut doc, T0 + 30 * MINUTE_MS);
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].entry.exit_reason, ExitReason::Recovered);
        assert_eq!(doc.game(1).unwrap().total_play_time(), 30);
        assert!(doc.settings.active_sessions.is_empty());
    }

    #[test]
    fn shutdown_sweep_forces_every_session() {
        let mut tracker = SessionTracker::new(LaunchPolicy::default());
        let mut doc = document();
        tracker.register_spawn(&mut doc, 1, 100, T0).unwrap();
        tracker.register_spawn(&mut doc, 2, 200, T0).unwrap();
        let done = tracker.finalize_all(&mut doc, T0 + MINUTE_MS, ExitReason::Forced);
        assert_eq!(done.len(), 2);
        assert!(done.iter().all(|s| s.entry.exit_reason == ExitReason::Forced));
        assert_eq!(tracker.active_count(), 0);
        assert!(doc.settings.active_sessions.is_empty());
    }
}
