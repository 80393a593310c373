use std::{
    collections::{HashMap, HashSet},
    ops::ControlFlow,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use chrono::Local;
use serde::Serialize;
use serde_json::Value;
use tokio::{
    process::Child,
    sync::{
        mpsc::{self, WeakSender},
        oneshot,
    },
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::ServiceConfig;
use crate::covers::CoverManager;
use crate::error::{CommandError, CommandResult, ErrorCode};
use crate::monitor::{
    FinalizedSession, LaunchRequest, LivenessProbe, ProcessSpawner, SessionTracker, Spawner,
    SysinfoProbe,
};
use crate::paths::{is_valid_executable_path, normalize_path, LaunchPolicy};
use crate::schema::{
    coerce_string, positive_int, sanitize_document_at, sanitize_game, to_number, AppDocument,
    ExitReason, GameRecord, Playtime, UNSORTED,
};
use crate::settings::apply_autostart_change;
use crate::steam::{self, SteamCandidate};
use crate::storage::{default_export_file_name, sweep_stale_temp_files, DocumentStore, LoadOutcome};

const COMMAND_BUFFER: usize = 64;

const EDITABLE_FIELDS: [&str; 8] = [
    "name",
    "path",
    "category",
    "icon",
    "launchArgs",
    "workingDir",
    "logoPath",
    "steamAppId",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub added: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingFlag {
    AlwaysOnTop,
    AutoStart,
}

enum Command {
    GetData {
        reply: oneshot::Sender<AppDocument>,
    },
    Game {
        id: u64,
        reply: oneshot::Sender<Option<GameRecord>>,
    },
    SaveData {
        raw: Value,
        reply: oneshot::Sender<bool>,
    },
    Launch {
        request: Value,
        reply: oneshot::Sender<CommandResult<u32>>,
    },
    ToggleFavorite {
        id: u64,
        reply: oneshot::Sender<CommandResult<bool>>,
    },
    UpdateGame {
        patch: Value,
        reply: oneshot::Sender<CommandResult<GameRecord>>,
    },
    AddGame {
        candidate: Value,
        reply: oneshot::Sender<CommandResult<GameRecord>>,
    },
    DeleteGame {
        id: u64,
        reply: oneshot::Sender<CommandResult<GameRecord>>,
    },
    SetSortOrder {
        ids: Vec<u64>,
        reply: oneshot::Sender<bool>,
    },
    ImportCandidates {
        candidates: Vec<Value>,
        reply: oneshot::Sender<ImportSummary>,
    },
    ReplaceDocument {
        document: AppDocument,
        reply: oneshot::Sender<CommandResult<AppDocument>>,
    },
    SetCover {
        id: u64,
        cover: Option<String>,
        reply: oneshot::Sender<CommandResult<Option<String>>>,
    },
    SetFlag {
        flag: SettingFlag,
        value: bool,
        reply: oneshot::Sender<bool>,
    },
    ProcessExited {
        game_id: u64,
        pid: u32,
    },
    Poll {
        reply: Option<oneshot::Sender<Vec<FinalizedSession>>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Loads the document and credits sessions orphaned by a previous run. The
/// journal is empty afterwards; the caller persists.
fn load_and_recover(
    store: &DocumentStore,
    tracker: &mut SessionTracker,
    now: i64,
) -> (AppDocument, Vec<FinalizedSession>, LoadOutcome) {
    sweep_stale_temp_files(store);
    let (mut document, outcome) = store.load_checked(now);
    let recovered = tracker.recover_orphans(&mut document, now);
    if !recovered.is_empty() {
        info!(count = recovered.len(), "Recovered sessions left by the previous run");
    }
    (document, recovered, outcome)
}

/// Offline recovery for the CLI. Must not run while a service owns the file.
pub fn recover_offline(store: &DocumentStore, now: i64) -> Result<Vec<FinalizedSession>> {
    let mut tracker = SessionTracker::new(LaunchPolicy::default());
    let (document, recovered, outcome) = load_and_recover(store, &mut tracker, now);
    if !outcome.may_overwrite() {
        anyhow::bail!("{} could not be read; left untouched", store.path().display());
    }
    store.try_save(&document)?;
    Ok(recovered)
}

pub struct ServiceBuilder {
    store: DocumentStore,
    covers: CoverManager,
    policy: LaunchPolicy,
    poll_interval: Duration,
    spawner: Box<dyn Spawner>,
    probe: Box<dyn LivenessProbe>,
    clock: Arc<dyn Clock>,
}

impl ServiceBuilder {
    pub fn new(store: DocumentStore, covers: CoverManager) -> Self {
        Self {
            store,
            covers,
            policy: LaunchPolicy::default(),
            poll_interval: Duration::from_secs(crate::config::DEFAULT_POLL_SECONDS),
            spawner: Box::new(ProcessSpawner),
            probe: Box::new(SysinfoProbe::new()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let store = DocumentStore::new(&config.data_dir)?;
        let covers = CoverManager::new(&config.data_dir, config.artwork_timeout)?;
        Ok(Self::new(store, covers)
            .policy(config.launch_policy)
            .poll_interval(config.poll_interval))
    }

    pub fn policy(mut self, policy: LaunchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn spawner(mut self, spawner: impl Spawner + 'static) -> Self {
        self.spawner = Box::new(spawner);
        self
    }

    pub fn probe(mut self, probe: impl LivenessProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Runs startup recovery, then starts the actor and the liveness poll.
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> (LibraryHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let mut tracker = SessionTracker::new(self.policy);
        let (document, _, outcome) = load_and_recover(&self.store, &mut tracker, self.clock.now_ms());

        let mut service = LibraryService {
            document,
            tracker,
            store: self.store.clone(),
            spawner: self.spawner,
            probe: self.probe,
            clock: self.clock,
            commands: tx.downgrade(),
            poll_task: None,
            stopped: false,
            read_only: !outcome.may_overwrite(),
        };
        service.poll_task = Some(spawn_poll_task(tx.downgrade(), self.poll_interval));
        let task = tokio::spawn(service.run(rx));

        let handle = LibraryHandle {
            commands: tx,
            covers: self.covers,
            store: self.store,
        };
        (handle, task)
    }
}

fn spawn_poll_task(commands: WeakSender<Command>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(tx) = commands.upgrade() else {
                break;
            };
            if tx.send(Command::Poll { reply: None }).await.is_err() {
                break;
            }
        }
    })
}

struct LibraryService {
    document: AppDocument,
    tracker: SessionTracker,
    store: DocumentStore,
    spawner: Box<dyn Spawner>,
    probe: Box<dyn LivenessProbe>,
    clock: Arc<dyn Clock>,
    // Weak so exit watchers and the poll task never keep the actor alive.
    commands: WeakSender<Command>,
    poll_task: Option<JoinHandle<()>>,
    stopped: bool,
    // Set when the store file exists but could not be read; it is never
    // overwritten until an import replaces the library.
    read_only: bool,
}

impl LibraryService {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        self.persist().await;
        while let Some(command) = rx.recv().await {
            if self.handle(command).await.is_break() {
                break;
            }
        }
        if !self.stopped {
            info!("All library handles dropped; shutting down");
            self.shutdown().await;
        }
    }

    async fn handle(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::GetData { reply } => {
                let _ = reply.send(self.document.clone());
            }
            Command::Game { id, reply } => {
                let _ = reply.send(self.document.game(id).cloned());
            }
            Command::SaveData { raw, reply } => {
                let _ = reply.send(self.save_data(&raw).await);
            }
            Command::Launch { request, reply } => {
                let _ = reply.send(self.launch(&request).await);
            }
            Command::ToggleFavorite { id, reply } => {
                let _ = reply.send(self.toggle_favorite(id).await);
            }
            Command::UpdateGame { patch, reply } => {
                let _ = reply.send(self.update_game(&patch).await);
            }
            Command::AddGame { candidate, reply } => {
                let _ = reply.send(self.add_game(&candidate).await);
            }
            Command::DeleteGame { id, reply } => {
                let _ = reply.send(self.delete_game(id).await);
            }
            Command::SetSortOrder { ids, reply } => {
                let _ = reply.send(self.set_sort_order(&ids).await);
            }
            Command::ImportCandidates { candidates, reply } => {
                let _ = reply.send(self.import_candidates(&candidates).await);
            }
            Command::ReplaceDocument { document, reply } => {
                let _ = reply.send(self.replace_document(document).await);
            }
            Command::SetCover { id, cover, reply } => {
                let _ = reply.send(self.set_cover(id, cover).await);
            }
            Command::SetFlag { flag, value, reply } => {
                let _ = reply.send(self.set_flag(flag, value).await);
            }
            Command::ProcessExited { game_id, pid } => {
                let now = self.clock.now_ms();
                if self
                    .tracker
                    .finalize_exited(&mut self.document, game_id, pid, now)
                    .is_some()
                {
                    self.persist().await;
                }
            }
            Command::Poll { reply } => {
                let finished = self.poll().await;
                if let Some(reply) = reply {
                    let _ = reply.send(finished);
                }
            }
            Command::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn persist(&mut self) -> bool {
        self.document = self.document.resanitized(self.clock.now_ms());
        if self.read_only {
            warn!("Not saving: {} could not be read at startup", self.store.path().display());
            return false;
        }
        write_document(self.store.clone(), self.document.clone()).await
    }

    async fn save_data(&mut self, raw: &Value) -> bool {
        if !raw.is_object() {
            return false;
        }
        let mut incoming = sanitize_document_at(raw, self.clock.now_ms());
        // Session bookkeeping belongs to the tracker, not to the caller's snapshot.
        incoming.settings.active_sessions = self.document.settings.active_sessions.clone();
        for game in &mut incoming.games {
            if let Some(current) = self.document.game(game.id) {
                game.playtime = current.playtime;
                game.session_history = current.session_history.clone();
                game.launch_count = current.launch_count;
                game.last_played = current.last_played;
            }
        }
        let previous_auto_start = self.document.settings.auto_start;
        self.document = incoming;
        apply_autostart_change(previous_auto_start, self.document.settings.auto_start);
        self.persist().await
    }

    async fn launch(&mut self, request: &Value) -> CommandResult<u32> {
        let request = LaunchRequest::from_value(request)?;
        let plan = self.tracker.prepare_launch(&self.document, &request)?;
        let spawned = self.spawner.spawn(&plan).map_err(|err| {
            warn!(
                game_id = plan.game_id,
                "Failed to spawn {}: {err}",
                plan.executable.display()
            );
            CommandError::from_spawn(&err)
                .with_context("spawn")
                .with_details(plan.executable.display())
        })?;

        let now = self.clock.now_ms();
        self.tracker
            .register_spawn(&mut self.document, plan.game_id, spawned.pid, now);
        self.persist().await;

        if let Some(child) = spawned.child {
            self.watch_exit(plan.game_id, spawned.pid, child);
        }
        if self.document.settings.launch_notifications {
            if let Some(game) = self.document.game(plan.game_id) {
                info!(target: "gamedock::notify", game = %game.name, pid = spawned.pid, "Game launched");
            }
        }
        Ok(spawned.pid)
    }

    fn watch_exit(&self, game_id: u64, pid: u32, mut child: Child) {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            debug!(game_id, pid, ?status, "Game process exited");
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::ProcessExited { game_id, pid }).await;
            }
        });
    }

    async fn poll(&mut self) -> Vec<FinalizedSession> {
        if self.tracker.active_count() == 0 {
            return Vec::new();
        }
        let now = self.clock.now_ms();
        let finished = self
            .tracker
            .poll(&mut self.document, self.probe.as_mut(), now);
        if !finished.is_empty() {
            self.persist().await;
        }
        finished
    }

    async fn shutdown(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        let now = self.clock.now_ms();
        let forced = self
            .tracker
            .finalize_all(&mut self.document, now, ExitReason::Forced);
        if !forced.is_empty() {
            info!(count = forced.len(), "Closed running sessions on shutdown");
        }
        self.persist().await;
        self.stopped = true;
    }

    async fn toggle_favorite(&mut self, id: u64) -> CommandResult<bool> {
        let next_pin = self
            .document
            .games
            .iter()
            .map(|game| game.pin_order)
            .max()
            .unwrap_or(0)
            + 1;
        let game = self
            .document
            .game_mut(id)
            .ok_or_else(|| CommandError::new(ErrorCode::GameNotFound).with_details(id))?;
        game.favorite = !game.favorite;
        game.pin_order = if game.favorite { next_pin } else { 0 };
        let favorite = game.favorite;
        self.persist().await;
        Ok(favorite)
    }

    async fn update_game(&mut self, patch: &Value) -> CommandResult<GameRecord> {
        let id = to_number(patch.get("id"))
            .and_then(positive_int)
            .ok_or_else(|| CommandError::new(ErrorCode::GameNotFound).with_context("update"))?;
        let index = self
            .document
            .games
            .iter()
            .position(|game| game.id == id)
            .ok_or_else(|| CommandError::new(ErrorCode::GameNotFound).with_details(id))?;
        let current = &self.document.games[index];

        let mut merged = serde_json::to_value(current)
            .map_err(|err| CommandError::new(ErrorCode::Unknown).with_details(err))?;
        for key in EDITABLE_FIELDS {
            if let Some(value) = patch.get(key) {
                merged[key] = value.clone();
            }
        }
        let updated = sanitize_game(&merged, &self.document.categories, self.clock.now_ms());
        if updated.path != current.path
            && !is_valid_executable_path(&updated.path, self.tracker.policy())
        {
            return Err(CommandError::new(ErrorCode::BlockedPath)
                .with_context("update")
                .with_details(&updated.path));
        }

        self.document.games[index] = updated;
        self.persist().await;
        self.document
            .game(id)
            .cloned()
            .ok_or_else(|| CommandError::new(ErrorCode::GameNotFound).with_details(id))
    }

    fn new_record(&self, candidate: &Value, now: i64) -> GameRecord {
        let mut record = sanitize_game(candidate, &self.document.categories, now);
        record.id = self.document.next_game_id(now);
        record.added_at = now;
        record.last_played = None;
        record.playtime = Playtime(0);
        record.session_history.clear();
        record.launch_count = 0;
        record.favorite = false;
        record.pin_order = 0;
        record.sort_order = UNSORTED;
        record
    }

    async fn add_game(&mut self, candidate: &Value) -> CommandResult<GameRecord> {
        let path = normalize_path(&coerce_string(candidate.get("path")));
        if !is_valid_executable_path(&path, self.tracker.policy()) {
            return Err(CommandError::new(ErrorCode::BlockedPath)
                .with_context("add")
                .with_details(path));
        }
        let record = self.new_record(candidate, self.clock.now_ms());
        let id = record.id;
        self.document.games.push(record);
        self.persist().await;
        info!(game_id = id, "Added game");
        self.document
            .game(id)
            .cloned()
            .ok_or_else(|| CommandError::new(ErrorCode::Unknown).with_context("add"))
    }

    async fn delete_game(&mut self, id: u64) -> CommandResult<GameRecord> {
        let index = self
            .document
            .games
            .iter()
            .position(|game| game.id == id)
            .ok_or_else(|| CommandError::new(ErrorCode::GameNotFound).with_details(id))?;
        self.tracker.forget(&mut self.document, id);
        let removed = self.document.games.remove(index);
        self.persist().await;
        info!(game_id = id, "Deleted game");
        Ok(removed)
    }

    /// Listed ids take positions in the given order; every other game keeps
    /// its relative order after them.
    async fn set_sort_order(&mut self, ordered: &[u64]) -> bool {
        let existing: HashSet<u64> = self.document.games.iter().map(|game| game.id).collect();
        let mut rank: HashMap<u64, usize> = HashMap::new();
        for id in ordered.iter().filter(|id| existing.contains(id)) {
            let next = rank.len();
            rank.entry(*id).or_insert(next);
        }

        let mut rest: Vec<(i64, usize, u64)> = self
            .document
            .games
            .iter()
            .enumerate()
            .filter(|(_, game)| !rank.contains_key(&game.id))
            .map(|(position, game)| (game.sort_order, position, game.id))
            .collect();
        rest.sort_unstable();
        let listed = rank.len();
        for (offset, (_, _, id)) in rest.into_iter().enumerate() {
            rank.insert(id, listed + offset);
        }

        for game in &mut self.document.games {
            if let Some(order) = rank.get(&game.id) {
                game.sort_order = *order as i64;
            }
        }
        self.persist().await
    }

    async fn import_candidates(&mut self, candidates: &[Value]) -> ImportSummary {
        let now = self.clock.now_ms();
        let policy = self.tracker.policy();
        let mut known: HashSet<String> = self
            .document
            .games
            .iter()
            .map(|game| game.path.to_lowercase())
            .collect();

        let mut summary = ImportSummary::default();
        for candidate in candidates {
            let path = normalize_path(&coerce_string(candidate.get("path")));
            if !is_valid_executable_path(&path, policy) || !known.insert(path.to_lowercase()) {
                summary.skipped += 1;
                continue;
            }
            let record = self.new_record(candidate, now);
            self.document.games.push(record);
            summary.added += 1;
        }
        if summary.added > 0 {
            self.persist().await;
        }
        info!(added = summary.added, skipped = summary.skipped, "Imported games");
        summary
    }

    /// Swaps in an imported document. The in-memory copy only changes once
    /// the new document is safely on disk.
    async fn replace_document(&mut self, mut document: AppDocument) -> CommandResult<AppDocument> {
        document.settings.active_sessions = self.document.settings.active_sessions.clone();
        let document = document.resanitized(self.clock.now_ms());
        if !write_document(self.store.clone(), document.clone()).await {
            return Err(CommandError::new(ErrorCode::ImportFail).with_context("save"));
        }
        self.read_only = false;
        let previous_auto_start = self.document.settings.auto_start;
        self.document = document;
        apply_autostart_change(previous_auto_start, self.document.settings.auto_start);
        info!(games = self.document.games.len(), "Replaced library from backup");
        Ok(self.document.clone())
    }

    async fn set_cover(&mut self, id: u64, cover: Option<String>) -> CommandResult<Option<String>> {
        let game = self
            .document
            .game_mut(id)
            .ok_or_else(|| CommandError::new(ErrorCode::GameNotFound).with_details(id))?;
        let previous = std::mem::replace(&mut game.cover_path, cover);
        self.persist().await;
        Ok(previous)
    }

    async fn set_flag(&mut self, flag: SettingFlag, value: bool) -> bool {
        match flag {
            SettingFlag::AlwaysOnTop => self.document.settings.always_on_top = value,
            SettingFlag::AutoStart => {
                let previous = self.document.settings.auto_start;
                self.document.settings.auto_start = value;
                apply_autostart_change(previous, value);
            }
        }
        self.persist().await;
        value
    }
}

/// Saves off the runtime threads. The actor awaits each write, so writes
/// never overlap.
async fn write_document(store: DocumentStore, document: AppDocument) -> bool {
    tokio::task::spawn_blocking(move || store.save(&document))
        .await
        .unwrap_or_else(|err| {
            error!("Save task failed: {err}");
            false
        })
}

fn service_stopped() -> CommandError {
    CommandError::new(ErrorCode::Unknown).with_context("library service stopped")
}

#[derive(Clone)]
pub struct LibraryHandle {
    commands: mpsc::Sender<Command>,
    covers: CoverManager,
    store: DocumentStore,
}

impl LibraryHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> CommandResult<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| service_stopped())?;
        rx.await.map_err(|_| service_stopped())
    }

    pub async fn get_data(&self) -> CommandResult<AppDocument> {
        self.request(|reply| Command::GetData { reply }).await
    }

    pub async fn game(&self, id: u64) -> CommandResult<GameRecord> {
        self.request(|reply| Command::Game { id, reply })
            .await?
            .ok_or_else(|| CommandError::new(ErrorCode::GameNotFound).with_details(id))
    }

    pub async fn save_data(&self, raw: Value) -> bool {
        self.request(|reply| Command::SaveData { raw, reply })
            .await
            .unwrap_or(false)
    }

    pub async fn launch_game(&self, request: Value) -> CommandResult<u32> {
        self.request(|reply| Command::Launch { request, reply })
            .await?
    }

    pub async fn toggle_favorite(&self, id: u64) -> CommandResult<bool> {
        self.request(|reply| Command::ToggleFavorite { id, reply })
            .await?
    }

    pub async fn update_game(&self, patch: Value) -> CommandResult<GameRecord> {
        self.request(|reply| Command::UpdateGame { patch, reply })
            .await?
    }

    pub async fn add_game(&self, candidate: Value) -> CommandResult<GameRecord> {
        self.request(|reply| Command::AddGame { candidate, reply })
            .await?
    }

    pub async fn delete_game(&self, id: u64) -> CommandResult<()> {
        let removed = self
            .request(|reply| Command::DeleteGame { id, reply })
            .await??;
        for path in [removed.cover_path, removed.logo_path].into_iter().flatten() {
            self.covers.remove(&path);
        }
        Ok(())
    }

    pub async fn set_sort_order(&self, ids: Vec<u64>) -> CommandResult<bool> {
        self.request(|reply| Command::SetSortOrder { ids, reply })
            .await
    }

    pub async fn detect_steam_games(&self) -> CommandResult<Vec<SteamCandidate>> {
        let document = self.get_data().await?;
        let known: HashSet<String> = document
            .games
            .iter()
            .map(|game| game.path.to_lowercase())
            .collect();
        tokio::task::spawn_blocking(move || steam::detect_games(&steam::steam_roots(), &known))
            .await
            .map_err(|err| CommandError::new(ErrorCode::SteamDetectFail).with_details(err))
    }

    pub async fn import_steam_games(&self, candidates: Vec<Value>) -> CommandResult<ImportSummary> {
        self.request(|reply| Command::ImportCandidates { candidates, reply })
            .await
    }

    pub fn default_export_path(&self) -> PathBuf {
        let dir = self.store.path().parent().unwrap_or(Path::new("."));
        dir.join(default_export_file_name(Local::now().date_naive()))
    }

    pub async fn export_data(&self, target: Option<PathBuf>) -> CommandResult<PathBuf> {
        let document = self.get_data().await?;
        let target = target.unwrap_or_else(|| self.default_export_path());
        let store = self.store.clone();
        let path = target.clone();
        tokio::task::spawn_blocking(move || store.export_to(&document, &path))
            .await
            .map_err(|err| CommandError::new(ErrorCode::ExportFail).with_details(err))?
            .map_err(|err| {
                CommandError::new(ErrorCode::ExportFail).with_details(format!("{err:#}"))
            })?;
        info!(path = %target.display(), "Exported library");
        Ok(target)
    }

    /// Reads a backup and replaces the library with it. On any failure the
    /// current document stays as it was.
    pub async fn import_data(&self, source: PathBuf) -> CommandResult<AppDocument> {
        let store = self.store.clone();
        let document = tokio::task::spawn_blocking(move || store.import_from(&source))
            .await
            .map_err(|err| CommandError::new(ErrorCode::ImportFail).with_details(err))?
            .map_err(|err| {
                CommandError::new(ErrorCode::ImportFail).with_details(format!("{err:#}"))
            })?;
        self.request(|reply| Command::ReplaceDocument { document, reply })
            .await?
    }

    pub async fn set_custom_cover_file(&self, id: u64, source: &Path) -> CommandResult<String> {
        self.game(id).await?;
        let stored = self.covers.from_file(id, source).await?;
        self.apply_cover(id, stored).await
    }

    pub async fn set_custom_cover_url(&self, id: u64, url: &str) -> CommandResult<String> {
        self.game(id).await?;
        let stored = self.covers.from_url(id, url).await?;
        self.apply_cover(id, stored).await
    }

    async fn apply_cover(&self, id: u64, stored: PathBuf) -> CommandResult<String> {
        let cover = stored.to_string_lossy().to_string();
        let result = self
            .request(|reply| Command::SetCover {
                id,
                cover: Some(cover.clone()),
                reply,
            })
            .await
            .and_then(|inner| inner);
        match result {
            Ok(previous) => {
                if let Some(previous) = previous.filter(|previous| *previous != cover) {
                    self.covers.remove(&previous);
                }
                Ok(cover)
            }
            Err(err) => {
                self.covers.remove(&cover);
                Err(err)
            }
        }
    }

    pub async fn reset_custom_cover(&self, id: u64) -> CommandResult<()> {
        let previous = self
            .request(|reply| Command::SetCover {
                id,
                cover: None,
                reply,
            })
            .await??;
        if let Some(previous) = previous {
            self.covers.remove(&previous);
        }
        Ok(())
    }

    pub async fn set_flag(&self, flag: SettingFlag, value: bool) -> CommandResult<bool> {
        self.request(|reply| Command::SetFlag { flag, value, reply })
            .await
    }

    pub async fn poll_now(&self) -> CommandResult<Vec<FinalizedSession>> {
        self.request(|reply| Command::Poll { reply: Some(reply) })
            .await
    }

    pub async fn shutdown(&self) -> CommandResult<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}
