#![allow(dead_code)]

use std::{
    collections::HashSet,
    fs, io,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use gamedock::clock::ManualClock;
use gamedock::covers::CoverManager;
use gamedock::monitor::{LaunchPlan, LivenessProbe, SpawnedGame, Spawner};
use gamedock::paths::normalize_path;
use gamedock::service::{LibraryHandle, ServiceBuilder};
use gamedock::storage::{DocumentStore, DATA_FILE_NAME};
use serde_json::Value;
use tempfile::TempDir;
use tokio::task::JoinHandle;

pub const T0: i64 = 1_700_000_000_000;

/// Pids the fake OS considers running.
#[derive(Clone, Default)]
pub struct Processes(Arc<Mutex<HashSet<u32>>>);

impl Processes {
    pub fn kill(&self, pid: u32) {
        self.0.lock().unwrap().remove(&pid);
    }

    pub fn is_running(&self, pid: u32) -> bool {
        self.0.lock().unwrap().contains(&pid)
    }
}

pub struct FakeSpawner {
    processes: Processes,
    next_pid: u32,
    fail_with: Option<io::ErrorKind>,
    pub launched: Arc<Mutex<Vec<LaunchPlan>>>,
}

impl Spawner for FakeSpawner {
    fn spawn(&mut self, plan: &LaunchPlan) -> io::Result<SpawnedGame> {
        if let Some(kind) = self.fail_with {
            return Err(io::Error::new(kind, "spawn refused"));
        }
        self.next_pid += 1;
        self.processes.0.lock().unwrap().insert(self.next_pid);
        self.launched.lock().unwrap().push(plan.clone());
        Ok(SpawnedGame {
            pid: self.next_pid,
            child: None,
        })
    }
}

pub struct FakeProbe(Processes);

impl LivenessProbe for FakeProbe {
    fn is_alive(&mut self, pid: u32) -> bool {
        self.0.is_running(pid)
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub exe: String,
    pub clock: Arc<ManualClock>,
    pub processes: Processes,
    pub launched: Arc<Mutex<Vec<LaunchPlan>>>,
    pub fail_spawn_with: Option<io::ErrorKind>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let exe_path = dir.path().join("games").join("game.exe");
        fs::create_dir_all(exe_path.parent().unwrap()).unwrap();
        fs::write(&exe_path, b"stub").unwrap();
        Self {
            exe: normalize_path(&exe_path.to_string_lossy()),
            dir,
            clock: Arc::new(ManualClock::new(T0)),
            processes: Processes::default(),
            launched: Arc::default(),
            fail_spawn_with: None,
        }
    }

    pub fn data_file(&self) -> PathBuf {
        self.dir.path().join(DATA_FILE_NAME)
    }

    pub fn seed(&self, document: Value) {
        fs::write(self.data_file(), document.to_string()).unwrap();
    }

    pub fn on_disk(&self) -> Value {
        serde_json::from_slice(&fs::read(self.data_file()).unwrap()).unwrap()
    }

    pub fn store(&self) -> DocumentStore {
        DocumentStore::new(self.dir.path()).unwrap()
    }

    pub fn start(&self) -> (LibraryHandle, JoinHandle<()>) {
        let covers = CoverManager::new(self.dir.path(), Duration::from_secs(2)).unwrap();
        ServiceBuilder::new(self.store(), covers)
            .poll_interval(Duration::from_secs(3600))
            .spawner(FakeSpawner {
                processes: self.processes.clone(),
                next_pid: 1000,
                fail_with: self.fail_spawn_with,
                launched: self.launched.clone(),
            })
            .probe(FakeProbe(self.processes.clone()))
            .clock(self.clock.clone())
            .start()
    }
}
