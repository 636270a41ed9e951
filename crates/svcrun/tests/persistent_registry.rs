//! Persisted registry shared by separate host processes
//!
//! Each writer is this test binary re-run as a child process, registering
//! services through its own `PersistentRegistry`. Nothing coordinates the
//! processes, so their read-modify-write cycles race on the file.

use std::path::Path;
use std::process::{Child, Command};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use svcrun::runtime::PersistentRegistry;

const WRITES_PER_PROCESS: usize = 100;
const MAX_ROUNDS: usize = 20;

const ENV_PATH: &str = "SVCRUN_WRITER_PATH";
const ENV_PREFIX: &str = "SVCRUN_WRITER_PREFIX";
const ENV_PID: &str = "SVCRUN_WRITER_PID";
const ENV_START_MS: &str = "SVCRUN_WRITER_START_MS";

fn now_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis()
}

/// Body of a writer process; does nothing when run as a normal test
#[test]
fn registry_writer() {
    let Ok(path) = std::env::var(ENV_PATH) else {
        return;
    };
    let prefix = std::env::var(ENV_PREFIX).unwrap();
    let pid: u32 = std::env::var(ENV_PID).unwrap().parse().unwrap();
    let start: u128 = std::env::var(ENV_START_MS).unwrap().parse().unwrap();

    // Line both writers up so their cycles overlap
    while now_ms() < start {
        std::thread::sleep(Duration::from_millis(1));
    }

    let registry = PersistentRegistry::at(path);
    for i in 0..WRITES_PER_PROCESS {
        // A torn read of the other writer's output is part of the race
        if let Err(e) = registry.register(&format!("{prefix}-{i}"), pid) {
            eprintln!("register failed: {e}");
        }
    }
}

fn spawn_writer(path: &Path, prefix: &str, start: u128) -> Child {
    Command::new(std::env::current_exe().unwrap())
        .args(["registry_writer", "--exact", "--nocapture", "--test-threads=1"])
        .env(ENV_PATH, path)
        .env(ENV_PREFIX, prefix)
        .env(ENV_PID, std::process::id().to_string())
        .env(ENV_START_MS, start.to_string())
        .spawn()
        .unwrap()
}

#[test]
fn test_concurrent_processes_can_lose_updates() {
    let dir = tempfile::tempdir().unwrap();

    for round in 0..MAX_ROUNDS {
        let path = dir.path().join(format!("registry-{round}.json"));
        let start = now_ms() + 300;

        let mut writers = [
            spawn_writer(&path, "a", start),
            spawn_writer(&path, "b", start),
        ];
        for writer in &mut writers {
            assert!(writer.wait().unwrap().success());
        }

        // Every name is distinct, so a consistent store would hold all of them
        match PersistentRegistry::at(&path).get_all_services() {
            Ok(services) if services.len() == 2 * WRITES_PER_PROCESS => continue,
            Ok(services) => {
                assert!(services.len() < 2 * WRITES_PER_PROCESS);
                return;
            }
            // Overlapping whole-file writes can also leave a torn file
            Err(_) => return,
        }
    }

    panic!("two unsynchronized writers never lost an update in {MAX_ROUNDS} rounds");
}

#[test]
fn test_sequential_processes_keep_every_update() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry.json");

    for prefix in ["a", "b"] {
        assert!(spawn_writer(&path, prefix, 0).wait().unwrap().success());
    }

    let services = PersistentRegistry::at(&path).get_all_services().unwrap();
    assert_eq!(services.len(), 2 * WRITES_PER_PROCESS);
    assert_eq!(services["b-7"].process_id, std::process::id());
}
