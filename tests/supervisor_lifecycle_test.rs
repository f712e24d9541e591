//! End-to-end lifecycle tests against real child processes.
//!
//! File changes are injected through `ManualWatcher` so these tests do not
//! depend on filesystem notification timing; see `watch_test.rs` for the
//! real watcher.

use devsup::runner::OutputStream;
use devsup::watch::{ManualTrigger, ManualWatcher};
use devsup::{Endpoint, Error, Protocol, Status, Supervisor, SupervisorConfig};
use nix::sys::signal;
use nix::unistd::Pid;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn is_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

fn endpoints() -> Vec<Endpoint> {
    vec![
        Endpoint::new("grpc", Protocol::Grpc),
        Endpoint::new("http", Protocol::Http).public(),
    ]
}

fn shell_config(script: &str) -> SupervisorConfig {
    let mut config = SupervisorConfig::new("billing", "sh");
    config.args = vec!["-c".to_string(), script.to_string()];
    config.grace_period = Some("2s".to_string());
    config
}

fn supervisor(dir: &TempDir, config: SupervisorConfig) -> (Supervisor, ManualTrigger) {
    let (watcher, trigger) = ManualWatcher::new();
    let supervisor = Supervisor::builder()
        .config(config)
        .base_dir(dir.path())
        .watcher(Arc::new(watcher))
        .build()
        .expect("Failed to build supervisor");
    (supervisor, trigger)
}

async fn wait_for_status<F>(supervisor: &Supervisor, predicate: F) -> Status
where
    F: Fn(&Status) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = supervisor.status();
            if predicate(&status) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out; status is {}", supervisor.status()))
}

#[tokio::test]
async fn test_full_lifecycle_scenario() {
    let dir = TempDir::new().unwrap();
    let (supervisor, trigger) = supervisor(
        &dir,
        shell_config("echo \"GRPC=$GRPC_ADDRESS HTTP=$HTTP_ADDRESS\"; exec sleep 30"),
    );

    // Init: two distinct ports on localhost
    let mapping = supervisor.init(&endpoints(), &[]).await.unwrap();
    assert_eq!(supervisor.status(), Status::Configuring);
    let grpc = mapping.address("grpc").unwrap().clone();
    let http = mapping.address("http").unwrap().clone();
    assert_eq!(grpc.host, "localhost");
    assert_eq!(http.host, "localhost");
    assert_ne!(grpc.port, http.port);

    assert_eq!(supervisor.configure(true).await.unwrap(), Status::Configuring);

    // Start: the child sees its addresses
    let mut output = supervisor.subscribe_output();
    let first = supervisor.start(&[]).await.unwrap();
    assert_eq!(supervisor.status(), Status::Started);
    assert!(is_alive(first.pid));

    let line = tokio::time::timeout(Duration::from_secs(5), output.recv())
        .await
        .expect("child printed nothing")
        .unwrap();
    assert_eq!(line.stream, OutputStream::Stdout);
    assert_eq!(line.line, format!("GRPC={} HTTP={}", grpc, http));

    let env_file = std::fs::read_to_string(dir.path().join(".env.local")).unwrap();
    assert!(env_file.contains(&format!("GRPC_ADDRESS={}", grpc)));
    assert!(env_file.contains(&format!("HTTP_ADDRESS={}", http)));

    // A non-IDL change asks for a restart but does not restart
    assert!(trigger.touch(dir.path().join("src/handler.go")));
    wait_for_status(&supervisor, |s| *s == Status::RestartWanted).await;
    assert!(is_alive(first.pid));
    let information = supervisor.information();
    assert_eq!(information.pid, Some(first.pid));
    assert_eq!(
        information.restart_reason,
        Some(dir.path().join("src/handler.go"))
    );

    // Orchestrator-driven Stop then Start
    supervisor.stop().await.unwrap();
    assert_eq!(supervisor.status(), Status::Stopped);
    assert!(first.has_exited());
    assert!(!is_alive(first.pid));

    let second = supervisor.start(&[]).await.unwrap();
    assert_eq!(supervisor.status(), Status::Started);
    assert_ne!(second.pid, first.pid);
    assert_eq!(supervisor.network_mapping(), Some(mapping));
    assert_eq!(supervisor.information().restart_reason, None);

    supervisor.stop().await.unwrap();
    assert!(!is_alive(second.pid));
}

#[tokio::test]
async fn test_start_twice_leaves_one_process() {
    let dir = TempDir::new().unwrap();
    let (supervisor, _) = supervisor(&dir, shell_config("exec sleep 30"));
    supervisor.init(&endpoints(), &[]).await.unwrap();

    let first = supervisor.start(&[]).await.unwrap();
    let second = supervisor.start(&[]).await.unwrap();

    assert!(first.has_exited());
    assert!(!is_alive(first.pid));
    assert!(is_alive(second.pid));
    // Replacing the process is not a crash
    assert_eq!(supervisor.status(), Status::Started);
    assert_eq!(supervisor.information().pid, Some(second.pid));

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let (supervisor, _) = supervisor(&dir, shell_config("exec sleep 30"));

    supervisor.stop().await.unwrap();
    assert_eq!(supervisor.status(), Status::Uninitialized);

    supervisor.init(&endpoints(), &[]).await.unwrap();
    supervisor.stop().await.unwrap();
    assert_eq!(supervisor.status(), Status::Stopped);
    supervisor.stop().await.unwrap();
    assert_eq!(supervisor.status(), Status::Stopped);
}

#[tokio::test]
async fn test_stubborn_child_is_force_killed() {
    let dir = TempDir::new().unwrap();
    let mut config = shell_config("trap '' TERM; echo armed; while true; do sleep 1; done");
    config.grace_period = Some("300ms".to_string());
    let (supervisor, _) = supervisor(&dir, config);
    supervisor.init(&[], &[]).await.unwrap();

    let mut output = supervisor.subscribe_output();
    let handle = supervisor.start(&[]).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), output.recv())
        .await
        .unwrap()
        .unwrap();

    supervisor.stop().await.unwrap();
    assert_eq!(supervisor.status(), Status::Stopped);
    assert!(!is_alive(handle.pid));
}

#[tokio::test]
async fn test_crash_is_surfaced_as_error() {
    let dir = TempDir::new().unwrap();
    let (supervisor, _) = supervisor(&dir, shell_config("echo dying >&2; sleep 0.2; exit 3"));
    let mapping = supervisor.init(&endpoints(), &[]).await.unwrap();

    let handle = supervisor.start(&[]).await.unwrap();
    let status = wait_for_status(&supervisor, Status::is_error).await;
    assert_eq!(
        status,
        Status::Error(format!("process {} exited: exit code 3", handle.pid))
    );
    assert_eq!(supervisor.information().pid, None);
    assert!(supervisor.recent_output(5).contains(&"[stderr] dying".to_string()));

    // Error ends the cycle: Start is refused until a fresh Init
    assert!(matches!(
        supervisor.start(&[]).await,
        Err(Error::Usage { .. })
    ));
    let retried = supervisor.init(&endpoints(), &[]).await.unwrap();
    assert_eq!(retried, mapping);
    assert_eq!(supervisor.status(), Status::Configuring);
}

#[tokio::test]
async fn test_stop_after_crash_ends_stopped() {
    let dir = TempDir::new().unwrap();
    let (supervisor, _) = supervisor(&dir, shell_config("exit 3"));
    let mapping = supervisor.init(&endpoints(), &[]).await.unwrap();

    let handle = supervisor.start(&[]).await.unwrap();
    wait_for_status(&supervisor, Status::is_error).await;

    supervisor.stop().await.unwrap();
    assert_eq!(supervisor.status(), Status::Stopped);
    let information = supervisor.information();
    assert_eq!(
        information.last_error,
        Some(format!("process {} exited: exit code 3", handle.pid))
    );

    // The failed cycle still needs a fresh Init before the next Start
    assert!(matches!(
        supervisor.start(&[]).await,
        Err(Error::Usage { .. })
    ));
    assert_eq!(supervisor.init(&endpoints(), &[]).await.unwrap(), mapping);
    assert_eq!(supervisor.information().last_error, None);
    supervisor.start(&[]).await.unwrap();
    supervisor.stop().await.unwrap();
    assert_eq!(supervisor.status(), Status::Stopped);
}

#[tokio::test]
async fn test_spawn_failure_moves_to_error() {
    let dir = TempDir::new().unwrap();
    let (supervisor, _) = supervisor(
        &dir,
        SupervisorConfig::new("broken", "definitely-not-a-real-binary-devsup"),
    );
    supervisor.init(&[], &[]).await.unwrap();
    // Configure only warns about the missing binary
    supervisor.configure(false).await.unwrap();

    let err = supervisor.start(&[]).await.unwrap_err();
    assert!(matches!(err, Error::SpawnFailed { .. }));
    assert!(supervisor.status().is_error());
    assert_eq!(supervisor.information().pid, None);
}

#[tokio::test]
async fn test_dependency_and_static_variables_reach_child() {
    let dir = TempDir::new().unwrap();
    // Private dependency endpoints are not exported
    let mut config = shell_config(
        "echo \"$USERS_HTTP_ADDRESS|${USERS_GRPC_ADDRESS:-none}|$LOG_LEVEL\"; exec sleep 30",
    );
    config
        .environment
        .insert("LOG_LEVEL".to_string(), "debug".to_string());
    let (supervisor, _) = supervisor(&dir, config);
    supervisor.init(&endpoints(), &[]).await.unwrap();

    let mut users = devsup::NetworkMapping::new("users");
    users.push(
        Endpoint::new("grpc", Protocol::Grpc),
        vec![devsup::network::Address::new("localhost", 52000)],
    );
    users.push(
        Endpoint::new("http", Protocol::Http).public(),
        vec![devsup::network::Address::new("localhost", 52001)],
    );

    let mut output = supervisor.subscribe_output();
    supervisor.start(&[users]).await.unwrap();
    let line = tokio::time::timeout(Duration::from_secs(5), output.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line.line, "localhost:52001|none|debug");

    supervisor.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_information_is_never_torn() {
    let dir = TempDir::new().unwrap();
    let (supervisor, trigger) = supervisor(&dir, shell_config("exec sleep 30"));
    let supervisor = Arc::new(supervisor);

    let poller = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move {
            let mut seen = 0usize;
            for _ in 0..2_000 {
                let information = supervisor.information();
                // Every snapshot is a whole, named state
                assert!(!information.status.name().is_empty());
                if information.status == Status::RestartWanted {
                    assert!(information.restart_reason.is_some());
                }
                seen += 1;
                tokio::task::yield_now().await;
            }
            seen
        })
    };

    supervisor.init(&endpoints(), &[]).await.unwrap();
    supervisor.configure(true).await.unwrap();
    for _ in 0..3 {
        supervisor.start(&[]).await.unwrap();
        trigger.touch(dir.path().join("src/lib.rs"));
        supervisor.stop().await.unwrap();
        assert_eq!(supervisor.status(), Status::Stopped);
    }

    assert_eq!(poller.await.unwrap(), 2_000);
}
