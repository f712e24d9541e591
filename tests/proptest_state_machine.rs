/// Property-based tests for the supervisor state machine
///
/// These tests drive a supervisor with random sequences of lifecycle
/// operations and change events and verify invariants hold throughout:
/// - Every observed status is reachable through valid transitions
/// - Stop always ends at Stopped, never RestartWanted or Error
/// - A pid is reported only while a process is expected to run
use async_trait::async_trait;
use devsup::network::{Address, Allocate};
use devsup::runner::{OutputEvent, ProcessHandle, RunSpec, Runner};
use devsup::watch::{ManualTrigger, ManualWatcher};
use devsup::{Endpoint, NetworkMapping, Protocol, Status, Supervisor, SupervisorConfig};
use proptest::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Allocator that hands out sequential ports without touching the network.
struct SequentialAllocator {
    next: AtomicU32,
}

impl Allocate for SequentialAllocator {
    fn allocate(
        &self,
        service: &str,
        host: &str,
        endpoints: &[Endpoint],
    ) -> devsup::Result<NetworkMapping> {
        let mut mapping = NetworkMapping::new(service);
        for endpoint in endpoints {
            let port = 51000 + self.next.fetch_add(1, Ordering::SeqCst) as u16;
            mapping.push(endpoint.clone(), vec![Address::new(host, port)]);
        }
        Ok(mapping)
    }
}

/// Runner whose processes live until killed, or until the test crashes them.
#[derive(Default)]
struct FakeRunner {
    next_pid: AtomicU32,
    live: parking_lot::Mutex<Option<watch::Sender<Option<devsup::runner::ExitInfo>>>>,
}

impl FakeRunner {
    fn crash(&self) {
        if let Some(tx) = self.live.lock().take() {
            let _ = tx.send(Some(devsup::runner::ExitInfo {
                code: Some(1),
                signal: None,
            }));
        }
    }
}

#[async_trait]
impl Runner for FakeRunner {
    fn prepare(&self, _spec: &RunSpec) -> devsup::Result<()> {
        Ok(())
    }

    async fn run(&self, _spec: RunSpec) -> devsup::Result<ProcessHandle> {
        self.kill().await?;
        let pid = 10_000 + self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = watch::channel(None);
        *self.live.lock() = Some(tx);
        Ok(ProcessHandle::new(pid, chrono::Utc::now(), rx))
    }

    async fn kill(&self) -> devsup::Result<()> {
        if let Some(tx) = self.live.lock().take() {
            let _ = tx.send(Some(devsup::runner::ExitInfo {
                code: None,
                signal: Some(15),
            }));
        }
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    fn subscribe(&self) -> broadcast::Receiver<OutputEvent> {
        broadcast::channel(1).1
    }

    fn recent_output(&self, _lines: usize) -> Vec<String> {
        Vec::new()
    }
}

/// Operation types for property-based testing
#[derive(Debug, Clone)]
enum Operation {
    Init,
    Configure(bool),
    Start,
    Stop,
    /// A source file changed
    Change(bool),
    /// A change to an excluded path
    ExcludedChange,
    /// The child died on its own
    Crash,
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        Just(Operation::Init),
        prop::bool::ANY.prop_map(Operation::Configure),
        Just(Operation::Start),
        Just(Operation::Stop),
        prop::bool::ANY.prop_map(Operation::Change),
        Just(Operation::ExcludedChange),
        Just(Operation::Crash),
    ]
}

struct Harness {
    supervisor: Supervisor,
    runner: Arc<FakeRunner>,
    trigger: ManualTrigger,
    dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let (watcher, trigger) = ManualWatcher::new();
    let runner = Arc::new(FakeRunner::default());
    let supervisor = Supervisor::builder()
        .config(SupervisorConfig::new("prop", "true"))
        .base_dir(dir.path())
        .allocator(Arc::new(SequentialAllocator {
            next: AtomicU32::new(0),
        }))
        .watcher(Arc::new(watcher))
        .runner(runner.clone())
        .build()
        .expect("Failed to build supervisor");
    Harness {
        supervisor,
        runner,
        trigger,
        dir,
    }
}

/// Let spawned handler and monitor tasks catch up.
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

async fn apply_operation(h: &Harness, op: &Operation) {
    let endpoints = [Endpoint::new("grpc", Protocol::Grpc)];
    match op {
        Operation::Init => {
            let _ = h.supervisor.init(&endpoints, &[]).await;
        }
        Operation::Configure(watch) => {
            let _ = h.supervisor.configure(*watch).await;
        }
        Operation::Start => {
            let _ = h.supervisor.start(&[]).await;
        }
        Operation::Stop => {
            let before = h.supervisor.status();
            h.supervisor.stop().await.expect("stop never fails with a fake runner");
            let after = h.supervisor.status();
            match before {
                Status::Uninitialized => assert_eq!(after, Status::Uninitialized),
                _ => assert_eq!(after, Status::Stopped),
            }
        }
        Operation::Change(idl) => {
            let file = if *idl { "proto/api.proto" } else { "src/handler.go" };
            let before = h.supervisor.status();
            let delivered = h.trigger.touch(h.dir.path().join(file));
            settle().await;
            if delivered && before == Status::Started {
                assert_eq!(h.supervisor.status(), Status::RestartWanted);
            }
        }
        Operation::ExcludedChange => {
            let before = h.supervisor.status();
            assert!(!h.trigger.touch(h.dir.path().join("node_modules/x/index.js")));
            settle().await;
            assert_eq!(h.supervisor.status(), before);
        }
        Operation::Crash => {
            h.runner.crash();
            settle().await;
        }
    }
    settle().await;
}

/// Whether `to` can be reached from `from` through valid transitions.
/// Error details are ignored.
fn reachable(from: &Status, to: &Status) -> bool {
    let normalize = |s: &Status| {
        if s.is_error() {
            Status::Error(String::new())
        } else {
            s.clone()
        }
    };
    let all = [
        Status::Uninitialized,
        Status::Initializing,
        Status::Configuring,
        Status::Started,
        Status::RestartWanted,
        Status::Stopping,
        Status::Stopped,
        Status::Error(String::new()),
    ];
    let target = normalize(to);
    let mut seen = vec![normalize(from)];
    let mut frontier = seen.clone();
    while let Some(status) = frontier.pop() {
        if status == target {
            return true;
        }
        for next in &all {
            if status.is_valid_transition(next) && !seen.contains(next) {
                seen.push(next.clone());
                frontier.push(next.clone());
            }
        }
    }
    false
}

fn check_invariants(previous: &Status, h: &Harness) {
    let information = h.supervisor.information();
    assert!(
        reachable(previous, &information.status),
        "{} is not reachable from {}",
        information.status,
        previous
    );
    assert!(
        !matches!(information.status, Status::Initializing | Status::Stopping),
        "transient status {} observed between operations",
        information.status
    );
    if information.pid.is_some() {
        assert!(
            information.status.is_running(),
            "pid {:?} reported while {}",
            information.pid,
            information.status
        );
    }
    if information.status == Status::RestartWanted {
        assert!(information.restart_reason.is_some());
    }
}

proptest! {
    /// Property test: random operation sequences keep the state machine consistent
    #[test]
    fn test_state_machine_invariants(ops in prop::collection::vec(operation_strategy(), 5..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let h = harness();
            let mut previous = h.supervisor.status();
            for op in &ops {
                apply_operation(&h, op).await;
                check_invariants(&previous, &h);
                previous = h.supervisor.status();
            }
        });
    }

    /// Property test: Stop after anything never leaves RestartWanted behind
    #[test]
    fn test_stop_is_final(ops in prop::collection::vec(operation_strategy(), 1..20)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let h = harness();
            for op in &ops {
                apply_operation(&h, op).await;
            }
            h.supervisor.stop().await.unwrap();
            h.supervisor.stop().await.unwrap();
            let status = h.supervisor.status();
            assert!(
                matches!(status, Status::Uninitialized | Status::Stopped),
                "stop left {}",
                status
            );
            assert!(!h.supervisor.is_watching());
        });
    }
}
