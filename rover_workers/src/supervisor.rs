//! The worker registry, I/O pumps, and health monitor.
//!
//! Each registered worker is spawned with piped stdio. A reader task
//! parses NDJSON stdout lines into envelopes and forwards them to the
//! tick loop's event channel; health and lifecycle-started messages
//! refresh the heartbeat. A monitor task checks heartbeats at 1 Hz and
//! restarts stale workers with linearly growing backoff until the
//! restart cap, after which the worker stays dead and is reported.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use rover_common::config::{WorkerSpec, WorkersConfig};
use rover_common::envelope::{Envelope, SeqCounter};
use rover_common::messages::{
    SRC_CORE, SUFFIX_LIFECYCLE_STARTED, SUFFIX_STATUS_HEALTH, SYSTEM_LIFECYCLE_SHUTDOWN,
};
use rover_common::time::mono_ns;

use crate::audio::{cleanup_stale_sockets, AudioSocketPaths};
use crate::stderr::StderrForwarder;

/// One inbound worker message: `(worker_name, envelope)`.
pub type WorkerEvent = (String, Envelope);

/// Telemetry view of one worker.
#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub name: String,
    pub alive: bool,
    pub restart_count: u32,
    pub last_seq: u64,
    pub last_heartbeat_ms: f64,
    pub pid: Option<u32>,
    pub health: Map<String, Value>,
}

/// Cross-task worker metadata; the hot fields are atomics so the reader
/// tasks never take the registry lock.
struct WorkerShared {
    name: String,
    alive: AtomicBool,
    starting: AtomicBool,
    last_heartbeat_ns: AtomicU64,
    restart_count: AtomicU32,
    last_seq: AtomicU64,
    pid: AtomicU32,
    last_health: Mutex<Map<String, Value>>,
}

impl WorkerShared {
    fn new(name: String) -> Self {
        Self {
            name,
            alive: AtomicBool::new(false),
            starting: AtomicBool::new(false),
            last_heartbeat_ns: AtomicU64::new(0),
            restart_count: AtomicU32::new(0),
            last_seq: AtomicU64::new(0),
            pid: AtomicU32::new(0),
            last_health: Mutex::new(Map::new()),
        }
    }
}

struct WorkerEntry {
    spec: WorkerSpec,
    shared: Arc<WorkerShared>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

/// Launch, monitor, and restart worker processes.
pub struct WorkerSupervisor {
    config: WorkersConfig,
    entries: tokio::sync::Mutex<HashMap<String, WorkerEntry>>,
    shared: Vec<Arc<WorkerShared>>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    seq: Mutex<SeqCounter>,
    running: Arc<AtomicBool>,
    sockets: AudioSocketPaths,
}

impl WorkerSupervisor {
    pub fn new(config: WorkersConfig, events: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        let mut entries = HashMap::new();
        let mut shared = Vec::new();
        for spec in &config.workers {
            let s = Arc::new(WorkerShared::new(spec.name.clone()));
            shared.push(s.clone());
            entries.insert(
                spec.name.clone(),
                WorkerEntry { spec: spec.clone(), shared: s, child: None, stdin: None },
            );
        }
        Self {
            config,
            entries: tokio::sync::Mutex::new(entries),
            shared,
            events,
            seq: Mutex::new(SeqCounter::new()),
            running: Arc::new(AtomicBool::new(false)),
            sockets: AudioSocketPaths::for_current_process(),
        }
    }

    pub fn audio_sockets(&self) -> &AudioSocketPaths {
        &self.sockets
    }

    /// Launch all registered workers.
    pub async fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        cleanup_stale_sockets(std::path::Path::new("/tmp"));

        let names: Vec<String> = {
            let entries = self.entries.lock().await;
            entries.keys().cloned().collect()
        };
        for name in names {
            self.launch(&name).await;
        }

        let supervisor = self.clone();
        tokio::spawn(async move {
            supervisor.heartbeat_monitor().await;
        });
    }

    /// Gracefully shut down all workers: shutdown envelope, 3 s grace,
    /// then SIGKILL, then socket unlink.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        let names: Vec<String> = {
            let entries = self.entries.lock().await;
            entries.keys().cloned().collect()
        };

        for name in &names {
            let env = self.make_envelope(SYSTEM_LIFECYCLE_SHUTDOWN, None);
            let _ = self.write_to(name, &env).await;
        }

        let mut entries = self.entries.lock().await;
        for entry in entries.values_mut() {
            if let Some(child) = entry.child.as_mut() {
                match tokio::time::timeout(Duration::from_secs(3), child.wait()).await {
                    Ok(_) => {}
                    Err(_) => {
                        warn!("killing {} (did not exit in 3s)", entry.spec.name);
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                    }
                }
            }
            entry.child = None;
            entry.stdin = None;
            entry.shared.alive.store(false, Ordering::SeqCst);
        }
        drop(entries);

        self.sockets.unlink();
    }

    /// Send one NDJSON message to a worker's stdin.
    pub async fn send_to(
        &self,
        worker: &str,
        msg_type: &str,
        payload: Option<Map<String, Value>>,
    ) -> bool {
        let env = self.make_envelope(msg_type, payload);
        self.write_to(worker, &env).await
    }

    /// Same as [`send_to`], carrying a session id header.
    pub async fn send_to_session(
        &self,
        worker: &str,
        msg_type: &str,
        payload: Option<Map<String, Value>>,
        session_id: &str,
    ) -> bool {
        let mut env = self.make_envelope(msg_type, payload);
        env.session_id = Some(session_id.to_string());
        self.write_to(worker, &env).await
    }

    pub fn worker_alive(&self, name: &str) -> bool {
        self.shared
            .iter()
            .find(|s| s.name == name)
            .is_some_and(|s| s.alive.load(Ordering::SeqCst))
    }

    /// Debug snapshot of all workers.
    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        self.shared
            .iter()
            .map(|s| WorkerSnapshot {
                name: s.name.clone(),
                alive: s.alive.load(Ordering::SeqCst),
                restart_count: s.restart_count.load(Ordering::SeqCst),
                last_seq: s.last_seq.load(Ordering::SeqCst),
                last_heartbeat_ms: s.last_heartbeat_ns.load(Ordering::SeqCst) as f64 / 1e6,
                pid: match s.pid.load(Ordering::SeqCst) {
                    0 => None,
                    pid => Some(pid),
                },
                health: s.last_health.lock().clone(),
            })
            .collect()
    }

    // ── Internal ─────────────────────────────────────────────────

    fn make_envelope(&self, msg_type: &str, payload: Option<Map<String, Value>>) -> Envelope {
        let seq = self.seq.lock().next();
        let mut env = Envelope::new(msg_type, SRC_CORE, seq, mono_ns());
        if let Some(payload) = payload {
            env.payload = payload;
        }
        env
    }

    async fn write_to(&self, worker: &str, env: &Envelope) -> bool {
        let line = env.to_line();
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(worker) else { return false };
        let Some(stdin) = entry.stdin.as_mut() else { return false };
        match stdin.write_all(&line).await {
            Ok(()) => stdin.flush().await.is_ok(),
            Err(e) => {
                warn!("send_to {} failed: {}", worker, e);
                false
            }
        }
    }

    /// Spawn one worker subprocess and its I/O pumps.
    async fn launch(self: &Arc<Self>, name: &str) {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(name) else { return };
        let shared = entry.shared.clone();
        shared.starting.store(true, Ordering::SeqCst);

        let spawned = Command::new(&entry.spec.command)
            .args(&entry.spec.args)
            .env("ROVER_MIC_SOCKET", &self.sockets.mic)
            .env("ROVER_SPK_SOCKET", &self.sockets.spk)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                error!("failed to launch {}: {}", name, e);
                shared.alive.store(false, Ordering::SeqCst);
                shared.starting.store(false, Ordering::SeqCst);
                return;
            }
        };

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let pid = child.id().unwrap_or(0);

        shared.pid.store(pid, Ordering::SeqCst);
        shared.alive.store(true, Ordering::SeqCst);
        shared.last_heartbeat_ns.store(mono_ns(), Ordering::SeqCst);

        if let Some(stdout) = stdout {
            let shared = shared.clone();
            let events = self.events.clone();
            tokio::spawn(async move {
                read_loop(shared, events, stdout).await;
            });
        }
        if let Some(stderr) = stderr {
            let worker = name.to_string();
            tokio::spawn(async move {
                stderr_loop(worker, stderr).await;
            });
        }

        entry.child = Some(child);
        entry.stdin = stdin;
        shared.starting.store(false, Ordering::SeqCst);
        info!("launched {} (pid={}, command={})", name, pid, entry.spec.command);
    }

    /// Check worker heartbeats every second, restart stale workers.
    async fn heartbeat_monitor(self: Arc<Self>) {
        let timeout_ns = (self.config.heartbeat_timeout_s * 1e9) as u64;
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while self.running.load(Ordering::SeqCst) {
            interval.tick().await;
            let now = mono_ns();

            for shared in &self.shared {
                if shared.starting.load(Ordering::SeqCst) {
                    continue;
                }
                let launched = shared.pid.load(Ordering::SeqCst) != 0;
                let exhausted =
                    shared.restart_count.load(Ordering::SeqCst) >= self.config.max_restarts;

                if shared.alive.load(Ordering::SeqCst) {
                    let age_ns =
                        now.saturating_sub(shared.last_heartbeat_ns.load(Ordering::SeqCst));
                    if age_ns > timeout_ns {
                        warn!(
                            "{} heartbeat stale ({} ms), restarting",
                            shared.name,
                            age_ns / 1_000_000
                        );
                        self.restart(&shared.name.clone()).await;
                    }
                } else if launched && !exhausted {
                    warn!("{} exited, restarting", shared.name);
                    self.restart(&shared.name.clone()).await;
                }
            }
        }
    }

    /// Kill and relaunch a worker with linear backoff.
    async fn restart(self: &Arc<Self>, name: &str) {
        let (restart_count, shared) = {
            let mut entries = self.entries.lock().await;
            let Some(entry) = entries.get_mut(name) else { return };
            let shared = entry.shared.clone();

            if shared.restart_count.load(Ordering::SeqCst) >= self.config.max_restarts {
                error!(
                    "{} exceeded max restarts ({}), giving up",
                    name, self.config.max_restarts
                );
                shared.alive.store(false, Ordering::SeqCst);
                return;
            }

            if let Some(child) = entry.child.as_mut() {
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
            entry.child = None;
            entry.stdin = None;

            let count = shared.restart_count.fetch_add(1, Ordering::SeqCst) + 1;
            shared.alive.store(false, Ordering::SeqCst);
            shared.starting.store(true, Ordering::SeqCst);
            (count, shared)
        };

        let backoff = (self.config.restart_backoff_min_s * f64::from(restart_count))
            .min(self.config.restart_backoff_max_s);
        info!(
            "restarting {} in {:.1}s (attempt {}/{})",
            name, backoff, restart_count, self.config.max_restarts
        );
        tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
        shared.starting.store(false, Ordering::SeqCst);

        if self.running.load(Ordering::SeqCst) {
            self.launch(name).await;
        }
    }
}

/// Read NDJSON lines from worker stdout and dispatch envelopes.
async fn read_loop(
    shared: Arc<WorkerShared>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    stdout: tokio::process::ChildStdout,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let env = match Envelope::from_line(&line) {
                    Ok(env) => env,
                    Err(e) => {
                        warn!("{} bad NDJSON: {}", shared.name, e);
                        continue;
                    }
                };
                shared.last_seq.store(env.seq, Ordering::SeqCst);

                if env.msg_type.ends_with(SUFFIX_STATUS_HEALTH) {
                    shared.last_heartbeat_ns.store(mono_ns(), Ordering::SeqCst);
                    if !env.payload.is_empty() {
                        *shared.last_health.lock() = env.payload.clone();
                    }
                } else if env.msg_type.ends_with(SUFFIX_LIFECYCLE_STARTED) {
                    shared.last_heartbeat_ns.store(mono_ns(), Ordering::SeqCst);
                }

                if events.send((shared.name.clone(), env)).is_err() {
                    return; // tick loop gone, shutting down
                }
            }
            Ok(None) => break, // EOF, process exited
            Err(e) => {
                warn!("{} reader error: {}", shared.name, e);
                break;
            }
        }
    }
    shared.alive.store(false, Ordering::SeqCst);
    info!("{} stdout closed", shared.name);
}

/// Forward worker stderr into the supervisor log.
async fn stderr_loop(worker: String, stderr: tokio::process::ChildStderr) {
    let mut forwarder = StderrForwarder::new(worker);
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        forwarder.forward(&line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_common::config::WorkerSpec;

    fn config_with(workers: Vec<WorkerSpec>) -> WorkersConfig {
        WorkersConfig { workers, ..Default::default() }
    }

    fn echo_worker(name: &str) -> WorkerSpec {
        // `cat` echoes stdin to stdout and exits cleanly on EOF.
        WorkerSpec { name: name.into(), command: "cat".into(), args: vec![] }
    }

    #[tokio::test]
    async fn spawn_and_snapshot() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let sup = Arc::new(WorkerSupervisor::new(config_with(vec![echo_worker("echo")]), tx));
        sup.start().await;

        assert!(sup.worker_alive("echo"));
        let snaps = sup.snapshot();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].name, "echo");
        assert!(snaps[0].alive);
        assert!(snaps[0].pid.is_some());

        sup.stop().await;
        assert!(!sup.worker_alive("echo"));
    }

    #[tokio::test]
    async fn send_to_reaches_worker_and_echoes_back() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sup = Arc::new(WorkerSupervisor::new(config_with(vec![echo_worker("echo")]), tx));
        sup.start().await;

        // cat reflects our envelope; the reader parses it back.
        let mut payload = Map::new();
        payload.insert("k".into(), Value::from(1));
        assert!(sup.send_to("echo", "test.status.health", Some(payload)).await);

        let (name, env) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(name, "echo");
        assert_eq!(env.msg_type, "test.status.health");
        assert_eq!(env.i64_field("k", 0), 1);

        // The echoed health message refreshed the heartbeat payload.
        let snaps = sup.snapshot();
        assert_eq!(snaps[0].health.get("k"), Some(&Value::from(1)));

        sup.stop().await;
    }

    #[tokio::test]
    async fn send_to_unknown_worker_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let sup = Arc::new(WorkerSupervisor::new(config_with(vec![]), tx));
        assert!(!sup.send_to("ghost", "x.y.z", None).await);
    }

    #[tokio::test]
    async fn dead_worker_detected_by_eof() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let spec = WorkerSpec { name: "true".into(), command: "true".into(), args: vec![] };
        let sup = Arc::new(WorkerSupervisor::new(config_with(vec![spec]), tx));
        sup.start().await;

        // `true` exits immediately; the reader sees EOF and marks it dead.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!sup.worker_alive("true"));
        sup.stop().await;
    }

    #[tokio::test]
    async fn failed_spawn_reported_dead() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let spec = WorkerSpec {
            name: "missing".into(),
            command: "/nonexistent/worker-binary".into(),
            args: vec![],
        };
        let sup = Arc::new(WorkerSupervisor::new(config_with(vec![spec]), tx));
        sup.start().await;
        assert!(!sup.worker_alive("missing"));
        sup.stop().await;
    }
}
