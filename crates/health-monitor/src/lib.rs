//! Process memory/idle guard.
//!
//! Mirrors the "memory guard" half of the source system's lifecycle sweeper:
//! a periodic task that probes process RSS and system memory, and triggers a
//! graceful self-restart when the process is both idle and under pressure.
//! In a statically linked binary there is no interpreter memory to reclaim
//! (the source repeatedly forced its interpreter to drop large optional
//! libraries); only the restart-on-threshold behavior survives the port.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, System};

/// Shared activity counters the host process updates as work starts and
/// finishes. The guard only ever reads these; it never claims or releases
/// in-flight work itself.
#[derive(Debug, Default)]
pub struct ActivityProbe {
    in_flight: AtomicUsize,
    last_activity_unix: AtomicI64,
}

impl ActivityProbe {
    pub fn new() -> Arc<Self> {
        let probe = Self::default();
        probe.last_activity_unix.store(now_unix(), Ordering::Relaxed);
        Arc::new(probe)
    }

    /// Call when a new in-flight download/extraction/conversion begins.
    pub fn mark_busy(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.touch();
    }

    /// Call when an in-flight operation completes (success or failure).
    pub fn mark_idle_one(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.touch();
    }

    /// Record activity without changing the in-flight count (e.g. a cache hit).
    pub fn touch(&self) {
        self.last_activity_unix.store(now_unix(), Ordering::Relaxed);
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) == 0
    }

    pub fn idle_for(&self) -> Duration {
        let last = self.last_activity_unix.load(Ordering::Relaxed);
        let elapsed = (now_unix() - last).max(0);
        Duration::from_secs(elapsed as u64)
    }
}

fn now_unix() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Tunables for the memory guard. Defaults match the source system's
/// constants exactly (§4.J of the specification).
#[derive(Debug, Clone)]
pub struct MemoryGuardConfig {
    /// Grace period after process launch before the guard starts evaluating.
    pub warmup: Duration,
    /// How often the guard re-probes memory and activity.
    pub check_interval: Duration,
    /// Idle duration (with an empty in-flight registry) that alone justifies a restart.
    pub idle_restart_after: Duration,
    /// Process RSS threshold (MB) that justifies a restart while idle.
    pub process_mem_limit_mb: u64,
    /// System memory usage percentage that justifies a restart while idle.
    pub system_mem_pct_limit: f32,
    /// Minimum time between restarts, persisted across process boundaries via `cooldown_marker`.
    pub cooldown: Duration,
    /// Path to a small marker file recording the last restart's timestamp.
    pub cooldown_marker: PathBuf,
}

impl Default for MemoryGuardConfig {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(5 * 60),
            check_interval: Duration::from_secs(60),
            idle_restart_after: Duration::from_secs(10 * 60),
            process_mem_limit_mb: 150,
            system_mem_pct_limit: 85.0,
            cooldown: Duration::from_secs(30 * 60),
            cooldown_marker: PathBuf::from(".doradura-restart-marker"),
        }
    }
}

/// Why the guard decided to trigger a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    IdleTooLong,
    ProcessMemoryPressure,
    SystemMemoryPressure,
}

/// Spawn the memory guard as a background task. Returns a `JoinHandle` that
/// resolves with the triggering reason once the guard decides to restart;
/// the caller is expected to exit the process gracefully (return from
/// `main`) on receipt, relying on an external supervisor to relaunch it.
pub fn spawn(activity: Arc<ActivityProbe>, config: MemoryGuardConfig) -> tokio::task::JoinHandle<RestartReason> {
    tokio::spawn(async move {
        tokio::time::sleep(config.warmup).await;

        if in_cooldown(&config) {
            tracing::info!(
                "memory guard: skipping checks, still within {}s cooldown window",
                config.cooldown.as_secs()
            );
            tokio::time::sleep(config.cooldown).await;
        }

        let pid = Pid::from_u32(std::process::id());
        let mut sys = System::new();
        let mut ticker = tokio::time::interval(config.check_interval);

        loop {
            ticker.tick().await;
            sys.refresh_memory();
            sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);

            let idle = activity.is_idle();
            let idle_for = activity.idle_for();

            if let Some(reason) = evaluate(&sys, pid, idle, idle_for, &config) {
                tracing::warn!(?reason, idle_for_secs = idle_for.as_secs(), "memory guard triggering restart");
                record_restart(&config);
                return reason;
            }
        }
    })
}

fn evaluate(
    sys: &System,
    pid: Pid,
    idle: bool,
    idle_for: Duration,
    config: &MemoryGuardConfig,
) -> Option<RestartReason> {
    if !idle {
        return None;
    }

    if idle_for >= config.idle_restart_after {
        return Some(RestartReason::IdleTooLong);
    }

    if let Some(process) = sys.process(pid) {
        let rss_mb = process.memory() / (1024 * 1024);
        if rss_mb > config.process_mem_limit_mb {
            return Some(RestartReason::ProcessMemoryPressure);
        }
    }

    let total = sys.total_memory();
    if total > 0 {
        let used_pct = (sys.used_memory() as f64 / total as f64) * 100.0;
        if used_pct as f32 > config.system_mem_pct_limit {
            return Some(RestartReason::SystemMemoryPressure);
        }
    }

    None
}

fn in_cooldown(config: &MemoryGuardConfig) -> bool {
    last_restart_unix(&config.cooldown_marker)
        .map(|last| now_unix() - last < config.cooldown.as_secs() as i64)
        .unwrap_or(false)
}

fn last_restart_unix(marker: &Path) -> Option<i64> {
    std::fs::read_to_string(marker).ok()?.trim().parse().ok()
}

fn record_restart(config: &MemoryGuardConfig) {
    if let Err(e) = std::fs::write(&config.cooldown_marker, now_unix().to_string()) {
        tracing::debug!("failed to persist restart marker: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_probe_starts_idle() {
        let probe = ActivityProbe::new();
        assert!(probe.is_idle());
    }

    #[test]
    fn mark_busy_then_idle_one_restores_idle() {
        let probe = ActivityProbe::new();
        probe.mark_busy();
        assert!(!probe.is_idle());
        probe.mark_idle_one();
        assert!(probe.is_idle());
    }

    #[test]
    fn idle_for_grows_from_touch() {
        let probe = ActivityProbe::new();
        probe.touch();
        assert!(probe.idle_for() < Duration::from_secs(2));
    }

    #[test]
    fn evaluate_ignores_busy_process() {
        let sys = System::new();
        let config = MemoryGuardConfig::default();
        let pid = Pid::from_u32(std::process::id());
        let result = evaluate(&sys, pid, false, Duration::from_secs(10_000), &config);
        assert_eq!(result, None);
    }

    #[test]
    fn evaluate_triggers_on_idle_timeout() {
        let sys = System::new();
        let config = MemoryGuardConfig {
            idle_restart_after: Duration::from_secs(60),
            process_mem_limit_mb: u64::MAX,
            system_mem_pct_limit: 100.0,
            ..Default::default()
        };
        let pid = Pid::from_u32(std::process::id());
        let result = evaluate(&sys, pid, true, Duration::from_secs(61), &config);
        assert_eq!(result, Some(RestartReason::IdleTooLong));
    }

    #[tokio::test]
    async fn cooldown_marker_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let config = MemoryGuardConfig {
            cooldown_marker: marker.clone(),
            cooldown: Duration::from_secs(1800),
            ..Default::default()
        };
        assert!(!in_cooldown(&config));
        record_restart(&config);
        assert!(in_cooldown(&config));
    }
}
