//! Periodic removal of expired role assignments.
//!
//! Resolution already ignores expired assignments, so a late or failed sweep
//! never grants access. The sweeper only reclaims rows, emits the `Expired`
//! notifications and drops cached permission sets of the affected users.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use uniauth_auth::{AccessResolver, UserDirectory};
use uniauth_core::{DomainResult, UserId};

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Thread name, also used in log fields.
    pub name: String,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            name: "assignment-expiry-sweeper".to_string(),
        }
    }
}

impl SweeperConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Runtime statistics of a spawned sweeper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweeperStats {
    pub runs: u64,
    pub failures: u64,
    pub assignments_swept: u64,
    pub uptime_secs: u64,
}

/// Result of a single sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub assignments_swept: usize,
    pub users_affected: BTreeSet<UserId>,
}

/// Handle to control a running sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<SweeperStats>>,
}

impl SweeperHandle {
    /// Stops the sweeper and waits for the current sweep to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> SweeperStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

pub struct ExpirySweeper {
    directory: Arc<UserDirectory>,
    resolver: Arc<AccessResolver>,
}

impl ExpirySweeper {
    pub fn new(directory: Arc<UserDirectory>, resolver: Arc<AccessResolver>) -> Self {
        Self { directory, resolver }
    }

    /// Runs one sweep synchronously.
    pub fn sweep_once(&self, now: DateTime<Utc>) -> DomainResult<SweepOutcome> {
        let swept = self.directory.sweep_expired(now)?;
        let users_affected: BTreeSet<UserId> = swept.iter().map(|a| a.user_id).collect();
        for user_id in &users_affected {
            self.resolver.invalidate(*user_id);
        }
        Ok(SweepOutcome {
            assignments_swept: swept.len(),
            users_affected,
        })
    }

    /// Spawns the sweeper on a dedicated thread. The first sweep runs
    /// immediately.
    pub fn spawn(self, config: SweeperConfig) -> std::io::Result<SweeperHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(SweeperStats::default()));
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || sweeper_loop(self, config, shutdown_rx, stats_clone))?;

        Ok(SweeperHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn sweeper_loop(
    sweeper: ExpirySweeper,
    config: SweeperConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<SweeperStats>>,
) {
    info!(sweeper = %config.name, interval_ms = config.interval.as_millis() as u64, "expiry sweeper started");
    let start_time = Instant::now();

    loop {
        let result = sweeper.sweep_once(Utc::now());

        {
            let mut s = stats.lock().unwrap_or_else(PoisonError::into_inner);
            s.runs += 1;
            s.uptime_secs = start_time.elapsed().as_secs();
            match &result {
                Ok(outcome) => s.assignments_swept += outcome.assignments_swept as u64,
                Err(_) => s.failures += 1,
            }
        }

        match result {
            Ok(outcome) => debug!(
                sweeper = %config.name,
                swept = outcome.assignments_swept,
                users = outcome.users_affected.len(),
                "sweep finished"
            ),
            Err(e) => error!(sweeper = %config.name, error = %e, "sweep failed"),
        }

        match shutdown_rx.recv_timeout(config.interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(sweeper = %config.name, "expiry sweeper stopped");
}
