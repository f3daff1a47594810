// File: ./src/background.rs
//! Periodic background refresh.
//!
//! The host decides when (or whether) a registered task runs. Correctness
//! never depends on it: the foreground path calls the same
//! `ensure_current` on every start.
use crate::error::PrayerError;
use crate::model::School;
use crate::orchestrator::{RefreshOrchestrator, SyncOutcome};
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const DAILY_REFRESH_TASK: &str = "waqt-daily-refresh";

/// Result code reported back to the host scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundFetchResult {
    NewData,
    NoData,
    Failed,
}

pub struct BackgroundTask {
    orchestrator: Arc<RefreshOrchestrator>,
    default_method: u32,
    default_school: School,
}

impl BackgroundTask {
    pub fn new(
        orchestrator: Arc<RefreshOrchestrator>,
        default_method: u32,
        default_school: School,
    ) -> Self {
        Self {
            orchestrator,
            default_method,
            default_school,
        }
    }

    /// One background run. Never fails and never panics outward.
    pub async fn run_once(&self) -> BackgroundFetchResult {
        let run = self
            .orchestrator
            .ensure_current(self.default_method, self.default_school);

        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(SyncOutcome::UpToDate(_))) => BackgroundFetchResult::NoData,
            Ok(Ok(outcome)) => {
                log::info!(
                    "Background refresh updated schedule for {}",
                    outcome.state().schedule_date
                );
                BackgroundFetchResult::NewData
            }
            Ok(Err(e)) => {
                log::error!("Background refresh failed: {}", e);
                BackgroundFetchResult::Failed
            }
            Err(_) => {
                log::error!("Background refresh panicked");
                BackgroundFetchResult::Failed
            }
        }
    }
}

/// Host facility that runs named tasks periodically.
#[async_trait]
pub trait BackgroundHost: Send + Sync {
    async fn is_registered(&self, name: &str) -> bool;

    /// `min_interval` is a hint; hosts may run the task less often.
    async fn register(
        &self,
        name: &str,
        min_interval: Duration,
        task: Arc<BackgroundTask>,
    ) -> Result<(), PrayerError>;
}

/// Registers the daily refresh unless the host already has it.
/// Returns `true` when a new registration was made.
pub async fn register_background_task(
    host: &dyn BackgroundHost,
    task: Arc<BackgroundTask>,
    min_interval: Duration,
) -> Result<bool, PrayerError> {
    if host.is_registered(DAILY_REFRESH_TASK).await {
        log::debug!("{} already registered", DAILY_REFRESH_TASK);
        return Ok(false);
    }
    host.register(DAILY_REFRESH_TASK, min_interval, task).await?;
    log::info!(
        "Registered {} every {} min",
        DAILY_REFRESH_TASK,
        min_interval.as_secs() / 60
    );
    Ok(true)
}

/// Runs registered tasks on a tokio interval for as long as it lives.
#[derive(Default)]
pub struct IntervalHost {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl IntervalHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn shutdown(&self) {
        for (name, handle) in self.tasks.lock().await.drain() {
            log::debug!("Stopping background task {}", name);
            handle.abort();
        }
    }
}

impl Drop for IntervalHost {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.get_mut().drain() {
            handle.abort();
        }
    }
}

#[async_trait]
impl BackgroundHost for IntervalHost {
    async fn is_registered(&self, name: &str) -> bool {
        self.tasks.lock().await.contains_key(name)
    }

    async fn register(
        &self,
        name: &str,
        min_interval: Duration,
        task: Arc<BackgroundTask>,
    ) -> Result<(), PrayerError> {
        if min_interval.is_zero() {
            return Err(PrayerError::Config(
                "background interval must be positive".to_string(),
            ));
        }

        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(min_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; startup already synced.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let result = task.run_once().await;
                log::debug!("{} finished: {:?}", task_name, result);
            }
        });

        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.insert(name.to_string(), handle) {
            previous.abort();
        }
        Ok(())
    }
}
