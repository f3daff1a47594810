// File: ./src/scheduler.rs
//! Turns a schedule into notification triggers.
//!
//! Policy: one recurring trigger per prayer at the device-local wall clock.
//! The lookup's time zone is only used to detect (and log) a device/lookup
//! offset mismatch; scheduling always follows the device clock. Because a
//! recurring trigger installed during its own minute first fires on the next
//! day, installs in that minute also get an immediate one-shot.
use crate::clock::{self, Clock};
use crate::config::Config;
use crate::error::PrayerError;
use crate::model::{ClockTime, Prayer, ScheduleState};
use crate::notify::{
    CategorySpec, ChannelSpec, NotificationBackend, NotificationContent, PRAYER_CATEGORY_ID,
    PRAYER_CHANNEL_ID, PermissionStatus,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Delay used for the same-minute catch-up notification.
pub const CATCH_UP_DELAY_SECS: u64 = 1;

/// Identity used to de-duplicate installs within one process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TriggerIdentity {
    pub timezone: String,
    pub prayer: Prayer,
    pub clock: ClockTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyInstall {
    Installed { caught_up: bool },
    AlreadyInstalled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed { new: usize, caught_up: usize },
    /// Another install was in flight; this call did nothing.
    Busy,
}

struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct TriggerScheduler {
    backend: Arc<dyn NotificationBackend>,
    clock: Arc<dyn Clock>,
    installed: Mutex<HashSet<TriggerIdentity>>,
    in_flight: AtomicBool,
    settle_delay: Duration,
    channel: ChannelSpec,
    category: CategorySpec,
}

impl TriggerScheduler {
    pub fn new(
        backend: Arc<dyn NotificationBackend>,
        clock: Arc<dyn Clock>,
        settle_delay: Duration,
        remind_later_secs: u64,
    ) -> Self {
        Self {
            backend,
            clock,
            installed: Mutex::new(HashSet::new()),
            in_flight: AtomicBool::new(false),
            settle_delay,
            channel: ChannelSpec::prayer_channel(),
            category: CategorySpec::prayer_actions(remind_later_secs),
        }
    }

    pub fn from_config(
        backend: Arc<dyn NotificationBackend>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        Self::new(
            backend,
            clock,
            Duration::from_millis(config.cancel_settle_ms),
            config.remind_later_secs,
        )
    }

    pub fn backend(&self) -> &Arc<dyn NotificationBackend> {
        &self.backend
    }

    fn content_for(prayer: Prayer, at: ClockTime) -> NotificationContent {
        NotificationContent {
            title: format!("{} prayer", prayer),
            body: format!("It is time for {} ({}).", prayer, at),
            channel_id: PRAYER_CHANNEL_ID.to_string(),
            category_id: Some(PRAYER_CATEGORY_ID.to_string()),
        }
    }

    /// Installs the daily trigger for one prayer unless this exact
    /// (timezone, prayer, time) was already installed since the last cancel.
    pub async fn install_daily(
        &self,
        prayer: Prayer,
        at: ClockTime,
        timezone: &str,
    ) -> Result<DailyInstall, PrayerError> {
        let identity = TriggerIdentity {
            timezone: timezone.to_string(),
            prayer,
            clock: at,
        };

        let mut installed = self.installed.lock().await;
        if installed.contains(&identity) {
            log::debug!("{} at {} ({}) already installed", prayer, at, timezone);
            return Ok(DailyInstall::AlreadyInstalled);
        }

        let content = Self::content_for(prayer, at);
        self.backend
            .install_recurring_daily(at.hour(), at.minute(), content.clone())
            .await?;
        installed.insert(identity);

        let now = self.clock.now();
        let caught_up = clock::is_same_minute(at, &now);
        if caught_up {
            log::info!("{} is due this minute; notifying now", prayer);
            self.backend
                .install_one_shot(CATCH_UP_DELAY_SECS, content)
                .await?;
        }

        log::debug!("Installed daily trigger for {} at {}", prayer, at);
        Ok(DailyInstall::Installed { caught_up })
    }

    /// Cancels every trigger and forgets what was installed.
    ///
    /// Returns only after the settle delay, so installs that follow see a
    /// clean facility.
    pub async fn cancel_all(&self) -> Result<(), PrayerError> {
        let mut installed = self.installed.lock().await;
        self.backend.cancel_all().await?;
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        installed.clear();
        log::info!("Cancelled all prayer notifications");
        Ok(())
    }

    /// Installs all five triggers for `state`. Single-flight: a call made
    /// while another is running returns `Busy` immediately.
    pub async fn install_all(&self, state: &ScheduleState) -> Result<InstallOutcome, PrayerError> {
        let Some(_guard) = self.try_begin() else {
            log::info!("Trigger install already in progress; skipping");
            return Ok(InstallOutcome::Busy);
        };
        self.install_all_inner(state).await
    }

    /// Cancel-then-install as one single-flight unit.
    pub async fn reschedule(&self, state: &ScheduleState) -> Result<InstallOutcome, PrayerError> {
        let Some(_guard) = self.try_begin() else {
            log::info!("Trigger install already in progress; skipping reschedule");
            return Ok(InstallOutcome::Busy);
        };
        self.cancel_all().await?;
        self.install_all_inner(state).await
    }

    fn try_begin(&self) -> Option<FlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard(&self.in_flight))
    }

    async fn install_all_inner(
        &self,
        state: &ScheduleState,
    ) -> Result<InstallOutcome, PrayerError> {
        if self.backend.request_permission().await? == PermissionStatus::Denied {
            return Err(PrayerError::PermissionDenied(
                "notification permission refused".to_string(),
            ));
        }
        self.backend.ensure_channel(&self.channel).await?;
        self.backend.ensure_category(&self.category).await?;

        let now = self.clock.now();
        match clock::timezone_offset_mismatch(&state.timezone, &now) {
            Ok(None) => {}
            Ok(Some((device, lookup))) => log::warn!(
                "Device offset {} differs from {} ({}); notifications follow device time",
                device,
                state.timezone,
                lookup
            ),
            Err(e) => log::warn!("Cannot compare time zones: {}", e),
        }

        let mut new = 0;
        let mut caught_up = 0;
        for (prayer, at) in state.times.iter() {
            if let DailyInstall::Installed { caught_up: c } =
                self.install_daily(prayer, at, &state.timezone).await?
            {
                new += 1;
                if c {
                    caught_up += 1;
                }
            }
        }

        log::info!(
            "Prayer notifications for {} installed ({} new)",
            state.schedule_date,
            new
        );
        Ok(InstallOutcome::Installed { new, caught_up })
    }
}
