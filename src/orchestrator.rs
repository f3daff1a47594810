// File: ./src/orchestrator.rs
// The refresh pipeline: locate, look up, persist, rebuild triggers.
use crate::clock::{self, Clock};
use crate::error::PrayerError;
use crate::location::LocationProvider;
use crate::model::{Prayer, ScheduleState, School};
use crate::scheduler::{InstallOutcome, TriggerScheduler};
use crate::source::{PrayerTimeSource, TimingsQuery};
use crate::storage::StateStore;
use chrono::{DateTime, NaiveDate, TimeZone};
use std::sync::Arc;

/// What `ensure_current` had to do.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Stored state was missing or stale; a full refresh ran.
    Refreshed(ScheduleState),
    /// State was current but the facility had lost its triggers.
    Reinstalled(ScheduleState),
    UpToDate(ScheduleState),
}

impl SyncOutcome {
    pub fn state(&self) -> &ScheduleState {
        match self {
            SyncOutcome::Refreshed(s) | SyncOutcome::Reinstalled(s) | SyncOutcome::UpToDate(s) => s,
        }
    }

    /// True when the call changed persisted state or installed triggers.
    pub fn did_work(&self) -> bool {
        !matches!(self, SyncOutcome::UpToDate(_))
    }
}

/// A schedule needs refreshing when it was computed for any other local date.
pub fn is_stale(state: &ScheduleState, today: NaiveDate) -> bool {
    state.schedule_date != today
}

/// The next prayer at or after `now` (device-local wall clock).
pub fn upcoming<T: TimeZone>(state: &ScheduleState, now: &DateTime<T>) -> (Prayer, DateTime<T>) {
    let mut best: Option<(Prayer, DateTime<T>)> = None;
    for (prayer, at) in state.times.iter() {
        let instant = if clock::is_same_minute(at, now) {
            now.clone()
        } else {
            clock::next_occurrence(at, now)
        };
        if best.as_ref().is_none_or(|(_, b)| instant < *b) {
            best = Some((prayer, instant));
        }
    }
    // PrayerTimes always holds five entries.
    best.unwrap_or_else(|| (Prayer::Fajr, clock::next_occurrence(state.times.get(Prayer::Fajr), now)))
}

pub struct RefreshOrchestrator {
    location: Arc<dyn LocationProvider>,
    source: Arc<dyn PrayerTimeSource>,
    store: StateStore,
    scheduler: Arc<TriggerScheduler>,
    clock: Arc<dyn Clock>,
}

impl RefreshOrchestrator {
    pub fn new(
        location: Arc<dyn LocationProvider>,
        source: Arc<dyn PrayerTimeSource>,
        store: StateStore,
        scheduler: Arc<TriggerScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            location,
            source,
            store,
            scheduler,
            clock,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<TriggerScheduler> {
        &self.scheduler
    }

    fn today(&self) -> NaiveDate {
        clock::local_date(&self.clock.now())
    }

    /// Unconditional refresh. Nothing is written or cancelled unless the
    /// lookup succeeded.
    pub async fn refresh(&self, method: u32, school: School) -> Result<ScheduleState, PrayerError> {
        let fix = self.location.current_fix().await?;
        let date = self.today();
        log::info!(
            "Refreshing prayer times for {} at {:.4},{:.4}",
            clock::format_date(date),
            fix.latitude,
            fix.longitude
        );

        let timings = self
            .source
            .fetch_times(&TimingsQuery {
                latitude: fix.latitude,
                longitude: fix.longitude,
                method,
                school,
                date,
            })
            .await?;

        let state = ScheduleState::new(date, fix, method, school, timings.times, timings.timezone);
        self.store.save(&state).await?;

        if self.scheduler.reschedule(&state).await? == InstallOutcome::Busy {
            log::warn!("Another refresh is installing triggers; this one only updated the schedule");
        }
        Ok(state)
    }

    /// Brings stored state and installed triggers up to date for today.
    ///
    /// Missing state uses `default_method`/`default_school`; otherwise the
    /// stored method and school are kept.
    pub async fn ensure_current(
        &self,
        default_method: u32,
        default_school: School,
    ) -> Result<SyncOutcome, PrayerError> {
        let today = self.today();
        let stored = self.store.load().await?;

        let current = match stored {
            Some(state) if !is_stale(&state, today) => state,
            Some(state) => {
                log::info!(
                    "Stored schedule is for {}, today is {}",
                    state.schedule_date,
                    today
                );
                let fresh = self
                    .refresh(state.calculation_method, state.jurisprudence_school)
                    .await?;
                return Ok(SyncOutcome::Refreshed(fresh));
            }
            None => {
                log::info!("No stored schedule; refreshing");
                let fresh = self.refresh(default_method, default_school).await?;
                return Ok(SyncOutcome::Refreshed(fresh));
            }
        };

        let installed = self.scheduler.backend().list_installed().await?;
        if installed.iter().any(|t| t.is_recurring()) {
            log::debug!("Schedule for {} is current", today);
            return Ok(SyncOutcome::UpToDate(current));
        }

        log::info!("No prayer triggers installed; reinstalling today's schedule");
        self.scheduler.reschedule(&current).await?;
        Ok(SyncOutcome::Reinstalled(current))
    }

    /// Removes every prayer notification. Stored state is kept.
    pub async fn clear(&self) -> Result<(), PrayerError> {
        self.scheduler.cancel_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::testing::{
        CountingLocation, FailingStore, FixedClock, RecordingNotifier, ScriptedSource, sample_state,
    };
    use std::time::Duration;

    struct Harness {
        location: Arc<CountingLocation>,
        source: Arc<ScriptedSource>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<FixedClock>,
        orchestrator: RefreshOrchestrator,
    }

    fn harness(location: CountingLocation, source: ScriptedSource, now: &str) -> Harness {
        let location = Arc::new(location);
        let source = Arc::new(source);
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(FixedClock::at(now));
        let scheduler = Arc::new(TriggerScheduler::new(
            notifier.clone(),
            clock.clone(),
            Duration::ZERO,
            600,
        ));
        let orchestrator = RefreshOrchestrator::new(
            location.clone(),
            source.clone(),
            StateStore::new(Arc::new(MemoryStore::new())),
            scheduler,
            clock.clone(),
        );
        Harness {
            location,
            source,
            notifier,
            clock,
            orchestrator,
        }
    }

    fn jakarta(now: &str) -> Harness {
        harness(CountingLocation::at(-6.2, 106.8), ScriptedSource::jakarta(), now)
    }

    #[test]
    fn test_is_stale() {
        let state = sample_state("2025-03-14");
        assert!(!is_stale(&state, "2025-03-14".parse().unwrap()));
        assert!(is_stale(&state, "2025-03-15".parse().unwrap()));
        assert!(is_stale(&state, "2025-03-13".parse().unwrap()));
    }

    #[test]
    fn test_upcoming_picks_next_prayer() {
        let state = sample_state("2025-03-14");
        let now = DateTime::parse_from_rfc3339("2025-03-14T12:00:00+07:00").unwrap();
        let (prayer, at) = upcoming(&state, &now);
        assert_eq!(prayer, Prayer::Asr);
        assert_eq!(at.to_rfc3339(), "2025-03-14T15:14:00+07:00");

        let late = DateTime::parse_from_rfc3339("2025-03-14T22:00:00+07:00").unwrap();
        let (prayer, at) = upcoming(&state, &late);
        assert_eq!(prayer, Prayer::Fajr);
        assert_eq!(at.to_rfc3339(), "2025-03-15T04:31:00+07:00");
    }

    #[tokio::test]
    async fn test_refresh_persists_and_installs() {
        let h = jakarta("2025-03-14T09:00:00+07:00");
        let state = h.orchestrator.refresh(20, School::Shafi).await.unwrap();

        assert_eq!(state.schedule_date, "2025-03-14".parse::<NaiveDate>().unwrap());
        assert_eq!(h.notifier.recurring().len(), 5);
        assert_eq!(h.orchestrator.store().load().await.unwrap(), Some(state));

        let query = h.source.last_query().unwrap();
        assert_eq!(query.method, 20);
        assert_eq!(query.date, "2025-03-14".parse::<NaiveDate>().unwrap());
    }

    #[tokio::test]
    async fn test_refresh_uses_local_date_not_utc() {
        // 00:30 in Jakarta is still the previous day in UTC.
        let h = jakarta("2025-03-15T00:30:00+07:00");
        let state = h.orchestrator.refresh(20, School::Shafi).await.unwrap();
        assert_eq!(state.schedule_date, "2025-03-15".parse::<NaiveDate>().unwrap());
    }

    #[tokio::test]
    async fn test_refresh_twice_keeps_five_triggers() {
        let h = jakarta("2025-03-14T09:00:00+07:00");
        h.orchestrator.refresh(20, School::Shafi).await.unwrap();
        h.orchestrator.refresh(20, School::Shafi).await.unwrap();
        assert_eq!(h.notifier.recurring().len(), 5);
    }

    #[tokio::test]
    async fn test_failed_lookup_changes_nothing() {
        let h = harness(
            CountingLocation::at(-6.2, 106.8),
            ScriptedSource::new(|_| Err(PrayerError::SourceUnavailable("HTTP 500".to_string()))),
            "2025-03-14T09:00:00+07:00",
        );
        let err = h.orchestrator.refresh(20, School::Shafi).await.unwrap_err();

        assert!(matches!(err, PrayerError::SourceUnavailable(_)));
        assert_eq!(h.orchestrator.store().load().await.unwrap(), None);
        assert_eq!(h.notifier.cancel_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_save_aborts_before_cancelling() {
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(FixedClock::at("2025-03-14T09:00:00+07:00"));
        let store = Arc::new(FailingStore::new());
        let orchestrator = RefreshOrchestrator::new(
            Arc::new(CountingLocation::at(-6.2, 106.8)),
            Arc::new(ScriptedSource::jakarta()),
            StateStore::new(store.clone()),
            Arc::new(TriggerScheduler::new(
                notifier.clone(),
                clock.clone(),
                Duration::ZERO,
                600,
            )),
            clock,
        );

        let err = orchestrator.refresh(20, School::Shafi).await.unwrap_err();

        assert!(matches!(err, PrayerError::Persistence(_)));
        assert_eq!(store.writes(), 1);
        assert_eq!(notifier.cancel_calls(), 0);
        assert!(notifier.installed().is_empty());
    }

    #[tokio::test]
    async fn test_location_denied_is_surfaced() {
        let h = harness(
            CountingLocation::denied(),
            ScriptedSource::jakarta(),
            "2025-03-14T09:00:00+07:00",
        );
        let err = h.orchestrator.refresh(20, School::Shafi).await.unwrap_err();
        assert!(err.needs_user_action());
        assert_eq!(h.source.calls(), 0);
    }

    #[tokio::test]
    async fn test_ensure_current_without_state_refreshes_with_defaults() {
        let h = jakarta("2025-03-14T09:00:00+07:00");
        let outcome = h.orchestrator.ensure_current(3, School::Hanafi).await.unwrap();

        assert!(matches!(outcome, SyncOutcome::Refreshed(_)));
        assert_eq!(outcome.state().calculation_method, 3);
        assert_eq!(outcome.state().jurisprudence_school, School::Hanafi);
    }

    #[tokio::test]
    async fn test_ensure_current_keeps_stored_method() {
        let h = jakarta("2025-03-14T09:00:00+07:00");
        h.orchestrator.store().save(&sample_state("2025-03-13")).await.unwrap();

        let outcome = h.orchestrator.ensure_current(3, School::Hanafi).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Refreshed(_)));
        assert_eq!(h.source.last_query().unwrap().method, 20);
    }

    #[tokio::test]
    async fn test_ensure_current_reinstalls_purged_triggers() {
        let h = jakarta("2025-03-14T09:00:00+07:00");
        h.orchestrator.refresh(20, School::Shafi).await.unwrap();
        h.notifier.purge();

        let outcome = h.orchestrator.ensure_current(2, School::Shafi).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Reinstalled(_)));
        assert_eq!(h.notifier.recurring().len(), 5);
        assert_eq!(h.location.calls(), 1);
        assert_eq!(h.source.calls(), 1);
    }

    #[tokio::test]
    async fn test_ensure_current_is_noop_when_current() {
        let h = jakarta("2025-03-14T09:00:00+07:00");
        h.orchestrator.refresh(20, School::Shafi).await.unwrap();

        let outcome = h.orchestrator.ensure_current(2, School::Shafi).await.unwrap();
        assert!(!outcome.did_work());
        assert_eq!(h.source.calls(), 1);
    }

    #[tokio::test]
    async fn test_day_change_triggers_refresh() {
        let h = jakarta("2025-03-14T23:59:00+07:00");
        h.orchestrator.refresh(20, School::Shafi).await.unwrap();

        h.clock.set("2025-03-15T00:01:00+07:00");
        let outcome = h.orchestrator.ensure_current(2, School::Shafi).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Refreshed(_)));
        assert_eq!(
            outcome.state().schedule_date,
            "2025-03-15".parse::<NaiveDate>().unwrap()
        );
    }

    #[tokio::test]
    async fn test_clear_keeps_state() {
        let h = jakarta("2025-03-14T09:00:00+07:00");
        h.orchestrator.refresh(20, School::Shafi).await.unwrap();
        h.orchestrator.clear().await.unwrap();

        assert!(h.notifier.installed().is_empty());
        assert!(h.orchestrator.store().load().await.unwrap().is_some());
    }
}
