// File: ./src/testing.rs
//! In-memory collaborators for exercising the pipeline without a device.
//!
//! Every fake yields to the runtime once per call so that concurrent
//! invocations interleave the way real I/O would.
use crate::clock::{self, Clock, SystemClock};
use crate::error::PrayerError;
use crate::location::LocationProvider;
use crate::model::{ClockTime, Coordinates, PrayerTimes, ScheduleState, School};
use crate::notify::{
    CategorySpec, ChannelSpec, InstalledTrigger, NotificationBackend, NotificationContent,
    PermissionStatus, TriggerKind,
};
use crate::source::{PrayerTimeSource, Timings, TimingsQuery};
use crate::storage::KeyValueStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use chrono_tz::Tz;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

pub const SAMPLE_TIMES: [&str; 5] = ["04:31", "11:52", "15:14", "17:49", "19:02"];

pub fn sample_times() -> PrayerTimes {
    let mut raw = SAMPLE_TIMES.iter();
    PrayerTimes::try_from_fn(|_| {
        raw.next()
            .ok_or_else(|| PrayerError::Format("exhausted".to_string()))?
            .parse::<ClockTime>()
    })
    .expect("sample times are valid")
}

/// A Jakarta schedule for `date` (`YYYY-MM-DD`).
pub fn sample_state(date: &str) -> ScheduleState {
    ScheduleState::new(
        date.parse().expect("sample date"),
        Coordinates {
            latitude: -6.2,
            longitude: 106.8,
        },
        20,
        School::Shafi,
        sample_times(),
        "Asia/Jakarta".to_string(),
    )
}

/// A clock that only moves when told to.
///
/// Without a zone the device is assumed to keep the offset of the instant it
/// was given; with one, offsets follow that zone's DST rules.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<FixedOffset>>,
    zone: Option<Tz>,
}

impl FixedClock {
    /// `rfc3339` such as `2025-03-14T10:00:00+07:00`.
    pub fn at(rfc3339: &str) -> Self {
        Self {
            now: Mutex::new(DateTime::parse_from_rfc3339(rfc3339).expect("valid rfc3339")),
            zone: None,
        }
    }

    /// A device in `zone`; `rfc3339` may carry any offset.
    pub fn in_zone(rfc3339: &str, zone: Tz) -> Self {
        let clock = Self {
            now: Mutex::new(DateTime::parse_from_rfc3339(rfc3339).expect("valid rfc3339")),
            zone: Some(zone),
        };
        clock.set(rfc3339);
        clock
    }

    pub fn set(&self, rfc3339: &str) {
        let instant = DateTime::parse_from_rfc3339(rfc3339).expect("valid rfc3339");
        *self.now.lock().unwrap() = match self.zone {
            Some(zone) => instant.with_timezone(&zone).fixed_offset(),
            None => instant,
        };
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        *self.now.lock().unwrap()
    }

    fn next_wall_clock(&self, at: ClockTime, after: DateTime<Utc>) -> DateTime<Utc> {
        match self.zone {
            Some(zone) => clock::next_occurrence(at, &after.with_timezone(&zone)).with_timezone(&Utc),
            None => {
                let offset = *self.now().offset();
                clock::next_occurrence(at, &after.with_timezone(&offset)).with_timezone(&Utc)
            }
        }
    }
}

#[derive(Default)]
struct NotifierLog {
    installed: Vec<InstalledTrigger>,
    channels: Vec<ChannelSpec>,
    categories: Vec<CategorySpec>,
    cancel_calls: usize,
    permission_requests: usize,
}

/// Notification backend that records every call.
pub struct RecordingNotifier {
    log: Mutex<NotifierLog>,
    permission: Mutex<PermissionStatus>,
    next_id: AtomicUsize,
    clock: Arc<dyn Clock>,
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// One-shot fire times are computed from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            log: Mutex::new(NotifierLog::default()),
            permission: Mutex::new(PermissionStatus::Granted),
            next_id: AtomicUsize::new(1),
            clock,
        }
    }

    pub fn deny_permission(&self) {
        *self.permission.lock().unwrap() = PermissionStatus::Denied;
    }

    pub fn grant_permission(&self) {
        *self.permission.lock().unwrap() = PermissionStatus::Granted;
    }

    pub fn installed(&self) -> Vec<InstalledTrigger> {
        self.log.lock().unwrap().installed.clone()
    }

    pub fn recurring(&self) -> Vec<InstalledTrigger> {
        self.installed()
            .into_iter()
            .filter(|t| t.is_recurring())
            .collect()
    }

    pub fn one_shots(&self) -> Vec<InstalledTrigger> {
        self.installed()
            .into_iter()
            .filter(|t| !t.is_recurring())
            .collect()
    }

    pub fn cancel_calls(&self) -> usize {
        self.log.lock().unwrap().cancel_calls
    }

    pub fn permission_requests(&self) -> usize {
        self.log.lock().unwrap().permission_requests
    }

    pub fn channels(&self) -> Vec<ChannelSpec> {
        self.log.lock().unwrap().channels.clone()
    }

    pub fn categories(&self) -> Vec<CategorySpec> {
        self.log.lock().unwrap().categories.clone()
    }

    /// Simulates the OS dropping every trigger behind our back.
    pub fn purge(&self) {
        self.log.lock().unwrap().installed.clear();
    }

    fn record(&self, kind: TriggerKind, content: NotificationContent) -> String {
        let id = format!("t{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.log.lock().unwrap().installed.push(InstalledTrigger {
            id: id.clone(),
            kind,
            content,
        });
        id
    }
}

#[async_trait]
impl NotificationBackend for RecordingNotifier {
    async fn request_permission(&self) -> Result<PermissionStatus, PrayerError> {
        tokio::task::yield_now().await;
        self.log.lock().unwrap().permission_requests += 1;
        Ok(*self.permission.lock().unwrap())
    }

    async fn ensure_channel(&self, spec: &ChannelSpec) -> Result<(), PrayerError> {
        tokio::task::yield_now().await;
        let mut log = self.log.lock().unwrap();
        if !log.channels.iter().any(|c| c.id == spec.id) {
            log.channels.push(spec.clone());
        }
        Ok(())
    }

    async fn ensure_category(&self, spec: &CategorySpec) -> Result<(), PrayerError> {
        tokio::task::yield_now().await;
        let mut log = self.log.lock().unwrap();
        log.categories.retain(|c| c.id != spec.id);
        log.categories.push(spec.clone());
        Ok(())
    }

    async fn install_recurring_daily(
        &self,
        hour: u8,
        minute: u8,
        content: NotificationContent,
    ) -> Result<String, PrayerError> {
        tokio::task::yield_now().await;
        Ok(self.record(TriggerKind::DailyAt { hour, minute }, content))
    }

    async fn install_one_shot(
        &self,
        delay_secs: u64,
        content: NotificationContent,
    ) -> Result<String, PrayerError> {
        tokio::task::yield_now().await;
        let fire_at = self.clock.now().with_timezone(&Utc) + Duration::seconds(delay_secs as i64);
        Ok(self.record(TriggerKind::OneShot { fire_at }, content))
    }

    async fn cancel_all(&self) -> Result<(), PrayerError> {
        tokio::task::yield_now().await;
        let mut log = self.log.lock().unwrap();
        log.installed.clear();
        log.cancel_calls += 1;
        Ok(())
    }

    async fn list_installed(&self) -> Result<Vec<InstalledTrigger>, PrayerError> {
        tokio::task::yield_now().await;
        Ok(self.installed())
    }
}

type SourceFn = Box<dyn Fn(&TimingsQuery) -> Result<Timings, PrayerError> + Send + Sync>;

/// Prayer-time source answering from a closure.
pub struct ScriptedSource {
    respond: SourceFn,
    calls: AtomicUsize,
    last_query: Mutex<Option<TimingsQuery>>,
}

impl ScriptedSource {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&TimingsQuery) -> Result<Timings, PrayerError> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
            last_query: Mutex::new(None),
        }
    }

    /// Always answers with the sample Jakarta times.
    pub fn jakarta() -> Self {
        Self::new(|_| {
            Ok(Timings {
                times: sample_times(),
                timezone: "Asia/Jakarta".to_string(),
            })
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_query(&self) -> Option<TimingsQuery> {
        self.last_query.lock().unwrap().clone()
    }
}

#[async_trait]
impl PrayerTimeSource for ScriptedSource {
    async fn fetch_times(&self, query: &TimingsQuery) -> Result<Timings, PrayerError> {
        tokio::task::yield_now().await;
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_query.lock().unwrap() = Some(query.clone());
        (self.respond)(query)
    }
}

/// Location provider with a canned answer and a call counter.
pub struct CountingLocation {
    fix: Option<Coordinates>,
    denied: bool,
    calls: AtomicUsize,
}

impl CountingLocation {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            fix: Some(Coordinates {
                latitude,
                longitude,
            }),
            denied: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn denied() -> Self {
        Self {
            fix: None,
            denied: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationProvider for CountingLocation {
    async fn current_fix(&self) -> Result<Coordinates, PrayerError> {
        tokio::task::yield_now().await;
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.denied {
            return Err(PrayerError::PermissionDenied(
                "location access refused".to_string(),
            ));
        }
        self.fix
            .ok_or_else(|| PrayerError::LocationUnavailable("no fix".to_string()))
    }
}

/// Key-value store whose writes always fail; reads find nothing.
#[derive(Debug, Default)]
pub struct FailingStore {
    writes: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, PrayerError> {
        tokio::task::yield_now().await;
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: String) -> Result<(), PrayerError> {
        tokio::task::yield_now().await;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(PrayerError::Persistence("disk full".to_string()))
    }
}
