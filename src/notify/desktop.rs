// File: ./src/notify/desktop.rs
// In-process notification facility for desktop hosts.
//
// Each trigger is a tokio task that sleeps until its next occurrence and then
// shows an OS notification through notify-rust. Triggers live as long as the
// process (the daemon) does.
use super::{
    CategorySpec, ChannelSpec, Importance, InstalledTrigger, NotificationAction,
    NotificationBackend, NotificationContent, PermissionStatus, TriggerKind,
};
use crate::clock::Clock;
use crate::error::PrayerError;
use crate::model::ClockTime;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use notify_rust::{Notification, Timeout};
#[cfg(all(unix, not(target_os = "macos")))]
use notify_rust::Urgency;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};

// (category id, button id, content of the notification the button belongs to)
type ActionEvent = (String, String, NotificationContent);

struct Entry {
    trigger: InstalledTrigger,
    handle: JoinHandle<()>,
}

struct Shared {
    clock: Arc<dyn Clock>,
    triggers: Mutex<HashMap<String, Entry>>,
    channels: Mutex<HashMap<String, ChannelSpec>>,
    categories: Mutex<HashMap<String, CategorySpec>>,
    next_id: AtomicU64,
    action_tx: mpsc::UnboundedSender<ActionEvent>,
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, PrayerError> {
    m.lock()
        .map_err(|_| PrayerError::Notification("notifier state poisoned".to_string()))
}

impl Shared {
    fn new_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn category(&self, content: &NotificationContent) -> Option<CategorySpec> {
        let id = content.category_id.as_ref()?;
        self.categories.lock().ok()?.get(id).cloned()
    }

    fn channel(&self, content: &NotificationContent) -> Option<ChannelSpec> {
        self.channels.lock().ok()?.get(&content.channel_id).cloned()
    }
}

/// Desktop daemons have no channels; a high-importance or DND-bypassing
/// channel is shown as a critical notification that stays until dismissed.
fn is_critical(channel: Option<&ChannelSpec>) -> bool {
    channel.is_some_and(|c| c.importance == Importance::High || c.bypass_dnd)
}

/// Cheap-to-clone handle to the desktop notification actor.
///
/// Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct DesktopNotifier {
    shared: Arc<Shared>,
}

impl DesktopNotifier {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (action_tx, mut action_rx) = mpsc::unbounded_channel::<ActionEvent>();
        let shared = Arc::new(Shared {
            clock,
            triggers: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            categories: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            action_tx,
        });

        // Button presses arrive from notification threads; handle them here.
        let weak = Arc::downgrade(&shared);
        tokio::spawn(async move {
            while let Some((category_id, button_id, content)) = action_rx.recv().await {
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = handle_action(&shared, &category_id, &button_id, content) {
                    log::warn!("Failed to handle notification action {}: {}", button_id, e);
                }
            }
        });

        Self { shared }
    }

    /// Runs the action bound to `button_id` as if the user had pressed it.
    pub fn trigger_action(
        &self,
        category_id: &str,
        button_id: &str,
        content: NotificationContent,
    ) -> Result<(), PrayerError> {
        handle_action(&self.shared, category_id, button_id, content)
    }
}

fn handle_action(
    shared: &Arc<Shared>,
    category_id: &str,
    button_id: &str,
    content: NotificationContent,
) -> Result<(), PrayerError> {
    let action = lock(&shared.categories)?
        .get(category_id)
        .and_then(|c| c.action_for(button_id));

    match action {
        Some(NotificationAction::RemindLater { delay_secs }) => {
            log::info!("Reminding '{}' again in {}s", content.title, delay_secs);
            schedule_one_shot(shared, delay_secs, content)?;
        }
        Some(NotificationAction::Dismiss) => {
            log::debug!("Dismissed '{}'", content.title);
        }
        None => {
            // Closing the bubble reports a pseudo action; nothing to do.
            log::debug!("Ignoring action '{}' for category '{}'", button_id, category_id);
        }
    }
    Ok(())
}

fn schedule_one_shot(
    shared: &Arc<Shared>,
    delay_secs: u64,
    content: NotificationContent,
) -> Result<String, PrayerError> {
    let id = shared.new_id("once");
    let fire_at = shared.clock.now().with_timezone(&Utc)
        + ChronoDuration::seconds(i64::try_from(delay_secs).unwrap_or(i64::MAX / 1000));

    let weak = Arc::downgrade(shared);
    let task_id = id.clone();
    let task_content = content.clone();
    let handle = tokio::spawn(async move {
        sleep(Duration::from_secs(delay_secs)).await;
        let Some(shared) = weak.upgrade() else {
            return;
        };
        show(&shared, task_content);
        if let Ok(mut triggers) = shared.triggers.lock() {
            triggers.remove(&task_id);
        }
    });

    lock(&shared.triggers)?.insert(
        id.clone(),
        Entry {
            trigger: InstalledTrigger {
                id: id.clone(),
                kind: TriggerKind::OneShot { fire_at },
                content,
            },
            handle,
        },
    );
    Ok(id)
}

fn schedule_daily(
    shared: &Arc<Shared>,
    at: ClockTime,
    content: NotificationContent,
) -> Result<String, PrayerError> {
    let id = shared.new_id("daily");
    let weak: Weak<Shared> = Arc::downgrade(shared);
    let task_content = content.clone();

    let handle = tokio::spawn(async move {
        let mut last_fired = None;
        loop {
            let Some(shared) = weak.upgrade() else {
                break;
            };
            let now = shared.clock.now().with_timezone(&Utc);
            // Never fire the same occurrence twice if the wall clock lags the timer.
            let from = match last_fired {
                Some(fired) if fired > now => fired,
                _ => now,
            };
            let next = shared.clock.next_wall_clock(at, from);
            let wait = (next - now).to_std().unwrap_or_default();
            drop(shared);

            sleep(wait).await;

            let Some(shared) = weak.upgrade() else {
                break;
            };
            show(&shared, task_content.clone());
            last_fired = Some(next);
        }
    });

    lock(&shared.triggers)?.insert(
        id.clone(),
        Entry {
            trigger: InstalledTrigger {
                id: id.clone(),
                kind: TriggerKind::DailyAt {
                    hour: at.hour(),
                    minute: at.minute(),
                },
                content,
            },
            handle,
        },
    );
    Ok(id)
}

fn show(shared: &Arc<Shared>, content: NotificationContent) {
    let category = shared.category(&content);
    let critical = is_critical(shared.channel(&content).as_ref());
    let action_tx = shared.action_tx.clone();

    // notify-rust blocks (and waits for button presses), so keep it off the runtime.
    std::thread::spawn(move || {
        let mut notification = Notification::new();
        notification
            .summary(&content.title)
            .body(&content.body)
            .appname("Waqt");
        if critical {
            notification.timeout(Timeout::Never);
        }
        #[cfg(all(unix, not(target_os = "macos")))]
        notification.urgency(if critical {
            Urgency::Critical
        } else {
            Urgency::Normal
        });
        if let Some(category) = &category {
            for button in &category.buttons {
                notification.action(&button.id, &button.title);
            }
        }

        match notification.show() {
            #[cfg(all(unix, not(target_os = "macos")))]
            Ok(handle) => {
                if let Some(category) = category {
                    handle.wait_for_action(|button_id| {
                        let _ = action_tx.send((category.id, button_id.to_string(), content));
                    });
                }
            }
            #[cfg(not(all(unix, not(target_os = "macos"))))]
            Ok(_) => {
                let _ = (category, action_tx);
            }
            Err(e) => log::warn!("Failed to show notification '{}': {}", content.title, e),
        }
    });
}

#[async_trait]
impl NotificationBackend for DesktopNotifier {
    async fn request_permission(&self) -> Result<PermissionStatus, PrayerError> {
        // Desktop notification daemons do not gate on a permission prompt.
        Ok(PermissionStatus::Granted)
    }

    async fn ensure_channel(&self, spec: &ChannelSpec) -> Result<(), PrayerError> {
        lock(&self.shared.channels)?
            .entry(spec.id.clone())
            .or_insert_with(|| spec.clone());
        Ok(())
    }

    async fn ensure_category(&self, spec: &CategorySpec) -> Result<(), PrayerError> {
        lock(&self.shared.categories)?.insert(spec.id.clone(), spec.clone());
        Ok(())
    }

    async fn install_recurring_daily(
        &self,
        hour: u8,
        minute: u8,
        content: NotificationContent,
    ) -> Result<String, PrayerError> {
        let at = ClockTime::new(hour, minute)?;
        let id = schedule_daily(&self.shared, at, content)?;
        log::debug!("Installed daily trigger {} at {}", id, at);
        Ok(id)
    }

    async fn install_one_shot(
        &self,
        delay_secs: u64,
        content: NotificationContent,
    ) -> Result<String, PrayerError> {
        schedule_one_shot(&self.shared, delay_secs, content)
    }

    async fn cancel_all(&self) -> Result<(), PrayerError> {
        let drained: Vec<Entry> = lock(&self.shared.triggers)?
            .drain()
            .map(|(_, e)| e)
            .collect();
        for entry in &drained {
            entry.handle.abort();
        }
        log::debug!("Cancelled {} trigger(s)", drained.len());
        Ok(())
    }

    async fn list_installed(&self) -> Result<Vec<InstalledTrigger>, PrayerError> {
        let mut list: Vec<InstalledTrigger> = lock(&self.shared.triggers)?
            .values()
            .map(|e| e.trigger.clone())
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{ACTION_DISMISS, ACTION_REMIND_LATER, PRAYER_CHANNEL_ID};
    use crate::testing::FixedClock;

    fn content(title: &str) -> NotificationContent {
        NotificationContent {
            title: title.to_string(),
            body: "test".to_string(),
            channel_id: PRAYER_CHANNEL_ID.to_string(),
            category_id: Some(crate::notify::PRAYER_CATEGORY_ID.to_string()),
        }
    }

    #[tokio::test]
    async fn test_install_list_cancel() {
        let notifier = DesktopNotifier::new(Arc::new(FixedClock::at("2025-03-14T10:00:00+07:00")));
        notifier
            .install_recurring_daily(4, 31, content("Fajr"))
            .await
            .unwrap();
        notifier.install_one_shot(3600, content("Later")).await.unwrap();

        let installed = notifier.list_installed().await.unwrap();
        assert_eq!(installed.len(), 2);
        assert_eq!(installed.iter().filter(|t| t.is_recurring()).count(), 1);

        notifier.cancel_all().await.unwrap();
        assert!(notifier.list_installed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remind_later_action_installs_follow_up() {
        let notifier = DesktopNotifier::new(Arc::new(FixedClock::at("2025-03-14T10:00:00+07:00")));
        notifier
            .ensure_category(&CategorySpec::prayer_actions(600))
            .await
            .unwrap();

        notifier
            .trigger_action(
                crate::notify::PRAYER_CATEGORY_ID,
                ACTION_REMIND_LATER,
                content("Asr"),
            )
            .unwrap();
        notifier
            .trigger_action(crate::notify::PRAYER_CATEGORY_ID, ACTION_DISMISS, content("Asr"))
            .unwrap();

        let installed = notifier.list_installed().await.unwrap();
        assert_eq!(installed.len(), 1);
        let expected = "2025-03-14T03:10:00Z".parse::<chrono::DateTime<Utc>>().unwrap();
        assert_eq!(installed[0].kind, TriggerKind::OneShot { fire_at: expected });
        notifier.cancel_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_prayer_channel_is_shown_as_critical() {
        let notifier = DesktopNotifier::new(Arc::new(FixedClock::at("2025-03-14T10:00:00+07:00")));
        let fajr = content("Fajr");
        assert!(!is_critical(notifier.shared.channel(&fajr).as_ref()));

        notifier
            .ensure_channel(&ChannelSpec::prayer_channel())
            .await
            .unwrap();
        assert!(is_critical(notifier.shared.channel(&fajr).as_ref()));

        let quiet = ChannelSpec {
            importance: Importance::Default,
            bypass_dnd: false,
            ..ChannelSpec::prayer_channel()
        };
        assert!(!is_critical(Some(&quiet)));
    }

    #[tokio::test]
    async fn test_daily_trigger_waits_for_zone_aware_occurrence() {
        // 00:30 in London on the morning clocks go forward; 05:00 BST is 04:00 UTC.
        let clock = Arc::new(FixedClock::in_zone(
            "2025-03-30T00:30:00+00:00",
            chrono_tz::Europe::London,
        ));
        let from = clock.now().with_timezone(&Utc);
        let next = clock.next_wall_clock(ClockTime::new(5, 0).unwrap(), from);
        assert_eq!(next.to_rfc3339(), "2025-03-30T04:00:00+00:00");

        let notifier = DesktopNotifier::new(clock);
        notifier
            .install_recurring_daily(5, 0, content("Fajr"))
            .await
            .unwrap();
        assert_eq!(notifier.list_installed().await.unwrap().len(), 1);
        notifier.cancel_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_invalid_clock() {
        let notifier = DesktopNotifier::new(Arc::new(FixedClock::at("2025-03-14T10:00:00+00:00")));
        assert!(matches!(
            notifier.install_recurring_daily(24, 0, content("Bad")).await,
            Err(PrayerError::Format(_))
        ));
    }
}
