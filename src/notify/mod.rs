// File: ./src/notify/mod.rs
//! Interface to the host notification facility.
//!
//! Installed triggers belong to the facility: they keep firing on their own
//! and the pipeline only installs, lists and cancels them.
pub mod desktop;

use crate::error::PrayerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use desktop::DesktopNotifier;

pub const PRAYER_CHANNEL_ID: &str = "prayer-times";
pub const PRAYER_CATEGORY_ID: &str = "prayer-actions";
pub const ACTION_REMIND_LATER: &str = "remind-later";
pub const ACTION_DISMISS: &str = "dismiss";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
    pub channel_id: String,
    /// Action category attached to the notification, if any.
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Importance {
    Default,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockscreenVisibility {
    Private,
    Public,
}

/// Android-style delivery channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub id: String,
    pub name: String,
    pub importance: Importance,
    pub bypass_dnd: bool,
    pub lockscreen_visibility: LockscreenVisibility,
    /// Alternating off/on durations in milliseconds.
    pub vibration_pattern: Vec<u64>,
}

impl ChannelSpec {
    pub fn prayer_channel() -> Self {
        Self {
            id: PRAYER_CHANNEL_ID.to_string(),
            name: "Prayer times".to_string(),
            importance: Importance::High,
            bypass_dnd: true,
            lockscreen_visibility: LockscreenVisibility::Public,
            vibration_pattern: vec![0, 500, 250, 500, 250, 1000],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    /// Re-notify after the given delay.
    RemindLater { delay_secs: u64 },
    Dismiss,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionButton {
    pub id: String,
    pub title: String,
    pub action: NotificationAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySpec {
    pub id: String,
    pub buttons: Vec<ActionButton>,
}

impl CategorySpec {
    pub fn prayer_actions(remind_later_secs: u64) -> Self {
        Self {
            id: PRAYER_CATEGORY_ID.to_string(),
            buttons: vec![
                ActionButton {
                    id: ACTION_REMIND_LATER.to_string(),
                    title: "Remind me later".to_string(),
                    action: NotificationAction::RemindLater {
                        delay_secs: remind_later_secs,
                    },
                },
                ActionButton {
                    id: ACTION_DISMISS.to_string(),
                    title: "Dismiss".to_string(),
                    action: NotificationAction::Dismiss,
                },
            ],
        }
    }

    pub fn action_for(&self, button_id: &str) -> Option<NotificationAction> {
        self.buttons
            .iter()
            .find(|b| b.id == button_id)
            .map(|b| b.action)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    DailyAt { hour: u8, minute: u8 },
    OneShot { fire_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledTrigger {
    pub id: String,
    pub kind: TriggerKind,
    pub content: NotificationContent,
}

impl InstalledTrigger {
    pub fn is_recurring(&self) -> bool {
        matches!(self.kind, TriggerKind::DailyAt { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

#[async_trait]
pub trait NotificationBackend: Send + Sync {
    async fn request_permission(&self) -> Result<PermissionStatus, PrayerError>;

    /// Registers the channel; repeated calls with the same id are harmless.
    async fn ensure_channel(&self, spec: &ChannelSpec) -> Result<(), PrayerError>;

    async fn ensure_category(&self, spec: &CategorySpec) -> Result<(), PrayerError>;

    /// Fires every day at `hour:minute` device-local time, starting with the
    /// next occurrence. Returns the trigger id.
    async fn install_recurring_daily(
        &self,
        hour: u8,
        minute: u8,
        content: NotificationContent,
    ) -> Result<String, PrayerError>;

    async fn install_one_shot(
        &self,
        delay_secs: u64,
        content: NotificationContent,
    ) -> Result<String, PrayerError>;

    async fn cancel_all(&self) -> Result<(), PrayerError>;

    async fn list_installed(&self) -> Result<Vec<InstalledTrigger>, PrayerError>;
}
