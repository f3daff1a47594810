// File: ./src/model.rs
// Core data types: prayers, clock values and the persisted schedule.
//
// ⚠️ VERSION BUMP REQUIRED:
// Changes to ScheduleState or its nested types require incrementing
// SCHEDULE_STATE_VERSION below so stale records are treated as absent.
use crate::clock;
use crate::error::PrayerError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

pub const SCHEDULE_STATE_VERSION: u32 = 1;

/// The five daily prayers, declared in display order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
    Display,
    AsRefStr,
)]
pub enum Prayer {
    Fajr,
    Dhuhr,
    Asr,
    Maghrib,
    Isha,
}

impl Prayer {
    fn index(self) -> usize {
        self as usize
    }
}

/// Jurisprudence school; only affects the Asr computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumIter, Display)]
pub enum School {
    #[default]
    Shafi,
    Hanafi,
}

impl School {
    /// Numeric id expected by the lookup (0 = Shafi, 1 = Hanafi).
    pub fn id(self) -> u8 {
        match self {
            School::Shafi => 0,
            School::Hanafi => 1,
        }
    }
}

/// A validated 24-hour wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClockTime {
    hour: u8,
    minute: u8,
}

impl ClockTime {
    pub fn new(hour: u8, minute: u8) -> Result<Self, PrayerError> {
        if hour > 23 || minute > 59 {
            return Err(PrayerError::Format(format!(
                "{:02}:{:02} is out of range",
                hour, minute
            )));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for ClockTime {
    type Err = PrayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        clock::parse_clock(s)
    }
}

/// Exactly one validated clock time per prayer.
///
/// Serialized as a `{"Fajr": "04:31", ...}` map. Deserialization rejects
/// maps that are missing a prayer or carry an invalid time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, String>",
    into = "BTreeMap<String, String>"
)]
pub struct PrayerTimes {
    times: [ClockTime; 5],
}

impl PrayerTimes {
    /// Builds the set from a lookup function, failing on the first prayer it cannot supply.
    pub fn try_from_fn<F>(mut f: F) -> Result<Self, PrayerError>
    where
        F: FnMut(Prayer) -> Result<ClockTime, PrayerError>,
    {
        let midnight = ClockTime { hour: 0, minute: 0 };
        let mut times = [midnight; 5];
        for prayer in Prayer::iter() {
            times[prayer.index()] = f(prayer)?;
        }
        Ok(Self { times })
    }

    pub fn get(&self, prayer: Prayer) -> ClockTime {
        self.times[prayer.index()]
    }

    /// Prayers with their times, in display order.
    pub fn iter(&self) -> impl Iterator<Item = (Prayer, ClockTime)> + '_ {
        Prayer::iter().map(|p| (p, self.get(p)))
    }
}

impl TryFrom<BTreeMap<String, String>> for PrayerTimes {
    type Error = PrayerError;

    fn try_from(map: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        for key in map.keys() {
            if Prayer::from_str(key).is_err() {
                return Err(PrayerError::Format(format!("unknown prayer '{}'", key)));
            }
        }
        Self::try_from_fn(|prayer| {
            map.get(prayer.as_ref())
                .ok_or_else(|| PrayerError::Format(format!("missing time for {}", prayer)))
                .and_then(|raw| clock::parse_clock(raw))
        })
    }
}

impl From<PrayerTimes> for BTreeMap<String, String> {
    fn from(times: PrayerTimes) -> Self {
        times
            .iter()
            .map(|(p, t)| (p.to_string(), t.to_string()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// The single persisted record of the last computed schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleState {
    // If this field is missing in the JSON (old record), it defaults to 0.
    #[serde(default)]
    pub version: u32,
    /// Device-local calendar date the schedule was computed on.
    pub schedule_date: NaiveDate,
    pub latitude: f64,
    pub longitude: f64,
    pub calculation_method: u32,
    pub jurisprudence_school: School,
    pub times: PrayerTimes,
    /// IANA identifier reported by the lookup for these coordinates.
    pub timezone: String,
}

impl ScheduleState {
    pub fn new(
        schedule_date: NaiveDate,
        location: Coordinates,
        calculation_method: u32,
        jurisprudence_school: School,
        times: PrayerTimes,
        timezone: String,
    ) -> Self {
        Self {
            version: SCHEDULE_STATE_VERSION,
            schedule_date,
            latitude: location.latitude,
            longitude: location.longitude,
            calculation_method,
            jurisprudence_school,
            times,
            timezone,
        }
    }

    pub fn location(&self) -> Coordinates {
        Coordinates {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_times() -> PrayerTimes {
        let raw = ["04:31", "11:52", "15:14", "17:49", "19:02"];
        PrayerTimes::try_from_fn(|p| raw[p.index()].parse()).unwrap()
    }

    #[test]
    fn test_prayer_order_matches_display_order() {
        let names: Vec<String> = Prayer::iter().map(|p| p.to_string()).collect();
        assert_eq!(names, vec!["Fajr", "Dhuhr", "Asr", "Maghrib", "Isha"]);
    }

    #[test]
    fn test_schedule_state_json_shape() {
        let state = ScheduleState::new(
            NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            Coordinates {
                latitude: -6.2,
                longitude: 106.8,
            },
            20,
            School::Shafi,
            sample_times(),
            "Asia/Jakarta".to_string(),
        );

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["schedule_date"], "2025-03-14");
        assert_eq!(value["times"]["Maghrib"], "17:49");
        assert_eq!(value["jurisprudence_school"], "Shafi");

        let back: ScheduleState = serde_json::from_value(value).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_prayer_times_rejects_missing_prayer() {
        let json = r#"{"Fajr":"04:31","Dhuhr":"11:52","Asr":"15:14","Maghrib":"17:49"}"#;
        assert!(serde_json::from_str::<PrayerTimes>(json).is_err());
    }

    #[test]
    fn test_prayer_times_rejects_out_of_range_value() {
        let json =
            r#"{"Fajr":"24:31","Dhuhr":"11:52","Asr":"15:14","Maghrib":"17:49","Isha":"19:02"}"#;
        assert!(serde_json::from_str::<PrayerTimes>(json).is_err());
    }

    #[test]
    fn test_school_ids() {
        assert_eq!(School::Shafi.id(), 0);
        assert_eq!(School::Hanafi.id(), 1);
    }
}
