// File: ./src/location.rs
use crate::config::Config;
use crate::error::PrayerError;
use crate::model::Coordinates;
use async_trait::async_trait;

/// Device location sensing.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Fails with `PermissionDenied` when access is refused and
    /// `LocationUnavailable` when no fix can be obtained.
    async fn current_fix(&self) -> Result<Coordinates, PrayerError>;
}

/// A location configured by the user, for hosts without a sensor.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLocation {
    fix: Option<Coordinates>,
}

impl FixedLocation {
    pub fn new(fix: Option<Coordinates>) -> Self {
        Self { fix }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.fixed_location())
    }
}

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn current_fix(&self) -> Result<Coordinates, PrayerError> {
        let fix = self.fix.ok_or_else(|| {
            PrayerError::LocationUnavailable(
                "no location configured (set latitude and longitude in config.toml)".to_string(),
            )
        })?;
        if !(-90.0..=90.0).contains(&fix.latitude) || !(-180.0..=180.0).contains(&fix.longitude) {
            return Err(PrayerError::LocationUnavailable(format!(
                "coordinates out of range: {}, {}",
                fix.latitude, fix.longitude
            )));
        }
        Ok(fix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_location_is_unavailable() {
        let loc = FixedLocation::from_config(&Config::default());
        assert!(matches!(
            loc.current_fix().await,
            Err(PrayerError::LocationUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_configured_location() {
        let cfg = Config {
            latitude: Some(51.5),
            longitude: Some(-0.12),
            ..Config::default()
        };
        let fix = FixedLocation::from_config(&cfg).current_fix().await.unwrap();
        assert_eq!(fix.latitude, 51.5);
        assert_eq!(fix.longitude, -0.12);
    }

    #[tokio::test]
    async fn test_out_of_range_location() {
        let loc = FixedLocation::new(Some(Coordinates {
            latitude: 95.0,
            longitude: 0.0,
        }));
        assert!(loc.current_fix().await.is_err());
    }
}
