// Crate root library declaration and module exports.
pub mod background;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod location;
pub mod logging;
pub mod model;
pub mod notify;
pub mod orchestrator;
pub mod scheduler;
pub mod source;
pub mod storage;
#[cfg(any(test, feature = "test_hooks"))]
pub mod testing;

pub use error::PrayerError;
