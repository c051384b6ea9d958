//! Weather synchronization engine.
//!
//! This crate defines:
//! - A persisted single-slot cache of the last snapshot, gated by age and location
//! - Classification of fetch failures into user-facing messages
//! - A controller that serves cached data, refreshes it in the background and
//!   publishes one observable state
//! - Configuration and HTTP providers used to build a live controller
//!
//! It is used by `weather-cli`, but can also back any other front end.

pub mod cache;
pub mod classify;
pub mod clock;
pub mod config;
pub mod error;
pub mod model;
pub mod provider;
pub mod scheduler;
pub mod storage;
pub mod sync;

pub use cache::CacheStore;
pub use classify::{Classification, classify};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ProviderConfig, SyncSettings};
pub use error::{FetchError, StorageError, SyncError};
pub use model::{CacheEntry, Coordinates, WeatherSnapshot};
pub use provider::{ProviderId, WeatherFetcher};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage};
pub use sync::{Phase, Subscription, SyncController, SyncOptions, SyncState};
