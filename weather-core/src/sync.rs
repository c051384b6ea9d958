//! Stale-while-revalidate controller for a single location.
//!
//! A [`SyncController`] owns one coordinate session at a time. On [`start`] it
//! shows whatever fresh-enough data the cache holds, fetches in the background,
//! and keeps refreshing on a timer until [`teardown`]. Every change is published
//! as one [`SyncState`] value.
//!
//! Fetches run as tokio tasks. Each one carries a [`FetchToken`] captured when it
//! was issued; its outcome is applied only if the token still names the current
//! session and the fetch that session is waiting on. Anything else is a late
//! result from a superseded session (or a torn-down one) and is dropped.
//!
//! At most one fetch is in flight per controller. Timer ticks and retries that
//! arrive while one is pending are skipped.
//!
//! [`start`]: SyncController::start
//! [`teardown`]: SyncController::teardown

use parking_lot::Mutex;
use serde::Serialize;
use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{runtime::Handle, sync::watch};

use crate::{
    cache::CacheStore,
    classify::{Classification, classify},
    config::{BACKGROUND_REFRESH_INTERVAL_MS, DEFAULT_MAX_AGE_MS},
    error::{FetchError, SyncError},
    model::{Coordinates, WeatherSnapshot},
    provider::WeatherFetcher,
    scheduler::Scheduler,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncOptions {
    /// Oldest cached entry that may be shown on start.
    pub max_age: Duration,
    /// Period of silent background refreshes.
    pub refresh_interval: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_age: Duration::from_millis(DEFAULT_MAX_AGE_MS),
            refresh_interval: Duration::from_millis(BACKGROUND_REFRESH_INTERVAL_MS),
        }
    }
}

/// What the UI renders.
///
/// `loading` and `refreshing` are never both set, `refreshing` implies `data`,
/// and `offline` implies `data`. `error` with no `data` is the blocking error screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncState {
    pub data: Option<WeatherSnapshot>,
    pub loading: bool,
    pub refreshing: bool,
    pub offline: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Loading,
    Ready,
    Refreshing,
    OfflineWithCache,
    ErrorNoData,
}

impl SyncState {
    pub fn phase(&self) -> Phase {
        if self.loading {
            return Phase::Loading;
        }
        if self.refreshing {
            return Phase::Refreshing;
        }
        match (&self.data, self.offline, &self.error) {
            (Some(_), true, _) => Phase::OfflineWithCache,
            (Some(_), false, _) => Phase::Ready,
            (None, _, Some(_)) => Phase::ErrorNoData,
            (None, _, None) => Phase::Idle,
        }
    }

    /// True while a fetch the UI should show progress for is pending.
    pub fn is_busy(&self) -> bool {
        self.loading || self.refreshing
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Start,
    Retry,
    Background,
}

#[derive(Debug, Clone, Copy)]
struct FetchToken {
    session: u64,
    fetch: u64,
}

type Listener = Arc<dyn Fn(&SyncState) + Send + Sync>;

/// A published state still to be handed to listeners, once the lock is released.
struct Notification {
    version: u64,
    state: SyncState,
    listeners: Vec<Listener>,
}

struct Inner {
    state: SyncState,
    coords: Option<Coordinates>,
    /// Between `start` and `teardown`.
    active: bool,
    session: u64,
    fetch_seq: u64,
    in_flight: Option<u64>,
    last_failure: Option<Classification>,
    scheduler: Scheduler,
    listeners: Vec<(u64, Listener)>,
    listener_seq: u64,
    /// Bumped on every published change.
    version: u64,
}

struct Shared {
    cache: CacheStore,
    fetcher: Arc<dyn WeatherFetcher>,
    options: SyncOptions,
    runtime: Handle,
    inner: Mutex<Inner>,
    tx: watch::Sender<SyncState>,
    /// Newest version handed to listeners.
    delivered: AtomicU64,
}

/// Drives one location's weather through cache, network and timer.
///
/// Callbacks registered with [`subscribe`](Self::subscribe) run on the thread
/// that made the change, after the controller has released its lock, so they
/// may call back into the controller. A callback is never handed a state older
/// than one it has already seen.
pub struct SyncController {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SyncController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncController")
            .field("state", &*self.shared.tx.borrow())
            .field("options", &self.shared.options)
            .finish_non_exhaustive()
    }
}

impl SyncController {
    /// Must be called from within a tokio runtime; work is spawned onto it.
    pub fn new(
        cache: CacheStore,
        fetcher: Arc<dyn WeatherFetcher>,
        options: SyncOptions,
    ) -> Result<Self, SyncError> {
        let runtime = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        let (tx, _) = watch::channel(SyncState::default());

        let inner = Inner {
            state: SyncState::default(),
            coords: None,
            active: false,
            session: 0,
            fetch_seq: 0,
            in_flight: None,
            last_failure: None,
            scheduler: Scheduler::new(),
            listeners: Vec::new(),
            listener_seq: 0,
            version: 0,
        };

        Ok(Self {
            shared: Arc::new(Shared {
                cache,
                fetcher,
                options,
                runtime,
                inner: Mutex::new(inner),
                tx,
                delivered: AtomicU64::new(0),
            }),
        })
    }

    /// Begin a new session for `coords`, superseding any previous one.
    pub fn start(&self, coords: Coordinates) {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();

        inner.scheduler.cancel();
        inner.session += 1;
        inner.in_flight = None;
        inner.coords = Some(coords);
        inner.active = true;
        inner.last_failure = None;

        tracing::info!("Starting weather session {} for {}", inner.session, coords);

        let mut state = SyncState::default();
        match shared.cache.load(coords, shared.options.max_age) {
            Some(cached) => {
                tracing::debug!("Showing cached weather for {}", coords);
                state.data = Some(cached);
            }
            None => tracing::debug!("No usable cached weather for {}", coords),
        }
        // published together with the fetch flags below
        inner.state = state;

        let note = shared.issue_fetch(&mut inner, Trigger::Start);

        let weak = Arc::downgrade(shared);
        inner
            .scheduler
            .start(&shared.runtime, shared.options.refresh_interval, move || {
                match weak.upgrade() {
                    Some(shared) => {
                        shared.tick();
                        true
                    }
                    None => false,
                }
            });
        drop(inner);

        shared.notify(note);
    }

    /// Fetch again for the current session's coordinates.
    ///
    /// No-op before the first `start`, after `teardown`, or while a fetch is
    /// already pending. Does not clear `offline` or `error`; only a successful
    /// fetch does.
    ///
    /// A background refresh runs without any flag when nothing is on screen.
    /// Retrying during one does not start a second fetch; it raises `loading`
    /// for the pending fetch instead. [`is_fetching`](Self::is_fetching) reports
    /// pending fetches of either kind.
    pub fn retry(&self) {
        let mut inner = self.shared.inner.lock();
        if !inner.active {
            tracing::debug!("Retry ignored: no active weather session");
            return;
        }
        let note = self.shared.issue_fetch(&mut inner, Trigger::Retry);
        drop(inner);

        self.shared.notify(note);
    }

    /// Stop the timer and drop the effect of any pending fetch. Idempotent.
    pub fn teardown(&self) {
        let mut inner = self.shared.inner.lock();
        inner.scheduler.cancel();
        if !inner.active {
            return;
        }

        inner.active = false;
        inner.session += 1;
        inner.in_flight = None;
        tracing::info!("Weather session torn down");

        let state = SyncState {
            loading: false,
            refreshing: false,
            ..inner.state.clone()
        };
        let note = self.shared.publish(&mut inner, state);
        drop(inner);

        self.shared.notify(note);
    }

    pub fn state(&self) -> SyncState {
        self.shared.tx.borrow().clone()
    }

    /// Register `callback` to run on every state change.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        let mut inner = self.shared.inner.lock();
        inner.listener_seq += 1;
        let id = inner.listener_seq;
        inner.listeners.push((id, Arc::new(callback)));

        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Async view of the state; the receiver sees the latest value after each change.
    pub fn watch(&self) -> watch::Receiver<SyncState> {
        self.shared.tx.subscribe()
    }

    /// Seconds since the cache was last written, for "updated N minutes ago" labels.
    pub fn cache_age(&self) -> Option<i64> {
        self.shared.cache.age()
    }

    /// Classification of the most recent failed fetch in this session, if the
    /// session has not since succeeded.
    pub fn last_failure(&self) -> Option<Classification> {
        self.shared.inner.lock().last_failure.clone()
    }

    pub fn coordinates(&self) -> Option<Coordinates> {
        self.shared.inner.lock().coords
    }

    /// True while any fetch is pending, including a silent background refresh.
    pub fn is_fetching(&self) -> bool {
        self.shared.inner.lock().in_flight.is_some()
    }
}

impl Drop for SyncController {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl Shared {
    /// Issue a fetch for the session's coordinates unless one is pending.
    fn issue_fetch(self: &Arc<Self>, inner: &mut Inner, trigger: Trigger) -> Option<Notification> {
        if inner.in_flight.is_some() {
            if trigger == Trigger::Retry && inner.state.data.is_none() && !inner.state.loading {
                tracing::debug!("Retry attached to the pending background fetch");
                let state = SyncState {
                    loading: true,
                    ..inner.state.clone()
                };
                return self.publish(inner, state);
            }
            tracing::debug!("Fetch already in flight, skipping {:?} request", trigger);
            return None;
        }
        let coords = inner.coords?;

        inner.fetch_seq += 1;
        let token = FetchToken {
            session: inner.session,
            fetch: inner.fetch_seq,
        };
        inner.in_flight = Some(token.fetch);

        let mut state = inner.state.clone();
        if state.data.is_some() {
            state.refreshing = true;
            state.loading = false;
        } else if trigger != Trigger::Background {
            state.loading = true;
        }
        let note = self.publish(inner, state);

        let weak = Arc::downgrade(self);
        let fetcher = Arc::clone(&self.fetcher);
        let runtime = self.runtime.clone();
        self.runtime.spawn(async move {
            // a panicking fetcher must still settle the fetch
            let outcome = match runtime.spawn(async move { fetcher.fetch(coords).await }).await {
                Ok(outcome) => outcome,
                Err(e) => Err(FetchError::Transport(format!("fetch task failed: {e}"))),
            };

            if let Some(shared) = weak.upgrade() {
                shared.settle(token, coords, outcome);
            }
        });

        note
    }

    fn settle(&self, token: FetchToken, coords: Coordinates, outcome: Result<WeatherSnapshot, FetchError>) {
        let mut inner = self.inner.lock();
        if token.session != inner.session || inner.in_flight != Some(token.fetch) {
            tracing::debug!(
                "Discarding outcome of superseded fetch {} (session {})",
                token.fetch,
                token.session
            );
            return;
        }
        inner.in_flight = None;

        let state = match outcome {
            Ok(payload) => {
                tracing::info!("Weather updated for {}", coords);
                self.cache.save(&payload, coords);
                inner.last_failure = None;
                SyncState {
                    data: Some(payload),
                    ..SyncState::default()
                }
            }
            Err(failure) => {
                let classification = classify(&failure);
                tracing::warn!(
                    retryable = classification.retryable,
                    "Weather fetch for {} failed: {}",
                    coords,
                    failure
                );
                let message = classification.message.clone();
                inner.last_failure = Some(classification);

                match self.cache.load_stale(coords) {
                    Some(cached) => SyncState {
                        data: Some(cached),
                        offline: true,
                        error: Some(message),
                        ..SyncState::default()
                    },
                    None => SyncState {
                        error: Some(message),
                        ..SyncState::default()
                    },
                }
            }
        };

        let note = self.publish(&mut inner, state);
        drop(inner);

        self.notify(note);
    }

    fn tick(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        if !inner.active {
            return;
        }
        if inner.in_flight.is_some() {
            tracing::debug!("Background refresh skipped: previous fetch still running");
            return;
        }
        tracing::debug!("Background refresh");
        let note = self.issue_fetch(&mut inner, Trigger::Background);
        drop(inner);

        self.notify(note);
    }

    /// Record `state` and push it to the watch channel. Listeners are returned
    /// rather than called; pass the result to [`notify`](Self::notify) after
    /// dropping the lock.
    #[must_use]
    fn publish(&self, inner: &mut Inner, state: SyncState) -> Option<Notification> {
        if *self.tx.borrow() == state {
            inner.state = state;
            return None;
        }
        inner.state = state.clone();
        inner.version += 1;
        self.tx.send_replace(state.clone());

        Some(Notification {
            version: inner.version,
            state,
            listeners: inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
        })
    }

    fn notify(&self, note: Option<Notification>) {
        let Some(note) = note else {
            return;
        };
        if self.delivered.fetch_max(note.version, Ordering::SeqCst) > note.version {
            return;
        }
        for listener in &note.listeners {
            // a listener may have published something newer
            if self.delivered.load(Ordering::SeqCst) > note.version {
                return;
            }
            listener(&note.state);
        }
    }
}

/// Keeps a [`SyncController::subscribe`] callback registered until dropped.
#[derive(Debug)]
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.inner.lock().listeners.retain(|(id, _)| *id != self.id);
        }
    }
}
