//! Query cache: the last successful result per read, with staleness,
//! in-flight deduplication and prefix invalidation.
//!
//! All reads of one key share a single fetch. The fetch runs on its own task
//! and writes its result into the cache before any reader resumes, so a
//! reader that gives up waiting never cancels it.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use super::key::{CacheKey, KeyPrefix};
use super::result::CacheResult;
use crate::error::ApiError;

type SharedFetch = Shared<BoxFuture<'static, Result<Value, ApiError>>>;

const DEFAULT_STALE_TIME: Duration = Duration::from_secs(60);
const EVENT_CAPACITY: usize = 256;

/// Observable status of one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
  /// Nothing cached and nothing in flight
  Idle,
  Fetching,
  Fresh,
  /// Past the staleness window, or invalidated by a mutation
  Stale,
  /// The last fetch failed
  Error,
}

/// How a read treats a stale entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
  /// Return stale data immediately and refetch in the background.
  #[default]
  StaleWhileRevalidate,
  /// Wait for the refetch.
  Blocking,
}

/// Notifications published for observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
  /// A fetch stored new data for the key
  Updated(CacheKey),
  /// A mutation marked the key stale
  Invalidated(CacheKey),
  /// A fetch for the key failed
  Failed(CacheKey),
  /// Every entry was dropped (logout)
  Cleared,
}

#[derive(Default)]
struct Entry {
  data: Option<Value>,
  fetched_at: Option<Instant>,
  cached_at: Option<DateTime<Utc>>,
  error: Option<ApiError>,
  invalidated: bool,
  /// Bumped by every invalidation; a fetch that started under an older
  /// generation stores its data but leaves the entry stale.
  generation: u64,
  in_flight: Option<InFlight>,
}

/// A fetch running for an entry, tagged with the generation it started under.
struct InFlight {
  id: u64,
  generation: u64,
  shared: SharedFetch,
}

impl Entry {
  fn status(&self, stale_time: Duration) -> CacheStatus {
    if self.in_flight.is_some() {
      return CacheStatus::Fetching;
    }
    if self.error.is_some() {
      return CacheStatus::Error;
    }
    match self.fetched_at {
      None => CacheStatus::Idle,
      Some(_) if self.invalidated => CacheStatus::Stale,
      Some(at) if at.elapsed() >= stale_time => CacheStatus::Stale,
      Some(_) => CacheStatus::Fresh,
    }
  }
}

/// Process-wide read cache. Cloning shares the same entries.
#[derive(Clone)]
pub struct QueryCache {
  inner: Arc<Inner>,
}

struct Inner {
  entries: Mutex<HashMap<CacheKey, Entry>>,
  stale_time: Duration,
  events: broadcast::Sender<CacheEvent>,
  next_fetch: AtomicU64,
}

impl Default for QueryCache {
  fn default() -> Self {
    Self::new()
  }
}

impl QueryCache {
  pub fn new() -> Self {
    Self::with_stale_time(DEFAULT_STALE_TIME)
  }

  /// Create a cache whose entries turn stale `stale_time` after being fetched.
  pub fn with_stale_time(stale_time: Duration) -> Self {
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    Self {
      inner: Arc::new(Inner {
        entries: Mutex::new(HashMap::new()),
        stale_time,
        events,
        next_fetch: AtomicU64::new(1),
      }),
    }
  }

  pub fn stale_time(&self) -> Duration {
    self.inner.stale_time
  }

  pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
    self.inner.events.subscribe()
  }

  pub fn status(&self, key: &CacheKey) -> CacheStatus {
    self
      .inner
      .lock_entries()
      .get(key)
      .map(|e| e.status(self.inner.stale_time))
      .unwrap_or(CacheStatus::Idle)
  }

  /// Cached data for the key without triggering a fetch.
  pub fn peek(&self, key: &CacheKey) -> Option<Value> {
    self.inner.lock_entries().get(key).and_then(|e| e.data.clone())
  }

  /// The failure carried by an entry in [`CacheStatus::Error`].
  pub fn last_error(&self, key: &CacheKey) -> Option<ApiError> {
    self.inner.lock_entries().get(key).and_then(|e| e.error.clone())
  }

  /// Read a key.
  ///
  /// - Fresh data is returned without a fetch.
  /// - A key already fetching is joined rather than fetched twice, unless the
  ///   fetch started before the key was last invalidated.
  /// - Data past the staleness window is returned at once while a background
  ///   refetch runs, unless `mode` is [`ReadMode::Blocking`]. Data a mutation
  ///   invalidated always waits for the refetch.
  /// - Otherwise `fetcher` is started and its result returned.
  pub async fn read<F, Fut>(
    &self,
    key: &CacheKey,
    mode: ReadMode,
    fetcher: F,
  ) -> Result<CacheResult<Value>, ApiError>
  where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
  {
    let fetch = {
      let mut entries = self.inner.lock_entries();
      let entry = entries.entry(key.clone()).or_default();
      let status = entry.status(self.inner.stale_time);

      if status == CacheStatus::Fresh {
        if let (Some(data), Some(cached_at)) = (&entry.data, entry.cached_at) {
          return Ok(CacheResult::from_cache(data.clone(), cached_at, false));
        }
      }

      // A fetch that started before the last invalidation may carry data the
      // mutation replaced; it is not joined
      let joined = entry
        .in_flight
        .as_ref()
        .filter(|flight| flight.generation == entry.generation)
        .map(|flight| flight.shared.clone());
      let fetch = match joined {
        Some(shared) => shared,
        None => self.start_fetch(key, entry, fetcher()),
      };

      // Data a mutation invalidated is never served; only aged data is
      if mode == ReadMode::StaleWhileRevalidate && !entry.invalidated {
        if let (Some(data), Some(cached_at)) = (&entry.data, entry.cached_at) {
          debug!(key = %key, "serving stale data while revalidating");
          return Ok(CacheResult::from_cache(data.clone(), cached_at, true));
        }
      }

      fetch
    };

    fetch.await.map(CacheResult::from_network)
  }

  /// Mark every entry under `prefix` stale. Returns the number of entries touched.
  ///
  /// Runs synchronously so a mutation can finish it before returning.
  pub fn invalidate(&self, prefix: &KeyPrefix) -> usize {
    let mut touched = Vec::new();
    {
      let mut entries = self.inner.lock_entries();
      for (key, entry) in entries.iter_mut().filter(|(k, _)| prefix.matches(k)) {
        entry.invalidated = true;
        entry.generation += 1;
        touched.push(key.clone());
      }
    }

    debug!(prefix = %prefix, entries = touched.len(), "invalidated cache prefix");
    let count = touched.len();
    for key in touched {
      let _ = self.inner.events.send(CacheEvent::Invalidated(key));
    }
    count
  }

  /// Drop every entry. Fetches still in flight finish without repopulating.
  pub(crate) fn clear(&self) {
    self.inner.lock_entries().clear();
    let _ = self.inner.events.send(CacheEvent::Cleared);
  }

  fn start_fetch<Fut>(&self, key: &CacheKey, entry: &mut Entry, fut: Fut) -> SharedFetch
  where
    Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
  {
    let fetch_id = self.inner.next_fetch_id();
    let generation = entry.generation;
    let (tx, rx) = oneshot::channel();
    let cache = self.clone();
    let task_key = key.clone();

    debug!(key = %key, "fetching");
    tokio::spawn(async move {
      let result = fut.await;
      cache.complete(&task_key, fetch_id, generation, &result);
      let _ = tx.send(result);
    });

    let shared = async move { rx.await.unwrap_or(Err(ApiError::Aborted)) }
      .boxed()
      .shared();
    entry.in_flight = Some(InFlight {
      id: fetch_id,
      generation,
      shared: shared.clone(),
    });
    shared
  }

  /// Store a fetch outcome. Runs before any waiter of that fetch resumes.
  fn complete(&self, key: &CacheKey, fetch_id: u64, generation: u64, result: &Result<Value, ApiError>) {
    let event = {
      let mut entries = self.inner.lock_entries();
      let Some(entry) = entries.get_mut(key) else {
        return;
      };
      match &entry.in_flight {
        Some(flight) if flight.id == fetch_id => {}
        _ => return,
      }
      entry.in_flight = None;

      match result {
        Ok(data) => {
          entry.data = Some(data.clone());
          entry.fetched_at = Some(Instant::now());
          entry.cached_at = Some(Utc::now());
          entry.error = None;
          entry.invalidated = entry.generation != generation;
          CacheEvent::Updated(key.clone())
        }
        Err(e) => {
          warn!(key = %key, error = %e, "fetch failed");
          entry.error = Some(e.clone());
          CacheEvent::Failed(key.clone())
        }
      }
    };
    let _ = self.inner.events.send(event);
  }
}

impl Inner {
  fn lock_entries(&self) -> MutexGuard<'_, HashMap<CacheKey, Entry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn next_fetch_id(&self) -> u64 {
    self.next_fetch.fetch_add(1, Ordering::Relaxed)
  }
}
