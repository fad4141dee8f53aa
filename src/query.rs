//! Poll-driven query handle for consumers that render cached data.
//!
//! Inspired by TanStack Query, a `Query<T>` owns a fetcher, tracks loading,
//! success and error, and (when bound to a cache key) listens to cache events
//! so an invalidated or updated key is refetched on the next `poll()` without
//! any rendering layer involved.
//!
//! # Example
//!
//! ```ignore
//! let mut query = data.watch_list::<Lead>(Resource::Leads, ListQuery::new());
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! match query.state() {
//!     QueryState::Loading => render_spinner(),
//!     QueryState::Success(page) => render_page(page),
//!     QueryState::Error(e) => render_error(e),
//!     QueryState::Idle => {}
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::TryRecvError as EventRecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::cache::{CacheEvent, CacheKey, QueryCache};
use crate::error::ApiError;

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is fetching and has no data yet
  Loading,
  /// Query completed successfully
  Success(T),
  /// Query failed with an error
  Error(ApiError),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&ApiError> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send>>;

type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// Async query for data fetching with state management.
pub struct Query<T> {
  state: QueryState<T>,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<Result<T, ApiError>>>,
  fetched_at: Option<Instant>,
  stale_time: Duration,
  watch: Option<Watch>,
}

struct Watch {
  key: CacheKey,
  events: broadcast::Receiver<CacheEvent>,
}

enum Signal {
  Refetch,
  Reset,
}

impl<T: Send + 'static> Query<T> {
  /// Create a new query with the given fetcher function.
  ///
  /// The fetcher is called each time `fetch()` or `refetch()` starts a fetch.
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    Self {
      state: QueryState::Idle,
      fetcher: Box::new(move || Box::pin(fetcher())),
      receiver: None,
      fetched_at: None,
      stale_time: Duration::from_secs(60),
      watch: None,
    }
  }

  /// Refetch whenever `key` is invalidated or updated in `cache`.
  pub fn watching(mut self, cache: &QueryCache, key: CacheKey) -> Self {
    self.stale_time = cache.stale_time();
    self.watch = Some(Watch {
      key,
      events: cache.subscribe(),
    });
    self
  }

  /// Set the stale time for this query.
  pub fn with_stale_time(mut self, duration: Duration) -> Self {
    self.stale_time = duration;
    self
  }

  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  /// Loading with nothing to show yet.
  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  /// A fetch is in flight, whether or not previous data is still shown.
  pub fn is_fetching(&self) -> bool {
    self.receiver.is_some()
  }

  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  pub fn error(&self) -> Option<&ApiError> {
    self.state.error()
  }

  /// Check if the data is stale (older than stale_time).
  pub fn is_stale(&self) -> bool {
    match &self.state {
      QueryState::Success(_) => self
        .fetched_at
        .map(|t| t.elapsed() > self.stale_time)
        .unwrap_or(true),
      _ => false,
    }
  }

  /// Start fetching data if not already fetching.
  pub fn fetch(&mut self) {
    if self.is_fetching() {
      return;
    }
    self.start_fetch();
  }

  /// Force a refetch, even if already fetching or data exists.
  pub fn refetch(&mut self) {
    // Drop the pending receiver; its result is ignored
    self.receiver = None;
    self.start_fetch();
  }

  /// Poll for results and cache events.
  ///
  /// Returns `true` if the state changed (data arrived, an error occurred or
  /// the cache was cleared). Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    // Updates published while our own fetch was out carry that fetch's data
    let awaiting_own = self.is_fetching();
    let mut changed = self.poll_result();

    match self.drain_events(awaiting_own) {
      Some(Signal::Reset) => {
        self.receiver = None;
        self.state = QueryState::Idle;
        self.fetched_at = None;
        changed = true;
      }
      Some(Signal::Refetch) => {
        // A fetch already in flight may predate the change
        debug!("watched key changed; refetching");
        self.refetch();
      }
      None => {}
    }

    changed
  }

  fn poll_result(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(Ok(data)) => {
        self.state = QueryState::Success(data);
        self.fetched_at = Some(Instant::now());
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.state = QueryState::Error(error);
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // Sender dropped without sending
        self.state = QueryState::Error(ApiError::Aborted);
        self.receiver = None;
        true
      }
    }
  }

  fn drain_events(&mut self, awaiting_own: bool) -> Option<Signal> {
    let watch = self.watch.as_mut()?;
    let mut signal = None;

    loop {
      match watch.events.try_recv() {
        Ok(CacheEvent::Cleared) => signal = Some(Signal::Reset),
        Ok(CacheEvent::Invalidated(key)) if key == watch.key => {
          if signal.is_none() {
            signal = Some(Signal::Refetch);
          }
        }
        Ok(CacheEvent::Updated(key)) if key == watch.key && !awaiting_own => {
          if signal.is_none() {
            signal = Some(Signal::Refetch);
          }
        }
        Ok(_) => {}
        Err(EventRecvError::Lagged(_)) => {
          if signal.is_none() {
            signal = Some(Signal::Refetch);
          }
        }
        Err(EventRecvError::Empty) | Err(EventRecvError::Closed) => break,
      }
    }
    signal
  }

  fn start_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    // Keep showing the last data while revalidating
    if !self.state.is_success() {
      self.state = QueryState::Loading;
    }

    let future = (self.fetcher)();
    tokio::spawn(async move {
      let result = future.await;
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("fetched_at", &self.fetched_at)
      .field("stale_time", &self.stale_time)
      .field("watching", &self.watch.as_ref().map(|w| w.key.to_string()))
      .finish_non_exhaustive()
  }
}
