//! Credential renewal with single-flight discipline.
//!
//! State machine: `Valid -> Expiring -> Refreshing -> Valid | Failed`.
//! `Expiring` is not stored; it is derived from the session's expiry and the
//! configured buffer each time a caller asks. While a renewal is in progress
//! every caller awaits the same shared future, and the session store is
//! replaced (or cleared) before that future resolves.

use chrono::{Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::store::SessionStore;
use super::types::{AuthTokens, Session, UserProfile};
use crate::error::ApiError;
use crate::http::envelope::{decode, ApiRequest};
use crate::http::Transport;

type SharedRenewal = Shared<BoxFuture<'static, Result<Session, ApiError>>>;

/// Observable credential state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
  /// No session at all
  Anonymous,
  /// Session present and outside the renewal buffer
  Valid,
  /// Session inside the renewal buffer; the next request renews it
  Expiring,
  /// A renewal request is in flight
  Refreshing,
  /// The refresh credential was rejected; re-authentication required
  Failed,
}

enum Phase {
  Idle,
  Refreshing(SharedRenewal),
  Failed,
}

/// Renews the access credential through the dedicated renewal endpoint.
#[derive(Clone)]
pub struct RefreshCoordinator {
  inner: Arc<Inner>,
}

struct Inner {
  store: SessionStore,
  transport: Transport,
  refresh_path: String,
  buffer: Duration,
  phase: Mutex<Phase>,
}

impl RefreshCoordinator {
  pub fn new(
    store: SessionStore,
    transport: Transport,
    refresh_path: impl Into<String>,
    buffer: Duration,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        store,
        transport,
        refresh_path: refresh_path.into(),
        buffer,
        phase: Mutex::new(Phase::Idle),
      }),
    }
  }

  pub fn state(&self) -> CredentialState {
    let phase = self.inner.lock_phase();
    match &*phase {
      Phase::Refreshing(_) => CredentialState::Refreshing,
      Phase::Failed => CredentialState::Failed,
      Phase::Idle => match self.inner.store.read() {
        None => CredentialState::Anonymous,
        Some(s) if s.is_expiring(Utc::now(), self.inner.buffer) => CredentialState::Expiring,
        Some(_) => CredentialState::Valid,
      },
    }
  }

  /// Make sure the stored credential is usable, renewing it first if it is
  /// inside the expiry buffer. With no session this is a no-op; the request
  /// simply goes out without credentials.
  pub async fn ensure_valid(&self) -> Result<(), ApiError> {
    let renewal = {
      let mut phase = self.inner.lock_phase();
      match &*phase {
        Phase::Refreshing(renewal) => renewal.clone(),
        Phase::Failed => return Err(ApiError::Unauthenticated),
        Phase::Idle => {
          let Some(session) = self.inner.store.read() else {
            return Ok(());
          };
          if !session.is_expiring(Utc::now(), self.inner.buffer) {
            return Ok(());
          }
          debug!(expires_at = %session.expires_at(), "access token expiring; renewing");
          let renewal = self.inner.spawn_renewal(session);
          *phase = Phase::Refreshing(renewal.clone());
          renewal
        }
      }
    };

    renewal.await.map(|_| ())
  }

  /// Renew after the server rejected `stale_token`.
  ///
  /// Joins a renewal already in flight, and returns at once if the session
  /// already carries a different token (another caller renewed meanwhile).
  pub async fn force_renewal(&self, stale_token: &str) -> Result<(), ApiError> {
    let renewal = {
      let mut phase = self.inner.lock_phase();
      match &*phase {
        Phase::Refreshing(renewal) => renewal.clone(),
        Phase::Failed => return Err(ApiError::Unauthenticated),
        Phase::Idle => {
          let Some(session) = self.inner.store.read() else {
            return Err(ApiError::Unauthenticated);
          };
          if session.access_token() != stale_token {
            return Ok(());
          }
          debug!("access token rejected by server; renewing");
          let renewal = self.inner.spawn_renewal(session);
          *phase = Phase::Refreshing(renewal.clone());
          renewal
        }
      }
    };

    renewal.await.map(|_| ())
  }

  /// Give up on the current session: clear it and refuse further requests
  /// until a new login.
  pub(crate) fn fail(&self) {
    let mut phase = self.inner.lock_phase();
    self.inner.fail_locked(&mut phase);
  }

  /// Install a session obtained by login or registration and forget any
  /// previous failure. A renewal still in flight for the old session is
  /// discarded when it settles.
  pub(crate) fn install(&self, session: Session) -> Result<(), ApiError> {
    let mut phase = self.inner.lock_phase();
    self.inner.store.replace(session)?;
    self.inner.forget_failure(&mut phase);
    Ok(())
  }

  /// Drop the session on logout. Unlike [`fail`](Self::fail), requests may go
  /// out again (anonymously) afterwards.
  pub(crate) fn end_session(&self) -> Result<(), ApiError> {
    let mut phase = self.inner.lock_phase();
    self.inner.forget_failure(&mut phase);
    self.inner.store.clear()
  }

  /// Attach a freshly fetched profile to the installed session.
  ///
  /// Nothing is written when there is no session, or when the session now
  /// belongs to another user (a new login landed while the profile was
  /// being fetched).
  pub(crate) fn attach_profile(&self, profile: UserProfile) -> Result<(), ApiError> {
    let _phase = self.inner.lock_phase();
    let Some(session) = self.inner.store.read() else {
      return Ok(());
    };
    if session.current_user().is_some_and(|user| user.id != profile.id) {
      debug!("session owner changed while fetching the profile; not attaching");
      return Ok(());
    }
    self.inner.store.replace(session.with_user(Some(profile)))
  }
}

impl Inner {
  fn lock_phase(&self) -> std::sync::MutexGuard<'_, Phase> {
    self.phase.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn forget_failure(&self, phase: &mut Phase) {
    if matches!(*phase, Phase::Failed) {
      *phase = Phase::Idle;
    }
  }

  fn fail_locked(&self, phase: &mut Phase) {
    if let Err(e) = self.store.clear() {
      warn!(error = %e, "failed to clear persisted session");
    }
    *phase = Phase::Failed;
  }

  /// Start the renewal on its own task so that callers abandoning their
  /// request cannot cancel it halfway through.
  fn spawn_renewal(self: &Arc<Self>, current: Session) -> SharedRenewal {
    let (tx, rx) = oneshot::channel();
    let inner = Arc::clone(self);

    tokio::spawn(async move {
      let result = inner.renew(&current).await;
      let outcome = inner.settle(&current, result);
      let _ = tx.send(outcome);
    });

    async move { rx.await.unwrap_or(Err(ApiError::Aborted)) }
      .boxed()
      .shared()
  }

  async fn renew(&self, current: &Session) -> Result<Session, ApiError> {
    info!("renewing access token");

    let request = ApiRequest::post(self.refresh_path.as_str())
      .with_body(json!({ "refreshToken": current.refresh_token() }));
    let data = self.transport.execute(&request, None).await?;
    let tokens: AuthTokens = decode(data)?;

    let user = tokens.user.clone().or_else(|| current.current_user().cloned());
    Ok(Session::from_tokens(tokens, Utc::now())?.with_user(user))
  }

  /// Apply the renewal outcome to the store and the phase in one critical
  /// section, before any waiter observes it.
  fn settle(&self, current: &Session, result: Result<Session, ApiError>) -> Result<Session, ApiError> {
    let mut phase = self.lock_phase();

    // Logged out or logged in again while the renewal was in flight
    let installed = self.store.read();
    if installed.as_ref().map(Session::access_token) != Some(current.access_token()) {
      debug!("session changed during renewal; discarding renewal result");
      *phase = Phase::Idle;
      return installed.ok_or(ApiError::Unauthenticated);
    }

    match result {
      Ok(session) => {
        // A profile attached while the renewal was in flight is kept
        let session = if session.current_user().is_none() {
          let user = installed.as_ref().and_then(|s| s.current_user().cloned());
          session.with_user(user)
        } else {
          session
        };
        self.install_renewed(&mut phase, session)
      }
      Err(e) if e.is_credential_rejection() => {
        warn!(error = %e, "refresh token rejected; session cleared");
        self.fail_locked(&mut phase);
        Err(ApiError::Unauthenticated)
      }
      Err(e) => {
        // Server unreachable: keep the session, the next call tries again
        warn!(error = %e, expires_at = %current.expires_at(), "token renewal failed");
        *phase = Phase::Idle;
        Err(e)
      }
    }
  }

  fn install_renewed(&self, phase: &mut Phase, session: Session) -> Result<Session, ApiError> {
    match self.store.replace(session.clone()) {
      Ok(()) => {
        info!(expires_at = %session.expires_at(), "access token renewed");
        *phase = Phase::Idle;
        Ok(session)
      }
      Err(e) => {
        warn!(error = %e, "renewed session could not be stored");
        self.fail_locked(phase);
        Err(ApiError::Unauthenticated)
      }
    }
  }
}
