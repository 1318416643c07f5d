//! Session registry: bounded, expiring map of open inference sessions.
//!
//! Two levels of locking:
//! - one global critical section (a `parking_lot::Mutex` around the [`TimedStore`])
//!   covering capacity checks, insertion, lookup-with-refresh and removal. It is held
//!   for map operations and the engine's `open_session` only, never across an
//!   `.await` or a generation;
//! - one async mutex per session guarding its engine [`Session`]. Generations on the
//!   same session queue on it in FIFO order; different sessions never contend.
//!
//! The engine session sits in an `Option` inside its lock. Releasing a session
//! (explicit close, expiry sweep or shutdown) takes it out under that lock and hands
//! it to [`LanguageModel::close_session`], so it is closed exactly once and any lease
//! acquired afterwards sees the slot empty.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use infer_engine::{LanguageModel, Session};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMappedMutexGuard, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::ModelCatalog;
use crate::clock::Clock;
use crate::error::{Result, ServerError};
use crate::timed_store::TimedStore;

/// Opaque session handle given to clients. Rendered as 32 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for SessionId {
    type Err = ServerError;

    /// Malformed ids cannot name a live session, so they report as not found.
    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| ServerError::SessionNotFound(s.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct RegistryLimits {
    pub max_sessions: usize,
    /// Idle TTL, refreshed on every touch.
    pub step_timeout: Duration,
    /// Bound on waiting for a busy session; `None` waits indefinitely.
    pub lock_timeout: Option<Duration>,
}

/// Registry-side record of one open session.
pub struct SessionSlot {
    id: SessionId,
    model_name: String,
    max_length: usize,
    created_at: Instant,
    model: Arc<dyn LanguageModel>,
    handle: Arc<AsyncMutex<Option<Session>>>,
}

impl SessionSlot {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Close the engine session if nobody has yet. Waits for an in-flight
    /// generation to finish first. Returns whether this call closed it.
    async fn release(&self) -> bool {
        let mut handle = self.handle.lock().await;
        let Some(session) = handle.take() else {
            return false;
        };
        if let Err(e) = self.model.close_session(session) {
            warn!(session = %self.id, model = %self.model_name, error = %e, "failed to close engine session");
        }
        true
    }
}

/// Exclusive access to one session's engine state. The session lock is held until
/// the lease is dropped.
pub struct SessionLease {
    slot: Arc<SessionSlot>,
    guard: OwnedMappedMutexGuard<Option<Session>, Session>,
}

impl SessionLease {
    pub fn id(&self) -> SessionId {
        self.slot.id
    }

    pub fn model_name(&self) -> &str {
        &self.slot.model_name
    }
}

impl std::ops::Deref for SessionLease {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.guard
    }
}

impl std::ops::DerefMut for SessionLease {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.guard
    }
}

/// Point-in-time view of a live session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub model: String,
    pub max_length: usize,
    pub age: Duration,
    pub expires_in: Duration,
}

pub struct SessionRegistry {
    store: Mutex<TimedStore<SessionId, Arc<SessionSlot>>>,
    catalog: Arc<ModelCatalog>,
    limits: RegistryLimits,
}

impl SessionRegistry {
    pub fn new(catalog: Arc<ModelCatalog>, limits: RegistryLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Mutex::new(TimedStore::new(clock)),
            catalog,
            limits,
        }
    }

    pub fn capacity(&self) -> usize {
        self.limits.max_sessions
    }

    pub fn limits(&self) -> &RegistryLimits {
        &self.limits
    }

    /// Live (non-expired) sessions.
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open a new session on `model_name`.
    ///
    /// The capacity check, the engine `open_session` call and the insertion happen in
    /// one critical section: releasing it in between would let two callers pass the
    /// check together and overshoot the cap.
    pub async fn open(&self, model_name: &str, max_length: usize) -> Result<SessionId> {
        let entry = self.catalog.resolve(model_name)?;

        let (opened, expired) = {
            let mut store = self.store.lock();
            let expired = store.drain_expired();
            let opened = if store.len() >= self.limits.max_sessions {
                Err(ServerError::CapacityExceeded {
                    max: self.limits.max_sessions,
                })
            } else {
                entry.model.open_session(max_length).map(|session| {
                    let id = SessionId::new();
                    let slot = Arc::new(SessionSlot {
                        id,
                        model_name: entry.name.clone(),
                        max_length,
                        created_at: store.now(),
                        model: Arc::clone(&entry.model),
                        handle: Arc::new(AsyncMutex::new(Some(session))),
                    });
                    let deadline = store.now() + self.limits.step_timeout;
                    store.store(id, slot, deadline);
                    id
                })
                .map_err(ServerError::from)
            };
            (opened, expired)
        };
        release_detached(expired);

        let id = opened?;
        info!(session = %id, model = %entry.name, max_length, "opened inference session");
        Ok(id)
    }

    /// Remove and release a session. Unknown, expired and already-closed ids fail
    /// with `SessionNotFound` and leave the registry untouched.
    pub async fn close(&self, id: &SessionId) -> Result<()> {
        let (slot, expired) = {
            let mut store = self.store.lock();
            let expired = store.drain_expired();
            (store.remove(id), expired)
        };
        release_detached(expired);

        let slot = slot.ok_or_else(|| ServerError::SessionNotFound(id.to_string()))?;
        let model = slot.model_name.clone();
        // Released on its own task so a dropped caller cannot strand the engine session.
        await_release(spawn_release(*id, slot)).await;
        info!(session = %id, %model, "closed inference session");
        Ok(())
    }

    /// Look up a live session and push its deadline to `now + step_timeout`.
    /// Expired sessions found on the way are released on spawned tasks, so this must
    /// run inside a Tokio runtime.
    pub(crate) fn touch(&self, id: &SessionId) -> Result<Arc<SessionSlot>> {
        let (slot, expired) = {
            let mut store = self.store.lock();
            let expired = store.drain_expired();
            let slot = store.get(id).cloned();
            if let Some(slot) = &slot {
                let deadline = store.now() + self.limits.step_timeout;
                store.store(*id, Arc::clone(slot), deadline);
            }
            (slot, expired)
        };
        release_detached(expired);

        slot.ok_or_else(|| ServerError::SessionNotFound(id.to_string()))
    }

    /// [`touch`](Self::touch) the session, then take its lock outside the critical
    /// section. Waits behind other generations on the same session.
    pub async fn touch_and_lock(&self, id: &SessionId) -> Result<SessionLease> {
        let slot = self.touch(id)?;
        let handle = Arc::clone(&slot.handle);

        let guard: OwnedMutexGuard<Option<Session>> = match self.limits.lock_timeout {
            Some(limit) => tokio::time::timeout(limit, handle.lock_owned())
                .await
                .map_err(|_| ServerError::Timeout {
                    session: id.to_string(),
                    waited: limit,
                })?,
            None => handle.lock_owned().await,
        };

        // Empty means the session was closed or evicted while we waited.
        let guard = OwnedMutexGuard::try_map(guard, Option::as_mut)
            .map_err(|_| ServerError::SessionNotFound(id.to_string()))?;
        debug!(session = %id, "acquired session lock");
        Ok(SessionLease { slot, guard })
    }

    /// Remove every expired session and wait for each to be released.
    pub async fn sweep_expired(&self) -> usize {
        let expired = self.store.lock().drain_expired();
        release_all(expired).await
    }

    /// Release every session, live or expired. Used on shutdown.
    pub async fn close_all(&self) -> usize {
        let slots = self.store.lock().drain();
        release_all(slots).await
    }

    /// Live sessions, most recently used first.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let store = self.store.lock();
        let now = store.now();
        store
            .iter_recent()
            .into_iter()
            .map(|(id, slot, expires_at)| SessionInfo {
                id: *id,
                model: slot.model_name.clone(),
                max_length: slot.max_length,
                age: now.saturating_duration_since(slot.created_at),
                expires_in: expires_at.saturating_duration_since(now),
            })
            .collect()
    }

    /// Periodically release expired sessions until `cancel` fires.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let released = registry.sweep_expired().await;
                        if released > 0 {
                            info!(released, live = registry.len(), "swept expired sessions");
                        }
                    }
                }
            }
            debug!("session reaper stopped");
        })
    }
}

/// Release a slot that has left the store on its own task. The release waits for any
/// in-flight generation, and it must complete even if whoever asked for it goes away.
fn spawn_release(id: SessionId, slot: Arc<SessionSlot>) -> JoinHandle<bool> {
    tokio::spawn(async move {
        let released = slot.release().await;
        if released {
            debug!(session = %id, model = %slot.model_name, "released engine session");
        }
        released
    })
}

async fn await_release(handle: JoinHandle<bool>) -> bool {
    match handle.await {
        Ok(released) => released,
        Err(e) => {
            warn!(error = %e, "session release task failed");
            false
        }
    }
}

/// Release evicted sessions without blocking the caller; one of them may still be
/// finishing a generation.
fn release_detached(expired: Vec<(SessionId, Arc<SessionSlot>)>) {
    for (id, slot) in expired {
        spawn_release(id, slot);
    }
}

/// Release every slot concurrently and count the engine sessions actually closed.
async fn release_all(slots: Vec<(SessionId, Arc<SessionSlot>)>) -> usize {
    let handles: Vec<_> = slots
        .into_iter()
        .map(|(id, slot)| spawn_release(id, slot))
        .collect();
    let mut released = 0;
    for handle in handles {
        if await_release(handle).await {
            released += 1;
        }
    }
    released
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use infer_runtime::{ToyModel, WordTokenizer};

    fn registry(max_sessions: usize) -> (Arc<ManualClock>, Arc<ToyModel>, SessionRegistry) {
        let clock = Arc::new(ManualClock::new());
        let tokenizer = WordTokenizer::default();
        let model = Arc::new(ToyModel::new("m", tokenizer.base_len()));
        let catalog = ModelCatalog::new("m").with_model(
            "m",
            Arc::clone(&model) as Arc<dyn LanguageModel>,
            Arc::new(tokenizer),
        );
        let limits = RegistryLimits {
            max_sessions,
            step_timeout: Duration::from_secs(60),
            lock_timeout: None,
        };
        let registry = SessionRegistry::new(Arc::new(catalog), limits, clock.clone());
        (clock, model, registry)
    }

    #[test]
    fn session_id_display_is_simple_hex() {
        let id = SessionId::new();
        let rendered = id.to_string();
        assert_eq!(rendered.len(), 32);
        assert!(rendered.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(rendered.parse::<SessionId>().unwrap(), id);
    }

    #[test]
    fn malformed_session_id_is_not_found() {
        let err = "not-a-session".parse::<SessionId>().unwrap_err();
        assert!(matches!(err, ServerError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn open_unknown_model_fails() {
        let (_clock, model, registry) = registry(2);
        let err = registry.open("other", 16).await.unwrap_err();
        assert!(matches!(err, ServerError::UnknownModel(_)));
        assert_eq!(model.open_sessions(), 0);
    }

    #[tokio::test]
    async fn engine_open_failure_inserts_nothing() {
        let (_clock, _model, registry) = registry(2);
        let err = registry.open("m", 0).await.unwrap_err();
        assert!(matches!(err, ServerError::Generation(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn touch_refreshes_deadline() {
        let (clock, _model, registry) = registry(2);
        let id = registry.open("m", 16).await.unwrap();

        clock.advance(Duration::from_secs(45));
        registry.touch(&id).unwrap();
        clock.advance(Duration::from_secs(45));
        assert!(registry.touch(&id).is_ok());

        let info = &registry.snapshot()[0];
        assert_eq!(info.expires_in, Duration::from_secs(60));
        assert_eq!(info.age, Duration::from_secs(90));
    }

    #[tokio::test]
    async fn lease_exposes_engine_session() {
        let (_clock, _model, registry) = registry(1);
        let id = registry.open("m", 16).await.unwrap();
        let mut lease = registry.touch_and_lock(&id).await.unwrap();
        assert_eq!(lease.id(), id);
        assert_eq!(lease.model_name(), "m");
        assert_eq!(lease.max_length(), 16);
        lease.extend(&[1, 2]).unwrap();
        drop(lease);

        let lease = registry.touch_and_lock(&id).await.unwrap();
        assert_eq!(lease.history(), &[1, 2]);
    }

    #[tokio::test]
    async fn close_all_releases_everything() {
        let (clock, model, registry) = registry(3);
        registry.open("m", 8).await.unwrap();
        registry.open("m", 8).await.unwrap();
        clock.advance(Duration::from_secs(61));
        registry.open("m", 8).await.unwrap();
        // Let the detached release of the two expired sessions run.
        while model.open_sessions() > 1 {
            tokio::task::yield_now().await;
        }

        assert_eq!(registry.close_all().await, 1);
        assert_eq!(model.open_sessions(), 0);
        assert!(registry.is_empty());
    }
}
