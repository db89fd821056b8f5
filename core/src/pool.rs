use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::native::NativeHandle;

/// A live, in-memory session: the opaque native handle (absent if it was
/// evicted after an I/O failure and not yet rebuilt) plus the cancellation
/// token of its poll task, if one is running. Never persisted.
#[derive(Default)]
pub struct LiveSession {
    pub client: Option<Arc<dyn NativeHandle>>,
    pub cancel: Option<CancellationToken>,
}

/// Thread-safe `id -> LiveSession` registry. This is the system's only
/// shared mutable structure (§5): its concurrent-map operations are the
/// synchronization boundary for a given id, so the lifecycle engine and the
/// poll task never need a separate per-id lock.
///
/// Backed by [`DashMap`] rather than a single `RwLock<HashMap<_>>` so
/// operations on different ids never contend with each other.
#[derive(Default)]
pub struct SessionPool {
    sessions: DashMap<Uuid, LiveSession>,
}

impl SessionPool {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Returns the live client handle for `id`, if any.
    pub fn load_client(&self, id: Uuid) -> Option<Arc<dyn NativeHandle>> {
        self.sessions.get(&id).and_then(|s| s.client.clone())
    }

    /// Returns the poll task's cancellation token for `id`, if a poll task
    /// is currently registered.
    pub fn load_cancel(&self, id: Uuid) -> Option<CancellationToken> {
        self.sessions.get(&id).and_then(|s| s.cancel.clone())
    }

    /// Installs `client` as the live handle for `id`, preserving any
    /// existing cancel token.
    pub fn store_client(&self, id: Uuid, client: Arc<dyn NativeHandle>) {
        self.sessions
            .entry(id)
            .and_modify(|s| s.client = Some(client.clone()))
            .or_insert(LiveSession {
                client: Some(client),
                cancel: None,
            });
    }

    /// Installs `cancel` as the poll task's token for `id`, creating the
    /// entry if the poll task connected before any client was stored.
    ///
    /// This unconditionally overwrites any existing token; callers that
    /// need "only if absent" semantics (starting a poll task) must use
    /// [`Self::load_or_create_cancel`] instead, which performs the
    /// check-and-set atomically under one entry access.
    pub fn store_cancel(&self, id: Uuid, cancel: CancellationToken) {
        self.sessions
            .entry(id)
            .and_modify(|s| s.cancel = Some(cancel.clone()))
            .or_insert(LiveSession {
                client: None,
                cancel: Some(cancel),
            });
    }

    /// The `load_or_create` primitive spec §4.2 calls for, specialized to
    /// the poll-task slot: if a cancel token is already registered for
    /// `id`, returns it and `false`; otherwise invokes `factory`, installs
    /// the result under the same entry access, and returns it with `true`.
    ///
    /// This closes the race a separate `load_cancel`-then-`store_cancel`
    /// pair leaves open, where two concurrent `Start(id, ...)` calls can
    /// both observe no cancel token, both spawn a poll task, and overwrite
    /// each other's token — leaving two live tasks for one id and an
    /// unreachable orphan. `DashMap::entry` holds the shard lock for `id`
    /// across the whole check-and-set, so only one caller ever sees
    /// `created = true`.
    pub fn load_or_create_cancel(
        &self,
        id: Uuid,
        factory: impl FnOnce() -> CancellationToken,
    ) -> (CancellationToken, bool) {
        match self.sessions.entry(id) {
            Entry::Occupied(mut entry) => {
                if let Some(existing) = entry.get().cancel.clone() {
                    (existing, false)
                } else {
                    let token = factory();
                    entry.get_mut().cancel = Some(token.clone());
                    (token, true)
                }
            }
            Entry::Vacant(entry) => {
                let token = factory();
                entry.insert(LiveSession {
                    client: None,
                    cancel: Some(token.clone()),
                });
                (token, true)
            }
        }
    }

    /// Cancels every running poll task and clears their tokens, for use at
    /// process shutdown (§5: "cancel all poll tasks").
    pub fn cancel_all(&self) {
        for mut entry in self.sessions.iter_mut() {
            if let Some(cancel) = entry.cancel.take() {
                cancel.cancel();
            }
        }
    }

    /// Clears the cancel token for `id` without evicting the client,
    /// leaving a static-mode session able to serve synchronous reads.
    pub fn clear_cancel(&self, id: Uuid) {
        if let Some(mut entry) = self.sessions.get_mut(&id) {
            entry.cancel = None;
        }
    }

    /// Evicts just the client for `id` after an I/O failure, leaving any
    /// running poll task's cancel token (and thus the "active" invariant)
    /// untouched so the next tick rebuilds the client in place.
    pub fn evict_client(&self, id: Uuid) {
        if let Some(mut entry) = self.sessions.get_mut(&id) {
            entry.client = None;
        }
    }

    /// Removes `id` entirely, returning what was there (if anything) so the
    /// caller can close the client and invoke the cancel token.
    pub fn delete(&self, id: Uuid) -> Option<LiveSession> {
        self.sessions.remove(&id).map(|(_, v)| v)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.sessions.contains_key(&id)
    }
}
