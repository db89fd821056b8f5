use std::sync::Arc;

use uuid::Uuid;

use crate::connector::Connector;
use crate::error::CoreResult;
use crate::lifecycle::{LifecycleEngine, RegisterRequest};
use crate::native::NativeClient;
use crate::persistence::Repository;
use crate::pool::SessionPool;
use crate::poller::Poller;
use crate::publisher::Publisher;
use crate::record::{SessionRecord, Status};
use crate::restore::RestoreCoordinator;

/// Top-level facade wiring together the persistence port, session pool,
/// connector, lifecycle engine, poller and restore coordinator into the one
/// object the daemon's HTTP handlers talk to.
///
/// This mirrors the role `Conductor<B>` plays over its session/task/backend
/// trio: a thin composition root, not a place for new logic.
pub struct SessionManager {
    lifecycle: Arc<LifecycleEngine>,
    poller: Arc<Poller>,
    pool: Arc<SessionPool>,
    native: Arc<dyn NativeClient>,
}

impl SessionManager {
    pub fn new(
        repo: Arc<dyn Repository>,
        native: Arc<dyn NativeClient>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        let pool = Arc::new(SessionPool::new());
        let connector = Arc::new(Connector::new(native.clone()));
        let lifecycle = Arc::new(LifecycleEngine::new(repo, pool.clone(), connector.clone()));
        let poller = Arc::new(Poller::new(
            lifecycle.repository().clone(),
            pool.clone(),
            connector,
            publisher,
        ));

        Self {
            lifecycle,
            poller,
            pool,
            native,
        }
    }

    /// Shuts the manager down (§5): cancels every running poll task, then
    /// tears down the native client library's process-wide state, bounded
    /// by `budget` so a hung vendor library can't block process exit
    /// indefinitely. An in-flight tick may still be mid-publish when its
    /// task is cancelled — that drop is allowed; skipping the cancellation
    /// itself is not.
    pub async fn shutdown(&self, budget: std::time::Duration) {
        self.pool.cancel_all();

        match tokio::time::timeout(budget, self.native.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "native client shutdown returned an error");
            }
            Err(_elapsed) => {
                tracing::warn!(?budget, "native client shutdown did not complete within budget");
            }
        }
    }

    /// Spawns the restore coordinator as a background task. Must be called
    /// once at startup, after the manager itself is constructed but without
    /// blocking on it.
    pub fn spawn_restore(&self) {
        let coordinator = Arc::new(RestoreCoordinator::new(
            self.lifecycle.repository().clone(),
            self.lifecycle.clone(),
            self.poller.clone(),
        ));
        coordinator.spawn();
    }

    pub async fn register(&self, req: RegisterRequest) -> CoreResult<SessionRecord> {
        self.lifecycle.register(req).await
    }

    pub async fn list(&self) -> CoreResult<Vec<SessionRecord>> {
        self.lifecycle.list().await
    }

    pub async fn check(&self, id: Uuid) -> CoreResult<SessionRecord> {
        self.lifecycle.check(id).await
    }

    /// Raw stored-record lookup, with no live check. Used by the HTTP layer
    /// to still show best-effort state when [`Self::check`] fails (§6.1,
    /// §7: "Check failures return the stored record along with the
    /// error").
    pub async fn get_record(&self, id: Uuid) -> CoreResult<SessionRecord> {
        self.lifecycle.repository().get_by_id(id).await
    }

    pub async fn delete(&self, id: Uuid) -> CoreResult<()> {
        self.lifecycle.delete(id).await
    }

    pub async fn start_polling(&self, id: Uuid, interval_ms: i64) -> CoreResult<SessionRecord> {
        self.poller.start(id, interval_ms).await
    }

    pub async fn stop_polling(&self, id: Uuid) -> CoreResult<SessionRecord> {
        self.poller.stop(id).await
    }

    /// Program retrieval (§4.7): obtain-or-create the client for `id` and
    /// return the control program's textual payload. Failures map to
    /// `reconnecting` the same way the poller's recovery path does, without
    /// touching any running poll task.
    pub async fn get_control_program(&self, id: Uuid) -> CoreResult<String> {
        let mut record = self.lifecycle.repository().get_by_id(id).await?;

        let client = match self.pool.load_client(id) {
            Some(client) => client,
            None => {
                let (host, port) = SessionRecord::parse_endpoint(&record.endpoint)
                    .ok_or_else(|| crate::error::CoreError::BadRequest(format!("invalid endpoint {:?}", record.endpoint)))?;
                match self
                    .lifecycle
                    .connector()
                    .connect(&record.endpoint, &host, port, record.timeout_ms, &record.series)
                    .await
                {
                    Ok(handle) => {
                        self.pool.store_client(id, handle.clone());
                        handle
                    }
                    Err(err) => {
                        self.lifecycle
                            .set_status(&mut record, Status::Reconnecting)
                            .await?;
                        return Err(err);
                    }
                }
            }
        };

        match client.get_control_program().await {
            Ok(program) => {
                if record.status != Status::Connected {
                    self.lifecycle
                        .set_status(&mut record, Status::Connected)
                        .await?;
                }
                Ok(program)
            }
            Err(source) => {
                self.pool.evict_client(id);
                self.lifecycle
                    .set_status(&mut record, Status::Reconnecting)
                    .await?;
                Err(crate::error::CoreError::Unreachable {
                    endpoint: record.endpoint,
                    source,
                })
            }
        }
    }
}
