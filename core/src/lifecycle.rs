use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{info, warn};
use uuid::Uuid;

use crate::connector::Connector;
use crate::error::{CoreError, CoreResult};
use crate::pool::SessionPool;
use crate::persistence::Repository;
use crate::record::{normalize_timeout, Mode, SessionRecord, Status};

/// Fields accepted by [`LifecycleEngine::register`]; validation and
/// defaulting happen inside `register` itself (§4.4).
pub struct RegisterRequest {
    pub endpoint: String,
    pub timeout_ms: i64,
    pub series: Option<String>,
    pub model: Option<String>,
}

/// The state machine and CRUD surface for session records (§4.4): register,
/// list-with-live-check, check, delete. Holds no poll-task knowledge of its
/// own beyond cancelling it on delete; see [`crate::poller::Poller`] for the
/// periodic side.
pub struct LifecycleEngine {
    repo: Arc<dyn Repository>,
    pool: Arc<SessionPool>,
    connector: Arc<Connector>,
}

impl LifecycleEngine {
    pub fn new(repo: Arc<dyn Repository>, pool: Arc<SessionPool>, connector: Arc<Connector>) -> Self {
        Self {
            repo,
            pool,
            connector,
        }
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    pub fn connector(&self) -> &Arc<Connector> {
        &self.connector
    }

    /// Registers a new controller. No record is inserted unless the connect
    /// succeeds.
    pub async fn register(&self, req: RegisterRequest) -> CoreResult<SessionRecord> {
        let (host, port) = SessionRecord::parse_endpoint(&req.endpoint)
            .ok_or_else(|| CoreError::BadRequest(format!("invalid endpoint {:?}", req.endpoint)))?;

        if let Ok(existing) = self.repo.get_by_endpoint(&req.endpoint).await {
            return Err(CoreError::Conflict {
                endpoint: req.endpoint,
                id: existing.id,
            });
        }

        let now = Utc::now();
        let mut record = SessionRecord::new(
            req.endpoint.clone(),
            normalize_timeout(req.timeout_ms),
            req.series,
            req.model,
            now,
        );

        let handle = self
            .connector
            .connect(&req.endpoint, &host, port, record.timeout_ms, &record.series)
            .await?;

        record.status = Status::Connected;
        record.mode = Mode::Static;

        self.repo.create(&record).await.map_err(|err| {
            // The connect succeeded but persistence lost the race (e.g. a
            // concurrent duplicate register): the handle we just opened is
            // orphaned, so close it before surfacing the error.
            let handle = handle.clone();
            tokio::spawn(async move { handle.close().await });
            err
        })?;

        self.pool.store_client(record.id, handle);
        info!(id = %record.id, endpoint = %record.endpoint, "registered session");
        Ok(record)
    }

    /// Snapshots all records, then runs [`Self::check`] on each in parallel.
    /// A failing check still yields the persisted record (§4.4 `List`).
    pub async fn list(&self) -> CoreResult<Vec<SessionRecord>> {
        let records = self.repo.get_all().await?;
        let checked = join_all(records.into_iter().map(|record| {
            let engine = self;
            async move {
                match engine.check(record.id).await {
                    Ok(updated) => updated,
                    Err(_) => record,
                }
            }
        }))
        .await;
        Ok(checked)
    }

    /// Ensures a live, healthy client for `id`, updating `status` on change.
    /// Returns the (possibly stale) record alongside an error when the
    /// controller is unreachable, so callers can still show best-effort
    /// state (§4.4, §7).
    pub async fn check(&self, id: Uuid) -> CoreResult<SessionRecord> {
        let mut record = self.repo.get_by_id(id).await?;

        let client = match self.pool.load_client(id) {
            Some(client) => client,
            None => {
                let (host, port) = SessionRecord::parse_endpoint(&record.endpoint)
                    .ok_or_else(|| CoreError::BadRequest(format!("invalid endpoint {:?}", record.endpoint)))?;
                match self
                    .connector
                    .connect(&record.endpoint, &host, port, record.timeout_ms, &record.series)
                    .await
                {
                    Ok(handle) => {
                        self.pool.store_client(id, handle.clone());
                        handle
                    }
                    Err(err) => {
                        self.set_status(&mut record, Status::Reconnecting).await?;
                        return Err(err);
                    }
                }
            }
        };

        match tokio::time::timeout(
            std::time::Duration::from_millis(crate::record::HARD_TIMEOUT_MS),
            client.get_machine_state(),
        )
        .await
        {
            Ok(Ok(_state)) => {
                self.set_status(&mut record, Status::Connected).await?;
                Ok(record)
            }
            Ok(Err(source)) => {
                client.close().await;
                self.pool.evict_client(id);
                self.set_status(&mut record, Status::Reconnecting).await?;
                Err(CoreError::Unreachable {
                    endpoint: record.endpoint,
                    source,
                })
            }
            Err(_elapsed) => {
                client.close().await;
                self.pool.evict_client(id);
                self.set_status(&mut record, Status::Reconnecting).await?;
                Err(CoreError::Timeout {
                    endpoint: record.endpoint,
                    timeout_ms: crate::record::HARD_TIMEOUT_MS,
                })
            }
        }
    }

    /// Cancels any poll task, closes and removes any live client, then
    /// deletes the record. Idempotent at every layer.
    pub async fn delete(&self, id: Uuid) -> CoreResult<()> {
        if let Some(cancel) = self.pool.load_cancel(id) {
            cancel.cancel();
        }
        if let Some(live) = self.pool.delete(id) {
            if let Some(client) = live.client {
                client.close().await;
            }
        }
        self.repo.delete(id).await?;
        info!(id = %id, "deleted session");
        Ok(())
    }

    /// Writes `status` only when it differs from the persisted value, per
    /// the "write only on change" rule (§4.4, §8).
    pub async fn set_status(&self, record: &mut SessionRecord, status: Status) -> CoreResult<()> {
        if record.status == status {
            return Ok(());
        }
        record.status = status;
        record.updated_at = Utc::now();
        if let Err(err) = self.repo.update(record).await {
            warn!(id = %record.id, error = %err, "failed to persist status transition");
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{ConnectParams, MachineState, NativeClient, NativeHandle, Snapshot};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemRepo {
        records: Mutex<std::collections::HashMap<Uuid, SessionRecord>>,
    }

    #[async_trait]
    impl Repository for MemRepo {
        async fn create(&self, record: &SessionRecord) -> CoreResult<()> {
            self.records.lock().unwrap().insert(record.id, record.clone());
            Ok(())
        }
        async fn update(&self, record: &SessionRecord) -> CoreResult<()> {
            self.records.lock().unwrap().insert(record.id, record.clone());
            Ok(())
        }
        async fn delete(&self, id: Uuid) -> CoreResult<()> {
            self.records.lock().unwrap().remove(&id);
            Ok(())
        }
        async fn get_by_id(&self, id: Uuid) -> CoreResult<SessionRecord> {
            self.records
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(CoreError::NotFound(id))
        }
        async fn get_by_endpoint(&self, endpoint: &str) -> CoreResult<SessionRecord> {
            self.records
                .lock()
                .unwrap()
                .values()
                .find(|r| r.endpoint == endpoint)
                .cloned()
                .ok_or_else(|| CoreError::NotFound(Uuid::nil()))
        }
        async fn get_all(&self) -> CoreResult<Vec<SessionRecord>> {
            Ok(self.records.lock().unwrap().values().cloned().collect())
        }
    }

    #[derive(Debug)]
    struct StubHandle;

    #[async_trait]
    impl NativeHandle for StubHandle {
        async fn get_machine_state(&self) -> anyhow::Result<MachineState> {
            Ok(MachineState(serde_json::json!({})))
        }
        async fn get_current_data(&self) -> anyhow::Result<Snapshot> {
            Ok(Snapshot(serde_json::json!({})))
        }
        async fn get_control_program(&self) -> anyhow::Result<String> {
            Ok(String::new())
        }
        async fn close(&self) {}
    }

    /// A client whose `connect` fails `fail_connects` times before
    /// succeeding, and whose handles fail their next `get_machine_state`
    /// call `fail_probes` times before succeeding — enough knobs to drive
    /// both the register and check code paths deterministically.
    struct StubClient {
        fail_connects: AtomicUsize,
        fail_probes: AtomicUsize,
    }

    impl StubClient {
        fn always_succeeds() -> Self {
            Self {
                fail_connects: AtomicUsize::new(0),
                fail_probes: AtomicUsize::new(0),
            }
        }

        fn failing_connect() -> Self {
            Self {
                fail_connects: AtomicUsize::new(usize::MAX),
                fail_probes: AtomicUsize::new(0),
            }
        }

        fn failing_probe_once() -> Self {
            Self {
                fail_connects: AtomicUsize::new(0),
                fail_probes: AtomicUsize::new(1),
            }
        }
    }

    struct ProbeHandle {
        fail_probes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NativeHandle for ProbeHandle {
        async fn get_machine_state(&self) -> anyhow::Result<MachineState> {
            if self.fail_probes.load(Ordering::SeqCst) > 0 {
                self.fail_probes.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("probe failed")
            } else {
                Ok(MachineState(serde_json::json!({})))
            }
        }
        async fn get_current_data(&self) -> anyhow::Result<Snapshot> {
            Ok(Snapshot(serde_json::json!({})))
        }
        async fn get_control_program(&self) -> anyhow::Result<String> {
            Ok(String::new())
        }
        async fn close(&self) {}
    }

    #[async_trait]
    impl NativeClient for StubClient {
        async fn startup(&self, _log_mode: &str, _log_path: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn connect(&self, _params: ConnectParams<'_>) -> anyhow::Result<Box<dyn NativeHandle>> {
            if self.fail_connects.load(Ordering::SeqCst) > 0 {
                self.fail_connects.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("connection refused")
            } else if self.fail_probes.load(Ordering::SeqCst) > 0 {
                Ok(Box::new(ProbeHandle {
                    fail_probes: Arc::new(AtomicUsize::new(self.fail_probes.load(Ordering::SeqCst))),
                }))
            } else {
                Ok(Box::new(StubHandle))
            }
        }
        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn make_engine(client: StubClient) -> (LifecycleEngine, Arc<MemRepo>, Arc<SessionPool>) {
        let repo = Arc::new(MemRepo::default());
        let pool = Arc::new(SessionPool::new());
        let connector = Arc::new(Connector::new(Arc::new(client)));
        let engine = LifecycleEngine::new(repo.clone(), pool.clone(), connector);
        (engine, repo, pool)
    }

    fn register_req(endpoint: &str) -> RegisterRequest {
        RegisterRequest {
            endpoint: endpoint.to_string(),
            timeout_ms: 0,
            series: None,
            model: None,
        }
    }

    #[test]
    fn register_request_carries_raw_fields() {
        let req = register_req("10.0.0.1:8193");
        assert_eq!(req.endpoint, "10.0.0.1:8193");
    }

    #[tokio::test]
    async fn register_twice_on_same_endpoint_is_conflict() {
        let (engine, _repo, _pool) = make_engine(StubClient::always_succeeds());

        engine.register(register_req("10.0.0.1:8193")).await.unwrap();
        let second = engine.register(register_req("10.0.0.1:8193")).await;

        assert!(matches!(second, Err(CoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn register_with_failed_connect_persists_no_record() {
        let (engine, repo, _pool) = make_engine(StubClient::failing_connect());

        let result = engine.register(register_req("10.0.0.1:8193")).await;

        assert!(result.is_err());
        assert!(repo.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn check_on_probe_timeout_evicts_client_and_marks_reconnecting() {
        let (engine, repo, pool) = make_engine(StubClient::failing_probe_once());

        let record = engine.register(register_req("10.0.0.1:8193")).await.unwrap();
        assert!(pool.load_client(record.id).is_some());

        let result = engine.check(record.id).await;

        assert!(result.is_err());
        assert!(pool.load_client(record.id).is_none());
        assert_eq!(
            repo.get_by_id(record.id).await.unwrap().status,
            Status::Reconnecting
        );
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_cancels_poll_task() {
        let (engine, repo, pool) = make_engine(StubClient::always_succeeds());
        let record = engine.register(register_req("10.0.0.1:8193")).await.unwrap();

        let (cancel, _created) =
            pool.load_or_create_cancel(record.id, tokio_util::sync::CancellationToken::new);

        engine.delete(record.id).await.unwrap();

        assert!(cancel.is_cancelled());
        assert!(repo.get_by_id(record.id).await.is_err());
        assert!(engine.delete(record.id).await.is_ok());
    }
}
