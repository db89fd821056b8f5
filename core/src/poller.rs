use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::connector::Connector;
use crate::error::{CoreError, CoreResult};
use crate::persistence::Repository;
use crate::pool::SessionPool;
use crate::publisher::Publisher;
use crate::record::{normalize_interval, Mode, SessionRecord, Status, POLL_BACKOFF_MS};

/// Per-session periodic task runner (§4.5): fixed-rate scheduling with
/// drift correction, connect-on-demand recovery, and at-most-one task per
/// id. Shares the repository/pool/connector with
/// [`crate::lifecycle::LifecycleEngine`] so both sides observe the same
/// live state.
pub struct Poller {
    repo: Arc<dyn Repository>,
    pool: Arc<SessionPool>,
    connector: Arc<Connector>,
    publisher: Arc<dyn Publisher>,
}

impl Poller {
    pub fn new(
        repo: Arc<dyn Repository>,
        pool: Arc<SessionPool>,
        connector: Arc<Connector>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            repo,
            pool,
            connector,
            publisher,
        }
    }

    /// Starts polling for `id`. Fails with `AlreadyActive` if a poll task is
    /// already registered. Does not pre-flight a health check: the task
    /// itself connects on demand on its first tick.
    ///
    /// Reserves the cancel-token slot via
    /// [`SessionPool::load_or_create_cancel`] before touching persistence, so
    /// two concurrent `start` calls for the same id can never both spawn a
    /// task — only the caller that actually created the slot proceeds, and
    /// it rolls the reservation back if persistence then fails.
    pub async fn start(&self, id: Uuid, interval_ms: i64) -> CoreResult<SessionRecord> {
        let (cancel, created) = self.pool.load_or_create_cancel(id, CancellationToken::new);
        if !created {
            return Err(CoreError::AlreadyActive(id));
        }

        let mut record = match self.repo.get_by_id(id).await {
            Ok(record) => record,
            Err(err) => {
                self.pool.clear_cancel(id);
                return Err(err);
            }
        };
        record.interval_ms = normalize_interval(interval_ms);
        record.mode = Mode::Polling;
        record.updated_at = chrono::Utc::now();
        if let Err(err) = self.repo.update(&record).await {
            self.pool.clear_cancel(id);
            return Err(err);
        }

        self.spawn_loop(record.clone(), cancel);
        Ok(record)
    }

    /// Starts the poll task for an already-`mode=polling` record without
    /// touching persistence or performing the `AlreadyActive` check — used
    /// by the restore coordinator, which never duplicates `Start`'s
    /// client-facing semantics (§4.6).
    pub fn start_internal(&self, record: SessionRecord) {
        let (cancel, _created) = self.pool.load_or_create_cancel(record.id, CancellationToken::new);
        self.spawn_loop(record, cancel);
    }

    fn spawn_loop(&self, record: SessionRecord, cancel: CancellationToken) {
        let repo = self.repo.clone();
        let pool = self.pool.clone();
        let connector = self.connector.clone();
        let publisher = self.publisher.clone();

        tokio::spawn(async move {
            poll_loop(repo, pool, connector, publisher, record, cancel).await;
        });
    }

    /// Stops polling for `id`. Returns `NotActive` if no poll task is
    /// registered, but still best-effort persists `mode=static`.
    pub async fn stop(&self, id: Uuid) -> CoreResult<SessionRecord> {
        let mut record = self.repo.get_by_id(id).await?;

        let Some(cancel) = self.pool.load_cancel(id) else {
            if record.mode != Mode::Static {
                record.mode = Mode::Static;
                record.updated_at = chrono::Utc::now();
                let _ = self.repo.update(&record).await;
            }
            return Err(CoreError::NotActive(id));
        };

        cancel.cancel();
        self.pool.clear_cancel(id);
        record.mode = Mode::Static;
        record.updated_at = chrono::Utc::now();
        self.repo.update(&record).await?;
        Ok(record)
    }
}

async fn poll_loop(
    repo: Arc<dyn Repository>,
    pool: Arc<SessionPool>,
    connector: Arc<Connector>,
    publisher: Arc<dyn Publisher>,
    mut record: SessionRecord,
    cancel: CancellationToken,
) {
    let id = record.id;
    let mut wait = Duration::from_millis(0);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%id, "poll task cancelled");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        let start = Instant::now();

        let Some(current) = repo.get_by_id(id).await.ok() else {
            // Record gone (deleted concurrently): nothing left to poll for.
            return;
        };
        record = current;

        let client = match pool.load_client(id) {
            Some(client) => client,
            None => match restore_client(&repo, &connector, &pool, id).await {
                Ok(client) => client,
                Err(err) => {
                    warn!(%id, error = %err, "poll tick failed to (re)connect, backing off");
                    set_status(&repo, &mut record, Status::Reconnecting).await;
                    wait = Duration::from_millis(POLL_BACKOFF_MS);
                    continue;
                }
            },
        };

        if record.status == Status::Reconnecting {
            set_status(&repo, &mut record, Status::Connected).await;
        }

        match client.get_current_data().await {
            Ok(snapshot) => {
                let mut payload = snapshot.0;
                if let Some(obj) = payload.as_object_mut() {
                    obj.insert("machine_id".to_string(), serde_json::Value::String(id.to_string()));
                }
                match serde_json::to_vec(&payload) {
                    Ok(bytes) => {
                        if let Err(err) = publisher.send(id.as_bytes(), &bytes).await {
                            warn!(%id, error = %err, "publish failed, tick still considered complete");
                        }
                    }
                    Err(err) => error!(%id, error = %err, "failed to serialize snapshot"),
                }
            }
            Err(source) => {
                warn!(%id, error = %source, "snapshot read failed, evicting client");
                pool.evict_client(id);
                set_status(&repo, &mut record, Status::Reconnecting).await;
            }
        }

        let elapsed = start.elapsed();
        let interval = Duration::from_millis(record.interval_ms);
        wait = interval.saturating_sub(elapsed);
    }
}

async fn restore_client(
    repo: &Arc<dyn Repository>,
    connector: &Arc<Connector>,
    pool: &Arc<SessionPool>,
    id: Uuid,
) -> CoreResult<Arc<dyn crate::native::NativeHandle>> {
    let record = repo.get_by_id(id).await?;
    let (host, port) = SessionRecord::parse_endpoint(&record.endpoint)
        .ok_or_else(|| CoreError::BadRequest(format!("invalid endpoint {:?}", record.endpoint)))?;
    let handle = connector
        .connect(&record.endpoint, &host, port, record.timeout_ms, &record.series)
        .await?;
    pool.store_client(id, handle.clone());
    Ok(handle)
}

async fn set_status(repo: &Arc<dyn Repository>, record: &mut SessionRecord, status: Status) {
    if record.status == status {
        return;
    }
    record.status = status;
    record.updated_at = chrono::Utc::now();
    if let Err(err) = repo.update(record).await {
        warn!(id = %record.id, error = %err, "failed to persist status transition during poll");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{ConnectParams, MachineState, NativeClient, NativeHandle, Snapshot};
    use async_trait::async_trait;
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

    struct NoopPublisher;

    #[async_trait]
    impl Publisher for NoopPublisher {
        async fn send(&self, _key: &[u8], _value: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }
        async fn close(&self) {}
    }

    #[derive(Debug)]
    struct StubHandle;

    #[async_trait]
    impl NativeHandle for StubHandle {
        async fn get_machine_state(&self) -> anyhow::Result<MachineState> {
            Ok(MachineState(serde_json::json!({})))
        }
        async fn get_current_data(&self) -> anyhow::Result<Snapshot> {
            Ok(Snapshot(serde_json::json!({"value": 1})))
        }
        async fn get_control_program(&self) -> anyhow::Result<String> {
            Ok(String::new())
        }
        async fn close(&self) {}
    }

    struct StubClient;

    #[async_trait]
    impl NativeClient for StubClient {
        async fn startup(&self, _log_mode: &str, _log_path: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn connect(&self, _params: ConnectParams<'_>) -> anyhow::Result<Box<dyn NativeHandle>> {
            Ok(Box::new(StubHandle))
        }
        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn make_poller() -> (Poller, Arc<MemRepo>, Arc<SessionPool>, SessionRecord) {
        let repo = Arc::new(MemRepo::default());
        let pool = Arc::new(SessionPool::new());
        let connector = Arc::new(Connector::new(Arc::new(StubClient)));
        let publisher: Arc<dyn Publisher> = Arc::new(NoopPublisher);

        let record = SessionRecord::new("10.0.0.1:8193".into(), 2000, None, None, chrono::Utc::now());
        let poller = Poller::new(repo.clone(), pool.clone(), connector, publisher);
        (poller, repo, pool, record)
    }

    #[tokio::test]
    async fn start_twice_is_already_active() {
        let (poller, repo, _pool, record) = make_poller();
        repo.create(&record).await.unwrap();

        poller.start(record.id, 1000).await.unwrap();
        let second = poller.start(record.id, 1000).await;
        assert!(matches!(second, Err(CoreError::AlreadyActive(_))));
    }

    #[tokio::test]
    async fn stop_without_start_is_not_active() {
        let (poller, repo, _pool, record) = make_poller();
        repo.create(&record).await.unwrap();

        let result = poller.stop(record.id).await;
        assert!(matches!(result, Err(CoreError::NotActive(_))));
        assert_eq!(repo.get_by_id(record.id).await.unwrap().mode, Mode::Static);
    }

    #[tokio::test]
    async fn start_then_stop_clears_cancel_and_mode() {
        let (poller, repo, pool, record) = make_poller();
        repo.create(&record).await.unwrap();

        poller.start(record.id, 1000).await.unwrap();
        assert!(pool.load_cancel(record.id).is_some());

        poller.stop(record.id).await.unwrap();
        assert!(pool.load_cancel(record.id).is_none());
        assert_eq!(repo.get_by_id(record.id).await.unwrap().mode, Mode::Static);
    }

    /// A client whose `get_current_data` fails a configurable number of
    /// times before succeeding, to drive the eviction/reconnect path
    /// deterministically.
    struct FlakyHandle {
        fail_ticks: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl NativeHandle for FlakyHandle {
        async fn get_machine_state(&self) -> anyhow::Result<MachineState> {
            Ok(MachineState(serde_json::json!({})))
        }
        async fn get_current_data(&self) -> anyhow::Result<Snapshot> {
            use std::sync::atomic::Ordering;
            if self.fail_ticks.load(Ordering::SeqCst) > 0 {
                self.fail_ticks.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("snapshot read failed")
            } else {
                Ok(Snapshot(serde_json::json!({"value": 1})))
            }
        }
        async fn get_control_program(&self) -> anyhow::Result<String> {
            Ok(String::new())
        }
        async fn close(&self) {}
    }

    struct FlakyClient {
        fail_connects: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl NativeClient for FlakyClient {
        async fn startup(&self, _log_mode: &str, _log_path: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn connect(&self, _params: ConnectParams<'_>) -> anyhow::Result<Box<dyn NativeHandle>> {
            use std::sync::atomic::Ordering;
            if self.fail_connects.load(Ordering::SeqCst) > 0 {
                self.fail_connects.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("connect refused")
            } else {
                Ok(Box::new(FlakyHandle {
                    fail_ticks: std::sync::atomic::AtomicUsize::new(0),
                }))
            }
        }
        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_failure_backs_off_five_seconds_before_retrying() {
        let repo = Arc::new(MemRepo::default());
        let pool = Arc::new(SessionPool::new());
        let connector = Arc::new(Connector::new(Arc::new(FlakyClient {
            fail_connects: std::sync::atomic::AtomicUsize::new(1),
        })));
        let publisher: Arc<dyn Publisher> = Arc::new(NoopPublisher);
        let record = SessionRecord::new("10.0.0.1:8193".into(), 2000, None, None, chrono::Utc::now());
        repo.create(&record).await.unwrap();
        let poller = Poller::new(repo.clone(), pool.clone(), connector, publisher);

        poller.start(record.id, 1000).await.unwrap();

        // First tick fires immediately and fails to connect, entering backoff.
        tokio::time::advance(Duration::from_millis(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(
            repo.get_by_id(record.id).await.unwrap().status,
            Status::Reconnecting
        );

        // Before the backoff elapses, the client still isn't live.
        tokio::time::advance(Duration::from_millis(POLL_BACKOFF_MS - 100)).await;
        tokio::task::yield_now().await;
        assert!(pool.load_client(record.id).is_none());

        // Past the backoff, the retry succeeds and status recovers.
        tokio::time::advance(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert_eq!(
            repo.get_by_id(record.id).await.unwrap().status,
            Status::Connected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_failure_evicts_client_and_marks_reconnecting() {
        let repo = Arc::new(MemRepo::default());
        let pool = Arc::new(SessionPool::new());
        let connector = Arc::new(Connector::new(Arc::new(FlakyClient {
            fail_connects: std::sync::atomic::AtomicUsize::new(0),
        })));
        let publisher: Arc<dyn Publisher> = Arc::new(NoopPublisher);
        let record = SessionRecord::new("10.0.0.1:8193".into(), 2000, None, None, chrono::Utc::now());
        repo.create(&record).await.unwrap();
        let poller = Poller::new(repo.clone(), pool.clone(), connector, publisher);

        poller.start(record.id, 1000).await.unwrap();
        tokio::time::advance(Duration::from_millis(10)).await;
        tokio::task::yield_now().await;
        assert!(pool.load_client(record.id).is_some());

        // Replace the now-live handle with one whose next read fails.
        pool.store_client(
            record.id,
            Arc::new(FlakyHandle {
                fail_ticks: std::sync::atomic::AtomicUsize::new(1),
            }),
        );

        tokio::time::advance(Duration::from_millis(1000)).await;
        tokio::task::yield_now().await;
        assert_eq!(
            repo.get_by_id(record.id).await.unwrap().status,
            Status::Reconnecting
        );
        assert!(pool.load_client(record.id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn tick_spacing_tracks_configured_interval_under_drift() {
        let repo = Arc::new(MemRepo::default());
        let pool = Arc::new(SessionPool::new());
        let connector = Arc::new(Connector::new(Arc::new(FlakyClient {
            fail_connects: std::sync::atomic::AtomicUsize::new(0),
        })));
        let publisher: Arc<dyn Publisher> = Arc::new(NoopPublisher);
        let record = SessionRecord::new("10.0.0.1:8193".into(), 2000, None, None, chrono::Utc::now());
        repo.create(&record).await.unwrap();
        let poller = Poller::new(repo.clone(), pool.clone(), connector, publisher);

        poller.start(record.id, 1000).await.unwrap();

        // First tick fires immediately; each subsequent tick should land
        // close to 1000ms after the last even though tick processing itself
        // consumes (simulated) time, since `wait` subtracts elapsed from the
        // interval rather than always sleeping the full interval.
        for _ in 0..10 {
            tokio::time::advance(Duration::from_millis(1000)).await;
            tokio::task::yield_now().await;
        }
        assert!(pool.load_client(record.id).is_some());
    }
}
