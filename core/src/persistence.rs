use async_trait::async_trait;
use uuid::Uuid;

use crate::error::CoreResult;
use crate::record::SessionRecord;

/// Durable CRUD over [`SessionRecord`]s, with a unique secondary index on
/// `endpoint`. Concrete implementations (e.g. the daemon's Postgres-backed
/// one) are responsible for their own schema and for creating the
/// underlying database on demand.
///
/// The store is assumed strongly consistent for a single writer process;
/// the core never attempts to coordinate writers itself.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Inserts `record`. Fails with [`crate::error::CoreError::Conflict`] if
    /// `record.endpoint` already exists.
    async fn create(&self, record: &SessionRecord) -> CoreResult<()>;

    /// Unconditionally replaces the record at `record.id`, refreshing
    /// `updated_at`.
    async fn update(&self, record: &SessionRecord) -> CoreResult<()>;

    /// Deletes `id`. Idempotent: a missing `id` is not an error.
    async fn delete(&self, id: Uuid) -> CoreResult<()>;

    async fn get_by_id(&self, id: Uuid) -> CoreResult<SessionRecord>;

    async fn get_by_endpoint(&self, endpoint: &str) -> CoreResult<SessionRecord>;

    /// Point-in-time snapshot of every record; no ordering guaranteed.
    async fn get_all(&self) -> CoreResult<Vec<SessionRecord>>;
}
