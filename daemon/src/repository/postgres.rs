use async_trait::async_trait;
use cnc_broker_core::{CoreError, CoreResult, Mode, Repository, SessionRecord, Status};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

/// Postgres-backed [`Repository`]. Creates the target database on demand by
/// connecting to the administrative `postgres` database first, mirroring
/// the original service's bootstrap (`check pg_database, CREATE DATABASE if
/// absent, then reconnect and migrate`).
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub async fn connect(admin_url: &str, database_url: &str, database_name: &str) -> anyhow::Result<Self> {
        Self::create_database_if_absent(admin_url, database_name).await?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id UUID PRIMARY KEY,
                endpoint TEXT NOT NULL UNIQUE,
                timeout_ms BIGINT NOT NULL,
                series TEXT NOT NULL,
                model TEXT NOT NULL,
                interval_ms BIGINT NOT NULL,
                status TEXT NOT NULL,
                mode TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    async fn create_database_if_absent(admin_url: &str, database_name: &str) -> anyhow::Result<()> {
        let admin_pool = PgPoolOptions::new().max_connections(1).connect(admin_url).await?;

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(database_name)
            .fetch_one(&admin_pool)
            .await?;

        if !exists {
            info!(database = %database_name, "database absent, creating");
            // Postgres doesn't allow binding identifiers, and database names
            // are operator-configured, not user input, so this is a
            // deliberate string format rather than a bound parameter.
            let stmt = format!("CREATE DATABASE \"{database_name}\"");
            sqlx::query(&stmt).execute(&admin_pool).await?;
        }

        admin_pool.close().await;
        Ok(())
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> CoreResult<SessionRecord> {
        let status_str: String = row.try_get("status").map_err(|e| CoreError::Internal(e.into()))?;
        let mode_str: String = row.try_get("mode").map_err(|e| CoreError::Internal(e.into()))?;

        Ok(SessionRecord {
            id: row.try_get("id").map_err(|e| CoreError::Internal(e.into()))?,
            endpoint: row.try_get("endpoint").map_err(|e| CoreError::Internal(e.into()))?,
            timeout_ms: row
                .try_get::<i64, _>("timeout_ms")
                .map_err(|e| CoreError::Internal(e.into()))? as u64,
            series: row.try_get("series").map_err(|e| CoreError::Internal(e.into()))?,
            model: row.try_get("model").map_err(|e| CoreError::Internal(e.into()))?,
            interval_ms: row
                .try_get::<i64, _>("interval_ms")
                .map_err(|e| CoreError::Internal(e.into()))? as u64,
            status: parse_status(&status_str)?,
            mode: parse_mode(&mode_str)?,
            created_at: row.try_get("created_at").map_err(|e| CoreError::Internal(e.into()))?,
            updated_at: row.try_get("updated_at").map_err(|e| CoreError::Internal(e.into()))?,
        })
    }
}

fn parse_status(s: &str) -> CoreResult<Status> {
    match s {
        "connected" => Ok(Status::Connected),
        "reconnecting" => Ok(Status::Reconnecting),
        other => Err(CoreError::Internal(anyhow::anyhow!("unknown status {other:?} in store"))),
    }
}

fn parse_mode(s: &str) -> CoreResult<Mode> {
    match s {
        "static" => Ok(Mode::Static),
        "polling" => Ok(Mode::Polling),
        other => Err(CoreError::Internal(anyhow::anyhow!("unknown mode {other:?} in store"))),
    }
}

fn status_str(status: Status) -> &'static str {
    match status {
        Status::Connected => "connected",
        Status::Reconnecting => "reconnecting",
    }
}

fn mode_str(mode: Mode) -> &'static str {
    match mode {
        Mode::Static => "static",
        Mode::Polling => "polling",
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn create(&self, record: &SessionRecord) -> CoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO sessions
                (id, endpoint, timeout_ms, series, model, interval_ms, status, mode, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id)
        .bind(&record.endpoint)
        .bind(record.timeout_ms as i64)
        .bind(&record.series)
        .bind(&record.model)
        .bind(record.interval_ms as i64)
        .bind(status_str(record.status))
        .bind(mode_str(record.mode))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(CoreError::Conflict {
                endpoint: record.endpoint.clone(),
                id: record.id,
            }),
            Err(err) => Err(CoreError::Internal(err.into())),
        }
    }

    async fn update(&self, record: &SessionRecord) -> CoreResult<()> {
        sqlx::query(
            r#"
            UPDATE sessions SET
                endpoint = $2, timeout_ms = $3, series = $4, model = $5,
                interval_ms = $6, status = $7, mode = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(&record.endpoint)
        .bind(record.timeout_ms as i64)
        .bind(&record.series)
        .bind(&record.model)
        .bind(record.interval_ms as i64)
        .bind(status_str(record.status))
        .bind(mode_str(record.mode))
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> CoreResult<()> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> CoreResult<SessionRecord> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?
            .ok_or(CoreError::NotFound(id))?;
        Self::row_to_record(&row)
    }

    async fn get_by_endpoint(&self, endpoint: &str) -> CoreResult<SessionRecord> {
        let row = sqlx::query("SELECT * FROM sessions WHERE endpoint = $1")
            .bind(endpoint)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?
            .ok_or_else(|| CoreError::NotFound(Uuid::nil()))?;
        Self::row_to_record(&row)
    }

    async fn get_all(&self) -> CoreResult<Vec<SessionRecord>> {
        let rows = sqlx::query("SELECT * FROM sessions")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        rows.iter().map(Self::row_to_record).collect()
    }
}
