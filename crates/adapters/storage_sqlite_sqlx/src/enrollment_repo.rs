//! `SQLite` implementation of [`EnrollmentRepository`].
//!
//! The partial unique index `enrollments_one_active` keeps one active
//! enrollment per (automation, entity). Locks are leases stored in
//! `locked_until` together with the holder's `lock_token`, taken with a
//! conditional `UPDATE`. Release and leased saves match on the token.

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};

use crmflow_app::ports::EnrollmentRepository;
use crmflow_domain::enrollment::Enrollment;
use crmflow_domain::entity::EntityRef;
use crmflow_domain::error::CrmFlowError;
use crmflow_domain::id::{AutomationId, EnrollmentId, LeaseToken, TenantId};
use crmflow_domain::time::Timestamp;

use crate::codec;
use crate::error::StorageError;

struct Wrapper(Enrollment);

impl Wrapper {
    fn maybe(value: Option<Self>) -> Option<Enrollment> {
        value.map(|w| w.0)
    }

    fn unwrap_all(rows: Vec<Self>) -> Vec<Enrollment> {
        rows.into_iter().map(|w| w.0).collect()
    }
}

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: uuid::Uuid = row.try_get("id")?;
        let automation_id: uuid::Uuid = row.try_get("automation_id")?;
        let tenant_id: uuid::Uuid = row.try_get("tenant_id")?;
        let entity_kind: String = row.try_get("entity_kind")?;
        let entity_id: uuid::Uuid = row.try_get("entity_id")?;
        let step_index: i64 = row.try_get("current_step_index")?;
        let status: String = row.try_get("status")?;
        let enrolled_at: String = row.try_get("enrolled_at")?;
        let metadata: String = row.try_get("metadata")?;

        Ok(Self(Enrollment {
            id: EnrollmentId::from_uuid(id),
            automation_id: AutomationId::from_uuid(automation_id),
            tenant_id: TenantId::from_uuid(tenant_id),
            entity: codec::parse_entity_ref(&entity_kind, entity_id)?,
            current_step_index: codec::parse_count(step_index)?,
            status: status
                .parse()
                .map_err(|err| sqlx::Error::Decode(Box::new(err)))?,
            enrolled_at: codec::parse_timestamp(&enrolled_at)?,
            completed_at: codec::parse_optional_timestamp(row.try_get("completed_at")?)?,
            next_step_at: codec::parse_optional_timestamp(row.try_get("next_step_at")?)?,
            last_error: row.try_get("last_error")?,
            metadata: codec::parse_json(&metadata)?,
        }))
    }
}

const INSERT_ACTIVE: &str = r"
    INSERT OR IGNORE INTO enrollments (
        id, automation_id, tenant_id, entity_kind, entity_id, current_step_index, status,
        enrolled_at, completed_at, next_step_at, last_error, metadata
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
";

const SAVE_ACTIVE: &str = r"
    UPDATE enrollments
    SET current_step_index = ?, status = ?, completed_at = ?, next_step_at = ?,
        last_error = ?, metadata = ?
    WHERE id = ? AND status = 'active'
";

const SAVE_LEASED: &str = r"
    UPDATE enrollments
    SET current_step_index = ?, status = ?, completed_at = ?, next_step_at = ?,
        last_error = ?, metadata = ?
    WHERE id = ? AND status = 'active' AND lock_token = ?
";

const SELECT_BY_ID: &str = "SELECT * FROM enrollments WHERE id = ?";

const SELECT_LATEST: &str = r"
    SELECT * FROM enrollments
    WHERE automation_id = ? AND entity_kind = ? AND entity_id = ?
    ORDER BY rowid DESC
    LIMIT 1
";

const SELECT_ACTIVE_FOR_ENTITY: &str = r"
    SELECT * FROM enrollments
    WHERE entity_kind = ? AND entity_id = ? AND status = 'active'
    ORDER BY rowid
";

const SELECT_BY_AUTOMATION: &str =
    "SELECT * FROM enrollments WHERE automation_id = ? ORDER BY rowid DESC";

const SELECT_DUE: &str = r"
    SELECT * FROM enrollments
    WHERE status = 'active' AND (next_step_at IS NULL OR next_step_at <= ?)
    ORDER BY next_step_at, rowid
    LIMIT ?
";

const TRY_LOCK: &str = r"
    UPDATE enrollments
    SET locked_until = ?, lock_token = ?
    WHERE id = ? AND (locked_until IS NULL OR locked_until <= ?)
";

const UNLOCK: &str = r"
    UPDATE enrollments
    SET locked_until = NULL, lock_token = NULL
    WHERE id = ? AND lock_token = ?
";

/// `SQLite`-backed enrollment repository.
pub struct SqliteEnrollmentRepository {
    pool: SqlitePool,
}

impl SqliteEnrollmentRepository {
    /// Create a new repository backed by the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl EnrollmentRepository for SqliteEnrollmentRepository {
    async fn insert_active(&self, enrollment: Enrollment) -> Result<bool, CrmFlowError> {
        let result = sqlx::query(INSERT_ACTIVE)
            .bind(enrollment.id.as_uuid())
            .bind(enrollment.automation_id.as_uuid())
            .bind(enrollment.tenant_id.as_uuid())
            .bind(enrollment.entity.kind.as_str())
            .bind(enrollment.entity.id.as_uuid())
            .bind(codec::to_i64(enrollment.current_step_index)?)
            .bind(enrollment.status.as_str())
            .bind(codec::timestamp(enrollment.enrolled_at))
            .bind(codec::optional_timestamp(enrollment.completed_at))
            .bind(codec::optional_timestamp(enrollment.next_step_at))
            .bind(&enrollment.last_error)
            .bind(codec::to_json(&enrollment.metadata)?)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_by_id(&self, id: EnrollmentId) -> Result<Option<Enrollment>, CrmFlowError> {
        let row: Option<Wrapper> = sqlx::query_as(SELECT_BY_ID)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(Wrapper::maybe(row))
    }

    async fn find_latest(
        &self,
        automation_id: AutomationId,
        entity: EntityRef,
    ) -> Result<Option<Enrollment>, CrmFlowError> {
        let row: Option<Wrapper> = sqlx::query_as(SELECT_LATEST)
            .bind(automation_id.as_uuid())
            .bind(entity.kind.as_str())
            .bind(entity.id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(Wrapper::maybe(row))
    }

    async fn find_active_for_entity(
        &self,
        entity: EntityRef,
    ) -> Result<Vec<Enrollment>, CrmFlowError> {
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_ACTIVE_FOR_ENTITY)
            .bind(entity.kind.as_str())
            .bind(entity.id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(Wrapper::unwrap_all(rows))
    }

    async fn list_by_automation(
        &self,
        automation_id: AutomationId,
    ) -> Result<Vec<Enrollment>, CrmFlowError> {
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_BY_AUTOMATION)
            .bind(automation_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(Wrapper::unwrap_all(rows))
    }

    async fn load_due(&self, now: Timestamp, limit: usize) -> Result<Vec<Enrollment>, CrmFlowError> {
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_DUE)
            .bind(codec::timestamp(now))
            .bind(codec::to_i64(limit)?)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(Wrapper::unwrap_all(rows))
    }

    async fn try_lock(
        &self,
        id: EnrollmentId,
        token: LeaseToken,
        now: Timestamp,
        lease_until: Timestamp,
    ) -> Result<bool, CrmFlowError> {
        let result = sqlx::query(TRY_LOCK)
            .bind(codec::timestamp(lease_until))
            .bind(token.as_uuid())
            .bind(id.as_uuid())
            .bind(codec::timestamp(now))
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(result.rows_affected() == 1)
    }

    async fn unlock(&self, id: EnrollmentId, token: LeaseToken) -> Result<(), CrmFlowError> {
        sqlx::query(UNLOCK)
            .bind(id.as_uuid())
            .bind(token.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    async fn save(&self, enrollment: &Enrollment) -> Result<bool, CrmFlowError> {
        let result = sqlx::query(SAVE_ACTIVE)
            .bind(codec::to_i64(enrollment.current_step_index)?)
            .bind(enrollment.status.as_str())
            .bind(codec::optional_timestamp(enrollment.completed_at))
            .bind(codec::optional_timestamp(enrollment.next_step_at))
            .bind(&enrollment.last_error)
            .bind(codec::to_json(&enrollment.metadata)?)
            .bind(enrollment.id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(result.rows_affected() == 1)
    }

    async fn save_leased(
        &self,
        enrollment: &Enrollment,
        token: LeaseToken,
    ) -> Result<bool, CrmFlowError> {
        let result = sqlx::query(SAVE_LEASED)
            .bind(codec::to_i64(enrollment.current_step_index)?)
            .bind(enrollment.status.as_str())
            .bind(codec::optional_timestamp(enrollment.completed_at))
            .bind(codec::optional_timestamp(enrollment.next_step_at))
            .bind(&enrollment.last_error)
            .bind(codec::to_json(&enrollment.metadata)?)
            .bind(enrollment.id.as_uuid())
            .bind(token.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(result.rows_affected() == 1)
    }
}
