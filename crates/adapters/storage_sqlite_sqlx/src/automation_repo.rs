//! `SQLite` implementation of [`AutomationRepository`].

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};

use crmflow_app::ports::AutomationRepository;
use crmflow_domain::automation::Automation;
use crmflow_domain::error::CrmFlowError;
use crmflow_domain::id::{AutomationId, TenantId};
use crmflow_domain::time::Timestamp;

use crate::codec;
use crate::error::StorageError;

struct Wrapper(Automation);

impl Wrapper {
    fn maybe(value: Option<Self>) -> Option<Automation> {
        value.map(|w| w.0)
    }
}

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: uuid::Uuid = row.try_get("id")?;
        let tenant_id: uuid::Uuid = row.try_get("tenant_id")?;
        let trigger_json: String = row.try_get("trigger_data")?;
        let conditions_json: String = row.try_get("conditions")?;
        let actions_json: String = row.try_get("actions")?;
        let steps_json: String = row.try_get("steps")?;
        let re_enrollment: String = row.try_get("re_enrollment")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Self(Automation {
            id: AutomationId::from_uuid(id),
            tenant_id: TenantId::from_uuid(tenant_id),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            enabled: row.try_get("enabled")?,
            trigger: codec::parse_json(&trigger_json)?,
            conditions: codec::parse_json(&conditions_json)?,
            actions: codec::parse_json(&actions_json)?,
            steps: codec::parse_json(&steps_json)?,
            multi_step: row.try_get("multi_step")?,
            re_enrollment: codec::parse_name(&re_enrollment)?,
            created_at: codec::parse_timestamp(&created_at)?,
            updated_at: codec::parse_timestamp(&updated_at)?,
            last_triggered: codec::parse_optional_timestamp(row.try_get("last_triggered")?)?,
        }))
    }
}

/// JSON columns of one automation, encoded once per write.
struct Encoded {
    trigger: String,
    conditions: String,
    actions: String,
    steps: String,
}

impl Encoded {
    fn new(automation: &Automation) -> Result<Self, StorageError> {
        Ok(Self {
            trigger: codec::to_json(&automation.trigger)?,
            conditions: codec::to_json(&automation.conditions)?,
            actions: codec::to_json(&automation.actions)?,
            steps: codec::to_json(&automation.steps)?,
        })
    }
}

const INSERT: &str = r"
    INSERT INTO automations (
        id, tenant_id, name, description, enabled, trigger_data, conditions, actions,
        steps, multi_step, re_enrollment, created_at, updated_at, last_triggered
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
";

const UPDATE: &str = r"
    UPDATE automations
    SET name = ?, description = ?, enabled = ?, trigger_data = ?, conditions = ?, actions = ?,
        steps = ?, multi_step = ?, re_enrollment = ?, updated_at = ?, last_triggered = ?
    WHERE id = ?
";

const SELECT_BY_ID: &str = "SELECT * FROM automations WHERE id = ?";
const SELECT_BY_TENANT: &str =
    "SELECT * FROM automations WHERE tenant_id = ? ORDER BY created_at, rowid";
const SELECT_ENABLED: &str =
    "SELECT * FROM automations WHERE enabled = 1 ORDER BY created_at, rowid";
const MARK_TRIGGERED: &str = "UPDATE automations SET last_triggered = ? WHERE id = ?";
const DELETE: &str = "DELETE FROM automations WHERE id = ?";

/// `SQLite`-backed automation repository.
pub struct SqliteAutomationRepository {
    pool: SqlitePool,
}

impl SqliteAutomationRepository {
    /// Create a new repository backed by the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl AutomationRepository for SqliteAutomationRepository {
    async fn create(&self, automation: Automation) -> Result<Automation, CrmFlowError> {
        let encoded = Encoded::new(&automation)?;

        sqlx::query(INSERT)
            .bind(automation.id.as_uuid())
            .bind(automation.tenant_id.as_uuid())
            .bind(&automation.name)
            .bind(&automation.description)
            .bind(automation.enabled)
            .bind(&encoded.trigger)
            .bind(&encoded.conditions)
            .bind(&encoded.actions)
            .bind(&encoded.steps)
            .bind(automation.multi_step)
            .bind(codec::name(&automation.re_enrollment)?)
            .bind(codec::timestamp(automation.created_at))
            .bind(codec::timestamp(automation.updated_at))
            .bind(codec::optional_timestamp(automation.last_triggered))
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(automation)
    }

    async fn get_by_id(&self, id: AutomationId) -> Result<Option<Automation>, CrmFlowError> {
        let row: Option<Wrapper> = sqlx::query_as(SELECT_BY_ID)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(Wrapper::maybe(row))
    }

    async fn list_by_tenant(&self, tenant_id: TenantId) -> Result<Vec<Automation>, CrmFlowError> {
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_BY_TENANT)
            .bind(tenant_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(|w| w.0).collect())
    }

    async fn get_enabled(&self) -> Result<Vec<Automation>, CrmFlowError> {
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_ENABLED)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(|w| w.0).collect())
    }

    async fn update(&self, automation: Automation) -> Result<Automation, CrmFlowError> {
        let encoded = Encoded::new(&automation)?;

        sqlx::query(UPDATE)
            .bind(&automation.name)
            .bind(&automation.description)
            .bind(automation.enabled)
            .bind(&encoded.trigger)
            .bind(&encoded.conditions)
            .bind(&encoded.actions)
            .bind(&encoded.steps)
            .bind(automation.multi_step)
            .bind(codec::name(&automation.re_enrollment)?)
            .bind(codec::timestamp(automation.updated_at))
            .bind(codec::optional_timestamp(automation.last_triggered))
            .bind(automation.id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(automation)
    }

    async fn mark_triggered(&self, id: AutomationId, at: Timestamp) -> Result<(), CrmFlowError> {
        sqlx::query(MARK_TRIGGERED)
            .bind(codec::timestamp(at))
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    async fn delete(&self, id: AutomationId) -> Result<(), CrmFlowError> {
        sqlx::query(DELETE)
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }
}
