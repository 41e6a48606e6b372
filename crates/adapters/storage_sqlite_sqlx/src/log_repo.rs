//! `SQLite` implementation of [`AutomationLogRepository`].

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};

use crmflow_app::ports::AutomationLogRepository;
use crmflow_domain::error::CrmFlowError;
use crmflow_domain::id::{AutomationId, AutomationLogId, EnrollmentId};
use crmflow_domain::log::AutomationLog;

use crate::codec;
use crate::error::StorageError;

struct Wrapper(AutomationLog);

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: uuid::Uuid = row.try_get("id")?;
        let automation_id: uuid::Uuid = row.try_get("automation_id")?;
        let enrollment_id: Option<uuid::Uuid> = row.try_get("enrollment_id")?;
        let entity_kind: String = row.try_get("entity_kind")?;
        let entity_id: uuid::Uuid = row.try_get("entity_id")?;
        let trigger: String = row.try_get("trigger_type")?;
        let step_index: Option<i64> = row.try_get("step_index")?;
        let conditions: String = row.try_get("conditions")?;
        let actions: String = row.try_get("actions")?;
        let outcome: String = row.try_get("outcome")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(Self(AutomationLog {
            id: AutomationLogId::from_uuid(id),
            automation_id: AutomationId::from_uuid(automation_id),
            enrollment_id: enrollment_id.map(EnrollmentId::from_uuid),
            entity: codec::parse_entity_ref(&entity_kind, entity_id)?,
            trigger: codec::parse_name(&trigger)?,
            step_index: step_index.map(codec::parse_count).transpose()?,
            conditions: codec::parse_json(&conditions)?,
            actions: codec::parse_json(&actions)?,
            outcome: codec::parse_name(&outcome)?,
            error: row.try_get("error")?,
            created_at: codec::parse_timestamp(&created_at)?,
        }))
    }
}

const INSERT: &str = r"
    INSERT INTO automation_logs (
        id, automation_id, enrollment_id, entity_kind, entity_id, trigger_type, step_index,
        conditions, actions, outcome, error, created_at
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
";

const SELECT_BY_AUTOMATION: &str =
    "SELECT * FROM automation_logs WHERE automation_id = ? ORDER BY rowid DESC LIMIT ?";
const SELECT_BY_ENROLLMENT: &str =
    "SELECT * FROM automation_logs WHERE enrollment_id = ? ORDER BY rowid";

/// `SQLite`-backed audit trail. Rows are only ever inserted.
pub struct SqliteAutomationLogRepository {
    pool: SqlitePool,
}

impl SqliteAutomationLogRepository {
    /// Create a new repository backed by the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl AutomationLogRepository for SqliteAutomationLogRepository {
    async fn append(&self, log: AutomationLog) -> Result<AutomationLog, CrmFlowError> {
        let step_index = log.step_index.map(codec::to_i64).transpose()?;

        sqlx::query(INSERT)
            .bind(log.id.as_uuid())
            .bind(log.automation_id.as_uuid())
            .bind(log.enrollment_id.map(EnrollmentId::as_uuid))
            .bind(log.entity.kind.as_str())
            .bind(log.entity.id.as_uuid())
            .bind(log.trigger.as_str())
            .bind(step_index)
            .bind(codec::to_json(&log.conditions)?)
            .bind(codec::to_json(&log.actions)?)
            .bind(log.outcome.as_str())
            .bind(&log.error)
            .bind(codec::timestamp(log.created_at))
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(log)
    }

    async fn list_by_automation(
        &self,
        automation_id: AutomationId,
        limit: usize,
    ) -> Result<Vec<AutomationLog>, CrmFlowError> {
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_BY_AUTOMATION)
            .bind(automation_id.as_uuid())
            .bind(codec::to_i64(limit)?)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(|w| w.0).collect())
    }

    async fn list_by_enrollment(
        &self,
        enrollment_id: EnrollmentId,
    ) -> Result<Vec<AutomationLog>, CrmFlowError> {
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_BY_ENROLLMENT)
            .bind(enrollment_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(|w| w.0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Config;
    use crmflow_domain::automation::{Action, Automation, ConditionOutcome, Operator};
    use crmflow_domain::enrollment::Enrollment;
    use crmflow_domain::entity::{EntityKind, EntityRef};
    use crmflow_domain::id::EntityId;
    use crmflow_domain::log::LogOutcome;
    use crmflow_domain::time::now;

    async fn setup() -> SqliteAutomationLogRepository {
        let db = Config::in_memory().build().await.unwrap();
        SqliteAutomationLogRepository::new(db.pool().clone())
    }

    fn automation() -> Automation {
        Automation::builder()
            .name("Tag")
            .action(Action::AddTag {
                tag: "vip".into(),
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn should_roundtrip_log_with_conditions_and_actions() {
        let repo = setup().await;
        let automation = automation();
        let entity = EntityRef::new(EntityKind::Deal, EntityId::new());
        let enrollment = Enrollment::new(automation.id, automation.tenant_id, entity, now());
        let log = AutomationLog::new(&automation, entity, LogOutcome::Failed, now())
            .for_enrollment(&enrollment)
            .with_conditions(vec![ConditionOutcome {
                field: "stage".into(),
                operator: Operator::Equals,
                passed: true,
            }])
            .with_actions(automation.actions.clone())
            .with_error("tag \"vip\" does not exist");

        repo.append(log.clone()).await.unwrap();
        let stored = repo.list_by_enrollment(enrollment.id).await.unwrap();
        assert_eq!(stored, vec![log]);
    }

    #[tokio::test]
    async fn should_list_newest_first_up_to_limit() {
        let repo = setup().await;
        let automation = automation();
        let entity = EntityRef::new(EntityKind::Contact, EntityId::new());
        let outcomes = [LogOutcome::Enrolled, LogOutcome::Suspended, LogOutcome::Completed];
        for outcome in outcomes {
            repo.append(AutomationLog::new(&automation, entity, outcome, now()))
                .await
                .unwrap();
        }

        let listed: Vec<_> = repo
            .list_by_automation(automation.id, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|log| log.outcome)
            .collect();
        assert_eq!(listed, vec![LogOutcome::Completed, LogOutcome::Suspended]);
        assert!(
            repo.list_by_automation(AutomationId::new(), 10)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
