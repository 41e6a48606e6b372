//! `SQLite` implementation of [`EntityStore`].
//!
//! Field maps and tags are JSON documents. Writes go through a
//! compare-and-swap on `version`, so two concurrent patches can never both
//! apply to the same snapshot.

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};

use crmflow_app::ports::{EntityStore, EntityUpdate};
use crmflow_domain::entity::{CrmEntity, EntityKind, EntityPatch, EntityRef, EntitySchema};
use crmflow_domain::error::{ConflictError, CrmFlowError, NotFoundError};
use crmflow_domain::id::{EntityId, TenantId};
use crmflow_domain::time::Timestamp;

use crate::codec;
use crate::error::StorageError;

struct Wrapper(CrmEntity);

impl Wrapper {
    fn maybe(value: Option<Self>) -> Option<CrmEntity> {
        value.map(|w| w.0)
    }
}

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("kind")?;
        let id: uuid::Uuid = row.try_get("id")?;
        let tenant_id: uuid::Uuid = row.try_get("tenant_id")?;
        let fields: String = row.try_get("fields")?;
        let custom_fields: String = row.try_get("custom_fields")?;
        let tags: String = row.try_get("tags")?;
        let version: i64 = row.try_get("version")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        let entity = codec::parse_entity_ref(&kind, id)?;
        Ok(Self(CrmEntity {
            id: entity.id,
            tenant_id: TenantId::from_uuid(tenant_id),
            kind: entity.kind,
            fields: codec::parse_json(&fields)?,
            custom_fields: codec::parse_json(&custom_fields)?,
            tags: codec::parse_json(&tags)?,
            version: codec::parse_count(version)?,
            created_at: codec::parse_timestamp(&created_at)?,
            updated_at: codec::parse_timestamp(&updated_at)?,
        }))
    }
}

const INSERT: &str = r"
    INSERT INTO entities (kind, id, tenant_id, fields, custom_fields, tags, version, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
";

const SELECT_BY_REF: &str = "SELECT * FROM entities WHERE kind = ? AND id = ?";
const SELECT_BY_TENANT: &str =
    "SELECT * FROM entities WHERE tenant_id = ? AND kind = ? ORDER BY created_at, rowid";

const UPDATE_IF_VERSION: &str = r"
    UPDATE entities
    SET fields = ?, custom_fields = ?, tags = ?, version = ?, updated_at = ?
    WHERE kind = ? AND id = ? AND version = ?
";

const DELETE_RETURNING: &str = "DELETE FROM entities WHERE kind = ? AND id = ? RETURNING *";

const SELECT_SCHEMA: &str = "SELECT definition FROM entity_schemas WHERE tenant_id = ? AND kind = ?";
const UPSERT_SCHEMA: &str = r"
    INSERT INTO entity_schemas (tenant_id, kind, definition)
    VALUES (?, ?, ?)
    ON CONFLICT (tenant_id, kind) DO UPDATE SET definition = excluded.definition
";

fn not_found(entity: EntityRef) -> CrmFlowError {
    NotFoundError {
        entity: "Entity",
        id: entity.to_string(),
    }
    .into()
}

fn conflict(entity: EntityRef, expected: u64, actual: u64) -> CrmFlowError {
    ConflictError {
        entity: "Entity",
        id: entity.to_string(),
        expected,
        actual,
    }
    .into()
}

/// `SQLite`-backed store of contacts, deals and their tenant schemas.
pub struct SqliteEntityStore {
    pool: SqlitePool,
}

impl SqliteEntityStore {
    /// Create a new store backed by the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, entity: EntityRef) -> Result<Option<CrmEntity>, StorageError> {
        let row: Option<Wrapper> = sqlx::query_as(SELECT_BY_REF)
            .bind(entity.kind.as_str())
            .bind(entity.id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(Wrapper::maybe(row))
    }
}

impl EntityStore for SqliteEntityStore {
    async fn get(&self, entity: EntityRef) -> Result<Option<CrmEntity>, CrmFlowError> {
        Ok(self.fetch(entity).await?)
    }

    async fn list(&self, tenant_id: TenantId, kind: EntityKind) -> Result<Vec<CrmEntity>, CrmFlowError> {
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_BY_TENANT)
            .bind(tenant_id.as_uuid())
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(|w| w.0).collect())
    }

    async fn create(&self, entity: CrmEntity) -> Result<CrmEntity, CrmFlowError> {
        sqlx::query(INSERT)
            .bind(entity.kind.as_str())
            .bind(entity.id.as_uuid())
            .bind(entity.tenant_id.as_uuid())
            .bind(codec::to_json(&entity.fields)?)
            .bind(codec::to_json(&entity.custom_fields)?)
            .bind(codec::to_json(&entity.tags)?)
            .bind(codec::to_i64(entity.version)?)
            .bind(codec::timestamp(entity.created_at))
            .bind(codec::timestamp(entity.updated_at))
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(entity)
    }

    async fn update(
        &self,
        entity: EntityRef,
        patch: EntityPatch,
        expected_version: Option<u64>,
        at: Timestamp,
    ) -> Result<EntityUpdate, CrmFlowError> {
        let mut stored = self.fetch(entity).await?.ok_or_else(|| not_found(entity))?;
        let read_version = stored.version;
        if let Some(expected) = expected_version.filter(|v| *v != read_version) {
            return Err(conflict(entity, expected, read_version));
        }

        let changes = patch.apply(&mut stored, at);
        if changes.is_empty() {
            return Ok(EntityUpdate {
                entity: stored,
                changes,
            });
        }

        let result = sqlx::query(UPDATE_IF_VERSION)
            .bind(codec::to_json(&stored.fields)?)
            .bind(codec::to_json(&stored.custom_fields)?)
            .bind(codec::to_json(&stored.tags)?)
            .bind(codec::to_i64(stored.version)?)
            .bind(codec::timestamp(stored.updated_at))
            .bind(entity.kind.as_str())
            .bind(entity.id.as_uuid())
            .bind(codec::to_i64(read_version)?)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        if result.rows_affected() == 0 {
            // another writer got in between the read and the write
            let current = self.fetch(entity).await?.ok_or_else(|| not_found(entity))?;
            return Err(conflict(
                entity,
                expected_version.unwrap_or(read_version),
                current.version,
            ));
        }

        Ok(EntityUpdate {
            entity: stored,
            changes,
        })
    }

    async fn delete(&self, entity: EntityRef) -> Result<Option<CrmEntity>, CrmFlowError> {
        let row: Option<Wrapper> = sqlx::query_as(DELETE_RETURNING)
            .bind(entity.kind.as_str())
            .bind(entity.id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(Wrapper::maybe(row))
    }

    async fn schema(&self, tenant_id: TenantId, kind: EntityKind) -> Result<EntitySchema, CrmFlowError> {
        let row: Option<(String,)> = sqlx::query_as(SELECT_SCHEMA)
            .bind(tenant_id.as_uuid())
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        match row {
            Some((definition,)) => Ok(serde_json::from_str(&definition).map_err(StorageError::from)?),
            None => Ok(EntitySchema::default()),
        }
    }

    async fn put_schema(
        &self,
        tenant_id: TenantId,
        kind: EntityKind,
        schema: EntitySchema,
    ) -> Result<EntitySchema, CrmFlowError> {
        sqlx::query(UPSERT_SCHEMA)
            .bind(tenant_id.as_uuid())
            .bind(kind.as_str())
            .bind(codec::to_json(&schema)?)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(schema)
    }
}
