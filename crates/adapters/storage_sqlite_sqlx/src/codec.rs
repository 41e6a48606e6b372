//! Column encodings shared by the repositories.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings in UTC with
//! microseconds, so comparing them as text orders them in time.

use chrono::SecondsFormat;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crmflow_domain::entity::{EntityKind, EntityRef};
use crmflow_domain::id::EntityId;
use crmflow_domain::time::Timestamp;

use crate::error::StorageError;

pub(crate) fn timestamp(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn optional_timestamp(ts: Option<Timestamp>) -> Option<String> {
    ts.map(timestamp)
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, StorageError> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn to_i64<T: TryInto<i64, Error = std::num::TryFromIntError>>(
    value: T,
) -> Result<i64, StorageError> {
    Ok(value.try_into()?)
}

fn decode_error<E>(err: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::Decode(Box::new(err))
}

pub(crate) fn parse_timestamp(value: &str) -> Result<Timestamp, sqlx::Error> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.to_utc())
        .map_err(decode_error)
}

pub(crate) fn parse_optional_timestamp(
    value: Option<String>,
) -> Result<Option<Timestamp>, sqlx::Error> {
    value.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn parse_json<T: DeserializeOwned>(value: &str) -> Result<T, sqlx::Error> {
    serde_json::from_str(value).map_err(decode_error)
}

/// Decode a bare snake-case enum name stored without JSON quotes.
pub(crate) fn parse_name<T: DeserializeOwned>(value: &str) -> Result<T, sqlx::Error> {
    serde_json::from_value(serde_json::Value::String(value.to_string())).map_err(decode_error)
}

pub(crate) fn parse_count<T: TryFrom<i64, Error = std::num::TryFromIntError>>(
    value: i64,
) -> Result<T, sqlx::Error> {
    T::try_from(value).map_err(decode_error)
}

pub(crate) fn parse_entity_ref(kind: &str, id: uuid::Uuid) -> Result<EntityRef, sqlx::Error> {
    let kind: EntityKind = kind.parse().map_err(decode_error)?;
    Ok(EntityRef::new(kind, EntityId::from_uuid(id)))
}

/// Encode a unit enum as its bare serde name.
pub(crate) fn name<T: Serialize>(value: &T) -> Result<String, StorageError> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(name) => Ok(name),
        other => Ok(other.to_string()),
    }
}
