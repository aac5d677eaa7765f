use pgrx::prelude::*;
use pgrx::{JsonB, Uuid};

use crate::error::{EngineError, EngineResult};
use crate::eventstore::registry::is_registered;
use crate::eventstore::types::AppendedEvent;
use crate::util::sql_literal;

/// §4.7 `append(stream_id, type, category, data, metadata, expected_version?)`.
///
/// Runs as one transaction: the stream-row lock, the version check, the
/// event insert, and any sync projection triggers fired by that insert all
/// commit or abort together.
pub fn append(
    stream_id: Uuid,
    category: &str,
    event_type: &str,
    data: &serde_json::Value,
    metadata: &serde_json::Value,
    expected_version: Option<i64>,
) -> EngineResult<AppendedEvent> {
    if !is_registered(category, event_type)? {
        return Err(EngineError::InvalidEventType(format!(
            "'{category}/{event_type}' is not a registered event type"
        )));
    }

    Spi::connect_mut(|client| {
        // Lock (or create) the stream row first so concurrent appends to the
        // same stream serialize here rather than racing on the insert below.
        let existing_version: Option<i64> = client
            .select(
                &format!(
                    "SELECT version FROM events.stream WHERE id = {} FOR UPDATE",
                    sql_literal(&stream_id.to_string())
                ),
                Some(1),
                &[],
            )?
            .first()
            .get::<i64>(1)?;

        let current_version = match existing_version {
            Some(v) => v,
            None => {
                client.update(
                    &format!(
                        "INSERT INTO events.stream (id, category, version) VALUES ({}, {}, 0)",
                        sql_literal(&stream_id.to_string()),
                        sql_literal(category)
                    ),
                    None,
                    &[],
                )?;
                0
            }
        };

        match expected_version {
            Some(-1) => {
                if current_version != 0 {
                    return Err(EngineError::ConcurrencyConflict(format!(
                        "stream {stream_id} already has version {current_version} (expected_version=-1 requires no prior events)"
                    )));
                }
            }
            Some(expected) => {
                if expected != current_version {
                    return Err(EngineError::ConcurrencyConflict(format!(
                        "stream {stream_id} expected version {expected} but found {current_version}"
                    )));
                }
            }
            None => {}
        }

        let next_version = current_version + 1;
        let row = client
            .select(
                &format!(
                    "INSERT INTO events.event (stream, stream_version, category, type, data, metadata) \
                     VALUES ({stream}, {version}, {category}, {etype}, {data}::jsonb, {metadata}::jsonb) \
                     RETURNING \"position\", id, created_at",
                    stream = sql_literal(&stream_id.to_string()),
                    version = next_version,
                    category = sql_literal(category),
                    etype = sql_literal(event_type),
                    data = sql_literal(&data.to_string()),
                    metadata = sql_literal(&metadata.to_string()),
                ),
                Some(1),
                &[],
            )?
            .first();

        let position: i64 = row.get::<i64>(1)?.unwrap();
        let id: Uuid = row.get::<Uuid>(2)?.unwrap();
        let created_at: String = row.get::<String>(3)?.unwrap_or_default();

        client.update(
            &format!(
                "UPDATE events.stream SET version = {version} WHERE id = {stream}",
                version = next_version,
                stream = sql_literal(&stream_id.to_string()),
            ),
            None,
            &[],
        )?;

        Ok(AppendedEvent {
            position,
            id,
            stream: stream_id,
            stream_version: next_version,
            category: category.to_string(),
            event_type: event_type.to_string(),
            data: data.clone(),
            metadata: metadata.clone(),
            created_at,
        })
    })
}

pub fn append_json(
    stream_id: Uuid,
    category: &str,
    event_type: &str,
    data: JsonB,
    metadata: JsonB,
    expected_version: Option<i64>,
) -> EngineResult<AppendedEvent> {
    append(stream_id, category, event_type, &data.0, &metadata.0, expected_version)
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use super::*;
    use crate::eventstore::registry::{register_category, register_event_type};

    #[pgrx::pg_test]
    fn optimistic_concurrency_matches_seed_scenario() {
        register_category("order").unwrap();
        register_event_type("order", "created").unwrap();
        register_event_type("order", "item-added").unwrap();

        let sid = Uuid::from_bytes(*uuid::Uuid::new_v4().as_bytes());
        let empty = serde_json::json!({});

        let first = append(sid, "order", "created", &empty, &empty, Some(-1)).unwrap();
        assert_eq!(first.stream_version, 1);
        assert_eq!(first.position, 1);

        let err = append(sid, "order", "created", &empty, &empty, Some(-1)).unwrap_err();
        assert!(matches!(err, EngineError::ConcurrencyConflict(_)));

        let second = append(sid, "order", "item-added", &empty, &empty, Some(1)).unwrap();
        assert_eq!(second.stream_version, 2);
        assert_eq!(second.position, 2);
    }

    #[pgrx::pg_test]
    fn append_rejects_unregistered_type() {
        let sid = Uuid::from_bytes(*uuid::Uuid::new_v4().as_bytes());
        let err = append(sid, "order", "created", &serde_json::json!({}), &serde_json::json!({}), None)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidEventType(_)));
    }
}
