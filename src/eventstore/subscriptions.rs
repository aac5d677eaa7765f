use pgrx::prelude::*;
use pgrx::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::eventstore::types::AppendedEvent;
use crate::guc::{DEFAULT_CLAIM_TIMEOUT_SECONDS, MAX_POLL_BATCH_SIZE};
use crate::util::{sql_jsonb_or_null, sql_literal};

pub fn create_subscription(
    name: &str,
    filter_types: Option<&serde_json::Value>,
    filter_streams: Option<&serde_json::Value>,
) -> EngineResult<()> {
    let inserted = Spi::connect_mut(|client| {
        client.update(
            &format!(
                "INSERT INTO events.subscription (name, filter_types, filter_streams) \
                 VALUES ({name}, {types}, {streams}) ON CONFLICT DO NOTHING",
                name = sql_literal(name),
                types = sql_jsonb_or_null(&filter_types.cloned()),
                streams = sql_jsonb_or_null(&filter_streams.cloned()),
            ),
            None,
            &[],
        )
    })?;
    if inserted.len() == 0 {
        return Err(EngineError::InvariantViolation(format!(
            "subscription '{name}' already exists"
        )));
    }
    Ok(())
}

pub fn delete_subscription(name: &str) -> EngineResult<()> {
    let deleted = Spi::connect_mut(|client| {
        client.update(
            &format!("DELETE FROM events.subscription WHERE name = {}", sql_literal(name)),
            None,
            &[],
        )
    })?;
    if deleted.len() == 0 {
        return Err(EngineError::NotFound(format!("subscription '{name}' not found")));
    }
    Ok(())
}

struct SubscriptionRow {
    filter_types: Option<serde_json::Value>,
    filter_streams: Option<serde_json::Value>,
    last_position: i64,
}

fn load_subscription(name: &str) -> EngineResult<SubscriptionRow> {
    Spi::connect(|client| {
        let row = client
            .select(
                &format!(
                    "SELECT filter_types, filter_streams, last_position \
                     FROM events.subscription WHERE name = {} AND active",
                    sql_literal(name)
                ),
                Some(1),
                &[],
            )?
            .first();
        let last_position = row.get::<i64>(3)?;
        let last_position = last_position
            .ok_or_else(|| EngineError::NotFound(format!("active subscription '{name}' not found")))?;
        Ok(SubscriptionRow {
            filter_types: row.get::<pgrx::JsonB>(1)?.map(|j| j.0),
            filter_streams: row.get::<pgrx::JsonB>(2)?.map(|j| j.0),
            last_position,
        })
    })
}

/// §4.10 `poll(subscription, batchSize, claimTimeoutSeconds)`. Uses
/// `FOR UPDATE SKIP LOCKED` against a left join to the claim table so
/// concurrent pollers never select the same event (seed scenario 5).
pub fn poll(
    subscription: &str,
    batch_size: i64,
    claim_timeout_seconds: Option<i64>,
) -> EngineResult<Vec<AppendedEvent>> {
    let sub = load_subscription(subscription)?;
    let batch_size = batch_size.min(MAX_POLL_BATCH_SIZE.get() as i64).max(1);
    let claim_timeout = claim_timeout_seconds.unwrap_or(DEFAULT_CLAIM_TIMEOUT_SECONDS.get() as i64);

    let mut filter_sql = String::new();
    if let Some(serde_json::Value::Array(types)) = &sub.filter_types {
        if !types.is_empty() {
            let list = types
                .iter()
                .filter_map(|v| v.as_str())
                .map(sql_literal)
                .collect::<Vec<_>>()
                .join(", ");
            filter_sql.push_str(&format!(" AND e.type IN ({list})"));
        }
    }
    if let Some(serde_json::Value::Array(streams)) = &sub.filter_streams {
        if !streams.is_empty() {
            let list = streams
                .iter()
                .filter_map(|v| v.as_str())
                .map(sql_literal)
                .collect::<Vec<_>>()
                .join(", ");
            filter_sql.push_str(&format!(" AND e.stream::text IN ({list})"));
        }
    }

    let sql = format!(
        r#"
        SELECT e."position", e.id, e.stream, e.stream_version, e.category, e.type, e.data, e.metadata, e.created_at
        FROM events.event e
        WHERE e."position" > {last_position}
          AND NOT EXISTS (
              SELECT 1 FROM events.event_claim c
              WHERE c.subscription = {subscription} AND c."position" = e."position"
          )
          {filter_sql}
        ORDER BY e."position" ASC
        LIMIT {batch_size}
        FOR UPDATE OF e SKIP LOCKED
        "#,
        last_position = sub.last_position,
        subscription = sql_literal(subscription),
        filter_sql = filter_sql,
        batch_size = batch_size,
    );

    Spi::connect_mut(|client| {
        let table = client.select(&sql, None, &[])?;
        let mut events = Vec::with_capacity(table.len());
        for row in table {
            let position: i64 = row.get::<i64>(1)?.unwrap();
            events.push(AppendedEvent {
                position,
                id: row.get::<Uuid>(2)?.unwrap(),
                stream: row.get::<Uuid>(3)?.unwrap(),
                stream_version: row.get::<i64>(4)?.unwrap(),
                category: row.get::<String>(5)?.unwrap_or_default(),
                event_type: row.get::<String>(6)?.unwrap_or_default(),
                data: row.get::<pgrx::JsonB>(7)?.map(|j| j.0).unwrap_or(serde_json::Value::Null),
                metadata: row.get::<pgrx::JsonB>(8)?.map(|j| j.0).unwrap_or(serde_json::Value::Null),
                created_at: row.get::<String>(9)?.unwrap_or_default(),
            });
        }

        for event in &events {
            client.update(
                &format!(
                    "INSERT INTO events.event_claim (subscription, \"position\", expires_at) \
                     VALUES ({sub}, {pos}, clock_timestamp() + make_interval(secs => {timeout}))",
                    sub = sql_literal(subscription),
                    pos = event.position,
                    timeout = claim_timeout,
                ),
                None,
                &[],
            )?;
        }
        Ok(events)
    })
}

/// §4.10 `ack`: monotonic per §9 — idempotent on regression, never moves
/// `last_position` backward.
pub fn ack(subscription: &str, position: i64) -> EngineResult<()> {
    Spi::connect_mut(|client| {
        client.update(
            &format!(
                "DELETE FROM events.event_claim WHERE subscription = {} AND \"position\" = {}",
                sql_literal(subscription),
                position
            ),
            None,
            &[],
        )?;
        let updated = client.update(
            &format!(
                "UPDATE events.subscription \
                 SET last_position = GREATEST(last_position, {position}), last_processed_at = clock_timestamp() \
                 WHERE name = {name}",
                position = position,
                name = sql_literal(subscription),
            ),
            None,
            &[],
        )?;
        if updated.len() == 0 {
            return Err(EngineError::NotFound(format!("subscription '{subscription}' not found")));
        }
        Ok(())
    })
}

pub fn cleanup_expired_claims() -> EngineResult<u64> {
    Spi::connect_mut(|client| {
        let deleted = client.update(
            "DELETE FROM events.event_claim WHERE expires_at < clock_timestamp()",
            None,
            &[],
        )?;
        Ok(deleted.len() as u64)
    })
}

pub fn cleanup_subscription_claims(name: &str) -> EngineResult<u64> {
    Spi::connect_mut(|client| {
        let deleted = client.update(
            &format!(
                "DELETE FROM events.event_claim WHERE subscription = {}",
                sql_literal(name)
            ),
            None,
            &[],
        )?;
        Ok(deleted.len() as u64)
    })
}

pub fn list_subscriptions() -> EngineResult<Vec<String>> {
    Spi::connect(|client| {
        let table = client.select("SELECT name FROM events.subscription ORDER BY name", None, &[])?;
        let mut out = Vec::with_capacity(table.len());
        for row in table {
            out.push(row.get::<String>(1)?.unwrap_or_default());
        }
        Ok(out)
    })
}

pub fn get_subscription(name: &str) -> EngineResult<(i64, bool)> {
    Spi::connect(|client| {
        let row = client
            .select(
                &format!(
                    "SELECT last_position, active FROM events.subscription WHERE name = {}",
                    sql_literal(name)
                ),
                Some(1),
                &[],
            )?
            .first();
        let last_position = row
            .get::<i64>(1)?
            .ok_or_else(|| EngineError::NotFound(format!("subscription '{name}' not found")))?;
        Ok((last_position, row.get::<bool>(2)?.unwrap_or(false)))
    })
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use super::*;
    use crate::eventstore::append::append;
    use crate::eventstore::registry::{register_category, register_event_type};

    #[pgrx::pg_test]
    fn poll_never_reinserts_claim_on_empty_result() {
        create_subscription("S-empty", None, None).unwrap();
        let events = poll("S-empty", 10, None).unwrap();
        assert!(events.is_empty());
        assert_eq!(cleanup_subscription_claims("S-empty").unwrap(), 0);
    }

    #[pgrx::pg_test]
    fn poll_then_ack_advances_monotonically() {
        register_category("order").unwrap();
        register_event_type("order", "created").unwrap();
        let sid = Uuid::from_bytes(*uuid::Uuid::new_v4().as_bytes());
        for _ in 0..3 {
            append(
                sid,
                "order",
                "created",
                &serde_json::json!({}),
                &serde_json::json!({}),
                None,
            )
            .unwrap();
        }

        create_subscription("S-1", None, None).unwrap();
        let batch = poll("S-1", 10, None).unwrap();
        assert_eq!(batch.len(), 3);

        for event in &batch {
            ack("S-1", event.position).unwrap();
        }
        let (last_position, _) = get_subscription("S-1").unwrap();
        assert_eq!(last_position, batch.last().unwrap().position);

        // out-of-order / regressed ack is idempotent, never regresses.
        ack("S-1", batch[0].position).unwrap();
        let (still, _) = get_subscription("S-1").unwrap();
        assert_eq!(still, last_position);

        assert!(poll("S-1", 10, None).unwrap().is_empty());
    }
}
