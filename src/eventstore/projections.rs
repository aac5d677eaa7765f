use pgrx::prelude::*;

use crate::error::{EngineError, EngineResult};
use crate::eventstore::subscriptions::create_subscription;
use crate::eventstore::types::ProjectionStatus;
use crate::util::{qi, sql_jsonb_or_null, sql_literal};

/// §6/§9: reducer and sync-handler fragments are parameter-free. `$1`-style
/// positional placeholders or a literal `?` are the only parameter forms
/// PL/pgSQL's dynamic-SQL helpers accept, so rejecting both is sufficient to
/// satisfy the "must reject fragments containing parameter placeholders"
/// contract without a full SQL parser.
pub fn reject_parameterized(fragment: &str) -> EngineResult<()> {
    if fragment.contains('?') || fragment.contains('$') {
        return Err(EngineError::ParameterizedFragmentRejected(format!(
            "fragment contains a parameter placeholder: {fragment}"
        )));
    }
    Ok(())
}

fn trigger_name_for(projection: &str) -> String {
    format!("chronostore_projection_{projection}")
}

/// §4.9 sync handler: installs one AFTER INSERT trigger on `events.event`
/// per `(category, type)` pair in `sync_handlers`, each executing the
/// caller-supplied parameter-free SQL expression with `NEW` bound to the
/// inserted event row. Fired inside the same transaction as `append`, so a
/// raising handler aborts the append (§5 transaction discipline).
fn install_sync_trigger(
    projection: &str,
    sync_handlers: &serde_json::Map<String, serde_json::Value>,
) -> EngineResult<String> {
    let trigger_fn = format!("events.{}", qi(&format!("{projection}_sync_fn")));
    let trigger_name = trigger_name_for(projection);

    let mut when_clauses = Vec::new();
    let mut branches = Vec::new();
    for (type_ref, handler) in sync_handlers {
        let handler_sql = handler
            .as_str()
            .ok_or_else(|| EngineError::InvariantViolation(format!("sync handler for '{type_ref}' must be a string")))?;
        reject_parameterized(handler_sql)?;
        let (category, event_type) = crate::util::split_event_type_ref(type_ref)
            .ok_or_else(|| EngineError::InvalidEventType(format!("malformed type reference '{type_ref}'")))?;
        when_clauses.push(format!(
            "NEW.category = {} AND NEW.type = {}",
            sql_literal(category),
            sql_literal(event_type)
        ));
        branches.push(format!(
            "IF NEW.category = {} AND NEW.type = {} THEN {}; END IF;",
            sql_literal(category),
            sql_literal(event_type),
            handler_sql
        ));
    }

    let body = branches.join("\n        ");
    let sql = format!(
        r#"
        CREATE OR REPLACE FUNCTION {trigger_fn}() RETURNS trigger
        LANGUAGE plpgsql AS $func${body}
        RETURN NEW;
        $func$;

        DROP TRIGGER IF EXISTS {trig} ON events.event;
        CREATE TRIGGER {trig} AFTER INSERT ON events.event
        FOR EACH ROW EXECUTE FUNCTION {trigger_fn}();
        "#,
        trigger_fn = trigger_fn,
        body = body,
        trig = qi(&trigger_name),
    );

    Spi::connect_mut(|client| client.update(&sql, None, &[]))?;
    Ok(trigger_name)
}

/// Registers a projection. `sync_handlers` maps `"category/type"` to a
/// parameter-free SQL statement run inside the append transaction;
/// `async_types` lists the event types a host-side runner polls for via a
/// hidden `projection:<name>` subscription.
pub fn register_projection(
    name: &str,
    sync_handlers: &serde_json::Map<String, serde_json::Value>,
    async_types: &[String],
) -> EngineResult<()> {
    let trigger_name = if sync_handlers.is_empty() {
        None
    } else {
        Some(install_sync_trigger(name, sync_handlers)?)
    };

    let subscription_name = if async_types.is_empty() {
        None
    } else {
        let hidden = format!("projection:{name}");
        let filter_types = serde_json::Value::Array(
            async_types.iter().cloned().map(serde_json::Value::String).collect(),
        );
        create_subscription(&hidden, Some(&filter_types), None)?;
        Some(hidden)
    };

    let inserted = Spi::connect_mut(|client| {
        client.update(
            &format!(
                "INSERT INTO events.projection_def \
                 (name, sync_handlers, async_types, trigger_name, subscription_name) \
                 VALUES ({name}, {sync}::jsonb, {async_types}::jsonb, {trigger}, {sub}) \
                 ON CONFLICT DO NOTHING",
                name = sql_literal(name),
                sync = sql_literal(&serde_json::Value::Object(sync_handlers.clone()).to_string()),
                async_types = sql_literal(&serde_json::to_string(async_types).unwrap_or_default()),
                trigger = crate::util::sql_literal_or_null(&trigger_name),
                sub = crate::util::sql_literal_or_null(&subscription_name),
            ),
            None,
            &[],
        )
    })?;
    if inserted.len() == 0 {
        return Err(EngineError::InvariantViolation(format!("projection '{name}' already exists")));
    }
    Ok(())
}

pub fn list_projections() -> EngineResult<Vec<ProjectionStatus>> {
    Spi::connect(|client| {
        let table = client.select(
            r#"
            SELECT p.name, p.sync_handlers, p.async_types, p.trigger_name, p.subscription_name,
                   COALESCE((SELECT MAX("position") FROM events.event), 0)
                       - COALESCE(s.last_position, 0) AS events_behind
            FROM events.projection_def p
            LEFT JOIN events.subscription s ON s.name = p.subscription_name
            ORDER BY p.name
            "#,
            None,
            &[],
        )?;
        let mut out = Vec::with_capacity(table.len());
        for row in table {
            let sync_handlers = row
                .get::<pgrx::JsonB>(2)?
                .map(|j| j.0)
                .and_then(|v| v.as_object().cloned())
                .unwrap_or_default();
            let sync_types: Vec<String> = sync_handlers.keys().cloned().collect();
            let async_types: Vec<String> = row
                .get::<pgrx::JsonB>(3)?
                .map(|j| j.0)
                .and_then(|v| v.as_array().cloned())
                .unwrap_or_default()
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            out.push(ProjectionStatus {
                name: row.get::<String>(1)?.unwrap_or_default(),
                sync_types,
                async_types,
                trigger_name: row.get::<String>(4)?,
                subscription_name: row.get::<String>(5)?,
                events_behind: row.get::<i64>(6)?.unwrap_or(0),
            });
        }
        Ok(out)
    })
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use super::*;

    #[pgrx::pg_test]
    fn rejects_parameterized_handler() {
        assert!(reject_parameterized("INSERT INTO t VALUES ($1)").is_err());
        assert!(reject_parameterized("INSERT INTO t VALUES (NEW.data)").is_ok());
    }
}
