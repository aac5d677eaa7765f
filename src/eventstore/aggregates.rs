use pgrx::prelude::*;
use pgrx::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::eventstore::projections::reject_parameterized;
use crate::eventstore::types::AggregateState;
use crate::util::{qi, sql_literal};

fn function_ident(function_name: &str) -> String {
    format!("events.{}", qi(function_name))
}

/// §4.11 `register_aggregate`: compiles a PL/pgSQL loader function that
/// replays a stream's events through per-type reducer expressions. The
/// generated function is the "server-side loader" the spec describes —
/// built once at registration, not re-interpreted per call.
pub fn register_aggregate(
    name: &str,
    function_name: &str,
    category: &str,
    initial_state: &serde_json::Value,
    reducers: &serde_json::Map<String, serde_json::Value>,
    snapshot_threshold: Option<i32>,
) -> EngineResult<()> {
    let mut branches = Vec::with_capacity(reducers.len());
    for (type_ref, reducer) in reducers {
        let expr = reducer
            .as_str()
            .ok_or_else(|| EngineError::InvariantViolation(format!("reducer for '{type_ref}' must be a string")))?;
        reject_parameterized(expr)?;
        let (reducer_category, event_type) = crate::util::split_event_type_ref(type_ref)
            .ok_or_else(|| EngineError::InvalidEventType(format!("malformed type reference '{type_ref}'")))?;
        branches.push(format!(
            "IF v_event.category = {} AND v_event.type = {} THEN v_state := ({}); END IF;",
            sql_literal(reducer_category),
            sql_literal(event_type),
            expr
        ));
    }
    let body = branches.join("\n            ");
    let function = function_ident(function_name);

    let sql = format!(
        r#"
        CREATE OR REPLACE FUNCTION {function}(p_stream_id uuid) RETURNS jsonb
        LANGUAGE plpgsql AS $func$
        DECLARE
            v_state    jsonb;
            v_version  bigint;
            v_event    events.event%ROWTYPE;
            v_count    integer := 0;
        BEGIN
            SELECT state, version INTO v_state, v_version
            FROM events.snapshot
            WHERE stream = p_stream_id AND name = 'aggregate-state'
            ORDER BY version DESC LIMIT 1;

            IF v_state IS NULL THEN
                v_state := {initial_state}::jsonb;
                v_version := 0;
            END IF;

            FOR v_event IN
                SELECT * FROM events.event
                WHERE stream = p_stream_id AND stream_version > v_version
                ORDER BY stream_version
            LOOP
                {body}
                v_version := v_event.stream_version;
                v_count := v_count + 1;
            END LOOP;

            IF {threshold} IS NOT NULL AND v_count >= {threshold} THEN
                INSERT INTO events.snapshot (stream, name, version, state)
                VALUES (p_stream_id, 'aggregate-state', v_version, v_state)
                ON CONFLICT (stream, name, version) DO NOTHING;
            END IF;

            RETURN jsonb_build_object('state', v_state, 'version', v_version, 'stream_id', p_stream_id);
        END;
        $func$;
        "#,
        function = function,
        initial_state = sql_literal(&initial_state.to_string()),
        body = body,
        threshold = snapshot_threshold
            .map(|t| t.to_string())
            .unwrap_or_else(|| "NULL".to_string()),
    );

    Spi::connect_mut(|client| client.update(&sql, None, &[]))?;

    let inserted = Spi::connect_mut(|client| {
        client.update(
            &format!(
                "INSERT INTO events.aggregate_def \
                 (name, function_name, category, initial_state, reducers, snapshot_threshold) \
                 VALUES ({name}, {function_name}, {category}, {initial_state}::jsonb, {reducers}::jsonb, {threshold}) \
                 ON CONFLICT DO NOTHING",
                name = sql_literal(name),
                function_name = sql_literal(function_name),
                category = sql_literal(category),
                initial_state = sql_literal(&initial_state.to_string()),
                reducers = sql_literal(&serde_json::Value::Object(reducers.clone()).to_string()),
                threshold = snapshot_threshold
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "NULL".to_string()),
            ),
            None,
            &[],
        )
    })?;
    if inserted.len() == 0 {
        return Err(EngineError::InvariantViolation(format!("aggregate '{name}' already exists")));
    }
    Ok(())
}

/// §4.11 steps 1-3: invokes the registered loader for `name` over `stream_id`.
pub fn load_aggregate(name: &str, stream_id: Uuid) -> EngineResult<AggregateState> {
    let function_name: Option<String> = Spi::get_one(&format!(
        "SELECT function_name FROM events.aggregate_def WHERE name = {}",
        sql_literal(name)
    ))?;
    let function_name =
        function_name.ok_or_else(|| EngineError::NotFound(format!("aggregate '{name}' not registered")))?;

    let sql = format!(
        "SELECT {}({})",
        function_ident(&function_name),
        sql_literal(&stream_id.to_string())
    );
    let result: pgrx::JsonB = Spi::get_one(&sql)?
        .ok_or_else(|| EngineError::NotFound(format!("aggregate loader for '{name}' returned no result")))?;
    let doc = result.0;
    Ok(AggregateState {
        stream_id,
        state: doc.get("state").cloned().unwrap_or(serde_json::Value::Null),
        version: doc.get("version").and_then(|v| v.as_i64()).unwrap_or(0),
    })
}

pub fn save_snapshot(stream: Uuid, name: &str, version: i64, state: &serde_json::Value) -> EngineResult<()> {
    Spi::connect_mut(|client| {
        client.update(
            &format!(
                "INSERT INTO events.snapshot (stream, name, version, state) \
                 VALUES ({stream}, {name}, {version}, {state}::jsonb) \
                 ON CONFLICT (stream, name, version) DO NOTHING",
                stream = sql_literal(&stream.to_string()),
                name = sql_literal(name),
                version = version,
                state = sql_literal(&state.to_string()),
            ),
            None,
            &[],
        )
    })?;
    Ok(())
}

pub fn get_snapshot(stream: Uuid, name: &str) -> EngineResult<Option<(i64, serde_json::Value)>> {
    Spi::connect(|client| {
        let row = client
            .select(
                &format!(
                    "SELECT version, state FROM events.snapshot \
                     WHERE stream = {} AND name = {} ORDER BY version DESC LIMIT 1",
                    sql_literal(&stream.to_string()),
                    sql_literal(name)
                ),
                Some(1),
                &[],
            )?
            .first();
        match row.get::<i64>(1)? {
            None => Ok(None),
            Some(version) => Ok(Some((
                version,
                row.get::<pgrx::JsonB>(2)?.map(|j| j.0).unwrap_or(serde_json::Value::Null),
            ))),
        }
    })
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use super::*;
    use crate::eventstore::append::append;
    use crate::eventstore::registry::{register_category, register_event_type};

    #[pgrx::pg_test]
    fn replays_events_into_folded_state() {
        register_category("counter").unwrap();
        register_event_type("counter", "incremented").unwrap();

        let mut reducers = serde_json::Map::new();
        reducers.insert(
            "counter/incremented".to_string(),
            serde_json::Value::String(
                "jsonb_set(v_state, '{count}', to_jsonb(COALESCE((v_state->>'count')::int, 0) + COALESCE((v_event.data->>'by')::int, 0)))"
                    .to_string(),
            ),
        );

        register_aggregate(
            "counter-total",
            "counter_total_loader",
            "counter",
            &serde_json::json!({"count": 0}),
            &reducers,
            None,
        )
        .unwrap();

        let sid = Uuid::from_bytes(*uuid::Uuid::new_v4().as_bytes());
        append(sid, "counter", "incremented", &serde_json::json!({"by": 3}), &serde_json::json!({}), None).unwrap();
        append(sid, "counter", "incremented", &serde_json::json!({"by": 4}), &serde_json::json!({}), None).unwrap();

        let state = load_aggregate("counter-total", sid).unwrap();
        assert_eq!(state.version, 2);
        assert_eq!(state.state, serde_json::json!({"count": 7}));
    }

    #[pgrx::pg_test]
    fn rejects_reducer_with_parameter_placeholder() {
        let mut reducers = serde_json::Map::new();
        reducers.insert(
            "counter/incremented".to_string(),
            serde_json::Value::String("v_state || $1".to_string()),
        );
        register_category("counter").unwrap();
        register_event_type("counter", "incremented").unwrap();
        let err = register_aggregate(
            "bad-aggregate",
            "bad_loader",
            "counter",
            &serde_json::json!({}),
            &reducers,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::ParameterizedFragmentRejected(_)));
    }
}
