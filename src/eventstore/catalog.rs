use pgrx::prelude::*;

use crate::error::{EngineError, EngineResult};
use crate::eventstore::types::AggregateDef;
use crate::util::sql_literal;

pub fn list_aggregates() -> EngineResult<Vec<String>> {
    Spi::connect(|client| {
        let table = client.select("SELECT name FROM events.aggregate_def ORDER BY name", None, &[])?;
        let mut out = Vec::with_capacity(table.len());
        for row in table {
            out.push(row.get::<String>(1)?.unwrap_or_default());
        }
        Ok(out)
    })
}

pub fn get_aggregate_def(name: &str) -> EngineResult<AggregateDef> {
    Spi::connect(|client| {
        let row = client
            .select(
                &format!(
                    "SELECT function_name, category, initial_state, reducers, snapshot_threshold \
                     FROM events.aggregate_def WHERE name = {}",
                    sql_literal(name)
                ),
                Some(1),
                &[],
            )?
            .first();
        let function_name = row
            .get::<String>(1)?
            .ok_or_else(|| EngineError::NotFound(format!("aggregate '{name}' not found")))?;
        Ok(AggregateDef {
            name: name.to_string(),
            function_name,
            category: row.get::<String>(2)?.unwrap_or_default(),
            initial_state: row.get::<pgrx::JsonB>(3)?.map(|j| j.0).unwrap_or(serde_json::Value::Null),
            reducers: row
                .get::<pgrx::JsonB>(4)?
                .map(|j| j.0)
                .and_then(|v| v.as_object().cloned())
                .unwrap_or_default(),
            snapshot_threshold: row.get::<i32>(5)?,
        })
    })
}
