use pgrx::prelude::*;

use crate::error::{EngineError, EngineResult};
use crate::pitr::types::TrackedTable;
use crate::util::{qi, sql_literal};

fn table_exists(schema: &str, table: &str) -> EngineResult<bool> {
    let found: bool = Spi::get_one(&format!(
        "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_tables WHERE schemaname = {} AND tablename = {})",
        sql_literal(schema),
        sql_literal(table)
    ))?
    .unwrap_or(false);
    Ok(found)
}

fn array_literal(values: &Option<Vec<String>>) -> String {
    match values {
        None => "NULL".to_string(),
        Some(cols) => {
            let items = cols
                .iter()
                .map(|c| sql_literal(c))
                .collect::<Vec<_>>()
                .join(", ");
            format!("ARRAY[{items}]::text[]")
        }
    }
}

/// §4.12 `enable_tracking`. Installs a single generic AFTER trigger per
/// tracked table that delegates to `pitr.capture_row_change()`; per-table
/// behavior (PK columns, column filters) is looked up by that function at
/// fire time from `pitr.tracked_table`, not baked into the trigger itself.
pub fn enable_tracking(
    schema: &str,
    table: &str,
    primary_key_columns: &[String],
    tracked_columns: Option<&[String]>,
    excluded_columns: Option<&[String]>,
) -> EngineResult<TrackedTable> {
    if !table_exists(schema, table)? {
        return Err(EngineError::NotFound(format!("table {schema}.{table} does not exist")));
    }
    if primary_key_columns.is_empty() {
        return Err(EngineError::InvariantViolation(
            "enable_tracking requires at least one primary key column".into(),
        ));
    }

    let trigger_name = format!("chronostore_pitr_capture_{schema}_{table}");
    let pk_array = array_literal(&Some(primary_key_columns.to_vec()));
    let tracked_array = array_literal(&tracked_columns.map(|c| c.to_vec()));
    let excluded_array = array_literal(&excluded_columns.map(|c| c.to_vec()));

    let row = Spi::connect_mut(|client| {
        client
            .select(
                &format!(
                    r#"
                    INSERT INTO pitr.tracked_table
                        (schema_name, table_name, primary_key_columns, tracked_columns, excluded_columns, trigger_name, enabled)
                    VALUES ({schema}, {table}, {pk}, {tracked}, {excluded}, {trigger}, true)
                    ON CONFLICT (schema_name, table_name) DO UPDATE SET
                        primary_key_columns = EXCLUDED.primary_key_columns,
                        tracked_columns = EXCLUDED.tracked_columns,
                        excluded_columns = EXCLUDED.excluded_columns,
                        enabled = true
                    RETURNING id
                    "#,
                    schema = sql_literal(schema),
                    table = sql_literal(table),
                    pk = pk_array,
                    tracked = tracked_array,
                    excluded = excluded_array,
                    trigger = sql_literal(&trigger_name),
                ),
                Some(1),
                &[],
            )?
            .first()
            .get::<i64>(1)
    })?
    .ok_or_else(|| EngineError::InvariantViolation("enable_tracking insert returned no id".into()))?;

    let qualified = format!("{}.{}", qi(schema), qi(table));
    let ddl = format!(
        r#"
        DROP TRIGGER IF EXISTS {trig} ON {qualified};
        CREATE TRIGGER {trig} AFTER INSERT OR UPDATE OR DELETE ON {qualified}
        FOR EACH ROW EXECUTE FUNCTION pitr.capture_row_change();
        "#,
        trig = qi(&trigger_name),
        qualified = qualified,
    );
    Spi::connect_mut(|client| client.update(&ddl, None, &[]))?;

    Ok(TrackedTable {
        id: row,
        schema_name: schema.to_string(),
        table_name: table.to_string(),
        primary_key_columns: primary_key_columns.to_vec(),
        tracked_columns: tracked_columns.map(|c| c.to_vec()),
        excluded_columns: excluded_columns.map(|c| c.to_vec()),
        trigger_name,
        enabled: true,
    })
}

/// Supplemented: disable tracking without dropping the audit history or the
/// installed trigger (the trigger function no-ops when `enabled = false`,
/// see `pitr.capture_row_change`'s `AND enabled` lookup filter).
pub fn disable_tracking(schema: &str, table: &str) -> EngineResult<()> {
    let updated = Spi::connect_mut(|client| {
        client.update(
            &format!(
                "UPDATE pitr.tracked_table SET enabled = false WHERE schema_name = {} AND table_name = {}",
                sql_literal(schema),
                sql_literal(table)
            ),
            None,
            &[],
        )
    })?;
    if updated.len() == 0 {
        return Err(EngineError::NotFound(format!("table {schema}.{table} is not tracked")));
    }
    Ok(())
}

pub fn list_tracked_tables() -> EngineResult<Vec<TrackedTable>> {
    Spi::connect(|client| {
        let table = client.select(
            "SELECT id, schema_name, table_name, primary_key_columns, tracked_columns, \
             excluded_columns, trigger_name, enabled FROM pitr.tracked_table ORDER BY schema_name, table_name",
            None,
            &[],
        )?;
        let mut out = Vec::with_capacity(table.len());
        for row in table {
            out.push(TrackedTable {
                id: row.get::<i64>(1)?.unwrap(),
                schema_name: row.get::<String>(2)?.unwrap_or_default(),
                table_name: row.get::<String>(3)?.unwrap_or_default(),
                primary_key_columns: row.get::<Vec<String>>(4)?.unwrap_or_default(),
                tracked_columns: row.get::<Vec<String>>(5)?,
                excluded_columns: row.get::<Vec<String>>(6)?,
                trigger_name: row.get::<String>(7)?.unwrap_or_default(),
                enabled: row.get::<bool>(8)?.unwrap_or(false),
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
    fn enable_tracking_requires_existing_table() {
        let err = enable_tracking("public", "does_not_exist", &["id".to_string()], None, None).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[pgrx::pg_test]
    fn enable_tracking_installs_trigger_on_real_table() {
        Spi::run("CREATE TABLE public.pitr_test_orders (id bigint PRIMARY KEY, total integer)").unwrap();
        let tracked = enable_tracking("public", "pitr_test_orders", &["id".to_string()], None, None).unwrap();
        assert!(tracked.enabled);

        let all = list_tracked_tables().unwrap();
        assert!(all.iter().any(|t| t.table_name == "pitr_test_orders"));

        disable_tracking("public", "pitr_test_orders").unwrap();
        let all = list_tracked_tables().unwrap();
        assert!(!all.iter().find(|t| t.table_name == "pitr_test_orders").unwrap().enabled);
    }
}
