use pgrx::prelude::*;

use crate::error::{EngineError, EngineResult};
use crate::pitr::history::get_row_at;
use crate::pitr::types::RestoreOperation;
use crate::util::{qi, sql_literal};

fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", qi(schema), qi(table))
}

fn pk_predicate(alias: &str, pk: &serde_json::Value) -> EngineResult<String> {
    let obj = pk
        .as_object()
        .ok_or_else(|| EngineError::InvariantViolation("primary key value must be a JSON object".into()))?;
    let clauses: Vec<String> = obj
        .iter()
        .map(|(col, val)| {
            format!(
                "({alias}.{col})::text = ({val}::jsonb ->> 'v')",
                alias = alias,
                col = qi(col),
                val = sql_literal(&serde_json::json!({ "v": val }).to_string()),
            )
        })
        .collect();
    if clauses.is_empty() {
        return Err(EngineError::InvariantViolation("primary key value is empty".into()));
    }
    Ok(clauses.join(" AND "))
}

fn current_row(schema: &str, table: &str, pk: &serde_json::Value) -> EngineResult<Option<serde_json::Value>> {
    let predicate = pk_predicate("t", pk)?;
    let sql = format!(
        "SELECT to_jsonb(t) FROM {qualified} t WHERE {predicate}",
        qualified = qualified(schema, table),
        predicate = predicate,
    );
    let value: Option<pgrx::JsonB> = Spi::get_one(&sql)?;
    Ok(value.map(|j| j.0))
}

pub(crate) fn delete_row(schema: &str, table: &str, pk: &serde_json::Value) -> EngineResult<()> {
    let predicate = pk_predicate("t", pk)?;
    Spi::connect_mut(|client| {
        client.update(
            &format!(
                "DELETE FROM {qualified} t WHERE {predicate}",
                qualified = qualified(schema, table),
                predicate = predicate,
            ),
            None,
            &[],
        )
    })?;
    Ok(())
}

pub(crate) fn insert_row(schema: &str, table: &str, data: &serde_json::Value) -> EngineResult<()> {
    Spi::connect_mut(|client| {
        client.update(
            &format!(
                "INSERT INTO {qualified} SELECT * FROM jsonb_populate_record(NULL::{qualified}, {data}::jsonb)",
                qualified = qualified(schema, table),
                data = sql_literal(&data.to_string()),
            ),
            None,
            &[],
        )
    })?;
    Ok(())
}

/// Restores exactly `columns` on the live row to the values in `data`,
/// leaving every other column (including concurrent later changes) intact —
/// the per-column rule `undo_transaction` needs for UPDATE inversion.
pub(crate) fn update_columns(
    schema: &str,
    table: &str,
    pk: &serde_json::Value,
    data: &serde_json::Value,
    columns: &[String],
) -> EngineResult<()> {
    if columns.is_empty() {
        return Ok(());
    }
    let predicate = pk_predicate("t", pk)?;
    let set_clause = columns
        .iter()
        .map(|col| {
            format!(
                "{col} = (r.{col})",
                col = qi(col),
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE {qualified} AS t SET {set_clause} \
         FROM jsonb_populate_record(NULL::{qualified}, {data}::jsonb) AS r WHERE {predicate}",
        qualified = qualified(schema, table),
        set_clause = set_clause,
        data = sql_literal(&data.to_string()),
        predicate = predicate,
    );
    Spi::connect_mut(|client| client.update(&sql, None, &[]))?;
    Ok(())
}

fn non_pk_columns(schema: &str, table: &str, pk_columns: &[String]) -> EngineResult<Vec<String>> {
    Spi::connect(|client| {
        let rows = client.select(
            &format!(
                "SELECT column_name FROM information_schema.columns \
                 WHERE table_schema = {} AND table_name = {} ORDER BY ordinal_position",
                sql_literal(schema),
                sql_literal(table)
            ),
            None,
            &[],
        )?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let name = row.get::<String>(1)?.unwrap_or_default();
            if !pk_columns.iter().any(|c| c == &name) {
                out.push(name);
            }
        }
        Ok(out)
    })
}

/// §4.14 `restore_row`: all restores are themselves plain writes, so they're
/// captured by the same trigger that recorded the history being restored.
pub fn restore_row(
    schema: &str,
    table: &str,
    pk: &serde_json::Value,
    as_of: &str,
) -> EngineResult<RestoreOperation> {
    let historical = get_row_at(schema, table, pk, as_of)?;
    let current = current_row(schema, table, pk)?;

    match (historical, current) {
        (None, None) => Ok(RestoreOperation::NoChange),
        (None, Some(_)) => {
            delete_row(schema, table, pk)?;
            Ok(RestoreOperation::Delete)
        }
        (Some(data), None) => {
            insert_row(schema, table, &data)?;
            Ok(RestoreOperation::Insert)
        }
        (Some(historical), Some(current)) => {
            if historical == current {
                return Ok(RestoreOperation::NoChange);
            }
            let pk_columns: Vec<String> = pk
                .as_object()
                .map(|o| o.keys().cloned().collect())
                .unwrap_or_default();
            let columns = non_pk_columns(schema, table, &pk_columns)?;
            update_columns(schema, table, pk, &historical, &columns)?;
            Ok(RestoreOperation::Update)
        }
    }
}

fn distinct_primary_keys(tracked_table: i64) -> EngineResult<Vec<serde_json::Value>> {
    Spi::connect(|client| {
        let rows = client.select(
            &format!("SELECT DISTINCT primary_key_value FROM pitr.audit_entry WHERE tracked_table = {tracked_table}"),
            None,
            &[],
        )?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.get::<pgrx::JsonB>(1)?.map(|j| j.0).unwrap_or(serde_json::Value::Null));
        }
        Ok(out)
    })
}

fn tracked_table_id(schema: &str, table: &str) -> EngineResult<i64> {
    Spi::get_one(&format!(
        "SELECT id FROM pitr.tracked_table WHERE schema_name = {} AND table_name = {}",
        sql_literal(schema),
        sql_literal(table)
    ))?
    .ok_or_else(|| EngineError::NotFound(format!("table {schema}.{table} is not tracked")))
}

/// §4.14 `restore_table`: restore every primary key ever seen for the table.
/// `dry_run` projects the operation each key would take without mutating.
pub fn restore_table(
    schema: &str,
    table: &str,
    as_of: &str,
    dry_run: bool,
) -> EngineResult<Vec<(serde_json::Value, RestoreOperation)>> {
    let tracked_table = tracked_table_id(schema, table)?;
    let keys = distinct_primary_keys(tracked_table)?;
    restore_keys(schema, table, as_of, dry_run, keys)
}

/// §4.14 `restore_rows_where`: restricted to keys with some audit entry
/// whose `old_data`/`new_data` contains `filter` (JSON containment).
pub fn restore_rows_where(
    schema: &str,
    table: &str,
    filter: &serde_json::Value,
    as_of: &str,
    dry_run: bool,
) -> EngineResult<Vec<(serde_json::Value, RestoreOperation)>> {
    let tracked_table = tracked_table_id(schema, table)?;
    let sql = format!(
        "SELECT DISTINCT primary_key_value FROM pitr.audit_entry \
         WHERE tracked_table = {tt} AND (old_data @> {filter}::jsonb OR new_data @> {filter}::jsonb)",
        tt = tracked_table,
        filter = sql_literal(&filter.to_string()),
    );
    let keys = Spi::connect(|client| {
        let rows = client.select(&sql, None, &[])?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.get::<pgrx::JsonB>(1)?.map(|j| j.0).unwrap_or(serde_json::Value::Null));
        }
        Ok(out)
    })?;
    restore_keys(schema, table, as_of, dry_run, keys)
}

/// The operation `restore_row` would perform for `pk`, without mutating
/// anything. Shared by every dry-run path (`restore_table`,
/// `restore_rows_where`, and PITR's transaction-level restores).
pub(crate) fn project_restore_operation(
    schema: &str,
    table: &str,
    pk: &serde_json::Value,
    as_of: &str,
) -> EngineResult<RestoreOperation> {
    let historical = get_row_at(schema, table, pk, as_of)?;
    let current = current_row(schema, table, pk)?;
    Ok(match (historical, current) {
        (None, None) => RestoreOperation::NoChange,
        (None, Some(_)) => RestoreOperation::Delete,
        (Some(_), None) => RestoreOperation::Insert,
        (Some(h), Some(c)) if h == c => RestoreOperation::NoChange,
        (Some(_), Some(_)) => RestoreOperation::Update,
    })
}

fn restore_keys(
    schema: &str,
    table: &str,
    as_of: &str,
    dry_run: bool,
    keys: Vec<serde_json::Value>,
) -> EngineResult<Vec<(serde_json::Value, RestoreOperation)>> {
    let mut out = Vec::with_capacity(keys.len());
    for pk in keys {
        let op = if dry_run {
            project_restore_operation(schema, table, &pk, as_of)?
        } else {
            restore_row(schema, table, &pk, as_of)?
        };
        out.push((pk, op));
    }
    Ok(out)
}

/// §4.14 `undo_last_change`: restore to a timestamp exactly before the
/// newest entry for `pk`.
pub fn undo_last_change(schema: &str, table: &str, pk: &serde_json::Value) -> EngineResult<RestoreOperation> {
    let tracked_table = tracked_table_id(schema, table)?;
    let predicate = pk_predicate("a", pk)?;
    let newest: Option<String> = Spi::get_one(&format!(
        "SELECT changed_at::text FROM pitr.audit_entry a \
         WHERE a.tracked_table = {tt} AND {predicate} ORDER BY changed_at DESC LIMIT 1",
        tt = tracked_table,
        predicate = predicate,
    ))?;
    let newest = newest.ok_or_else(|| EngineError::NotFound("no audit history for this primary key".into()))?;
    let as_of: String = Spi::get_one(&format!(
        "SELECT ({})::timestamptz - interval '1 microsecond'",
        sql_literal(&newest)
    ))?
    .unwrap_or(newest);
    restore_row(schema, table, pk, &as_of)
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use super::*;
    use crate::pitr::tracking::enable_tracking;

    #[pgrx::pg_test]
    fn restore_row_recreates_deleted_row() {
        Spi::run("CREATE TABLE public.pitr_restore_orders (id bigint PRIMARY KEY, total integer)").unwrap();
        enable_tracking("public", "pitr_restore_orders", &["id".to_string()], None, None).unwrap();
        Spi::run("INSERT INTO public.pitr_restore_orders VALUES (1, 100)").unwrap();
        let before_delete: String = Spi::get_one("SELECT clock_timestamp()::text").unwrap().unwrap();
        Spi::run("DELETE FROM public.pitr_restore_orders WHERE id = 1").unwrap();

        let op = restore_row(
            "public",
            "pitr_restore_orders",
            &serde_json::json!({"id": 1}),
            &before_delete,
        )
        .unwrap();
        assert_eq!(op, RestoreOperation::Insert);

        let total: i32 = Spi::get_one("SELECT total FROM public.pitr_restore_orders WHERE id = 1")
            .unwrap()
            .unwrap();
        assert_eq!(total, 100);
    }

    #[pgrx::pg_test]
    fn second_restore_at_same_instant_is_idempotent() {
        Spi::run("CREATE TABLE public.pitr_restore_orders2 (id bigint PRIMARY KEY, total integer)").unwrap();
        enable_tracking("public", "pitr_restore_orders2", &["id".to_string()], None, None).unwrap();
        Spi::run("INSERT INTO public.pitr_restore_orders2 VALUES (1, 100)").unwrap();
        Spi::run("UPDATE public.pitr_restore_orders2 SET total = 150 WHERE id = 1").unwrap();
        let as_of: String = Spi::get_one("SELECT clock_timestamp()::text").unwrap().unwrap();

        let first = restore_row("public", "pitr_restore_orders2", &serde_json::json!({"id": 1}), &as_of).unwrap();
        assert_eq!(first, RestoreOperation::NoChange);
        let second = restore_row("public", "pitr_restore_orders2", &serde_json::json!({"id": 1}), &as_of).unwrap();
        assert_eq!(second, RestoreOperation::NoChange);
    }
}
