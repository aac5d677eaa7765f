use pgrx::prelude::*;

use crate::error::EngineResult;
use crate::pitr::restore::{project_restore_operation, restore_row};
use crate::pitr::types::{AuditEntry, RestoreOperation, TransactionSummary};
use crate::util::sql_literal;

const AUDIT_COLUMNS: &str = "a.id, a.tracked_table, a.operation, a.primary_key_value, a.old_data, \
                              a.new_data, a.changed_columns, a.transaction_id, a.changed_at, \
                              a.changed_by, a.application_name";

/// §4.15 `get_transaction_history`: all entries sharing `tx_id`, oldest
/// first, joined to their table identity.
pub fn get_transaction_history(tx_id: i64) -> EngineResult<Vec<(String, String, AuditEntry)>> {
    let sql = format!(
        "SELECT tt.schema_name, tt.table_name, {cols} FROM pitr.audit_entry a \
         JOIN pitr.tracked_table tt ON tt.id = a.tracked_table \
         WHERE a.transaction_id = {tx} ORDER BY a.changed_at ASC",
        cols = AUDIT_COLUMNS,
        tx = tx_id,
    );
    Spi::connect(|client| {
        let rows = client.select(&sql, None, &[])?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let schema: String = row.get::<String>(1)?.unwrap_or_default();
            let table: String = row.get::<String>(2)?.unwrap_or_default();
            let entry = AuditEntry {
                id: row.get::<i64>(3)?.unwrap(),
                tracked_table: row.get::<i64>(4)?.unwrap(),
                operation: row.get::<String>(5)?.unwrap_or_default(),
                primary_key_value: row.get::<pgrx::JsonB>(6)?.map(|j| j.0).unwrap_or(serde_json::Value::Null),
                old_data: row.get::<pgrx::JsonB>(7)?.map(|j| j.0),
                new_data: row.get::<pgrx::JsonB>(8)?.map(|j| j.0),
                changed_columns: row.get::<Vec<String>>(9)?,
                transaction_id: row.get::<i64>(10)?.unwrap(),
                changed_at: row.get::<String>(11)?.unwrap_or_default(),
                changed_by: row.get::<String>(12)?.unwrap_or_default(),
                application_name: row.get::<String>(13)?.unwrap_or_default(),
            };
            out.push((schema, table, entry));
        }
        Ok(out)
    })
}

/// §4.15 `get_recent_transactions`: per-transaction summary across the
/// whole audit log, newest first.
pub fn get_recent_transactions(limit: i64) -> EngineResult<Vec<TransactionSummary>> {
    let sql = format!(
        r#"
        SELECT a.transaction_id,
               MIN(a.changed_at)::text,
               (array_agg(a.changed_by ORDER BY a.changed_at))[1],
               array_agg(DISTINCT tt.schema_name || '.' || tt.table_name),
               COUNT(*) FILTER (WHERE a.operation = 'INSERT'),
               COUNT(*) FILTER (WHERE a.operation = 'UPDATE'),
               COUNT(*) FILTER (WHERE a.operation = 'DELETE')
        FROM pitr.audit_entry a
        JOIN pitr.tracked_table tt ON tt.id = a.tracked_table
        GROUP BY a.transaction_id
        ORDER BY MIN(a.changed_at) DESC
        LIMIT {limit}
        "#,
    );
    Spi::connect(|client| {
        let rows = client.select(&sql, None, &[])?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(TransactionSummary {
                transaction_id: row.get::<i64>(1)?.unwrap(),
                earliest_changed_at: row.get::<String>(2)?.unwrap_or_default(),
                changed_by: row.get::<String>(3)?.unwrap_or_default(),
                tables_affected: row.get::<Vec<String>>(4)?.unwrap_or_default(),
                insert_count: row.get::<i64>(5)?.unwrap_or(0),
                update_count: row.get::<i64>(6)?.unwrap_or(0),
                delete_count: row.get::<i64>(7)?.unwrap_or(0),
            });
        }
        Ok(out)
    })
}

fn transaction_tables(tx_id: i64) -> EngineResult<Vec<(String, String)>> {
    Spi::connect(|client| {
        let rows = client.select(
            &format!(
                "SELECT DISTINCT tt.schema_name, tt.table_name FROM pitr.audit_entry a \
                 JOIN pitr.tracked_table tt ON tt.id = a.tracked_table WHERE a.transaction_id = {tx_id}"
            ),
            None,
            &[],
        )?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push((row.get::<String>(1)?.unwrap_or_default(), row.get::<String>(2)?.unwrap_or_default()));
        }
        Ok(out)
    })
}

fn transaction_start(tx_id: i64) -> EngineResult<Option<String>> {
    Spi::get_one(&format!("SELECT MIN(changed_at)::text FROM pitr.audit_entry WHERE transaction_id = {tx_id}"))
        .map_err(Into::into)
}

fn table_primary_keys(schema: &str, table: &str, tx_id_cutoff_clause: &str) -> EngineResult<Vec<serde_json::Value>> {
    Spi::connect(|client| {
        let rows = client.select(
            &format!(
                "SELECT DISTINCT a.primary_key_value FROM pitr.audit_entry a \
                 JOIN pitr.tracked_table tt ON tt.id = a.tracked_table \
                 WHERE tt.schema_name = {schema} AND tt.table_name = {table} {cutoff}",
                schema = sql_literal(schema),
                table = sql_literal(table),
                cutoff = tx_id_cutoff_clause,
            ),
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

/// §4.15 `restore_to_transaction`: restore every table touched at or after
/// `tx_id` to its state immediately before `tx_id`, rolling back that
/// transaction and every later one together.
pub fn restore_to_transaction(
    tx_id: i64,
    dry_run: bool,
) -> EngineResult<Vec<(String, String, serde_json::Value, RestoreOperation)>> {
    restore_tables_to_transaction_impl(tx_id, None, dry_run)
}

pub fn restore_tables_to_transaction(
    tx_id: i64,
    tables: &[(String, String)],
    dry_run: bool,
) -> EngineResult<Vec<(String, String, serde_json::Value, RestoreOperation)>> {
    restore_tables_to_transaction_impl(tx_id, Some(tables), dry_run)
}

fn restore_tables_to_transaction_impl(
    tx_id: i64,
    tables: Option<&[(String, String)]>,
    dry_run: bool,
) -> EngineResult<Vec<(String, String, serde_json::Value, RestoreOperation)>> {
    let start = transaction_start(tx_id)?;
    let candidate_tables = match tables {
        Some(t) => t.to_vec(),
        None => transaction_tables(tx_id)?,
    };

    let as_of = match &start {
        Some(s) => format!("({})::timestamptz - interval '1 microsecond'", sql_literal(s)),
        None => return Ok(Vec::new()),
    };
    let as_of_value: String = Spi::get_one(&format!("SELECT ({as_of})::text"))?.unwrap_or_default();

    let mut out = Vec::new();
    for (schema, table) in candidate_tables {
        let cutoff = format!("AND a.transaction_id >= {tx_id}");
        let keys = table_primary_keys(&schema, &table, &cutoff)?;
        for pk in keys {
            let op = if dry_run {
                project_restore_operation(&schema, &table, &pk, &as_of_value)?
            } else {
                restore_row(&schema, &table, &pk, &as_of_value)?
            };
            out.push((schema.clone(), table.clone(), pk, op));
        }
    }
    Ok(out)
}

/// §4.15 `undo_transaction`: invert that transaction's own entries in
/// reverse `changed_at`, never touching later transactions' effects.
pub fn undo_transaction(tx_id: i64, dry_run: bool) -> EngineResult<Vec<(String, String, serde_json::Value, RestoreOperation)>> {
    let entries = get_transaction_history(tx_id)?;
    let mut out = Vec::with_capacity(entries.len());
    for (schema, table, entry) in entries.into_iter().rev() {
        let op = match entry.operation.as_str() {
            "INSERT" => {
                if !dry_run {
                    crate::pitr::restore::delete_row(&schema, &table, &entry.primary_key_value)?;
                }
                RestoreOperation::Delete
            }
            "DELETE" => {
                if let Some(old) = &entry.old_data {
                    if !dry_run {
                        crate::pitr::restore::insert_row(&schema, &table, old)?;
                    }
                }
                RestoreOperation::Insert
            }
            "UPDATE" => {
                if let (Some(old), Some(columns)) = (&entry.old_data, &entry.changed_columns) {
                    if !dry_run {
                        crate::pitr::restore::update_columns(
                            &schema,
                            &table,
                            &entry.primary_key_value,
                            old,
                            columns,
                        )?;
                    }
                }
                RestoreOperation::Update
            }
            _ => RestoreOperation::NoChange,
        };
        out.push((schema, table, entry.primary_key_value, op));
    }
    Ok(out)
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use super::*;
    use crate::pitr::tracking::enable_tracking;

    // §8 seed 6: transaction T inserts two rows, a later transaction updates
    // one of them; undoing T removes both rows without disturbing the later
    // update's own audit trail, and undoing that later update restores only
    // the column it touched.
    #[pgrx::pg_test]
    fn undo_transaction_deletes_inserts_and_preserves_later_update() {
        Spi::run("CREATE TABLE public.pitr_txn_orders (id bigint PRIMARY KEY, total integer, label text)").unwrap();
        enable_tracking("public", "pitr_txn_orders", &["id".to_string()], None, None).unwrap();

        Spi::run("INSERT INTO public.pitr_txn_orders VALUES (1, 100, 'a')").unwrap();
        Spi::run("INSERT INTO public.pitr_txn_orders VALUES (2, 200, 'b')").unwrap();
        let tx_id: i64 = Spi::get_one("SELECT txid_current()").unwrap().unwrap();

        // The later transaction's update is captured by the real trigger
        // under this same test transaction (pg_test never commits mid-test),
        // then relabeled to a distinct id to stand in for the later
        // transaction seed 6 describes.
        Spi::run("UPDATE public.pitr_txn_orders SET total = 150 WHERE id = 1").unwrap();
        let later_tx_id = tx_id + 1;
        Spi::run(&format!(
            "UPDATE pitr.audit_entry SET transaction_id = {later_tx_id} \
             WHERE operation = 'UPDATE' AND primary_key_value @> '{{\"id\": 1}}'::jsonb"
        ))
        .unwrap();

        let results = undo_transaction(tx_id, false).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, _, _, op)| *op == RestoreOperation::Delete));

        let remaining: i64 = Spi::get_one("SELECT COUNT(*) FROM public.pitr_txn_orders").unwrap().unwrap();
        assert_eq!(remaining, 0);

        let later_entries = get_transaction_history(later_tx_id).unwrap();
        assert_eq!(later_entries.len(), 1);
        assert_eq!(later_entries[0].2.operation, "UPDATE");

        Spi::run("INSERT INTO public.pitr_txn_orders VALUES (1, 999, 'reinserted')").unwrap();

        let undo_update = undo_transaction(later_tx_id, false).unwrap();
        assert_eq!(undo_update.len(), 1);
        assert_eq!(undo_update[0].3, RestoreOperation::Update);

        let total: i32 = Spi::get_one("SELECT total FROM public.pitr_txn_orders WHERE id = 1").unwrap().unwrap();
        let label: String = Spi::get_one("SELECT label FROM public.pitr_txn_orders WHERE id = 1").unwrap().unwrap();
        assert_eq!(total, 100);
        assert_eq!(label, "reinserted");
    }

    #[pgrx::pg_test]
    fn restore_to_transaction_dry_run_projects_real_operation() {
        Spi::run("CREATE TABLE public.pitr_txn_dry_orders (id bigint PRIMARY KEY, total integer)").unwrap();
        enable_tracking("public", "pitr_txn_dry_orders", &["id".to_string()], None, None).unwrap();

        Spi::run("INSERT INTO public.pitr_txn_dry_orders VALUES (1, 100)").unwrap();
        let tx_id: i64 = Spi::get_one("SELECT txid_current()").unwrap().unwrap();
        Spi::run("UPDATE public.pitr_txn_dry_orders SET total = 200 WHERE id = 1").unwrap();

        let dry = restore_to_transaction(tx_id, true).unwrap();
        assert_eq!(dry.len(), 1);
        assert_eq!(dry[0].3, RestoreOperation::Delete);

        let total: i32 = Spi::get_one("SELECT total FROM public.pitr_txn_dry_orders WHERE id = 1")
            .unwrap()
            .unwrap();
        assert_eq!(total, 200);
    }
}
