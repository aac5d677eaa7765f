pub mod history;
pub mod restore;
pub mod tracking;
pub mod transactions;
pub mod types;

use pgrx::iter::TableIterator;
use pgrx::prelude::*;
use pgrx::JsonB;

use crate::pitr::types::{AuditEntry, RestoreOperation, TrackedTable, TransactionSummary};

fn audit_tuple(
    e: AuditEntry,
) -> (
    i64,
    i64,
    String,
    JsonB,
    Option<JsonB>,
    Option<JsonB>,
    Option<Vec<String>>,
    i64,
    String,
    String,
    String,
) {
    (
        e.id,
        e.tracked_table,
        e.operation,
        JsonB(e.primary_key_value),
        e.old_data.map(JsonB),
        e.new_data.map(JsonB),
        e.changed_columns,
        e.transaction_id,
        e.changed_at,
        e.changed_by,
        e.application_name,
    )
}

#[pg_extern]
fn pitr_enable_tracking(
    schema: &str,
    table: &str,
    primary_key_columns: Vec<String>,
    tracked_columns: Option<Vec<String>>,
    excluded_columns: Option<Vec<String>>,
) -> JsonB {
    let t = ok_or_pg_error!(tracking::enable_tracking(
        schema,
        table,
        &primary_key_columns,
        tracked_columns.as_deref(),
        excluded_columns.as_deref(),
    ));
    JsonB(serde_json::to_value(&t).unwrap_or(serde_json::Value::Null))
}

#[pg_extern]
fn pitr_disable_tracking(schema: &str, table: &str) {
    ok_or_pg_error!(tracking::disable_tracking(schema, table))
}

#[pg_extern]
fn pitr_list_tracked_tables() -> TableIterator<
    'static,
    (
        name!(id, i64),
        name!(schema_name, String),
        name!(table_name, String),
        name!(primary_key_columns, Vec<String>),
        name!(tracked_columns, Option<Vec<String>>),
        name!(excluded_columns, Option<Vec<String>>),
        name!(trigger_name, String),
        name!(enabled, bool),
    ),
> {
    let tables: Vec<TrackedTable> = ok_or_pg_error!(tracking::list_tracked_tables());
    TableIterator::new(tables.into_iter().map(|t| {
        (
            t.id,
            t.schema_name,
            t.table_name,
            t.primary_key_columns,
            t.tracked_columns,
            t.excluded_columns,
            t.trigger_name,
            t.enabled,
        )
    }))
}

#[pg_extern]
fn pitr_get_row_history(
    schema: &str,
    table: &str,
    pk: JsonB,
    limit: default!(i64, 100),
) -> TableIterator<
    'static,
    (
        name!(id, i64),
        name!(tracked_table, i64),
        name!(operation, String),
        name!(primary_key_value, JsonB),
        name!(old_data, Option<JsonB>),
        name!(new_data, Option<JsonB>),
        name!(changed_columns, Option<Vec<String>>),
        name!(transaction_id, i64),
        name!(changed_at, String),
        name!(changed_by, String),
        name!(application_name, String),
    ),
> {
    let entries = ok_or_pg_error!(history::get_row_history(schema, table, &pk.0, limit));
    TableIterator::new(entries.into_iter().map(audit_tuple))
}

#[pg_extern]
fn pitr_get_table_history(
    schema: &str,
    table: &str,
    since: Option<&str>,
    until: Option<&str>,
    limit: default!(i64, 100),
) -> TableIterator<
    'static,
    (
        name!(id, i64),
        name!(tracked_table, i64),
        name!(operation, String),
        name!(primary_key_value, JsonB),
        name!(old_data, Option<JsonB>),
        name!(new_data, Option<JsonB>),
        name!(changed_columns, Option<Vec<String>>),
        name!(transaction_id, i64),
        name!(changed_at, String),
        name!(changed_by, String),
        name!(application_name, String),
    ),
> {
    let entries = ok_or_pg_error!(history::get_table_history(schema, table, since, until, limit));
    TableIterator::new(entries.into_iter().map(audit_tuple))
}

#[pg_extern]
fn pitr_get_row_at(schema: &str, table: &str, pk: JsonB, as_of: &str) -> Option<JsonB> {
    ok_or_pg_error!(history::get_row_at(schema, table, &pk.0, as_of)).map(JsonB)
}

#[pg_extern]
fn pitr_get_table_at(
    schema: &str,
    table: &str,
    as_of: &str,
) -> TableIterator<'static, (name!(row_data, JsonB),)> {
    let rows = ok_or_pg_error!(history::get_table_at(schema, table, as_of));
    TableIterator::new(rows.into_iter().map(|r| (JsonB(r),)))
}

#[pg_extern]
fn pitr_restore_row(schema: &str, table: &str, pk: JsonB, as_of: &str) -> String {
    ok_or_pg_error!(restore::restore_row(schema, table, &pk.0, as_of))
        .as_str()
        .to_string()
}

#[pg_extern]
fn pitr_restore_table(
    schema: &str,
    table: &str,
    as_of: &str,
    dry_run: default!(bool, false),
) -> TableIterator<'static, (name!(primary_key_value, JsonB), name!(operation, String))> {
    let results = ok_or_pg_error!(restore::restore_table(schema, table, as_of, dry_run));
    TableIterator::new(
        results
            .into_iter()
            .map(|(pk, op)| (JsonB(pk), op.as_str().to_string())),
    )
}

#[pg_extern]
fn pitr_restore_rows_where(
    schema: &str,
    table: &str,
    filter: JsonB,
    as_of: &str,
    dry_run: default!(bool, false),
) -> TableIterator<'static, (name!(primary_key_value, JsonB), name!(operation, String))> {
    let results = ok_or_pg_error!(restore::restore_rows_where(schema, table, &filter.0, as_of, dry_run));
    TableIterator::new(
        results
            .into_iter()
            .map(|(pk, op)| (JsonB(pk), op.as_str().to_string())),
    )
}

#[pg_extern]
fn pitr_undo_last_change(schema: &str, table: &str, pk: JsonB) -> String {
    ok_or_pg_error!(restore::undo_last_change(schema, table, &pk.0))
        .as_str()
        .to_string()
}

#[pg_extern]
fn pitr_get_transaction_history(
    tx_id: i64,
) -> TableIterator<
    'static,
    (
        name!(schema_name, String),
        name!(table_name, String),
        name!(id, i64),
        name!(tracked_table, i64),
        name!(operation, String),
        name!(primary_key_value, JsonB),
        name!(old_data, Option<JsonB>),
        name!(new_data, Option<JsonB>),
        name!(changed_columns, Option<Vec<String>>),
        name!(transaction_id, i64),
        name!(changed_at, String),
        name!(changed_by, String),
        name!(application_name, String),
    ),
> {
    let entries = ok_or_pg_error!(transactions::get_transaction_history(tx_id));
    TableIterator::new(entries.into_iter().map(|(schema, table, e)| {
        let t = audit_tuple(e);
        (schema, table, t.0, t.1, t.2, t.3, t.4, t.5, t.6, t.7, t.8, t.9, t.10)
    }))
}

#[pg_extern]
fn pitr_get_recent_transactions(
    limit: default!(i64, 50),
) -> TableIterator<
    'static,
    (
        name!(transaction_id, i64),
        name!(earliest_changed_at, String),
        name!(changed_by, String),
        name!(tables_affected, Vec<String>),
        name!(insert_count, i64),
        name!(update_count, i64),
        name!(delete_count, i64),
    ),
> {
    let summaries: Vec<TransactionSummary> = ok_or_pg_error!(transactions::get_recent_transactions(limit));
    TableIterator::new(summaries.into_iter().map(|s| {
        (
            s.transaction_id,
            s.earliest_changed_at,
            s.changed_by,
            s.tables_affected,
            s.insert_count,
            s.update_count,
            s.delete_count,
        )
    }))
}

#[pg_extern]
fn pitr_restore_to_transaction(
    tx_id: i64,
    dry_run: default!(bool, false),
) -> TableIterator<
    'static,
    (
        name!(schema_name, String),
        name!(table_name, String),
        name!(primary_key_value, JsonB),
        name!(operation, String),
    ),
> {
    let results = ok_or_pg_error!(transactions::restore_to_transaction(tx_id, dry_run));
    TableIterator::new(restore_tuples(results))
}

#[pg_extern]
fn pitr_restore_tables_to_transaction(
    tx_id: i64,
    tables: JsonB,
    dry_run: default!(bool, false),
) -> TableIterator<
    'static,
    (
        name!(schema_name, String),
        name!(table_name, String),
        name!(primary_key_value, JsonB),
        name!(operation, String),
    ),
> {
    let pairs: Vec<(String, String)> = tables
        .0
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| {
            let schema = v.get("schema")?.as_str()?.to_string();
            let table = v.get("table")?.as_str()?.to_string();
            Some((schema, table))
        })
        .collect();
    let results = ok_or_pg_error!(transactions::restore_tables_to_transaction(tx_id, &pairs, dry_run));
    TableIterator::new(restore_tuples(results))
}

#[pg_extern]
fn pitr_undo_transaction(
    tx_id: i64,
    dry_run: default!(bool, false),
) -> TableIterator<
    'static,
    (
        name!(schema_name, String),
        name!(table_name, String),
        name!(primary_key_value, JsonB),
        name!(operation, String),
    ),
> {
    let results = ok_or_pg_error!(transactions::undo_transaction(tx_id, dry_run));
    TableIterator::new(restore_tuples(results))
}

fn restore_tuples(
    results: Vec<(String, String, serde_json::Value, RestoreOperation)>,
) -> impl Iterator<Item = (String, String, JsonB, String)> {
    results
        .into_iter()
        .map(|(schema, table, pk, op)| (schema, table, JsonB(pk), op.as_str().to_string()))
}
