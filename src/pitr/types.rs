use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedTable {
    pub id: i64,
    pub schema_name: String,
    pub table_name: String,
    pub primary_key_columns: Vec<String>,
    pub tracked_columns: Option<Vec<String>>,
    pub excluded_columns: Option<Vec<String>>,
    pub trigger_name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub tracked_table: i64,
    pub operation: String,
    pub primary_key_value: serde_json::Value,
    pub old_data: Option<serde_json::Value>,
    pub new_data: Option<serde_json::Value>,
    pub changed_columns: Option<Vec<String>>,
    pub transaction_id: i64,
    pub changed_at: String,
    pub changed_by: String,
    pub application_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub transaction_id: i64,
    pub earliest_changed_at: String,
    pub changed_by: String,
    pub tables_affected: Vec<String>,
    pub insert_count: i64,
    pub update_count: i64,
    pub delete_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOperation {
    NoChange,
    Delete,
    Insert,
    Update,
}

impl RestoreOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoChange => "NO_CHANGE",
            Self::Delete => "DELETE",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
        }
    }
}
