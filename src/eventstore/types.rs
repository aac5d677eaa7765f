use pgrx::Uuid;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub id: Uuid,
    pub category: String,
    pub version: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendedEvent {
    pub position: i64,
    pub id: Uuid,
    pub stream: Uuid,
    pub stream_version: i64,
    pub category: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub name: String,
    pub filter_types: Option<serde_json::Value>,
    pub filter_streams: Option<serde_json::Value>,
    pub last_position: i64,
    pub last_processed_at: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadDirection {
    Forward,
    Backward,
}

impl ReadDirection {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "forward" => Some(Self::Forward),
            "backward" => Some(Self::Backward),
            _ => None,
        }
    }

    pub fn sql_order(&self) -> &'static str {
        match self {
            Self::Forward => "ASC",
            Self::Backward => "DESC",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateDef {
    pub name: String,
    pub function_name: String,
    pub category: String,
    pub initial_state: serde_json::Value,
    pub reducers: serde_json::Map<String, serde_json::Value>,
    pub snapshot_threshold: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateState {
    pub stream_id: Uuid,
    pub state: serde_json::Value,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionDef {
    pub name: String,
    pub sync_handlers: serde_json::Map<String, serde_json::Value>,
    pub async_types: Vec<String>,
    pub trigger_name: Option<String>,
    pub subscription_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionStatus {
    pub name: String,
    pub sync_types: Vec<String>,
    pub async_types: Vec<String>,
    pub trigger_name: Option<String>,
    pub subscription_name: Option<String>,
    pub events_behind: i64,
}
