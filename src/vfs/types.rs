use pgrx::Uuid;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: Uuid,
    pub name: String,
    pub default_branch: Option<Uuid>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: Uuid,
    pub repository: Uuid,
    pub name: String,
    pub head: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub id: Uuid,
    pub repository: Uuid,
    pub parent: Option<Uuid>,
    pub merged_from: Option<Uuid>,
    pub message: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDelta {
    pub id: i64,
    pub commit: Uuid,
    pub path: String,
    pub content: String,
    pub is_deleted: bool,
    pub is_symlink: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub is_symlink: bool,
    pub is_deleted: bool,
}

/// One row of `conflicts(left, right)`. §4.3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub path: String,
    pub conflict_kind: ConflictKind,
    pub base_content: Option<String>,
    pub left_content: Option<String>,
    pub right_content: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    #[serde(rename = "delete/modify")]
    DeleteModify,
    #[serde(rename = "add/add")]
    AddAdd,
    #[serde(rename = "modify/modify")]
    ModifyModify,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeleteModify => "delete/modify",
            Self::AddAdd => "add/add",
            Self::ModifyModify => "modify/modify",
        }
    }
}

/// A resolved snapshot entry carrying enough state to diff two snapshots
/// without a second round of `read_file` calls — the VFS analogue of the
/// teacher's `TargetRow`/`SourceRow` (bulk-read once, reason about the whole
/// set in memory).
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub path: String,
    pub exists: bool,
    pub is_symlink: bool,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeOutcome {
    Merged,
    MergedWithConflictsResolved,
    AlreadyUpToDate,
    FastForward,
}

impl FinalizeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merged => "merged",
            Self::MergedWithConflictsResolved => "merged_with_conflicts_resolved",
            Self::AlreadyUpToDate => "already_up_to_date",
            Self::FastForward => "fast_forward",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebaseOutcome {
    Noop,
    AlreadyUpToDate,
    FastForward,
    Rebased,
}

impl RebaseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::AlreadyUpToDate => "already_up_to_date",
            Self::FastForward => "fast_forward",
            Self::Rebased => "rebased",
        }
    }
}
