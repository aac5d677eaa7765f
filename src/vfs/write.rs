use pgrx::prelude::*;
use pgrx::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::util::{sql_literal, sql_literal_or_null};
use crate::vfs::path::normalize_path;
use crate::vfs::types::{Branch, Commit, FileDelta, Repository};

/// §4.6: creating a repository atomically creates the `main` branch and
/// sets it as the repository's default branch.
pub fn create_repository(name: &str) -> EngineResult<Repository> {
    Spi::connect_mut(|client| {
        let repo_row = client
            .update(
                &format!(
                    "INSERT INTO vfs.repository (name) VALUES ({}) \
                     RETURNING id, name, created_at",
                    sql_literal(name)
                ),
                Some(1),
                &[],
            )?
            .first();
        let id: Uuid = repo_row
            .get::<Uuid>(1)?
            .ok_or_else(|| EngineError::InvariantViolation("repository insert returned no id".into()))?;
        let created_at: String = repo_row.get::<String>(3)?.unwrap_or_default();

        let branch_row = client
            .update(
                &format!(
                    "INSERT INTO vfs.branch (repository, name) VALUES ({}, {}) RETURNING id",
                    sql_literal(&id.to_string()),
                    sql_literal("main")
                ),
                Some(1),
                &[],
            )?
            .first();
        let branch_id: Uuid = branch_row
            .get::<Uuid>(1)?
            .ok_or_else(|| EngineError::InvariantViolation("branch insert returned no id".into()))?;

        client.update(
            &format!(
                "UPDATE vfs.repository SET default_branch = {} WHERE id = {}",
                sql_literal(&branch_id.to_string()),
                sql_literal(&id.to_string())
            ),
            None,
            &[],
        )?;

        Ok(Repository {
            id,
            name: name.to_string(),
            default_branch: Some(branch_id),
            created_at,
        })
    })
}

fn resolve_default_branch_head(repository: Uuid) -> EngineResult<Option<Uuid>> {
    Spi::connect(|client| {
        let row = client
            .select(
                &format!(
                    "SELECT b.head FROM vfs.repository r \
                     JOIN vfs.branch b ON b.id = r.default_branch \
                     WHERE r.id = {}",
                    sql_literal(&repository.to_string())
                ),
                Some(1),
                &[],
            )?
            .first();
        Ok(row.get::<Uuid>(1)?)
    })
}

fn repository_has_commits(repository: Uuid) -> EngineResult<bool> {
    Spi::connect(|client| {
        Ok(client
            .select(
                &format!(
                    "SELECT 1 FROM vfs.commit WHERE repository = {} LIMIT 1",
                    sql_literal(&repository.to_string())
                ),
                Some(1),
                &[],
            )?
            .first()
            .get::<i32>(1)?
            .is_some())
    })
}

fn commit_repository(commit: Uuid) -> EngineResult<Option<Uuid>> {
    Spi::connect(|client| {
        Ok(client
            .select(
                &format!(
                    "SELECT repository FROM vfs.commit WHERE id = {}",
                    sql_literal(&commit.to_string())
                ),
                Some(1),
                &[],
            )?
            .first()
            .get::<Uuid>(1)?)
    })
}

/// §4.6: write-time invariants for a new commit. If `parent` is omitted,
/// defaults to the repository's default-branch head; if the repository
/// already has commits but that head can't be resolved, an explicit parent
/// is required.
pub fn create_commit(repository: Uuid, parent: Option<Uuid>, message: Option<&str>) -> EngineResult<Commit> {
    let resolved_parent = match parent {
        Some(p) => {
            let p_repo = commit_repository(p)?
                .ok_or_else(|| EngineError::NotFound(format!("parent commit {p} not found")))?;
            if p_repo != repository {
                return Err(EngineError::CrossRepository(format!(
                    "parent commit {p} belongs to a different repository"
                )));
            }
            Some(p)
        }
        None => {
            let head = resolve_default_branch_head(repository)?;
            if head.is_none() && repository_has_commits(repository)? {
                return Err(EngineError::InvariantViolation(
                    "repository has commits but no resolvable default head; explicit parent required".into(),
                ));
            }
            head
        }
    };

    Spi::connect_mut(|client| {
        let sql = format!(
            "INSERT INTO vfs.commit (repository, parent, message) VALUES ({}, {}, {}) \
             RETURNING id, created_at",
            sql_literal(&repository.to_string()),
            match resolved_parent {
                Some(p) => sql_literal(&p.to_string()),
                None => "NULL".to_string(),
            },
            sql_literal_or_null(&message.map(|s| s.to_string())),
        );
        let row = client.update(&sql, Some(1), &[])?.first();
        let id: Uuid = row
            .get::<Uuid>(1)?
            .ok_or_else(|| EngineError::InvariantViolation("commit insert returned no id".into()))?;
        let created_at: String = row.get::<String>(2)?.unwrap_or_default();
        Ok(Commit {
            id,
            repository,
            parent: resolved_parent,
            merged_from: None,
            message: message.map(|s| s.to_string()),
            created_at,
        })
    })
}

/// Insert a merge commit row (§4.4 phase 1): `parent = target_head`,
/// `merged_from = source_head`. Does not run any finalize logic.
pub fn create_merge_commit(
    repository: Uuid,
    target_head: Uuid,
    source_head: Uuid,
    message: Option<&str>,
) -> EngineResult<Commit> {
    let target_repo = commit_repository(target_head)?
        .ok_or_else(|| EngineError::NotFound(format!("commit {target_head} not found")))?;
    let source_repo = commit_repository(source_head)?
        .ok_or_else(|| EngineError::NotFound(format!("commit {source_head} not found")))?;
    if target_repo != repository || source_repo != repository {
        return Err(EngineError::CrossRepository(
            "merge commit parents must belong to the same repository".into(),
        ));
    }

    Spi::connect_mut(|client| {
        let sql = format!(
            "INSERT INTO vfs.commit (repository, parent, merged_from, message) \
             VALUES ({}, {}, {}, {}) RETURNING id, created_at",
            sql_literal(&repository.to_string()),
            sql_literal(&target_head.to_string()),
            sql_literal(&source_head.to_string()),
            sql_literal_or_null(&message.map(|s| s.to_string())),
        );
        let row = client.update(&sql, Some(1), &[])?.first();
        let id: Uuid = row
            .get::<Uuid>(1)?
            .ok_or_else(|| EngineError::InvariantViolation("commit insert returned no id".into()))?;
        let created_at: String = row.get::<String>(2)?.unwrap_or_default();
        Ok(Commit {
            id,
            repository,
            parent: Some(target_head),
            merged_from: Some(source_head),
            message: message.map(|s| s.to_string()),
            created_at,
        })
    })
}

/// §4.1/§4.6: canonicalize `path`, apply tombstone/symlink flag rules, and
/// insert (or replace) the `(commit, path)` `FileDelta` row.
pub fn write_file(
    commit: Uuid,
    path: &str,
    content: Option<&str>,
    is_deleted: bool,
    is_symlink: bool,
) -> EngineResult<FileDelta> {
    let path = normalize_path(path)?;

    let (is_symlink, content) = if is_deleted {
        (false, String::new())
    } else {
        (is_symlink, content.unwrap_or("").to_string())
    };

    Spi::connect_mut(|client| {
        let existing = client
            .select(
                &format!(
                    "SELECT 1 FROM vfs.file_delta WHERE commit = {} AND path = {}",
                    sql_literal(&commit.to_string()),
                    sql_literal(&path)
                ),
                Some(1),
                &[],
            )?
            .first()
            .get::<i32>(1)?
            .is_some();
        if existing {
            return Err(EngineError::InvariantViolation(format!(
                "duplicate (commit, path) row for commit {commit} path {path}"
            )));
        }

        let sql = format!(
            "INSERT INTO vfs.file_delta (commit, path, content, is_deleted, is_symlink) \
             VALUES ({}, {}, {}, {}, {}) RETURNING id, created_at",
            sql_literal(&commit.to_string()),
            sql_literal(&path),
            sql_literal(&content),
            is_deleted,
            is_symlink,
        );
        let row = client.update(&sql, Some(1), &[])?.first();
        let id: i64 = row.get::<i64>(1)?.unwrap_or(0);
        let created_at: String = row.get::<String>(2)?.unwrap_or_default();
        Ok(FileDelta {
            id,
            commit,
            path,
            content,
            is_deleted,
            is_symlink,
            created_at,
        })
    })
}

/// §4.6: creating a branch without a head defaults it to the repository's
/// default-branch head; same unresolvable-head rule as `create_commit`.
pub fn create_branch(repository: Uuid, name: &str, head: Option<Uuid>) -> EngineResult<Branch> {
    let resolved_head = match head {
        Some(h) => {
            let h_repo = commit_repository(h)?
                .ok_or_else(|| EngineError::NotFound(format!("commit {h} not found")))?;
            if h_repo != repository {
                return Err(EngineError::CrossRepository(format!(
                    "commit {h} belongs to a different repository"
                )));
            }
            Some(h)
        }
        None => {
            let resolved = resolve_default_branch_head(repository)?;
            if resolved.is_none() && repository_has_commits(repository)? {
                return Err(EngineError::InvariantViolation(
                    "repository has commits but no resolvable default head; explicit head required".into(),
                ));
            }
            resolved
        }
    };

    Spi::connect_mut(|client| {
        let sql = format!(
            "INSERT INTO vfs.branch (repository, name, head) VALUES ({}, {}, {}) RETURNING id",
            sql_literal(&repository.to_string()),
            sql_literal(name),
            match resolved_head {
                Some(h) => sql_literal(&h.to_string()),
                None => "NULL".to_string(),
            },
        );
        let row = client.update(&sql, Some(1), &[])?.first();
        let id: Uuid = row
            .get::<Uuid>(1)?
            .ok_or_else(|| EngineError::InvariantViolation("branch insert returned no id".into()))?;
        Ok(Branch {
            id,
            repository,
            name: name.to_string(),
            head: resolved_head,
        })
    })
}

pub fn advance_branch_head(branch: Uuid, new_head: Uuid) -> EngineResult<()> {
    Spi::connect_mut(|client| {
        client.update(
            &format!(
                "UPDATE vfs.branch SET head = {} WHERE id = {}",
                sql_literal(&new_head.to_string()),
                sql_literal(&branch.to_string())
            ),
            None,
            &[],
        )?;
        Ok(())
    })
}

/// Supplemented (`SPEC_FULL.md`): a repository's default branch cannot be
/// deleted.
pub fn delete_branch(branch: Uuid) -> EngineResult<()> {
    Spi::connect_mut(|client| {
        let is_default = client
            .select(
                &format!(
                    "SELECT 1 FROM vfs.repository r JOIN vfs.branch b ON b.id = r.default_branch \
                     WHERE b.id = {}",
                    sql_literal(&branch.to_string())
                ),
                Some(1),
                &[],
            )?
            .first()
            .get::<i32>(1)?
            .is_some();
        if is_default {
            return Err(EngineError::InvariantViolation(
                "cannot delete a repository's default branch".into(),
            ));
        }
        client.update(
            &format!("DELETE FROM vfs.branch WHERE id = {}", sql_literal(&branch.to_string())),
            None,
            &[],
        )?;
        Ok(())
    })
}

